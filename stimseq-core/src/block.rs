use crate::event::{EventKind, Nerve};
use serde::Serialize;

/// A scheduled unit sharing one ISI and one nerve condition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Block {
    isi: f64,
    nerve: Nerve,
    events: Vec<EventKind>,
    omission_positions: Vec<u32>,
}

impl Block {
    /// One sequence per entry of `omission_positions`: `pos - 1` stimulations
    /// followed by the omission. Returns `None` for `Nerve::None`.
    pub fn stimulation(isi: f64, nerve: Nerve, omission_positions: Vec<u32>) -> Option<Self> {
        let stim = EventKind::stimulation(nerve)?;
        let omis = EventKind::omission(nerve)?;

        let capacity = omission_positions.iter().map(|&p| p as usize).sum();
        let mut events = Vec::with_capacity(capacity);
        for &pos in &omission_positions {
            events.extend(std::iter::repeat(stim).take(pos.saturating_sub(1) as usize));
            events.push(omis);
        }

        Some(Self {
            isi,
            nerve,
            events,
            omission_positions,
        })
    }

    pub fn non_stimulation(isi: f64, n_events: usize) -> Self {
        Self {
            isi,
            nerve: Nerve::None,
            events: vec![EventKind::NonStim; n_events],
            omission_positions: Vec::new(),
        }
    }

    pub fn isi(&self) -> f64 {
        self.isi
    }

    pub fn nerve(&self) -> Nerve {
        self.nerve
    }

    pub fn events(&self) -> &[EventKind] {
        &self.events
    }

    /// Omission position drawn for each sequence; empty for non-stimulation blocks.
    pub fn omission_positions(&self) -> &[u32] {
        &self.omission_positions
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Nominal time spent in this block: one ISI per event.
    pub fn nominal_duration_secs(&self) -> f64 {
        self.isi * self.events.len() as f64
    }
}

/// Shuffled block order for a whole session. Never mutated once built.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExperimentPlan {
    blocks: Vec<Block>,
}

impl ExperimentPlan {
    pub fn new(blocks: Vec<Block>) -> Self {
        Self { blocks }
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Block> {
        self.blocks.iter()
    }

    pub fn total_events(&self) -> usize {
        self.blocks.iter().map(Block::len).sum()
    }

    /// Every omission position drawn for `nerve`, in plan order.
    pub fn drawn_positions(&self, nerve: Nerve) -> Vec<u32> {
        self.blocks
            .iter()
            .filter(|b| b.nerve == nerve)
            .flat_map(|b| b.omission_positions.iter().copied())
            .collect()
    }
}

impl<'a> IntoIterator for &'a ExperimentPlan {
    type Item = &'a Block;
    type IntoIter = std::slice::Iter<'a, Block>;

    fn into_iter(self) -> Self::IntoIter {
        self.blocks.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stimulation_block_is_runs_ending_in_omission() {
        let block = Block::stimulation(0.5, Nerve::Median, vec![3, 2]).unwrap();
        use EventKind::*;
        assert_eq!(
            block.events(),
            &[StimMedian, StimMedian, OmisMedian, StimMedian, OmisMedian]
        );
        assert_eq!(block.omission_positions(), &[3, 2]);
        assert!((block.nominal_duration_secs() - 2.5).abs() < 1e-12);
    }

    #[test]
    fn no_stimulation_block_for_none_nerve() {
        assert!(Block::stimulation(1.0, Nerve::None, vec![4]).is_none());
        let block = Block::non_stimulation(1.0, 8);
        assert_eq!(block.len(), 8);
        assert_eq!(block.nerve(), Nerve::None);
        assert!(block.events().iter().all(|e| *e == EventKind::NonStim));
    }

    #[test]
    fn drawn_positions_filters_by_nerve() {
        let plan = ExperimentPlan::new(vec![
            Block::stimulation(1.0, Nerve::Tibial, vec![4, 5]).unwrap(),
            Block::non_stimulation(1.0, 8),
            Block::stimulation(1.0, Nerve::Median, vec![5]).unwrap(),
            Block::stimulation(0.5, Nerve::Tibial, vec![6]).unwrap(),
        ]);
        assert_eq!(plan.drawn_positions(Nerve::Tibial), vec![4, 5, 6]);
        assert_eq!(plan.drawn_positions(Nerve::Median), vec![5]);
        assert_eq!(plan.total_events(), 9 + 8 + 5 + 6);
    }
}
