/// Where a session stands. Block indices are 1-based.
#[derive(Copy, Debug, Clone, PartialEq, Eq, Default)]
pub enum SessionPhase {
    #[default]
    Idle,
    RestingBaseline,
    Running(usize),
    /// Pause after the given block, waiting for the operator.
    OnBreak(usize),
    RestingFinal,
    Done,
}

/// Inputs needed to walk the session state machine.
#[derive(Copy, Debug, Clone, PartialEq, Eq)]
pub struct BreakSchedule {
    pub total_blocks: usize,
    pub blocks_between_breaks: usize,
}

impl BreakSchedule {
    pub fn new(total_blocks: usize, blocks_between_breaks: usize) -> Self {
        Self {
            total_blocks,
            blocks_between_breaks,
        }
    }

    /// True when a break follows block `index` (1-based). Never after the last block.
    pub fn break_after(&self, index: usize) -> bool {
        self.blocks_between_breaks > 0
            && index < self.total_blocks
            && index % self.blocks_between_breaks == 0
    }

    /// Breaks taken over a whole session.
    pub fn break_count(&self) -> usize {
        (1..=self.total_blocks).filter(|&i| self.break_after(i)).count()
    }
}

impl SessionPhase {
    pub fn next(&self, schedule: &BreakSchedule) -> Option<Self> {
        use SessionPhase::*;
        Some(match *self {
            Idle => RestingBaseline,
            RestingBaseline if schedule.total_blocks == 0 => RestingFinal,
            RestingBaseline => Running(1),
            Running(i) if i >= schedule.total_blocks => RestingFinal,
            Running(i) if schedule.break_after(i) => OnBreak(i),
            Running(i) => Running(i + 1),
            OnBreak(i) => Running(i + 1),
            RestingFinal => Done,
            Done => return None,
        })
    }

    pub fn is_resting(&self) -> bool {
        matches!(self, SessionPhase::RestingBaseline | SessionPhase::RestingFinal)
    }

    pub fn block_index(&self) -> Option<usize> {
        match self {
            SessionPhase::Running(i) => Some(*i),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, SessionPhase::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn walk(schedule: BreakSchedule) -> Vec<SessionPhase> {
        let mut phases = vec![SessionPhase::Idle];
        let mut phase = SessionPhase::Idle;
        while let Some(next) = phase.next(&schedule) {
            phases.push(next);
            phase = next;
        }
        phases
    }

    #[test]
    fn breaks_follow_every_nth_block_but_not_the_last() {
        use SessionPhase::*;
        let phases = walk(BreakSchedule::new(4, 2));
        assert_eq!(
            phases,
            vec![
                Idle,
                RestingBaseline,
                Running(1),
                Running(2),
                OnBreak(2),
                Running(3),
                Running(4),
                RestingFinal,
                Done
            ]
        );
        assert_eq!(BreakSchedule::new(4, 2).break_count(), 1);
    }

    #[test]
    fn empty_plan_goes_straight_to_final_rest() {
        use SessionPhase::*;
        assert_eq!(
            walk(BreakSchedule::new(0, 3)),
            vec![Idle, RestingBaseline, RestingFinal, Done]
        );
    }

    #[test]
    fn block_index_only_while_running() {
        assert_eq!(SessionPhase::Running(3).block_index(), Some(3));
        assert_eq!(SessionPhase::OnBreak(3).block_index(), None);
        assert!(SessionPhase::RestingFinal.is_resting());
    }
}
