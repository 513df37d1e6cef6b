use serde::{Deserialize, Serialize};
use std::fmt;

/// Integer written to the digital output or marker stream.
pub type TriggerCode = i32;

/// Every kind of event a session can emit. Closed set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    StimTibial,
    OmisTibial,
    StimMedian,
    OmisMedian,
    NonStim,
    RestStart,
    RestEnd,
}

impl EventKind {
    /// Canonical order, also used to break ties when codes are aliased.
    pub const ALL: [EventKind; 7] = [
        EventKind::StimTibial,
        EventKind::OmisTibial,
        EventKind::StimMedian,
        EventKind::OmisMedian,
        EventKind::NonStim,
        EventKind::RestStart,
        EventKind::RestEnd,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            EventKind::StimTibial => "stim_tibial",
            EventKind::OmisTibial => "omis_tibial",
            EventKind::StimMedian => "stim_median",
            EventKind::OmisMedian => "omis_median",
            EventKind::NonStim => "non_stim",
            EventKind::RestStart => "rest_start",
            EventKind::RestEnd => "rest_end",
        }
    }

    /// Stimulation event for a nerve, `None` for the no-stimulation condition.
    pub fn stimulation(nerve: Nerve) -> Option<Self> {
        match nerve {
            Nerve::Tibial => Some(EventKind::StimTibial),
            Nerve::Median => Some(EventKind::StimMedian),
            Nerve::None => None,
        }
    }

    pub fn omission(nerve: Nerve) -> Option<Self> {
        match nerve {
            Nerve::Tibial => Some(EventKind::OmisTibial),
            Nerve::Median => Some(EventKind::OmisMedian),
            Nerve::None => None,
        }
    }

    pub fn nerve(&self) -> Nerve {
        match self {
            EventKind::StimTibial | EventKind::OmisTibial => Nerve::Tibial,
            EventKind::StimMedian | EventKind::OmisMedian => Nerve::Median,
            _ => Nerve::None,
        }
    }

    pub fn is_omission(&self) -> bool {
        matches!(self, EventKind::OmisTibial | EventKind::OmisMedian)
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Stimulated nerve of a block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Nerve {
    Tibial,
    Median,
    None,
}

impl Nerve {
    pub const STIMULATED: [Nerve; 2] = [Nerve::Tibial, Nerve::Median];

    /// Label written to the session log.
    pub fn label(&self) -> &'static str {
        match self {
            Nerve::Tibial => "tibial",
            Nerve::Median => "median",
            Nerve::None => "None",
        }
    }
}

impl fmt::Display for Nerve {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stimulation_and_omission_share_nerve() {
        for nerve in Nerve::STIMULATED {
            let stim = EventKind::stimulation(nerve).unwrap();
            let omis = EventKind::omission(nerve).unwrap();
            assert_eq!(stim.nerve(), nerve);
            assert_eq!(omis.nerve(), nerve);
            assert!(omis.is_omission());
            assert!(!stim.is_omission());
        }
        assert_eq!(EventKind::stimulation(Nerve::None), None);
    }

    #[test]
    fn labels_match_serde_names() {
        for kind in EventKind::ALL {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.label()));
        }
        let nerve: Nerve = serde_json::from_str("\"median\"").unwrap();
        assert_eq!(nerve, Nerve::Median);
    }
}
