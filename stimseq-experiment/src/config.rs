use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use stimseq_core::{ConfigError, EventKind, TriggerCode};

use crate::error::LoadError;

/// Experiment parameters. Deserialized from JSON; missing fields take the
/// defaults of the standard omission paradigm.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExperimentConfig {
    /// Inter-stimulus intervals, seconds.
    #[serde(alias = "ISIs")]
    pub isis: Vec<f64>,
    /// Sequences per block.
    pub n_sequences: usize,
    /// Stimulation blocks per ISI per nerve.
    pub n_blocks: usize,
    /// Non-stimulation blocks per ISI.
    pub n_no_stim_blocks: usize,
    /// Positions at which the omission may fall within a sequence.
    pub omission_positions: Vec<u32>,
    pub blocks_between_breaks: usize,
    /// Length of each resting-state recording, seconds.
    pub rest_duration: f64,
    /// How long a level trigger stays asserted, seconds.
    pub trigger_duration: f64,
    /// Expected length of a break, seconds. Only feeds the duration estimate.
    pub break_duration: f64,
    pub trigger_mapping: TriggerMapping,
    /// Push markers to an event stream instead of holding a level on a port.
    #[serde(alias = "trigger_lsl")]
    pub trigger_stream: bool,
    /// Permit two event kinds to share a trigger code.
    pub allow_code_aliases: bool,
}

impl Default for ExperimentConfig {
    fn default() -> Self {
        Self {
            isis: vec![0.5, 0.65, 0.8, 1.0],
            n_sequences: 5,
            n_blocks: 10,
            n_no_stim_blocks: 2,
            omission_positions: vec![4, 5, 6, 7],
            blocks_between_breaks: 10,
            rest_duration: 5.0 * 60.0,
            trigger_duration: 0.010,
            break_duration: 10.0,
            trigger_mapping: TriggerMapping::default(),
            trigger_stream: false,
            allow_code_aliases: false,
        }
    }
}

impl ExperimentConfig {
    pub fn from_json_str(json: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn load(path: &Path) -> Result<Self, LoadError> {
        let text = std::fs::read_to_string(path).map_err(|source| LoadError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&text).map_err(|source| LoadError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.isis.is_empty() {
            return Err(ConfigError::EmptyIsis);
        }
        if let Some(&isi) = self.isis.iter().find(|isi| !(isi.is_finite() && **isi > 0.0)) {
            return Err(ConfigError::InvalidIsi(isi));
        }
        for (field, value) in [
            ("n_sequences", self.n_sequences),
            ("n_blocks", self.n_blocks),
            ("blocks_between_breaks", self.blocks_between_breaks),
        ] {
            if value == 0 {
                return Err(ConfigError::MustBePositive(field));
            }
        }

        if self.omission_positions.is_empty() {
            return Err(ConfigError::EmptyOmissionPositions);
        }
        for (i, &pos) in self.omission_positions.iter().enumerate() {
            if pos < 2 {
                return Err(ConfigError::OmissionPositionTooSmall(pos));
            }
            if self.omission_positions[..i].contains(&pos) {
                return Err(ConfigError::DuplicateOmissionPosition(pos));
            }
        }

        if self.event_upper_bound().is_none_or(|n| n > MAX_PLAN_EVENTS) {
            return Err(ConfigError::PlanTooLarge {
                limit: MAX_PLAN_EVENTS,
            });
        }

        check_duration("rest_duration", self.rest_duration, true)?;
        check_duration("break_duration", self.break_duration, true)?;
        check_duration("trigger_duration", self.trigger_duration, false)?;

        let range = if self.trigger_stream {
            TriggerMapping::STREAM_RANGE
        } else {
            TriggerMapping::PORT_RANGE
        };
        self.trigger_mapping.validate(range, self.allow_code_aliases)
    }

    /// `floor(mean(omission_positions))`: events per non-stimulation sequence.
    pub fn mean_omission_count(&self) -> usize {
        if self.omission_positions.is_empty() {
            return 0;
        }
        let sum: u64 = self.omission_positions.iter().map(|&p| u64::from(p)).sum();
        (sum / self.omission_positions.len() as u64) as usize
    }

    /// Omission positions drawn for each stimulated nerve over the session.
    pub fn draws_per_nerve(&self) -> usize {
        self.n_sequences
            .saturating_mul(self.isis.len())
            .saturating_mul(self.n_blocks)
    }

    pub fn stim_blocks(&self) -> usize {
        self.n_blocks.saturating_mul(self.isis.len()).saturating_mul(2)
    }

    pub fn no_stim_blocks(&self) -> usize {
        self.n_no_stim_blocks.saturating_mul(self.isis.len())
    }

    pub fn total_blocks(&self) -> usize {
        self.stim_blocks().saturating_add(self.no_stim_blocks())
    }

    /// Block events in the largest plan this config can produce, or `None`
    /// when counting them overflows.
    pub fn event_upper_bound(&self) -> Option<usize> {
        let longest = self.omission_positions.iter().copied().max().unwrap_or(0) as usize;
        let stim = self
            .n_blocks
            .checked_mul(self.isis.len())?
            .checked_mul(self.n_sequences)?
            .checked_mul(longest)?
            .checked_mul(2)?;
        let no_stim = self
            .n_no_stim_blocks
            .checked_mul(self.isis.len())?
            .checked_mul(self.n_sequences)?
            .checked_mul(self.mean_omission_count())?;
        stim.checked_add(no_stim)
    }

    pub fn trigger_hold(&self) -> Duration {
        Duration::try_from_secs_f64(self.trigger_duration).unwrap_or(Duration::ZERO)
    }

    pub fn rest(&self) -> Duration {
        Duration::try_from_secs_f64(self.rest_duration).unwrap_or(Duration::ZERO)
    }
}

fn check_duration(field: &'static str, value: f64, zero_ok: bool) -> Result<(), ConfigError> {
    let ok = value.is_finite() && (value > 0.0 || (zero_ok && value == 0.0));
    if ok {
        Ok(())
    } else {
        Err(ConfigError::InvalidDuration { field, value })
    }
}

/// Most block events a single session may schedule.
pub const MAX_PLAN_EVENTS: usize = 10_000_000;

/// Trigger code for every event kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TriggerMapping(BTreeMap<EventKind, TriggerCode>);

impl TriggerMapping {
    /// An 8-bit parallel port; 0 is the released level.
    pub const PORT_RANGE: (TriggerCode, TriggerCode) = (1, 255);
    pub const STREAM_RANGE: (TriggerCode, TriggerCode) = (1, TriggerCode::MAX);

    pub fn new(codes: impl IntoIterator<Item = (EventKind, TriggerCode)>) -> Self {
        Self(codes.into_iter().collect())
    }

    pub fn code(&self, kind: EventKind) -> Option<TriggerCode> {
        self.0.get(&kind).copied()
    }

    /// Reverse lookup. With aliased codes the first kind in canonical order wins.
    pub fn kind_for(&self, code: TriggerCode) -> Option<EventKind> {
        EventKind::ALL
            .into_iter()
            .find(|kind| self.code(*kind) == Some(code))
    }

    pub fn iter(&self) -> impl Iterator<Item = (EventKind, TriggerCode)> + '_ {
        self.0.iter().map(|(k, c)| (*k, *c))
    }

    pub fn validate(
        &self,
        (min, max): (TriggerCode, TriggerCode),
        allow_aliases: bool,
    ) -> Result<(), ConfigError> {
        let mut seen: Vec<(TriggerCode, EventKind)> = Vec::with_capacity(EventKind::ALL.len());
        for kind in EventKind::ALL {
            let code = self.code(kind).ok_or(ConfigError::MissingTriggerCode(kind))?;
            if code < min || code > max {
                return Err(ConfigError::TriggerCodeOutOfRange {
                    kind,
                    code,
                    min,
                    max,
                });
            }
            if !allow_aliases {
                if let Some(&(_, first)) = seen.iter().find(|(c, _)| *c == code) {
                    return Err(ConfigError::DuplicateTriggerCode {
                        code,
                        first,
                        second: kind,
                    });
                }
            }
            seen.push((code, kind));
        }
        Ok(())
    }
}

impl Default for TriggerMapping {
    fn default() -> Self {
        Self::new([
            (EventKind::StimTibial, 1),
            (EventKind::OmisTibial, 10),
            (EventKind::StimMedian, 2),
            (EventKind::OmisMedian, 20),
            (EventKind::NonStim, 30),
            (EventKind::RestStart, 100),
            (EventKind::RestEnd, 110),
        ])
    }
}

/// Where a session's log goes. Supplied by whoever collected the participant id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSettings {
    pub output_dir: PathBuf,
    pub participant_id: String,
}

impl SessionSettings {
    pub fn new(output_dir: impl Into<PathBuf>, participant_id: impl Into<String>) -> Self {
        Self {
            output_dir: output_dir.into(),
            participant_id: participant_id.into(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let id = self.participant_id.trim();
        if id.is_empty() || id.contains(['/', '\\']) || id == "." || id == ".." {
            return Err(ConfigError::InvalidParticipantId(self.participant_id.clone()));
        }
        Ok(())
    }

    /// `<output_dir>/<participant>/logfile_<participant>.csv`
    pub fn log_path(&self) -> PathBuf {
        self.output_dir
            .join(&self.participant_id)
            .join(format!("logfile_{}.csv", self.participant_id))
    }
}
