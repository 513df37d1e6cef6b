use crate::event::{EventKind, TriggerCode};
use thiserror::Error;

/// Invalid or missing experiment parameter. Raised before any hardware or file I/O.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("at least one inter-stimulus interval is required")]
    EmptyIsis,
    #[error("inter-stimulus interval {0} s must be finite and > 0")]
    InvalidIsi(f64),
    #[error("`{0}` must be greater than zero")]
    MustBePositive(&'static str),
    #[error("at least one omission position is required")]
    EmptyOmissionPositions,
    #[error("omission position {0} is listed more than once")]
    DuplicateOmissionPosition(u32),
    #[error("omission position {0} is invalid: a sequence needs at least one stimulation before its omission")]
    OmissionPositionTooSmall(u32),
    #[error("`{field}` = {value} s is invalid")]
    InvalidDuration { field: &'static str, value: f64 },
    #[error("participant id {0:?} must be non-empty and contain no path separators")]
    InvalidParticipantId(String),
    #[error("no trigger code configured for `{0}`")]
    MissingTriggerCode(EventKind),
    #[error("trigger code {code} for `{kind}` is out of range ({min}..={max})")]
    TriggerCodeOutOfRange {
        kind: EventKind,
        code: TriggerCode,
        min: TriggerCode,
        max: TriggerCode,
    },
    #[error("config expects a {expected} trigger output but a {actual} output was supplied (see trigger_stream)")]
    SinkModeMismatch {
        expected: &'static str,
        actual: &'static str,
    },
    #[error("block and sequence counts exceed {limit} events per session")]
    PlanTooLarge { limit: usize },
    #[error("`{first}` and `{second}` share trigger code {code}; set allow_code_aliases to permit this")]
    DuplicateTriggerCode {
        code: TriggerCode,
        first: EventKind,
        second: EventKind,
    },
}
