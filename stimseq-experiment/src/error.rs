use std::fmt;
use std::io;
use std::path::PathBuf;

use stimseq_core::{ConfigError, EventKind, TriggerCode};
use thiserror::Error;

/// Failure to deliver a trigger. Never retried.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("trigger output I/O failed: {0}")]
    Io(#[from] io::Error),
    #[error("trigger code {0} does not fit on an 8-bit port")]
    CodeOutOfRange(TriggerCode),
    #[error("no trigger code mapped for `{0}`")]
    Unmapped(EventKind),
    #[error("{0} is not supported on this platform")]
    Unsupported(&'static str),
}

#[derive(Debug, Error)]
pub enum LoadError {
    #[error("cannot read config {path}: {source}")]
    Io { path: PathBuf, source: io::Error },
    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}

/// Which event was in flight when a session failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Position {
    BaselineRest,
    FinalRest,
    Block { block: usize, event: usize },
    /// Operator check-in after the given block.
    Break { after: usize },
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Position::BaselineRest => f.write_str("baseline resting state"),
            Position::FinalRest => f.write_str("final resting state"),
            Position::Block { block, event } => write!(f, "block {block}, event {event}"),
            Position::Break { after } => write!(f, "break after block {after}"),
        }
    }
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error("trigger `{kind}` failed at {at}: {source}")]
    Sink {
        at: Position,
        kind: EventKind,
        source: SinkError,
    },
    #[error("event log write failed at {at}: {source}")]
    Log { at: Position, source: io::Error },
    #[error("operator confirmation failed at {at}: {source}")]
    Confirmation { at: Position, source: io::Error },
}
