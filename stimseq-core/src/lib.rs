pub mod block;
pub mod error;
pub mod event;
pub mod phase;

pub use block::{Block, ExperimentPlan};
pub use error::ConfigError;
pub use event::{EventKind, Nerve, TriggerCode};
pub use phase::{BreakSchedule, SessionPhase};
