pub mod config;
pub mod confirm;
pub mod design;
pub mod error;
pub mod log;
pub mod scheduler;
pub mod session;
pub mod sink;

pub use config::{ExperimentConfig, SessionSettings, TriggerMapping};
pub use confirm::{AutoConfirm, Confirm, ConsoleConfirm};
pub use design::{count_event_kinds, count_event_labels, estimate_duration, generate, omission_balance};
pub use error::{LoadError, Position, SessionError, SinkError};
pub use log::{read_log, EventLog, LogRecord, LOG_HEADER};
pub use scheduler::{emit, BlockReport, TriggerScheduler};
pub use session::{SessionController, SessionSummary};
pub use sink::{
    DigitalPort, LevelSink, MarkerOutlet, NullPort, ParallelPort, SinkMode, StreamSink,
    TriggerSink, UdpMarkerOutlet,
};
