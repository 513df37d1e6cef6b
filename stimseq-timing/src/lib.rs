pub mod simulated;
pub mod stats;
pub mod timer;

pub use simulated::SimulatedTimer;
pub use stats::{IntervalRecorder, TimingStats};
pub use timer::{HighPrecisionTimer, Timer};
