//! Trigger scheduling.
//!
//! Each event is stamped just before its trigger goes out, and the next one
//! is due exactly one ISI after that stamp. Trigger hold time and log I/O
//! therefore never add up across events. A late event pushes the rest of the
//! block back with it: nothing is skipped and nothing catches up.

use std::io::Write;
use std::time::Duration;

use stimseq_core::{Block, EventKind, TriggerCode};
use stimseq_timing::{IntervalRecorder, Timer, TimingStats};
use tracing::{debug, info, warn};

use crate::config::TriggerMapping;
use crate::error::{Position, SessionError, SinkError};
use crate::log::{EventLog, LogRecord};
use crate::sink::TriggerSink;

/// Start-of-event lateness worth telling the operator about.
const LATE_WARNING: Duration = Duration::from_millis(1);

/// Resolves `kind` and delivers it through `sink`.
pub fn emit<S, T>(
    sink: &mut S,
    kind: EventKind,
    mapping: &TriggerMapping,
    trigger_duration: Duration,
    timer: &T,
) -> Result<TriggerCode, SinkError>
where
    S: TriggerSink + ?Sized,
    T: Timer,
{
    let code = mapping.code(kind).ok_or(SinkError::Unmapped(kind))?;
    sink.pulse(code, trigger_duration, timer)?;
    Ok(code)
}

/// When the event after one stamped at `start_ns` is due.
pub fn next_deadline(start_ns: u64, isi: Duration) -> u64 {
    start_ns.saturating_add(u64::try_from(isi.as_nanos()).unwrap_or(u64::MAX))
}

pub fn isi_duration(isi_secs: f64) -> Duration {
    Duration::try_from_secs_f64(isi_secs).unwrap_or(Duration::ZERO)
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BlockReport {
    pub index: usize,
    pub events: usize,
    pub timing: TimingStats,
    pub max_late_ns: u64,
}

pub struct TriggerScheduler<S, T> {
    sink: S,
    timer: T,
    mapping: TriggerMapping,
    hold: Duration,
    origin_ns: u64,
    intervals: IntervalRecorder,
    emitted: usize,
}

impl<S: TriggerSink, T: Timer> TriggerScheduler<S, T> {
    pub fn new(sink: S, timer: T, mapping: TriggerMapping, hold: Duration) -> Self {
        let origin_ns = timer.now();
        Self {
            sink,
            timer,
            mapping,
            hold,
            origin_ns,
            intervals: IntervalRecorder::default(),
            emitted: 0,
        }
    }

    /// Sets the reference every log timestamp is measured from.
    pub fn start_clock(&mut self) {
        self.origin_ns = self.timer.now();
        self.intervals.clear();
        self.emitted = 0;
    }

    /// Seconds since the reference set by [`Self::start_clock`].
    pub fn session_secs(&self, ts_ns: u64) -> f64 {
        ts_ns.saturating_sub(self.origin_ns) as f64 / 1e9
    }

    pub fn emit(&mut self, kind: EventKind) -> Result<TriggerCode, SinkError> {
        let code = emit(&mut self.sink, kind, &self.mapping, self.hold, &self.timer)?;
        self.emitted += 1;
        Ok(code)
    }

    /// Emits every event of `block`, one ISI apart, logging each one.
    pub fn run_block<W: Write>(
        &mut self,
        index: usize,
        block: &Block,
        log: &mut EventLog<W>,
    ) -> Result<BlockReport, SessionError> {
        let isi = isi_duration(block.isi());
        let mut block_intervals = IntervalRecorder::new(block.len());
        let mut previous_start: Option<u64> = None;
        let mut deadline: Option<u64> = None;
        let mut max_late_ns = 0u64;

        debug!(
            block = index,
            nerve = %block.nerve(),
            isi = block.isi(),
            events = block.len(),
            "block started"
        );

        for (i, &kind) in block.events().iter().enumerate() {
            let at = Position::Block {
                block: index,
                event: i + 1,
            };
            let start = self.timer.now();

            if let Some(due) = deadline {
                let late = start.saturating_sub(due);
                max_late_ns = max_late_ns.max(late);
                if late > LATE_WARNING.as_nanos() as u64 {
                    warn!(block = index, event = i + 1, late_us = late / 1_000, "event started late");
                }
            }
            if let Some(prev) = previous_start {
                let interval = Duration::from_nanos(start - prev);
                self.intervals.record(interval, isi);
                block_intervals.record(interval, isi);
            }

            let code = match self.emit(kind) {
                Ok(code) => code,
                Err(source) => {
                    // the rows already written must survive the abort
                    log.flush()
                        .map_err(|source| SessionError::Log { at, source })?;
                    return Err(SessionError::Sink { at, kind, source });
                }
            };

            log.append(&LogRecord {
                timestamp: self.session_secs(start),
                block: index,
                isi: block.isi(),
                nerve: block.nerve(),
                trigger: code,
            })
            .map_err(|source| SessionError::Log { at, source })?;

            let due = next_deadline(start, isi);
            self.timer.spin_until(due);
            previous_start = Some(start);
            deadline = Some(due);
        }

        let report = BlockReport {
            index,
            events: block.len(),
            timing: block_intervals.stats(),
            max_late_ns,
        };
        info!(
            block = index,
            events = report.events,
            mean_interval_ms = report.timing.average_interval_ns / 1e6,
            jitter_us = report.timing.jitter_ns / 1e3,
            max_late_us = max_late_ns / 1_000,
            "block finished"
        );
        Ok(report)
    }

    pub fn timing_stats(&self) -> TimingStats {
        self.intervals.stats()
    }

    pub fn interval_errors_ns(&self) -> Vec<f64> {
        self.intervals.errors_ns()
    }

    pub fn emitted(&self) -> usize {
        self.emitted
    }

    pub fn timer(&self) -> &T {
        &self.timer
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn into_sink(self) -> S {
        self.sink
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::read_log;
    use crate::sink::{DigitalPort, LevelSink};
    use stimseq_core::Nerve;
    use stimseq_timing::SimulatedTimer;

    struct Port {
        timer: SimulatedTimer,
        writes: Vec<(u8, u64)>,
        fail_on: Option<usize>,
        slow_write: Option<(usize, Duration)>,
    }

    impl Port {
        fn new(timer: &SimulatedTimer) -> Self {
            Self {
                timer: timer.clone(),
                writes: Vec::new(),
                fail_on: None,
                slow_write: None,
            }
        }
    }

    impl DigitalPort for Port {
        fn write(&mut self, value: u8) -> Result<(), SinkError> {
            if self.fail_on == Some(self.writes.len()) {
                return Err(SinkError::Io(std::io::Error::other("cable pulled")));
            }
            self.writes.push((value, self.timer.now()));
            if let Some((n, delay)) = self.slow_write {
                if n + 1 == self.writes.len() {
                    self.timer.advance(delay);
                }
            }
            Ok(())
        }
    }

    #[test]
    fn deadline_is_one_isi_after_the_stamp() {
        assert_eq!(next_deadline(1_000, Duration::from_millis(100)), 100_001_000);
        assert_eq!(next_deadline(u64::MAX - 1, Duration::from_secs(1)), u64::MAX);
        assert_eq!(isi_duration(0.5), Duration::from_millis(500));
        assert_eq!(isi_duration(-1.0), Duration::ZERO);
    }

    #[test]
    fn emit_writes_code_then_zero_after_hold() {
        let timer = SimulatedTimer::new();
        timer.advance(Duration::from_millis(5));
        let mut sink = LevelSink::new(Port::new(&timer));
        let code = emit(
            &mut sink,
            EventKind::OmisMedian,
            &TriggerMapping::default(),
            Duration::from_millis(10),
            &timer,
        )
        .unwrap();
        assert_eq!(code, 20);
        let writes = &sink.port().writes;
        assert_eq!(writes[writes.len() - 2], (20, 5_000_000));
        assert_eq!(writes[writes.len() - 1], (0, 15_000_000));
    }

    #[test]
    fn unmapped_kind_is_refused() {
        let timer = SimulatedTimer::new();
        let mut sink = LevelSink::new(Port::new(&timer));
        let mapping = TriggerMapping::new([(EventKind::NonStim, 30)]);
        let err = emit(&mut sink, EventKind::RestStart, &mapping, Duration::ZERO, &timer)
            .unwrap_err();
        assert!(matches!(err, SinkError::Unmapped(EventKind::RestStart)));
        assert!(sink.port().writes.is_empty());
    }

    #[test]
    fn block_events_are_one_isi_apart_and_logged() {
        let timer = SimulatedTimer::new();
        let sink = LevelSink::new(Port::new(&timer));
        let mut scheduler = TriggerScheduler::new(
            sink,
            timer.clone(),
            TriggerMapping::default(),
            Duration::from_millis(10),
        );
        timer.advance(Duration::from_secs(2));
        scheduler.start_clock();
        timer.advance(Duration::from_secs(1));

        let block = Block::stimulation(0.5, Nerve::Tibial, vec![3]).unwrap();
        let mut log = EventLog::new(Vec::new()).unwrap();
        let report = scheduler.run_block(4, &block, &mut log).unwrap();

        assert_eq!(report.events, 3);
        assert_eq!(report.max_late_ns, 0);
        let rows = read_log(log.get_ref().as_slice()).unwrap();
        let stamps: Vec<f64> = rows.iter().map(|r| r.timestamp).collect();
        assert_eq!(stamps, vec![1.0, 1.5, 2.0]);
        assert!(rows.iter().all(|r| r.block == 4 && r.nerve == Nerve::Tibial));
        assert_eq!(
            rows.iter().map(|r| r.trigger).collect::<Vec<_>>(),
            vec![1, 1, 10]
        );
        // the block ends one ISI after its last event
        assert_eq!(timer.now(), 3_000_000_000 + 1_500_000_000);
    }

    #[test]
    fn slow_emission_delays_but_does_not_accumulate() {
        let timer = SimulatedTimer::new();
        let mut port = Port::new(&timer);
        // event 2's assert hangs for 150 ms, longer than the ISI
        port.slow_write = Some((2, Duration::from_millis(150)));
        let mut scheduler = TriggerScheduler::new(
            LevelSink::new(port),
            timer.clone(),
            TriggerMapping::default(),
            Duration::from_millis(10),
        );
        let block = Block::non_stimulation(0.1, 5);
        let mut log = EventLog::new(Vec::new()).unwrap();
        let report = scheduler.run_block(1, &block, &mut log).unwrap();

        let errors = scheduler.interval_errors_ns();
        assert_eq!(errors.len(), 4);
        assert_eq!(errors[0], 0.0);
        assert_eq!(errors[1], 60_000_000.0);
        assert_eq!(errors[2], 0.0);
        assert_eq!(errors[3], 0.0);
        assert_eq!(report.max_late_ns, 60_000_000);
    }

    #[test]
    fn sink_failure_names_block_and_event_and_keeps_earlier_rows() {
        let timer = SimulatedTimer::new();
        let mut port = Port::new(&timer);
        // writes 0..3 are event 1 and 2 (assert + release); the third assert fails
        port.fail_on = Some(4);
        let mut scheduler = TriggerScheduler::new(
            LevelSink::new(port),
            timer.clone(),
            TriggerMapping::default(),
            Duration::from_millis(10),
        );
        let block = Block::non_stimulation(0.2, 5);
        let mut log = EventLog::new(Vec::new()).unwrap();
        let err = scheduler.run_block(7, &block, &mut log).unwrap_err();

        assert!(err.to_string().contains("block 7, event 3"));
        match err {
            SessionError::Sink { at, kind, .. } => {
                assert_eq!(at, Position::Block { block: 7, event: 3 });
                assert_eq!(kind, EventKind::NonStim);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(log.records(), 2);
    }
}
