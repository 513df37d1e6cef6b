//! Session controller: resting states, blocks, and breaks in order.

use std::collections::BTreeMap;
use std::io::Write;
use std::time::Duration;

use rand::Rng;
use stimseq_core::{BreakSchedule, ConfigError, EventKind, ExperimentPlan, SessionPhase};
use stimseq_timing::{Timer, TimingStats};
use tracing::info;

use crate::config::ExperimentConfig;
use crate::confirm::Confirm;
use crate::design::{count_event_kinds, generate};
use crate::error::{Position, SessionError};
use crate::log::EventLog;
use crate::scheduler::{next_deadline, BlockReport, TriggerScheduler};
use crate::sink::{SinkMode, TriggerSink};

pub const REST_BEGIN_PROMPT: &str =
    "Ready to collect resting state data. Make sure the audiobook is turned off! Press Enter to begin...";
pub const REST_END_PROMPT: &str =
    "Finished collecting resting state data. Press Enter to continue...";
pub const CHECK_IN_PROMPT: &str = "Check in on the participant. Press Enter to continue...";

/// Pause before a break checkpoint so stray key presses land before the prompt.
pub const BREAK_PAUSE: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub blocks_run: usize,
    pub breaks: usize,
    pub events_logged: usize,
    pub triggers_sent: usize,
    pub counts: BTreeMap<EventKind, usize>,
    pub timing: TimingStats,
    pub elapsed_secs: f64,
}

/// The sink must deliver the kind of trigger the mapping was validated for.
fn check_sink_mode(config: &ExperimentConfig, mode: SinkMode) -> Result<(), ConfigError> {
    let expected = if config.trigger_stream {
        SinkMode::Stream
    } else {
        SinkMode::Level
    };
    if mode == expected {
        Ok(())
    } else {
        Err(ConfigError::SinkModeMismatch {
            expected: mode_name(expected),
            actual: mode_name(mode),
        })
    }
}

fn mode_name(mode: SinkMode) -> &'static str {
    match mode {
        SinkMode::Level => "level",
        SinkMode::Stream => "stream",
    }
}

pub struct SessionController<S, T, C, W: Write> {
    config: ExperimentConfig,
    plan: ExperimentPlan,
    scheduler: TriggerScheduler<S, T>,
    confirm: C,
    log: EventLog<W>,
    phase: SessionPhase,
    schedule: BreakSchedule,
    reports: Vec<BlockReport>,
    breaks: usize,
}

impl<S, T, C, W> SessionController<S, T, C, W>
where
    S: TriggerSink,
    T: Timer,
    C: Confirm,
    W: Write,
{
    pub fn new(
        config: ExperimentConfig,
        plan: ExperimentPlan,
        sink: S,
        timer: T,
        confirm: C,
        log: EventLog<W>,
    ) -> Result<Self, SessionError> {
        config.validate()?;
        check_sink_mode(&config, sink.mode())?;
        let scheduler = TriggerScheduler::new(
            sink,
            timer,
            config.trigger_mapping.clone(),
            config.trigger_hold(),
        );
        let schedule = BreakSchedule::new(plan.len(), config.blocks_between_breaks);
        Ok(Self {
            config,
            plan,
            scheduler,
            confirm,
            log,
            phase: SessionPhase::Idle,
            schedule,
            reports: Vec::new(),
            breaks: 0,
        })
    }

    /// Draws the plan from `rng`, then builds the controller around it.
    pub fn generate<R: Rng + ?Sized>(
        config: ExperimentConfig,
        rng: &mut R,
        sink: S,
        timer: T,
        confirm: C,
        log: EventLog<W>,
    ) -> Result<Self, SessionError> {
        let plan = generate(&config, rng)?;
        Self::new(config, plan, sink, timer, confirm, log)
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn plan(&self) -> &ExperimentPlan {
        &self.plan
    }

    pub fn reports(&self) -> &[BlockReport] {
        &self.reports
    }

    pub fn log(&self) -> &EventLog<W> {
        &self.log
    }

    pub fn scheduler(&self) -> &TriggerScheduler<S, T> {
        &self.scheduler
    }

    /// Moves to the next phase and does its work. Returns the phase entered.
    pub fn step(&mut self) -> Result<SessionPhase, SessionError> {
        let Some(next) = self.phase.next(&self.schedule) else {
            return Ok(self.phase);
        };

        match next {
            SessionPhase::Idle => {}
            SessionPhase::RestingBaseline => {
                self.scheduler.start_clock();
                info!(blocks = self.plan.len(), "session started");
                self.rest(Position::BaselineRest)?;
            }
            SessionPhase::Running(index) => self.run_block(index)?,
            SessionPhase::OnBreak(after) => self.take_break(after)?,
            SessionPhase::RestingFinal => self.rest(Position::FinalRest)?,
            SessionPhase::Done => {
                self.log.flush().map_err(|source| SessionError::Log {
                    at: Position::FinalRest,
                    source,
                })?;
                info!(events = self.log.records(), "session done");
            }
        }

        self.phase = next;
        Ok(next)
    }

    /// Drives the session to completion.
    pub fn run(&mut self) -> Result<SessionSummary, SessionError> {
        while !self.phase.is_done() {
            self.step()?;
        }
        Ok(self.summary())
    }

    pub fn summary(&self) -> SessionSummary {
        let timer = self.scheduler.timer();
        SessionSummary {
            blocks_run: self.reports.len(),
            breaks: self.breaks,
            events_logged: self.log.records(),
            triggers_sent: self.scheduler.emitted(),
            counts: count_event_kinds(&self.plan),
            timing: self.scheduler.timing_stats(),
            elapsed_secs: self.scheduler.session_secs(timer.now()),
        }
    }

    fn rest(&mut self, at: Position) -> Result<(), SessionError> {
        self.confirm
            .await_confirmation(REST_BEGIN_PROMPT)
            .map_err(|source| SessionError::Confirmation { at, source })?;

        let start = self.scheduler.timer().now();
        self.emit_marker(EventKind::RestStart, at)?;
        info!(
            at_s = self.scheduler.session_secs(start),
            duration_s = self.config.rest_duration,
            "resting state started"
        );

        let end = next_deadline(start, self.config.rest());
        self.scheduler.timer().spin_until(end);

        self.emit_marker(EventKind::RestEnd, at)?;
        info!(at_s = self.scheduler.session_secs(end), "resting state finished");

        self.confirm
            .await_confirmation(REST_END_PROMPT)
            .map_err(|source| SessionError::Confirmation { at, source })
    }

    fn emit_marker(&mut self, kind: EventKind, at: Position) -> Result<(), SessionError> {
        match self.scheduler.emit(kind) {
            Ok(_) => Ok(()),
            Err(source) => {
                self.log
                    .flush()
                    .map_err(|source| SessionError::Log { at, source })?;
                Err(SessionError::Sink { at, kind, source })
            }
        }
    }

    fn run_block(&mut self, index: usize) -> Result<(), SessionError> {
        let Some(block) = index.checked_sub(1).and_then(|i| self.plan.blocks().get(i)) else {
            return Ok(());
        };
        info!(
            "block {} out of {} ({}, ISI {} s, {} events)",
            index,
            self.plan.len(),
            block.nerve(),
            block.isi(),
            block.len()
        );
        let report = self.scheduler.run_block(index, block, &mut self.log)?;
        self.reports.push(report);
        Ok(())
    }

    fn take_break(&mut self, after: usize) -> Result<(), SessionError> {
        info!(after_block = after, "break");
        self.scheduler.timer().sleep(BREAK_PAUSE);
        self.confirm
            .await_confirmation(CHECK_IN_PROMPT)
            .map_err(|source| SessionError::Confirmation {
                at: Position::Break { after },
                source,
            })?;
        self.breaks += 1;
        Ok(())
    }
}
