//! Loop service — the hexagonal core.
//!
//! [`LoopService`] owns the invocation-cycle state: the last-run record,
//! the command continuation phase, carb-suggestion suppression, and the
//! delayed-task scheduler.  All I/O flows through the port traits bundled
//! in [`LoopIo`], making the entire service testable with mock adapters.
//!
//! ```text
//!  ConstraintOracle ──▶ ┌──────────────────────────┐ ──▶ EventSink
//!  DosingAlgorithm  ──▶ │       LoopService         │
//!  RecordStore      ◀──▶│  precheck · cycle · gates │
//!  CommandExecutor  ◀── └──────────────────────────┘
//! ```
//!
//! ## Concurrency contract
//!
//! One cycle is mutually exclusive with itself.  Within a thread the
//! `&mut self` receivers forbid re-entry; across callback completions the
//! internal [`CyclePhase`] gate rejects a second `invoke` while a command
//! is still in flight.  Callers that drive the service from multiple
//! threads must serialize access (mutex or single-worker queue) — the
//! service mutates shared last-run state and issues ordered, stateful pump
//! commands.

use log::{debug, info, warn};

use crate::config::LoopConfig;
use crate::dosing::{DosingResult, LastRun};
use crate::error::Result;
use crate::modes::{Mode, machine};
use crate::safety;
use crate::scheduler::{TaskId, TaskScheduler};
use crate::status::build_device_status;

use super::commands::{BolusRequest, CommandKind, CommandResult, TempBasalOrigin};
use super::events::{AlarmKind, LoopEvent};
use super::ports::LoopIo;

// ───────────────────────────────────────────────────────────────
// Cycle outcome / phase
// ───────────────────────────────────────────────────────────────

/// Terminal state of one invocation cycle.  Every variant except
/// [`CommandsIssued`](Self::CommandsIssued) ends the cycle immediately;
/// all of them are benign — the next scheduled trigger re-runs the cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// A previous cycle still awaits a command callback.
    InFlight,
    /// The stored mode is `DisabledLoop`.
    LoopDisabled,
    /// The dosing algorithm is disabled.
    AlgorithmDisabled,
    /// No valid therapy profile is active.
    InvalidProfile,
    /// The command queue never went idle within the poll timeout.
    ExecutorBusy,
    /// The pump has not reported its base basal rate yet.
    PumpNotReady,
    /// The algorithm produced no result.
    NoResult,
    /// The mode suspends dosing; the result was recorded but not acted on.
    Suspended,
    /// Commands were dispatched; completions arrive via
    /// [`LoopService::on_command_result`].
    CommandsIssued,
    /// Closed loop with nothing to change.
    NoChangeNeeded,
    /// Open-loop path: suggestion/carb notifications only.
    SuggestionOnly,
}

/// Continuation state across asynchronous command completions:
/// `Idle → AwaitingTbr → AwaitingSmb → Idle`.  The bolus is only ever
/// issued from within the temp-basal completion, preserving the
/// TBR-before-SMB ordering invariant without a blocking wait.
#[derive(Debug, Clone, PartialEq)]
enum CyclePhase {
    Idle,
    AwaitingTbr { constrained: DosingResult },
    AwaitingSmb,
}

// ───────────────────────────────────────────────────────────────
// LoopService
// ───────────────────────────────────────────────────────────────

/// The decision core of the closed-loop controller.
pub struct LoopService {
    cfg: LoopConfig,
    phase: CyclePhase,
    last_run: Option<LastRun>,
    scheduler: TaskScheduler,
    /// Carb-required notifications are muted until this instant.
    carbs_suppressed_until_ms: u64,
    carb_notification_active: bool,
    /// Summary of the last open-loop suggestion shown to the user.
    last_suggestion: Option<String>,
}

impl LoopService {
    pub fn new(cfg: LoopConfig) -> Self {
        Self {
            cfg,
            phase: CyclePhase::Idle,
            last_run: None,
            scheduler: TaskScheduler::new(),
            carbs_suppressed_until_ms: 0,
            carb_notification_active: false,
            last_suggestion: None,
        }
    }

    // ── Invocation cycle ──────────────────────────────────────

    /// Run one full control iteration.
    pub fn invoke(
        &mut self,
        initiator: &str,
        allow_notification: bool,
        tbr_fallback: bool,
        io: &mut LoopIo<'_>,
    ) -> Result<CycleOutcome> {
        info!("invoke by {initiator}");

        if self.phase != CyclePhase::Idle {
            warn!("invoke rejected: previous cycle still in flight");
            return Ok(CycleOutcome::InFlight);
        }

        let mode = machine::precheck(io)?;
        if mode == Mode::DisabledLoop {
            debug!("cycle exit: loop disabled");
            return Ok(CycleOutcome::LoopDisabled);
        }
        if !io.algorithm.is_enabled() {
            debug!("cycle exit: algorithm disabled");
            return Ok(CycleOutcome::AlgorithmDisabled);
        }
        let Some(profile) = io.profile.active_profile() else {
            warn!("cycle exit: no valid profile");
            return Ok(CycleOutcome::InvalidProfile);
        };
        if !self.wait_for_idle_queue(io) {
            return Ok(CycleOutcome::ExecutorBusy);
        }
        if io.pump.base_basal_rate().is_none() {
            warn!("cycle exit: pump base basal rate unknown");
            return Ok(CycleOutcome::PumpNotReady);
        }

        let Some(raw) = io.algorithm.invoke(initiator, tbr_fallback) else {
            debug!("cycle exit: no dosing result");
            return Ok(CycleOutcome::NoResult);
        };
        io.store.record_dosing_result(&raw)?;

        let caps = io.pump.capabilities();
        let (mut constrained, limits) =
            safety::apply_constraints(&raw, io.oracle, &caps, profile.current_basal_uh);
        for limit in &limits {
            info!("constraint applied: {limit}");
        }

        let now = io.clock.now_ms();
        let _ = safety::stale_smb_gate(
            &mut constrained,
            io.store.newest_bolus_ts(),
            now,
            self.cfg.min_smb_interval_min,
        );

        if mode.is_suspended() {
            debug!("cycle exit: {mode} suspends dosing");
            return Ok(CycleOutcome::Suspended);
        }

        self.last_run = Some(LastRun::new(
            raw,
            constrained.clone(),
            io.algorithm.name(),
            now,
        ));
        self.schedule_snapshot(now);

        if mode.is_closed_loop() {
            self.maybe_notify_carbs(&constrained, allow_notification, now, io);

            if constrained.is_change_requested() && !io.exec.bolus_pending() {
                if constrained.temp_basal_requested {
                    self.dispatch_temp_basal(constrained, io);
                } else {
                    self.dispatch_smb(&constrained, io);
                }
                Ok(CycleOutcome::CommandsIssued)
            } else {
                if io.exec.bolus_pending() {
                    debug!("change deferred: bolus already queued");
                }
                Ok(CycleOutcome::NoChangeNeeded)
            }
        } else {
            self.update_suggestion(&constrained, allow_notification, io);
            self.maybe_notify_carbs(&constrained, allow_notification, now, io);
            Ok(CycleOutcome::SuggestionOnly)
        }
    }

    /// Completion callback for every pump command the service issued.
    ///
    /// Executor adapters call this exactly once per command.  While a cycle
    /// is in flight the matching completion advances the continuation;
    /// everything else (zero-temp / suspend procedure commands) only feeds
    /// the alarm path.
    pub fn on_command_result(
        &mut self,
        kind: CommandKind,
        result: &CommandResult,
        io: &mut LoopIo<'_>,
    ) {
        let now = io.clock.now_ms();
        let phase = core::mem::replace(&mut self.phase, CyclePhase::Idle);

        match (phase, kind) {
            (
                CyclePhase::AwaitingTbr { mut constrained },
                CommandKind::TempBasal | CommandKind::CancelTempBasal,
            ) => {
                if let Some(lr) = self.last_run.as_mut() {
                    lr.tbr_outcome = Some(result.clone());
                }
                if result.success {
                    if result.enacted {
                        if let Some(lr) = self.last_run.as_mut() {
                            lr.tbr_enacted_at = Some(now);
                        }
                        self.schedule_snapshot(now);
                    }
                    // A slow temp basal must not let a stale-clocked SMB
                    // execute: the bolus deadline restarts at enactment.
                    constrained.deliver_at_ms = now;
                    if let Some(lr) = self.last_run.as_mut() {
                        lr.constrained.deliver_at_ms = now;
                    }
                    if constrained.bolus_requested && constrained.smb > 0.0 {
                        self.dispatch_smb(&constrained, io);
                    }
                } else {
                    warn!("temp basal failed: {}", result.comment);
                    io.sink.emit(&LoopEvent::Alarm {
                        kind: AlarmKind::TempBasalDeliveryFailed,
                        comment: result.comment.clone(),
                    });
                    // No SMB this cycle — the basal decision did not land.
                }
            }

            (CyclePhase::AwaitingSmb, CommandKind::Bolus) => {
                if let Some(lr) = self.last_run.as_mut() {
                    lr.smb_outcome = Some(result.clone());
                }
                if result.success {
                    if result.enacted {
                        if let Some(lr) = self.last_run.as_mut() {
                            lr.smb_enacted_at = Some(now);
                        }
                        self.schedule_snapshot(now);
                    }
                } else {
                    warn!("SMB failed: {}, retrying cycle in {} ms",
                        result.comment, self.cfg.smb_retry_delay_ms);
                    io.sink.emit(&LoopEvent::Alarm {
                        kind: AlarmKind::BolusDeliveryFailed,
                        comment: result.comment.clone(),
                    });
                    self.scheduler
                        .schedule(TaskId::SmbRetryInvoke, now + self.cfg.smb_retry_delay_ms);
                }
            }

            (other, _) => {
                // Not part of an in-flight cycle: a safety-procedure or
                // externally-issued command.  Alarm on failure only.
                self.phase = other;
                if !result.success {
                    let alarm = match kind {
                        CommandKind::TempBasal => AlarmKind::TempBasalDeliveryFailed,
                        CommandKind::CancelTempBasal => AlarmKind::TempBasalCancelFailed,
                        CommandKind::CancelExtendedBolus => AlarmKind::ExtendedBolusCancelFailed,
                        CommandKind::Bolus => AlarmKind::BolusDeliveryFailed,
                    };
                    warn!("{alarm}: {}", result.comment);
                    io.sink.emit(&LoopEvent::Alarm {
                        kind: alarm,
                        comment: result.comment.clone(),
                    });
                }
            }
        }
    }

    // ── Delayed tasks ─────────────────────────────────────────

    /// Fire every due delayed task.  The host's main loop calls this
    /// periodically.
    pub fn poll_tasks(&mut self, io: &mut LoopIo<'_>) -> Result<()> {
        let now = io.clock.now_ms();
        for task in self.scheduler.poll(now) {
            match task {
                TaskId::DeviceStatusSnapshot => {
                    let status = build_device_status(
                        self.last_run.as_ref(),
                        &self.cfg,
                        io.iob,
                        io.pump,
                        now,
                    );
                    io.store.record_device_status(&status)?;
                    debug!("device status written");
                }
                TaskId::SmbRetryInvoke => {
                    info!("retrying cycle after failed SMB");
                    let _ = self.invoke("smb-retry", true, true, io)?;
                }
            }
        }
        Ok(())
    }

    /// When the given task will fire, if pending (telemetry/tests).
    pub fn pending_task(&self, task: TaskId) -> Option<u64> {
        self.scheduler.pending(task)
    }

    // ── Mode operations ───────────────────────────────────────

    /// Reconcile the stored mode with live pump state and constraints.
    pub fn precheck(&mut self, io: &mut LoopIo<'_>) -> Result<Mode> {
        machine::precheck(io)
    }

    /// Apply a user/system mode request.
    pub fn handle_transition(
        &mut self,
        requested: Mode,
        duration_min: u32,
        io: &mut LoopIo<'_>,
    ) -> Result<bool> {
        machine::handle_transition(requested, duration_min, io)
    }

    /// Whole minutes until the current suspend-like mode expires.
    pub fn minutes_to_end_of_suspend(&self, io: &LoopIo<'_>) -> Option<u64> {
        let now = io.clock.now_ms();
        let rec = io.store.active_mode_at(now)?;
        if rec.mode.is_suspended() {
            rec.minutes_remaining(now)
        } else {
            None
        }
    }

    // ── Open-loop interaction ─────────────────────────────────

    /// The user accepted the open-loop suggestion: enact its temp basal.
    pub fn accept_open_loop_suggestion(&mut self, io: &mut LoopIo<'_>) -> Result<bool> {
        if self.phase != CyclePhase::Idle {
            return Ok(false);
        }
        if machine::precheck(io)? != Mode::OpenLoop {
            return Ok(false);
        }
        let Some(mut constrained) = self.last_run.as_ref().map(|lr| lr.constrained.clone())
        else {
            return Ok(false);
        };
        if !constrained.temp_basal_requested {
            return Ok(false);
        }

        info!("open-loop suggestion accepted");
        if self.last_suggestion.take().is_some() {
            io.sink.emit(&LoopEvent::SuggestionDismissed);
        }
        // Accepting a suggestion enacts the basal change only.
        constrained.bolus_requested = false;
        constrained.smb = 0.0;
        let now = io.clock.now_ms();
        self.dispatch_temp_basal(constrained, io);
        self.schedule_snapshot(now);
        Ok(true)
    }

    /// Mute carb-required notifications for `duration_min`.
    pub fn disable_carb_suggestions(&mut self, duration_min: u32, io: &mut LoopIo<'_>) {
        self.carbs_suppressed_until_ms =
            io.clock.now_ms() + u64::from(duration_min) * 60_000;
        info!("carb suggestions muted for {duration_min} min");
        if self.carb_notification_active {
            io.sink.emit(&LoopEvent::CarbsRequiredDismissed);
            self.carb_notification_active = false;
        }
    }

    // ── Queries ───────────────────────────────────────────────

    /// Read-only view of the most recent cycle.
    pub fn last_run(&self) -> Option<&LastRun> {
        self.last_run.as_ref()
    }

    /// True while a command completion is outstanding.
    pub fn in_flight(&self) -> bool {
        self.phase != CyclePhase::Idle
    }

    pub fn config(&self) -> &LoopConfig {
        &self.cfg
    }

    // ── Internal ──────────────────────────────────────────────

    /// Bounded poll until the executor's queue is idle.  Preserves the
    /// observable contract of the original: one check per
    /// `queue_poll_interval_ms`, give up after `queue_poll_timeout_ms`.
    fn wait_for_idle_queue(&self, io: &mut LoopIo<'_>) -> bool {
        let start = io.clock.now_ms();
        loop {
            if io.exec.queued() == 0 && !io.exec.performing() {
                return true;
            }
            if io.clock.now_ms().saturating_sub(start) >= self.cfg.queue_poll_timeout_ms {
                warn!(
                    "cycle exit: command queue busy after {} ms",
                    self.cfg.queue_poll_timeout_ms
                );
                return false;
            }
            io.clock.sleep_ms(self.cfg.queue_poll_interval_ms);
        }
    }

    /// Issue the temp-basal command and arm the continuation.
    fn dispatch_temp_basal(&mut self, constrained: DosingResult, io: &mut LoopIo<'_>) {
        let now = io.clock.now_ms();
        if let Some(lr) = self.last_run.as_mut() {
            lr.tbr_requested_at = Some(now);
        }

        let sent = if constrained.duration_min == 0 {
            io.exec.cancel_temp_basal(false)
        } else if constrained.use_percent {
            io.exec.temp_basal_percent(
                constrained.percent.unwrap_or(100),
                constrained.duration_min,
                false,
                TempBasalOrigin::Normal,
            )
        } else {
            io.exec.temp_basal_absolute(
                constrained.rate.unwrap_or(0.0),
                constrained.duration_min,
                false,
                TempBasalOrigin::Normal,
            )
        };

        match sent {
            Ok(()) => self.phase = CyclePhase::AwaitingTbr { constrained },
            Err(e) => {
                warn!("temp basal not enqueued: {e}");
                if let Some(lr) = self.last_run.as_mut() {
                    lr.tbr_outcome = Some(CommandResult::failed(e.to_string()));
                }
                io.sink.emit(&LoopEvent::Alarm {
                    kind: AlarmKind::TempBasalDeliveryFailed,
                    comment: e.to_string(),
                });
                self.phase = CyclePhase::Idle;
            }
        }
    }

    /// Issue the SMB command and arm the continuation.
    fn dispatch_smb(&mut self, constrained: &DosingResult, io: &mut LoopIo<'_>) {
        let now = io.clock.now_ms();
        if let Some(lr) = self.last_run.as_mut() {
            lr.smb_requested_at = Some(now);
        }

        let req = BolusRequest {
            units: constrained.smb,
            deliver_at_ms: constrained.deliver_at_ms,
            is_smb: true,
        };
        match io.exec.bolus(req) {
            Ok(()) => self.phase = CyclePhase::AwaitingSmb,
            Err(e) => {
                warn!("SMB not enqueued: {e}, retrying cycle in {} ms",
                    self.cfg.smb_retry_delay_ms);
                if let Some(lr) = self.last_run.as_mut() {
                    lr.smb_outcome = Some(CommandResult::failed(e.to_string()));
                }
                io.sink.emit(&LoopEvent::Alarm {
                    kind: AlarmKind::BolusDeliveryFailed,
                    comment: e.to_string(),
                });
                self.scheduler
                    .schedule(TaskId::SmbRetryInvoke, now + self.cfg.smb_retry_delay_ms);
                self.phase = CyclePhase::Idle;
            }
        }
    }

    fn schedule_snapshot(&mut self, now_ms: u64) {
        self.scheduler
            .schedule(TaskId::DeviceStatusSnapshot, now_ms + self.cfg.status_debounce_ms);
    }

    /// Edge-triggered open-loop suggestion notifications.
    fn update_suggestion(
        &mut self,
        constrained: &DosingResult,
        allow_notification: bool,
        io: &mut LoopIo<'_>,
    ) {
        if constrained.is_change_requested() {
            let summary = constrained.summary();
            if self.last_suggestion.as_deref() != Some(summary.as_str()) {
                if allow_notification {
                    io.sink.emit(&LoopEvent::SuggestionChanged {
                        summary: summary.clone(),
                    });
                }
                self.last_suggestion = Some(summary);
            }
        } else if self.last_suggestion.take().is_some() {
            io.sink.emit(&LoopEvent::SuggestionDismissed);
        }
    }

    /// Edge-triggered carb-required notifications with suppression window
    /// and recent-treatment lookback.
    fn maybe_notify_carbs(
        &mut self,
        constrained: &DosingResult,
        allow_notification: bool,
        now_ms: u64,
        io: &mut LoopIo<'_>,
    ) {
        if constrained.carbs_required {
            if now_ms < self.carbs_suppressed_until_ms {
                return;
            }
            let lookback_ms = u64::from(self.cfg.carb_lookback_min) * 60_000;
            let recent_treatment = io
                .store
                .newest_bolus_ts()
                .is_some_and(|t| now_ms.saturating_sub(t) < lookback_ms)
                || io
                    .store
                    .newest_carbs_ts()
                    .is_some_and(|t| now_ms.saturating_sub(t) < lookback_ms);
            if recent_treatment || !allow_notification {
                return;
            }
            if !self.carb_notification_active {
                io.sink.emit(&LoopEvent::CarbsRequired {
                    grams: constrained.carbs_req_g,
                    within_min: constrained.carbs_req_within_min,
                });
                self.carb_notification_active = true;
            }
        } else if self.carb_notification_active {
            io.sink.emit(&LoopEvent::CarbsRequiredDismissed);
            self.carb_notification_active = false;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_service_is_idle() {
        let svc = LoopService::new(LoopConfig::default());
        assert!(!svc.in_flight());
        assert!(svc.last_run().is_none());
        assert!(svc.pending_task(TaskId::DeviceStatusSnapshot).is_none());
    }
}
