//! Mode-machine decision logic: the precheck that reconciles the persisted
//! mode with live pump state and constraints, and the transition handler
//! behind every user/system mode request.
//!
//! The precheck re-evaluates in priority order:
//!
//! 1. pump physically suspended → force `SUSPENDED_BY_PUMP`
//! 2. pump resumed → end the stored `SUSPENDED_BY_PUMP` record
//! 3. oracle vetoes → force `DISABLED_LOOP` / `OPEN_LOOP` / `CLOSED_LOOP_LGS`
//! 4. revert rule → end an auto-forced record whose cause cleared
//!
//! Steps 1–2 re-enter the evaluation so steps 3–4 run against the freshly
//! corrected mode.  The loop is explicitly bounded (max 3 passes) to keep
//! termination provable.

use log::{info, warn};

use crate::app::events::LoopEvent;
use crate::app::ports::LoopIo;
use crate::error::Result;
use crate::safety;

use super::record::{INDEFINITE_DURATION_MS, OperatingModeRecord};
use super::{Mode, allowed_next_modes_filtered};

/// Upper bound on precheck re-evaluation passes.
const MAX_PRECHECK_PASSES: usize = 3;

// ───────────────────────────────────────────────────────────────
// Precheck
// ───────────────────────────────────────────────────────────────

/// Reconcile the persisted active record with live pump state and live
/// constraints.  Returns the converged mode.  Idempotent: a second call
/// with no external change writes nothing.
pub fn precheck(io: &mut LoopIo<'_>) -> Result<Mode> {
    let now = io.clock.now_ms();

    for _pass in 0..MAX_PRECHECK_PASSES {
        let Some(active) = io.store.active_mode_at(now) else {
            // First run ever: seed the history so every later decision has
            // a record to reason over.
            info!("no operating-mode record, seeding {}", Mode::DisabledLoop);
            let mut seed = OperatingModeRecord::new(Mode::DisabledLoop, now, 0);
            seed.reasons = Some("initial record".to_string());
            io.store.insert_or_update_mode(seed)?;
            continue;
        };

        // 1. Pump physically suspended but the stored mode disagrees.
        if io.pump.is_suspended() && active.mode != Mode::SuspendedByPump {
            warn!("pump suspended, forcing {}", Mode::SuspendedByPump);
            io.store.insert_or_update_mode(OperatingModeRecord::auto(
                Mode::SuspendedByPump,
                now,
                "pump suspended",
            ))?;
            io.sink.emit(&LoopEvent::ModeChanged {
                from: active.mode,
                to: Mode::SuspendedByPump,
            });
            continue;
        }

        // 2. Pump resumed but the stored mode still says suspended-by-pump.
        if !io.pump.is_suspended() && active.mode == Mode::SuspendedByPump {
            // Ending a record in the ms it started would leave it covering
            // `now`; wait for the clock to move instead of looping.
            if now <= active.timestamp_ms {
                return Ok(active.mode);
            }
            info!("pump resumed, ending {} record", Mode::SuspendedByPump);
            let mut rec = active;
            rec.end_at(now);
            io.store.insert_or_update_mode(rec)?;
            io.sink.emit(&LoopEvent::RefreshRequested);
            continue;
        }

        let invocation = io.oracle.is_loop_invocation_allowed();
        let closed = io.oracle.is_closed_loop_allowed();
        let lgs = io.oracle.is_lgs_forced();

        // 3. Oracle vetoes force a corrected, auto-forced record.
        let forced = if active.mode.is_loop_running() && !invocation.value {
            Some((Mode::DisabledLoop, invocation.reason_string()))
        } else if active.mode == Mode::ClosedLoop && !closed.value {
            Some((Mode::OpenLoop, closed.reason_string()))
        } else if active.mode == Mode::ClosedLoop && lgs.value {
            Some((Mode::ClosedLoopLgs, lgs.reason_string()))
        } else {
            None
        };
        if let Some((to, reason)) = forced {
            warn!("constraints force {} -> {to}: {reason}", active.mode);
            io.store
                .insert_or_update_mode(OperatingModeRecord::auto(to, now, reason))?;
            io.sink.emit(&LoopEvent::ModeChanged {
                from: active.mode,
                to,
            });
            io.sink.emit(&LoopEvent::RefreshRequested);
            return Ok(to);
        }

        // 4. Revert rule: an auto-forced record whose cause cleared ends
        //    now; whatever lies beneath becomes active on the next query.
        if active.auto_forced {
            let cause_cleared = match active.mode {
                Mode::DisabledLoop => invocation.value,
                Mode::OpenLoop => closed.value,
                Mode::ClosedLoopLgs => !lgs.value,
                _ => false,
            };
            if cause_cleared && now > active.timestamp_ms {
                info!("forced {} no longer needed, reverting", active.mode);
                let mut rec = active;
                rec.end_at(now);
                io.store.insert_or_update_mode(rec)?;
                io.sink.emit(&LoopEvent::RefreshRequested);
                continue;
            }
        }

        return Ok(active.mode);
    }

    // Bounded loop exhausted; report whatever is stored now.
    Ok(io
        .store
        .active_mode_at(now)
        .map_or(Mode::DisabledLoop, |r| r.mode))
}

// ───────────────────────────────────────────────────────────────
// Transition handler
// ───────────────────────────────────────────────────────────────

/// Apply a user/system mode request.  Returns `false` (no-op) when the
/// request is not allowed from the current mode, fails validation, or the
/// pump-suspend override is in effect.
pub fn handle_transition(
    requested: Mode,
    duration_min: u32,
    io: &mut LoopIo<'_>,
) -> Result<bool> {
    let now = io.clock.now_ms();
    let active = io.store.active_mode_at(now);
    let current = active.as_ref().map_or(Mode::DisabledLoop, |r| r.mode);

    // Pump-suspend overrides all user intent.
    if current == Mode::SuspendedByPump {
        warn!("transition to {requested} ignored: pump suspended");
        return Ok(false);
    }

    if !allowed_next_modes_filtered(current, io.oracle).contains(&requested) {
        warn!("transition {current} -> {requested} not allowed");
        return Ok(false);
    }

    if requested.must_be_temporary() && duration_min == 0 {
        debug_assert!(false, "{requested} requires a duration");
        warn!("transition to {requested} rejected: duration required");
        return Ok(false);
    }
    if requested.is_loop_running() && duration_min != 0 {
        debug_assert!(false, "{requested} must not carry a duration");
        warn!("transition to {requested} rejected: unexpected duration");
        return Ok(false);
    }

    match requested {
        Mode::Resume => {
            let Some(mut rec) = active else {
                return Ok(false);
            };
            if !rec.is_temporary() {
                debug_assert!(false, "resume requires a temporary mode");
                warn!("resume rejected: {current} is not temporary");
                return Ok(false);
            }
            info!("resuming from {current}");
            rec.end_at(now);
            io.store.insert_or_update_mode(rec)?;
            io.sink.emit(&LoopEvent::RefreshRequested);
            Ok(true)
        }

        Mode::SuperBolus | Mode::DisconnectedPump => {
            let rec =
                OperatingModeRecord::new(requested, now, u64::from(duration_min) * 60_000);
            safety::zero_temp_procedure(rec, duration_min, io)?;
            io.sink.emit(&LoopEvent::ModeChanged {
                from: current,
                to: requested,
            });
            io.sink.emit(&LoopEvent::RefreshRequested);
            Ok(true)
        }

        Mode::SuspendedByUser | Mode::SuspendedByDst => {
            let duration_ms = if duration_min > 0 {
                u64::from(duration_min) * 60_000
            } else {
                INDEFINITE_DURATION_MS
            };
            let rec = OperatingModeRecord::new(requested, now, duration_ms);
            safety::suspend_procedure(rec, io)?;
            io.sink.emit(&LoopEvent::ModeChanged {
                from: current,
                to: requested,
            });
            io.sink.emit(&LoopEvent::RefreshRequested);
            Ok(true)
        }

        _ => {
            info!("mode transition {current} -> {requested}");
            io.store
                .insert_or_update_mode(OperatingModeRecord::new(requested, now, 0))?;
            io.sink.emit(&LoopEvent::ModeChanged {
                from: current,
                to: requested,
            });
            io.sink.emit(&LoopEvent::RefreshRequested);
            Ok(true)
        }
    }
}
