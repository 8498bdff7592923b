//! Safety layer.
//!
//! Runs **before any pump command** is issued:
//!
//! 1. Constraint reconciliation — clone the raw dosing result and clamp
//!    rate / percent / smb independently through the constraint oracle.
//! 2. The stale-SMB gate — a bolus delivered within the configured minimum
//!    interval forces `smb = 0` for the cycle, unconditionally.
//! 3. The zero-temp and suspend procedures — mode-record persistence always
//!    precedes the pump commands, and a command failure never rolls the
//!    record back: intent persistence and command execution have
//!    independent failure domains.

use log::{info, warn};

use crate::app::commands::TempBasalOrigin;
use crate::app::events::{AlarmKind, LoopEvent};
use crate::app::ports::{
    ConstraintOracle, LoopIo, PumpCapabilities, StoreOutcome, TempBasalStyle,
};
use crate::dosing::DosingResult;
use crate::error::Result;
use crate::modes::record::OperatingModeRecord;

// ───────────────────────────────────────────────────────────────
// Constraint reconciliation
// ───────────────────────────────────────────────────────────────

/// Clamp the raw result into what policy permits.
///
/// Returns the after-constraints clone plus the accumulated limiting
/// reasons.  Percent-style dosing is only honored when the pump backend
/// supports it; otherwise the request is converted to an absolute rate
/// against the profile basal.
pub fn apply_constraints(
    raw: &DosingResult,
    oracle: &dyn ConstraintOracle,
    caps: &PumpCapabilities,
    profile_basal_uh: f64,
) -> (DosingResult, Vec<String>) {
    let mut constrained = raw.clone();
    let mut limits = Vec::new();

    if let Some(rate) = constrained.rate {
        let clamped = oracle.apply_basal_constraint(rate);
        if clamped.is_limited() {
            limits.push(format!("rate: {}", clamped.reason_string()));
        }
        constrained.rate = Some(clamped.value);
    }

    if constrained.use_percent && caps.temp_basal_style != TempBasalStyle::Percent {
        // The pump cannot express percent temp basals; fall back to the
        // equivalent absolute rate.
        if constrained.rate.is_none() {
            if let Some(p) = constrained.percent {
                let rate = f64::from(p) / 100.0 * profile_basal_uh;
                let clamped = oracle.apply_basal_constraint(rate);
                if clamped.is_limited() {
                    limits.push(format!("rate: {}", clamped.reason_string()));
                }
                constrained.rate = Some(clamped.value);
            }
        }
        constrained.use_percent = false;
    } else if let Some(p) = constrained.percent {
        let clamped = oracle.apply_percent_constraint(p);
        if clamped.is_limited() {
            limits.push(format!("percent: {}", clamped.reason_string()));
        }
        constrained.percent = Some(clamped.value);
    }

    if constrained.smb > 0.0 {
        let clamped = oracle.apply_bolus_constraint(constrained.smb);
        if clamped.is_limited() {
            limits.push(format!("smb: {}", clamped.reason_string()));
        }
        constrained.smb = clamped.value;
    }

    (constrained, limits)
}

// ───────────────────────────────────────────────────────────────
// Stale-SMB gate
// ───────────────────────────────────────────────────────────────

/// Force `smb = 0` when a bolus was delivered within the minimum interval.
/// Returns `true` when the gate fired.
pub fn stale_smb_gate(
    constrained: &mut DosingResult,
    newest_bolus_ts: Option<u64>,
    now_ms: u64,
    min_smb_interval_min: u32,
) -> bool {
    if constrained.smb <= 0.0 {
        return false;
    }
    let window_ms = u64::from(min_smb_interval_min) * 60_000;
    let recent = newest_bolus_ts
        .is_some_and(|ts| now_ms.saturating_sub(ts) < window_ms);
    if recent {
        warn!(
            "SMB {:.2} U suppressed: bolus within the last {} min",
            constrained.smb, min_smb_interval_min
        );
        constrained.smb = 0.0;
    }
    recent
}

// ───────────────────────────────────────────────────────────────
// Zero-temp procedure (super bolus / pump disconnect)
// ───────────────────────────────────────────────────────────────

/// Persist the mode record, then drive basal delivery to zero for
/// `duration_min`, then cancel an active extended bolus when the pump has
/// one.  Enqueue failures alarm but never erase the persisted intent.
pub fn zero_temp_procedure(
    record: OperatingModeRecord,
    duration_min: u32,
    io: &mut LoopIo<'_>,
) -> Result<StoreOutcome> {
    let mode = record.mode;
    let outcome = io.store.insert_or_update_mode(record)?;
    info!("{mode}: record persisted, driving basal to zero for {duration_min} min");

    let caps = io.pump.capabilities();
    let sent = match caps.temp_basal_style {
        TempBasalStyle::Absolute => {
            io.exec
                .temp_basal_absolute(0.0, duration_min, true, TempBasalOrigin::ZeroTemp)
        }
        TempBasalStyle::Percent => {
            io.exec
                .temp_basal_percent(0, duration_min, true, TempBasalOrigin::ZeroTemp)
        }
    };
    if let Err(e) = sent {
        warn!("{mode}: zero-temp command not enqueued: {e}");
        io.sink.emit(&LoopEvent::Alarm {
            kind: AlarmKind::TempBasalDeliveryFailed,
            comment: e.to_string(),
        });
    }

    if caps.supports_extended_bolus && io.pump.is_extended_bolus_active() {
        if let Err(e) = io.exec.cancel_extended_bolus() {
            warn!("{mode}: extended bolus cancel not enqueued: {e}");
            io.sink.emit(&LoopEvent::Alarm {
                kind: AlarmKind::ExtendedBolusCancelFailed,
                comment: e.to_string(),
            });
        }
    }

    Ok(outcome)
}

// ───────────────────────────────────────────────────────────────
// Suspend procedure (user / DST suspend)
// ───────────────────────────────────────────────────────────────

/// Persist the suspend record, then cancel any active temp basal.  A failed
/// cancel alarms but never erases the persisted suspend intent.
pub fn suspend_procedure(
    record: OperatingModeRecord,
    io: &mut LoopIo<'_>,
) -> Result<StoreOutcome> {
    let mode = record.mode;
    let outcome = io.store.insert_or_update_mode(record)?;
    info!("{mode}: record persisted, cancelling temp basal");

    if let Err(e) = io.exec.cancel_temp_basal(false) {
        warn!("{mode}: temp basal cancel not enqueued: {e}");
        io.sink.emit(&LoopEvent::Alarm {
            kind: AlarmKind::TempBasalCancelFailed,
            comment: e.to_string(),
        });
    }

    Ok(outcome)
}
