//! Port traits — the hexagonal boundary between the decision core and the
//! outside world.
//!
//! ```text
//!   Adapter ──▶ Port trait ──▶ LoopService (domain)
//! ```
//!
//! Driven adapters (constraint policy, dosing algorithm, pump driver,
//! record store, notification sinks) implement these traits.  The
//! [`LoopService`](super::service::LoopService) consumes them through the
//! [`LoopIo`] bundle injected at each call site, so the decision core never
//! touches hardware or storage directly.
//!
//! ## Safety notes
//!
//! - **CommandExecutor** implementations MUST keep at most one command of a
//!   given kind in flight and report every completion exactly once.
//! - **RecordStore** writes MUST be transactional — a partially-applied
//!   insert-or-update would corrupt the mode history the safety logic
//!   reasons over.

use serde::{Deserialize, Serialize};

use crate::dosing::DosingResult;
use crate::error::{CommandError, RecordError};
use crate::modes::record::OperatingModeRecord;
use crate::status::DeviceStatus;

use super::commands::{BolusRequest, TempBasalOrigin};
use super::events::LoopEvent;

// ───────────────────────────────────────────────────────────────
// Constraint oracle (policy: veto / clamp)
// ───────────────────────────────────────────────────────────────

/// A policy answer: the (possibly clamped) value plus the reasons that
/// limited it, kept for audit display ("why was this dose reduced?").
#[derive(Debug, Clone, PartialEq)]
pub struct Constraint<T> {
    pub value: T,
    pub reasons: Vec<String>,
}

impl<T> Constraint<T> {
    /// An answer nothing objected to.
    pub fn unconstrained(value: T) -> Self {
        Self {
            value,
            reasons: Vec::new(),
        }
    }

    /// An answer limited for the given reason.
    pub fn limited(value: T, reason: impl Into<String>) -> Self {
        Self {
            value,
            reasons: vec![reason.into()],
        }
    }

    pub fn is_limited(&self) -> bool {
        !self.reasons.is_empty()
    }

    /// All limiting reasons joined for display.
    pub fn reason_string(&self) -> String {
        self.reasons.join("; ")
    }
}

/// External policy component that can veto a mode or clamp a dose.
pub trait ConstraintOracle {
    fn is_closed_loop_allowed(&self) -> Constraint<bool>;
    fn is_loop_invocation_allowed(&self) -> Constraint<bool>;
    /// True when policy forces low-glucose-suspend-only operation.
    fn is_lgs_forced(&self) -> Constraint<bool>;

    fn apply_basal_constraint(&self, rate_uh: f64) -> Constraint<f64>;
    fn apply_percent_constraint(&self, percent: u16) -> Constraint<u16>;
    fn apply_bolus_constraint(&self, units: f64) -> Constraint<f64>;
}

// ───────────────────────────────────────────────────────────────
// Dosing algorithm (external producer of recommendations)
// ───────────────────────────────────────────────────────────────

/// Opaque producer of dosing recommendations.
pub trait DosingAlgorithm {
    fn name(&self) -> &str;
    fn is_enabled(&self) -> bool;
    /// Run one determination.  `None` when the algorithm has nothing to
    /// say (e.g. no recent glucose data).
    fn invoke(&mut self, initiator: &str, tbr_fallback: bool) -> Option<DosingResult>;
}

// ───────────────────────────────────────────────────────────────
// Profile source
// ───────────────────────────────────────────────────────────────

/// The user's active therapy profile.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    pub name: String,
    /// Scheduled basal rate at the current time (U/h).
    pub current_basal_uh: f64,
    /// Duration of insulin action (hours).
    pub dia_hours: f64,
}

pub trait ProfileSource {
    /// `None` when no valid profile is selected — the cycle must not run.
    fn active_profile(&self) -> Option<Profile>;
}

// ───────────────────────────────────────────────────────────────
// Pump (read side)
// ───────────────────────────────────────────────────────────────

/// How the pump backend expresses temp basals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TempBasalStyle {
    Absolute,
    Percent,
}

/// Static capabilities of the active pump backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpCapabilities {
    pub temp_basal_style: TempBasalStyle,
    pub supports_extended_bolus: bool,
}

/// Point-in-time pump status for the device-status snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PumpStatusSummary {
    pub model: String,
    pub status: String,
    pub battery_percent: Option<u8>,
    pub reservoir_units: Option<f64>,
}

/// Read-side pump port: live physical state and capabilities.
pub trait PumpPort {
    /// True when the pump itself reports delivery suspended.
    fn is_suspended(&self) -> bool;
    /// Current base basal rate, `None` while the pump has not reported one
    /// yet (the cycle must not run against an unknown baseline).
    fn base_basal_rate(&self) -> Option<f64>;
    fn capabilities(&self) -> PumpCapabilities;
    fn is_extended_bolus_active(&self) -> bool;
    fn status_summary(&self) -> PumpStatusSummary;
}

// ───────────────────────────────────────────────────────────────
// Command executor (write side)
// ───────────────────────────────────────────────────────────────

/// Write-side pump port.  Commands are *enqueued*; the adapter reports each
/// completion by calling
/// [`LoopService::on_command_result`](super::service::LoopService::on_command_result).
/// The executor guarantees at most one in-flight command per kind.
pub trait CommandExecutor {
    fn cancel_temp_basal(&mut self, enforce_new: bool) -> Result<(), CommandError>;
    fn temp_basal_absolute(
        &mut self,
        rate_uh: f64,
        duration_min: u32,
        enforce_new: bool,
        origin: TempBasalOrigin,
    ) -> Result<(), CommandError>;
    fn temp_basal_percent(
        &mut self,
        percent: u16,
        duration_min: u32,
        enforce_new: bool,
        origin: TempBasalOrigin,
    ) -> Result<(), CommandError>;
    fn bolus(&mut self, req: BolusRequest) -> Result<(), CommandError>;
    fn cancel_extended_bolus(&mut self) -> Result<(), CommandError>;

    /// Number of queued, not-yet-started commands.
    fn queued(&self) -> usize;
    /// True while a command is being executed right now.
    fn performing(&self) -> bool;
    /// True while a bolus is queued or executing.
    fn bolus_pending(&self) -> bool;
}

// ───────────────────────────────────────────────────────────────
// Record store (durable, transactional)
// ───────────────────────────────────────────────────────────────

/// Which rows an insert-or-update touched.  Callers use this to decide
/// whether a change actually occurred.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreOutcome {
    pub inserted: Vec<i64>,
    pub updated: Vec<i64>,
}

impl StoreOutcome {
    pub fn changed(&self) -> bool {
        !self.inserted.is_empty() || !self.updated.is_empty()
    }
}

/// Durable storage for operating-mode records and dosing-audit snapshots.
///
/// Active-record semantics: of all records whose half-open interval covers
/// `ts`, the one with the latest start wins.  Ending a forced record early
/// therefore re-exposes the open-ended record beneath it.
pub trait RecordStore {
    /// Insert a new record, or update the stored one with the same identity
    /// (matching `id`, or matching `timestamp`+`mode`).  Atomic.
    fn insert_or_update_mode(
        &mut self,
        record: OperatingModeRecord,
    ) -> Result<StoreOutcome, RecordError>;

    /// The record active at `ts`, if any.
    fn active_mode_at(&self, ts_ms: u64) -> Option<OperatingModeRecord>;

    /// Timestamp of the most recent bolus of any kind.
    fn newest_bolus_ts(&self) -> Option<u64>;
    /// Timestamp of the most recent carb entry.
    fn newest_carbs_ts(&self) -> Option<u64>;

    /// Persist a raw dosing result for audit.
    fn record_dosing_result(&mut self, result: &DosingResult) -> Result<(), RecordError>;
    /// Persist a device-status snapshot.
    fn record_device_status(&mut self, status: &DeviceStatus) -> Result<(), RecordError>;
}

// ───────────────────────────────────────────────────────────────
// IOB source
// ───────────────────────────────────────────────────────────────

/// Insulin-on-board at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct IobValue {
    pub ts_ms: u64,
    pub iob_units: f64,
    pub basal_iob_units: f64,
}

pub trait IobSource {
    fn iob_at(&self, ts_ms: u64) -> IobValue;
    /// IOB projected over the duration of insulin action, for snapshots
    /// taken before any cycle has run.
    fn iob_over_dia(&self) -> Vec<IobValue>;
}

// ───────────────────────────────────────────────────────────────
// Event sink
// ───────────────────────────────────────────────────────────────

/// The core emits structured [`LoopEvent`]s through this port.  Adapters
/// decide where they go (overview refresh, notification tray, alarm tone).
pub trait EventSink {
    fn emit(&mut self, event: &LoopEvent);
}

// ───────────────────────────────────────────────────────────────
// Clock
// ───────────────────────────────────────────────────────────────

/// Wall-clock abstraction so the bounded queue-drain poll and every
/// timestamp are testable with a mock clock.
pub trait Clock {
    fn now_ms(&self) -> u64;
    fn sleep_ms(&self, ms: u64);
}

// ───────────────────────────────────────────────────────────────
// Port bundle
// ───────────────────────────────────────────────────────────────

/// Every collaborator the decision core talks to, injected per call.
/// Read-only ports are shared borrows; ports the core drives are mutable.
pub struct LoopIo<'a> {
    pub oracle: &'a dyn ConstraintOracle,
    pub algorithm: &'a mut dyn DosingAlgorithm,
    pub profile: &'a dyn ProfileSource,
    pub pump: &'a dyn PumpPort,
    pub exec: &'a mut dyn CommandExecutor,
    pub store: &'a mut dyn RecordStore,
    pub iob: &'a dyn IobSource,
    pub sink: &'a mut dyn EventSink,
    pub clock: &'a dyn Clock,
}
