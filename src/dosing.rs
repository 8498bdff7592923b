//! Dosing data model — the algorithm's recommendation and the record of the
//! most recent invocation cycle.
//!
//! A raw [`DosingResult`] comes from the external algorithm; the
//! "after-constraints" clone is derived in [`crate::safety`] by clamping
//! rate/percent/smb against the constraint oracle.  Both are kept in
//! [`LastRun`] so the audit trail shows the requested *and* the permitted
//! values.

use serde::{Deserialize, Serialize};

use crate::app::commands::CommandResult;

/// One dosing recommendation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DosingResult {
    /// When the determination ran (ms since epoch).
    pub timestamp_ms: u64,
    /// Name of the producing algorithm.
    pub source: String,
    /// The algorithm's human-readable reasoning (audit).
    pub reason: String,

    /// Requested absolute temp-basal rate (U/h).
    pub rate: Option<f64>,
    /// Requested percent-style temp basal (relative to profile basal).
    pub percent: Option<u16>,
    /// Prefer the percent form when the pump supports it.
    pub use_percent: bool,
    /// Temp-basal duration (minutes); `0` requests a cancel.
    pub duration_min: u32,

    /// Recommended super-micro-bolus (units).
    pub smb: f64,

    pub temp_basal_requested: bool,
    pub bolus_requested: bool,

    pub carbs_required: bool,
    pub carbs_req_g: u32,
    pub carbs_req_within_min: u32,

    /// Latest acceptable execution time for the bolus.  Moved forward to the
    /// temp-basal enactment time so a delayed basal command cannot let a
    /// stale bolus execute.
    pub deliver_at_ms: u64,
}

impl DosingResult {
    /// Does the algorithm want the pump to do anything at all?
    pub fn is_change_requested(&self) -> bool {
        self.temp_basal_requested || self.bolus_requested
    }

    /// Short human-readable summary, used to detect when the open-loop
    /// suggestion actually changed.
    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        if self.temp_basal_requested {
            if self.use_percent {
                if let Some(p) = self.percent {
                    parts.push(format!("{p}% for {} min", self.duration_min));
                }
            } else if let Some(r) = self.rate {
                parts.push(format!("{r:.2} U/h for {} min", self.duration_min));
            }
        }
        if self.bolus_requested && self.smb > 0.0 {
            parts.push(format!("smb {:.2} U", self.smb));
        }
        if parts.is_empty() {
            "no change".to_string()
        } else {
            parts.join(", ")
        }
    }
}

/// Process-lifetime summary of the most recent invocation cycle.
///
/// Owned exclusively by the
/// [`LoopService`](crate::app::service::LoopService); telemetry reads it
/// through a shared borrow.  The `*_enacted_at` fields are only ever set
/// from a successful command-executor callback, never speculatively.
#[derive(Debug, Clone, PartialEq)]
pub struct LastRun {
    /// The raw algorithm recommendation.
    pub request: DosingResult,
    /// The recommendation after constraint reconciliation.
    pub constrained: DosingResult,
    /// Source algorithm name.
    pub source: String,
    /// When the cycle ran.
    pub timestamp_ms: u64,

    pub tbr_requested_at: Option<u64>,
    pub tbr_enacted_at: Option<u64>,
    pub smb_requested_at: Option<u64>,
    pub smb_enacted_at: Option<u64>,

    /// Executor outcome of the temp-basal command.
    pub tbr_outcome: Option<CommandResult>,
    /// Executor outcome of the bolus command.
    pub smb_outcome: Option<CommandResult>,
}

impl LastRun {
    pub fn new(
        request: DosingResult,
        constrained: DosingResult,
        source: impl Into<String>,
        timestamp_ms: u64,
    ) -> Self {
        Self {
            request,
            constrained,
            source: source.into(),
            timestamp_ms,
            tbr_requested_at: None,
            tbr_enacted_at: None,
            smb_requested_at: None,
            smb_enacted_at: None,
            tbr_outcome: None,
            smb_outcome: None,
        }
    }

    /// True once the temp basal was actually enacted on the pump.
    pub fn tbr_set_by_pump(&self) -> bool {
        self.tbr_enacted_at.is_some()
    }
}
