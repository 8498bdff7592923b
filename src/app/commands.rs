//! Pump command requests and their asynchronous results.
//!
//! The engine enqueues commands through the
//! [`CommandExecutor`](super::ports::CommandExecutor) port; the executor's
//! adapter later reports the outcome by calling
//! [`LoopService::on_command_result`](super::service::LoopService::on_command_result)
//! with the matching [`CommandKind`].

/// Discriminant delivered with every command completion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    TempBasal,
    Bolus,
    CancelTempBasal,
    CancelExtendedBolus,
}

/// Why a temp-basal command was issued — recorded by executors for audit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TempBasalOrigin {
    /// Issued by a regular invocation cycle (or an accepted open-loop
    /// suggestion).
    Normal,
    /// Issued by the zero-temp safety procedure (super bolus / pump
    /// disconnect).
    ZeroTemp,
}

/// A bolus to enqueue.
#[derive(Debug, Clone, PartialEq)]
pub struct BolusRequest {
    pub units: f64,
    /// Latest acceptable execution time.  An executor must drop the bolus
    /// rather than deliver it after this instant — a slow temp basal must
    /// not let a stale-clocked SMB execute.
    pub deliver_at_ms: u64,
    /// Super-micro-bolus issued autonomously by the loop (as opposed to a
    /// user-initiated meal bolus).
    pub is_smb: bool,
}

/// Asynchronous outcome of a pump command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandResult {
    pub success: bool,
    /// True when the pump actually changed state (a successful no-op
    /// reports `success` without `enacted`).
    pub enacted: bool,
    pub comment: String,
    /// Realized temp-basal rate, when the command set one.
    pub rate: Option<f64>,
    /// Realized temp-basal duration, when the command set one.
    pub duration_min: Option<u32>,
    /// Realized bolus size, when the command delivered one.
    pub smb: Option<f64>,
}

impl CommandResult {
    /// A fully-enacted success.
    pub fn enacted(comment: impl Into<String>) -> Self {
        Self {
            success: true,
            enacted: true,
            comment: comment.into(),
            rate: None,
            duration_min: None,
            smb: None,
        }
    }

    /// A failure with the executor's explanation.
    pub fn failed(comment: impl Into<String>) -> Self {
        Self {
            success: false,
            enacted: false,
            comment: comment.into(),
            rate: None,
            duration_min: None,
            smb: None,
        }
    }
}
