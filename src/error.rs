//! Unified error types for the loop engine.
//!
//! A single `Error` enum that every subsystem can convert into, keeping the
//! top-level control flow's error handling uniform.  Command and record
//! failures have independent failure domains: a mode record is never rolled
//! back because a downstream pump command failed.

use core::fmt;

// ---------------------------------------------------------------------------
// Top-level engine error
// ---------------------------------------------------------------------------

/// Every fallible operation in the engine funnels into this type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// A pump command could not be enqueued.
    Command(CommandError),
    /// The record store rejected a read or write.
    Record(RecordError),
    /// Configuration is invalid or could not be loaded.
    Config(&'static str),
    /// A caller violated an engine invariant (e.g. RESUME while not
    /// temporary).  Debug builds assert; release builds reject.
    Invariant(&'static str),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Command(e) => write!(f, "command: {e}"),
            Self::Record(e) => write!(f, "record: {e}"),
            Self::Config(msg) => write!(f, "config: {msg}"),
            Self::Invariant(msg) => write!(f, "invariant: {msg}"),
        }
    }
}

impl std::error::Error for Error {}

// ---------------------------------------------------------------------------
// Command errors (enqueue-time failures; delivery failures arrive via
// `CommandResult` callbacks instead)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandError {
    /// The executor's queue is full.
    QueueFull,
    /// The pump link is down; nothing can be enqueued.
    PumpUnreachable,
    /// The pump backend does not support this command style.
    Unsupported,
    /// The executor rejected the command outright.
    Rejected,
}

impl fmt::Display for CommandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::QueueFull => write!(f, "command queue full"),
            Self::PumpUnreachable => write!(f, "pump unreachable"),
            Self::Unsupported => write!(f, "command unsupported by pump"),
            Self::Rejected => write!(f, "command rejected"),
        }
    }
}

impl From<CommandError> for Error {
    fn from(e: CommandError) -> Self {
        Self::Command(e)
    }
}

// ---------------------------------------------------------------------------
// Record store errors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordError {
    /// Referenced record does not exist.
    NotFound,
    /// The write conflicts with a concurrent transaction.
    Conflict,
    /// Generic I/O error from the storage backend.
    IoError,
}

impl fmt::Display for RecordError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound => write!(f, "record not found"),
            Self::Conflict => write!(f, "transaction conflict"),
            Self::IoError => write!(f, "I/O error"),
        }
    }
}

impl From<RecordError> for Error {
    fn from(e: RecordError) -> Self {
        Self::Record(e)
    }
}

// ---------------------------------------------------------------------------
// Convenience Result alias
// ---------------------------------------------------------------------------

/// Engine-wide `Result` alias.
pub type Result<T> = core::result::Result<T, Error>;
