//! Outbound loop events.
//!
//! The [`LoopService`](super::service::LoopService) emits these through the
//! [`EventSink`](super::ports::EventSink) port.  Adapters on the other side
//! decide what to do with them — refresh an overview screen, raise a
//! notification, sound an alarm.

use crate::modes::Mode;

/// Structured events emitted by the loop core.
#[derive(Debug, Clone, PartialEq)]
pub enum LoopEvent {
    /// The stored operating mode changed.
    ModeChanged { from: Mode, to: Mode },

    /// Mode history changed in a way that requires re-querying the store
    /// (e.g. a temporary mode ended).
    RefreshRequested,

    /// A safety-relevant command failure the user must see.
    Alarm { kind: AlarmKind, comment: String },

    /// The algorithm wants the user to eat carbs.
    CarbsRequired { grams: u32, within_min: u32 },

    /// The carb requirement cleared; dismiss the notification.
    CarbsRequiredDismissed,

    /// The open-loop recommendation changed; show the new suggestion.
    SuggestionChanged { summary: String },

    /// No change is requested any more; dismiss the suggestion.
    SuggestionDismissed,
}

/// Alarm classes for command failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmKind {
    TempBasalDeliveryFailed,
    BolusDeliveryFailed,
    TempBasalCancelFailed,
    ExtendedBolusCancelFailed,
}

impl core::fmt::Display for AlarmKind {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::TempBasalDeliveryFailed => write!(f, "temp basal delivery failed"),
            Self::BolusDeliveryFailed => write!(f, "bolus delivery failed"),
            Self::TempBasalCancelFailed => write!(f, "temp basal cancel failed"),
            Self::ExtendedBolusCancelFailed => write!(f, "extended bolus cancel failed"),
        }
    }
}
