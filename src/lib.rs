//! GlucoLoop — the decision core of an automated insulin-delivery controller.
//!
//! Given a glucose/IOB/COB state and a dosing recommendation from an
//! external algorithm, this crate decides whether, how, and in what order
//! to apply insulin-delivery commands to a pump, while enforcing safety
//! constraints and maintaining an auditable operating-mode history.
//!
//! All interaction with the outside world (pump, constraint policy,
//! dosing algorithm, record store, notifications) happens through the
//! port traits in [`app::ports`], keeping the core fully testable with
//! mock collaborators.

#![deny(unused_must_use)]

pub mod app;
pub mod config;
pub mod dosing;
pub mod error;
pub mod modes;
pub mod safety;
pub mod scheduler;
pub mod status;
