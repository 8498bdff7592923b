//! Application core — pure decision logic, zero I/O.
//!
//! This module contains the business rules of the closed-loop engine:
//! the invocation cycle, command continuations, and notification
//! debouncing.  All interaction with the pump, algorithm, policy, and
//! storage happens through **port traits** defined in [`ports`], keeping
//! this layer fully testable without real collaborators.

pub mod commands;
pub mod events;
pub mod ports;
pub mod service;
