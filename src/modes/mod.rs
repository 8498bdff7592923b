//! Operating-mode state machine.
//!
//! ```text
//!  DISABLED_LOOP ──▶ { OPEN_LOOP, CLOSED_LOOP, CLOSED_LOOP_LGS,
//!                      DISCONNECTED_PUMP, SUPER_BOLUS }
//!  OPEN_LOOP / CLOSED_LOOP / CLOSED_LOOP_LGS ──▶ each other +
//!        { DISABLED_LOOP, DISCONNECTED_PUMP, SUSPENDED_BY_USER,
//!          SUSPENDED_BY_DST, SUPER_BOLUS }
//!  SUPER_BOLUS ──▶ { DISCONNECTED_PUMP, RESUME }
//!  DISCONNECTED_PUMP ──▶ { RESUME }
//!  SUSPENDED_BY_DST ──▶ { DISCONNECTED_PUMP }
//!  SUSPENDED_BY_USER ──▶ { DISCONNECTED_PUMP, RESUME, SUSPENDED_BY_USER }
//!  SUSPENDED_BY_PUMP ──▶ { }          (only the precheck leaves this mode)
//! ```
//!
//! The static adjacency is further filtered by the constraint oracle:
//! when loop invocation is disallowed the three running modes disappear;
//! when closed loop is disallowed `CLOSED_LOOP` disappears.
//!
//! `RESUME` is a transient pseudo-mode: it is accepted as a transition
//! request meaning "end the current temporary mode" and is never stored.

pub mod machine;
pub mod record;

use serde::{Deserialize, Serialize};

use crate::app::ports::ConstraintOracle;

/// The pump's logical operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Mode {
    DisabledLoop,
    OpenLoop,
    ClosedLoop,
    /// Closed loop restricted to low-glucose-suspend: delivery is only
    /// ever reduced, never increased.
    ClosedLoopLgs,
    SuspendedByUser,
    SuspendedByPump,
    SuspendedByDst,
    DisconnectedPump,
    SuperBolus,
    /// Transition request only — never the stored mode.
    Resume,
}

impl Mode {
    /// Modes that only make sense with a finite duration.
    pub fn must_be_temporary(self) -> bool {
        matches!(
            self,
            Self::SuperBolus | Self::DisconnectedPump | Self::SuspendedByUser
        )
    }

    /// Modes in which the loop actively runs invocation cycles.
    /// These are stored open-ended (`duration == 0`, until superseded).
    pub fn is_loop_running(self) -> bool {
        matches!(self, Self::OpenLoop | Self::ClosedLoop | Self::ClosedLoopLgs)
    }

    /// Modes in which the cycle must never issue a dose.
    pub fn is_suspended(self) -> bool {
        matches!(
            self,
            Self::SuspendedByUser
                | Self::SuspendedByPump
                | Self::SuspendedByDst
                | Self::DisconnectedPump
                | Self::SuperBolus
        )
    }

    /// Modes that command the pump autonomously.
    pub fn is_closed_loop(self) -> bool {
        matches!(self, Self::ClosedLoop | Self::ClosedLoopLgs)
    }
}

impl core::fmt::Display for Mode {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let name = match self {
            Self::DisabledLoop => "disabled loop",
            Self::OpenLoop => "open loop",
            Self::ClosedLoop => "closed loop",
            Self::ClosedLoopLgs => "closed loop (LGS)",
            Self::SuspendedByUser => "suspended by user",
            Self::SuspendedByPump => "suspended by pump",
            Self::SuspendedByDst => "suspended (DST)",
            Self::DisconnectedPump => "pump disconnected",
            Self::SuperBolus => "super bolus",
            Self::Resume => "resume",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Adjacency
// ---------------------------------------------------------------------------

/// Static adjacency table: which modes may be requested from `current`,
/// before the constraint-oracle filter.
pub fn allowed_next_modes(current: Mode) -> &'static [Mode] {
    use Mode::*;
    match current {
        DisabledLoop => &[OpenLoop, ClosedLoop, ClosedLoopLgs, DisconnectedPump, SuperBolus],
        OpenLoop => &[
            ClosedLoop,
            ClosedLoopLgs,
            DisabledLoop,
            DisconnectedPump,
            SuspendedByUser,
            SuspendedByDst,
            SuperBolus,
        ],
        ClosedLoop => &[
            OpenLoop,
            ClosedLoopLgs,
            DisabledLoop,
            DisconnectedPump,
            SuspendedByUser,
            SuspendedByDst,
            SuperBolus,
        ],
        ClosedLoopLgs => &[
            OpenLoop,
            ClosedLoop,
            DisabledLoop,
            DisconnectedPump,
            SuspendedByUser,
            SuspendedByDst,
            SuperBolus,
        ],
        SuperBolus => &[DisconnectedPump, Resume],
        DisconnectedPump => &[Resume],
        SuspendedByDst => &[DisconnectedPump],
        SuspendedByUser => &[DisconnectedPump, Resume, SuspendedByUser],
        // Pump-suspend overrides all user intent; only the precheck exits it.
        SuspendedByPump => &[],
        // Transient pseudo-mode, never current.
        Resume => &[],
    }
}

/// Adjacency filtered by the live constraint oracle.
pub fn allowed_next_modes_filtered(
    current: Mode,
    oracle: &dyn ConstraintOracle,
) -> Vec<Mode> {
    let invocation_allowed = oracle.is_loop_invocation_allowed().value;
    let closed_allowed = oracle.is_closed_loop_allowed().value;

    allowed_next_modes(current)
        .iter()
        .copied()
        .filter(|m| match m {
            Mode::OpenLoop | Mode::ClosedLoopLgs => invocation_allowed,
            Mode::ClosedLoop => invocation_allowed && closed_allowed,
            _ => true,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::app::ports::Constraint;

    /// Oracle stub with switchable answers and pass-through clamps.
    pub(crate) struct StubOracle {
        pub closed_allowed: bool,
        pub invocation_allowed: bool,
        pub lgs_forced: bool,
    }

    impl Default for StubOracle {
        fn default() -> Self {
            Self {
                closed_allowed: true,
                invocation_allowed: true,
                lgs_forced: false,
            }
        }
    }

    impl ConstraintOracle for StubOracle {
        fn is_closed_loop_allowed(&self) -> Constraint<bool> {
            Constraint::unconstrained(self.closed_allowed)
        }
        fn is_loop_invocation_allowed(&self) -> Constraint<bool> {
            Constraint::unconstrained(self.invocation_allowed)
        }
        fn is_lgs_forced(&self) -> Constraint<bool> {
            Constraint::unconstrained(self.lgs_forced)
        }
        fn apply_basal_constraint(&self, rate_uh: f64) -> Constraint<f64> {
            Constraint::unconstrained(rate_uh)
        }
        fn apply_percent_constraint(&self, percent: u16) -> Constraint<u16> {
            Constraint::unconstrained(percent)
        }
        fn apply_bolus_constraint(&self, units: f64) -> Constraint<f64> {
            Constraint::unconstrained(units)
        }
    }

    #[test]
    fn disabled_loop_offers_running_modes() {
        let next = allowed_next_modes(Mode::DisabledLoop);
        assert!(next.contains(&Mode::OpenLoop));
        assert!(next.contains(&Mode::ClosedLoop));
        assert!(next.contains(&Mode::ClosedLoopLgs));
        assert!(!next.contains(&Mode::Resume));
    }

    #[test]
    fn running_modes_reach_each_other_but_not_self() {
        for m in [Mode::OpenLoop, Mode::ClosedLoop, Mode::ClosedLoopLgs] {
            let next = allowed_next_modes(m);
            assert!(!next.contains(&m), "{m} must not list itself");
            for other in [Mode::OpenLoop, Mode::ClosedLoop, Mode::ClosedLoopLgs] {
                if other != m {
                    assert!(next.contains(&other), "{m} must reach {other}");
                }
            }
            assert!(next.contains(&Mode::SuspendedByUser));
        }
    }

    #[test]
    fn resume_only_reachable_from_temporary_modes() {
        for m in [
            Mode::DisabledLoop,
            Mode::OpenLoop,
            Mode::ClosedLoop,
            Mode::ClosedLoopLgs,
            Mode::SuspendedByDst,
            Mode::SuspendedByPump,
        ] {
            assert!(!allowed_next_modes(m).contains(&Mode::Resume));
        }
        for m in [Mode::SuperBolus, Mode::DisconnectedPump, Mode::SuspendedByUser] {
            assert!(allowed_next_modes(m).contains(&Mode::Resume));
        }
    }

    #[test]
    fn pump_suspend_has_no_user_exit() {
        assert!(allowed_next_modes(Mode::SuspendedByPump).is_empty());
    }

    #[test]
    fn user_suspend_can_be_extended() {
        assert!(allowed_next_modes(Mode::SuspendedByUser).contains(&Mode::SuspendedByUser));
    }

    #[test]
    fn invocation_disallowed_removes_running_modes() {
        let oracle = StubOracle {
            invocation_allowed: false,
            ..Default::default()
        };
        let next = allowed_next_modes_filtered(Mode::DisabledLoop, &oracle);
        assert!(!next.contains(&Mode::OpenLoop));
        assert!(!next.contains(&Mode::ClosedLoop));
        assert!(!next.contains(&Mode::ClosedLoopLgs));
        assert!(next.contains(&Mode::DisconnectedPump));
    }

    #[test]
    fn closed_loop_disallowed_removes_only_closed_loop() {
        let oracle = StubOracle {
            closed_allowed: false,
            ..Default::default()
        };
        let next = allowed_next_modes_filtered(Mode::OpenLoop, &oracle);
        assert!(!next.contains(&Mode::ClosedLoop));
        assert!(next.contains(&Mode::ClosedLoopLgs));
    }

    #[test]
    fn suspended_flag_covers_all_non_dosing_modes() {
        assert!(Mode::SuspendedByUser.is_suspended());
        assert!(Mode::SuspendedByPump.is_suspended());
        assert!(Mode::SuspendedByDst.is_suspended());
        assert!(Mode::DisconnectedPump.is_suspended());
        assert!(Mode::SuperBolus.is_suspended());
        assert!(!Mode::ClosedLoop.is_suspended());
        assert!(!Mode::OpenLoop.is_suspended());
    }
}
