//! Registry definition state machine.
//!
//! Valid transitions:
//!   init -> posted
//!   posted -> active
//!   posted | active -> full
//!   active | full -> revoked
//!   init | posted | active | full -> decommissioned
//!
//! `revoked` and `decommissioned` are terminal.

use crate::error::{EngineError, EngineResult};
use revreg_core::RegistryState;

pub fn is_valid_transition(from: RegistryState, to: RegistryState) -> bool {
    use RegistryState::*;
    matches!(
        (from, to),
        (Init, Posted)
            | (Posted, Active)
            | (Posted, Full)
            | (Active, Full)
            | (Active, Revoked)
            | (Full, Revoked)
            | (Init, Decommissioned)
            | (Posted, Decommissioned)
            | (Active, Decommissioned)
            | (Full, Decommissioned)
    )
}

pub fn transition(from: RegistryState, to: RegistryState) -> EngineResult<RegistryState> {
    if is_valid_transition(from, to) {
        Ok(to)
    } else {
        Err(EngineError::InvalidTransition { from, to })
    }
}

/// Registered but not yet accepting issuance.
pub fn is_in_preparation(state: RegistryState) -> bool {
    matches!(state, RegistryState::Init | RegistryState::Posted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use RegistryState::*;

    const ALL: [RegistryState; 6] = [Init, Posted, Active, Full, Revoked, Decommissioned];

    #[test]
    fn test_happy_path() {
        assert_eq!(transition(Init, Posted).unwrap(), Posted);
        assert_eq!(transition(Posted, Active).unwrap(), Active);
        assert_eq!(transition(Active, Full).unwrap(), Full);
        assert_eq!(transition(Full, Revoked).unwrap(), Revoked);
    }

    #[test]
    fn test_terminal_states_have_no_exits() {
        for to in ALL {
            assert!(!is_valid_transition(Revoked, to));
            assert!(!is_valid_transition(Decommissioned, to));
        }
    }

    #[test]
    fn test_no_going_back() {
        assert!(transition(Active, Posted).is_err());
        assert!(transition(Full, Active).is_err());
        assert!(transition(Init, Active).is_err());
        assert!(matches!(
            transition(Full, Full),
            Err(EngineError::InvalidTransition { from: Full, to: Full })
        ));
    }

    #[test]
    fn test_decommission_from_any_live_state() {
        for from in [Init, Posted, Active, Full] {
            assert!(is_valid_transition(from, Decommissioned));
        }
    }
}
