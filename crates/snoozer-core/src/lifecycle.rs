use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::CoreError;

/// Lifecycle of a managed instance.
///
/// The cycle is Running → Idle → Stopping → Stopped → Starting → Running.
/// An idle instance may fall back to Running when activity resumes, but
/// nothing reaches Stopping without passing through Idle first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstanceState {
    Running,
    Idle,
    Stopping,
    Stopped,
    Starting,
}

impl InstanceState {
    pub const ALL: [InstanceState; 5] = [
        InstanceState::Running,
        InstanceState::Idle,
        InstanceState::Stopping,
        InstanceState::Stopped,
        InstanceState::Starting,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceState::Running => "running",
            InstanceState::Idle => "idle",
            InstanceState::Stopping => "stopping",
            InstanceState::Stopped => "stopped",
            InstanceState::Starting => "starting",
        }
    }

    /// Whether `self -> next` is a legal step. Staying put is always allowed.
    pub fn can_transition_to(&self, next: InstanceState) -> bool {
        use InstanceState::*;

        if *self == next {
            return true;
        }

        matches!(
            (self, next),
            (Running, Idle)
                | (Idle, Running)
                | (Idle, Stopping)
                | (Stopping, Stopped)
                | (Stopped, Starting)
                | (Starting, Running)
        )
    }

    pub fn transition_to(&self, next: InstanceState) -> Result<InstanceState, CoreError> {
        if self.can_transition_to(next) {
            Ok(next)
        } else {
            Err(CoreError::InvalidTransition {
                from: *self,
                to: next,
            })
        }
    }

    /// Shortest legal path from `self` to `target`, excluding `self`.
    pub fn path_to(&self, target: InstanceState) -> Vec<InstanceState> {
        let mut path = Vec::new();
        let mut current = *self;
        while current != target {
            current = match current {
                InstanceState::Running => InstanceState::Idle,
                InstanceState::Idle if target == InstanceState::Running => InstanceState::Running,
                InstanceState::Idle => InstanceState::Stopping,
                InstanceState::Stopping => InstanceState::Stopped,
                InstanceState::Stopped => InstanceState::Starting,
                InstanceState::Starting => InstanceState::Running,
            };
            path.push(current);
        }
        path
    }
}

impl fmt::Display for InstanceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for InstanceState {
    type Err = CoreError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        InstanceState::ALL
            .into_iter()
            .find(|state| state.as_str().eq_ignore_ascii_case(value.trim()))
            .ok_or_else(|| CoreError::UnknownState(value.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_forward_cycle_is_allowed() {
        use InstanceState::*;
        let cycle = [Running, Idle, Stopping, Stopped, Starting, Running];
        for pair in cycle.windows(2) {
            assert!(pair[0].can_transition_to(pair[1]), "{:?}", pair);
        }
    }

    #[test]
    fn test_idle_can_resume_running() {
        assert!(InstanceState::Idle.can_transition_to(InstanceState::Running));
    }

    #[test]
    fn test_stopping_requires_idle_first() {
        assert!(!InstanceState::Running.can_transition_to(InstanceState::Stopping));
        assert!(!InstanceState::Starting.can_transition_to(InstanceState::Stopping));
        assert_eq!(
            InstanceState::Running.transition_to(InstanceState::Stopping),
            Err(CoreError::InvalidTransition {
                from: InstanceState::Running,
                to: InstanceState::Stopping,
            })
        );
    }

    #[test]
    fn test_no_backwards_steps() {
        assert!(!InstanceState::Stopped.can_transition_to(InstanceState::Running));
        assert!(!InstanceState::Stopping.can_transition_to(InstanceState::Idle));
        assert!(!InstanceState::Starting.can_transition_to(InstanceState::Stopped));
    }

    #[test]
    fn test_path_to_stopping_goes_through_idle() {
        assert_eq!(
            InstanceState::Running.path_to(InstanceState::Stopping),
            vec![InstanceState::Idle, InstanceState::Stopping]
        );
        assert_eq!(
            InstanceState::Idle.path_to(InstanceState::Stopping),
            vec![InstanceState::Stopping]
        );
        assert!(InstanceState::Stopping
            .path_to(InstanceState::Stopping)
            .is_empty());
    }

    #[test]
    fn test_parse_and_display() {
        for state in InstanceState::ALL {
            assert_eq!(state.to_string().parse::<InstanceState>().unwrap(), state);
        }
        assert_eq!(
            "RUNNING".parse::<InstanceState>().unwrap(),
            InstanceState::Running
        );
        assert!("hibernating".parse::<InstanceState>().is_err());
    }

    fn any_state() -> impl Strategy<Value = InstanceState> {
        prop::sample::select(InstanceState::ALL.to_vec())
    }

    proptest! {
        #[test]
        fn property_every_path_step_is_legal(from in any_state(), to in any_state()) {
            let mut current = from;
            for step in from.path_to(to) {
                prop_assert!(current.can_transition_to(step));
                current = step;
            }
            prop_assert_eq!(current, to);
        }
    }
}
