use serde::{Deserialize, Serialize};

/// Run loop lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum LoopState {
    #[default]
    Idle,
    Running,
    Finished,
}

impl LoopState {
    /// Whether the loop may move from this state to `target`.
    pub fn can_transition_to(&self, target: &LoopState) -> bool {
        use LoopState::*;

        matches!(
            (self, target),
            (Idle, Running) |
            (Running, Finished) |
            // A finished loop may run the next session
            (Finished, Running)
        )
    }

    pub fn name(&self) -> &str {
        match self {
            Self::Idle => "Idle",
            Self::Running => "Running",
            Self::Finished => "Finished",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_transitions() {
        assert!(LoopState::Idle.can_transition_to(&LoopState::Running));
        assert!(LoopState::Running.can_transition_to(&LoopState::Finished));
        assert!(LoopState::Finished.can_transition_to(&LoopState::Running));
    }

    #[test]
    fn test_invalid_transitions() {
        assert!(!LoopState::Idle.can_transition_to(&LoopState::Finished));
        assert!(!LoopState::Running.can_transition_to(&LoopState::Running));
        assert!(!LoopState::Finished.can_transition_to(&LoopState::Idle));
    }
}
