//! Agent lifecycle states
//!
//! Transitions only move forward; `Stopped` is terminal. A stopped agent is
//! not restarted, a new one is built instead.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum AgentState {
    /// Configuration set, nothing dialed yet
    Created,
    /// Channel to the authority established
    Connected,
    /// Sync and both validation loops running
    Running,
    /// Shutdown requested, waiting for loops to return
    Stopping,
    /// Loops joined, channel dropped
    Stopped,
}

impl AgentState {
    /// Whether moving from `self` to `next` is allowed
    pub fn can_transition_to(self, next: AgentState) -> bool {
        use AgentState::*;
        matches!(
            (self, next),
            (Created, Connected)
                | (Connected, Running)
                | (Running, Stopping)
                | (Stopping, Stopped)
                // shutdown before the loops ever started
                | (Created, Stopped)
                | (Connected, Stopped)
        )
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AgentState::Created => "created",
            AgentState::Connected => "connected",
            AgentState::Running => "running",
            AgentState::Stopping => "stopping",
            AgentState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_forward_transitions() {
        assert!(AgentState::Created.can_transition_to(AgentState::Connected));
        assert!(AgentState::Connected.can_transition_to(AgentState::Running));
        assert!(AgentState::Running.can_transition_to(AgentState::Stopping));
        assert!(AgentState::Stopping.can_transition_to(AgentState::Stopped));
    }

    #[test]
    fn test_no_going_back() {
        assert!(!AgentState::Running.can_transition_to(AgentState::Connected));
        assert!(!AgentState::Stopped.can_transition_to(AgentState::Running));
        assert!(!AgentState::Stopped.can_transition_to(AgentState::Created));
        assert!(!AgentState::Stopping.can_transition_to(AgentState::Running));
    }

    #[test]
    fn test_display() {
        assert_eq!(AgentState::Running.to_string(), "running");
    }
}
