//! Drain state machine.

use serde::Serialize;

/// Where the drain sequence currently stands. Transitions only move forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DrainState {
    Running,
    Cancelling,
    AwaitingTasks,
    Persisting,
    DrainingWrites,
    ClosingResources,
    Done,
}

impl DrainState {
    pub fn as_str(&self) -> &'static str {
        match self {
            DrainState::Running => "running",
            DrainState::Cancelling => "cancelling",
            DrainState::AwaitingTasks => "awaiting_tasks",
            DrainState::Persisting => "persisting",
            DrainState::DrainingWrites => "draining_writes",
            DrainState::ClosingResources => "closing_resources",
            DrainState::Done => "done",
        }
    }

    /// The state that follows this one, `None` once `Done`.
    pub fn next(&self) -> Option<DrainState> {
        match self {
            DrainState::Running => Some(DrainState::Cancelling),
            DrainState::Cancelling => Some(DrainState::AwaitingTasks),
            DrainState::AwaitingTasks => Some(DrainState::Persisting),
            DrainState::Persisting => Some(DrainState::DrainingWrites),
            DrainState::DrainingWrites => Some(DrainState::ClosingResources),
            DrainState::ClosingResources => Some(DrainState::Done),
            DrainState::Done => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, DrainState::Done)
    }
}

impl std::fmt::Display for DrainState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn states_walk_forward_to_done() {
        let mut state = DrainState::Running;
        let mut visited = vec![state];
        while let Some(next) = state.next() {
            assert!(next > state);
            state = next;
            visited.push(state);
        }

        assert_eq!(visited.len(), 7);
        assert!(state.is_terminal());
        assert_eq!(state.to_string(), "done");
    }
}
