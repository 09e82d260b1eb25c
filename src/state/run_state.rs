/// Lifecycle of the run controller
///
/// `Idle -> Running -> {Completed, Stopped, Failed}`. A terminal state is
/// kept until the next run starts.
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunState {
    /// No run has been started yet
    Idle,
    /// A run is crawling, draining, or building its archive
    Running,
    /// The frontier was exhausted and the archive was built
    Completed,
    /// Stopped on request; the partial archive was built
    Stopped,
    /// Invalid configuration at start, or a systemic storage failure
    Failed,
}

impl RunState {
    /// Returns true if a new run may be started from this state
    pub fn accepts_start(&self) -> bool {
        !matches!(self, Self::Running)
    }

    /// Returns true for completed, stopped and failed
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Stopped | Self::Failed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Stopped => "stopped",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_running_rejects_start() {
        assert!(RunState::Idle.accepts_start());
        assert!(!RunState::Running.accepts_start());
        assert!(RunState::Completed.accepts_start());
        assert!(RunState::Stopped.accepts_start());
        assert!(RunState::Failed.accepts_start());
    }

    #[test]
    fn test_is_terminal() {
        assert!(!RunState::Idle.is_terminal());
        assert!(!RunState::Running.is_terminal());
        assert!(RunState::Completed.is_terminal());
        assert!(RunState::Stopped.is_terminal());
        assert!(RunState::Failed.is_terminal());
    }
}
