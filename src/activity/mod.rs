mod heuristics;
mod tracker;

pub use heuristics::{describe_command, Classification, Heuristics};
pub use tracker::{spawn_tracker, ActivityTracker, TrackerHandle, TrackerUpdate};

use serde::{Deserialize, Serialize};
use std::fmt;

/// What an agent is inferred to be doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AgentState {
    /// Nothing observed within the quiet period
    #[default]
    Idle,
    /// Editing files
    Writing,
    /// Opening files or running analysis tools
    Reading,
    /// A terminal command is executing
    RunningCommand,
    /// Writing plan artifacts
    Planning,
}

impl AgentState {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentState::Idle => "idle",
            AgentState::Writing => "writing",
            AgentState::Reading => "reading",
            AgentState::RunningCommand => "running_command",
            AgentState::Planning => "planning",
        }
    }

    pub fn is_idle(&self) -> bool {
        matches!(self, AgentState::Idle)
    }
}

impl fmt::Display for AgentState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A visible transition reported by a tracker
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StateChange {
    pub state: AgentState,
    pub description: Option<String>,
}

impl StateChange {
    pub fn new(state: AgentState, description: Option<String>) -> Self {
        Self { state, description }
    }

    /// Text shown next to an active agent
    pub fn label(&self) -> &str {
        self.description
            .as_deref()
            .unwrap_or_else(|| self.state.as_str())
    }
}
