use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::Write;
use tokio::sync::mpsc;
use tracing::warn;

use crate::activity::StateChange;
use crate::registry::AgentId;

/// Tool id under which the activity text is displayed
pub const ACTIVITY_TOOL_ID: &str = "activity-status";

/// Coarse activity flag shown by the UI
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AgentActivity {
    Waiting,
    Active,
}

/// Notifications sent to the UI
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum UiMessage {
    AgentCreated {
        id: AgentId,
    },
    AgentStatus {
        id: AgentId,
        status: AgentActivity,
    },
    AgentToolStart {
        id: AgentId,
        tool_id: String,
        status: String,
    },
    AgentToolsClear {
        id: AgentId,
    },
    ExistingAgents {
        agents: Vec<AgentId>,
        agent_meta: Value,
    },
    LayoutLoaded {
        layout: Value,
    },
}

impl UiMessage {
    /// The status plus tool-display pair describing one agent's state
    pub fn for_state(id: AgentId, change: &StateChange) -> Vec<UiMessage> {
        if change.state.is_idle() {
            vec![
                UiMessage::AgentStatus {
                    id,
                    status: AgentActivity::Waiting,
                },
                UiMessage::AgentToolsClear { id },
            ]
        } else {
            vec![
                UiMessage::AgentStatus {
                    id,
                    status: AgentActivity::Active,
                },
                UiMessage::AgentToolStart {
                    id,
                    tool_id: ACTIVITY_TOOL_ID.to_string(),
                    status: change.label().to_string(),
                },
            ]
        }
    }
}

/// Anything able to receive UI notifications
pub trait UiSink: Send {
    fn post(&mut self, message: UiMessage);
}

impl UiSink for mpsc::UnboundedSender<UiMessage> {
    fn post(&mut self, message: UiMessage) {
        // A closed receiver means the UI went away; the next attach resyncs
        let _ = self.send(message);
    }
}

/// Writes one JSON object per line
pub struct JsonLinesSink<W: Write + Send> {
    writer: W,
}

impl<W: Write + Send> JsonLinesSink<W> {
    pub fn new(writer: W) -> Self {
        Self { writer }
    }

    pub fn into_inner(self) -> W {
        self.writer
    }
}

impl<W: Write + Send> UiSink for JsonLinesSink<W> {
    fn post(&mut self, message: UiMessage) {
        let result = serde_json::to_writer(&mut self.writer, &message)
            .map_err(std::io::Error::from)
            .and_then(|_| self.writer.write_all(b"\n"))
            .and_then(|_| self.writer.flush());
        if let Err(e) = result {
            warn!(error = %e, "Failed to write UI message");
        }
    }
}
