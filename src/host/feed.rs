use serde::{Deserialize, Serialize};
use tracing::warn;

use super::HostEvent;
use crate::registry::AgentId;

/// Requests from the editor side that drive the registry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum Command {
    /// Start tracking a new agent
    Launch,
    /// Stop tracking an agent
    Remove { id: AgentId },
    /// The UI (re)loaded and needs the full picture
    WebviewReady,
    /// Re-send statuses only
    Resync,
    /// End the session
    Quit,
}

/// One line of the editor feed
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum Inbound {
    Command(Command),
    Event(HostEvent),
}

/// Parse one JSON line. Blank and malformed lines yield `None`.
pub fn parse_line(line: &str) -> Option<Inbound> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(inbound) => Some(inbound),
        Err(e) => {
            warn!(error = %e, line, "Skipping unrecognized feed line");
            None
        }
    }
}
