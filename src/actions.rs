use crossterm::event::KeyEvent;

use crate::host::Inbound;
use crate::protocol::UiMessage;
use crate::registry::AgentId;

/// Actions that can be dispatched through the dashboard
#[derive(Debug, Clone)]
pub enum Action {
    /// A key was pressed
    KeyPress(KeyEvent),
    /// A notification from the registry
    Notify(UiMessage),
    /// A line from the editor feed
    Feed(Inbound),
    /// An error occurred
    Error(String),
    /// Request to quit the application
    Quit,
    /// Start tracking a new agent
    LaunchAgent,
    /// Stop tracking an agent
    RemoveAgent(AgentId),
    /// Ask the registry to resend everything
    Resync,
}
