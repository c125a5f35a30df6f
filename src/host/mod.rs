mod feed;
mod watcher;

pub use feed::{parse_line, Command, Inbound};
pub use watcher::WorkspaceWatcher;

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};

/// Capacity of the shared event bus before slow trackers start lagging
const EVENT_BUS_CAPACITY: usize = 256;

fn default_scheme() -> String {
    "file".to_string()
}

/// Identity of an editor document
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Document {
    /// Storage scheme (e.g. "file", "untitled", "git")
    #[serde(default = "default_scheme")]
    pub scheme: String,
    /// Filesystem path backing the document
    #[serde(default)]
    pub path: PathBuf,
}

impl Document {
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            scheme: default_scheme(),
            path: path.into(),
        }
    }

    /// Only file-backed documents are considered agent activity
    pub fn is_file_backed(&self) -> bool {
        self.scheme == "file" && !self.path.as_os_str().is_empty()
    }
}

/// One edit inside a document change
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentChange {
    /// Inserted text
    #[serde(default)]
    pub text: String,
}

impl ContentChange {
    pub fn inserted(text: impl Into<String>) -> Self {
        Self { text: text.into() }
    }

    pub fn inserted_len(&self) -> usize {
        self.text.chars().count()
    }
}

/// Activity observed in the host editor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum HostEvent {
    /// A watched file was created
    FileCreated { path: PathBuf },
    /// A watched file was modified
    FileChanged { path: PathBuf },
    /// Text was edited in an open document
    DocumentChanged {
        document: Document,
        #[serde(default)]
        changes: Vec<ContentChange>,
    },
    /// A document was opened
    DocumentOpened { document: Document },
    /// Keyboard focus moved to another editor (or none)
    ActiveEditorChanged {
        #[serde(default)]
        document: Option<Document>,
    },
    /// A terminal started executing a command
    ShellExecutionStarted {
        #[serde(default)]
        command_line: Option<String>,
    },
    /// A terminal command finished
    ShellExecutionEnded {
        #[serde(default)]
        command_line: Option<String>,
        #[serde(default)]
        exit_code: Option<i32>,
    },
}

/// An event as published, with the document that had focus at that moment
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Observation {
    pub event: HostEvent,
    pub focused: Option<Document>,
}

/// Shared event bus plus the focused-document cell
#[derive(Clone)]
pub struct Environment {
    events: broadcast::Sender<Observation>,
    focus: Arc<watch::Sender<Option<Document>>>,
}

impl Environment {
    pub fn new() -> Self {
        let (events, _) = broadcast::channel(EVENT_BUS_CAPACITY);
        let (focus, _) = watch::channel(None);
        Self {
            events,
            focus: Arc::new(focus),
        }
    }

    /// Deliver an event to every live subscription
    pub fn publish(&self, event: HostEvent) {
        let focused = match &event {
            HostEvent::ActiveEditorChanged { document } => {
                self.focus.send_replace(document.clone());
                document.clone()
            }
            _ => self.focused_document(),
        };
        // No subscribers simply means no agents exist yet
        let _ = self.events.send(Observation { event, focused });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Observation> {
        self.events.subscribe()
    }

    /// The document currently focused in the editor
    pub fn focused_document(&self) -> Option<Document> {
        self.focus.borrow().clone()
    }

    pub fn subscriber_count(&self) -> usize {
        self.events.receiver_count()
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}
