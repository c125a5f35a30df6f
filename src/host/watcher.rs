use notify::event::ModifyKind;
use notify::{Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, warn};

use super::{Environment, HostEvent};
use crate::activity::Heuristics;

/// Filesystem watcher feeding artifact and tool-log events into the bus
pub struct WorkspaceWatcher {
    _watcher: RecommendedWatcher,
    roots: Vec<PathBuf>,
}

impl WorkspaceWatcher {
    /// Watch each existing root recursively. Roots that cannot be watched are
    /// logged and skipped.
    pub fn start(
        roots: Vec<PathBuf>,
        heuristics: Arc<Heuristics>,
        env: Environment,
    ) -> notify::Result<Self> {
        let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                for host_event in translate(&event, &heuristics) {
                    env.publish(host_event);
                }
            }
            Err(e) => warn!(error = %e, "File watcher error"),
        })?;

        let mut watched = Vec::new();
        for root in roots {
            if !root.exists() {
                debug!(root = %root.display(), "Watch root does not exist");
                continue;
            }
            match watcher.watch(&root, RecursiveMode::Recursive) {
                Ok(()) => watched.push(root),
                Err(e) => warn!(root = %root.display(), error = %e, "Failed to watch"),
            }
        }

        Ok(Self {
            _watcher: watcher,
            roots: watched,
        })
    }

    /// Roots actually being watched
    pub fn roots(&self) -> &[PathBuf] {
        &self.roots
    }
}

fn translate(event: &Event, heuristics: &Heuristics) -> Vec<HostEvent> {
    let created = match event.kind {
        EventKind::Create(_) => true,
        // Touching permissions or timestamps is not activity
        EventKind::Modify(ModifyKind::Metadata(_)) => return Vec::new(),
        EventKind::Modify(_) => false,
        _ => return Vec::new(),
    };

    event
        .paths
        .iter()
        .filter(|path| heuristics.is_watched(path))
        .map(|path| {
            let path = path.clone();
            if created {
                HostEvent::FileCreated { path }
            } else {
                HostEvent::FileChanged { path }
            }
        })
        .collect()
}
