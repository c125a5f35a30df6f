use anyhow::{Context, Result};
use serde_json::Value;
use std::ops::ControlFlow;
use std::path::Path;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::mpsc;
use tracing::info;

use crate::activity::{Heuristics, TrackerUpdate};
use crate::config::Config;
use crate::host::{parse_line, Command, Environment, Inbound};
use crate::registry::{Registry, WorkspaceStore};

/// Everything one workspace session needs: the event bus, the registry and
/// the channel its trackers report on.
pub struct Session {
    pub registry: Registry,
    env: Environment,
    heuristics: Arc<Heuristics>,
    updates: mpsc::UnboundedReceiver<TrackerUpdate>,
    default_layout: Option<Value>,
}

enum Step {
    Line(Option<String>),
    Update(TrackerUpdate),
}

impl Session {
    pub fn new(config: &Config, workspace: &Path, store: Box<dyn WorkspaceStore>) -> Result<Self> {
        let heuristics = Arc::new(
            Heuristics::from_config(config, workspace).context("Invalid watch pattern in config")?,
        );
        let env = Environment::new();
        let (registry, updates) = Registry::new(
            env.clone(),
            heuristics.clone(),
            config.quiet_period(),
            store,
        );

        Ok(Self {
            registry,
            env,
            heuristics,
            updates,
            default_layout: None,
        })
    }

    /// Layout sent when the workspace has none saved
    pub fn with_default_layout(mut self, layout: Option<Value>) -> Self {
        self.default_layout = layout;
        self
    }

    pub fn env(&self) -> &Environment {
        &self.env
    }

    pub fn heuristics(&self) -> Arc<Heuristics> {
        self.heuristics.clone()
    }

    /// Wait for the next tracker report
    pub async fn next_update(&mut self) -> Option<TrackerUpdate> {
        self.updates.recv().await
    }

    /// Route one feed item; `Break` ends the session
    pub fn handle(&mut self, inbound: Inbound) -> ControlFlow<()> {
        match inbound {
            Inbound::Event(event) => {
                self.env.publish(event);
                ControlFlow::Continue(())
            }
            Inbound::Command(command) => self.execute(command),
        }
    }

    pub fn execute(&mut self, command: Command) -> ControlFlow<()> {
        match command {
            Command::Launch => {
                self.registry.launch();
            }
            Command::Remove { id } => {
                self.registry.remove(id);
            }
            Command::WebviewReady => {
                self.registry.send_existing_agents();
                self.registry.send_layout(self.default_layout.clone());
            }
            Command::Resync => self.registry.send_current_statuses(),
            Command::Quit => return ControlFlow::Break(()),
        }
        ControlFlow::Continue(())
    }

    /// Drive the session from a JSON-lines feed until EOF or `quit`
    pub async fn run<R>(&mut self, reader: R) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
    {
        let mut lines = reader.lines();
        loop {
            let step = tokio::select! {
                line = lines.next_line() => Step::Line(line.context("Failed to read editor feed")?),
                Some(update) = self.updates.recv() => Step::Update(update),
            };

            match step {
                Step::Line(Some(line)) => {
                    if let Some(inbound) = parse_line(&line) {
                        if self.handle(inbound).is_break() {
                            break;
                        }
                    }
                }
                Step::Line(None) => {
                    info!("Editor feed closed");
                    break;
                }
                Step::Update(update) => self.registry.apply_update(update),
            }
        }
        Ok(())
    }

    /// Stop every tracker
    pub fn shutdown(&mut self) {
        self.registry.shutdown();
    }
}
