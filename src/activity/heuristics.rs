use globset::{Glob, GlobMatcher};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};

use super::AgentState;
use crate::config::Config;
use crate::host::{Document, HostEvent};

/// Longest command line shown before truncation
const MAX_COMMAND_LABEL: usize = 60;

/// Terminal escape sequences that shell integration leaves in command lines
static RE_ANSI: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)").unwrap()
});

static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").unwrap());

/// A state the event stream points at, with the text to display
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub state: AgentState,
    pub description: String,
}

impl Classification {
    fn new(state: AgentState, description: impl Into<String>) -> Self {
        Self {
            state,
            description: description.into(),
        }
    }
}

/// Rules mapping raw editor events to agent activity
#[derive(Debug, Clone)]
pub struct Heuristics {
    workspace_root: PathBuf,
    artifacts: GlobMatcher,
    internal_logs: GlobMatcher,
    internal_logs_marker: String,
    planning_markers: Vec<String>,
    vcs_markers: Vec<String>,
    large_edit_threshold: usize,
}

impl Heuristics {
    pub fn from_config(config: &Config, workspace_root: impl Into<PathBuf>) -> Result<Self, globset::Error> {
        Ok(Self {
            workspace_root: workspace_root.into(),
            artifacts: Glob::new(&config.artifact_glob)?.compile_matcher(),
            internal_logs: Glob::new(&config.internal_logs_glob)?.compile_matcher(),
            internal_logs_marker: config.internal_logs_marker.clone(),
            planning_markers: config.planning_markers.clone(),
            vcs_markers: config.vcs_markers.clone(),
            large_edit_threshold: config.large_edit_threshold,
        })
    }

    /// Whether a filesystem path is interesting enough to forward from a watcher
    pub fn is_watched(&self, path: &Path) -> bool {
        self.artifacts.is_match(path) || self.is_internal_log(path)
    }

    /// Classify one event against the current state.
    ///
    /// A single file event can satisfy several rules (a plan artifact written
    /// inside the tool-log directory). Rules are applied in order and later
    /// guards see the state produced by earlier matches, so the returned list
    /// is what the tracker should apply, first to last.
    pub fn classify(
        &self,
        event: &HostEvent,
        current: AgentState,
        focused: Option<&Document>,
    ) -> Vec<Classification> {
        let mut state = current;
        let mut found = Vec::new();
        let mut push = |c: Classification, state: &mut AgentState| {
            *state = c.state;
            found.push(c);
        };

        match event {
            HostEvent::FileCreated { path } | HostEvent::FileChanged { path } => {
                let created = matches!(event, HostEvent::FileCreated { .. });

                if self.artifacts.is_match(path) && self.is_planning_artifact(path) {
                    let description = if created {
                        "Planning task..."
                    } else {
                        "Updating plan..."
                    };
                    push(Classification::new(AgentState::Planning, description), &mut state);
                }

                if self.is_internal_log(path) && may_start_reading(state) {
                    push(
                        Classification::new(AgentState::Reading, "Analyzing/Reading..."),
                        &mut state,
                    );
                }
            }
            HostEvent::DocumentChanged { document, changes } => {
                if document.is_file_backed() && !self.is_vcs_path(&document.path) {
                    let large = changes
                        .iter()
                        .any(|c| c.inserted_len() > self.large_edit_threshold);
                    let background = focused != Some(document);

                    if large || background {
                        push(
                            Classification::new(
                                AgentState::Writing,
                                format!("Writing {}", self.relative(&document.path)),
                            ),
                            &mut state,
                        );
                    }
                }
            }
            HostEvent::DocumentOpened { document } => {
                if document.is_file_backed()
                    && !self.is_vcs_path(&document.path)
                    && !self.is_internal_log(&document.path)
                    && may_start_reading(state)
                {
                    push(
                        Classification::new(
                            AgentState::Reading,
                            format!("Reading {}", self.relative(&document.path)),
                        ),
                        &mut state,
                    );
                }
            }
            HostEvent::ShellExecutionStarted { command_line } => {
                push(
                    Classification::new(
                        AgentState::RunningCommand,
                        describe_command(command_line.as_deref()),
                    ),
                    &mut state,
                );
            }
            HostEvent::ShellExecutionEnded { .. } => {
                push(
                    Classification::new(AgentState::Idle, "Finished command"),
                    &mut state,
                );
            }
            HostEvent::ActiveEditorChanged { .. } => {}
        }

        found
    }

    fn is_planning_artifact(&self, path: &Path) -> bool {
        self.planning_markers
            .iter()
            .any(|marker| has_component(path, marker))
    }

    fn is_internal_log(&self, path: &Path) -> bool {
        self.internal_logs.is_match(path) || has_component(path, &self.internal_logs_marker)
    }

    fn is_vcs_path(&self, path: &Path) -> bool {
        self.vcs_markers.iter().any(|marker| has_component(path, marker))
    }

    /// Path relative to the workspace, or as given when outside it
    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.workspace_root)
            .unwrap_or(path)
            .display()
            .to_string()
    }
}

/// Reading never preempts writing or a running command
fn may_start_reading(state: AgentState) -> bool {
    matches!(state, AgentState::Idle | AgentState::Planning)
}

fn has_component(path: &Path, marker: &str) -> bool {
    path.components().any(|c| c.as_os_str() == marker)
}

/// Display text for a shell execution
pub fn describe_command(command_line: Option<&str>) -> String {
    let cleaned = command_line
        .map(|cmd| {
            let stripped = RE_ANSI.replace_all(cmd, "");
            RE_WHITESPACE.replace_all(stripped.trim(), " ").into_owned()
        })
        .unwrap_or_default();

    if cleaned.is_empty() {
        return "Running: command".to_string();
    }

    if cleaned.chars().count() > MAX_COMMAND_LABEL {
        let head: String = cleaned.chars().take(MAX_COMMAND_LABEL).collect();
        format!("Running: {}...", head)
    } else {
        format!("Running: {}", cleaned)
    }
}
