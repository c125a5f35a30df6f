use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, warn};

use super::{AgentState, Heuristics, StateChange};
use crate::host::{Document, Environment, HostEvent, Observation};
use crate::registry::AgentId;

/// Per-agent activity state machine with decay to idle.
///
/// Pure over time: callers pass `now` in, and the decay deadline is exposed
/// so the owning task can sleep until it.
#[derive(Debug)]
pub struct ActivityTracker {
    heuristics: Arc<Heuristics>,
    quiet_period: Duration,
    state: AgentState,
    deadline: Option<Instant>,
}

impl ActivityTracker {
    pub fn new(heuristics: Arc<Heuristics>, quiet_period: Duration) -> Self {
        Self {
            heuristics,
            quiet_period,
            state: AgentState::Idle,
            deadline: None,
        }
    }

    pub fn state(&self) -> AgentState {
        self.state
    }

    /// When the tracker falls back to idle if nothing else happens
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Feed one event, returning the visible transitions it caused
    pub fn observe(
        &mut self,
        event: &HostEvent,
        focused: Option<&Document>,
        now: Instant,
    ) -> Vec<StateChange> {
        let mut changes = Vec::new();
        for c in self.heuristics.classify(event, self.state, focused) {
            debug!(from = %self.state, to = %c.state, description = %c.description, "Classified event");
            changes.extend(self.set_state(c.state, Some(c.description), now));
        }
        changes
    }

    /// Apply the decay if the quiet period has elapsed
    pub fn expire(&mut self, now: Instant) -> Option<StateChange> {
        match self.deadline {
            Some(at) if now >= at => {
                self.deadline = None;
                if self.state.is_idle() {
                    return None;
                }
                self.state = AgentState::Idle;
                Some(StateChange::new(AgentState::Idle, None))
            }
            _ => None,
        }
    }

    fn set_state(
        &mut self,
        next: AgentState,
        description: Option<String>,
        now: Instant,
    ) -> Option<StateChange> {
        let changed = self.state != next;
        self.state = next;

        // Explicit idle (a finished command) has nothing left to decay
        self.deadline = if next.is_idle() {
            None
        } else {
            Some(now + self.quiet_period)
        };

        changed.then(|| StateChange::new(next, description))
    }
}

/// A tracker's transition tagged with the agent it belongs to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrackerUpdate {
    pub agent_id: AgentId,
    pub change: StateChange,
}

/// Owner side of a running tracker task
#[derive(Debug)]
pub struct TrackerHandle {
    task: JoinHandle<()>,
}

impl TrackerHandle {
    /// Stop the tracker: drops its event subscription and pending decay.
    /// Safe to call more than once.
    pub fn dispose(&self) {
        self.task.abort();
    }
}

impl Drop for TrackerHandle {
    fn drop(&mut self) {
        self.task.abort();
    }
}

/// Start a tracker task for `agent_id`.
///
/// The subscription is taken before returning so no event published after
/// this call is missed.
pub fn spawn_tracker(
    agent_id: AgentId,
    env: &Environment,
    tracker: ActivityTracker,
    updates: mpsc::UnboundedSender<TrackerUpdate>,
) -> TrackerHandle {
    let events = env.subscribe();
    let task = tokio::spawn(run(agent_id, tracker, events, updates));
    TrackerHandle { task }
}

async fn run(
    agent_id: AgentId,
    mut tracker: ActivityTracker,
    mut events: broadcast::Receiver<Observation>,
    updates: mpsc::UnboundedSender<TrackerUpdate>,
) {
    loop {
        let deadline = tracker.deadline();
        let decay = async move {
            match deadline {
                Some(at) => sleep_until(at).await,
                None => std::future::pending().await,
            }
        };

        let changes = tokio::select! {
            received = events.recv() => match received {
                Ok(Observation { event, focused }) => {
                    tracker.observe(&event, focused.as_ref(), Instant::now())
                }
                Err(RecvError::Lagged(skipped)) => {
                    warn!(agent_id, skipped, "Tracker lagged behind editor events");
                    Vec::new()
                }
                Err(RecvError::Closed) => return,
            },
            _ = decay => tracker.expire(Instant::now()).into_iter().collect(),
        };

        for change in changes {
            debug!(agent_id, state = %change.state, description = ?change.description, "Activity changed");
            if updates.send(TrackerUpdate { agent_id, change }).is_err() {
                return;
            }
        }
    }
}
