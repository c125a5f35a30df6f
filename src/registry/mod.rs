mod store;

pub use store::{
    read_or_default, JsonFileStore, MemoryStore, PersistedAgent, StoreError, WorkspaceStore,
    AGENTS_KEY, AGENT_SEATS_KEY, LAYOUT_KEY,
};

use serde::Deserialize;
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::activity::{spawn_tracker, ActivityTracker, AgentState, Heuristics, StateChange, TrackerHandle, TrackerUpdate};
use crate::host::Environment;
use crate::protocol::{AgentActivity, UiMessage, UiSink};

/// Agent identifier, unique for the lifetime of the process
pub type AgentId = u32;

/// A tracked agent and the tracker it owns
#[derive(Debug)]
pub struct Agent {
    pub id: AgentId,
    pub state: AgentState,
    pub description: Option<String>,
    tracker: TrackerHandle,
}

impl Agent {
    fn snapshot(&self) -> StateChange {
        StateChange::new(self.state, self.description.clone())
    }
}

/// Owns every live agent and bridges their trackers to the UI
pub struct Registry {
    agents: BTreeMap<AgentId, Agent>,
    next_id: AgentId,
    active_agent: Option<AgentId>,
    env: Environment,
    heuristics: Arc<Heuristics>,
    quiet_period: Duration,
    store: Box<dyn WorkspaceStore>,
    ui: Option<Box<dyn UiSink>>,
    updates: mpsc::UnboundedSender<TrackerUpdate>,
}

impl Registry {
    /// Create an empty registry. Tracker reports arrive on the returned
    /// receiver and must be fed back through [`Registry::apply_update`].
    pub fn new(
        env: Environment,
        heuristics: Arc<Heuristics>,
        quiet_period: Duration,
        store: Box<dyn WorkspaceStore>,
    ) -> (Self, mpsc::UnboundedReceiver<TrackerUpdate>) {
        let (updates, rx) = mpsc::unbounded_channel();
        let registry = Self {
            agents: BTreeMap::new(),
            next_id: 0,
            active_agent: None,
            env,
            heuristics,
            quiet_period,
            store,
            ui: None,
            updates,
        };
        (registry, rx)
    }

    pub fn attach_ui(&mut self, ui: Box<dyn UiSink>) {
        self.ui = Some(ui);
    }

    pub fn detach_ui(&mut self) {
        self.ui = None;
    }

    pub fn agent(&self, id: AgentId) -> Option<&Agent> {
        self.agents.get(&id)
    }

    /// Live ids in ascending order
    pub fn agent_ids(&self) -> Vec<AgentId> {
        self.agents.keys().copied().collect()
    }

    pub fn active_agent(&self) -> Option<AgentId> {
        self.active_agent
    }

    pub fn next_id(&self) -> AgentId {
        self.next_id
    }

    /// Create a new agent with a fresh tracker. `None` once the id space is
    /// used up.
    pub fn launch(&mut self) -> Option<AgentId> {
        let id = self.next_id;
        let Some(next) = id.checked_add(1) else {
            warn!(next_id = id, "Agent ids exhausted");
            return None;
        };
        self.next_id = next;

        let agent = self.spawn_agent(id);
        self.agents.insert(id, agent);
        self.active_agent = Some(id);
        self.persist();
        info!(agent_id = id, "Agent created");

        self.post(UiMessage::AgentCreated { id });
        self.post(UiMessage::AgentStatus {
            id,
            status: AgentActivity::Waiting,
        });
        Some(id)
    }

    /// Remove an agent, returning whether it existed
    pub fn remove(&mut self, id: AgentId) -> bool {
        let Some(agent) = self.agents.remove(&id) else {
            return false;
        };
        agent.tracker.dispose();

        if self.active_agent == Some(id) {
            self.active_agent = None;
        }
        self.persist();
        info!(agent_id = id, "Agent removed");
        true
    }

    /// Overwrite the persisted agent list with the current collection
    pub fn persist(&mut self) {
        let persisted: Vec<PersistedAgent> = self
            .agents
            .keys()
            .map(|&id| PersistedAgent { id })
            .collect();

        let result = serde_json::to_value(&persisted)
            .map_err(StoreError::from)
            .and_then(|value| self.store.update(AGENTS_KEY, value));
        if let Err(e) = result {
            warn!(error = %e, "Failed to persist agents");
        }
    }

    /// Recreate the agents saved by a previous session. Records that do not
    /// decode are logged and skipped; the rest are kept.
    pub fn restore(&mut self) {
        let records: Vec<Value> = read_or_default(&*self.store, AGENTS_KEY);
        if records.is_empty() {
            return;
        }

        for record in records {
            let id = match PersistedAgent::deserialize(&record) {
                Ok(PersistedAgent { id }) => id,
                Err(e) => {
                    warn!(%record, error = %e, "Skipping malformed persisted agent");
                    continue;
                }
            };
            if self.agents.contains_key(&id) {
                warn!(agent_id = id, "Skipping duplicate persisted agent");
                continue;
            }
            // The counter must stay above every live id
            let Some(next) = id.checked_add(1) else {
                warn!(agent_id = id, "Skipping persisted agent outside the id range");
                continue;
            };

            let agent = self.spawn_agent(id);
            self.agents.insert(id, agent);
            info!(agent_id = id, "Restored agent");
            self.next_id = self.next_id.max(next);
        }

        self.persist();
    }

    /// Apply a tracker report to the agent it belongs to
    pub fn apply_update(&mut self, update: TrackerUpdate) {
        let TrackerUpdate { agent_id, change } = update;
        let Some(agent) = self.agents.get_mut(&agent_id) else {
            debug!(agent_id, "Dropping report for removed agent");
            return;
        };
        agent.state = change.state;
        agent.description = change.description.clone();

        for message in UiMessage::for_state(agent_id, &change) {
            self.post(message);
        }
    }

    /// Full resync for a freshly attached UI
    pub fn send_existing_agents(&mut self) {
        if self.ui.is_none() {
            return;
        }
        let agent_meta = self
            .store
            .get(AGENT_SEATS_KEY)
            .unwrap_or_else(|| Value::Object(Map::new()));

        self.post(UiMessage::ExistingAgents {
            agents: self.agent_ids(),
            agent_meta,
        });
        self.send_current_statuses();
    }

    /// Re-emit each agent's stored state
    pub fn send_current_statuses(&mut self) {
        if self.ui.is_none() {
            return;
        }
        let messages: Vec<UiMessage> = self
            .agents
            .values()
            .flat_map(|agent| UiMessage::for_state(agent.id, &agent.snapshot()))
            .collect();
        for message in messages {
            self.post(message);
        }
    }

    /// Pass the saved layout (or a default) through to the UI
    pub fn send_layout(&mut self, default_layout: Option<Value>) {
        if self.ui.is_none() {
            return;
        }
        let layout = self
            .store
            .get(LAYOUT_KEY)
            .or(default_layout)
            .unwrap_or(Value::Null);
        self.post(UiMessage::LayoutLoaded { layout });
    }

    /// Dispose every tracker without touching the persisted list
    pub fn shutdown(&mut self) {
        for agent in self.agents.values() {
            agent.tracker.dispose();
        }
        self.agents.clear();
        self.active_agent = None;
    }

    fn spawn_agent(&self, id: AgentId) -> Agent {
        let tracker = ActivityTracker::new(self.heuristics.clone(), self.quiet_period);
        Agent {
            id,
            state: AgentState::Idle,
            description: None,
            tracker: spawn_tracker(id, &self.env, tracker, self.updates.clone()),
        }
    }

    fn post(&mut self, message: UiMessage) {
        if let Some(ui) = self.ui.as_mut() {
            ui.post(message);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::host::{ContentChange, Document, HostEvent};
    use crate::protocol::ACTIVITY_TOOL_ID;
    use pretty_assertions::assert_eq;
    use serde_json::json;
    use tokio::time::advance;

    struct Harness {
        registry: Registry,
        updates: mpsc::UnboundedReceiver<TrackerUpdate>,
        ui: mpsc::UnboundedReceiver<UiMessage>,
        env: Environment,
    }

    fn harness(store: MemoryStore) -> Harness {
        let env = Environment::new();
        let heuristics = Heuristics::from_config(&Config::default(), "/ws").unwrap();
        let (mut registry, updates) = Registry::new(
            env.clone(),
            Arc::new(heuristics),
            Duration::from_millis(3000),
            Box::new(store),
        );
        let (ui_tx, ui) = mpsc::unbounded_channel();
        registry.attach_ui(Box::new(ui_tx));
        Harness {
            registry,
            updates,
            ui,
            env,
        }
    }

    fn drain(rx: &mut mpsc::UnboundedReceiver<UiMessage>) -> Vec<UiMessage> {
        let mut out = Vec::new();
        while let Ok(msg) = rx.try_recv() {
            out.push(msg);
        }
        out
    }

    async fn settle() {
        for _ in 0..5 {
            tokio::task::yield_now().await;
        }
    }

    fn persisted(store: &MemoryStore) -> Vec<AgentId> {
        read_or_default::<Vec<PersistedAgent>>(store, AGENTS_KEY)
            .into_iter()
            .map(|p| p.id)
            .collect()
    }

    fn waiting(id: AgentId) -> UiMessage {
        UiMessage::AgentStatus {
            id,
            status: AgentActivity::Waiting,
        }
    }

    #[tokio::test]
    async fn test_launch_assigns_sequential_ids() {
        let store = MemoryStore::new();
        let mut h = harness(store.clone());

        assert_eq!(h.registry.launch(), Some(0));
        assert_eq!(h.registry.launch(), Some(1));
        assert_eq!(h.registry.launch(), Some(2));

        assert_eq!(
            drain(&mut h.ui),
            vec![
                UiMessage::AgentCreated { id: 0 },
                waiting(0),
                UiMessage::AgentCreated { id: 1 },
                waiting(1),
                UiMessage::AgentCreated { id: 2 },
                waiting(2),
            ]
        );
        assert_eq!(persisted(&store), vec![0, 1, 2]);
        assert_eq!(store.writes(), 3);
        assert_eq!(h.registry.active_agent(), Some(2));
        assert_eq!(h.registry.agent(1).map(|a| a.state), Some(AgentState::Idle));
    }

    #[tokio::test(start_paused = true)]
    async fn test_background_edit_then_decay() {
        let mut h = harness(MemoryStore::new());
        let id = h.registry.launch().unwrap();
        assert_eq!(drain(&mut h.ui), vec![UiMessage::AgentCreated { id: 0 }, waiting(0)]);

        h.env.publish(HostEvent::DocumentChanged {
            document: Document::file("/ws/src/parser.rs"),
            changes: vec![ContentChange::inserted("p".repeat(80))],
        });
        let update = h.updates.recv().await.unwrap();
        h.registry.apply_update(update);

        let messages = drain(&mut h.ui);
        assert_eq!(messages.len(), 2);
        assert_eq!(
            messages[0],
            UiMessage::AgentStatus {
                id,
                status: AgentActivity::Active
            }
        );
        match &messages[1] {
            UiMessage::AgentToolStart { id: got, tool_id, status } => {
                assert_eq!(*got, id);
                assert_eq!(tool_id, ACTIVITY_TOOL_ID);
                assert!(status.contains("parser.rs"), "{status}");
            }
            other => panic!("unexpected message {other:?}"),
        }

        advance(Duration::from_millis(3001)).await;
        let update = h.updates.recv().await.unwrap();
        h.registry.apply_update(update);

        assert_eq!(
            drain(&mut h.ui),
            vec![waiting(id), UiMessage::AgentToolsClear { id }]
        );
        let agent = h.registry.agent(id).unwrap();
        assert_eq!(agent.state, AgentState::Idle);
        assert_eq!(agent.description, None);
    }

    #[tokio::test]
    async fn test_remove_unknown_is_noop() {
        let store = MemoryStore::new();
        let mut h = harness(store.clone());

        assert!(!h.registry.remove(42));
        assert!(drain(&mut h.ui).is_empty());
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn test_remove_disposes_tracker_and_persists() {
        let store = MemoryStore::new();
        let mut h = harness(store.clone());
        h.registry.launch();
        h.registry.launch();
        settle().await;
        assert_eq!(h.env.subscriber_count(), 2);

        assert!(h.registry.remove(1));
        settle().await;
        assert_eq!(h.env.subscriber_count(), 1);
        assert_eq!(h.registry.agent_ids(), vec![0]);
        assert_eq!(h.registry.active_agent(), None);
        assert_eq!(persisted(&store), vec![0]);

        // Ids are never reused
        assert_eq!(h.registry.launch(), Some(2));
    }

    #[tokio::test]
    async fn test_report_for_removed_agent_is_dropped() {
        let mut h = harness(MemoryStore::new());
        let id = h.registry.launch().unwrap();
        drain(&mut h.ui);

        h.env.publish(HostEvent::ShellExecutionStarted {
            command_line: Some("cargo build".into()),
        });
        let update = h.updates.recv().await.unwrap();
        h.registry.remove(id);
        h.registry.apply_update(update);

        assert!(drain(&mut h.ui).is_empty());
    }

    #[tokio::test]
    async fn test_restore_advances_next_id() {
        let mut store = MemoryStore::new();
        store
            .update(AGENTS_KEY, json!([{"id": 2}, {"id": 5}, {"id": 2}]))
            .unwrap();
        let mut h = harness(store.clone());

        h.registry.restore();
        assert_eq!(h.registry.agent_ids(), vec![2, 5]);
        assert!(h
            .registry
            .agent_ids()
            .iter()
            .all(|id| h.registry.agent(*id).unwrap().state == AgentState::Idle));
        assert_eq!(h.registry.next_id(), 6);
        assert_eq!(persisted(&store), vec![2, 5]);
        assert!(drain(&mut h.ui).is_empty());

        assert_eq!(h.registry.launch(), Some(6));
    }

    #[tokio::test]
    async fn test_restore_keeps_valid_records() {
        let mut store = MemoryStore::new();
        store
            .update(AGENTS_KEY, json!([{"id": 1}, {"id": 7}, {"id": -1}, "junk"]))
            .unwrap();
        let mut h = harness(store.clone());

        h.registry.restore();
        assert_eq!(h.registry.agent_ids(), vec![1, 7]);
        assert_eq!(h.registry.launch(), Some(8));
        assert_eq!(persisted(&store), vec![1, 7, 8]);
    }

    #[tokio::test]
    async fn test_restore_skips_id_at_range_end() {
        let mut store = MemoryStore::new();
        store
            .update(AGENTS_KEY, json!([{"id": 3}, {"id": u32::MAX}]))
            .unwrap();
        let mut h = harness(store.clone());

        h.registry.restore();
        assert_eq!(h.registry.agent_ids(), vec![3]);
        assert_eq!(h.registry.next_id(), 4);
        assert_eq!(h.registry.launch(), Some(4));
    }

    #[tokio::test]
    async fn test_launch_stops_at_range_end() {
        let mut store = MemoryStore::new();
        store
            .update(AGENTS_KEY, json!([{"id": u32::MAX - 1}]))
            .unwrap();
        let mut h = harness(store.clone());

        h.registry.restore();
        assert_eq!(h.registry.next_id(), u32::MAX);
        drain(&mut h.ui);

        assert_eq!(h.registry.launch(), None);
        assert_eq!(h.registry.agent_ids(), vec![u32::MAX - 1]);
        assert!(drain(&mut h.ui).is_empty());
    }

    #[tokio::test]
    async fn test_restore_empty_is_noop() {
        let store = MemoryStore::new();
        let mut h = harness(store.clone());
        h.registry.restore();
        assert_eq!(store.writes(), 0);
        assert_eq!(h.registry.next_id(), 0);
    }

    #[tokio::test]
    async fn test_new_session_restores_launched_agents() {
        let store = MemoryStore::new();
        {
            let mut first = harness(store.clone());
            first.registry.launch();
            first.registry.launch();
            first.registry.launch();
            first.registry.remove(1);
        }

        let mut second = harness(store.clone());
        second.registry.restore();
        assert_eq!(second.registry.agent_ids(), vec![0, 2]);
        assert_eq!(second.registry.launch(), Some(3));
    }

    #[tokio::test]
    async fn test_send_existing_agents_with_meta() {
        let mut store = MemoryStore::new();
        store
            .update(AGENT_SEATS_KEY, json!({"1": {"palette": 3, "seatId": "desk-2"}}))
            .unwrap();
        let mut h = harness(store);
        h.registry.launch();
        h.registry.launch();
        drain(&mut h.ui);

        h.registry.send_existing_agents();
        assert_eq!(
            drain(&mut h.ui),
            vec![
                UiMessage::ExistingAgents {
                    agents: vec![0, 1],
                    agent_meta: json!({"1": {"palette": 3, "seatId": "desk-2"}}),
                },
                waiting(0),
                UiMessage::AgentToolsClear { id: 0 },
                waiting(1),
                UiMessage::AgentToolsClear { id: 1 },
            ]
        );
    }

    #[tokio::test]
    async fn test_detached_ui_is_skipped_then_resynced() {
        let mut h = harness(MemoryStore::new());
        h.registry.detach_ui();
        let id = h.registry.launch().unwrap();

        h.env.publish(HostEvent::ShellExecutionStarted {
            command_line: Some("pytest -q".into()),
        });
        let update = h.updates.recv().await.unwrap();
        h.registry.apply_update(update);
        h.registry.send_existing_agents();
        assert!(drain(&mut h.ui).is_empty());
        assert_eq!(h.registry.agent(id).unwrap().state, AgentState::RunningCommand);

        let (ui_tx, mut ui) = mpsc::unbounded_channel();
        h.registry.attach_ui(Box::new(ui_tx));
        h.registry.send_current_statuses();
        assert_eq!(
            drain(&mut ui),
            vec![
                UiMessage::AgentStatus {
                    id,
                    status: AgentActivity::Active
                },
                UiMessage::AgentToolStart {
                    id,
                    tool_id: ACTIVITY_TOOL_ID.to_string(),
                    status: "Running: pytest -q".to_string(),
                },
            ]
        );
    }

    #[tokio::test]
    async fn test_send_layout_prefers_saved() {
        let mut store = MemoryStore::new();
        let mut h = harness(store.clone());

        h.registry.send_layout(Some(json!({"default": true})));
        store.update(LAYOUT_KEY, json!({"saved": true})).unwrap();
        h.registry.send_layout(Some(json!({"default": true})));

        assert_eq!(
            drain(&mut h.ui),
            vec![
                UiMessage::LayoutLoaded {
                    layout: json!({"default": true})
                },
                UiMessage::LayoutLoaded {
                    layout: json!({"saved": true})
                },
            ]
        );
    }
}
