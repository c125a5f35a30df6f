use anyhow::Result;
use crossterm::event::{KeyCode, KeyEvent, KeyModifiers};
use ratatui::{
    layout::{Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, List, ListItem, ListState, Paragraph},
    Frame,
};
use serde_json::Value;

use crate::actions::Action;
use crate::protocol::{AgentActivity, UiMessage};
use crate::registry::AgentId;

/// Dashboard colors
pub struct Theme {
    pub bg: Color,
    pub fg: Color,
    pub accent: Color,
    pub dim: Color,
    pub success: Color,
    pub warning: Color,
    pub error: Color,
}

impl Default for Theme {
    fn default() -> Self {
        Self {
            bg: Color::Rgb(30, 30, 30),
            fg: Color::Rgb(220, 220, 220),
            accent: Color::Rgb(217, 119, 87),
            dim: Color::Rgb(100, 100, 100),
            success: Color::Rgb(80, 200, 120),
            warning: Color::Rgb(255, 193, 7),
            error: Color::Rgb(220, 53, 69),
        }
    }
}

/// Input mode for the application
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InputMode {
    Normal,
    Confirming,
}

/// What the dashboard knows about one agent, built from notifications
#[derive(Debug, Clone, PartialEq)]
pub struct AgentView {
    pub id: AgentId,
    pub status: AgentActivity,
    /// Activity text while active
    pub detail: Option<String>,
    /// Presentation hints (palette, seat) from the resync payload
    pub meta: Option<Value>,
}

impl AgentView {
    fn new(id: AgentId) -> Self {
        Self {
            id,
            status: AgentActivity::Waiting,
            detail: None,
            meta: None,
        }
    }
}

/// Main application state
pub struct App {
    /// Known agents, ordered by id
    pub agents: Vec<AgentView>,
    /// Currently selected agent index
    pub list_state: ListState,
    /// Current message to display (info or error)
    pub message: Option<String>,
    /// Workspace being watched
    pub workspace: String,
    /// Theme
    pub theme: Theme,
    /// Current input mode
    pub input_mode: InputMode,
    /// Pending action queue
    pub pending_actions: Vec<Action>,
}

impl App {
    pub fn new(workspace: impl Into<String>) -> Self {
        let mut list_state = ListState::default();
        list_state.select(Some(0));

        Self {
            agents: Vec::new(),
            list_state,
            message: None,
            workspace: workspace.into(),
            theme: Theme::default(),
            input_mode: InputMode::Normal,
            pending_actions: Vec::new(),
        }
    }

    /// Get the currently selected agent
    pub fn selected_agent(&self) -> Option<&AgentView> {
        self.list_state.selected().and_then(|i| self.agents.get(i))
    }

    pub fn agent(&self, id: AgentId) -> Option<&AgentView> {
        self.agents.iter().find(|a| a.id == id)
    }

    /// Take pending actions (drains the queue)
    pub fn take_pending_actions(&mut self) -> Vec<Action> {
        std::mem::take(&mut self.pending_actions)
    }

    /// Handle an action and return whether to quit
    pub fn handle_action(&mut self, action: Action) -> Result<bool> {
        match action {
            Action::KeyPress(key) => self.handle_key(key),
            Action::Notify(message) => {
                self.apply_message(message);
                Ok(false)
            }
            Action::Error(msg) => {
                self.message = Some(msg);
                Ok(false)
            }
            Action::Quit => Ok(true),
            _ => Ok(false),
        }
    }

    /// Update the agent views from one registry notification
    pub fn apply_message(&mut self, message: UiMessage) {
        match message {
            UiMessage::AgentCreated { id } => {
                let index = self.upsert(id);
                self.list_state.select(Some(index));
            }
            UiMessage::AgentStatus { id, status } => {
                if let Some(view) = self.agent_mut(id) {
                    view.status = status;
                }
            }
            UiMessage::AgentToolStart { id, status, .. } => {
                if let Some(view) = self.agent_mut(id) {
                    view.detail = Some(status);
                }
            }
            UiMessage::AgentToolsClear { id } => {
                if let Some(view) = self.agent_mut(id) {
                    view.detail = None;
                }
            }
            UiMessage::ExistingAgents { agents, agent_meta } => {
                self.agents.retain(|view| agents.contains(&view.id));
                for id in agents {
                    let index = self.upsert(id);
                    self.agents[index].meta = agent_meta.get(id.to_string()).cloned();
                }
                self.clamp_selection();
            }
            UiMessage::LayoutLoaded { .. } => {}
        }
    }

    /// Updates for agents the dashboard does not know (already removed) are dropped
    fn agent_mut(&mut self, id: AgentId) -> Option<&mut AgentView> {
        self.agents
            .binary_search_by_key(&id, |a| a.id)
            .ok()
            .map(|index| &mut self.agents[index])
    }

    /// Index of the view for `id`, inserting it in id order if missing
    fn upsert(&mut self, id: AgentId) -> usize {
        match self.agents.binary_search_by_key(&id, |a| a.id) {
            Ok(index) => index,
            Err(index) => {
                self.agents.insert(index, AgentView::new(id));
                index
            }
        }
    }

    fn forget(&mut self, id: AgentId) {
        self.agents.retain(|a| a.id != id);
        self.clamp_selection();
    }

    fn clamp_selection(&mut self) {
        if let Some(selected) = self.list_state.selected() {
            if selected >= self.agents.len() && !self.agents.is_empty() {
                self.list_state.select(Some(self.agents.len() - 1));
            }
        }
    }

    fn handle_key(&mut self, key: KeyEvent) -> Result<bool> {
        // Clear message on any key press
        if self.message.is_some() && self.input_mode == InputMode::Normal {
            self.message = None;
        }

        match self.input_mode {
            InputMode::Normal => self.handle_normal_key(key),
            InputMode::Confirming => self.handle_confirming_key(key),
        }
    }

    fn handle_normal_key(&mut self, key: KeyEvent) -> Result<bool> {
        match key.code {
            KeyCode::Char('q') => return Ok(true),
            KeyCode::Char('j') | KeyCode::Down => self.next_agent(),
            KeyCode::Char('k') | KeyCode::Up => self.previous_agent(),
            KeyCode::Char('n') => self.pending_actions.push(Action::LaunchAgent),
            KeyCode::Char('r') => self.pending_actions.push(Action::Resync),
            KeyCode::Char('d') => {
                if self.selected_agent().is_some() {
                    self.input_mode = InputMode::Confirming;
                }
            }
            KeyCode::Char('c') if key.modifiers.contains(KeyModifiers::CONTROL) => {
                return Ok(true);
            }
            _ => {}
        }
        Ok(false)
    }

    fn handle_confirming_key(&mut self, key: KeyEvent) -> Result<bool> {
        match key.code {
            KeyCode::Char('y') | KeyCode::Char('Y') => {
                if let Some(id) = self.selected_agent().map(|a| a.id) {
                    self.pending_actions.push(Action::RemoveAgent(id));
                    self.forget(id);
                }
                self.input_mode = InputMode::Normal;
            }
            KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
                self.input_mode = InputMode::Normal;
            }
            _ => {}
        }
        Ok(false)
    }

    fn next_agent(&mut self) {
        if self.agents.is_empty() {
            return;
        }
        let i = match self.list_state.selected() {
            Some(i) => {
                if i >= self.agents.len() - 1 {
                    0
                } else {
                    i + 1
                }
            }
            None => 0,
        };
        self.list_state.select(Some(i));
    }

    fn previous_agent(&mut self) {
        if self.agents.is_empty() {
            return;
        }
        let i = match self.list_state.selected() {
            Some(i) => {
                if i == 0 {
                    self.agents.len() - 1
                } else {
                    i - 1
                }
            }
            None => 0,
        };
        self.list_state.select(Some(i));
    }

    fn status_color(&self, status: AgentActivity) -> Color {
        match status {
            AgentActivity::Waiting => self.theme.success,
            AgentActivity::Active => self.theme.warning,
        }
    }

    pub fn render(&mut self, frame: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3), // Header
                Constraint::Min(0),    // Main content
                Constraint::Length(3), // Footer/status
            ])
            .split(frame.area());

        self.render_header(frame, chunks[0]);
        self.render_main(frame, chunks[1]);
        self.render_footer(frame, chunks[2]);

        if self.input_mode == InputMode::Confirming {
            self.render_confirm_dialog(frame);
        }
    }

    fn render_header(&self, frame: &mut Frame, area: Rect) {
        let title = Paragraph::new(Line::from(vec![
            Span::styled(
                " AgentPulse ",
                Style::default()
                    .fg(self.theme.accent)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::styled(
                format!("│ {}", self.workspace),
                Style::default().fg(self.theme.dim),
            ),
        ]))
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(self.theme.dim)),
        );
        frame.render_widget(title, area);
    }

    fn render_main(&mut self, frame: &mut Frame, area: Rect) {
        let chunks = Layout::default()
            .direction(Direction::Horizontal)
            .constraints([
                Constraint::Percentage(40), // Agent list
                Constraint::Percentage(60), // Detail pane
            ])
            .split(area);

        self.render_agent_list(frame, chunks[0]);
        self.render_detail_pane(frame, chunks[1]);
    }

    fn render_agent_list(&mut self, frame: &mut Frame, area: Rect) {
        let items: Vec<ListItem> = if self.agents.is_empty() {
            vec![ListItem::new(Line::from(Span::styled(
                "  No agents yet. Press 'n' to launch one.",
                Style::default().fg(self.theme.dim),
            )))]
        } else {
            self.agents
                .iter()
                .map(|agent| {
                    let mut spans = vec![
                        Span::styled("● ", Style::default().fg(self.status_color(agent.status))),
                        Span::styled(
                            format!("Agent {}", agent.id),
                            Style::default().fg(self.theme.fg),
                        ),
                    ];
                    if let Some(detail) = &agent.detail {
                        spans.push(Span::styled(
                            format!("  {}", detail),
                            Style::default().fg(self.theme.dim),
                        ));
                    }
                    ListItem::new(Line::from(spans))
                })
                .collect()
        };

        let list = List::new(items)
            .block(
                Block::default()
                    .title(" Agents ")
                    .borders(Borders::ALL)
                    .border_style(Style::default().fg(self.theme.dim)),
            )
            .highlight_style(
                Style::default()
                    .bg(Color::Rgb(50, 50, 50))
                    .add_modifier(Modifier::BOLD),
            )
            .highlight_symbol("▶ ");

        frame.render_stateful_widget(list, area, &mut self.list_state);
    }

    fn render_detail_pane(&self, frame: &mut Frame, area: Rect) {
        let content = if let Some(agent) = self.selected_agent() {
            let status = match agent.status {
                AgentActivity::Waiting => "Waiting",
                AgentActivity::Active => "Active",
            };
            let mut lines = vec![
                Line::from(vec![
                    Span::styled("ID: ", Style::default().fg(self.theme.dim)),
                    Span::styled(agent.id.to_string(), Style::default().fg(self.theme.fg)),
                ]),
                Line::from(vec![
                    Span::styled("Status: ", Style::default().fg(self.theme.dim)),
                    Span::styled(status, Style::default().fg(self.status_color(agent.status))),
                ]),
                Line::from(vec![
                    Span::styled("Activity: ", Style::default().fg(self.theme.dim)),
                    Span::styled(
                        agent.detail.clone().unwrap_or_else(|| "-".to_string()),
                        Style::default().fg(self.theme.fg),
                    ),
                ]),
            ];

            if let Some(meta) = &agent.meta {
                if let Some(palette) = meta.get("palette") {
                    lines.push(Line::from(vec![
                        Span::styled("Palette: ", Style::default().fg(self.theme.dim)),
                        Span::styled(palette.to_string(), Style::default().fg(self.theme.fg)),
                    ]));
                }
                if let Some(seat) = meta.get("seatId").and_then(Value::as_str) {
                    lines.push(Line::from(vec![
                        Span::styled("Seat: ", Style::default().fg(self.theme.dim)),
                        Span::styled(seat.to_string(), Style::default().fg(self.theme.fg)),
                    ]));
                }
            }

            lines.push(Line::from(""));
            lines.push(Line::from(Span::styled(
                "Press 'd' to remove",
                Style::default().fg(self.theme.dim),
            )));
            lines
        } else {
            vec![
                Line::from(Span::styled(
                    "No agent selected",
                    Style::default().fg(self.theme.dim),
                )),
                Line::from(""),
                Line::from(Span::styled(
                    "Press 'n' to launch a new agent",
                    Style::default().fg(self.theme.dim),
                )),
            ]
        };

        let detail = Paragraph::new(content).block(
            Block::default()
                .title(" Details ")
                .borders(Borders::ALL)
                .border_style(Style::default().fg(self.theme.dim)),
        );
        frame.render_widget(detail, area);
    }

    fn render_footer(&self, frame: &mut Frame, area: Rect) {
        let help_text = " q: Quit │ j/k: Navigate │ n: Launch │ d: Remove │ r: Resync ";

        let content = if let Some(ref msg) = self.message {
            let style = if msg.starts_with("Failed") || msg.contains("error") {
                Style::default().fg(self.theme.error)
            } else {
                Style::default().fg(self.theme.success)
            };
            Line::from(Span::styled(format!(" {} ", msg), style))
        } else {
            Line::from(Span::styled(help_text, Style::default().fg(self.theme.dim)))
        };

        let footer = Paragraph::new(content).block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(Style::default().fg(self.theme.dim)),
        );
        frame.render_widget(footer, area);
    }

    fn render_confirm_dialog(&self, frame: &mut Frame) {
        let area = centered_rect(50, 20, frame.area());

        frame.render_widget(Clear, area);

        let block = Block::default()
            .title(" Confirm Remove ")
            .borders(Borders::ALL)
            .border_style(Style::default().fg(self.theme.error));

        let inner = block.inner(area);
        frame.render_widget(block, area);

        let agent_label = self
            .selected_agent()
            .map(|a| format!("Agent {}", a.id))
            .unwrap_or_else(|| "unknown".to_string());

        let text = vec![
            Line::from(""),
            Line::from(Span::styled(
                format!("Stop tracking {}?", agent_label),
                Style::default().fg(self.theme.fg),
            )),
            Line::from(""),
            Line::from(Span::styled(
                "Press 'y' to confirm, 'n' or Esc to cancel",
                Style::default().fg(self.theme.dim),
            )),
        ];

        let paragraph = Paragraph::new(text);
        frame.render_widget(paragraph, inner);
    }
}

/// Helper function to create a centered rectangle
fn centered_rect(percent_x: u16, percent_y: u16, r: Rect) -> Rect {
    let popup_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage((100 - percent_y) / 2),
            Constraint::Percentage(percent_y),
            Constraint::Percentage((100 - percent_y) / 2),
        ])
        .split(r);

    Layout::default()
        .direction(Direction::Horizontal)
        .constraints([
            Constraint::Percentage((100 - percent_x) / 2),
            Constraint::Percentage(percent_x),
            Constraint::Percentage((100 - percent_x) / 2),
        ])
        .split(popup_layout[1])[1]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ACTIVITY_TOOL_ID;
    use serde_json::json;

    fn key(c: char) -> Action {
        Action::KeyPress(KeyEvent::new(KeyCode::Char(c), KeyModifiers::NONE))
    }

    #[test]
    fn test_notifications_update_views() {
        let mut app = App::new("/ws");
        app.apply_message(UiMessage::AgentCreated { id: 3 });
        app.apply_message(UiMessage::AgentCreated { id: 1 });
        app.apply_message(UiMessage::AgentStatus {
            id: 3,
            status: AgentActivity::Active,
        });
        app.apply_message(UiMessage::AgentToolStart {
            id: 3,
            tool_id: ACTIVITY_TOOL_ID.to_string(),
            status: "Writing src/lib.rs".to_string(),
        });

        let ids: Vec<_> = app.agents.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![1, 3]);
        let agent = app.agent(3).unwrap();
        assert_eq!(agent.status, AgentActivity::Active);
        assert_eq!(agent.detail.as_deref(), Some("Writing src/lib.rs"));

        app.apply_message(UiMessage::AgentToolsClear { id: 3 });
        assert_eq!(app.agent(3).unwrap().detail, None);
    }

    #[test]
    fn test_existing_agents_replaces_list() {
        let mut app = App::new("/ws");
        app.apply_message(UiMessage::AgentCreated { id: 0 });
        app.apply_message(UiMessage::AgentCreated { id: 9 });

        app.apply_message(UiMessage::ExistingAgents {
            agents: vec![2, 9],
            agent_meta: json!({"2": {"palette": 4, "seatId": "s1"}}),
        });

        let ids: Vec<_> = app.agents.iter().map(|a| a.id).collect();
        assert_eq!(ids, vec![2, 9]);
        assert_eq!(app.agent(2).unwrap().meta, Some(json!({"palette": 4, "seatId": "s1"})));
        assert_eq!(app.agent(9).unwrap().meta, None);
        assert!(app.selected_agent().is_some());
    }

    #[test]
    fn test_keys_queue_registry_actions() {
        let mut app = App::new("/ws");
        app.handle_action(key('n')).unwrap();
        app.handle_action(key('r')).unwrap();
        let pending = app.take_pending_actions();
        assert!(matches!(pending[..], [Action::LaunchAgent, Action::Resync]));

        assert!(app.handle_action(key('q')).unwrap());
    }

    #[test]
    fn test_remove_requires_confirmation() {
        let mut app = App::new("/ws");
        app.apply_message(UiMessage::AgentCreated { id: 4 });

        app.handle_action(key('d')).unwrap();
        assert_eq!(app.input_mode, InputMode::Confirming);
        app.handle_action(key('n')).unwrap();
        assert_eq!(app.input_mode, InputMode::Normal);
        assert!(app.take_pending_actions().is_empty());

        app.handle_action(key('d')).unwrap();
        app.handle_action(key('y')).unwrap();
        let pending = app.take_pending_actions();
        assert!(matches!(pending[..], [Action::RemoveAgent(4)]));
        assert!(app.agents.is_empty());
    }

    #[test]
    fn test_late_updates_for_removed_agent_ignored() {
        let mut app = App::new("/ws");
        app.apply_message(UiMessage::AgentCreated { id: 2 });
        app.handle_action(key('d')).unwrap();
        app.handle_action(key('y')).unwrap();

        app.apply_message(UiMessage::AgentStatus {
            id: 2,
            status: AgentActivity::Active,
        });
        app.apply_message(UiMessage::AgentToolStart {
            id: 2,
            tool_id: ACTIVITY_TOOL_ID.to_string(),
            status: "Reading README.md".to_string(),
        });
        app.apply_message(UiMessage::AgentToolsClear { id: 2 });

        assert!(app.agents.is_empty());
    }
}
