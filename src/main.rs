use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use crossterm::event::{self, Event, KeyEventKind};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tracing::{info, warn};

mod actions;
mod activity;
mod app;
mod config;
mod host;
mod protocol;
mod registry;
mod session;

use actions::Action;
use activity::TrackerUpdate;
use app::App;
use config::Config;
use host::{parse_line, WorkspaceWatcher};
use protocol::{JsonLinesSink, UiMessage};
use registry::JsonFileStore;
use session::Session;

#[derive(Parser, Debug)]
#[command(name = "agent-pulse")]
#[command(about = "Infers what coding agents are doing from editor activity")]
struct Cli {
    /// Workspace root to watch
    #[arg(short, long, default_value = ".")]
    workspace: PathBuf,

    /// Config file (defaults to the user config directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Workspace state file, overriding config and the per-workspace default
    #[arg(long)]
    state_file: Option<PathBuf>,

    /// Layout JSON sent when the workspace has none saved
    #[arg(long)]
    default_layout: Option<PathBuf>,

    /// JSON-lines editor feed (file or FIFO) read by the dashboard
    #[arg(long)]
    feed: Option<PathBuf>,

    #[command(subcommand)]
    mode: Option<Mode>,
}

#[derive(Subcommand, Debug)]
enum Mode {
    /// Headless: editor feed on stdin, UI notifications on stdout
    Bridge,
}

enum Step {
    Action(Action),
    Update(TrackerUpdate),
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging; stdout belongs to the UI
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let cli = Cli::parse();
    let config = Config::load(cli.config.as_deref()).context("Failed to load config")?;
    let workspace = cli
        .workspace
        .canonicalize()
        .with_context(|| format!("Workspace {} not found", cli.workspace.display()))?;

    let state_path = cli
        .state_file
        .clone()
        .or_else(|| config.state_file.clone())
        .unwrap_or_else(|| JsonFileStore::default_path(&workspace));
    let store = JsonFileStore::open(&state_path).context("Failed to open workspace state")?;
    info!(workspace = %workspace.display(), state = %state_path.display(), "Starting session");

    let default_layout = load_default_layout(cli.default_layout.as_deref())?;
    let session = Session::new(&config, &workspace, Box::new(store))?
        .with_default_layout(default_layout);

    let mut roots = vec![workspace.clone()];
    roots.extend(config.watch_roots.iter().cloned());
    let _watcher = match WorkspaceWatcher::start(roots, session.heuristics(), session.env().clone()) {
        Ok(watcher) => Some(watcher),
        Err(e) => {
            warn!(error = %e, "File watching disabled");
            None
        }
    };

    match cli.mode {
        Some(Mode::Bridge) => run_bridge(session).await,
        None => run_dashboard(session, &workspace, cli.feed).await,
    }
}

fn load_default_layout(path: Option<&Path>) -> Result<Option<Value>> {
    let Some(path) = path else {
        return Ok(None);
    };
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read layout {}", path.display()))?;
    let layout = serde_json::from_str(&raw)
        .with_context(|| format!("Invalid layout {}", path.display()))?;
    Ok(Some(layout))
}

async fn run_bridge(mut session: Session) -> Result<()> {
    session
        .registry
        .attach_ui(Box::new(JsonLinesSink::new(std::io::stdout())));
    session.registry.restore();

    let result = session.run(BufReader::new(tokio::io::stdin())).await;
    session.shutdown();
    result
}

async fn run_dashboard(mut session: Session, workspace: &Path, feed: Option<PathBuf>) -> Result<()> {
    // Create event channel
    let (tx, mut rx) = mpsc::unbounded_channel::<Action>();
    let (ui_tx, mut ui_rx) = mpsc::unbounded_channel::<UiMessage>();

    session.registry.attach_ui(Box::new(ui_tx));
    session.registry.restore();
    session.registry.send_existing_agents();

    // Initialize terminal
    let mut terminal = ratatui::init();

    // Spawn input handler
    let input_tx = tx.clone();
    tokio::spawn(async move {
        loop {
            if event::poll(Duration::from_millis(100)).unwrap_or(false) {
                if let Ok(Event::Key(key)) = event::read() {
                    if key.kind == KeyEventKind::Press {
                        let _ = input_tx.send(Action::KeyPress(key));
                    }
                }
            }
        }
    });

    // Spawn editor feed reader
    if let Some(path) = feed {
        let feed_tx = tx.clone();
        tokio::spawn(async move {
            let file = match tokio::fs::File::open(&path).await {
                Ok(file) => file,
                Err(e) => {
                    let _ = feed_tx.send(Action::Error(format!("Feed error: {}", e)));
                    return;
                }
            };
            let mut lines = BufReader::new(file).lines();
            loop {
                match lines.next_line().await {
                    Ok(Some(line)) => {
                        if let Some(inbound) = parse_line(&line) {
                            let _ = feed_tx.send(Action::Feed(inbound));
                        }
                    }
                    Ok(None) => break,
                    Err(e) => {
                        let _ = feed_tx.send(Action::Error(format!("Feed error: {}", e)));
                        break;
                    }
                }
            }
        });
    }

    // Create app state
    let mut app = App::new(workspace.display().to_string());

    // Main event loop
    let result = loop {
        // Render
        terminal.draw(|f| app.render(f))?;

        // Process any pending actions from the app
        for pending_action in app.take_pending_actions() {
            match pending_action {
                Action::LaunchAgent => {
                    app.message = Some(match session.registry.launch() {
                        Some(id) => format!("Agent {} launched", id),
                        None => "Failed to launch: no agent ids left".to_string(),
                    });
                }
                Action::RemoveAgent(id) => {
                    if session.registry.remove(id) {
                        app.message = Some(format!("Agent {} removed", id));
                    }
                }
                Action::Resync => session.registry.send_existing_agents(),
                _ => {}
            }
        }

        // Handle events from channels
        let step = tokio::select! {
            Some(action) = rx.recv() => Step::Action(action),
            Some(message) = ui_rx.recv() => Step::Action(Action::Notify(message)),
            Some(update) = session.next_update() => Step::Update(update),
        };

        match step {
            Step::Update(update) => session.registry.apply_update(update),
            Step::Action(Action::Feed(inbound)) => {
                if session.handle(inbound).is_break() {
                    break Ok(());
                }
            }
            Step::Action(action) => match app.handle_action(action) {
                Ok(true) => break Ok(()),
                Ok(false) => {}
                Err(e) => break Err(e),
            },
        }
    };

    // Restore terminal
    ratatui::restore();
    session.shutdown();
    result
}
