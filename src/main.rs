use anyhow::{Context, Result};
use clap::Parser;
use crossterm::{
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Constraint, Direction, Layout},
    Terminal,
};
use std::io;
use std::sync::Arc;

use trench::app::{App, AppMode};
use trench::browser::Browser;
use trench::config::{Cli, Command, Config};
use trench::events::handle_events;
use trench::store::{ObjectStore, S3Store};
use trench::ui::{render_delete_confirm, render_help_bar, render_progress_bar, render_status_bar};
use trench::{logging, report};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_cli(Cli::parse())?;

    let credentials = config
        .credentials
        .as_ref()
        .map(|(access, secret)| (access.as_str(), secret.as_str()));
    let store: Arc<dyn ObjectStore> = Arc::new(
        S3Store::new(
            &config.bucket,
            &config.region,
            config.provider.clone(),
            credentials,
            config.page_size,
        )
        .with_context(|| format!("connecting to bucket {}", config.bucket))?,
    );

    match config.command.clone() {
        Command::Report { top, json } => {
            logging::init_stderr()?;
            report::run(store, &config, top, json).await
        }
        Command::Browse => {
            let log_path = logging::init_file(config.log_file.as_deref())?;
            tracing::info!(bucket = %config.bucket, provider = config.provider.display_name(), log = %log_path.display(), "starting browser");
            browse(store, &config).await
        }
    }
}

async fn browse(store: Arc<dyn ObjectStore>, config: &Config) -> Result<()> {
    let location = store.display_name();
    let mut browser = Browser::new(store, &config.prefix, config.scan.clone(), config.delete.clone());
    browser.start_scan();
    let mut app = App::new(browser, location);

    // Setup terminal
    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    // Main loop
    let res = run_app(&mut terminal, &mut app).await;

    // Restore terminal
    disable_raw_mode()?;
    execute!(terminal.backend_mut(), LeaveAlternateScreen)?;
    terminal.show_cursor()?;

    if let Some(scan) = app.browser.take_scan() {
        scan.cancel();
        let summary = scan.wait().await;
        tracing::info!(state = summary.state.label(), objects = summary.objects, "browser closed");
    }

    if let Err(err) = res {
        eprintln!("Error: {:?}", err);
    }

    Ok(())
}

async fn run_app<B: ratatui::backend::Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
) -> Result<()> {
    loop {
        terminal.draw(|f| {
            // Progress bar only while the scan runs
            let scanning = app.browser.progress().filter(|snap| !snap.state.is_finished());

            let chunks = if scanning.is_some() {
                Layout::default()
                    .direction(Direction::Vertical)
                    .constraints([
                        Constraint::Min(0),    // Main area
                        Constraint::Length(3), // Progress bar
                        Constraint::Length(1), // Status bar
                        Constraint::Length(1), // Help bar
                    ])
                    .split(f.area())
            } else {
                Layout::default()
                    .direction(Direction::Vertical)
                    .constraints([
                        Constraint::Min(0),    // Main area
                        Constraint::Length(1), // Status bar
                        Constraint::Length(1), // Help bar
                    ])
                    .split(f.area())
            };

            let sort = app.browser.sort_mode();
            app.pane.render(f, chunks[0], &app.location, sort);

            if matches!(app.mode, AppMode::ConfirmDelete) {
                if let Some(target) = app.browser.pending_delete() {
                    render_delete_confirm(f, target);
                }
            }

            if let Some(snapshot) = scanning {
                render_progress_bar(f, chunks[1], &snapshot);
                render_status_bar(f, chunks[2], app);
                render_help_bar(f, chunks[3], app);
            } else {
                render_status_bar(f, chunks[1], app);
                render_help_bar(f, chunks[2], app);
            }
        })?;

        // Poll background tasks for progress updates
        app.poll_background_task().await;

        handle_events(app).await?;

        if app.should_quit {
            break;
        }
    }

    Ok(())
}
