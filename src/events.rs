use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};

use crate::app::{App, AppMode};

pub async fn handle_events(app: &mut App) -> Result<()> {
    if event::poll(std::time::Duration::from_millis(100))? {
        if let Event::Key(key) = event::read()? {
            // Global quit handlers - work in ALL modes
            if key.code == KeyCode::Char('q')
                || (key.code == KeyCode::Char('c') && key.modifiers.contains(KeyModifiers::CONTROL))
            {
                app.browser.cancel_scan();
                app.should_quit = true;
                return Ok(());
            }

            match app.mode {
                AppMode::Browse => handle_browse(app, key),
                AppMode::ConfirmDelete => handle_confirm_delete(app, key),
            }
        }
    }
    Ok(())
}

fn handle_browse(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Up | KeyCode::Char('k') => app.pane.select_previous(),
        KeyCode::Down | KeyCode::Char('j') => app.pane.select_next(),
        KeyCode::Home | KeyCode::Char('g') => app.pane.select_first(),
        KeyCode::End | KeyCode::Char('G') => app.pane.select_last(),
        KeyCode::Enter | KeyCode::Right | KeyCode::Char('l') => {
            // Drill down into selected directory
            if let Some(entry) = app.pane.selected_entry().cloned() {
                if entry.is_dir() && app.browser.enter_child(&entry.name) {
                    app.reload(None);
                    app.pane.select_first();
                }
            }
        }
        KeyCode::Left | KeyCode::Backspace | KeyCode::Char('h') => {
            let left = app.browser.up();
            app.reload(left.as_deref());
        }
        KeyCode::Char('s') => {
            let mode = app.browser.toggle_sort();
            app.reload(None);
            app.set_status(format!("Sorted by {}", mode.label()));
        }
        KeyCode::Char('c') => {
            if app.browser.is_scanning() {
                app.browser.cancel_scan();
                app.set_status("Stopping scan, partial results stay browsable".to_string());
            }
        }
        KeyCode::Char('r') => {
            if app.browser.refresh() {
                app.set_status(format!("Rescanning /{}", app.browser.cwd()));
                app.reload(None);
            } else {
                app.set_status("Wait for the running scan to finish".to_string());
            }
        }
        KeyCode::Char('d') | KeyCode::Delete => {
            if app.delete_task.is_some() {
                app.set_status("A deletion is already running".to_string());
                return;
            }
            if let Some(entry) = app.pane.selected_entry().cloned() {
                match app.browser.request_delete(&entry.name) {
                    Ok(_) => {
                        app.mode = AppMode::ConfirmDelete;
                        app.message = "Press Y to confirm delete, N or Esc to cancel".to_string();
                    }
                    Err(err) => app.set_status(format!("Cannot delete: {}", err)),
                }
            }
        }
        _ => {}
    }
}

fn handle_confirm_delete(app: &mut App, key: KeyEvent) {
    match key.code {
        KeyCode::Char('y') | KeyCode::Char('Y') => {
            // User confirmed delete
            app.delete_task = app.browser.confirm_delete();
            app.mode = AppMode::Browse;
            app.message = "Deleting...".to_string();
        }
        KeyCode::Char('n') | KeyCode::Char('N') | KeyCode::Esc => {
            if let Err(err) = app.browser.cancel_delete() {
                tracing::warn!(error = %err, "cancelling deletion");
            }
            app.mode = AppMode::Browse;
            app.message = "Delete cancelled".to_string();
        }
        _ => {
            app.message = "Press Y to confirm delete, N or Esc to cancel".to_string();
        }
    }
}
