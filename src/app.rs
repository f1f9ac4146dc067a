use std::time::Instant;
use tokio::task::JoinHandle;

use crate::browser::Browser;
use crate::delete::{DeleteError, DeleteReport};
use crate::scan::ScanState;
use crate::ui::Pane;

pub enum AppMode {
    Browse,
    ConfirmDelete, // Confirmation dialog for delete
}

pub struct App {
    pub browser: Browser,
    /// `s3://bucket` shown in the pane title.
    pub location: String,
    pub pane: Pane,
    pub mode: AppMode,
    pub message: String,
    pub status: Option<String>,
    pub status_time: Option<Instant>,
    pub should_quit: bool,
    // Deletion running in the background
    pub delete_task: Option<JoinHandle<Result<DeleteReport, DeleteError>>>,
    scan_reported: bool,
}

impl App {
    pub fn new(browser: Browser, location: String) -> Self {
        let mut app = Self {
            browser,
            location,
            pane: Pane::new(),
            mode: AppMode::Browse,
            message: "Scanning...".to_string(),
            status: None,
            status_time: None,
            should_quit: false,
            delete_task: None,
            scan_reported: false,
        };
        app.reload(None);
        app
    }

    /// Re-read the current directory, keeping the selection on `select` or
    /// on whatever was selected before.
    pub fn reload(&mut self, select: Option<&str>) {
        let keep = select
            .map(str::to_string)
            .or_else(|| self.pane.selected_entry().map(|e| e.name.clone()));
        self.pane.path = self.browser.cwd();
        self.pane.entries = self.browser.current_children();
        self.pane.total = self.browser.current_summary().map_or(0, |dir| dir.size);
        self.pane.select_name(keep.as_deref());
    }

    pub fn set_status(&mut self, status: String) {
        self.status = Some(status);
        self.status_time = Some(Instant::now());
    }

    /// Poll background scan and deletion for completion.
    pub async fn poll_background_task(&mut self) {
        if let Some(time) = self.status_time {
            if time.elapsed().as_secs() >= 10 {
                self.status = None;
                self.status_time = None;
            }
        }

        if let Some(snapshot) = self.browser.progress() {
            if snapshot.state == ScanState::Running {
                self.scan_reported = false;
                self.message = snapshot.describe();
                self.reload(None);
            } else if !self.scan_reported {
                self.scan_reported = true;
                self.message = snapshot.describe();
                self.reload(None);
            }
        }

        let finished = self.delete_task.as_ref().is_some_and(|task| task.is_finished());
        if finished {
            if let Some(task) = self.delete_task.take() {
                let status = match task.await {
                    Ok(Ok(report)) => {
                        for (key, reason) in report.failed.iter().take(20) {
                            tracing::warn!(key = %key, reason = %reason, "object not deleted");
                        }
                        report.describe()
                    }
                    Ok(Err(err)) => format!("Delete failed: {}", err),
                    Err(err) => format!("Delete task failed: {}", err),
                };
                self.set_status(status);
                self.reload(None);
            }
        }
    }
}
