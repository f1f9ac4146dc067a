//! Non-interactive scan summary: the largest entries under the scan root.

use anyhow::Result;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Config;
use crate::scan::{Coverage, ScanSummary, Scanner};
use crate::store::ObjectStore;
use crate::tree::{NodeKind, NodeSummary, SharedTree, SortMode};

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct ReportEntry {
    pub name: String,
    pub kind: &'static str,
    pub size: u64,
    pub count: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl From<&NodeSummary> for ReportEntry {
    fn from(node: &NodeSummary) -> Self {
        let kind = match node.kind {
            NodeKind::BucketRoot => "bucket",
            NodeKind::Directory => "dir",
            NodeKind::File => "file",
            NodeKind::ScanErrorLeaf => "error",
        };
        Self {
            name: node.name.clone(),
            kind,
            size: node.size,
            count: node.count,
            error: node.scan_error.clone(),
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FailedPrefix {
    pub prefix: String,
    pub error: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub location: String,
    pub prefix: String,
    pub state: &'static str,
    pub objects: u64,
    pub bytes: u64,
    pub elapsed_secs: f64,
    pub entries: Vec<ReportEntry>,
    pub failed_prefixes: Vec<FailedPrefix>,
}

impl Report {
    /// Collect the `top` largest children of the scanned prefix.
    pub fn build(tree: &SharedTree, summary: &ScanSummary, location: &str, top: usize, elapsed: Duration) -> Self {
        let dir = tree.find(&summary.root).unwrap_or_else(|| tree.root());
        let entries = tree
            .children(dir, SortMode::SizeDesc)
            .iter()
            .take(top)
            .map(ReportEntry::from)
            .collect();
        let (bytes, objects) = tree
            .summary(dir)
            .map_or((summary.bytes, summary.objects), |node| (node.size, node.count));
        Self {
            location: location.to_string(),
            prefix: summary.root.clone(),
            state: summary.state.label(),
            objects,
            bytes,
            elapsed_secs: elapsed.as_secs_f64(),
            entries,
            failed_prefixes: summary
                .failures
                .iter()
                .map(|f| FailedPrefix {
                    prefix: f.prefix.clone(),
                    error: f.error.to_string(),
                })
                .collect(),
        }
    }

    pub fn render_text(&self) -> String {
        let mut out = format!(
            "{}/{}  {}  {} objects  ({}, {:.1}s)\n",
            self.location,
            self.prefix,
            humansize::format_size(self.bytes, humansize::BINARY),
            self.objects,
            self.state,
            self.elapsed_secs
        );
        for entry in &self.entries {
            let size = if entry.kind == "error" {
                "?".to_string()
            } else {
                humansize::format_size(entry.size, humansize::BINARY)
            };
            let suffix = if entry.kind == "dir" { "/" } else { "" };
            out.push_str(&format!("{:>12}  {:>9}  {}{}\n", size, entry.count, entry.name, suffix));
        }
        if !self.failed_prefixes.is_empty() {
            out.push_str("\nCould not list:\n");
            for failed in &self.failed_prefixes {
                out.push_str(&format!("  {}  {}\n", failed.prefix, failed.error));
            }
        }
        out
    }
}

/// Scan with a spinner on stderr, then print the report to stdout.
pub async fn run(store: Arc<dyn ObjectStore>, config: &Config, top: usize, json: bool) -> Result<()> {
    let location = store.display_name();
    let tree = SharedTree::new();
    let scanner = Scanner::new(store, tree.clone(), Arc::new(Coverage::new()), config.scan.clone());

    let pb = ProgressBar::new_spinner();
    pb.set_style(ProgressStyle::default_spinner().template("{spinner} [{elapsed_precise}] {msg}")?);
    pb.enable_steady_tick(Duration::from_millis(120));

    let handle = scanner.spawn(&config.prefix);
    let progress = Arc::clone(handle.progress());
    while !handle.is_finished() {
        pb.set_message(progress.snapshot().describe());
        tokio::time::sleep(Duration::from_millis(200)).await;
    }
    let summary = handle.wait().await;
    let snapshot = progress.snapshot();
    pb.finish_and_clear();

    let report = Report::build(&tree, &summary, &location, top, snapshot.elapsed);
    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        print!("{}", report.render_text());
    }
    Ok(())
}
