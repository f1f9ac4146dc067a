// Navigation and command API on top of a live scan

use std::sync::Arc;
use std::time::Duration;

use trench::browser::Browser;
use trench::delete::{DeleteOptions, DeleteState};
use trench::retry::RetryPolicy;
use trench::scan::ScanState;
use trench::store::ObjectStore;
use trench::tree::SortMode;

use crate::support::{scan_options, MemoryStore};

fn browser(store: &Arc<MemoryStore>) -> Browser {
    let dyn_store: Arc<dyn ObjectStore> = store.clone();
    let delete = DeleteOptions {
        retry: RetryPolicy::immediate(3),
        ..DeleteOptions::default()
    };
    Browser::new(dyn_store, "", scan_options(4), delete)
}

async fn settle(browser: &Browser) {
    while browser.is_scanning() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

async fn scanned() -> (Arc<MemoryStore>, Browser) {
    let store = Arc::new(MemoryStore::new(&[("a/b.txt", 10), ("a/c.txt", 20), ("d.txt", 5)]));
    let mut browser = browser(&store);
    browser.start_scan();
    settle(&browser).await;
    (store, browser)
}

fn names(browser: &Browser) -> Vec<String> {
    browser.current_children().into_iter().map(|n| n.name).collect()
}

#[tokio::test]
async fn test_scan_progress_reaches_complete() {
    let (_store, browser) = scanned().await;

    let snapshot = browser.progress().unwrap();
    assert_eq!(snapshot.state, ScanState::Complete);
    assert_eq!(snapshot.objects, 3);
    assert_eq!(snapshot.outstanding, 0);
    assert_eq!(browser.totals(), (35, 3));
}

#[tokio::test]
async fn test_sort_modes() {
    let (_store, mut browser) = scanned().await;

    assert_eq!(browser.sort_mode(), SortMode::SizeDesc);
    assert_eq!(names(&browser), vec!["a", "d.txt"]);

    browser.set_sort_mode(SortMode::NameAsc);
    browser.enter("a");
    assert_eq!(names(&browser), vec!["b.txt", "c.txt"]);

    assert_eq!(browser.toggle_sort(), SortMode::SizeDesc);
    assert_eq!(names(&browser), vec!["c.txt", "b.txt"]);

    let listed: Vec<String> = browser
        .get_children("a", SortMode::NameAsc)
        .into_iter()
        .map(|n| n.name)
        .collect();
    assert_eq!(listed, vec!["b.txt", "c.txt"]);
    assert!(browser.get_children("missing", SortMode::NameAsc).is_empty());
}

#[tokio::test]
async fn test_enter_and_up() {
    let (_store, mut browser) = scanned().await;

    assert!(browser.enter("a"));
    assert_eq!(browser.cwd(), "a");
    assert_eq!(browser.current_summary().unwrap().size, 30);

    // Files and unknown names cannot be entered
    assert!(!browser.enter("b.txt"));
    assert!(!browser.enter("nope"));
    assert_eq!(browser.cwd(), "a");

    assert_eq!(browser.up().as_deref(), Some("a"));
    assert_eq!(browser.cwd(), "");
    assert_eq!(browser.up(), None);
}

#[tokio::test]
async fn test_confirmed_deletion_runs_in_background() {
    let (store, mut browser) = scanned().await;

    let target = browser.request_delete("a").unwrap();
    assert_eq!(target.path, "a");
    assert!(browser.pending_delete().is_some());

    let task = browser.confirm_delete().unwrap();
    let report = task.await.unwrap().unwrap();

    assert_eq!(report.state, DeleteState::Done);
    assert!(browser.pending_delete().is_none());
    assert_eq!(browser.totals(), (5, 1));
    assert_eq!(names(&browser), vec!["d.txt"]);
    assert!(!store.contains("a/c.txt"));
}

#[tokio::test]
async fn test_cancelled_request_changes_nothing() {
    let (store, mut browser) = scanned().await;

    browser.request_delete("d.txt").unwrap();
    browser.cancel_delete().unwrap();

    assert!(browser.pending_delete().is_none());
    assert!(browser.confirm_delete().is_none());
    assert_eq!(browser.totals(), (35, 3));
    assert!(store.contains("d.txt"));
}

#[tokio::test]
async fn test_unknown_entry_cannot_be_requested() {
    let (_store, mut browser) = scanned().await;
    assert!(browser.request_delete("missing").is_err());
    assert!(browser.pending_delete().is_none());
}

#[tokio::test]
async fn test_cwd_falls_back_when_directory_disappears() {
    let (_store, mut browser) = scanned().await;
    assert!(browser.enter("a"));

    let id = browser.tree().find("a").unwrap();
    browser.request_delete_id(id).unwrap();
    browser.confirm_delete().unwrap().await.unwrap().unwrap();

    assert_eq!(browser.cwd(), "");
    assert_eq!(names(&browser), vec!["d.txt"]);
    assert_eq!(browser.up(), None);
}

#[tokio::test]
async fn test_refresh_rescans_current_directory() {
    let (store, mut browser) = scanned().await;
    browser.enter("a");
    store.put("a/new.bin", 100);

    assert!(browser.refresh());
    settle(&browser).await;

    assert_eq!(browser.progress().unwrap().state, ScanState::Complete);
    assert_eq!(browser.cwd(), "a");
    assert_eq!(names(&browser), vec!["new.bin", "c.txt", "b.txt"]);
    assert_eq!(browser.totals(), (135, 4));
}

#[tokio::test]
async fn test_refresh_is_refused_while_scanning() {
    let store = Arc::new(
        MemoryStore::new(&[("a/x", 1), ("b/y", 2)]).delay(Duration::from_millis(50)),
    );
    let mut browser = browser(&store);
    browser.start_scan();

    assert!(browser.is_scanning());
    assert!(!browser.refresh());

    browser.cancel_scan();
    let summary = browser.take_scan().unwrap().wait().await;
    assert_eq!(summary.state, ScanState::Cancelled);
}

#[tokio::test]
async fn test_empty_named_directory_can_be_entered() {
    let store = Arc::new(MemoryStore::new(&[("a//b", 7), ("a/c", 1)]));
    let mut browser = browser(&store);
    browser.start_scan();
    settle(&browser).await;

    assert!(browser.enter_child("a"));
    let mut listed = names(&browser);
    listed.sort();
    assert_eq!(listed, vec!["", "c"]);

    assert!(browser.enter_child(""));
    assert_eq!(browser.cwd(), "a//");
    assert_eq!(names(&browser), vec!["b"]);
    assert_eq!(browser.up().as_deref(), Some(""));
    assert_eq!(browser.cwd(), "a");
}
