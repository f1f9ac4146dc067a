// Scan orchestration against the in-memory store

use std::collections::BTreeSet;
use std::time::Duration;

use trench::scan::{ScanOptions, ScanState, DEFAULT_SPLIT_ALPHABET};
use trench::store::StoreError;
use trench::tree::NodeKind;

use crate::support::{agg, fixture, kind, scan, scan_options, MemoryStore};

#[tokio::test]
async fn test_scan_builds_aggregates() {
    let f = fixture(
        MemoryStore::new(&[("a/b.txt", 10), ("a/c.txt", 20), ("d.txt", 5)]),
        scan_options(4),
    );

    let summary = scan(&f, "").await;

    assert_eq!(summary.state, ScanState::Complete);
    assert_eq!(summary.objects, 3);
    assert_eq!(summary.bytes, 35);
    assert!(summary.failures.is_empty());
    assert_eq!(agg(&f.tree, ""), (35, 3));
    assert_eq!(agg(&f.tree, "a"), (30, 2));
    assert_eq!(kind(&f.tree, "a"), Some(NodeKind::Directory));
    assert_eq!(kind(&f.tree, "a/b.txt"), Some(NodeKind::File));
    assert!(f.coverage.is_complete(""));
    f.tree.check_invariants().unwrap();
}

#[tokio::test]
async fn test_each_directory_is_listed_once() {
    let f = fixture(
        MemoryStore::new(&[("data/2024/x", 1), ("data/2025/y", 2), ("logs/z", 3)]),
        scan_options(3),
    );

    let summary = scan(&f, "").await;
    assert_eq!(summary.state, ScanState::Complete);

    let mut listed = f.store.first_page_prefixes();
    listed.sort();
    assert_eq!(listed, vec!["", "data/", "data/2024/", "data/2025/", "logs/"]);
    assert_eq!(agg(&f.tree, "data"), (3, 2));
    assert_eq!(agg(&f.tree, "data/2025"), (2, 1));
}

#[tokio::test]
async fn test_flat_namespace_splits_by_leading_character() {
    let f = fixture(
        MemoryStore::new(&[("apple", 1), ("banana", 2), ("cherry", 4), ("7up", 8)]),
        scan_options(8),
    );

    let summary = scan(&f, "").await;
    assert_eq!(summary.state, ScanState::Complete);

    let listed = f.store.first_page_prefixes();
    let split: Vec<&String> = listed.iter().filter(|p| !p.is_empty()).collect();
    assert_eq!(listed.len(), DEFAULT_SPLIT_ALPHABET.len() + 1);
    let chars: BTreeSet<String> = split.iter().map(|p| p.to_string()).collect();
    let expected: BTreeSet<String> = DEFAULT_SPLIT_ALPHABET.chars().map(String::from).collect();
    assert_eq!(chars, expected);

    // The first page is not ingested, so nothing is counted twice
    assert_eq!(summary.objects, 4);
    assert_eq!(agg(&f.tree, ""), (15, 4));
}

#[tokio::test]
async fn test_split_covers_leading_characters_outside_alphabet() {
    let f = fixture(
        MemoryStore::new(&[("Zulu", 1), ("_tmp", 2), ("alpha", 4)]),
        scan_options(8),
    );

    let summary = scan(&f, "").await;

    let listed = f.store.first_page_prefixes();
    assert!(listed.contains(&"Z".to_string()));
    assert!(listed.contains(&"_".to_string()));
    assert_eq!(listed.len(), DEFAULT_SPLIT_ALPHABET.len() + 3);
    assert_eq!(summary.objects, 3);
    assert_eq!(agg(&f.tree, ""), (7, 3));
}

#[tokio::test]
async fn test_split_threshold_is_tunable() {
    let options = ScanOptions {
        split_threshold: 0,
        ..scan_options(2)
    };
    let f = fixture(MemoryStore::new(&[("apple", 1), ("banana", 2)]), options);

    scan(&f, "").await;

    assert_eq!(f.store.first_page_prefixes(), vec![""]);
    assert_eq!(agg(&f.tree, ""), (3, 2));
}

#[tokio::test]
async fn test_empty_bucket_completes() {
    let f = fixture(MemoryStore::new(&[]), scan_options(4));

    let summary = scan(&f, "").await;

    assert_eq!(summary.state, ScanState::Complete);
    assert_eq!(agg(&f.tree, ""), (0, 0));
    assert_eq!(f.store.list_calls().len(), 1);
}

#[tokio::test]
async fn test_pagination_follows_continuation_tokens() {
    let store = MemoryStore::new(&[
        ("a/1", 1),
        ("a/2", 1),
        ("a/3", 1),
        ("a/4", 1),
        ("a/5", 1),
        ("b/1", 10),
    ])
    .page_size(2);
    let f = fixture(store, scan_options(2));

    let summary = scan(&f, "").await;
    assert_eq!(summary.state, ScanState::Complete);

    let tokens: Vec<Option<String>> = f
        .store
        .list_calls()
        .into_iter()
        .filter(|c| c.prefix == "a/")
        .map(|c| c.token)
        .collect();
    assert_eq!(tokens, vec![None, Some("a/2".to_string()), Some("a/4".to_string())]);
    assert_eq!(agg(&f.tree, "a"), (5, 5));
    assert_eq!(agg(&f.tree, ""), (15, 6));
}

#[tokio::test]
async fn test_authorization_failure_leaves_error_leaf() {
    let store = MemoryStore::new(&[("data/x", 10), ("logs/y", 5), ("top.txt", 1)]);
    store.fail_listing("logs/", StoreError::Authorization("denied".into()), 1);
    let f = fixture(store, scan_options(4));

    let summary = scan(&f, "").await;

    assert_eq!(summary.state, ScanState::CompletedWithErrors);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].prefix, "logs/");
    assert!(matches!(summary.failures[0].error, StoreError::Authorization(_)));

    // Not retried
    let logs_calls = f.store.list_calls().iter().filter(|c| c.prefix == "logs/").count();
    assert_eq!(logs_calls, 1);

    assert_eq!(kind(&f.tree, "logs"), Some(NodeKind::ScanErrorLeaf));
    let leaf = f.tree.summary(f.tree.find("logs").unwrap()).unwrap();
    assert!(leaf.scan_error.unwrap().contains("denied"));
    assert_eq!(agg(&f.tree, "logs"), (0, 0));
    assert_eq!(agg(&f.tree, ""), (11, 2));

    assert!(!f.coverage.is_complete(""));
    assert!(!f.coverage.is_complete("logs/"));
    assert!(f.coverage.is_complete("data/"));
    f.tree.check_invariants().unwrap();
}

#[tokio::test]
async fn test_transport_errors_are_retried() {
    let store = MemoryStore::new(&[("data/x", 10), ("logs/y", 5)]);
    store.fail_listing("data/", StoreError::Transport("timeout".into()), 2);
    let f = fixture(store, scan_options(2));

    let summary = scan(&f, "").await;

    assert_eq!(summary.state, ScanState::Complete);
    let data_calls = f.store.list_calls().iter().filter(|c| c.prefix == "data/").count();
    assert_eq!(data_calls, 3);
    assert_eq!(agg(&f.tree, "data"), (10, 1));
}

#[tokio::test]
async fn test_exhausted_retries_fail_the_prefix() {
    let store = MemoryStore::new(&[("data/x", 10), ("logs/y", 5)]);
    store.fail_listing("data/", StoreError::Transport("timeout".into()), 10);
    let f = fixture(store, scan_options(2));

    let summary = scan(&f, "").await;

    assert_eq!(summary.state, ScanState::CompletedWithErrors);
    let data_calls = f.store.list_calls().iter().filter(|c| c.prefix == "data/").count();
    assert_eq!(data_calls, 3);
    assert_eq!(kind(&f.tree, "data"), Some(NodeKind::ScanErrorLeaf));
    assert_eq!(agg(&f.tree, ""), (5, 1));
}

#[tokio::test]
async fn test_cancel_keeps_tree_consistent() {
    let keys: Vec<(String, u64)> = (0..40)
        .flat_map(|d| (0..5).map(move |i| (format!("d{:02}/f{}", d, i), 3)))
        .collect();
    let store = MemoryStore::with_keys(keys).delay(Duration::from_millis(20));
    let f = fixture(store, scan_options(2));

    let handle = f.scanner.spawn("");
    tokio::time::sleep(Duration::from_millis(60)).await;
    handle.cancel();
    let summary = handle.wait().await;

    assert_eq!(summary.state, ScanState::Cancelled);
    assert!(summary.abandoned > 0);
    let (size, count) = agg(&f.tree, "");
    assert!(count < 200);
    assert_eq!(size, count * 3);
    assert!(!f.coverage.is_complete(""));
    f.tree.check_invariants().unwrap();
}

#[tokio::test]
async fn test_progress_reports_outstanding_work() {
    let f = fixture(
        MemoryStore::new(&[("a/x", 1), ("b/y", 2)]).delay(Duration::from_millis(5)),
        scan_options(2),
    );

    let handle = f.scanner.spawn("");
    let running = handle.progress().snapshot();
    assert_eq!(running.state, ScanState::Running);

    let summary = handle.wait().await;
    assert_eq!(summary.state, ScanState::Complete);
    assert_eq!(summary.abandoned, 0);
}

#[tokio::test]
async fn test_refresh_rescans_a_prefix() {
    let store = MemoryStore::new(&[("data/x", 10), ("logs/y", 5)]);
    let f = fixture(store, scan_options(2));
    scan(&f, "").await;
    assert_eq!(agg(&f.tree, ""), (15, 2));

    f.store.put("data/z", 7);
    let summary = f.scanner.refresh("data/").await;

    assert_eq!(summary.state, ScanState::Complete);
    assert_eq!(summary.root, "data/");
    assert_eq!(agg(&f.tree, "data"), (17, 2));
    assert_eq!(agg(&f.tree, ""), (22, 3));
    f.tree.check_invariants().unwrap();
}

#[tokio::test]
async fn test_refresh_replaces_error_leaf() {
    let store = MemoryStore::new(&[("data/x", 10), ("logs/y", 5)]);
    store.fail_listing("logs/", StoreError::Authorization("denied".into()), 1);
    let f = fixture(store, scan_options(2));
    scan(&f, "").await;
    assert_eq!(kind(&f.tree, "logs"), Some(NodeKind::ScanErrorLeaf));
    assert!(!f.coverage.is_complete(""));

    let summary = f.scanner.refresh("logs/").await;

    assert_eq!(summary.state, ScanState::Complete);
    assert_eq!(kind(&f.tree, "logs"), Some(NodeKind::Directory));
    assert_eq!(agg(&f.tree, ""), (15, 2));
    assert!(f.coverage.is_complete(""));
    f.tree.check_invariants().unwrap();
}

#[tokio::test]
async fn test_scan_from_sub_prefix() {
    let f = fixture(
        MemoryStore::new(&[("data/a/x", 1), ("data/b/y", 2), ("logs/z", 3)]),
        scan_options(2),
    );

    let summary = scan(&f, "data/").await;

    assert_eq!(summary.state, ScanState::Complete);
    assert_eq!(agg(&f.tree, ""), (3, 2));
    assert!(f.tree.find("logs").is_none());
    assert!(f.coverage.is_complete("data/"));
    assert!(!f.coverage.is_complete("logs/"));
}

#[tokio::test]
async fn test_truncated_first_page_still_covers_every_leading_character() {
    let mut keys: Vec<(String, u64)> = (0..1500).map(|i| (format!("{:05}", i), 1)).collect();
    keys.push(("Zebra".to_string(), 100));
    keys.push(("_under".to_string(), 100));
    let f = fixture(MemoryStore::with_keys(keys), scan_options(8));

    let summary = scan(&f, "").await;

    assert_eq!(summary.state, ScanState::Complete);
    assert_eq!(kind(&f.tree, "Zebra"), Some(NodeKind::File));
    assert_eq!(kind(&f.tree, "_under"), Some(NodeKind::File));
    assert_eq!(agg(&f.tree, ""), (1700, 1502));
    assert!(f.coverage.is_complete(""));
}

#[tokio::test]
async fn test_non_ascii_keys_are_listed_by_tail_task() {
    let mut keys: Vec<(String, u64)> = (0..1500).map(|i| (format!("{:05}", i), 1)).collect();
    keys.push(("\u{e9}t\u{e9}.txt".to_string(), 5));
    keys.push(("\u{f1}/x".to_string(), 7));
    let f = fixture(MemoryStore::with_keys(keys), scan_options(8));

    let summary = scan(&f, "").await;

    assert_eq!(summary.state, ScanState::Complete);
    assert_eq!(agg(&f.tree, ""), (1512, 1502));
    assert_eq!(agg(&f.tree, "\u{f1}"), (7, 1));
    let tail_calls: Vec<_> = f
        .store
        .list_calls()
        .into_iter()
        .filter(|c| c.start_after.is_some())
        .collect();
    assert_eq!(tail_calls.len(), 1);
    assert_eq!(tail_calls[0].prefix, "");
    let listed = f.store.first_page_prefixes();
    assert_eq!(listed.iter().filter(|p| p.as_str() == "\u{f1}/").count(), 1);
}

#[tokio::test]
async fn test_single_directory_chain_splits_where_keys_are() {
    let keys: Vec<(String, u64)> = (0..3000).map(|i| (format!("data/f{:04}", i), 2)).collect();
    let f = fixture(MemoryStore::with_keys(keys).page_size(100), scan_options(8));

    let summary = scan(&f, "").await;

    assert_eq!(summary.state, ScanState::Complete);
    assert_eq!(agg(&f.tree, "data"), (6000, 3000));
    let under_data: Vec<String> = f
        .store
        .first_page_prefixes()
        .into_iter()
        .filter(|p| p.starts_with("data/"))
        .collect();
    assert!(under_data.contains(&"data/f".to_string()));
    assert!(under_data.len() > 1);
    // The root page is applied, not split
    assert!(!f.store.first_page_prefixes().contains(&"d".to_string()));
}

#[tokio::test]
async fn test_cancel_releases_open_listing() {
    let keys: Vec<(String, u64)> = (0..40).map(|i| (format!("d/k{:02}", i), 1)).collect();
    let store = MemoryStore::with_keys(keys)
        .page_size(2)
        .delay(Duration::from_millis(20));
    let options = ScanOptions {
        split_threshold: 0,
        ..scan_options(2)
    };
    let f = fixture(store, options);

    let handle = f.scanner.spawn("");
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.cancel();
    let summary = handle.wait().await;

    assert_eq!(summary.state, ScanState::Cancelled);
    let released = f.store.released_tokens();
    assert_eq!(released.len(), 1);
    let requested: Vec<Option<String>> = f.store.list_calls().into_iter().map(|c| c.token).collect();
    assert!(!requested.contains(&Some(released[0].clone())));
}

#[tokio::test]
async fn test_split_keeps_directory_marker() {
    let f = fixture(
        MemoryStore::new(&[("photos/", 0), ("photos/a.jpg", 5), ("photos/b.jpg", 6)]),
        scan_options(4),
    );

    let summary = scan(&f, "").await;

    assert_eq!(summary.state, ScanState::Complete);
    assert_eq!(agg(&f.tree, "photos"), (11, 2));
    let marker = f
        .tree
        .read(|t| t.get(t.find("photos").unwrap()).unwrap().marker().map(str::to_string));
    assert_eq!(marker.as_deref(), Some("photos/"));
}
