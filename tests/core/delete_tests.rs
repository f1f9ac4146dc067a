// Deletion engine against a scanned in-memory bucket

use trench::delete::{DeleteError, DeleteState, KeySource};
use trench::store::{ObjectRecord, StoreError};
use trench::tree::NodeKind;

use crate::support::{agg, engine, fixture, kind, scan, scan_options, Fixture, MemoryStore};

async fn scanned(store: MemoryStore) -> Fixture {
    let f = fixture(store, scan_options(4));
    scan(&f, "").await;
    f
}

fn sample() -> MemoryStore {
    MemoryStore::new(&[("a/b.txt", 10), ("a/c.txt", 20), ("d.txt", 5)])
}

#[tokio::test]
async fn test_delete_directory() {
    let f = scanned(sample()).await;
    let engine = engine(&f, 1000);

    let mut session = engine.request(f.tree.find("a").unwrap()).unwrap();
    assert_eq!(session.state(), DeleteState::ConfirmPending);
    assert_eq!(session.target().scope, "a/");
    assert_eq!((session.target().size, session.target().count), (30, 2));

    let report = engine.confirm(&mut session).await.unwrap();

    assert_eq!(report.state, DeleteState::Done);
    assert_eq!(report.source, KeySource::Tree);
    assert_eq!(report.deleted, 2);
    assert_eq!(report.deleted_bytes, 30);
    assert_eq!(session.state(), DeleteState::Done);
    assert_eq!(agg(&f.tree, ""), (5, 1));
    assert!(f.tree.find("a").is_none());
    assert!(!f.store.contains("a/b.txt"));
    assert!(f.store.contains("d.txt"));
    assert!(!engine.locks().is_locked("a/"));
    f.tree.check_invariants().unwrap();
}

#[tokio::test]
async fn test_delete_single_file() {
    let f = scanned(sample()).await;
    let engine = engine(&f, 1000);

    let mut session = engine.request(f.tree.find("a/c.txt").unwrap()).unwrap();
    assert_eq!(session.target().scope, "a/c.txt");
    let report = engine.confirm(&mut session).await.unwrap();

    assert_eq!(report.deleted, 1);
    assert_eq!(agg(&f.tree, "a"), (10, 1));
    assert_eq!(agg(&f.tree, ""), (15, 2));
}

#[tokio::test]
async fn test_large_deletion_is_batched() {
    let mut keys: Vec<(String, u64)> = (0..1500).map(|i| (format!("big/k{:04}", i), 1)).collect();
    keys.push(("keep.txt".to_string(), 7));
    let f = scanned(MemoryStore::with_keys(keys)).await;
    assert_eq!(agg(&f.tree, "big"), (1500, 1500));
    let engine = engine(&f, 1000);

    let mut session = engine.request(f.tree.find("big").unwrap()).unwrap();
    let report = engine.confirm(&mut session).await.unwrap();

    assert_eq!(report.batches, 2);
    assert_eq!(f.store.delete_batch_sizes(), vec![500, 1000]);
    assert_eq!(report.deleted, 1500);
    assert_eq!(report.state, DeleteState::Done);
    assert!(f.tree.find("big").is_none());
    assert_eq!(agg(&f.tree, ""), (7, 1));
    assert_eq!(f.store.len(), 1);
}

#[tokio::test]
async fn test_refused_keys_stay_and_are_flagged() {
    let store = sample();
    store.refuse_delete("a/c.txt", "AccessDenied");
    let f = scanned(store).await;
    let engine = engine(&f, 1000);

    let mut session = engine.request(f.tree.find("a").unwrap()).unwrap();
    let report = engine.confirm(&mut session).await.unwrap();

    assert_eq!(report.state, DeleteState::PartiallyFailed);
    assert_eq!(session.state(), DeleteState::PartiallyFailed);
    assert_eq!(report.deleted, 1);
    assert_eq!(report.failed, vec![("a/c.txt".to_string(), "AccessDenied".to_string())]);
    assert_eq!(report.describe(), "Deleted 1 of 2 objects from /a, 1 failed");

    assert_eq!(agg(&f.tree, ""), (25, 2));
    assert_eq!(agg(&f.tree, "a"), (20, 1));
    let survivor = f.tree.summary(f.tree.find("a/c.txt").unwrap()).unwrap();
    assert_eq!(survivor.delete_failed.as_deref(), Some("AccessDenied"));
    assert!(f.tree.find("a/b.txt").is_none());
    f.tree.check_invariants().unwrap();
}

#[tokio::test]
async fn test_failed_batch_is_retried() {
    let f = scanned(sample()).await;
    f.store.fail_batches(2);
    let engine = engine(&f, 1000);

    let mut session = engine.request(f.tree.find("a").unwrap()).unwrap();
    let report = engine.confirm(&mut session).await.unwrap();

    assert_eq!(report.state, DeleteState::Done);
    assert_eq!(agg(&f.tree, ""), (5, 1));
    assert_eq!(f.store.len(), 1);
}

#[tokio::test]
async fn test_exhausted_batch_leaves_tree_untouched() {
    let f = scanned(sample()).await;
    f.store.fail_batches(10);
    let engine = engine(&f, 1000);

    let mut session = engine.request(f.tree.find("a").unwrap()).unwrap();
    let report = engine.confirm(&mut session).await.unwrap();

    assert_eq!(report.state, DeleteState::PartiallyFailed);
    assert_eq!(report.deleted, 0);
    assert_eq!(report.failed.len(), 2);
    assert!(report.failed.iter().all(|(_, reason)| reason.contains("connection reset")));
    assert_eq!(agg(&f.tree, ""), (35, 3));
    assert_eq!(f.store.len(), 3);
    let flagged = f.tree.summary(f.tree.find("a/b.txt").unwrap()).unwrap();
    assert!(flagged.delete_failed.is_some());
}

#[tokio::test]
async fn test_emptied_ancestors_collapse() {
    let f = scanned(MemoryStore::new(&[
        ("x/y/z/f1", 1),
        ("x/y/z/f2", 2),
        ("keep", 4),
    ]))
    .await;
    let engine = engine(&f, 1000);

    let mut session = engine.request(f.tree.find("x/y/z").unwrap()).unwrap();
    engine.confirm(&mut session).await.unwrap();

    assert!(f.tree.find("x/y/z").is_none());
    assert!(f.tree.find("x/y").is_none());
    assert!(f.tree.find("x").is_none());
    assert_eq!(agg(&f.tree, ""), (4, 1));
    f.tree.check_invariants().unwrap();
}

#[tokio::test]
async fn test_collapse_stops_at_non_empty_ancestor() {
    let f = scanned(MemoryStore::new(&[("x/y/f1", 1), ("x/other", 2), ("keep", 4)])).await;
    let engine = engine(&f, 1000);

    let mut session = engine.request(f.tree.find("x/y").unwrap()).unwrap();
    engine.confirm(&mut session).await.unwrap();

    assert!(f.tree.find("x/y").is_none());
    assert_eq!(agg(&f.tree, "x"), (2, 1));
}

#[tokio::test]
async fn test_unscanned_subtree_is_resolved_by_listing() {
    // Tree knows one key, the store holds two
    let store = MemoryStore::new(&[("a/known", 1), ("a/unknown", 2), ("z", 3)]);
    let f = fixture(store, scan_options(2));
    f.tree.ingest(&ObjectRecord::new("a/known", 1)).unwrap();
    let engine = engine(&f, 1000);

    let mut session = engine.request(f.tree.find("a").unwrap()).unwrap();
    let report = engine.confirm(&mut session).await.unwrap();

    assert_eq!(report.source, KeySource::Listing);
    assert_eq!(report.deleted, 2);
    assert!(!f.store.contains("a/unknown"));
    assert!(f.store.contains("z"));
    assert!(f.tree.find("a").is_none());
    let flat = f.store.list_calls().into_iter().filter(|c| !c.delimited).count();
    assert_eq!(flat, 1);
}

#[tokio::test]
async fn test_directory_with_error_leaf_is_resolved_by_listing() {
    let store = MemoryStore::new(&[("data/ok/x", 1), ("data/bad/y", 2), ("keep", 4)]);
    store.fail_listing("data/bad/", StoreError::Authorization("denied".into()), 1);
    let f = scanned(store).await;
    assert_eq!(kind(&f.tree, "data/bad"), Some(NodeKind::ScanErrorLeaf));
    let engine = engine(&f, 1000);

    let mut session = engine.request(f.tree.find("data").unwrap()).unwrap();
    let report = engine.confirm(&mut session).await.unwrap();

    assert_eq!(report.source, KeySource::Listing);
    assert_eq!(report.deleted, 2);
    assert!(!f.store.contains("data/bad/y"));
    assert!(f.tree.find("data").is_none());
    assert_eq!(agg(&f.tree, ""), (4, 1));
    f.tree.check_invariants().unwrap();
}

#[tokio::test]
async fn test_error_leaf_can_be_deleted() {
    let store = MemoryStore::new(&[("logs/a", 1), ("logs/b/c", 2), ("keep", 4)]);
    store.fail_listing("logs/", StoreError::Authorization("denied".into()), 1);
    let f = scanned(store).await;
    let engine = engine(&f, 1000);

    let mut session = engine.request(f.tree.find("logs").unwrap()).unwrap();
    assert_eq!(session.target().kind, NodeKind::ScanErrorLeaf);
    assert_eq!(session.target().scope, "logs/");
    let report = engine.confirm(&mut session).await.unwrap();

    assert_eq!(report.source, KeySource::Listing);
    assert_eq!(report.deleted, 2);
    assert!(f.tree.find("logs").is_none());
    assert_eq!(f.store.len(), 1);
}

#[tokio::test]
async fn test_overlapping_deletion_is_refused() {
    let f = scanned(sample()).await;
    let engine = engine(&f, 1000);
    let held = engine.locks().try_acquire("a/").unwrap();

    let mut session = engine.request(f.tree.find("a/b.txt").unwrap()).unwrap();
    let err = engine.confirm(&mut session).await.unwrap_err();
    assert_eq!(err, DeleteError::SubtreeBusy("a/b.txt".to_string()));
    assert_eq!(session.state(), DeleteState::ConfirmPending);
    assert!(f.store.contains("a/b.txt"));

    drop(held);
    let report = engine.confirm(&mut session).await.unwrap();
    assert_eq!(report.state, DeleteState::Done);
}

#[tokio::test]
async fn test_disjoint_deletions_run_together() {
    let f = scanned(sample()).await;
    let engine = engine(&f, 1000);
    let mut left = engine.request(f.tree.find("a").unwrap()).unwrap();
    let mut right = engine.request(f.tree.find("d.txt").unwrap()).unwrap();

    let (l, r) = tokio::join!(engine.confirm(&mut left), engine.confirm(&mut right));

    assert_eq!(l.unwrap().state, DeleteState::Done);
    assert_eq!(r.unwrap().state, DeleteState::Done);
    assert_eq!(agg(&f.tree, ""), (0, 0));
    assert_eq!(f.store.len(), 0);
}

#[tokio::test]
async fn test_root_cannot_be_deleted() {
    let f = scanned(sample()).await;
    let engine = engine(&f, 1000);

    let err = engine.request(f.tree.root()).unwrap_err();
    assert_eq!(err, DeleteError::RootNotDeletable);
}

#[tokio::test]
async fn test_cancelled_session_cannot_be_confirmed() {
    let f = scanned(sample()).await;
    let engine = engine(&f, 1000);

    let mut session = engine.request(f.tree.find("a").unwrap()).unwrap();
    engine.cancel(&mut session).unwrap();
    assert_eq!(session.state(), DeleteState::Idle);

    let err = engine.confirm(&mut session).await.unwrap_err();
    assert_eq!(
        err,
        DeleteError::InvalidTransition {
            from: DeleteState::Idle,
            to: DeleteState::Confirmed,
        }
    );
    assert_eq!(agg(&f.tree, ""), (35, 3));
}

#[tokio::test]
async fn test_stale_node_is_gone() {
    let f = scanned(sample()).await;
    let engine = engine(&f, 1000);
    let id = f.tree.find("a").unwrap();

    let mut session = engine.request(id).unwrap();
    engine.confirm(&mut session).await.unwrap();

    assert_eq!(engine.request(id).unwrap_err(), DeleteError::NodeGone);
}

#[tokio::test]
async fn test_double_slash_keys_are_all_deleted() {
    let f = scanned(MemoryStore::new(&[("a/b", 3), ("a//b", 7), ("z", 1)])).await;
    assert_eq!(agg(&f.tree, ""), (11, 3));
    let engine = engine(&f, 1000);

    let mut session = engine.request(f.tree.find("a").unwrap()).unwrap();
    let report = engine.confirm(&mut session).await.unwrap();

    assert_eq!(report.state, DeleteState::Done);
    assert_eq!(report.deleted, 2);
    assert!(!f.store.contains("a/b"));
    assert!(!f.store.contains("a//b"));
    assert!(f.tree.find("a").is_none());
    assert_eq!(agg(&f.tree, ""), (1, 1));
    f.tree.check_invariants().unwrap();
}

#[tokio::test]
async fn test_file_does_not_conflict_with_sibling_directory() {
    let f = scanned(MemoryStore::new(&[("a", 1), ("ab/c", 2)])).await;
    let engine = engine(&f, 1000);
    let _held = engine.locks().try_acquire("ab/").unwrap();

    let mut session = engine.request(f.tree.find("a").unwrap()).unwrap();
    let report = engine.confirm(&mut session).await.unwrap();

    assert_eq!(report.state, DeleteState::Done);
    assert!(!f.store.contains("a"));
    assert!(f.store.contains("ab/c"));
}

#[tokio::test]
async fn test_error_leaf_deletion_removes_directory_marker() {
    let store = MemoryStore::new(&[("logs/", 0), ("logs/a", 1), ("keep", 4)]);
    store.fail_listing("logs/", StoreError::Authorization("denied".into()), 1);
    let f = scanned(store).await;
    assert_eq!(kind(&f.tree, "logs"), Some(NodeKind::ScanErrorLeaf));
    let engine = engine(&f, 1000);

    let mut session = engine.request(f.tree.find("logs").unwrap()).unwrap();
    let report = engine.confirm(&mut session).await.unwrap();

    assert_eq!(report.source, KeySource::Listing);
    assert_eq!(report.deleted, 2);
    assert!(!f.store.contains("logs/"));
    assert!(f.tree.find("logs").is_none());
    assert_eq!(f.store.len(), 1);
}
