use reelbot::extractor::parse_link;
use reelbot::request::{FailureKind, FetchOutcome, FetchRequest, FetchResult};
use reelbot::stats::StatsStore;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn request(user: &str, n: usize) -> FetchRequest {
    let link = parse_link(&format!("https://www.instagram.com/reel/code{}/", n)).unwrap();
    FetchRequest::new(link, user, "general", Some("guild-1".to_string()))
}

fn not_found(request: FetchRequest) -> FetchResult {
    FetchResult::finish(
        request,
        FetchOutcome::Failed {
            kind: FailureKind::NotFound,
        },
    )
    .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_updates_are_not_lost() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("stats.json");
    let store = Arc::new(StatsStore::open(&path, 10).await);

    let tasks: Vec<_> = (0..40)
        .map(|n| {
            let store = store.clone();
            tokio::spawn(async move {
                let req = request(if n % 2 == 0 { "even" } else { "odd" }, n);
                store.record_submitted(&req).await.unwrap();
                store.record_outcome(&not_found(req)).await.unwrap();
            })
        })
        .collect();
    for task in tasks {
        task.await.unwrap();
    }

    let snapshot = store.snapshot().await;
    assert_eq!(snapshot.total, 40);
    assert_eq!(snapshot.failed, 40);
    assert_eq!(snapshot.pending, 0);
    assert_eq!(snapshot.user_activity["even"].requests, 20);
    assert_eq!(snapshot.user_activity["odd"].failed, 20);
    assert_eq!(snapshot.recent.len(), 10);
    assert!(snapshot.is_consistent());

    let reopened = StatsStore::open(&path, 10).await;
    assert_eq!(reopened.snapshot().await, snapshot);
}

#[tokio::test]
async fn interrupted_write_keeps_committed_snapshot() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("stats.json");
    let tmp = dir.path().join("stats.json.tmp");

    let store = StatsStore::open(&path, 10).await;
    let req = request("alice", 1);
    store.record_submitted(&req).await.unwrap();
    store.record_outcome(&not_found(req)).await.unwrap();
    let committed = store.snapshot().await;
    drop(store);

    // A crash mid-write leaves a truncated temporary file behind.
    std::fs::write(&tmp, b"{\"total\": 99, \"fai").unwrap();

    let reopened = StatsStore::open(&path, 10).await;
    assert_eq!(reopened.snapshot().await, committed);
    assert!(!tmp.exists());
}

#[tokio::test]
async fn corrupt_file_falls_back_to_zero() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("stats.json");
    std::fs::write(&path, b"not json at all").unwrap();

    assert!(matches!(
        StatsStore::read(&path).await,
        Err(reelbot::Error::StoreCorruption(_))
    ));

    let store = StatsStore::open(&path, 10).await;
    assert_eq!(store.snapshot().await.total, 0);

    store.record_submitted(&request("alice", 1)).await.unwrap();
    let persisted = StatsStore::read(&path).await.unwrap().unwrap();
    assert_eq!(persisted.total, 1);
    assert_eq!(persisted.pending, 1);
}

#[tokio::test]
async fn legacy_layout_and_unknown_fields_are_accepted() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("stats.json");
    std::fs::write(
        &path,
        r#"{
            "total_downloads": 7,
            "successful_downloads": 5,
            "failed_downloads": 2,
            "user_activity": {"alice": {"requests": 7, "favourite_colour": "green"}},
            "schema_version": 3
        }"#,
    )
    .unwrap();

    let store = StatsStore::open(&path, 10).await;
    let snapshot = store.snapshot().await;
    assert_eq!(snapshot.total, 7);
    assert_eq!(snapshot.succeeded, 5);
    assert_eq!(snapshot.failed, 2);
    assert_eq!(snapshot.user_activity["alice"].requests, 7);
    assert!(snapshot.is_consistent());
}

#[tokio::test]
async fn requests_in_flight_at_exit_are_forgotten() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("stats.json");
    std::fs::write(&path, r#"{"total": 5, "succeeded": 2, "failed": 1, "pending": 2}"#).unwrap();

    let store = StatsStore::open(&path, 10).await;
    let snapshot = store.snapshot().await;
    assert_eq!(snapshot.total, 3);
    assert_eq!(snapshot.pending, 0);
    assert!(snapshot.is_consistent());
}

#[tokio::test]
async fn outcome_without_recorded_submission_keeps_totals_consistent() {
    let dir = TempDir::new().unwrap();
    let store = StatsStore::open(dir.path().join("stats.json"), 10).await;

    store.record_outcome(&not_found(request("alice", 1))).await.unwrap();

    let snapshot = store.snapshot().await;
    assert_eq!(snapshot.total, 1);
    assert_eq!(snapshot.failed, 1);
    assert!(snapshot.is_consistent());
}

#[tokio::test]
async fn failed_write_changes_nothing() {
    let dir = TempDir::new().unwrap();
    let blocker = dir.path().join("not-a-dir");
    std::fs::write(&blocker, b"").unwrap();

    let store = StatsStore::open(blocker.join("stats.json"), 10).await;
    let err = store
        .record_submitted(&request("alice", 1))
        .await
        .unwrap_err();

    assert!(matches!(err, reelbot::Error::StoreWrite(_)));
    assert_eq!(store.snapshot().await.total, 0);
}

#[tokio::test]
async fn watchers_see_committed_snapshots() {
    let dir = TempDir::new().unwrap();
    let store = StatsStore::open(dir.path().join("stats.json"), 10).await;
    let mut rx = store.watch();

    store.record_submitted(&request("alice", 1)).await.unwrap();

    tokio::time::timeout(Duration::from_secs(1), rx.changed())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(rx.borrow().total, 1);
    assert_eq!(rx.borrow().user_activity["alice"].requests, 1);
}
