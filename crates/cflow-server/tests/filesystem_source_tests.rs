//! Filesystem source integration tests
//!
//! Drives a real watched directory through the source lifecycle: existing
//! files on start, debounced arrivals, pause/resume exactly-once delivery,
//! and archive-name disambiguation.

use cflow_common::FlowError;
use cflow_server::source::{
    ContentSource, ContentSourceItem, FileSystemContentSource, SourceBatch,
};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let _ = fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,cflow_server=debug")),
        )
        .with_test_writer()
        .try_init();
}

fn config(path: &Path, filter: Option<&str>) -> HashMap<String, String> {
    let mut map = HashMap::new();
    map.insert("path".to_string(), path.display().to_string());
    if let Some(filter) = filter {
        map.insert("filter".to_string(), filter.to_string());
    }
    map
}

/// Collect items until `count` arrive or the timeout trips
async fn collect_items(
    events: &mut mpsc::Receiver<SourceBatch>,
    count: usize,
    timeout: Duration,
) -> Vec<ContentSourceItem> {
    let mut items = Vec::new();
    let deadline = tokio::time::Instant::now() + timeout;
    while items.len() < count {
        let batch = tokio::time::timeout_at(deadline, events.recv()).await;
        match batch {
            Ok(Some(batch)) => items.extend(batch),
            _ => break,
        }
    }
    items
}

/// Expect silence on the channel for the whole window
async fn expect_no_items(events: &mut mpsc::Receiver<SourceBatch>, window: Duration) {
    let outcome = tokio::time::timeout(window, events.recv()).await;
    assert!(
        !matches!(outcome, Ok(Some(_))),
        "expected no delivery, got a batch"
    );
}

fn item_paths(items: &[ContentSourceItem]) -> Vec<PathBuf> {
    let mut paths: Vec<PathBuf> = items
        .iter()
        .map(|i| i.locator.to_file_path().unwrap())
        .collect();
    paths.sort();
    paths
}

#[tokio::test]
async fn test_start_emits_existing_files() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("one.csv"), b"a,b\n1,2\n").unwrap();
    std::fs::write(dir.path().join("two.csv"), b"a,b\n3,4\n").unwrap();

    let source = FileSystemContentSource::new();
    source.init(config(dir.path(), None)).await.unwrap();
    let mut events = source.take_events().await.unwrap();
    source.start().await.unwrap();

    let items = collect_items(&mut events, 2, Duration::from_secs(3)).await;
    assert_eq!(items.len(), 2);

    source.dispose().await;
}

#[tokio::test]
async fn test_new_file_is_delivered_after_debounce() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();

    let source = FileSystemContentSource::new();
    source.init(config(dir.path(), None)).await.unwrap();
    let mut events = source.take_events().await.unwrap();
    source.start().await.unwrap();

    std::fs::write(dir.path().join("late.csv"), b"a,b\n5,6\n").unwrap();

    let items = collect_items(&mut events, 1, Duration::from_secs(3)).await;
    assert_eq!(items.len(), 1);
    assert_eq!(
        items[0].locator.to_file_path().unwrap().file_name().unwrap(),
        "late.csv"
    );

    source.dispose().await;
}

#[tokio::test]
async fn test_filter_excludes_non_matching_files() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();

    let source = FileSystemContentSource::new();
    source.init(config(dir.path(), Some("*.csv"))).await.unwrap();
    let mut events = source.take_events().await.unwrap();
    source.start().await.unwrap();

    std::fs::write(dir.path().join("wanted.csv"), b"a\n").unwrap();
    std::fs::write(dir.path().join("ignored.txt"), b"nope").unwrap();

    let items = collect_items(&mut events, 1, Duration::from_secs(3)).await;
    assert_eq!(items.len(), 1);
    assert_eq!(
        items[0].locator.to_file_path().unwrap().file_name().unwrap(),
        "wanted.csv"
    );
    expect_no_items(&mut events, Duration::from_millis(500)).await;

    source.dispose().await;
}

#[tokio::test]
async fn test_pause_then_resume_delivers_each_item_exactly_once() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();

    let source = FileSystemContentSource::new();
    source.init(config(dir.path(), None)).await.unwrap();
    let mut events = source.take_events().await.unwrap();
    source.start().await.unwrap();
    source.pause().await.unwrap();

    for n in 0..3 {
        std::fs::write(dir.path().join(format!("while-paused-{}.csv", n)), b"a\n").unwrap();
    }

    // Nothing may be delivered while paused.
    expect_no_items(&mut events, Duration::from_millis(500)).await;

    source.resume().await.unwrap();

    let items = collect_items(&mut events, 3, Duration::from_secs(5)).await;
    let paths = item_paths(&items);
    assert_eq!(paths.len(), 3, "all items delivered after resume");
    let mut deduped = paths.clone();
    deduped.dedup();
    assert_eq!(deduped.len(), 3, "no duplicates");

    // And nothing further arrives for the same files.
    expect_no_items(&mut events, Duration::from_millis(500)).await;

    source.dispose().await;
}

#[tokio::test]
async fn test_read_round_trips_and_missing_file_is_not_found() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("data.csv"), b"x,y\n7,8\n").unwrap();

    let source = FileSystemContentSource::new();
    source.init(config(dir.path(), None)).await.unwrap();
    let mut events = source.take_events().await.unwrap();
    source.start().await.unwrap();

    let items = collect_items(&mut events, 1, Duration::from_secs(3)).await;
    assert_eq!(source.read(&items[0]).await.unwrap(), b"x,y\n7,8\n");

    std::fs::remove_file(dir.path().join("data.csv")).unwrap();
    let err = source.read(&items[0]).await.unwrap_err();
    assert!(matches!(err, FlowError::NotFound(_)));

    source.dispose().await;
}

#[tokio::test]
async fn test_archiving_same_named_items_disambiguates() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();

    let source = FileSystemContentSource::new();
    source.init(config(dir.path(), None)).await.unwrap();
    let mut events = source.take_events().await.unwrap();
    source.start().await.unwrap();

    std::fs::write(dir.path().join("report.csv"), b"first\n").unwrap();
    let first = collect_items(&mut events, 1, Duration::from_secs(3)).await;
    source.archive(&first[0]).await.unwrap();

    std::fs::write(dir.path().join("report.csv"), b"second\n").unwrap();
    let second = collect_items(&mut events, 1, Duration::from_secs(3)).await;
    source.archive(&second[0]).await.unwrap();

    let archive = dir.path().join(".archive");
    let mut names: Vec<String> = std::fs::read_dir(&archive)
        .unwrap()
        .flatten()
        .map(|e| e.file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    assert_eq!(names, vec!["report (1).csv", "report.csv"]);

    assert_eq!(
        std::fs::read(archive.join("report.csv")).unwrap(),
        b"first\n"
    );
    assert_eq!(
        std::fs::read(archive.join("report (1).csv")).unwrap(),
        b"second\n"
    );

    source.dispose().await;
}

#[tokio::test]
async fn test_output_writes_and_overwrites_artifacts() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();

    let source = FileSystemContentSource::new();
    source.init(config(dir.path(), None)).await.unwrap();

    source.output("merged.csv", b"v1").await.unwrap();
    source.output("merged.csv", b"v2").await.unwrap();

    let artifact = dir.path().join(".output").join("merged.csv");
    assert_eq!(std::fs::read(&artifact).unwrap(), b"v2");

    source.dispose().await;
}

#[tokio::test]
async fn test_identity_is_deterministic_per_configuration() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();

    let a = FileSystemContentSource::new();
    a.init(config(dir.path(), Some("*.csv"))).await.unwrap();
    let b = FileSystemContentSource::new();
    b.init(config(dir.path(), Some("*.csv"))).await.unwrap();
    let c = FileSystemContentSource::new();
    c.init(config(dir.path(), Some("*.txt"))).await.unwrap();

    assert_eq!(a.identity().await.unwrap(), b.identity().await.unwrap());
    assert_ne!(a.identity().await.unwrap(), c.identity().await.unwrap());

    a.dispose().await;
    b.dispose().await;
    c.dispose().await;
}

#[tokio::test]
async fn test_lifecycle_faults() {
    init_tracing();
    let dir = tempfile::tempdir().unwrap();

    let source = FileSystemContentSource::new();

    // Start before init is a programming-error fault.
    assert!(matches!(
        source.start().await,
        Err(FlowError::Lifecycle(_))
    ));

    source.init(config(dir.path(), None)).await.unwrap();

    // Resume without pause is out of order too.
    source.start().await.unwrap();
    assert!(matches!(
        source.resume().await,
        Err(FlowError::Lifecycle(_))
    ));

    source.dispose().await;
}

#[tokio::test]
async fn test_init_with_missing_directory_is_a_configuration_error() {
    init_tracing();
    let source = FileSystemContentSource::new();
    let mut map = HashMap::new();
    map.insert("path".to_string(), "/definitely/not/here".to_string());

    assert!(matches!(
        source.init(map).await,
        Err(FlowError::Configuration(_))
    ));
}
