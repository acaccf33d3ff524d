//! Directory-watching content source
//!
//! Watches one directory, non-recursively, for newly arriving files. Change
//! detection is a short-interval poll scan driven by a dedicated task rather
//! than OS notifications: creation events are an unreliable signal that a
//! file is fully written, and inotify-style watchers misbehave on network
//! filesystems, so every sighting goes through a debounce ledger before it is
//! delivered.
//!
//! A newly sighted file is parked for a short debounce window. At expiry it
//! must be size/mtime-stable and openable for writing; a file still being
//! written is re-armed with a longer delay, a bounded number of times, and
//! then abandoned with a warning. Only files that settle are emitted.
//!
//! Consumed files are moved into the `.archive` subdirectory; derived
//! artifacts land in `.output`. Both live under the watched path but are
//! invisible to the scan, which looks at plain files only.

use async_trait::async_trait;
use cflow_common::{FlowError, Result};
use chrono::Utc;
use glob::Pattern;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use super::{
    ConfigItem, ConfigType, ContentSource, ContentSourceItem, Lifecycle, SourceBatch, SourceCore,
    SourceParams,
};

pub const PATH_CONFIG: &str = "path";
pub const FILTER_CONFIG: &str = "filter";

const DEFAULT_FILTER: &str = "*.*";

/// Subdirectory consumed items are moved into
pub const ARCHIVE_SUBDIR: &str = ".archive";
/// Subdirectory derived artifacts are written into
pub const OUTPUT_SUBDIR: &str = ".output";

/// How often the watched directory is scanned
const SCAN_INTERVAL: Duration = Duration::from_millis(50);
/// Quiet period between first sighting and the first stability probe
const DEBOUNCE: Duration = Duration::from_millis(50);
/// Re-arm delay for a file that is still being written
const STABILITY_RETRY_DELAY: Duration = Duration::from_secs(1);
/// Stability probes before a file is abandoned as stalled
const MAX_STABILITY_RETRIES: u32 = 10;

const CONFIG: &[ConfigItem] = &[
    ConfigItem::required(PATH_CONFIG, "Directory to watch for content", ConfigType::String),
    ConfigItem::optional(FILTER_CONFIG, "Filename filter glob", ConfigType::String),
];

/// Configuration resolved at init
struct Resolved {
    path: PathBuf,
    filter: Pattern,
    filter_text: String,
    archive_dir: PathBuf,
    output_dir: PathBuf,
}

/// Content source that watches one directory for arriving files
pub struct FileSystemContentSource {
    core: Arc<SourceCore>,
    resolved: RwLock<Option<Arc<Resolved>>>,
    paused: watch::Sender<bool>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FileSystemContentSource {
    pub const KIND: &'static str = "FileSystem";

    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            core: Arc::new(SourceCore::new(CONFIG)),
            resolved: RwLock::new(None),
            paused,
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    async fn resolved(&self) -> Result<Arc<Resolved>> {
        self.resolved
            .read()
            .await
            .clone()
            .ok_or_else(|| FlowError::Lifecycle("source is not initialized".to_string()))
    }

    fn item_path(item: &ContentSourceItem) -> Result<PathBuf> {
        item.locator
            .to_file_path()
            .map_err(|_| FlowError::NotFound(format!("not a file locator: {}", item.locator)))
    }
}

impl Default for FileSystemContentSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentSource for FileSystemContentSource {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn config_items(&self) -> &'static [ConfigItem] {
        CONFIG
    }

    async fn init(&self, parameters: HashMap<String, String>) -> Result<()> {
        let params = self.core.init(&parameters).await?;
        let resolved = resolve(&params)?;

        std::fs::create_dir_all(&resolved.archive_dir)?;
        std::fs::create_dir_all(&resolved.output_dir)?;

        *self.resolved.write().await = Some(Arc::new(resolved));
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        let resolved = self.resolved().await?;
        self.core
            .transition(&[Lifecycle::Initialized], Lifecycle::Running)
            .await?;

        let core = Arc::clone(&self.core);
        let paused_rx = self.paused.subscribe();
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            watch_loop(core, resolved, paused_rx, cancel).await;
        });
        *self.task.lock().await = Some(handle);
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        self.core
            .transition(&[Lifecycle::Running], Lifecycle::Paused)
            .await?;
        self.paused.send_replace(true);
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        self.core
            .transition(&[Lifecycle::Paused], Lifecycle::Running)
            .await?;
        // The next scan re-evaluates the whole directory, so files that
        // arrived while paused are picked up.
        self.paused.send_replace(false);
        Ok(())
    }

    async fn read(&self, item: &ContentSourceItem) -> Result<Vec<u8>> {
        let path = Self::item_path(item)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FlowError::NotFound(format!("file vanished: {}", path.display())))
            },
            Err(e) => Err(e.into()),
        }
    }

    async fn archive(&self, item: &ContentSourceItem) -> Result<()> {
        let resolved = self.resolved().await?;
        let path = Self::item_path(item)?;
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| FlowError::NotFound(format!("no file name in {}", path.display())))?;

        let target = disambiguated_target(&resolved.archive_dir, name)?;
        match tokio::fs::rename(&path, &target).await {
            Ok(()) => {
                debug!(from = %path.display(), to = %target.display(), "archived item");
                Ok(())
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(FlowError::NotFound(format!("file vanished: {}", path.display())))
            },
            Err(e) => Err(e.into()),
        }
    }

    async fn output(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let resolved = self.resolved().await?;
        tokio::fs::create_dir_all(&resolved.output_dir).await?;
        let target = resolved.output_dir.join(name);
        tokio::fs::write(&target, bytes).await?;
        debug!(path = %target.display(), size = bytes.len(), "artifact written");
        Ok(())
    }

    async fn identity(&self) -> Result<String> {
        let resolved = self.resolved().await?;
        Ok(format!(
            "{}|{}|{}",
            Self::KIND,
            resolved.path.display(),
            resolved.filter_text
        ))
    }

    async fn take_events(&self) -> Option<tokio::sync::mpsc::Receiver<SourceBatch>> {
        self.core.take_events().await
    }

    async fn dispose(&self) {
        // Close the channel first so the consumer never sees an event from a
        // disposed source, then stop the scan task.
        self.core.dispose().await;
        self.cancel.cancel();
        self.paused.send_replace(false);
        if let Some(handle) = self.task.lock().await.take() {
            let _ = handle.await;
        }
    }
}

fn resolve(params: &SourceParams) -> Result<Resolved> {
    let raw_path = params.string(PATH_CONFIG)?;
    let path = PathBuf::from(&raw_path).canonicalize().map_err(|e| {
        FlowError::Configuration(format!("watch path '{}' is not usable: {}", raw_path, e))
    })?;

    let mut filter_text = params.string(FILTER_CONFIG)?;
    if filter_text.is_empty() {
        filter_text = DEFAULT_FILTER.to_string();
    }
    let filter = Pattern::new(&filter_text).map_err(|e| {
        FlowError::Configuration(format!("filter '{}' is not a valid glob: {}", filter_text, e))
    })?;

    Ok(Resolved {
        archive_dir: path.join(ARCHIVE_SUBDIR),
        output_dir: path.join(OUTPUT_SUBDIR),
        path,
        filter,
        filter_text,
    })
}

/// Pick an archive target, disambiguating name collisions
///
/// The counter is derived from the files already present, not from stored
/// state, so independent processors archiving into the same directory cannot
/// hand out the same number twice and then both rename onto it.
fn disambiguated_target(archive_dir: &Path, name: &str) -> Result<PathBuf> {
    let plain = archive_dir.join(name);
    if !plain.exists() {
        return Ok(plain);
    }

    let (stem, ext) = split_name(name);
    let mut n = std::fs::read_dir(archive_dir)?
        .flatten()
        .filter(|e| {
            e.file_name()
                .to_str()
                .map(|existing| shares_base_name(existing, stem, ext))
                .unwrap_or(false)
        })
        .count();

    loop {
        let candidate = match ext {
            Some(ext) => archive_dir.join(format!("{} ({}).{}", stem, n, ext)),
            None => archive_dir.join(format!("{} ({})", stem, n)),
        };
        if !candidate.exists() {
            return Ok(candidate);
        }
        n += 1;
    }
}

fn split_name(name: &str) -> (&str, Option<&str>) {
    match name.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
        _ => (name, None),
    }
}

fn shares_base_name(existing: &str, stem: &str, ext: Option<&str>) -> bool {
    let (e_stem, e_ext) = split_name(existing);
    if e_ext != ext {
        return false;
    }
    e_stem == stem || (e_stem.starts_with(stem) && e_stem[stem.len()..].starts_with(" ("))
}

/// One file waiting out its debounce window
struct PendingFile {
    size: u64,
    modified: Option<SystemTime>,
    deadline: Instant,
    retries: u32,
}

/// Bookkeeping for the scan loop
///
/// `pending` holds files sighted but not yet stable; `seen` holds files
/// already delivered (or abandoned) that are still present in the directory.
/// A file leaves `seen` when it leaves the directory, so a same-named
/// newcomer is treated as a fresh arrival.
#[derive(Default)]
struct WatchLedger {
    pending: BTreeMap<PathBuf, PendingFile>,
    seen: HashSet<PathBuf>,
}

impl WatchLedger {
    /// Record paths as delivered; they stay muted until they leave the
    /// directory
    fn mark_seen(&mut self, paths: Vec<PathBuf>) {
        self.seen.extend(paths);
    }

    /// Scan the directory and collect every path whose debounce has settled
    ///
    /// Settled paths are removed from `pending` but NOT recorded as seen;
    /// that happens only once the batch is actually delivered, so a batch
    /// held back by a pause is rediscovered instead of lost.
    fn observe(&mut self, resolved: &Resolved) -> Vec<PathBuf> {
        let now = Instant::now();
        let mut present = HashSet::new();

        let entries = match std::fs::read_dir(&resolved.path) {
            Ok(entries) => entries,
            Err(e) => {
                warn!(path = %resolved.path.display(), error = %e, "watch scan failed");
                return Vec::new();
            },
        };

        for entry in entries.flatten() {
            let path = entry.path();
            let meta = match entry.metadata() {
                Ok(meta) if meta.is_file() => meta,
                _ => continue,
            };
            let matches = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| resolved.filter.matches(n))
                .unwrap_or(false);
            if !matches {
                continue;
            }

            present.insert(path.clone());
            if self.seen.contains(&path) || self.pending.contains_key(&path) {
                continue;
            }
            self.pending.insert(
                path,
                PendingFile {
                    size: meta.len(),
                    modified: meta.modified().ok(),
                    deadline: now + DEBOUNCE,
                    retries: 0,
                },
            );
        }

        // Files that left the directory (archived, deleted) are forgotten so
        // a later same-named arrival is a fresh item.
        self.seen.retain(|p| present.contains(p));
        self.pending.retain(|p, _| present.contains(p));

        let due: Vec<PathBuf> = self
            .pending
            .iter()
            .filter(|(_, e)| e.deadline <= now)
            .map(|(p, _)| p.clone())
            .collect();

        let mut ready = Vec::new();
        for path in due {
            let Some(entry) = self.pending.get_mut(&path) else {
                continue;
            };
            if file_settled(&path, entry) {
                self.pending.remove(&path);
                ready.push(path);
            } else if entry.retries >= MAX_STABILITY_RETRIES {
                warn!(
                    path = %path.display(),
                    retries = entry.retries,
                    "file never settled, abandoning"
                );
                // Treated as consumed until it leaves the directory, so a
                // stalled writer cannot spin the scan forever.
                self.pending.remove(&path);
                self.seen.insert(path);
            } else {
                entry.retries += 1;
                entry.deadline = now + STABILITY_RETRY_DELAY;
            }
        }

        ready
    }
}

/// Whether the file stopped changing and is no longer held by a writer
fn file_settled(path: &Path, entry: &mut PendingFile) -> bool {
    let meta = match std::fs::metadata(path) {
        Ok(meta) => meta,
        Err(_) => return false,
    };
    let modified = meta.modified().ok();
    if meta.len() != entry.size || modified != entry.modified {
        entry.size = meta.len();
        entry.modified = modified;
        return false;
    }
    // On platforms with mandatory locks an in-progress writer rejects this.
    OpenOptions::new().write(true).open(path).is_ok()
}

async fn watch_loop(
    core: Arc<SourceCore>,
    resolved: Arc<Resolved>,
    mut paused: watch::Receiver<bool>,
    cancel: CancellationToken,
) {
    let mut ledger = WatchLedger::default();
    let mut tick = tokio::time::interval(SCAN_INTERVAL);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tick.tick() => {},
        }

        // Park while paused; no scanning, no delivery.
        while *paused.borrow() {
            tokio::select! {
                _ = cancel.cancelled() => return,
                changed = paused.changed() => {
                    if changed.is_err() {
                        return;
                    }
                },
            }
        }

        let ready = ledger.observe(&resolved);
        if ready.is_empty() {
            continue;
        }

        let observed_at = Utc::now();
        let mut batch = Vec::with_capacity(ready.len());
        let mut delivered = Vec::with_capacity(ready.len());
        for path in ready {
            match Url::from_file_path(&path) {
                Ok(locator) => {
                    batch.push(ContentSourceItem::new(observed_at, locator));
                    delivered.push(path);
                },
                Err(()) => {
                    warn!(path = %path.display(), "path has no file URL, skipping");
                    ledger.mark_seen(vec![path]);
                },
            }
        }

        if core.emit(batch).await {
            ledger.mark_seen(delivered);
        }
        // A held-back batch stays unmarked; the next scan after resume
        // rediscovers the files.
    }

    debug!(path = %resolved.path.display(), "watch loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_name() {
        assert_eq!(split_name("report.csv"), ("report", Some("csv")));
        assert_eq!(split_name("archive.tar.gz"), ("archive.tar", Some("gz")));
        assert_eq!(split_name("README"), ("README", None));
        assert_eq!(split_name(".hidden"), (".hidden", None));
    }

    #[test]
    fn test_shares_base_name() {
        assert!(shares_base_name("report.csv", "report", Some("csv")));
        assert!(shares_base_name("report (1).csv", "report", Some("csv")));
        assert!(!shares_base_name("report.csv", "report", Some("txt")));
        assert!(!shares_base_name("reporting.csv", "report", Some("csv")));
    }

    #[test]
    fn test_disambiguated_target_counts_existing_files() {
        let dir = tempfile::tempdir().unwrap();
        let archive = dir.path();

        assert_eq!(
            disambiguated_target(archive, "a.txt").unwrap(),
            archive.join("a.txt")
        );

        std::fs::write(archive.join("a.txt"), b"first").unwrap();
        assert_eq!(
            disambiguated_target(archive, "a.txt").unwrap(),
            archive.join("a (1).txt")
        );

        std::fs::write(archive.join("a (1).txt"), b"second").unwrap();
        assert_eq!(
            disambiguated_target(archive, "a.txt").unwrap(),
            archive.join("a (2).txt")
        );
    }

    #[test]
    fn test_default_filter_matches_dotted_names() {
        let pattern = Pattern::new(DEFAULT_FILTER).unwrap();
        assert!(pattern.matches("invoice.csv"));
        assert!(!pattern.matches("nodot"));
    }
}
