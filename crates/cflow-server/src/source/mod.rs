//! Content source contract and shared base behavior
//!
//! A content source watches one external location (a directory, an FTP
//! endpoint) and emits batches of discovered items over a channel. Each
//! source owns its own notification mechanism and runs independently of the
//! others; the single consumer of a source's channel sees batches in emission
//! order, with insertion order preserved inside each batch.
//!
//! Implementations compose a [`SourceCore`], which carries the pieces every
//! source needs: the declared configuration table, the resolved parameters,
//! the lifecycle state machine, and the event channel. The core closes the
//! channel before the underlying watch/poll mechanism is torn down, so a
//! consumer never sees an event from a disposed source.

pub mod config;
pub mod filesystem;
pub mod ftp;
pub mod registry;

pub use config::{ConfigItem, ConfigType, SourceParams};
pub use filesystem::FileSystemContentSource;
pub use ftp::FtpContentSource;
pub use registry::SourceRegistry;

use async_trait::async_trait;
use cflow_common::{FlowError, Result};
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use tokio::sync::{mpsc, Mutex, RwLock};
use tracing::debug;
use url::Url;

/// How many undelivered batches a source buffers before emission backpressures
const EVENT_QUEUE_DEPTH: usize = 64;

/// One batch of items observed together
pub type SourceBatch = Vec<ContentSourceItem>;

/// One discoverable unit (a file, a remote listing entry) at the moment it
/// was seen
///
/// Value type: equality is on `(observed_at, locator)`. Items are never
/// mutated; a re-observed resource yields a fresh instance.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentSourceItem {
    pub observed_at: DateTime<Utc>,
    pub locator: Url,
}

impl ContentSourceItem {
    pub fn new(observed_at: DateTime<Utc>, locator: Url) -> Self {
        Self { observed_at, locator }
    }
}

/// Source lifecycle states
///
/// `Created → Initialized → Running ⇄ Paused → Disposed`. `Disposed` is
/// terminal and reachable from any state. Operations called out of order are
/// faults, not recoverable conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifecycle {
    Created,
    Initialized,
    Running,
    Paused,
    Disposed,
}

impl std::fmt::Display for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Lifecycle::Created => "created",
            Lifecycle::Initialized => "initialized",
            Lifecycle::Running => "running",
            Lifecycle::Paused => "paused",
            Lifecycle::Disposed => "disposed",
        };
        write!(f, "{}", name)
    }
}

/// Contract every content source implements
#[async_trait]
pub trait ContentSource: Send + Sync {
    /// Short implementation name, e.g. `"FileSystem"`
    fn kind(&self) -> &'static str;

    /// Static description of accepted configuration
    fn config_items(&self) -> &'static [ConfigItem];

    /// Validate and store configuration; `Created → Initialized`
    ///
    /// Fails with a configuration error if a required item is absent or a
    /// typed value is unconvertible, applying nothing in that case.
    async fn init(&self, parameters: HashMap<String, String>) -> Result<()>;

    /// Begin watching/polling; `Initialized → Running`
    async fn start(&self) -> Result<()>;

    /// Suspend delivery; no further change events until [`resume`](Self::resume)
    async fn pause(&self) -> Result<()>;

    /// Continue delivery, re-evaluating current state so nothing observed
    /// while paused is silently missed
    async fn resume(&self) -> Result<()>;

    /// Fetch raw content for a previously observed item
    ///
    /// Fails with the not-found error if the underlying resource vanished.
    async fn read(&self, item: &ContentSourceItem) -> Result<Vec<u8>>;

    /// Move a consumed item out of the discoverable set
    async fn archive(&self, item: &ContentSourceItem) -> Result<()>;

    /// Deposit a derived artifact back at the source
    async fn output(&self, name: &str, bytes: &[u8]) -> Result<()>;

    /// Deterministic identity string derived from the resolved configuration
    ///
    /// Used as the dedup/lookup key for bindings; distinct configurations
    /// must yield distinct identities.
    async fn identity(&self) -> Result<String>;

    /// Take the change-event receiver
    ///
    /// There is exactly one receiver per source instance; the first caller
    /// gets it, later callers get `None`.
    async fn take_events(&self) -> Option<mpsc::Receiver<SourceBatch>>;

    /// Release all underlying resources; terminal
    ///
    /// The event channel is closed before the watch/poll mechanism is torn
    /// down, so no events fire afterwards. Safe to call from any state,
    /// including while a notification is in flight.
    async fn dispose(&self);
}

/// Shared base behavior composed into each source implementation
pub(crate) struct SourceCore {
    declared: &'static [ConfigItem],
    state: Mutex<Lifecycle>,
    params: RwLock<Option<SourceParams>>,
    events_tx: Mutex<Option<mpsc::Sender<SourceBatch>>>,
    events_rx: Mutex<Option<mpsc::Receiver<SourceBatch>>>,
}

impl SourceCore {
    pub fn new(declared: &'static [ConfigItem]) -> Self {
        let (tx, rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
        Self {
            declared,
            state: Mutex::new(Lifecycle::Created),
            params: RwLock::new(None),
            events_tx: Mutex::new(Some(tx)),
            events_rx: Mutex::new(Some(rx)),
        }
    }

    pub fn declared(&self) -> &'static [ConfigItem] {
        self.declared
    }

    pub async fn state(&self) -> Lifecycle {
        *self.state.lock().await
    }

    /// Resolve and store parameters; `Created → Initialized`
    pub async fn init(&self, supplied: &HashMap<String, String>) -> Result<SourceParams> {
        let mut state = self.state.lock().await;
        if *state != Lifecycle::Created {
            return Err(FlowError::Lifecycle(format!(
                "init called on a {} source",
                state
            )));
        }
        let params = SourceParams::resolve(self.declared, supplied)?;
        *self.params.write().await = Some(params.clone());
        *state = Lifecycle::Initialized;
        Ok(params)
    }

    /// The resolved parameters; fails before init
    pub async fn params(&self) -> Result<SourceParams> {
        self.params
            .read()
            .await
            .clone()
            .ok_or_else(|| FlowError::Lifecycle("source is not initialized".to_string()))
    }

    /// Move to `to` if the current state is one of `from`
    pub async fn transition(&self, from: &[Lifecycle], to: Lifecycle) -> Result<()> {
        let mut state = self.state.lock().await;
        if !from.contains(&state) {
            return Err(FlowError::Lifecycle(format!(
                "cannot move from {} to {}",
                state, to
            )));
        }
        *state = to;
        Ok(())
    }

    /// Emit one batch to the consumer, reporting whether it was delivered
    ///
    /// Empty batches are suppressed. Nothing is delivered unless the source
    /// is running; the state lock is held across the send, so once `pause`
    /// returns no batch can slip out behind it. A caller that gets `false`
    /// back still owns the items and may re-offer them later.
    pub async fn emit(&self, batch: SourceBatch) -> bool {
        if batch.is_empty() {
            return true;
        }
        let state = self.state.lock().await;
        if *state != Lifecycle::Running {
            debug!(items = batch.len(), "batch held back while not running");
            return false;
        }
        let tx = self.events_tx.lock().await.clone();
        match tx {
            Some(tx) => {
                let sent = tx.send(batch).await.is_ok();
                if !sent {
                    debug!("event consumer went away, batch dropped");
                }
                sent
            },
            None => false,
        }
    }

    pub async fn take_events(&self) -> Option<mpsc::Receiver<SourceBatch>> {
        self.events_rx.lock().await.take()
    }

    /// Close the channel and mark the source disposed
    ///
    /// Call before tearing down the underlying watcher/client so the
    /// consumer never observes an event from a disposed source.
    pub async fn dispose(&self) {
        *self.state.lock().await = Lifecycle::Disposed;
        *self.events_tx.lock().await = None;
        *self.events_rx.lock().await = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ITEMS: &[ConfigItem] =
        &[ConfigItem::required("path", "Directory to watch", ConfigType::String)];

    fn params(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn item(url: &str) -> ContentSourceItem {
        ContentSourceItem::new(Utc::now(), Url::parse(url).unwrap())
    }

    #[tokio::test]
    async fn test_init_moves_created_to_initialized() {
        let core = SourceCore::new(ITEMS);
        assert_eq!(core.state().await, Lifecycle::Created);

        core.init(&params(&[("path", "/data/in")])).await.unwrap();
        assert_eq!(core.state().await, Lifecycle::Initialized);
    }

    #[tokio::test]
    async fn test_init_twice_is_a_fault() {
        let core = SourceCore::new(ITEMS);
        core.init(&params(&[("path", "/data/in")])).await.unwrap();

        let err = core.init(&params(&[("path", "/data/in")])).await.unwrap_err();
        assert!(matches!(err, FlowError::Lifecycle(_)));
    }

    #[tokio::test]
    async fn test_start_before_init_is_a_fault() {
        let core = SourceCore::new(ITEMS);
        let err = core
            .transition(&[Lifecycle::Initialized], Lifecycle::Running)
            .await
            .unwrap_err();
        assert!(matches!(err, FlowError::Lifecycle(_)));
    }

    #[tokio::test]
    async fn test_emit_requires_running_state() {
        let core = SourceCore::new(ITEMS);
        core.init(&params(&[("path", "/data/in")])).await.unwrap();
        let mut rx = core.take_events().await.unwrap();

        // Not running yet: batch held back, ownership stays with the caller.
        assert!(!core.emit(vec![item("file:///data/in/a.csv")]).await);

        core.transition(&[Lifecycle::Initialized], Lifecycle::Running)
            .await
            .unwrap();
        assert!(core.emit(vec![item("file:///data/in/b.csv")]).await);

        let batch = rx.recv().await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].locator.path(), "/data/in/b.csv");
    }

    #[tokio::test]
    async fn test_no_events_after_dispose() {
        let core = SourceCore::new(ITEMS);
        core.init(&params(&[("path", "/data/in")])).await.unwrap();
        core.transition(&[Lifecycle::Initialized], Lifecycle::Running)
            .await
            .unwrap();
        let mut rx = core.take_events().await.unwrap();

        core.dispose().await;
        assert!(!core.emit(vec![item("file:///data/in/late.csv")]).await);

        // Channel closed with nothing buffered.
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_events_receiver_taken_once() {
        let core = SourceCore::new(ITEMS);
        assert!(core.take_events().await.is_some());
        assert!(core.take_events().await.is_none());
    }
}
