//! FTP-polling content source
//!
//! Keeps one control connection to the configured endpoint and polls its
//! listing from a dedicated long-running task. Each cycle checks for
//! cancellation, waits out the pause gate, lists the remote directory, emits
//! a batch built from file-type entries, and sleeps for the configured
//! interval.
//!
//! Listing failures are transient: the client is dropped and the next cycle
//! reconnects, so a network hiccup costs one poll, never the source. All
//! client calls are blocking `suppaftp` operations and run on the blocking
//! pool.
//!
//! `read` and `archive` are deliberately unsupported; the remote side of this
//! deployment only ever feeds content in. `output` uploads artifacts with
//! STOR so transform results can be delivered back to the endpoint.

use async_trait::async_trait;
use cflow_common::{FlowError, Result};
use chrono::Utc;
use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use suppaftp::FtpStream;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};
use url::Url;

use super::{
    ConfigItem, ConfigType, ContentSource, ContentSourceItem, Lifecycle, SourceBatch, SourceCore,
    SourceParams,
};

pub const HOST_CONFIG: &str = "host";
pub const USERNAME_CONFIG: &str = "username";
pub const PASSWORD_CONFIG: &str = "password";
pub const INTERVAL_CONFIG: &str = "interval";

const DEFAULT_PORT: u16 = 21;
const DEFAULT_INTERVAL_SECS: i64 = 10;
const ANONYMOUS_USER: &str = "anonymous";
const ANONYMOUS_PASSWORD: &str = "anonymous";

const CONFIG: &[ConfigItem] = &[
    ConfigItem::required(HOST_CONFIG, "Host address", ConfigType::String),
    ConfigItem::optional(USERNAME_CONFIG, "Username", ConfigType::String),
    ConfigItem::optional(PASSWORD_CONFIG, "Password", ConfigType::String),
    ConfigItem::optional(
        INTERVAL_CONFIG,
        "Interval in seconds between listing polls",
        ConfigType::Integer,
    ),
];

/// Connection settings resolved at init
struct FtpSettings {
    host: String,
    port: u16,
    username: String,
    password: String,
    authenticated: bool,
    interval: Duration,
}

type SharedClient = Arc<StdMutex<Option<FtpStream>>>;

/// Content source that polls an FTP listing on an interval
pub struct FtpContentSource {
    core: Arc<SourceCore>,
    settings: RwLock<Option<Arc<FtpSettings>>>,
    client: SharedClient,
    paused: watch::Sender<bool>,
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl FtpContentSource {
    pub const KIND: &'static str = "Ftp";

    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            core: Arc::new(SourceCore::new(CONFIG)),
            settings: RwLock::new(None),
            client: Arc::new(StdMutex::new(None)),
            paused,
            cancel: CancellationToken::new(),
            task: Mutex::new(None),
        }
    }

    async fn settings(&self) -> Result<Arc<FtpSettings>> {
        self.settings
            .read()
            .await
            .clone()
            .ok_or_else(|| FlowError::Lifecycle("source is not initialized".to_string()))
    }
}

impl Default for FtpContentSource {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ContentSource for FtpContentSource {
    fn kind(&self) -> &'static str {
        Self::KIND
    }

    fn config_items(&self) -> &'static [ConfigItem] {
        CONFIG
    }

    async fn init(&self, parameters: HashMap<String, String>) -> Result<()> {
        let params = self.core.init(&parameters).await?;
        let settings = Arc::new(resolve(&params)?);

        // Establish the control connection up front so a bad endpoint fails
        // at init instead of on the first poll.
        let client = Arc::clone(&self.client);
        let connect_to = Arc::clone(&settings);
        tokio::task::spawn_blocking(move || -> Result<()> {
            let stream = connect(&connect_to)?;
            *lock_client(&client) = Some(stream);
            Ok(())
        })
        .await
        .map_err(|e| FlowError::TransientIo(format!("FTP connect task panicked: {}", e)))??;

        *self.settings.write().await = Some(settings);
        Ok(())
    }

    async fn start(&self) -> Result<()> {
        let settings = self.settings().await?;
        self.core
            .transition(&[Lifecycle::Initialized], Lifecycle::Running)
            .await?;

        let core = Arc::clone(&self.core);
        let client = Arc::clone(&self.client);
        let paused_rx = self.paused.subscribe();
        let cancel = self.cancel.clone();
        let handle = tokio::spawn(async move {
            poll_loop(core, settings, client, paused_rx, cancel).await;
        });
        *self.task.lock().await = Some(handle);
        Ok(())
    }

    async fn pause(&self) -> Result<()> {
        self.core
            .transition(&[Lifecycle::Running], Lifecycle::Paused)
            .await?;
        // Polling stalls at the gate; the connection stays open.
        self.paused.send_replace(true);
        Ok(())
    }

    async fn resume(&self) -> Result<()> {
        self.core
            .transition(&[Lifecycle::Paused], Lifecycle::Running)
            .await?;
        self.paused.send_replace(false);
        Ok(())
    }

    async fn read(&self, _item: &ContentSourceItem) -> Result<Vec<u8>> {
        Err(FlowError::NotSupported(
            "the FTP source does not implement read".to_string(),
        ))
    }

    async fn archive(&self, _item: &ContentSourceItem) -> Result<()> {
        Err(FlowError::NotSupported(
            "the FTP source does not implement archive".to_string(),
        ))
    }

    async fn output(&self, name: &str, bytes: &[u8]) -> Result<()> {
        let settings = self.settings().await?;
        let client = Arc::clone(&self.client);
        let name = name.to_string();
        let bytes = bytes.to_vec();

        tokio::task::spawn_blocking(move || -> Result<()> {
            let mut guard = lock_client(&client);
            if guard.is_none() {
                *guard = Some(connect(&settings)?);
            }
            let stream = guard
                .as_mut()
                .ok_or_else(|| FlowError::TransientIo("FTP client unavailable".to_string()))?;
            match stream.put_file(&name, &mut Cursor::new(bytes)) {
                Ok(written) => {
                    debug!(name = %name, size = written, "artifact uploaded");
                    Ok(())
                },
                Err(e) => {
                    *guard = None;
                    Err(FlowError::TransientIo(format!("FTP upload failed: {}", e)))
                },
            }
        })
        .await
        .map_err(|e| FlowError::TransientIo(format!("FTP upload task panicked: {}", e)))?
    }

    async fn identity(&self) -> Result<String> {
        let settings = self.settings().await?;
        let username = if settings.authenticated {
            settings.username.as_str()
        } else {
            ""
        };
        Ok(format!("{}|{}|{}", Self::KIND, settings.host, username))
    }

    async fn take_events(&self) -> Option<tokio::sync::mpsc::Receiver<SourceBatch>> {
        self.core.take_events().await
    }

    async fn dispose(&self) {
        self.core.dispose().await;
        self.cancel.cancel();
        // Release the gate so a parked poll loop can observe cancellation.
        self.paused.send_replace(false);
        if let Some(handle) = self.task.lock().await.take() {
            let _ = handle.await;
        }

        let client = Arc::clone(&self.client);
        let _ = tokio::task::spawn_blocking(move || {
            if let Some(mut stream) = lock_client(&client).take() {
                if let Err(e) = stream.quit() {
                    warn!(error = %e, "FTP session did not quit cleanly");
                }
            }
        })
        .await;
    }
}

/// Lock the shared client, recovering the inner state from a poisoned lock
fn lock_client(client: &SharedClient) -> std::sync::MutexGuard<'_, Option<FtpStream>> {
    client.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

fn resolve(params: &SourceParams) -> Result<FtpSettings> {
    let raw_host = params.string(HOST_CONFIG)?;
    let (host, port) = match raw_host.rsplit_once(':') {
        Some((host, port)) => {
            let port = port.parse::<u16>().map_err(|_| {
                FlowError::Configuration(format!("host '{}' has an invalid port", raw_host))
            })?;
            (host.to_string(), port)
        },
        None => (raw_host, DEFAULT_PORT),
    };
    if host.is_empty() {
        return Err(FlowError::Configuration("host must not be empty".to_string()));
    }

    let username = params.string(USERNAME_CONFIG)?;
    let password = params.string(PASSWORD_CONFIG)?;
    if username.is_empty() != password.is_empty() {
        return Err(FlowError::Configuration(
            "username and password are required together".to_string(),
        ));
    }
    let authenticated = !username.is_empty();

    let interval_secs = match params.integer(INTERVAL_CONFIG)? {
        0 => DEFAULT_INTERVAL_SECS,
        secs if secs > 0 => secs,
        secs => {
            return Err(FlowError::Configuration(format!(
                "interval must be positive, got {}",
                secs
            )))
        },
    };

    Ok(FtpSettings {
        host,
        port,
        username: if authenticated { username } else { ANONYMOUS_USER.to_string() },
        password: if authenticated { password } else { ANONYMOUS_PASSWORD.to_string() },
        authenticated,
        interval: Duration::from_secs(interval_secs as u64),
    })
}

/// Open, login, and switch to binary mode
fn connect(settings: &FtpSettings) -> Result<FtpStream> {
    let address = format!("{}:{}", settings.host, settings.port);
    debug!(address = %address, "connecting to FTP server");

    let mut stream = FtpStream::connect(&address)
        .map_err(|e| FlowError::TransientIo(format!("FTP connect to {} failed: {}", address, e)))?;

    // Extended Passive Mode - better for NAT/Docker environments.
    stream.set_mode(suppaftp::Mode::ExtendedPassive);

    stream
        .login(&settings.username, &settings.password)
        .map_err(|e| FlowError::TransientIo(format!("FTP login failed: {}", e)))?;

    stream
        .transfer_type(suppaftp::types::FileType::Binary)
        .map_err(|e| FlowError::TransientIo(format!("failed to set binary mode: {}", e)))?;

    Ok(stream)
}

/// List the remote directory, building items for file entries only
async fn list_items(settings: Arc<FtpSettings>, client: SharedClient) -> Result<SourceBatch> {
    tokio::task::spawn_blocking(move || -> Result<SourceBatch> {
        let mut guard = lock_client(&client);
        if guard.is_none() {
            *guard = Some(connect(&settings)?);
        }
        let stream = guard
            .as_mut()
            .ok_or_else(|| FlowError::TransientIo("FTP client unavailable".to_string()))?;

        let lines = match stream.list(None) {
            Ok(lines) => lines,
            Err(e) => {
                // Drop the client so the next cycle reconnects.
                *guard = None;
                return Err(FlowError::TransientIo(format!("FTP listing failed: {}", e)));
            },
        };

        let observed_at = Utc::now();
        let mut items = Vec::new();
        for entry in lines.iter().filter_map(|line| FtpEntry::parse(line)) {
            if entry.is_directory {
                continue;
            }
            let locator = format!(
                "ftp://{}:{}/{}",
                settings.host, settings.port, entry.name
            );
            match Url::parse(&locator) {
                Ok(url) => items.push(ContentSourceItem::new(observed_at, url)),
                Err(e) => warn!(locator = %locator, error = %e, "skipping unparsable entry"),
            }
        }
        Ok(items)
    })
    .await
    .map_err(|e| FlowError::TransientIo(format!("FTP LIST task panicked: {}", e)))?
}

async fn poll_loop(
    core: Arc<SourceCore>,
    settings: Arc<FtpSettings>,
    client: SharedClient,
    mut paused: watch::Receiver<bool>,
    cancel: CancellationToken,
) {
    loop {
        if cancel.is_cancelled() {
            break;
        }

        // The pause gate: hold here until resumed or cancelled.
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

        match list_items(Arc::clone(&settings), Arc::clone(&client)).await {
            Ok(batch) => {
                debug!(host = %settings.host, items = batch.len(), "poll cycle complete");
                if !core.emit(batch).await {
                    debug!(host = %settings.host, "batch held back, entries re-listed next cycle");
                }
            },
            Err(e) => warn!(host = %settings.host, error = %e, "poll cycle failed"),
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(settings.interval) => {},
        }
    }

    debug!(host = %settings.host, "poll loop stopped");
}

/// Parsed FTP directory entry
///
/// LIST output varies by server, but is typically Unix `ls -l` shaped:
/// `-rw-r--r--   1 ftp ftp  1234 Jan 15 12:00 filename.txt`
#[derive(Debug, Clone)]
pub struct FtpEntry {
    pub name: String,
    pub is_directory: bool,
    pub size: Option<u64>,
}

impl FtpEntry {
    pub fn parse(line: &str) -> Option<Self> {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 4 {
            return None;
        }

        let is_directory = parts[0].starts_with('d');
        let name = parts.last()?.to_string();
        let size = if parts.len() >= 5 {
            parts[4].parse().ok()
        } else {
            None
        };

        Some(Self { name, is_directory, size })
    }
}
