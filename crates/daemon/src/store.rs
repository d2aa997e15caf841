use serde::{Deserialize, Serialize};
use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use thiserror::Error;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::{debug, warn};

/// An access-control table row as stored in the config store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclTable {
    pub name: String,
    /// Table scope, e.g. "CTRLPLANE" for control-plane tables.
    #[serde(default)]
    pub kind: String,
    /// Names of the services this table applies to.
    #[serde(default)]
    pub services: Vec<String>,
}

/// An access-control rule row. Field values are kept as stored; the
/// reducer is responsible for interpreting them.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AclRule {
    /// Name of the owning table.
    pub table: String,
    pub name: String,
    #[serde(default)]
    pub priority: String,
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub src_ip: Option<String>,
}

/// A full point-in-time read of both watched tables.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSnapshot {
    pub tables: Vec<AclTable>,
    pub rules: Vec<AclRule>,
}

/// The two store tables whose changes trigger reconciliation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchedTable {
    AclTable,
    AclRule,
}

impl WatchedTable {
    pub fn name(self) -> &'static str {
        match self {
            Self::AclTable => "ACL_TABLE",
            Self::AclRule => "ACL_RULE",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "ACL_TABLE" => Some(Self::AclTable),
            "ACL_RULE" => Some(Self::AclRule),
            _ => None,
        }
    }
}

/// A row-change notification from the config store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChangeEvent {
    pub table: WatchedTable,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("failed to connect to config store at {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config store rejected request: {0}")]
    Rejected(String),

    #[error("malformed config store response: {0}")]
    Protocol(#[from] serde_json::Error),

    #[error("config store I/O failure: {0}")]
    Io(#[from] std::io::Error),
}

/// Change events from one `subscribe` call, delivered over a
/// single-consumer channel so passes never overlap. Dropping the
/// subscription tears down the feed.
pub struct Subscription {
    rx: UnboundedReceiver<ChangeEvent>,
}

impl Subscription {
    pub fn from_receiver(rx: UnboundedReceiver<ChangeEvent>) -> Self {
        Self { rx }
    }

    /// Next change event, or `None` once the feed has closed.
    pub async fn next_event(&mut self) -> Option<ChangeEvent> {
        self.rx.recv().await
    }
}

/// Interface to the externally-maintained rule store: synchronous
/// full-snapshot reads plus a change-event feed.
pub trait RuleStore {
    fn snapshot(&self) -> Result<RuleSnapshot, StoreError>;
    fn subscribe(&self) -> Result<Subscription, StoreError>;
}

// ---------------------------------------------------------------------------
// Socket-backed store (production)
// ---------------------------------------------------------------------------

/// JSON newline-delimited request to the config-store bridge socket.
#[derive(Debug, Serialize)]
struct StoreRequest {
    cmd: &'static str,
}

/// JSON newline-delimited response.
#[derive(Debug, Deserialize)]
struct StoreResponse {
    ok: bool,
    #[serde(default)]
    data: Option<serde_json::Value>,
    #[serde(default)]
    error: Option<String>,
}

/// One pushed change notification on a subscribe connection.
#[derive(Debug, Deserialize)]
struct StoreNotification {
    table: String,
}

/// Connector to the config-store bridge over a Unix domain socket.
///
/// Snapshot reads use a fresh connection per request; `subscribe` holds a
/// dedicated connection open and pumps pushed notifications into the
/// subscription channel from a reader thread.
pub struct SocketStore {
    path: PathBuf,
}

impl SocketStore {
    /// Connect to the store bridge. An unreachable store is a fatal
    /// precondition, so this probes the socket once up front.
    pub fn connect(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let path = path.into();
        UnixStream::connect(&path).map_err(|source| StoreError::Connect {
            path: path.clone(),
            source,
        })?;
        Ok(Self { path })
    }

    fn open(&self) -> Result<UnixStream, StoreError> {
        UnixStream::connect(&self.path).map_err(|source| StoreError::Connect {
            path: self.path.clone(),
            source,
        })
    }

    fn send_request(stream: &mut UnixStream, request: &StoreRequest) -> Result<(), StoreError> {
        let payload = serde_json::to_string(request)?;
        stream.write_all(payload.as_bytes())?;
        stream.write_all(b"\n")?;
        stream.flush()?;
        Ok(())
    }

    fn read_response(stream: UnixStream) -> Result<StoreResponse, StoreError> {
        let mut reader = BufReader::new(stream);
        let mut line = String::new();
        reader.read_line(&mut line)?;
        let response: StoreResponse = serde_json::from_str(line.trim_end())?;
        Ok(response)
    }
}

impl RuleStore for SocketStore {
    fn snapshot(&self) -> Result<RuleSnapshot, StoreError> {
        let mut stream = self.open()?;
        Self::send_request(&mut stream, &StoreRequest { cmd: "snapshot" })?;
        let response = Self::read_response(stream)?;
        if !response.ok {
            return Err(StoreError::Rejected(
                response.error.unwrap_or_else(|| "unknown error".into()),
            ));
        }
        let data = response
            .data
            .ok_or_else(|| StoreError::Rejected("snapshot response carried no data".into()))?;
        let snapshot: RuleSnapshot = serde_json::from_value(data)?;
        Ok(snapshot)
    }

    fn subscribe(&self) -> Result<Subscription, StoreError> {
        let mut stream = self.open()?;
        Self::send_request(&mut stream, &StoreRequest { cmd: "subscribe" })?;

        let (tx, rx) = unbounded_channel();
        std::thread::spawn(move || pump_notifications(stream, tx));
        Ok(Subscription::from_receiver(rx))
    }
}

/// Reader side of a subscribe connection. Runs on its own thread; exits
/// when either the socket or the receiving side goes away, which closes
/// the channel and lets the consumer observe the feed ending.
fn pump_notifications(stream: UnixStream, tx: UnboundedSender<ChangeEvent>) {
    let reader = BufReader::new(stream);
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("config store change feed read failed: {}", e);
                return;
            }
        };
        if line.trim().is_empty() {
            continue;
        }
        let notification: StoreNotification = match serde_json::from_str(&line) {
            Ok(n) => n,
            Err(e) => {
                warn!("ignoring malformed change notification: {}", e);
                continue;
            }
        };
        let Some(table) = WatchedTable::from_name(&notification.table) else {
            debug!("ignoring change for unwatched table {}", notification.table);
            continue;
        };
        if tx.send(ChangeEvent { table }).is_err() {
            // Subscription dropped.
            return;
        }
    }
    debug!("config store change feed reached end of stream");
}

// ---------------------------------------------------------------------------
// In-memory store (tests, demos)
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryInner {
    snapshot: RuleSnapshot,
    subscribers: Vec<UnboundedSender<ChangeEvent>>,
}

/// In-process store with the same contract as the socket connector.
/// Mutations are published explicitly via [`MemoryStore::notify`].
#[derive(Clone, Default)]
pub struct MemoryStore {
    inner: Arc<Mutex<MemoryInner>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_tables(&self, tables: Vec<AclTable>) {
        self.lock().snapshot.tables = tables;
    }

    pub fn set_rules(&self, rules: Vec<AclRule>) {
        self.lock().snapshot.rules = rules;
    }

    /// Publish a change event to every live subscriber.
    pub fn notify(&self, table: WatchedTable) {
        let mut inner = self.lock();
        inner
            .subscribers
            .retain(|tx| tx.send(ChangeEvent { table }).is_ok());
    }

    /// Drop all subscriber channels, simulating the store going away.
    pub fn close(&self) {
        self.lock().subscribers.clear();
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryInner> {
        self.inner.lock().expect("memory store lock poisoned")
    }
}

impl RuleStore for MemoryStore {
    fn snapshot(&self) -> Result<RuleSnapshot, StoreError> {
        Ok(self.lock().snapshot.clone())
    }

    fn subscribe(&self) -> Result<Subscription, StoreError> {
        let (tx, rx) = unbounded_channel();
        self.lock().subscribers.push(tx);
        Ok(Subscription::from_receiver(rx))
    }
}
