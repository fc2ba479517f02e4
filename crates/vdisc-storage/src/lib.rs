//! Namespaced per-owner listing stores, the listing collection reader and invalidation signalling.

use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "vdisc-storage";

/// Key prefix shared by every owner's listing collection, e.g. `venue_listings_owner-42`.
pub const DEFAULT_LISTING_PREFIX: &str = "venue_listings_";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("invalid store key `{0}`")]
    InvalidKey(String),
    #[error("store lock poisoned")]
    Poisoned,
    #[error("io error for key `{key}`: {source}")]
    Io {
        key: String,
        #[source]
        source: std::io::Error,
    },
}

/// String key-value store scanned by the listing reader.
pub trait ListingStore: Send + Sync {
    /// All keys, sorted.
    fn keys(&self) -> Result<Vec<String>, StoreError>;
    fn get(&self, key: &str) -> Result<Option<String>, StoreError>;
    fn put(&self, key: &str, value: &str) -> Result<(), StoreError>;
}

/// Raw listing as persisted by the hosting workflow. Read-only to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ListingRecord {
    pub owner_key: String,
    pub raw: JsonValue,
}

impl ListingRecord {
    pub fn new(owner_key: impl Into<String>, raw: JsonValue) -> Self {
        Self {
            owner_key: owner_key.into(),
            raw,
        }
    }
}

/// Scan every key starting with `prefix` and concatenate the decoded arrays.
///
/// A key whose value is not a JSON array contributes nothing; the failure is logged.
pub fn read_all_listings(store: &dyn ListingStore, prefix: &str) -> anyhow::Result<Vec<ListingRecord>> {
    let keys = store.keys().context("listing store keys")?;
    let mut out = Vec::new();
    for key in keys.into_iter().filter(|k| k.starts_with(prefix)) {
        let text = match store.get(&key) {
            Ok(Some(text)) => text,
            Ok(None) => continue,
            Err(err) => {
                warn!(key = %key, error = %err, "skipping unreadable listing collection");
                continue;
            }
        };
        match serde_json::from_str::<JsonValue>(&text) {
            Ok(JsonValue::Array(items)) => {
                debug!(key = %key, count = items.len(), "read listing collection");
                out.extend(items.into_iter().map(|raw| ListingRecord::new(key.clone(), raw)));
            }
            Ok(other) => {
                warn!(key = %key, kind = json_kind(&other), "listing collection is not an array; treating as empty");
            }
            Err(err) => {
                warn!(key = %key, error = %err, "unparseable listing collection; treating as empty");
            }
        }
    }
    Ok(out)
}

fn json_kind(value: &JsonValue) -> &'static str {
    match value {
        JsonValue::Null => "null",
        JsonValue::Bool(_) => "bool",
        JsonValue::Number(_) => "number",
        JsonValue::String(_) => "string",
        JsonValue::Array(_) => "array",
        JsonValue::Object(_) => "object",
    }
}

pub fn listing_key(prefix: &str, owner_id: &str) -> String {
    format!("{prefix}{owner_id}")
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Content hash over the prefixed keys and their raw values. Changes iff some collection changed.
pub fn store_fingerprint(store: &dyn ListingStore, prefix: &str) -> anyhow::Result<String> {
    let mut hasher = Sha256::new();
    for key in store.keys()?.into_iter().filter(|k| k.starts_with(prefix)) {
        let value = store.get(&key)?.unwrap_or_default();
        hasher.update(key.as_bytes());
        hasher.update([0u8]);
        hasher.update(value.as_bytes());
        hasher.update([0u8]);
    }
    Ok(hex::encode(hasher.finalize()))
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvalidationReason {
    StoreWrite { key: String },
    Poll,
    Manual,
}

/// "Listings updated" signal. Receivers recompute everything; the message carries no delta.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Invalidation {
    pub reason: InvalidationReason,
    pub at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct InvalidationBus {
    tx: broadcast::Sender<Invalidation>,
}

impl InvalidationBus {
    pub fn new() -> Self {
        Self::with_capacity(64)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    /// Returns the number of receivers reached; zero when nobody listens.
    pub fn publish(&self, reason: InvalidationReason) -> usize {
        self.tx
            .send(Invalidation {
                reason,
                at: Utc::now(),
            })
            .unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Invalidation> {
        self.tx.subscribe()
    }
}

impl Default for InvalidationBus {
    fn default() -> Self {
        Self::new()
    }
}

/// In-process store; the analog of a single browser profile's storage.
#[derive(Debug, Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<String, String>>,
    bus: Option<InvalidationBus>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bus(mut self, bus: InvalidationBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn remove(&self, key: &str) -> Result<Option<String>, StoreError> {
        let removed = self
            .entries
            .write()
            .map_err(|_| StoreError::Poisoned)?
            .remove(key);
        if removed.is_some() {
            publish_write(self.bus.as_ref(), key);
        }
        Ok(removed)
    }
}

impl ListingStore for MemoryStore {
    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.keys().cloned().collect())
    }

    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let entries = self.entries.read().map_err(|_| StoreError::Poisoned)?;
        Ok(entries.get(key).cloned())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        validate_key(key)?;
        self.entries
            .write()
            .map_err(|_| StoreError::Poisoned)?
            .insert(key.to_string(), value.to_string());
        publish_write(self.bus.as_ref(), key);
        Ok(())
    }
}

/// One `<key>.json` file per key under `root`.
#[derive(Debug, Clone)]
pub struct DirectoryStore {
    root: PathBuf,
    bus: Option<InvalidationBus>,
}

impl DirectoryStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            bus: None,
        }
    }

    pub fn with_bus(mut self, bus: InvalidationBus) -> Self {
        self.bus = Some(bus);
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, StoreError> {
        validate_key(key)?;
        Ok(self.root.join(format!("{key}.json")))
    }

    fn io_err(key: &str) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
        move |source| StoreError::Io {
            key: key.to_string(),
            source,
        }
    }
}

impl ListingStore for DirectoryStore {
    fn keys(&self) -> Result<Vec<String>, StoreError> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(Self::io_err("<root>")(err)),
        };
        let mut keys = entries
            .filter_map(|e| e.ok())
            .filter(|e| e.file_type().map(|ft| ft.is_file()).unwrap_or(false))
            .filter_map(|e| {
                let name = e.file_name().to_string_lossy().to_string();
                name.strip_suffix(".json")
                    .filter(|stem| !stem.starts_with('.'))
                    .map(ToString::to_string)
            })
            .collect::<Vec<_>>();
        keys.sort();
        Ok(keys)
    }

    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        let path = self.path_for(key)?;
        match fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(Self::io_err(key)(err)),
        }
    }

    /// Write through a temp file and rename so readers never observe a half-written collection.
    fn put(&self, key: &str, value: &str) -> Result<(), StoreError> {
        let path = self.path_for(key)?;
        fs::create_dir_all(&self.root).map_err(Self::io_err(key))?;

        let temp_path = self
            .root
            .join(format!(".{}.{}.tmp", Uuid::new_v4(), value.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .map_err(Self::io_err(key))?;
        file.write_all(value.as_bytes()).map_err(Self::io_err(key))?;
        file.flush().map_err(Self::io_err(key))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &path) {
            let _ = fs::remove_file(&temp_path);
            return Err(Self::io_err(key)(err));
        }
        publish_write(self.bus.as_ref(), key);
        Ok(())
    }
}

fn validate_key(key: &str) -> Result<(), StoreError> {
    let bad = key.is_empty()
        || key.starts_with('.')
        || key.contains(['/', '\\'])
        || key.contains("..");
    if bad {
        return Err(StoreError::InvalidKey(key.to_string()));
    }
    Ok(())
}

fn publish_write(bus: Option<&InvalidationBus>, key: &str) {
    if let Some(bus) = bus {
        bus.publish(InvalidationReason::StoreWrite {
            key: key.to_string(),
        });
    }
}

/// Polling transport for writers outside this process: publishes `Poll` whenever the
/// fingerprint of the prefixed collections changes. The first tick only records a baseline.
pub fn spawn_store_poller(
    store: Arc<dyn ListingStore>,
    prefix: String,
    every: Duration,
    bus: InvalidationBus,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every.max(Duration::from_millis(10)));
        let mut last: Option<String> = None;
        loop {
            ticker.tick().await;
            let current = match store_fingerprint(store.as_ref(), &prefix) {
                Ok(fp) => fp,
                Err(err) => {
                    warn!(error = %err, "store poll failed");
                    continue;
                }
            };
            if last.as_deref().is_some_and(|prev| prev != current) {
                debug!(fingerprint = %current, "listing store changed");
                bus.publish(InvalidationReason::Poll);
            }
            last = Some(current);
        }
    })
}
