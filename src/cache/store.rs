//! Shared query cache.
//!
//! Holds the last-known server response per `QueryKey` together with its
//! freshness. Every data write stamps the entry with a version drawn from
//! one cache-wide counter, which lets rollbacks detect that someone else
//! wrote the key in the meantime. Invalidation only flips freshness and
//! keeps the version, since the data it leaves behind is unchanged. In-flight background fetches are tracked by
//! generation so a cancelled fetch can never overwrite a newer value.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;
use time::OffsetDateTime;
use tokio::sync::broadcast;
use tracing::debug;

use super::keys::QueryKey;
use super::lock;

const SOURCE: &str = "cache::store";
const CHANGE_CHANNEL_CAPACITY: usize = 256;

/// Monotonic write stamp. Larger means written later.
pub type Version = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    Fresh,
    Stale,
}

/// A cached server response.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheEntry {
    pub value: Value,
    pub freshness: Freshness,
    pub version: Version,
    pub updated_at: OffsetDateTime,
}

impl CacheEntry {
    pub fn is_stale(&self) -> bool {
        self.freshness == Freshness::Stale
    }
}

/// Change notification delivered to cache subscribers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheChange {
    Updated { key: QueryKey, version: Version },
    Invalidated { key: QueryKey },
    Evicted { key: QueryKey },
    Restored { key: QueryKey },
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("failed to encode value for {key}: {source}")]
    Encode {
        key: QueryKey,
        #[source]
        source: serde_json::Error,
    },
}

/// Handle for an in-flight fetch started with [`QueryCache::begin_fetch`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchTicket {
    key: QueryKey,
    generation: u64,
}

impl FetchTicket {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }
}

/// The state of one key at a point in time; `entry` is `None` when absent.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    key: QueryKey,
    entry: Option<CacheEntry>,
}

impl Snapshot {
    pub fn key(&self) -> &QueryKey {
        &self.key
    }

    pub fn value(&self) -> Option<&Value> {
        self.entry.as_ref().map(|entry| &entry.value)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreOutcome {
    /// The snapshot was written back.
    Restored,
    /// The key changed after the expected version; nothing was written.
    Superseded,
}

struct Inner {
    entries: RwLock<HashMap<QueryKey, CacheEntry>>,
    fetches: Mutex<HashMap<QueryKey, u64>>,
    versions: AtomicU64,
    generations: AtomicU64,
    changes: broadcast::Sender<CacheChange>,
}

/// Cloneable handle to the session-wide query cache.
#[derive(Clone)]
pub struct QueryCache {
    inner: Arc<Inner>,
}

impl QueryCache {
    pub fn new() -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CHANNEL_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                entries: RwLock::new(HashMap::new()),
                fetches: Mutex::new(HashMap::new()),
                versions: AtomicU64::new(0),
                generations: AtomicU64::new(0),
                changes,
            }),
        }
    }

    fn next_version(&self) -> Version {
        self.inner.versions.fetch_add(1, Ordering::SeqCst) + 1
    }

    fn notify(&self, change: CacheChange) {
        // No receivers is fine.
        let _ = self.inner.changes.send(change);
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<CacheChange> {
        self.inner.changes.subscribe()
    }

    // ========================================================================
    // Reads
    // ========================================================================

    pub fn get(&self, key: &QueryKey) -> Option<CacheEntry> {
        lock::read(&self.inner.entries, SOURCE, "get")
            .get(key)
            .cloned()
    }

    /// Typed read. Entries that do not decode as `T` read as absent.
    pub fn get_data<T: DeserializeOwned>(&self, key: &QueryKey) -> Option<T> {
        let entry = self.get(key)?;
        match serde_json::from_value(entry.value) {
            Ok(value) => Some(value),
            Err(err) => {
                debug!(key = %key, error = %err, "Cached value does not match requested type");
                None
            }
        }
    }

    pub fn version(&self, key: &QueryKey) -> Option<Version> {
        lock::read(&self.inner.entries, SOURCE, "version")
            .get(key)
            .map(|entry| entry.version)
    }

    pub fn is_stale(&self, key: &QueryKey) -> bool {
        lock::read(&self.inner.entries, SOURCE, "is_stale")
            .get(key)
            .is_some_and(CacheEntry::is_stale)
    }

    /// Absent and stale keys both need a fetch before they can be trusted.
    pub fn needs_fetch(&self, key: &QueryKey) -> bool {
        lock::read(&self.inner.entries, SOURCE, "needs_fetch")
            .get(key)
            .is_none_or(CacheEntry::is_stale)
    }

    pub fn contains(&self, key: &QueryKey) -> bool {
        lock::read(&self.inner.entries, SOURCE, "contains").contains_key(key)
    }

    /// All keys, sorted.
    pub fn keys(&self) -> Vec<QueryKey> {
        let mut keys: Vec<_> = lock::read(&self.inner.entries, SOURCE, "keys")
            .keys()
            .cloned()
            .collect();
        keys.sort();
        keys
    }

    /// Stale keys, sorted.
    pub fn stale_keys(&self) -> Vec<QueryKey> {
        let mut keys: Vec<_> = lock::read(&self.inner.entries, SOURCE, "stale_keys")
            .iter()
            .filter(|(_, entry)| entry.is_stale())
            .map(|(key, _)| key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        lock::read(&self.inner.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    // ========================================================================
    // Writes
    // ========================================================================

    /// Store a fresh value and return its version.
    pub fn set_value(&self, key: QueryKey, value: Value) -> Version {
        let version = self.next_version();
        let entry = CacheEntry {
            value,
            freshness: Freshness::Fresh,
            version,
            updated_at: OffsetDateTime::now_utc(),
        };
        lock::write(&self.inner.entries, SOURCE, "set_value").insert(key.clone(), entry);
        self.notify(CacheChange::Updated { key, version });
        version
    }

    pub fn set_data<T: Serialize>(&self, key: QueryKey, value: &T) -> Result<Version, CacheError> {
        let value = encode(&key, value)?;
        Ok(self.set_value(key, value))
    }

    /// Mark every entry matching `prefix` stale, keeping its data.
    ///
    /// In-flight fetches of matching keys are cancelled so a response that
    /// predates the invalidation cannot mark the key fresh again. Returns the
    /// number of entries that flipped from fresh to stale; already-stale
    /// entries are left untouched.
    pub fn invalidate(&self, prefix: &QueryKey) -> usize {
        self.cancel_fetches(prefix);

        let mut flipped = Vec::new();
        {
            let mut entries = lock::write(&self.inner.entries, SOURCE, "invalidate");
            for (key, entry) in entries.iter_mut() {
                if prefix.matches(key) && !entry.is_stale() {
                    entry.freshness = Freshness::Stale;
                    flipped.push(key.clone());
                }
            }
        }

        let count = flipped.len();
        for key in flipped {
            self.notify(CacheChange::Invalidated { key });
        }
        count
    }

    /// Mark every entry stale.
    pub fn invalidate_all(&self) -> usize {
        self.invalidate(&QueryKey::all())
    }

    /// Remove every entry matching `prefix`. Returns the number removed.
    pub fn evict(&self, prefix: &QueryKey) -> usize {
        self.cancel_fetches(prefix);

        let removed: Vec<QueryKey> = {
            let mut entries = lock::write(&self.inner.entries, SOURCE, "evict");
            let doomed: Vec<QueryKey> = entries
                .keys()
                .filter(|key| prefix.matches(key))
                .cloned()
                .collect();
            for key in &doomed {
                entries.remove(key);
            }
            doomed
        };

        let count = removed.len();
        for key in removed {
            self.notify(CacheChange::Evicted { key });
        }
        count
    }

    // ========================================================================
    // Snapshots
    // ========================================================================

    pub fn snapshot(&self, key: &QueryKey) -> Snapshot {
        Snapshot {
            key: key.clone(),
            entry: self.get(key),
        }
    }

    /// Write a snapshot back unconditionally. An absent snapshot removes the key.
    pub fn restore(&self, snapshot: Snapshot) {
        let mut entries = lock::write(&self.inner.entries, SOURCE, "restore");
        self.write_snapshot(&mut entries, snapshot, false);
    }

    /// Write a snapshot back only if the key still carries `expected`.
    ///
    /// Used for rollbacks: when another writer (a refetch or a newer
    /// optimistic write) replaced the data after the optimistic write,
    /// restoring would clobber newer state, so the snapshot is dropped
    /// instead. An invalidation in between does not block the restore; the
    /// restored entry stays stale.
    pub fn restore_if_current(&self, snapshot: Snapshot, expected: Version) -> RestoreOutcome {
        let mut entries = lock::write(&self.inner.entries, SOURCE, "restore_if_current");
        let current = entries
            .get(&snapshot.key)
            .map(|entry| (entry.version, entry.is_stale()));
        let stale = match current {
            Some((version, stale)) if version == expected => stale,
            _ => {
                debug!(
                    key = %snapshot.key,
                    expected,
                    current = ?current.map(|(version, _)| version),
                    "Rollback superseded by a newer write"
                );
                return RestoreOutcome::Superseded;
            }
        };
        self.write_snapshot(&mut entries, snapshot, stale);
        RestoreOutcome::Restored
    }

    fn write_snapshot(
        &self,
        entries: &mut HashMap<QueryKey, CacheEntry>,
        snapshot: Snapshot,
        stale: bool,
    ) {
        let Snapshot { key, entry } = snapshot;
        match entry {
            Some(mut entry) => {
                entry.version = self.next_version();
                if stale {
                    entry.freshness = Freshness::Stale;
                }
                entries.insert(key.clone(), entry);
            }
            None => {
                entries.remove(&key);
            }
        }
        self.notify(CacheChange::Restored { key });
    }

    // ========================================================================
    // Fetch tracking
    // ========================================================================

    /// Register an in-flight fetch for `key`, superseding any earlier one.
    pub fn begin_fetch(&self, key: QueryKey) -> FetchTicket {
        let generation = self.inner.generations.fetch_add(1, Ordering::SeqCst) + 1;
        lock::lock(&self.inner.fetches, SOURCE, "begin_fetch").insert(key.clone(), generation);
        FetchTicket { key, generation }
    }

    /// Store the result of a fetch if its ticket is still current.
    ///
    /// Returns `Ok(false)` when the fetch was cancelled or superseded.
    pub fn complete_fetch<T: Serialize>(
        &self,
        ticket: FetchTicket,
        value: &T,
    ) -> Result<bool, CacheError> {
        let value = encode(&ticket.key, value)?;

        let mut fetches = lock::lock(&self.inner.fetches, SOURCE, "complete_fetch");
        if fetches.get(&ticket.key) != Some(&ticket.generation) {
            debug!(key = %ticket.key, "Discarding result of cancelled fetch");
            return Ok(false);
        }
        fetches.remove(&ticket.key);
        self.set_value(ticket.key, value);
        Ok(true)
    }

    /// Forget a failed fetch without touching the cached value.
    pub fn abandon_fetch(&self, ticket: &FetchTicket) {
        let mut fetches = lock::lock(&self.inner.fetches, SOURCE, "abandon_fetch");
        if fetches.get(&ticket.key) == Some(&ticket.generation) {
            fetches.remove(&ticket.key);
        }
    }

    /// Cancel in-flight fetches of every key matching `prefix`.
    pub fn cancel_fetches(&self, prefix: &QueryKey) -> usize {
        let mut fetches = lock::lock(&self.inner.fetches, SOURCE, "cancel_fetches");
        let before = fetches.len();
        fetches.retain(|key, _| !prefix.matches(key));
        let cancelled = before - fetches.len();
        if cancelled > 0 {
            debug!(prefix = %prefix, cancelled, "Cancelled in-flight fetches");
        }
        cancelled
    }

    pub fn is_fetching(&self, key: &QueryKey) -> bool {
        lock::lock(&self.inner.fetches, SOURCE, "is_fetching").contains_key(key)
    }

    /// Return the cached value when fresh, otherwise fetch and store it.
    ///
    /// A fetch result is always returned to the caller, but is only written
    /// to the cache if nothing cancelled the fetch while it was in flight.
    pub async fn fetch_query<T, E, F, Fut>(&self, key: &QueryKey, fetch: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(entry) = self.get(key)
            && !entry.is_stale()
            && let Ok(value) = serde_json::from_value::<T>(entry.value)
        {
            return Ok(value);
        }
        self.refetch_query(key, fetch).await
    }

    /// Fetch regardless of freshness and store the result.
    pub async fn refetch_query<T, E, F, Fut>(&self, key: &QueryKey, fetch: F) -> Result<T, E>
    where
        T: Serialize,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let ticket = self.begin_fetch(key.clone());
        match fetch().await {
            Ok(value) => {
                if let Err(err) = self.complete_fetch(ticket, &value) {
                    debug!(key = %key, error = %err, "Fetched value could not be cached");
                }
                Ok(value)
            }
            Err(err) => {
                self.abandon_fetch(&ticket);
                Err(err)
            }
        }
    }
}

impl Default for QueryCache {
    fn default() -> Self {
        Self::new()
    }
}

fn encode<T: Serialize>(key: &QueryKey, value: &T) -> Result<Value, CacheError> {
    serde_json::to_value(value).map_err(|source| CacheError::Encode {
        key: key.clone(),
        source,
    })
}
