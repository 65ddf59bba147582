//! Time-bounded listing cache
//!
//! Folder and message listings are cached per account and domain for
//! a short TTL. Entries are bounded by an LRU, and concurrent misses
//! on one key collapse into a single fetch.
//!
//! Every invalidation bumps a generation counter. A fetch that was
//! running while an invalidation happened returns its value to its
//! caller but does not cache it, since it may predate the change.

use crate::config::{AccountId, DomainId};
use crate::error::Result;
use lru::LruCache;
use std::collections::HashMap;
use std::future::Future;
use std::num::NonZeroUsize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// The remote read a cached value stands for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Operation {
    Folders,
    Messages {
        folder: String,
        limit: usize,
        offset: usize,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub account: AccountId,
    pub domain: DomainId,
    pub operation: Operation,
}

impl CacheKey {
    #[must_use]
    pub fn folders(account: &AccountId, domain: &DomainId) -> Self {
        Self {
            account: account.clone(),
            domain: domain.clone(),
            operation: Operation::Folders,
        }
    }

    #[must_use]
    pub fn messages(
        account: &AccountId,
        domain: &DomainId,
        folder: &str,
        limit: usize,
        offset: usize,
    ) -> Self {
        Self {
            account: account.clone(),
            domain: domain.clone(),
            operation: Operation::Messages {
                folder: mailbox_name(folder),
                limit,
                offset,
            },
        }
    }

    fn is_for(&self, account: &AccountId, domain: &DomainId) -> bool {
        &self.account == account && &self.domain == domain
    }
}

/// `INBOX` is case-insensitive in IMAP; every other name is not.
fn mailbox_name(folder: &str) -> String {
    if folder.eq_ignore_ascii_case("INBOX") {
        "INBOX".to_string()
    } else {
        folder.to_string()
    }
}

struct Entry<V> {
    value: V,
    written: Instant,
}

type Gate = Arc<tokio::sync::Mutex<()>>;

/// TTL and LRU bounded cache with per-key single-flight.
pub struct ResultCache<V> {
    entries: Mutex<LruCache<CacheKey, Entry<V>>>,
    flights: Mutex<HashMap<CacheKey, Gate>>,
    generation: AtomicU64,
    ttl: Duration,
}

impl<V: Clone> ResultCache<V> {
    #[must_use]
    pub fn new(capacity: NonZeroUsize, ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            flights: Mutex::new(HashMap::new()),
            generation: AtomicU64::new(0),
            ttl,
        }
    }

    /// The cached value, if it was written less than one TTL ago.
    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let mut entries = self.entries();
        match entries.get(key) {
            Some(entry) if entry.written.elapsed() < self.ttl => Some(entry.value.clone()),
            Some(_) => {
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    /// Store `value`, replacing any previous entry for `key`.
    pub fn put(&self, key: CacheKey, value: V) {
        self.entries().put(
            key,
            Entry {
                value,
                written: Instant::now(),
            },
        );
    }

    /// Return the cached value or run `fetch` to produce it.
    ///
    /// Concurrent callers missing on the same key wait for one fetch
    /// instead of each running their own. Errors are not cached; a
    /// waiter that finds no value after the gate opens fetches itself.
    ///
    /// # Errors
    ///
    /// Returns whatever `fetch` returns.
    pub async fn get_or_fetch<F, Fut>(&self, key: CacheKey, fetch: F) -> Result<V>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<V>>,
    {
        if let Some(value) = self.get(&key) {
            debug!("Cache hit for {:?}", key.operation);
            return Ok(value);
        }

        let flight = self.flight(&key);
        let _permit = flight.gate.lock().await;

        if let Some(value) = self.get(&key) {
            debug!("Cache filled while waiting for {:?}", key.operation);
            return Ok(value);
        }

        debug!("Cache miss for {:?}", key.operation);
        let generation = self.generation.load(Ordering::SeqCst);
        let value = fetch().await?;
        self.put_unless_invalidated(key, value.clone(), generation);
        Ok(value)
    }

    fn put_unless_invalidated(&self, key: CacheKey, value: V, generation: u64) {
        let mut entries = self.entries();
        if self.generation.load(Ordering::SeqCst) != generation {
            debug!("Not caching {:?}: invalidated during fetch", key.operation);
            return;
        }
        entries.put(
            key,
            Entry {
                value,
                written: Instant::now(),
            },
        );
    }

    /// Drop every entry whose key matches `predicate`.
    pub fn invalidate(&self, predicate: impl Fn(&CacheKey) -> bool) {
        let mut entries = self.entries();
        self.generation.fetch_add(1, Ordering::SeqCst);
        let stale: Vec<CacheKey> = entries
            .iter()
            .map(|(key, _)| key)
            .filter(|key| predicate(key))
            .cloned()
            .collect();
        for key in &stale {
            entries.pop(key);
        }
    }

    /// Drop every entry of one account.
    pub fn invalidate_account(&self, account: &AccountId, domain: &DomainId) {
        self.invalidate(|key| key.is_for(account, domain));
    }

    /// Drop every listing page of one folder.
    pub fn invalidate_folder(&self, account: &AccountId, domain: &DomainId, folder: &str) {
        let folder = mailbox_name(folder);
        self.invalidate(|key| {
            key.is_for(account, domain)
                && matches!(&key.operation, Operation::Messages { folder: f, .. } if *f == folder)
        });
    }

    fn entries(&self) -> MutexGuard<'_, LruCache<CacheKey, Entry<V>>> {
        self.entries
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    fn flight(&self, key: &CacheKey) -> Flight<'_> {
        let mut flights = self
            .flights
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        let gate = Arc::clone(flights.entry(key.clone()).or_default());
        Flight {
            gate,
            key: key.clone(),
            flights: &self.flights,
        }
    }
}

/// A caller's handle on the gate of one key. The last handle out
/// removes the gate from the map.
struct Flight<'a> {
    gate: Gate,
    key: CacheKey,
    flights: &'a Mutex<HashMap<CacheKey, Gate>>,
}

impl Drop for Flight<'_> {
    fn drop(&mut self) {
        let mut flights = self
            .flights
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        // One reference is ours, one is the map's
        if Arc::strong_count(&self.gate) <= 2 {
            flights.remove(&self.key);
        }
    }
}
