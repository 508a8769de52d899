//! Feeds cache: coalescing, batched, retrying key → value cache.
//!
//! Used for small per-key lookups (feed capabilities and the like) that many
//! views ask for at once. A cached key is answered immediately. Concurrent
//! misses for the same key share one waiter, misses arriving within one batch
//! window share one bulk request, and that request is retried with backoff on
//! the batch task, never inline in a caller.
//!
//! A key whose bulk fetch keeps failing leaves its waiters pending; the next
//! [`CoalescingCache::fetch`] of that key offers it to the batcher again.

#![forbid(unsafe_code)]

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use futures::future::{FutureExt, Shared};
use metrics::{counter, histogram};
use parking_lot::RwLock;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

pub mod batcher;
pub mod config;
pub mod retry;

pub use batcher::{BatchHandler, Batcher};
pub use config::CacheConfig;
pub use retry::{retry, RetryPolicy};

#[derive(Debug, thiserror::Error, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache batcher is closed")]
    Closed,
    #[error("cache was cleared while waiting")]
    Cleared,
}

/// Bulk remote lookup. May return fewer keys than requested.
#[async_trait::async_trait]
pub trait BulkFetch<K, V>: Send + Sync {
    async fn fetch(&self, keys: Vec<K>) -> anyhow::Result<HashMap<K, V>>;
}

/// Counters since construction (not reset by [`CoalescingCache::clear`]).
#[derive(Debug, Default)]
struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    offers: AtomicU64,
    bulk_fetches: AtomicU64,
    bulk_failures: AtomicU64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub offers: u64,
    pub bulk_fetches: u64,
    pub bulk_failures: u64,
}

impl CacheStats {
    fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            offers: self.offers.load(Ordering::Relaxed),
            bulk_fetches: self.bulk_fetches.load(Ordering::Relaxed),
            bulk_failures: self.bulk_failures.load(Ordering::Relaxed),
        }
    }
}

type Waiter<V> = Shared<oneshot::Receiver<V>>;

/// Callers waiting on one uncached key.
struct Pending<V> {
    tx: oneshot::Sender<V>,
    rx: Waiter<V>,
    /// Whether the key sits in a batch that has not finished yet.
    offered: bool,
}

impl<V: Clone> Pending<V> {
    fn new() -> Self {
        let (tx, rx) = oneshot::channel();
        Self { tx, rx: rx.shared(), offered: false }
    }
}

struct Inner<K, V> {
    cache: DashMap<K, V>,
    pending: DashMap<K, Pending<V>>,
    fetcher: Arc<dyn BulkFetch<K, V>>,
    retry: RetryPolicy,
    /// Bumped by `clear` under the write lock. Batches write back under the
    /// read lock and only while the generation they started with is current.
    generation: RwLock<u64>,
    stats: CacheStats,
}

impl<K, V> Inner<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + Debug + 'static,
    V: Clone + Send + Sync + 'static,
{
    fn cached(&self, key: &K) -> Option<V> { self.cache.get(key).map(|v| v.value().clone()) }

    /// Insert fetched values unless a `clear` happened since `generation`.
    fn write_back(&self, generation: u64, values: HashMap<K, V>) -> bool {
        let current = self.generation.read();
        if *current != generation {
            return false;
        }
        for (k, v) in values {
            self.cache.insert(k, v);
        }
        true
    }

    /// Hand the cached value to everyone waiting on `key`.
    fn resolve(&self, key: &K) -> bool {
        let Some(value) = self.cached(key) else {
            return false;
        };
        match self.pending.remove(key) {
            Some((_, p)) => {
                let _ = p.tx.send(value);
                true
            }
            None => false,
        }
    }
}

#[async_trait::async_trait]
impl<K, V> BatchHandler<K> for Inner<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + Debug + 'static,
    V: Clone + Send + Sync + 'static,
{
    async fn on_batch(&self, keys: Vec<K>) {
        let generation = *self.generation.read();
        let uncached: Vec<K> = keys.iter().filter(|k| !self.cache.contains_key(*k)).cloned().collect();

        if !uncached.is_empty() {
            self.stats.bulk_fetches.fetch_add(1, Ordering::Relaxed);
            counter!("cache_bulk_fetch_total", 1u64);
            let started = Instant::now();
            let fetcher = &self.fetcher;
            let request = &uncached;
            let res = retry(&self.retry, "bulk_fetch", move || fetcher.fetch(request.clone())).await;
            histogram!("cache_bulk_fetch_ms", started.elapsed().as_secs_f64() * 1000.0);

            match res {
                Ok(values) => {
                    let fetched = values.len();
                    if !self.write_back(generation, values) {
                        debug!(fetched, "cache cleared during bulk fetch; dropping results");
                        return;
                    }
                    debug!(requested = uncached.len(), fetched, "bulk fetch complete");
                }
                Err(e) => {
                    self.stats.bulk_failures.fetch_add(1, Ordering::Relaxed);
                    counter!("cache_bulk_fetch_failures_total", 1u64);
                    warn!(keys = uncached.len(), error = %format!("{e:#}"), "bulk fetch failed; keys stay uncached");
                }
            }

            // Still missing after a failure or a partial answer: the next fetch re-offers.
            for k in uncached.iter() {
                if self.cache.contains_key(k) {
                    continue;
                }
                if let Some(mut p) = self.pending.get_mut(k) {
                    p.offered = false;
                }
            }
        }

        for k in keys.iter() {
            self.resolve(k);
        }
    }
}

/// Client-scoped cache. Create it when the client starts, [`clear`](Self::clear)
/// it on logout. Must be constructed inside a tokio runtime.
pub struct CoalescingCache<K, V> {
    inner: Arc<Inner<K, V>>,
    batcher: Batcher<K>,
}

impl<K, V> CoalescingCache<K, V>
where
    K: Clone + Eq + Hash + Send + Sync + Debug + 'static,
    V: Clone + Send + Sync + 'static,
{
    pub fn new(config: CacheConfig, fetcher: Arc<dyn BulkFetch<K, V>>) -> Self {
        let inner = Arc::new(Inner {
            cache: DashMap::new(),
            pending: DashMap::new(),
            fetcher,
            retry: config.retry.clone(),
            generation: RwLock::new(0),
            stats: CacheStats::default(),
        });
        let handler: Arc<dyn BatchHandler<K>> = inner.clone();
        let batcher = Batcher::spawn(config.batch_window, config.max_batch_size, handler);
        info!(window_ms = config.batch_window.as_millis() as u64, max_batch = config.max_batch_size, "coalescing cache started");
        Self { inner, batcher }
    }

    /// Cached value for `key`, or wait for the batch that loads it.
    ///
    /// Dropping the returned future only stops this caller from waiting; the
    /// bulk fetch and other waiters are unaffected.
    pub async fn fetch(&self, key: K) -> Result<V, CacheError> {
        if let Some(v) = self.inner.cached(&key) {
            self.inner.stats.hits.fetch_add(1, Ordering::Relaxed);
            counter!("cache_hits_total", 1u64);
            return Ok(v);
        }
        self.inner.stats.misses.fetch_add(1, Ordering::Relaxed);
        counter!("cache_misses_total", 1u64);

        let (waiter, offer) = {
            let mut p = self.inner.pending.entry(key.clone()).or_insert_with(Pending::new);
            let offer = !p.offered;
            p.offered = true;
            (p.rx.clone(), offer)
        };
        if offer {
            if !self.batcher.offer(key.clone()) {
                if let Some(mut p) = self.inner.pending.get_mut(&key) {
                    p.offered = false;
                }
                return Err(CacheError::Closed);
            }
            self.inner.stats.offers.fetch_add(1, Ordering::Relaxed);
        }
        // A batch may have landed between the first lookup and registering.
        if self.inner.cached(&key).is_some() {
            self.inner.resolve(&key);
        }
        waiter.await.map_err(|_| CacheError::Cleared)
    }

    pub fn get_cached(&self, key: &K) -> Option<V> { self.inner.cached(key) }

    /// Store a value learned from some other response and wake its waiters.
    pub fn prime(&self, key: K, value: V) {
        self.inner.cache.insert(key.clone(), value);
        self.inner.resolve(&key);
    }

    pub fn len(&self) -> usize { self.inner.cache.len() }

    pub fn is_empty(&self) -> bool { self.inner.cache.is_empty() }

    /// Keys with callers still waiting.
    pub fn pending_len(&self) -> usize { self.inner.pending.len() }

    pub fn stats(&self) -> CacheStatsSnapshot { self.inner.stats.snapshot() }

    /// Teardown (logout): drop every entry and waiter. Waiters get
    /// [`CacheError::Cleared`]; bulk fetches already running are discarded.
    pub fn clear(&self) {
        let mut generation = self.inner.generation.write();
        *generation += 1;
        let entries = self.inner.cache.len();
        let waiting = self.inner.pending.len();
        self.inner.cache.clear();
        self.inner.pending.clear();
        drop(generation);
        info!(entries, waiting, "coalescing cache cleared");
    }

    /// Stop accepting keys and flush what is queued.
    pub async fn shutdown(self) {
        self.batcher.shutdown().await;
    }
}
