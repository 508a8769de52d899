//! Observable paginated collection: one atomically swapped snapshot per query.

use std::sync::Arc;
use std::time::Instant;

use arc_swap::ArcSwap;
use feeds_core::{CollectionEvent, Comparator, Entity, Pagination, PaginationResult};
use metrics::{counter, histogram};
use tokio::sync::watch;
use tracing::debug;

use crate::merge::{merge_sorted, remove_by_key, upsert_sorted};
use crate::{EventSink, PageSource, StoreError};

/// Immutable view handed to readers. Replaced whole on every update.
#[derive(Debug, Clone)]
pub struct CollectionSnapshot<T> {
    pub epoch: u64,
    pub items: Vec<T>,
    pub pagination: Pagination,
}

impl<T> Default for CollectionSnapshot<T> {
    fn default() -> Self { Self { epoch: 0, items: Vec::new(), pagination: Pagination::default() } }
}

/// Update interface for a flat collection, one method per event type.
pub trait CollectionHandler<T: Entity> {
    fn on_added(&self, item: T);
    fn on_updated(&self, item: T);
    fn on_removed(&self, key: &T::Key);
    fn on_page_loaded(&self, page: PaginationResult<T>);

    fn dispatch(&self, event: CollectionEvent<T>) {
        match event {
            CollectionEvent::Added { item } => self.on_added(item),
            CollectionEvent::Updated { item } => self.on_updated(item),
            CollectionEvent::Removed { key } => self.on_removed(&key),
            CollectionEvent::PageLoaded { page } => self.on_page_loaded(page),
        }
    }
}

/// Sorted, key-unique collection of `T` with a pagination cursor.
///
/// Readers load the current snapshot without locking. Writers derive the next
/// snapshot from the current one and swap it in; a writer that loses a race
/// recomputes from the winner's snapshot, so no update is lost.
pub struct PaginatedCollection<T: Entity> {
    snap: ArcSwap<CollectionSnapshot<T>>,
    cmp: Comparator<T>,
    epoch_tx: watch::Sender<u64>,
}

impl<T: Entity> PaginatedCollection<T> {
    pub fn new(cmp: Comparator<T>) -> Self {
        let (epoch_tx, _) = watch::channel(0u64);
        Self { snap: ArcSwap::from_pointee(CollectionSnapshot::default()), cmp, epoch_tx }
    }

    pub fn current(&self) -> Arc<CollectionSnapshot<T>> { self.snap.load_full() }

    pub fn items(&self) -> Vec<T> { self.snap.load().items.clone() }

    pub fn pagination(&self) -> Pagination { self.snap.load().pagination.clone() }

    pub fn can_load_more(&self) -> bool { self.snap.load().pagination.has_next() }

    /// Receives the epoch of every snapshot swapped in after subscribing.
    pub fn subscribe(&self) -> watch::Receiver<u64> { self.epoch_tx.subscribe() }

    fn update<F>(&self, op: &'static str, f: F)
    where
        F: Fn(&CollectionSnapshot<T>) -> (Vec<T>, Pagination),
    {
        let started = Instant::now();
        let prev = self.snap.rcu(|cur| {
            let (items, pagination) = f(cur.as_ref());
            CollectionSnapshot { epoch: cur.epoch.saturating_add(1), items, pagination }
        });
        let epoch = prev.epoch.saturating_add(1);
        self.epoch_tx.send_if_modified(|e| {
            if epoch > *e {
                *e = epoch;
                true
            } else {
                false
            }
        });
        histogram!("store_merge_ms", started.elapsed().as_secs_f64() * 1000.0);
        counter!("store_events_applied_total", 1u64);
        debug!(op, epoch, "collection snapshot swapped");
    }

    /// Merge a fetched page and take over its cursor.
    pub fn apply_page(&self, page: PaginationResult<T>) {
        self.update("page", |cur| {
            let items = merge_sorted(&cur.items, &page.items, T::key, |a, b| (self.cmp)(a, b));
            (items, page.pagination.clone())
        });
    }

    /// Drop everything and start over from `page` (pull-to-refresh).
    pub fn reset(&self, page: PaginationResult<T>) {
        self.update("reset", |_| {
            let items = merge_sorted(&[], &page.items, T::key, |a, b| (self.cmp)(a, b));
            (items, page.pagination.clone())
        });
    }

    pub fn upsert(&self, item: T) {
        self.update("upsert", |cur| {
            (upsert_sorted(&cur.items, item.clone(), T::key, |a, b| (self.cmp)(a, b)), cur.pagination.clone())
        });
    }

    pub fn remove(&self, key: &T::Key) {
        self.update("remove", |cur| (remove_by_key(&cur.items, key, T::key), cur.pagination.clone()));
    }

    /// Fetch the page after the current `next` cursor and merge it.
    ///
    /// Returns the number of records in the fetched page, or `0` without
    /// calling `source` when there is nothing more to load.
    pub async fn load_more<S>(&self, source: &S, limit: usize) -> Result<usize, StoreError>
    where
        S: PageSource<T> + ?Sized,
    {
        let Some(cursor) = self.snap.load().pagination.next.clone() else {
            return Ok(0);
        };
        let page = source.fetch_page(Some(cursor), limit).await.map_err(StoreError::Source)?;
        let n = page.items.len();
        self.apply_page(page);
        Ok(n)
    }

    /// Load the first page, replacing whatever is held.
    pub async fn refresh<S>(&self, source: &S, limit: usize) -> Result<usize, StoreError>
    where
        S: PageSource<T> + ?Sized,
    {
        let page = source.fetch_page(None, limit).await.map_err(StoreError::Source)?;
        let n = page.items.len();
        self.reset(page);
        Ok(n)
    }
}

impl<T: Entity> CollectionHandler<T> for PaginatedCollection<T> {
    fn on_added(&self, item: T) { self.upsert(item) }
    fn on_updated(&self, item: T) { self.upsert(item) }
    fn on_removed(&self, key: &T::Key) { self.remove(key) }
    fn on_page_loaded(&self, page: PaginationResult<T>) { self.apply_page(page) }
}

impl<T: Entity> EventSink<CollectionEvent<T>> for PaginatedCollection<T> {
    fn apply(&self, event: CollectionEvent<T>) { self.dispatch(event) }
}
