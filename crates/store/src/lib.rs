//! Feeds store: sorted merge, comment thread patching and the observable
//! containers built on them.
//!
//! Data flow: a fetched page or a real-time event reaches a container (directly
//! or through [`spawn_dispatch`]), the container computes the next snapshot with
//! the pure engines in [`merge`] and [`thread`], and swaps it in atomically.

#![forbid(unsafe_code)]

use feeds_core::PaginationResult;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::info;

pub mod collection;
pub mod comments;
pub mod merge;
pub mod thread;

pub use collection::{CollectionHandler, CollectionSnapshot, PaginatedCollection};
pub use comments::{CommentThread, ThreadHandler, ThreadSnapshot};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("page source: {0:#}")]
    Source(anyhow::Error),
}

/// Fetches one page of `T` after `cursor` (`None` = first page).
#[async_trait::async_trait]
pub trait PageSource<T>: Send + Sync {
    async fn fetch_page(&self, cursor: Option<String>, limit: usize) -> anyhow::Result<PaginationResult<T>>;
}

/// A container that accepts events of type `E`.
pub trait EventSink<E>: Send + Sync {
    fn apply(&self, event: E);
}

impl<E, S: EventSink<E> + ?Sized> EventSink<E> for std::sync::Arc<S> {
    fn apply(&self, event: E) { (**self).apply(event) }
}

/// Spawn a loop applying events to `sink` strictly in the order they are sent.
///
/// This makes the loop the only writer of the container. The loop ends once all
/// senders are dropped and the queue is drained.
pub fn spawn_dispatch<E, S>(sink: S, cap: usize) -> (mpsc::Sender<E>, JoinHandle<u64>)
where
    E: Send + 'static,
    S: EventSink<E> + 'static,
{
    let (tx, mut rx) = mpsc::channel::<E>(cap.max(1));
    let handle = tokio::spawn(async move {
        let mut applied = 0u64;
        while let Some(ev) = rx.recv().await {
            sink.apply(ev);
            applied += 1;
        }
        info!(applied, "dispatch loop stopped");
        applied
    });
    (tx, handle)
}
