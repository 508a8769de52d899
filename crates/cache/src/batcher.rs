//! Key batcher: collects offered keys and hands them to a handler in batches.

use std::collections::VecDeque;
use std::hash::Hash;
use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashSet;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, trace};

/// Receives each flushed batch. Runs on its own task per batch.
#[async_trait::async_trait]
pub trait BatchHandler<K>: Send + Sync {
    async fn on_batch(&self, keys: Vec<K>);
}

/// Deduplicating FIFO of keys waiting for the next flush.
pub struct KeyQueue<K> {
    seen: FxHashSet<K>,
    order: VecDeque<K>,
}

impl<K: Clone + Eq + Hash> KeyQueue<K> {
    pub fn new() -> Self { Self { seen: FxHashSet::default(), order: VecDeque::new() } }

    pub fn len(&self) -> usize { self.order.len() }
    pub fn is_empty(&self) -> bool { self.order.is_empty() }

    /// Returns false when `key` is already queued.
    pub fn push(&mut self, key: K) -> bool {
        if !self.seen.insert(key.clone()) {
            return false;
        }
        self.order.push_back(key);
        true
    }

    pub fn drain(&mut self) -> Vec<K> {
        self.seen.clear();
        self.order.drain(..).collect()
    }
}

impl<K: Clone + Eq + Hash> Default for KeyQueue<K> {
    fn default() -> Self { Self::new() }
}

/// Handle for offering keys. Dropping it (and every clone of its sender)
/// flushes what is queued and stops the batch loop.
pub struct Batcher<K> {
    tx: mpsc::UnboundedSender<K>,
    task: JoinHandle<()>,
}

impl<K> Batcher<K>
where
    K: Clone + Eq + Hash + Send + Sync + std::fmt::Debug + 'static,
{
    /// Start the batch loop. A batch is flushed once `max_batch_size` keys are
    /// queued or `window` has passed since the first key of the batch arrived.
    pub fn spawn(window: Duration, max_batch_size: usize, handler: Arc<dyn BatchHandler<K>>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<K>();
        let max_batch_size = max_batch_size.max(1);
        let task = tokio::spawn(async move {
            let mut queue = KeyQueue::new();
            let mut deadline: Option<Instant> = None;
            loop {
                let flush_now = tokio::select! {
                    maybe = rx.recv() => match maybe {
                        Some(key) => {
                            if queue.push(key) {
                                deadline.get_or_insert_with(|| Instant::now() + window);
                            }
                            queue.len() >= max_batch_size
                        }
                        None => {
                            debug!(queued = queue.len(), "offer channel closed; flushing and exiting batch loop");
                            flush(&mut queue, &handler);
                            break;
                        }
                    },
                    _ = sleep_until(deadline) => true,
                };
                if flush_now {
                    deadline = None;
                    flush(&mut queue, &handler);
                }
            }
            info!("batch loop stopped");
        });
        Self { tx, task }
    }

    /// Queue `key` for the next batch. Never waits. Returns false when the batch
    /// loop has stopped.
    pub fn offer(&self, key: K) -> bool {
        trace!(?key, "offer");
        self.tx.send(key).is_ok()
    }

    /// Flush what is queued and wait for the loop to stop. Batches already
    /// handed out keep running on their own tasks.
    pub async fn shutdown(self) {
        let Self { tx, task } = self;
        drop(tx);
        let _ = task.await;
    }
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(d) => tokio::time::sleep_until(d).await,
        None => std::future::pending::<()>().await,
    }
}

fn flush<K: Clone + Eq + Hash + Send + 'static>(queue: &mut KeyQueue<K>, handler: &Arc<dyn BatchHandler<K>>) {
    if queue.is_empty() {
        return;
    }
    let keys = queue.drain();
    debug!(size = keys.len(), "flushing batch");
    let handler = Arc::clone(handler);
    tokio::spawn(async move { handler.on_batch(keys).await });
}
