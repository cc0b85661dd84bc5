//! Serial FIFO of pending write operations.
//!
//! [`OfflineQueue::add`] appends an operation and, unless another caller
//! is already draining, runs queued operations one at a time in order.
//! A failing operation goes back to the front of the queue and draining
//! stops; nothing else runs until the next `add` restarts the drain with
//! the failed operation first. A permanently failing operation therefore
//! blocks everything queued behind it: ordering wins over throughput.

use std::collections::VecDeque;
use std::future::Future;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::Mutex;

use crate::error::ClientError;

/// A re-runnable, zero-argument async write.
pub type QueuedOperation = Box<dyn FnMut() -> BoxFuture<'static, Result<(), ClientError>> + Send>;

/// What a call to [`OfflineQueue::add`] observed.
#[derive(Debug, Clone, PartialEq)]
pub enum DrainOutcome {
    /// This caller drained the queue to empty.
    Drained,
    /// Another caller is draining; the operation will run in turn.
    Deferred,
    /// An operation failed; it and everything behind it stay queued.
    Stalled {
        /// Operations left in the queue, the failed one included.
        remaining: usize,
        error: ClientError,
    },
}

struct QueueState {
    pending: VecDeque<QueuedOperation>,
    processing: bool,
}

/// Strictly sequential queue of writes.
pub struct OfflineQueue {
    state: Mutex<QueueState>,
}

impl Default for OfflineQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl OfflineQueue {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                pending: VecDeque::new(),
                processing: false,
            }),
        }
    }

    /// Enqueue `op` and drain the queue unless a drain is already running.
    ///
    /// `op` may be invoked more than once if it fails and is retried by a
    /// later drain.
    pub async fn add<F, Fut>(&self, mut op: F) -> DrainOutcome
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<(), ClientError>> + Send + 'static,
    {
        let boxed: QueuedOperation = Box::new(move || op().boxed());
        {
            let mut state = self.state.lock().await;
            state.pending.push_back(boxed);
            if state.processing {
                return DrainOutcome::Deferred;
            }
            state.processing = true;
        }
        self.drain().await
    }

    /// Number of operations waiting (including a stalled one).
    pub async fn len(&self) -> usize {
        self.state.lock().await.pending.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn is_processing(&self) -> bool {
        self.state.lock().await.processing
    }

    /// Run operations front to back. The lock is released while an
    /// operation runs so other callers can keep enqueueing.
    async fn drain(&self) -> DrainOutcome {
        loop {
            let mut op = {
                let mut state = self.state.lock().await;
                match state.pending.pop_front() {
                    Some(op) => op,
                    None => {
                        state.processing = false;
                        return DrainOutcome::Drained;
                    }
                }
            };

            if let Err(error) = op().await {
                let mut state = self.state.lock().await;
                state.pending.push_front(op);
                state.processing = false;
                let remaining = state.pending.len();
                tracing::warn!(
                    remaining,
                    error = %error,
                    "Queued operation failed, queue paused until next add",
                );
                return DrainOutcome::Stalled { remaining, error };
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
