//! Request/reply correlation for asynchronous backend queries
//!
//! Every query gets a fresh id (1, 2, 3, ... never reused) and a pending
//! entry holding a one-shot completion handle. The entry is removed
//! exactly once: by the matching reply, by a failed dispatch, by the
//! timeout, or when the backend goes away.

use crate::error::{Error, Result};
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::{oneshot, Mutex};
use tracing::{debug, warn};

type ReplySender<T> = oneshot::Sender<Result<T>>;

pub struct Correlator<T> {
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, ReplySender<T>>>,
    timeout: Duration,
}

impl<T> Correlator<T> {
    pub fn new(timeout: Duration) -> Self {
        Self {
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            timeout,
        }
    }

    /// Issue a query.
    ///
    /// `dispatch` receives the allocated id and must write the query to
    /// the backend. The entry is registered before dispatch so a fast
    /// reply cannot race past it.
    pub async fn issue<F, Fut>(&self, dispatch: F) -> Result<T>
    where
        F: FnOnce(u64) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        self.pending.lock().await.insert(id, tx);

        if let Err(e) = dispatch(id).await {
            self.pending.lock().await.remove(&id);
            debug!(request_id = id, "Dispatch failed: {}", e);
            return Err(match e {
                Error::Dispatch(_) => e,
                other => Error::Dispatch(other.to_string()),
            });
        }

        match tokio::time::timeout(self.timeout, rx).await {
            Ok(Ok(reply)) => reply,
            Ok(Err(_)) => Err(Error::Communication("Backend disconnected".to_string())),
            Err(_) => {
                self.pending.lock().await.remove(&id);
                let ms = self.timeout.as_millis() as u64;
                warn!(request_id = id, "Backend query timed out after {}ms", ms);
                Err(Error::Timeout(ms))
            }
        }
    }

    /// Complete the query `id` with a reply.
    ///
    /// Returns false when no entry matches (unknown, already resolved, or
    /// timed out); such replies are logged and dropped.
    pub async fn resolve(&self, id: u64, reply: T) -> bool {
        self.complete(id, Ok(reply)).await
    }

    /// Fail the query `id`, e.g. when the backend answered with an error.
    pub async fn reject(&self, id: u64, error: Error) -> bool {
        self.complete(id, Err(error)).await
    }

    async fn complete(&self, id: u64, outcome: Result<T>) -> bool {
        let sender = self.pending.lock().await.remove(&id);
        match sender {
            Some(tx) => {
                if tx.send(outcome).is_err() {
                    debug!(request_id = id, "Reply arrived after the caller gave up");
                }
                true
            }
            None => {
                warn!(request_id = id, "Dropping reply with no pending request");
                false
            }
        }
    }

    /// Fail every outstanding query. Used when the backend stream closes.
    pub async fn fail_all(&self, reason: &str) -> usize {
        let drained: Vec<_> = self.pending.lock().await.drain().collect();
        let count = drained.len();
        for (_, tx) in drained {
            let _ = tx.send(Err(Error::Communication(reason.to_string())));
        }
        if count > 0 {
            debug!("Failed {} pending queries: {}", count, reason);
        }
        count
    }

    pub async fn pending_count(&self) -> usize {
        self.pending.lock().await.len()
    }
}
