//! LeaseManager - per-graph exclusive write lease
//!
//! One tokio Mutex per graph id. A lease is an owned guard, so it can be
//! moved into a spawned job and released on drop, on success or failure.
//! The last lease to leave an uncontended graph removes its mutex.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::error::{Result, StrataError};

/// Held write lease on one graph
#[derive(Debug)]
pub struct Lease {
    graph_id: Arc<str>,
    holder: Arc<str>,
    acquired_at: Instant,
    holders: Arc<DashMap<Arc<str>, Arc<str>>>,
    locks: Arc<DashMap<Arc<str>, Arc<Mutex<()>>>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Lease {
    pub fn graph_id(&self) -> &str {
        &self.graph_id
    }

    pub fn holder(&self) -> &str {
        &self.holder
    }

    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.holders.remove(&self.graph_id);
        drop(self.guard.take());
        // Only the map's own handle left: nobody holds or waits on this graph
        self.locks
            .remove_if(&self.graph_id, |_, lock| Arc::strong_count(lock) == 1);
        tracing::trace!(graph = %self.graph_id, holder = %self.holder, "lease released");
    }
}

#[derive(Debug, Clone)]
pub struct LeaseManager {
    locks: Arc<DashMap<Arc<str>, Arc<Mutex<()>>>>,
    holders: Arc<DashMap<Arc<str>, Arc<str>>>,
    timeout: Duration,
}

impl LeaseManager {
    pub fn new(timeout: Duration) -> Self {
        Self {
            locks: Arc::new(DashMap::new()),
            holders: Arc::new(DashMap::new()),
            timeout,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    fn lock_for(&self, graph_id: &str) -> Arc<Mutex<()>> {
        Arc::clone(
            self.locks
                .entry(Arc::from(graph_id))
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .value(),
        )
    }

    /// Acquire within the configured timeout or fail with `LockTimeout`
    pub async fn acquire(&self, graph_id: &str, holder: &str) -> Result<Lease> {
        self.acquire_within(graph_id, holder, self.timeout).await
    }

    pub async fn acquire_within(
        &self,
        graph_id: &str,
        holder: &str,
        timeout: Duration,
    ) -> Result<Lease> {
        let lock = self.lock_for(graph_id);
        match tokio::time::timeout(timeout, lock.lock_owned()).await {
            Ok(guard) => Ok(self.lease(graph_id, holder, guard)),
            Err(_) => {
                tracing::debug!(
                    graph = graph_id,
                    holder,
                    current = ?self.holder_of(graph_id),
                    "lease wait timed out"
                );
                Err(StrataError::LockTimeout {
                    graph_id: graph_id.to_string(),
                    waited_ms: timeout.as_millis() as u64,
                })
            }
        }
    }

    /// Acquire only if free right now
    pub fn try_acquire(&self, graph_id: &str, holder: &str) -> Result<Lease> {
        let lock = self.lock_for(graph_id);
        match lock.try_lock_owned() {
            Ok(guard) => Ok(self.lease(graph_id, holder, guard)),
            Err(_) => Err(StrataError::LockTimeout {
                graph_id: graph_id.to_string(),
                waited_ms: 0,
            }),
        }
    }

    fn lease(&self, graph_id: &str, holder: &str, guard: OwnedMutexGuard<()>) -> Lease {
        let graph_id: Arc<str> = Arc::from(graph_id);
        let holder: Arc<str> = Arc::from(holder);
        self.holders.insert(Arc::clone(&graph_id), Arc::clone(&holder));
        Lease {
            graph_id,
            holder,
            acquired_at: Instant::now(),
            holders: Arc::clone(&self.holders),
            locks: Arc::clone(&self.locks),
            guard: Some(guard),
        }
    }

    /// Current holder of a graph's lease, if any
    pub fn holder_of(&self, graph_id: &str) -> Option<Arc<str>> {
        self.holders.get(graph_id).map(|h| Arc::clone(h.value()))
    }

    pub fn is_held(&self, graph_id: &str) -> bool {
        self.holders.contains_key(graph_id)
    }

    /// Graphs with a live lock entry
    pub fn tracked_graphs(&self) -> usize {
        self.locks.len()
    }
}
