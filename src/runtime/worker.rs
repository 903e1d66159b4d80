//! Chunk workers - typed messages in, chunk layouts out
//!
//! `ChunkJob`/`ChunkResult` are plain serde messages so a worker can live
//! behind any transport; `LocalWorker` runs the layering on the blocking pool.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{Result, StrataError};
use crate::layout::{layer_chunk, ChunkLayout};
use crate::model::NodeId;

/// Work item: lay out one chunk in isolation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkJob {
    pub job_id: Uuid,
    pub chunk_index: usize,
    /// 0 for the first attempt
    pub attempt: u32,
    /// Member ids in seq order
    pub nodes: Arc<Vec<NodeId>>,
    /// Edges internal to the chunk
    pub edges: Arc<Vec<(NodeId, NodeId)>>,
}

/// Reply for a `ChunkJob`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkResult {
    pub job_id: Uuid,
    pub chunk_index: usize,
    pub worker: Arc<str>,
    pub layout: ChunkLayout,
    pub duration_ms: u64,
}

/// Anything that can lay out a chunk
#[async_trait]
pub trait ChunkWorker: Send + Sync {
    fn id(&self) -> &str;

    async fn run(&self, job: ChunkJob) -> Result<ChunkResult>;
}

/// In-process worker on tokio's blocking pool
#[derive(Debug, Clone)]
pub struct LocalWorker {
    id: Arc<str>,
}

impl LocalWorker {
    pub fn new(id: impl Into<Arc<str>>) -> Self {
        Self { id: id.into() }
    }
}

#[async_trait]
impl ChunkWorker for LocalWorker {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, job: ChunkJob) -> Result<ChunkResult> {
        let start = Instant::now();
        let nodes = Arc::clone(&job.nodes);
        let edges = Arc::clone(&job.edges);

        let layout = tokio::task::spawn_blocking(move || layer_chunk(&nodes, &edges))
            .await
            .map_err(|e| StrataError::ChunkFailure {
                job_id: job.job_id.to_string(),
                chunk: job.chunk_index,
                worker: self.id.to_string(),
                reason: format!("worker task aborted: {}", e),
            })??;

        Ok(ChunkResult {
            job_id: job.job_id,
            chunk_index: job.chunk_index,
            worker: Arc::clone(&self.id),
            layout,
            duration_ms: start.elapsed().as_millis() as u64,
        })
    }
}

/// Fixed set of workers; retries rotate to the next one
#[derive(Clone)]
pub struct WorkerPool {
    workers: Vec<Arc<dyn ChunkWorker>>,
}

impl WorkerPool {
    /// `workers` must not be empty
    pub fn new(workers: Vec<Arc<dyn ChunkWorker>>) -> Result<Self> {
        if workers.is_empty() {
            return Err(StrataError::ConfigError {
                reason: "worker pool needs at least one worker".to_string(),
            });
        }
        Ok(Self { workers })
    }

    /// `count` local workers named `local-0..`
    pub fn local(count: usize) -> Self {
        let workers = (0..count.max(1))
            .map(|i| Arc::new(LocalWorker::new(format!("local-{}", i))) as Arc<dyn ChunkWorker>)
            .collect();
        Self { workers }
    }

    /// Worker for a chunk attempt: `(chunk_index + attempt) mod n`
    pub fn pick(&self, chunk_index: usize, attempt: u32) -> Arc<dyn ChunkWorker> {
        let slot = (chunk_index + attempt as usize) % self.workers.len();
        Arc::clone(&self.workers[slot])
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }

    pub fn ids(&self) -> Vec<String> {
        self.workers.iter().map(|w| w.id().to_string()).collect()
    }
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool")
            .field("workers", &self.ids())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(nodes: &[&str], edges: &[(&str, &str)]) -> ChunkJob {
        ChunkJob {
            job_id: Uuid::new_v4(),
            chunk_index: 0,
            attempt: 0,
            nodes: Arc::new(nodes.iter().map(|n| Arc::from(*n)).collect()),
            edges: Arc::new(
                edges
                    .iter()
                    .map(|(s, t)| (Arc::from(*s), Arc::from(*t)))
                    .collect(),
            ),
        }
    }

    #[tokio::test]
    async fn local_worker_lays_out_chunk() {
        let worker = LocalWorker::new("local-0");
        let result = worker.run(job(&["a", "b"], &[("a", "b")])).await.unwrap();
        assert_eq!(&*result.worker, "local-0");
        assert_eq!(result.layout.entries[1].layer, 1);
    }

    #[tokio::test]
    async fn cyclic_chunk_is_not_a_worker_failure() {
        let worker = LocalWorker::new("local-0");
        let err = worker
            .run(job(&["a", "b"], &[("a", "b"), ("b", "a")]))
            .await
            .unwrap_err();
        assert!(matches!(err, StrataError::CycleDetected { .. }));
    }

    #[test]
    fn pick_rotates_on_retry() {
        let pool = WorkerPool::local(3);
        assert_eq!(pool.pick(0, 0).id(), "local-0");
        assert_eq!(pool.pick(0, 1).id(), "local-1");
        assert_eq!(pool.pick(2, 1).id(), "local-0");
    }

    #[test]
    fn empty_pool_is_rejected() {
        assert!(WorkerPool::new(Vec::new()).is_err());
        assert_eq!(WorkerPool::local(0).len(), 1);
    }

    #[test]
    fn chunk_job_is_serializable() {
        let json = serde_json::to_value(job(&["a"], &[])).unwrap();
        assert_eq!(json["nodes"][0], "a");
        assert_eq!(json["attempt"], 0);
    }
}
