//! DistributedCoordinator - bulk relayout across a worker pool
//!
//! Partition ─► dispatch chunks (JoinSet, bounded by a semaphore) ─► merge
//! ─► finalize ─► single atomic commit.
//!
//! Each chunk attempt has a timeout; failures retry with backoff on the next
//! worker. A failed or cancelled job never writes to the store. The graph
//! lease is taken at submission and held until the job ends.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{watch, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::config::EngineSettings;
use crate::error::{Result, StrataError};
use crate::event::{EventKind, EventLog};
use crate::graph::LayoutGraph;
use crate::layout::{finalize, merge_chunks, ChunkLayout, ComputedLayout, PreparedGraph};
use crate::model::{LayoutOptions, NodeId};
use crate::resilience::RetryPolicy;
use crate::runtime::lease::{Lease, LeaseManager};
use crate::runtime::worker::{ChunkJob, WorkerPool};
use crate::store::{GraphStore, LayoutBatch};

// ═══════════════════════════════════════════════════════════════
// Partitioning
// ═══════════════════════════════════════════════════════════════

/// How a graph is cut into chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PartitionStrategy {
    /// Pack weakly connected components greedily; a component is never split
    Components { max_chunk_nodes: usize },
    /// Consecutive seq ranges of `size` nodes
    Batch { size: usize },
}

/// Chunks (members in seq order) and the edges crossing between them
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Partition {
    pub chunks: Vec<Vec<usize>>,
    pub cross_edges: Vec<(usize, usize)>,
}

impl Partition {
    /// Chunk index of every node
    pub fn assignment(&self, node_count: usize) -> Vec<usize> {
        let mut owner = vec![0; node_count];
        for (chunk, members) in self.chunks.iter().enumerate() {
            for &m in members {
                owner[m] = chunk;
            }
        }
        owner
    }
}

impl PartitionStrategy {
    pub fn partition(&self, graph: &LayoutGraph) -> Partition {
        let mut chunks: Vec<Vec<usize>> = match *self {
            PartitionStrategy::Batch { size } => (0..graph.len())
                .collect::<Vec<_>>()
                .chunks(size.max(1))
                .map(<[usize]>::to_vec)
                .collect(),
            PartitionStrategy::Components { max_chunk_nodes } => {
                let limit = max_chunk_nodes.max(1);
                let mut packed: Vec<Vec<usize>> = Vec::new();
                let mut current: Vec<usize> = Vec::new();
                for component in graph.weak_components() {
                    if !current.is_empty() && current.len() + component.len() > limit {
                        packed.push(std::mem::take(&mut current));
                    }
                    current.extend(component);
                }
                if !current.is_empty() {
                    packed.push(current);
                }
                packed
            }
        };
        for chunk in &mut chunks {
            chunk.sort_unstable();
        }

        let mut partition = Partition {
            chunks,
            cross_edges: Vec::new(),
        };
        let owner = partition.assignment(graph.len());
        partition.cross_edges = graph
            .edges()
            .filter(|&(s, t)| owner[s] != owner[t])
            .collect();
        partition
    }
}

// ═══════════════════════════════════════════════════════════════
// Job state
// ═══════════════════════════════════════════════════════════════

/// Observable lifecycle of a bulk job
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum JobState {
    Queued,
    Running { completed: usize, total: usize },
    Merging,
    Persisting,
    Done,
    Failed { reason: String },
}

impl JobState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, JobState::Done | JobState::Failed { .. })
    }
}

/// Caller's view of a submitted job
#[derive(Debug, Clone)]
pub struct JobHandle {
    id: Uuid,
    graph_id: Option<Arc<str>>,
    state: watch::Receiver<JobState>,
    cancel: CancellationToken,
}

impl JobHandle {
    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn graph_id(&self) -> Option<&str> {
        self.graph_id.as_deref()
    }

    pub fn state(&self) -> JobState {
        self.state.borrow().clone()
    }

    /// Request cooperative cancellation (honored at chunk boundaries)
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait until the job is Done or Failed
    pub async fn wait(&self) -> JobState {
        let mut rx = self.state.clone();
        let done = rx.wait_for(JobState::is_terminal).await.map(|s| (*s).clone());
        match done {
            Ok(state) => state,
            Err(_) => rx.borrow().clone(),
        }
    }
}

#[derive(Debug)]
struct JobEntry {
    state: watch::Receiver<JobState>,
    cancel: CancellationToken,
    finished_at: Option<Instant>,
}

// ═══════════════════════════════════════════════════════════════
// Coordinator
// ═══════════════════════════════════════════════════════════════

struct Inner {
    pool: WorkerPool,
    store: Arc<dyn GraphStore>,
    leases: LeaseManager,
    events: EventLog,
    settings: EngineSettings,
    retry: RetryPolicy,
    permits: Arc<Semaphore>,
    jobs: DashMap<Uuid, JobEntry>,
}

#[derive(Clone)]
pub struct DistributedCoordinator {
    inner: Arc<Inner>,
}

impl std::fmt::Debug for DistributedCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DistributedCoordinator")
            .field("pool", &self.inner.pool)
            .field("jobs", &self.inner.jobs.len())
            .finish()
    }
}

impl DistributedCoordinator {
    pub fn new(
        pool: WorkerPool,
        store: Arc<dyn GraphStore>,
        leases: LeaseManager,
        events: EventLog,
        settings: EngineSettings,
    ) -> Self {
        let retry = RetryPolicy::new(settings.retry_config());
        let permits = Arc::new(Semaphore::new(settings.max_concurrent_chunks.max(1)));
        Self {
            inner: Arc::new(Inner {
                pool,
                store,
                leases,
                events,
                settings,
                retry,
                permits,
                jobs: DashMap::new(),
            }),
        }
    }

    /// Start a full relayout of a stored graph
    ///
    /// Fails fast with `LockTimeout` when another job holds the graph, or
    /// `GraphNotFound` for an unknown graph. Progress is on the handle.
    pub async fn submit_relayout(&self, graph_id: &str, options: LayoutOptions) -> Result<JobHandle> {
        let node_count = self.inner.store.node_count(graph_id).await?;
        let job_id = Uuid::new_v4();
        let lease = self
            .inner
            .leases
            .acquire(graph_id, &format!("job-{}", job_id))
            .await?;

        let graph_id: Arc<str> = Arc::from(graph_id);
        let (tx, rx) = watch::channel(JobState::Queued);
        let cancel = CancellationToken::new();
        self.inner.jobs.insert(
            job_id,
            JobEntry {
                state: rx.clone(),
                cancel: cancel.clone(),
                finished_at: None,
            },
        );
        self.inner.events.emit(EventKind::JobQueued {
            job_id,
            graph_id: Some(Arc::clone(&graph_id)),
            node_count,
        });
        tracing::info!(%job_id, graph = %graph_id, node_count, "relayout queued");

        let coordinator = self.clone();
        let job_graph = Arc::clone(&graph_id);
        let job_cancel = cancel.clone();
        tokio::spawn(async move {
            coordinator
                .run_relayout(job_id, job_graph, options, lease, tx, job_cancel)
                .await;
        });

        Ok(JobHandle {
            id: job_id,
            graph_id: Some(graph_id),
            state: rx,
            cancel,
        })
    }

    async fn run_relayout(
        &self,
        job_id: Uuid,
        graph_id: Arc<str>,
        options: LayoutOptions,
        lease: Lease,
        progress: watch::Sender<JobState>,
        cancel: CancellationToken,
    ) {
        let start = Instant::now();
        let store = Arc::clone(&self.inner.store);

        let outcome: Result<(usize, u64)> = async {
            let snapshot = store.load_graph(&graph_id).await?;
            let prepared = Arc::new(PreparedGraph::from_snapshot(&snapshot)?);
            let computed = self
                .compute(job_id, prepared, &options, &cancel, &progress)
                .await?;

            // Last chance to cancel; the commit itself is not interruptible
            if cancel.is_cancelled() {
                return Err(StrataError::Cancelled {
                    job_id: job_id.to_string(),
                });
            }
            progress.send_replace(JobState::Persisting);

            let layouts: Vec<_> = computed
                .entries()
                .map(|(id, layout)| (Arc::clone(id), *layout))
                .collect();
            let count = layouts.len();
            let version = store
                .write_layout(
                    &graph_id,
                    LayoutBatch {
                        edges: Vec::new(),
                        layouts,
                        replace_all: true,
                        expected_version: Some(snapshot.version),
                    },
                )
                .await?;
            Ok((count, version))
        }
        .await;

        // Stamp before publishing so a woken waiter can already sweep the job
        if let Some(mut entry) = self.inner.jobs.get_mut(&job_id) {
            entry.finished_at = Some(Instant::now());
        }
        match outcome {
            Ok((node_count, version)) => {
                let duration_ms = start.elapsed().as_millis() as u64;
                self.inner.events.emit(EventKind::JobCommitted {
                    job_id,
                    graph_id: Arc::clone(&graph_id),
                    node_count,
                    version,
                    duration_ms,
                });
                tracing::info!(%job_id, graph = %graph_id, node_count, version, duration_ms, "relayout committed");
                progress.send_replace(JobState::Done);
            }
            Err(e) => {
                tracing::warn!(%job_id, graph = %graph_id, error = %e, "relayout failed; nothing committed");
                self.inner.events.emit(EventKind::JobFailed {
                    job_id,
                    error: e.to_string(),
                });
                progress.send_replace(JobState::Failed {
                    reason: e.to_string(),
                });
            }
        }
        tracing::debug!(%job_id, held_ms = lease.held_for().as_millis() as u64, "releasing lease");
        drop(lease);
    }

    /// Lay out a prepared graph across the pool, without touching the store
    pub async fn compute_detached(
        &self,
        prepared: Arc<PreparedGraph>,
        options: &LayoutOptions,
    ) -> Result<ComputedLayout> {
        let job_id = Uuid::new_v4();
        let (tx, _rx) = watch::channel(JobState::Queued);
        self.inner.events.emit(EventKind::JobQueued {
            job_id,
            graph_id: None,
            node_count: prepared.len(),
        });
        let result = self
            .compute(job_id, prepared, options, &CancellationToken::new(), &tx)
            .await;
        if let Err(e) = &result {
            self.inner.events.emit(EventKind::JobFailed {
                job_id,
                error: e.to_string(),
            });
        }
        result
    }

    /// Partition, dispatch, merge and finalize
    async fn compute(
        &self,
        job_id: Uuid,
        prepared: Arc<PreparedGraph>,
        options: &LayoutOptions,
        cancel: &CancellationToken,
        progress: &watch::Sender<JobState>,
    ) -> Result<ComputedLayout> {
        // Cycles are deterministic: reject before spending worker time
        prepared.graph.topological_order()?;

        let partition = self.inner.settings.partition_strategy().partition(&prepared.graph);
        let total = partition.chunks.len();
        self.inner.events.emit(EventKind::JobPartitioned {
            job_id,
            chunks: total,
            cross_edges: partition.cross_edges.len(),
        });
        progress.send_replace(JobState::Running {
            completed: 0,
            total,
        });

        let owner = partition.assignment(prepared.len());
        let mut join_set = JoinSet::new();
        for (chunk_index, members) in partition.chunks.iter().enumerate() {
            let graph = &prepared.graph;
            let nodes: Vec<NodeId> = members.iter().map(|&m| Arc::clone(graph.id(m))).collect();
            let edges: Vec<(NodeId, NodeId)> = members
                .iter()
                .flat_map(|&m| {
                    graph
                        .successors(m)
                        .iter()
                        .filter(|&&t| owner[t] == chunk_index)
                        .map(move |&t| (Arc::clone(graph.id(m)), Arc::clone(graph.id(t))))
                })
                .collect();

            let coordinator = self.clone();
            let cancel = cancel.clone();
            let nodes = Arc::new(nodes);
            let edges = Arc::new(edges);
            join_set.spawn(async move {
                let result = coordinator
                    .run_chunk(job_id, chunk_index, nodes, edges, cancel)
                    .await;
                (chunk_index, result)
            });
        }

        let mut layouts: Vec<Option<ChunkLayout>> = vec![None; total];
        let mut completed = 0;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    join_set.abort_all();
                    return Err(StrataError::Cancelled { job_id: job_id.to_string() });
                }
                next = join_set.join_next() => match next {
                    None => break,
                    Some(Ok((chunk_index, Ok(layout)))) => {
                        layouts[chunk_index] = Some(layout);
                        completed += 1;
                        progress.send_replace(JobState::Running { completed, total });
                    }
                    Some(Ok((_, Err(e)))) => {
                        join_set.abort_all();
                        return Err(e);
                    }
                    Some(Err(join_error)) => {
                        join_set.abort_all();
                        return Err(StrataError::TaskAborted {
                            job_id: job_id.to_string(),
                            stage: "chunk".to_string(),
                            reason: join_error.to_string(),
                        });
                    }
                }
            }
        }

        progress.send_replace(JobState::Merging);
        let events = self.inner.events.clone();
        let options = options.clone();
        let cross_edges = partition.cross_edges;
        tokio::task::spawn_blocking(move || {
            let merged = merge_chunks(
                &prepared.graph,
                layouts.into_iter().flatten().collect(),
                &cross_edges,
            )?;
            events.emit(EventKind::JobMerged {
                job_id,
                shifted: merged.shifted,
                max_layer: merged.topology.max_layer(),
            });
            finalize(&prepared, merged.topology, &options, &events)
        })
        .await
        .map_err(|e| StrataError::TaskAborted {
            job_id: job_id.to_string(),
            stage: "merge".to_string(),
            reason: e.to_string(),
        })?
    }

    /// One chunk with timeout, retries and worker rotation
    async fn run_chunk(
        &self,
        job_id: Uuid,
        chunk_index: usize,
        nodes: Arc<Vec<NodeId>>,
        edges: Arc<Vec<(NodeId, NodeId)>>,
        cancel: CancellationToken,
    ) -> Result<ChunkLayout> {
        let _permit = Arc::clone(&self.inner.permits)
            .acquire_owned()
            .await
            .map_err(|_| StrataError::Cancelled {
                job_id: job_id.to_string(),
            })?;
        let timeout = self.inner.settings.chunk_timeout();

        self.inner
            .retry
            .execute(|attempt| {
                let inner = Arc::clone(&self.inner);
                let cancel = cancel.clone();
                let job = ChunkJob {
                    job_id,
                    chunk_index,
                    attempt,
                    nodes: Arc::clone(&nodes),
                    edges: Arc::clone(&edges),
                };
                async move {
                    if cancel.is_cancelled() {
                        return Err(StrataError::Cancelled {
                            job_id: job_id.to_string(),
                        });
                    }
                    let worker = inner.pool.pick(chunk_index, attempt);
                    let worker_id: Arc<str> = Arc::from(worker.id());
                    inner.events.emit(EventKind::ChunkDispatched {
                        job_id,
                        chunk: chunk_index,
                        worker: Arc::clone(&worker_id),
                        attempt,
                        node_count: job.nodes.len(),
                    });

                    let started = Instant::now();
                    let outcome = match tokio::time::timeout(timeout, worker.run(job)).await {
                        Ok(Ok(result)) => Ok(result.layout),
                        Ok(Err(e)) => Err(classify_worker_error(e, job_id, chunk_index, &worker_id)),
                        Err(_) => Err(StrataError::ChunkTimeout {
                            job_id: job_id.to_string(),
                            chunk: chunk_index,
                            timeout_ms: duration_ms(timeout),
                        }),
                    };

                    match &outcome {
                        Ok(_) => {
                            inner.events.emit(EventKind::ChunkCompleted {
                                job_id,
                                chunk: chunk_index,
                                worker: worker_id,
                                duration_ms: duration_ms(started.elapsed()),
                            });
                        }
                        Err(e) => {
                            tracing::warn!(%job_id, chunk = chunk_index, worker = %worker_id, attempt, error = %e, "chunk attempt failed");
                            inner.events.emit(EventKind::ChunkFailed {
                                job_id,
                                chunk: chunk_index,
                                worker: worker_id,
                                attempt,
                                error: e.to_string(),
                            });
                        }
                    }
                    outcome
                }
            })
            .await
    }

    pub fn job_state(&self, job_id: Uuid) -> Option<JobState> {
        self.inner
            .jobs
            .get(&job_id)
            .map(|entry| entry.state.borrow().clone())
    }

    pub fn cancel(&self, job_id: Uuid) -> Result<()> {
        let entry = self
            .inner
            .jobs
            .get(&job_id)
            .ok_or_else(|| StrataError::JobNotFound {
                job_id: job_id.to_string(),
            })?;
        entry.cancel.cancel();
        Ok(())
    }

    /// Drop jobs that ended at least `older_than` ago; returns how many went
    pub fn forget_finished(&self, older_than: Duration) -> usize {
        let before = self.inner.jobs.len();
        self.inner.jobs.retain(|_, entry| {
            entry
                .finished_at
                .map_or(true, |at| at.elapsed() < older_than)
        });
        before.saturating_sub(self.inner.jobs.len())
    }

    /// Jobs still in the registry, running or not yet swept
    pub fn tracked_jobs(&self) -> usize {
        self.inner.jobs.len()
    }

    pub fn events(&self) -> &EventLog {
        &self.inner.events
    }

    pub fn pool(&self) -> &WorkerPool {
        &self.inner.pool
    }
}

/// Deterministic errors pass through; anything else becomes a retryable chunk failure
fn classify_worker_error(
    error: StrataError,
    job_id: Uuid,
    chunk: usize,
    worker: &str,
) -> StrataError {
    match error {
        StrataError::CycleDetected { .. }
        | StrataError::ValidationError { .. }
        | StrataError::DuplicateNode { .. }
        | StrataError::NodeNotFound { .. }
        | StrataError::ChunkFailure { .. }
        | StrataError::ChunkTimeout { .. } => error,
        other => StrataError::ChunkFailure {
            job_id: job_id.to_string(),
            chunk,
            worker: worker.to_string(),
            reason: other.to_string(),
        },
    }
}

fn duration_ms(d: Duration) -> u64 {
    d.as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn graph(n: usize, edges: &[(usize, usize)]) -> LayoutGraph {
        let mut g = LayoutGraph::new();
        for i in 0..n {
            g.add_node(&format!("n{}", i)).unwrap();
        }
        for &(s, t) in edges {
            g.add_edge(s, t).unwrap();
        }
        g
    }

    #[test]
    fn components_pack_without_cross_edges() {
        let g = graph(6, &[(0, 1), (2, 3), (4, 5)]);
        let p = PartitionStrategy::Components { max_chunk_nodes: 4 }.partition(&g);
        assert_eq!(p.chunks, vec![vec![0, 1, 2, 3], vec![4, 5]]);
        assert!(p.cross_edges.is_empty());
    }

    #[test]
    fn oversized_component_stays_whole() {
        let g = graph(6, &[(0, 1), (1, 2), (2, 3), (4, 5)]);
        let p = PartitionStrategy::Components { max_chunk_nodes: 2 }.partition(&g);
        assert_eq!(p.chunks, vec![vec![0, 1, 2, 3], vec![4, 5]]);
        assert!(p.cross_edges.is_empty());
    }

    #[test]
    fn batch_slices_by_seq() {
        let g = graph(5, &[(4, 0)]);
        let p = PartitionStrategy::Batch { size: 2 }.partition(&g);
        assert_eq!(p.chunks, vec![vec![0, 1], vec![2, 3], vec![4]]);
        assert_eq!(p.cross_edges, vec![(4, 0)]);
        assert_eq!(p.assignment(5), vec![0, 0, 1, 1, 2]);
    }

    #[test]
    fn job_state_serializes_with_tag() {
        let json = serde_json::to_value(JobState::Running {
            completed: 1,
            total: 3,
        })
        .unwrap();
        assert_eq!(json["state"], "running");
        assert_eq!(json["total"], 3);
        assert!(JobState::Failed { reason: "x".into() }.is_terminal());
        assert!(!JobState::Merging.is_terminal());
    }

    #[test]
    fn worker_errors_are_classified() {
        let job = Uuid::new_v4();
        let io = StrataError::IoError(std::io::Error::other("pipe closed"));
        assert!(matches!(
            classify_worker_error(io, job, 1, "w"),
            StrataError::ChunkFailure { chunk: 1, .. }
        ));
        let cycle = StrataError::CycleDetected {
            source_id: "a".into(),
            target_id: "b".into(),
            cycle: "a -> b -> a".into(),
        };
        assert!(matches!(
            classify_worker_error(cycle, job, 0, "w"),
            StrataError::CycleDetected { .. }
        ));
    }
}
