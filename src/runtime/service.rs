//! LayoutService - the facade callers talk to
//!
//! Routes stateless calculations to the in-process pipeline or the worker
//! pool by size, bulk relayouts to the coordinator, and edge inserts to the
//! per-graph writers.
//!
//! Finished jobs and edge tickets stay pollable for `engine.retention_ms`;
//! each submission sweeps out the expired ones.

use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::instrument;
use uuid::Uuid;

use crate::config::StrataConfig;
use crate::error::{Result, StrataError};
use crate::event::EventLog;
use crate::layout::{compute_layout, failure_response, EdgeReport, PreparedGraph};
use crate::model::{LayoutOptions, LayoutRequest, LayoutResponse};
use crate::runtime::coordinator::{DistributedCoordinator, JobHandle, JobState};
use crate::runtime::lease::LeaseManager;
use crate::runtime::queue::{EdgeTaskState, GraphWriters};
use crate::runtime::worker::WorkerPool;
use crate::store::GraphStore;

/// Result of `add_edge`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum TaskHandle {
    /// Small graph: applied and committed before returning
    Completed { report: EdgeReport },
    /// Large graph: queued on the graph's writer
    Pending { ticket: Uuid, graph_id: String },
}

impl TaskHandle {
    pub fn ticket(&self) -> Option<Uuid> {
        match self {
            TaskHandle::Pending { ticket, .. } => Some(*ticket),
            TaskHandle::Completed { .. } => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ServingStatus {
    Serving,
    NotServing,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HealthStatus {
    pub status: ServingStatus,
    pub message: String,
}

#[derive(Clone)]
pub struct LayoutService {
    config: StrataConfig,
    store: Arc<dyn GraphStore>,
    coordinator: DistributedCoordinator,
    writers: GraphWriters,
    events: EventLog,
}

impl std::fmt::Debug for LayoutService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LayoutService")
            .field("config", &self.config)
            .field("coordinator", &self.coordinator)
            .field("writers", &self.writers)
            .finish()
    }
}

impl LayoutService {
    /// Service with `config.engine.workers` local workers
    pub fn new(store: Arc<dyn GraphStore>, config: StrataConfig) -> Self {
        let pool = WorkerPool::local(config.engine.workers);
        Self::with_pool(store, config, pool)
    }

    /// Service over a caller-supplied worker pool
    pub fn with_pool(store: Arc<dyn GraphStore>, config: StrataConfig, pool: WorkerPool) -> Self {
        let events = EventLog::new();
        let leases = LeaseManager::new(config.engine.lock_timeout());
        let coordinator = DistributedCoordinator::new(
            pool,
            Arc::clone(&store),
            leases.clone(),
            events.clone(),
            config.engine.clone(),
        );
        let writers = GraphWriters::new(
            Arc::clone(&store),
            leases,
            events.clone(),
            config.layout.clone(),
            config.engine.queue_capacity,
        )
        .with_idle_timeout(config.engine.writer_idle());
        Self {
            config,
            store,
            coordinator,
            writers,
            events,
        }
    }

    /// Stateless full layout; failures are reported in the response
    #[instrument(skip(self, request), fields(nodes = request.nodes.len(), edges = request.edges.len()))]
    pub async fn calculate_layout(&self, request: LayoutRequest) -> LayoutResponse {
        let start = Instant::now();
        let options = request
            .options
            .clone()
            .unwrap_or_else(|| self.config.layout.clone());

        let prepared = match PreparedGraph::from_request(&request) {
            Ok(prepared) => prepared,
            Err(e) => {
                tracing::debug!(error = %e, "layout request rejected");
                return failure_response(&e, None, elapsed_ms(start));
            }
        };

        let prepared = Arc::new(prepared);
        let result = if prepared.len() <= self.config.engine.sync_threshold {
            compute_layout(&prepared, &options, &self.events)
        } else {
            tracing::info!(nodes = prepared.len(), "dispatching layout to worker pool");
            self.coordinator
                .compute_detached(Arc::clone(&prepared), &options)
                .await
        };

        match result {
            Ok(computed) => computed.into_response(elapsed_ms(start)),
            Err(e) => {
                tracing::debug!(error = %e, "layout failed");
                failure_response(&e, Some(&prepared), elapsed_ms(start))
            }
        }
    }

    /// Bulk relayout of a stored graph
    #[instrument(skip(self, options))]
    pub async fn relayout_graph(
        &self,
        graph_id: &str,
        options: Option<LayoutOptions>,
    ) -> Result<JobHandle> {
        self.sweep();
        let options = options.unwrap_or_else(|| self.config.layout.clone());
        self.coordinator.submit_relayout(graph_id, options).await
    }

    /// Insert one edge into a stored graph
    #[instrument(skip(self))]
    pub async fn add_edge(&self, graph_id: &str, source_id: &str, target_id: &str) -> Result<TaskHandle> {
        self.sweep();
        let node_count = self.store.node_count(graph_id).await?;
        if node_count <= self.config.engine.sync_threshold {
            let report = self.writers.apply(graph_id, source_id, target_id).await?;
            return Ok(TaskHandle::Completed { report });
        }
        let ticket = self.writers.enqueue(graph_id, source_id, target_id).await?;
        tracing::debug!(%ticket, node_count, "edge queued");
        Ok(TaskHandle::Pending {
            ticket,
            graph_id: graph_id.to_string(),
        })
    }

    pub fn edge_status(&self, ticket: Uuid) -> Result<EdgeTaskState> {
        self.writers
            .status(ticket)
            .ok_or_else(|| StrataError::JobNotFound {
                job_id: ticket.to_string(),
            })
    }

    pub fn job_status(&self, job_id: Uuid) -> Result<JobState> {
        self.coordinator
            .job_state(job_id)
            .ok_or_else(|| StrataError::JobNotFound {
                job_id: job_id.to_string(),
            })
    }

    pub fn cancel_job(&self, job_id: Uuid) -> Result<()> {
        self.coordinator.cancel(job_id)
    }

    /// Forget jobs and tickets finished longer than the retention ago
    pub fn sweep(&self) -> usize {
        let retention = self.config.engine.retention();
        let removed =
            self.coordinator.forget_finished(retention) + self.writers.forget_finished(retention);
        if removed > 0 {
            tracing::debug!(removed, "swept finished jobs and tickets");
        }
        removed
    }

    pub fn health(&self) -> HealthStatus {
        HealthStatus {
            status: ServingStatus::Serving,
            message: format!(
                "{} workers, {} active writers, {} tracked jobs",
                self.coordinator.pool().len(),
                self.writers.active_graphs(),
                self.coordinator.tracked_jobs()
            ),
        }
    }

    pub fn events(&self) -> &EventLog {
        &self.events
    }

    pub fn store(&self) -> &Arc<dyn GraphStore> {
        &self.store
    }

    pub fn config(&self) -> &StrataConfig {
        &self.config
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
