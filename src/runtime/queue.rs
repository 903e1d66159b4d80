//! GraphWriters - one FIFO writer task per graph for incremental edge inserts
//!
//! Commands for a graph are processed strictly in receipt order by a single
//! tokio task that owns the cached `GraphState`. Independent graphs have
//! independent writers. Each command takes the graph lease, reloads the
//! cached state if the store version moved, applies the edge and commits the
//! edge plus changed layouts in one atomic write.
//!
//! A writer with no commands for the idle timeout closes its queue and
//! leaves the registry; the next command for that graph starts a new one.

use std::sync::Arc;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot};
use uuid::Uuid;

use crate::error::{Result, StrataError};
use crate::event::{EventKind, EventLog};
use crate::layout::{merge_updates, EdgeReport, GraphState};
use crate::model::{LayoutOptions, NodeId};
use crate::runtime::lease::LeaseManager;
use crate::store::{GraphStore, LayoutBatch};

/// Status of a queued edge insert
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EdgeTaskState {
    Pending,
    Applied { report: EdgeReport },
    Rejected { error: String },
}

impl EdgeTaskState {
    pub fn is_finished(&self) -> bool {
        !matches!(self, EdgeTaskState::Pending)
    }
}

#[derive(Debug, Clone)]
struct Ticket {
    state: EdgeTaskState,
    updated_at: Instant,
}

impl Ticket {
    fn new(state: EdgeTaskState) -> Self {
        Self {
            state,
            updated_at: Instant::now(),
        }
    }
}

type Senders = Arc<DashMap<Arc<str>, mpsc::Sender<EdgeCommand>>>;

struct EdgeCommand {
    ticket: Uuid,
    source: NodeId,
    target: NodeId,
    reply: Option<oneshot::Sender<Result<EdgeReport>>>,
}

/// Shared handles a writer task needs
#[derive(Clone)]
struct WriterContext {
    store: Arc<dyn GraphStore>,
    leases: LeaseManager,
    events: EventLog,
    options: LayoutOptions,
    status: Arc<DashMap<Uuid, Ticket>>,
    senders: Senders,
    idle: Duration,
}

/// Registry of per-graph writer tasks
#[derive(Clone)]
pub struct GraphWriters {
    senders: Senders,
    context: WriterContext,
    capacity: usize,
}

impl std::fmt::Debug for GraphWriters {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GraphWriters")
            .field("graphs", &self.senders.len())
            .field("capacity", &self.capacity)
            .finish()
    }
}

impl GraphWriters {
    pub fn new(
        store: Arc<dyn GraphStore>,
        leases: LeaseManager,
        events: EventLog,
        options: LayoutOptions,
        capacity: usize,
    ) -> Self {
        let senders: Senders = Arc::new(DashMap::new());
        Self {
            senders: Arc::clone(&senders),
            context: WriterContext {
                store,
                leases,
                events,
                options,
                status: Arc::new(DashMap::new()),
                senders,
                idle: Duration::from_secs(60),
            },
            capacity: capacity.max(1),
        }
    }

    /// Stop writers after this long without commands
    pub fn with_idle_timeout(mut self, idle: Duration) -> Self {
        self.context.idle = idle.max(Duration::from_millis(1));
        self
    }

    /// Apply an edge and wait for the committed result
    pub async fn apply(&self, graph_id: &str, source: &str, target: &str) -> Result<EdgeReport> {
        let (tx, rx) = oneshot::channel();
        let ticket = Uuid::new_v4();
        self.send(graph_id, ticket, source, target, Some(tx)).await?;
        rx.await.map_err(|_| StrataError::WriterClosed {
            graph_id: graph_id.to_string(),
        })?
    }

    /// Queue an edge; poll the ticket with `status`
    pub async fn enqueue(&self, graph_id: &str, source: &str, target: &str) -> Result<Uuid> {
        let ticket = Uuid::new_v4();
        self.context
            .status
            .insert(ticket, Ticket::new(EdgeTaskState::Pending));
        if let Err(e) = self.send(graph_id, ticket, source, target, None).await {
            self.context.status.remove(&ticket);
            return Err(e);
        }
        Ok(ticket)
    }

    pub fn status(&self, ticket: Uuid) -> Option<EdgeTaskState> {
        self.context.status.get(&ticket).map(|t| t.state.clone())
    }

    /// Drop tickets finished at least `older_than` ago; returns how many went
    pub fn forget_finished(&self, older_than: Duration) -> usize {
        let before = self.context.status.len();
        self.context
            .status
            .retain(|_, t| !t.state.is_finished() || t.updated_at.elapsed() < older_than);
        before.saturating_sub(self.context.status.len())
    }

    /// Tickets still pollable
    pub fn tracked_tickets(&self) -> usize {
        self.context.status.len()
    }

    /// Graphs with a live writer task
    pub fn active_graphs(&self) -> usize {
        self.senders.len()
    }

    /// Stop a graph's writer; the next command starts a fresh one
    pub fn shutdown(&self, graph_id: &str) -> bool {
        self.senders.remove(graph_id).is_some()
    }

    async fn send(
        &self,
        graph_id: &str,
        ticket: Uuid,
        source: &str,
        target: &str,
        reply: Option<oneshot::Sender<Result<EdgeReport>>>,
    ) -> Result<()> {
        let mut command = EdgeCommand {
            ticket,
            source: Arc::from(source),
            target: Arc::from(target),
            reply,
        };
        // A writer may close for idleness between lookup and send; the
        // second round gets a fresh one
        for _ in 0..2 {
            let sender = self.sender_for(graph_id);
            match sender.send(command).await {
                Ok(()) => return Ok(()),
                Err(mpsc::error::SendError(returned)) => {
                    self.senders
                        .remove_if(graph_id, |_, s| s.same_channel(&sender));
                    command = returned;
                }
            }
        }
        Err(StrataError::WriterClosed {
            graph_id: graph_id.to_string(),
        })
    }

    fn sender_for(&self, graph_id: &str) -> mpsc::Sender<EdgeCommand> {
        self.senders
            .entry(Arc::from(graph_id))
            .or_insert_with(|| {
                let (tx, rx) = mpsc::channel(self.capacity);
                let writer = GraphWriter {
                    graph_id: Arc::from(graph_id),
                    context: self.context.clone(),
                    state: None,
                };
                tokio::spawn(writer.run(rx));
                tracing::debug!(graph = graph_id, "writer started");
                tx
            })
            .value()
            .clone()
    }
}

// ═══════════════════════════════════════════════════════════════
// Writer task
// ═══════════════════════════════════════════════════════════════

struct GraphWriter {
    graph_id: Arc<str>,
    context: WriterContext,
    state: Option<GraphState>,
}

impl GraphWriter {
    async fn run(mut self, mut rx: mpsc::Receiver<EdgeCommand>) {
        loop {
            let command = match tokio::time::timeout(self.context.idle, rx.recv()).await {
                Ok(Some(command)) => command,
                Ok(None) => break,
                Err(_) => {
                    // Refuse new sends, then drain what is already queued
                    rx.close();
                    continue;
                }
            };
            let result = self.handle(&command.source, &command.target).await;

            let events = &self.context.events;
            match &result {
                Ok(report) => {
                    events.emit(EventKind::EdgeApplied {
                        graph_id: Arc::clone(&self.graph_id),
                        source_id: Arc::clone(&command.source),
                        target_id: Arc::clone(&command.target),
                        shifted: report.shifted.len(),
                        updated: report.updates.len(),
                    });
                    self.record(command.ticket, EdgeTaskState::Applied {
                        report: report.clone(),
                    });
                }
                Err(e) => {
                    tracing::warn!(graph = %self.graph_id, source = %command.source, target = %command.target, error = %e, "edge rejected");
                    events.emit(EventKind::EdgeRejected {
                        graph_id: Arc::clone(&self.graph_id),
                        source_id: Arc::clone(&command.source),
                        target_id: Arc::clone(&command.target),
                        error: e.to_string(),
                    });
                    self.record(command.ticket, EdgeTaskState::Rejected {
                        error: e.to_string(),
                    });
                }
            }

            if let Some(reply) = command.reply {
                // Caller may have gone away; the commit stands either way
                let _ = reply.send(result);
            }
        }
        self.context
            .senders
            .remove_if(&self.graph_id, |_, s| s.is_closed());
        tracing::debug!(graph = %self.graph_id, "writer stopped");
    }

    fn record(&self, ticket: Uuid, state: EdgeTaskState) {
        if let Some(mut slot) = self.context.status.get_mut(&ticket) {
            *slot = Ticket::new(state);
        }
    }

    async fn handle(&mut self, source: &str, target: &str) -> Result<EdgeReport> {
        let _lease = self
            .context
            .leases
            .acquire(&self.graph_id, &format!("writer-{}", self.graph_id))
            .await?;
        let store = Arc::clone(&self.context.store);

        let current = store.version(&self.graph_id).await?;
        let mut pending = Vec::new();
        let stale = self.state.as_ref().map_or(true, |s| s.version() != current);
        if stale {
            let snapshot = store.load_graph(&self.graph_id).await?;
            let hydration =
                GraphState::from_snapshot(&snapshot, self.context.options.clone(), &self.context.events)?;
            self.context.events.emit(EventKind::StateReloaded {
                graph_id: Arc::clone(&self.graph_id),
                version: snapshot.version,
                hydrated: hydration.placed,
            });
            tracing::debug!(graph = %self.graph_id, version = snapshot.version, "writer state reloaded");
            pending = hydration.pending;
            self.state = Some(hydration.state);
        }

        let Some(state) = self.state.as_mut() else {
            return Err(StrataError::GraphNotFound {
                graph_id: self.graph_id.to_string(),
            });
        };

        let report = match state.apply_edge(source, target, &self.context.events) {
            Ok(report) => report,
            Err(e) => {
                // The cache already counts hydrated nodes as stored; commit
                // them even though the edge is refused
                if !pending.is_empty() {
                    let batch = LayoutBatch {
                        edges: Vec::new(),
                        layouts: pending,
                        replace_all: false,
                        expected_version: Some(state.version()),
                    };
                    match store.write_layout(&self.graph_id, batch).await {
                        Ok(version) => state.set_version(version),
                        Err(write_error) => {
                            tracing::warn!(graph = %self.graph_id, error = %write_error, "hydration write failed");
                            self.state = None;
                            return Err(e);
                        }
                    }
                }
                // Cycle and unknown-node rejections happen before any mutation
                if !matches!(
                    e,
                    StrataError::CycleDetected { .. } | StrataError::NodeNotFound { .. }
                ) {
                    self.state = None;
                }
                return Err(e);
            }
        };

        let layouts = merge_updates(pending, report.updates.clone());
        let edges = if report.inserted {
            vec![(Arc::clone(&report.source_id), Arc::clone(&report.target_id))]
        } else {
            Vec::new()
        };
        let batch = LayoutBatch {
            edges,
            layouts,
            replace_all: false,
            expected_version: Some(state.version()),
        };
        if batch.is_empty() {
            return Ok(report);
        }

        match store.write_layout(&self.graph_id, batch).await {
            Ok(version) => {
                state.set_version(version);
                Ok(report)
            }
            Err(e) => {
                // Cache now disagrees with the store
                self.state = None;
                Err(e)
            }
        }
    }
}
