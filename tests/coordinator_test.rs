//! Bulk Relayout Tests
//!
//! DistributedCoordinator through the service: partition independence,
//! retries on another worker, timeouts, all-or-nothing commits, leases and
//! cancellation.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use pretty_assertions::assert_eq;
use strata::config::PartitionKind;
use strata::error::Result;
use strata::layout::layer_chunk;
use strata::model::{BlockInput, LayoutRequest, LinkInput, NodeLayout};
use strata::runtime::{
    ChunkJob, ChunkResult, ChunkWorker, JobState, LayoutService, LocalWorker, WorkerPool,
};
use strata::store::{GraphStore, InMemoryGraphStore};
use strata::{EventKind, StrataConfig, StrataError};

// ═══════════════════════════════════════════════════════════════
// Test workers
// ═══════════════════════════════════════════════════════════════

/// Always fails
struct BrokenWorker {
    id: String,
    calls: AtomicUsize,
}

impl BrokenWorker {
    fn new(id: &str) -> Arc<Self> {
        Arc::new(Self {
            id: id.to_string(),
            calls: AtomicUsize::new(0),
        })
    }
}

#[async_trait]
impl ChunkWorker for BrokenWorker {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, job: ChunkJob) -> Result<ChunkResult> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(StrataError::ChunkFailure {
            job_id: job.job_id.to_string(),
            chunk: job.chunk_index,
            worker: self.id.clone(),
            reason: "connection reset".to_string(),
        })
    }
}

/// Sleeps before doing the real work
struct SlowWorker {
    id: String,
    delay: Duration,
}

#[async_trait]
impl ChunkWorker for SlowWorker {
    fn id(&self) -> &str {
        &self.id
    }

    async fn run(&self, job: ChunkJob) -> Result<ChunkResult> {
        tokio::time::sleep(self.delay).await;
        let layout = layer_chunk(&job.nodes, &job.edges)?;
        Ok(ChunkResult {
            job_id: job.job_id,
            chunk_index: job.chunk_index,
            worker: Arc::from(self.id.as_str()),
            layout,
            duration_ms: self.delay.as_millis() as u64,
        })
    }
}

fn slow(id: &str, millis: u64) -> Arc<dyn ChunkWorker> {
    Arc::new(SlowWorker {
        id: id.to_string(),
        delay: Duration::from_millis(millis),
    })
}

fn local(id: &str) -> Arc<dyn ChunkWorker> {
    Arc::new(LocalWorker::new(id))
}

// ═══════════════════════════════════════════════════════════════
// Fixtures
// ═══════════════════════════════════════════════════════════════

fn fast_config() -> StrataConfig {
    let mut config = StrataConfig::default();
    config.engine.retry_initial_delay_ms = 1;
    config.engine.retry_max_delay_ms = 5;
    config.engine.lock_timeout_ms = 50;
    config.engine.chunk_timeout_ms = 2_000;
    config
}

/// Three components, the first with a long and a short branch
fn fixture() -> (Vec<&'static str>, Vec<(&'static str, &'static str)>) {
    let nodes = vec!["a", "b", "c", "d", "e", "f", "g", "h", "i", "j"];
    let edges = vec![
        ("a", "b"),
        ("b", "c"),
        ("c", "d"),
        ("a", "d"),
        ("e", "f"),
        ("f", "g"),
        ("h", "i"),
        ("i", "j"),
        ("h", "j"),
    ];
    (nodes, edges)
}

async fn service_with(pool: WorkerPool, config: StrataConfig) -> LayoutService {
    let store = Arc::new(InMemoryGraphStore::new());
    store.create_graph("map").await.unwrap();
    let (nodes, edges) = fixture();
    for id in nodes {
        store.upsert_node("map", BlockInput::new(id)).await.unwrap();
    }
    for (s, t) in edges {
        store.insert_edge("map", s, t).await.unwrap();
    }
    LayoutService::with_pool(store, config, pool)
}

async fn stored_layouts(svc: &LayoutService) -> Vec<(String, Option<NodeLayout>)> {
    let snapshot = svc.store().load_graph("map").await.unwrap();
    snapshot
        .nodes
        .into_iter()
        .map(|n| (n.id.to_string(), n.layout))
        .collect()
}

// ═══════════════════════════════════════════════════════════════
// Tests
// ═══════════════════════════════════════════════════════════════

#[tokio::test]
async fn test_bulk_relayout_matches_in_process_layout() {
    let (nodes, edges) = fixture();
    let request = LayoutRequest {
        nodes: nodes.iter().map(|id| BlockInput::new(*id)).collect(),
        edges: edges.iter().map(|(s, t)| LinkInput::new(*s, *t)).collect(),
        options: None,
    };

    for (partition, size) in [
        (PartitionKind::Components, 4),
        (PartitionKind::Batch, 3),
        (PartitionKind::Batch, 1),
    ] {
        let mut config = fast_config();
        config.engine.partition = partition;
        config.engine.max_chunk_nodes = size;
        let svc = service_with(WorkerPool::local(3), config).await;

        let expected = svc.calculate_layout(request.clone()).await;
        assert!(expected.success);

        let job = svc.relayout_graph("map", None).await.unwrap();
        assert_eq!(job.wait().await, JobState::Done);

        for (id, layout) in stored_layouts(&svc).await {
            let layout = layout.unwrap();
            let block = expected.block(&id).unwrap();
            assert_eq!(
                (layout.layer, layout.level, layout.sublevel_id, layout.order),
                (block.layer, block.level, block.sublevel_id, block.order),
                "node {} with {:?}/{}",
                id,
                partition,
                size
            );
        }
    }
}

#[tokio::test]
async fn test_large_request_uses_pool_and_matches_inline() {
    let (nodes, edges) = fixture();
    let request = LayoutRequest {
        nodes: nodes.iter().map(|id| BlockInput::new(*id)).collect(),
        edges: edges.iter().map(|(s, t)| LinkInput::new(*s, *t)).collect(),
        options: None,
    };

    let inline = service_with(WorkerPool::local(2), fast_config()).await;
    let mut config = fast_config();
    config.engine.sync_threshold = 2;
    config.engine.partition = PartitionKind::Batch;
    config.engine.max_chunk_nodes = 3;
    let pooled = service_with(WorkerPool::local(2), config).await;

    let a = inline.calculate_layout(request.clone()).await;
    let b = pooled.calculate_layout(request).await;
    assert_eq!(a.blocks, b.blocks);
    assert_eq!(
        pooled
            .events()
            .count_where(|k| matches!(k, EventKind::ChunkCompleted { .. })),
        4
    );
}

#[tokio::test]
async fn test_retry_moves_to_another_worker() {
    let broken = BrokenWorker::new("broken");
    let pool = WorkerPool::new(vec![broken.clone() as Arc<dyn ChunkWorker>, local("healthy")]).unwrap();
    let mut config = fast_config();
    config.engine.max_chunk_nodes = 100;
    let svc = service_with(pool, config).await;

    let job = svc.relayout_graph("map", None).await.unwrap();
    assert_eq!(job.wait().await, JobState::Done);
    assert_eq!(broken.calls.load(Ordering::SeqCst), 1);

    let events = svc.events().filter_job(job.id());
    let failed_on: Vec<String> = events
        .iter()
        .filter_map(|e| match &e.kind {
            EventKind::ChunkFailed { worker, .. } => Some(worker.to_string()),
            _ => None,
        })
        .collect();
    let completed_on: Vec<String> = events
        .iter()
        .filter_map(|e| match &e.kind {
            EventKind::ChunkCompleted { worker, .. } => Some(worker.to_string()),
            _ => None,
        })
        .collect();
    assert_eq!(failed_on, vec!["broken"]);
    assert_eq!(completed_on, vec!["healthy"]);
    assert!(stored_layouts(&svc).await.iter().all(|(_, l)| l.is_some()));
}

#[tokio::test]
async fn test_exhausted_retries_commit_nothing() {
    let pool = WorkerPool::new(vec![
        BrokenWorker::new("w0") as Arc<dyn ChunkWorker>,
        BrokenWorker::new("w1") as Arc<dyn ChunkWorker>,
    ])
    .unwrap();
    let mut config = fast_config();
    config.engine.max_chunk_attempts = 3;
    let svc = service_with(pool, config).await;
    let version = svc.store().version("map").await.unwrap();

    let job = svc.relayout_graph("map", None).await.unwrap();
    let JobState::Failed { reason } = job.wait().await else {
        panic!("job must fail");
    };
    assert!(reason.contains("STRATA-032"));

    assert_eq!(svc.store().version("map").await.unwrap(), version);
    assert!(stored_layouts(&svc).await.iter().all(|(_, l)| l.is_none()));
    assert_eq!(
        svc.events()
            .count_where(|k| matches!(k, EventKind::JobCommitted { .. })),
        0
    );
    assert_eq!(
        svc.events()
            .count_where(|k| matches!(k, EventKind::JobFailed { .. })),
        1
    );
}

#[tokio::test]
async fn test_timed_out_chunk_is_retried() {
    let pool = WorkerPool::new(vec![slow("sleepy", 500), local("quick")]).unwrap();
    let mut config = fast_config();
    config.engine.chunk_timeout_ms = 30;
    config.engine.max_chunk_nodes = 100;
    let svc = service_with(pool, config).await;

    let job = svc.relayout_graph("map", None).await.unwrap();
    assert_eq!(job.wait().await, JobState::Done);

    let timeouts = svc.events().count_where(|k| {
        matches!(k, EventKind::ChunkFailed { error, .. } if error.contains("STRATA-031"))
    });
    assert_eq!(timeouts, 1);
}

#[tokio::test]
async fn test_second_relayout_gets_lock_timeout() {
    let pool = WorkerPool::new(vec![slow("slow", 300)]).unwrap();
    let svc = service_with(pool, fast_config()).await;

    let first = svc.relayout_graph("map", None).await.unwrap();
    let err = svc.relayout_graph("map", None).await.unwrap_err();
    assert!(matches!(err, StrataError::LockTimeout { .. }));
    assert_eq!(err.code(), "STRATA-040");

    assert_eq!(first.wait().await, JobState::Done);
    let again = svc.relayout_graph("map", None).await.unwrap();
    assert_eq!(again.wait().await, JobState::Done);
}

#[tokio::test]
async fn test_cancelled_job_commits_nothing() {
    let pool = WorkerPool::new(vec![slow("slow", 400)]).unwrap();
    let svc = service_with(pool, fast_config()).await;

    let job = svc.relayout_graph("map", None).await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    svc.cancel_job(job.id()).unwrap();

    let JobState::Failed { reason } = job.wait().await else {
        panic!("cancelled job must end in Failed");
    };
    assert!(reason.contains("STRATA-033"));
    assert!(stored_layouts(&svc).await.iter().all(|(_, l)| l.is_none()));
    assert!(matches!(svc.job_status(job.id()), Ok(JobState::Failed { .. })));
}

#[tokio::test]
async fn test_unknown_graph_is_rejected_at_submission() {
    let svc = service_with(WorkerPool::local(1), fast_config()).await;
    let err = svc.relayout_graph("nope", None).await.unwrap_err();
    assert!(matches!(err, StrataError::GraphNotFound { .. }));
}
