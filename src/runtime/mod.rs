//! Runtime - scheduling around the layout engine
//!
//! - `lease`: per-graph exclusive write lease
//! - `worker`: chunk job messages, `ChunkWorker` seam, worker pool
//! - `coordinator`: bulk relayout (partition, dispatch, merge, commit)
//! - `queue`: per-graph FIFO writers for incremental edge inserts
//! - `service`: `LayoutService` facade
//!
//! Layout math stays synchronous; suspension points are store I/O and worker
//! dispatch only.

pub mod coordinator;
pub mod lease;
pub mod queue;
pub mod service;
pub mod worker;

pub use coordinator::{DistributedCoordinator, JobHandle, JobState, Partition, PartitionStrategy};
pub use lease::{Lease, LeaseManager};
pub use queue::{EdgeTaskState, GraphWriters};
pub use service::{HealthStatus, LayoutService, ServingStatus, TaskHandle};
pub use worker::{ChunkJob, ChunkResult, ChunkWorker, LocalWorker, WorkerPool};
