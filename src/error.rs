//! Strata Error Types with Error Codes
//!
//! Error code ranges:
//! - STRATA-000-009: Input/graph errors
//! - STRATA-010-019: Topology errors
//! - STRATA-020-029: Placement errors (pins, ordering)
//! - STRATA-030-039: Bulk job errors (chunks, retries, cancellation)
//! - STRATA-040-049: Concurrency errors (leases, jobs)
//! - STRATA-050-059: Store errors
//! - STRATA-060-069: Config errors
//! - STRATA-090-099: IO / serialization errors

// The #[error] attribute from thiserror uses struct fields via string interpolation,
// but Rust's unused_assignments lint doesn't recognize this.
#![allow(unused_assignments)]

use miette::Diagnostic;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, StrataError>;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// All error variants are part of the public API.
///
/// Implements both `thiserror::Error` for std error compatibility
/// and `miette::Diagnostic` for terminal error display.
#[derive(Error, Debug, Diagnostic)]
pub enum StrataError {
    // ═══════════════════════════════════════════
    // INPUT / GRAPH ERRORS (000-009)
    // ═══════════════════════════════════════════
    #[error("[STRATA-001] Failed to parse graph file: {details}")]
    #[diagnostic(
        code(strata::parse_error),
        help("Graph files are JSON or YAML with `nodes` and `edges` lists")
    )]
    ParseError { details: String },

    #[error("[STRATA-002] Graph validation failed: {reason}")]
    #[diagnostic(code(strata::validation_error))]
    ValidationError { reason: String },

    #[error("[STRATA-003] Graph '{graph_id}' not found")]
    GraphNotFound { graph_id: String },

    #[error("[STRATA-004] Node '{node_id}' not found")]
    NodeNotFound { node_id: String },

    #[error("[STRATA-005] Duplicate node id '{node_id}'")]
    DuplicateNode { node_id: String },

    // ═══════════════════════════════════════════
    // TOPOLOGY ERRORS (010-019)
    // ═══════════════════════════════════════════
    #[error("[STRATA-010] Edge {source_id} -> {target_id} would create a cycle: {cycle}")]
    #[diagnostic(
        code(strata::cycle_detected),
        help("Links must form a DAG; remove the back-reference")
    )]
    CycleDetected {
        source_id: String,
        target_id: String,
        cycle: String,
    },

    // ═══════════════════════════════════════════
    // PLACEMENT ERRORS (020-029)
    // ═══════════════════════════════════════════
    #[error(
        "[STRATA-020] Pinned node '{node_id}' requested level {requested} held by '{holder}' (reassigned to {assigned})"
    )]
    PinConflict {
        node_id: String,
        holder: String,
        requested: u32,
        assigned: u32,
    },

    /// Internal: order gap fell below epsilon. Recovered by renumbering the layer.
    #[error("[STRATA-021] Order gap exhausted in layer {layer}")]
    RenumberRequired { layer: u32 },

    // ═══════════════════════════════════════════
    // BULK JOB ERRORS (030-039)
    // ═══════════════════════════════════════════
    #[error("[STRATA-030] Chunk {chunk} of job {job_id} failed on worker '{worker}': {reason}")]
    ChunkFailure {
        job_id: String,
        chunk: usize,
        worker: String,
        reason: String,
    },

    #[error("[STRATA-031] Chunk {chunk} of job {job_id} timed out after {timeout_ms}ms")]
    ChunkTimeout {
        job_id: String,
        chunk: usize,
        timeout_ms: u64,
    },

    #[error("[STRATA-032] Retries exhausted after {attempts} attempts: {last_error}")]
    #[diagnostic(
        code(strata::retry_exhausted),
        help("The job was failed without committing; resubmit once workers are healthy")
    )]
    RetryExhausted { attempts: u32, last_error: String },

    #[error("[STRATA-033] Job {job_id} was cancelled")]
    Cancelled { job_id: String },

    #[error("[STRATA-034] {stage} task of job {job_id} aborted: {reason}")]
    TaskAborted {
        job_id: String,
        stage: String,
        reason: String,
    },

    // ═══════════════════════════════════════════
    // CONCURRENCY ERRORS (040-049)
    // ═══════════════════════════════════════════
    #[error("[STRATA-040] Lease on graph '{graph_id}' not acquired within {waited_ms}ms")]
    #[diagnostic(
        code(strata::lock_timeout),
        help("Another relayout holds the graph; retry later")
    )]
    LockTimeout { graph_id: String, waited_ms: u64 },

    #[error("[STRATA-041] Job '{job_id}' not found")]
    JobNotFound { job_id: String },

    #[error("[STRATA-042] Graph writer for '{graph_id}' is unavailable")]
    WriterClosed { graph_id: String },

    // ═══════════════════════════════════════════
    // STORE ERRORS (050-059)
    // ═══════════════════════════════════════════
    #[error("[STRATA-050] Graph store error: {reason}")]
    StoreError { reason: String },

    // ═══════════════════════════════════════════
    // CONFIG ERRORS (060-069)
    // ═══════════════════════════════════════════
    #[error("[STRATA-060] Config error: {reason}")]
    ConfigError { reason: String },

    // ═══════════════════════════════════════════
    // IO / SERIALIZATION ERRORS (090-099)
    // ═══════════════════════════════════════════
    #[error("[STRATA-090] IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("[STRATA-091] JSON error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("[STRATA-092] YAML parse error: {0}")]
    YamlParse(#[from] serde_yaml::Error),
}

impl StrataError {
    /// Get the error code (e.g., "STRATA-010")
    pub fn code(&self) -> &'static str {
        match self {
            Self::ParseError { .. } => "STRATA-001",
            Self::ValidationError { .. } => "STRATA-002",
            Self::GraphNotFound { .. } => "STRATA-003",
            Self::NodeNotFound { .. } => "STRATA-004",
            Self::DuplicateNode { .. } => "STRATA-005",
            Self::CycleDetected { .. } => "STRATA-010",
            Self::PinConflict { .. } => "STRATA-020",
            Self::RenumberRequired { .. } => "STRATA-021",
            Self::ChunkFailure { .. } => "STRATA-030",
            Self::ChunkTimeout { .. } => "STRATA-031",
            Self::RetryExhausted { .. } => "STRATA-032",
            Self::Cancelled { .. } => "STRATA-033",
            Self::TaskAborted { .. } => "STRATA-034",
            Self::LockTimeout { .. } => "STRATA-040",
            Self::JobNotFound { .. } => "STRATA-041",
            Self::WriterClosed { .. } => "STRATA-042",
            Self::StoreError { .. } => "STRATA-050",
            Self::ConfigError { .. } => "STRATA-060",
            Self::IoError(_) => "STRATA-090",
            Self::JsonError(_) => "STRATA-091",
            Self::YamlParse(_) => "STRATA-092",
        }
    }

    /// Check if error is recoverable (can be retried by the engine itself)
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::ChunkFailure { .. }
                | Self::ChunkTimeout { .. }
                | Self::StoreError { .. }
                | Self::RenumberRequired { .. }
        )
    }
}

impl FixSuggestion for StrataError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            StrataError::ParseError { .. } => {
                Some("Check the graph file: `nodes: [{id, is_pinned, level}]`, `edges: [{source_id, target_id}]`")
            }
            StrataError::ValidationError { .. } => {
                Some("Every edge endpoint must reference a declared node")
            }
            StrataError::GraphNotFound { .. } => Some("Create the graph in the store first"),
            StrataError::NodeNotFound { .. } => Some("Insert the node before linking it"),
            StrataError::DuplicateNode { .. } => Some("Node ids must be unique within a graph"),
            StrataError::CycleDetected { .. } => Some("Remove the link that closes the cycle"),
            StrataError::PinConflict { .. } => {
                Some("Give each pinned block its own level, or disable strict_pins")
            }
            StrataError::RenumberRequired { .. } => None,
            StrataError::ChunkFailure { .. } | StrataError::ChunkTimeout { .. } => {
                Some("Check worker health; the chunk is retried automatically")
            }
            StrataError::RetryExhausted { .. } => {
                Some("Increase engine.max_chunk_attempts or engine.chunk_timeout_ms")
            }
            StrataError::Cancelled { .. } => None,
            StrataError::TaskAborted { .. } => Some("A layout task panicked; check the logs and resubmit"),
            StrataError::LockTimeout { .. } => Some("Wait for the running relayout to finish"),
            StrataError::JobNotFound { .. } => Some("Job ids are only kept for this process"),
            StrataError::WriterClosed { .. } => Some("Restart the layout service"),
            StrataError::StoreError { .. } => Some("Check graph store availability"),
            StrataError::ConfigError { .. } => Some("Check ~/.config/strata/config.toml"),
            StrataError::IoError(_) => Some("Check file path and permissions"),
            StrataError::JsonError(_) => Some("Ensure the file is valid JSON"),
            StrataError::YamlParse(_) => Some("Check YAML syntax: indentation and quoting"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cycle_error_carries_code_and_edge() {
        let err = StrataError::CycleDetected {
            source_id: "c".into(),
            target_id: "a".into(),
            cycle: "a -> b -> c -> a".into(),
        };
        let msg = err.to_string();
        assert!(msg.contains("STRATA-010"));
        assert!(msg.contains("c -> a"));
        assert_eq!(err.code(), "STRATA-010");
        assert!(!err.is_recoverable());
    }

    #[test]
    fn chunk_errors_are_recoverable() {
        let failure = StrataError::ChunkFailure {
            job_id: "j".into(),
            chunk: 0,
            worker: "w0".into(),
            reason: "crashed".into(),
        };
        let timeout = StrataError::ChunkTimeout {
            job_id: "j".into(),
            chunk: 1,
            timeout_ms: 50,
        };
        assert!(failure.is_recoverable());
        assert!(timeout.is_recoverable());
    }

    #[test]
    fn lock_timeout_is_surfaced_not_retried() {
        let err = StrataError::LockTimeout {
            graph_id: "g".into(),
            waited_ms: 100,
        };
        assert!(!err.is_recoverable());
        assert!(err.fix_suggestion().is_some());
        assert_eq!(err.code(), "STRATA-040");
    }

    #[test]
    fn aborted_task_names_its_stage() {
        let err = StrataError::TaskAborted {
            job_id: "j".into(),
            stage: "merge".into(),
            reason: "panicked".into(),
        };
        assert_eq!(err.code(), "STRATA-034");
        assert!(err.to_string().contains("merge task of job j"));
        assert!(!err.is_recoverable());
    }

    #[test]
    fn pin_conflict_message_names_both_nodes() {
        let err = StrataError::PinConflict {
            node_id: "b".into(),
            holder: "a".into(),
            requested: 2,
            assigned: 3,
        };
        let msg = err.to_string();
        assert!(msg.contains("'b'"));
        assert!(msg.contains("'a'"));
        assert!(msg.contains("reassigned to 3"));
    }
}
