//! Strata Configuration Module
//!
//! Engine and layout defaults. Config is stored in `~/.config/strata/config.toml`.
//!
//! ## Priority Order (highest to lowest)
//!
//! 1. Environment variables (`STRATA_WORKERS`, `STRATA_SYNC_THRESHOLD`, ...)
//! 2. Config file (`~/.config/strata/config.toml`)
//! 3. Defaults

use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Result, StrataError};
use crate::model::LayoutOptions;
use crate::resilience::RetryConfig;
use crate::runtime::PartitionStrategy;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct StrataConfig {
    /// Default layout options (overridable per request)
    #[serde(default)]
    pub layout: LayoutOptions,

    /// Engine scheduling and resilience settings
    #[serde(default)]
    pub engine: EngineSettings,
}

/// How bulk relayouts split a graph into chunks
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum PartitionKind {
    /// Pack weakly connected components (no cross-chunk edges)
    #[default]
    Components,
    /// Fixed-size slices in input order (cross-chunk edges reconciled at merge)
    Batch,
}

/// Engine settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct EngineSettings {
    /// Graphs up to this many nodes are handled synchronously in-process
    pub sync_threshold: usize,
    /// Number of local chunk workers
    pub workers: usize,
    pub partition: PartitionKind,
    pub max_chunk_nodes: usize,
    pub max_concurrent_chunks: usize,
    pub chunk_timeout_ms: u64,
    /// Total attempts per chunk (initial + retries)
    pub max_chunk_attempts: u32,
    pub lock_timeout_ms: u64,
    pub retry_initial_delay_ms: u64,
    pub retry_max_delay_ms: u64,
    /// Bounded capacity of each per-graph edge queue
    pub queue_capacity: usize,
    /// A graph writer with no commands for this long stops
    pub writer_idle_ms: u64,
    /// Finished jobs and edge tickets stay pollable for this long
    pub retention_ms: u64,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            sync_threshold: 10_000,
            workers: 4,
            partition: PartitionKind::Components,
            max_chunk_nodes: 5_000,
            max_concurrent_chunks: 8,
            chunk_timeout_ms: 30_000,
            max_chunk_attempts: 3,
            lock_timeout_ms: 5_000,
            retry_initial_delay_ms: 100,
            retry_max_delay_ms: 5_000,
            queue_capacity: 1024,
            writer_idle_ms: 60_000,
            retention_ms: 600_000,
        }
    }
}

impl EngineSettings {
    pub fn chunk_timeout(&self) -> Duration {
        Duration::from_millis(self.chunk_timeout_ms)
    }

    pub fn lock_timeout(&self) -> Duration {
        Duration::from_millis(self.lock_timeout_ms)
    }

    pub fn writer_idle(&self) -> Duration {
        Duration::from_millis(self.writer_idle_ms.max(1))
    }

    pub fn retention(&self) -> Duration {
        Duration::from_millis(self.retention_ms)
    }

    /// Backoff between chunk attempts
    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig::default()
            .with_max_attempts(self.max_chunk_attempts)
            .with_base_delay(Duration::from_millis(self.retry_initial_delay_ms))
            .with_max_delay(Duration::from_millis(self.retry_max_delay_ms))
    }

    pub fn partition_strategy(&self) -> PartitionStrategy {
        let size = self.max_chunk_nodes.max(1);
        match self.partition {
            PartitionKind::Components => PartitionStrategy::Components {
                max_chunk_nodes: size,
            },
            PartitionKind::Batch => PartitionStrategy::Batch { size },
        }
    }
}

impl StrataConfig {
    /// Get the config directory path
    ///
    /// Returns `~/.config/strata/` on Unix, `%APPDATA%/strata/` on Windows
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("strata")
    }

    /// Get the config file path
    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    /// Load configuration from the default path
    ///
    /// Returns default config if file doesn't exist.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::config_path())
    }

    /// Load configuration from an explicit path
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| StrataError::ConfigError {
            reason: format!("Failed to read config file: {}", e),
        })?;

        toml::from_str(&content).map_err(|e| StrataError::ConfigError {
            reason: format!("Failed to parse config file: {}", e),
        })
    }

    /// Save configuration to an explicit path, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            if !dir.exists() {
                fs::create_dir_all(dir).map_err(|e| StrataError::ConfigError {
                    reason: format!("Failed to create config directory: {}", e),
                })?;
            }
        }

        let content = toml::to_string_pretty(self).map_err(|e| StrataError::ConfigError {
            reason: format!("Failed to serialize config: {}", e),
        })?;

        fs::write(path, content).map_err(|e| StrataError::ConfigError {
            reason: format!("Failed to write config file: {}", e),
        })
    }

    /// Merge with environment variables
    ///
    /// Environment variables take precedence over config file values.
    /// Unparseable values are rejected rather than ignored.
    pub fn with_env(mut self) -> Result<Self> {
        override_from_env("STRATA_SYNC_THRESHOLD", &mut self.engine.sync_threshold)?;
        override_from_env("STRATA_WORKERS", &mut self.engine.workers)?;
        override_from_env("STRATA_MAX_CHUNK_NODES", &mut self.engine.max_chunk_nodes)?;
        override_from_env("STRATA_CHUNK_TIMEOUT_MS", &mut self.engine.chunk_timeout_ms)?;
        override_from_env(
            "STRATA_MAX_CHUNK_ATTEMPTS",
            &mut self.engine.max_chunk_attempts,
        )?;
        override_from_env("STRATA_LOCK_TIMEOUT_MS", &mut self.engine.lock_timeout_ms)?;
        override_from_env("STRATA_RETENTION_MS", &mut self.engine.retention_ms)?;
        override_from_env(
            "STRATA_BLOCKS_PER_SUBLEVEL",
            &mut self.layout.blocks_per_sublevel,
        )?;

        if let Ok(raw) = std::env::var("STRATA_PARTITION") {
            match raw.trim() {
                "" => {}
                "components" => self.engine.partition = PartitionKind::Components,
                "batch" => self.engine.partition = PartitionKind::Batch,
                other => {
                    return Err(StrataError::ConfigError {
                        reason: format!("STRATA_PARTITION must be 'components' or 'batch', got '{}'", other),
                    })
                }
            }
        }

        Ok(self)
    }
}

fn override_from_env<T: FromStr>(var: &str, slot: &mut T) -> Result<()> {
    let Ok(raw) = std::env::var(var) else {
        return Ok(());
    };
    if raw.trim().is_empty() {
        return Ok(());
    }
    *slot = raw.trim().parse().map_err(|_| StrataError::ConfigError {
        reason: format!("{} has invalid value '{}'", var, raw),
    })?;
    Ok(())
}
