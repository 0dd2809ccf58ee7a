//! Database configuration and durability levels
//!
//! Every index mutation is written through to its backing file before the
//! call returns. The durability level only decides whether that write also
//! waits for the device (`fsync`).

use crate::{Result, StorageError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Smallest order for which leaf and internal splits both leave non-empty halves.
pub const MIN_BTREE_ORDER: usize = 3;

/// Default B+ tree order (children per internal node).
pub const DEFAULT_BTREE_ORDER: usize = 512;

/// Default per-file node cache capacity.
pub const DEFAULT_NODE_CACHE: usize = 1024;

/// Durability level applied after every node write
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DurabilityLevel {
    /// Flush to the OS after each mutation
    #[default]
    Flush,

    /// Flush and fsync after each mutation (slowest)
    Synchronous,
}

impl DurabilityLevel {
    pub fn requires_fsync(&self) -> bool {
        matches!(self, Self::Synchronous)
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Flush => "flush to OS buffers",
            Self::Synchronous => "flush + fsync",
        }
    }
}

/// Options shared by every file-backed index and store
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreOptions {
    /// Node cache capacity (0 disables the cache)
    pub cache_size: usize,

    pub durability: DurabilityLevel,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            cache_size: DEFAULT_NODE_CACHE,
            durability: DurabilityLevel::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DBConfig {
    /// Directory holding every data and index file
    pub data_dir: PathBuf,

    /// Order M of the five score trees
    pub btree_order: usize,

    /// LRU node cache capacity per node file
    pub node_cache_size: usize,

    pub durability: DurabilityLevel,

    /// Rows per page in CLI listings
    pub records_per_page: usize,
}

impl Default for DBConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./examdb_data"),
            btree_order: DEFAULT_BTREE_ORDER,
            node_cache_size: DEFAULT_NODE_CACHE,
            durability: DurabilityLevel::default(),
            records_per_page: 5,
        }
    }
}

impl DBConfig {
    pub fn with_data_dir<P: Into<PathBuf>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Small order so that a handful of inserts already exercises splits.
    pub fn for_testing<P: Into<PathBuf>>(data_dir: P) -> Self {
        Self {
            data_dir: data_dir.into(),
            btree_order: 5,
            node_cache_size: 16,
            ..Default::default()
        }
    }

    /// Load a JSON configuration file. Missing fields take their defaults.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path.as_ref())?;
        let config: DBConfig = serde_json::from_str(&text)
            .map_err(|e| StorageError::InvalidArgument(format!("config {}: {}", path.as_ref().display(), e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.btree_order < MIN_BTREE_ORDER {
            return Err(StorageError::InvalidArgument(format!(
                "btree_order {} is too small (minimum {})",
                self.btree_order, MIN_BTREE_ORDER
            )));
        }
        if self.records_per_page == 0 {
            return Err(StorageError::InvalidArgument(
                "records_per_page must be at least 1".into(),
            ));
        }
        Ok(())
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            cache_size: self.node_cache_size,
            durability: self.durability,
        }
    }
}
