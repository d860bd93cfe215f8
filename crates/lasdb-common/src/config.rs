//! Configuration structures for lasdb.

use crate::page::POOL_SIZE;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Storage configuration for the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Directory for index files.
    pub data_dir: PathBuf,
    /// Buffer pool size in number of frames.
    pub pool_frames: usize,
    /// Enable fsync after page writes.
    pub fsync_enabled: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            pool_frames: POOL_SIZE,
            fsync_enabled: false,
        }
    }
}

impl StorageConfig {
    /// Returns the total buffer pool size in bytes.
    pub fn pool_size_bytes(&self) -> usize {
        self.pool_frames * crate::page::PAGE_SIZE
    }
}
