//! Database context: owned files plus the buffer pool.
//!
//! Trees never reach for globals; a `Database` value is threaded into
//! their operations and resolves file names to stores. All page access
//! goes through here so that pool misses, eviction write-back, and
//! read-through happen in one place.

use crate::file::{FileRegistry, FileStore};
use lasdb_buffer::{BufferFrame, BufferPool, PageReadGuard, PageWriteGuard};
use lasdb_common::page::PageId;
use lasdb_common::{Result, StorageConfig};
use std::sync::Arc;
use tracing::{debug, warn};

/// Owns the file registry and the buffer pool.
pub struct Database {
    registry: FileRegistry,
    pool: BufferPool,
    config: StorageConfig,
}

impl Database {
    /// Creates a database rooted at the configured data directory.
    pub fn new(config: StorageConfig) -> Result<Self> {
        std::fs::create_dir_all(&config.data_dir)?;
        Ok(Self {
            registry: FileRegistry::new(),
            pool: BufferPool::new(config.pool_frames),
            config,
        })
    }

    /// Opens (creating if needed) and registers an index file.
    pub fn register_file(&self, name: &str) -> Result<Arc<FileStore>> {
        let path = self.config.data_dir.join(name);
        let store = FileStore::open(name, &path, self.config.fsync_enabled)?;
        let store = self.registry.add(store)?;
        debug!(file = name, "registered index file");
        Ok(store)
    }

    /// Resolves a registered file by name.
    pub fn file(&self, name: &str) -> Result<Arc<FileStore>> {
        self.registry.get(name)
    }

    /// The buffer pool.
    pub fn pool(&self) -> &BufferPool {
        &self.pool
    }

    /// The storage configuration.
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Fetches a page for reading, loading it from its file on a miss.
    pub fn page(&self, page_id: &PageId) -> Result<PageReadGuard<'_>> {
        let frame = self.frame_for(page_id)?;
        Ok(PageReadGuard::new(&self.pool, page_id.clone(), frame))
    }

    /// Fetches a page for writing, loading it from its file on a miss.
    pub fn page_mut(&self, page_id: &PageId) -> Result<PageWriteGuard<'_>> {
        let frame = self.frame_for(page_id)?;
        Ok(PageWriteGuard::new(&self.pool, page_id.clone(), frame))
    }

    /// Pins the frame holding `page_id`, reading it in on a miss and
    /// writing back any dirty page displaced to make room.
    fn frame_for(&self, page_id: &PageId) -> Result<&BufferFrame> {
        if let Some(frame) = self.pool.fetch(page_id) {
            return Ok(frame);
        }

        let outcome = self.pool.install(page_id.clone())?;
        if outcome.resident {
            return Ok(outcome.frame);
        }

        if let Some(evicted) = outcome.evicted {
            let store = self.registry.get(&evicted.page_id.file)?;
            store.write_page(evicted.page_id.page_no, &evicted.data)?;
        }

        let store = self.registry.get(&page_id.file)?;
        {
            let mut data = outcome.frame.write_data();
            store.read_page(page_id.page_no, &mut data)?;
        }
        Ok(outcome.frame)
    }

    /// Flushes every dirty page of one file. Returns pages written.
    pub fn flush_file(&self, name: &str) -> Result<usize> {
        let store = self.registry.get(name)?;
        self.pool
            .flush_file(name, |pid, data| store.write_page(pid.page_no, data))
    }

    /// Flushes every dirty page in the pool. Returns pages written.
    pub fn flush_all(&self) -> Result<usize> {
        self.pool.flush_all(|pid, data| {
            let store = self.registry.get(&pid.file)?;
            store.write_page(pid.page_no, data)
        })
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        if let Err(e) = self.flush_all() {
            warn!(error = %e, "failed to flush buffer pool on shutdown");
        }
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database")
            .field("data_dir", &self.config.data_dir)
            .field("pool_frames", &self.config.pool_frames)
            .finish()
    }
}
