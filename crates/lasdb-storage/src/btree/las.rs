//! Lazy-sort tree: an optimized tree over append-only leaves plus a
//! background worker that sorts leaves the fast path has moved past.
//!
//! Under near-sorted ingest each fast-path leaf eventually fills and is
//! retired when the stream advances. Sorting it in the background turns
//! later reads of that (now cold) leaf into binary searches, without
//! slowing the ingest path.

use super::append_leaf::AppendLeaf;
use super::leaf::LeafSummary;
use super::optimized::OptimizedTree;
use crate::database::Database;
use crate::key::IndexKey;
use crate::tuple::{Schema, Tuple};
use lasdb_common::page::NodeId;
use lasdb_common::types::Field;
use lasdb_common::Result;
use std::sync::Arc;
use std::thread::JoinHandle;
use tracing::warn;

/// Optimized tree over append leaves with a dedicated sort worker.
pub struct LasTree<K: IndexKey> {
    tree: Arc<OptimizedTree<K, AppendLeaf>>,
    worker: Option<JoinHandle<()>>,
}

impl<K: IndexKey> LasTree<K> {
    /// Registers the index file and builds an uninitialized tree.
    pub fn new(db: Arc<Database>, name: &str, schema: Schema, key_index: usize) -> Result<Self> {
        let tree = Arc::new(OptimizedTree::new(db, name, schema, key_index)?);
        Ok(Self { tree, worker: None })
    }

    /// Initializes the tree pages and starts the background sorter.
    /// Must be called exactly once.
    pub fn init(&mut self) -> Result<()> {
        self.tree.init()?;

        let tree = Arc::clone(&self.tree);
        self.worker = Some(std::thread::spawn(move || background_sort_worker(tree)));
        Ok(())
    }

    /// Inserts a tuple (fast path first, split on full leaves).
    pub fn insert(&self, tuple: &Tuple) -> Result<()> {
        self.tree.insert(tuple)
    }

    /// Point lookup by key field.
    pub fn get(&self, key_field: &Field) -> Result<Option<Tuple>> {
        self.tree.get(key_field)
    }

    /// All tuples with keys in `[lo, hi]`, ascending.
    pub fn range(&self, lo_field: &Field, hi_field: &Field) -> Result<Vec<Tuple>> {
        self.tree.range(lo_field, hi_field)
    }

    /// Applies field updates to the tuple stored under `key`.
    pub fn update(&self, key_field: &Field, updates: &[(usize, Field)]) -> Result<bool> {
        self.tree.update(key_field, updates)
    }

    /// Appends a delete marker for a key.
    pub fn erase(&self, key_field: &Field) -> Result<bool> {
        self.tree.erase(key_field)
    }

    pub fn size(&self) -> u64 {
        self.tree.size()
    }

    pub fn height(&self) -> u32 {
        self.tree.height()
    }

    pub fn fast_path_hits(&self) -> u64 {
        self.tree.fast_path_hits()
    }

    pub fn sorted_leaf_search(&self) -> u64 {
        self.tree.sorted_leaf_search()
    }

    /// Background sort passes that ran to completion.
    pub fn background_sorts(&self) -> u64 {
        self.tree.background_sorts()
    }

    /// The leaf currently targeted by the fast path.
    pub fn fast_path_leaf(&self) -> NodeId {
        self.tree.fast_path_leaf()
    }

    pub fn leaf_stats(&self) -> Result<(usize, f64)> {
        self.tree.leaf_stats()
    }

    pub fn leaf_summaries(&self) -> Result<Vec<LeafSummary<K>>> {
        self.tree.leaf_summaries()
    }

    /// Writes all dirty pages of this index to its file.
    pub fn flush(&self) -> Result<usize> {
        self.tree.flush()
    }
}

impl<K: IndexKey> Drop for LasTree<K> {
    fn drop(&mut self) {
        // Stop the worker before the tree flushes and closes: it drains
        // whatever is queued, then exits.
        self.tree.cold().stop();
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

/// Worker loop: sort each cold leaf under its exclusive lock. A failure
/// on one leaf is logged and the leaf is skipped; the worker keeps
/// going.
fn background_sort_worker<K: IndexKey>(tree: Arc<OptimizedTree<K, AppendLeaf>>) {
    while let Some(leaf_id) = tree.cold().pop_blocking() {
        if let Err(e) = tree.sort_cold_leaf(leaf_id) {
            warn!(leaf = leaf_id, error = %e, "background sort failed, dropping leaf");
        }
        tree.cold().forget(leaf_id);
    }
}
