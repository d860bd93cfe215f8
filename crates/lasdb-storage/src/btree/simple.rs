//! Baseline B+-tree over sorted leaves, no fast path.

use super::internal::{propagate_split, InternalNode};
use super::leaf::{Leaf, LeafSummary};
use super::sorted_leaf::SortedLeaf;
use crate::database::Database;
use crate::file::FileStore;
use crate::key::IndexKey;
use crate::tuple::{Schema, Tuple};
use lasdb_common::page::{NodeId, NodeType, PageId, INVALID_NODE_ID};
use lasdb_common::types::Field;
use lasdb_common::{LasError, Result};
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Upper bound on root-to-leaf descent; a longer walk means a corrupt
/// parent/child link.
pub(crate) const MAX_DESCENT: usize = 64;

/// Baseline B+-tree: every insert walks root to leaf and lands in a
/// slot-directory page kept in key order.
pub struct SimpleTree<K: IndexKey> {
    db: Arc<Database>,
    file: Arc<FileStore>,
    schema: Schema,
    key_index: usize,
    root_id: AtomicU32,
    head_id: AtomicU32,
    height: AtomicU32,
    size: AtomicU64,
    sorted_leaf_search: AtomicU64,
    _key: PhantomData<K>,
}

impl<K: IndexKey> SimpleTree<K> {
    /// Registers the index file and builds an uninitialized tree.
    pub fn new(db: Arc<Database>, name: &str, schema: Schema, key_index: usize) -> Result<Self> {
        let file = db.register_file(name)?;
        Ok(Self {
            db,
            file,
            schema,
            key_index,
            root_id: AtomicU32::new(INVALID_NODE_ID),
            head_id: AtomicU32::new(INVALID_NODE_ID),
            height: AtomicU32::new(1),
            size: AtomicU64::new(0),
            sorted_leaf_search: AtomicU64::new(0),
            _key: PhantomData,
        })
    }

    /// Allocates the head leaf (page 0) and the initial root (page 1).
    /// Must be called exactly once.
    pub fn init(&self) -> Result<()> {
        if self.root_id.load(Ordering::Acquire) != INVALID_NODE_ID {
            return Err(LasError::AlreadyInitialized);
        }

        let head_id = self.file.allocate();
        {
            let guard = self.db.page_mut(&self.page_id(head_id))?;
            let mut page = guard.data_mut();
            SortedLeaf::format::<K>(&mut page, head_id, INVALID_NODE_ID);
            drop(page);
            guard.mark_dirty();
        }

        let root_id = self.file.allocate();
        {
            let guard = self.db.page_mut(&self.page_id(root_id))?;
            let mut page = guard.data_mut();
            InternalNode::format(&mut page, root_id);
            InternalNode::set_child_at::<K>(&mut page, 0, head_id);
            drop(page);
            guard.mark_dirty();
        }

        self.head_id.store(head_id, Ordering::Release);
        self.root_id.store(root_id, Ordering::Release);
        Ok(())
    }

    fn page_id(&self, node_id: NodeId) -> PageId {
        PageId::new(self.file.name().clone(), node_id)
    }

    fn root(&self) -> Result<NodeId> {
        let root = self.root_id.load(Ordering::Acquire);
        if root == INVALID_NODE_ID {
            return Err(LasError::NotInitialized);
        }
        Ok(root)
    }

    fn extract_key(&self, tuple: &Tuple) -> Result<K> {
        if !self.schema.compatible(tuple) {
            return Err(LasError::SchemaMismatch(format!(
                "tuple with {} fields rejected by index {}",
                tuple.arity(),
                self.file.name()
            )));
        }
        K::from_field(tuple.field(self.key_index)).ok_or_else(|| {
            LasError::KeyTypeMismatch(format!("field {} of {}", self.key_index, self.file.name()))
        })
    }

    /// Walks root to leaf, collecting the internal-node path.
    fn descend(&self, key: K) -> Result<(NodeId, Vec<NodeId>)> {
        let mut node_id = self.root()?;
        let mut path = Vec::with_capacity(self.height.load(Ordering::Acquire) as usize);

        for _ in 0..MAX_DESCENT {
            let guard = self.db.page(&self.page_id(node_id))?;
            let page = guard.data();
            if NodeType::of(&page) == NodeType::Leaf {
                return Ok((node_id, path));
            }
            path.push(node_id);
            let slot = InternalNode::child_slot::<K>(&page, key);
            node_id = InternalNode::child_at::<K>(&page, slot);
        }
        Err(LasError::TreeCorrupted(format!(
            "descent exceeded {} levels in {}",
            MAX_DESCENT,
            self.file.name()
        )))
    }

    /// Inserts a tuple. Errors on schema mismatch; splits on full pages.
    pub fn insert(&self, tuple: &Tuple) -> Result<()> {
        let key = self.extract_key(tuple)?;
        let (leaf_id, path) = self.descend(key)?;

        let inserted = {
            let guard = self.db.page_mut(&self.page_id(leaf_id))?;
            let mut page = guard.data_mut();
            let ok = SortedLeaf::insert::<K>(&mut page, &self.schema, self.key_index, tuple);
            drop(page);
            if ok {
                guard.mark_dirty();
            }
            ok
        };

        if !inserted {
            self.split_insert(leaf_id, tuple, key, &path)?;
        }
        self.size.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// Splits a full leaf, routes the pending tuple, and propagates the
    /// separator up the saved path.
    fn split_insert(&self, leaf_id: NodeId, tuple: &Tuple, key: K, path: &[NodeId]) -> Result<()> {
        let new_id = self.file.allocate();

        let separator = {
            let leaf_guard = self.db.page_mut(&self.page_id(leaf_id))?;
            let new_guard = self.db.page_mut(&self.page_id(new_id))?;
            let mut left = leaf_guard.data_mut();
            let mut right = new_guard.data_mut();

            SortedLeaf::format::<K>(&mut right, new_id, INVALID_NODE_ID);
            let separator =
                SortedLeaf::split_into::<K>(&mut left, &mut right, &self.schema, self.key_index);

            let routed = if key < separator {
                SortedLeaf::insert::<K>(&mut left, &self.schema, self.key_index, tuple)
            } else {
                SortedLeaf::insert::<K>(&mut right, &self.schema, self.key_index, tuple)
            };

            drop(left);
            drop(right);
            leaf_guard.mark_dirty();
            new_guard.mark_dirty();

            if !routed {
                return Err(LasError::TreeCorrupted(format!(
                    "tuple did not fit on either half after splitting leaf {}",
                    leaf_id
                )));
            }
            separator
        };

        let grew = propagate_split::<K>(&self.db, &self.file, self.root()?, path, separator, new_id)?;
        if grew {
            self.height.fetch_add(1, Ordering::AcqRel);
        }
        Ok(())
    }

    /// Point lookup by key field.
    pub fn get(&self, key_field: &Field) -> Result<Option<Tuple>> {
        let key = K::from_field(key_field)
            .ok_or_else(|| LasError::KeyTypeMismatch(format!("lookup on {}", self.file.name())))?;
        let (leaf_id, _) = self.descend(key)?;

        let guard = self.db.page(&self.page_id(leaf_id))?;
        let page = guard.data();
        if SortedLeaf::is_sorted(&page) {
            self.sorted_leaf_search.fetch_add(1, Ordering::AcqRel);
        }
        Ok(SortedLeaf::get::<K>(&page, &self.schema, self.key_index, key))
    }

    /// All tuples with keys in `[lo, hi]`, ascending.
    pub fn range(&self, lo_field: &Field, hi_field: &Field) -> Result<Vec<Tuple>> {
        let lo = K::from_field(lo_field)
            .ok_or_else(|| LasError::KeyTypeMismatch(format!("range on {}", self.file.name())))?;
        let hi = K::from_field(hi_field)
            .ok_or_else(|| LasError::KeyTypeMismatch(format!("range on {}", self.file.name())))?;

        let (mut leaf_id, _) = self.descend(lo)?;
        let mut out = Vec::new();

        // Keep walking while leaves can still hold keys <= hi; an empty
        // leaf is skipped rather than ending the scan.
        while leaf_id != INVALID_NODE_ID {
            let guard = self.db.page(&self.page_id(leaf_id))?;
            let page = guard.data();
            if let Some(min) = SortedLeaf::min_key::<K>(&page, &self.schema, self.key_index) {
                if min > hi {
                    break;
                }
            }
            out.extend(SortedLeaf::range::<K>(
                &page,
                &self.schema,
                self.key_index,
                lo,
                hi,
            ));
            leaf_id = SortedLeaf::next_id(&page);
        }
        Ok(out)
    }

    /// Applies field updates to the tuple stored under `key`.
    /// Returns false if the key is absent.
    pub fn update(&self, key_field: &Field, updates: &[(usize, Field)]) -> Result<bool> {
        let key = K::from_field(key_field)
            .ok_or_else(|| LasError::KeyTypeMismatch(format!("update on {}", self.file.name())))?;
        let (leaf_id, _) = self.descend(key)?;

        let guard = self.db.page_mut(&self.page_id(leaf_id))?;
        let mut page = guard.data_mut();

        let Some(mut tuple) = SortedLeaf::get::<K>(&page, &self.schema, self.key_index, key)
        else {
            return Ok(false);
        };
        for (index, field) in updates {
            tuple.set_field(*index, field.clone());
        }
        if !self.schema.compatible(&tuple) {
            return Err(LasError::SchemaMismatch(format!(
                "update produced an incompatible tuple for {}",
                self.file.name()
            )));
        }

        let ok = SortedLeaf::update::<K>(&mut page, &self.schema, self.key_index, &tuple);
        drop(page);
        if ok {
            guard.mark_dirty();
        }
        Ok(ok)
    }

    /// Removes a key. Returns false if it was absent.
    pub fn erase(&self, key_field: &Field) -> Result<bool> {
        let key = K::from_field(key_field)
            .ok_or_else(|| LasError::KeyTypeMismatch(format!("erase on {}", self.file.name())))?;
        let (leaf_id, _) = self.descend(key)?;

        let guard = self.db.page_mut(&self.page_id(leaf_id))?;
        let mut page = guard.data_mut();
        let ok = SortedLeaf::erase::<K>(&mut page, &self.schema, self.key_index, key);
        drop(page);
        if ok {
            guard.mark_dirty();
            self.size.fetch_sub(1, Ordering::AcqRel);
        }
        Ok(ok)
    }

    /// Number of records inserted minus records erased.
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    /// Tree height (1 = root directly over the head leaf).
    pub fn height(&self) -> u32 {
        self.height.load(Ordering::Acquire)
    }

    /// Lookups served from a sorted leaf.
    pub fn sorted_leaf_search(&self) -> u64 {
        self.sorted_leaf_search.load(Ordering::Acquire)
    }

    /// Leaf count and fill-factor across the chain.
    pub fn leaf_stats(&self) -> Result<(usize, f64)> {
        let summaries = self.leaf_summaries()?;
        let leaf_count = summaries.len();
        let used: usize = summaries.iter().map(|s| s.used_space).sum();
        let available = leaf_count * SortedLeaf::available_space::<K>();
        let utilization = if available > 0 {
            used as f64 / available as f64
        } else {
            0.0
        };
        Ok((leaf_count, utilization))
    }

    /// Per-leaf snapshots, head to tail.
    pub fn leaf_summaries(&self) -> Result<Vec<LeafSummary<K>>> {
        let mut out = Vec::new();
        let mut leaf_id = self.head_id.load(Ordering::Acquire);
        while leaf_id != INVALID_NODE_ID {
            let guard = self.db.page(&self.page_id(leaf_id))?;
            let page = guard.data();
            out.push(LeafSummary {
                node_id: leaf_id,
                tuple_count: SortedLeaf::tuple_count(&page),
                sorted: SortedLeaf::is_sorted(&page),
                cold: super::leaf::is_cold(&page),
                min_key: SortedLeaf::min_key::<K>(&page, &self.schema, self.key_index),
                max_key: SortedLeaf::max_key::<K>(&page, &self.schema, self.key_index),
                used_space: SortedLeaf::used_space(&page),
            });
            leaf_id = SortedLeaf::next_id(&page);
        }
        Ok(out)
    }

    /// Writes all dirty pages of this index to its file.
    pub fn flush(&self) -> Result<usize> {
        self.db.flush_file(self.file.name())
    }
}

impl<K: IndexKey> Drop for SimpleTree<K> {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(file = %self.file.name(), error = %e, "flush on drop failed");
        }
    }
}
