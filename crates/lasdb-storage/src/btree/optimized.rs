//! B+-tree with a fast-path leaf cache, parameterized by leaf layout.
//!
//! The fast path remembers one leaf and the half-open key interval
//! `[fp_min, fp_max)` it owns. Inserts inside the interval skip the
//! root-to-leaf walk entirely; on near-sorted streams that is almost
//! every insert. When the stream moves on, the abandoned leaf is
//! enqueued cold so a background worker (see [`super::las`]) can sort
//! it while it is no longer contended.

use super::cold::ColdLeafQueue;
use super::internal::{propagate_split, InternalNode};
use super::leaf::{Leaf, LeafSummary};
use super::locks::LeafLockTable;
use super::simple::MAX_DESCENT;
use crate::database::Database;
use crate::file::FileStore;
use crate::key::IndexKey;
use crate::tuple::{Schema, Tuple};
use lasdb_common::page::{NodeId, NodeType, PageId, INVALID_NODE_ID};
use lasdb_common::types::Field;
use lasdb_common::{LasError, Result};
use parking_lot::Mutex;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

/// Consecutive out-of-range inserts tolerated before the fast path is
/// hard-reset onto the most recent target leaf.
const MAX_SOFT_FAILURES: usize = 3;

/// Fast-path state, owned exclusively by the coordinator.
struct FastPath<K> {
    leaf_id: NodeId,
    min: K,
    max: K,
    soft_failures: usize,
}

/// B+-tree coordinator with fast-path tracking and cold-leaf queueing.
pub struct OptimizedTree<K: IndexKey, L: Leaf> {
    db: Arc<Database>,
    file: Arc<FileStore>,
    schema: Schema,
    key_index: usize,
    root_id: AtomicU32,
    head_id: AtomicU32,
    height: AtomicU32,
    size: AtomicU64,
    fast_path_hits: AtomicU64,
    sorted_leaf_search: AtomicU64,
    background_sorts: AtomicU64,
    state: Mutex<FastPath<K>>,
    locks: LeafLockTable,
    cold: ColdLeafQueue,
    _leaf: PhantomData<L>,
}

impl<K: IndexKey, L: Leaf> OptimizedTree<K, L> {
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
            fast_path_hits: AtomicU64::new(0),
            sorted_leaf_search: AtomicU64::new(0),
            background_sorts: AtomicU64::new(0),
            state: Mutex::new(FastPath {
                leaf_id: INVALID_NODE_ID,
                min: K::MIN,
                max: K::MAX,
                soft_failures: 0,
            }),
            locks: LeafLockTable::new(),
            cold: ColdLeafQueue::new(),
            _leaf: PhantomData,
        })
    }

    /// Allocates the head leaf (page 0) and the initial root (page 1),
    /// and aims the fast path at the head leaf over the full key range.
    /// Must be called exactly once.
    pub fn init(&self) -> Result<()> {
        if self.root_id.load(Ordering::Acquire) != INVALID_NODE_ID {
            return Err(LasError::AlreadyInitialized);
        }

        let head_id = self.file.allocate();
        {
            let guard = self.db.page_mut(&self.page_id(head_id))?;
            let mut page = guard.data_mut();
            L::format::<K>(&mut page, head_id, INVALID_NODE_ID);
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

        // The fast path stays unset until the first insert lands and
        // adopts its leaf; counting that insert as a hit would credit
        // the fast path for work the descent did.
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

    fn key_from_field(&self, field: &Field, op: &str) -> Result<K> {
        K::from_field(field)
            .ok_or_else(|| LasError::KeyTypeMismatch(format!("{} on {}", op, self.file.name())))
    }

    /// Walks root to leaf. Besides the target leaf and the internal
    /// path, reports the smallest key of the succeeding leaf (the upper
    /// bound recorded at the deepest level that had one), `K::MAX` when
    /// the walk stays rightmost.
    fn descend(&self, key: K) -> Result<(NodeId, Vec<NodeId>, K)> {
        let mut node_id = self.root()?;
        let mut path = Vec::with_capacity(self.height.load(Ordering::Acquire) as usize);
        let mut next_min = K::MAX;

        for _ in 0..MAX_DESCENT {
            let guard = self.db.page(&self.page_id(node_id))?;
            let page = guard.data();
            if NodeType::of(&page) == NodeType::Leaf {
                return Ok((node_id, path, next_min));
            }
            path.push(node_id);
            let slot = InternalNode::child_slot::<K>(&page, key);
            if slot < InternalNode::key_count(&page) {
                next_min = InternalNode::key_at::<K>(&page, slot);
            }
            node_id = InternalNode::child_at::<K>(&page, slot);
        }
        Err(LasError::TreeCorrupted(format!(
            "descent exceeded {} levels in {}",
            MAX_DESCENT,
            self.file.name()
        )))
    }

    /// Inserts a tuple, trying the fast path first.
    pub fn insert(&self, tuple: &Tuple) -> Result<()> {
        let key = self.extract_key(tuple)?;
        self.root()?;
        let mut fp = self.state.lock();

        if fp.leaf_id != INVALID_NODE_ID && key >= fp.min && key < fp.max {
            let fp_leaf = fp.leaf_id;
            let inserted = self.leaf_insert(fp_leaf, tuple)?;
            if inserted {
                self.fast_path_hits.fetch_add(1, Ordering::AcqRel);
                self.size.fetch_add(1, Ordering::AcqRel);
                return Ok(());
            }

            // Fast-path leaf is full: split it along the regular path
            let (_, path, next_min) = self.descend(key)?;
            self.split_insert(&mut fp, fp_leaf, tuple, key, &path, next_min)?;
            self.size.fetch_add(1, Ordering::AcqRel);
            return Ok(());
        }

        // Regular path
        let (leaf_id, path, next_min) = self.descend(key)?;
        let outcome = {
            let _leaf_lock = self.locks.exclusive(leaf_id);
            let guard = self.db.page_mut(&self.page_id(leaf_id))?;
            let mut page = guard.data_mut();
            let ok = L::insert::<K>(&mut page, &self.schema, self.key_index, tuple);
            let min = L::min_key::<K>(&page, &self.schema, self.key_index);
            let next = L::next_id(&page);
            drop(page);
            if ok {
                guard.mark_dirty();
            }
            (ok, min, next)
        };

        let (inserted, leaf_min, leaf_next) = outcome;
        if inserted {
            self.size.fetch_add(1, Ordering::AcqRel);
            self.retarget_fast_path(&mut fp, key, leaf_id, leaf_min, leaf_next, next_min);
            return Ok(());
        }

        self.split_insert(&mut fp, leaf_id, tuple, key, &path, next_min)?;
        self.size.fetch_add(1, Ordering::AcqRel);
        Ok(())
    }

    /// One locked insert attempt into a specific leaf.
    fn leaf_insert(&self, leaf_id: NodeId, tuple: &Tuple) -> Result<bool> {
        let _leaf_lock = self.locks.exclusive(leaf_id);
        let guard = self.db.page_mut(&self.page_id(leaf_id))?;
        let mut page = guard.data_mut();
        let ok = L::insert::<K>(&mut page, &self.schema, self.key_index, tuple);
        drop(page);
        if ok {
            guard.mark_dirty();
        }
        Ok(ok)
    }

    /// Fast-path maintenance after an out-of-range insert landed in
    /// leaf `leaf_id`: follow the stream immediately when it advanced
    /// into the successor leaf, otherwise tolerate a few strays before
    /// hard-resetting. The abandoned leaf goes cold either way.
    fn retarget_fast_path(
        &self,
        fp: &mut FastPath<K>,
        key: K,
        leaf_id: NodeId,
        leaf_min: Option<K>,
        leaf_next: NodeId,
        next_min: K,
    ) {
        let prior = fp.leaf_id;

        let adopt = if prior == INVALID_NODE_ID || key == fp.max {
            // Unset, or the stream advanced exactly into the successor
            // leaf: follow it immediately
            true
        } else {
            fp.soft_failures += 1;
            fp.soft_failures >= MAX_SOFT_FAILURES
        };
        if !adopt {
            return;
        }

        fp.leaf_id = leaf_id;
        fp.min = leaf_min.unwrap_or(key);
        fp.max = if leaf_next == INVALID_NODE_ID {
            K::MAX
        } else {
            next_min
        };
        fp.soft_failures = 0;

        if prior != INVALID_NODE_ID && prior != leaf_id {
            self.cold.push(prior);
        }
    }

    /// Splits a full leaf, routes the pending tuple into the correct
    /// half, re-aims the fast path, and propagates the separator.
    fn split_insert(
        &self,
        fp: &mut FastPath<K>,
        leaf_id: NodeId,
        tuple: &Tuple,
        key: K,
        path: &[NodeId],
        next_min: K,
    ) -> Result<()> {
        let new_id = self.file.allocate();
        let prior = fp.leaf_id;

        let separator = {
            let _leaf_locks = self.locks.exclusive_pair(leaf_id, new_id);
            let leaf_guard = self.db.page_mut(&self.page_id(leaf_id))?;
            let new_guard = self.db.page_mut(&self.page_id(new_id))?;
            let mut left = leaf_guard.data_mut();
            let mut right = new_guard.data_mut();

            L::format::<K>(&mut right, new_id, INVALID_NODE_ID);
            let separator =
                L::split_into::<K>(&mut left, &mut right, &self.schema, self.key_index);

            let routed = if key < separator {
                let ok = L::insert::<K>(&mut left, &self.schema, self.key_index, tuple);
                fp.leaf_id = leaf_id;
                fp.min = L::min_key::<K>(&left, &self.schema, self.key_index).unwrap_or(key);
                fp.max = separator;
                ok
            } else {
                let ok = L::insert::<K>(&mut right, &self.schema, self.key_index, tuple);
                fp.leaf_id = new_id;
                fp.min = separator;
                fp.max = if L::next_id(&right) == INVALID_NODE_ID {
                    K::MAX
                } else {
                    next_min
                };
                ok
            };
            fp.soft_failures = 0;

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

        if prior != INVALID_NODE_ID && prior != fp.leaf_id {
            self.cold.push(prior);
        }

        let grew =
            propagate_split::<K>(&self.db, &self.file, self.root()?, path, separator, new_id)?;
        if grew {
            self.height.fetch_add(1, Ordering::AcqRel);
        }
        Ok(())
    }

    /// Point lookup by key field.
    pub fn get(&self, key_field: &Field) -> Result<Option<Tuple>> {
        let key = self.key_from_field(key_field, "get")?;
        let (leaf_id, _, _) = self.descend(key)?;

        let _leaf_lock = self.locks.shared(leaf_id);
        let guard = self.db.page(&self.page_id(leaf_id))?;
        let page = guard.data();
        if L::is_sorted(&page) {
            self.sorted_leaf_search.fetch_add(1, Ordering::AcqRel);
        }
        Ok(L::get::<K>(&page, &self.schema, self.key_index, key))
    }

    /// All tuples with keys in `[lo, hi]`, ascending.
    pub fn range(&self, lo_field: &Field, hi_field: &Field) -> Result<Vec<Tuple>> {
        let lo = self.key_from_field(lo_field, "range")?;
        let hi = self.key_from_field(hi_field, "range")?;

        let (mut leaf_id, _, _) = self.descend(lo)?;
        let mut out = Vec::new();

        while leaf_id != INVALID_NODE_ID {
            let _leaf_lock = self.locks.shared(leaf_id);
            let guard = self.db.page(&self.page_id(leaf_id))?;
            let page = guard.data();
            if let Some(min) = L::min_key::<K>(&page, &self.schema, self.key_index) {
                if min > hi {
                    break;
                }
            }
            out.extend(L::range::<K>(&page, &self.schema, self.key_index, lo, hi));
            leaf_id = L::next_id(&page);
        }
        Ok(out)
    }

    /// Applies field updates to the tuple stored under `key`.
    /// Returns false if the key is absent.
    pub fn update(&self, key_field: &Field, updates: &[(usize, Field)]) -> Result<bool> {
        let key = self.key_from_field(key_field, "update")?;
        let (leaf_id, _, _) = self.descend(key)?;

        let _leaf_lock = self.locks.exclusive(leaf_id);
        let guard = self.db.page_mut(&self.page_id(leaf_id))?;
        let mut page = guard.data_mut();

        let Some(mut tuple) = L::get::<K>(&page, &self.schema, self.key_index, key) else {
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

        let ok = L::update::<K>(&mut page, &self.schema, self.key_index, &tuple);
        drop(page);
        if ok {
            guard.mark_dirty();
        }
        Ok(ok)
    }

    /// Removes a key. Returns false when nothing was removed.
    pub fn erase(&self, key_field: &Field) -> Result<bool> {
        let key = self.key_from_field(key_field, "erase")?;
        let (leaf_id, _, _) = self.descend(key)?;

        let _leaf_lock = self.locks.exclusive(leaf_id);
        let guard = self.db.page_mut(&self.page_id(leaf_id))?;
        let mut page = guard.data_mut();
        let ok = L::erase::<K>(&mut page, &self.schema, self.key_index, key);
        drop(page);
        if ok {
            guard.mark_dirty();
            let _ = self
                .size
                .fetch_update(Ordering::AcqRel, Ordering::Acquire, |v| {
                    Some(v.saturating_sub(1))
                });
        }
        Ok(ok)
    }

    /// Sorts one cold leaf in place, if it still needs it. Returns true
    /// when a sort pass actually ran.
    pub(crate) fn sort_cold_leaf(&self, leaf_id: NodeId) -> Result<bool> {
        let _leaf_lock = self.locks.exclusive(leaf_id);
        let guard = self.db.page_mut(&self.page_id(leaf_id))?;
        let mut page = guard.data_mut();

        if NodeType::of(&page) != NodeType::Leaf {
            return Err(LasError::TreeCorrupted(format!(
                "cold queue pointed at non-leaf page {}",
                leaf_id
            )));
        }
        if L::is_sorted(&page) {
            return Ok(false);
        }

        L::sort::<K>(&mut page, &self.schema, self.key_index);
        super::leaf::set_cold(&mut page, true);
        drop(page);
        guard.mark_dirty();
        self.background_sorts.fetch_add(1, Ordering::AcqRel);
        Ok(true)
    }

    pub(crate) fn cold(&self) -> &ColdLeafQueue {
        &self.cold
    }

    /// Number of records inserted minus records erased.
    pub fn size(&self) -> u64 {
        self.size.load(Ordering::Acquire)
    }

    /// Tree height (1 = root directly over the head leaf).
    pub fn height(&self) -> u32 {
        self.height.load(Ordering::Acquire)
    }

    /// Inserts served without a root-to-leaf walk.
    pub fn fast_path_hits(&self) -> u64 {
        self.fast_path_hits.load(Ordering::Acquire)
    }

    /// Lookups served from a sorted leaf.
    pub fn sorted_leaf_search(&self) -> u64 {
        self.sorted_leaf_search.load(Ordering::Acquire)
    }

    /// Background sort passes that ran to completion.
    pub fn background_sorts(&self) -> u64 {
        self.background_sorts.load(Ordering::Acquire)
    }

    /// The leaf currently targeted by the fast path.
    pub fn fast_path_leaf(&self) -> NodeId {
        self.state.lock().leaf_id
    }

    /// Leaf count and fill-factor across the chain.
    pub fn leaf_stats(&self) -> Result<(usize, f64)> {
        let summaries = self.leaf_summaries()?;
        let leaf_count = summaries.len();
        let used: usize = summaries.iter().map(|s| s.used_space).sum();
        let available = leaf_count * L::available_space::<K>();
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
            let _leaf_lock = self.locks.shared(leaf_id);
            let guard = self.db.page(&self.page_id(leaf_id))?;
            let page = guard.data();
            out.push(LeafSummary {
                node_id: leaf_id,
                tuple_count: L::tuple_count(&page),
                sorted: L::is_sorted(&page),
                cold: super::leaf::is_cold(&page),
                min_key: L::min_key::<K>(&page, &self.schema, self.key_index),
                max_key: L::max_key::<K>(&page, &self.schema, self.key_index),
                used_space: L::used_space(&page),
            });
            leaf_id = L::next_id(&page);
        }
        Ok(out)
    }

    /// Writes all dirty pages of this index to its file.
    pub fn flush(&self) -> Result<usize> {
        self.db.flush_file(self.file.name())
    }
}

impl<K: IndexKey, L: Leaf> Drop for OptimizedTree<K, L> {
    fn drop(&mut self) {
        if let Err(e) = self.flush() {
            warn!(file = %self.file.name(), error = %e, "flush on drop failed");
        }
    }
}
