//! Striped per-leaf read/write locks.
//!
//! Leaf content is protected by shared/exclusive locks keyed by node
//! id. Striping bounds memory at a fixed 128 locks instead of growing
//! a map entry per leaf for the life of the tree.

use lasdb_common::page::NodeId;
use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};

const STRIPES: usize = 128;

/// Fixed-size table of leaf locks.
pub struct LeafLockTable {
    stripes: Vec<RwLock<()>>,
}

impl LeafLockTable {
    pub fn new() -> Self {
        Self {
            stripes: (0..STRIPES).map(|_| RwLock::new(())).collect(),
        }
    }

    fn stripe(&self, id: NodeId) -> usize {
        id as usize & (STRIPES - 1)
    }

    /// Shared lock for readers of a leaf.
    pub fn shared(&self, id: NodeId) -> RwLockReadGuard<'_, ()> {
        self.stripes[self.stripe(id)].read()
    }

    /// Exclusive lock for writers of a leaf.
    pub fn exclusive(&self, id: NodeId) -> RwLockWriteGuard<'_, ()> {
        self.stripes[self.stripe(id)].write()
    }

    /// Exclusive locks for two leaves at once (the split path).
    ///
    /// Stripes are acquired in index order, and a shared stripe is
    /// locked only once, so a pair acquisition can neither self-deadlock
    /// nor invert order against another pair.
    pub fn exclusive_pair(
        &self,
        a: NodeId,
        b: NodeId,
    ) -> (RwLockWriteGuard<'_, ()>, Option<RwLockWriteGuard<'_, ()>>) {
        let (sa, sb) = (self.stripe(a), self.stripe(b));
        if sa == sb {
            (self.stripes[sa].write(), None)
        } else {
            let (first, second) = if sa < sb { (sa, sb) } else { (sb, sa) };
            let g1 = self.stripes[first].write();
            let g2 = self.stripes[second].write();
            (g1, Some(g2))
        }
    }
}

impl Default for LeafLockTable {
    fn default() -> Self {
        Self::new()
    }
}
