//! Internal node: a fixed-capacity key/child-id array over a page.
//!
//! Layout after the 4-byte base header: `node_id: u32`, `key_count:
//! u16`, 2 reserved bytes, then `keys[C]` and `children[C + 1]` with
//! `C = (4096 - 12 - 4) / (key_len + 4)`. Keys are strictly
//! increasing; `children[i]` holds keys `< keys[i]`, `children[i + 1]`
//! keys `>= keys[i]`.

use super::{read_u16, read_u32, write_u16, write_u32};
use crate::key::IndexKey;
use lasdb_common::page::{NodeId, NodeType, Page, PAGE_SIZE};

const OFF_NODE_ID: usize = 4;
const OFF_KEY_COUNT: usize = 8;
const HEADER_SIZE: usize = 12;

/// Internal node accessors over a page image.
pub struct InternalNode;

/// Maximum number of keys per node for key type `K`.
pub fn capacity<K: IndexKey>() -> usize {
    (PAGE_SIZE - HEADER_SIZE - 4) / (K::encoded_len() + 4)
}

fn children_off<K: IndexKey>() -> usize {
    HEADER_SIZE + capacity::<K>() * K::encoded_len()
}

fn key_pos<K: IndexKey>(i: usize) -> usize {
    HEADER_SIZE + i * K::encoded_len()
}

fn child_pos<K: IndexKey>(i: usize) -> usize {
    children_off::<K>() + i * 4
}

impl InternalNode {
    /// Initializes a fresh page as an empty internal node.
    pub fn format(page: &mut Page, id: NodeId) {
        NodeType::Internal.write(page);
        write_u32(page, OFF_NODE_ID, id);
        write_u16(page, OFF_KEY_COUNT, 0);
    }

    pub fn node_id(page: &Page) -> NodeId {
        read_u32(page, OFF_NODE_ID)
    }

    pub fn key_count(page: &Page) -> usize {
        read_u16(page, OFF_KEY_COUNT) as usize
    }

    pub fn set_key_count(page: &mut Page, count: usize) {
        write_u16(page, OFF_KEY_COUNT, count as u16);
    }

    pub fn key_at<K: IndexKey>(page: &Page, i: usize) -> K {
        K::read_from(&page[key_pos::<K>(i)..])
    }

    pub fn set_key_at<K: IndexKey>(page: &mut Page, i: usize, key: K) {
        key.write_to(&mut page[key_pos::<K>(i)..]);
    }

    pub fn child_at<K: IndexKey>(page: &Page, i: usize) -> NodeId {
        read_u32(page, child_pos::<K>(i))
    }

    pub fn set_child_at<K: IndexKey>(page: &mut Page, i: usize, child: NodeId) {
        write_u32(page, child_pos::<K>(i), child);
    }

    /// Routing slot for a key: the upper bound over the key array, so
    /// equal keys descend into the right (>=) child.
    pub fn child_slot<K: IndexKey>(page: &Page, key: K) -> usize {
        let mut lo = 0usize;
        let mut hi = Self::key_count(page);
        while lo < hi {
            let mid = lo + (hi - lo) / 2;
            if Self::key_at::<K>(page, mid) <= key {
                lo = mid + 1;
            } else {
                hi = mid;
            }
        }
        lo
    }

    /// True if one more key fits.
    pub fn has_room<K: IndexKey>(page: &Page) -> bool {
        Self::key_count(page) < capacity::<K>()
    }

    /// Inserts `(key, child)` at `index`, shifting higher keys and
    /// children right. The caller has checked [`InternalNode::has_room`].
    pub fn insert_at<K: IndexKey>(page: &mut Page, index: usize, key: K, child: NodeId) {
        let count = Self::key_count(page);
        let klen = K::encoded_len();

        page.copy_within(
            key_pos::<K>(index)..key_pos::<K>(count),
            key_pos::<K>(index) + klen,
        );
        page.copy_within(
            child_pos::<K>(index + 1)..child_pos::<K>(count + 1),
            child_pos::<K>(index + 1) + 4,
        );

        Self::set_key_at(page, index, key);
        Self::set_child_at::<K>(page, index + 1, child);
        Self::set_key_count(page, count + 1);
    }

    /// Splits a full node while inserting `(key, child)`, filling
    /// `right` (freshly formatted) with the upper half. Returns the
    /// separator promoted to the parent.
    ///
    /// Of the `C + 1` keys in the merged sequence, the left node keeps
    /// `C/2`, the right node takes `C - C/2`, and the one in the middle
    /// moves up. Three cases by where the new key lands relative to the
    /// split position.
    pub fn split_and_insert<K: IndexKey>(
        left: &mut Page,
        right: &mut Page,
        key: K,
        child: NodeId,
    ) -> K {
        let c = capacity::<K>();
        let p = c / 2;
        let klen = K::encoded_len();
        debug_assert_eq!(Self::key_count(left), c);

        let index = Self::child_slot::<K>(left, key);
        let promoted;

        if index < p {
            // Right takes keys[p..c) and children[p..c+1) unchanged
            right[key_pos::<K>(0)..key_pos::<K>(c - p)]
                .copy_from_slice(&left[key_pos::<K>(p)..key_pos::<K>(c)]);
            right[child_pos::<K>(0)..child_pos::<K>(c - p + 1)]
                .copy_from_slice(&left[child_pos::<K>(p)..child_pos::<K>(c + 1)]);

            // Shift the left prefix and place the new entry
            left.copy_within(
                key_pos::<K>(index)..key_pos::<K>(p),
                key_pos::<K>(index) + klen,
            );
            left.copy_within(
                child_pos::<K>(index + 1)..child_pos::<K>(p + 1),
                child_pos::<K>(index + 1) + 4,
            );
            Self::set_key_at(left, index, key);
            Self::set_child_at::<K>(left, index + 1, child);

            // After the shift, slot p holds the former keys[p - 1]
            promoted = Self::key_at::<K>(left, p);
        } else if index == p {
            // The new key is exactly the separator; the new child
            // becomes the right node's leftmost subtree
            right[key_pos::<K>(0)..key_pos::<K>(c - p)]
                .copy_from_slice(&left[key_pos::<K>(p)..key_pos::<K>(c)]);
            Self::set_child_at::<K>(right, 0, child);
            right[child_pos::<K>(1)..child_pos::<K>(c - p + 1)]
                .copy_from_slice(&left[child_pos::<K>(p + 1)..child_pos::<K>(c + 1)]);

            promoted = key;
        } else {
            // New entry lands in the right node
            let ni = index - p - 1;

            right[key_pos::<K>(0)..key_pos::<K>(ni)]
                .copy_from_slice(&left[key_pos::<K>(p + 1)..key_pos::<K>(index)]);
            Self::set_key_at(right, ni, key);
            right[key_pos::<K>(ni + 1)..key_pos::<K>(ni + 1 + c - index)]
                .copy_from_slice(&left[key_pos::<K>(index)..key_pos::<K>(c)]);

            right[child_pos::<K>(0)..child_pos::<K>(ni + 1)]
                .copy_from_slice(&left[child_pos::<K>(p + 1)..child_pos::<K>(index + 1)]);
            Self::set_child_at::<K>(right, ni + 1, child);
            right[child_pos::<K>(ni + 2)..child_pos::<K>(ni + 2 + c - index)]
                .copy_from_slice(&left[child_pos::<K>(index + 1)..child_pos::<K>(c + 1)]);

            promoted = Self::key_at::<K>(left, p);
        }

        Self::set_key_count(left, p);
        Self::set_key_count(right, c - p);
        promoted
    }

    /// Copies this node's keys, children, and count into `dst` (which
    /// keeps its own node id). Used when the root splits and its old
    /// contents move into a fresh left child.
    pub fn clone_into<K: IndexKey>(src: &Page, dst: &mut Page) {
        let count = Self::key_count(src);
        dst[key_pos::<K>(0)..key_pos::<K>(count)]
            .copy_from_slice(&src[key_pos::<K>(0)..key_pos::<K>(count)]);
        dst[child_pos::<K>(0)..child_pos::<K>(count + 1)]
            .copy_from_slice(&src[child_pos::<K>(0)..child_pos::<K>(count + 1)]);
        Self::set_key_count(dst, count);
    }

    /// Rewrites a page as a 1-key root over two children.
    pub fn make_root<K: IndexKey>(page: &mut Page, key: K, left: NodeId, right: NodeId) {
        Self::set_key_count(page, 1);
        Self::set_key_at(page, 0, key);
        Self::set_child_at::<K>(page, 0, left);
        Self::set_child_at::<K>(page, 1, right);
    }
}

/// Propagates `(separator, right_child)` up the saved root-to-leaf
/// path, right-most internal node first.
///
/// Nodes with room absorb the entry; full nodes split and promote. When
/// the whole path is consumed the root itself has split: its contents
/// move into a fresh left clone and the root page is rewritten in place
/// as a 1-key node, so the root id never changes. Returns true when the
/// tree grew a level.
pub(crate) fn propagate_split<K: IndexKey>(
    db: &crate::database::Database,
    file: &crate::file::FileStore,
    root_id: NodeId,
    path: &[NodeId],
    separator: K,
    right_child: NodeId,
) -> lasdb_common::Result<bool> {
    let mut key = separator;
    let mut child_id = right_child;

    for &node_id in path.iter().rev() {
        let pid = lasdb_common::page::PageId::new(file.name().clone(), node_id);
        let guard = db.page_mut(&pid)?;
        let mut page = guard.data_mut();

        if InternalNode::has_room::<K>(&page) {
            let index = InternalNode::child_slot::<K>(&page, key);
            InternalNode::insert_at::<K>(&mut page, index, key, child_id);
            drop(page);
            guard.mark_dirty();
            return Ok(false);
        }

        let new_id = file.allocate();
        let new_pid = lasdb_common::page::PageId::new(file.name().clone(), new_id);
        let new_guard = db.page_mut(&new_pid)?;
        let mut new_page = new_guard.data_mut();
        InternalNode::format(&mut new_page, new_id);

        key = InternalNode::split_and_insert::<K>(&mut page, &mut new_page, key, child_id);

        drop(page);
        drop(new_page);
        guard.mark_dirty();
        new_guard.mark_dirty();
        child_id = new_id;
    }

    create_new_root::<K>(db, file, root_id, key, child_id)?;
    Ok(true)
}

/// Handles a split that reached the root: clone the root's contents
/// into a fresh left child, then rewrite the root page over the clone
/// and the new right child.
fn create_new_root<K: IndexKey>(
    db: &crate::database::Database,
    file: &crate::file::FileStore,
    root_id: NodeId,
    key: K,
    right_child: NodeId,
) -> lasdb_common::Result<()> {
    let root_pid = lasdb_common::page::PageId::new(file.name().clone(), root_id);
    let root_guard = db.page_mut(&root_pid)?;

    let left_id = file.allocate();
    let left_pid = lasdb_common::page::PageId::new(file.name().clone(), left_id);
    let left_guard = db.page_mut(&left_pid)?;

    let mut root_page = root_guard.data_mut();
    let mut left_page = left_guard.data_mut();

    InternalNode::format(&mut left_page, left_id);
    InternalNode::clone_into::<K>(&root_page, &mut left_page);
    InternalNode::make_root::<K>(&mut root_page, key, left_id, right_child);

    drop(root_page);
    drop(left_page);
    root_guard.mark_dirty();
    left_guard.mark_dirty();
    Ok(())
}
