//! The leaf interface and the header fields shared by both layouts.

use super::{read_u16, read_u32, write_u16, write_u32};
use crate::key::IndexKey;
use crate::tuple::{Schema, Tuple};
use lasdb_common::page::{NodeId, NodeType, Page};

/// Header field offsets common to both leaf layouts.
pub(crate) mod header {
    pub const OFF_NODE_ID: usize = 4;
    pub const OFF_TUPLE_COUNT: usize = 8;
    pub const OFF_NEXT_ID: usize = 10;
    pub const OFF_SORTED: usize = 14;
    pub const OFF_COLD: usize = 15;
    pub const OFF_SLOT_COUNT: usize = 16;
    pub const OFF_HEAP_END: usize = 18;
    /// First byte past the shared header.
    pub const END: usize = 20;
}

pub(crate) fn node_id(page: &Page) -> NodeId {
    read_u32(page, header::OFF_NODE_ID)
}

pub(crate) fn set_node_id(page: &mut Page, id: NodeId) {
    write_u32(page, header::OFF_NODE_ID, id);
}

pub(crate) fn tuple_count(page: &Page) -> u16 {
    read_u16(page, header::OFF_TUPLE_COUNT)
}

pub(crate) fn set_tuple_count(page: &mut Page, count: u16) {
    write_u16(page, header::OFF_TUPLE_COUNT, count);
}

pub(crate) fn next_id(page: &Page) -> NodeId {
    read_u32(page, header::OFF_NEXT_ID)
}

pub(crate) fn set_next_id(page: &mut Page, id: NodeId) {
    write_u32(page, header::OFF_NEXT_ID, id);
}

pub(crate) fn is_sorted(page: &Page) -> bool {
    page[header::OFF_SORTED] != 0
}

pub(crate) fn set_sorted(page: &mut Page, sorted: bool) {
    page[header::OFF_SORTED] = sorted as u8;
}

pub(crate) fn is_cold(page: &Page) -> bool {
    page[header::OFF_COLD] != 0
}

pub(crate) fn set_cold(page: &mut Page, cold: bool) {
    page[header::OFF_COLD] = cold as u8;
}

pub(crate) fn slot_count(page: &Page) -> u16 {
    read_u16(page, header::OFF_SLOT_COUNT)
}

pub(crate) fn set_slot_count(page: &mut Page, count: u16) {
    write_u16(page, header::OFF_SLOT_COUNT, count);
}

pub(crate) fn heap_end(page: &Page) -> usize {
    read_u16(page, header::OFF_HEAP_END) as usize
}

pub(crate) fn set_heap_end(page: &mut Page, end: usize) {
    write_u16(page, header::OFF_HEAP_END, end as u16);
}

/// Writes the fields shared by both layouts into a fresh leaf page.
pub(crate) fn format_common(page: &mut Page, id: NodeId, next: NodeId, sorted: bool) {
    NodeType::Leaf.write(page);
    set_node_id(page, id);
    set_tuple_count(page, 0);
    set_next_id(page, next);
    set_sorted(page, sorted);
    set_cold(page, false);
    set_slot_count(page, 0);
    set_heap_end(page, lasdb_common::PAGE_SIZE);
}

/// Extracts the index key from a tuple's key field.
pub(crate) fn extract_key<K: IndexKey>(tuple: &Tuple, key_index: usize) -> K {
    K::from_field(tuple.field(key_index)).unwrap_or(K::MIN)
}

/// Operations every leaf layout supports.
///
/// Implementations are stateless layout markers; all functions operate
/// directly on a borrowed page image so callers can run them against
/// buffer-pool frames without copying.
pub trait Leaf: Send + Sync + 'static {
    /// Initializes a fresh page as an empty leaf of this layout.
    fn format<K: IndexKey>(page: &mut Page, id: NodeId, next: NodeId);

    /// Inserts a tuple. Returns false iff the tuple does not fit.
    fn insert<K: IndexKey>(page: &mut Page, schema: &Schema, key_index: usize, tuple: &Tuple)
        -> bool;

    /// Replaces (or inserts) the tuple with the same key.
    fn update<K: IndexKey>(page: &mut Page, schema: &Schema, key_index: usize, tuple: &Tuple)
        -> bool;

    /// Removes a key. Returns false if nothing was removed (sorted
    /// layout) or the marker did not fit (append layout).
    fn erase<K: IndexKey>(page: &mut Page, schema: &Schema, key_index: usize, key: K) -> bool;

    /// Looks up the visible value of a key.
    fn get<K: IndexKey>(page: &Page, schema: &Schema, key_index: usize, key: K) -> Option<Tuple>;

    /// All visible tuples with keys in `[lo, hi]`, ascending.
    fn range<K: IndexKey>(page: &Page, schema: &Schema, key_index: usize, lo: K, hi: K)
        -> Vec<Tuple>;

    /// Splits a full leaf, moving the upper part into `right` (which
    /// must be freshly formatted with its own id). Relinks the leaf
    /// chain and returns the separator key.
    fn split_into<K: IndexKey>(
        left: &mut Page,
        right: &mut Page,
        schema: &Schema,
        key_index: usize,
    ) -> K;

    /// Sorts the page in place if the layout supports deferred
    /// ordering; a no-op for layouts that are always sorted.
    fn sort<K: IndexKey>(page: &mut Page, schema: &Schema, key_index: usize);

    /// Whether the page is currently key-sorted.
    fn is_sorted(page: &Page) -> bool {
        is_sorted(page)
    }

    /// This leaf's node id.
    fn node_id(page: &Page) -> NodeId {
        node_id(page)
    }

    /// Next leaf in the chain.
    fn next_id(page: &Page) -> NodeId {
        next_id(page)
    }

    /// Number of logically live tuples.
    fn tuple_count(page: &Page) -> u16 {
        tuple_count(page)
    }

    /// Smallest live key, if any.
    fn min_key<K: IndexKey>(page: &Page, schema: &Schema, key_index: usize) -> Option<K>;

    /// Largest live key, if any.
    fn max_key<K: IndexKey>(page: &Page, schema: &Schema, key_index: usize) -> Option<K>;

    /// Bytes consumed by records and slots.
    fn used_space(page: &Page) -> usize;

    /// Bytes a leaf of this layout can use for records and slots.
    fn available_space<K: IndexKey>() -> usize;
}

/// Point-in-time description of one leaf, for stats and tests.
#[derive(Debug, Clone)]
pub struct LeafSummary<K> {
    pub node_id: NodeId,
    pub tuple_count: u16,
    pub sorted: bool,
    pub cold: bool,
    pub min_key: Option<K>,
    pub max_key: Option<K>,
    pub used_space: usize,
}
