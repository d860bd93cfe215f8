//! Log-structured leaf with per-record op codes and tombstones.
//!
//! Inserts and deletes append; the visible value of a key is whatever
//! the most recent record says. A sort pass (run by the background
//! worker once the leaf has gone cold) rewrites the page as the
//! deduplicated live set in key order, after which lookups binary
//! search. `sorted = true` implies no tombstones remain.

use super::leaf::{self, extract_key, Leaf};
use super::{read_u16, write_u16};
use crate::key::IndexKey;
use crate::tuple::{Schema, Tuple};
use lasdb_common::page::{NodeId, Page, PAGE_SIZE};
use std::collections::HashSet;

/// Record op codes, stored as the first byte of every heap record.
const OP_INSERT: u8 = 0;
const OP_DELETE: u8 = 1;

/// Slot layout: offset u16, length u16.
const SLOT_SIZE: usize = 4;

/// Append-only leaf layout.
pub struct AppendLeaf;

fn min_key_off() -> usize {
    leaf::header::END
}

fn max_key_off<K: IndexKey>() -> usize {
    leaf::header::END + K::encoded_len()
}

fn slots_off<K: IndexKey>() -> usize {
    leaf::header::END + 2 * K::encoded_len()
}

fn slot_pos<K: IndexKey>(i: usize) -> usize {
    slots_off::<K>() + i * SLOT_SIZE
}

fn slot<K: IndexKey>(page: &Page, i: usize) -> (usize, usize) {
    let pos = slot_pos::<K>(i);
    (read_u16(page, pos) as usize, read_u16(page, pos + 2) as usize)
}

fn push_slot<K: IndexKey>(page: &mut Page, offset: usize, len: usize) {
    let count = leaf::slot_count(page) as usize;
    let pos = slot_pos::<K>(count);
    write_u16(page, pos, offset as u16);
    write_u16(page, pos + 2, len as u16);
    leaf::set_slot_count(page, count as u16 + 1);
}

fn cached_min<K: IndexKey>(page: &Page) -> K {
    K::read_from(&page[min_key_off()..])
}

fn cached_max<K: IndexKey>(page: &Page) -> K {
    K::read_from(&page[max_key_off::<K>()..])
}

fn set_cached_min<K: IndexKey>(page: &mut Page, key: K) {
    key.write_to(&mut page[min_key_off()..]);
}

fn set_cached_max<K: IndexKey>(page: &mut Page, key: K) {
    key.write_to(&mut page[max_key_off::<K>()..]);
}

fn op_at<K: IndexKey>(page: &Page, i: usize) -> u8 {
    let (offset, _) = slot::<K>(page, i);
    page[offset]
}

/// Key of record `i`: tombstones store raw key bytes, inserts a tuple.
fn record_key<K: IndexKey>(page: &Page, schema: &Schema, key_index: usize, i: usize) -> K {
    let (offset, _) = slot::<K>(page, i);
    if page[offset] == OP_DELETE {
        K::read_from(&page[offset + 1..])
    } else {
        extract_key(&schema.deserialize(&page[offset + 1..]), key_index)
    }
}

fn tuple_at<K: IndexKey>(page: &Page, schema: &Schema, i: usize) -> Tuple {
    let (offset, _) = slot::<K>(page, i);
    schema.deserialize(&page[offset + 1..])
}

fn can_insert<K: IndexKey>(page: &Page, record_len: usize) -> bool {
    let heap_end = leaf::heap_end(page);
    let directory_end = slots_off::<K>() + (leaf::slot_count(page) as usize + 1) * SLOT_SIZE;
    heap_end >= record_len && heap_end - record_len >= directory_end
}

/// Appends a record (op byte + payload). Assumes space was checked.
fn append_record<K: IndexKey>(page: &mut Page, op: u8, payload: &[u8]) {
    let len = 1 + payload.len();
    let heap_end = leaf::heap_end(page) - len;
    page[heap_end] = op;
    page[heap_end + 1..heap_end + len].copy_from_slice(payload);
    leaf::set_heap_end(page, heap_end);
    push_slot::<K>(page, heap_end, len);
}

/// Resets the record area and the cached bounds to their empty state.
fn clear_records<K: IndexKey>(page: &mut Page) {
    leaf::set_slot_count(page, 0);
    leaf::set_tuple_count(page, 0);
    leaf::set_heap_end(page, PAGE_SIZE);
    set_cached_min(page, K::MAX);
    set_cached_max(page, K::MIN);
}

/// Binary search over a sorted page: first slot whose key is >= `key`.
/// Only meaningful when `sorted = true` (no tombstones, keys ascending).
fn value_slot<K: IndexKey>(page: &Page, schema: &Schema, key_index: usize, key: K) -> usize {
    let mut lo = 0usize;
    let mut hi = leaf::slot_count(page) as usize;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if record_key::<K>(page, schema, key_index, mid) < key {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

/// Newest-wins resolution of the log: the live tuples in ascending key
/// order. Tombstones suppress every older insert of their key.
fn compact<K: IndexKey>(page: &Page, schema: &Schema, key_index: usize) -> Vec<(K, Tuple)> {
    let count = leaf::slot_count(page) as usize;
    let mut resolved: HashSet<K> = HashSet::new();
    let mut live = Vec::new();

    for i in (0..count).rev() {
        let key = record_key::<K>(page, schema, key_index, i);
        if !resolved.insert(key) {
            continue; // a newer record already decided this key
        }
        if op_at::<K>(page, i) == OP_INSERT {
            live.push((key, tuple_at::<K>(page, schema, i)));
        }
    }

    live.sort_by(|a, b| a.0.cmp(&b.0));
    live
}

fn recompute_min_max<K: IndexKey>(page: &mut Page, schema: &Schema, key_index: usize) {
    let count = leaf::slot_count(page) as usize;
    let mut resolved: HashSet<K> = HashSet::new();
    let mut new_min = K::MAX;
    let mut new_max = K::MIN;

    for i in (0..count).rev() {
        let key = record_key::<K>(page, schema, key_index, i);
        if !resolved.insert(key) {
            continue;
        }
        if op_at::<K>(page, i) == OP_INSERT {
            new_min = new_min.min(key);
            new_max = new_max.max(key);
        }
    }

    set_cached_min(page, new_min);
    set_cached_max(page, new_max);
}

impl Leaf for AppendLeaf {
    fn format<K: IndexKey>(page: &mut Page, id: NodeId, next: NodeId) {
        leaf::format_common(page, id, next, /*sorted=*/ false);
        set_cached_min(page, K::MAX);
        set_cached_max(page, K::MIN);
    }

    fn insert<K: IndexKey>(
        page: &mut Page,
        schema: &Schema,
        key_index: usize,
        tuple: &Tuple,
    ) -> bool {
        let record_len = 1 + schema.length(tuple);
        if !can_insert::<K>(page, record_len) {
            return false;
        }

        let bytes = schema.serialize(tuple);
        append_record::<K>(page, OP_INSERT, &bytes);
        leaf::set_tuple_count(page, leaf::tuple_count(page) + 1);

        let key: K = extract_key(tuple, key_index);
        if key < cached_min::<K>(page) {
            set_cached_min(page, key);
        }
        if key > cached_max::<K>(page) {
            set_cached_max(page, key);
        }
        leaf::set_sorted(page, false);
        true
    }

    fn update<K: IndexKey>(
        page: &mut Page,
        schema: &Schema,
        key_index: usize,
        tuple: &Tuple,
    ) -> bool {
        // A newer version shadows the old one at read time; the logical
        // count is unchanged.
        if Self::insert::<K>(page, schema, key_index, tuple) {
            leaf::set_tuple_count(page, leaf::tuple_count(page).saturating_sub(1));
            true
        } else {
            false
        }
    }

    fn erase<K: IndexKey>(page: &mut Page, schema: &Schema, key_index: usize, key: K) -> bool {
        let record_len = 1 + K::encoded_len();
        if !can_insert::<K>(page, record_len) {
            return false;
        }

        let hit_bounds = key == cached_min::<K>(page) || key == cached_max::<K>(page);

        let mut key_bytes = vec![0u8; K::encoded_len()];
        key.write_to(&mut key_bytes);
        append_record::<K>(page, OP_DELETE, &key_bytes);
        leaf::set_tuple_count(page, leaf::tuple_count(page).saturating_sub(1));
        // A tombstone on a sorted page would be invisible to binary
        // search; the page is unsorted again until the next sort pass.
        leaf::set_sorted(page, false);

        if hit_bounds {
            recompute_min_max::<K>(page, schema, key_index);
        }
        true
    }

    fn get<K: IndexKey>(page: &Page, schema: &Schema, key_index: usize, key: K) -> Option<Tuple> {
        if leaf::is_sorted(page) {
            // Sorted and deduplicated, no tombstones: binary search
            let pos = value_slot(page, schema, key_index, key);
            if pos < leaf::slot_count(page) as usize
                && record_key::<K>(page, schema, key_index, pos) == key
            {
                return Some(tuple_at::<K>(page, schema, pos));
            }
            return None;
        }

        // Unsorted: most recent record for the key decides
        let count = leaf::slot_count(page) as usize;
        for i in (0..count).rev() {
            if record_key::<K>(page, schema, key_index, i) != key {
                continue;
            }
            if op_at::<K>(page, i) == OP_DELETE {
                return None;
            }
            return Some(tuple_at::<K>(page, schema, i));
        }
        None
    }

    fn range<K: IndexKey>(
        page: &Page,
        schema: &Schema,
        key_index: usize,
        lo: K,
        hi: K,
    ) -> Vec<Tuple> {
        let mut out = Vec::new();
        if let Some(min) = Self::min_key::<K>(page, schema, key_index) {
            if min > hi {
                return out;
            }
        } else {
            return out;
        }

        let count = leaf::slot_count(page) as usize;
        if leaf::is_sorted(page) {
            for i in 0..count {
                let key = record_key::<K>(page, schema, key_index, i);
                if key < lo {
                    continue;
                }
                if key > hi {
                    break;
                }
                out.push(tuple_at::<K>(page, schema, i));
            }
            return out;
        }

        // Unsorted: newest-wins scan, then restore ascending order
        let mut resolved: HashSet<K> = HashSet::new();
        let mut keyed = Vec::new();
        for i in (0..count).rev() {
            let key = record_key::<K>(page, schema, key_index, i);
            if !resolved.insert(key) {
                continue;
            }
            if op_at::<K>(page, i) == OP_DELETE {
                continue;
            }
            if key < lo || key > hi {
                continue;
            }
            keyed.push((key, tuple_at::<K>(page, schema, i)));
        }
        keyed.sort_by(|a, b| a.0.cmp(&b.0));
        out.extend(keyed.into_iter().map(|(_, t)| t));
        out
    }

    fn split_into<K: IndexKey>(
        left: &mut Page,
        right: &mut Page,
        schema: &Schema,
        key_index: usize,
    ) -> K {
        let live = compact::<K>(left, schema, key_index);
        clear_records::<K>(left);

        let old_next = leaf::next_id(left);
        leaf::set_next_id(right, old_next);
        leaf::set_next_id(left, leaf::node_id(right));

        if live.is_empty() {
            return K::MAX;
        }

        // 3:1 skew: on near-sorted streams the right leaf is the likely
        // next fast-path target, so keep it mostly empty.
        let sep = live[live.len() * 3 / 4].0;
        for (key, tuple) in &live {
            if *key < sep {
                Self::insert::<K>(left, schema, key_index, tuple);
            } else {
                Self::insert::<K>(right, schema, key_index, tuple);
            }
        }
        sep
    }

    fn sort<K: IndexKey>(page: &mut Page, schema: &Schema, key_index: usize) {
        let live = compact::<K>(page, schema, key_index);
        clear_records::<K>(page);
        for (_, tuple) in &live {
            Self::insert::<K>(page, schema, key_index, tuple);
        }
        leaf::set_sorted(page, true);
    }

    fn min_key<K: IndexKey>(page: &Page, _schema: &Schema, _key_index: usize) -> Option<K> {
        let min = cached_min::<K>(page);
        let max = cached_max::<K>(page);
        if min == K::MAX && max == K::MIN {
            return None; // empty sentinel pair
        }
        Some(min)
    }

    fn max_key<K: IndexKey>(page: &Page, _schema: &Schema, _key_index: usize) -> Option<K> {
        let min = cached_min::<K>(page);
        let max = cached_max::<K>(page);
        if min == K::MAX && max == K::MIN {
            return None;
        }
        Some(max)
    }

    fn used_space(page: &Page) -> usize {
        PAGE_SIZE - leaf::heap_end(page) + SLOT_SIZE * leaf::slot_count(page) as usize
    }

    fn available_space<K: IndexKey>() -> usize {
        PAGE_SIZE - slots_off::<K>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use lasdb_common::types::{Field, FieldType};
    use lasdb_common::INVALID_NODE_ID;

    fn kv_schema() -> Schema {
        Schema::new(vec![FieldType::Int, FieldType::Char], vec!["key", "val"]).unwrap()
    }

    fn kv(k: i32, v: &str) -> Tuple {
        Tuple::new(vec![Field::Int(k), Field::Char(v.to_string())])
    }

    fn fresh_page(id: NodeId) -> Box<Page> {
        let mut page = Box::new([0u8; PAGE_SIZE]);
        AppendLeaf::format::<i32>(&mut page, id, INVALID_NODE_ID);
        page
    }

    fn erase(page: &mut Page, schema: &Schema, key: i32) -> bool {
        AppendLeaf::erase::<i32>(page, schema, 0, key)
    }

    #[test]
    fn test_format() {
        let page = fresh_page(2);
        assert_eq!(leaf::node_id(&page), 2);
        assert!(!AppendLeaf::is_sorted(&page));
        assert_eq!(AppendLeaf::tuple_count(&page), 0);
        assert_eq!(AppendLeaf::min_key::<i32>(&page, &kv_schema(), 0), None);
    }

    #[test]
    fn test_insert_and_get_unsorted() {
        let schema = kv_schema();
        let mut page = fresh_page(0);

        AppendLeaf::insert::<i32>(&mut page, &schema, 0, &kv(5, "five"));
        AppendLeaf::insert::<i32>(&mut page, &schema, 0, &kv(1, "one"));

        assert_eq!(AppendLeaf::tuple_count(&page), 2);
        let got = AppendLeaf::get::<i32>(&page, &schema, 0, 5).unwrap();
        assert_eq!(got.field(1).as_str(), Some("five"));
        assert!(AppendLeaf::get::<i32>(&page, &schema, 0, 3).is_none());
    }

    #[test]
    fn test_latest_version_wins() {
        let schema = kv_schema();
        let mut page = fresh_page(0);

        AppendLeaf::insert::<i32>(&mut page, &schema, 0, &kv(7, "A"));
        AppendLeaf::insert::<i32>(&mut page, &schema, 0, &kv(7, "B"));

        let got = AppendLeaf::get::<i32>(&page, &schema, 0, 7).unwrap();
        assert_eq!(got.field(1).as_str(), Some("B"));
    }

    #[test]
    fn test_update_keeps_count() {
        let schema = kv_schema();
        let mut page = fresh_page(0);

        AppendLeaf::insert::<i32>(&mut page, &schema, 0, &kv(7, "A"));
        assert!(AppendLeaf::update::<i32>(&mut page, &schema, 0, &kv(7, "B")));

        assert_eq!(AppendLeaf::tuple_count(&page), 1);
        let got = AppendLeaf::get::<i32>(&page, &schema, 0, 7).unwrap();
        assert_eq!(got.field(1).as_str(), Some("B"));
    }

    #[test]
    fn test_erase_tombstone() {
        let schema = kv_schema();
        let mut page = fresh_page(0);

        AppendLeaf::insert::<i32>(&mut page, &schema, 0, &kv(1, "a"));
        AppendLeaf::insert::<i32>(&mut page, &schema, 0, &kv(2, "b"));
        assert!(erase(&mut page, &schema, 1));

        assert!(AppendLeaf::get::<i32>(&page, &schema, 0, 1).is_none());
        assert!(AppendLeaf::get::<i32>(&page, &schema, 0, 2).is_some());
        assert_eq!(AppendLeaf::tuple_count(&page), 1);
        assert_eq!(AppendLeaf::min_key::<i32>(&page, &schema, 0), Some(2));
    }

    #[test]
    fn test_reinsert_after_erase() {
        let schema = kv_schema();
        let mut page = fresh_page(0);

        AppendLeaf::insert::<i32>(&mut page, &schema, 0, &kv(7, "A"));
        AppendLeaf::insert::<i32>(&mut page, &schema, 0, &kv(7, "B"));
        erase(&mut page, &schema, 7);
        AppendLeaf::insert::<i32>(&mut page, &schema, 0, &kv(7, "C"));

        let got = AppendLeaf::get::<i32>(&page, &schema, 0, 7).unwrap();
        assert_eq!(got.field(1).as_str(), Some("C"));
    }

    #[test]
    fn test_sort_removes_tombstones_and_orders() {
        let schema = kv_schema();
        let mut page = fresh_page(0);

        AppendLeaf::insert::<i32>(&mut page, &schema, 0, &kv(7, "A"));
        AppendLeaf::insert::<i32>(&mut page, &schema, 0, &kv(7, "B"));
        erase(&mut page, &schema, 7);
        AppendLeaf::insert::<i32>(&mut page, &schema, 0, &kv(7, "C"));
        AppendLeaf::insert::<i32>(&mut page, &schema, 0, &kv(3, "x"));
        AppendLeaf::insert::<i32>(&mut page, &schema, 0, &kv(9, "y"));

        AppendLeaf::sort::<i32>(&mut page, &schema, 0);

        assert!(AppendLeaf::is_sorted(&page));
        // No tombstones or shadowed versions remain
        assert_eq!(leaf::slot_count(&page), 3);
        assert_eq!(AppendLeaf::tuple_count(&page), 3);

        // Binary search path serves the surviving version
        let got = AppendLeaf::get::<i32>(&page, &schema, 0, 7).unwrap();
        assert_eq!(got.field(1).as_str(), Some("C"));
        assert!(AppendLeaf::get::<i32>(&page, &schema, 0, 4).is_none());

        // Records are key-ordered
        let keys: Vec<i32> = (0..3)
            .map(|i| record_key::<i32>(&page, &schema, 0, i))
            .collect();
        assert_eq!(keys, vec![3, 7, 9]);
    }

    #[test]
    fn test_sort_twice_is_idempotent() {
        let schema = kv_schema();
        let mut page = fresh_page(0);

        for k in [5, 2, 8, 2] {
            AppendLeaf::insert::<i32>(&mut page, &schema, 0, &kv(k, "v"));
        }
        AppendLeaf::sort::<i32>(&mut page, &schema, 0);
        let count_after_one = leaf::slot_count(&page);
        AppendLeaf::sort::<i32>(&mut page, &schema, 0);

        assert_eq!(leaf::slot_count(&page), count_after_one);
        assert!(AppendLeaf::is_sorted(&page));
        assert!(AppendLeaf::get::<i32>(&page, &schema, 0, 5).is_some());
    }

    #[test]
    fn test_erase_unsorts_page() {
        let schema = kv_schema();
        let mut page = fresh_page(0);

        AppendLeaf::insert::<i32>(&mut page, &schema, 0, &kv(1, "a"));
        AppendLeaf::insert::<i32>(&mut page, &schema, 0, &kv(2, "b"));
        AppendLeaf::sort::<i32>(&mut page, &schema, 0);
        assert!(AppendLeaf::is_sorted(&page));

        erase(&mut page, &schema, 1);
        assert!(!AppendLeaf::is_sorted(&page));
        assert!(AppendLeaf::get::<i32>(&page, &schema, 0, 1).is_none());
    }

    #[test]
    fn test_range_unsorted_resolves_and_orders() {
        let schema = kv_schema();
        let mut page = fresh_page(0);

        for k in [9, 2, 5, 7, 2] {
            AppendLeaf::insert::<i32>(&mut page, &schema, 0, &kv(k, "v"));
        }
        erase(&mut page, &schema, 7);

        let result = AppendLeaf::range::<i32>(&page, &schema, 0, 2, 9);
        let keys: Vec<i32> = result
            .iter()
            .map(|t| t.field(0).as_int().unwrap())
            .collect();
        assert_eq!(keys, vec![2, 5, 9]);
    }

    #[test]
    fn test_range_sorted_with_cuts() {
        let schema = kv_schema();
        let mut page = fresh_page(0);

        for k in 0..10 {
            AppendLeaf::insert::<i32>(&mut page, &schema, 0, &kv(k, "v"));
        }
        AppendLeaf::sort::<i32>(&mut page, &schema, 0);

        let result = AppendLeaf::range::<i32>(&page, &schema, 0, 3, 6);
        let keys: Vec<i32> = result
            .iter()
            .map(|t| t.field(0).as_int().unwrap())
            .collect();
        assert_eq!(keys, vec![3, 4, 5, 6]);
    }

    #[test]
    fn test_range_early_out_when_min_above_hi() {
        let schema = kv_schema();
        let mut page = fresh_page(0);

        AppendLeaf::insert::<i32>(&mut page, &schema, 0, &kv(100, "v"));
        assert!(AppendLeaf::range::<i32>(&page, &schema, 0, 0, 50).is_empty());
    }

    #[test]
    fn test_min_max_tracking() {
        let schema = kv_schema();
        let mut page = fresh_page(0);

        AppendLeaf::insert::<i32>(&mut page, &schema, 0, &kv(5, "v"));
        AppendLeaf::insert::<i32>(&mut page, &schema, 0, &kv(1, "v"));
        AppendLeaf::insert::<i32>(&mut page, &schema, 0, &kv(9, "v"));

        assert_eq!(AppendLeaf::min_key::<i32>(&page, &schema, 0), Some(1));
        assert_eq!(AppendLeaf::max_key::<i32>(&page, &schema, 0), Some(9));

        erase(&mut page, &schema, 9);
        assert_eq!(AppendLeaf::max_key::<i32>(&page, &schema, 0), Some(5));
    }

    #[test]
    fn test_insert_returns_false_when_full() {
        let schema = kv_schema();
        let mut page = fresh_page(0);

        let mut k = 0;
        while AppendLeaf::insert::<i32>(&mut page, &schema, 0, &kv(k, "x")) {
            k += 1;
        }
        assert!(k > 40);
        assert!(AppendLeaf::get::<i32>(&page, &schema, 0, 0).is_some());
    }

    #[test]
    fn test_split_into_three_to_one() {
        let schema = kv_schema();
        let mut left = fresh_page(0);
        let mut right = Box::new([0u8; PAGE_SIZE]);
        AppendLeaf::format::<i32>(&mut right, 1, INVALID_NODE_ID);

        let mut k = 0;
        while AppendLeaf::insert::<i32>(&mut left, &schema, 0, &kv(k, "v")) {
            k += 1;
        }
        let total = k;

        let sep = AppendLeaf::split_into::<i32>(&mut left, &mut right, &schema, 0);

        let left_count = AppendLeaf::tuple_count(&left) as i32;
        let right_count = AppendLeaf::tuple_count(&right) as i32;
        assert_eq!(left_count + right_count, total);
        // Left keeps roughly three quarters
        assert!(left_count > right_count);
        assert_eq!(left_count, (total as usize * 3 / 4) as i32);

        // Separator routes correctly
        assert!(AppendLeaf::max_key::<i32>(&left, &schema, 0).unwrap() < sep);
        assert_eq!(AppendLeaf::min_key::<i32>(&right, &schema, 0), Some(sep));

        // Chain relinked
        assert_eq!(leaf::next_id(&left), 1);
        assert_eq!(leaf::next_id(&right), INVALID_NODE_ID);
    }

    #[test]
    fn test_split_compacts_duplicates() {
        let schema = kv_schema();
        let mut left = fresh_page(0);
        let mut right = Box::new([0u8; PAGE_SIZE]);
        AppendLeaf::format::<i32>(&mut right, 1, INVALID_NODE_ID);

        // Fill with re-inserts of a small key set
        let mut i = 0;
        while AppendLeaf::insert::<i32>(&mut left, &schema, 0, &kv(i % 8, &format!("v{}", i))) {
            i += 1;
        }

        AppendLeaf::split_into::<i32>(&mut left, &mut right, &schema, 0);

        // Only 8 live keys survive across both pages
        let survivors =
            AppendLeaf::tuple_count(&left) as usize + AppendLeaf::tuple_count(&right) as usize;
        assert_eq!(survivors, 8);

        // And each key maps to its newest value
        for key in 0..8 {
            let from_left = AppendLeaf::get::<i32>(&left, &schema, 0, key);
            let from_right = AppendLeaf::get::<i32>(&right, &schema, 0, key);
            assert!(from_left.is_some() || from_right.is_some());
        }
    }

    #[test]
    fn test_compact_round_trip_matches_range() {
        let schema = kv_schema();
        let mut page = fresh_page(0);

        for k in [4, 1, 4, 9, 1] {
            AppendLeaf::insert::<i32>(&mut page, &schema, 0, &kv(k, "v"));
        }
        erase(&mut page, &schema, 9);

        let live: Vec<i32> = compact::<i32>(&page, &schema, 0)
            .iter()
            .map(|(k, _)| *k)
            .collect();
        let ranged: Vec<i32> = AppendLeaf::range::<i32>(&page, &schema, 0, i32::MIN, i32::MAX)
            .iter()
            .map(|t| t.field(0).as_int().unwrap())
            .collect();
        assert_eq!(live, ranged);
        assert_eq!(live, vec![1, 4]);
    }
}
