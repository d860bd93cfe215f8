//! Slot-directory leaf keeping records in key-sorted order.

use super::leaf::{self, extract_key, Leaf};
use super::{read_u16, write_u16};
use crate::key::IndexKey;
use crate::tuple::{Schema, Tuple};
use lasdb_common::page::{NodeId, Page, PAGE_SIZE};

/// Byte offset of the slot directory.
const SLOTS_OFF: usize = leaf::header::END;

/// Slot layout: offset u16, length u16, flags u16 (bit 0 = valid).
const SLOT_SIZE: usize = 6;

const FLAG_VALID: u16 = 0x0001;

/// Always-sorted leaf layout.
///
/// Inserts pay a binary search plus a slot shift; lookups and ranges
/// are O(log n) / early-exit scans. `update` invalidates the old slot
/// and re-inserts; dead slots are vacuumed when a split rewrites the
/// retained prefix.
pub struct SortedLeaf;

fn slot_pos(i: usize) -> usize {
    SLOTS_OFF + i * SLOT_SIZE
}

fn slot(page: &Page, i: usize) -> (usize, usize, bool) {
    let pos = slot_pos(i);
    let offset = read_u16(page, pos) as usize;
    let len = read_u16(page, pos + 2) as usize;
    let valid = read_u16(page, pos + 4) & FLAG_VALID != 0;
    (offset, len, valid)
}

fn set_slot(page: &mut Page, i: usize, offset: usize, len: usize, valid: bool) {
    let pos = slot_pos(i);
    write_u16(page, pos, offset as u16);
    write_u16(page, pos + 2, len as u16);
    write_u16(page, pos + 4, if valid { FLAG_VALID } else { 0 });
}

fn set_slot_valid(page: &mut Page, i: usize, valid: bool) {
    let pos = slot_pos(i);
    write_u16(page, pos + 4, if valid { FLAG_VALID } else { 0 });
}

fn tuple_at(page: &Page, schema: &Schema, i: usize) -> Tuple {
    let (offset, _, _) = slot(page, i);
    schema.deserialize(&page[offset..])
}

fn key_at<K: IndexKey>(page: &Page, schema: &Schema, key_index: usize, i: usize) -> K {
    extract_key(&tuple_at(page, schema, i), key_index)
}

/// Lower bound over the slot directory: first slot whose key is >= `key`.
/// Invalidated slots keep their position, so key order holds across all
/// slots and they take part in the comparison.
fn value_slot<K: IndexKey>(page: &Page, schema: &Schema, key_index: usize, key: K) -> usize {
    let mut lo = 0usize;
    let mut hi = leaf::slot_count(page) as usize;
    while lo < hi {
        let mid = lo + (hi - lo) / 2;
        if key_at::<K>(page, schema, key_index, mid) < key {
            lo = mid + 1;
        } else {
            hi = mid;
        }
    }
    lo
}

fn can_insert(page: &Page, tuple_len: usize) -> bool {
    let heap_end = leaf::heap_end(page);
    let directory_end = SLOTS_OFF + (leaf::slot_count(page) as usize + 1) * SLOT_SIZE;
    heap_end >= tuple_len && heap_end - tuple_len >= directory_end
}

/// Clears the record area so tuples can be re-inserted from scratch.
fn clear_records(page: &mut Page) {
    leaf::set_slot_count(page, 0);
    leaf::set_tuple_count(page, 0);
    leaf::set_heap_end(page, PAGE_SIZE);
}

impl Leaf for SortedLeaf {
    fn format<K: IndexKey>(page: &mut Page, id: NodeId, next: NodeId) {
        leaf::format_common(page, id, next, /*sorted=*/ true);
    }

    fn insert<K: IndexKey>(
        page: &mut Page,
        schema: &Schema,
        key_index: usize,
        tuple: &Tuple,
    ) -> bool {
        let len = schema.length(tuple);
        if !can_insert(page, len) {
            return false;
        }

        let key: K = extract_key(tuple, key_index);
        let pos = value_slot(page, schema, key_index, key);
        let count = leaf::slot_count(page) as usize;

        let heap_end = leaf::heap_end(page) - len;
        let bytes = schema.serialize(tuple);
        page[heap_end..heap_end + len].copy_from_slice(&bytes);
        leaf::set_heap_end(page, heap_end);

        if pos < count {
            page.copy_within(slot_pos(pos)..slot_pos(count), slot_pos(pos + 1));
        }
        set_slot(page, pos, heap_end, len, true);
        leaf::set_slot_count(page, count as u16 + 1);
        leaf::set_tuple_count(page, leaf::tuple_count(page) + 1);
        true
    }

    fn update<K: IndexKey>(
        page: &mut Page,
        schema: &Schema,
        key_index: usize,
        tuple: &Tuple,
    ) -> bool {
        let key: K = extract_key(tuple, key_index);
        let pos = value_slot(page, schema, key_index, key);
        let count = leaf::slot_count(page) as usize;

        if pos < count {
            let (_, _, valid) = slot(page, pos);
            if valid && key_at::<K>(page, schema, key_index, pos) == key {
                set_slot_valid(page, pos, false);
                leaf::set_tuple_count(page, leaf::tuple_count(page).saturating_sub(1));
                return Self::insert::<K>(page, schema, key_index, tuple);
            }
        }

        // Not present: plain insert
        Self::insert::<K>(page, schema, key_index, tuple)
    }

    fn erase<K: IndexKey>(page: &mut Page, schema: &Schema, key_index: usize, key: K) -> bool {
        let count = leaf::slot_count(page) as usize;
        let mut pos = value_slot(page, schema, key_index, key);

        // Equal keys may span a run of slots, some already invalidated
        while pos < count && key_at::<K>(page, schema, key_index, pos) == key {
            let (_, _, valid) = slot(page, pos);
            if valid {
                set_slot_valid(page, pos, false);
                leaf::set_tuple_count(page, leaf::tuple_count(page).saturating_sub(1));
                return true;
            }
            pos += 1;
        }
        false
    }

    fn get<K: IndexKey>(page: &Page, schema: &Schema, key_index: usize, key: K) -> Option<Tuple> {
        let pos = value_slot(page, schema, key_index, key);
        if pos < leaf::slot_count(page) as usize {
            let (_, _, valid) = slot(page, pos);
            if !valid {
                return None;
            }
            let tuple = tuple_at(page, schema, pos);
            if extract_key::<K>(&tuple, key_index) == key {
                return Some(tuple);
            }
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
        let count = leaf::slot_count(page) as usize;
        for i in 0..count {
            let (_, _, valid) = slot(page, i);
            if !valid {
                continue;
            }
            let tuple = tuple_at(page, schema, i);
            let key: K = extract_key(&tuple, key_index);
            if key < lo {
                continue;
            }
            if key > hi {
                break;
            }
            out.push(tuple);
        }
        out
    }

    fn split_into<K: IndexKey>(
        left: &mut Page,
        right: &mut Page,
        schema: &Schema,
        key_index: usize,
    ) -> K {
        let count = leaf::slot_count(left) as usize;
        let total_bytes = PAGE_SIZE - leaf::heap_end(left);

        // Walk from the tail until roughly a quarter of the record bytes
        // are past the cut; the boundary slot itself stays behind.
        let mut moved_bytes = 0usize;
        let mut cut = count;
        for i in (0..count).rev() {
            let (_, len, valid) = slot(left, i);
            if !valid {
                continue;
            }
            moved_bytes += len;
            if moved_bytes >= total_bytes / 4 {
                cut = i;
                break;
            }
        }

        let mut retained = Vec::new();
        let mut moved = Vec::new();
        for i in 0..count {
            let (_, _, valid) = slot(left, i);
            if !valid {
                continue;
            }
            let tuple = tuple_at(left, schema, i);
            if i <= cut {
                retained.push(tuple);
            } else {
                moved.push(tuple);
            }
        }
        if moved.is_empty() && retained.len() > 1 {
            // The tail quota was covered by the boundary slot alone;
            // still hand the new leaf something so it is never empty.
            if let Some(last) = retained.pop() {
                moved.push(last);
            }
        }

        // Rewriting the retained prefix also vacuums invalidated slots
        clear_records(left);
        for tuple in &retained {
            Self::insert::<K>(left, schema, key_index, tuple);
        }
        for tuple in &moved {
            Self::insert::<K>(right, schema, key_index, tuple);
        }

        let old_next = leaf::next_id(left);
        leaf::set_next_id(right, old_next);
        leaf::set_next_id(left, leaf::node_id(right));

        Self::min_key::<K>(right, schema, key_index).unwrap_or(K::MAX)
    }

    fn sort<K: IndexKey>(_page: &mut Page, _schema: &Schema, _key_index: usize) {
        // Slot directory is maintained in key order on every insert
    }

    fn min_key<K: IndexKey>(page: &Page, schema: &Schema, key_index: usize) -> Option<K> {
        let count = leaf::slot_count(page) as usize;
        (0..count).find_map(|i| {
            let (_, _, valid) = slot(page, i);
            valid.then(|| key_at(page, schema, key_index, i))
        })
    }

    fn max_key<K: IndexKey>(page: &Page, schema: &Schema, key_index: usize) -> Option<K> {
        let count = leaf::slot_count(page) as usize;
        (0..count).rev().find_map(|i| {
            let (_, _, valid) = slot(page, i);
            valid.then(|| key_at(page, schema, key_index, i))
        })
    }

    fn used_space(page: &Page) -> usize {
        PAGE_SIZE - leaf::heap_end(page) + SLOT_SIZE * leaf::slot_count(page) as usize
    }

    fn available_space<K: IndexKey>() -> usize {
        PAGE_SIZE - SLOTS_OFF
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
        SortedLeaf::format::<i32>(&mut page, id, INVALID_NODE_ID);
        page
    }

    #[test]
    fn test_format() {
        let page = fresh_page(3);
        assert_eq!(leaf::node_id(&page), 3);
        assert_eq!(leaf::next_id(&page), INVALID_NODE_ID);
        assert!(SortedLeaf::is_sorted(&page));
        assert_eq!(SortedLeaf::tuple_count(&page), 0);
    }

    #[test]
    fn test_insert_and_get() {
        let schema = kv_schema();
        let mut page = fresh_page(0);

        assert!(SortedLeaf::insert::<i32>(&mut page, &schema, 0, &kv(5, "five")));
        assert!(SortedLeaf::insert::<i32>(&mut page, &schema, 0, &kv(1, "one")));
        assert!(SortedLeaf::insert::<i32>(&mut page, &schema, 0, &kv(9, "nine")));

        assert_eq!(SortedLeaf::tuple_count(&page), 3);
        let got = SortedLeaf::get::<i32>(&page, &schema, 0, 5).unwrap();
        assert_eq!(got.field(1).as_str(), Some("five"));
        assert!(SortedLeaf::get::<i32>(&page, &schema, 0, 4).is_none());
    }

    #[test]
    fn test_slots_stay_sorted_under_random_inserts() {
        let schema = kv_schema();
        let mut page = fresh_page(0);

        for k in [10, 3, 7, 1, 9, 5, 2, 8, 4, 6] {
            assert!(SortedLeaf::insert::<i32>(&mut page, &schema, 0, &kv(k, "v")));
        }

        let keys: Vec<i32> = (0..leaf::slot_count(&page) as usize)
            .map(|i| key_at(&page, &schema, 0, i))
            .collect();
        let mut sorted = keys.clone();
        sorted.sort_unstable();
        assert_eq!(keys, sorted);
    }

    #[test]
    fn test_insert_returns_false_when_full() {
        let schema = kv_schema();
        let mut page = fresh_page(0);

        let mut inserted = 0;
        while SortedLeaf::insert::<i32>(&mut page, &schema, 0, &kv(inserted, "x")) {
            inserted += 1;
        }
        // 4096-byte page, 68-byte tuples + 6-byte slots: several dozen fit
        assert!(inserted > 40);

        // And the page still answers reads
        assert!(SortedLeaf::get::<i32>(&page, &schema, 0, 0).is_some());
    }

    #[test]
    fn test_update_replaces_value() {
        let schema = kv_schema();
        let mut page = fresh_page(0);

        SortedLeaf::insert::<i32>(&mut page, &schema, 0, &kv(7, "old"));
        assert!(SortedLeaf::update::<i32>(&mut page, &schema, 0, &kv(7, "new")));

        assert_eq!(SortedLeaf::tuple_count(&page), 1);
        let got = SortedLeaf::get::<i32>(&page, &schema, 0, 7).unwrap();
        assert_eq!(got.field(1).as_str(), Some("new"));
    }

    #[test]
    fn test_update_absent_inserts() {
        let schema = kv_schema();
        let mut page = fresh_page(0);

        assert!(SortedLeaf::update::<i32>(&mut page, &schema, 0, &kv(7, "v")));
        assert_eq!(SortedLeaf::tuple_count(&page), 1);
        assert!(SortedLeaf::get::<i32>(&page, &schema, 0, 7).is_some());
    }

    #[test]
    fn test_erase() {
        let schema = kv_schema();
        let mut page = fresh_page(0);

        SortedLeaf::insert::<i32>(&mut page, &schema, 0, &kv(1, "a"));
        SortedLeaf::insert::<i32>(&mut page, &schema, 0, &kv(2, "b"));

        assert!(SortedLeaf::erase::<i32>(&mut page, &schema, 0, 1));
        assert_eq!(SortedLeaf::tuple_count(&page), 1);
        assert!(SortedLeaf::get::<i32>(&page, &schema, 0, 1).is_none());
        assert!(SortedLeaf::get::<i32>(&page, &schema, 0, 2).is_some());

        // Erasing again finds nothing
        assert!(!SortedLeaf::erase::<i32>(&mut page, &schema, 0, 1));
    }

    #[test]
    fn test_range() {
        let schema = kv_schema();
        let mut page = fresh_page(0);

        for k in 0..10 {
            SortedLeaf::insert::<i32>(&mut page, &schema, 0, &kv(k, "v"));
        }

        let result = SortedLeaf::range::<i32>(&page, &schema, 0, 2, 4);
        let keys: Vec<i32> = result
            .iter()
            .map(|t| t.field(0).as_int().unwrap())
            .collect();
        assert_eq!(keys, vec![2, 3, 4]);

        assert!(SortedLeaf::range::<i32>(&page, &schema, 0, 100, 200).is_empty());
    }

    #[test]
    fn test_range_skips_invalidated() {
        let schema = kv_schema();
        let mut page = fresh_page(0);

        for k in 0..5 {
            SortedLeaf::insert::<i32>(&mut page, &schema, 0, &kv(k, "v"));
        }
        SortedLeaf::erase::<i32>(&mut page, &schema, 0, 2);

        let result = SortedLeaf::range::<i32>(&page, &schema, 0, 0, 4);
        let keys: Vec<i32> = result
            .iter()
            .map(|t| t.field(0).as_int().unwrap())
            .collect();
        assert_eq!(keys, vec![0, 1, 3, 4]);
    }

    #[test]
    fn test_min_max_key() {
        let schema = kv_schema();
        let mut page = fresh_page(0);
        assert_eq!(SortedLeaf::min_key::<i32>(&page, &schema, 0), None);

        for k in [5, 1, 9] {
            SortedLeaf::insert::<i32>(&mut page, &schema, 0, &kv(k, "v"));
        }
        assert_eq!(SortedLeaf::min_key::<i32>(&page, &schema, 0), Some(1));
        assert_eq!(SortedLeaf::max_key::<i32>(&page, &schema, 0), Some(9));

        SortedLeaf::erase::<i32>(&mut page, &schema, 0, 1);
        assert_eq!(SortedLeaf::min_key::<i32>(&page, &schema, 0), Some(5));
    }

    #[test]
    fn test_split_into() {
        let schema = kv_schema();
        let mut left = fresh_page(0);
        let mut right = Box::new([0u8; PAGE_SIZE]);
        SortedLeaf::format::<i32>(&mut right, 1, INVALID_NODE_ID);

        let mut k = 0;
        while SortedLeaf::insert::<i32>(&mut left, &schema, 0, &kv(k, "v")) {
            k += 1;
        }
        let total = k;

        let sep = SortedLeaf::split_into::<i32>(&mut left, &mut right, &schema, 0);

        // Roughly a quarter of the records moved right
        let right_count = SortedLeaf::tuple_count(&right) as i32;
        let left_count = SortedLeaf::tuple_count(&left) as i32;
        assert_eq!(left_count + right_count, total);
        assert!(right_count >= total / 5 && right_count <= total / 2);

        // Separator is the right leaf's smallest key, above all left keys
        assert_eq!(SortedLeaf::min_key::<i32>(&right, &schema, 0), Some(sep));
        assert!(SortedLeaf::max_key::<i32>(&left, &schema, 0).unwrap() < sep);

        // Chain relinked
        assert_eq!(leaf::next_id(&left), 1);
        assert_eq!(leaf::next_id(&right), INVALID_NODE_ID);

        // Everything still readable
        for key in 0..total {
            let in_left = SortedLeaf::get::<i32>(&left, &schema, 0, key);
            let in_right = SortedLeaf::get::<i32>(&right, &schema, 0, key);
            assert!(in_left.is_some() ^ in_right.is_some(), "key {}", key);
        }
    }

    #[test]
    fn test_split_vacuums_invalid_slots() {
        let schema = kv_schema();
        let mut left = fresh_page(0);
        let mut right = Box::new([0u8; PAGE_SIZE]);
        SortedLeaf::format::<i32>(&mut right, 1, INVALID_NODE_ID);

        let mut k = 0;
        while SortedLeaf::insert::<i32>(&mut left, &schema, 0, &kv(k, "v")) {
            k += 1;
        }
        // Invalidate a few low slots via update
        for key in 0..5 {
            SortedLeaf::update::<i32>(&mut left, &schema, 0, &kv(key, "w"));
        }
        let live_before = SortedLeaf::tuple_count(&left);

        SortedLeaf::split_into::<i32>(&mut left, &mut right, &schema, 0);

        // After the rewrite every left slot is valid again
        let count = leaf::slot_count(&left) as usize;
        for i in 0..count {
            let (_, _, valid) = slot(&left, i);
            assert!(valid);
        }
        assert_eq!(
            SortedLeaf::tuple_count(&left) + SortedLeaf::tuple_count(&right),
            live_before
        );
    }

    #[test]
    fn test_used_space_grows() {
        let schema = kv_schema();
        let mut page = fresh_page(0);
        let before = SortedLeaf::used_space(&page);
        SortedLeaf::insert::<i32>(&mut page, &schema, 0, &kv(1, "v"));
        assert_eq!(
            SortedLeaf::used_space(&page),
            before + schema.length(&kv(1, "v")) + SLOT_SIZE
        );
    }
}
