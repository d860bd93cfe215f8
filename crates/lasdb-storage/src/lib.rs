//! lasdb storage engine.
//!
//! A disk-backed, single-process ordered index over variable-length
//! records, engineered for near-sorted ingest. Three B+-tree variants
//! share the paged file format and buffer pool:
//!
//! - [`SimpleTree`]: baseline B+-tree over sorted slot-directory leaves.
//! - [`OptimizedTree`]: adds a fast-path leaf cache that short-circuits
//!   root-to-leaf descent for sequential runs; parameterized by leaf
//!   layout.
//! - [`LasTree`]: optimized tree over append-only leaves plus a
//!   background worker that lazily sorts leaves once the fast path has
//!   moved past them.

pub mod btree;
pub mod database;
pub mod file;
pub mod key;
pub mod tuple;

pub use btree::append_leaf::AppendLeaf;
pub use btree::las::LasTree;
pub use btree::leaf::{Leaf, LeafSummary};
pub use btree::optimized::OptimizedTree;
pub use btree::simple::SimpleTree;
pub use btree::sorted_leaf::SortedLeaf;
pub use database::Database;
pub use file::{FileRegistry, FileStore};
pub use key::IndexKey;
pub use tuple::{Schema, Tuple};
