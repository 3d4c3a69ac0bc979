//! Paged tree index, one file per table.
//!
//! File layout:
//!
//! ```text
//! +----------------+----------+----------+----------+-----
//! | root ptr (9 B) |  page 1  |  page 2  |  page 3  | ...
//! +----------------+----------+----------+----------+-----
//! ```
//!
//! Page `n` starts at byte `9 + (n - 1) * page_size`; page number 0 is
//! reserved to mean "no page". Pages come in four categories: the root
//! pointer at the head of the file, internal pages of separator keys,
//! leaf pages of records linked into a sibling chain, and header pages
//! carrying the free-page bitmap.

mod file;
mod meta;
mod page;
mod types;

pub use file::{BTreeFile, BTreeScan, WorkingSet};
pub use meta::{HeaderPage, RootPointerPage};
pub use page::{InternalPage, LeafPage, TreePage};
pub use types::{
    header_capacity, internal_max_entries, internal_max_slots, leaf_max_slots, low_threshold,
    Entry,
};
