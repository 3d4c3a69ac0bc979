//! Storage engine for Arbor.
//!
//! This crate provides:
//! - Tree-indexed table files with insert, delete and sorted scans
//! - Codecs for the four on-disk page categories
//! - A free-page list threaded through header page bitmaps
//! - Record representation and serialization
//! - A table catalog and the shared operation context

mod btree;
mod catalog;
mod context;
mod record;

pub use btree::{
    header_capacity, internal_max_entries, internal_max_slots, leaf_max_slots, low_threshold,
    BTreeFile, BTreeScan, Entry, HeaderPage, InternalPage, LeafPage, RootPointerPage, TreePage,
    WorkingSet,
};
pub use catalog::Catalog;
pub use context::StorageContext;
pub use record::{Record, RecordId};
