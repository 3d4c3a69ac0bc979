//! Error types for Arbor.

use thiserror::Error;

use crate::page::PageCategory;

/// Result type alias using ArborError.
pub type Result<T> = std::result::Result<T, ArborError>;

/// Coarse fault classification.
///
/// Every error is fatal to the operation that raised it; the kind tells the
/// caller whether the file is suspect (`Storage`/`Decode`) or the call itself
/// was malformed (`Usage`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultKind {
    /// File-level or structural failure: short I/O, bad casts, broken tree.
    Storage,
    /// On-disk bytes do not parse under the fixed page layout.
    Decode,
    /// Caller-side mistake: stale handles, schema mismatch, protocol misuse.
    Usage,
}

/// Errors that can occur in Arbor operations.
#[derive(Debug, Error)]
pub enum ArborError {
    // I/O and file-structure errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Read past end of file: page {page_no}")]
    ReadPastEnd { page_no: u32 },

    #[error("Short page transfer: page {page_no}, expected {expected} bytes, got {actual}")]
    ShortPageTransfer {
        page_no: u32,
        expected: usize,
        actual: usize,
    },

    #[error("Page category mismatch: expected {expected}, got {actual}")]
    CategoryMismatch {
        expected: PageCategory,
        actual: PageCategory,
    },

    #[error("Tree corrupted: {0}")]
    TreeCorrupted(String),

    #[error("Page cache full ({capacity} pages)")]
    CacheFull { capacity: usize },

    #[error("Page full: page {page_no} has no empty slot")]
    PageFull { page_no: u32 },

    // Decode errors
    #[error("Page decode failed: page {page_no}, reason: {reason}")]
    PageDecode { page_no: u32, reason: String },

    #[error("Field decode failed: {0}")]
    FieldDecode(String),

    #[error("Unknown page category tag: {0}")]
    UnknownCategory(u8),

    // Caller errors
    #[error("No slot assigned: {0} has no recorded slot")]
    NoSlotAssigned(&'static str),

    #[error("Wrong page: {what} belongs to table {expected_table} page {expected_page}, not table {actual_table} page {actual_page}")]
    WrongPage {
        what: &'static str,
        expected_table: u32,
        expected_page: u32,
        actual_table: u32,
        actual_page: u32,
    },

    #[error("Slot {slot} of page {page_no} is empty")]
    SlotEmpty { page_no: u32, slot: u16 },

    #[error("Schema mismatch: record has {actual} fields, table has {expected} columns")]
    SchemaMismatch { expected: usize, actual: usize },

    #[error("Key field {index} out of range for schema with {columns} columns")]
    KeyFieldOutOfRange { index: usize, columns: usize },

    #[error("Type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },

    #[error("Invalid entry: {0}")]
    InvalidEntry(String),

    #[error("Invalid sibling: {0}")]
    InvalidSibling(String),

    #[error("Scan not open")]
    ScanNotOpen,

    // Catalog errors
    #[error("Table not found: {0}")]
    TableNotFound(u32),

    #[error("Table already registered: {0}")]
    TableAlreadyRegistered(u32),
}

impl ArborError {
    /// Classifies this error under the Storage/Decode/Usage taxonomy.
    pub fn kind(&self) -> FaultKind {
        match self {
            ArborError::Io(_)
            | ArborError::ReadPastEnd { .. }
            | ArborError::ShortPageTransfer { .. }
            | ArborError::CategoryMismatch { .. }
            | ArborError::TreeCorrupted(_)
            | ArborError::CacheFull { .. }
            | ArborError::PageFull { .. } => FaultKind::Storage,

            ArborError::PageDecode { .. }
            | ArborError::FieldDecode(_)
            | ArborError::UnknownCategory(_) => FaultKind::Decode,

            ArborError::NoSlotAssigned(_)
            | ArborError::WrongPage { .. }
            | ArborError::SlotEmpty { .. }
            | ArborError::SchemaMismatch { .. }
            | ArborError::KeyFieldOutOfRange { .. }
            | ArborError::TypeMismatch { .. }
            | ArborError::InvalidEntry(_)
            | ArborError::InvalidSibling(_)
            | ArborError::ScanNotOpen
            | ArborError::TableNotFound(_)
            | ArborError::TableAlreadyRegistered(_) => FaultKind::Usage,
        }
    }
}
