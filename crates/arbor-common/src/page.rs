//! Page identity types for Arbor storage.

use serde::{Deserialize, Serialize};

use crate::error::{ArborError, Result};

/// Default page size in bytes (4 KB).
///
/// Applies to every data page in a table file. The root pointer page is the
/// single exception and uses [`ROOT_PTR_PAGE_SIZE`].
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// Size of the root pointer page in bytes.
///
/// Layout: root page number (4) + root page category (1) + first header
/// page number (4).
pub const ROOT_PTR_PAGE_SIZE: usize = 9;

/// Page categories in an Arbor table file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum PageCategory {
    /// Root pointer page: fixed entry point at file offset 0.
    RootPointer = 0,
    /// B+ tree internal page holding separator keys and child pointers.
    Internal = 1,
    /// B+ tree leaf page holding records.
    Leaf = 2,
    /// Free-list header page holding a used/free bitmap over data pages.
    Header = 3,
}

impl PageCategory {
    /// Decodes a category from its on-disk tag byte.
    pub fn from_u8(tag: u8) -> Result<Self> {
        match tag {
            0 => Ok(PageCategory::RootPointer),
            1 => Ok(PageCategory::Internal),
            2 => Ok(PageCategory::Leaf),
            3 => Ok(PageCategory::Header),
            other => Err(ArborError::UnknownCategory(other)),
        }
    }

    /// Returns the on-disk tag byte for this category.
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl std::fmt::Display for PageCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            PageCategory::RootPointer => "root pointer",
            PageCategory::Internal => "internal",
            PageCategory::Leaf => "leaf",
            PageCategory::Header => "header",
        };
        write!(f, "{}", name)
    }
}

/// Unique identifier for a page within a table file.
///
/// Identity is structural over all three fields: the same page number under
/// a different category is a different identity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PageIdentity {
    /// Owning table identifier.
    pub table_id: u32,
    /// Page number within the file. The root pointer page is number 0;
    /// data pages are numbered from 1.
    pub page_no: u32,
    /// Category of the page at this number.
    pub category: PageCategory,
}

impl PageIdentity {
    /// Creates a new PageIdentity.
    pub fn new(table_id: u32, page_no: u32, category: PageCategory) -> Self {
        Self {
            table_id,
            page_no,
            category,
        }
    }

    /// Returns the identity of a table's root pointer page.
    pub fn root_pointer(table_id: u32) -> Self {
        Self::new(table_id, 0, PageCategory::RootPointer)
    }
}

impl std::fmt::Display for PageIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}:{}", self.table_id, self.page_no, self.category)
    }
}
