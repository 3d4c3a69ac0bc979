//! Arbor common types, errors, and configuration.
//!
//! This crate provides shared definitions used across all Arbor components.

pub mod config;
pub mod error;
pub mod page;
pub mod types;

pub use config::{CachePolicy, StorageConfig};
pub use error::{ArborError, FaultKind, Result};
pub use page::{PageCategory, PageIdentity, DEFAULT_PAGE_SIZE, ROOT_PTR_PAGE_SIZE};
pub use types::{ColumnType, Field, Schema, STRING_MAX_LEN};
