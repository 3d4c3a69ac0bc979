//! Page caching for Arbor.
//!
//! This crate provides an in-memory cache of decoded pages with:
//! - Bounded capacity with a configurable full-cache policy
//! - Miss handling through a caller-supplied loader
//! - Shared page handles for in-place mutation
//! - Explicit discard for pages about to be rewritten on disk

mod cache;

pub use cache::{PageCache, SharedPage};
