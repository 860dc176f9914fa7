//! Versioned response cache for offline support.
//!
//! This module provides the store the worker reads and writes:
//! - Named namespaces, versioned through their names (`static-v1`, `dynamic-v1`)
//! - Responses keyed by request identity (method + full URL)
//! - Namespace enumeration, rename and deletion for lifecycle cleanup

mod key;
mod namespace;
mod storage;

pub use key::RequestKey;
pub use namespace::Namespaces;
pub use storage::{CacheStorage, CachedResponse, SqliteStorage};
