//! Metacat Storage - Transactional storage backends for the catalog
//!
//! This crate holds the entity store, the relationship graph, the extension
//! store and the tag-usage store behind one transactional backend trait.

#![allow(clippy::result_large_err)]

pub mod error;
pub mod migration;
pub mod traits;

#[cfg(feature = "redb")]
pub mod redb;

pub mod memory;

#[cfg(test)]
mod testing;

pub use error::{StorageError, StorageResult};
pub use migration::{Migratable, SchemaVersion, CURRENT_VERSION};
pub use traits::{ReadTransaction, StorageBackend, WriteTransaction};

#[cfg(feature = "redb")]
pub use redb::RedbStorage;

pub use memory::MemoryStorage;
