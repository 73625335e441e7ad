//! Metacat Repository - Versioned entity operations for the metadata catalog
//!
//! [`EntityRepository`] creates, reads, updates, deletes and restores entities
//! on top of a [`StorageBackend`](metacat_storage::StorageBackend). Updates go
//! through the [`EntityUpdater`], which diffs the stored and incoming versions,
//! bumps the version, keeps the history and folds quick successive edits of
//! one user into a single version.

pub mod config;
pub mod custom_property;
pub mod events;
pub mod handler;
pub mod handlers;
mod hydrate;
pub mod patch;
pub mod repository;
mod resolve;
pub mod updater;

pub use config::RepositoryConfig;
pub use custom_property::{CustomProperty, PropertyType};
pub use events::{ChangeEventSink, ChannelSink, LoggingSink, NoopSink};
pub use handler::{DefaultHandler, EntityHandler, TypeRegistry};
pub use hydrate::ensure_single_relationship;
pub use repository::{DeleteOptions, DeleteResponse, EntityHistory, EntityRepository, PutResponse};
pub use resolve::validate_tags;
pub use updater::{EntityUpdater, Operation, UpdateOutcome};
