//! Metacat Core - Data model for the metadata catalog
//!
//! This crate provides the entity, relationship, tag and change types shared by
//! the storage, cache and repository layers, together with the pure field
//! diffing used to version entities.

pub mod change;
pub mod diff;
pub mod entity;
pub mod error;
pub mod fqn;
pub mod limits;
pub mod query;
pub mod relationship;
pub mod tag;
pub mod version;

pub use change::{ChangeDescription, ChangeEvent, EventType, FieldChange};
pub use diff::{ChangeRecorder, ListDiff};
pub use entity::{entity_types, Entity, EntityId, EntityReference, ProviderType};
pub use error::{Error, Result};
pub use query::{Fields, Include, ListFilter, Paging, ResultList, ScanRange};
pub use relationship::{RelationKind, Relationship};
pub use tag::{LabelType, TagLabel, TagSource, TagState, TagUsage};
pub use version::EntityVersion;
