//! Storage backend trait definitions

use crate::error::StorageResult;
use async_trait::async_trait;
use metacat_core::{
    Entity, EntityId, ListFilter, RelationKind, Relationship, ScanRange, TagSource, TagUsage,
};
use serde_json::Value;

/// Trait for storage backend implementations
///
/// Lifecycle operations are async; data access goes through transactions, which
/// are synchronous and must not be held across an `.await`.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Initialize the storage (create tables, run migrations)
    async fn initialize(&self) -> StorageResult<()>;

    /// Close the storage
    async fn close(&self) -> StorageResult<()>;

    /// Health check
    async fn health_check(&self) -> StorageResult<bool>;

    /// Start a read-only transaction over a consistent view
    fn begin_read(&self) -> StorageResult<Box<dyn ReadTransaction + '_>>;

    /// Start a write transaction; dropping it without commit discards every write
    fn begin_write(&self) -> StorageResult<Box<dyn WriteTransaction + '_>>;
}

/// Reads available inside any transaction
pub trait ReadTransaction {
    // ─────────────────────────────────────────────────────────────────────────
    // Entity store
    // ─────────────────────────────────────────────────────────────────────────

    /// Get an entity snapshot by id
    fn get_entity(&self, id: &EntityId) -> StorageResult<Option<Entity>>;

    /// Get an entity snapshot by type and fully qualified name
    fn get_entity_by_name(&self, entity_type: &str, fqn: &str) -> StorageResult<Option<Entity>>;

    /// List entities of a type in fqn order
    ///
    /// `ScanRange::Before` yields entities in descending fqn order.
    fn list_entities(
        &self,
        entity_type: &str,
        filter: &ListFilter,
        range: &ScanRange,
        limit: usize,
    ) -> StorageResult<Vec<Entity>>;

    /// Count entities of a type admitted by `filter`
    fn count_entities(&self, entity_type: &str, filter: &ListFilter) -> StorageResult<usize>;

    // ─────────────────────────────────────────────────────────────────────────
    // Relationship graph
    // ─────────────────────────────────────────────────────────────────────────

    /// Edges leaving `from` of the given kind
    fn find_to(
        &self,
        from: &EntityId,
        kind: RelationKind,
        to_type: Option<&str>,
    ) -> StorageResult<Vec<Relationship>>;

    /// Edges arriving at `to` of the given kind
    fn find_from(
        &self,
        to: &EntityId,
        kind: RelationKind,
        from_type: Option<&str>,
    ) -> StorageResult<Vec<Relationship>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Extension store
    // ─────────────────────────────────────────────────────────────────────────

    fn get_extension(&self, id: &EntityId, key: &str) -> StorageResult<Option<Value>>;

    /// Extension records of an entity whose key starts with `prefix`, ordered by key
    fn list_extensions(&self, id: &EntityId, prefix: &str) -> StorageResult<Vec<(String, Value)>>;

    // ─────────────────────────────────────────────────────────────────────────
    // Tag usage
    // ─────────────────────────────────────────────────────────────────────────

    /// Tags applied to exactly `target_fqn` of `target_type`, ordered by tag fqn
    fn get_tags(&self, target_type: &str, target_fqn: &str) -> StorageResult<Vec<TagUsage>>;
}

/// Writes staged inside a transaction, published together on commit
pub trait WriteTransaction: ReadTransaction {
    /// View this transaction through its read half
    fn as_read(&self) -> &dyn ReadTransaction;

    // ─────────────────────────────────────────────────────────────────────────
    // Entity store
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert a new entity; fails if the id or (type, fqn) is taken
    fn insert_entity(&mut self, entity: &Entity) -> StorageResult<()>;

    /// Overwrite an existing entity, re-keying the name index on rename
    fn update_entity(&mut self, entity: &Entity) -> StorageResult<()>;

    /// Remove an entity snapshot and its name index entry
    fn delete_entity(&mut self, id: &EntityId) -> StorageResult<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Relationship graph
    // ─────────────────────────────────────────────────────────────────────────

    /// Insert or replace an edge
    fn insert_relationship(&mut self, relationship: &Relationship) -> StorageResult<()>;

    /// Delete one edge; returns whether it existed
    fn delete_relationship(
        &mut self,
        from: &EntityId,
        to: &EntityId,
        kind: RelationKind,
    ) -> StorageResult<bool>;

    /// Delete edges leaving `from`; returns the number removed
    fn delete_from(
        &mut self,
        from: &EntityId,
        kind: RelationKind,
        to_type: Option<&str>,
    ) -> StorageResult<usize>;

    /// Delete edges arriving at `to`; returns the number removed
    fn delete_to(
        &mut self,
        to: &EntityId,
        kind: RelationKind,
        from_type: Option<&str>,
    ) -> StorageResult<usize>;

    /// Delete every edge touching `id` on either side
    fn delete_all_relationships(&mut self, id: &EntityId) -> StorageResult<usize>;

    // ─────────────────────────────────────────────────────────────────────────
    // Extension store
    // ─────────────────────────────────────────────────────────────────────────

    fn put_extension(&mut self, id: &EntityId, key: &str, value: &Value) -> StorageResult<()>;

    fn delete_extension(&mut self, id: &EntityId, key: &str) -> StorageResult<()>;

    fn delete_all_extensions(&mut self, id: &EntityId) -> StorageResult<()>;

    // ─────────────────────────────────────────────────────────────────────────
    // Tag usage
    // ─────────────────────────────────────────────────────────────────────────

    /// Record a tag usage, replacing one for the same target, tag and source
    fn apply_tag(&mut self, usage: &TagUsage) -> StorageResult<()>;

    /// Remove tags applied to exactly `target_fqn` of `target_type`
    fn delete_tags_by_target(&mut self, target_type: &str, target_fqn: &str) -> StorageResult<()>;

    /// Remove tags applied to `prefix` of `target_type` or anything nested below it
    fn delete_tags_by_target_prefix(&mut self, target_type: &str, prefix: &str) -> StorageResult<()>;

    /// Remove usages of the tag `prefix` and of every tag nested below it
    fn delete_tags_by_tag_prefix(&mut self, source: TagSource, prefix: &str) -> StorageResult<()>;

    /// Rewrite the tag fqn of usages after a tag or classification rename
    fn rename_tag_prefix(
        &mut self,
        source: TagSource,
        old_prefix: &str,
        new_prefix: &str,
    ) -> StorageResult<()>;

    /// Rewrite the target fqn of `target_type` usages after a target rename
    fn rename_target_prefix(
        &mut self,
        target_type: &str,
        old_prefix: &str,
        new_prefix: &str,
    ) -> StorageResult<()>;

    /// Publish every staged write
    fn commit(self: Box<Self>) -> StorageResult<()>;
}
