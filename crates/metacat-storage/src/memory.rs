//! In-memory storage backend for testing

use crate::error::{StorageError, StorageResult};
use crate::traits::{ReadTransaction, StorageBackend, WriteTransaction};
use async_trait::async_trait;
use metacat_core::{
    fqn, Entity, EntityId, ListFilter, RelationKind, Relationship, ScanRange, TagSource, TagUsage,
};
use serde_json::Value;
use std::collections::BTreeMap;
use std::ops::Bound;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

type NameKey = (String, String);
type EdgeKey = (EntityId, EntityId, RelationKind);
type ExtensionKey = (EntityId, String);
/// (target type, target fqn, tag fqn, source)
type TagKey = (String, String, String, TagSource);

#[derive(Debug, Clone, Default)]
struct MemoryState {
    entities: BTreeMap<EntityId, Entity>,
    names: BTreeMap<NameKey, EntityId>,
    relationships: BTreeMap<EdgeKey, Relationship>,
    extensions: BTreeMap<ExtensionKey, Value>,
    tags: BTreeMap<TagKey, TagUsage>,
}

/// In-memory storage backend
///
/// Useful for testing and temporary storage. Writers are serialized on a lock
/// and apply their writes in place, keeping an undo log that is replayed when
/// the transaction is dropped without a commit.
pub struct MemoryStorage {
    state: RwLock<MemoryState>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self {
            state: RwLock::new(MemoryState::default()),
        }
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for MemoryStorage {
    async fn initialize(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn health_check(&self) -> StorageResult<bool> {
        Ok(self.state.read().is_ok())
    }

    fn begin_read(&self) -> StorageResult<Box<dyn ReadTransaction + '_>> {
        let state = self.state.read().map_err(StorageError::lock)?;
        Ok(Box::new(MemoryReadTransaction { state }))
    }

    fn begin_write(&self) -> StorageResult<Box<dyn WriteTransaction + '_>> {
        let state = self.state.write().map_err(StorageError::lock)?;
        Ok(Box::new(MemoryWriteTransaction {
            state,
            undo: Vec::new(),
            committed: false,
        }))
    }
}

struct MemoryReadTransaction<'a> {
    state: RwLockReadGuard<'a, MemoryState>,
}

struct MemoryWriteTransaction<'a> {
    state: RwLockWriteGuard<'a, MemoryState>,
    undo: Vec<Undo>,
    committed: bool,
}

/// Previous value of one slot overwritten by a write
enum Undo {
    Entity(EntityId, Option<Entity>),
    Name(NameKey, Option<EntityId>),
    Edge(EdgeKey, Option<Relationship>),
    Extension(ExtensionKey, Option<Value>),
    Tag(TagKey, Option<TagUsage>),
}

fn name_key(entity: &Entity) -> NameKey {
    (entity.entity_type.clone(), entity.fully_qualified_name.clone())
}

// ─────────────────────────────────────────────────────────────────────────────
// Reads
// ─────────────────────────────────────────────────────────────────────────────

impl ReadTransaction for MemoryState {
    fn get_entity(&self, id: &EntityId) -> StorageResult<Option<Entity>> {
        Ok(self.entities.get(id).cloned())
    }

    fn get_entity_by_name(&self, entity_type: &str, fqn: &str) -> StorageResult<Option<Entity>> {
        let key = (entity_type.to_string(), fqn.to_string());
        Ok(self
            .names
            .get(&key)
            .and_then(|id| self.entities.get(id))
            .cloned())
    }

    fn list_entities(
        &self,
        entity_type: &str,
        filter: &ListFilter,
        range: &ScanRange,
        limit: usize,
    ) -> StorageResult<Vec<Entity>> {
        let lower = (entity_type.to_string(), String::new());
        let ids: Box<dyn Iterator<Item = (&NameKey, &EntityId)> + '_> = match range {
            ScanRange::After(None) => Box::new(self.names.range(lower..)),
            ScanRange::After(Some(cursor)) => {
                let start = (entity_type.to_string(), cursor.clone());
                Box::new(self.names.range((Bound::Excluded(start), Bound::Unbounded)))
            }
            ScanRange::Before(cursor) => {
                let end = (entity_type.to_string(), cursor.clone());
                Box::new(self.names.range(lower..end).rev())
            }
        };

        Ok(ids
            .take_while(|((t, _), _)| t == entity_type)
            .filter_map(|(_, id)| self.entities.get(id))
            .filter(|e| filter.matches(e))
            .take(limit)
            .cloned()
            .collect())
    }

    fn count_entities(&self, entity_type: &str, filter: &ListFilter) -> StorageResult<usize> {
        Ok(self
            .names
            .range((entity_type.to_string(), String::new())..)
            .take_while(|((t, _), _)| t == entity_type)
            .filter_map(|(_, id)| self.entities.get(id))
            .filter(|e| filter.matches(e))
            .count())
    }

    fn find_to(
        &self,
        from: &EntityId,
        kind: RelationKind,
        to_type: Option<&str>,
    ) -> StorageResult<Vec<Relationship>> {
        Ok(self
            .relationships
            .values()
            .filter(|r| &r.from_id == from && r.kind == kind)
            .filter(|r| to_type.map_or(true, |t| r.to_type == t))
            .cloned()
            .collect())
    }

    fn find_from(
        &self,
        to: &EntityId,
        kind: RelationKind,
        from_type: Option<&str>,
    ) -> StorageResult<Vec<Relationship>> {
        Ok(self
            .relationships
            .values()
            .filter(|r| &r.to_id == to && r.kind == kind)
            .filter(|r| from_type.map_or(true, |t| r.from_type == t))
            .cloned()
            .collect())
    }

    fn get_extension(&self, id: &EntityId, key: &str) -> StorageResult<Option<Value>> {
        Ok(self.extensions.get(&(*id, key.to_string())).cloned())
    }

    fn list_extensions(&self, id: &EntityId, prefix: &str) -> StorageResult<Vec<(String, Value)>> {
        Ok(self
            .extensions
            .range((*id, prefix.to_string())..)
            .take_while(|((eid, key), _)| eid == id && key.starts_with(prefix))
            .map(|((_, key), value)| (key.clone(), value.clone()))
            .collect())
    }

    fn get_tags(&self, target_type: &str, target_fqn: &str) -> StorageResult<Vec<TagUsage>> {
        let start = (
            target_type.to_string(),
            target_fqn.to_string(),
            String::new(),
            TagSource::Classification,
        );
        Ok(self
            .tags
            .range(start..)
            .take_while(|((t, target, _, _), _)| t == target_type && target == target_fqn)
            .map(|(_, usage)| usage.clone())
            .collect())
    }
}

macro_rules! forward_reads {
    ($ty:ty, $state:ident) => {
        impl ReadTransaction for $ty {
            fn get_entity(&self, id: &EntityId) -> StorageResult<Option<Entity>> {
                self.$state.get_entity(id)
            }

            fn get_entity_by_name(&self, entity_type: &str, fqn: &str) -> StorageResult<Option<Entity>> {
                self.$state.get_entity_by_name(entity_type, fqn)
            }

            fn list_entities(
                &self,
                entity_type: &str,
                filter: &ListFilter,
                range: &ScanRange,
                limit: usize,
            ) -> StorageResult<Vec<Entity>> {
                self.$state.list_entities(entity_type, filter, range, limit)
            }

            fn count_entities(&self, entity_type: &str, filter: &ListFilter) -> StorageResult<usize> {
                self.$state.count_entities(entity_type, filter)
            }

            fn find_to(
                &self,
                from: &EntityId,
                kind: RelationKind,
                to_type: Option<&str>,
            ) -> StorageResult<Vec<Relationship>> {
                self.$state.find_to(from, kind, to_type)
            }

            fn find_from(
                &self,
                to: &EntityId,
                kind: RelationKind,
                from_type: Option<&str>,
            ) -> StorageResult<Vec<Relationship>> {
                self.$state.find_from(to, kind, from_type)
            }

            fn get_extension(&self, id: &EntityId, key: &str) -> StorageResult<Option<Value>> {
                self.$state.get_extension(id, key)
            }

            fn list_extensions(&self, id: &EntityId, prefix: &str) -> StorageResult<Vec<(String, Value)>> {
                self.$state.list_extensions(id, prefix)
            }

            fn get_tags(&self, target_type: &str, target_fqn: &str) -> StorageResult<Vec<TagUsage>> {
                self.$state.get_tags(target_type, target_fqn)
            }
        }
    };
}

forward_reads!(MemoryReadTransaction<'_>, state);
forward_reads!(MemoryWriteTransaction<'_>, state);

// ─────────────────────────────────────────────────────────────────────────────
// Writes
// ─────────────────────────────────────────────────────────────────────────────

/// Set or clear `key`, returning what was there before
fn put<K: Ord, V>(map: &mut BTreeMap<K, V>, key: K, value: Option<V>) -> Option<V> {
    match value {
        Some(value) => map.insert(key, value),
        None => map.remove(&key),
    }
}

fn tag_key(usage: &TagUsage) -> TagKey {
    (
        usage.target_type.clone(),
        usage.target_fqn.clone(),
        usage.tag_fqn.clone(),
        usage.source,
    )
}

impl MemoryWriteTransaction<'_> {
    fn set_entity(&mut self, id: EntityId, entity: Option<Entity>) {
        let previous = put(&mut self.state.entities, id, entity);
        self.undo.push(Undo::Entity(id, previous));
    }

    fn set_name(&mut self, key: NameKey, id: Option<EntityId>) {
        let previous = put(&mut self.state.names, key.clone(), id);
        self.undo.push(Undo::Name(key, previous));
    }

    fn set_edge(&mut self, key: EdgeKey, edge: Option<Relationship>) {
        let previous = put(&mut self.state.relationships, key, edge);
        self.undo.push(Undo::Edge(key, previous));
    }

    fn set_extension(&mut self, key: ExtensionKey, value: Option<Value>) {
        let previous = put(&mut self.state.extensions, key.clone(), value);
        self.undo.push(Undo::Extension(key, previous));
    }

    fn set_tag(&mut self, key: TagKey, usage: Option<TagUsage>) {
        let previous = put(&mut self.state.tags, key.clone(), usage);
        self.undo.push(Undo::Tag(key, previous));
    }

    fn delete_edges<F>(&mut self, doomed: F) -> usize
    where
        F: Fn(&Relationship) -> bool,
    {
        let keys: Vec<EdgeKey> = self
            .state
            .relationships
            .iter()
            .filter(|(_, r)| doomed(r))
            .map(|(key, _)| *key)
            .collect();
        for key in &keys {
            self.set_edge(*key, None);
        }
        keys.len()
    }

    fn delete_tags<F>(&mut self, doomed: F)
    where
        F: Fn(&TagUsage) -> bool,
    {
        let keys: Vec<TagKey> = self
            .state
            .tags
            .iter()
            .filter(|(_, usage)| doomed(usage))
            .map(|(key, _)| key.clone())
            .collect();
        for key in keys {
            self.set_tag(key, None);
        }
    }

    fn rekey_tags<F>(&mut self, rewrite: F)
    where
        F: Fn(&TagUsage) -> Option<TagUsage>,
    {
        let changed: Vec<(TagKey, TagUsage)> = self
            .state
            .tags
            .iter()
            .filter_map(|(key, usage)| rewrite(usage).map(|u| (key.clone(), u)))
            .collect();
        for (old_key, usage) in changed {
            self.set_tag(old_key, None);
            self.set_tag(tag_key(&usage), Some(usage));
        }
    }
}

impl WriteTransaction for MemoryWriteTransaction<'_> {
    fn as_read(&self) -> &dyn ReadTransaction {
        self
    }

    fn insert_entity(&mut self, entity: &Entity) -> StorageResult<()> {
        let key = name_key(entity);
        if self.state.entities.contains_key(&entity.id) || self.state.names.contains_key(&key) {
            return Err(StorageError::DuplicateEntity(format!(
                "{} {}",
                entity.entity_type, entity.fully_qualified_name
            )));
        }
        self.set_name(key, Some(entity.id));
        self.set_entity(entity.id, Some(entity.clone()));
        Ok(())
    }

    fn update_entity(&mut self, entity: &Entity) -> StorageResult<()> {
        let existing = self
            .state
            .entities
            .get(&entity.id)
            .ok_or_else(|| StorageError::EntityNotFound(entity.id.to_string()))?;
        let old_key = name_key(existing);
        let new_key = name_key(entity);

        if old_key != new_key {
            if let Some(other) = self.state.names.get(&new_key) {
                if other != &entity.id {
                    return Err(StorageError::DuplicateEntity(format!(
                        "{} {}",
                        entity.entity_type, entity.fully_qualified_name
                    )));
                }
            }
            self.set_name(old_key, None);
            self.set_name(new_key, Some(entity.id));
        }
        self.set_entity(entity.id, Some(entity.clone()));
        Ok(())
    }

    fn delete_entity(&mut self, id: &EntityId) -> StorageResult<()> {
        if let Some(entity) = self.state.entities.get(id) {
            let key = name_key(entity);
            self.set_name(key, None);
            self.set_entity(*id, None);
        }
        Ok(())
    }

    fn insert_relationship(&mut self, relationship: &Relationship) -> StorageResult<()> {
        let key = (relationship.from_id, relationship.to_id, relationship.kind);
        self.set_edge(key, Some(relationship.clone()));
        Ok(())
    }

    fn delete_relationship(
        &mut self,
        from: &EntityId,
        to: &EntityId,
        kind: RelationKind,
    ) -> StorageResult<bool> {
        let key = (*from, *to, kind);
        if !self.state.relationships.contains_key(&key) {
            return Ok(false);
        }
        self.set_edge(key, None);
        Ok(true)
    }

    fn delete_from(
        &mut self,
        from: &EntityId,
        kind: RelationKind,
        to_type: Option<&str>,
    ) -> StorageResult<usize> {
        Ok(self.delete_edges(|r| {
            &r.from_id == from && r.kind == kind && to_type.map_or(true, |t| r.to_type == t)
        }))
    }

    fn delete_to(
        &mut self,
        to: &EntityId,
        kind: RelationKind,
        from_type: Option<&str>,
    ) -> StorageResult<usize> {
        Ok(self.delete_edges(|r| {
            &r.to_id == to && r.kind == kind && from_type.map_or(true, |t| r.from_type == t)
        }))
    }

    fn delete_all_relationships(&mut self, id: &EntityId) -> StorageResult<usize> {
        Ok(self.delete_edges(|r| r.touches(id)))
    }

    fn put_extension(&mut self, id: &EntityId, key: &str, value: &Value) -> StorageResult<()> {
        self.set_extension((*id, key.to_string()), Some(value.clone()));
        Ok(())
    }

    fn delete_extension(&mut self, id: &EntityId, key: &str) -> StorageResult<()> {
        let key = (*id, key.to_string());
        if self.state.extensions.contains_key(&key) {
            self.set_extension(key, None);
        }
        Ok(())
    }

    fn delete_all_extensions(&mut self, id: &EntityId) -> StorageResult<()> {
        let keys: Vec<ExtensionKey> = self
            .state
            .extensions
            .range((*id, String::new())..)
            .take_while(|((eid, _), _)| eid == id)
            .map(|(key, _)| key.clone())
            .collect();
        for key in keys {
            self.set_extension(key, None);
        }
        Ok(())
    }

    fn apply_tag(&mut self, usage: &TagUsage) -> StorageResult<()> {
        self.set_tag(tag_key(usage), Some(usage.clone()));
        Ok(())
    }

    fn delete_tags_by_target(&mut self, target_type: &str, target_fqn: &str) -> StorageResult<()> {
        self.delete_tags(|u| u.target_type == target_type && u.target_fqn == target_fqn);
        Ok(())
    }

    fn delete_tags_by_target_prefix(&mut self, target_type: &str, prefix: &str) -> StorageResult<()> {
        self.delete_tags(|u| {
            u.target_type == target_type && fqn::is_same_or_descendant(&u.target_fqn, prefix)
        });
        Ok(())
    }

    fn delete_tags_by_tag_prefix(&mut self, source: TagSource, prefix: &str) -> StorageResult<()> {
        self.delete_tags(|u| u.source == source && fqn::is_same_or_descendant(&u.tag_fqn, prefix));
        Ok(())
    }

    fn rename_tag_prefix(
        &mut self,
        source: TagSource,
        old_prefix: &str,
        new_prefix: &str,
    ) -> StorageResult<()> {
        self.rekey_tags(|usage| {
            if usage.source != source {
                return None;
            }
            fqn::replace_prefix(&usage.tag_fqn, old_prefix, new_prefix).map(|tag_fqn| TagUsage {
                tag_fqn,
                ..usage.clone()
            })
        });
        Ok(())
    }

    fn rename_target_prefix(
        &mut self,
        target_type: &str,
        old_prefix: &str,
        new_prefix: &str,
    ) -> StorageResult<()> {
        self.rekey_tags(|usage| {
            if usage.target_type != target_type {
                return None;
            }
            fqn::replace_prefix(&usage.target_fqn, old_prefix, new_prefix).map(|target_fqn| {
                TagUsage {
                    target_fqn,
                    ..usage.clone()
                }
            })
        });
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> StorageResult<()> {
        self.committed = true;
        self.undo.clear();
        Ok(())
    }
}

impl Drop for MemoryWriteTransaction<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }
        let undo = std::mem::take(&mut self.undo);
        let state = &mut *self.state;
        for entry in undo.into_iter().rev() {
            match entry {
                Undo::Entity(key, value) => {
                    put(&mut state.entities, key, value);
                }
                Undo::Name(key, value) => {
                    put(&mut state.names, key, value);
                }
                Undo::Edge(key, value) => {
                    put(&mut state.relationships, key, value);
                }
                Undo::Extension(key, value) => {
                    put(&mut state.extensions, key, value);
                }
                Undo::Tag(key, value) => {
                    put(&mut state.tags, key, value);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing;
    use metacat_core::TagLabel;
    use serde_json::json;

    #[tokio::test]
    async fn test_memory_storage() {
        let storage = MemoryStorage::new();
        storage.initialize().await.unwrap();
        assert!(storage.health_check().await.unwrap());

        testing::run_conformance(&storage);
    }

    #[test]
    fn test_write_sees_own_writes_before_commit() {
        let storage = MemoryStorage::new();
        let mut tx = storage.begin_write().unwrap();
        let entity = testing::entity("table", "svc.db.orders");
        tx.insert_entity(&entity).unwrap();
        assert!(tx.get_entity(&entity.id).unwrap().is_some());
        assert!(tx.as_read().get_entity(&entity.id).unwrap().is_some());
        drop(tx);

        let read = storage.begin_read().unwrap();
        assert!(read.get_entity(&entity.id).unwrap().is_none());
    }

    #[test]
    fn test_rollback_restores_overwritten_state() {
        let storage = MemoryStorage::new();
        let mut orders = testing::entity("table", "svc.db.orders");
        let pii = TagLabel::classification("PII.Sensitive");
        let mut tx = storage.begin_write().unwrap();
        tx.insert_entity(&orders).unwrap();
        tx.put_extension(&orders.id, "table.extension.steward", &json!("ops")).unwrap();
        tx.apply_tag(&TagUsage::new(&pii, "table", "svc.db.orders")).unwrap();
        tx.commit().unwrap();

        let mut tx = storage.begin_write().unwrap();
        orders.fully_qualified_name = "svc.db.sales".into();
        tx.update_entity(&orders).unwrap();
        tx.delete_all_extensions(&orders.id).unwrap();
        tx.rename_target_prefix("table", "svc.db.orders", "svc.db.sales").unwrap();
        tx.delete_tags_by_target("table", "svc.db.sales").unwrap();
        drop(tx);

        let read = storage.begin_read().unwrap();
        assert!(read.get_entity_by_name("table", "svc.db.orders").unwrap().is_some());
        assert!(read.get_entity_by_name("table", "svc.db.sales").unwrap().is_none());
        assert_eq!(
            read.get_extension(&orders.id, "table.extension.steward").unwrap(),
            Some(json!("ops"))
        );
        assert_eq!(read.get_tags("table", "svc.db.orders").unwrap().len(), 1);
        assert!(read.get_tags("table", "svc.db.sales").unwrap().is_empty());
    }
}
