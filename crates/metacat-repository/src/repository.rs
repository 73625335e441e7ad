//! Entity repository
//!
//! [`EntityRepository`] is the entry point for every read and write. Each
//! mutating call runs its whole body inside one synchronous write transaction.
//! Cache invalidation and change events happen after the commit, so a failed
//! call leaves no trace in the store, the cache or the event stream.

use std::sync::Arc;

use chrono::Utc;
use metacat_cache::{CacheStats, EntityCache};
use metacat_core::query::field_names;
use metacat_core::{
    entity_types, limits, ChangeDescription, ChangeEvent, Entity, EntityId, EntityReference, EntityVersion, Error, EventType,
    Fields, Include, ListFilter, ProviderType, RelationKind, Relationship, Result, ResultList,
    ScanRange,
};
use metacat_storage::{ReadTransaction, StorageBackend, WriteTransaction};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::config::RepositoryConfig;
use crate::custom_property::{validate_extension, CustomProperty};
use crate::events::{ChangeEventSink, LoggingSink};
use crate::handler::{EntityHandler, TypeRegistry};
use crate::hydrate::{hydrate, load_entity, load_entity_by_name};
use crate::patch::apply_patch;
use crate::resolve::{resolve_reference, resolve_references, validate_tags};
use crate::updater::{
    apply_plan, store_snapshot, version_key, version_prefix, EntityUpdater, Operation, SyncPlan,
    Touched, UpdateOutcome,
};

/// Result of a create, update, patch or restore
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PutResponse {
    pub entity: Entity,
    pub event_type: EventType,
}

impl From<UpdateOutcome> for PutResponse {
    fn from(outcome: UpdateOutcome) -> Self {
        Self {
            entity: outcome.entity,
            event_type: outcome.event_type,
        }
    }
}

/// Result of a delete
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeleteResponse {
    /// The entity as it was before a hard delete, or after a soft delete
    pub entity: Entity,
    pub event_type: EventType,
}

/// Current version of an entity followed by its history, newest first
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityHistory {
    pub entity_type: String,
    pub versions: Vec<Entity>,
}

/// Work to do once a write transaction has committed
#[derive(Debug, Default)]
struct Effects {
    touched: Vec<Touched>,
    events: Vec<ChangeEvent>,
}

impl Effects {
    fn absorb(&mut self, outcome: &UpdateOutcome) {
        self.touched.extend(outcome.touched.iter().cloned());
        self.events.extend(outcome.event.iter().cloned());
    }
}

/// Options of a delete
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Delete children too instead of failing with NotEmpty
    pub recursive: bool,
    /// Purge the entity instead of marking it deleted
    pub hard: bool,
}

pub struct EntityRepository {
    storage: Arc<dyn StorageBackend>,
    registry: Arc<TypeRegistry>,
    cache: Arc<EntityCache>,
    sink: Arc<dyn ChangeEventSink>,
    config: RepositoryConfig,
}

impl EntityRepository {
    pub fn new(
        storage: Arc<dyn StorageBackend>,
        registry: Arc<TypeRegistry>,
        cache: Arc<EntityCache>,
        sink: Arc<dyn ChangeEventSink>,
        config: RepositoryConfig,
    ) -> Self {
        Self {
            storage,
            registry,
            cache,
            sink,
            config,
        }
    }

    /// Repository with the built-in types, a default cache and a logging sink
    pub fn with_defaults(storage: Arc<dyn StorageBackend>) -> Self {
        Self::new(
            storage,
            Arc::new(TypeRegistry::with_builtin_types()),
            Arc::new(EntityCache::default()),
            Arc::new(LoggingSink),
            RepositoryConfig::default(),
        )
    }

    pub fn registry(&self) -> &TypeRegistry {
        &self.registry
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Reads
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn get(
        &self,
        entity_type: &str,
        id: &EntityId,
        fields: &Fields,
        include: Include,
        from_cache: bool,
    ) -> Result<Entity> {
        let handler = self.registry.handler(entity_type)?;
        if !from_cache {
            self.cache.invalidate_id(entity_type, id).await;
        }
        let snapshot = self
            .cache
            .get_or_load_by_id(entity_type, id, async { self.load_snapshot(entity_type, id) })
            .await
            .map_err(Error::from_shared)?;
        if !include.admits(snapshot.deleted) {
            return Err(Error::not_found(entity_type, id));
        }
        self.hydrated(handler.as_ref(), &snapshot, fields)
    }

    pub async fn get_by_name(
        &self,
        entity_type: &str,
        fqn: &str,
        fields: &Fields,
        include: Include,
        from_cache: bool,
    ) -> Result<Entity> {
        let handler = self.registry.handler(entity_type)?;
        if !from_cache {
            self.cache.invalidate_name(entity_type, fqn).await;
        }
        let snapshot = self
            .cache
            .get_or_load_by_name(entity_type, fqn, async {
                self.load_snapshot_by_name(entity_type, fqn)
            })
            .await
            .map_err(Error::from_shared)?;
        if !include.admits(snapshot.deleted) {
            return Err(Error::not_found(entity_type, fqn));
        }
        self.hydrated(handler.as_ref(), &snapshot, fields)
    }

    fn load_snapshot(&self, entity_type: &str, id: &EntityId) -> Result<Entity> {
        let tx = self.storage.begin_read()?;
        tx.get_entity(id)?
            .filter(|e| e.entity_type == entity_type)
            .ok_or_else(|| Error::not_found(entity_type, id))
    }

    fn load_snapshot_by_name(&self, entity_type: &str, fqn: &str) -> Result<Entity> {
        let tx = self.storage.begin_read()?;
        tx.get_entity_by_name(entity_type, fqn)?
            .ok_or_else(|| Error::not_found(entity_type, fqn))
    }

    fn hydrated(&self, handler: &dyn EntityHandler, snapshot: &Entity, fields: &Fields) -> Result<Entity> {
        let tx = self.storage.begin_read()?;
        let mut entity = snapshot.clone();
        hydrate(tx.as_ref(), handler, &mut entity, fields)?;
        Ok(entity)
    }

    /// Page of entities in ascending fqn order starting after `after`
    pub fn list_after(
        &self,
        entity_type: &str,
        filter: &ListFilter,
        fields: &Fields,
        limit: usize,
        after: Option<String>,
    ) -> Result<ResultList<Entity>> {
        limits::validate_page_size(limit)?;
        let handler = self.registry.handler(entity_type)?;
        let tx = self.storage.begin_read()?;

        let total = tx.count_entities(entity_type, filter)?;
        let has_cursor = after.is_some();
        let mut items = tx.list_entities(entity_type, filter, &ScanRange::After(after), limit + 1)?;
        let has_more = items.len() > limit;
        items.truncate(limit);

        let before = if has_cursor {
            items.first().map(|e| e.fully_qualified_name.clone())
        } else {
            None
        };
        let after = if has_more {
            items.last().map(|e| e.fully_qualified_name.clone())
        } else {
            None
        };
        for entity in &mut items {
            hydrate(tx.as_ref(), handler.as_ref(), entity, fields)?;
        }
        Ok(ResultList::new(items, before, after, total))
    }

    /// Page of entities in ascending fqn order ending just before `before`
    pub fn list_before(
        &self,
        entity_type: &str,
        filter: &ListFilter,
        fields: &Fields,
        limit: usize,
        before: String,
    ) -> Result<ResultList<Entity>> {
        limits::validate_page_size(limit)?;
        let handler = self.registry.handler(entity_type)?;
        let tx = self.storage.begin_read()?;

        let total = tx.count_entities(entity_type, filter)?;
        let mut items = tx.list_entities(entity_type, filter, &ScanRange::Before(before), limit + 1)?;
        let has_more = items.len() > limit;
        items.truncate(limit);
        items.reverse();

        let before = if has_more {
            items.first().map(|e| e.fully_qualified_name.clone())
        } else {
            None
        };
        let after = items.last().map(|e| e.fully_qualified_name.clone());
        for entity in &mut items {
            hydrate(tx.as_ref(), handler.as_ref(), entity, fields)?;
        }
        Ok(ResultList::new(items, before, after, total))
    }

    /// Every stored version of an entity, newest first
    pub fn list_versions(&self, entity_type: &str, id: &EntityId) -> Result<EntityHistory> {
        let tx = self.storage.begin_read()?;
        let current = tx
            .get_entity(id)?
            .filter(|e| e.entity_type == entity_type)
            .ok_or_else(|| Error::not_found(entity_type, id))?;

        let mut versions = vec![current];
        for (_, value) in tx.list_extensions(id, &version_prefix(entity_type))? {
            versions.push(serde_json::from_value(value)?);
        }
        versions.sort_by(|a, b| b.version.cmp(&a.version));
        Ok(EntityHistory {
            entity_type: entity_type.to_string(),
            versions,
        })
    }

    /// One version of an entity, current or historical
    pub fn get_version(&self, entity_type: &str, id: &EntityId, version: EntityVersion) -> Result<Entity> {
        let tx = self.storage.begin_read()?;
        let current = tx
            .get_entity(id)?
            .filter(|e| e.entity_type == entity_type)
            .ok_or_else(|| Error::not_found(entity_type, id))?;
        if current.version == version {
            return Ok(current);
        }
        match tx.get_extension(id, &version_key(entity_type, version))? {
            Some(value) => Ok(serde_json::from_value(value)?),
            None => Err(Error::not_found(
                format!("{} version", entity_type),
                format!("{} {}", id, version),
            )),
        }
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Writes
    // ─────────────────────────────────────────────────────────────────────────

    /// Run `body` in a write transaction and commit it
    fn in_write<T>(
        &self,
        body: impl FnOnce(&mut dyn WriteTransaction, &mut Effects) -> Result<T>,
    ) -> Result<(T, Effects)> {
        let mut tx = self.storage.begin_write()?;
        let mut effects = Effects::default();
        let value = body(tx.as_mut(), &mut effects)?;
        tx.commit()?;
        Ok((value, effects))
    }

    /// Invalidate touched cache entries, then publish events
    async fn finish(&self, effects: Effects) {
        for touched in &effects.touched {
            self.cache
                .invalidate(&touched.entity_type, &touched.id, &touched.fqn)
                .await;
        }
        for event in &effects.events {
            self.sink.publish(event).await;
        }
    }

    pub async fn create(&self, entity: Entity, actor: &str) -> Result<Entity> {
        let (created, effects) = self.in_write(|tx, effects| self.create_in(tx, entity, actor, effects))?;
        self.finish(effects).await;
        Ok(created)
    }

    /// Create the entity, or replace the one stored under the same fqn
    pub async fn create_or_update(&self, entity: Entity, actor: &str) -> Result<PutResponse> {
        let handler = self.registry.handler(&entity.entity_type)?;
        let (response, effects) = self.in_write(|tx, effects| {
            let mut incoming = entity;
            resolve_references(tx.as_read(), &mut incoming)?;
            let mut named = incoming.clone();
            handler.set_fully_qualified_name(&mut named)?;

            let existing = tx.get_entity_by_name(&incoming.entity_type, &named.fully_qualified_name)?;
            match existing {
                None => {
                    let created = self.create_in(tx, incoming, actor, effects)?;
                    Ok(PutResponse {
                        entity: created,
                        event_type: EventType::EntityCreated,
                    })
                }
                Some(existing) => {
                    incoming.id = existing.id;
                    self.replace_in(tx, &existing.entity_type, &existing.id, incoming, actor, effects)
                }
            }
        })?;
        self.finish(effects).await;
        Ok(response)
    }

    /// Replace an entity with `updated`
    pub async fn update(
        &self,
        entity_type: &str,
        id: &EntityId,
        updated: Entity,
        actor: &str,
    ) -> Result<PutResponse> {
        let (response, effects) =
            self.in_write(|tx, effects| self.replace_in(tx, entity_type, id, updated, actor, effects))?;
        self.finish(effects).await;
        Ok(response)
    }

    /// Apply a JSON merge patch to an entity
    pub async fn patch(&self, entity_type: &str, id: &EntityId, patch: &Value, actor: &str) -> Result<PutResponse> {
        let (response, effects) = self.in_write(|tx, effects| {
            let original = load_entity(tx.as_read(), &self.registry, entity_type, id, &Fields::all(), Include::NonDeleted)?;
            let updated = apply_patch(&original, patch)?;
            let outcome = self.update_in(tx, &original, updated, Operation::Patch, actor, effects)?;
            Ok(PutResponse::from(outcome))
        })?;
        self.finish(effects).await;
        Ok(response)
    }

    pub async fn delete(
        &self,
        entity_type: &str,
        id: &EntityId,
        actor: &str,
        options: DeleteOptions,
    ) -> Result<DeleteResponse> {
        let include = if options.hard { Include::All } else { Include::NonDeleted };
        let (response, effects) = self.in_write(|tx, effects| {
            let entity = load_entity(tx.as_read(), &self.registry, entity_type, id, &Fields::all(), include)?;
            self.delete_in(tx, &entity, actor, options, effects)
        })?;
        self.finish(effects).await;
        Ok(response)
    }

    pub async fn delete_by_name(
        &self,
        entity_type: &str,
        fqn: &str,
        actor: &str,
        options: DeleteOptions,
    ) -> Result<DeleteResponse> {
        let include = if options.hard { Include::All } else { Include::NonDeleted };
        let (response, effects) = self.in_write(|tx, effects| {
            let entity =
                load_entity_by_name(tx.as_read(), &self.registry, entity_type, fqn, &Fields::all(), include)?;
            self.delete_in(tx, &entity, actor, options, effects)
        })?;
        self.finish(effects).await;
        Ok(response)
    }

    /// Undo a soft delete, restoring deleted children first
    pub async fn restore(&self, entity_type: &str, id: &EntityId, actor: &str) -> Result<PutResponse> {
        let (response, effects) = self.in_write(|tx, effects| {
            let entity = load_entity(tx.as_read(), &self.registry, entity_type, id, &Fields::all(), Include::Deleted)?;
            self.restore_in(tx, &entity, actor, effects).map(PutResponse::from)
        })?;
        self.finish(effects).await;
        Ok(response)
    }

    /// Make `user_id` follow an entity
    ///
    /// Following does not bump the version. The event carries a change
    /// description with `followers` added, against the current version.
    pub async fn add_follower(
        &self,
        entity_type: &str,
        id: &EntityId,
        user_id: &EntityId,
        actor: &str,
    ) -> Result<PutResponse> {
        let (response, effects) = self.in_write(|tx, effects| {
            let (entity, user) = self.follow_pair(tx.as_read(), entity_type, id, user_id)?;
            let following = tx
                .find_from(id, RelationKind::Follows, Some(entity_types::USER))?
                .iter()
                .any(|edge| edge.from_id == user.id);
            if following {
                return self.follower_response(tx.as_read(), &entity, None, actor, effects);
            }

            tx.insert_relationship(&Relationship::new(
                user.id,
                entity_types::USER,
                entity.id,
                entity_type,
                RelationKind::Follows,
            ))?;
            let mut change = ChangeDescription::new(entity.version);
            change.field_added(field_names::FOLLOWERS, serde_json::to_value(vec![user.to_reference()])?);
            tracing::info!(entity_type, fqn = %entity.fully_qualified_name, user = %user.name, "Added follower");
            self.follower_response(tx.as_read(), &entity, Some(change), actor, effects)
        })?;
        self.finish(effects).await;
        Ok(response)
    }

    /// Stop `user_id` following an entity
    pub async fn delete_follower(
        &self,
        entity_type: &str,
        id: &EntityId,
        user_id: &EntityId,
        actor: &str,
    ) -> Result<PutResponse> {
        let (response, effects) = self.in_write(|tx, effects| {
            let (entity, user) = self.follow_pair(tx.as_read(), entity_type, id, user_id)?;
            if !tx.delete_relationship(&user.id, &entity.id, RelationKind::Follows)? {
                return self.follower_response(tx.as_read(), &entity, None, actor, effects);
            }

            let mut change = ChangeDescription::new(entity.version);
            change.field_deleted(field_names::FOLLOWERS, serde_json::to_value(vec![user.to_reference()])?);
            tracing::info!(entity_type, fqn = %entity.fully_qualified_name, user = %user.name, "Removed follower");
            self.follower_response(tx.as_read(), &entity, Some(change), actor, effects)
        })?;
        self.finish(effects).await;
        Ok(response)
    }

    /// Live entity and live user of a follower change
    fn follow_pair(
        &self,
        tx: &dyn ReadTransaction,
        entity_type: &str,
        id: &EntityId,
        user_id: &EntityId,
    ) -> Result<(Entity, Entity)> {
        let entity = load_entity(tx, &self.registry, entity_type, id, &Fields::none(), Include::NonDeleted)?;
        let user = load_entity(tx, &self.registry, entity_types::USER, user_id, &Fields::none(), Include::NonDeleted)?;
        Ok((entity, user))
    }

    /// Reload `entity` with its followers and queue the event of a follower change
    fn follower_response(
        &self,
        tx: &dyn ReadTransaction,
        entity: &Entity,
        change: Option<ChangeDescription>,
        actor: &str,
        effects: &mut Effects,
    ) -> Result<PutResponse> {
        let mut reloaded = load_entity(
            tx,
            &self.registry,
            &entity.entity_type,
            &entity.id,
            &Fields::none().with(field_names::FOLLOWERS),
            Include::NonDeleted,
        )?;
        let Some(change) = change else {
            return Ok(PutResponse {
                entity: reloaded,
                event_type: EventType::EntityNoChange,
            });
        };

        reloaded.change_description = Some(change.clone());
        let mut event = ChangeEvent::for_entity(&reloaded, EventType::EntityUpdated, entity.version)
            .with_change_description(Some(change));
        event.user_name = actor.to_string();
        event.timestamp = Utc::now();
        effects.touched.push(Touched::new(entity));
        effects.events.push(event);
        Ok(PutResponse {
            entity: reloaded,
            event_type: EventType::EntityUpdated,
        })
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Relationships
    // ─────────────────────────────────────────────────────────────────────────

    /// Add an edge between two existing entities
    ///
    /// Symmetric kinds, and any kind when `bidirectional` is set, are stored
    /// with the smaller id first.
    pub fn add_relationship(
        &self,
        from: &EntityReference,
        to: &EntityReference,
        kind: RelationKind,
        payload: Option<Value>,
        bidirectional: bool,
    ) -> Result<Relationship> {
        let (edge, _) = self.in_write(|tx, _| {
            let from = resolve_reference(tx.as_read(), from)?;
            let to = resolve_reference(tx.as_read(), to)?;
            if from.id == to.id {
                return Err(Error::invalid(format!(
                    "{} can't have a {} relationship with itself",
                    from.fully_qualified_name, kind
                )));
            }
            let mut edge = Relationship::new(from.id, &from.entity_type, to.id, &to.entity_type, kind);
            if let Some(payload) = payload {
                edge = edge.with_payload(payload);
            }
            if bidirectional || kind.is_symmetric() {
                edge = edge.canonical();
            }
            tx.insert_relationship(&edge)?;
            Ok(edge)
        })?;
        tracing::debug!(from = %edge.from_id, to = %edge.to_id, kind = %kind, "Added relationship");
        Ok(edge)
    }

    /// Remove an edge; returns whether it existed
    pub fn delete_relationship(&self, from_id: &EntityId, to_id: &EntityId, kind: RelationKind) -> Result<bool> {
        let (removed, _) = self.in_write(|tx, _| {
            let mut removed = tx.delete_relationship(from_id, to_id, kind)?;
            if !removed && kind.is_symmetric() {
                removed = tx.delete_relationship(to_id, from_id, kind)?;
            }
            Ok(removed)
        })?;
        Ok(removed)
    }

    /// Outgoing edges of `from_id`
    pub fn find_to(&self, from_id: &EntityId, kind: RelationKind, to_type: Option<&str>) -> Result<Vec<Relationship>> {
        let tx = self.storage.begin_read()?;
        Ok(tx.find_to(from_id, kind, to_type)?)
    }

    /// Incoming edges of `to_id`
    pub fn find_from(&self, to_id: &EntityId, kind: RelationKind, from_type: Option<&str>) -> Result<Vec<Relationship>> {
        let tx = self.storage.begin_read()?;
        Ok(tx.find_from(to_id, kind, from_type)?)
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Transaction bodies
    // ─────────────────────────────────────────────────────────────────────────

    /// Resolve, normalize and validate an incoming entity
    fn prepare_incoming(
        &self,
        tx: &dyn ReadTransaction,
        handler: &dyn EntityHandler,
        properties: &[CustomProperty],
        entity: &mut Entity,
        update: bool,
    ) -> Result<()> {
        resolve_references(tx, entity)?;
        handler.prepare(entity, tx, update)?;
        if let Some(extension) = &entity.extension {
            validate_extension(properties, extension)?;
        }
        validate_tags(tx, &mut entity.tags)?;
        limits::validate_entity(entity)?;
        Ok(())
    }

    fn create_in(&self, tx: &mut dyn WriteTransaction, mut entity: Entity, actor: &str, effects: &mut Effects) -> Result<Entity> {
        let handler = self.registry.handler(&entity.entity_type)?;
        let properties = self.registry.custom_properties(&entity.entity_type)?;

        if tx.get_entity(&entity.id)?.is_some() {
            return Err(Error::Conflict(format!("Entity {} already exists", entity.id)));
        }
        self.prepare_incoming(tx.as_read(), handler.as_ref(), &properties, &mut entity, false)?;
        handler.set_fully_qualified_name(&mut entity)?;
        limits::validate_fqn(&entity.fully_qualified_name)?;

        entity.version = EntityVersion::INITIAL;
        entity.deleted = false;
        entity.updated_by = actor.to_string();
        entity.updated_at = Utc::now();
        entity.change_description = None;
        entity.followers.clear();

        store_snapshot(tx, handler.as_ref(), &entity, true)?;
        let plan = SyncPlan::for_new_entity(handler.as_ref(), &entity);
        apply_plan(tx, handler.as_ref(), &entity, &plan, &mut Vec::new())?;
        handler.store_relationships(&entity, tx)?;

        let created = load_entity(tx.as_read(), &self.registry, &entity.entity_type, &entity.id, &Fields::all(), Include::All)?;
        tracing::info!(
            entity_type = %created.entity_type,
            fqn = %created.fully_qualified_name,
            id = %created.id,
            "Created entity"
        );
        effects.touched.push(Touched::new(&created));
        effects
            .events
            .push(ChangeEvent::for_entity(&created, EventType::EntityCreated, created.version));
        Ok(created)
    }

    /// Replace by id; a soft-deleted entity is restored first
    fn replace_in(
        &self,
        tx: &mut dyn WriteTransaction,
        entity_type: &str,
        id: &EntityId,
        updated: Entity,
        actor: &str,
        effects: &mut Effects,
    ) -> Result<PutResponse> {
        let mut original = load_entity(tx.as_read(), &self.registry, entity_type, id, &Fields::all(), Include::All)?;
        if original.deleted {
            original = self.restore_in(tx, &original, actor, effects)?.entity;
            let handler = self.registry.handler(entity_type)?;
            hydrate(tx.as_read(), handler.as_ref(), &mut original, &Fields::all())?;
        }
        let outcome = self.update_in(tx, &original, updated, Operation::Put, actor, effects)?;
        Ok(PutResponse::from(outcome))
    }

    fn update_in(
        &self,
        tx: &mut dyn WriteTransaction,
        original: &Entity,
        mut updated: Entity,
        operation: Operation,
        actor: &str,
        effects: &mut Effects,
    ) -> Result<UpdateOutcome> {
        let handler = self.registry.handler(&original.entity_type)?;
        let properties = self.registry.custom_properties(&original.entity_type)?;

        updated.parent = original.parent.clone();
        self.prepare_incoming(tx.as_read(), handler.as_ref(), &properties, &mut updated, true)?;

        let outcome = EntityUpdater::new(handler.as_ref(), &self.config).update(tx, original, updated, operation, actor)?;
        if outcome.event.is_some() {
            tracing::info!(
                entity_type = %outcome.entity.entity_type,
                fqn = %outcome.entity.fully_qualified_name,
                version = %outcome.entity.version,
                "Updated entity"
            );
        }
        effects.absorb(&outcome);
        Ok(outcome)
    }

    /// Live children over containment edges, or every child when purging
    fn children(&self, tx: &dyn ReadTransaction, entity: &Entity, include_deleted: bool) -> Result<Vec<Entity>> {
        let mut children = Vec::new();
        for kind in [RelationKind::Contains, RelationKind::ParentOf] {
            for edge in tx.find_to(&entity.id, kind, None)? {
                match tx.get_entity(&edge.to_id)? {
                    Some(child) if include_deleted || !child.deleted => children.push(child),
                    Some(_) => {}
                    None => tracing::warn!(
                        parent = %entity.fully_qualified_name,
                        child = %edge.to_id,
                        kind = %kind,
                        "Relationship points at a missing entity"
                    ),
                }
            }
        }
        children.sort_by(|a, b| a.fully_qualified_name.cmp(&b.fully_qualified_name));
        Ok(children)
    }

    fn delete_in(
        &self,
        tx: &mut dyn WriteTransaction,
        entity: &Entity,
        actor: &str,
        options: DeleteOptions,
        effects: &mut Effects,
    ) -> Result<DeleteResponse> {
        if entity.provider == ProviderType::System {
            return Err(Error::PermissionDenied(format!(
                "System entity {} can't be deleted",
                entity.fully_qualified_name
            )));
        }
        let handler = self.registry.handler(&entity.entity_type)?;

        let children = self.children(tx.as_read(), entity, options.hard)?;
        if !children.is_empty() && !options.recursive {
            return Err(Error::NotEmpty(format!(
                "{} {} has {} children, delete them first or delete recursively",
                entity.entity_type,
                entity.fully_qualified_name,
                children.len()
            )));
        }
        for child in children {
            let child = load_entity(tx.as_read(), &self.registry, &child.entity_type, &child.id, &Fields::all(), Include::All)?;
            self.delete_in(tx, &child, actor, options, effects)?;
        }

        if !options.hard {
            let mut updated = entity.clone();
            updated.deleted = true;
            let outcome = EntityUpdater::new(handler.as_ref(), &self.config).update(tx, entity, updated, Operation::SoftDelete, actor)?;
            tracing::info!(
                entity_type = %entity.entity_type,
                fqn = %entity.fully_qualified_name,
                "Soft deleted entity"
            );
            effects.absorb(&outcome);
            return Ok(DeleteResponse {
                entity: outcome.entity,
                event_type: outcome.event_type,
            });
        }

        tx.delete_all_relationships(&entity.id)?;
        tx.delete_all_extensions(&entity.id)?;
        tx.delete_tags_by_target_prefix(&entity.entity_type, &entity.fully_qualified_name)?;
        if let Some(source) = handler.tag_source() {
            tx.delete_tags_by_tag_prefix(source, &entity.fully_qualified_name)?;
        }
        tx.delete_entity(&entity.id)?;
        tracing::info!(
            entity_type = %entity.entity_type,
            fqn = %entity.fully_qualified_name,
            "Hard deleted entity"
        );

        let mut deleted = entity.clone();
        deleted.updated_by = actor.to_string();
        deleted.updated_at = Utc::now();
        effects.touched.push(Touched::new(entity));
        effects
            .events
            .push(ChangeEvent::for_entity(&deleted, EventType::EntityDeleted, entity.version));
        Ok(DeleteResponse {
            entity: deleted,
            event_type: EventType::EntityDeleted,
        })
    }

    fn restore_in(
        &self,
        tx: &mut dyn WriteTransaction,
        entity: &Entity,
        actor: &str,
        effects: &mut Effects,
    ) -> Result<UpdateOutcome> {
        let handler = self.registry.handler(&entity.entity_type)?;
        for child in self.children(tx.as_read(), entity, true)? {
            if child.deleted {
                let child = load_entity(tx.as_read(), &self.registry, &child.entity_type, &child.id, &Fields::all(), Include::Deleted)?;
                self.restore_in(tx, &child, actor, effects)?;
            }
        }

        let mut updated = entity.clone();
        updated.deleted = false;
        let outcome = EntityUpdater::new(handler.as_ref(), &self.config).update(tx, entity, updated, Operation::Put, actor)?;
        tracing::info!(
            entity_type = %entity.entity_type,
            fqn = %entity.fully_qualified_name,
            version = %outcome.entity.version,
            "Restored entity"
        );
        effects.absorb(&outcome);
        Ok(outcome)
    }
}
