//! Change tracking for updates
//!
//! [`EntityUpdater`] turns an original entity O and a target U into a stored
//! revision. A diff pass over the common fields and the handler's own fields
//! yields a change description and a [`SyncPlan`] of relationship writes. Only
//! when something changed is the baseline written to version history, the plan
//! applied and the live snapshot replaced, all inside the caller's write
//! transaction.
//!
//! Patches by the same actor within the session window are consolidated:
//! the change description is computed against the revision before the session
//! started (recorded pass) while the store is synced against O (silent pass).

use chrono::Utc;
use metacat_core::query::field_names;
use metacat_core::{
    entity_types, fqn, ChangeEvent, ChangeRecorder, Entity, EntityId, EntityReference,
    EntityVersion, Error, EventType, ProviderType, RelationKind, Relationship, Result, TagLabel,
    TagUsage,
};
use metacat_storage::{ReadTransaction, WriteTransaction};
use serde_json::{Map, Value};

use crate::config::RepositoryConfig;
use crate::custom_property::{extension_key, extension_prefix};
use crate::handler::EntityHandler;

/// How the target was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    /// Full replacement (PUT)
    Put,
    /// JSON merge patch
    Patch,
    SoftDelete,
}

/// Extension store key of a version history record
pub fn version_key(entity_type: &str, version: EntityVersion) -> String {
    format!("{}.version.{}", entity_type, version)
}

/// Key prefix of every version history record of an entity type
pub fn version_prefix(entity_type: &str) -> String {
    format!("{}.version.", entity_type)
}

/// A store write needed to bring relationships in line with the target
#[derive(Debug, Clone, PartialEq)]
pub enum SyncAction {
    /// Move the entity and its contained descendants to a new fqn
    Rename { old_fqn: String, new_fqn: String },
    /// Replace edges `ref --kind--> entity`
    ReplaceIncoming {
        kind: RelationKind,
        from_type: Option<String>,
        refs: Vec<EntityReference>,
    },
    /// Replace edges `entity --kind--> ref`
    ReplaceOutgoing {
        kind: RelationKind,
        to_type: Option<String>,
        refs: Vec<EntityReference>,
    },
    /// Replace symmetric edges between the entity and peers of `peer_type`
    ReplaceSymmetric {
        kind: RelationKind,
        peer_type: String,
        refs: Vec<EntityReference>,
    },
    /// Replace the tags applied to `target_fqn`
    ReplaceTags {
        target_fqn: String,
        labels: Vec<TagLabel>,
    },
    /// Replace every custom property value
    ReplaceExtension { values: Option<Map<String, Value>> },
}

/// Relationship writes produced by a diff pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncPlan {
    actions: Vec<SyncAction>,
}

impl SyncPlan {
    pub fn push(&mut self, action: SyncAction) {
        self.actions.push(action);
    }

    pub fn actions(&self) -> &[SyncAction] {
        &self.actions
    }

    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Plan storing every relationship of a newly created entity
    pub fn for_new_entity(handler: &dyn EntityHandler, entity: &Entity) -> Self {
        let mut plan = Self::default();
        if let Some(parent) = &entity.parent {
            plan.push(incoming(RelationKind::Contains, None, vec![parent.clone()]));
        }
        if let Some(owner) = &entity.owner {
            plan.push(incoming(RelationKind::Owns, None, vec![owner.clone()]));
        }
        if let Some(domain) = &entity.domain {
            plan.push(incoming(RelationKind::Has, Some(entity_types::DOMAIN), vec![domain.clone()]));
        }
        if !entity.data_products.is_empty() {
            plan.push(incoming(
                RelationKind::Has,
                Some(entity_types::DATA_PRODUCT),
                entity.data_products.clone(),
            ));
        }
        if !entity.reviewers.is_empty() {
            plan.push(incoming(RelationKind::Reviews, None, entity.reviewers.clone()));
        }
        if !entity.experts.is_empty() {
            plan.push(outgoing(RelationKind::Expert, Some(entity_types::USER), entity.experts.clone()));
        }
        if let Some(kind) = handler.children_relationship() {
            if !entity.children.is_empty() {
                plan.push(outgoing(kind, Some(entity.entity_type.as_str()), entity.children.clone()));
            }
        }
        if handler.supports_related_terms() && !entity.related_terms.is_empty() {
            plan.push(SyncAction::ReplaceSymmetric {
                kind: RelationKind::RelatedTo,
                peer_type: entity_types::GLOSSARY_TERM.to_string(),
                refs: entity.related_terms.clone(),
            });
        }
        if !entity.tags.is_empty() {
            plan.push(SyncAction::ReplaceTags {
                target_fqn: entity.fully_qualified_name.clone(),
                labels: entity.tags.clone(),
            });
        }
        if entity.extension.is_some() {
            plan.push(SyncAction::ReplaceExtension {
                values: entity.extension.clone(),
            });
        }
        plan
    }
}

fn incoming(kind: RelationKind, from_type: Option<&str>, refs: Vec<EntityReference>) -> SyncAction {
    SyncAction::ReplaceIncoming {
        kind,
        from_type: from_type.map(str::to_string),
        refs,
    }
}

fn outgoing(kind: RelationKind, to_type: Option<&str>, refs: Vec<EntityReference>) -> SyncAction {
    SyncAction::ReplaceOutgoing {
        kind,
        to_type: to_type.map(str::to_string),
        refs,
    }
}

/// State handed to [`EntityHandler::entity_specific_update`]
pub struct UpdateContext<'a> {
    pub original: &'a Entity,
    pub updated: &'a Entity,
    pub operation: Operation,
    pub recorder: &'a mut ChangeRecorder,
    pub plan: &'a mut SyncPlan,
}

/// Cache key of an entity written by an operation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Touched {
    pub entity_type: String,
    pub id: EntityId,
    pub fqn: String,
}

impl Touched {
    pub fn new(entity: &Entity) -> Self {
        Self {
            entity_type: entity.entity_type.clone(),
            id: entity.id,
            fqn: entity.fully_qualified_name.clone(),
        }
    }
}

/// Result of an update
#[derive(Debug, Clone)]
pub struct UpdateOutcome {
    /// The entity as stored, with the relationship fields of the target
    pub entity: Entity,
    pub event_type: EventType,
    /// Set unless nothing changed
    pub event: Option<ChangeEvent>,
    /// Cache entries to drop after commit
    pub touched: Vec<Touched>,
}

/// Applies one update inside a write transaction
pub struct EntityUpdater<'a> {
    handler: &'a dyn EntityHandler,
    session_timeout: chrono::Duration,
}

impl<'a> EntityUpdater<'a> {
    pub fn new(handler: &'a dyn EntityHandler, config: &RepositoryConfig) -> Self {
        Self {
            handler,
            session_timeout: config.session_timeout(),
        }
    }

    /// Diff `updated` against `original` and persist the result
    ///
    /// `original` must be hydrated with every field. References in `updated`
    /// must already be resolved.
    pub fn update(
        &self,
        tx: &mut dyn WriteTransaction,
        original: &Entity,
        mut updated: Entity,
        operation: Operation,
        actor: &str,
    ) -> Result<UpdateOutcome> {
        self.check_protected_fields(original, &updated, operation)?;

        updated.version = original.version;
        updated.provider = original.provider;
        updated.parent = original.parent.clone();
        updated.followers = original.followers.clone();
        updated.updated_by = actor.to_string();
        updated.updated_at = Utc::now();
        updated.change_description = None;
        if operation == Operation::Put {
            apply_put_semantics(original, &mut updated);
        }
        if updated.name == original.name {
            updated.fully_qualified_name = original.fully_qualified_name.clone();
        } else {
            self.handler.set_fully_qualified_name(&mut updated)?;
        }
        TagLabel::sort(&mut updated.tags);

        let previous = if self.should_consolidate(original, &updated, operation, actor) {
            self.load_previous(tx.as_read(), original)?
        } else {
            None
        };

        let mut plan = SyncPlan::default();
        let (recorder, changed) = match &previous {
            Some(previous) => {
                tracing::debug!(
                    fqn = %original.fully_qualified_name,
                    previous = %previous.version,
                    "Consolidating session changes"
                );
                let mut recorder = ChangeRecorder::new(previous.version, true);
                self.compare(previous, &updated, operation, &mut recorder, &mut SyncPlan::default())?;
                let mut silent = ChangeRecorder::new(original.version, false);
                self.compare(original, &updated, operation, &mut silent, &mut plan)?;
                (recorder, silent.is_changed())
            }
            None => {
                let mut recorder = ChangeRecorder::new(original.version, true);
                self.compare(original, &updated, operation, &mut recorder, &mut plan)?;
                let changed = recorder.is_changed();
                (recorder, changed)
            }
        };

        let baseline = previous.as_ref().unwrap_or(original);
        let entity_type = original.entity_type.as_str();
        if recorder.is_changed() {
            updated.version = recorder.next_version(baseline.version);
            updated.change_description = Some(recorder.into_change_description());
            tx.put_extension(
                &original.id,
                &version_key(entity_type, baseline.version),
                &serde_json::to_value(baseline)?,
            )?;
            tracing::debug!(
                fqn = %updated.fully_qualified_name,
                from = %baseline.version,
                to = %updated.version,
                "Version bumped"
            );
        } else if changed {
            // Only reachable when consolidating: the session's edits cancel out
            let Some(previous) = previous.as_ref() else {
                return Err(Error::Internal("Undo without a previous version".to_string()));
            };
            updated.version = previous.version;
            updated.change_description = previous.change_description.clone();
            updated.updated_by = previous.updated_by.clone();
            updated.updated_at = previous.updated_at;
            tx.delete_extension(&original.id, &version_key(entity_type, previous.version))?;
            tracing::debug!(
                fqn = %updated.fully_qualified_name,
                version = %previous.version,
                "Session edits reverted, restored previous version"
            );
        } else {
            tracing::debug!(fqn = %original.fully_qualified_name, "No change");
            return Ok(UpdateOutcome {
                entity: original.clone(),
                event_type: EventType::EntityNoChange,
                event: None,
                touched: Vec::new(),
            });
        }

        let mut touched = vec![Touched::new(original)];
        if updated.fully_qualified_name != original.fully_qualified_name {
            touched.push(Touched::new(&updated));
        }
        apply_plan(tx, self.handler, &updated, &plan, &mut touched)?;
        store_snapshot(tx, self.handler, &updated, false)?;

        let event_type = match (original.deleted, updated.deleted) {
            (false, true) => EventType::EntitySoftDeleted,
            (true, false) => EventType::EntityRestored,
            _ => EventType::EntityUpdated,
        };
        let event = ChangeEvent::for_entity(&updated, event_type, original.version);
        Ok(UpdateOutcome {
            entity: updated,
            event_type,
            event: Some(event),
            touched,
        })
    }

    fn check_protected_fields(&self, original: &Entity, updated: &Entity, operation: Operation) -> Result<()> {
        let entity_type = original.entity_type.as_str();
        if updated.id != original.id {
            return Err(Error::read_only_attribute(entity_type, "id"));
        }
        if updated.entity_type != original.entity_type {
            return Err(Error::read_only_attribute(entity_type, "entityType"));
        }
        if operation != Operation::SoftDelete && updated.deleted && !original.deleted {
            return Err(Error::read_only_attribute(entity_type, "deleted"));
        }
        if updated.name != original.name {
            if original.provider == ProviderType::System {
                return Err(Error::PermissionDenied(format!(
                    "System entity {} can't be renamed",
                    original.fully_qualified_name
                )));
            }
            if !self.handler.rename_allowed() {
                return Err(Error::invalid(format!(
                    "Entity type {} can't be renamed",
                    entity_type
                )));
            }
        }
        Ok(())
    }

    fn should_consolidate(&self, original: &Entity, updated: &Entity, operation: Operation, actor: &str) -> bool {
        operation == Operation::Patch
            && original.version > EntityVersion::INITIAL
            && original.change_description.is_some()
            && !original.deleted
            && original.updated_by == actor
            && updated.updated_at.signed_duration_since(original.updated_at) <= self.session_timeout
    }

    /// History snapshot the current session started from
    fn load_previous(&self, tx: &dyn ReadTransaction, original: &Entity) -> Result<Option<Entity>> {
        let Some(change) = &original.change_description else {
            return Ok(None);
        };
        let key = version_key(&original.entity_type, change.previous_version);
        match tx.get_extension(&original.id, &key)? {
            Some(value) => Ok(Some(serde_json::from_value(value)?)),
            None => {
                tracing::warn!(
                    fqn = %original.fully_qualified_name,
                    version = %change.previous_version,
                    "Version history record missing, not consolidating"
                );
                Ok(None)
            }
        }
    }

    /// One diff pass from `from` to `to`
    fn compare(
        &self,
        from: &Entity,
        to: &Entity,
        operation: Operation,
        recorder: &mut ChangeRecorder,
        plan: &mut SyncPlan,
    ) -> Result<()> {
        recorder.record_change("deleted", Some(&from.deleted), Some(&to.deleted))?;
        recorder.record_change("description", from.description.as_ref(), to.description.as_ref())?;
        recorder.record_change("displayName", from.display_name.as_ref(), to.display_name.as_ref())?;

        if recorder.record_change_with(
            field_names::OWNER,
            from.owner.as_ref(),
            to.owner.as_ref(),
            EntityReference::same_entity,
        )? {
            plan.push(incoming(RelationKind::Owns, None, to.owner.iter().cloned().collect()));
        }

        self.compare_extension(from, to, recorder, plan)?;

        let tags = recorder.record_list_change(
            field_names::TAGS,
            &from.tags,
            &to.tags,
            TagLabel::same_tag,
            |a, b| a == b,
        )?;
        if tags.has_changes() {
            plan.push(SyncAction::ReplaceTags {
                target_fqn: to.fully_qualified_name.clone(),
                labels: to.tags.clone(),
            });
        }

        if recorder.record_change_with(
            field_names::DOMAIN,
            from.domain.as_ref(),
            to.domain.as_ref(),
            EntityReference::same_entity,
        )? {
            plan.push(incoming(
                RelationKind::Has,
                Some(entity_types::DOMAIN),
                to.domain.iter().cloned().collect(),
            ));
        }

        if self.compare_refs(field_names::DATA_PRODUCTS, &from.data_products, &to.data_products, recorder)? {
            plan.push(incoming(
                RelationKind::Has,
                Some(entity_types::DATA_PRODUCT),
                to.data_products.clone(),
            ));
        }
        if self.compare_refs(field_names::EXPERTS, &from.experts, &to.experts, recorder)? {
            plan.push(outgoing(RelationKind::Expert, Some(entity_types::USER), to.experts.clone()));
        }
        if self.compare_refs(field_names::REVIEWERS, &from.reviewers, &to.reviewers, recorder)? {
            plan.push(incoming(RelationKind::Reviews, None, to.reviewers.clone()));
        }

        if let Some(kind) = self.handler.children_relationship() {
            let children = recorder.record_list_change(
                field_names::CHILDREN,
                &from.children,
                &to.children,
                EntityReference::same_entity,
                EntityReference::same_entity,
            )?;
            if !children.deleted.is_empty() {
                recorder.mark_major();
            }
            if children.has_changes() {
                plan.push(outgoing(kind, Some(to.entity_type.as_str()), to.children.clone()));
            }
        }

        if self.handler.supports_related_terms()
            && self.compare_refs(field_names::RELATED_TERMS, &from.related_terms, &to.related_terms, recorder)?
        {
            plan.push(SyncAction::ReplaceSymmetric {
                kind: RelationKind::RelatedTo,
                peer_type: entity_types::GLOSSARY_TERM.to_string(),
                refs: to.related_terms.clone(),
            });
        }

        if recorder.record_change("name", Some(&from.name), Some(&to.name))? {
            plan.push(SyncAction::Rename {
                old_fqn: from.fully_qualified_name.clone(),
                new_fqn: to.fully_qualified_name.clone(),
            });
        }

        self.handler.entity_specific_update(&mut UpdateContext {
            original: from,
            updated: to,
            operation,
            recorder,
            plan,
        })
    }

    fn compare_refs(
        &self,
        field: &str,
        from: &[EntityReference],
        to: &[EntityReference],
        recorder: &mut ChangeRecorder,
    ) -> Result<bool> {
        let diff = recorder.record_list_change(
            field,
            from,
            to,
            EntityReference::same_entity,
            EntityReference::same_entity,
        )?;
        Ok(diff.has_changes())
    }

    fn compare_extension(
        &self,
        from: &Entity,
        to: &Entity,
        recorder: &mut ChangeRecorder,
        plan: &mut SyncPlan,
    ) -> Result<()> {
        let empty = Map::new();
        let before = from.extension.as_ref().unwrap_or(&empty);
        let after = to.extension.as_ref().unwrap_or(&empty);
        let mut names: Vec<&String> = before.keys().chain(after.keys()).collect();
        names.sort();
        names.dedup();

        let mut changed = false;
        for name in names {
            let field = format!("{}.{}", field_names::EXTENSION, name);
            changed |= recorder.record_change(&field, before.get(name), after.get(name))?;
        }
        if changed {
            plan.push(SyncAction::ReplaceExtension {
                values: to.extension.clone(),
            });
        }
        Ok(())
    }
}

/// Replace semantics: fields a full replacement leaves out keep their stored value
fn apply_put_semantics(original: &Entity, updated: &mut Entity) {
    if updated.owner.is_none() {
        updated.owner = original.owner.clone();
    }
    if updated.domain.is_none() {
        updated.domain = original.domain.clone();
    }
    if updated.extension.is_none() {
        updated.extension = original.extension.clone();
    }
    TagLabel::merge(&mut updated.tags, &original.tags);
    for (target, stored) in [
        (&mut updated.data_products, &original.data_products),
        (&mut updated.reviewers, &original.reviewers),
        (&mut updated.experts, &original.experts),
        (&mut updated.children, &original.children),
        (&mut updated.related_terms, &original.related_terms),
    ] {
        if target.is_empty() {
            target.clone_from(stored);
        }
    }
}

/// Write the snapshot of `entity`, inserting it when `create` is set
pub(crate) fn store_snapshot(
    tx: &mut dyn WriteTransaction,
    handler: &dyn EntityHandler,
    entity: &Entity,
    create: bool,
) -> Result<()> {
    let mut snapshot = entity.to_snapshot();
    handler.strip_derived_fields(&mut snapshot)?;
    if create {
        tx.insert_entity(&snapshot)?;
    } else {
        tx.update_entity(&snapshot)?;
    }
    Ok(())
}

/// Apply a sync plan for `entity`; renames run first so later writes see the new fqn
pub(crate) fn apply_plan(
    tx: &mut dyn WriteTransaction,
    handler: &dyn EntityHandler,
    entity: &Entity,
    plan: &SyncPlan,
    touched: &mut Vec<Touched>,
) -> Result<()> {
    let (renames, rest): (Vec<&SyncAction>, Vec<&SyncAction>) = plan
        .actions()
        .iter()
        .partition(|a| matches!(a, SyncAction::Rename { .. }));

    for action in renames.into_iter().chain(rest) {
        match action {
            SyncAction::Rename { old_fqn, new_fqn } => {
                tracing::info!(
                    entity_type = %entity.entity_type,
                    from = %old_fqn,
                    to = %new_fqn,
                    "Renaming entity"
                );
                rename_descendants(tx, &entity.id, old_fqn, new_fqn, touched)?;
                tx.rename_target_prefix(&entity.entity_type, old_fqn, new_fqn)?;
                if let Some(source) = handler.tag_source() {
                    tx.rename_tag_prefix(source, old_fqn, new_fqn)?;
                }
            }
            SyncAction::ReplaceIncoming { kind, from_type, refs } => {
                tx.delete_to(&entity.id, *kind, from_type.as_deref())?;
                for reference in sorted(refs) {
                    tx.insert_relationship(&Relationship::new(
                        reference.id,
                        &reference.entity_type,
                        entity.id,
                        &entity.entity_type,
                        *kind,
                    ))?;
                }
            }
            SyncAction::ReplaceOutgoing { kind, to_type, refs } => {
                tx.delete_from(&entity.id, *kind, to_type.as_deref())?;
                for reference in sorted(refs) {
                    tx.insert_relationship(&Relationship::new(
                        entity.id,
                        &entity.entity_type,
                        reference.id,
                        &reference.entity_type,
                        *kind,
                    ))?;
                }
            }
            SyncAction::ReplaceSymmetric { kind, peer_type, refs } => {
                tx.delete_from(&entity.id, *kind, Some(peer_type.as_str()))?;
                tx.delete_to(&entity.id, *kind, Some(peer_type.as_str()))?;
                for reference in sorted(refs) {
                    let edge = Relationship::new(
                        entity.id,
                        &entity.entity_type,
                        reference.id,
                        &reference.entity_type,
                        *kind,
                    );
                    tx.insert_relationship(&edge.canonical())?;
                }
            }
            SyncAction::ReplaceTags { target_fqn, labels } => {
                tx.delete_tags_by_target(&entity.entity_type, target_fqn)?;
                apply_tags(tx, labels, &entity.entity_type, target_fqn)?;
            }
            SyncAction::ReplaceExtension { values } => {
                let prefix = extension_prefix(&entity.entity_type);
                for (key, _) in tx.list_extensions(&entity.id, &prefix)? {
                    tx.delete_extension(&entity.id, &key)?;
                }
                for (name, value) in values.iter().flatten() {
                    tx.put_extension(&entity.id, &extension_key(&entity.entity_type, name), value)?;
                }
            }
        }
    }
    Ok(())
}

/// Record tag usages for `target_fqn` owned by a `target_type` entity; derived labels are
/// computed on read and never stored
pub(crate) fn apply_tags(
    tx: &mut dyn WriteTransaction,
    labels: &[TagLabel],
    target_type: &str,
    target_fqn: &str,
) -> Result<()> {
    let mut labels = labels.to_vec();
    TagLabel::sort(&mut labels);
    for label in labels
        .iter()
        .filter(|l| l.label_type != metacat_core::LabelType::Derived)
    {
        tx.apply_tag(&TagUsage::new(label, target_type, target_fqn))?;
    }
    Ok(())
}

fn sorted(refs: &[EntityReference]) -> Vec<EntityReference> {
    let mut refs = refs.to_vec();
    EntityReference::sort(&mut refs);
    refs
}

/// Rewrite the fqn of every entity reachable over CONTAINS edges
fn rename_descendants(
    tx: &mut dyn WriteTransaction,
    parent: &EntityId,
    old_prefix: &str,
    new_prefix: &str,
    touched: &mut Vec<Touched>,
) -> Result<()> {
    for edge in tx.find_to(parent, RelationKind::Contains, None)? {
        let Some(mut child) = tx.get_entity(&edge.to_id)? else {
            tracing::warn!(parent = %parent, child = %edge.to_id, "Contains edge to missing entity");
            continue;
        };
        if let Some(new_fqn) = fqn::replace_prefix(&child.fully_qualified_name, old_prefix, new_prefix) {
            touched.push(Touched::new(&child));
            tx.rename_target_prefix(&child.entity_type, &child.fully_qualified_name, &new_fqn)?;
            child.fully_qualified_name = new_fqn;
            tx.update_entity(&child)?;
            touched.push(Touched::new(&child));
        }
        rename_descendants(tx, &child.id, old_prefix, new_prefix, touched)?;
    }
    Ok(())
}
