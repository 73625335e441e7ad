//! Building relationship-derived fields on read

use metacat_core::query::field_names;
use metacat_core::{
    entity_types, Entity, EntityId, EntityReference, Error, Fields, Include, RelationKind,
    Relationship, Result, TagLabel,
};
use metacat_storage::ReadTransaction;
use serde_json::Map;

use crate::custom_property::extension_prefix;
use crate::handler::{EntityHandler, TypeRegistry};

/// Load an entity by id and hydrate `fields`
pub(crate) fn load_entity(
    tx: &dyn ReadTransaction,
    registry: &TypeRegistry,
    entity_type: &str,
    id: &EntityId,
    fields: &Fields,
    include: Include,
) -> Result<Entity> {
    let mut entity = tx
        .get_entity(id)?
        .filter(|e| e.entity_type == entity_type && include.admits(e.deleted))
        .ok_or_else(|| Error::not_found(entity_type, id))?;
    hydrate(tx, registry.handler(entity_type)?.as_ref(), &mut entity, fields)?;
    Ok(entity)
}

/// Load an entity by fqn and hydrate `fields`
pub(crate) fn load_entity_by_name(
    tx: &dyn ReadTransaction,
    registry: &TypeRegistry,
    entity_type: &str,
    fqn: &str,
    fields: &Fields,
    include: Include,
) -> Result<Entity> {
    let mut entity = tx
        .get_entity_by_name(entity_type, fqn)?
        .filter(|e| include.admits(e.deleted))
        .ok_or_else(|| Error::not_found(entity_type, fqn))?;
    hydrate(tx, registry.handler(entity_type)?.as_ref(), &mut entity, fields)?;
    Ok(entity)
}

/// Fill the requested relationship-derived fields of a snapshot
pub(crate) fn hydrate(
    tx: &dyn ReadTransaction,
    handler: &dyn EntityHandler,
    entity: &mut Entity,
    fields: &Fields,
) -> Result<()> {
    let id = entity.id;

    if fields.contains(field_names::PARENT) {
        let edges = tx.find_from(&id, RelationKind::Contains, None)?;
        entity.parent = match ensure_single_relationship(entity, RelationKind::Contains, edges) {
            Some(edge) => reference(tx, &edge.from_id)?,
            None if !handler.container_types().is_empty() => {
                return Err(Error::not_found(
                    format!("{} container", entity.entity_type),
                    &entity.fully_qualified_name,
                ));
            }
            None => None,
        };
    }
    if fields.contains(field_names::OWNER) {
        let edges = tx.find_from(&id, RelationKind::Owns, None)?;
        entity.owner = match ensure_single_relationship(entity, RelationKind::Owns, edges) {
            Some(edge) => reference(tx, &edge.from_id)?,
            None => None,
        };
    }
    if fields.contains(field_names::DOMAIN) {
        let edges = tx.find_from(&id, RelationKind::Has, Some(entity_types::DOMAIN))?;
        entity.domain = match ensure_single_relationship(entity, RelationKind::Has, edges) {
            Some(edge) => reference(tx, &edge.from_id)?,
            None => None,
        };
    }
    if fields.contains(field_names::TAGS) {
        let mut tags: Vec<TagLabel> = tx
            .get_tags(&entity.entity_type, &entity.fully_qualified_name)?
            .iter()
            .map(|usage| usage.to_label())
            .collect();
        TagLabel::sort(&mut tags);
        entity.tags = tags;
    }
    if fields.contains(field_names::DATA_PRODUCTS) {
        let edges = tx.find_from(&id, RelationKind::Has, Some(entity_types::DATA_PRODUCT))?;
        entity.data_products = sources(tx, &edges)?;
    }
    if fields.contains(field_names::REVIEWERS) {
        entity.reviewers = sources(tx, &tx.find_from(&id, RelationKind::Reviews, None)?)?;
    }
    if fields.contains(field_names::EXPERTS) {
        let edges = tx.find_to(&id, RelationKind::Expert, Some(entity_types::USER))?;
        entity.experts = targets(tx, &edges)?;
    }
    if let Some(kind) = handler.children_relationship() {
        if fields.contains(field_names::CHILDREN) {
            entity.children = targets(tx, &tx.find_to(&id, kind, None)?)?;
        }
    }
    if fields.contains(field_names::RELATED_TERMS) && handler.supports_related_terms() {
        let peer = Some(entity_types::GLOSSARY_TERM);
        let mut related = targets(tx, &tx.find_to(&id, RelationKind::RelatedTo, peer)?)?;
        related.extend(sources(tx, &tx.find_from(&id, RelationKind::RelatedTo, peer)?)?);
        EntityReference::sort(&mut related);
        entity.related_terms = related;
    }
    if fields.contains(field_names::FOLLOWERS) {
        entity.followers = sources(tx, &tx.find_from(&id, RelationKind::Follows, None)?)?;
    }
    if fields.contains(field_names::EXTENSION) {
        let prefix = extension_prefix(&entity.entity_type);
        let values: Map<_, _> = tx
            .list_extensions(&id, &prefix)?
            .into_iter()
            .map(|(key, value)| (key[prefix.len()..].to_string(), value))
            .collect();
        entity.extension = (!values.is_empty()).then_some(values);
    }

    handler.hydrate(entity, tx, fields)
}

/// Pick the edge of a single-valued relationship
///
/// More than one edge is a data integrity problem: it is logged and the edge
/// with the smallest source id wins.
pub fn ensure_single_relationship(
    entity: &Entity,
    kind: RelationKind,
    mut edges: Vec<Relationship>,
) -> Option<Relationship> {
    if edges.len() > 1 {
        tracing::warn!(
            entity_type = %entity.entity_type,
            fqn = %entity.fully_qualified_name,
            kind = %kind,
            count = edges.len(),
            "Possible database issue: multiple relationships where one is expected"
        );
        edges.sort_by(|a, b| a.from_id.cmp(&b.from_id));
    }
    edges.into_iter().next()
}

/// Reference to a stored entity; a dangling edge is logged and skipped
fn reference(tx: &dyn ReadTransaction, id: &EntityId) -> Result<Option<EntityReference>> {
    match tx.get_entity(id)? {
        Some(entity) => Ok(Some(entity.to_reference())),
        None => {
            tracing::warn!(id = %id, "Relationship points at a missing entity");
            Ok(None)
        }
    }
}

fn references(tx: &dyn ReadTransaction, ids: impl Iterator<Item = EntityId>) -> Result<Vec<EntityReference>> {
    let mut refs = Vec::new();
    for id in ids {
        if let Some(reference) = reference(tx, &id)? {
            refs.push(reference);
        }
    }
    EntityReference::sort(&mut refs);
    Ok(refs)
}

fn sources(tx: &dyn ReadTransaction, edges: &[Relationship]) -> Result<Vec<EntityReference>> {
    references(tx, edges.iter().map(|e| e.from_id))
}

fn targets(tx: &dyn ReadTransaction, edges: &[Relationship]) -> Result<Vec<EntityReference>> {
    references(tx, edges.iter().map(|e| e.to_id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use metacat_storage::{MemoryStorage, StorageBackend};

    #[test]
    fn test_ensure_single_relationship_is_deterministic() {
        let entity = Entity::new("table", "orders");
        let first = Relationship::new(EntityId::new(), "user", entity.id, "table", RelationKind::Owns);
        let second = Relationship::new(EntityId::new(), "user", entity.id, "table", RelationKind::Owns);
        let expected = std::cmp::min(first.from_id, second.from_id);

        let picked = ensure_single_relationship(
            &entity,
            RelationKind::Owns,
            vec![second.clone(), first.clone()],
        )
        .unwrap();
        assert_eq!(picked.from_id, expected);
        assert!(ensure_single_relationship(&entity, RelationKind::Owns, vec![]).is_none());
    }

    #[test]
    fn test_hydrate_selected_fields() {
        let storage = MemoryStorage::new();
        let registry = TypeRegistry::with_builtin_types();
        let alice = Entity::new("user", "alice");
        let mut board = Entity::new("dashboard", "sales");
        board.fully_qualified_name = "sales".into();

        let mut tx = storage.begin_write().unwrap();
        tx.insert_entity(&alice).unwrap();
        tx.insert_entity(&board).unwrap();
        tx.insert_relationship(&Relationship::new(
            alice.id,
            "user",
            board.id,
            "dashboard",
            RelationKind::Owns,
        ))
        .unwrap();
        tx.insert_relationship(&Relationship::new(
            alice.id,
            "user",
            board.id,
            "dashboard",
            RelationKind::Follows,
        ))
        .unwrap();
        tx.put_extension(&board.id, "dashboard.extension.steward", &serde_json::json!("bi"))
            .unwrap();
        tx.commit().unwrap();

        let read = storage.begin_read().unwrap();
        let bare = load_entity(read.as_ref(), &registry, "dashboard", &board.id, &Fields::none(), Include::All)
            .unwrap();
        assert!(bare.owner.is_none());
        assert!(bare.extension.is_none());

        let full = load_entity(read.as_ref(), &registry, "dashboard", &board.id, &Fields::all(), Include::All)
            .unwrap();
        assert_eq!(full.owner.as_ref().unwrap().id, alice.id);
        assert_eq!(full.followers.len(), 1);
        assert_eq!(full.extension.unwrap()["steward"], "bi");

        let wrong_type = load_entity(read.as_ref(), &registry, "table", &board.id, &Fields::none(), Include::All);
        assert!(wrong_type.unwrap_err().is_not_found());
    }
}
