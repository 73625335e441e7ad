//! Resolution of incoming references and tag labels against the store

use std::collections::BTreeMap;

use metacat_core::{
    entity_types, fqn, Entity, EntityReference, Error, Result, TagLabel, TagSource,
};
use metacat_storage::ReadTransaction;

/// Replace a caller supplied reference with the stored entity's reference
pub(crate) fn resolve_reference(
    tx: &dyn ReadTransaction,
    reference: &EntityReference,
) -> Result<EntityReference> {
    tx.get_entity(&reference.id)?
        .filter(|e| e.entity_type == reference.entity_type)
        .map(|e| e.to_reference())
        .ok_or_else(|| Error::not_found(&reference.entity_type, reference.id))
}

fn resolve_one(
    tx: &dyn ReadTransaction,
    field: &str,
    reference: &EntityReference,
    allowed: &[&str],
) -> Result<EntityReference> {
    if !allowed.contains(&reference.entity_type.as_str()) {
        return Err(Error::invalid(format!(
            "Invalid {} type {}, expected {}",
            field,
            reference.entity_type,
            allowed.join(" or ")
        )));
    }
    resolve_reference(tx, reference)
}

fn resolve_list(
    tx: &dyn ReadTransaction,
    field: &str,
    refs: &mut Vec<EntityReference>,
    allowed: &[&str],
) -> Result<()> {
    let mut resolved = refs
        .iter()
        .map(|r| resolve_one(tx, field, r, allowed))
        .collect::<Result<Vec<_>>>()?;
    EntityReference::sort(&mut resolved);
    resolved.dedup_by(|a, b| a.id == b.id);
    *refs = resolved;
    Ok(())
}

/// Resolve every reference held by an incoming entity
///
/// Each reference must point at an existing entity of an acceptable type; the
/// stored name, fqn and display name replace whatever the caller sent.
pub(crate) fn resolve_references(tx: &dyn ReadTransaction, entity: &mut Entity) -> Result<()> {
    use entity_types::*;

    if let Some(parent) = &entity.parent {
        entity.parent = Some(resolve_reference(tx, parent)?);
    }
    if let Some(owner) = &entity.owner {
        entity.owner = Some(resolve_one(tx, "owner", owner, &[USER, TEAM])?);
    }
    if let Some(domain) = &entity.domain {
        entity.domain = Some(resolve_one(tx, "domain", domain, &[DOMAIN])?);
    }
    resolve_list(tx, "dataProducts", &mut entity.data_products, &[DATA_PRODUCT])?;
    resolve_list(tx, "reviewers", &mut entity.reviewers, &[USER, TEAM])?;
    resolve_list(tx, "experts", &mut entity.experts, &[USER])?;
    resolve_list(tx, "relatedTerms", &mut entity.related_terms, &[GLOSSARY_TERM])?;
    if entity
        .related_terms
        .iter()
        .any(|r| r.id == entity.id)
    {
        return Err(Error::invalid("A glossary term can't be related to itself"));
    }
    let child_type = entity.entity_type.clone();
    resolve_list(tx, "children", &mut entity.children, &[child_type.as_str()])?;
    if entity.children.iter().any(|r| r.id == entity.id) {
        return Err(Error::invalid(format!(
            "{} can't be its own child",
            entity.fully_qualified_name
        )));
    }
    Ok(())
}

/// Sort and deduplicate labels, then check each one against the store
///
/// Classification tags must exist as `tag` entities and glossary labels as
/// `glossaryTerm` entities, neither soft-deleted. At most one tag of a mutually
/// exclusive classification may be applied.
pub fn validate_tags(tx: &dyn ReadTransaction, labels: &mut Vec<TagLabel>) -> Result<()> {
    TagLabel::sort(labels);
    labels.dedup_by(|a, b| TagLabel::same_tag(a, b));

    let mut by_classification: BTreeMap<String, &str> = BTreeMap::new();
    for label in labels.iter() {
        let tag_type = match label.source {
            TagSource::Classification => entity_types::TAG,
            TagSource::Glossary => entity_types::GLOSSARY_TERM,
        };
        let tag = tx
            .get_entity_by_name(tag_type, &label.tag_fqn)?
            .ok_or_else(|| Error::not_found(tag_type, &label.tag_fqn))?;
        if tag.deleted {
            return Err(Error::invalid(format!("Tag {} is deleted", label.tag_fqn)));
        }
        if label.source != TagSource::Classification {
            continue;
        }

        let Some(root) = fqn::split(&label.tag_fqn).into_iter().next() else {
            continue;
        };
        let root = fqn::quote_name(&root)?;
        let exclusive = tx
            .get_entity_by_name(entity_types::CLASSIFICATION, &root)?
            .map(|c| c.attribute::<bool>("mutuallyExclusive"))
            .transpose()?
            .flatten()
            .unwrap_or(false);
        if exclusive {
            if let Some(other) = by_classification.insert(root, &label.tag_fqn) {
                return Err(Error::invalid(format!(
                    "Tag labels {} and {} are mutually exclusive and can't be assigned together",
                    other, label.tag_fqn
                )));
            }
        }
    }
    metacat_core::limits::validate_tag_count(labels.len())?;
    Ok(())
}
