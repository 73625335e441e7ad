//! Glossary terms

use metacat_core::{entity_types, Entity, Result, TagSource};
use metacat_storage::ReadTransaction;

use crate::handler::{check_container, record_attribute_changes, EntityHandler};
use crate::updater::UpdateContext;

pub const SYNONYMS: &str = "synonyms";

/// Terms live in a glossary or under a parent term and may relate to each other
pub struct GlossaryTermHandler;

fn synonyms(entity: &Entity) -> Result<Vec<String>> {
    Ok(entity.attribute::<Vec<String>>(SYNONYMS)?.unwrap_or_default())
}

impl EntityHandler for GlossaryTermHandler {
    fn entity_type(&self) -> &str {
        entity_types::GLOSSARY_TERM
    }

    fn prepare(&self, entity: &mut Entity, _tx: &dyn ReadTransaction, _update: bool) -> Result<()> {
        check_container(entity, self.container_types())?;
        if !entity.attributes.contains_key(SYNONYMS) {
            return Ok(());
        }
        let mut words: Vec<String> = synonyms(entity)?
            .into_iter()
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect();
        words.sort();
        words.dedup();
        entity.set_attribute(SYNONYMS, &words)
    }

    fn entity_specific_update(&self, ctx: &mut UpdateContext<'_>) -> Result<()> {
        let stored = synonyms(ctx.original)?;
        let updated = synonyms(ctx.updated)?;
        ctx.recorder
            .record_list_change(SYNONYMS, &stored, &updated, |a, b| a == b, |a, b| a == b)?;
        record_attribute_changes(ctx, &[SYNONYMS])
    }

    fn rename_allowed(&self) -> bool {
        true
    }

    fn container_types(&self) -> &[&'static str] {
        &[entity_types::GLOSSARY, entity_types::GLOSSARY_TERM]
    }

    fn supports_related_terms(&self) -> bool {
        true
    }

    fn tag_source(&self) -> Option<TagSource> {
        Some(TagSource::Glossary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::updater::{Operation, SyncPlan};
    use metacat_core::{ChangeRecorder, EntityVersion};
    use metacat_storage::{MemoryStorage, StorageBackend};
    use serde_json::json;

    #[test]
    fn test_synonyms_are_normalized() {
        let storage = MemoryStorage::new();
        let read = storage.begin_read().unwrap();
        let glossary = Entity::new("glossary", "Business");
        let mut term = Entity::new("glossaryTerm", "Revenue")
            .with_parent(glossary.to_reference())
            .with_attribute(SYNONYMS, json!([" income", "sales", "income", ""]));
        GlossaryTermHandler.prepare(&mut term, read.as_ref(), false).unwrap();
        assert_eq!(synonyms(&term).unwrap(), vec!["income", "sales"]);
    }

    #[test]
    fn test_synonym_changes_are_list_changes() {
        let original = Entity::new("glossaryTerm", "Revenue")
            .with_attribute(SYNONYMS, json!(["income"]))
            .with_attribute("status", json!("Draft"));
        let mut updated = original.clone();
        updated.set_attribute(SYNONYMS, &vec!["income", "turnover"]).unwrap();
        updated.attributes.insert("status".into(), json!("Approved"));

        let mut recorder = ChangeRecorder::new(EntityVersion::INITIAL, true);
        GlossaryTermHandler
            .entity_specific_update(&mut UpdateContext {
                original: &original,
                updated: &updated,
                operation: Operation::Patch,
                recorder: &mut recorder,
                plan: &mut SyncPlan::default(),
            })
            .unwrap();
        let change = recorder.change_description();
        assert_eq!(change.fields_added[0].name, "synonyms");
        assert_eq!(change.fields_added[0].new_value, Some(json!(["turnover"])));
        assert_eq!(change.fields_updated[0].name, "status");
    }
}
