//! Classification tags

use metacat_core::{entity_types, Entity, Error, Result, TagSource};
use metacat_storage::ReadTransaction;

use crate::handler::{check_container, EntityHandler};

/// Attribute set on a classification to stop new tags being added to it
pub const DISABLED: &str = "disabled";

/// Tags live under a classification, possibly nested under another tag
pub struct TagHandler;

impl EntityHandler for TagHandler {
    fn entity_type(&self) -> &str {
        entity_types::TAG
    }

    fn prepare(&self, entity: &mut Entity, tx: &dyn ReadTransaction, update: bool) -> Result<()> {
        check_container(entity, self.container_types())?;
        if update {
            return Ok(());
        }
        let Some(parent) = &entity.parent else {
            return Ok(());
        };
        if parent.entity_type != entity_types::CLASSIFICATION {
            return Ok(());
        }
        let disabled = tx
            .get_entity(&parent.id)?
            .map(|c| c.attribute::<bool>(DISABLED))
            .transpose()?
            .flatten()
            .unwrap_or(false);
        if disabled {
            return Err(Error::invalid(format!(
                "Classification {} is disabled",
                parent.fully_qualified_name
            )));
        }
        Ok(())
    }

    fn rename_allowed(&self) -> bool {
        true
    }

    fn container_types(&self) -> &[&'static str] {
        &[entity_types::CLASSIFICATION, entity_types::TAG]
    }

    fn tag_source(&self) -> Option<TagSource> {
        Some(TagSource::Classification)
    }
}
