//! Tables and their columns
//!
//! Columns live in the `columns` attribute of the table snapshot. Column tags
//! are tag usages keyed by the column fqn (`<table fqn>.<column name>`), so
//! they are stripped from the snapshot and added back on read.

use std::collections::HashSet;

use metacat_core::diff::field_name;
use metacat_core::query::field_names;
use metacat_core::{entity_types, fqn, limits, Entity, Error, Fields, Result, TagLabel};
use metacat_storage::{ReadTransaction, WriteTransaction};
use serde::{Deserialize, Serialize};

use crate::handler::{check_container, record_attribute_changes, EntityHandler};
use crate::resolve::validate_tags;
use crate::updater::{apply_tags, SyncAction, UpdateContext};

pub const COLUMNS: &str = "columns";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Column {
    pub name: String,
    pub data_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_length: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub precision: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scale: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<TagLabel>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fully_qualified_name: Option<String>,
}

impl Column {
    pub fn new(name: impl Into<String>, data_type: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            data_type: data_type.into(),
            data_length: None,
            precision: None,
            scale: None,
            display_name: None,
            description: None,
            tags: Vec::new(),
            fully_qualified_name: None,
        }
    }

    /// Columns pair up across versions by name and data type
    fn matches(a: &Column, b: &Column) -> bool {
        a.name.eq_ignore_ascii_case(&b.name) && a.data_type.eq_ignore_ascii_case(&b.data_type)
    }
}

pub fn columns(entity: &Entity) -> Result<Vec<Column>> {
    Ok(entity.attribute::<Vec<Column>>(COLUMNS)?.unwrap_or_default())
}

fn column_fqn(table_fqn: &str, column: &Column) -> Result<String> {
    fqn::add(table_fqn, &column.name)
}

pub struct TableHandler;

impl EntityHandler for TableHandler {
    fn entity_type(&self) -> &str {
        entity_types::TABLE
    }

    fn container_types(&self) -> &[&'static str] {
        &[entity_types::DATABASE]
    }

    fn prepare(&self, entity: &mut Entity, tx: &dyn ReadTransaction, _update: bool) -> Result<()> {
        check_container(entity, self.container_types())?;
        if !entity.attributes.contains_key(COLUMNS) {
            return Ok(());
        }

        let mut cols = columns(entity)?;
        let mut seen = HashSet::new();
        for column in &mut cols {
            limits::validate_entity_name(&column.name)?;
            if !seen.insert(column.name.to_lowercase()) {
                return Err(Error::invalid(format!(
                    "Column name {} is repeated",
                    column.name
                )));
            }
            validate_tags(tx, &mut column.tags)?;
        }
        entity.set_attribute(COLUMNS, &cols)
    }

    fn store_relationships(&self, entity: &Entity, tx: &mut dyn WriteTransaction) -> Result<()> {
        for column in columns(entity)? {
            if !column.tags.is_empty() {
                let target = column_fqn(&entity.fully_qualified_name, &column)?;
                apply_tags(tx, &column.tags, &entity.entity_type, &target)?;
            }
        }
        Ok(())
    }

    fn strip_derived_fields(&self, snapshot: &mut Entity) -> Result<()> {
        if !snapshot.attributes.contains_key(COLUMNS) {
            return Ok(());
        }
        let mut cols = columns(snapshot)?;
        for column in &mut cols {
            column.tags.clear();
            column.fully_qualified_name = None;
        }
        snapshot.set_attribute(COLUMNS, &cols)
    }

    fn hydrate(&self, entity: &mut Entity, tx: &dyn ReadTransaction, fields: &Fields) -> Result<()> {
        if !entity.attributes.contains_key(COLUMNS) {
            return Ok(());
        }
        let mut cols = columns(entity)?;
        for column in &mut cols {
            let target = column_fqn(&entity.fully_qualified_name, column)?;
            if fields.contains(field_names::TAGS) {
                column.tags = tx.get_tags(&entity.entity_type, &target)?.iter().map(|u| u.to_label()).collect();
                TagLabel::sort(&mut column.tags);
            }
            column.fully_qualified_name = Some(target);
        }
        entity.set_attribute(COLUMNS, &cols)
    }

    fn entity_specific_update(&self, ctx: &mut UpdateContext<'_>) -> Result<()> {
        update_columns(ctx)?;
        record_attribute_changes(ctx, &[COLUMNS])
    }
}

fn update_columns(ctx: &mut UpdateContext<'_>) -> Result<()> {
    let stored = columns(ctx.original)?;
    let updated = columns(ctx.updated)?;
    let diff = ctx
        .recorder
        .record_list_change(COLUMNS, &stored, &updated, Column::matches, Column::matches)?;

    if !diff.deleted.is_empty() {
        ctx.recorder.mark_major();
    }
    for column in diff.deleted.iter().filter(|c| !c.tags.is_empty()) {
        ctx.plan.push(SyncAction::ReplaceTags {
            target_fqn: column_fqn(&ctx.original.fully_qualified_name, column)?,
            labels: Vec::new(),
        });
    }
    for column in diff.added.iter().filter(|c| !c.tags.is_empty()) {
        ctx.plan.push(SyncAction::ReplaceTags {
            target_fqn: column_fqn(&ctx.updated.fully_qualified_name, column)?,
            labels: column.tags.clone(),
        });
    }

    for column in &updated {
        let Some(orig) = stored.iter().find(|s| Column::matches(s, column)) else {
            continue;
        };
        let name = fqn::quote_name(&column.name)?;
        let field = |part: &str| field_name(&[COLUMNS, &name, part]);
        let recorder = &mut *ctx.recorder;

        recorder.record_change(&field("description"), orig.description.as_ref(), column.description.as_ref())?;
        recorder.record_change(&field("displayName"), orig.display_name.as_ref(), column.display_name.as_ref())?;

        if recorder.record_change(&field("dataLength"), orig.data_length.as_ref(), column.data_length.as_ref())? {
            let shrunk = match (orig.data_length, column.data_length) {
                (None, Some(_)) => true,
                (Some(old), Some(new)) => new < old,
                _ => false,
            };
            if shrunk {
                recorder.mark_major();
            }
        }
        for (part, old, new) in [
            ("precision", orig.precision, column.precision),
            ("scale", orig.scale, column.scale),
        ] {
            if recorder.record_change(&field(part), old.as_ref(), new.as_ref())? {
                let reduced = match (old, new) {
                    (Some(_), None) => true,
                    (Some(old), Some(new)) => new < old,
                    _ => false,
                };
                if reduced {
                    recorder.mark_major();
                }
            }
        }

        let mut orig_tags = orig.tags.clone();
        let mut new_tags = column.tags.clone();
        TagLabel::sort(&mut orig_tags);
        TagLabel::sort(&mut new_tags);
        let tags = recorder.record_list_change(
            &field(field_names::TAGS),
            &orig_tags,
            &new_tags,
            TagLabel::same_tag,
            |a, b| a == b,
        )?;
        if tags.has_changes() {
            ctx.plan.push(SyncAction::ReplaceTags {
                target_fqn: column_fqn(&ctx.updated.fully_qualified_name, column)?,
                labels: new_tags,
            });
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::updater::{Operation, SyncPlan};
    use metacat_core::{ChangeRecorder, EntityVersion};
    use serde_json::json;

    fn table(cols: serde_json::Value) -> Entity {
        let mut entity = Entity::new("table", "orders").with_attribute(COLUMNS, cols);
        entity.fully_qualified_name = "mysql.sales.orders".into();
        entity
    }

    fn diff(original: &Entity, updated: &Entity) -> (ChangeRecorder, SyncPlan) {
        let mut recorder = ChangeRecorder::new(EntityVersion::INITIAL, true);
        let mut plan = SyncPlan::default();
        TableHandler
            .entity_specific_update(&mut UpdateContext {
                original,
                updated,
                operation: Operation::Put,
                recorder: &mut recorder,
                plan: &mut plan,
            })
            .unwrap();
        (recorder, plan)
    }

    #[test]
    fn test_added_column_is_minor() {
        let original = table(json!([{"name": "id", "dataType": "INT"}]));
        let updated = table(json!([
            {"name": "id", "dataType": "INT"},
            {"name": "total", "dataType": "DECIMAL", "precision": 10, "scale": 2}
        ]));
        let (recorder, plan) = diff(&original, &updated);
        assert!(recorder.is_changed());
        assert!(!recorder.is_major());
        assert_eq!(recorder.change_description().fields_added[0].name, "columns");
        assert!(plan.is_empty());
    }

    #[test]
    fn test_deleted_column_is_major() {
        let original = table(json!([
            {"name": "id", "dataType": "INT"},
            {"name": "email", "dataType": "VARCHAR", "tags": [{"tagFQN": "PII.Sensitive"}]}
        ]));
        let updated = table(json!([{"name": "id", "dataType": "INT"}]));
        let (recorder, plan) = diff(&original, &updated);
        assert!(recorder.is_major());
        assert_eq!(
            plan.actions(),
            &[SyncAction::ReplaceTags {
                target_fqn: "mysql.sales.orders.email".into(),
                labels: vec![],
            }]
        );
    }

    #[test]
    fn test_data_length_and_precision_rules() {
        let original = table(json!([
            {"name": "code", "dataType": "VARCHAR", "dataLength": 64},
            {"name": "amount", "dataType": "DECIMAL", "precision": 10, "scale": 2}
        ]));

        let widened = table(json!([
            {"name": "code", "dataType": "VARCHAR", "dataLength": 128},
            {"name": "amount", "dataType": "DECIMAL", "precision": 12, "scale": 2}
        ]));
        let (recorder, _) = diff(&original, &widened);
        assert!(recorder.is_changed());
        assert!(!recorder.is_major());
        let names = recorder.change_description().changed_fields();
        assert!(names.contains(&"columns.code.dataLength"));
        assert!(names.contains(&"columns.amount.precision"));

        let shrunk = table(json!([
            {"name": "code", "dataType": "VARCHAR", "dataLength": 32},
            {"name": "amount", "dataType": "DECIMAL", "precision": 10, "scale": 2}
        ]));
        assert!(diff(&original, &shrunk).0.is_major());

        let scale_removed = table(json!([
            {"name": "code", "dataType": "VARCHAR", "dataLength": 64},
            {"name": "amount", "dataType": "DECIMAL", "precision": 10}
        ]));
        assert!(diff(&original, &scale_removed).0.is_major());
    }

    #[test]
    fn test_column_tag_change_syncs_usage() {
        let original = table(json!([{"name": "email", "dataType": "VARCHAR"}]));
        let updated = table(json!([
            {"name": "email", "dataType": "VARCHAR", "tags": [{"tagFQN": "PII.Sensitive"}]}
        ]));
        let (recorder, plan) = diff(&original, &updated);
        assert_eq!(
            recorder.change_description().fields_added[0].name,
            "columns.email.tags"
        );
        assert_eq!(plan.actions().len(), 1);
    }

    #[test]
    fn test_strip_and_hydrate_columns() {
        let mut entity = table(json!([
            {"name": "email", "dataType": "VARCHAR", "tags": [{"tagFQN": "PII.Sensitive"}]}
        ]));
        TableHandler.strip_derived_fields(&mut entity).unwrap();
        let cols = columns(&entity).unwrap();
        assert!(cols[0].tags.is_empty());
        assert!(cols[0].fully_qualified_name.is_none());
    }

    #[test]
    fn test_quoted_column_names() {
        let column = Column::new("a.b", "INT");
        assert_eq!(column_fqn("svc.db.t", &column).unwrap(), "svc.db.t.\"a.b\"");
    }
}
