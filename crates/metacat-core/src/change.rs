//! Change descriptions and change events

use crate::entity::{Entity, EntityId};
use crate::version::EntityVersion;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One field transition inside a [`ChangeDescription`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FieldChange {
    pub name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub old_value: Option<Value>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_value: Option<Value>,
}

/// Structured diff between two versions of an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeDescription {
    pub previous_version: EntityVersion,

    #[serde(default)]
    pub fields_added: Vec<FieldChange>,

    #[serde(default)]
    pub fields_updated: Vec<FieldChange>,

    #[serde(default)]
    pub fields_deleted: Vec<FieldChange>,
}

impl ChangeDescription {
    pub fn new(previous_version: EntityVersion) -> Self {
        Self {
            previous_version,
            fields_added: Vec::new(),
            fields_updated: Vec::new(),
            fields_deleted: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.fields_added.is_empty() && self.fields_updated.is_empty() && self.fields_deleted.is_empty()
    }

    pub fn field_added(&mut self, name: impl Into<String>, new_value: Value) {
        self.fields_added.push(FieldChange {
            name: name.into(),
            old_value: None,
            new_value: Some(new_value),
        });
    }

    pub fn field_updated(&mut self, name: impl Into<String>, old_value: Value, new_value: Value) {
        self.fields_updated.push(FieldChange {
            name: name.into(),
            old_value: Some(old_value),
            new_value: Some(new_value),
        });
    }

    pub fn field_deleted(&mut self, name: impl Into<String>, old_value: Value) {
        self.fields_deleted.push(FieldChange {
            name: name.into(),
            old_value: Some(old_value),
            new_value: None,
        });
    }

    /// Names of every field touched by this change
    pub fn changed_fields(&self) -> Vec<&str> {
        self.fields_added
            .iter()
            .chain(&self.fields_updated)
            .chain(&self.fields_deleted)
            .map(|f| f.name.as_str())
            .collect()
    }
}

/// Kind of change an event reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum EventType {
    EntityCreated,
    EntityUpdated,
    EntitySoftDeleted,
    EntityRestored,
    EntityDeleted,
    EntityNoChange,
}

/// Notification emitted for every create, update, delete and restore
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangeEvent {
    /// Id of the entity the event is about
    pub id: EntityId,
    pub entity_type: String,
    #[serde(rename = "entityFullyQualifiedName")]
    pub fqn: String,
    pub event_type: EventType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_description: Option<ChangeDescription>,
    pub previous_version: EntityVersion,
    pub current_version: EntityVersion,
    pub user_name: String,
    pub timestamp: DateTime<Utc>,
}

impl ChangeEvent {
    /// Event for `entity` in its current state
    pub fn for_entity(entity: &Entity, event_type: EventType, previous_version: EntityVersion) -> Self {
        let change_description = match event_type {
            EventType::EntityCreated | EventType::EntityNoChange | EventType::EntityDeleted => None,
            _ => entity.change_description.clone(),
        };
        Self {
            id: entity.id,
            entity_type: entity.entity_type.clone(),
            fqn: entity.fully_qualified_name.clone(),
            event_type,
            change_description,
            previous_version,
            current_version: entity.version,
            user_name: entity.updated_by.clone(),
            timestamp: entity.updated_at,
        }
    }

    pub fn with_change_description(mut self, change: Option<ChangeDescription>) -> Self {
        self.change_description = change;
        self
    }
}
