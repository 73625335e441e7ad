//! Custom property schemas
//!
//! Each entity type may declare typed custom properties. Values set on an
//! entity's `extension` map are validated against the declared property before
//! they are stored, one extension record per property.

use metacat_core::{Error, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Value type of a custom property
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum PropertyType {
    String,
    Markdown,
    Integer,
    Number,
    Boolean,
    Timestamp,
    Enum {
        values: Vec<String>,
        #[serde(default, rename = "multiSelect")]
        multi_select: bool,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomProperty {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub property_type: PropertyType,
}

impl CustomProperty {
    pub fn new(name: impl Into<String>, property_type: PropertyType) -> Self {
        Self {
            name: name.into(),
            description: None,
            property_type,
        }
    }

    /// Check that `value` fits the property type
    pub fn validate(&self, value: &Value) -> Result<()> {
        let valid = match &self.property_type {
            PropertyType::String | PropertyType::Markdown => value.is_string(),
            PropertyType::Integer => value.is_i64() || value.is_u64(),
            PropertyType::Number => value.is_number(),
            PropertyType::Boolean => value.is_boolean(),
            // Milliseconds since the epoch
            PropertyType::Timestamp => value.is_i64() || value.is_u64(),
            PropertyType::Enum {
                values,
                multi_select,
            } => match value {
                Value::String(s) => values.contains(s),
                Value::Array(items) if *multi_select => items
                    .iter()
                    .all(|item| item.as_str().is_some_and(|s| values.iter().any(|v| v == s))),
                _ => false,
            },
        };
        if valid {
            Ok(())
        } else {
            Err(Error::invalid(format!(
                "Custom field {} has invalid JSON {}",
                self.name, value
            )))
        }
    }
}

/// Key prefix of every custom property value of an entity type
pub fn extension_prefix(entity_type: &str) -> String {
    format!("{}.extension.", entity_type)
}

/// Extension store key of one custom property value
pub fn extension_key(entity_type: &str, property: &str) -> String {
    format!("{}{}", extension_prefix(entity_type), property)
}

/// Validate every value of an `extension` map against the declared properties
pub fn validate_extension(properties: &[CustomProperty], extension: &Map<String, Value>) -> Result<()> {
    for (name, value) in extension {
        let property = properties
            .iter()
            .find(|p| &p.name == name)
            .ok_or_else(|| Error::invalid(format!("Unknown custom field {}", name)))?;
        property.validate(value)?;
    }
    Ok(())
}
