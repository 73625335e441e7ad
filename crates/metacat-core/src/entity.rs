//! Entity (catalog record) types

use crate::change::ChangeDescription;
use crate::error::{Error, Result};
use crate::tag::TagLabel;
use crate::version::EntityVersion;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use ulid::Ulid;

/// Well known entity type names
pub mod entity_types {
    pub const DATABASE_SERVICE: &str = "databaseService";
    pub const DATABASE: &str = "database";
    pub const TABLE: &str = "table";
    pub const DASHBOARD: &str = "dashboard";
    pub const CLASSIFICATION: &str = "classification";
    pub const TAG: &str = "tag";
    pub const GLOSSARY: &str = "glossary";
    pub const GLOSSARY_TERM: &str = "glossaryTerm";
    pub const USER: &str = "user";
    pub const TEAM: &str = "team";
    pub const DOMAIN: &str = "domain";
    pub const DATA_PRODUCT: &str = "dataProduct";
    pub const POLICY: &str = "policy";
}

/// Unique identifier for an entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(pub Ulid);

impl EntityId {
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    pub fn from_string(s: &str) -> std::result::Result<Self, ulid::DecodeError> {
        Ok(Self(Ulid::from_string(s)?))
    }
}

impl Default for EntityId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for EntityId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for EntityId {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::from_string(s).map_err(|e| Error::invalid(format!("Invalid entity id {}: {}", s, e)))
    }
}

/// Who provides an entity; system entities are protected from rename and delete
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderType {
    #[default]
    User,
    System,
}

/// Lightweight pointer to another entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityReference {
    pub id: EntityId,

    #[serde(rename = "type")]
    pub entity_type: String,

    #[serde(default)]
    pub name: String,

    #[serde(default)]
    pub fully_qualified_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub deleted: bool,

    /// Set when the reference is inherited from a parent rather than stored on the entity
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub inherited: bool,
}

impl EntityReference {
    pub fn new(id: EntityId, entity_type: impl Into<String>) -> Self {
        Self {
            id,
            entity_type: entity_type.into(),
            name: String::new(),
            fully_qualified_name: String::new(),
            display_name: None,
            deleted: false,
            inherited: false,
        }
    }

    /// Reference identity is the target id
    pub fn same_entity(a: &EntityReference, b: &EntityReference) -> bool {
        a.id == b.id
    }

    /// Ordering used whenever a reference list is written back
    pub fn sort(refs: &mut [EntityReference]) {
        refs.sort_by(|a, b| {
            a.entity_type
                .cmp(&b.entity_type)
                .then_with(|| a.fully_qualified_name.cmp(&b.fully_qualified_name))
                .then_with(|| a.id.cmp(&b.id))
        });
    }
}

/// An entity in the catalog
///
/// Relationship-derived fields (owner, tags, children, ...) are built from the
/// relationship graph and the tag-usage store; they are never part of the stored
/// snapshot. Type specific content lives in `attributes`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    /// Unique identifier, generated when absent
    #[serde(default)]
    pub id: EntityId,

    /// Entity type name (e.g. "table", "glossaryTerm")
    #[serde(rename = "entityType")]
    pub entity_type: String,

    /// Name, unique among siblings
    pub name: String,

    /// Fully qualified name, unique per entity type
    #[serde(default)]
    pub fully_qualified_name: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,

    #[serde(default)]
    pub version: EntityVersion,

    #[serde(default)]
    pub deleted: bool,

    #[serde(default)]
    pub updated_by: String,

    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub change_description: Option<ChangeDescription>,

    #[serde(default)]
    pub provider: ProviderType,

    /// Custom property values
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extension: Option<Map<String, Value>>,

    /// Type specific fields
    #[serde(default, skip_serializing_if = "Map::is_empty")]
    pub attributes: Map<String, Value>,

    // ─────────────────────────────────────────────────────────────────────────
    // Relationship-derived fields
    // ─────────────────────────────────────────────────────────────────────────
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub owner: Option<EntityReference>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub domain: Option<EntityReference>,

    /// Container of this entity (service of a database, classification of a tag, ...)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<EntityReference>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tags: Vec<TagLabel>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub data_products: Vec<EntityReference>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub reviewers: Vec<EntityReference>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub experts: Vec<EntityReference>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<EntityReference>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub related_terms: Vec<EntityReference>,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub followers: Vec<EntityReference>,
}

impl Entity {
    /// Serialized names of every top-level field
    pub const FIELD_NAMES: &'static [&'static str] = &[
        "id",
        "entityType",
        "name",
        "fullyQualifiedName",
        "displayName",
        "description",
        "version",
        "deleted",
        "updatedBy",
        "updatedAt",
        "changeDescription",
        "provider",
        "extension",
        "attributes",
        "owner",
        "domain",
        "parent",
        "tags",
        "dataProducts",
        "reviewers",
        "experts",
        "children",
        "relatedTerms",
        "followers",
    ];

    /// Create a new entity at the initial version
    pub fn new(entity_type: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: EntityId::new(),
            entity_type: entity_type.into(),
            name: name.into(),
            fully_qualified_name: String::new(),
            display_name: None,
            description: None,
            version: EntityVersion::INITIAL,
            deleted: false,
            updated_by: String::new(),
            updated_at: Utc::now(),
            change_description: None,
            provider: ProviderType::User,
            extension: None,
            attributes: Map::new(),
            owner: None,
            domain: None,
            parent: None,
            tags: Vec::new(),
            data_products: Vec::new(),
            reviewers: Vec::new(),
            experts: Vec::new(),
            children: Vec::new(),
            related_terms: Vec::new(),
            followers: Vec::new(),
        }
    }

    pub fn with_parent(mut self, parent: EntityReference) -> Self {
        self.parent = Some(parent);
        self
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    pub fn with_owner(mut self, owner: EntityReference) -> Self {
        self.owner = Some(owner);
        self
    }

    pub fn with_tag(mut self, tag: TagLabel) -> Self {
        self.tags.push(tag);
        self
    }

    pub fn with_attribute(mut self, key: impl Into<String>, value: Value) -> Self {
        self.attributes.insert(key.into(), value);
        self
    }

    pub fn with_provider(mut self, provider: ProviderType) -> Self {
        self.provider = provider;
        self
    }

    /// Reference pointing at this entity
    pub fn to_reference(&self) -> EntityReference {
        EntityReference {
            id: self.id,
            entity_type: self.entity_type.clone(),
            name: self.name.clone(),
            fully_qualified_name: self.fully_qualified_name.clone(),
            display_name: self.display_name.clone(),
            deleted: self.deleted,
            inherited: false,
        }
    }

    /// Copy suitable for the entity store: relationship-derived fields and
    /// custom properties are held elsewhere
    pub fn to_snapshot(&self) -> Entity {
        let mut snapshot = self.clone();
        snapshot.clear_relationship_fields();
        snapshot.extension = None;
        snapshot
    }

    pub fn clear_relationship_fields(&mut self) {
        self.owner = None;
        self.domain = None;
        self.parent = None;
        self.tags.clear();
        self.data_products.clear();
        self.reviewers.clear();
        self.experts.clear();
        self.children.clear();
        self.related_terms.clear();
        self.followers.clear();
    }

    /// Typed access to a type specific attribute
    pub fn attribute<T: serde::de::DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.attributes.get(key) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => Ok(Some(serde_json::from_value(value.clone())?)),
        }
    }

    pub fn set_attribute<T: Serialize>(&mut self, key: &str, value: &T) -> Result<()> {
        self.attributes
            .insert(key.to_string(), serde_json::to_value(value)?);
        Ok(())
    }
}
