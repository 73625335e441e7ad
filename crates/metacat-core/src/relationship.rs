//! Relationship (edge) types

use crate::entity::EntityId;
use serde::{Deserialize, Serialize};

/// Kind of a relationship edge
///
/// The direction of each kind is fixed: `from` is the owner / container /
/// reviewer side, `to` is the entity being owned / contained / reviewed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationKind {
    /// container --contains--> child (service > database > table, classification > tag)
    Contains,
    /// parent --parentOf--> child (team hierarchies)
    ParentOf,
    /// owner --owns--> entity
    Owns,
    /// domain / data product --has--> entity
    Has,
    /// reviewer --reviews--> entity
    Reviews,
    /// entity --expert--> user
    Expert,
    /// term --relatedTo-- term, symmetric
    RelatedTo,
    /// user --follows--> entity
    Follows,
}

impl RelationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Contains => "contains",
            Self::ParentOf => "parentOf",
            Self::Owns => "owns",
            Self::Has => "has",
            Self::Reviews => "reviews",
            Self::Expert => "expert",
            Self::RelatedTo => "relatedTo",
            Self::Follows => "follows",
        }
    }

    /// Symmetric kinds are stored once per pair
    pub fn is_symmetric(&self) -> bool {
        matches!(self, Self::RelatedTo)
    }

    /// Kinds expected to have at most one edge arriving at an entity
    pub fn is_single_valued(&self) -> bool {
        matches!(self, Self::Contains | Self::Owns)
    }

    /// Kinds that make the `from` side the container of the `to` side
    pub fn is_containment(&self) -> bool {
        matches!(self, Self::Contains | Self::ParentOf)
    }
}

impl std::fmt::Display for RelationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A relationship edge between two entities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relationship {
    pub from_id: EntityId,
    pub from_type: String,
    pub to_id: EntityId,
    pub to_type: String,
    pub kind: RelationKind,

    /// Optional payload carried by the edge
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<serde_json::Value>,
}

impl Relationship {
    pub fn new(
        from_id: EntityId,
        from_type: impl Into<String>,
        to_id: EntityId,
        to_type: impl Into<String>,
        kind: RelationKind,
    ) -> Self {
        Self {
            from_id,
            from_type: from_type.into(),
            to_id,
            to_type: to_type.into(),
            kind,
            payload: None,
        }
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Put a symmetric edge into its stored orientation: smaller id first
    pub fn canonical(self) -> Self {
        if self.from_id <= self.to_id {
            return self;
        }
        Self {
            from_id: self.to_id,
            from_type: self.to_type,
            to_id: self.from_id,
            to_type: self.from_type,
            kind: self.kind,
            payload: self.payload,
        }
    }

    /// Whether the edge touches `id` on either side
    pub fn touches(&self, id: &EntityId) -> bool {
        &self.from_id == id || &self.to_id == id
    }

    /// The end of the edge that is not `id`
    pub fn other_end(&self, id: &EntityId) -> (EntityId, &str) {
        if &self.from_id == id {
            (self.to_id, &self.to_type)
        } else {
            (self.from_id, &self.from_type)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonical_orders_ids() {
        let a = EntityId::new();
        let b = EntityId::new();
        let (small, large) = if a < b { (a, b) } else { (b, a) };

        let edge = Relationship::new(large, "glossaryTerm", small, "glossaryTerm", RelationKind::RelatedTo)
            .canonical();
        assert_eq!(edge.from_id, small);
        assert_eq!(edge.to_id, large);

        let again = edge.clone().canonical();
        assert_eq!(again, edge);
    }

    #[test]
    fn test_other_end() {
        let a = EntityId::new();
        let b = EntityId::new();
        let edge = Relationship::new(a, "database", b, "table", RelationKind::Contains);
        assert_eq!(edge.other_end(&a), (b, "table"));
        assert_eq!(edge.other_end(&b), (a, "database"));
        assert!(edge.touches(&a));
    }

    #[test]
    fn test_kind_properties() {
        assert!(RelationKind::RelatedTo.is_symmetric());
        assert!(!RelationKind::Contains.is_symmetric());
        assert!(RelationKind::ParentOf.is_containment());
        assert_eq!(RelationKind::Owns.to_string(), "owns");
    }
}
