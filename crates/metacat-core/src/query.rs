//! Query types for reading and listing entities

use crate::entity::Entity;
use crate::error::{Error, Result};
use crate::fqn;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::str::FromStr;

/// Which entities a read admits with respect to soft deletion
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Include {
    All,
    #[default]
    NonDeleted,
    Deleted,
}

impl Include {
    pub fn admits(&self, deleted: bool) -> bool {
        match self {
            Self::All => true,
            Self::NonDeleted => !deleted,
            Self::Deleted => deleted,
        }
    }
}

impl FromStr for Include {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "all" => Ok(Self::All),
            "non-deleted" | "non_deleted" | "nondeleted" => Ok(Self::NonDeleted),
            "deleted" => Ok(Self::Deleted),
            _ => Err(Error::invalid(format!("Unknown include value: {}", s))),
        }
    }
}

/// Filter applied to entity listings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListFilter {
    #[serde(default)]
    pub include: Include,

    /// Only entities below this fqn
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent: Option<String>,
}

impl ListFilter {
    pub fn new(include: Include) -> Self {
        Self {
            include,
            parent: None,
        }
    }

    pub fn with_parent(mut self, parent: impl Into<String>) -> Self {
        self.parent = Some(parent.into());
        self
    }

    pub fn matches(&self, entity: &Entity) -> bool {
        if !self.include.admits(entity.deleted) {
            return false;
        }
        match &self.parent {
            Some(parent) => fqn::is_descendant(&entity.fully_qualified_name, parent),
            None => true,
        }
    }
}

/// Position of a page in fqn order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanRange {
    /// Ascending from just after the cursor, or from the start
    After(Option<String>),
    /// Descending from just before the cursor
    Before(String),
}

impl ScanRange {
    pub fn start() -> Self {
        Self::After(None)
    }

    /// Whether `key` lies inside the range
    pub fn admits(&self, key: &str) -> bool {
        match self {
            Self::After(None) => true,
            Self::After(Some(cursor)) => key > cursor.as_str(),
            Self::Before(cursor) => key < cursor.as_str(),
        }
    }

    pub fn is_descending(&self) -> bool {
        matches!(self, Self::Before(_))
    }
}

/// Names of relationship-derived fields a read may hydrate
pub mod field_names {
    pub const OWNER: &str = "owner";
    pub const DOMAIN: &str = "domain";
    pub const PARENT: &str = "parent";
    pub const TAGS: &str = "tags";
    pub const DATA_PRODUCTS: &str = "dataProducts";
    pub const REVIEWERS: &str = "reviewers";
    pub const EXPERTS: &str = "experts";
    pub const CHILDREN: &str = "children";
    pub const RELATED_TERMS: &str = "relatedTerms";
    pub const FOLLOWERS: &str = "followers";
    pub const EXTENSION: &str = "extension";

    pub const ALL: &[&str] = &[
        OWNER,
        DOMAIN,
        PARENT,
        TAGS,
        DATA_PRODUCTS,
        REVIEWERS,
        EXPERTS,
        CHILDREN,
        RELATED_TERMS,
        FOLLOWERS,
        EXTENSION,
    ];
}

/// Set of fields to hydrate on read
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Fields(BTreeSet<String>);

impl Fields {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn all() -> Self {
        Self(field_names::ALL.iter().map(|f| f.to_string()).collect())
    }

    /// Parse a comma separated field list; `*` selects everything
    pub fn parse(spec: &str) -> Result<Self> {
        let spec = spec.trim();
        if spec == "*" {
            return Ok(Self::all());
        }
        let mut fields = BTreeSet::new();
        for name in spec.split(',').map(str::trim).filter(|n| !n.is_empty()) {
            if !field_names::ALL.contains(&name) {
                return Err(Error::invalid(format!("Invalid field name {}", name)));
            }
            fields.insert(name.to_string());
        }
        Ok(Self(fields))
    }

    pub fn with(mut self, field: &str) -> Self {
        self.0.insert(field.to_string());
        self
    }

    pub fn contains(&self, field: &str) -> bool {
        self.0.contains(field)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// Cursors and total count of a listing
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Paging {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub before: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub after: Option<String>,

    pub total: usize,
}

/// One page of a listing
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultList<T> {
    pub data: Vec<T>,
    pub paging: Paging,
}

impl<T> ResultList<T> {
    pub fn new(data: Vec<T>, before: Option<String>, after: Option<String>, total: usize) -> Self {
        Self {
            data,
            paging: Paging {
                before,
                after,
                total,
            },
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_include_admits() {
        assert!(Include::All.admits(true));
        assert!(Include::NonDeleted.admits(false));
        assert!(!Include::NonDeleted.admits(true));
        assert!(Include::Deleted.admits(true));
        assert_eq!("deleted".parse::<Include>().unwrap(), Include::Deleted);
        assert!("bogus".parse::<Include>().is_err());
    }

    #[test]
    fn test_filter_by_parent() {
        let mut table = Entity::new("table", "orders");
        table.fully_qualified_name = "svc.db.orders".to_string();

        assert!(ListFilter::default().with_parent("svc.db").matches(&table));
        assert!(!ListFilter::default().with_parent("svc.other").matches(&table));

        table.deleted = true;
        assert!(!ListFilter::default().matches(&table));
        assert!(ListFilter::new(Include::All).matches(&table));
    }

    #[test]
    fn test_scan_range() {
        assert!(ScanRange::start().admits("a"));
        assert!(ScanRange::After(Some("b".into())).admits("c"));
        assert!(!ScanRange::After(Some("b".into())).admits("b"));
        assert!(ScanRange::Before("b".into()).admits("a"));
        assert!(ScanRange::Before("b".into()).is_descending());
    }

    #[test]
    fn test_fields_parse() {
        let fields = Fields::parse("owner, tags").unwrap();
        assert!(fields.contains("owner"));
        assert!(fields.contains("tags"));
        assert!(!fields.contains("children"));

        assert!(Fields::parse("*").unwrap().contains("followers"));
        assert!(Fields::parse("bogus").is_err());
        assert!(Fields::parse("").unwrap().is_empty());
    }
}
