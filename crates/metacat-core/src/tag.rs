//! Tag labels and tag usage records

use serde::{Deserialize, Serialize};

/// Where a tag comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Default, Hash, Serialize, Deserialize)]
pub enum TagSource {
    #[default]
    Classification,
    Glossary,
}

/// How a tag was applied
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub enum LabelType {
    #[default]
    Manual,
    Propagated,
    Automated,
    Derived,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Hash, Serialize, Deserialize)]
pub enum TagState {
    Suggested,
    #[default]
    Confirmed,
}

/// A tag as seen on an entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagLabel {
    #[serde(rename = "tagFQN")]
    pub tag_fqn: String,

    #[serde(default)]
    pub source: TagSource,

    #[serde(default)]
    pub label_type: LabelType,

    #[serde(default)]
    pub state: TagState,
}

impl TagLabel {
    pub fn classification(tag_fqn: impl Into<String>) -> Self {
        Self {
            tag_fqn: tag_fqn.into(),
            source: TagSource::Classification,
            label_type: LabelType::Manual,
            state: TagState::Confirmed,
        }
    }

    pub fn glossary(term_fqn: impl Into<String>) -> Self {
        Self {
            source: TagSource::Glossary,
            ..Self::classification(term_fqn)
        }
    }

    /// Identity of a label within a list: the tag it points at
    pub fn same_tag(a: &TagLabel, b: &TagLabel) -> bool {
        a.tag_fqn == b.tag_fqn && a.source == b.source
    }

    /// Order in which labels are written back and returned
    pub fn sort(labels: &mut [TagLabel]) {
        labels.sort_by(|a, b| a.tag_fqn.cmp(&b.tag_fqn));
    }

    /// Merge `existing` labels into `labels`, keeping the entries of `labels` on conflict
    pub fn merge(labels: &mut Vec<TagLabel>, existing: &[TagLabel]) {
        for label in existing {
            if !labels.iter().any(|l| Self::same_tag(l, label)) {
                labels.push(label.clone());
            }
        }
    }
}

/// A tag applied to a target (an entity or a nested element such as a column)
///
/// Fqns are only unique within an entity type, so a target is named by the
/// type of the entity owning it together with its fqn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TagUsage {
    pub source: TagSource,
    #[serde(rename = "tagFQN")]
    pub tag_fqn: String,
    pub target_type: String,
    #[serde(rename = "targetFQN")]
    pub target_fqn: String,
    pub label_type: LabelType,
    pub state: TagState,
}

impl TagUsage {
    pub fn new(label: &TagLabel, target_type: impl Into<String>, target_fqn: impl Into<String>) -> Self {
        Self {
            source: label.source,
            tag_fqn: label.tag_fqn.clone(),
            target_type: target_type.into(),
            target_fqn: target_fqn.into(),
            label_type: label.label_type,
            state: label.state,
        }
    }

    pub fn to_label(&self) -> TagLabel {
        TagLabel {
            tag_fqn: self.tag_fqn.clone(),
            source: self.source,
            label_type: self.label_type,
            state: self.state,
        }
    }
}
