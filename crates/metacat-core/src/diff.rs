//! Field level diffing
//!
//! [`ChangeRecorder`] classifies field transitions between a baseline and a
//! target entity. It has no side effects: callers run it once per pass and read
//! back what changed. With recording disabled it only tracks whether anything
//! changed, which is how session consolidation replays edits.

use crate::change::ChangeDescription;
use crate::error::Result;
use crate::version::EntityVersion;
use serde::Serialize;

/// Items of a list field split by how they changed
#[derive(Debug, Clone, PartialEq)]
pub struct ListDiff<T> {
    pub added: Vec<T>,
    pub deleted: Vec<T>,
    pub updated: Vec<T>,
}

impl<T> ListDiff<T> {
    pub fn has_changes(&self) -> bool {
        !self.added.is_empty() || !self.deleted.is_empty() || !self.updated.is_empty()
    }
}

/// Records field changes into a [`ChangeDescription`]
#[derive(Debug, Clone)]
pub struct ChangeRecorder {
    change: ChangeDescription,
    recording: bool,
    changed: bool,
    major: bool,
}

impl ChangeRecorder {
    pub fn new(previous_version: EntityVersion, recording: bool) -> Self {
        Self {
            change: ChangeDescription::new(previous_version),
            recording,
            changed: false,
            major: false,
        }
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    /// Whether any field differs between baseline and target
    pub fn is_changed(&self) -> bool {
        self.changed
    }

    pub fn is_major(&self) -> bool {
        self.major
    }

    /// Flag a backward-incompatible change
    pub fn mark_major(&mut self) {
        self.major = true;
    }

    pub fn change_description(&self) -> &ChangeDescription {
        &self.change
    }

    pub fn into_change_description(self) -> ChangeDescription {
        self.change
    }

    /// Version the target gets relative to `current`
    pub fn next_version(&self, current: EntityVersion) -> EntityVersion {
        if self.major {
            current.next_major()
        } else if self.fields_changed() {
            current.next_minor()
        } else {
            current
        }
    }

    /// Whether recorded entries exist
    pub fn fields_changed(&self) -> bool {
        !self.change.is_empty()
    }

    /// Record a scalar field transition using `PartialEq`
    pub fn record_change<T>(&mut self, field: &str, orig: Option<&T>, updated: Option<&T>) -> Result<bool>
    where
        T: Serialize + PartialEq + ?Sized,
    {
        self.record_change_with(field, orig, updated, |a, b| a == b)
    }

    /// Record a field transition with a custom equality predicate
    pub fn record_change_with<T, F>(
        &mut self,
        field: &str,
        orig: Option<&T>,
        updated: Option<&T>,
        equal: F,
    ) -> Result<bool>
    where
        T: Serialize + ?Sized,
        F: Fn(&T, &T) -> bool,
    {
        match (orig, updated) {
            (None, None) => Ok(false),
            (None, Some(new)) => {
                self.changed = true;
                if self.recording {
                    self.change.field_added(field, serde_json::to_value(new)?);
                }
                Ok(true)
            }
            (Some(old), None) => {
                self.changed = true;
                if self.recording {
                    self.change.field_deleted(field, serde_json::to_value(old)?);
                }
                Ok(true)
            }
            (Some(old), Some(new)) => {
                if equal(old, new) {
                    return Ok(false);
                }
                self.changed = true;
                if self.recording {
                    self.change.field_updated(
                        field,
                        serde_json::to_value(old)?,
                        serde_json::to_value(new)?,
                    );
                }
                Ok(true)
            }
        }
    }

    /// Record changes to a list field
    ///
    /// `identity` pairs items across the two lists; paired items that differ
    /// according to `equal` are reported as updated.
    pub fn record_list_change<T, I, E>(
        &mut self,
        field: &str,
        orig: &[T],
        updated: &[T],
        identity: I,
        equal: E,
    ) -> Result<ListDiff<T>>
    where
        T: Serialize + Clone,
        I: Fn(&T, &T) -> bool,
        E: Fn(&T, &T) -> bool,
    {
        let deleted: Vec<T> = orig
            .iter()
            .filter(|stored| !updated.iter().any(|u| identity(u, stored)))
            .cloned()
            .collect();

        let mut added = Vec::new();
        let mut updated_items = Vec::new();
        let mut previous_items = Vec::new();
        for item in updated {
            match orig.iter().find(|stored| identity(stored, item)) {
                None => added.push(item.clone()),
                Some(stored) if !equal(stored, item) => {
                    previous_items.push(stored.clone());
                    updated_items.push(item.clone());
                }
                Some(_) => {}
            }
        }

        let diff = ListDiff {
            added,
            deleted,
            updated: updated_items,
        };
        if diff.has_changes() {
            self.changed = true;
        }
        if self.recording {
            if !diff.added.is_empty() {
                self.change.field_added(field, serde_json::to_value(&diff.added)?);
            }
            if !diff.updated.is_empty() {
                self.change.field_updated(
                    field,
                    serde_json::to_value(&previous_items)?,
                    serde_json::to_value(&diff.updated)?,
                );
            }
            if !diff.deleted.is_empty() {
                self.change.field_deleted(field, serde_json::to_value(&diff.deleted)?);
            }
        }
        Ok(diff)
    }
}

/// Build a nested field name such as `columns.orders_id.description`
pub fn field_name(parts: &[&str]) -> String {
    parts.join(".")
}
