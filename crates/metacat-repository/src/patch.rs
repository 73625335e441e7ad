//! JSON merge patch (RFC 7396) over entities

use metacat_core::{Entity, Error, Result};
use serde_json::Value;

/// Merge `patch` into `target` in place
///
/// Objects merge key by key, `null` removes a key, anything else replaces the
/// target value wholesale (arrays included).
pub fn merge_patch(target: &mut Value, patch: &Value) {
    let Value::Object(patch_map) = patch else {
        *target = patch.clone();
        return;
    };
    if !target.is_object() {
        *target = Value::Object(serde_json::Map::new());
    }
    if let Value::Object(target_map) = target {
        for (key, value) in patch_map {
            if value.is_null() {
                target_map.remove(key);
            } else {
                merge_patch(target_map.entry(key.clone()).or_insert(Value::Null), value);
            }
        }
    }
}

/// Apply a merge patch to an entity, producing the patched copy
pub fn apply_patch(entity: &Entity, patch: &Value) -> Result<Entity> {
    let Some(fields) = patch.as_object() else {
        return Err(Error::invalid("Patch document must be a JSON object"));
    };
    if let Some(unknown) = fields.keys().find(|k| !Entity::FIELD_NAMES.contains(&k.as_str())) {
        return Err(Error::invalid(format!(
            "Unknown field {} for {}; type specific fields go under attributes",
            unknown, entity.entity_type
        )));
    }
    let mut document = serde_json::to_value(entity)?;
    merge_patch(&mut document, patch);
    serde_json::from_value(document)
        .map_err(|e| Error::invalid(format!("Patched entity is invalid: {}", e)))
}
