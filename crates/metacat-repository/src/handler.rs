//! Per entity type behavior
//!
//! The repository and the updater hold the logic shared by every type. What
//! differs between types (containers, fqn rules, nested elements, extra fields
//! to diff) is supplied by an [`EntityHandler`] registered in the
//! [`TypeRegistry`] under the type name.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};

use metacat_core::{
    entity_types, fqn, Entity, Error, Fields, RelationKind, Result, TagSource,
};
use metacat_storage::{ReadTransaction, WriteTransaction};

use crate::custom_property::CustomProperty;
use crate::handlers::{GlossaryTermHandler, TableHandler, TagHandler, TeamHandler};
use crate::updater::UpdateContext;

/// Hooks a type supplies to the generic create, read and update paths
pub trait EntityHandler: Send + Sync {
    fn entity_type(&self) -> &str;

    /// Validate and normalize an incoming entity before anything is written
    ///
    /// `update` is set when the entity replaces an existing one. References
    /// (parent, owner, ...) are already resolved.
    fn prepare(&self, _entity: &mut Entity, _tx: &dyn ReadTransaction, _update: bool) -> Result<()> {
        Ok(())
    }

    /// Derive the fqn from the container and the name
    fn set_fully_qualified_name(&self, entity: &mut Entity) -> Result<()> {
        entity.fully_qualified_name = match &entity.parent {
            Some(parent) => fqn::add(&parent.fully_qualified_name, &entity.name)?,
            None => fqn::build(&[entity.name.as_str()])?,
        };
        Ok(())
    }

    /// Store type specific relationships of a newly created entity
    fn store_relationships(&self, _entity: &Entity, _tx: &mut dyn WriteTransaction) -> Result<()> {
        Ok(())
    }

    /// Remove content that is kept outside the snapshot (nested tags, ...)
    fn strip_derived_fields(&self, _snapshot: &mut Entity) -> Result<()> {
        Ok(())
    }

    /// Fill type specific derived content on read
    fn hydrate(&self, _entity: &mut Entity, _tx: &dyn ReadTransaction, _fields: &Fields) -> Result<()> {
        Ok(())
    }

    /// Diff the type specific fields of an update
    fn entity_specific_update(&self, ctx: &mut UpdateContext<'_>) -> Result<()> {
        record_attribute_changes(ctx, &[])
    }

    fn rename_allowed(&self) -> bool {
        false
    }

    /// Container types an entity of this type may live in; empty when it is top level
    fn container_types(&self) -> &[&'static str] {
        &[]
    }

    /// Relationship kind backing the `children` field, if the type tracks children
    fn children_relationship(&self) -> Option<RelationKind> {
        None
    }

    fn supports_related_terms(&self) -> bool {
        false
    }

    /// Set for types whose instances are applied to other entities as tags
    fn tag_source(&self) -> Option<TagSource> {
        None
    }
}

/// Check the resolved container of `entity` against the allowed container types
pub fn check_container(entity: &Entity, allowed: &[&str]) -> Result<()> {
    if allowed.is_empty() {
        return Ok(());
    }
    let parent = entity.parent.as_ref().ok_or_else(|| {
        Error::invalid(format!(
            "{} {} requires a container of type {}",
            entity.entity_type,
            entity.name,
            allowed.join(" or ")
        ))
    })?;
    if !allowed.contains(&parent.entity_type.as_str()) {
        return Err(Error::invalid(format!(
            "{} can't be contained in {}",
            entity.entity_type, parent.entity_type
        )));
    }
    if parent.deleted {
        return Err(Error::invalid(format!(
            "Container {} is deleted",
            parent.fully_qualified_name
        )));
    }
    Ok(())
}

/// Record changes of every type specific attribute not in `skip`
pub fn record_attribute_changes(ctx: &mut UpdateContext<'_>, skip: &[&str]) -> Result<()> {
    let keys: BTreeSet<&String> = ctx
        .original
        .attributes
        .keys()
        .chain(ctx.updated.attributes.keys())
        .filter(|k| !skip.contains(&k.as_str()))
        .collect();
    for key in keys {
        ctx.recorder.record_change(
            key,
            ctx.original.attributes.get(key),
            ctx.updated.attributes.get(key),
        )?;
    }
    Ok(())
}

/// Handler for types without type specific behavior beyond a few flags
#[derive(Debug, Clone)]
pub struct DefaultHandler {
    entity_type: String,
    containers: Vec<&'static str>,
    rename_allowed: bool,
    tag_source: Option<TagSource>,
}

impl DefaultHandler {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            containers: Vec::new(),
            rename_allowed: false,
            tag_source: None,
        }
    }

    pub fn contained_in(mut self, containers: &[&'static str]) -> Self {
        self.containers = containers.to_vec();
        self
    }

    pub fn renamable(mut self) -> Self {
        self.rename_allowed = true;
        self
    }

    pub fn tag_source(mut self, source: TagSource) -> Self {
        self.tag_source = Some(source);
        self
    }
}

impl EntityHandler for DefaultHandler {
    fn entity_type(&self) -> &str {
        &self.entity_type
    }

    fn prepare(&self, entity: &mut Entity, _tx: &dyn ReadTransaction, _update: bool) -> Result<()> {
        check_container(entity, &self.containers)
    }

    fn rename_allowed(&self) -> bool {
        self.rename_allowed
    }

    fn container_types(&self) -> &[&'static str] {
        &self.containers
    }

    fn tag_source(&self) -> Option<TagSource> {
        self.tag_source
    }
}

/// Handlers and custom property schemas by entity type
pub struct TypeRegistry {
    handlers: HashMap<String, Arc<dyn EntityHandler>>,
    custom_properties: RwLock<HashMap<String, Vec<CustomProperty>>>,
}

impl TypeRegistry {
    /// Registry without any type
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            custom_properties: RwLock::new(HashMap::new()),
        }
    }

    /// Registry with every built-in type
    pub fn with_builtin_types() -> Self {
        use entity_types::*;

        let mut registry = Self::new();
        registry.register(DefaultHandler::new(DATABASE_SERVICE));
        registry.register(DefaultHandler::new(DATABASE).contained_in(&[DATABASE_SERVICE]));
        registry.register(TableHandler);
        registry.register(DefaultHandler::new(DASHBOARD));
        registry.register(
            DefaultHandler::new(CLASSIFICATION)
                .renamable()
                .tag_source(TagSource::Classification),
        );
        registry.register(TagHandler);
        registry.register(
            DefaultHandler::new(GLOSSARY)
                .renamable()
                .tag_source(TagSource::Glossary),
        );
        registry.register(GlossaryTermHandler);
        registry.register(DefaultHandler::new(USER));
        registry.register(TeamHandler);
        registry.register(DefaultHandler::new(DOMAIN));
        registry.register(DefaultHandler::new(DATA_PRODUCT));
        registry.register(DefaultHandler::new(POLICY));
        registry
    }

    /// Register a handler, replacing any previous one for the same type
    pub fn register(&mut self, handler: impl EntityHandler + 'static) {
        self.handlers
            .insert(handler.entity_type().to_string(), Arc::new(handler));
    }

    pub fn handler(&self, entity_type: &str) -> Result<Arc<dyn EntityHandler>> {
        self.handlers
            .get(entity_type)
            .cloned()
            .ok_or_else(|| Error::invalid(format!("Unknown entity type {}", entity_type)))
    }

    /// Registered type names, sorted
    pub fn entity_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    /// Declare a custom property for an entity type
    pub fn add_custom_property(&self, entity_type: &str, property: CustomProperty) -> Result<()> {
        self.handler(entity_type)?;
        let mut properties = self
            .custom_properties
            .write()
            .map_err(|e| Error::Internal(format!("Lock error: {}", e)))?;
        let declared = properties.entry(entity_type.to_string()).or_default();
        if declared.iter().any(|p| p.name == property.name) {
            return Err(Error::Conflict(format!(
                "Custom property {} already exists for {}",
                property.name, entity_type
            )));
        }
        tracing::info!(entity_type, property = %property.name, "Added custom property");
        declared.push(property);
        Ok(())
    }

    pub fn custom_properties(&self, entity_type: &str) -> Result<Vec<CustomProperty>> {
        let properties = self
            .custom_properties
            .read()
            .map_err(|e| Error::Internal(format!("Lock error: {}", e)))?;
        Ok(properties.get(entity_type).cloned().unwrap_or_default())
    }
}

impl Default for TypeRegistry {
    fn default() -> Self {
        Self::with_builtin_types()
    }
}
