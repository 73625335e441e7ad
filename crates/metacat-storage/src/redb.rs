//! ReDB storage backend

use crate::error::{StorageError, StorageResult};
use crate::migration::Migratable;
use crate::traits::{ReadTransaction, StorageBackend, WriteTransaction};
use async_trait::async_trait;
use metacat_core::{
    fqn, Entity, EntityId, ListFilter, RelationKind, Relationship, ScanRange, TagSource,
    TagUsage,
};
use redb::{AccessGuard, Database, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use std::ops::Bound;
use std::path::Path;

// Table definitions
const ENTITIES: TableDefinition<&str, &[u8]> = TableDefinition::new("entities");
const ENTITY_NAMES: TableDefinition<&str, &str> = TableDefinition::new("entity_names");
const RELATIONSHIPS: TableDefinition<&str, &[u8]> = TableDefinition::new("relationships");
const RELATIONSHIPS_BY_TARGET: TableDefinition<&str, &[u8]> =
    TableDefinition::new("relationships_by_target");
const EXTENSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("extensions");
const TAG_USAGE: TableDefinition<&str, &[u8]> = TableDefinition::new("tag_usage");
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

const SCHEMA_VERSION_KEY: &str = "schema_version";

/// Separates the parts of a tag usage key; sorts below any fqn character
const TAG_KEY_SEPARATOR: char = '\u{1f}';

/// ReDB storage backend
pub struct RedbStorage {
    db: Database,
}

impl RedbStorage {
    /// Open or create a ReDB database at the given path, migrating it to the current schema
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let db = Database::create(path)?;
        let storage = Self { db };
        storage.migrate_to_latest()?;
        Ok(storage)
    }

    fn create_tables(&self) -> StorageResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            write_txn.open_table(ENTITIES)?;
            write_txn.open_table(ENTITY_NAMES)?;
            write_txn.open_table(RELATIONSHIPS)?;
            write_txn.open_table(RELATIONSHIPS_BY_TARGET)?;
            write_txn.open_table(EXTENSIONS)?;
            write_txn.open_table(TAG_USAGE)?;
            write_txn.open_table(META)?;
        }
        write_txn.commit()?;
        Ok(())
    }
}

#[async_trait]
impl StorageBackend for RedbStorage {
    async fn initialize(&self) -> StorageResult<()> {
        self.migrate_to_latest()
    }

    async fn close(&self) -> StorageResult<()> {
        Ok(())
    }

    async fn health_check(&self) -> StorageResult<bool> {
        Ok(self.db.begin_read().is_ok())
    }

    fn begin_read(&self) -> StorageResult<Box<dyn ReadTransaction + '_>> {
        Ok(Box::new(RedbReadTransaction {
            txn: self.db.begin_read()?,
        }))
    }

    fn begin_write(&self) -> StorageResult<Box<dyn WriteTransaction + '_>> {
        Ok(Box::new(RedbWriteTransaction {
            txn: self.db.begin_write()?,
        }))
    }
}

impl Migratable for RedbStorage {
    fn get_schema_version(&self) -> StorageResult<u32> {
        let read_txn = self.db.begin_read()?;
        let table = match read_txn.open_table(META) {
            Ok(table) => table,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(0),
            Err(e) => return Err(e.into()),
        };
        let version = table.get(SCHEMA_VERSION_KEY)?.map(|v| v.value()).unwrap_or(0);
        u32::try_from(version)
            .map_err(|_| StorageError::Migration(format!("Invalid schema version {}", version)))
    }

    fn set_schema_version(&self, version: u32) -> StorageResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(META)?;
            table.insert(SCHEMA_VERSION_KEY, u64::from(version))?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn run_migration(&self, version: u32) -> StorageResult<()> {
        match version {
            1 => self.create_tables(),
            other => Err(StorageError::Migration(format!(
                "No migration defined for schema version {}",
                other
            ))),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Keys
// ─────────────────────────────────────────────────────────────────────────────

fn type_prefix(entity_type: &str) -> String {
    format!("{}:", entity_type)
}

fn name_key(entity_type: &str, fqn: &str) -> String {
    format!("{}:{}", entity_type, fqn)
}

fn edge_key(first: &EntityId, second: &EntityId, kind: RelationKind) -> String {
    format!("{}:{}:{}", first, second, kind.as_str())
}

fn id_prefix(id: &EntityId) -> String {
    format!("{}:", id)
}

fn extension_key(id: &EntityId, key: &str) -> String {
    format!("{}:{}", id, key)
}

/// Keys of usages whose target fqn starts with `fqn_start` within `target_type`
fn tag_type_prefix(target_type: &str, fqn_start: &str) -> String {
    format!("{}{}{}", target_type, TAG_KEY_SEPARATOR, fqn_start)
}

fn tag_target_prefix(target_type: &str, target_fqn: &str) -> String {
    format!("{}{}", tag_type_prefix(target_type, target_fqn), TAG_KEY_SEPARATOR)
}

fn tag_key(usage: &TagUsage) -> String {
    format!(
        "{}{}{}{:?}",
        tag_target_prefix(&usage.target_type, &usage.target_fqn),
        usage.tag_fqn,
        TAG_KEY_SEPARATOR,
        usage.source
    )
}

// ─────────────────────────────────────────────────────────────────────────────
// Table helpers shared by read and write transactions
// ─────────────────────────────────────────────────────────────────────────────

fn get_json<T, R>(table: &R, key: &str) -> StorageResult<Option<T>>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static str, &'static [u8]>,
{
    match table.get(key)? {
        Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
        None => Ok(None),
    }
}

/// Entries whose key starts with `prefix`, in key order
fn scan_prefix<T, R>(table: &R, prefix: &str) -> StorageResult<Vec<(String, T)>>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static str, &'static [u8]>,
{
    let mut entries = Vec::new();
    for entry in table.range(prefix..)? {
        let (key, value) = entry?;
        let key = key.value();
        if !key.starts_with(prefix) {
            break;
        }
        entries.push((key.to_string(), serde_json::from_slice(value.value())?));
    }
    Ok(entries)
}

/// Every entry of a table
fn scan_all<T, R>(table: &R) -> StorageResult<Vec<(String, T)>>
where
    T: DeserializeOwned,
    R: ReadableTable<&'static str, &'static [u8]>,
{
    scan_prefix(table, "")
}

fn list_page<N, E>(
    names: &N,
    entities: &E,
    entity_type: &str,
    filter: &ListFilter,
    range: &ScanRange,
    limit: usize,
) -> StorageResult<Vec<Entity>>
where
    N: ReadableTable<&'static str, &'static str>,
    E: ReadableTable<&'static str, &'static [u8]>,
{
    let prefix = type_prefix(entity_type);
    match range {
        ScanRange::After(None) => {
            collect_page(names.range(prefix.as_str()..)?, &prefix, entities, filter, limit)
        }
        ScanRange::After(Some(cursor)) => {
            let start = name_key(entity_type, cursor);
            let entries = names.range::<&str>((Bound::Excluded(start.as_str()), Bound::Unbounded))?;
            collect_page(entries, &prefix, entities, filter, limit)
        }
        ScanRange::Before(cursor) => {
            let end = name_key(entity_type, cursor);
            let entries = names.range(prefix.as_str()..end.as_str())?.rev();
            collect_page(entries, &prefix, entities, filter, limit)
        }
    }
}

fn collect_page<'a, I, E>(
    entries: I,
    prefix: &str,
    entities: &E,
    filter: &ListFilter,
    limit: usize,
) -> StorageResult<Vec<Entity>>
where
    I: Iterator<
        Item = Result<
            (AccessGuard<'a, &'static str>, AccessGuard<'a, &'static str>),
            redb::StorageError,
        >,
    >,
    E: ReadableTable<&'static str, &'static [u8]>,
{
    let mut page = Vec::new();
    for entry in entries {
        if page.len() >= limit {
            break;
        }
        let (key, id) = entry?;
        if !key.value().starts_with(prefix) {
            break;
        }
        if let Some(entity) = get_json::<Entity, _>(entities, id.value())? {
            if filter.matches(&entity) {
                page.push(entity);
            }
        }
    }
    Ok(page)
}

fn edges_matching<R>(
    table: &R,
    id: &EntityId,
    kind: RelationKind,
    peer_type: Option<&str>,
    outgoing: bool,
) -> StorageResult<Vec<Relationship>>
where
    R: ReadableTable<&'static str, &'static [u8]>,
{
    Ok(scan_prefix::<Relationship, _>(table, &id_prefix(id))?
        .into_iter()
        .map(|(_, edge)| edge)
        .filter(|edge| edge.kind == kind)
        .filter(|edge| {
            let peer = if outgoing { &edge.to_type } else { &edge.from_type };
            peer_type.map_or(true, |t| peer == t)
        })
        .collect())
}

fn to_json<T: Serialize>(value: &T) -> StorageResult<Vec<u8>> {
    Ok(serde_json::to_vec(value)?)
}

// ─────────────────────────────────────────────────────────────────────────────
// Transactions
// ─────────────────────────────────────────────────────────────────────────────

struct RedbReadTransaction {
    txn: redb::ReadTransaction,
}

struct RedbWriteTransaction {
    txn: redb::WriteTransaction,
}

/// Reads are identical for both transaction kinds: each opens the tables it needs
macro_rules! impl_reads {
    ($ty:ty) => {
        impl ReadTransaction for $ty {
            fn get_entity(&self, id: &EntityId) -> StorageResult<Option<Entity>> {
                get_json(&self.txn.open_table(ENTITIES)?, &id.to_string())
            }

            fn get_entity_by_name(&self, entity_type: &str, fqn: &str) -> StorageResult<Option<Entity>> {
                let names = self.txn.open_table(ENTITY_NAMES)?;
                let id = names
                    .get(name_key(entity_type, fqn).as_str())?
                    .map(|id| id.value().to_string());
                match id {
                    Some(id) => get_json(&self.txn.open_table(ENTITIES)?, &id),
                    None => Ok(None),
                }
            }

            fn list_entities(
                &self,
                entity_type: &str,
                filter: &ListFilter,
                range: &ScanRange,
                limit: usize,
            ) -> StorageResult<Vec<Entity>> {
                let names = self.txn.open_table(ENTITY_NAMES)?;
                let entities = self.txn.open_table(ENTITIES)?;
                list_page(&names, &entities, entity_type, filter, range, limit)
            }

            fn count_entities(&self, entity_type: &str, filter: &ListFilter) -> StorageResult<usize> {
                let names = self.txn.open_table(ENTITY_NAMES)?;
                let entities = self.txn.open_table(ENTITIES)?;
                let all = list_page(&names, &entities, entity_type, filter, &ScanRange::start(), usize::MAX)?;
                Ok(all.len())
            }

            fn find_to(
                &self,
                from: &EntityId,
                kind: RelationKind,
                to_type: Option<&str>,
            ) -> StorageResult<Vec<Relationship>> {
                edges_matching(&self.txn.open_table(RELATIONSHIPS)?, from, kind, to_type, true)
            }

            fn find_from(
                &self,
                to: &EntityId,
                kind: RelationKind,
                from_type: Option<&str>,
            ) -> StorageResult<Vec<Relationship>> {
                edges_matching(&self.txn.open_table(RELATIONSHIPS_BY_TARGET)?, to, kind, from_type, false)
            }

            fn get_extension(&self, id: &EntityId, key: &str) -> StorageResult<Option<Value>> {
                get_json(&self.txn.open_table(EXTENSIONS)?, &extension_key(id, key))
            }

            fn list_extensions(&self, id: &EntityId, prefix: &str) -> StorageResult<Vec<(String, Value)>> {
                let owner = id_prefix(id);
                let entries = scan_prefix(&self.txn.open_table(EXTENSIONS)?, &extension_key(id, prefix))?;
                Ok(entries
                    .into_iter()
                    .map(|(key, value)| (key[owner.len()..].to_string(), value))
                    .collect())
            }

            fn get_tags(&self, target_type: &str, target_fqn: &str) -> StorageResult<Vec<TagUsage>> {
                let prefix = tag_target_prefix(target_type, target_fqn);
                let entries = scan_prefix(&self.txn.open_table(TAG_USAGE)?, &prefix)?;
                Ok(entries.into_iter().map(|(_, usage)| usage).collect())
            }
        }
    };
}

impl_reads!(RedbReadTransaction);
impl_reads!(RedbWriteTransaction);

impl RedbWriteTransaction {
    fn remove_edges(&self, edges: &[Relationship]) -> StorageResult<()> {
        let mut forward = self.txn.open_table(RELATIONSHIPS)?;
        let mut reverse = self.txn.open_table(RELATIONSHIPS_BY_TARGET)?;
        for edge in edges {
            forward.remove(edge_key(&edge.from_id, &edge.to_id, edge.kind).as_str())?;
            reverse.remove(edge_key(&edge.to_id, &edge.from_id, edge.kind).as_str())?;
        }
        Ok(())
    }

    fn rewrite_tags<F>(&self, rewrite: F) -> StorageResult<()>
    where
        F: Fn(&TagUsage) -> Option<TagUsage>,
    {
        let mut table = self.txn.open_table(TAG_USAGE)?;
        let changed: Vec<(String, TagUsage)> = scan_all::<TagUsage, _>(&table)?
            .into_iter()
            .filter_map(|(key, usage)| rewrite(&usage).map(|u| (key, u)))
            .collect();
        for (key, _) in &changed {
            table.remove(key.as_str())?;
        }
        for (_, usage) in &changed {
            table.insert(tag_key(usage).as_str(), to_json(usage)?.as_slice())?;
        }
        Ok(())
    }

    fn remove_tags_where<F>(&self, matches: F) -> StorageResult<()>
    where
        F: Fn(&TagUsage) -> bool,
    {
        let mut table = self.txn.open_table(TAG_USAGE)?;
        let doomed: Vec<String> = scan_all::<TagUsage, _>(&table)?
            .into_iter()
            .filter(|(_, usage)| matches(usage))
            .map(|(key, _)| key)
            .collect();
        for key in doomed {
            table.remove(key.as_str())?;
        }
        Ok(())
    }
}

impl WriteTransaction for RedbWriteTransaction {
    fn as_read(&self) -> &dyn ReadTransaction {
        self
    }

    fn insert_entity(&mut self, entity: &Entity) -> StorageResult<()> {
        let id = entity.id.to_string();
        let key = name_key(&entity.entity_type, &entity.fully_qualified_name);
        let mut entities = self.txn.open_table(ENTITIES)?;
        let mut names = self.txn.open_table(ENTITY_NAMES)?;

        if entities.get(id.as_str())?.is_some() || names.get(key.as_str())?.is_some() {
            return Err(StorageError::DuplicateEntity(format!(
                "{} {}",
                entity.entity_type, entity.fully_qualified_name
            )));
        }
        names.insert(key.as_str(), id.as_str())?;
        entities.insert(id.as_str(), to_json(entity)?.as_slice())?;
        Ok(())
    }

    fn update_entity(&mut self, entity: &Entity) -> StorageResult<()> {
        let id = entity.id.to_string();
        let mut entities = self.txn.open_table(ENTITIES)?;
        let mut names = self.txn.open_table(ENTITY_NAMES)?;

        let existing: Entity = get_json(&entities, &id)?.ok_or_else(|| StorageError::EntityNotFound(id.clone()))?;
        let old_key = name_key(&existing.entity_type, &existing.fully_qualified_name);
        let new_key = name_key(&entity.entity_type, &entity.fully_qualified_name);

        if old_key != new_key {
            let taken_by = names.get(new_key.as_str())?.map(|v| v.value().to_string());
            if taken_by.is_some_and(|other| other != id) {
                return Err(StorageError::DuplicateEntity(format!(
                    "{} {}",
                    entity.entity_type, entity.fully_qualified_name
                )));
            }
            names.remove(old_key.as_str())?;
            names.insert(new_key.as_str(), id.as_str())?;
        }
        entities.insert(id.as_str(), to_json(entity)?.as_slice())?;
        Ok(())
    }

    fn delete_entity(&mut self, id: &EntityId) -> StorageResult<()> {
        let id = id.to_string();
        let mut entities = self.txn.open_table(ENTITIES)?;
        let mut names = self.txn.open_table(ENTITY_NAMES)?;

        let existing: Option<Entity> = get_json(&entities, &id)?;
        if let Some(existing) = existing {
            names.remove(name_key(&existing.entity_type, &existing.fully_qualified_name).as_str())?;
            entities.remove(id.as_str())?;
        }
        Ok(())
    }

    fn insert_relationship(&mut self, relationship: &Relationship) -> StorageResult<()> {
        let value = to_json(relationship)?;
        let mut forward = self.txn.open_table(RELATIONSHIPS)?;
        let mut reverse = self.txn.open_table(RELATIONSHIPS_BY_TARGET)?;
        forward.insert(
            edge_key(&relationship.from_id, &relationship.to_id, relationship.kind).as_str(),
            value.as_slice(),
        )?;
        reverse.insert(
            edge_key(&relationship.to_id, &relationship.from_id, relationship.kind).as_str(),
            value.as_slice(),
        )?;
        Ok(())
    }

    fn delete_relationship(
        &mut self,
        from: &EntityId,
        to: &EntityId,
        kind: RelationKind,
    ) -> StorageResult<bool> {
        let mut forward = self.txn.open_table(RELATIONSHIPS)?;
        let mut reverse = self.txn.open_table(RELATIONSHIPS_BY_TARGET)?;
        let existed = forward.remove(edge_key(from, to, kind).as_str())?.is_some();
        reverse.remove(edge_key(to, from, kind).as_str())?;
        Ok(existed)
    }

    fn delete_from(
        &mut self,
        from: &EntityId,
        kind: RelationKind,
        to_type: Option<&str>,
    ) -> StorageResult<usize> {
        let edges = self.find_to(from, kind, to_type)?;
        self.remove_edges(&edges)?;
        Ok(edges.len())
    }

    fn delete_to(
        &mut self,
        to: &EntityId,
        kind: RelationKind,
        from_type: Option<&str>,
    ) -> StorageResult<usize> {
        let edges = self.find_from(to, kind, from_type)?;
        self.remove_edges(&edges)?;
        Ok(edges.len())
    }

    fn delete_all_relationships(&mut self, id: &EntityId) -> StorageResult<usize> {
        let prefix = id_prefix(id);
        let mut edges: Vec<Relationship> =
            scan_prefix::<Relationship, _>(&self.txn.open_table(RELATIONSHIPS)?, &prefix)?
                .into_iter()
                .map(|(_, edge)| edge)
                .collect();
        let incoming =
            scan_prefix::<Relationship, _>(&self.txn.open_table(RELATIONSHIPS_BY_TARGET)?, &prefix)?;
        edges.extend(
            incoming
                .into_iter()
                .map(|(_, edge)| edge)
                .filter(|edge| &edge.from_id != id),
        );
        self.remove_edges(&edges)?;
        Ok(edges.len())
    }

    fn put_extension(&mut self, id: &EntityId, key: &str, value: &Value) -> StorageResult<()> {
        let mut table = self.txn.open_table(EXTENSIONS)?;
        table.insert(extension_key(id, key).as_str(), to_json(value)?.as_slice())?;
        Ok(())
    }

    fn delete_extension(&mut self, id: &EntityId, key: &str) -> StorageResult<()> {
        let mut table = self.txn.open_table(EXTENSIONS)?;
        table.remove(extension_key(id, key).as_str())?;
        Ok(())
    }

    fn delete_all_extensions(&mut self, id: &EntityId) -> StorageResult<()> {
        let mut table = self.txn.open_table(EXTENSIONS)?;
        let keys: Vec<String> = scan_prefix::<Value, _>(&table, &id_prefix(id))?
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        for key in keys {
            table.remove(key.as_str())?;
        }
        Ok(())
    }

    fn apply_tag(&mut self, usage: &TagUsage) -> StorageResult<()> {
        let mut table = self.txn.open_table(TAG_USAGE)?;
        table.insert(tag_key(usage).as_str(), to_json(usage)?.as_slice())?;
        Ok(())
    }

    fn delete_tags_by_target(&mut self, target_type: &str, target_fqn: &str) -> StorageResult<()> {
        let mut table = self.txn.open_table(TAG_USAGE)?;
        let prefix = tag_target_prefix(target_type, target_fqn);
        let keys: Vec<String> = scan_prefix::<TagUsage, _>(&table, &prefix)?
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        for key in keys {
            table.remove(key.as_str())?;
        }
        Ok(())
    }

    fn delete_tags_by_target_prefix(&mut self, target_type: &str, prefix: &str) -> StorageResult<()> {
        let mut table = self.txn.open_table(TAG_USAGE)?;
        let keys: Vec<String> = scan_prefix::<TagUsage, _>(&table, &tag_type_prefix(target_type, prefix))?
            .into_iter()
            .filter(|(_, usage)| fqn::is_same_or_descendant(&usage.target_fqn, prefix))
            .map(|(key, _)| key)
            .collect();
        for key in keys {
            table.remove(key.as_str())?;
        }
        Ok(())
    }

    fn delete_tags_by_tag_prefix(&mut self, source: TagSource, prefix: &str) -> StorageResult<()> {
        self.remove_tags_where(|usage| {
            usage.source == source && fqn::is_same_or_descendant(&usage.tag_fqn, prefix)
        })
    }

    fn rename_tag_prefix(
        &mut self,
        source: TagSource,
        old_prefix: &str,
        new_prefix: &str,
    ) -> StorageResult<()> {
        self.rewrite_tags(|usage| {
            if usage.source != source {
                return None;
            }
            fqn::replace_prefix(&usage.tag_fqn, old_prefix, new_prefix).map(|tag_fqn| TagUsage {
                tag_fqn,
                ..usage.clone()
            })
        })
    }

    fn rename_target_prefix(
        &mut self,
        target_type: &str,
        old_prefix: &str,
        new_prefix: &str,
    ) -> StorageResult<()> {
        self.rewrite_tags(|usage| {
            if usage.target_type != target_type {
                return None;
            }
            fqn::replace_prefix(&usage.target_fqn, old_prefix, new_prefix).map(|target_fqn| {
                TagUsage {
                    target_fqn,
                    ..usage.clone()
                }
            })
        })
    }

    fn commit(self: Box<Self>) -> StorageResult<()> {
        self.txn.commit()?;
        Ok(())
    }
}
