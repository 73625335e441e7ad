//! Schema migrations for Metacat storage backends
//!
//! A backend records the schema version it was last migrated to and replays
//! every later migration when it is opened.

use crate::{StorageError, StorageResult};

/// Current schema version
pub const CURRENT_VERSION: u32 = 1;

/// Schema migration information
#[derive(Debug, Clone)]
pub struct SchemaVersion {
    pub version: u32,
    pub description: &'static str,
}

/// All schema versions with their migrations
pub fn get_migrations() -> Vec<SchemaVersion> {
    vec![SchemaVersion {
        version: 1,
        description: "Entity, name index, relationship, extension, tag usage and meta tables",
    }]
}

/// Migration trait for storage backends
pub trait Migratable {
    /// Schema version recorded in storage, 0 for a fresh store
    fn get_schema_version(&self) -> StorageResult<u32>;

    fn set_schema_version(&self, version: u32) -> StorageResult<()>;

    /// Apply the changes introduced by `version`
    fn run_migration(&self, version: u32) -> StorageResult<()>;

    /// Run migrations from the recorded version up to `target_version`
    ///
    /// A store written by a newer release is refused rather than downgraded.
    fn migrate_to(&self, target_version: u32) -> StorageResult<()> {
        let current = self.get_schema_version()?;

        if current == target_version {
            tracing::debug!("Schema already at version {}", target_version);
            return Ok(());
        }

        if current > target_version {
            return Err(StorageError::Migration(format!(
                "Schema version {} is newer than supported version {}",
                current, target_version
            )));
        }

        tracing::info!("Migrating schema from v{} to v{}", current, target_version);
        for version in (current + 1)..=target_version {
            self.run_migration(version)?;
            self.set_schema_version(version)?;
            tracing::info!("Migrated to schema version {}", version);
        }
        Ok(())
    }

    fn migrate_to_latest(&self) -> StorageResult<()> {
        self.migrate_to(CURRENT_VERSION)
    }
}
