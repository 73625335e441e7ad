//! Metacat Cache - Read-through entity cache
//!
//! Two bounded caches with a fixed time to live hold the latest stored
//! snapshot of an entity, one keyed by id and one keyed by fully qualified
//! name. Writers invalidate both keys of every entity they touch once their
//! transaction has committed; readers that need a fresh copy invalidate before
//! loading.
//!
//! A load that overlaps an invalidation may have read the store before the
//! writer committed. Every invalidation bumps a generation counter, and a
//! loader that sees the generation move during its load drops the entry it
//! just cached instead of leaving the stale snapshot behind.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use metacat_core::{Entity, EntityId};
use moka::future::Cache;
use serde::{Deserialize, Serialize};

/// Default number of entries per cache
pub const DEFAULT_CAPACITY: u64 = 5000;

/// Default time to live of an entry
pub const DEFAULT_TTL_SECS: u64 = 30;

/// Cache sizing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Maximum entries in each of the two caches
    pub capacity: u64,
    /// Seconds an entry stays valid after it was written
    pub ttl_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            ttl_secs: DEFAULT_TTL_SECS,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }
}

type IdKey = (String, EntityId);
type NameKey = (String, String);

/// Entity snapshot cache keyed by id and by fqn
pub struct EntityCache {
    by_id: Cache<IdKey, Arc<Entity>>,
    by_name: Cache<NameKey, Arc<Entity>>,
    hits: AtomicU64,
    misses: AtomicU64,
    /// Also the invalidation generation
    invalidations: AtomicU64,
}

impl EntityCache {
    pub fn new(max_capacity: u64, ttl: Duration) -> Self {
        let by_id = Cache::builder().max_capacity(max_capacity).time_to_live(ttl).build();
        let by_name = Cache::builder().max_capacity(max_capacity).time_to_live(ttl).build();

        Self {
            by_id,
            by_name,
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            invalidations: AtomicU64::new(0),
        }
    }

    pub fn from_config(config: &CacheConfig) -> Self {
        Self::new(config.capacity, config.ttl())
    }

    /// Cached snapshot by id, if present
    pub async fn get_by_id(&self, entity_type: &str, id: &EntityId) -> Option<Arc<Entity>> {
        let result = self.by_id.get(&(entity_type.to_string(), *id)).await;
        self.record(result.is_some());
        result
    }

    /// Cached snapshot by fqn, if present
    pub async fn get_by_name(&self, entity_type: &str, fqn: &str) -> Option<Arc<Entity>> {
        let result = self.by_name.get(&(entity_type.to_string(), fqn.to_string())).await;
        self.record(result.is_some());
        result
    }

    /// Cached snapshot by id, loading it with `load` on a miss
    ///
    /// Concurrent misses for the same key share one load. A failed load is not
    /// cached.
    pub async fn get_or_load_by_id<F, E>(
        &self,
        entity_type: &str,
        id: &EntityId,
        load: F,
    ) -> Result<Arc<Entity>, Arc<E>>
    where
        F: Future<Output = Result<Entity, E>>,
        E: Send + Sync + 'static,
    {
        if let Some(entity) = self.get_by_id(entity_type, id).await {
            return Ok(entity);
        }
        tracing::trace!(entity_type, %id, "Entity cache miss by id");
        let key = (entity_type.to_string(), *id);
        let generation = self.generation();
        let loaded = self
            .by_id
            .try_get_with(key.clone(), async { load.await.map(Arc::new) })
            .await?;
        if self.generation() != generation {
            tracing::debug!(entity_type, %id, "Invalidated during load, not keeping entry");
            self.by_id.invalidate(&key).await;
        }
        Ok(loaded)
    }

    /// Cached snapshot by fqn, loading it with `load` on a miss
    pub async fn get_or_load_by_name<F, E>(
        &self,
        entity_type: &str,
        fqn: &str,
        load: F,
    ) -> Result<Arc<Entity>, Arc<E>>
    where
        F: Future<Output = Result<Entity, E>>,
        E: Send + Sync + 'static,
    {
        if let Some(entity) = self.get_by_name(entity_type, fqn).await {
            return Ok(entity);
        }
        tracing::trace!(entity_type, fqn, "Entity cache miss by name");
        let key = (entity_type.to_string(), fqn.to_string());
        let generation = self.generation();
        let loaded = self
            .by_name
            .try_get_with(key.clone(), async { load.await.map(Arc::new) })
            .await?;
        if self.generation() != generation {
            tracing::debug!(entity_type, fqn, "Invalidated during load, not keeping entry");
            self.by_name.invalidate(&key).await;
        }
        Ok(loaded)
    }

    #[cfg(test)]
    async fn put(&self, entity: Arc<Entity>) {
        let id_key = (entity.entity_type.clone(), entity.id);
        let name_key = (entity.entity_type.clone(), entity.fully_qualified_name.clone());
        self.by_id.insert(id_key, entity.clone()).await;
        self.by_name.insert(name_key, entity).await;
    }

    /// Drop the entries of one entity
    pub async fn invalidate(&self, entity_type: &str, id: &EntityId, fqn: &str) {
        self.bump_generation();
        self.by_id.invalidate(&(entity_type.to_string(), *id)).await;
        self.by_name
            .invalidate(&(entity_type.to_string(), fqn.to_string()))
            .await;
    }

    /// Drop the id entry of an entity whose fqn is unknown to the caller
    pub async fn invalidate_id(&self, entity_type: &str, id: &EntityId) {
        self.bump_generation();
        self.by_id.invalidate(&(entity_type.to_string(), *id)).await;
    }

    /// Drop the fqn entry of an entity, used for names it no longer has
    pub async fn invalidate_name(&self, entity_type: &str, fqn: &str) {
        self.bump_generation();
        self.by_name
            .invalidate(&(entity_type.to_string(), fqn.to_string()))
            .await;
    }

    /// Invalidate all cache entries
    pub fn invalidate_all(&self) {
        self.bump_generation();
        self.by_id.invalidate_all();
        self.by_name.invalidate_all();
    }

    /// Apply pending evictions so entry counts are exact
    pub async fn run_pending_tasks(&self) {
        self.by_id.run_pending_tasks().await;
        self.by_name.run_pending_tasks().await;
    }

    pub fn stats(&self) -> CacheStats {
        let hits = self.hits.load(Ordering::Relaxed);
        let misses = self.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        let hit_rate = if total > 0 {
            (hits as f64 / total as f64) * 100.0
        } else {
            0.0
        };

        CacheStats {
            entry_count: self.by_id.entry_count() + self.by_name.entry_count(),
            hits,
            misses,
            hit_rate,
            invalidations: self.generation(),
        }
    }

    fn generation(&self) -> u64 {
        self.invalidations.load(Ordering::SeqCst)
    }

    fn bump_generation(&self) {
        self.invalidations.fetch_add(1, Ordering::SeqCst);
    }

    fn record(&self, hit: bool) {
        if hit {
            self.hits.fetch_add(1, Ordering::Relaxed);
        } else {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }
    }
}

impl Default for EntityCache {
    fn default() -> Self {
        Self::from_config(&CacheConfig::default())
    }
}

/// Cache counters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheStats {
    pub entry_count: u64,
    pub hits: u64,
    pub misses: u64,
    pub hit_rate: f64,
    pub invalidations: u64,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    fn table(fqn: &str) -> Entity {
        let mut entity = Entity::new("table", fqn.rsplit('.').next().unwrap());
        entity.fully_qualified_name = fqn.to_string();
        entity
    }

    #[tokio::test]
    async fn test_load_once_then_hit() {
        let cache = EntityCache::default();
        let entity = table("svc.db.orders");
        let loads = AtomicUsize::new(0);

        for _ in 0..3 {
            let loaded = cache
                .get_or_load_by_id("table", &entity.id, async {
                    loads.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(entity.clone())
                })
                .await
                .unwrap();
            assert_eq!(loaded.id, entity.id);
        }

        assert_eq!(loads.load(Ordering::SeqCst), 1);
        let stats = cache.stats();
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.misses, 1);
    }

    #[tokio::test]
    async fn test_failed_load_is_not_cached() {
        let cache = EntityCache::default();
        let id = EntityId::new();

        let err = cache
            .get_or_load_by_name("table", "svc.db.missing", async { Err::<Entity, _>("not found".to_string()) })
            .await
            .unwrap_err();
        assert_eq!(err.as_str(), "not found");
        assert!(cache.get_by_id("table", &id).await.is_none());
        assert!(cache.get_by_name("table", "svc.db.missing").await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_drops_both_keys() {
        let cache = EntityCache::default();
        let entity = table("svc.db.orders");
        cache.put(Arc::new(entity.clone())).await;

        assert!(cache.get_by_id("table", &entity.id).await.is_some());
        assert!(cache.get_by_name("table", "svc.db.orders").await.is_some());

        cache.invalidate("table", &entity.id, "svc.db.orders").await;
        assert!(cache.get_by_id("table", &entity.id).await.is_none());
        assert!(cache.get_by_name("table", "svc.db.orders").await.is_none());
        assert_eq!(cache.stats().invalidations, 1);
    }

    #[tokio::test]
    async fn test_invalidation_during_load_is_not_lost() {
        let cache = EntityCache::default();
        let stale = table("svc.db.orders");
        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let (resume_tx, resume_rx) = tokio::sync::oneshot::channel::<()>();

        // The reader loads the old snapshot, then the writer commits and
        // invalidates before the reader's insert lands.
        let reader = cache.get_or_load_by_id("table", &stale.id, async {
            let _ = started_tx.send(());
            let _ = resume_rx.await;
            Ok::<_, String>(stale.clone())
        });
        let writer = async {
            let _ = started_rx.await;
            cache.invalidate("table", &stale.id, "svc.db.orders").await;
            let _ = resume_tx.send(());
        };
        let (loaded, ()) = tokio::join!(reader, writer);

        assert_eq!(loaded.unwrap().id, stale.id);
        assert!(cache.get_by_id("table", &stale.id).await.is_none());
    }

    #[tokio::test]
    async fn test_load_without_invalidation_is_kept() {
        let cache = EntityCache::default();
        let entity = table("svc.db.orders");
        cache
            .get_or_load_by_name("table", "svc.db.orders", async { Ok::<_, String>(entity.clone()) })
            .await
            .unwrap();
        assert!(cache.get_by_name("table", "svc.db.orders").await.is_some());
    }

    #[tokio::test]
    async fn test_keys_are_scoped_by_type() {
        let cache = EntityCache::default();
        let entity = table("svc.db.orders");
        cache.put(Arc::new(entity.clone())).await;

        assert!(cache.get_by_name("database", "svc.db.orders").await.is_none());
        assert!(cache.get_by_id("database", &entity.id).await.is_none());
    }

    #[tokio::test]
    async fn test_entries_expire_after_ttl() {
        let cache = EntityCache::new(100, Duration::from_millis(50));
        let entity = table("svc.db.orders");
        cache.put(Arc::new(entity.clone())).await;

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(cache.get_by_id("table", &entity.id).await.is_none());
    }

    #[tokio::test]
    async fn test_invalidate_all() {
        let cache = EntityCache::default();
        for name in ["a", "b", "c"] {
            cache.put(Arc::new(table(&format!("svc.db.{}", name)))).await;
        }
        cache.run_pending_tasks().await;
        assert_eq!(cache.stats().entry_count, 6);

        cache.invalidate_all();
        cache.run_pending_tasks().await;
        assert_eq!(cache.stats().entry_count, 0);
    }

    #[test]
    fn test_config_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.capacity, 5000);
        assert_eq!(config.ttl(), Duration::from_secs(30));
    }
}
