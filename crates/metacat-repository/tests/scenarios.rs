//! End to end behavior of the repository over both storage backends

use std::sync::Arc;

use metacat_cache::EntityCache;
use metacat_core::{
    entity_types, ChangeEvent, Entity, EntityReference, EntityVersion, Error, EventType, Fields,
    Include, ListFilter, TagLabel,
};
use metacat_repository::{
    ChannelSink, DeleteOptions, EntityRepository, RepositoryConfig, TypeRegistry,
};
use metacat_storage::{MemoryStorage, RedbStorage, StorageBackend};
use serde_json::json;
use tempfile::TempDir;
use tokio::sync::mpsc::UnboundedReceiver;

const ALICE: &str = "alice";
const BOB: &str = "bob";

struct Catalog {
    repo: EntityRepository,
    events: UnboundedReceiver<ChangeEvent>,
    _dir: Option<TempDir>,
}

impl Catalog {
    fn build(storage: Arc<dyn StorageBackend>, config: RepositoryConfig, dir: Option<TempDir>) -> Self {
        let (sink, events) = ChannelSink::new();
        let repo = EntityRepository::new(
            storage,
            Arc::new(TypeRegistry::with_builtin_types()),
            Arc::new(EntityCache::default()),
            Arc::new(sink),
            config,
        );
        Self {
            repo,
            events,
            _dir: dir,
        }
    }

    fn in_memory() -> Self {
        Self::build(Arc::new(MemoryStorage::new()), RepositoryConfig::default(), None)
    }

    async fn on_disk() -> Self {
        let dir = tempfile::tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("catalog.redb")).unwrap();
        storage.initialize().await.unwrap();
        Self::build(Arc::new(storage), RepositoryConfig::default(), Some(dir))
    }

    fn drain(&mut self) -> Vec<ChangeEvent> {
        std::iter::from_fn(|| self.events.try_recv().ok()).collect()
    }

    async fn create(&self, entity: Entity) -> Entity {
        self.repo.create(entity, ALICE).await.unwrap()
    }

    async fn table(&self, service: &str, database: &str, table: &str) -> Entity {
        let service = match self
            .repo
            .get_by_name(entity_types::DATABASE_SERVICE, service, &Fields::none(), Include::All, true)
            .await
        {
            Ok(found) => found,
            Err(_) => self.create(Entity::new(entity_types::DATABASE_SERVICE, service)).await,
        };
        let db_fqn = format!("{}.{}", service.fully_qualified_name, database);
        let db = match self
            .repo
            .get_by_name(entity_types::DATABASE, &db_fqn, &Fields::none(), Include::All, true)
            .await
        {
            Ok(found) => found,
            Err(_) => {
                self.create(Entity::new(entity_types::DATABASE, database).with_parent(service.to_reference()))
                    .await
            }
        };
        self.create(Entity::new(entity_types::TABLE, table).with_parent(db.to_reference()))
            .await
    }

    async fn classification_tag(&self, classification: &str, tag: &str) -> (Entity, Entity) {
        let classification = self
            .create(Entity::new(entity_types::CLASSIFICATION, classification))
            .await;
        let tag = self
            .create(Entity::new(entity_types::TAG, tag).with_parent(classification.to_reference()))
            .await;
        (classification, tag)
    }
}

fn tenths(v: u64) -> EntityVersion {
    EntityVersion::from_tenths(v)
}

#[tokio::test]
async fn created_entities_start_at_initial_version() {
    for catalog in [Catalog::in_memory(), Catalog::on_disk().await] {
        let table = catalog.table("svcX", "sales", "tableY").await;
        let fetched = catalog
            .repo
            .get(entity_types::TABLE, &table.id, &Fields::all(), Include::NonDeleted, false)
            .await
            .unwrap();
        assert_eq!(fetched.fully_qualified_name, "svcX.sales.tableY");
        assert_eq!(fetched.version, EntityVersion::INITIAL);
        assert!(fetched.change_description.is_none());
        assert_eq!(fetched.updated_by, ALICE);
    }
}

#[tokio::test]
async fn patch_adding_tag_bumps_minor_version() {
    let mut catalog = Catalog::on_disk().await;
    catalog.classification_tag("PII", "Sensitive").await;
    let table = catalog.table("svcX", "sales", "tableY").await;
    catalog.drain();

    let response = catalog
        .repo
        .patch(entity_types::TABLE, &table.id, &json!({"tags": [{"tagFQN": "PII.Sensitive"}]}), ALICE)
        .await
        .unwrap();
    let entity = response.entity;
    assert_eq!(response.event_type, EventType::EntityUpdated);
    assert_eq!(entity.version, tenths(2));
    assert_eq!(entity.tags, vec![TagLabel::classification("PII.Sensitive")]);

    let change = entity.change_description.unwrap();
    assert_eq!(change.previous_version, EntityVersion::INITIAL);
    assert_eq!(change.changed_fields(), vec!["tags"]);
    assert_eq!(change.fields_added.len(), 1);

    let events = catalog.drain();
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].previous_version, EntityVersion::INITIAL);
    assert_eq!(events[0].current_version, tenths(2));
}

#[tokio::test]
async fn same_user_edits_are_consolidated() {
    for catalog in [Catalog::in_memory(), Catalog::on_disk().await] {
        let table = catalog.table("svc", "sales", "orders").await;

        let first = catalog
            .repo
            .patch(entity_types::TABLE, &table.id, &json!({"description": "d1"}), ALICE)
            .await
            .unwrap()
            .entity;
        assert_eq!(first.version, tenths(2));

        let second = catalog
            .repo
            .patch(entity_types::TABLE, &table.id, &json!({"description": "d2"}), ALICE)
            .await
            .unwrap()
            .entity;
        assert_eq!(second.version, tenths(2));
        let change = second.change_description.unwrap();
        assert_eq!(change.previous_version, EntityVersion::INITIAL);
        assert_eq!(change.fields_added.len(), 1);
        assert_eq!(change.fields_added[0].name, "description");
        assert_eq!(change.fields_added[0].new_value, Some(json!("d2")));
        assert!(change.fields_updated.is_empty());

        let history = catalog.repo.list_versions(entity_types::TABLE, &table.id).unwrap();
        let versions: Vec<EntityVersion> = history.versions.iter().map(|e| e.version).collect();
        assert_eq!(versions, vec![tenths(2), EntityVersion::INITIAL]);
    }
}

#[tokio::test]
async fn other_users_start_a_new_version() {
    let catalog = Catalog::in_memory();
    let table = catalog.table("svc", "sales", "orders").await;

    catalog
        .repo
        .patch(entity_types::TABLE, &table.id, &json!({"description": "d1"}), ALICE)
        .await
        .unwrap();
    let by_bob = catalog
        .repo
        .patch(entity_types::TABLE, &table.id, &json!({"description": "d2"}), BOB)
        .await
        .unwrap()
        .entity;
    assert_eq!(by_bob.version, tenths(3));
    let change = by_bob.change_description.unwrap();
    assert_eq!(change.previous_version, tenths(2));
    assert_eq!(change.fields_updated[0].old_value, Some(json!("d1")));
}

#[tokio::test]
async fn session_timeout_zero_disables_consolidation() {
    let config = RepositoryConfig {
        session_timeout_secs: 0,
    };
    let catalog = Catalog::build(Arc::new(MemoryStorage::new()), config, None);
    let table = catalog.table("svc", "sales", "orders").await;

    for description in ["d1", "d2"] {
        catalog
            .repo
            .patch(entity_types::TABLE, &table.id, &json!({"description": description}), ALICE)
            .await
            .unwrap();
    }
    let history = catalog.repo.list_versions(entity_types::TABLE, &table.id).unwrap();
    assert_eq!(history.versions.len(), 3);
    assert_eq!(history.versions[0].version, tenths(3));
}

#[tokio::test]
async fn undoing_own_edit_restores_previous_version() {
    let mut catalog = Catalog::in_memory();
    let table = catalog.table("svc", "sales", "orders").await;
    catalog.drain();

    catalog
        .repo
        .patch(entity_types::TABLE, &table.id, &json!({"description": "oops"}), ALICE)
        .await
        .unwrap();
    let reverted = catalog
        .repo
        .patch(entity_types::TABLE, &table.id, &json!({"description": null}), ALICE)
        .await
        .unwrap();
    assert_eq!(reverted.event_type, EventType::EntityUpdated);
    assert_eq!(reverted.entity.version, EntityVersion::INITIAL);
    assert!(reverted.entity.description.is_none());
    assert!(reverted.entity.change_description.is_none());

    let history = catalog.repo.list_versions(entity_types::TABLE, &table.id).unwrap();
    assert_eq!(history.versions.len(), 1);
    assert_eq!(catalog.drain().len(), 2);
}

#[tokio::test]
async fn update_without_differences_is_no_change() {
    let mut catalog = Catalog::in_memory();
    let table = catalog.table("svc", "sales", "orders").await;
    catalog.drain();

    let response = catalog
        .repo
        .update(entity_types::TABLE, &table.id, table.clone(), BOB)
        .await
        .unwrap();
    assert_eq!(response.event_type, EventType::EntityNoChange);
    assert_eq!(response.entity.version, EntityVersion::INITIAL);
    assert_eq!(response.entity.updated_by, ALICE);

    let patched = catalog
        .repo
        .patch(entity_types::TABLE, &table.id, &json!({}), BOB)
        .await
        .unwrap();
    assert_eq!(patched.event_type, EventType::EntityNoChange);

    let history = catalog.repo.list_versions(entity_types::TABLE, &table.id).unwrap();
    assert_eq!(history.versions.len(), 1);
    assert!(catalog.drain().is_empty());
}

#[tokio::test]
async fn version_history_forms_an_unbroken_chain() {
    let catalog = Catalog::on_disk().await;
    let table = catalog.table("svc", "sales", "orders").await;

    let actors = ["u1", "u2", "u3", "u4"];
    for (i, actor) in actors.iter().enumerate() {
        catalog
            .repo
            .patch(
                entity_types::TABLE,
                &table.id,
                &json!({"description": format!("rev {}", i)}),
                actor,
            )
            .await
            .unwrap();
    }

    let history = catalog.repo.list_versions(entity_types::TABLE, &table.id).unwrap();
    assert_eq!(history.versions.len(), actors.len() + 1);
    for pair in history.versions.windows(2) {
        let (newer, older) = (&pair[0], &pair[1]);
        let change = newer.change_description.as_ref().unwrap();
        assert_eq!(change.previous_version, older.version);
    }

    let old = catalog
        .repo
        .get_version(entity_types::TABLE, &table.id, tenths(3))
        .unwrap();
    assert_eq!(old.description.as_deref(), Some("rev 1"));
    let missing = catalog
        .repo
        .get_version(entity_types::TABLE, &table.id, tenths(40))
        .unwrap_err();
    assert!(missing.is_not_found());
}

#[tokio::test]
async fn delete_with_children_requires_recursive() {
    for mut catalog in [Catalog::in_memory(), Catalog::on_disk().await] {
        let orders = catalog.table("svc", "sales", "orders").await;
        catalog.table("svc", "sales", "items").await;
        let db = orders.parent.clone().unwrap();
        catalog.drain();

        let err = catalog
            .repo
            .delete(entity_types::DATABASE, &db.id, ALICE, DeleteOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotEmpty(_)));
        assert!(catalog.drain().is_empty());

        let options = DeleteOptions {
            recursive: true,
            hard: false,
        };
        let deleted = catalog
            .repo
            .delete(entity_types::DATABASE, &db.id, ALICE, options)
            .await
            .unwrap();
        assert_eq!(deleted.event_type, EventType::EntitySoftDeleted);
        assert!(deleted.entity.deleted);

        let events = catalog.drain();
        assert_eq!(events.len(), 3);
        assert!(events.iter().all(|e| e.event_type == EventType::EntitySoftDeleted));
        assert_eq!(events[2].fqn, "svc.sales");

        let hidden = catalog
            .repo
            .get(entity_types::TABLE, &orders.id, &Fields::none(), Include::NonDeleted, true)
            .await;
        assert!(hidden.unwrap_err().is_not_found());
        let visible = catalog
            .repo
            .get(entity_types::TABLE, &orders.id, &Fields::none(), Include::Deleted, true)
            .await
            .unwrap();
        assert!(visible.deleted);
    }
}

#[tokio::test]
async fn restore_brings_back_children() {
    let mut catalog = Catalog::in_memory();
    let orders = catalog.table("svc", "sales", "orders").await;
    let db = orders.parent.clone().unwrap();
    let options = DeleteOptions {
        recursive: true,
        hard: false,
    };
    catalog
        .repo
        .delete(entity_types::DATABASE, &db.id, ALICE, options)
        .await
        .unwrap();
    let deleted_version = catalog
        .repo
        .get(entity_types::TABLE, &orders.id, &Fields::none(), Include::All, true)
        .await
        .unwrap()
        .version;
    catalog.drain();

    let restored = catalog
        .repo
        .restore(entity_types::DATABASE, &db.id, ALICE)
        .await
        .unwrap();
    assert_eq!(restored.event_type, EventType::EntityRestored);
    assert!(!restored.entity.deleted);

    let table = catalog
        .repo
        .get(entity_types::TABLE, &orders.id, &Fields::all(), Include::NonDeleted, true)
        .await
        .unwrap();
    assert!(!table.deleted);
    assert!(table.version > deleted_version);
    assert_eq!(table.parent.unwrap().id, db.id);

    let events = catalog.drain();
    assert_eq!(events.len(), 2);
    assert!(events.iter().all(|e| e.event_type == EventType::EntityRestored));

    let err = catalog
        .repo
        .restore(entity_types::DATABASE, &db.id, ALICE)
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}

#[tokio::test]
async fn put_on_soft_deleted_entity_restores_it() {
    let catalog = Catalog::in_memory();
    let user = catalog.create(Entity::new(entity_types::USER, "carol")).await;
    catalog
        .repo
        .delete(entity_types::USER, &user.id, ALICE, DeleteOptions::default())
        .await
        .unwrap();

    let response = catalog
        .repo
        .create_or_update(Entity::new(entity_types::USER, "carol").with_description("back"), ALICE)
        .await
        .unwrap();
    assert_eq!(response.entity.id, user.id);
    assert!(!response.entity.deleted);
    assert_eq!(response.entity.description.as_deref(), Some("back"));
}

#[tokio::test]
async fn renaming_classification_moves_tags() {
    for catalog in [Catalog::in_memory(), Catalog::on_disk().await] {
        let (pii, _ssn) = catalog.classification_tag("PII", "SSN").await;
        let table = catalog.table("svc", "hr", "people").await;
        catalog
            .repo
            .patch(entity_types::TABLE, &table.id, &json!({"tags": [{"tagFQN": "PII.SSN"}]}), ALICE)
            .await
            .unwrap();

        // Warm the cache under the old name
        catalog
            .repo
            .get_by_name(entity_types::TAG, "PII.SSN", &Fields::none(), Include::NonDeleted, true)
            .await
            .unwrap();

        let renamed = catalog
            .repo
            .patch(entity_types::CLASSIFICATION, &pii.id, &json!({"name": "PII2"}), ALICE)
            .await
            .unwrap()
            .entity;
        assert_eq!(renamed.fully_qualified_name, "PII2");
        assert_eq!(
            renamed.change_description.unwrap().fields_updated[0].name,
            "name"
        );

        let tag = catalog
            .repo
            .get_by_name(entity_types::TAG, "PII2.SSN", &Fields::all(), Include::NonDeleted, true)
            .await
            .unwrap();
        assert_eq!(tag.parent.unwrap().fully_qualified_name, "PII2");
        let old = catalog
            .repo
            .get_by_name(entity_types::TAG, "PII.SSN", &Fields::none(), Include::NonDeleted, true)
            .await;
        assert!(old.unwrap_err().is_not_found());

        let table = catalog
            .repo
            .get(entity_types::TABLE, &table.id, &Fields::parse("tags").unwrap(), Include::NonDeleted, true)
            .await
            .unwrap();
        assert_eq!(table.tags[0].tag_fqn, "PII2.SSN");
    }
}

#[tokio::test]
async fn column_changes_drive_versions() {
    let catalog = Catalog::in_memory();
    catalog.classification_tag("PII", "Sensitive").await;
    let service = catalog.create(Entity::new(entity_types::DATABASE_SERVICE, "svc")).await;
    let db = catalog
        .create(Entity::new(entity_types::DATABASE, "sales").with_parent(service.to_reference()))
        .await;
    let table = catalog
        .create(
            Entity::new(entity_types::TABLE, "orders")
                .with_parent(db.to_reference())
                .with_attribute(
                    "columns",
                    json!([
                        {"name": "id", "dataType": "INT"},
                        {"name": "email", "dataType": "VARCHAR", "dataLength": 64,
                         "tags": [{"tagFQN": "PII.Sensitive"}]}
                    ]),
                ),
        )
        .await;

    let columns = table.attributes["columns"].as_array().unwrap();
    assert_eq!(columns[1]["fullyQualifiedName"], "svc.sales.orders.email");
    assert_eq!(columns[1]["tags"][0]["tagFQN"], "PII.Sensitive");

    let widened = catalog
        .repo
        .patch(
            entity_types::TABLE,
            &table.id,
            &json!({"attributes": {"columns": [
                {"name": "id", "dataType": "INT"},
                {"name": "email", "dataType": "VARCHAR", "dataLength": 128,
                 "tags": [{"tagFQN": "PII.Sensitive"}]}
            ]}}),
            BOB,
        )
        .await
        .unwrap()
        .entity;
    assert_eq!(widened.version, tenths(2));

    let dropped = catalog
        .repo
        .patch(
            entity_types::TABLE,
            &table.id,
            &json!({"attributes": {"columns": [{"name": "id", "dataType": "INT"}]}}),
            ALICE,
        )
        .await
        .unwrap()
        .entity;
    assert_eq!(dropped.version, EntityVersion::from_tenths(10));
    let change = dropped.change_description.unwrap();
    assert_eq!(change.fields_deleted[0].name, "columns");
}

#[tokio::test]
async fn listing_honors_parent_filter_and_deletion() {
    let catalog = Catalog::in_memory();
    let a = catalog.table("svc", "sales", "a").await;
    catalog.table("svc", "sales", "b").await;
    catalog.table("svc", "hr", "c").await;
    catalog
        .repo
        .delete(entity_types::TABLE, &a.id, ALICE, DeleteOptions::default())
        .await
        .unwrap();

    let live = catalog
        .repo
        .list_after(entity_types::TABLE, &ListFilter::default(), &Fields::none(), 10, None)
        .unwrap();
    assert_eq!(live.paging.total, 2);

    let sales = ListFilter::new(Include::All).with_parent("svc.sales");
    let page = catalog
        .repo
        .list_after(entity_types::TABLE, &sales, &Fields::parse("parent").unwrap(), 10, None)
        .unwrap();
    assert_eq!(page.len(), 2);
    assert!(page.data.iter().all(|t| t.parent.as_ref().unwrap().name == "sales"));
}

#[tokio::test]
async fn references_must_exist() {
    let catalog = Catalog::in_memory();
    let ghost = EntityReference::new(metacat_core::EntityId::new(), entity_types::USER);
    let err = catalog
        .repo
        .create(Entity::new(entity_types::DASHBOARD, "sales").with_owner(ghost), ALICE)
        .await
        .unwrap_err();
    assert!(err.is_not_found());

    let err = catalog
        .repo
        .create(
            Entity::new(entity_types::DASHBOARD, "sales").with_tag(TagLabel::classification("Nope.Tag")),
            ALICE,
        )
        .await
        .unwrap_err();
    assert!(err.is_not_found());
}
