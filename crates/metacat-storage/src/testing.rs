//! Behavior shared by every backend, run from each backend's tests

use crate::traits::StorageBackend;
use metacat_core::{
    Entity, EntityId, Include, ListFilter, RelationKind, Relationship, ScanRange, TagLabel, TagSource,
    TagUsage,
};
use serde_json::json;

pub(crate) fn entity(entity_type: &str, fqn: &str) -> Entity {
    let name = metacat_core::fqn::split(fqn).pop().unwrap_or_default();
    let mut entity = Entity::new(entity_type, name);
    entity.fully_qualified_name = fqn.to_string();
    entity
}

pub(crate) fn run_conformance(storage: &dyn StorageBackend) {
    entities(storage);
    rollback(storage);
    listing(storage);
    relationships(storage);
    extensions(storage);
    tags(storage);
    tags_are_scoped_by_target_type(storage);
}

fn entities(storage: &dyn StorageBackend) {
    let orders = entity("table", "svc.db.orders");
    let mut tx = storage.begin_write().unwrap();
    tx.insert_entity(&orders).unwrap();
    tx.commit().unwrap();

    let read = storage.begin_read().unwrap();
    assert_eq!(read.get_entity(&orders.id).unwrap().unwrap().name, "orders");
    assert_eq!(
        read.get_entity_by_name("table", "svc.db.orders").unwrap().unwrap().id,
        orders.id
    );
    assert!(read.get_entity_by_name("database", "svc.db.orders").unwrap().is_none());
    drop(read);

    // Same type and fqn under a new id
    let mut tx = storage.begin_write().unwrap();
    let err = tx.insert_entity(&entity("table", "svc.db.orders")).unwrap_err();
    assert!(matches!(err, crate::StorageError::DuplicateEntity(_)));
    drop(tx);

    // Rename re-keys the name index
    let mut renamed = orders.clone();
    renamed.name = "orders_v2".to_string();
    renamed.fully_qualified_name = "svc.db.orders_v2".to_string();
    let mut tx = storage.begin_write().unwrap();
    tx.update_entity(&renamed).unwrap();
    tx.commit().unwrap();

    let read = storage.begin_read().unwrap();
    assert!(read.get_entity_by_name("table", "svc.db.orders").unwrap().is_none());
    assert!(read.get_entity_by_name("table", "svc.db.orders_v2").unwrap().is_some());
    drop(read);

    let mut tx = storage.begin_write().unwrap();
    tx.delete_entity(&orders.id).unwrap();
    tx.commit().unwrap();
    let read = storage.begin_read().unwrap();
    assert!(read.get_entity(&orders.id).unwrap().is_none());
    assert!(read.get_entity_by_name("table", "svc.db.orders_v2").unwrap().is_none());
}

fn rollback(storage: &dyn StorageBackend) {
    let dropped = entity("table", "svc.db.dropped");
    {
        let mut tx = storage.begin_write().unwrap();
        tx.insert_entity(&dropped).unwrap();
        tx.put_extension(&dropped.id, "table.version.0.1", &json!({})).unwrap();
    }
    let read = storage.begin_read().unwrap();
    assert!(read.get_entity(&dropped.id).unwrap().is_none());
    assert!(read.list_extensions(&dropped.id, "").unwrap().is_empty());
}

fn listing(storage: &dyn StorageBackend) {
    let mut tx = storage.begin_write().unwrap();
    for name in ["a", "b", "c", "d"] {
        tx.insert_entity(&entity("dashboard", &format!("svc.{}", name))).unwrap();
    }
    let mut deleted = entity("dashboard", "svc.e");
    deleted.deleted = true;
    tx.insert_entity(&deleted).unwrap();
    tx.insert_entity(&entity("dashboard", "other.f")).unwrap();
    tx.commit().unwrap();

    let read = storage.begin_read().unwrap();
    let filter = ListFilter::default();
    let fqns = |entities: Vec<Entity>| -> Vec<String> {
        entities.into_iter().map(|e| e.fully_qualified_name).collect()
    };

    let first = read.list_entities("dashboard", &filter, &ScanRange::start(), 2).unwrap();
    assert_eq!(fqns(first), vec!["other.f", "svc.a"]);

    let next = read
        .list_entities("dashboard", &filter, &ScanRange::After(Some("svc.a".into())), 10)
        .unwrap();
    assert_eq!(fqns(next), vec!["svc.b", "svc.c", "svc.d"]);

    let before = read
        .list_entities("dashboard", &filter, &ScanRange::Before("svc.c".into()), 2)
        .unwrap();
    assert_eq!(fqns(before), vec!["svc.b", "svc.a"]);

    let under_svc = ListFilter::new(Include::All).with_parent("svc");
    assert_eq!(read.count_entities("dashboard", &under_svc).unwrap(), 5);
    assert_eq!(read.count_entities("dashboard", &filter).unwrap(), 5);
    assert_eq!(
        read.count_entities("dashboard", &ListFilter::new(Include::Deleted)).unwrap(),
        1
    );
    assert_eq!(read.count_entities("table", &filter).unwrap(), 0);
}

fn relationships(storage: &dyn StorageBackend) {
    let db = EntityId::new();
    let t1 = EntityId::new();
    let t2 = EntityId::new();
    let owner = EntityId::new();

    let mut tx = storage.begin_write().unwrap();
    tx.insert_relationship(&Relationship::new(db, "database", t1, "table", RelationKind::Contains))
        .unwrap();
    tx.insert_relationship(&Relationship::new(db, "database", t2, "table", RelationKind::Contains))
        .unwrap();
    tx.insert_relationship(&Relationship::new(owner, "user", t1, "table", RelationKind::Owns))
        .unwrap();
    tx.commit().unwrap();

    let read = storage.begin_read().unwrap();
    assert_eq!(read.find_to(&db, RelationKind::Contains, None).unwrap().len(), 2);
    assert_eq!(read.find_to(&db, RelationKind::Contains, Some("dashboard")).unwrap().len(), 0);
    let owners = read.find_from(&t1, RelationKind::Owns, Some("user")).unwrap();
    assert_eq!(owners.len(), 1);
    assert_eq!(owners[0].from_id, owner);
    drop(read);

    let mut tx = storage.begin_write().unwrap();
    assert!(tx.delete_relationship(&db, &t2, RelationKind::Contains).unwrap());
    assert!(!tx.delete_relationship(&db, &t2, RelationKind::Contains).unwrap());
    assert_eq!(tx.delete_all_relationships(&t1).unwrap(), 2);
    tx.commit().unwrap();

    let read = storage.begin_read().unwrap();
    assert!(read.find_to(&db, RelationKind::Contains, None).unwrap().is_empty());
    drop(read);

    let mut tx = storage.begin_write().unwrap();
    tx.insert_relationship(&Relationship::new(owner, "user", t1, "table", RelationKind::Owns))
        .unwrap();
    tx.insert_relationship(&Relationship::new(owner, "user", t2, "table", RelationKind::Owns))
        .unwrap();
    assert_eq!(tx.delete_to(&t1, RelationKind::Owns, None).unwrap(), 1);
    assert_eq!(tx.delete_from(&owner, RelationKind::Owns, Some("table")).unwrap(), 1);
    assert!(tx.find_to(&owner, RelationKind::Owns, None).unwrap().is_empty());
}

fn extensions(storage: &dyn StorageBackend) {
    let id = EntityId::new();
    let mut tx = storage.begin_write().unwrap();
    tx.put_extension(&id, "table.version.0.1", &json!({"v": 1})).unwrap();
    tx.put_extension(&id, "table.version.0.2", &json!({"v": 2})).unwrap();
    tx.put_extension(&id, "table.extension.owner_team", &json!("core")).unwrap();
    tx.commit().unwrap();

    let read = storage.begin_read().unwrap();
    let versions = read.list_extensions(&id, "table.version.").unwrap();
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[0].0, "table.version.0.1");
    assert_eq!(
        read.get_extension(&id, "table.extension.owner_team").unwrap(),
        Some(json!("core"))
    );
    drop(read);

    let mut tx = storage.begin_write().unwrap();
    tx.delete_extension(&id, "table.version.0.1").unwrap();
    assert_eq!(tx.list_extensions(&id, "table.version.").unwrap().len(), 1);
    tx.delete_all_extensions(&id).unwrap();
    tx.commit().unwrap();

    let read = storage.begin_read().unwrap();
    assert!(read.list_extensions(&id, "").unwrap().is_empty());
}

fn tags(storage: &dyn StorageBackend) {
    let pii = TagLabel::classification("PII.Sensitive");
    let tier = TagLabel::classification("Tier.Tier1");

    let mut tx = storage.begin_write().unwrap();
    tx.apply_tag(&TagUsage::new(&tier, "table", "svc.db.orders")).unwrap();
    tx.apply_tag(&TagUsage::new(&pii, "table", "svc.db.orders")).unwrap();
    tx.apply_tag(&TagUsage::new(&pii, "table", "svc.db.orders.customer_id")).unwrap();
    tx.apply_tag(&TagUsage::new(&pii, "table", "svc.db.ordersx")).unwrap();
    tx.commit().unwrap();

    let read = storage.begin_read().unwrap();
    let tags = read.get_tags("table", "svc.db.orders").unwrap();
    assert_eq!(tags.len(), 2);
    assert_eq!(tags[0].tag_fqn, "PII.Sensitive");
    assert!(read.get_tags("topic", "svc.db.orders").unwrap().is_empty());
    drop(read);

    let mut tx = storage.begin_write().unwrap();
    tx.rename_tag_prefix(TagSource::Glossary, "PII", "PII3").unwrap();
    assert_eq!(tx.get_tags("table", "svc.db.orders").unwrap()[0].tag_fqn, "PII.Sensitive");
    tx.rename_tag_prefix(TagSource::Classification, "PII", "PII2").unwrap();
    assert_eq!(tx.get_tags("table", "svc.db.orders").unwrap()[0].tag_fqn, "PII2.Sensitive");

    tx.rename_target_prefix("table", "svc.db.orders", "svc.db.sales").unwrap();
    assert!(tx.get_tags("table", "svc.db.orders").unwrap().is_empty());
    assert_eq!(tx.get_tags("table", "svc.db.sales.customer_id").unwrap().len(), 1);
    assert_eq!(tx.get_tags("table", "svc.db.ordersx").unwrap().len(), 1);

    tx.delete_tags_by_target_prefix("table", "svc.db.sales").unwrap();
    assert!(tx.get_tags("table", "svc.db.sales").unwrap().is_empty());
    assert!(tx.get_tags("table", "svc.db.sales.customer_id").unwrap().is_empty());

    tx.delete_tags_by_tag_prefix(TagSource::Glossary, "PII2").unwrap();
    assert_eq!(tx.get_tags("table", "svc.db.ordersx").unwrap().len(), 1);
    tx.delete_tags_by_tag_prefix(TagSource::Classification, "PII2").unwrap();
    assert!(tx.get_tags("table", "svc.db.ordersx").unwrap().is_empty());

    tx.apply_tag(&TagUsage::new(&tier, "table", "svc.db.items")).unwrap();
    tx.delete_tags_by_target("table", "svc.db.items").unwrap();
    assert!(tx.get_tags("table", "svc.db.items").unwrap().is_empty());
    tx.commit().unwrap();
}

fn tags_are_scoped_by_target_type(storage: &dyn StorageBackend) {
    let tier = TagLabel::classification("Tier.Tier2");

    let mut tx = storage.begin_write().unwrap();
    tx.apply_tag(&TagUsage::new(&tier, "dashboard", "sales")).unwrap();
    tx.apply_tag(&TagUsage::new(&tier, "user", "sales")).unwrap();
    tx.commit().unwrap();

    let mut tx = storage.begin_write().unwrap();
    tx.delete_tags_by_target("user", "sales").unwrap();
    assert!(tx.get_tags("user", "sales").unwrap().is_empty());
    assert_eq!(tx.get_tags("dashboard", "sales").unwrap().len(), 1);

    tx.apply_tag(&TagUsage::new(&tier, "user", "sales")).unwrap();
    tx.delete_tags_by_target_prefix("user", "sales").unwrap();
    assert_eq!(tx.get_tags("dashboard", "sales").unwrap().len(), 1);

    tx.rename_target_prefix("dashboard", "sales", "revenue").unwrap();
    assert!(tx.get_tags("dashboard", "sales").unwrap().is_empty());
    let moved = tx.get_tags("dashboard", "revenue").unwrap();
    assert_eq!(moved.len(), 1);
    assert_eq!(moved[0].target_type, "dashboard");
    assert!(tx.get_tags("user", "revenue").unwrap().is_empty());
    tx.commit().unwrap();
}
