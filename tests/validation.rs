//! # Save Validation Test Suite
//!
//! Every save is validated before anything is written. Each failure surfaces
//! as a typed `EntityError` that callers can match on.

use quarry::{
    AttributeDescriptor, AttributeType, Database, EntityDescriptor, EntityError, IdGenerator,
    Query, Value,
};

fn kind(err: &eyre::Report) -> &'static str {
    err.downcast_ref::<EntityError>()
        .unwrap_or_else(|| panic!("not an entity error: {:#}", err))
        .kind()
}

fn account() -> EntityDescriptor {
    EntityDescriptor::builder("Account")
        .identifier("code", AttributeType::Text, IdGenerator::None)
        .attribute(AttributeDescriptor::new("owner", AttributeType::Text).not_null().max_size(8))
        .attribute(AttributeDescriptor::new("balance", AttributeType::Long))
        .attribute(AttributeDescriptor::new("ratio", AttributeType::Double))
        .build()
        .unwrap()
}

fn open() -> Database {
    Database::builder().in_memory().entity(account()).open().unwrap()
}

#[test]
fn identifier_is_required_without_generator() {
    let db = open();
    let mut record = db.new_record("Account").unwrap();
    record.set("owner", "ann").unwrap();
    assert_eq!(kind(&db.save(record).unwrap_err()), "identifier_required");
    assert!(db.list("Account").unwrap().is_empty());
}

#[test]
fn non_null_and_size_limits() {
    let db = open();
    let mut record = db.new_record("Account").unwrap();
    record.set("code", "A-1").unwrap();
    assert_eq!(kind(&db.save(record.clone()).unwrap_err()), "attribute_non_null");

    record.set("owner", "exactly8").unwrap();
    db.save(record.clone()).unwrap();

    record.set("owner", "ninechars").unwrap();
    assert_eq!(kind(&db.save(record).unwrap_err()), "attribute_size");
    assert_eq!(
        db.find_by_id("Account", "A-1").unwrap().get("owner"),
        Some(&Value::Text("exactly8".into()))
    );
}

#[test]
fn values_widen_but_never_narrow() {
    let db = open();
    let mut record = db.new_record("Account").unwrap();
    record.set("balance", 7i32).unwrap();
    assert_eq!(record.get("balance"), Some(&Value::Long(7)));
    record.set("ratio", 2i32).unwrap();
    assert_eq!(record.get("ratio"), Some(&Value::Double(2.0)));

    assert_eq!(kind(&record.set("balance", "seven").unwrap_err()), "attribute_type_mismatch");
    assert_eq!(kind(&record.set("owner", 3i64).unwrap_err()), "attribute_type_mismatch");
    assert_eq!(kind(&record.set("nickname", "x").unwrap_err()), "attribute_missing");
}

#[test]
fn find_by_id_with_wrong_type_is_a_mismatch() {
    let db = open();
    let err = db.find_by_id("Account", 12i64).unwrap_err();
    assert_eq!(kind(&err), "attribute_type_mismatch");
    assert_eq!(kind(&db.find_by_id("Account", "missing").unwrap_err()), "no_results");
}

#[test]
fn descriptor_rejects_bad_identifiers() {
    let sequence_on_text = EntityDescriptor::builder("Tag")
        .identifier("name", AttributeType::Text, IdGenerator::Sequence)
        .build()
        .unwrap_err();
    assert_eq!(kind(&sequence_on_text), "invalid_identifier");

    let missing = EntityDescriptor::builder("Tag")
        .attribute(AttributeDescriptor::new("name", AttributeType::Text))
        .build()
        .unwrap_err();
    assert_eq!(kind(&missing), "invalid_identifier");

    let double_id = EntityDescriptor::builder("Tag")
        .identifier("weight", AttributeType::Double, IdGenerator::None)
        .build()
        .unwrap_err();
    assert_eq!(kind(&double_id), "invalid_identifier");
}

#[test]
fn unknown_types_are_rejected() {
    let db = open();
    assert_eq!(kind(&db.new_record("Ledger").unwrap_err()), "unknown_entity_type");
    assert_eq!(kind(&db.execute_query(&Query::new("Ledger")).unwrap_err()), "unknown_entity_type");
    assert_eq!(kind(&db.find_by_id("Ledger", 1i64).unwrap_err()), "unknown_entity_type");
}
