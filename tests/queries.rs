//! # Query Engine Test Suite
//!
//! End-to-end checks of criteria evaluation, ordering, pagination, bulk
//! update and bulk delete through the public `Database` API.
//!
//! ## Test Categories
//!
//! 1. **Scenarios**: correlation update round trip, paginated delete
//! 2. **Pagination**: pages reconstruct the sorted result
//! 3. **Index / scan equivalence**: every criteria tree answers the same
//!    with and without indexes
//! 4. **Operators and trees**: OR domains, AND restriction, LIKE, null tests

use std::collections::BTreeSet;

use quarry::{
    AttributeDescriptor, AttributeType, AttributeUpdate, Database, EntityDescriptor, IdGenerator,
    Operator, Query, QueryCriteria, QueryOrder, Record, Value,
};

// ============================================================================
// HELPER FUNCTIONS
// ============================================================================

fn signal() -> EntityDescriptor {
    EntityDescriptor::builder("Signal")
        .identifier("id", AttributeType::Long, IdGenerator::Sequence)
        .attribute(AttributeDescriptor::new("correlation", AttributeType::Int))
        .build()
        .unwrap()
}

fn person() -> EntityDescriptor {
    EntityDescriptor::builder("Person")
        .identifier("id", AttributeType::Long, IdGenerator::Sequence)
        .attribute(AttributeDescriptor::new("name", AttributeType::Text))
        .attribute(AttributeDescriptor::new("age", AttributeType::Int))
        .attribute(AttributeDescriptor::new("city", AttributeType::Text))
        .attribute(AttributeDescriptor::new("stamp", AttributeType::Long))
        .index("age")
        .index("name")
        .index("city")
        .index("stamp")
        .build()
        .unwrap()
}

fn open() -> Database {
    Database::builder()
        .in_memory()
        .entity(signal())
        .entity(person())
        .open()
        .unwrap()
}

fn add_person(db: &Database, name: &str, age: Option<i32>, city: Option<&str>) -> Record {
    let mut record = db.new_record("Person").unwrap();
    record.set("name", name).unwrap();
    record.set("age", age).unwrap();
    record.set("city", city).unwrap();
    db.save(record).unwrap()
}

/// Just below 2^53 so neighbouring stamps collapse onto the same `f64`.
const STAMP_BASE: i64 = 9_007_199_254_740_990;

fn people(db: &Database) {
    let rows: [(&str, Option<i32>, Option<&str>); 12] = [
        ("Ada", Some(36), Some("London")),
        ("Alan", Some(41), Some("Manchester")),
        ("Anita", Some(29), Some("Oslo")),
        ("Bjarne", Some(72), Some("Oslo")),
        ("Barbara", Some(83), None),
        ("Claude", None, Some("Paris")),
        ("Dennis", Some(70), Some("Berkeley")),
        ("Edsger", Some(72), Some("Austin")),
        ("Grace", Some(85), Some("Arlington")),
        ("Ken", Some(80), Some("Berkeley")),
        ("Linus", Some(29), Some("Portland")),
        ("Margaret", Some(36), None),
    ];
    for (offset, (name, age, city)) in rows.into_iter().enumerate() {
        let mut record = add_person(db, name, age, city);
        record.set("stamp", STAMP_BASE + offset as i64).unwrap();
        db.save(record).unwrap();
    }
}

fn names(records: &[Record]) -> Vec<String> {
    records
        .iter()
        .map(|r| match r.get("name") {
            Some(Value::Text(name)) => name.clone(),
            other => panic!("expected text name, got {:?}", other),
        })
        .collect()
}

fn ids(db: &Database, query: &Query) -> BTreeSet<i64> {
    db.execute_query(query)
        .unwrap()
        .iter()
        .map(|r| r.id().as_i64().unwrap())
        .collect()
}

// ============================================================================
// SCENARIOS
// ============================================================================

#[test]
fn correlation_update_round_trip() {
    let db = open();
    let mut record = db.new_record("Signal").unwrap();
    record.set("correlation", 1).unwrap();
    db.save(record).unwrap();

    let positive = Query::new("Signal").criteria(QueryCriteria::new("correlation", Operator::GreaterThan, 0));
    assert_eq!(db.execute_query(&positive).unwrap().len(), 1);

    let streamed = db
        .stream(&positive, |mut record, db| {
            record.set("correlation", 5)?;
            db.save(record)?;
            Ok(())
        })
        .unwrap();
    assert_eq!(streamed, 1);

    let five = Query::new("Signal").criteria(QueryCriteria::new("correlation", Operator::Equal, 5));
    let found = db.execute_query(&five).unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].get("correlation"), Some(&Value::Int(5)));

    let bump = five.clone().update(AttributeUpdate::new("correlation", 6));
    assert_eq!(db.execute_update(&bump).unwrap(), 1);
    assert!(db.execute_query(&five).unwrap().is_empty());
}

#[test]
fn paginated_delete_removes_only_the_page() {
    let db = open();
    for name in ["abc", "abd", "abe", "abf", "xyz"] {
        add_person(&db, name, Some(1), None);
    }

    let prefix = Query::new("Person")
        .criteria(QueryCriteria::new("name", Operator::StartsWith, "ab"))
        .order_by(QueryOrder::asc("name"));
    assert_eq!(db.execute_query(&prefix).unwrap().len(), 4);

    let deleted = db
        .execute_delete(&prefix.clone().first_row(2).max_results(1))
        .unwrap();
    assert_eq!(deleted, 1);

    let left = db.execute_query(&prefix).unwrap();
    assert_eq!(names(&left), vec!["abc", "abd", "abf"]);
    assert_eq!(db.list("Person").unwrap().len(), 4);
}

// ============================================================================
// PAGINATION
// ============================================================================

#[test]
fn pages_reconstruct_sorted_result() {
    let db = open();
    people(&db);

    let sorted = Query::new("Person")
        .order_by(QueryOrder::desc("age"))
        .order_by(QueryOrder::asc("name"));
    let full = names(&db.execute_query(&sorted).unwrap());
    assert_eq!(full.len(), 12);
    assert_eq!(full.first().map(String::as_str), Some("Grace"));
    assert_eq!(full.last().map(String::as_str), Some("Claude"));

    for page_size in [1, 5, 7, 12, 20] {
        let mut rebuilt = Vec::new();
        let mut first = 0;
        while first < full.len() + page_size {
            let page = names(
                &db.execute_query(&sorted.clone().first_row(first).max_results(page_size))
                    .unwrap(),
            );
            let end = (first + page_size).min(full.len());
            let expected = if first < full.len() { &full[first..end] } else { &[][..] };
            assert_eq!(page, expected, "page at {} of size {}", first, page_size);
            rebuilt.extend(page);
            first += page_size;
        }
        assert_eq!(rebuilt, full);
    }
}

#[test]
fn nulls_sort_last_in_both_directions() {
    let db = open();
    people(&db);

    let asc = names(&db.execute_query(&Query::new("Person").order_by(QueryOrder::asc("city"))).unwrap());
    let desc = names(&db.execute_query(&Query::new("Person").order_by(QueryOrder::desc("city"))).unwrap());
    assert_eq!(asc.first().map(String::as_str), Some("Grace"));
    assert_eq!(desc.first().map(String::as_str), Some("Linus"));
    for order in [&asc, &desc] {
        let tail: BTreeSet<&str> = order[10..].iter().map(String::as_str).collect();
        assert_eq!(tail, BTreeSet::from(["Barbara", "Margaret"]));
    }
}

#[test]
fn count_ignores_pagination() {
    let db = open();
    people(&db);
    let query = Query::new("Person")
        .criteria(QueryCriteria::new("age", Operator::GreaterThan, 60))
        .first_row(1)
        .max_results(2);
    assert_eq!(db.count(&query).unwrap(), 6);
    assert_eq!(db.execute_query(&query).unwrap().len(), 2);
}

// ============================================================================
// INDEX / SCAN EQUIVALENCE
// ============================================================================

fn criteria_trees() -> Vec<QueryCriteria> {
    vec![
        QueryCriteria::new("age", Operator::Equal, 72),
        QueryCriteria::new("age", Operator::Equal, 72i64),
        QueryCriteria::new("age", Operator::In, vec![Value::Int(29), Value::Long(36), Value::Int(1)]),
        QueryCriteria::new("age", Operator::GreaterThan, 70),
        QueryCriteria::new("age", Operator::GreaterThanEqual, 70),
        QueryCriteria::new("age", Operator::LessThan, 36),
        QueryCriteria::new("age", Operator::LessThanEqual, 36.5),
        QueryCriteria::new("name", Operator::StartsWith, "A"),
        QueryCriteria::new("city", Operator::NotEqual, "Oslo"),
        QueryCriteria::is_null("city"),
        QueryCriteria::not_null("age"),
        QueryCriteria::new("age", Operator::Equal, Value::Null),
        QueryCriteria::new("age", Operator::GreaterThan, 30)
            .and(QueryCriteria::new("city", Operator::Equal, "Berkeley")),
        QueryCriteria::new("age", Operator::LessThan, 30)
            .or(QueryCriteria::new("city", Operator::StartsWith, "B")),
        QueryCriteria::new("name", Operator::StartsWith, "A")
            .or(QueryCriteria::new("age", Operator::GreaterThan, 80))
            .and(QueryCriteria::new("city", Operator::NotEqual, "Oslo")),
        QueryCriteria::new("age", Operator::GreaterThan, 20).and(
            QueryCriteria::new("city", Operator::Equal, "Oslo")
                .or(QueryCriteria::new("city", Operator::Equal, "Berkeley")),
        ),
        QueryCriteria::new("id", Operator::In, vec![Value::Long(1), Value::Int(3), Value::Long(99)]),
        QueryCriteria::new("id", Operator::GreaterThan, 9),
        QueryCriteria::new("stamp", Operator::Equal, Value::Double(9_007_199_254_740_992.0)),
        QueryCriteria::new("stamp", Operator::Equal, Value::Long(9_007_199_254_740_993)),
        QueryCriteria::new(
            "stamp",
            Operator::In,
            vec![Value::Double(9_007_199_254_740_994.0), Value::Double(9_007_199_254_740_996.0)],
        ),
    ]
}

#[test]
fn indexed_and_scanned_results_agree() {
    let db = open();
    people(&db);

    for criteria in criteria_trees() {
        let indexed = Query::new("Person").criteria(criteria.clone());
        let scanned = indexed.clone().use_indexes(false);
        assert_eq!(ids(&db, &indexed), ids(&db, &scanned), "criteria {}", criteria);
    }
}

#[test]
fn large_integers_match_floats_exactly() {
    let db = open();
    people(&db);

    let rounded = Query::new("Person")
        .criteria(QueryCriteria::new("stamp", Operator::Equal, Value::Double(9_007_199_254_740_992.0)));
    assert_eq!(names(&db.execute_query(&rounded).unwrap()), vec!["Anita"]);
    assert_eq!(names(&db.execute_query(&rounded.use_indexes(false)).unwrap()), vec!["Anita"]);

    // neighbours of 9_007_199_254_740_996 round to the same double but must not match
    let even = Query::new("Person").criteria(QueryCriteria::new(
        "stamp",
        Operator::In,
        vec![Value::Double(9_007_199_254_740_996.0)],
    ));
    assert_eq!(names(&db.execute_query(&even).unwrap()), vec!["Dennis"]);
    assert_eq!(db.count(&even.use_indexes(false)).unwrap(), 1);
}

#[test]
fn equivalence_survives_updates_and_deletes() {
    let db = open();
    people(&db);

    let older = Query::new("Person")
        .criteria(QueryCriteria::new("age", Operator::GreaterThan, 70))
        .update(AttributeUpdate::new("age", 30));
    assert_eq!(db.execute_update(&older).unwrap(), 5);
    let oslo = Query::new("Person").criteria(QueryCriteria::new("city", Operator::Equal, "Oslo"));
    assert_eq!(db.execute_delete(&oslo).unwrap(), 2);

    for criteria in criteria_trees() {
        let indexed = Query::new("Person").criteria(criteria.clone());
        let scanned = indexed.clone().use_indexes(false);
        assert_eq!(ids(&db, &indexed), ids(&db, &scanned), "criteria {}", criteria);
    }
}

// ============================================================================
// OPERATORS AND TREES
// ============================================================================

#[test]
fn or_branch_is_a_union_and_and_restricts() {
    let db = open();
    people(&db);

    let query = Query::new("Person")
        .criteria(
            QueryCriteria::new("city", Operator::Equal, "Oslo")
                .or(QueryCriteria::new("city", Operator::Equal, "Berkeley"))
                .and(QueryCriteria::new("age", Operator::GreaterThanEqual, 72)),
        )
        .order_by(QueryOrder::asc("name"));
    assert_eq!(names(&db.execute_query(&query).unwrap()), vec!["Bjarne", "Ken"]);
}

#[test]
fn like_is_case_insensitive() {
    let db = open();
    people(&db);

    let like = Query::new("Person")
        .criteria(QueryCriteria::new("name", Operator::Like, "a%a"))
        .order_by(QueryOrder::asc("name"));
    assert_eq!(names(&db.execute_query(&like).unwrap()), vec!["Ada", "Anita"]);

    let single = Query::new("Person").criteria(QueryCriteria::new("name", Operator::Like, "_en"));
    assert_eq!(names(&db.execute_query(&single).unwrap()), vec!["Ken"]);

    let not_like = Query::new("Person").criteria(QueryCriteria::new("city", Operator::NotLike, "%o%"));
    assert_eq!(db.count(&not_like).unwrap(), 7);
}

#[test]
fn unknown_attribute_is_reported() {
    let db = open();
    people(&db);
    let query = Query::new("Person").criteria(QueryCriteria::new("height", Operator::Equal, 1));
    let err = db.execute_query(&query).unwrap_err();
    assert_eq!(
        err.downcast_ref::<quarry::EntityError>().unwrap().kind(),
        "attribute_missing"
    );
}

#[test]
fn terminated_query_returns_early() {
    let db = open();
    people(&db);
    let query = Query::new("Person").criteria(QueryCriteria::not_null("name"));
    query.terminate();
    assert!(db.execute_query(&query).unwrap().is_empty());
}

#[test]
fn projection_keeps_selection_order() {
    let db = open();
    people(&db);
    let rows = db
        .execute_attribute_query(
            &Query::new("Person")
                .criteria(QueryCriteria::new("name", Operator::Equal, "Ada"))
                .select(["city", "age"]),
        )
        .unwrap();
    assert_eq!(
        rows,
        vec![vec![
            ("city".to_string(), Value::Text("London".into())),
            ("age".to_string(), Value::Int(36)),
        ]]
    );
}
