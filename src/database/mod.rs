//! # Database
//!
//! The public entry point. A [`Database`] is a cheap, cloneable handle over
//! one [`SchemaContext`]; every clone sees the same data files and the
//! context closes when the last clone drops (or on an explicit `close`).
//!
//! ```ignore
//! let db = Database::builder().path("./store").schema(schema).open()?;
//!
//! let mut person = db.new_record("Person")?;
//! person.set("name", "Ann")?;
//! person.set("age", 41)?;
//! let person = db.save(person)?;
//!
//! let adults = db.execute_query(
//!     &Query::new("Person").criteria(QueryCriteria::new("age", Operator::GreaterThanEqual, 18)),
//! )?;
//! ```
//!
//! ## Operations
//!
//! | Operation                   | Result                                     |
//! |-----------------------------|--------------------------------------------|
//! | `save` / `save_all`         | records with assigned identifiers          |
//! | `find` / `find_by_id`       | stored record or `EntityError::NoResults`  |
//! | `execute_query`             | hydrated records, sorted and paginated     |
//! | `execute_attribute_query`   | selected attributes only                   |
//! | `execute_update`            | count of updated records                   |
//! | `execute_delete`            | count of deleted records                   |
//! | `count`                     | matches, ignoring pagination               |
//! | `stream`                    | one record at a time to a callback         |
//!
//! ## Thread Safety
//!
//! `Database` is `Send + Sync`. Concurrent saves of different identifiers
//! proceed in parallel; saves of the same identifier serialize on its key
//! lock. There is no cross-record atomicity.

mod builder;

pub use builder::DatabaseBuilder;

use std::sync::Arc;

use eyre::Result;

use crate::context::SchemaContext;
use crate::index::IndexStatus;
use crate::query::{PartitionQueryController, PartitionSelection, Projection, Query};
use crate::record::Record;
use crate::schema::Schema;
use crate::types::Value;

#[derive(Debug, Clone)]
pub struct Database {
    shared: Arc<SchemaContext>,
}

impl Database {
    pub fn builder() -> DatabaseBuilder {
        DatabaseBuilder::new()
    }

    pub fn schema(&self) -> &Schema {
        self.shared.schema()
    }

    /// An empty record of `type_name`.
    pub fn new_record(&self, type_name: &str) -> Result<Record> {
        Ok(Record::new(self.shared.descriptor(type_name)?))
    }

    /// Validates and stores `record`, returning it with any generated
    /// identifier filled in.
    pub fn save(&self, record: Record) -> Result<Record> {
        self.shared.save_from(None, record)
    }

    /// Saves each record in order, stopping at the first failure.
    pub fn save_all<I>(&self, records: I) -> Result<Vec<Record>>
    where
        I: IntoIterator<Item = Record>,
    {
        records.into_iter().map(|record| self.save(record)).collect()
    }

    pub fn find(&self, record: &Record) -> Result<Record> {
        self.shared.find(record)
    }

    pub fn find_by_id(&self, type_name: &str, identifier: impl Into<Value>) -> Result<Record> {
        self.shared.find_by_id(type_name, identifier.into())
    }

    pub fn exists(&self, record: &Record) -> Result<bool> {
        self.shared.exists(record)
    }

    /// Removes `record`; false when it was not stored.
    pub fn delete(&self, record: &Record) -> Result<bool> {
        self.shared.delete(record)
    }

    pub fn execute_query(&self, query: &Query) -> Result<Vec<Record>> {
        let controller = PartitionQueryController::new(&self.shared, query)?;
        let references = controller.references()?;
        controller.hydrate_records(&references)
    }

    /// Like `execute_query` but reads only the query's selected attributes,
    /// or every attribute when nothing is selected.
    pub fn execute_attribute_query(&self, query: &Query) -> Result<Vec<Projection>> {
        let controller = PartitionQueryController::new(&self.shared, query)?;
        let attributes: Vec<String> = if query.selections().is_empty() {
            controller
                .descriptor()
                .attributes()
                .iter()
                .map(|a| a.name().to_string())
                .collect()
        } else {
            query.selections().to_vec()
        };
        let references = controller.references()?;
        controller.hydrate_attributes(&references, &attributes)
    }

    /// Applies the query's update instructions to every matched record.
    /// The instructions are validated before anything is written.
    pub fn execute_update(&self, query: &Query) -> Result<usize> {
        let controller = PartitionQueryController::new(&self.shared, query)?;
        let updates = controller.validated_updates()?;
        if updates.is_empty() {
            return Ok(0);
        }
        let references = controller.references()?;
        controller.update_records(&references, &updates)
    }

    pub fn execute_delete(&self, query: &Query) -> Result<usize> {
        let controller = PartitionQueryController::new(&self.shared, query)?;
        let references = controller.references()?;
        controller.delete_records(&references)
    }

    /// Number of matches; `first_row` and `max_results` are ignored.
    pub fn count(&self, query: &Query) -> Result<usize> {
        PartitionQueryController::new(&self.shared, query)?.count()
    }

    /// Hydrates matches one at a time and hands each to `consumer` with this
    /// database, so the consumer may write back. Stops when the query is
    /// terminated. Returns the number of records delivered.
    pub fn stream<F>(&self, query: &Query, mut consumer: F) -> Result<usize>
    where
        F: FnMut(Record, &Database) -> Result<()>,
    {
        let controller = PartitionQueryController::new(&self.shared, query)?;
        let mut delivered = 0;
        for reference in controller.references()? {
            if query.is_terminated() {
                break;
            }
            if let Some(record) = controller.hydrate(reference)? {
                consumer(record, self)?;
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    /// Every record of `type_name` across all partitions.
    pub fn list(&self, type_name: &str) -> Result<Vec<Record>> {
        self.execute_query(&Query::new(type_name).all_partitions())
    }

    /// `Stale` when the index is stale in any partition.
    pub fn index_status(&self, type_name: &str, attribute: &str) -> Result<IndexStatus> {
        let descriptor = self.shared.descriptor(type_name)?;
        for handle in self.shared.handles_for(&descriptor, &PartitionSelection::All)? {
            if let Some(index) = handle.index(attribute) {
                if index.status() == IndexStatus::Stale {
                    return Ok(IndexStatus::Stale);
                }
            }
        }
        Ok(IndexStatus::Ready)
    }

    pub fn rebuild_index(&self, type_name: &str, attribute: &str) -> Result<()> {
        self.shared.rebuild_index(type_name, attribute)
    }

    /// Writes every open data file to durable storage.
    pub fn commit(&self) -> Result<()> {
        self.shared.commit()
    }

    pub fn close(&self) -> Result<()> {
        self.shared.close()
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}
