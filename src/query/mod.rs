//! # Queries
//!
//! A [`Query`] names an entity type and optionally carries a criteria tree,
//! sort keys, pagination, a partition selector, bulk update instructions, a
//! projection and a shared termination flag.
//!
//! ```ignore
//! let query = Query::new("Person")
//!     .criteria(QueryCriteria::new("age", Operator::GreaterThan, 30))
//!     .order_by(QueryOrder::desc("age"))
//!     .first_row(10)
//!     .max_results(10);
//! let page = db.execute_query(&query)?;
//! ```
//!
//! ## Evaluation Pipeline
//!
//! ```text
//! partitions ─► scanners per criteria node ─► reference sets
//!           ─► sort (stable, nulls last) ─► first_row / max_results
//!           ─► hydrate records | project attributes | update | delete
//! ```
//!
//! ## Module Organization
//!
//! - [`criteria`]: operators and criteria trees
//! - [`compare`]: in-memory operator evaluation
//! - [`reference_set`]: insertion-ordered reference sets
//! - [`scanner`]: full, index, identifier and relationship scanners
//! - [`partition_controller`]: the per-query driver

pub mod compare;
pub mod criteria;
pub mod partition_controller;
pub mod reference_set;
pub mod scanner;

pub use criteria::{Operator, QueryCriteria};
pub use partition_controller::PartitionQueryController;
pub use reference_set::ReferenceSet;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::types::Value;

/// Attribute values of one matched record, in selection order.
pub type Projection = Vec<(String, Value)>;

#[derive(Debug, Clone, Default, PartialEq)]
pub enum PartitionSelection {
    /// The null-valued partition, where unpartitioned data lives.
    #[default]
    Default,
    Value(Value),
    All,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryOrder {
    attribute: String,
    ascending: bool,
}

impl QueryOrder {
    pub fn asc(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            ascending: true,
        }
    }

    pub fn desc(attribute: impl Into<String>) -> Self {
        Self {
            attribute: attribute.into(),
            ascending: false,
        }
    }

    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    pub fn is_ascending(&self) -> bool {
        self.ascending
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeUpdate {
    attribute: String,
    value: Value,
}

impl AttributeUpdate {
    pub fn new(attribute: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    pub fn value(&self) -> &Value {
        &self.value
    }
}

#[derive(Debug, Clone)]
pub struct Query {
    entity_type: String,
    criteria: Option<QueryCriteria>,
    order: Vec<QueryOrder>,
    first_row: usize,
    max_results: Option<usize>,
    partition: PartitionSelection,
    updates: Vec<AttributeUpdate>,
    selections: Vec<String>,
    use_indexes: bool,
    terminated: Arc<AtomicBool>,
}

impl Query {
    pub fn new(entity_type: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            criteria: None,
            order: Vec::new(),
            first_row: 0,
            max_results: None,
            partition: PartitionSelection::Default,
            updates: Vec::new(),
            selections: Vec::new(),
            use_indexes: true,
            terminated: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn criteria(mut self, criteria: QueryCriteria) -> Self {
        self.criteria = Some(criteria);
        self
    }

    pub fn order_by(mut self, order: QueryOrder) -> Self {
        self.order.push(order);
        self
    }

    pub fn first_row(mut self, first_row: usize) -> Self {
        self.first_row = first_row;
        self
    }

    pub fn max_results(mut self, max_results: usize) -> Self {
        self.max_results = Some(max_results);
        self
    }

    pub fn partition(mut self, value: impl Into<Value>) -> Self {
        self.partition = PartitionSelection::Value(value.into());
        self
    }

    pub fn all_partitions(mut self) -> Self {
        self.partition = PartitionSelection::All;
        self
    }

    pub fn update(mut self, update: AttributeUpdate) -> Self {
        self.updates.push(update);
        self
    }

    pub fn select<I, S>(mut self, attributes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.selections.extend(attributes.into_iter().map(Into::into));
        self
    }

    /// When false every criteria is answered by scanning records.
    pub fn use_indexes(mut self, use_indexes: bool) -> Self {
        self.use_indexes = use_indexes;
        self
    }

    /// Shares an existing termination flag, so terminating one query stops
    /// the other.
    pub(crate) fn with_termination(mut self, flag: Arc<AtomicBool>) -> Self {
        self.terminated = flag;
        self
    }

    pub fn entity_type(&self) -> &str {
        &self.entity_type
    }

    pub fn criteria_tree(&self) -> Option<&QueryCriteria> {
        self.criteria.as_ref()
    }

    pub fn ordering(&self) -> &[QueryOrder] {
        &self.order
    }

    pub fn first_row_index(&self) -> usize {
        self.first_row
    }

    pub fn result_limit(&self) -> Option<usize> {
        self.max_results
    }

    pub fn partition_selection(&self) -> &PartitionSelection {
        &self.partition
    }

    pub fn updates(&self) -> &[AttributeUpdate] {
        &self.updates
    }

    pub fn selections(&self) -> &[String] {
        &self.selections
    }

    pub fn uses_indexes(&self) -> bool {
        self.use_indexes
    }

    /// Asks every running evaluation of this query to stop.
    pub fn terminate(&self) {
        self.terminated.store(true, Ordering::Release);
    }

    pub fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    pub fn termination_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.terminated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_defaults() {
        let query = Query::new("Person");
        assert_eq!(query.entity_type(), "Person");
        assert_eq!(query.first_row_index(), 0);
        assert_eq!(query.result_limit(), None);
        assert_eq!(query.partition_selection(), &PartitionSelection::Default);
        assert!(query.uses_indexes());
        assert!(!query.is_terminated());
    }

    #[test]
    fn clones_share_termination() {
        let query = Query::new("Person").select(["name", "age"]);
        let clone = query.clone();
        clone.terminate();
        assert!(query.is_terminated());
        assert_eq!(query.selections(), &["name".to_string(), "age".to_string()]);
    }
}
