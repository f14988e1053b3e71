//! # Scanners
//!
//! A scanner turns one criteria leaf into a [`ReferenceSet`] for one
//! partition, either over the whole partition (`scan`) or restricted to a
//! domain produced by a parent node (`scan_within`).
//!
//! ## Selection
//!
//! | Leaf                                          | Scanner                |
//! |-----------------------------------------------|------------------------|
//! | `rel.attr`                                    | `RelationshipScanner`  |
//! | identifier `EQUAL` / `IN`                     | `IdentifierScanner`    |
//! | ready index, index operator, no null operand  | `IndexScanner`         |
//! | anything else                                 | `FullTableScanner`     |
//!
//! Every scanner checks the query's termination flag and stops early when it
//! is set; full scans check it once per visited record.

use std::sync::Arc;

use eyre::Result;
use hashbrown::HashSet;

use super::compare::matches;
use super::{Operator, PartitionQueryController, Query, QueryCriteria, ReferenceSet};
use crate::context::{PartitionHandle, SchemaContext};
use crate::error::EntityError;
use crate::index::{IndexController, IndexStatus};
use crate::relationship::{RelatedRef, RelationshipController};
use crate::types::{AttributeType, Value};

/// Everything a scanner needs to evaluate a leaf in one partition.
pub struct ScanContext<'a> {
    pub context: &'a SchemaContext,
    pub handle: &'a PartitionHandle,
    pub query: &'a Query,
}

pub trait TableScanner {
    /// Matches over the whole partition, stopping once `limit` matches are found.
    fn scan(&self, limit: Option<usize>) -> Result<ReferenceSet>;

    /// Matches among `domain`, in domain order.
    fn scan_within(&self, domain: &ReferenceSet) -> Result<ReferenceSet>;
}

fn has_null_operand(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::List(items) => items.iter().any(Value::is_null),
        _ => false,
    }
}

/// Values an `EQUAL` or `IN` leaf compares against.
fn operands(operator: Operator, value: &Value) -> &[Value] {
    match (operator, value) {
        (Operator::In, Value::List(items)) => items,
        (_, other) => std::slice::from_ref(other),
    }
}

fn restrict(domain: &ReferenceSet, found: &ReferenceSet) -> ReferenceSet {
    domain.iter().filter(|r| found.contains(*r)).collect()
}

fn limit_reached(set: &ReferenceSet, limit: Option<usize>) -> bool {
    limit.is_some_and(|limit| set.len() >= limit)
}

/// Picks the scanner for `criteria` in the partition of `scan`.
pub fn scanner_for<'a>(
    scan: &'a ScanContext<'a>,
    criteria: &'a QueryCriteria,
) -> Result<Box<dyn TableScanner + 'a>> {
    let descriptor = scan.handle.descriptor();

    if let Some((name, rest)) = criteria.relationship_path() {
        let Some(relationship) = scan.handle.relationship(name) else {
            return Err(EntityError::AttributeMissing {
                type_name: descriptor.type_name().to_string(),
                attribute: criteria.attribute().to_string(),
            }
            .into());
        };
        return Ok(Box::new(RelationshipScanner {
            scan,
            relationship,
            nested: criteria.leaf_for(rest),
        }));
    }

    let Some(attribute) = descriptor.attribute(criteria.attribute()) else {
        return Err(EntityError::AttributeMissing {
            type_name: descriptor.type_name().to_string(),
            attribute: criteria.attribute().to_string(),
        }
        .into());
    };

    let operator = criteria.operator();
    let value = criteria.value();

    if descriptor.is_identifier(attribute.name())
        && matches!(operator, Operator::Equal | Operator::In)
        && !has_null_operand(value)
    {
        return Ok(Box::new(IdentifierScanner { scan, criteria }));
    }

    if scan.query.uses_indexes()
        && operator.supports_index()
        && !has_null_operand(value)
        && attribute.attribute_type() != AttributeType::List
    {
        if let Some(index) = scan.handle.index(attribute.name()) {
            if index.status() == IndexStatus::Ready {
                return Ok(Box::new(IndexScanner {
                    scan,
                    criteria,
                    index,
                }));
            }
        }
    }

    Ok(Box::new(FullTableScanner { scan, criteria }))
}

/// Reads the attribute of every candidate record and tests it in memory.
pub struct FullTableScanner<'a> {
    scan: &'a ScanContext<'a>,
    criteria: &'a QueryCriteria,
}

impl FullTableScanner<'_> {
    fn accepts(&self, reference: u64) -> bool {
        self.scan
            .handle
            .records()
            .get_attribute_with_reference(self.criteria.attribute(), reference)
            .is_some_and(|actual| matches(self.criteria.operator(), &actual, self.criteria.value()))
    }
}

impl TableScanner for FullTableScanner<'_> {
    fn scan(&self, limit: Option<usize>) -> Result<ReferenceSet> {
        let mut found = ReferenceSet::new();
        for reference in self.scan.handle.records().references()? {
            if self.scan.query.is_terminated() || limit_reached(&found, limit) {
                break;
            }
            if self.accepts(reference) {
                found.insert(reference);
            }
        }
        Ok(found)
    }

    fn scan_within(&self, domain: &ReferenceSet) -> Result<ReferenceSet> {
        let mut found = ReferenceSet::new();
        for reference in domain.iter() {
            if self.scan.query.is_terminated() {
                break;
            }
            if self.accepts(reference) {
                found.insert(reference);
            }
        }
        Ok(found)
    }
}

/// Resolves identifier equality through direct key lookups.
pub struct IdentifierScanner<'a> {
    scan: &'a ScanContext<'a>,
    criteria: &'a QueryCriteria,
}

impl TableScanner for IdentifierScanner<'_> {
    fn scan(&self, limit: Option<usize>) -> Result<ReferenceSet> {
        let records = self.scan.handle.records();
        let id_type = self.scan.handle.descriptor().identifier().attribute_type();

        let mut found = ReferenceSet::new();
        for candidate in operands(self.criteria.operator(), self.criteria.value()) {
            if self.scan.query.is_terminated() || limit_reached(&found, limit) {
                break;
            }
            let Some(identifier) = candidate.convert_exact(id_type) else {
                continue;
            };
            if let Some(reference) = records.get_reference(&identifier)? {
                found.insert(reference);
            }
        }
        Ok(found)
    }

    fn scan_within(&self, domain: &ReferenceSet) -> Result<ReferenceSet> {
        Ok(restrict(domain, &self.scan(None)?))
    }
}

/// Answers equality, range and prefix tests from a ready index.
pub struct IndexScanner<'a> {
    scan: &'a ScanContext<'a>,
    criteria: &'a QueryCriteria,
    index: &'a Arc<IndexController>,
}

impl TableScanner for IndexScanner<'_> {
    fn scan(&self, limit: Option<usize>) -> Result<ReferenceSet> {
        if self.scan.query.is_terminated() {
            return Ok(ReferenceSet::new());
        }

        let operator = self.criteria.operator();
        let expected = self.criteria.value();
        let mut found = ReferenceSet::new();

        match operator {
            Operator::Equal | Operator::In => {
                for candidate in operands(operator, expected) {
                    for reference in self.index.find(candidate)? {
                        found.insert(reference);
                    }
                }
            }
            _ => {
                for reference in self.index.find_matching(|value| matches(operator, value, expected))? {
                    found.insert(reference);
                }
            }
        }

        if let Some(limit) = limit {
            found.truncate(limit);
        }
        Ok(found)
    }

    fn scan_within(&self, domain: &ReferenceSet) -> Result<ReferenceSet> {
        Ok(restrict(domain, &self.scan(None)?))
    }
}

/// Evaluates the rest of the path against the relationship's target type
/// and keeps owners pointing at any matching target.
pub struct RelationshipScanner<'a> {
    scan: &'a ScanContext<'a>,
    relationship: &'a Arc<RelationshipController>,
    nested: QueryCriteria,
}

impl RelationshipScanner<'_> {
    fn matching_targets(&self) -> Result<HashSet<Vec<u8>>> {
        let target = self.relationship.target();
        let query = Query::new(target.type_name())
            .criteria(self.nested.clone())
            .all_partitions()
            .use_indexes(self.scan.query.uses_indexes())
            .with_termination(self.scan.query.termination_flag());

        let controller = PartitionQueryController::new(self.scan.context, &query)?;
        let mut keys = HashSet::new();
        for found in controller.matching(None)? {
            let handle = controller.handle(found.partition)?;
            if let Some(identifier) = handle.records().identifier_with_reference(found.position) {
                keys.insert(RelatedRef::new(identifier, handle.partition_value().clone()).key_bytes());
            }
        }
        Ok(keys)
    }

    fn accepts(&self, reference: u64, targets: &HashSet<Vec<u8>>) -> Result<bool> {
        let Some(owner) = self.scan.handle.records().identifier_with_reference(reference) else {
            return Ok(false);
        };
        Ok(self
            .relationship
            .targets(&owner)?
            .iter()
            .any(|target| targets.contains(&target.key_bytes())))
    }

    fn filter(&self, candidates: impl IntoIterator<Item = u64>, limit: Option<usize>) -> Result<ReferenceSet> {
        let targets = self.matching_targets()?;
        let mut found = ReferenceSet::new();
        if targets.is_empty() {
            return Ok(found);
        }
        for reference in candidates {
            if self.scan.query.is_terminated() || limit_reached(&found, limit) {
                break;
            }
            if self.accepts(reference, &targets)? {
                found.insert(reference);
            }
        }
        Ok(found)
    }
}

impl TableScanner for RelationshipScanner<'_> {
    fn scan(&self, limit: Option<usize>) -> Result<ReferenceSet> {
        self.filter(self.scan.handle.records().references()?, limit)
    }

    fn scan_within(&self, domain: &ReferenceSet) -> Result<ReferenceSet> {
        self.filter(domain.iter(), None)
    }
}
