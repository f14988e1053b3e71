//! # Partition Query Controller
//!
//! Drives one query across the partitions it selects: criteria evaluation
//! through scanners, sorting, pagination and the bulk operations that run on
//! the resulting references.
//!
//! ## Criteria Evaluation
//!
//! ```text
//! evaluate(node, domain):
//!     result = scan(node leaf) within domain          (whole partition at root)
//!     for or in node.or:   result ∪= evaluate(or, domain)
//!     for and in node.and: result  = evaluate(and, result)
//! ```
//!
//! AND children never rescan the partition; they are evaluated only over the
//! references already matched. The termination flag is checked at every
//! recursive step.
//!
//! ## Ordering and Pagination
//!
//! Matches keep first-insertion order across partitions (default partition
//! first, then by partition index). Sorting is stable and places null or
//! missing keys last in both directions. `first_row`/`max_results` apply after
//! sorting; only an unsorted query over a single leaf pushes the limit into
//! the scan.

use std::cmp::Ordering;
use std::sync::Arc;

use eyre::Result;

use super::scanner::{scanner_for, ScanContext};
use super::{Projection, Query, QueryCriteria, ReferenceSet};
use crate::context::{PartitionHandle, SchemaContext};
use crate::error::EntityError;
use crate::partition::RecordRef;
use crate::record::Record;
use crate::schema::validation::validate_updates;
use crate::schema::EntityDescriptor;
use crate::types::Value;

pub struct PartitionQueryController<'a> {
    context: &'a SchemaContext,
    descriptor: Arc<EntityDescriptor>,
    query: &'a Query,
    handles: Vec<Arc<PartitionHandle>>,
}

impl<'a> PartitionQueryController<'a> {
    pub fn new(context: &'a SchemaContext, query: &'a Query) -> Result<Self> {
        let descriptor = context.descriptor(query.entity_type())?;
        let handles = context.handles_for(&descriptor, query.partition_selection())?;
        Ok(Self {
            context,
            descriptor,
            query,
            handles,
        })
    }

    pub fn descriptor(&self) -> &Arc<EntityDescriptor> {
        &self.descriptor
    }

    /// Handle of `partition`, usually one of the selected partitions.
    pub fn handle(&self, partition: u64) -> Result<Arc<PartitionHandle>> {
        match self.handles.iter().find(|h| h.partition() == partition) {
            Some(handle) => Ok(Arc::clone(handle)),
            None => self.context.handle(self.descriptor.type_name(), partition),
        }
    }

    fn missing(&self, attribute: &str) -> eyre::Report {
        EntityError::AttributeMissing {
            type_name: self.descriptor.type_name().to_string(),
            attribute: attribute.to_string(),
        }
        .into()
    }

    fn evaluate(
        &self,
        scan: &ScanContext<'_>,
        criteria: &QueryCriteria,
        domain: Option<&ReferenceSet>,
        limit: Option<usize>,
    ) -> Result<ReferenceSet> {
        if self.query.is_terminated() {
            return Ok(ReferenceSet::new());
        }

        let scanner = scanner_for(scan, criteria)?;
        let mut result = match domain {
            Some(domain) => scanner.scan_within(domain)?,
            None => scanner.scan(limit)?,
        };

        for branch in criteria.or_children() {
            if self.query.is_terminated() {
                return Ok(result);
            }
            let matched = self.evaluate(scan, branch, domain, None)?;
            result.union_with(&matched);
        }

        for restriction in criteria.and_children() {
            if self.query.is_terminated() {
                return Ok(result);
            }
            result = self.evaluate(scan, restriction, Some(&result), None)?;
        }

        Ok(result)
    }

    fn scan_limit(&self) -> Option<usize> {
        let max = self.query.result_limit()?;
        let single_leaf = self.query.criteria_tree().map_or(true, QueryCriteria::is_leaf);
        (self.query.ordering().is_empty() && single_leaf).then(|| self.query.first_row_index() + max)
    }

    /// Every matching reference in first-insertion order, stopping after
    /// `limit` matches when given.
    pub fn matching(&self, limit: Option<usize>) -> Result<Vec<RecordRef>> {
        let mut found = Vec::new();

        for handle in &self.handles {
            let remaining = limit.map(|limit| limit.saturating_sub(found.len()));
            if remaining == Some(0) || self.query.is_terminated() {
                break;
            }

            let matched = match self.query.criteria_tree() {
                Some(criteria) => {
                    let scan = ScanContext {
                        context: self.context,
                        handle: handle.as_ref(),
                        query: self.query,
                    };
                    self.evaluate(&scan, criteria, None, remaining)?
                }
                None => {
                    let mut all: ReferenceSet = handle.records().references()?.into_iter().collect();
                    if let Some(remaining) = remaining {
                        all.truncate(remaining);
                    }
                    all
                }
            };

            found.extend(matched.iter().map(|position| RecordRef::new(handle.partition(), position)));
        }

        Ok(found)
    }

    pub fn count(&self) -> Result<usize> {
        Ok(self.matching(None)?.len())
    }

    /// Matching references, sorted and paginated.
    pub fn references(&self) -> Result<Vec<RecordRef>> {
        let matched = self.matching(self.scan_limit())?;
        let sorted = self.sort(matched)?;
        Ok(self.paginate(sorted))
    }

    fn attribute_value(&self, reference: RecordRef, attribute: &str) -> Result<Value> {
        let handle = self.handle(reference.partition)?;
        Ok(handle
            .records()
            .get_attribute_with_reference(attribute, reference.position)
            .unwrap_or(Value::Null))
    }

    pub fn sort(&self, references: Vec<RecordRef>) -> Result<Vec<RecordRef>> {
        let order = self.query.ordering();
        if order.is_empty() {
            return Ok(references);
        }
        for key in order {
            if self.descriptor.attribute(key.attribute()).is_none() {
                return Err(self.missing(key.attribute()));
            }
        }

        let mut keyed = Vec::with_capacity(references.len());
        for reference in references {
            let keys = order
                .iter()
                .map(|key| self.attribute_value(reference, key.attribute()))
                .collect::<Result<Vec<_>>>()?;
            keyed.push((reference, keys));
        }

        keyed.sort_by(|(_, a), (_, b)| {
            for (i, key) in order.iter().enumerate() {
                let ordering = match (a[i].is_null(), b[i].is_null()) {
                    (false, false) if !key.is_ascending() => b[i].compare_for_sort(&a[i]),
                    _ => a[i].compare_for_sort(&b[i]),
                };
                if ordering != Ordering::Equal {
                    return ordering;
                }
            }
            Ordering::Equal
        });

        Ok(keyed.into_iter().map(|(reference, _)| reference).collect())
    }

    pub fn paginate(&self, references: Vec<RecordRef>) -> Vec<RecordRef> {
        let take = self.query.result_limit().unwrap_or(usize::MAX);
        references
            .into_iter()
            .skip(self.query.first_row_index())
            .take(take)
            .collect()
    }

    /// The record at `reference` with its relationships; `None` if it was
    /// removed since it matched.
    pub fn hydrate(&self, reference: RecordRef) -> Result<Option<Record>> {
        let handle = self.handle(reference.partition)?;
        let Some(mut record) = handle.records().get_with_reference(reference.position) else {
            return Ok(None);
        };
        handle.load_relationships(&mut record)?;
        Ok(Some(record))
    }

    pub fn hydrate_records(&self, references: &[RecordRef]) -> Result<Vec<Record>> {
        let mut records = Vec::with_capacity(references.len());
        for &reference in references {
            if let Some(record) = self.hydrate(reference)? {
                records.push(record);
            }
        }
        Ok(records)
    }

    /// Reads only `attributes` of each referenced record.
    pub fn hydrate_attributes(&self, references: &[RecordRef], attributes: &[String]) -> Result<Vec<Projection>> {
        for attribute in attributes {
            if self.descriptor.attribute(attribute).is_none() {
                return Err(self.missing(attribute));
            }
        }

        let mut rows = Vec::with_capacity(references.len());
        for &reference in references {
            let handle = self.handle(reference.partition)?;
            let records = handle.records();
            if records.identifier_with_reference(reference.position).is_none() {
                continue;
            }
            let row = attributes
                .iter()
                .map(|attribute| {
                    let value = records
                        .get_attribute_with_reference(attribute, reference.position)
                        .unwrap_or(Value::Null);
                    (attribute.clone(), value)
                })
                .collect();
            rows.push(row);
        }
        Ok(rows)
    }

    /// Update instructions of the query, validated and coerced, as
    /// (attribute position, value).
    pub fn validated_updates(&self) -> Result<Vec<(usize, Value)>> {
        let updates: Vec<(String, Value)> = self
            .query
            .updates()
            .iter()
            .map(|u| (u.attribute().to_string(), u.value().clone()))
            .collect();
        validate_updates(&self.descriptor, &updates)
    }

    /// Applies `updates` to every referenced record. A changed partition
    /// value moves the record into its new partition.
    pub fn update_records(&self, references: &[RecordRef], updates: &[(usize, Value)]) -> Result<usize> {
        let mut updated = 0;
        for &reference in references {
            if self.query.is_terminated() {
                break;
            }
            let handle = self.handle(reference.partition)?;
            let Some(mut record) = self.hydrate(reference)? else {
                continue;
            };
            for (position, value) in updates {
                record.set_at(*position, value.clone());
            }
            self.context.save_from(Some(&handle), record)?;
            updated += 1;
        }
        Ok(updated)
    }

    /// Deletes every referenced record with its index memberships and
    /// relationship entries.
    pub fn delete_records(&self, references: &[RecordRef]) -> Result<usize> {
        let mut deleted = 0;
        for &reference in references {
            if self.query.is_terminated() {
                break;
            }
            let handle = self.handle(reference.partition)?;
            let Some(identifier) = handle.records().identifier_with_reference(reference.position) else {
                continue;
            };
            if self.context.delete_in(&handle, &identifier)? {
                deleted += 1;
            }
        }
        Ok(deleted)
    }
}
