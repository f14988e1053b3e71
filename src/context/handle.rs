//! # Partition Handles
//!
//! Everything the engine needs to work with one entity type in one
//! partition: its record controller, one index controller per declared index
//! and one relationship controller per declared relationship, all sharing
//! the partition's data file. Identifier sequences come from a file shared
//! by all partitions of the type. Handles are created once per (type, partition)
//! and cached by the schema context.

use std::sync::Arc;

use eyre::Result;
use hashbrown::HashMap;

use crate::index::IndexController;
use crate::map::DataFile;
use crate::record::{Record, RecordController};
use crate::relationship::RelationshipController;
use crate::schema::{EntityDescriptor, Schema};
use crate::storage::TransactionLog;
use crate::types::Value;

#[derive(Debug)]
pub struct PartitionHandle {
    descriptor: Arc<EntityDescriptor>,
    records: RecordController,
    indexes: HashMap<String, Arc<IndexController>>,
    relationships: HashMap<String, Arc<RelationshipController>>,
}

impl PartitionHandle {
    pub fn open(
        schema: &Schema,
        descriptor: Arc<EntityDescriptor>,
        partition: u64,
        partition_value: Value,
        data_file: Arc<DataFile>,
        sequence_file: &DataFile,
        journal: Option<Arc<TransactionLog>>,
    ) -> Result<Self> {
        let records = RecordController::new(
            Arc::clone(&descriptor),
            partition,
            partition_value,
            Arc::clone(&data_file),
            sequence_file,
            journal,
        )?;

        let mut indexes = HashMap::new();
        for attribute in descriptor.indexes() {
            let index = IndexController::new(Arc::clone(&descriptor), attribute, Arc::clone(&data_file))?;
            indexes.insert(attribute.clone(), Arc::new(index));
        }

        let mut relationships = HashMap::new();
        for relationship in descriptor.relationships() {
            let (target, _) = schema.resolve_inverse(&descriptor, relationship)?;
            let controller = RelationshipController::new(
                Arc::clone(&descriptor),
                relationship.clone(),
                Arc::clone(target),
                &data_file,
            )?;
            relationships.insert(relationship.name().to_string(), Arc::new(controller));
        }

        Ok(Self {
            descriptor,
            records,
            indexes,
            relationships,
        })
    }

    pub fn descriptor(&self) -> &Arc<EntityDescriptor> {
        &self.descriptor
    }

    pub fn partition(&self) -> u64 {
        self.records.partition()
    }

    pub fn partition_value(&self) -> &Value {
        self.records.partition_value()
    }

    pub fn records(&self) -> &RecordController {
        &self.records
    }

    pub fn index(&self, attribute: &str) -> Option<&Arc<IndexController>> {
        self.indexes.get(attribute)
    }

    pub fn indexes(&self) -> impl Iterator<Item = &Arc<IndexController>> {
        self.indexes.values()
    }

    pub fn relationship(&self, name: &str) -> Option<&Arc<RelationshipController>> {
        self.relationships.get(name)
    }

    pub fn relationships(&self) -> impl Iterator<Item = &Arc<RelationshipController>> {
        self.relationships.values()
    }

    /// Fills every declared relationship of `record` from storage.
    pub fn load_relationships(&self, record: &mut Record) -> Result<()> {
        if self.relationships.is_empty() {
            return Ok(());
        }
        let owner = record.id().clone();
        for (name, controller) in &self.relationships {
            record.set_related(name, controller.targets(&owner)?)?;
        }
        Ok(())
    }
}
