//! # Record Controller
//!
//! Translates identifiers to physical references and back for one entity type
//! in one partition, and performs the physical save and delete.
//!
//! ## Maps
//!
//! ```text
//! "{type}"            : identifier        -> encoded record
//! "{type}__sequence"  : Text("sequence")  -> Long(high-water mark)
//! ```
//!
//! The record map lives in the partition's data file. The sequence map lives
//! in a file shared by every partition of the type (the system file), so
//! generated identifiers stay unique across partitions.
//!
//! ## Write Path
//!
//! ```text
//! write gate (shared) ──► assign sequence id ──► encode
//!        │
//!        └─► lock identifier key ──► journal ──► put ──► after_write(saved, prev, new)
//! ```
//!
//! `after_write` runs while the identifier's key lock is still held, so index
//! and relationship bookkeeping done by the caller completes before another
//! thread can observe that key. The write gate is taken exclusively only by
//! index rebuilds, which must see a frozen record set.
//!
//! Deletes mirror this: `before_remove` gets the reference that is about to
//! go away and runs under the same key lock, ahead of the removal.

use std::sync::Arc;

use eyre::{bail, Result};
use parking_lot::{RwLock, RwLockWriteGuard};
use tracing::warn;

use super::Record;
use crate::encoding::decode_record;
use crate::error::EntityError;
use crate::map::{DataFile, DiskMap};
use crate::schema::validation::is_unset_identifier;
use crate::schema::{EntityDescriptor, IdGenerator};
use crate::storage::TransactionLog;
use crate::types::Value;

const SEQUENCE_KEY: &str = "sequence";

pub struct RecordController {
    descriptor: Arc<EntityDescriptor>,
    partition: u64,
    partition_value: Value,
    data_file: Arc<DataFile>,
    records: Arc<DiskMap>,
    sequence: Option<Arc<DiskMap>>,
    code: u32,
    journal: Option<Arc<TransactionLog>>,
    write_gate: RwLock<()>,
}

impl std::fmt::Debug for RecordController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RecordController")
            .field("type", &self.descriptor.type_name())
            .field("partition", &self.partition)
            .field("records", &self.records.len())
            .finish()
    }
}

impl RecordController {
    pub fn new(
        descriptor: Arc<EntityDescriptor>,
        partition: u64,
        partition_value: Value,
        data_file: Arc<DataFile>,
        sequence_file: &DataFile,
        journal: Option<Arc<TransactionLog>>,
    ) -> Result<Self> {
        let records = data_file.map(&descriptor.records_map())?;
        let sequence = match descriptor.generator() {
            IdGenerator::Sequence => Some(sequence_file.map(&descriptor.sequence_map())?),
            IdGenerator::None => None,
        };
        let code = data_file.serializers().code_for(descriptor.type_name())?;

        Ok(Self {
            descriptor,
            partition,
            partition_value,
            data_file,
            records,
            sequence,
            code,
            journal,
            write_gate: RwLock::new(()),
        })
    }

    pub fn descriptor(&self) -> &Arc<EntityDescriptor> {
        &self.descriptor
    }

    pub fn partition(&self) -> u64 {
        self.partition
    }

    pub fn partition_value(&self) -> &Value {
        &self.partition_value
    }

    pub fn data_file(&self) -> &Arc<DataFile> {
        &self.data_file
    }

    pub fn len(&self) -> u64 {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Blocks every writer of this type and partition until the guard drops.
    pub fn exclusive(&self) -> RwLockWriteGuard<'_, ()> {
        self.write_gate.write()
    }

    fn sequence_key() -> Value {
        Value::Text(SEQUENCE_KEY.to_string())
    }

    fn read_sequence(value: Option<Value>) -> Result<i64> {
        match value {
            None => Ok(0),
            Some(Value::Long(mark)) => Ok(mark),
            Some(other) => bail!("sequence mark is {}, expected long", other.type_name()),
        }
    }

    /// Current high-water mark of the identifier sequence.
    pub fn sequence_mark(&self) -> Result<i64> {
        match &self.sequence {
            Some(map) => Self::read_sequence(map.get_value(&Self::sequence_key())?),
            None => Ok(0),
        }
    }

    fn next_sequence(&self, map: &DiskMap) -> Result<i64> {
        let guard = map.lock_key(&Self::sequence_key())?;
        let next = Self::read_sequence(guard.get_value()?)? + 1;
        guard.put_value(&Value::Long(next))?;
        Ok(next)
    }

    fn advance_sequence(&self, map: &DiskMap, supplied: i64) -> Result<()> {
        let guard = map.lock_key(&Self::sequence_key())?;
        if supplied > Self::read_sequence(guard.get_value()?)? {
            guard.put_value(&Value::Long(supplied))?;
        }
        Ok(())
    }

    fn assign_identifier(&self, record: &mut Record) -> Result<()> {
        let Some(map) = &self.sequence else {
            return Ok(());
        };

        if !is_unset_identifier(record.id()) {
            if let Some(supplied) = record.id().as_i64() {
                self.advance_sequence(map, supplied)?;
            }
            return Ok(());
        }

        let next = self.next_sequence(map)?;
        let id_type = self.descriptor.identifier().attribute_type();
        let Some(id) = Value::Long(next).convert_exact(id_type) else {
            return Err(EntityError::InvalidIdentifier {
                type_name: self.descriptor.type_name().to_string(),
                reason: format!("sequence value {} does not fit {}", next, id_type),
            }
            .into());
        };
        record.set_id(id)
    }

    /// Saves `record`, assigning a sequence identifier when needed, and calls
    /// `after_write(saved, previous_reference, new_reference)` under the key
    /// lock. The node at `previous_reference` is reclaimed only after the
    /// hook succeeds.
    pub fn save_with<F>(&self, record: &mut Record, after_write: F) -> Result<u64>
    where
        F: FnOnce(&Record, Option<u64>, u64) -> Result<()>,
    {
        let _gate = self.write_gate.read();
        self.assign_identifier(record)?;

        let id = record.id().clone();
        if id.is_null() {
            return Err(EntityError::IdentifierRequired {
                type_name: self.descriptor.type_name().to_string(),
                attribute: self.descriptor.identifier_name().to_string(),
            }
            .into());
        }

        let bytes = record.encode(self.code);
        let guard = self.records.lock_key(&id)?;
        let previous = guard.reference()?;

        if let Some(journal) = &self.journal {
            journal.append_save(self.descriptor.type_name(), &self.partition_value, &id, &bytes)?;
        }
        // The superseded node stays allocated until the hook has moved index
        // memberships off `previous`, so no other key can be stored there.
        let replaced = guard.replace(&bytes)?;
        after_write(&*record, previous, replaced.position)?;
        if let Some((position, size)) = replaced.superseded {
            self.records.release(position, size)?;
        }
        Ok(replaced.position)
    }

    pub fn save(&self, record: &mut Record) -> Result<u64> {
        self.save_with(record, |_, _, _| Ok(()))
    }

    /// Deletes the record keyed by `identifier`, calling `before_remove` with
    /// its reference under the key lock. Returns the removed reference.
    pub fn delete_with<F>(&self, identifier: &Value, before_remove: F) -> Result<Option<u64>>
    where
        F: FnOnce(u64) -> Result<()>,
    {
        let _gate = self.write_gate.read();
        let guard = self.records.lock_key(identifier)?;
        let Some(reference) = guard.reference()? else {
            return Ok(None);
        };

        if let Some(journal) = &self.journal {
            journal.append_delete(self.descriptor.type_name(), &self.partition_value, identifier)?;
        }
        before_remove(reference)?;
        guard.remove()?;
        Ok(Some(reference))
    }

    pub fn delete(&self, identifier: &Value) -> Result<Option<u64>> {
        self.delete_with(identifier, |_| Ok(()))
    }

    fn decode(&self, bytes: &[u8]) -> Result<Record> {
        let encoded = decode_record(bytes)?;
        if encoded.code != self.code {
            bail!(
                "record of '{}' carries serializer code {}, expected {}",
                self.descriptor.type_name(),
                encoded.code,
                self.code
            );
        }
        Ok(Record::from_encoded(Arc::clone(&self.descriptor), encoded))
    }

    pub fn get(&self, identifier: &Value) -> Result<Option<Record>> {
        self.records
            .get(identifier)?
            .map(|bytes| self.decode(&bytes))
            .transpose()
    }

    pub fn get_reference(&self, identifier: &Value) -> Result<Option<u64>> {
        self.records.get_reference(identifier)
    }

    pub fn exists(&self, identifier: &Value) -> Result<bool> {
        self.records.contains_key(identifier)
    }

    /// Record stored at `reference`; `None` when it no longer resolves or
    /// cannot be decoded.
    pub fn get_with_reference(&self, reference: u64) -> Option<Record> {
        let bytes = self.records.get_by_reference(reference)?;
        match self.decode(&bytes) {
            Ok(record) => Some(record),
            Err(err) => {
                warn!(
                    entity = %self.descriptor.type_name(),
                    reference,
                    error = %err,
                    "undecodable record"
                );
                None
            }
        }
    }

    pub fn get_attribute_with_reference(&self, attribute: &str, reference: u64) -> Option<Value> {
        self.records.get_attribute_by_reference(attribute, reference)
    }

    pub fn identifier_with_reference(&self, reference: u64) -> Option<Value> {
        self.records.get_key_by_reference(reference)
    }

    /// References of every record, in directory order.
    pub fn references(&self) -> Result<Vec<u64>> {
        self.records.references()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AttributeDescriptor;
    use crate::types::AttributeType;
    use std::thread;

    fn controller(generator: IdGenerator) -> RecordController {
        let descriptor = EntityDescriptor::builder("Item")
            .identifier("id", AttributeType::Long, generator)
            .attribute(AttributeDescriptor::new("label", AttributeType::Text))
            .build()
            .unwrap();
        let file = Arc::new(DataFile::in_memory("items").unwrap());
        RecordController::new(Arc::new(descriptor), 0, Value::Null, Arc::clone(&file), &file, None).unwrap()
    }

    fn item(controller: &RecordController, id: Option<i64>, label: &str) -> Record {
        let mut record = Record::new(Arc::clone(controller.descriptor()));
        if let Some(id) = id {
            record.set("id", id).unwrap();
        }
        record.set("label", label).unwrap();
        record
    }

    #[test]
    fn sequence_assigns_increasing_ids() {
        let c = controller(IdGenerator::Sequence);
        let mut a = item(&c, None, "a");
        let mut b = item(&c, None, "b");
        c.save(&mut a).unwrap();
        c.save(&mut b).unwrap();

        assert_eq!(a.id(), &Value::Long(1));
        assert_eq!(b.id(), &Value::Long(2));
        assert_eq!(c.sequence_mark().unwrap(), 2);
    }

    #[test]
    fn supplied_id_advances_sequence() {
        let c = controller(IdGenerator::Sequence);
        c.save(&mut item(&c, Some(40), "x")).unwrap();
        let mut next = item(&c, None, "y");
        c.save(&mut next).unwrap();
        assert_eq!(next.id(), &Value::Long(41));
    }

    #[test]
    fn missing_id_without_generator_fails() {
        let c = controller(IdGenerator::None);
        let err = c.save(&mut item(&c, None, "x")).unwrap_err();
        assert_eq!(
            err.downcast_ref::<EntityError>().unwrap().kind(),
            "identifier_required"
        );
        assert!(c.is_empty());
    }

    #[test]
    fn save_reports_previous_reference() {
        let c = controller(IdGenerator::None);
        let mut first = None;
        let r1 = c
            .save_with(&mut item(&c, Some(1), "a"), |_, prev, _| {
                first = Some(prev);
                Ok(())
            })
            .unwrap();
        assert_eq!(first, Some(None));

        let mut second = None;
        c.save_with(&mut item(&c, Some(1), "b"), |_, prev, _| {
            second = Some(prev);
            Ok(())
        })
        .unwrap();
        assert_eq!(second, Some(Some(r1)));
        assert_eq!(c.len(), 1);
    }

    #[test]
    fn reads_by_reference() {
        let c = controller(IdGenerator::None);
        let mut record = item(&c, Some(5), "five");
        let reference = c.save(&mut record).unwrap();

        assert_eq!(c.get_with_reference(reference), Some(record.clone()));
        assert_eq!(
            c.get_attribute_with_reference("label", reference),
            Some(Value::Text("five".into()))
        );
        assert_eq!(c.identifier_with_reference(reference), Some(Value::Long(5)));
        assert_eq!(c.references().unwrap(), vec![reference]);
    }

    #[test]
    fn delete_runs_hook_before_removal() {
        let c = controller(IdGenerator::None);
        let reference = c.save(&mut item(&c, Some(1), "a")).unwrap();

        let mut seen = None;
        let removed = c
            .delete_with(&Value::Long(1), |r| {
                seen = Some(r);
                Ok(())
            })
            .unwrap();
        assert_eq!(removed, Some(reference));
        assert_eq!(seen, Some(reference));
        assert!(c.get(&Value::Long(1)).unwrap().is_none());
        assert_eq!(c.delete(&Value::Long(1)).unwrap(), None);
    }

    #[test]
    fn concurrent_sequence_ids_are_unique() {
        let c = Arc::new(controller(IdGenerator::Sequence));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let c = Arc::clone(&c);
                thread::spawn(move || {
                    for _ in 0..50 {
                        c.save(&mut item(&c, None, "t")).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(c.len(), 200);
        assert_eq!(c.sequence_mark().unwrap(), 200);
    }
}
