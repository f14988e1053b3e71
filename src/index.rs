//! # Index Controller
//!
//! A secondary index over one attribute of one entity type in one partition.
//! It is a pair of persistent maps in the partition's data file:
//!
//! ```text
//! "{type}__idx__{attr}#{gen}"       : indexed value -> List[Long(reference), ...]
//! "{type}__idx__{attr}#{gen}__rev"  : Long(reference) -> indexed value
//! "{type}__idx_generation"          : Text(attr) -> Long(gen)
//! ```
//!
//! The reverse map lets `save` and `delete` drop a reference from its old
//! value set without knowing the old value. Null values are not indexed.
//!
//! ## Rebuild
//!
//! A rebuild fills generation `gen + 1` from a full pass over the records
//! while holding the record controller's write gate exclusively, so the
//! record set cannot change under it. Readers keep using generation `gen`
//! until the new one is complete, then `current` is swapped in one step.
//! Retired generations are dropped from the data file once no reader holds
//! them any more.
//!
//! ```text
//! readers ──► current: Arc<IndexMaps{gen}> ──swap──► Arc<IndexMaps{gen+1}>
//!                           │
//!                           └─► retired until strong_count == 1, then dropped
//! ```
//!
//! A failed rebuild leaves the index `Stale`; scanners never use a stale
//! index, so it stays distinguishable from a successful rebuild.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use eyre::{bail, eyre, Result};
use parking_lot::{Mutex, RwLock};
use smallvec::SmallVec;
use tracing::{info, warn};

use crate::encoding::decode_value;
use crate::map::{DataFile, DiskMap};
use crate::record::RecordController;
use crate::schema::{AttributeDescriptor, EntityDescriptor};
use crate::types::Value;

pub type References = SmallVec<[u64; 4]>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexStatus {
    Ready,
    Stale,
}

#[derive(Debug)]
struct IndexMaps {
    generation: u64,
    forward: Arc<DiskMap>,
    reverse: Arc<DiskMap>,
}

pub struct IndexController {
    descriptor: Arc<EntityDescriptor>,
    attribute: AttributeDescriptor,
    data_file: Arc<DataFile>,
    generations: Arc<DiskMap>,
    current: RwLock<Arc<IndexMaps>>,
    retired: Mutex<Vec<Arc<IndexMaps>>>,
    stale: AtomicBool,
    rebuild_lock: Mutex<()>,
}

impl std::fmt::Debug for IndexController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexController")
            .field("type", &self.descriptor.type_name())
            .field("attribute", &self.attribute.name())
            .field("generation", &self.current.read().generation)
            .field("status", &self.status())
            .finish()
    }
}

fn decode_references(value: Option<Value>) -> Result<References> {
    match value {
        None => Ok(References::new()),
        Some(Value::List(items)) => items
            .iter()
            .map(|item| match item {
                Value::Long(reference) => Ok(*reference as u64),
                other => Err(eyre!("index reference is {}, expected long", other.type_name())),
            })
            .collect(),
        Some(other) => bail!("index entry is {}, expected list", other.type_name()),
    }
}

fn encode_references(references: &[u64]) -> Value {
    Value::List(references.iter().map(|&r| Value::Long(r as i64)).collect())
}

impl IndexController {
    pub fn new(descriptor: Arc<EntityDescriptor>, attribute: &str, data_file: Arc<DataFile>) -> Result<Self> {
        let Some(attribute) = descriptor.attribute(attribute).cloned() else {
            bail!("'{}' has no attribute '{}' to index", descriptor.type_name(), attribute);
        };

        let generations = data_file.map(&format!("{}__idx_generation", descriptor.type_name()))?;
        let generation = match generations.get_value(&Value::Text(attribute.name().to_string()))? {
            None => 0,
            Some(Value::Long(generation)) => generation as u64,
            Some(other) => bail!("index generation is {}, expected long", other.type_name()),
        };
        let maps = Self::open_generation(&descriptor, &attribute, &data_file, generation)?;

        Ok(Self {
            descriptor,
            attribute,
            data_file,
            generations,
            current: RwLock::new(Arc::new(maps)),
            retired: Mutex::new(Vec::new()),
            stale: AtomicBool::new(false),
            rebuild_lock: Mutex::new(()),
        })
    }

    fn open_generation(
        descriptor: &EntityDescriptor,
        attribute: &AttributeDescriptor,
        data_file: &DataFile,
        generation: u64,
    ) -> Result<IndexMaps> {
        let base = format!("{}__idx__{}#{}", descriptor.type_name(), attribute.name(), generation);
        Ok(IndexMaps {
            generation,
            forward: data_file.map(&base)?,
            reverse: data_file.map(&format!("{}__rev", base))?,
        })
    }

    pub fn attribute(&self) -> &AttributeDescriptor {
        &self.attribute
    }

    pub fn generation(&self) -> u64 {
        self.current.read().generation
    }

    pub fn status(&self) -> IndexStatus {
        if self.stale.load(Ordering::Acquire) {
            IndexStatus::Stale
        } else {
            IndexStatus::Ready
        }
    }

    pub fn mark_stale(&self) {
        self.stale.store(true, Ordering::Release);
    }

    fn maps(&self) -> Arc<IndexMaps> {
        Arc::clone(&self.current.read())
    }

    fn insert(maps: &IndexMaps, value: &Value, reference: u64) -> Result<()> {
        let guard = maps.forward.lock_key(value)?;
        let mut references = decode_references(guard.get_value()?)?;
        if !references.contains(&reference) {
            references.push(reference);
            guard.put_value(&encode_references(&references))?;
        }
        drop(guard);

        maps.reverse.put_value(&Value::Long(reference as i64), value)?;
        Ok(())
    }

    fn remove_reference(maps: &IndexMaps, reference: u64) -> Result<()> {
        let Some(bytes) = maps.reverse.remove(&Value::Long(reference as i64))? else {
            return Ok(());
        };
        let value = decode_value(&bytes)?;

        let guard = maps.forward.lock_key(&value)?;
        let mut references = decode_references(guard.get_value()?)?;
        references.retain(|r| *r != reference);
        if references.is_empty() {
            guard.remove()?;
        } else {
            guard.put_value(&encode_references(&references))?;
        }
        Ok(())
    }

    /// Moves `old_reference` (if any) out of its value set and adds
    /// `new_reference` under `value`.
    pub fn save(&self, value: &Value, old_reference: Option<u64>, new_reference: u64) -> Result<()> {
        let maps = self.maps();
        if let Some(old) = old_reference {
            Self::remove_reference(&maps, old)?;
        }
        if !value.is_null() {
            Self::insert(&maps, value, new_reference)?;
        }
        Ok(())
    }

    pub fn delete(&self, reference: u64) -> Result<()> {
        Self::remove_reference(&self.maps(), reference)
    }

    /// Distinct indexed values.
    pub fn find_all_values(&self) -> Result<Vec<Value>> {
        self.maps().forward.keys()
    }

    /// References whose value equals `value`. Values that cannot be expressed
    /// exactly in the attribute's type match nothing.
    pub fn find(&self, value: &Value) -> Result<References> {
        let Some(key) = value.convert_exact(self.attribute.attribute_type()) else {
            return Ok(References::new());
        };
        if key.is_null() {
            return Ok(References::new());
        }
        decode_references(self.maps().forward.get_value(&key)?)
    }

    /// References of every indexed value accepted by `matches`.
    pub fn find_matching(&self, mut matches: impl FnMut(&Value) -> bool) -> Result<Vec<u64>> {
        let mut found = Vec::new();
        for (value, bytes) in self.maps().forward.entries()? {
            if matches(&value) {
                found.extend(decode_references(Some(decode_value(&bytes)?))?);
            }
        }
        Ok(found)
    }

    /// Repopulates the index from every record of `records`.
    pub fn rebuild(&self, records: &RecordController) -> Result<()> {
        let _rebuild = self.rebuild_lock.lock();
        let result = self.rebuild_generation(records);
        match &result {
            Ok(count) => {
                self.stale.store(false, Ordering::Release);
                info!(
                    entity = %self.descriptor.type_name(),
                    attribute = %self.attribute.name(),
                    partition = records.partition(),
                    generation = self.generation(),
                    entries = count,
                    "rebuilt index"
                );
            }
            Err(err) => {
                self.mark_stale();
                warn!(
                    entity = %self.descriptor.type_name(),
                    attribute = %self.attribute.name(),
                    partition = records.partition(),
                    error = %err,
                    "index rebuild failed"
                );
            }
        }
        self.purge_retired();
        result.map(|_| ())
    }

    fn rebuild_generation(&self, records: &RecordController) -> Result<usize> {
        let _gate = records.exclusive();
        let generation = self.generation() + 1;
        info!(
            entity = %self.descriptor.type_name(),
            attribute = %self.attribute.name(),
            generation,
            "rebuilding index"
        );

        let maps = Self::open_generation(&self.descriptor, &self.attribute, &self.data_file, generation)?;
        maps.forward.clear()?;
        maps.reverse.clear()?;

        let mut count = 0;
        for reference in records.references()? {
            let Some(value) = records.get_attribute_with_reference(self.attribute.name(), reference) else {
                continue;
            };
            if value.is_null() {
                continue;
            }
            Self::insert(&maps, &value, reference)?;
            count += 1;
        }

        self.generations.put_value(
            &Value::Text(self.attribute.name().to_string()),
            &Value::Long(generation as i64),
        )?;
        let old = std::mem::replace(&mut *self.current.write(), Arc::new(maps));
        self.retired.lock().push(old);
        Ok(count)
    }

    fn purge_retired(&self) {
        self.retired.lock().retain(|maps| {
            if Arc::strong_count(maps) > 1 {
                return true;
            }
            for map in [&maps.forward, &maps.reverse] {
                if let Err(err) = self.data_file.drop_map(map.name()) {
                    warn!(map = %map.name(), error = %err, "failed to drop retired index map");
                }
            }
            false
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use crate::schema::IdGenerator;
    use crate::types::AttributeType;

    struct Fixture {
        records: RecordController,
        index: IndexController,
    }

    fn fixture() -> Fixture {
        let descriptor = Arc::new(
            EntityDescriptor::builder("Person")
                .identifier("id", AttributeType::Long, IdGenerator::None)
                .attribute(AttributeDescriptor::new("age", AttributeType::Int))
                .index("age")
                .build()
                .unwrap(),
        );
        let file = Arc::new(DataFile::in_memory("people").unwrap());
        Fixture {
            records: RecordController::new(Arc::clone(&descriptor), 0, Value::Null, Arc::clone(&file), &file, None)
                .unwrap(),
            index: IndexController::new(descriptor, "age", file).unwrap(),
        }
    }

    impl Fixture {
        fn save(&self, id: i64, age: Option<i32>, indexed: bool) -> u64 {
            let mut record = Record::new(Arc::clone(self.records.descriptor()));
            record.set("id", id).unwrap();
            record.set("age", age).unwrap();
            let value = record.get("age").cloned().unwrap();
            self.records
                .save_with(&mut record, |_, old, new| {
                    if indexed {
                        self.index.save(&value, old, new)?;
                    }
                    Ok(())
                })
                .unwrap()
        }
    }

    #[test]
    fn save_moves_reference_between_values() {
        let f = fixture();
        let r1 = f.save(1, Some(30), true);
        assert_eq!(f.index.find(&Value::Int(30)).unwrap().as_slice(), &[r1]);

        let r2 = f.save(1, Some(31), true);
        assert!(f.index.find(&Value::Int(30)).unwrap().is_empty());
        assert_eq!(f.index.find(&Value::Int(31)).unwrap().as_slice(), &[r2]);
        assert_eq!(f.index.find_all_values().unwrap(), vec![Value::Int(31)]);
    }

    #[test]
    fn superseded_reference_is_not_reused_before_index_update() {
        let f = fixture();
        f.save(1, Some(30), true);

        let map = f.records.data_file().map(&f.records.descriptor().records_map()).unwrap();
        let shard = map.shard_of(&Value::Long(1));
        let other = (2..1_000i64)
            .find(|id| map.shard_of(&Value::Long(*id)) != shard)
            .unwrap();

        let mut record = Record::new(Arc::clone(f.records.descriptor()));
        record.set("id", 1i64).unwrap();
        record.set("age", 31).unwrap();
        let mut other_reference = None;
        f.records
            .save_with(&mut record, |_, old, new| {
                other_reference = Some(f.save(other, Some(50), true));
                f.index.save(&Value::Int(31), old, new)
            })
            .unwrap();

        let other_reference = other_reference.unwrap();
        assert_eq!(f.index.find(&Value::Int(50)).unwrap().as_slice(), &[other_reference]);
        assert!(f.index.find(&Value::Int(30)).unwrap().is_empty());
        assert_eq!(f.index.find(&Value::Int(31)).unwrap().len(), 1);
        assert_eq!(f.records.identifier_with_reference(other_reference), Some(Value::Long(other)));
    }

    #[test]
    fn null_values_are_not_indexed() {
        let f = fixture();
        f.save(1, None, true);
        assert!(f.index.find_all_values().unwrap().is_empty());
    }

    #[test]
    fn lookup_converts_exactly() {
        let f = fixture();
        let r = f.save(1, Some(5), true);
        assert_eq!(f.index.find(&Value::Long(5)).unwrap().as_slice(), &[r]);
        assert_eq!(f.index.find(&Value::Double(5.0)).unwrap().as_slice(), &[r]);
        assert!(f.index.find(&Value::Double(5.5)).unwrap().is_empty());
        assert!(f.index.find(&Value::Text("5".into())).unwrap().is_empty());
    }

    #[test]
    fn delete_removes_membership() {
        let f = fixture();
        let r1 = f.save(1, Some(20), true);
        let r2 = f.save(2, Some(20), true);
        f.index.delete(r1).unwrap();
        assert_eq!(f.index.find(&Value::Int(20)).unwrap().as_slice(), &[r2]);
    }

    #[test]
    fn range_lookup() {
        let f = fixture();
        for (id, age) in [(1, 10), (2, 20), (3, 30)] {
            f.save(id, Some(age), true);
        }
        let mut found = f
            .index
            .find_matching(|v| v.compare(&Value::Int(15)) == Some(std::cmp::Ordering::Greater))
            .unwrap();
        found.sort();
        assert_eq!(found.len(), 2);
    }

    #[test]
    fn rebuild_indexes_existing_records_and_swaps_generation() {
        let f = fixture();
        f.save(1, Some(40), false);
        f.save(2, Some(41), false);
        f.save(3, None, false);
        assert!(f.index.find_all_values().unwrap().is_empty());

        f.index.rebuild(&f.records).unwrap();
        assert_eq!(f.index.generation(), 1);
        assert_eq!(f.index.status(), IndexStatus::Ready);
        let mut values = f.index.find_all_values().unwrap();
        values.sort_by(|a, b| a.compare_for_sort(b));
        assert_eq!(values, vec![Value::Int(40), Value::Int(41)]);
        assert!(!f.records.data_file().contains_map("Person__idx__age#0").unwrap());
    }

    #[test]
    fn generation_survives_reopen_of_controller() {
        let f = fixture();
        f.save(1, Some(1), false);
        f.index.rebuild(&f.records).unwrap();
        let reopened = IndexController::new(
            Arc::clone(f.records.descriptor()),
            "age",
            Arc::clone(f.records.data_file()),
        )
        .unwrap();
        assert_eq!(reopened.generation(), 1);
        assert_eq!(reopened.find(&Value::Int(1)).unwrap().len(), 1);
    }
}
