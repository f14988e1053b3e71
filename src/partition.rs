//! # Partitions
//!
//! A partitioned type splits its records by the value of its partition
//! attribute, each partition living in its own data file. Partition indexes
//! are allocated from a counter in the system data file the first time a
//! value is written and are never reused:
//!
//! ```text
//! system file
//! ├── __partitions__        : List[Text(file name), value] -> Long(index)
//! └── __partition_counter__ : Text("next")                 -> Long(last index)
//!
//! index 0  (null value)  ->  Person.dat
//! index 3  ("eu")        ->  Person_3.dat
//! ```
//!
//! Index 0 is the default partition: unpartitioned types and records whose
//! partition value is null live there.

use std::sync::Arc;

use eyre::{bail, Result};
use hashbrown::HashMap;
use parking_lot::RwLock;
use tracing::info;

use crate::config::{DATA_FILE_EXTENSION, PARTITION_COUNTER_MAP, PARTITION_MAP};
use crate::map::{DataFile, DiskMap};
use crate::types::Value;

pub const DEFAULT_PARTITION: u64 = 0;

const COUNTER_KEY: &str = "next";

/// Physical locator of a record: partition index plus map reference.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RecordRef {
    pub partition: u64,
    pub position: u64,
}

impl RecordRef {
    pub fn new(partition: u64, position: u64) -> Self {
        Self {
            partition,
            position,
        }
    }
}

/// Name of the data file backing `partition` of `file_name`.
pub fn data_file_name(file_name: &str, partition: u64) -> String {
    if partition == DEFAULT_PARTITION {
        format!("{}.{}", file_name, DATA_FILE_EXTENSION)
    } else {
        format!("{}_{}.{}", file_name, partition, DATA_FILE_EXTENSION)
    }
}

#[derive(Debug)]
pub struct PartitionRegistry {
    entries: Arc<DiskMap>,
    counter: Arc<DiskMap>,
    values: RwLock<HashMap<u64, Value>>,
}

impl PartitionRegistry {
    pub fn new(system: &DataFile) -> Result<Self> {
        Ok(Self {
            entries: system.map(PARTITION_MAP)?,
            counter: system.map(PARTITION_COUNTER_MAP)?,
            values: RwLock::new(HashMap::new()),
        })
    }

    fn entry_key(file_name: &str, value: &Value) -> Value {
        Value::List(vec![Value::Text(file_name.to_string()), value.clone()])
    }

    fn decode_index(value: Value) -> Result<u64> {
        match value {
            Value::Long(index) if index > 0 => Ok(index as u64),
            other => bail!("partition entry holds {}, expected positive long", other),
        }
    }

    /// Index of an existing partition; `None` if `value` was never written.
    pub fn index_for(&self, file_name: &str, value: &Value) -> Result<Option<u64>> {
        if value.is_null() {
            return Ok(Some(DEFAULT_PARTITION));
        }
        self.entries
            .get_value(&Self::entry_key(file_name, value))?
            .map(Self::decode_index)
            .transpose()
    }

    /// Index of the partition for `value`, allocating one on first use.
    pub fn get_or_create(&self, file_name: &str, value: &Value) -> Result<u64> {
        if value.is_null() {
            return Ok(DEFAULT_PARTITION);
        }

        let key = Self::entry_key(file_name, value);
        let entry = self.entries.lock_key(&key)?;
        if let Some(existing) = entry.get_value()? {
            return Self::decode_index(existing);
        }

        let counter_key = Value::Text(COUNTER_KEY.to_string());
        let counter = self.counter.lock_key(&counter_key)?;
        let next = match counter.get_value()? {
            None => 1,
            Some(Value::Long(last)) => last + 1,
            Some(other) => bail!("partition counter holds {}, expected long", other.type_name()),
        };
        counter.put_value(&Value::Long(next))?;
        drop(counter);

        entry.put_value(&Value::Long(next))?;
        self.values.write().insert(next as u64, value.clone());
        info!(file = file_name, partition = next, value = %value, "created partition");
        Ok(next as u64)
    }

    /// Every registered partition of `file_name` as (index, value), by index.
    pub fn partitions(&self, file_name: &str) -> Result<Vec<(u64, Value)>> {
        let mut found = Vec::new();
        for (key, bytes) in self.entries.entries()? {
            let Some([Value::Text(file), value]) = key.as_list() else {
                continue;
            };
            if file == file_name {
                let index = Self::decode_index(crate::encoding::decode_value(&bytes)?)?;
                found.push((index, value.clone()));
            }
        }
        found.sort_by_key(|(index, _)| *index);

        let mut values = self.values.write();
        for (index, value) in &found {
            values.insert(*index, value.clone());
        }
        Ok(found)
    }

    /// Partition value registered under `index` for `file_name`.
    pub fn value_for(&self, file_name: &str, index: u64) -> Result<Option<Value>> {
        if index == DEFAULT_PARTITION {
            return Ok(Some(Value::Null));
        }
        if let Some(value) = self.values.read().get(&index) {
            return Ok(Some(value.clone()));
        }
        Ok(self
            .partitions(file_name)?
            .into_iter()
            .find(|(i, _)| *i == index)
            .map(|(_, value)| value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn null_value_is_default_partition() {
        let system = DataFile::in_memory("system").unwrap();
        let registry = PartitionRegistry::new(&system).unwrap();
        assert_eq!(registry.get_or_create("Person", &Value::Null).unwrap(), 0);
        assert_eq!(registry.index_for("Person", &Value::Null).unwrap(), Some(0));
    }

    #[test]
    fn indexes_are_allocated_once_and_never_reused() {
        let system = DataFile::in_memory("system").unwrap();
        let registry = PartitionRegistry::new(&system).unwrap();

        let eu = registry.get_or_create("Person", &Value::Text("eu".into())).unwrap();
        let us = registry.get_or_create("Person", &Value::Text("us".into())).unwrap();
        let other = registry.get_or_create("Order", &Value::Text("eu".into())).unwrap();

        assert_eq!((eu, us, other), (1, 2, 3));
        assert_eq!(registry.get_or_create("Person", &Value::Text("eu".into())).unwrap(), 1);
        assert_eq!(registry.index_for("Person", &Value::Text("asia".into())).unwrap(), None);
        assert_eq!(
            registry.partitions("Person").unwrap(),
            vec![(1, Value::Text("eu".into())), (2, Value::Text("us".into()))]
        );
        assert_eq!(registry.value_for("Order", 3).unwrap(), Some(Value::Text("eu".into())));
    }

    #[test]
    fn partitions_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("system.dat");

        {
            let system = DataFile::open(crate::storage::StoreKind::File, &path).unwrap();
            let registry = PartitionRegistry::new(&system).unwrap();
            registry.get_or_create("Person", &Value::Int(10)).unwrap();
            system.close().unwrap();
        }

        let system = DataFile::open(crate::storage::StoreKind::File, &path).unwrap();
        let registry = PartitionRegistry::new(&system).unwrap();
        assert_eq!(registry.index_for("Person", &Value::Int(10)).unwrap(), Some(1));
        assert_eq!(registry.get_or_create("Person", &Value::Int(11)).unwrap(), 2);
    }

    #[test]
    fn file_names() {
        assert_eq!(data_file_name("Person", 0), "Person.dat");
        assert_eq!(data_file_name("Person", 4), "Person_4.dat");
    }
}
