//! # Serializer Registry
//!
//! Encoded records start with a small integer code naming their entity type.
//! The registry assigns those codes per data file and keeps them in two
//! reserved persistent maps, so they survive reopen:
//!
//! ```text
//! __serializers__name__ : Text(type name) -> Long(code)
//! __serializers__id__   : Long(code)      -> Text(type name)
//! ```
//!
//! Codes start at 1 and are assigned on first use. Lookups are served from an
//! in-memory cache after the first hit.

use eyre::{bail, Result};
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};

use crate::map::DiskMap;
use crate::types::Value;

#[derive(Debug)]
pub struct SerializerRegistry {
    by_name: DiskMap,
    by_code: DiskMap,
    codes: RwLock<HashMap<String, u32>>,
    names: RwLock<HashMap<u32, String>>,
    assign_lock: Mutex<()>,
}

impl SerializerRegistry {
    pub fn new(by_name: DiskMap, by_code: DiskMap) -> Self {
        Self {
            by_name,
            by_code,
            codes: RwLock::new(HashMap::new()),
            names: RwLock::new(HashMap::new()),
            assign_lock: Mutex::new(()),
        }
    }

    pub fn len(&self) -> u64 {
        self.by_code.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn remember(&self, name: &str, code: u32) {
        self.codes.write().insert(name.to_string(), code);
        self.names.write().insert(code, name.to_string());
    }

    /// Code for `name`, assigning the next free code on first use.
    pub fn code_for(&self, name: &str) -> Result<u32> {
        if let Some(&code) = self.codes.read().get(name) {
            return Ok(code);
        }

        let _assign = self.assign_lock.lock();
        let key = Value::Text(name.to_string());

        let code = match self.by_name.get_value(&key)? {
            Some(Value::Long(code)) => code as u32,
            Some(other) => bail!("serializer code for '{}' is {}, expected long", name, other.type_name()),
            None => {
                let code = self.by_code.len() as u32 + 1;
                self.by_code.put_value(&Value::Long(code as i64), &key)?;
                self.by_name.put_value(&key, &Value::Long(code as i64))?;
                code
            }
        };

        self.remember(name, code);
        Ok(code)
    }

    /// Type name registered under `code`.
    pub fn name_for(&self, code: u32) -> Result<Option<String>> {
        if let Some(name) = self.names.read().get(&code) {
            return Ok(Some(name.clone()));
        }

        match self.by_code.get_value(&Value::Long(code as i64))? {
            Some(Value::Text(name)) => {
                self.remember(&name, code);
                Ok(Some(name))
            }
            Some(other) => bail!("serializer name for code {} is {}, expected text", code, other.type_name()),
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{Store, StoreKind};
    use std::sync::Arc;
    use tempfile::tempdir;

    fn registry(store: &Arc<Store>) -> SerializerRegistry {
        SerializerRegistry::new(
            DiskMap::create(Arc::clone(store), "names").unwrap(),
            DiskMap::create(Arc::clone(store), "ids").unwrap(),
        )
    }

    #[test]
    fn codes_are_assigned_sequentially_from_one() {
        let store = Arc::new(Store::in_memory("ser").unwrap());
        let registry = registry(&store);

        assert_eq!(registry.code_for("Person").unwrap(), 1);
        assert_eq!(registry.code_for("Address").unwrap(), 2);
        assert_eq!(registry.code_for("Person").unwrap(), 1);
        assert_eq!(registry.name_for(2).unwrap().as_deref(), Some("Address"));
        assert_eq!(registry.name_for(9).unwrap(), None);
    }

    #[test]
    fn codes_survive_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("ser.dat");

        let (names_pos, ids_pos) = {
            let store = Arc::new(Store::open(StoreKind::File, &path).unwrap());
            let registry = registry(&store);
            registry.code_for("A").unwrap();
            registry.code_for("B").unwrap();
            store.close().unwrap();
            (
                registry.by_name.header_position(),
                registry.by_code.header_position(),
            )
        };

        let store = Arc::new(Store::open(StoreKind::File, &path).unwrap());
        let registry = SerializerRegistry::new(
            DiskMap::open(Arc::clone(&store), "names", names_pos).unwrap(),
            DiskMap::open(Arc::clone(&store), "ids", ids_pos).unwrap(),
        );
        assert_eq!(registry.code_for("B").unwrap(), 2);
        assert_eq!(registry.code_for("C").unwrap(), 3);
        assert_eq!(registry.name_for(1).unwrap().as_deref(), Some("A"));
    }
}
