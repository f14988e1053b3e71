//! # Data File
//!
//! A `DataFile` is one [`Store`] plus the named persistent maps living in it.
//! Every entity type (per partition) keeps its records, sequence counter,
//! index maps and relationship maps as named maps in a data file; the system
//! file keeps partition entries and the index registry the same way.
//!
//! ## Catalog
//!
//! The first allocation of every data file is the catalog map header, at
//! `CATALOG_MAP_POSITION` right behind the 8-byte size counter. The catalog
//! maps each map name to the position of that map's header:
//!
//! ```text
//! 0        8                 32
//! +--------+-----------------+-------------------------------------+
//! | size   | catalog header  | directories, nodes, other maps ...  |
//! +--------+-----------------+-------------------------------------+
//!
//! catalog: Text("Person")            -> Long(header position)
//!          Text("Person__idx__age#0") -> Long(header position)
//!          Text("__serializers__name__") -> ...
//! ```
//!
//! Maps are opened lazily and cached for the lifetime of the data file.

use std::path::Path;
use std::sync::Arc;

use eyre::{bail, ensure, Result};
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use super::DiskMap;
use crate::config::{CATALOG_MAP_POSITION, SERIALIZER_ID_MAP, SERIALIZER_NAME_MAP, STORE_HEADER_SIZE};
use crate::encoding::SerializerRegistry;
use crate::storage::{Store, StoreKind};
use crate::types::Value;

const CATALOG_NAME: &str = "__catalog__";

#[derive(Debug)]
pub struct DataFile {
    store: Arc<Store>,
    catalog: DiskMap,
    serializers: SerializerRegistry,
    maps: RwLock<HashMap<String, Arc<DiskMap>>>,
    create_lock: Mutex<()>,
}

impl DataFile {
    pub fn open(kind: StoreKind, path: &Path) -> Result<Self> {
        Self::from_store(Arc::new(Store::open(kind, path)?))
    }

    pub fn in_memory(name: &str) -> Result<Self> {
        Self::from_store(Arc::new(Store::in_memory(name)?))
    }

    pub fn from_store(store: Arc<Store>) -> Result<Self> {
        let catalog = if store.file_size() == STORE_HEADER_SIZE {
            let catalog = DiskMap::create(Arc::clone(&store), CATALOG_NAME)?;
            ensure!(
                catalog.header_position() == CATALOG_MAP_POSITION,
                "catalog of '{}' allocated at {} instead of {}",
                store.name(),
                catalog.header_position(),
                CATALOG_MAP_POSITION
            );
            catalog
        } else {
            DiskMap::open(Arc::clone(&store), CATALOG_NAME, CATALOG_MAP_POSITION)?
        };

        let by_name = Self::open_or_create(&store, &catalog, SERIALIZER_NAME_MAP)?;
        let by_code = Self::open_or_create(&store, &catalog, SERIALIZER_ID_MAP)?;

        Ok(Self {
            store,
            catalog,
            serializers: SerializerRegistry::new(by_name, by_code),
            maps: RwLock::new(HashMap::new()),
            create_lock: Mutex::new(()),
        })
    }

    fn open_or_create(store: &Arc<Store>, catalog: &DiskMap, name: &str) -> Result<DiskMap> {
        let key = Value::Text(name.to_string());
        match catalog.get_value(&key)? {
            Some(Value::Long(position)) => DiskMap::open(Arc::clone(store), name, position as u64),
            Some(other) => bail!(
                "catalog entry for map '{}' is {}, expected long",
                name,
                other.type_name()
            ),
            None => {
                let map = DiskMap::create(Arc::clone(store), name)?;
                catalog.put_value(&key, &Value::Long(map.header_position() as i64))?;
                debug!(store = %store.name(), map = name, "created map");
                Ok(map)
            }
        }
    }

    pub fn store(&self) -> &Arc<Store> {
        &self.store
    }

    pub fn serializers(&self) -> &SerializerRegistry {
        &self.serializers
    }

    /// The named map, created on first use.
    pub fn map(&self, name: &str) -> Result<Arc<DiskMap>> {
        if let Some(map) = self.maps.read().get(name) {
            return Ok(Arc::clone(map));
        }

        let _create = self.create_lock.lock();
        if let Some(map) = self.maps.read().get(name) {
            return Ok(Arc::clone(map));
        }

        let map = Arc::new(Self::open_or_create(&self.store, &self.catalog, name)?);
        self.maps.write().insert(name.to_string(), Arc::clone(&map));
        Ok(map)
    }

    pub fn contains_map(&self, name: &str) -> Result<bool> {
        self.catalog.contains_key(&Value::Text(name.to_string()))
    }

    pub fn map_names(&self) -> Result<Vec<String>> {
        Ok(self
            .catalog
            .keys()?
            .into_iter()
            .filter_map(|key| match key {
                Value::Text(name) => Some(name),
                _ => None,
            })
            .collect())
    }

    /// Removes a map from the catalog and releases all of its regions.
    pub fn drop_map(&self, name: &str) -> Result<()> {
        let _create = self.create_lock.lock();
        let key = Value::Text(name.to_string());

        let cached = self.maps.write().remove(name);
        let map = match cached {
            Some(map) => Some(map),
            None => match self.catalog.get_value(&key)? {
                Some(Value::Long(position)) => Some(Arc::new(DiskMap::open(
                    Arc::clone(&self.store),
                    name,
                    position as u64,
                )?)),
                _ => None,
            },
        };

        if let Some(map) = map {
            self.catalog.remove(&key)?;
            map.destroy()?;
            debug!(store = %self.store.name(), map = name, "dropped map");
        }
        Ok(())
    }

    pub fn commit(&self) -> Result<()> {
        self.store.commit()
    }

    pub fn close(&self) -> Result<()> {
        self.store.close()
    }

    pub fn delete(&self) -> Result<()> {
        self.maps.write().clear();
        self.store.delete()
    }
}
