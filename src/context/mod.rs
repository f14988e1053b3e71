//! # Schema Context
//!
//! The runtime owner of one database: the schema, the system data file, one
//! data file per (file name, partition), the cached partition handles, the
//! transaction log and the background flush thread. Every engine operation
//! that crosses partitions or entity types goes through it.
//!
//! ## Layout on Disk
//!
//! ```text
//! <location>/
//! ├── system.dat          partitions, identifier sequences, index registry
//! ├── Person.dat          default partition of file "Person"
//! ├── Person_3.dat        partition 3 of file "Person"
//! └── wal/
//!     ├── 0.wal
//!     └── 1.wal
//! ```
//!
//! ## Write Path
//!
//! ```text
//! validate ──► pick partition (allocate on first use)
//!          ──► moved? delete from the old partition
//!          ──► records.save_with ─┬─► index.save for every index
//!                                 └─► relationship.replace + inverse upkeep
//! ```
//!
//! Index and relationship bookkeeping runs while the record's key lock is
//! held. Relationship maps are locked one key at a time, never two at once,
//! so inverse upkeep between two types cannot deadlock.
//!
//! ## Index Change Detection
//!
//! The system file records the indexed attributes of every type. On open,
//! an index that is declared but not recorded is rebuilt in every partition
//! that already holds data. A failed rebuild leaves that index `Stale`.

mod flush;
mod handle;

pub use handle::PartitionHandle;

use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use eyre::{bail, eyre, Result, WrapErr};
use hashbrown::HashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use self::flush::FlushWorker;
use crate::config::{INDEX_REGISTRY_MAP, JOURNAL_DIR, JOURNAL_MAX_FILE_SIZE, SYSTEM_FILE_NAME};
use crate::error::EntityError;
use crate::map::{DataFile, DiskMap};
use crate::partition::{data_file_name, PartitionRegistry, DEFAULT_PARTITION};
use crate::query::PartitionSelection;
use crate::record::Record;
use crate::relationship::{RelatedRef, RelationshipController};
use crate::schema::validation::{coerce, coerce_identifier, validate_values};
use crate::schema::{EntityDescriptor, RelationshipKind, Schema};
use crate::storage::{StoreKind, TransactionLog};
use crate::types::Value;

/// Everything needed to open a [`SchemaContext`].
#[derive(Debug, Clone)]
pub struct ContextOptions {
    pub location: Option<PathBuf>,
    pub store_kind: StoreKind,
    pub schema: Schema,
    pub flush_interval: Option<Duration>,
    pub journaling: bool,
    pub journal_sync: bool,
    pub journal_max_file_size: u64,
}

impl Default for ContextOptions {
    fn default() -> Self {
        Self {
            location: None,
            store_kind: StoreKind::default(),
            schema: Schema::new(),
            flush_interval: None,
            journaling: false,
            journal_sync: false,
            journal_max_file_size: JOURNAL_MAX_FILE_SIZE,
        }
    }
}

type HandleKey = (String, u64);

pub struct SchemaContext {
    location: Option<PathBuf>,
    store_kind: StoreKind,
    schema: Schema,
    system: Arc<DataFile>,
    partitions: PartitionRegistry,
    index_registry: Arc<DiskMap>,
    data_files: RwLock<HashMap<String, Arc<DataFile>>>,
    handles: RwLock<HashMap<HandleKey, Arc<PartitionHandle>>>,
    create_lock: Mutex<()>,
    journal: Option<Arc<TransactionLog>>,
    flusher: Mutex<Option<FlushWorker>>,
    closed: AtomicBool,
}

impl std::fmt::Debug for SchemaContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SchemaContext")
            .field("location", &self.location)
            .field("store_kind", &self.store_kind)
            .field("types", &self.schema.len())
            .field("data_files", &self.data_files.read().len())
            .field("journaling", &self.journal.is_some())
            .field("closed", &self.closed.load(Ordering::Relaxed))
            .finish()
    }
}

impl SchemaContext {
    pub fn open(options: ContextOptions) -> Result<Arc<Self>> {
        options.schema.validate()?;

        let location = match options.store_kind {
            StoreKind::Memory => None,
            _ => options.location,
        };
        if let Some(dir) = &location {
            std::fs::create_dir_all(dir)
                .wrap_err_with(|| format!("failed to create database directory {:?}", dir))?;
        }

        let system_name = data_file_name(SYSTEM_FILE_NAME, DEFAULT_PARTITION);
        let system = Arc::new(Self::open_data_file(location.as_deref(), options.store_kind, &system_name)?);
        let partitions = PartitionRegistry::new(&system)?;
        let index_registry = system.map(INDEX_REGISTRY_MAP)?;

        let journal = match &location {
            Some(dir) if options.journaling => Some(Arc::new(TransactionLog::open(
                &dir.join(JOURNAL_DIR),
                options.journal_max_file_size,
                options.journal_sync,
            )?)),
            _ => None,
        };

        let context = Arc::new(Self {
            location,
            store_kind: options.store_kind,
            schema: options.schema,
            system,
            partitions,
            index_registry,
            data_files: RwLock::new(HashMap::new()),
            handles: RwLock::new(HashMap::new()),
            create_lock: Mutex::new(()),
            journal,
            flusher: Mutex::new(None),
            closed: AtomicBool::new(false),
        });

        context.detect_index_changes()?;

        if let Some(interval) = options.flush_interval {
            let worker = FlushWorker::spawn(Arc::downgrade(&context), interval)?;
            *context.flusher.lock() = Some(worker);
        }

        info!(
            location = ?context.location,
            store_kind = ?context.store_kind,
            types = context.schema.len(),
            journaling = context.journal.is_some(),
            "opened database"
        );
        Ok(context)
    }

    fn open_data_file(location: Option<&Path>, kind: StoreKind, name: &str) -> Result<DataFile> {
        match location {
            Some(dir) => DataFile::open(kind, &dir.join(name))
                .wrap_err_with(|| format!("failed to open data file '{}'", name)),
            None => DataFile::in_memory(name),
        }
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn location(&self) -> Option<&Path> {
        self.location.as_deref()
    }

    pub fn journal(&self) -> Option<&Arc<TransactionLog>> {
        self.journal.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_closed() {
            bail!("database is closed");
        }
        Ok(())
    }

    pub fn descriptor(&self, type_name: &str) -> Result<Arc<EntityDescriptor>> {
        self.schema.descriptor(type_name)
    }

    fn data_file(&self, file_name: &str, partition: u64) -> Result<Arc<DataFile>> {
        let name = data_file_name(file_name, partition);
        if let Some(file) = self.data_files.read().get(&name) {
            return Ok(Arc::clone(file));
        }

        let file = Arc::new(Self::open_data_file(self.location.as_deref(), self.store_kind, &name)?);
        debug!(file = %name, "opened data file");
        self.data_files.write().insert(name, Arc::clone(&file));
        Ok(file)
    }

    /// True when `partition` of `file_name` has a data file from an earlier
    /// session or from this one.
    fn has_stored_data(&self, file_name: &str, partition: u64) -> bool {
        let name = data_file_name(file_name, partition);
        if self.data_files.read().contains_key(&name) {
            return true;
        }
        self.location.as_ref().is_some_and(|dir| dir.join(&name).exists())
    }

    /// The cached handle of `type_name` in `partition`, opened on first use.
    pub fn handle(&self, type_name: &str, partition: u64) -> Result<Arc<PartitionHandle>> {
        self.ensure_open()?;
        let key = (type_name.to_string(), partition);
        if let Some(handle) = self.handles.read().get(&key) {
            return Ok(Arc::clone(handle));
        }

        let _create = self.create_lock.lock();
        if let Some(handle) = self.handles.read().get(&key) {
            return Ok(Arc::clone(handle));
        }

        let descriptor = self.descriptor(type_name)?;
        let Some(value) = self.partitions.value_for(descriptor.file_name(), partition)? else {
            bail!("partition {} of '{}' is not registered", partition, type_name);
        };
        let data_file = self.data_file(descriptor.file_name(), partition)?;
        let handle = Arc::new(PartitionHandle::open(
            &self.schema,
            descriptor,
            partition,
            value,
            data_file,
            &self.system,
            self.journal.clone(),
        )?);

        self.handles.write().insert(key, Arc::clone(&handle));
        Ok(handle)
    }

    /// Handles of the partitions a query selects, default partition first.
    pub fn handles_for(
        &self,
        descriptor: &EntityDescriptor,
        selection: &PartitionSelection,
    ) -> Result<Vec<Arc<PartitionHandle>>> {
        let type_name = descriptor.type_name();
        match selection {
            PartitionSelection::Default => Ok(vec![self.handle(type_name, DEFAULT_PARTITION)?]),
            PartitionSelection::Value(value) => {
                let Some(attribute) = descriptor.partition().and_then(|p| descriptor.attribute(p)) else {
                    return Ok(vec![self.handle(type_name, DEFAULT_PARTITION)?]);
                };
                let value = coerce(descriptor, attribute, value.clone())?;
                match self.partitions.index_for(descriptor.file_name(), &value)? {
                    Some(partition) => Ok(vec![self.handle(type_name, partition)?]),
                    None => Ok(Vec::new()),
                }
            }
            PartitionSelection::All => {
                let mut handles = vec![self.handle(type_name, DEFAULT_PARTITION)?];
                if descriptor.partition().is_some() {
                    for (partition, _) in self.partitions.partitions(descriptor.file_name())? {
                        handles.push(self.handle(type_name, partition)?);
                    }
                }
                Ok(handles)
            }
        }
    }

    /// Handle of the partition `record` belongs to, allocating it if needed.
    fn handle_for_record(&self, record: &Record) -> Result<Arc<PartitionHandle>> {
        let descriptor = record.descriptor();
        let partition = self
            .partitions
            .get_or_create(descriptor.file_name(), &record.partition_value())?;
        self.handle(descriptor.type_name(), partition)
    }

    /// Handle of an existing partition holding `value`; `None` if no record
    /// was ever written there.
    fn existing_handle(&self, descriptor: &EntityDescriptor, value: &Value) -> Result<Option<Arc<PartitionHandle>>> {
        match self.partitions.index_for(descriptor.file_name(), value)? {
            Some(partition) => Ok(Some(self.handle(descriptor.type_name(), partition)?)),
            None => Ok(None),
        }
    }

    /// Relationship `name` of `descriptor` in the partition holding `value`.
    fn relationship_in(
        &self,
        descriptor: &EntityDescriptor,
        value: &Value,
        name: &str,
        create: bool,
    ) -> Result<Option<Arc<RelationshipController>>> {
        let partition = if create {
            Some(self.partitions.get_or_create(descriptor.file_name(), value)?)
        } else {
            self.partitions.index_for(descriptor.file_name(), value)?
        };
        let Some(partition) = partition else {
            return Ok(None);
        };
        let handle = self.handle(descriptor.type_name(), partition)?;
        Ok(handle.relationship(name).cloned())
    }

    /// Validates and stores `record`. With a `source` handle from another
    /// partition, the record is removed there first.
    pub fn save_from(&self, source: Option<&Arc<PartitionHandle>>, mut record: Record) -> Result<Record> {
        self.ensure_open()?;
        validate_values(record.descriptor(), record.values())?;

        let target = self.handle_for_record(&record)?;
        if let Some(source) = source {
            if source.partition() != target.partition() {
                let identifier = record.id().clone();
                self.delete_in(source, &identifier)?;
                debug!(
                    entity = %record.type_name(),
                    from = source.partition(),
                    to = target.partition(),
                    "moved record between partitions"
                );
            }
        }

        self.write(&target, &mut record)?;
        Ok(record)
    }

    fn write(&self, handle: &Arc<PartitionHandle>, record: &mut Record) -> Result<()> {
        let mut relationships = Vec::with_capacity(record.relationships().len());
        for (name, targets) in record.relationships() {
            let Some(controller) = handle.relationship(name) else {
                return Err(eyre!("relationship '{}' of '{}' has no controller", name, record.type_name()));
            };
            relationships.push((Arc::clone(controller), controller.normalize(targets)?));
        }

        handle.records().save_with(record, |saved, previous, reference| {
            for index in handle.indexes() {
                let value = saved.get(index.attribute().name()).cloned().unwrap_or(Value::Null);
                index.save(&value, previous, reference)?;
            }
            for (controller, targets) in &relationships {
                self.store_relationship(handle, controller, saved.id(), targets)?;
            }
            Ok(())
        })?;
        Ok(())
    }

    fn store_relationship(
        &self,
        handle: &PartitionHandle,
        controller: &RelationshipController,
        owner: &Value,
        targets: &[RelatedRef],
    ) -> Result<()> {
        let previous = controller.replace(owner, targets)?;
        let Some(inverse_name) = controller.descriptor().inverse_name() else {
            return Ok(());
        };

        let target_type = controller.target();
        let owner_ref = RelatedRef::new(owner.clone(), handle.partition_value().clone());

        for removed in previous.iter().filter(|p| !targets.contains(p)) {
            if let Some(inverse) = self.relationship_in(target_type, &removed.partition, inverse_name, false)? {
                inverse.remove(&removed.identifier, &owner_ref)?;
            }
        }

        for added in targets.iter().filter(|t| !previous.contains(t)) {
            let Some(inverse) = self.relationship_in(target_type, &added.partition, inverse_name, true)? else {
                continue;
            };
            if inverse.descriptor().kind() == RelationshipKind::ToOne {
                for displaced in inverse.targets(&added.identifier)? {
                    if displaced == owner_ref {
                        continue;
                    }
                    let forward = self.relationship_in(
                        handle.descriptor(),
                        &displaced.partition,
                        controller.descriptor().name(),
                        false,
                    )?;
                    if let Some(forward) = forward {
                        forward.remove(&displaced.identifier, added)?;
                    }
                }
            }
            inverse.add(&added.identifier, &owner_ref)?;
        }
        Ok(())
    }

    /// Deletes `identifier` from `handle` with its index entries, its
    /// relationship entries and its place in inverse lists.
    pub fn delete_in(&self, handle: &PartitionHandle, identifier: &Value) -> Result<bool> {
        self.ensure_open()?;
        let removed = handle.records().delete_with(identifier, |reference| {
            for index in handle.indexes() {
                index.delete(reference)?;
            }
            for controller in handle.relationships() {
                let previous = controller.remove_all(identifier)?;
                let Some(inverse_name) = controller.descriptor().inverse_name() else {
                    continue;
                };
                let owner_ref = RelatedRef::new(identifier.clone(), handle.partition_value().clone());
                for target in &previous {
                    if let Some(inverse) =
                        self.relationship_in(controller.target(), &target.partition, inverse_name, false)?
                    {
                        inverse.remove(&target.identifier, &owner_ref)?;
                    }
                }
            }
            Ok(())
        })?;
        Ok(removed.is_some())
    }

    fn no_results(type_name: &str) -> eyre::Report {
        EntityError::NoResults {
            type_name: type_name.to_string(),
        }
        .into()
    }

    fn load(handle: &PartitionHandle, identifier: &Value) -> Result<Option<Record>> {
        let Some(mut record) = handle.records().get(identifier)? else {
            return Ok(None);
        };
        handle.load_relationships(&mut record)?;
        Ok(Some(record))
    }

    /// Stored state of `record`, looked up by its identifier in the
    /// partition its partition value selects.
    pub fn find(&self, record: &Record) -> Result<Record> {
        let descriptor = record.descriptor();
        let identifier = coerce_identifier(descriptor, record.id().clone())?;
        if let Some(handle) = self.existing_handle(descriptor, &record.partition_value())? {
            if let Some(found) = Self::load(&handle, &identifier)? {
                return Ok(found);
            }
        }
        Err(Self::no_results(descriptor.type_name()))
    }

    /// Looks `identifier` up in the default partition, then in every other
    /// partition in index order.
    pub fn find_by_id(&self, type_name: &str, identifier: Value) -> Result<Record> {
        let descriptor = self.descriptor(type_name)?;
        let identifier = coerce_identifier(&descriptor, identifier)?;
        for handle in self.handles_for(&descriptor, &PartitionSelection::All)? {
            if let Some(found) = Self::load(&handle, &identifier)? {
                return Ok(found);
            }
        }
        Err(Self::no_results(type_name))
    }

    pub fn exists(&self, record: &Record) -> Result<bool> {
        let descriptor = record.descriptor();
        let identifier = coerce_identifier(descriptor, record.id().clone())?;
        match self.existing_handle(descriptor, &record.partition_value())? {
            Some(handle) => handle.records().exists(&identifier),
            None => Ok(false),
        }
    }

    pub fn delete(&self, record: &Record) -> Result<bool> {
        let descriptor = record.descriptor();
        let identifier = coerce_identifier(descriptor, record.id().clone())?;
        match self.existing_handle(descriptor, &record.partition_value())? {
            Some(handle) => self.delete_in(&handle, &identifier),
            None => Ok(false),
        }
    }

    fn recorded_indexes(&self, key: &Value) -> Result<Vec<String>> {
        Ok(match self.index_registry.get_value(key)? {
            Some(Value::List(items)) => items
                .into_iter()
                .filter_map(|item| match item {
                    Value::Text(name) => Some(name),
                    _ => None,
                })
                .collect(),
            _ => Vec::new(),
        })
    }

    fn detect_index_changes(&self) -> Result<()> {
        let mut type_names: Vec<&str> = self.schema.type_names().collect();
        type_names.sort_unstable();

        for type_name in type_names {
            let descriptor = self.descriptor(type_name)?;
            let key = Value::Text(type_name.to_string());
            let recorded = self.recorded_indexes(&key)?;
            let declared = descriptor.indexes();

            let added: Vec<&String> = declared.iter().filter(|a| !recorded.contains(a)).collect();
            if !added.is_empty() {
                let mut partitions = Vec::new();
                if self.has_stored_data(descriptor.file_name(), DEFAULT_PARTITION) {
                    partitions.push(DEFAULT_PARTITION);
                }
                if descriptor.partition().is_some() {
                    partitions.extend(
                        self.partitions
                            .partitions(descriptor.file_name())?
                            .into_iter()
                            .map(|(partition, _)| partition),
                    );
                }

                for partition in partitions {
                    let handle = self.handle(type_name, partition)?;
                    for attribute in &added {
                        let Some(index) = handle.index(attribute.as_str()) else {
                            continue;
                        };
                        info!(entity = type_name, attribute = %attribute, partition, "new index declared");
                        if index.rebuild(handle.records()).is_err() {
                            debug!(entity = type_name, attribute = %attribute, partition, "index left stale");
                        }
                    }
                }
            }

            if recorded.as_slice() != declared {
                let list = declared.iter().map(|a| Value::Text(a.clone())).collect();
                self.index_registry.put_value(&key, &Value::List(list))?;
            }
        }
        Ok(())
    }

    /// Rebuilds index `attribute` of `type_name` in every partition.
    pub fn rebuild_index(&self, type_name: &str, attribute: &str) -> Result<()> {
        let descriptor = self.descriptor(type_name)?;
        if !descriptor.is_indexed(attribute) {
            return Err(EntityError::AttributeMissing {
                type_name: type_name.to_string(),
                attribute: attribute.to_string(),
            }
            .into());
        }
        for handle in self.handles_for(&descriptor, &PartitionSelection::All)? {
            if let Some(index) = handle.index(attribute) {
                index.rebuild(handle.records())?;
            }
        }
        Ok(())
    }

    /// Commits every open data file and syncs the journal.
    pub fn commit(&self) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        self.commit_files()
    }

    fn commit_files(&self) -> Result<()> {
        let files: Vec<Arc<DataFile>> = self.data_files.read().values().cloned().collect();
        for file in files {
            file.commit()?;
        }
        self.system.commit()?;
        if let Some(journal) = &self.journal {
            journal.sync()?;
        }
        Ok(())
    }

    /// Stops the flush thread, commits and closes every data file. Closing
    /// twice is a no-op.
    pub fn close(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        if let Some(worker) = self.flusher.lock().take() {
            worker.stop();
        }

        let result = self.commit_files();
        self.handles.write().clear();
        let files: Vec<Arc<DataFile>> = self.data_files.write().drain().map(|(_, file)| file).collect();
        for file in files {
            file.close()?;
        }
        self.system.close()?;
        result?;

        info!(location = ?self.location, "closed database");
        Ok(())
    }
}

impl Drop for SchemaContext {
    fn drop(&mut self) {
        if let Err(err) = self.close() {
            warn!(error = %err, "failed to close database");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexStatus;
    use crate::schema::{AttributeDescriptor, IdGenerator, RelationshipDescriptor};
    use crate::types::AttributeType;
    use tempfile::tempdir;

    fn person(indexes: &[&str]) -> EntityDescriptor {
        let mut builder = EntityDescriptor::builder("Person")
            .identifier("id", AttributeType::Long, IdGenerator::Sequence)
            .attribute(AttributeDescriptor::new("name", AttributeType::Text))
            .attribute(AttributeDescriptor::new("region", AttributeType::Text))
            .partition("region");
        for index in indexes {
            builder = builder.index(*index);
        }
        builder.build().unwrap()
    }

    fn options(dir: &Path, schema: Schema) -> ContextOptions {
        ContextOptions {
            location: Some(dir.to_path_buf()),
            schema,
            ..ContextOptions::default()
        }
    }

    fn save(context: &SchemaContext, name: &str, region: Option<&str>) -> Record {
        let descriptor = context.descriptor("Person").unwrap();
        let mut record = Record::new(descriptor);
        record.set("name", name).unwrap();
        record.set("region", region).unwrap();
        context.save_from(None, record).unwrap()
    }

    #[test]
    fn partitioned_records_land_in_their_own_files() {
        let dir = tempdir().unwrap();
        let context = SchemaContext::open(options(dir.path(), Schema::new().register(person(&[])))).unwrap();

        let eu = save(&context, "Ann", Some("eu"));
        save(&context, "Bob", None);

        assert!(dir.path().join("Person.dat").exists());
        assert!(dir.path().join("Person_1.dat").exists());
        assert_eq!(context.find(&eu).unwrap().get("name"), Some(&Value::Text("Ann".into())));
        assert_eq!(
            context.find_by_id("Person", eu.id().clone()).unwrap().get("region"),
            Some(&Value::Text("eu".into()))
        );
        context.close().unwrap();
    }

    #[test]
    fn moving_partition_removes_old_copy() {
        let context = SchemaContext::open(ContextOptions {
            schema: Schema::new().register(person(&[])),
            ..ContextOptions::default()
        })
        .unwrap();

        let saved = save(&context, "Ann", Some("eu"));
        let source = context.existing_handle(saved.descriptor(), &saved.partition_value()).unwrap().unwrap();
        let moved = saved.with("region", "us").unwrap();
        context.save_from(Some(&source), moved.clone()).unwrap();

        assert!(!source.records().exists(moved.id()).unwrap());
        assert!(context.exists(&moved).unwrap());
    }

    #[test]
    fn declared_index_is_built_on_reopen() {
        let dir = tempdir().unwrap();
        {
            let context = SchemaContext::open(options(dir.path(), Schema::new().register(person(&[])))).unwrap();
            save(&context, "Ann", None);
            save(&context, "Bob", Some("eu"));
            context.close().unwrap();
        }

        let context = SchemaContext::open(options(dir.path(), Schema::new().register(person(&["name"])))).unwrap();
        for handle in context
            .handles_for(&context.descriptor("Person").unwrap(), &PartitionSelection::All)
            .unwrap()
        {
            let index = handle.index("name").unwrap();
            assert_eq!(index.status(), IndexStatus::Ready);
            assert_eq!(index.find_all_values().unwrap().len(), 1);
        }
    }

    #[test]
    fn inverse_relationship_follows_both_sides() {
        let team = EntityDescriptor::builder("Team")
            .identifier("id", AttributeType::Long, IdGenerator::None)
            .relationship(RelationshipDescriptor::to_many("members", "Player").inverse("team"))
            .build()
            .unwrap();
        let player = EntityDescriptor::builder("Player")
            .identifier("id", AttributeType::Long, IdGenerator::None)
            .relationship(RelationshipDescriptor::to_one("team", "Team").inverse("members"))
            .build()
            .unwrap();
        let context = SchemaContext::open(ContextOptions {
            schema: Schema::new().register(team).register(player),
            ..ContextOptions::default()
        })
        .unwrap();

        let mut p = Record::new(context.descriptor("Player").unwrap());
        p.set("id", 7i64).unwrap();
        context.save_from(None, p).unwrap();

        let mut t = Record::new(context.descriptor("Team").unwrap());
        t.set("id", 1i64).unwrap();
        t.relate("members", 7i64).unwrap();
        let t = context.save_from(None, t).unwrap();

        let found = context.find_by_id("Player", Value::Long(7)).unwrap();
        assert_eq!(found.related("team").unwrap(), &[RelatedRef::new(Value::Long(1), Value::Null)]);

        context.delete(&t).unwrap();
        let found = context.find_by_id("Player", Value::Long(7)).unwrap();
        assert!(found.related("team").unwrap().is_empty());
    }

    #[test]
    fn closed_context_rejects_operations() {
        let context = SchemaContext::open(ContextOptions {
            schema: Schema::new().register(person(&[])),
            ..ContextOptions::default()
        })
        .unwrap();
        context.close().unwrap();
        context.close().unwrap();
        assert!(context.handle("Person", 0).is_err());
    }
}
