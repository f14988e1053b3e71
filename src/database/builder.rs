//! # Database Builder
//!
//! Fluent configuration for opening a [`Database`].
//!
//! ## Configuration Options
//!
//! | Option                | Default                  | Description                              |
//! |-----------------------|--------------------------|------------------------------------------|
//! | store_kind            | `File`                   | Positional I/O, memory map or heap       |
//! | flush_interval        | 10 s (on-disk only)      | Period of the background commit          |
//! | journaling            | false                    | Append every save/delete to `wal/`       |
//! | journal_sync          | false                    | Sync the journal after every append      |
//! | journal_max_file_size | 20 MiB                   | Rotation threshold of journal files      |
//!
//! ```ignore
//! let db = Database::builder()
//!     .path("./people")
//!     .entity(person)
//!     .journaling(true)
//!     .open()?;
//!
//! let scratch = Database::builder().in_memory().schema(schema).open()?;
//! ```

use std::path::Path;
use std::time::Duration;

use eyre::{bail, Result};

use super::Database;
use crate::config::DEFAULT_FLUSH_INTERVAL;
use crate::context::{ContextOptions, SchemaContext};
use crate::schema::{EntityDescriptor, Schema};
use crate::storage::StoreKind;

#[derive(Debug, Clone)]
pub struct DatabaseBuilder {
    options: ContextOptions,
    flush: Option<Duration>,
}

impl Default for DatabaseBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DatabaseBuilder {
    pub fn new() -> Self {
        Self {
            options: ContextOptions::default(),
            flush: Some(DEFAULT_FLUSH_INTERVAL),
        }
    }

    /// Directory holding the data files; created if missing.
    pub fn path<P: AsRef<Path>>(mut self, path: P) -> Self {
        self.options.location = Some(path.as_ref().to_path_buf());
        self
    }

    /// Keeps every data file on the heap. Nothing survives the last handle.
    pub fn in_memory(mut self) -> Self {
        self.options.store_kind = StoreKind::Memory;
        self.options.location = None;
        self
    }

    pub fn store_kind(mut self, kind: StoreKind) -> Self {
        self.options.store_kind = kind;
        self
    }

    pub fn schema(mut self, schema: Schema) -> Self {
        self.options.schema = schema;
        self
    }

    /// Adds one entity type to the schema.
    pub fn entity(mut self, descriptor: EntityDescriptor) -> Self {
        self.options.schema = self.options.schema.register(descriptor);
        self
    }

    pub fn flush_interval(mut self, interval: Duration) -> Self {
        self.flush = Some(interval);
        self
    }

    /// Disables the background commit; data reaches disk on `commit` and
    /// `close` only.
    pub fn manual_flush(mut self) -> Self {
        self.flush = None;
        self
    }

    pub fn journaling(mut self, enabled: bool) -> Self {
        self.options.journaling = enabled;
        self
    }

    pub fn journal_sync(mut self, enabled: bool) -> Self {
        self.options.journal_sync = enabled;
        self
    }

    pub fn journal_max_file_size(mut self, bytes: u64) -> Self {
        self.options.journal_max_file_size = bytes;
        self
    }

    pub fn open(self) -> Result<Database> {
        let mut options = self.options;
        match (options.store_kind, &options.location) {
            (StoreKind::Memory, _) => options.flush_interval = None,
            (_, None) => bail!("no database path set; call path() or in_memory()"),
            (_, Some(_)) => options.flush_interval = self.flush,
        }
        if options.journaling && options.store_kind == StoreKind::Memory {
            bail!("journaling requires an on-disk database");
        }

        Ok(Database {
            shared: SchemaContext::open(options)?,
        })
    }
}
