//! # Quarry - Embedded Object-Persistence Engine
//!
//! Quarry stores typed records in append-only data files indexed by
//! persistent hash maps, with secondary indexes, relationships, value-based
//! partitions and a criteria query engine on top.
//!
//! ## Quick Start
//!
//! ```ignore
//! use quarry::{AttributeDescriptor, AttributeType, Database, EntityDescriptor, IdGenerator};
//! use quarry::{Operator, Query, QueryCriteria};
//!
//! let person = EntityDescriptor::builder("Person")
//!     .identifier("id", AttributeType::Long, IdGenerator::Sequence)
//!     .attribute(AttributeDescriptor::new("name", AttributeType::Text))
//!     .attribute(AttributeDescriptor::new("age", AttributeType::Int))
//!     .index("age")
//!     .build()?;
//!
//! let db = Database::builder().path("./people").entity(person).open()?;
//!
//! let mut ann = db.new_record("Person")?;
//! ann.set("name", "Ann")?;
//! ann.set("age", 41)?;
//! db.save(ann)?;
//!
//! let over_forty = db.execute_query(
//!     &Query::new("Person").criteria(QueryCriteria::new("age", Operator::GreaterThan, 40)),
//! )?;
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │            Public API (Database)            │
//! ├─────────────────────────────────────────────┤
//! │   Query engine (criteria, scanners, sort)   │
//! ├─────────────────────────────────────────────┤
//! │  Schema context (partitions, flush, WAL)    │
//! ├──────────────┬───────────────┬──────────────┤
//! │   Records    │    Indexes    │ Relationships│
//! ├──────────────┴───────────────┴──────────────┤
//! │     Persistent maps (sharded key locks)     │
//! ├─────────────────────────────────────────────┤
//! │  Data files: store + catalog + serializers  │
//! ├─────────────────────────────────────────────┤
//! │   Store (file / mmap / memory) + reclaim    │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Module Overview
//!
//! - [`storage`]: stores, reclaimed space, transaction log
//! - [`encoding`]: value and record codec, serializer codes
//! - [`map`]: persistent hash maps and data files
//! - [`schema`]: entity descriptors and validation
//! - [`record`]: records and the record controller
//! - [`index`], [`relationship`], [`partition`]: secondary structures
//! - [`query`]: criteria, scanners and the partition query controller
//! - [`context`]: the runtime owner of a database's files
//! - [`database`]: the public API

#[macro_use]
mod macros;

pub mod config;
pub mod context;
pub mod database;
pub mod encoding;
pub mod error;
pub mod index;
pub mod map;
pub mod partition;
pub mod query;
pub mod record;
pub mod relationship;
pub mod schema;
pub mod storage;
pub mod types;

pub use database::{Database, DatabaseBuilder};
pub use error::EntityError;
pub use index::IndexStatus;
pub use partition::RecordRef;
pub use query::{AttributeUpdate, Operator, Projection, Query, QueryCriteria, QueryOrder};
pub use record::Record;
pub use relationship::RelatedRef;
pub use schema::{
    AttributeDescriptor, EntityDescriptor, IdGenerator, RelationshipDescriptor, RelationshipKind, Schema,
};
pub use storage::StoreKind;
pub use types::{AttributeType, Value};
