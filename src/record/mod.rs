//! # Records
//!
//! - [`entity`]: `Record`, the schema-checked structured record
//! - [`controller`]: `RecordController`, identifier to reference translation
//!   and physical save/delete for one type in one partition

pub mod controller;
pub mod entity;

pub use controller::RecordController;
pub use entity::Record;
