//! # Quarry Configuration Module
//!
//! Compile-time constants shared by the storage, map, journal and context
//! layers. Runtime settings (location, store kind, flush interval, journaling)
//! are carried by [`crate::database::DatabaseBuilder`] instead.
//!
//! ## Module Organization
//!
//! - [`constants`]: numeric and naming constants with dependency documentation

pub mod constants;
pub use constants::*;
