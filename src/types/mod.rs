//! # Type System
//!
//! Declared attribute types and the dynamic `Value` used for attribute
//! contents, criteria operands and index keys.
//!
//! - [`AttributeType`]: declared type of an attribute, also the codec tag
//! - [`Value`]: runtime attribute value with widening and comparison rules

mod attribute_type;
mod value;

pub use attribute_type::AttributeType;
pub use value::Value;
