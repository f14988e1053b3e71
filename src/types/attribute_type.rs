//! # Attribute Types
//!
//! `AttributeType` is the declared type of an entity attribute. It doubles as
//! the type tag of the serialization buffer: every encoded value starts with
//! the discriminant of its type, and `Null` uses the reserved tag 0.
//!
//! ## Widening
//!
//! A runtime value is compatible with its declared type when it has exactly
//! that type or widens losslessly into it:
//!
//! ```text
//! Byte ─> Short ─> Int ─> Long
//!                   │
//!                   └───> Double <─ Float
//! ```
//!
//! Widening is transitive (`Byte` widens into `Long` and `Double`). Narrowing
//! is never implicit.

use std::fmt;

/// Declared type of an attribute.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AttributeType {
    Bool = 1,
    Byte = 2,
    Short = 3,
    Int = 4,
    Long = 5,
    Float = 6,
    Double = 7,
    Char = 8,
    Text = 9,
    Bytes = 10,
    Date = 11,
    List = 12,
}

impl AttributeType {
    pub fn from_tag(tag: u8) -> Option<Self> {
        Some(match tag {
            1 => Self::Bool,
            2 => Self::Byte,
            3 => Self::Short,
            4 => Self::Int,
            5 => Self::Long,
            6 => Self::Float,
            7 => Self::Double,
            8 => Self::Char,
            9 => Self::Text,
            10 => Self::Bytes,
            11 => Self::Date,
            12 => Self::List,
            _ => return None,
        })
    }

    pub fn tag(self) -> u8 {
        self as u8
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::Byte => "byte",
            Self::Short => "short",
            Self::Int => "int",
            Self::Long => "long",
            Self::Float => "float",
            Self::Double => "double",
            Self::Char => "char",
            Self::Text => "text",
            Self::Bytes => "bytes",
            Self::Date => "date",
            Self::List => "list",
        }
    }

    pub fn is_integer(self) -> bool {
        matches!(self, Self::Byte | Self::Short | Self::Int | Self::Long)
    }

    pub fn is_numeric(self) -> bool {
        self.is_integer() || matches!(self, Self::Float | Self::Double)
    }

    /// Returns true if a value of type `self` can be stored in an attribute
    /// declared as `target` without loss.
    pub fn widens_to(self, target: AttributeType) -> bool {
        use AttributeType::*;

        if self == target {
            return true;
        }

        matches!(
            (self, target),
            (Byte, Short | Int | Long | Double)
                | (Short, Int | Long | Double)
                | (Int, Long | Double)
                | (Float, Double)
        )
    }
}

impl fmt::Display for AttributeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tag_roundtrips_for_every_type() {
        for tag in 1..=12u8 {
            let ty = AttributeType::from_tag(tag).unwrap();
            assert_eq!(ty.tag(), tag);
        }
        assert_eq!(AttributeType::from_tag(0), None);
        assert_eq!(AttributeType::from_tag(13), None);
    }

    #[test]
    fn integers_widen_upwards_only() {
        assert!(AttributeType::Byte.widens_to(AttributeType::Long));
        assert!(AttributeType::Int.widens_to(AttributeType::Long));
        assert!(AttributeType::Int.widens_to(AttributeType::Double));
        assert!(!AttributeType::Long.widens_to(AttributeType::Int));
        assert!(!AttributeType::Long.widens_to(AttributeType::Double));
    }

    #[test]
    fn float_widens_to_double_but_not_back() {
        assert!(AttributeType::Float.widens_to(AttributeType::Double));
        assert!(!AttributeType::Double.widens_to(AttributeType::Float));
    }

    #[test]
    fn text_never_widens_to_numeric() {
        assert!(!AttributeType::Text.widens_to(AttributeType::Long));
        assert!(!AttributeType::Char.widens_to(AttributeType::Text));
    }
}
