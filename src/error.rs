//! # Entity Errors
//!
//! Caller-visible failure kinds. Engine code returns `eyre::Result` and raises
//! these through `bail!`/`.into()`; callers classify a failure with
//! `report.downcast_ref::<EntityError>()`.
//!
//! ## Taxonomy
//!
//! | Group          | Variants                                                    |
//! |----------------|-------------------------------------------------------------|
//! | Schema         | `UnknownEntityType`                                         |
//! | Identifier     | `InvalidIdentifier`, `IdentifierRequired`                   |
//! | Attribute      | `AttributeNonNull`, `AttributeSize`, `AttributeTypeMismatch`|
//! | Update         | `AttributeMissing`, `AttributeUpdateIdentifier`             |
//! | Lookup         | `NoResults`                                                 |
//! | Relationship   | `InvalidRelationship`                                       |
//! | Journal        | `Transaction`                                               |
//!
//! Validation failures are raised before any physical write, so a failed save
//! leaves no partial state behind.

use std::fmt;

use crate::types::AttributeType;

#[derive(Debug, Clone, PartialEq)]
pub enum EntityError {
    UnknownEntityType {
        type_name: String,
    },
    InvalidIdentifier {
        type_name: String,
        reason: String,
    },
    IdentifierRequired {
        type_name: String,
        attribute: String,
    },
    AttributeNonNull {
        type_name: String,
        attribute: String,
    },
    AttributeSize {
        type_name: String,
        attribute: String,
        max: usize,
        actual: usize,
    },
    AttributeTypeMismatch {
        type_name: String,
        attribute: String,
        expected: AttributeType,
        actual: &'static str,
    },
    AttributeMissing {
        type_name: String,
        attribute: String,
    },
    AttributeUpdateIdentifier {
        type_name: String,
        attribute: String,
    },
    NoResults {
        type_name: String,
    },
    InvalidRelationship {
        type_name: String,
        relationship: String,
        reason: String,
    },
    Transaction {
        reason: String,
    },
}

impl EntityError {
    /// Short stable name of the variant, handy for assertions and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownEntityType { .. } => "unknown_entity_type",
            Self::InvalidIdentifier { .. } => "invalid_identifier",
            Self::IdentifierRequired { .. } => "identifier_required",
            Self::AttributeNonNull { .. } => "attribute_non_null",
            Self::AttributeSize { .. } => "attribute_size",
            Self::AttributeTypeMismatch { .. } => "attribute_type_mismatch",
            Self::AttributeMissing { .. } => "attribute_missing",
            Self::AttributeUpdateIdentifier { .. } => "attribute_update_identifier",
            Self::NoResults { .. } => "no_results",
            Self::InvalidRelationship { .. } => "invalid_relationship",
            Self::Transaction { .. } => "transaction",
        }
    }
}

impl fmt::Display for EntityError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UnknownEntityType { type_name } => {
                write!(f, "'{}' is not a registered entity type", type_name)
            }
            Self::InvalidIdentifier { type_name, reason } => {
                write!(f, "invalid identifier on '{}': {}", type_name, reason)
            }
            Self::IdentifierRequired {
                type_name,
                attribute,
            } => write!(
                f,
                "identifier '{}' of '{}' is required but was not set",
                attribute, type_name
            ),
            Self::AttributeNonNull {
                type_name,
                attribute,
            } => write!(
                f,
                "attribute '{}.{}' is not nullable",
                type_name, attribute
            ),
            Self::AttributeSize {
                type_name,
                attribute,
                max,
                actual,
            } => write!(
                f,
                "attribute '{}.{}' exceeds max size {} (got {})",
                type_name, attribute, max, actual
            ),
            Self::AttributeTypeMismatch {
                type_name,
                attribute,
                expected,
                actual,
            } => write!(
                f,
                "attribute '{}.{}' expects {} but got {}",
                type_name, attribute, expected, actual
            ),
            Self::AttributeMissing {
                type_name,
                attribute,
            } => write!(f, "'{}' has no attribute '{}'", type_name, attribute),
            Self::AttributeUpdateIdentifier {
                type_name,
                attribute,
            } => write!(
                f,
                "identifier '{}.{}' cannot be modified by an update",
                type_name, attribute
            ),
            Self::NoResults { type_name } => write!(f, "no results for '{}'", type_name),
            Self::InvalidRelationship {
                type_name,
                relationship,
                reason,
            } => write!(
                f,
                "invalid relationship '{}.{}': {}",
                type_name, relationship, reason
            ),
            Self::Transaction { reason } => write!(f, "transaction log failure: {}", reason),
        }
    }
}

impl std::error::Error for EntityError {}

/// Returns the `EntityError` carried by a report, if any.
pub fn entity_error(report: &eyre::Report) -> Option<&EntityError> {
    report.downcast_ref::<EntityError>()
}
