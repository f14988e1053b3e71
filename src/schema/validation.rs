//! # Validation
//!
//! Checks performed before any physical write. A save validates every
//! attribute of the record in one pass, collects all violations and raises
//! the first one, so the caller sees the earliest declared attribute at
//! fault and no partial record state is ever written.
//!
//! Type compatibility is "same type or lossless widening"; a compatible
//! value is coerced to the declared type so that equal values always encode
//! to equal bytes (identifiers and index keys depend on it).

use eyre::Result;

use super::{AttributeDescriptor, EntityDescriptor, IdGenerator};
use crate::error::EntityError;
use crate::types::{AttributeType, Value};

/// Coerces `value` into the declared type of `attribute`.
pub fn coerce(descriptor: &EntityDescriptor, attribute: &AttributeDescriptor, value: Value) -> Result<Value> {
    match value.widen_to(attribute.attribute_type()) {
        Some(coerced) => Ok(coerced),
        None => Err(EntityError::AttributeTypeMismatch {
            type_name: descriptor.type_name().to_string(),
            attribute: attribute.name().to_string(),
            expected: attribute.attribute_type(),
            actual: value.type_name(),
        }
        .into()),
    }
}

/// Coerces an identifier supplied to a lookup.
pub fn coerce_identifier(descriptor: &EntityDescriptor, identifier: Value) -> Result<Value> {
    coerce(descriptor, descriptor.identifier(), identifier)
}

fn value_size(value: &Value) -> Option<usize> {
    match value {
        Value::Text(s) => Some(s.chars().count()),
        Value::Bytes(b) => Some(b.len()),
        _ => None,
    }
}

fn check_attribute(
    descriptor: &EntityDescriptor,
    attribute: &AttributeDescriptor,
    value: &Value,
) -> Option<EntityError> {
    let type_name = descriptor.type_name().to_string();
    let name = attribute.name().to_string();

    if value.is_null() {
        if !attribute.is_nullable() {
            return Some(EntityError::AttributeNonNull {
                type_name,
                attribute: name,
            });
        }
        return None;
    }

    if value.attribute_type() != Some(attribute.attribute_type()) {
        return Some(EntityError::AttributeTypeMismatch {
            type_name,
            attribute: name,
            expected: attribute.attribute_type(),
            actual: value.type_name(),
        });
    }

    if let (Some(max), Some(actual)) = (attribute.max(), value_size(value)) {
        if actual > max {
            return Some(EntityError::AttributeSize {
                type_name,
                attribute: name,
                max,
                actual,
            });
        }
    }

    None
}

/// True for identifier values the sequence generator should replace.
pub fn is_unset_identifier(value: &Value) -> bool {
    match value {
        Value::Null => true,
        other => other.as_i64() == Some(0) && other.attribute_type().is_some_and(AttributeType::is_integer),
    }
}

/// Validates positional record values. `values[i]` belongs to
/// `descriptor.attributes()[i]`.
pub fn validate_values(descriptor: &EntityDescriptor, values: &[Value]) -> Result<()> {
    let mut errors = Vec::new();

    for (attribute, value) in descriptor.attributes().iter().zip(values) {
        if descriptor.is_identifier(attribute.name()) && value.is_null() {
            if descriptor.generator() == IdGenerator::None {
                errors.push(EntityError::IdentifierRequired {
                    type_name: descriptor.type_name().to_string(),
                    attribute: attribute.name().to_string(),
                });
            }
            continue;
        }
        if let Some(err) = check_attribute(descriptor, attribute, value) {
            errors.push(err);
        }
    }

    match errors.into_iter().next() {
        Some(first) => Err(first.into()),
        None => Ok(()),
    }
}

/// Validates and coerces bulk update instructions.
pub fn validate_updates(
    descriptor: &EntityDescriptor,
    updates: &[(String, Value)],
) -> Result<Vec<(usize, Value)>> {
    let mut coerced = Vec::with_capacity(updates.len());

    for (name, value) in updates {
        let Some(position) = descriptor.attribute_position(name) else {
            return Err(EntityError::AttributeMissing {
                type_name: descriptor.type_name().to_string(),
                attribute: name.clone(),
            }
            .into());
        };
        let attribute = &descriptor.attributes()[position];

        if descriptor.is_identifier(name) {
            return Err(EntityError::AttributeUpdateIdentifier {
                type_name: descriptor.type_name().to_string(),
                attribute: name.clone(),
            }
            .into());
        }

        let value = coerce(descriptor, attribute, value.clone())?;
        if let Some(err) = check_attribute(descriptor, attribute, &value) {
            return Err(err.into());
        }
        coerced.push((position, value));
    }

    Ok(coerced)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::AttributeDescriptor;

    fn person() -> EntityDescriptor {
        EntityDescriptor::builder("Person")
            .identifier("id", AttributeType::Long, IdGenerator::None)
            .attribute(AttributeDescriptor::new("name", AttributeType::Text).not_null().max_size(5))
            .attribute(AttributeDescriptor::new("age", AttributeType::Int))
            .build()
            .unwrap()
    }

    fn kind(result: Result<impl std::fmt::Debug>) -> &'static str {
        result.unwrap_err().downcast_ref::<EntityError>().unwrap().kind()
    }

    #[test]
    fn valid_values_pass() {
        let d = person();
        validate_values(&d, &[Value::Long(1), Value::Text("Ada".into()), Value::Null]).unwrap();
    }

    #[test]
    fn first_violation_is_raised() {
        let d = person();
        let values = [Value::Null, Value::Null, Value::Text("x".into())];
        assert_eq!(kind(validate_values(&d, &values)), "identifier_required");

        let values = [Value::Long(1), Value::Text("too long".into()), Value::Text("x".into())];
        assert_eq!(kind(validate_values(&d, &values)), "attribute_size");
    }

    #[test]
    fn null_into_non_nullable() {
        let d = person();
        let values = [Value::Long(1), Value::Null, Value::Null];
        assert_eq!(kind(validate_values(&d, &values)), "attribute_non_null");
    }

    #[test]
    fn coercion_widens_but_never_narrows() {
        let d = person();
        let id = coerce_identifier(&d, Value::Int(7)).unwrap();
        assert_eq!(id, Value::Long(7));
        assert_eq!(kind(coerce_identifier(&d, Value::Text("7".into()))), "attribute_type_mismatch");

        let age = d.attribute("age").unwrap();
        assert_eq!(kind(coerce(&d, age, Value::Long(3))), "attribute_type_mismatch");
    }

    #[test]
    fn update_instructions() {
        let d = person();
        assert_eq!(
            kind(validate_updates(&d, &[("ghost".into(), Value::Int(1))])),
            "attribute_missing"
        );
        assert_eq!(
            kind(validate_updates(&d, &[("id".into(), Value::Long(2))])),
            "attribute_update_identifier"
        );
        assert_eq!(
            kind(validate_updates(&d, &[("name".into(), Value::Null)])),
            "attribute_non_null"
        );
        assert_eq!(
            kind(validate_updates(&d, &[("name".into(), Value::Text("abcdef".into()))])),
            "attribute_size"
        );
        assert_eq!(
            kind(validate_updates(&d, &[("age".into(), Value::Text("x".into()))])),
            "attribute_type_mismatch"
        );

        let ok = validate_updates(&d, &[("age".into(), Value::Short(4))]).unwrap();
        assert_eq!(ok, vec![(2, Value::Int(4))]);
    }

    #[test]
    fn zero_integer_identifier_is_unset() {
        assert!(is_unset_identifier(&Value::Null));
        assert!(is_unset_identifier(&Value::Long(0)));
        assert!(!is_unset_identifier(&Value::Long(3)));
        assert!(!is_unset_identifier(&Value::Text("0".into())));
    }
}
