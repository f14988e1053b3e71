//! # Records
//!
//! A [`Record`] is one entity instance checked against its descriptor: values
//! are positional (identifier first, then attributes in declaration order),
//! every `set` coerces into the declared type, and names that the descriptor
//! does not declare are rejected with `EntityError::AttributeMissing`.
//!
//! Relationship targets travel with the record. A relationship that was never
//! set on a record is left untouched when the record is saved; an explicitly
//! set (possibly empty) list replaces the stored one.
//!
//! ## Encoding
//!
//! Records encode through [`ObjectBuffer::put_record`] as name/value pairs
//! under the serializer code of their type, which keeps single attributes
//! readable without decoding the whole record.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use eyre::Result;

use crate::encoding::{EncodedRecord, ObjectBuffer};
use crate::error::EntityError;
use crate::relationship::RelatedRef;
use crate::schema::validation::coerce;
use crate::schema::EntityDescriptor;
use crate::types::Value;

#[derive(Clone)]
pub struct Record {
    descriptor: Arc<EntityDescriptor>,
    values: Vec<Value>,
    relationships: BTreeMap<String, Vec<RelatedRef>>,
}

impl Record {
    pub fn new(descriptor: Arc<EntityDescriptor>) -> Self {
        let values = vec![Value::Null; descriptor.attributes().len()];
        Self {
            descriptor,
            values,
            relationships: BTreeMap::new(),
        }
    }

    pub fn descriptor(&self) -> &Arc<EntityDescriptor> {
        &self.descriptor
    }

    pub fn type_name(&self) -> &str {
        self.descriptor.type_name()
    }

    fn missing(&self, name: &str) -> eyre::Report {
        EntityError::AttributeMissing {
            type_name: self.type_name().to_string(),
            attribute: name.to_string(),
        }
        .into()
    }

    /// Value of `name`, or `None` if the type declares no such attribute.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.descriptor
            .attribute_position(name)
            .map(|position| &self.values[position])
    }

    pub fn set(&mut self, name: &str, value: impl Into<Value>) -> Result<()> {
        let Some(position) = self.descriptor.attribute_position(name) else {
            return Err(self.missing(name));
        };
        let attribute = &self.descriptor.attributes()[position];
        self.values[position] = coerce(&self.descriptor, attribute, value.into())?;
        Ok(())
    }

    /// Chaining form of [`Record::set`].
    pub fn with(mut self, name: &str, value: impl Into<Value>) -> Result<Self> {
        self.set(name, value)?;
        Ok(self)
    }

    pub fn id(&self) -> &Value {
        &self.values[0]
    }

    pub fn set_id(&mut self, value: impl Into<Value>) -> Result<()> {
        let name = self.descriptor.identifier_name().to_string();
        self.set(&name, value)
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    pub(crate) fn set_at(&mut self, position: usize, value: Value) {
        self.values[position] = value;
    }

    /// Attribute names paired with their values, identifier first.
    pub fn fields(&self) -> impl ExactSizeIterator<Item = (&str, &Value)> {
        self.descriptor
            .attributes()
            .iter()
            .map(|a| a.name())
            .zip(self.values.iter())
    }

    /// Value of the partition attribute; null for unpartitioned types.
    pub fn partition_value(&self) -> Value {
        self.descriptor
            .partition()
            .and_then(|name| self.get(name))
            .cloned()
            .unwrap_or(Value::Null)
    }

    fn check_relationship(&self, name: &str) -> Result<()> {
        if self.descriptor.relationship(name).is_none() {
            return Err(EntityError::InvalidRelationship {
                type_name: self.type_name().to_string(),
                relationship: name.to_string(),
                reason: "relationship is not declared".into(),
            }
            .into());
        }
        Ok(())
    }

    /// Targets of relationship `name`; `None` when the record does not carry
    /// that relationship.
    pub fn related(&self, name: &str) -> Option<&[RelatedRef]> {
        self.relationships.get(name).map(Vec::as_slice)
    }

    /// Adds a target in the default partition of the target type.
    pub fn relate(&mut self, name: &str, identifier: impl Into<Value>) -> Result<()> {
        self.relate_in(name, identifier, Value::Null)
    }

    pub fn relate_in(
        &mut self,
        name: &str,
        identifier: impl Into<Value>,
        partition: impl Into<Value>,
    ) -> Result<()> {
        self.check_relationship(name)?;
        self.relationships
            .entry(name.to_string())
            .or_default()
            .push(RelatedRef::new(identifier.into(), partition.into()));
        Ok(())
    }

    /// Replaces every target of relationship `name`.
    pub fn set_related(&mut self, name: &str, targets: Vec<RelatedRef>) -> Result<()> {
        self.check_relationship(name)?;
        self.relationships.insert(name.to_string(), targets);
        Ok(())
    }

    pub fn relationships(&self) -> &BTreeMap<String, Vec<RelatedRef>> {
        &self.relationships
    }

    pub(crate) fn encode(&self, code: u32) -> Vec<u8> {
        let mut buf = ObjectBuffer::with_capacity(64);
        buf.put_record(code, self.fields());
        buf.into_bytes()
    }

    /// Rebuilds a record from its encoded fields. Fields the descriptor no
    /// longer declares are dropped; declared fields missing from the encoding
    /// stay null.
    pub(crate) fn from_encoded(descriptor: Arc<EntityDescriptor>, encoded: EncodedRecord) -> Self {
        let mut record = Self::new(descriptor);
        for (name, value) in encoded.fields {
            if let Some(position) = record.descriptor.attribute_position(&name) {
                record.values[position] = value;
            }
        }
        record
    }
}

impl PartialEq for Record {
    fn eq(&self, other: &Self) -> bool {
        self.type_name() == other.type_name()
            && self.values == other.values
            && self.relationships == other.relationships
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct(self.type_name());
        for (name, value) in self.fields() {
            s.field(name, value);
        }
        for (name, targets) in &self.relationships {
            s.field(name, targets);
        }
        s.finish()
    }
}
