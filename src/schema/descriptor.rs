//! # Entity Descriptors
//!
//! Immutable, compiled metadata for one entity type: its identifier, ordered
//! attributes, declared indexes and relationships, optional partition
//! attribute and the data file it lives in. The engine only ever reads
//! descriptors; they are built once through [`EntityDescriptorBuilder`].
//!
//! ```ignore
//! let person = EntityDescriptor::builder("Person")
//!     .identifier("id", AttributeType::Long, IdGenerator::Sequence)
//!     .attribute(AttributeDescriptor::new("name", AttributeType::Text).max_size(64))
//!     .attribute(AttributeDescriptor::new("age", AttributeType::Int))
//!     .index("age")
//!     .build()?;
//! ```
//!
//! ## Identifier Rules
//!
//! - Every entity declares exactly one identifier
//! - Identifiers are integers, text, chars or dates
//! - `IdGenerator::Sequence` requires an integer identifier
//!
//! Violations fail `build()` with `EntityError::InvalidIdentifier`.

use eyre::{bail, Result};

use crate::config::RELATIONSHIP_SEPARATOR;
use crate::error::EntityError;
use crate::types::AttributeType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IdGenerator {
    /// The caller assigns identifiers.
    #[default]
    None,
    /// The record controller assigns the next sequence value when unset.
    Sequence,
}

#[derive(Debug, Clone, PartialEq)]
pub struct AttributeDescriptor {
    name: String,
    attribute_type: AttributeType,
    nullable: bool,
    max_size: Option<usize>,
}

impl AttributeDescriptor {
    pub fn new(name: impl Into<String>, attribute_type: AttributeType) -> Self {
        Self {
            name: name.into(),
            attribute_type,
            nullable: true,
            max_size: None,
        }
    }

    pub fn not_null(mut self) -> Self {
        self.nullable = false;
        self
    }

    /// Maximum length in characters for text, in bytes for byte arrays.
    pub fn max_size(mut self, max_size: usize) -> Self {
        self.max_size = Some(max_size);
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn attribute_type(&self) -> AttributeType {
        self.attribute_type
    }

    pub fn is_nullable(&self) -> bool {
        self.nullable
    }

    pub fn max(&self) -> Option<usize> {
        self.max_size
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelationshipKind {
    ToOne,
    ToMany,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RelationshipDescriptor {
    name: String,
    target_type: String,
    kind: RelationshipKind,
    inverse: Option<String>,
}

impl RelationshipDescriptor {
    pub fn new(name: impl Into<String>, target_type: impl Into<String>, kind: RelationshipKind) -> Self {
        Self {
            name: name.into(),
            target_type: target_type.into(),
            kind,
            inverse: None,
        }
    }

    pub fn to_one(name: impl Into<String>, target_type: impl Into<String>) -> Self {
        Self::new(name, target_type, RelationshipKind::ToOne)
    }

    pub fn to_many(name: impl Into<String>, target_type: impl Into<String>) -> Self {
        Self::new(name, target_type, RelationshipKind::ToMany)
    }

    /// Names the relationship on the target type that mirrors this one.
    pub fn inverse(mut self, inverse: impl Into<String>) -> Self {
        self.inverse = Some(inverse.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target_type(&self) -> &str {
        &self.target_type
    }

    pub fn kind(&self) -> RelationshipKind {
        self.kind
    }

    pub fn inverse_name(&self) -> Option<&str> {
        self.inverse.as_deref()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct EntityDescriptor {
    type_name: String,
    file_name: String,
    identifier: String,
    generator: IdGenerator,
    attributes: Vec<AttributeDescriptor>,
    indexes: Vec<String>,
    relationships: Vec<RelationshipDescriptor>,
    partition: Option<String>,
}

impl EntityDescriptor {
    pub fn builder(type_name: impl Into<String>) -> EntityDescriptorBuilder {
        EntityDescriptorBuilder::new(type_name)
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    pub fn file_name(&self) -> &str {
        &self.file_name
    }

    /// All attributes, identifier first.
    pub fn attributes(&self) -> &[AttributeDescriptor] {
        &self.attributes
    }

    pub fn identifier(&self) -> &AttributeDescriptor {
        &self.attributes[0]
    }

    pub fn identifier_name(&self) -> &str {
        &self.identifier
    }

    pub fn generator(&self) -> IdGenerator {
        self.generator
    }

    pub fn indexes(&self) -> &[String] {
        &self.indexes
    }

    pub fn relationships(&self) -> &[RelationshipDescriptor] {
        &self.relationships
    }

    pub fn partition(&self) -> Option<&str> {
        self.partition.as_deref()
    }

    pub fn attribute(&self, name: &str) -> Option<&AttributeDescriptor> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn attribute_position(&self, name: &str) -> Option<usize> {
        self.attributes.iter().position(|a| a.name == name)
    }

    pub fn relationship(&self, name: &str) -> Option<&RelationshipDescriptor> {
        self.relationships.iter().find(|r| r.name == name)
    }

    pub fn is_indexed(&self, attribute: &str) -> bool {
        self.indexes.iter().any(|i| i == attribute)
    }

    pub fn is_identifier(&self, attribute: &str) -> bool {
        self.identifier == attribute
    }

    /// Name of the record map inside the data file.
    pub fn records_map(&self) -> String {
        self.type_name.clone()
    }

    pub fn sequence_map(&self) -> String {
        format!("{}__sequence", self.type_name)
    }
}

#[derive(Debug)]
pub struct EntityDescriptorBuilder {
    type_name: String,
    file_name: Option<String>,
    identifier: Option<(String, AttributeType, IdGenerator)>,
    attributes: Vec<AttributeDescriptor>,
    indexes: Vec<String>,
    relationships: Vec<RelationshipDescriptor>,
    partition: Option<String>,
}

impl EntityDescriptorBuilder {
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            file_name: None,
            identifier: None,
            attributes: Vec::new(),
            indexes: Vec::new(),
            relationships: Vec::new(),
            partition: None,
        }
    }

    /// Data file name; defaults to the type name.
    pub fn file_name(mut self, file_name: impl Into<String>) -> Self {
        self.file_name = Some(file_name.into());
        self
    }

    pub fn identifier(
        mut self,
        name: impl Into<String>,
        attribute_type: AttributeType,
        generator: IdGenerator,
    ) -> Self {
        self.identifier = Some((name.into(), attribute_type, generator));
        self
    }

    pub fn attribute(mut self, attribute: AttributeDescriptor) -> Self {
        self.attributes.push(attribute);
        self
    }

    pub fn index(mut self, attribute: impl Into<String>) -> Self {
        self.indexes.push(attribute.into());
        self
    }

    pub fn relationship(mut self, relationship: RelationshipDescriptor) -> Self {
        self.relationships.push(relationship);
        self
    }

    pub fn partition(mut self, attribute: impl Into<String>) -> Self {
        self.partition = Some(attribute.into());
        self
    }

    fn invalid_identifier(&self, reason: String) -> eyre::Report {
        EntityError::InvalidIdentifier {
            type_name: self.type_name.clone(),
            reason,
        }
        .into()
    }

    pub fn build(self) -> Result<EntityDescriptor> {
        let Some((id_name, id_type, generator)) = self.identifier.clone() else {
            return Err(self.invalid_identifier("no identifier declared".into()));
        };

        let supported = id_type.is_integer()
            || matches!(id_type, AttributeType::Text | AttributeType::Char | AttributeType::Date);
        if !supported {
            return Err(self.invalid_identifier(format!("{} cannot be an identifier type", id_type)));
        }

        if generator == IdGenerator::Sequence && !id_type.is_integer() {
            return Err(self.invalid_identifier(format!(
                "sequence generator requires an integer identifier, '{}' is {}",
                id_name, id_type
            )));
        }

        let mut attributes = Vec::with_capacity(self.attributes.len() + 1);
        let mut identifier = AttributeDescriptor::new(id_name.clone(), id_type);
        if generator == IdGenerator::None {
            identifier = identifier.not_null();
        }
        attributes.push(identifier);

        for attribute in self.attributes {
            if attribute.name.is_empty() || attribute.name.contains(RELATIONSHIP_SEPARATOR) {
                bail!(
                    "'{}': attribute name '{}' must be non-empty and must not contain '{}'",
                    self.type_name,
                    attribute.name,
                    RELATIONSHIP_SEPARATOR
                );
            }
            if attributes.iter().any(|a: &AttributeDescriptor| a.name == attribute.name) {
                bail!("'{}' declares attribute '{}' twice", self.type_name, attribute.name);
            }
            attributes.push(attribute);
        }

        for index in &self.indexes {
            if !attributes.iter().any(|a| &a.name == index) {
                bail!("'{}' indexes unknown attribute '{}'", self.type_name, index);
            }
        }

        if let Some(partition) = &self.partition {
            if partition == &id_name || !attributes.iter().any(|a| &a.name == partition) {
                bail!(
                    "'{}' partitions on '{}', which is not a non-identifier attribute",
                    self.type_name,
                    partition
                );
            }
        }

        for (i, relationship) in self.relationships.iter().enumerate() {
            if attributes.iter().any(|a| a.name == relationship.name)
                || self.relationships[..i].iter().any(|r| r.name == relationship.name)
            {
                bail!(
                    "'{}' declares relationship '{}' twice or over an attribute",
                    self.type_name,
                    relationship.name
                );
            }
        }

        let mut indexes = self.indexes;
        indexes.dedup();

        Ok(EntityDescriptor {
            file_name: self.file_name.unwrap_or_else(|| self.type_name.clone()),
            type_name: self.type_name,
            identifier: id_name,
            generator,
            attributes,
            indexes,
            relationships: self.relationships,
            partition: self.partition,
        })
    }
}
