//! # Schema
//!
//! The compiled schema the engine runs against. Entity shapes are declared up
//! front as [`EntityDescriptor`] values and registered in a [`Schema`]; the
//! engine never inspects types at runtime.
//!
//! ```text
//! Schema
//! ├── EntityDescriptor "Person"   (file "Person")
//! │   ├── id: Long (sequence)
//! │   ├── name: Text(64), age: Int        index(age)
//! │   └── addresses -> Address  (to many, inverse "resident")
//! └── EntityDescriptor "Address"  (file "Address")
//!     └── resident -> Person  (to one, inverse "addresses")
//! ```
//!
//! ## Relationship Resolution
//!
//! [`Schema::validate`] runs when a database opens. Every relationship must
//! target a registered type, and a declared inverse must name a relationship
//! on the target type that points back at the owner. Failures surface as
//! `EntityError::InvalidRelationship`.

pub mod descriptor;
pub mod validation;

pub use descriptor::{
    AttributeDescriptor, EntityDescriptor, EntityDescriptorBuilder, IdGenerator,
    RelationshipDescriptor, RelationshipKind,
};

use std::sync::Arc;

use eyre::Result;
use hashbrown::HashMap;

use crate::error::EntityError;

#[derive(Debug, Clone, Default)]
pub struct Schema {
    entities: HashMap<String, Arc<EntityDescriptor>>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a descriptor, replacing any earlier one with the same type name.
    pub fn register(mut self, descriptor: EntityDescriptor) -> Self {
        self.entities
            .insert(descriptor.type_name().to_string(), Arc::new(descriptor));
        self
    }

    pub fn len(&self) -> usize {
        self.entities.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    pub fn get(&self, type_name: &str) -> Option<&Arc<EntityDescriptor>> {
        self.entities.get(type_name)
    }

    pub fn descriptor(&self, type_name: &str) -> Result<Arc<EntityDescriptor>> {
        self.entities.get(type_name).cloned().ok_or_else(|| {
            EntityError::UnknownEntityType {
                type_name: type_name.to_string(),
            }
            .into()
        })
    }

    pub fn type_names(&self) -> impl Iterator<Item = &str> {
        self.entities.keys().map(String::as_str)
    }

    pub fn validate(&self) -> Result<()> {
        for descriptor in self.entities.values() {
            for relationship in descriptor.relationships() {
                self.resolve_inverse(descriptor, relationship)?;
            }
        }
        Ok(())
    }

    /// Target descriptor and inverse relationship (if declared) of
    /// `relationship`.
    pub fn resolve_inverse<'a>(
        &'a self,
        owner: &EntityDescriptor,
        relationship: &RelationshipDescriptor,
    ) -> Result<(&'a Arc<EntityDescriptor>, Option<&'a RelationshipDescriptor>)> {
        let invalid = |reason: String| -> eyre::Report {
            EntityError::InvalidRelationship {
                type_name: owner.type_name().to_string(),
                relationship: relationship.name().to_string(),
                reason,
            }
            .into()
        };

        let Some(target) = self.entities.get(relationship.target_type()) else {
            return Err(invalid(format!(
                "target type '{}' is not registered",
                relationship.target_type()
            )));
        };

        let Some(inverse_name) = relationship.inverse_name() else {
            return Ok((target, None));
        };

        let Some(inverse) = target.relationship(inverse_name) else {
            return Err(invalid(format!(
                "inverse '{}' does not exist on '{}'",
                inverse_name,
                target.type_name()
            )));
        };

        if inverse.target_type() != owner.type_name() {
            return Err(invalid(format!(
                "inverse '{}.{}' points at '{}'",
                target.type_name(),
                inverse_name,
                inverse.target_type()
            )));
        }

        Ok((target, Some(inverse)))
    }
}
