//! # Relationships
//!
//! Each declared relationship keeps, per owner identifier, the list of
//! targets it points at. A target is its identifier plus the partition value
//! of the target record, so targets in partitioned types resolve without a
//! search:
//!
//! ```text
//! "{type}__rel__{name}" : owner identifier -> List[ List[target id, target partition], ... ]
//! ```
//!
//! The controller only stores lists. Keeping an inverse relationship in sync
//! is done by the schema context, which owns the controllers on both sides.
//! Every operation here is a read-modify-write under one key lock, and no
//! operation holds two key locks at once, so inverse maintenance in both
//! directions cannot deadlock.

use std::sync::Arc;

use eyre::{bail, Result};

use crate::encoding::encode_value;
use crate::error::EntityError;
use crate::map::{DataFile, DiskMap};
use crate::schema::validation::coerce;
use crate::schema::{EntityDescriptor, RelationshipDescriptor, RelationshipKind};
use crate::types::Value;

/// One relationship target: identifier plus partition value.
#[derive(Debug, Clone, PartialEq)]
pub struct RelatedRef {
    pub identifier: Value,
    pub partition: Value,
}

impl RelatedRef {
    pub fn new(identifier: Value, partition: Value) -> Self {
        Self {
            identifier,
            partition,
        }
    }

    fn to_value(&self) -> Value {
        Value::List(vec![self.identifier.clone(), self.partition.clone()])
    }

    fn from_value(value: &Value) -> Option<Self> {
        match value.as_list()? {
            [identifier, partition] => Some(Self::new(identifier.clone(), partition.clone())),
            _ => None,
        }
    }

    /// Byte key identifying this target; equal targets share a key.
    pub fn key_bytes(&self) -> Vec<u8> {
        encode_value(&self.to_value())
    }
}

pub struct RelationshipController {
    owner: Arc<EntityDescriptor>,
    relationship: RelationshipDescriptor,
    target: Arc<EntityDescriptor>,
    references: Arc<DiskMap>,
}

impl std::fmt::Debug for RelationshipController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RelationshipController")
            .field("owner", &self.owner.type_name())
            .field("relationship", &self.relationship.name())
            .field("target", &self.target.type_name())
            .finish()
    }
}

impl RelationshipController {
    pub fn new(
        owner: Arc<EntityDescriptor>,
        relationship: RelationshipDescriptor,
        target: Arc<EntityDescriptor>,
        data_file: &DataFile,
    ) -> Result<Self> {
        let map_name = format!("{}__rel__{}", owner.type_name(), relationship.name());
        let references = data_file.map(&map_name)?;
        Ok(Self {
            owner,
            relationship,
            target,
            references,
        })
    }

    pub fn descriptor(&self) -> &RelationshipDescriptor {
        &self.relationship
    }

    pub fn target(&self) -> &Arc<EntityDescriptor> {
        &self.target
    }

    fn invalid(&self, reason: String) -> eyre::Report {
        EntityError::InvalidRelationship {
            type_name: self.owner.type_name().to_string(),
            relationship: self.relationship.name().to_string(),
            reason,
        }
        .into()
    }

    /// Coerces target identifiers and partitions into the target type's
    /// declared types and drops duplicates.
    pub fn normalize(&self, targets: &[RelatedRef]) -> Result<Vec<RelatedRef>> {
        let mut normalized: Vec<RelatedRef> = Vec::with_capacity(targets.len());

        for target in targets {
            if target.identifier.is_null() {
                return Err(self.invalid("target identifier is null".into()));
            }
            let identifier = coerce(&self.target, self.target.identifier(), target.identifier.clone())?;
            let partition = match self.target.partition().and_then(|p| self.target.attribute(p)) {
                Some(attribute) => coerce(&self.target, attribute, target.partition.clone())?,
                None if target.partition.is_null() => Value::Null,
                None => {
                    return Err(self.invalid(format!(
                        "'{}' is not partitioned",
                        self.target.type_name()
                    )))
                }
            };

            let candidate = RelatedRef::new(identifier, partition);
            if !normalized.contains(&candidate) {
                normalized.push(candidate);
            }
        }

        if self.relationship.kind() == RelationshipKind::ToOne && normalized.len() > 1 {
            return Err(self.invalid(format!("to-one relationship given {} targets", normalized.len())));
        }
        Ok(normalized)
    }

    fn decode_list(&self, value: Option<Value>) -> Result<Vec<RelatedRef>> {
        match value {
            None => Ok(Vec::new()),
            Some(Value::List(items)) => items
                .iter()
                .map(|item| {
                    RelatedRef::from_value(item).ok_or_else(|| {
                        eyre::eyre!(
                            "malformed target in relationship '{}.{}'",
                            self.owner.type_name(),
                            self.relationship.name()
                        )
                    })
                })
                .collect(),
            Some(other) => bail!(
                "relationship '{}.{}' stores {}, expected list",
                self.owner.type_name(),
                self.relationship.name(),
                other.type_name()
            ),
        }
    }

    fn encode_list(targets: &[RelatedRef]) -> Value {
        Value::List(targets.iter().map(RelatedRef::to_value).collect())
    }

    pub fn targets(&self, owner: &Value) -> Result<Vec<RelatedRef>> {
        self.decode_list(self.references.get_value(owner)?)
    }

    /// Replaces the targets of `owner`, returning the previous ones.
    pub fn replace(&self, owner: &Value, targets: &[RelatedRef]) -> Result<Vec<RelatedRef>> {
        let guard = self.references.lock_key(owner)?;
        let previous = self.decode_list(guard.get_value()?)?;
        if targets.is_empty() {
            guard.remove()?;
        } else {
            guard.put_value(&Self::encode_list(targets))?;
        }
        Ok(previous)
    }

    pub fn remove_all(&self, owner: &Value) -> Result<Vec<RelatedRef>> {
        let previous = self.references.remove(owner)?;
        self.decode_list(previous.map(|bytes| crate::encoding::decode_value(&bytes)).transpose()?)
    }

    /// Adds `target` to the list of `owner`. A to-one relationship keeps only
    /// the newest target.
    pub fn add(&self, owner: &Value, target: &RelatedRef) -> Result<()> {
        let guard = self.references.lock_key(owner)?;
        let mut targets = self.decode_list(guard.get_value()?)?;
        if targets.contains(target) {
            return Ok(());
        }
        if self.relationship.kind() == RelationshipKind::ToOne {
            targets.clear();
        }
        targets.push(target.clone());
        guard.put_value(&Self::encode_list(&targets))?;
        Ok(())
    }

    pub fn remove(&self, owner: &Value, target: &RelatedRef) -> Result<()> {
        let guard = self.references.lock_key(owner)?;
        let mut targets = self.decode_list(guard.get_value()?)?;
        let before = targets.len();
        targets.retain(|t| t != target);
        if targets.len() == before {
            return Ok(());
        }
        if targets.is_empty() {
            guard.remove()?;
        } else {
            guard.put_value(&Self::encode_list(&targets))?;
        }
        Ok(())
    }
}
