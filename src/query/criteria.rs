//! # Criteria Trees
//!
//! A criteria node is a leaf test (attribute, operator, value) with two child
//! lists attached to it:
//!
//! ```text
//! age > 30
//! ├── or:  name STARTS_WITH "A"
//! └── and: city = "Oslo"
//!
//! result = ((age > 30) ∪ (name STARTS_WITH "A")) ∩ (city = "Oslo")
//! ```
//!
//! The own leaf is evaluated first, OR children are unioned into it over the
//! same domain as the node, and AND children then restrict the result.
//! Attribute paths containing `.` cross a relationship: `address.city` tests
//! `city` on the targets of relationship `address`.

use std::fmt;

use smallvec::SmallVec;

use crate::config::RELATIONSHIP_SEPARATOR;
use crate::types::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Equal,
    NotEqual,
    GreaterThan,
    GreaterThanEqual,
    LessThan,
    LessThanEqual,
    StartsWith,
    NotStartsWith,
    Contains,
    NotContains,
    Like,
    NotLike,
    In,
    NotIn,
    IsNull,
    NotNull,
}

impl Operator {
    /// Operators an index can answer without visiting every record.
    pub fn supports_index(self) -> bool {
        matches!(
            self,
            Self::Equal
                | Self::In
                | Self::GreaterThan
                | Self::GreaterThanEqual
                | Self::LessThan
                | Self::LessThanEqual
                | Self::StartsWith
        )
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Equal => "EQUAL",
            Self::NotEqual => "NOT_EQUAL",
            Self::GreaterThan => "GREATER_THAN",
            Self::GreaterThanEqual => "GREATER_THAN_EQUAL",
            Self::LessThan => "LESS_THAN",
            Self::LessThanEqual => "LESS_THAN_EQUAL",
            Self::StartsWith => "STARTS_WITH",
            Self::NotStartsWith => "NOT_STARTS_WITH",
            Self::Contains => "CONTAINS",
            Self::NotContains => "NOT_CONTAINS",
            Self::Like => "LIKE",
            Self::NotLike => "NOT_LIKE",
            Self::In => "IN",
            Self::NotIn => "NOT_IN",
            Self::IsNull => "IS_NULL",
            Self::NotNull => "NOT_NULL",
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub type CriteriaList = SmallVec<[Box<QueryCriteria>; 2]>;

#[derive(Debug, Clone, PartialEq)]
pub struct QueryCriteria {
    attribute: String,
    operator: Operator,
    value: Value,
    and: CriteriaList,
    or: CriteriaList,
}

impl QueryCriteria {
    pub fn new(attribute: impl Into<String>, operator: Operator, value: impl Into<Value>) -> Self {
        Self {
            attribute: attribute.into(),
            operator,
            value: value.into(),
            and: CriteriaList::new(),
            or: CriteriaList::new(),
        }
    }

    pub fn is_null(attribute: impl Into<String>) -> Self {
        Self::new(attribute, Operator::IsNull, Value::Null)
    }

    pub fn not_null(attribute: impl Into<String>) -> Self {
        Self::new(attribute, Operator::NotNull, Value::Null)
    }

    pub fn and(mut self, criteria: QueryCriteria) -> Self {
        self.and.push(Box::new(criteria));
        self
    }

    pub fn or(mut self, criteria: QueryCriteria) -> Self {
        self.or.push(Box::new(criteria));
        self
    }

    pub fn attribute(&self) -> &str {
        &self.attribute
    }

    pub fn operator(&self) -> Operator {
        self.operator
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    pub fn and_children(&self) -> impl Iterator<Item = &QueryCriteria> {
        self.and.iter().map(|c| c.as_ref())
    }

    pub fn or_children(&self) -> impl Iterator<Item = &QueryCriteria> {
        self.or.iter().map(|c| c.as_ref())
    }

    pub fn is_leaf(&self) -> bool {
        self.and.is_empty() && self.or.is_empty()
    }

    /// Splits `rel.rest` into the relationship name and the remaining path.
    pub fn relationship_path(&self) -> Option<(&str, &str)> {
        self.attribute.split_once(RELATIONSHIP_SEPARATOR)
    }

    /// This node's leaf test with `attribute` replaced and no children.
    pub fn leaf_for(&self, attribute: &str) -> QueryCriteria {
        QueryCriteria::new(attribute, self.operator, self.value.clone())
    }
}

impl fmt::Display for QueryCriteria {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let has_or = !self.or.is_empty();
        if has_or {
            f.write_str("(")?;
        }
        write!(f, "{} {} {}", self.attribute, self.operator, self.value)?;
        for child in &self.or {
            write!(f, " OR {}", child)?;
        }
        if has_or {
            f.write_str(")")?;
        }
        for child in &self.and {
            write!(f, " AND {}", child)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builds_tree() {
        let criteria = QueryCriteria::new("age", Operator::GreaterThan, 30)
            .or(QueryCriteria::new("name", Operator::StartsWith, "A"))
            .and(QueryCriteria::new("city", Operator::Equal, "Oslo"));

        assert!(!criteria.is_leaf());
        assert_eq!(criteria.or_children().count(), 1);
        assert_eq!(criteria.and_children().count(), 1);
        assert_eq!(
            criteria.to_string(),
            "(age GREATER_THAN 30 OR name STARTS_WITH \"A\") AND city EQUAL \"Oslo\""
        );
    }

    #[test]
    fn relationship_path_splits_at_first_separator() {
        let criteria = QueryCriteria::new("address.city.name", Operator::Equal, "x");
        assert_eq!(criteria.relationship_path(), Some(("address", "city.name")));
        assert_eq!(QueryCriteria::is_null("age").relationship_path(), None);
    }

    #[test]
    fn index_support() {
        assert!(Operator::Equal.supports_index());
        assert!(Operator::StartsWith.supports_index());
        assert!(!Operator::NotEqual.supports_index());
        assert!(!Operator::Like.supports_index());
    }
}
