//! # Operator Evaluation
//!
//! In-memory evaluation of one criteria operator against one attribute value.
//! Full scans and index scans both decide membership through [`matches`], so
//! both paths agree on every value.
//!
//! ## Null Handling
//!
//! - `EQUAL null` matches null values, `NOT_EQUAL null` matches the rest
//! - ordering, prefix, contains and like tests never match null
//! - negated operators are the exact complement of their positive form
//!
//! `LIKE` uses SQL wildcards (`%` any run, `_` one character) and ignores
//! case.

use std::cmp::Ordering;

use super::Operator;
use crate::types::Value;

pub fn matches(operator: Operator, actual: &Value, expected: &Value) -> bool {
    match operator {
        Operator::Equal => equal(actual, expected),
        Operator::NotEqual => !equal(actual, expected),
        Operator::GreaterThan => actual.compare(expected) == Some(Ordering::Greater),
        Operator::GreaterThanEqual => matches!(
            actual.compare(expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Operator::LessThan => actual.compare(expected) == Some(Ordering::Less),
        Operator::LessThanEqual => matches!(
            actual.compare(expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
        Operator::StartsWith => starts_with(actual, expected),
        Operator::NotStartsWith => !starts_with(actual, expected),
        Operator::Contains => contains(actual, expected),
        Operator::NotContains => !contains(actual, expected),
        Operator::Like => like(actual, expected),
        Operator::NotLike => !like(actual, expected),
        Operator::In => within(actual, expected),
        Operator::NotIn => !within(actual, expected),
        Operator::IsNull => actual.is_null(),
        Operator::NotNull => !actual.is_null(),
    }
}

fn equal(actual: &Value, expected: &Value) -> bool {
    match (actual.is_null(), expected.is_null()) {
        (true, true) => true,
        (false, false) => actual.loosely_equals(expected),
        _ => false,
    }
}

fn starts_with(actual: &Value, expected: &Value) -> bool {
    match (actual.to_text(), expected.to_text()) {
        (Some(text), Some(prefix)) => text.starts_with(&prefix),
        _ => false,
    }
}

fn contains(actual: &Value, expected: &Value) -> bool {
    if expected.is_null() {
        return false;
    }
    if let Some(items) = actual.as_list() {
        return items.iter().any(|item| item.loosely_equals(expected));
    }
    match (actual.to_text(), expected.to_text()) {
        (Some(text), Some(part)) => text.contains(&part),
        _ => false,
    }
}

fn within(actual: &Value, expected: &Value) -> bool {
    match expected.as_list() {
        Some(candidates) => candidates.iter().any(|candidate| equal(actual, candidate)),
        None => equal(actual, expected),
    }
}

fn like(actual: &Value, expected: &Value) -> bool {
    match (actual.to_text(), expected.to_text()) {
        (Some(text), Some(pattern)) => {
            let text: Vec<char> = text.to_lowercase().chars().collect();
            let pattern: Vec<char> = pattern.to_lowercase().chars().collect();
            like_match(&text, &pattern)
        }
        _ => false,
    }
}

/// Greedy wildcard match with backtracking to the last `%`.
fn like_match(text: &[char], pattern: &[char]) -> bool {
    let (mut t, mut p) = (0, 0);
    let mut backtrack: Option<(usize, usize)> = None;

    while t < text.len() {
        if p < pattern.len() && pattern[p] == '%' {
            backtrack = Some((p, t));
            p += 1;
        } else if p < pattern.len() && (pattern[p] == '_' || pattern[p] == text[t]) {
            t += 1;
            p += 1;
        } else if let Some((star, mark)) = backtrack {
            p = star + 1;
            t = mark + 1;
            backtrack = Some((star, mark + 1));
        } else {
            return false;
        }
    }

    pattern[p..].iter().all(|&c| c == '%')
}
