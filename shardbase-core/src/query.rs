// shardbase-core/src/query.rs
// Boolean condition trees over equality leaves, the shared equality
// predicate, and the LIKE pattern matcher.

use serde_json::Value;

use crate::document::Document;
use crate::error::{Result, ShardBaseError};
use crate::normalize::normalize;

/// One `{field: value}` equality predicate.
#[derive(Debug, Clone, PartialEq)]
pub struct EqLeaf {
    pub field: String,
    pub value: Value,
}

/// Normalized AND/OR tree over equality leaves.
#[derive(Debug, Clone, PartialEq)]
pub enum Condition {
    And(Vec<Condition>),
    Or(Vec<Condition>),
    Eq(EqLeaf),
}

impl Condition {
    /// Parse a `where` value: either a plain map of equalities (implicit
    /// AND) or a tree with `$and` / `$or` operator keys whose values are
    /// arrays of sub-conditions.
    pub fn parse(value: &Value) -> Result<Condition> {
        let Value::Object(map) = value else {
            return Err(ShardBaseError::InvalidQuery(
                "'where' must be a JSON object".to_string(),
            ));
        };

        let mut children = Vec::with_capacity(map.len());
        for (key, entry) in map {
            match key.as_str() {
                "$and" => children.push(Condition::And(Self::parse_branch_list(key, entry)?)),
                "$or" => children.push(Condition::Or(Self::parse_branch_list(key, entry)?)),
                _ if key.starts_with('$') => {
                    return Err(ShardBaseError::InvalidQuery(format!(
                        "unsupported operator '{}'",
                        key
                    )));
                }
                _ => children.push(Condition::Eq(EqLeaf {
                    field: key.clone(),
                    value: entry.clone(),
                })),
            }
        }

        if children.len() == 1 {
            Ok(children.into_iter().next().ok_or_else(|| {
                ShardBaseError::InvalidQuery("empty condition".to_string())
            })?)
        } else {
            Ok(Condition::And(children))
        }
    }

    fn parse_branch_list(operator: &str, value: &Value) -> Result<Vec<Condition>> {
        let Value::Array(items) = value else {
            return Err(ShardBaseError::InvalidQuery(format!(
                "'{}' expects an array of conditions",
                operator
            )));
        };
        items.iter().map(Condition::parse).collect()
    }

    /// In-memory evaluation, used by full scans and by tests as the oracle
    /// the index strategies must agree with.
    pub fn matches(&self, doc: &Document) -> bool {
        match self {
            Condition::And(children) => children.iter().all(|c| c.matches(doc)),
            Condition::Or(children) => children.iter().any(|c| c.matches(doc)),
            Condition::Eq(leaf) => matches_condition(doc, &leaf.field, &leaf.value),
        }
    }
}

/// Equality predicate semantics shared by residual filters, full scans and
/// seek-filter strategies:
/// - dot paths address nested values;
/// - an array value matches when any element matches after normalization;
/// - otherwise normalized forms must be byte-equal;
/// - a missing or null document value never matches.
pub fn matches_condition(doc: &Document, field: &str, expected: &Value) -> bool {
    let Some(actual) = doc.get(field) else {
        return false;
    };
    match &actual {
        Value::Null => false,
        Value::Array(items) => {
            let Some(expected_norm) = normalize(expected) else {
                return false;
            };
            items
                .iter()
                .any(|item| normalize(item).as_deref() == Some(expected_norm.as_str()))
        }
        _ => match (normalize(&actual), normalize(expected)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        },
    }
}

/// SQL-LIKE pattern matcher: `%` matches any run of characters, `_` matches
/// exactly one. Compiled once per query into an anchored regex.
#[derive(Debug)]
pub struct PatternMatcher {
    regex: regex::Regex,
}

impl PatternMatcher {
    pub fn new(pattern: &str) -> Result<Self> {
        let mut expr = String::with_capacity(pattern.len() + 4);
        expr.push_str("(?s)^");
        for c in pattern.chars() {
            match c {
                '%' => expr.push_str(".*"),
                '_' => expr.push('.'),
                other => expr.push_str(&regex::escape(&other.to_string())),
            }
        }
        expr.push('$');

        let regex = regex::Regex::new(&expr)
            .map_err(|e| ShardBaseError::InvalidQuery(format!("bad LIKE pattern: {}", e)))?;
        Ok(PatternMatcher { regex })
    }

    /// Match against a document value. Arrays match when any element does,
    /// mirroring the equality predicate.
    pub fn matches_value(&self, value: &Value) -> bool {
        match value {
            Value::Array(items) => items.iter().any(|item| self.matches_scalar(item)),
            other => self.matches_scalar(other),
        }
    }

    fn matches_scalar(&self, value: &Value) -> bool {
        normalize(value)
            .map(|s| self.regex.is_match(&s))
            .unwrap_or(false)
    }

    pub fn matches_document(&self, doc: &Document, field: &str) -> bool {
        doc.get(field)
            .map(|v| self.matches_value(&v))
            .unwrap_or(false)
    }
}
