// shardbase-core/src/find_options.rs
// Find query surface: where/like/filter/orderBy/limit/offset/populate,
// sort-key parsing and the sorting primitives the executor picks between.

use std::cmp::Ordering;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::document::Document;
use crate::error::{Result, ShardBaseError};

/// Largest `limit + offset` the bounded-heap TopN sort is used for.
pub const TOP_N_THRESHOLD: usize = 100;

/// A find request. All parts are optional; an empty query returns the whole
/// collection.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct FindQuery {
    /// AND/OR condition tree, or a plain map of equalities.
    #[serde(rename = "where")]
    pub where_: Option<Value>,

    /// field → SQL-LIKE pattern, applied after the primary result set.
    pub like: BTreeMap<String, String>,

    /// field → value residual equality filters.
    pub filter: BTreeMap<String, Value>,

    /// `"age desc"`, `["age desc", "name"]` or `{"age": "desc"}`.
    #[serde(rename = "orderBy")]
    pub order_by: Option<Value>,

    pub limit: Option<usize>,
    pub offset: Option<usize>,

    /// Relation names to populate on the sliced result.
    pub populate: Vec<String>,
}

impl FindQuery {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_value(value: Value) -> Result<Self> {
        serde_json::from_value(value)
            .map_err(|e| ShardBaseError::InvalidQuery(format!("invalid find query: {}", e)))
    }

    pub fn with_where(mut self, condition: Value) -> Self {
        self.where_ = Some(condition);
        self
    }

    pub fn with_like(mut self, field: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.like.insert(field.into(), pattern.into());
        self
    }

    pub fn with_filter(mut self, field: impl Into<String>, value: Value) -> Self {
        self.filter.insert(field.into(), value);
        self
    }

    pub fn with_order_by(mut self, order_by: Value) -> Self {
        self.order_by = Some(order_by);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn with_populate(mut self, relation: impl Into<String>) -> Self {
        self.populate.push(relation.into());
        self
    }
}

/// Response of `find`: the pre-pagination match count plus the sliced page.
#[derive(Debug, Clone, Serialize)]
pub struct FindResult {
    pub size: usize,
    pub limit: Option<usize>,
    pub offset: usize,
    pub results: Vec<Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SortKey {
    pub field: String,
    pub direction: SortDirection,
}

impl SortKey {
    fn parse(spec: &str) -> Result<SortKey> {
        let mut parts = spec.split_whitespace();
        let field = parts
            .next()
            .ok_or_else(|| ShardBaseError::InvalidQuery("empty orderBy entry".to_string()))?
            .to_string();
        let direction = match parts.next() {
            None => SortDirection::Asc,
            Some(d) if d.eq_ignore_ascii_case("asc") => SortDirection::Asc,
            Some(d) if d.eq_ignore_ascii_case("desc") => SortDirection::Desc,
            Some(other) => {
                return Err(ShardBaseError::InvalidQuery(format!(
                    "unknown sort direction '{}'",
                    other
                )))
            }
        };
        Ok(SortKey { field, direction })
    }
}

/// Parse the `orderBy` value. Map form applies keys in alphabetical order
/// (JSON maps are unordered); use the sequence form to control priority.
pub fn parse_order_by(value: &Value) -> Result<Vec<SortKey>> {
    match value {
        Value::String(spec) => Ok(vec![SortKey::parse(spec)?]),
        Value::Array(items) => items
            .iter()
            .map(|item| match item {
                Value::String(spec) => SortKey::parse(spec),
                other => Err(ShardBaseError::InvalidQuery(format!(
                    "orderBy entries must be strings, got {}",
                    other
                ))),
            })
            .collect(),
        Value::Object(map) => map
            .iter()
            .map(|(field, dir)| {
                let direction = match dir {
                    Value::String(s) if s.eq_ignore_ascii_case("asc") => SortDirection::Asc,
                    Value::String(s) if s.eq_ignore_ascii_case("desc") => SortDirection::Desc,
                    Value::Number(n) if n.as_i64() == Some(1) => SortDirection::Asc,
                    Value::Number(n) if n.as_i64() == Some(-1) => SortDirection::Desc,
                    other => {
                        return Err(ShardBaseError::InvalidQuery(format!(
                            "bad sort direction for '{}': {}",
                            field, other
                        )))
                    }
                };
                Ok(SortKey {
                    field: field.clone(),
                    direction,
                })
            })
            .collect(),
        other => Err(ShardBaseError::InvalidQuery(format!(
            "orderBy must be a string, array or object, got {}",
            other
        ))),
    }
}

/// Compare two optional values for sorting. Missing sorts before anything;
/// mixed types order by a fixed type priority so the sort is total.
pub fn compare_sort_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
    fn type_priority(v: &Value) -> u8 {
        match v {
            Value::Null => 0,
            Value::Number(_) => 1,
            Value::String(_) => 2,
            Value::Bool(_) => 3,
            Value::Object(_) => 4,
            Value::Array(_) => 5,
        }
    }

    match (a, b) {
        (None, None) => Ordering::Equal,
        (None, Some(_)) => Ordering::Less,
        (Some(_), None) => Ordering::Greater,
        (Some(av), Some(bv)) => match (av, bv) {
            (Value::Number(n1), Value::Number(n2)) => {
                let f1 = n1.as_f64().unwrap_or(0.0);
                let f2 = n2.as_f64().unwrap_or(0.0);
                f1.partial_cmp(&f2).unwrap_or(Ordering::Equal)
            }
            (Value::String(s1), Value::String(s2)) => s1.cmp(s2),
            (Value::Bool(b1), Value::Bool(b2)) => b1.cmp(b2),
            _ => type_priority(av).cmp(&type_priority(bv)),
        },
    }
}

/// LOAD_AND_SORT: full in-memory sort by every sort key in priority order.
pub fn apply_order(docs: &mut [Document], keys: &[SortKey]) {
    if keys.is_empty() {
        return;
    }
    docs.sort_by(|a, b| {
        for key in keys {
            let va = a.get(&key.field);
            let vb = b.get(&key.field);
            let cmp = compare_sort_values(va.as_ref(), vb.as_ref());
            if cmp != Ordering::Equal {
                return match key.direction {
                    SortDirection::Asc => cmp,
                    SortDirection::Desc => cmp.reverse(),
                };
            }
        }
        Ordering::Equal
    });
}

struct HeapEntry {
    key: Option<Value>,
    doc: Document,
    direction: SortDirection,
}

impl HeapEntry {
    fn cmp_adjusted(&self, other: &Self) -> Ordering {
        let cmp = compare_sort_values(self.key.as_ref(), other.key.as_ref());
        match self.direction {
            SortDirection::Asc => cmp,
            SortDirection::Desc => cmp.reverse(),
        }
    }
}

impl PartialEq for HeapEntry {
    fn eq(&self, other: &Self) -> bool {
        self.cmp_adjusted(other) == Ordering::Equal
    }
}
impl Eq for HeapEntry {}
impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp_adjusted(other))
    }
}
impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        self.cmp_adjusted(other)
    }
}

/// TOP_N: keep only the best `n` documents under a single sort key, via a
/// bounded max-heap. O(total · log n) instead of a full sort; the returned
/// documents are in final order.
pub fn top_n(docs: Vec<Document>, key: &SortKey, n: usize) -> Vec<Document> {
    if n == 0 {
        return Vec::new();
    }

    let mut heap = std::collections::BinaryHeap::with_capacity(n + 1);
    for doc in docs {
        let entry = HeapEntry {
            key: doc.get(&key.field),
            doc,
            direction: key.direction,
        };
        heap.push(entry);
        if heap.len() > n {
            heap.pop();
        }
    }

    heap.into_sorted_vec().into_iter().map(|e| e.doc).collect()
}

/// Slice `[offset, offset + limit)` of an already ordered result set.
pub fn paginate(docs: Vec<Document>, offset: usize, limit: Option<usize>) -> Vec<Document> {
    if offset >= docs.len() {
        return Vec::new();
    }
    let end = match limit {
        Some(l) => (offset + l).min(docs.len()),
        None => docs.len(),
    };
    docs[offset..end].to_vec()
}
