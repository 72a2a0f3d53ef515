// shardbase-core/src/planner.rs
// Strategy selection for conjunctions/disjunctions of equality leaves and
// for ORDER BY. Candidates are scored by estimated selectivity; ties break
// on a fixed strategy rank.

use std::collections::BTreeMap;

use serde_json::Value;

use crate::find_options::{SortKey, TOP_N_THRESHOLD};
use crate::query::EqLeaf;

/// Executable strategy for one group of equality leaves.
#[derive(Debug, Clone, PartialEq)]
pub enum QueryPlan {
    /// Fully specified composite key on one index.
    ExactMatch { index: String, values: Vec<Value> },
    /// The query covers a strict prefix of one index.
    PrefixMatch { index: String, values: Vec<Value> },
    /// One index covers a prefix of the query; the rest filters in memory.
    IndexSeekFilter {
        index: String,
        values: Vec<Value>,
        residual: Vec<EqLeaf>,
    },
    /// Intersect postings of several single-field indexes, most selective
    /// first, then filter the unindexed leaves in memory.
    IndexIntersect {
        probes: Vec<(String, Value)>,
        residual: Vec<EqLeaf>,
    },
    /// Union postings of single-field indexes (disjunctions only).
    IndexUnion { probes: Vec<(String, Value)> },
    /// Evaluate the leaves against every document.
    FullScan,
}

impl QueryPlan {
    /// Tie-break rank; lower wins at equal selectivity.
    fn rank(&self) -> u8 {
        match self {
            QueryPlan::ExactMatch { .. } => 0,
            QueryPlan::PrefixMatch { .. } => 1,
            QueryPlan::IndexIntersect { .. } => 2,
            QueryPlan::IndexSeekFilter { .. } => 3,
            QueryPlan::IndexUnion { .. } => 4,
            QueryPlan::FullScan => 5,
        }
    }

    pub fn strategy_name(&self) -> &'static str {
        match self {
            QueryPlan::ExactMatch { .. } => "EXACT_MATCH",
            QueryPlan::PrefixMatch { .. } => "PREFIX_MATCH",
            QueryPlan::IndexSeekFilter { .. } => "INDEX_SEEK_FILTER",
            QueryPlan::IndexIntersect { .. } => "INDEX_INTERSECT",
            QueryPlan::IndexUnion { .. } => "INDEX_UNION",
            QueryPlan::FullScan => "FULL_SCAN",
        }
    }
}

struct Candidate {
    plan: QueryPlan,
    selectivity: f64,
}

/// Plan a conjunction of equality leaves.
///
/// `indices` maps index name → ordered field list. `probe` returns the
/// posting length of a single-field index for a value; the intersection
/// candidate uses it to start from the most selective index.
pub fn plan_conjunction(
    leaves: &[EqLeaf],
    indices: &BTreeMap<String, Vec<String>>,
    probe: &mut dyn FnMut(&str, &Value) -> usize,
) -> QueryPlan {
    if leaves.is_empty() {
        return QueryPlan::FullScan;
    }

    let mut candidates = vec![Candidate {
        plan: QueryPlan::FullScan,
        selectivity: 1.0,
    }];

    // Composite-index candidates: order-sensitive prefix match between the
    // index's declared fields and the query's leaves, both from position 0.
    for (name, fields) in indices {
        let matched = fields
            .iter()
            .zip(leaves.iter())
            .take_while(|(field, leaf)| **field == leaf.field)
            .count();
        if matched == 0 {
            continue;
        }

        let values: Vec<Value> = leaves[..matched].iter().map(|l| l.value.clone()).collect();
        let selectivity = 0.1f64.powi(matched as i32);

        if matched == fields.len() && matched == leaves.len() {
            candidates.push(Candidate {
                plan: QueryPlan::ExactMatch {
                    index: name.clone(),
                    values,
                },
                selectivity,
            });
        } else if matched < fields.len() && matched == leaves.len() {
            candidates.push(Candidate {
                plan: QueryPlan::PrefixMatch {
                    index: name.clone(),
                    values,
                },
                selectivity,
            });
        } else if matched < leaves.len() {
            candidates.push(Candidate {
                plan: QueryPlan::IndexSeekFilter {
                    index: name.clone(),
                    values,
                    residual: leaves[matched..].to_vec(),
                },
                selectivity,
            });
        }
    }

    // Intersection candidate over the single-field indexes of the queried
    // fields, probed and ordered by posting length ascending.
    let single_field: BTreeMap<&str, &str> = indices
        .iter()
        .filter(|(_, fields)| fields.len() == 1)
        .map(|(name, fields)| (fields[0].as_str(), name.as_str()))
        .collect();

    let mut probes: Vec<(String, Value, usize)> = Vec::new();
    let mut residual: Vec<EqLeaf> = Vec::new();
    for leaf in leaves {
        match single_field.get(leaf.field.as_str()) {
            Some(index) => {
                let len = probe(index, &leaf.value);
                probes.push(((*index).to_string(), leaf.value.clone(), len));
            }
            None => residual.push(leaf.clone()),
        }
    }
    if !probes.is_empty() {
        probes.sort_by_key(|(_, _, len)| *len);
        let selectivity = 0.1 / probes.len() as f64;
        candidates.push(Candidate {
            plan: QueryPlan::IndexIntersect {
                probes: probes.into_iter().map(|(i, v, _)| (i, v)).collect(),
                residual,
            },
            selectivity,
        });
    }

    pick_winner(candidates)
}

/// Plan a disjunction of equality leaves: INDEX_UNION when every field has
/// a single-field index, FULL_SCAN otherwise.
pub fn plan_disjunction(
    leaves: &[EqLeaf],
    indices: &BTreeMap<String, Vec<String>>,
) -> QueryPlan {
    if leaves.is_empty() {
        return QueryPlan::FullScan;
    }

    let single_field: BTreeMap<&str, &str> = indices
        .iter()
        .filter(|(_, fields)| fields.len() == 1)
        .map(|(name, fields)| (fields[0].as_str(), name.as_str()))
        .collect();

    let mut probes = Vec::with_capacity(leaves.len());
    for leaf in leaves {
        match single_field.get(leaf.field.as_str()) {
            Some(index) => probes.push(((*index).to_string(), leaf.value.clone())),
            None => return QueryPlan::FullScan,
        }
    }
    QueryPlan::IndexUnion { probes }
}

fn pick_winner(candidates: Vec<Candidate>) -> QueryPlan {
    candidates
        .into_iter()
        .min_by(|a, b| {
            a.selectivity
                .partial_cmp(&b.selectivity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.plan.rank().cmp(&b.plan.rank()))
        })
        .map(|c| c.plan)
        // Unreachable: FULL_SCAN is always a candidate.
        .unwrap_or(QueryPlan::FullScan)
}

/// How to order the materialized result set.
#[derive(Debug, Clone, PartialEq)]
pub enum SortStrategy {
    /// Iterate one index in key order instead of a global sort.
    IndexScanOrdered { index: String, key: SortKey },
    /// Bounded-heap TopN for shallow pages on one sort key.
    TopN { key: SortKey, n: usize },
    /// Load everything and sort in memory.
    LoadAndSort { keys: Vec<SortKey> },
}

/// Choose a sort strategy. `eq_fields` are the fields restricted by
/// equality in the primary strategy; an index scan is only safe when no
/// other field constrains the result set.
pub fn plan_order_by(
    keys: Vec<SortKey>,
    eq_fields: &[String],
    indices: &BTreeMap<String, Vec<String>>,
    limit: Option<usize>,
    offset: usize,
) -> SortStrategy {
    if keys.len() == 1 {
        let key = &keys[0];

        let indexed = indices
            .iter()
            .find(|(_, fields)| fields.len() == 1 && fields[0] == key.field)
            .map(|(name, _)| name.clone());
        let unrestricted =
            eq_fields.is_empty() || (eq_fields.len() == 1 && eq_fields[0] == key.field);

        if let (Some(index), true) = (indexed, unrestricted) {
            return SortStrategy::IndexScanOrdered {
                index,
                key: key.clone(),
            };
        }

        if let Some(limit) = limit {
            if limit + offset <= TOP_N_THRESHOLD {
                return SortStrategy::TopN {
                    key: key.clone(),
                    n: limit + offset,
                };
            }
        }
    }

    SortStrategy::LoadAndSort { keys }
}
