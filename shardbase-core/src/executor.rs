// shardbase-core/src/executor.rs
// find() pipeline: run the planned strategy, then residual filter -> LIKE ->
// ORDER BY -> paging -> population.

use ahash::{AHashMap, AHashSet};
use serde_json::Value;

use crate::collection::{Collection, IndexHandle};
use crate::database::DatabaseInner;
use crate::document::Document;
use crate::error::{Result, ShardBaseError};
use crate::find_options::{
    apply_order, paginate, parse_order_by, top_n, FindQuery, FindResult, SortDirection, SortKey,
};
use crate::planner::{plan_conjunction, plan_disjunction, plan_order_by, QueryPlan, SortStrategy};
use crate::query::{matches_condition, Condition, EqLeaf, PatternMatcher};
use crate::schema::Relation;

impl Collection {
    /// Execute a find request end to end.
    pub fn find(&self, query: FindQuery) -> Result<FindResult> {
        let condition = match &query.where_ {
            Some(value) => Some(Condition::parse(value)?),
            None => None,
        };

        let mut docs = match &condition {
            Some(cond) => self.execute_condition(cond)?,
            None => self.store.all_documents().collect(),
        };

        // Residual equality filters.
        for (field, value) in &query.filter {
            if docs.is_empty() {
                break;
            }
            docs.retain(|doc| matches_condition(doc, field, value));
        }

        // LIKE filters.
        for (field, pattern) in &query.like {
            if docs.is_empty() {
                break;
            }
            let matcher = PatternMatcher::new(pattern)?;
            docs.retain(|doc| matcher.matches_document(doc, field));
        }

        // Total size before pagination.
        let size = docs.len();
        let offset = query.offset.unwrap_or(0);

        if let Some(order_by) = &query.order_by {
            let keys = parse_order_by(order_by)?;
            if !keys.is_empty() {
                let mut eq_fields = match &condition {
                    Some(cond) => collect_eq_fields(cond),
                    None => Vec::new(),
                };
                for field in query.filter.keys() {
                    if !eq_fields.contains(field) {
                        eq_fields.push(field.clone());
                    }
                }
                docs = self.apply_sort_strategy(
                    docs,
                    plan_order_by(keys, &eq_fields, &self.schema.indices, query.limit, offset),
                )?;
            }
        }

        let docs = paginate(docs, offset, query.limit);

        let results = if query.populate.is_empty() {
            docs.iter().map(Document::to_value).collect()
        } else {
            self.populate_results(&docs, &query.populate)?
        };

        Ok(FindResult {
            size,
            limit: query.limit,
            offset,
            results,
        })
    }

    /// Name of the strategy the planner picks for a `where` value, for
    /// callers (and tests) that want plan visibility without running it.
    pub fn explain(&self, where_value: &Value) -> Result<&'static str> {
        let condition = Condition::parse(where_value)?;
        let name = match &condition {
            Condition::Eq(leaf) => self
                .plan_group(std::slice::from_ref(leaf))
                .strategy_name(),
            Condition::And(children) => {
                let leaves = direct_eq_leaves(children);
                self.plan_group(&leaves).strategy_name()
            }
            Condition::Or(children) => {
                let leaves = direct_eq_leaves(children);
                plan_disjunction(&leaves, &self.schema.indices).strategy_name()
            }
        };
        Ok(name)
    }

    fn plan_group(&self, leaves: &[EqLeaf]) -> QueryPlan {
        plan_conjunction(leaves, &self.schema.indices, &mut |index, value| {
            self.probe_len(index, value)
        })
    }

    // ===== condition tree execution =====

    /// Evaluate a condition tree to documents. Same-level equality leaves
    /// are grouped into a single planner call; nested trees recurse and
    /// combine by document id.
    pub(crate) fn execute_condition(&self, condition: &Condition) -> Result<Vec<Document>> {
        match condition {
            Condition::Eq(leaf) => self.execute_conjunction(std::slice::from_ref(leaf)),
            Condition::And(children) => {
                if children.is_empty() {
                    return Ok(self.store.all_documents().collect());
                }
                let leaves = direct_eq_leaves(children);
                let mut sets = Vec::new();
                if !leaves.is_empty() {
                    sets.push(self.execute_conjunction(&leaves)?);
                }
                for child in children {
                    if !matches!(child, Condition::Eq(_)) {
                        if sets.iter().any(Vec::is_empty) {
                            return Ok(Vec::new());
                        }
                        sets.push(self.execute_condition(child)?);
                    }
                }
                Ok(intersect_by_id(sets))
            }
            Condition::Or(children) => {
                let leaves = direct_eq_leaves(children);
                let mut sets = Vec::new();
                if !leaves.is_empty() {
                    sets.push(self.execute_disjunction(&leaves)?);
                }
                for child in children {
                    if !matches!(child, Condition::Eq(_)) {
                        sets.push(self.execute_condition(child)?);
                    }
                }
                Ok(union_by_id(sets))
            }
        }
    }

    fn execute_conjunction(&self, leaves: &[EqLeaf]) -> Result<Vec<Document>> {
        let plan = self.plan_group(leaves);
        self.run_conjunction_plan(plan, leaves)
    }

    fn execute_disjunction(&self, leaves: &[EqLeaf]) -> Result<Vec<Document>> {
        match plan_disjunction(leaves, &self.schema.indices) {
            QueryPlan::IndexUnion { probes } => {
                let mut seen = AHashSet::new();
                let mut ids = Vec::new();
                for (index, value) in &probes {
                    let handle = self.index_handle(index)?;
                    for id in handle.engine.lock().get_exact(std::slice::from_ref(value))? {
                        if seen.insert(id.clone()) {
                            ids.push(id);
                        }
                    }
                }
                self.load_documents(&ids)
            }
            _ => Ok(self
                .store
                .all_documents()
                .filter(|doc| {
                    leaves
                        .iter()
                        .any(|leaf| matches_condition(doc, &leaf.field, &leaf.value))
                })
                .collect()),
        }
    }

    fn run_conjunction_plan(&self, plan: QueryPlan, leaves: &[EqLeaf]) -> Result<Vec<Document>> {
        match plan {
            QueryPlan::ExactMatch { index, values } => {
                let handle = self.index_handle(&index)?;
                let ids = handle.engine.lock().get_exact(&values)?;
                self.load_documents(&ids)
            }
            QueryPlan::PrefixMatch { index, values } => {
                let handle = self.index_handle(&index)?;
                let ids = handle.engine.lock().get_prefix(&values)?;
                self.load_documents(&ids)
            }
            QueryPlan::IndexSeekFilter {
                index,
                values,
                residual,
            } => {
                let handle = self.index_handle(&index)?;
                let ids = {
                    let mut engine = handle.engine.lock();
                    if values.len() == engine.fields().len() {
                        engine.get_exact(&values)?
                    } else {
                        engine.get_prefix(&values)?
                    }
                };
                let mut docs = self.load_documents(&ids)?;
                for leaf in &residual {
                    if docs.is_empty() {
                        break;
                    }
                    docs.retain(|doc| matches_condition(doc, &leaf.field, &leaf.value));
                }
                Ok(docs)
            }
            QueryPlan::IndexIntersect { probes, residual } => {
                let mut working: Option<Vec<String>> = None;
                for (index, value) in &probes {
                    let handle = self.index_handle(index)?;
                    let postings = handle.engine.lock().get_exact(std::slice::from_ref(value))?;
                    working = Some(match working {
                        None => postings,
                        Some(current) => {
                            let keep: AHashSet<&str> =
                                postings.iter().map(String::as_str).collect();
                            current
                                .into_iter()
                                .filter(|id| keep.contains(id.as_str()))
                                .collect()
                        }
                    });
                    if working.as_ref().map(Vec::is_empty).unwrap_or(false) {
                        return Ok(Vec::new());
                    }
                }

                let mut docs = self.load_documents(&working.unwrap_or_default())?;
                for leaf in &residual {
                    if docs.is_empty() {
                        break;
                    }
                    docs.retain(|doc| matches_condition(doc, &leaf.field, &leaf.value));
                }
                Ok(docs)
            }
            QueryPlan::FullScan => Ok(self
                .store
                .all_documents()
                .filter(|doc| {
                    leaves
                        .iter()
                        .all(|leaf| matches_condition(doc, &leaf.field, &leaf.value))
                })
                .collect()),
            QueryPlan::IndexUnion { .. } => Err(ShardBaseError::Planner(
                "union strategy in conjunction context".to_string(),
            )),
        }
    }

    // ===== sorting =====

    fn apply_sort_strategy(
        &self,
        mut docs: Vec<Document>,
        strategy: SortStrategy,
    ) -> Result<Vec<Document>> {
        match strategy {
            SortStrategy::LoadAndSort { keys } => {
                apply_order(&mut docs, &keys);
                Ok(docs)
            }
            SortStrategy::TopN { key, n } => Ok(top_n(docs, &key, n)),
            SortStrategy::IndexScanOrdered { index, key } => {
                self.apply_index_scan_order(docs, &index, &key)
            }
        }
    }

    /// Order an already materialized result set by walking one index in key
    /// order. Documents absent from the index (missing sort field) take the
    /// position a missing value gets in a real sort: first ascending, last
    /// descending.
    fn apply_index_scan_order(
        &self,
        docs: Vec<Document>,
        index: &str,
        key: &SortKey,
    ) -> Result<Vec<Document>> {
        let handle = self.index_handle(index)?;
        let mut entries: Vec<(String, Vec<String>)> =
            handle.engine.lock().all_keys()?.into_iter().collect();
        entries.sort_by(|a, b| compare_key_strings(&a.0, &b.0));

        let mut rank: AHashMap<String, usize> = AHashMap::new();
        let mut next = 0usize;
        for (_, posting) in &entries {
            for id in posting {
                if !rank.contains_key(id.as_str()) {
                    rank.insert(id.clone(), next);
                    next += 1;
                }
            }
        }

        let (mut indexed, unindexed): (Vec<Document>, Vec<Document>) = docs
            .into_iter()
            .partition(|doc| rank.contains_key(doc.id.as_str()));
        indexed.sort_by_key(|doc| rank.get(doc.id.as_str()).copied().unwrap_or(usize::MAX));

        let mut result = Vec::with_capacity(indexed.len() + unindexed.len());
        match key.direction {
            SortDirection::Asc => {
                result.extend(unindexed);
                result.extend(indexed);
            }
            SortDirection::Desc => {
                indexed.reverse();
                result.extend(indexed);
                result.extend(unindexed);
            }
        }
        Ok(result)
    }

    // ===== population =====

    fn populate_results(&self, docs: &[Document], relations: &[String]) -> Result<Vec<Value>> {
        let db = self.db.upgrade().ok_or(ShardBaseError::DatabaseClosed)?;

        let mut results = Vec::with_capacity(docs.len());
        for doc in docs {
            let mut value = doc.to_value();
            for relation_name in relations {
                let relation = self.schema.relations.get(relation_name).ok_or_else(|| {
                    ShardBaseError::InvalidQuery(format!(
                        "unknown relation '{}' in populate",
                        relation_name
                    ))
                })?;
                let Some(raw) = doc.get(relation_name) else {
                    continue;
                };
                if raw.is_null() {
                    continue;
                }

                let target = DatabaseInner::collection_existing(&db, &relation.collection)?;
                let populated = match &raw {
                    Value::Array(items) => Value::Array(
                        items
                            .iter()
                            .map(|item| {
                                resolve_relation_target(&target, relation, item)
                                    .map(|resolved| resolved.unwrap_or_else(|| item.clone()))
                            })
                            .collect::<Result<Vec<Value>>>()?,
                    ),
                    other => resolve_relation_target(&target, relation, other)?
                        .unwrap_or_else(|| other.clone()),
                };

                if let Value::Object(map) = &mut value {
                    map.insert(relation_name.clone(), populated);
                }
            }
            results.push(value);
        }
        Ok(results)
    }

    // ===== shared helpers =====

    fn index_handle(&self, name: &str) -> Result<&IndexHandle> {
        self.indices
            .iter()
            .find(|handle| handle.name == name)
            .ok_or_else(|| ShardBaseError::IndexError(format!("unknown index '{}'", name)))
    }

    fn probe_len(&self, index: &str, value: &Value) -> usize {
        self.index_handle(index)
            .ok()
            .and_then(|handle| {
                handle
                    .engine
                    .lock()
                    .get_exact(std::slice::from_ref(value))
                    .ok()
            })
            .map(|ids| ids.len())
            .unwrap_or(0)
    }

    /// Materialize documents for a list of ids, skipping ids whose file has
    /// vanished (stale index entries do not fail a query).
    fn load_documents(&self, ids: &[String]) -> Result<Vec<Document>> {
        let mut docs = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(doc) = self.store.load_document(id)? {
                docs.push(doc);
            }
        }
        Ok(docs)
    }
}

/// Look up one relation value in its target collection. `None` when the
/// reference does not resolve (the caller keeps the raw value).
fn resolve_relation_target(
    target: &Collection,
    relation: &Relation,
    reference: &Value,
) -> Result<Option<Value>> {
    if relation.field == "id" {
        let Some(id) = reference.as_str() else {
            return Ok(None);
        };
        return target.get_by_id(id);
    }
    Ok(target
        .store
        .all_documents()
        .find(|doc| matches_condition(doc, &relation.field, reference))
        .map(|doc| doc.to_value()))
}

fn direct_eq_leaves(children: &[Condition]) -> Vec<EqLeaf> {
    children
        .iter()
        .filter_map(|child| match child {
            Condition::Eq(leaf) => Some(leaf.clone()),
            _ => None,
        })
        .collect()
}

fn collect_eq_fields(condition: &Condition) -> Vec<String> {
    fn walk(condition: &Condition, out: &mut Vec<String>) {
        match condition {
            Condition::Eq(leaf) => {
                if !out.contains(&leaf.field) {
                    out.push(leaf.field.clone());
                }
            }
            Condition::And(children) | Condition::Or(children) => {
                for child in children {
                    walk(child, out);
                }
            }
        }
    }
    let mut out = Vec::new();
    walk(condition, &mut out);
    out
}

fn intersect_by_id(sets: Vec<Vec<Document>>) -> Vec<Document> {
    let mut iter = sets.into_iter();
    let Some(mut current) = iter.next() else {
        return Vec::new();
    };
    for set in iter {
        if current.is_empty() {
            return Vec::new();
        }
        let keep: AHashSet<&str> = set.iter().map(|doc| doc.id.as_str()).collect();
        current.retain(|doc| keep.contains(doc.id.as_str()));
    }
    current
}

fn union_by_id(sets: Vec<Vec<Document>>) -> Vec<Document> {
    let mut seen = AHashSet::new();
    let mut result = Vec::new();
    for set in sets {
        for doc in set {
            if seen.insert(doc.id.clone()) {
                result.push(doc);
            }
        }
    }
    result
}

/// Numeric-aware ordering for single-field index keys: numbers compare as
/// numbers, everything else lexicographically.
fn compare_key_strings(a: &str, b: &str) -> std::cmp::Ordering {
    match (a.parse::<f64>(), b.parse::<f64>()) {
        (Ok(na), Ok(nb)) => na.partial_cmp(&nb).unwrap_or(std::cmp::Ordering::Equal),
        _ => a.cmp(b),
    }
}
