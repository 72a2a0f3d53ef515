// shardbase-core/src/collection.rs
// Collection facade: validate -> persist -> index fan-out, plus rebuild and
// health reporting. The find() pipeline lives in executor.rs.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;

use parking_lot::Mutex;
use serde_json::{Map, Value};

use crate::database::DatabaseInner;
use crate::document::Document;
use crate::error::{Result, ShardBaseError};
use crate::index::{composite_key_changed, IndexDiskStatus, ShardedIndex};
use crate::log_debug;
use crate::schema::Schema;
use crate::storage::DocumentStore;

pub const INDICES_DIR: &str = "_indices";

/// One declared index: its field list (lock-free, for planning) and the
/// engine behind a lock (lookups mutate the shard cache).
#[derive(Debug)]
pub(crate) struct IndexHandle {
    pub(crate) name: String,
    pub(crate) fields: Vec<String>,
    pub(crate) engine: Mutex<ShardedIndex>,
    /// Set when the index was attached without shard files present; the
    /// first write triggers a transparent full build.
    needs_build: AtomicBool,
}

/// Health report over the declared indices of a collection.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct IndexHealthReport {
    pub expected: Vec<String>,
    pub present: Vec<String>,
    pub missing: Vec<String>,
    pub corrupted: Vec<String>,
}

/// A named collection inside a database.
///
/// All writes serialize behind `write_lock`, which gives read-your-writes
/// to a single client and keeps the document file and its index entries in
/// step. Reads take no collection-wide lock.
#[derive(Debug)]
pub struct Collection {
    name: String,
    pub(crate) schema: Schema,
    pub(crate) store: DocumentStore,
    pub(crate) indices: Vec<IndexHandle>,
    pub(crate) db: Weak<DatabaseInner>,
    write_lock: Mutex<()>,
}

impl Collection {
    /// Attach (and if needed build) a collection at `path`.
    ///
    /// `already_exists` tells whether the collection directory predates this
    /// call: together with `skip_initial_index_build` it decides whether the
    /// declared indices are rebuilt from the current documents or merely
    /// attached (missing shard files read as empty and are recreated by the
    /// next write or rebuild).
    pub(crate) fn open(
        name: String,
        path: PathBuf,
        schema: Schema,
        db: Weak<DatabaseInner>,
        shard_count: usize,
        sub_shard_count: usize,
        skip_initial_index_build: bool,
        already_exists: bool,
    ) -> Result<Self> {
        schema.validate_declaration()?;
        std::fs::create_dir_all(&path)?;

        let store = DocumentStore::new(path.clone(), sub_shard_count);
        let indices_dir = path.join(INDICES_DIR);

        let attach_only = skip_initial_index_build && already_exists;

        let mut indices = Vec::with_capacity(schema.indices.len());
        for (index_name, fields) in &schema.indices {
            let engine = ShardedIndex::new(
                index_name.clone(),
                fields.clone(),
                indices_dir.clone(),
                shard_count,
            );
            // A declared index with no shard files on disk is tolerated on
            // attach; its first write lazy-builds it.
            let needs_build = attach_only && engine.disk_status() == IndexDiskStatus::Missing;
            indices.push(IndexHandle {
                name: index_name.clone(),
                fields: fields.clone(),
                engine: Mutex::new(engine),
                needs_build: AtomicBool::new(needs_build),
            });
        }

        let collection = Collection {
            name,
            schema,
            store,
            indices,
            db,
            write_lock: Mutex::new(()),
        };

        if !attach_only {
            collection.build_all_indices()?;
        }

        Ok(collection)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    // ===== CRUD =====

    /// Insert a JSON object, returning the stored document (id included).
    pub fn insert(&self, doc: Value) -> Result<Value> {
        let fields = into_object(doc, "insert")?;
        let _guard = self.write_lock.lock();

        let doc = Document::with_generated_id(fields);
        self.schema.validate_document(&doc)?;
        if self.schema.validate_relations {
            self.check_relations(&doc)?;
        }

        self.store.save_document(&doc)?;
        self.index_add(&doc)?;

        Ok(doc.to_value())
    }

    /// Shallow-merge `changes` into an existing document and re-persist it.
    /// Indices are only touched where the composite key actually moved.
    pub fn update(&self, id: &str, changes: Value) -> Result<Value> {
        let changes = into_object(changes, "update")?;
        let _guard = self.write_lock.lock();

        let old = self
            .store
            .load_document(id)?
            .ok_or_else(|| ShardBaseError::NotFound(id.to_string()))?;

        let mut updated = old.clone();
        updated.apply_changes(&changes);

        self.schema.validate_document(&updated)?;
        if self.schema.validate_relations {
            self.check_relations(&updated)?;
        }

        self.store.save_document(&updated)?;

        for handle in &self.indices {
            if !composite_key_changed(&handle.fields, &old, &updated) {
                continue;
            }
            self.ensure_built(handle)?;
            let mut engine = handle.engine.lock();
            if let Some(values) = engine.extract_values(&old) {
                engine.remove(&values, id)?;
            }
            if let Some(values) = engine.extract_values(&updated) {
                engine.add(&values, id)?;
            }
        }

        Ok(updated.to_value())
    }

    /// Delete a document and every index entry it participated in.
    /// Returns whether a document was removed.
    pub fn delete(&self, id: &str) -> Result<bool> {
        let _guard = self.write_lock.lock();

        let Some(old) = self.store.load_document(id)? else {
            return Ok(false);
        };

        self.store.delete_document(id)?;
        for handle in &self.indices {
            self.ensure_built(handle)?;
            let mut engine = handle.engine.lock();
            if let Some(values) = engine.extract_values(&old) {
                engine.remove(&values, id)?;
            }
        }
        Ok(true)
    }

    pub fn get_by_id(&self, id: &str) -> Result<Option<Value>> {
        Ok(self.store.load_document(id)?.map(|doc| doc.to_value()))
    }

    pub fn count(&self) -> usize {
        self.store.count_documents()
    }

    // ===== index maintenance =====

    fn index_add(&self, doc: &Document) -> Result<()> {
        for handle in &self.indices {
            self.ensure_built(handle)?;
            let mut engine = handle.engine.lock();
            if let Some(values) = engine.extract_values(doc) {
                engine.add(&values, &doc.id)?;
            }
        }
        Ok(())
    }

    /// Lazy build for indices attached without shard files. Runs at most
    /// once, under the collection write lock.
    fn ensure_built(&self, handle: &IndexHandle) -> Result<()> {
        if handle.needs_build.swap(false, Ordering::SeqCst) {
            let mut engine = handle.engine.lock();
            log_debug!(
                "lazy-building index '{}' of collection '{}'",
                engine.name(),
                self.name
            );
            engine.build_from_documents(self.store.all_documents())?;
        }
        Ok(())
    }

    fn build_all_indices(&self) -> Result<()> {
        for handle in &self.indices {
            let mut engine = handle.engine.lock();
            log_debug!(
                "building index '{}' of collection '{}'",
                engine.name(),
                self.name
            );
            engine.build_from_documents(self.store.all_documents())?;
        }
        Ok(())
    }

    /// Wipe `_indices/` and rebuild every declared index from the current
    /// document set.
    pub fn rebuild_all_indices(&self) -> Result<()> {
        let _guard = self.write_lock.lock();

        let indices_dir = self.store.path().join(INDICES_DIR);
        match std::fs::remove_dir_all(&indices_dir) {
            Ok(()) => {}
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
        for handle in &self.indices {
            handle.needs_build.store(false, Ordering::SeqCst);
            handle.engine.lock().close();
        }
        self.build_all_indices()
    }

    /// Report the on-disk state of every declared index.
    pub fn check_indices_health(&self) -> IndexHealthReport {
        let mut report = IndexHealthReport::default();
        for handle in &self.indices {
            let engine = handle.engine.lock();
            report.expected.push(engine.name().to_string());
            match engine.disk_status() {
                IndexDiskStatus::Present => report.present.push(engine.name().to_string()),
                IndexDiskStatus::Missing => report.missing.push(engine.name().to_string()),
                IndexDiskStatus::Corrupted => report.corrupted.push(engine.name().to_string()),
            }
        }
        report
    }

    /// Drop cached shards on every index engine.
    pub fn close(&self) {
        for handle in &self.indices {
            handle.engine.lock().close();
        }
    }

    // ===== relations =====

    /// Verify that every relation-bearing value on `doc` resolves in its
    /// target collection. Array values must resolve element-wise.
    fn check_relations(&self, doc: &Document) -> Result<()> {
        for (field, relation) in &self.schema.relations {
            let Some(value) = doc.get(field) else {
                continue;
            };
            if value.is_null() {
                continue;
            }

            let refs: Vec<&Value> = match &value {
                Value::Array(items) => items.iter().collect(),
                other => vec![other],
            };
            for reference in refs {
                if !self.resolve_reference(relation, reference)? {
                    return Err(ShardBaseError::Relation(format!(
                        "field '{}' references missing {} in collection '{}'",
                        field, reference, relation.collection
                    )));
                }
            }
        }
        Ok(())
    }

    fn resolve_reference(
        &self,
        relation: &crate::schema::Relation,
        reference: &Value,
    ) -> Result<bool> {
        let db = self.db.upgrade().ok_or(ShardBaseError::DatabaseClosed)?;
        let target = DatabaseInner::collection_existing(&db, &relation.collection)?;

        if relation.field == "id" {
            let Some(id) = reference.as_str() else {
                return Ok(false);
            };
            return Ok(target.store.load_document(id)?.is_some());
        }

        // Non-id targets have no routing; scan for the first match.
        let field = relation.field.clone();
        let reference = reference.clone();
        Ok(target
            .store
            .all_documents()
            .any(|doc| crate::query::matches_condition(&doc, &field, &reference)))
    }
}

fn into_object(value: Value, operation: &str) -> Result<Map<String, Value>> {
    match value {
        Value::Object(map) => Ok(map),
        other => Err(ShardBaseError::Validation(format!(
            "{} expects a JSON object, got {}",
            operation, other
        ))),
    }
}
