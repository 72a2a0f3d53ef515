// shardbase-core/src/storage.rs
// Two-level sharded document storage: collection/HHH/SSS/<id>.json

use std::fs;
use std::path::{Path, PathBuf};

use crate::document::Document;
use crate::error::Result;
use crate::log_warn;

pub const DEFAULT_SUB_SHARD_COUNT: usize = 16;
pub const PRIMARY_SHARD_COUNT: usize = 256;

/// Write `contents` to `path` through a sibling temp file and an atomic
/// rename. Readers see either the previous committed file or the new one,
/// never a partial write. The temp file is unlinked when anything fails.
pub(crate) fn atomic_write(path: &Path, contents: &str) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension(match path.extension() {
        Some(ext) => format!("{}.tmp", ext.to_string_lossy()),
        None => "tmp".to_string(),
    });

    let write_result = fs::write(&tmp_path, contents)
        .and_then(|_| fs::rename(&tmp_path, path));

    if let Err(err) = write_result {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.into());
    }
    Ok(())
}

/// Document storage for one collection.
///
/// Documents live at `HHH/SSS/<id>.json` under the collection directory,
/// where both levels are derived from the md5 digest of the id. The hash
/// routing is deterministic, so any process can locate a document without
/// consulting an index.
#[derive(Debug, Clone)]
pub struct DocumentStore {
    path: PathBuf,
    sub_shard_count: usize,
}

impl DocumentStore {
    pub fn new(path: PathBuf, sub_shard_count: usize) -> Self {
        DocumentStore {
            path,
            sub_shard_count,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Primary shard directory name: first digest byte, zero-padded.
    fn primary_shard(&self, id: &str) -> String {
        let digest = md5::compute(id.as_bytes());
        format!("{:03}", digest.0[0] as usize % PRIMARY_SHARD_COUNT)
    }

    /// Sub-shard directory name: second digest byte mod the configured count.
    fn sub_shard(&self, id: &str) -> String {
        let digest = md5::compute(id.as_bytes());
        format!("{:03}", digest.0[1] as usize % self.sub_shard_count)
    }

    pub fn document_path(&self, id: &str) -> PathBuf {
        self.path
            .join(self.primary_shard(id))
            .join(self.sub_shard(id))
            .join(format!("{}.json", id))
    }

    /// Serialize and persist a document atomically, creating shard
    /// directories on demand.
    pub fn save_document(&self, doc: &Document) -> Result<()> {
        let contents = serde_json::to_string_pretty(&doc.to_value())
            .map_err(|e| crate::error::ShardBaseError::Serialization(e.to_string()))?;
        atomic_write(&self.document_path(&doc.id), &contents)
    }

    /// Load a document, or `None` when absent. A file that exists but does
    /// not parse is reported as missing with a warning so one corrupt file
    /// cannot fail a whole query.
    pub fn load_document(&self, id: &str) -> Result<Option<Document>> {
        let path = self.document_path(id);
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };

        match serde_json::from_str::<Document>(&contents) {
            Ok(doc) => Ok(Some(doc)),
            Err(err) => {
                log_warn!("corrupt document file {}: {}", path.display(), err);
                Ok(None)
            }
        }
    }

    /// Remove a document file. Returns whether anything was removed.
    pub fn delete_document(&self, id: &str) -> Result<bool> {
        let path = self.document_path(id);
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }

    /// Lazy walk of every primary shard and sub-shard. Unreadable files are
    /// skipped with a warning. Iteration order is filesystem-dependent.
    pub fn all_documents(&self) -> DocumentIter {
        let primaries = list_dirs(&self.path);
        DocumentIter {
            primaries,
            subs: Vec::new(),
            files: Vec::new(),
        }
    }

    pub fn count_documents(&self) -> usize {
        self.all_documents().count()
    }
}

fn list_dirs(path: &Path) -> Vec<PathBuf> {
    let mut dirs = Vec::new();
    if let Ok(entries) = fs::read_dir(path) {
        for entry in entries.flatten() {
            let entry_path = entry.path();
            let name = entry.file_name();
            let name = name.to_string_lossy();
            // Index shards and metadata live in underscore-prefixed entries.
            if entry_path.is_dir() && !name.starts_with('_') {
                dirs.push(entry_path);
            }
        }
    }
    dirs
}

fn list_json_files(path: &Path) -> Vec<PathBuf> {
    let mut files = Vec::new();
    if let Ok(entries) = fs::read_dir(path) {
        for entry in entries.flatten() {
            let entry_path = entry.path();
            if entry_path.extension().map(|e| e == "json").unwrap_or(false) {
                files.push(entry_path);
            }
        }
    }
    files
}

/// Iterator over every document in a collection. One directory listing is
/// resident at a time; file contents are read per `next()` call.
pub struct DocumentIter {
    primaries: Vec<PathBuf>,
    subs: Vec<PathBuf>,
    files: Vec<PathBuf>,
}

impl Iterator for DocumentIter {
    type Item = Document;

    fn next(&mut self) -> Option<Document> {
        loop {
            if let Some(file) = self.files.pop() {
                match fs::read_to_string(&file) {
                    Ok(contents) => match serde_json::from_str::<Document>(&contents) {
                        Ok(doc) => return Some(doc),
                        Err(err) => {
                            log_warn!("skipping corrupt document {}: {}", file.display(), err);
                        }
                    },
                    Err(err) => {
                        log_warn!("skipping unreadable document {}: {}", file.display(), err);
                    }
                }
                continue;
            }

            if let Some(sub) = self.subs.pop() {
                self.files = list_json_files(&sub);
                continue;
            }

            let primary = self.primaries.pop()?;
            self.subs = list_dirs(&primary);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn store(dir: &TempDir) -> DocumentStore {
        DocumentStore::new(dir.path().join("users"), DEFAULT_SUB_SHARD_COUNT)
    }

    fn doc(id: &str, fields: serde_json::Value) -> Document {
        Document::new(id.to_string(), fields.as_object().unwrap().clone())
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let d = doc("doc-1", json!({"name": "Alice", "age": 30}));
        store.save_document(&d).unwrap();

        let loaded = store.load_document("doc-1").unwrap().unwrap();
        assert_eq!(loaded, d);
    }

    #[test]
    fn test_load_missing_returns_none() {
        let dir = TempDir::new().unwrap();
        assert!(store(&dir).load_document("nope").unwrap().is_none());
    }

    #[test]
    fn test_shard_routing_is_deterministic() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        let p1 = store.document_path("doc-1");
        let p2 = store.document_path("doc-1");
        assert_eq!(p1, p2);

        // Path has the shape users/HHH/SSS/doc-1.json
        let components: Vec<String> = p1
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect();
        let n = components.len();
        assert_eq!(components[n - 1], "doc-1.json");
        assert_eq!(components[n - 2].len(), 3);
        assert_eq!(components[n - 3].len(), 3);
        let sub: usize = components[n - 2].parse().unwrap();
        assert!(sub < DEFAULT_SUB_SHARD_COUNT);
    }

    #[test]
    fn test_delete_document() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.save_document(&doc("d", json!({"x": 1}))).unwrap();
        assert!(store.delete_document("d").unwrap());
        assert!(!store.delete_document("d").unwrap());
        assert!(store.load_document("d").unwrap().is_none());
    }

    #[test]
    fn test_all_documents_enumeration() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        for i in 0..25 {
            store
                .save_document(&doc(&format!("doc-{}", i), json!({"n": i})))
                .unwrap();
        }

        let mut ids: Vec<String> = store.all_documents().map(|d| d.id).collect();
        ids.sort();
        assert_eq!(ids.len(), 25);
        assert!(ids.contains(&"doc-0".to_string()));
        assert!(ids.contains(&"doc-24".to_string()));
    }

    #[test]
    fn test_enumeration_skips_corrupt_files() {
        let dir = TempDir::new().unwrap();
        let store = store(&dir);

        store.save_document(&doc("good", json!({"x": 1}))).unwrap();

        // Clobber a second document in place.
        let bad = doc("bad", json!({"x": 2}));
        store.save_document(&bad).unwrap();
        fs::write(store.document_path("bad"), "{not json").unwrap();

        let ids: Vec<String> = store.all_documents().map(|d| d.id).collect();
        assert_eq!(ids, vec!["good".to_string()]);

        // Point load is also fault-isolated.
        assert!(store.load_document("bad").unwrap().is_none());
    }

    #[test]
    fn test_atomic_write_replaces_content() {
        let dir = TempDir::new().unwrap();
        let target = dir.path().join("file.json");

        atomic_write(&target, "{\"v\": 1}").unwrap();
        atomic_write(&target, "{\"v\": 2}").unwrap();

        assert_eq!(fs::read_to_string(&target).unwrap(), "{\"v\": 2}");
        // No temp file pollution after a successful write.
        assert!(!dir.path().join("file.json.tmp").exists());
    }

    #[test]
    fn test_empty_collection_scan_is_empty() {
        let dir = TempDir::new().unwrap();
        assert_eq!(store(&dir).all_documents().count(), 0);
    }
}
