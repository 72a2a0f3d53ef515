// shardbase-core/src/index.rs
// Sharded on-disk secondary index: composite keys hashed across N shard
// files, each a JSON map of composite key -> posting list of document ids.

use std::fs;
use std::path::PathBuf;

use ahash::AHashSet;
use serde_json::Value;

use crate::document::Document;
use crate::error::{Result, ShardBaseError};
use crate::log_warn;
use crate::normalize::{join_key, key_matches_prefix, normalize, split_key};
use crate::shard_cache::{ShardCache, ShardData, DEFAULT_CACHE_CAPACITY};
use crate::storage::atomic_write;

pub const DEFAULT_SHARD_COUNT: usize = 16;

/// On-disk state of an index, as seen by the health check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexDiskStatus {
    /// At least one shard file exists and every existing shard parses.
    Present,
    /// No shard file exists (never built, or empty index).
    Missing,
    /// At least one shard file exists but fails to parse.
    Corrupted,
}

/// One named index over an ordered list of fields.
///
/// Every mutation loads the target shard, edits the posting map in memory
/// and rewrites the whole shard file through a temp-file rename, so readers
/// never observe a partial write. Lookups that cannot be routed to a single
/// shard (prefix, range, all_keys) scan every shard.
#[derive(Debug)]
pub struct ShardedIndex {
    name: String,
    fields: Vec<String>,
    shard_count: usize,
    dir: PathBuf,
    cache: ShardCache,
}

impl ShardedIndex {
    pub fn new(name: String, fields: Vec<String>, dir: PathBuf, shard_count: usize) -> Self {
        debug_assert!(!fields.is_empty(), "index must cover at least one field");
        ShardedIndex {
            name,
            fields,
            shard_count,
            dir,
            cache: ShardCache::new(DEFAULT_CACHE_CAPACITY),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn shard_count(&self) -> usize {
        self.shard_count
    }

    // ===== key encoding and shard routing =====

    /// Encode query values into a (possibly partial) composite key.
    fn encode_segments(&self, values: &[Value]) -> Result<String> {
        let mut segments = Vec::with_capacity(values.len());
        for (i, value) in values.iter().enumerate() {
            let segment = normalize(value).ok_or_else(|| {
                ShardBaseError::IndexError(format!(
                    "value for field '{}' of index '{}' is not indexable",
                    self.fields.get(i).map(String::as_str).unwrap_or("?"),
                    self.name
                ))
            })?;
            segments.push(segment);
        }
        Ok(join_key(&segments))
    }

    /// Shard holding a composite key: first md5 digest byte mod shard count.
    /// Stable for the lifetime of the index (invariant I3).
    fn shard_for_key(&self, key: &str) -> usize {
        let digest = md5::compute(key.as_bytes());
        digest.0[0] as usize % self.shard_count
    }

    fn shard_path(&self, shard_id: usize) -> PathBuf {
        self.dir.join(format!("{}_shard{}.json", self.name, shard_id))
    }

    /// Pull the document's indexed values in declared field order, or `None`
    /// when any field is missing, null, or not a scalar (invariant I4).
    pub fn extract_values(&self, doc: &Document) -> Option<Vec<Value>> {
        let mut values = Vec::with_capacity(self.fields.len());
        for field in &self.fields {
            let value = doc.get(field)?;
            normalize(&value)?;
            values.push(value);
        }
        Some(values)
    }

    // ===== shard residency =====

    fn read_shard_from_disk(&self, shard_id: usize) -> Result<ShardData> {
        let path = self.shard_path(shard_id);
        let contents = match fs::read_to_string(&path) {
            Ok(c) => c,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Ok(ShardData::new());
            }
            Err(err) => return Err(err.into()),
        };

        match serde_json::from_str::<ShardData>(&contents) {
            Ok(data) => Ok(data),
            Err(err) => {
                // Treated as empty; the next successful write recreates it.
                log_warn!(
                    "corrupt shard {} of index '{}': {}",
                    path.display(),
                    self.name,
                    err
                );
                Ok(ShardData::new())
            }
        }
    }

    fn load_shard(&mut self, shard_id: usize) -> Result<&mut ShardData> {
        if self.cache.get(shard_id).is_none() {
            let data = self.read_shard_from_disk(shard_id)?;
            self.cache.insert(shard_id, data);
        }
        self.cache.get_mut(shard_id).ok_or_else(|| {
            ShardBaseError::IndexError(format!(
                "shard {} of index '{}' not resident after load",
                shard_id, self.name
            ))
        })
    }

    fn persist_shard(&mut self, shard_id: usize) -> Result<()> {
        let path = self.shard_path(shard_id);
        let data = self.load_shard(shard_id)?;
        let contents = serde_json::to_string_pretty(data)
            .map_err(|e| ShardBaseError::Serialization(e.to_string()))?;
        atomic_write(&path, &contents)
    }

    // ===== mutation =====

    /// Register `doc_id` under the composite key of `values`. Idempotent:
    /// a posting list holds each id at most once (invariant I1).
    pub fn add(&mut self, values: &[Value], doc_id: &str) -> Result<()> {
        let key = self.encode_segments(values)?;
        let shard_id = self.shard_for_key(&key);

        let shard = self.load_shard(shard_id)?;
        let posting = shard.entry(key).or_default();
        if posting.iter().any(|id| id == doc_id) {
            return Ok(());
        }
        posting.push(doc_id.to_string());
        self.persist_shard(shard_id)
    }

    /// Drop `doc_id` from the composite key of `values`. The key itself is
    /// dropped when its posting list empties (invariant I2).
    pub fn remove(&mut self, values: &[Value], doc_id: &str) -> Result<()> {
        let key = self.encode_segments(values)?;
        let shard_id = self.shard_for_key(&key);

        let shard = self.load_shard(shard_id)?;
        let mut changed = false;
        if let Some(posting) = shard.get_mut(&key) {
            let before = posting.len();
            posting.retain(|id| id != doc_id);
            changed = posting.len() != before;
            if posting.is_empty() {
                shard.remove(&key);
            }
        }
        if changed {
            self.persist_shard(shard_id)?;
        }
        Ok(())
    }

    // ===== lookups =====

    /// Posting list for a fully specified key. Requires one value per
    /// indexed field.
    pub fn get_exact(&mut self, values: &[Value]) -> Result<Vec<String>> {
        if values.len() != self.fields.len() {
            return Err(ShardBaseError::IndexError(format!(
                "index '{}' expects {} values for exact lookup, got {}",
                self.name,
                self.fields.len(),
                values.len()
            )));
        }
        let key = self.encode_segments(values)?;
        let shard_id = self.shard_for_key(&key);
        let shard = self.load_shard(shard_id)?;
        Ok(shard.get(&key).cloned().unwrap_or_default())
    }

    /// Union of posting lists whose key starts with the given prefix.
    /// Scans every shard — the key hash gives no routing for partial keys.
    pub fn get_prefix(&mut self, prefix_values: &[Value]) -> Result<Vec<String>> {
        if prefix_values.is_empty() || prefix_values.len() >= self.fields.len() {
            return Err(ShardBaseError::IndexError(format!(
                "index '{}' prefix lookup needs between 1 and {} values, got {}",
                self.name,
                self.fields.len() - 1,
                prefix_values.len()
            )));
        }
        let prefix_key = self.encode_segments(prefix_values)?;

        let mut seen = AHashSet::new();
        let mut result = Vec::new();
        for shard_id in 0..self.shard_count {
            let shard = self.load_shard(shard_id)?;
            for (key, posting) in shard.iter() {
                if key_matches_prefix(key, &prefix_key) {
                    for id in posting {
                        if seen.insert(id.clone()) {
                            result.push(id.clone());
                        }
                    }
                }
            }
        }
        Ok(result)
    }

    /// Prefix scan with a numeric window on the final key segment.
    /// The prefix may be empty (range over a single-field index) but must
    /// leave the last field unspecified.
    pub fn get_range(
        &mut self,
        prefix_values: &[Value],
        min_last: f64,
        max_last: f64,
    ) -> Result<Vec<String>> {
        if prefix_values.len() >= self.fields.len() {
            return Err(ShardBaseError::IndexError(format!(
                "index '{}' range lookup needs fewer than {} prefix values, got {}",
                self.name,
                self.fields.len(),
                prefix_values.len()
            )));
        }
        let prefix_key = self.encode_segments(prefix_values)?;

        let mut seen = AHashSet::new();
        let mut result = Vec::new();
        for shard_id in 0..self.shard_count {
            let shard = self.load_shard(shard_id)?;
            for (key, posting) in shard.iter() {
                if !prefix_key.is_empty() && !key_matches_prefix(key, &prefix_key) {
                    continue;
                }
                let last = match split_key(key).last() {
                    Some(segment) => match segment.parse::<f64>() {
                        Ok(v) => v,
                        Err(_) => continue,
                    },
                    None => continue,
                };
                if last < min_last || last > max_last {
                    continue;
                }
                for id in posting {
                    if seen.insert(id.clone()) {
                        result.push(id.clone());
                    }
                }
            }
        }
        Ok(result)
    }

    /// Concatenated key → postings map across every shard. Each composite
    /// key lives in exactly one shard, so merging never collides.
    pub fn all_keys(&mut self) -> Result<ShardData> {
        let mut merged = ShardData::new();
        for shard_id in 0..self.shard_count {
            let data = match self.cache.get(shard_id) {
                Some(resident) => resident.clone(),
                None => self.read_shard_from_disk(shard_id)?,
            };
            merged.extend(data);
        }
        Ok(merged)
    }

    // ===== rebuild =====

    /// Full rebuild: drop every shard file, stream the documents, write all
    /// non-empty shards back atomically. Documents missing any indexed
    /// field are skipped.
    pub fn build_from_documents<I>(&mut self, documents: I) -> Result<()>
    where
        I: IntoIterator<Item = Document>,
    {
        self.delete_shard_files()?;

        let mut shards: Vec<ShardData> = (0..self.shard_count).map(|_| ShardData::new()).collect();
        for doc in documents {
            let Some(values) = self.extract_values(&doc) else {
                continue;
            };
            let key = self.encode_segments(&values)?;
            let shard_id = self.shard_for_key(&key);
            let posting = shards[shard_id].entry(key).or_default();
            if !posting.iter().any(|id| id == &doc.id) {
                posting.push(doc.id.clone());
            }
        }

        for (shard_id, data) in shards.into_iter().enumerate() {
            if data.is_empty() {
                continue;
            }
            let contents = serde_json::to_string_pretty(&data)
                .map_err(|e| ShardBaseError::Serialization(e.to_string()))?;
            atomic_write(&self.shard_path(shard_id), &contents)?;
            self.cache.insert(shard_id, data);
        }
        Ok(())
    }

    /// Remove every shard file of this index from disk and drop residency.
    pub fn delete_shard_files(&mut self) -> Result<()> {
        self.cache.clear();
        for shard_id in 0..self.shard_count {
            match fs::remove_file(self.shard_path(shard_id)) {
                Ok(()) => {}
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(())
    }

    /// Inspect the shard files without loading them into the cache.
    pub fn disk_status(&self) -> IndexDiskStatus {
        let mut any_present = false;
        for shard_id in 0..self.shard_count {
            let path = self.shard_path(shard_id);
            let contents = match fs::read_to_string(&path) {
                Ok(c) => c,
                Err(_) => continue,
            };
            any_present = true;
            if serde_json::from_str::<ShardData>(&contents).is_err() {
                return IndexDiskStatus::Corrupted;
            }
        }
        if any_present {
            IndexDiskStatus::Present
        } else {
            IndexDiskStatus::Missing
        }
    }

    /// Writes are eager, so closing only drops cached shards.
    pub fn close(&mut self) {
        self.cache.clear();
    }
}

/// Composite key for a document against an ordered field list, exposed for
/// callers that only need the encoding (no engine instance).
pub fn composite_key_for(fields: &[String], doc: &Document) -> Option<String> {
    let mut segments = Vec::with_capacity(fields.len());
    for field in fields {
        let value = doc.get(field)?;
        segments.push(normalize(&value)?);
    }
    Some(join_key(&segments))
}

/// True when the two documents produce different composite keys for the
/// given field list (either may produce none at all).
pub fn composite_key_changed(fields: &[String], old: &Document, new: &Document) -> bool {
    composite_key_for(fields, old) != composite_key_for(fields, new)
}
