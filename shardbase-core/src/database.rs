// shardbase-core/src/database.rs
// Database root: the metadata file and the collection catalog.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::collection::Collection;
use crate::error::{Result, ShardBaseError};
use crate::index::DEFAULT_SHARD_COUNT;
use crate::log_info;
use crate::schema::Schema;
use crate::storage::{atomic_write, DEFAULT_SUB_SHARD_COUNT};

pub const METADATA_FILE: &str = "_db_metadata.json";
pub const DB_VERSION: &str = "1.0";

/// Tunables shared by every collection of one database.
#[derive(Debug, Clone, Copy)]
pub struct DatabaseOptions {
    /// Shard files per index.
    pub shard_count: usize,
    /// Sub-shard directories per primary document shard.
    pub sub_shard_count: usize,
    /// On open, attach declared indices without rebuilding them.
    pub skip_initial_index_build: bool,
}

impl Default for DatabaseOptions {
    fn default() -> Self {
        DatabaseOptions {
            shard_count: DEFAULT_SHARD_COUNT,
            sub_shard_count: DEFAULT_SUB_SHARD_COUNT,
            skip_initial_index_build: false,
        }
    }
}

/// `_db_metadata.json`: the authoritative record of what this database
/// contains, including each collection's schema at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbMetadata {
    pub version: String,
    pub created: String,
    pub collections: BTreeMap<String, CollectionEntry>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CollectionEntry {
    pub schema: Schema,
    pub created: String,
}

impl DbMetadata {
    fn new() -> Self {
        DbMetadata {
            version: DB_VERSION.to_string(),
            created: chrono::Utc::now().to_rfc3339(),
            collections: BTreeMap::new(),
        }
    }
}

#[derive(Debug)]
pub(crate) struct DatabaseInner {
    root: PathBuf,
    options: DatabaseOptions,
    metadata: RwLock<DbMetadata>,
    collections: RwLock<BTreeMap<String, Arc<Collection>>>,
}

/// Handle to one ShardBase database directory.
///
/// Cloning is cheap; all clones share the same collection catalog.
#[derive(Clone, Debug)]
pub struct Database {
    inner: Arc<DatabaseInner>,
}

impl Database {
    /// Create a fresh database. The target directory must be absent or
    /// empty.
    pub fn create<P: AsRef<Path>>(path: P, options: DatabaseOptions) -> Result<Database> {
        let root = path.as_ref().to_path_buf();

        if root.exists() && fs::read_dir(&root)?.next().is_some() {
            return Err(ShardBaseError::NotEmptyDatabase(
                root.to_string_lossy().to_string(),
            ));
        }
        fs::create_dir_all(&root)?;

        let metadata = DbMetadata::new();
        save_metadata(&root, &metadata)?;
        log_info!("created database at {}", root.display());

        Ok(Database {
            inner: Arc::new(DatabaseInner {
                root,
                options,
                metadata: RwLock::new(metadata),
                collections: RwLock::new(BTreeMap::new()),
            }),
        })
    }

    /// Open an existing database. The metadata file is mandatory;
    /// collections are discovered from it and attached lazily.
    pub fn open<P: AsRef<Path>>(path: P, options: DatabaseOptions) -> Result<Database> {
        let root = path.as_ref().to_path_buf();
        let metadata_path = root.join(METADATA_FILE);

        let contents = match fs::read_to_string(&metadata_path) {
            Ok(c) => c,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(ShardBaseError::MissingDatabase(
                    root.to_string_lossy().to_string(),
                ));
            }
            Err(err) => return Err(err.into()),
        };
        let metadata: DbMetadata = serde_json::from_str(&contents)
            .map_err(|e| ShardBaseError::Serialization(format!("bad metadata file: {}", e)))?;

        Ok(Database {
            inner: Arc::new(DatabaseInner {
                root,
                options,
                metadata: RwLock::new(metadata),
                collections: RwLock::new(BTreeMap::new()),
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.inner.root
    }

    /// Get a collection. Known collections attach with their stored schema;
    /// unknown names are created when `schema` is supplied and rejected
    /// otherwise.
    pub fn collection(&self, name: &str, schema: Option<Value>) -> Result<Arc<Collection>> {
        DatabaseInner::collection_or_create(&self.inner, name, schema)
    }

    /// Drop a collection: its directory, its metadata entry and its handle.
    pub fn drop_collection(&self, name: &str) -> Result<()> {
        let inner = &self.inner;

        if let Some(collection) = inner.collections.write().remove(name) {
            collection.close();
        }

        {
            let mut metadata = inner.metadata.write();
            if metadata.collections.remove(name).is_none() {
                return Err(ShardBaseError::CollectionNotFound(name.to_string()));
            }
            save_metadata(&inner.root, &metadata)?;
        }

        match fs::remove_dir_all(inner.root.join(name)) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// Collection names declared in the metadata.
    pub fn list_collections(&self) -> Vec<String> {
        self.inner.metadata.read().collections.keys().cloned().collect()
    }

    /// Recursive copy of the database directory. The target must be absent
    /// or empty.
    pub fn backup<P: AsRef<Path>>(&self, target: P) -> Result<()> {
        let target = target.as_ref();
        if target.exists() && fs::read_dir(target)?.next().is_some() {
            return Err(ShardBaseError::NotEmptyDatabase(
                target.to_string_lossy().to_string(),
            ));
        }
        copy_dir_recursive(&self.inner.root, target)
    }

    /// Release every attached collection (drops their shard caches).
    /// The handle stays usable; collections re-attach on next access.
    pub fn close(&self) {
        let mut collections = self.inner.collections.write();
        for collection in collections.values() {
            collection.close();
        }
        collections.clear();
    }
}

impl DatabaseInner {
    /// Existing collections only — the path relation checks and population
    /// go through.
    pub(crate) fn collection_existing(this: &Arc<Self>, name: &str) -> Result<Arc<Collection>> {
        Self::collection_or_create(this, name, None)
    }

    fn collection_or_create(
        this: &Arc<Self>,
        name: &str,
        schema: Option<Value>,
    ) -> Result<Arc<Collection>> {
        validate_collection_name(name)?;

        let mut collections = this.collections.write();
        if let Some(existing) = collections.get(name) {
            return Ok(Arc::clone(existing));
        }

        let declared = this.metadata.read().collections.get(name).cloned();
        let (schema, already_exists) = match declared {
            Some(entry) => (entry.schema, true),
            None => {
                let Some(schema_value) = schema else {
                    return Err(ShardBaseError::CollectionNotFound(name.to_string()));
                };
                let schema = Schema::from_value(schema_value)?;
                schema.validate_declaration()?;

                let mut metadata = this.metadata.write();
                metadata.collections.insert(
                    name.to_string(),
                    CollectionEntry {
                        schema: schema.clone(),
                        created: chrono::Utc::now().to_rfc3339(),
                    },
                );
                save_metadata(&this.root, &metadata)?;
                (schema, false)
            }
        };

        let collection = Arc::new(Collection::open(
            name.to_string(),
            this.root.join(name),
            schema,
            Arc::downgrade(this),
            this.options.shard_count,
            this.options.sub_shard_count,
            this.options.skip_initial_index_build,
            already_exists,
        )?);
        collections.insert(name.to_string(), Arc::clone(&collection));
        Ok(collection)
    }
}

fn save_metadata(root: &Path, metadata: &DbMetadata) -> Result<()> {
    let contents = serde_json::to_string_pretty(metadata)
        .map_err(|e| ShardBaseError::Serialization(e.to_string()))?;
    atomic_write(&root.join(METADATA_FILE), &contents)
}

fn validate_collection_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('_')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-');
    if valid {
        Ok(())
    } else {
        Err(ShardBaseError::Validation(format!(
            "invalid collection name '{}'",
            name
        )))
    }
}

fn copy_dir_recursive(from: &Path, to: &Path) -> Result<()> {
    fs::create_dir_all(to)?;
    for entry in fs::read_dir(from)? {
        let entry = entry?;
        let source = entry.path();
        let dest = to.join(entry.file_name());
        if source.is_dir() {
            copy_dir_recursive(&source, &dest)?;
        } else {
            fs::copy(&source, &dest)?;
        }
    }
    Ok(())
}
