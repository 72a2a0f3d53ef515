// shardbase-core/src/lib.rs
// Embedded, filesystem-backed JSON document database with sharded on-disk
// secondary indices and a selectivity-based query planner.

#![allow(clippy::too_many_arguments)]
#![allow(clippy::result_large_err)]

pub mod collection;
pub mod database;
pub mod document;
pub mod error;
pub mod executor;
pub mod find_options;
pub mod index;
pub mod logging;
pub mod normalize;
pub mod planner;
pub mod query;
pub mod schema;
pub mod shard_cache;
pub mod storage;

// Public exports
pub use collection::{Collection, IndexHealthReport};
pub use database::{Database, DatabaseOptions, DbMetadata};
pub use document::Document;
pub use error::{Result, ShardBaseError};
pub use find_options::{FindQuery, FindResult, SortDirection, SortKey};
pub use index::{IndexDiskStatus, ShardedIndex};
pub use logging::{get_log_level, set_log_level, LogLevel};
pub use planner::{QueryPlan, SortStrategy};
pub use query::{Condition, EqLeaf, PatternMatcher};
pub use schema::{FieldSpec, FieldType, Relation, Schema};
pub use storage::DocumentStore;
