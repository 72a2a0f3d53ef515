// shardbase-core/src/error.rs
// Error types shared across the crate

use thiserror::Error;

/// All errors surfaced by ShardBase
#[derive(Debug, Error)]
pub enum ShardBaseError {
    /// Document failed schema validation (missing required field, wrong type)
    #[error("Validation error: {0}")]
    Validation(String),

    /// A relation-bearing value did not resolve in its target collection
    #[error("Relation error: {0}")]
    Relation(String),

    /// Update targeted a document id that does not exist
    #[error("Document not found: {0}")]
    NotFound(String),

    /// Collection is not declared in the database metadata
    #[error("Collection not found: {0}")]
    CollectionNotFound(String),

    /// `open` on a directory that is not a ShardBase database
    #[error("No database at {0}")]
    MissingDatabase(String),

    /// `create` on a directory that already has content
    #[error("Directory not empty: {0}")]
    NotEmptyDatabase(String),

    /// Index lookup with wrong arity, unknown index name, etc.
    #[error("Index error: {0}")]
    IndexError(String),

    /// The planner produced no admissible strategy (full scan always is,
    /// so hitting this means a planner bug)
    #[error("Planner error: {0}")]
    Planner(String),

    /// Malformed query input (unparseable `where` tree, bad orderBy, ...)
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Operation through a handle whose database has been dropped
    #[error("Database handle is closed")]
    DatabaseClosed,

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, ShardBaseError>;

impl ShardBaseError {
    /// Classify errors that callers commonly branch on.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            ShardBaseError::NotFound(_) | ShardBaseError::CollectionNotFound(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ShardBaseError::Validation("field 'age' must be a number".to_string());
        assert_eq!(
            err.to_string(),
            "Validation error: field 'age' must be a number"
        );

        let err = ShardBaseError::NotFound("abc".to_string());
        assert!(err.is_not_found());
        assert_eq!(err.to_string(), "Document not found: abc");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied");
        let err: ShardBaseError = io_err.into();
        assert!(matches!(err, ShardBaseError::Io(_)));
    }
}
