//! Error types for the migration library.

use thiserror::Error;

/// Process exit code for configuration errors (bad YAML, invalid graph).
pub const EXIT_CONFIG_ERROR: u8 = 1;
/// Process exit code for store connection or query failures.
pub const EXIT_STORE_ERROR: u8 = 2;
/// Process exit code when the destination is not in a state the run accepts.
pub const EXIT_PRECONDITION_ERROR: u8 = 3;
/// Process exit code for referential integrity failures detected mid-run.
pub const EXIT_INTEGRITY_ERROR: u8 = 4;
/// Process exit code for a run that finished but skipped rows.
pub const EXIT_ROW_ERRORS: u8 = 5;
/// Process exit code for file system errors.
pub const EXIT_IO_ERROR: u8 = 7;
/// Process exit code after SIGINT/SIGTERM.
pub const EXIT_CANCELLED: u8 = 130;

/// Main error type for migration operations.
#[derive(Error, Debug)]
pub enum MigrateError {
    /// Configuration error (invalid YAML, missing fields, bad entity graph, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Store connection or query error with context
    #[error("Store error: {message}\n  Context: {context}")]
    Pool { message: String, context: String },

    /// A source key was registered twice with different destination keys.
    #[error(
        "Identity conflict for {kind}: source key {source_key} -> {attempted} collides with existing mapping to {existing}"
    )]
    Conflict {
        kind: String,
        source_key: i64,
        existing: i64,
        attempted: i64,
    },

    /// A foreign key could not be resolved and deferral was not permitted.
    #[error("Unresolved reference to {referenced} #{source_key} ({context})")]
    UnresolvedReference {
        referenced: String,
        source_key: i64,
        context: String,
    },

    /// Natural-key lookup matched more than one destination row.
    #[error("Ambiguous match for {kind}: {matches} destination rows match {key}")]
    AmbiguousMatch {
        kind: String,
        key: String,
        matches: usize,
    },

    /// The non-deferred foreign-key graph contains a cycle.
    #[error("Cyclic dependency among entity kinds: {}", .0.join(" -> "))]
    CyclicDependency(Vec<String>),

    /// A single row could not be persisted; recorded and skipped.
    #[error("Failed to persist {kind} row {source_key:?}: {message}")]
    RowPersist {
        kind: String,
        source_key: Option<i64>,
        message: String,
    },

    /// The destination rejected an insert because of a unique constraint.
    #[error("Unique constraint violated on {table}: {message}")]
    UniqueViolation { table: String, message: String },

    /// The destination is not in a state this run is allowed to touch.
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// A value-map lookup had no entry and the map does not declare a fallback.
    #[error("No mapping for {kind}.{field} value '{value}'")]
    UnmappedValue {
        kind: String,
        field: String,
        value: String,
    },

    /// A key column held something that is not an integer key.
    #[error("Invalid key in {kind}.{field}: '{value}'")]
    InvalidKey {
        kind: String,
        field: String,
        value: String,
    },

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Migration was cancelled (SIGINT, etc.)
    #[error("Migration cancelled")]
    Cancelled,
}

impl MigrateError {
    /// Create a store error with context about where it occurred.
    pub fn pool(message: impl std::fmt::Display, context: impl Into<String>) -> Self {
        MigrateError::Pool {
            message: message.to_string(),
            context: context.into(),
        }
    }

    /// Create a row persistence error.
    pub fn row(kind: impl Into<String>, source_key: Option<i64>, message: impl Into<String>) -> Self {
        MigrateError::RowPersist {
            kind: kind.into(),
            source_key,
            message: message.into(),
        }
    }

    /// Whether this error must abort the whole run.
    ///
    /// Per-row failures are collected into the run summary instead.
    pub fn is_fatal(&self) -> bool {
        !matches!(
            self,
            MigrateError::RowPersist { .. }
                | MigrateError::UniqueViolation { .. }
                | MigrateError::InvalidKey { .. }
        )
    }

    /// Map the error to a process exit code.
    pub fn exit_code(&self) -> u8 {
        match self {
            MigrateError::Config(_)
            | MigrateError::Yaml(_)
            | MigrateError::Json(_)
            | MigrateError::CyclicDependency(_)
            | MigrateError::UnmappedValue { .. } => EXIT_CONFIG_ERROR,
            MigrateError::Pool { .. } => EXIT_STORE_ERROR,
            MigrateError::Precondition(_) => EXIT_PRECONDITION_ERROR,
            MigrateError::Conflict { .. }
            | MigrateError::UnresolvedReference { .. }
            | MigrateError::AmbiguousMatch { .. } => EXIT_INTEGRITY_ERROR,
            MigrateError::RowPersist { .. }
            | MigrateError::UniqueViolation { .. }
            | MigrateError::InvalidKey { .. } => EXIT_ROW_ERRORS,
            MigrateError::Io(_) => EXIT_IO_ERROR,
            MigrateError::Cancelled => EXIT_CANCELLED,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for migration operations.
pub type Result<T> = std::result::Result<T, MigrateError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_row_errors_are_not_fatal() {
        assert!(!MigrateError::row("bug", Some(3), "boom").is_fatal());
        assert!(!MigrateError::UniqueViolation {
            table: "t".into(),
            message: "dup".into()
        }
        .is_fatal());
        assert!(MigrateError::Precondition("x".into()).is_fatal());
        assert!(MigrateError::CyclicDependency(vec!["a".into(), "b".into()]).is_fatal());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(MigrateError::Config("x".into()).exit_code(), EXIT_CONFIG_ERROR);
        assert_eq!(
            MigrateError::Precondition("x".into()).exit_code(),
            EXIT_PRECONDITION_ERROR
        );
        assert_eq!(
            MigrateError::AmbiguousMatch {
                kind: "category".into(),
                key: "name=UI".into(),
                matches: 2
            }
            .exit_code(),
            EXIT_INTEGRITY_ERROR
        );
        assert_eq!(MigrateError::Cancelled.exit_code(), EXIT_CANCELLED);
    }

    #[test]
    fn test_cycle_message_lists_kinds() {
        let err = MigrateError::CyclicDependency(vec!["a".into(), "b".into()]);
        assert_eq!(err.to_string(), "Cyclic dependency among entity kinds: a -> b");
    }
}
