//! Store abstractions the engine reads from and writes to.
//!
//! - [`SourceStore`]: read-only access to the tracker being migrated from
//! - [`DestinationStore`]: transactional row store being migrated into
//!
//! The engine awaits every call in sequence; implementations never see
//! concurrent calls from one run.

use async_trait::async_trait;

use crate::error::Result;

use super::predicate::Predicate;
use super::value::Record;

/// Parameters for a full-table scan.
#[derive(Debug, Clone, Default)]
pub struct SourceQuery {
    /// Table name.
    pub table: String,
    /// Column to order by, normally the primary key.
    pub order_by: Option<String>,
    /// Optional equality filter.
    pub filter: Option<Predicate>,
}

impl SourceQuery {
    pub fn table(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    #[must_use]
    pub fn order_by(mut self, column: impl Into<String>) -> Self {
        self.order_by = Some(column.into());
        self
    }

    #[must_use]
    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filter = Some(predicate);
        self
    }
}

/// Read records from the source tracker.
#[async_trait]
pub trait SourceStore: Send + Sync {
    /// Return every matching row, ordered by `order_by` when given.
    async fn query(&self, query: &SourceQuery) -> Result<Vec<Record>>;

    /// Get the store name for logging.
    fn store_name(&self) -> &str;

    /// Test connectivity.
    async fn test_connection(&self) -> Result<()> {
        Ok(())
    }
}

/// Write records to the destination tracker.
///
/// Mutations join an open unit of work that [`commit`](Self::commit) makes
/// durable. The engine commits after every row.
#[async_trait]
pub trait DestinationStore: Send + Sync {
    /// Insert a row and return the key the store assigned.
    ///
    /// Tables without an auto-increment key return `0`. A unique constraint
    /// failure must be reported as `MigrateError::UniqueViolation`.
    async fn insert(&self, table: &str, fields: &Record) -> Result<i64>;

    /// Update the given fields of the row whose `key_column` equals `key`.
    async fn update(&self, table: &str, key_column: &str, key: i64, fields: &Record)
        -> Result<u64>;

    /// Return all rows matching the predicate.
    async fn find(&self, table: &str, predicate: &Predicate) -> Result<Vec<Record>>;

    /// Count rows in a table.
    async fn count(&self, table: &str) -> Result<i64>;

    /// Delete rows matching the predicate.
    async fn delete(&self, table: &str, predicate: &Predicate) -> Result<u64>;

    /// Remove every row of a table.
    async fn truncate(&self, table: &str) -> Result<()>;

    /// Make all mutations since the last commit durable.
    async fn commit(&self) -> Result<()>;

    /// Get the store name for logging.
    fn store_name(&self) -> &str;

    /// Test connectivity.
    async fn test_connection(&self) -> Result<()> {
        Ok(())
    }
}
