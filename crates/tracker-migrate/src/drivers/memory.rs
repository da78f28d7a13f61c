//! In-memory row store implementing both store traits.
//!
//! Tables are created on first use. Every inserted row gets an integer `id`
//! column from a per-table counter unless the record already carries one.
//! Writes apply immediately; [`DestinationStore::commit`] only counts.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::core::{DestinationStore, Predicate, Record, SourceQuery, SourceStore, SqlValue};
use crate::error::{MigrateError, Result};

const KEY_COLUMN: &str = "id";

#[derive(Debug, Default)]
struct Table {
    rows: Vec<Record>,
    last_id: i64,
}

#[derive(Debug, Default)]
struct Inner {
    tables: BTreeMap<String, Table>,
    unique: HashMap<String, Vec<Vec<String>>>,
    insert_attempts: HashMap<String, usize>,
    failing_inserts: HashMap<String, Vec<usize>>,
    commits: u64,
}

/// Thread-safe in-memory store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    name: String,
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::named("memory")
    }

    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append rows as-is, bypassing constraints and failure injection.
    pub fn seed(&self, table: &str, rows: Vec<Record>) {
        let mut inner = self.lock();
        let t = inner.tables.entry(table.to_string()).or_default();
        for row in rows {
            if let Some(id) = row.get_i64(KEY_COLUMN) {
                t.last_id = t.last_id.max(id);
            }
            t.rows.push(row);
        }
    }

    /// Declare a unique constraint over `columns`.
    pub fn add_unique(&self, table: &str, columns: &[&str]) {
        self.lock()
            .unique
            .entry(table.to_string())
            .or_default()
            .push(columns.iter().map(|c| c.to_string()).collect());
    }

    /// Make the `attempt`-th insert (1-based) into `table` fail.
    pub fn fail_insert(&self, table: &str, attempt: usize) {
        self.lock()
            .failing_inserts
            .entry(table.to_string())
            .or_default()
            .push(attempt);
    }

    /// Snapshot of a table's rows in insertion order.
    pub fn rows(&self, table: &str) -> Vec<Record> {
        self.lock()
            .tables
            .get(table)
            .map(|t| t.rows.clone())
            .unwrap_or_default()
    }

    /// Number of commits so far.
    pub fn commits(&self) -> u64 {
        self.lock().commits
    }
}

fn sort_key(record: &Record, column: &str) -> (i64, String) {
    match record.get(column) {
        Some(v) => (v.as_i64().unwrap_or(i64::MIN), v.lookup_key()),
        None => (i64::MIN, String::new()),
    }
}

#[async_trait]
impl SourceStore for MemoryStore {
    async fn query(&self, query: &SourceQuery) -> Result<Vec<Record>> {
        let mut rows: Vec<Record> = self
            .rows(&query.table)
            .into_iter()
            .filter(|r| query.filter.as_ref().map_or(true, |p| p.matches(r)))
            .collect();
        if let Some(column) = &query.order_by {
            rows.sort_by_key(|r| sort_key(r, column));
        }
        Ok(rows)
    }

    fn store_name(&self) -> &str {
        &self.name
    }
}

#[async_trait]
impl DestinationStore for MemoryStore {
    async fn insert(&self, table: &str, fields: &Record) -> Result<i64> {
        let mut inner = self.lock();

        let attempt = {
            let n = inner.insert_attempts.entry(table.to_string()).or_default();
            *n += 1;
            *n
        };
        if inner
            .failing_inserts
            .get(table)
            .is_some_and(|f| f.contains(&attempt))
        {
            return Err(MigrateError::row(
                table,
                None,
                format!("injected failure on insert {}", attempt),
            ));
        }

        let constraints = inner.unique.get(table).cloned().unwrap_or_default();
        let t = inner.tables.entry(table.to_string()).or_default();

        for columns in &constraints {
            let predicate = Predicate::all(
                columns
                    .iter()
                    .map(|c| (c.clone(), fields.get(c).cloned().unwrap_or(SqlValue::Null))),
            );
            if t.rows.iter().any(|r| predicate.matches(r)) {
                return Err(MigrateError::UniqueViolation {
                    table: table.to_string(),
                    message: format!("duplicate entry for ({})", columns.join(", ")),
                });
            }
        }

        let id = match fields.get_i64(KEY_COLUMN) {
            Some(id) => id,
            None => t.last_id + 1,
        };
        t.last_id = t.last_id.max(id);

        let mut row = Record::new().with(KEY_COLUMN, id);
        for (column, value) in fields.iter() {
            row.set(column, value.clone());
        }
        t.rows.push(row);
        Ok(id)
    }

    async fn update(&self, table: &str, key_column: &str, key: i64, fields: &Record) -> Result<u64> {
        let mut inner = self.lock();
        let Some(t) = inner.tables.get_mut(table) else {
            return Ok(0);
        };
        let target = Predicate::eq(key_column, key);
        let mut updated = 0;
        for row in t.rows.iter_mut().filter(|r| target.matches(r)) {
            for (column, value) in fields.iter() {
                row.set(column, value.clone());
            }
            updated += 1;
        }
        Ok(updated)
    }

    async fn find(&self, table: &str, predicate: &Predicate) -> Result<Vec<Record>> {
        Ok(self
            .rows(table)
            .into_iter()
            .filter(|r| predicate.matches(r))
            .collect())
    }

    async fn count(&self, table: &str) -> Result<i64> {
        Ok(self.lock().tables.get(table).map_or(0, |t| t.rows.len() as i64))
    }

    async fn delete(&self, table: &str, predicate: &Predicate) -> Result<u64> {
        let mut inner = self.lock();
        let Some(t) = inner.tables.get_mut(table) else {
            return Ok(0);
        };
        let before = t.rows.len();
        t.rows.retain(|r| !predicate.matches(r));
        Ok((before - t.rows.len()) as u64)
    }

    async fn truncate(&self, table: &str) -> Result<()> {
        if let Some(t) = self.lock().tables.get_mut(table) {
            t.rows.clear();
            t.last_id = 0;
        }
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        self.lock().commits += 1;
        Ok(())
    }

    fn store_name(&self) -> &str {
        &self.name
    }
}
