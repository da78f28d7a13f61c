//! MySQL/MariaDB SQL generation.
//!
//! Every statement is returned together with its positional `?` parameters;
//! values are never spliced into SQL text.

use crate::core::{Predicate, Record, SourceQuery, SqlValue};

/// SQL text plus bound parameters.
pub type Statement = (String, Vec<SqlValue>);

/// MySQL/MariaDB dialect.
#[derive(Debug, Clone, Default)]
pub struct MysqlDialect;

impl MysqlDialect {
    pub fn new() -> Self {
        Self
    }

    pub fn quote_ident(&self, name: &str) -> String {
        // Backticks inside a name are doubled
        format!("`{}`", name.replace('`', "``"))
    }

    /// Render a predicate as a WHERE body. NULL equality becomes `IS NULL`.
    /// An empty conjunction renders as `1 = 1`.
    pub fn where_clause(&self, predicate: &Predicate) -> Statement {
        let mut parts = Vec::new();
        let mut params = Vec::new();
        for (column, value) in predicate.equalities() {
            if value.is_null() {
                parts.push(format!("{} IS NULL", self.quote_ident(column)));
            } else {
                parts.push(format!("{} = ?", self.quote_ident(column)));
                params.push(value.clone());
            }
        }
        if parts.is_empty() {
            return ("1 = 1".to_string(), params);
        }
        (parts.join(" AND "), params)
    }

    pub fn select(&self, query: &SourceQuery) -> Statement {
        let mut sql = format!("SELECT * FROM {}", self.quote_ident(&query.table));
        let mut params = Vec::new();
        if let Some(filter) = &query.filter {
            let (clause, p) = self.where_clause(filter);
            sql.push_str(" WHERE ");
            sql.push_str(&clause);
            params = p;
        }
        if let Some(order) = &query.order_by {
            sql.push_str(&format!(" ORDER BY {}", self.quote_ident(order)));
        }
        (sql, params)
    }

    pub fn find(&self, table: &str, predicate: &Predicate) -> Statement {
        let (clause, params) = self.where_clause(predicate);
        (
            format!("SELECT * FROM {} WHERE {}", self.quote_ident(table), clause),
            params,
        )
    }

    pub fn insert(&self, table: &str, fields: &Record) -> Statement {
        if fields.is_empty() {
            return (format!("INSERT INTO {} () VALUES ()", self.quote_ident(table)), Vec::new());
        }
        let columns: Vec<String> = fields.columns().iter().map(|c| self.quote_ident(c)).collect();
        let placeholders = vec!["?"; columns.len()].join(", ");
        let params = fields.iter().map(|(_, v)| v.clone()).collect();
        (
            format!(
                "INSERT INTO {} ({}) VALUES ({})",
                self.quote_ident(table),
                columns.join(", "),
                placeholders
            ),
            params,
        )
    }

    pub fn update(&self, table: &str, key_column: &str, key: i64, fields: &Record) -> Statement {
        let sets: Vec<String> = fields
            .columns()
            .iter()
            .map(|c| format!("{} = ?", self.quote_ident(c)))
            .collect();
        let mut params: Vec<SqlValue> = fields.iter().map(|(_, v)| v.clone()).collect();
        params.push(SqlValue::Int(key));
        (
            format!(
                "UPDATE {} SET {} WHERE {} = ?",
                self.quote_ident(table),
                sets.join(", "),
                self.quote_ident(key_column)
            ),
            params,
        )
    }

    pub fn delete(&self, table: &str, predicate: &Predicate) -> Statement {
        let (clause, params) = self.where_clause(predicate);
        (
            format!("DELETE FROM {} WHERE {}", self.quote_ident(table), clause),
            params,
        )
    }

    pub fn count(&self, table: &str) -> String {
        format!("SELECT CAST(COUNT(*) AS SIGNED) FROM {}", self.quote_ident(table))
    }

    pub fn truncate(&self, table: &str) -> String {
        format!("TRUNCATE TABLE {}", self.quote_ident(table))
    }
}
