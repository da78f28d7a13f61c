//! Scalar values and ordered records exchanged with the stores.
//!
//! Bug-tracker schemas only carry a handful of column shapes (integer keys and
//! enums, text, timestamps and the occasional in-database attachment blob), so
//! the value model is deliberately narrower than a general SQL type system.

use std::fmt;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// MySQL's zero date, which has no calendar value.
pub const ZERO_DATETIME: &str = "0000-00-00 00:00:00";

/// One column value as read from or written to a store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum SqlValue {
    /// SQL NULL.
    Null,

    /// Any integer column (keys, enums, unix timestamps).
    Int(i64),

    /// Character data.
    Text(String),

    /// Timestamp without timezone.
    Timestamp(NaiveDateTime),

    /// Binary data (attachment content stored in-database).
    Bytes(Vec<u8>),
}

impl SqlValue {
    /// Check if this value is NULL.
    #[must_use]
    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    /// Interpret the value as an integer, accepting numeric text.
    #[must_use]
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int(v) => Some(*v),
            SqlValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    /// Borrow the text content, if any.
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            SqlValue::Text(s) => Some(s),
            _ => None,
        }
    }

    /// Render the value the way lookup tables key it (`10`, `closed`, ...).
    #[must_use]
    pub fn lookup_key(&self) -> String {
        match self {
            SqlValue::Null => String::new(),
            SqlValue::Int(v) => v.to_string(),
            SqlValue::Text(s) => s.clone(),
            SqlValue::Timestamp(t) => t.format("%Y-%m-%d %H:%M:%S").to_string(),
            SqlValue::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
        }
    }
}

impl fmt::Display for SqlValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SqlValue::Null => f.write_str("NULL"),
            SqlValue::Bytes(b) => write!(f, "<{} bytes>", b.len()),
            other => f.write_str(&other.lookup_key()),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<i32> for SqlValue {
    fn from(v: i32) -> Self {
        SqlValue::Int(v as i64)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl From<NaiveDateTime> for SqlValue {
    fn from(v: NaiveDateTime) -> Self {
        SqlValue::Timestamp(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// Constant as written in YAML configuration (`10`, `"closed"`, `~`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ConfigValue {
    Int(i64),
    Text(String),
    Null,
}

impl ConfigValue {
    /// Same rendering as [`SqlValue::lookup_key`].
    pub fn lookup_key(&self) -> String {
        SqlValue::from(self).lookup_key()
    }
}

impl From<i64> for ConfigValue {
    fn from(v: i64) -> Self {
        ConfigValue::Int(v)
    }
}

impl From<&str> for ConfigValue {
    fn from(v: &str) -> Self {
        ConfigValue::Text(v.to_string())
    }
}

impl From<&ConfigValue> for SqlValue {
    fn from(v: &ConfigValue) -> Self {
        match v {
            ConfigValue::Int(i) => SqlValue::Int(*i),
            ConfigValue::Text(s) => SqlValue::Text(s.clone()),
            ConfigValue::Null => SqlValue::Null,
        }
    }
}

/// An ordered mapping from column name to value.
///
/// Column order is the order the source returned them in, which keeps
/// generated INSERT statements stable between runs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    fields: Vec<(String, SqlValue)>,
}

impl Record {
    /// Create an empty record.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert, used heavily by tests and templates.
    #[must_use]
    pub fn with(mut self, column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        self.set(column, value);
        self
    }

    /// Get a column value.
    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, v)| v)
    }

    /// Set a column value, replacing in place if the column already exists.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<SqlValue>) {
        let column = column.into();
        let value = value.into();
        match self.fields.iter_mut().find(|(name, _)| *name == column) {
            Some(slot) => slot.1 = value,
            None => self.fields.push((column, value)),
        }
    }

    /// Remove a column, returning its value.
    pub fn remove(&mut self, column: &str) -> Option<SqlValue> {
        let pos = self.fields.iter().position(|(name, _)| name == column)?;
        Some(self.fields.remove(pos).1)
    }

    /// Integer value of a column; NULL and missing columns are `None`.
    pub fn get_i64(&self, column: &str) -> Option<i64> {
        self.get(column).and_then(SqlValue::as_i64)
    }

    /// Iterate over `(column, value)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &SqlValue)> {
        self.fields.iter().map(|(k, v)| (k.as_str(), v))
    }

    /// Column names in order.
    pub fn columns(&self) -> Vec<&str> {
        self.fields.iter().map(|(k, _)| k.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }
}

impl FromIterator<(String, SqlValue)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, SqlValue)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (k, v) in iter {
            record.set(k, v);
        }
        record
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_preserves_order_and_replaces_in_place() {
        let mut r = Record::new().with("id", 1).with("name", "UI").with("project_id", 7);
        r.set("name", "Backend");
        assert_eq!(r.columns(), vec!["id", "name", "project_id"]);
        assert_eq!(r.get("name"), Some(&SqlValue::Text("Backend".into())));
    }

    #[test]
    fn test_remove_column() {
        let mut r = Record::new().with("id", 1).with("name", "UI");
        assert_eq!(r.remove("id"), Some(SqlValue::Int(1)));
        assert_eq!(r.columns(), vec!["name"]);
        assert_eq!(r.remove("id"), None);
    }

    #[test]
    fn test_as_i64_accepts_numeric_text() {
        assert_eq!(SqlValue::Text(" 42 ".into()).as_i64(), Some(42));
        assert_eq!(SqlValue::Text("abc".into()).as_i64(), None);
        assert_eq!(SqlValue::Null.as_i64(), None);
    }

    #[test]
    fn test_option_into_value() {
        let none: Option<i64> = None;
        assert_eq!(SqlValue::from(none), SqlValue::Null);
        assert_eq!(SqlValue::from(Some("x")), SqlValue::Text("x".into()));
    }

    #[test]
    fn test_config_value_from_yaml() {
        let v: Vec<ConfigValue> = serde_yaml::from_str("[10, closed, ~]").unwrap();
        assert_eq!(
            v,
            vec![
                ConfigValue::Int(10),
                ConfigValue::Text("closed".into()),
                ConfigValue::Null
            ]
        );
        assert_eq!(SqlValue::from(&v[0]), SqlValue::Int(10));
    }
}
