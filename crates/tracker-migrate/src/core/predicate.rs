//! Typed row predicates used for dedup and lookup queries.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::value::{Record, SqlValue};

/// A conjunction of column equalities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Predicate {
    /// `column = value`; a NULL value matches NULL (`IS NULL`).
    Eq(String, SqlValue),
    /// All inner predicates hold. An empty conjunction matches every row.
    And(Vec<Predicate>),
}

impl Predicate {
    pub fn eq(column: impl Into<String>, value: impl Into<SqlValue>) -> Self {
        Predicate::Eq(column.into(), value.into())
    }

    /// Build a conjunction of equalities from `(column, value)` pairs.
    pub fn all<I, C, V>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (C, V)>,
        C: Into<String>,
        V: Into<SqlValue>,
    {
        Predicate::And(
            pairs
                .into_iter()
                .map(|(c, v)| Predicate::Eq(c.into(), v.into()))
                .collect(),
        )
    }

    /// Evaluate against an in-memory record.
    ///
    /// A missing column is treated as NULL. Integers and numeric text compare
    /// equal so that loosely typed stores behave like MySQL.
    pub fn matches(&self, record: &Record) -> bool {
        match self {
            Predicate::Eq(column, expected) => {
                let actual = record.get(column).unwrap_or(&SqlValue::Null);
                values_equal(actual, expected)
            }
            Predicate::And(inner) => inner.iter().all(|p| p.matches(record)),
        }
    }

    /// Flatten into the list of equalities, in declaration order.
    pub fn equalities(&self) -> Vec<(&str, &SqlValue)> {
        let mut out = Vec::new();
        self.collect_equalities(&mut out);
        out
    }

    fn collect_equalities<'a>(&'a self, out: &mut Vec<(&'a str, &'a SqlValue)>) {
        match self {
            Predicate::Eq(c, v) => out.push((c.as_str(), v)),
            Predicate::And(inner) => {
                for p in inner {
                    p.collect_equalities(out);
                }
            }
        }
    }
}

fn values_equal(a: &SqlValue, b: &SqlValue) -> bool {
    match (a, b) {
        (SqlValue::Null, SqlValue::Null) => true,
        (SqlValue::Null, _) | (_, SqlValue::Null) => false,
        (SqlValue::Int(x), other) | (other, SqlValue::Int(x)) => other.as_i64() == Some(*x),
        _ => a == b,
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = self
            .equalities()
            .into_iter()
            .map(|(c, v)| format!("{}={}", c, v))
            .collect();
        f.write_str(&parts.join(", "))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_matches_conjunction() {
        let row = Record::new()
            .with("id", 3)
            .with("project_id", 7)
            .with("name", "UI");
        let p = Predicate::all([("project_id", SqlValue::Int(7)), ("name", "UI".into())]);
        assert!(p.matches(&row));

        let p = Predicate::all([("project_id", SqlValue::Int(8)), ("name", "UI".into())]);
        assert!(!p.matches(&row));
    }

    #[test]
    fn test_null_matches_missing_column() {
        let row = Record::new().with("name", "UI");
        assert!(Predicate::Eq("email".into(), SqlValue::Null).matches(&row));
        assert!(!Predicate::eq("email", "a@x.com").matches(&row));
    }

    #[test]
    fn test_int_matches_numeric_text() {
        let row = Record::new().with("field_id", "12");
        assert!(Predicate::eq("field_id", 12).matches(&row));
    }

    #[test]
    fn test_empty_and_matches_all() {
        assert!(Predicate::And(vec![]).matches(&Record::new()));
    }

    #[test]
    fn test_display() {
        let p = Predicate::all([("username", "alice"), ("email", "a@x.com")]);
        assert_eq!(p.to_string(), "username=alice, email=a@x.com");
    }
}
