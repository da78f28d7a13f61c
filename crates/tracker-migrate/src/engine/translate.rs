//! Source record → destination record translation.
//!
//! Translation is pure: it reads the registry, never writes to a store, and
//! reports unresolved deferred references back to the caller.

use chrono::{DateTime, NaiveDateTime};
use tracing::warn;

use crate::core::{EntityKind, Record, SqlValue, Unmapped, ValueMap, ZERO_DATETIME};
use crate::error::{MigrateError, Result};

use super::registry::IdentityRegistry;

/// A deferred reference found while translating one row. The destination
/// key of the row is not known yet, so the migrator completes it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingField {
    pub field: String,
    pub referenced: String,
    pub source_key: i64,
}

/// Result of translating one source record.
#[derive(Debug, Clone, Default)]
pub struct Translation {
    pub record: Record,
    pub deferred: Vec<PendingField>,
    pub warnings: Vec<String>,
}

/// Read a key column. NULL is `None`, anything non-integer is `InvalidKey`.
pub fn key_value(kind: &str, field: &str, value: Option<&SqlValue>) -> Result<Option<i64>> {
    match value {
        None | Some(SqlValue::Null) => Ok(None),
        Some(v) => v.as_i64().map(Some).ok_or_else(|| MigrateError::InvalidKey {
            kind: kind.to_string(),
            field: field.to_string(),
            value: v.to_string(),
        }),
    }
}

/// Source primary key of a record, if the kind has one.
pub fn source_key(kind: &EntityKind, record: &Record) -> Result<Option<i64>> {
    match &kind.primary_key {
        Some(pk) => key_value(&kind.name, pk, record.get(pk)),
        None => Ok(None),
    }
}

/// Translate one record of `kind`.
pub fn translate(kind: &EntityKind, source: &Record, registry: &IdentityRegistry) -> Result<Translation> {
    let row_key = source_key(kind, source)?;
    let mut out = Translation::default();

    for (column, value) in source.iter() {
        if kind.primary_key.as_deref() == Some(column)
            || kind.exclude_columns.iter().any(|c| c == column)
        {
            continue;
        }

        if let Some(fk) = kind.foreign_key(column) {
            let key = key_value(&kind.name, column, Some(value))?;
            let resolved = match registry.try_resolve(&fk.references, key) {
                Some(dest) => dest,
                None if fk.deferred => {
                    out.deferred.push(PendingField {
                        field: column.to_string(),
                        referenced: fk.references.clone(),
                        source_key: key.unwrap_or_default(),
                    });
                    0
                }
                None if !registry.is_complete(&fk.references) => {
                    return Err(MigrateError::UnresolvedReference {
                        referenced: fk.references.clone(),
                        source_key: key.unwrap_or_default(),
                        context: format!("{}.{} before {} was migrated", kind.name, column, fk.references),
                    });
                }
                None => {
                    let msg = format!(
                        "{} #{}: {} -> {} #{} was not migrated, stored as no reference",
                        kind.name,
                        row_key.unwrap_or_default(),
                        column,
                        fk.references,
                        key.unwrap_or_default()
                    );
                    warn!("{}", msg);
                    out.warnings.push(msg);
                    0
                }
            };
            out.record.set(column, resolved);
            continue;
        }

        let value = match kind.value_maps.get(column) {
            Some(map) => apply_value_map(&kind.name, row_key, column, map, value)?,
            None => value.clone(),
        };
        out.record.set(column, value);
    }

    Ok(out)
}

/// Apply one configured value map. NULL passes through every map except
/// `constant`.
pub fn apply_value_map(
    kind: &str,
    row_key: Option<i64>,
    column: &str,
    map: &ValueMap,
    value: &SqlValue,
) -> Result<SqlValue> {
    match map {
        ValueMap::Constant { value } => Ok(SqlValue::from(value)),
        _ if value.is_null() => Ok(SqlValue::Null),
        ValueMap::Lookup {
            values,
            on_unmapped,
            default,
        } => {
            let wanted = value.lookup_key();
            if let Some((_, mapped)) = values.iter().find(|(k, _)| k.lookup_key() == wanted) {
                return Ok(SqlValue::from(mapped));
            }
            match on_unmapped {
                Unmapped::Fail => Err(MigrateError::UnmappedValue {
                    kind: kind.to_string(),
                    field: column.to_string(),
                    value: wanted,
                }),
                Unmapped::Passthrough => Ok(value.clone()),
                Unmapped::Default => Ok(default.as_ref().map(SqlValue::from).unwrap_or(SqlValue::Null)),
            }
        }
        ValueMap::UnixToDatetime => {
            let ts = value
                .as_i64()
                .and_then(|secs| DateTime::from_timestamp(secs, 0))
                .ok_or_else(|| {
                    MigrateError::row(kind, row_key, format!("{} is not a unix timestamp: {}", column, value))
                })?;
            Ok(SqlValue::Timestamp(ts.naive_utc()))
        }
        ValueMap::DatetimeToUnix => match value {
            SqlValue::Timestamp(t) => Ok(SqlValue::Int(t.and_utc().timestamp())),
            SqlValue::Int(_) => Ok(value.clone()),
            SqlValue::Text(s) if s == ZERO_DATETIME => Ok(SqlValue::Int(0)),
            SqlValue::Text(s) => NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .map(|t| SqlValue::Int(t.and_utc().timestamp()))
                .map_err(|e| MigrateError::row(kind, row_key, format!("{}: {}", column, e))),
            other => Err(MigrateError::row(
                kind,
                row_key,
                format!("{} is not a timestamp: {}", column, other),
            )),
        },
    }
}
