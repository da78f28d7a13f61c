//! Natural-key duplicate detection against the destination store.

use tracing::debug;

use crate::core::{DestinationStore, EntityKind, Predicate, Record, SqlValue};
use crate::error::{MigrateError, Result};

use super::registry::IdentityRegistry;
use super::translate::{apply_value_map, key_value, source_key};

/// Outcome of a dedup lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupOutcome {
    /// No equivalent destination row; insert.
    New,
    /// An equivalent row exists with this key (`0` for keyless tables).
    Existing(i64),
}

/// Build the destination-side natural-key predicate for a source record.
///
/// Key columns that are foreign keys are compared by their translated key
/// and value-mapped columns by their mapped value. Returns `None` when the
/// kind has no natural key or when a referenced row has no destination key
/// yet, in which case no destination row can match.
pub fn key_predicate(
    kind: &EntityKind,
    source: &Record,
    registry: &IdentityRegistry,
) -> Result<Option<Predicate>> {
    let Some(columns) = &kind.natural_key else {
        return Ok(None);
    };

    let row_key = source_key(kind, source)?;
    let mut parts = Vec::with_capacity(columns.len());
    for column in columns {
        let raw = source.get(column).cloned().unwrap_or(SqlValue::Null);
        let value = if let Some(fk) = kind.foreign_key(column) {
            let key = key_value(&kind.name, column, Some(&raw))?;
            match registry.try_resolve(&fk.references, key) {
                Some(dest) => SqlValue::Int(dest),
                None => return Ok(None),
            }
        } else if let Some(map) = kind.value_maps.get(column) {
            apply_value_map(&kind.name, row_key, column, map, &raw)?
        } else {
            raw
        };
        parts.push(Predicate::Eq(column.clone(), value));
    }
    Ok(Some(Predicate::And(parts)))
}

/// Look for a destination row equivalent to `source`.
///
/// More than one match is a fatal `AmbiguousMatch`: dedup never picks one.
pub async fn find_existing(
    kind: &EntityKind,
    source: &Record,
    registry: &IdentityRegistry,
    destination: &dyn DestinationStore,
) -> Result<DedupOutcome> {
    let Some(predicate) = key_predicate(kind, source, registry)? else {
        return Ok(DedupOutcome::New);
    };

    let matches = destination.find(&kind.table, &predicate).await?;
    match matches.as_slice() {
        [] => Ok(DedupOutcome::New),
        [row] => {
            let key = match &kind.primary_key {
                Some(pk) => key_value(&kind.name, pk, row.get(pk))?.unwrap_or_default(),
                None => 0,
            };
            debug!("{}: {} matches existing row {}", kind.name, predicate, key);
            Ok(DedupOutcome::Existing(key))
        }
        rows => Err(MigrateError::AmbiguousMatch {
            kind: kind.name.clone(),
            key: predicate.to_string(),
            matches: rows.len(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::drivers::memory::MemoryStore;
    use crate::engine::registry::Origin;

    fn category() -> EntityKind {
        EntityKind::new("category", "mantis_category_table")
            .natural_key(&["project_id", "name"])
            .references("project_id", "project")
    }

    #[tokio::test]
    async fn test_no_natural_key_is_always_new() {
        let store = MemoryStore::new();
        let kind = EntityKind::new("bug", "mantis_bug_table");
        let src = Record::new().with("id", 1);
        let out = find_existing(&kind, &src, &IdentityRegistry::new(), &store).await.unwrap();
        assert_eq!(out, DedupOutcome::New);
    }

    #[tokio::test]
    async fn test_matches_on_translated_foreign_key() {
        let store = MemoryStore::new();
        store.seed(
            "mantis_category_table",
            vec![Record::new().with("id", 40).with("project_id", 7).with("name", "UI")],
        );
        let mut reg = IdentityRegistry::new();
        reg.register("project", 2, 7, Origin::Merged).unwrap();

        let src = Record::new().with("id", 1).with("project_id", 2).with("name", "UI");
        let out = find_existing(&category(), &src, &reg, &store).await.unwrap();
        assert_eq!(out, DedupOutcome::Existing(40));
    }

    #[tokio::test]
    async fn test_unresolved_key_column_means_new() {
        let store = MemoryStore::new();
        let src = Record::new().with("id", 1).with("project_id", 2).with("name", "UI");
        let pred = key_predicate(&category(), &src, &IdentityRegistry::new()).unwrap();
        assert!(pred.is_none());
        let out = find_existing(&category(), &src, &IdentityRegistry::new(), &store)
            .await
            .unwrap();
        assert_eq!(out, DedupOutcome::New);
    }

    #[tokio::test]
    async fn test_two_matches_are_ambiguous() {
        let store = MemoryStore::new();
        store.seed(
            "mantis_tag_table",
            vec![
                Record::new().with("id", 1).with("name", "ui"),
                Record::new().with("id", 2).with("name", "ui"),
            ],
        );
        let kind = EntityKind::new("tag", "mantis_tag_table").natural_key(&["name"]);
        let src = Record::new().with("id", 9).with("name", "ui");
        let err = find_existing(&kind, &src, &IdentityRegistry::new(), &store)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::AmbiguousMatch { matches: 2, .. }));
        assert!(err.is_fatal());
    }
}
