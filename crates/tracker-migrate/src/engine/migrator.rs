//! Migration of a single entity kind.

use std::collections::BTreeSet;

use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::core::{
    ConflictPolicy, DestinationStore, EntityKind, MembershipRule, MigrationMode, Predicate, Record,
    SourceQuery, SourceStore, SqlValue,
};
use crate::error::{MigrateError, Result};

use super::credentials;
use super::dedup::{find_existing, DedupOutcome};
use super::registry::Origin;
use super::second_pass::{Attachment, DeferredField, DeferredWork};
use super::translate::{key_value, source_key, translate};
use super::RunState;

/// Per-kind counters reported in the run summary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KindStats {
    pub kind: String,
    /// Rows inserted.
    pub migrated: u64,
    /// Rows mapped onto an existing destination row.
    pub merged: u64,
    /// Rows that failed and were skipped.
    pub skipped: u64,
    /// Fields queued for the second pass.
    pub deferred: u64,
    /// Rows left out because they belong to a project outside the selection.
    pub filtered: u64,
}

impl KindStats {
    fn new(kind: &str) -> Self {
        Self {
            kind: kind.to_string(),
            ..Default::default()
        }
    }
}

enum RowOutcome {
    Inserted,
    Merged,
    Filtered,
}

/// Source rows of one kind that a run is restricted to.
///
/// Rows of `kind` outside `keys` are left out, and so is every row that
/// references a row that was left out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProjectSelection {
    pub kind: String,
    pub keys: BTreeSet<i64>,
}

/// Drives the migration of one entity kind at a time.
pub struct TableMigrator<'a> {
    source: &'a dyn SourceStore,
    destination: &'a dyn DestinationStore,
    memberships: &'a [MembershipRule],
    output_project: &'a str,
    cancel: Option<&'a CancellationToken>,
    selection: Option<&'a ProjectSelection>,
}

impl<'a> TableMigrator<'a> {
    pub fn new(
        source: &'a dyn SourceStore,
        destination: &'a dyn DestinationStore,
        memberships: &'a [MembershipRule],
        output_project: &'a str,
    ) -> Self {
        Self {
            source,
            destination,
            memberships,
            output_project,
            cancel: None,
            selection: None,
        }
    }

    /// Only migrate rows belonging to the selected projects.
    #[must_use]
    pub fn with_selection(mut self, selection: &'a ProjectSelection) -> Self {
        self.selection = Some(selection);
        self
    }

    /// Abort between rows once the token is cancelled.
    #[must_use]
    pub fn with_cancellation(mut self, token: &'a CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }

    fn check_cancelled(&self) -> Result<()> {
        match self.cancel {
            Some(token) if token.is_cancelled() => Err(MigrateError::Cancelled),
            _ => Ok(()),
        }
    }

    /// Migrate every source row of `kind`.
    ///
    /// Per-row failures are recorded in `state` and the row is skipped; any
    /// fatal error aborts immediately, leaving the rows committed so far.
    pub async fn migrate(&self, kind: &EntityKind, state: &mut RunState) -> Result<KindStats> {
        let mut query = SourceQuery::table(&kind.table);
        if let Some(pk) = &kind.primary_key {
            query = query.order_by(pk);
        }
        let rows = self.source.query(&query).await?;
        info!("Migrating {} from {} ({} rows)", kind.name, kind.table, rows.len());

        let stats = match &kind.mode {
            MigrationMode::Copy => self.copy_rows(kind, &rows, state).await?,
            MigrationMode::Collapse { name_column, name } => {
                let name = name.as_deref().unwrap_or(self.output_project);
                self.collapse_rows(kind, &rows, name_column, name, state).await?
            }
        };

        state.registry.mark_complete(&kind.name);
        info!(
            "{}: {} migrated, {} merged, {} skipped, {} deferred, {} filtered",
            kind.name, stats.migrated, stats.merged, stats.skipped, stats.deferred, stats.filtered
        );
        Ok(stats)
    }

    async fn copy_rows(&self, kind: &EntityKind, rows: &[Record], state: &mut RunState) -> Result<KindStats> {
        let mut stats = KindStats::new(&kind.name);

        for row in rows {
            self.check_cancelled()?;
            let deferred_before = state.deferred.len();

            match self.migrate_row(kind, row, state).await {
                Ok(RowOutcome::Inserted) => stats.migrated += 1,
                Ok(RowOutcome::Merged) => stats.merged += 1,
                Ok(RowOutcome::Filtered) => stats.filtered += 1,
                Err(e) if !e.is_fatal() => {
                    let key = source_key(kind, row).ok().flatten();
                    error!("{} #{}: {}", kind.name, key.unwrap_or_default(), e);
                    state.record_error(&kind.name, key, &e);
                    stats.skipped += 1;
                }
                Err(e) => return Err(e),
            }

            stats.deferred += state.deferred[deferred_before..]
                .iter()
                .filter(|w| matches!(w, DeferredWork::Field(_)))
                .count() as u64;
        }

        Ok(stats)
    }

    async fn migrate_row(&self, kind: &EntityKind, row: &Record, state: &mut RunState) -> Result<RowOutcome> {
        let src_key = source_key(kind, row)?;

        if self.left_out(kind, src_key, row, state)? {
            return Ok(RowOutcome::Filtered);
        }

        if let DedupOutcome::Existing(dest_key) =
            find_existing(kind, row, &state.registry, self.destination).await?
        {
            if let Some(src) = src_key {
                state.registry.register(&kind.name, src, dest_key, Origin::Merged)?;
            }
            debug!("{} #{} merged into {}", kind.name, src_key.unwrap_or_default(), dest_key);
            return Ok(RowOutcome::Merged);
        }

        let translation = translate(kind, row, &state.registry)?;
        state.warnings.extend(translation.warnings);
        let mut record = translation.record;

        if let Some(policy) = &kind.credentials {
            let creds = credentials::issue(policy, &kind.name, &kind.table, self.destination).await?;
            creds.apply(policy, &mut record);
        }

        let dest_key = self.insert_with_policy(kind, src_key, &mut record).await?;
        self.destination.commit().await?;
        debug!("{} #{} -> {}", kind.name, src_key.unwrap_or_default(), dest_key);

        let (Some(key_column), Some(src)) = (&kind.primary_key, src_key) else {
            return Ok(RowOutcome::Inserted);
        };
        state.registry.register(&kind.name, src, dest_key, Origin::Inserted)?;

        for pending in translation.deferred {
            state.deferred.push(DeferredWork::Field(DeferredField {
                kind: kind.name.clone(),
                table: kind.table.clone(),
                key_column: key_column.clone(),
                source_key: src,
                dest_key,
                field: pending.field,
                referenced: pending.referenced,
                referenced_key: pending.source_key,
            }));
        }

        for rule in self.memberships.iter().filter(|r| r.member_kind == kind.name) {
            let group = key_value(&kind.name, &rule.group_field, row.get(&rule.group_field))?;
            state.deferred.push(DeferredWork::Attach(Attachment {
                rule: rule.name.clone(),
                member_key: dest_key,
                group_source_key: group,
            }));
        }

        Ok(RowOutcome::Inserted)
    }

    /// Whether the row falls outside the project selection. Left-out rows
    /// are remembered so rows referencing them are left out too.
    fn left_out(&self, kind: &EntityKind, src_key: Option<i64>, row: &Record, state: &mut RunState) -> Result<bool> {
        let Some(selection) = self.selection else {
            return Ok(false);
        };

        let mut reason = None;
        if selection.kind == kind.name {
            if let Some(key) = src_key.filter(|k| !selection.keys.contains(k)) {
                reason = Some(format!("{} #{} is not selected", kind.name, key));
            }
        }
        if reason.is_none() {
            for fk in kind.foreign_keys.iter().filter(|fk| !fk.deferred) {
                let key = key_value(&kind.name, &fk.column, row.get(&fk.column))?;
                if state.registry.is_excluded(&fk.references, key) {
                    reason = Some(format!(
                        "{} -> {} #{} was left out",
                        fk.column,
                        fk.references,
                        key.unwrap_or_default()
                    ));
                    break;
                }
            }
        }

        let Some(reason) = reason else {
            return Ok(false);
        };
        if let Some(key) = src_key {
            state.registry.exclude(&kind.name, key);
        }
        debug!("{} #{} left out: {}", kind.name, src_key.unwrap_or_default(), reason);
        Ok(true)
    }

    /// Insert, applying the kind's unique-violation policy.
    async fn insert_with_policy(&self, kind: &EntityKind, src_key: Option<i64>, record: &mut Record) -> Result<i64> {
        let mut retries_left = kind.on_unique_violation.as_ref().map_or(0, |p| p.retries);

        loop {
            match self.destination.insert(&kind.table, record).await {
                Ok(key) => return Ok(key),
                Err(MigrateError::UniqueViolation { table, message }) if retries_left > 0 => {
                    let Some(policy) = &kind.on_unique_violation else {
                        return Err(MigrateError::UniqueViolation { table, message });
                    };
                    if !bump(record, policy) {
                        return Err(MigrateError::UniqueViolation { table, message });
                    }
                    retries_left -= 1;
                    warn!(
                        "{} #{}: unique violation on {}, retrying with {} incremented",
                        kind.name,
                        src_key.unwrap_or_default(),
                        table,
                        policy.increment
                    );
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Map every source row onto the single destination row named `name`.
    async fn collapse_rows(
        &self,
        kind: &EntityKind,
        rows: &[Record],
        name_column: &str,
        name: &str,
        state: &mut RunState,
    ) -> Result<KindStats> {
        let mut stats = KindStats::new(&kind.name);
        let mut target: Option<i64> = None;

        for row in rows {
            self.check_cancelled()?;
            let src_key = source_key(kind, row)?;
            if self.left_out(kind, src_key, row, state)? {
                stats.filtered += 1;
                continue;
            }

            let (dest_key, origin) = match target {
                Some(key) => (key, Origin::Merged),
                None => {
                    let (key, created) = self.find_or_create_named(kind, row, name_column, name, state).await?;
                    target = Some(key);
                    if name == self.output_project {
                        state.output_project_key = Some(key);
                    }
                    (key, if created { Origin::Inserted } else { Origin::Merged })
                }
            };

            if let Some(src) = src_key {
                state.registry.register(&kind.name, src, dest_key, origin)?;
            }
            match origin {
                Origin::Inserted => stats.migrated += 1,
                Origin::Merged => stats.merged += 1,
            }
        }

        Ok(stats)
    }

    async fn find_or_create_named(
        &self,
        kind: &EntityKind,
        template: &Record,
        name_column: &str,
        name: &str,
        state: &mut RunState,
    ) -> Result<(i64, bool)> {
        let predicate = Predicate::eq(name_column, name);
        let existing = self.destination.find(&kind.table, &predicate).await?;
        let pk = kind.primary_key.as_deref().unwrap_or("id");

        match existing.as_slice() {
            [row] => {
                let key = key_value(&kind.name, pk, row.get(pk))?.unwrap_or_default();
                info!("{}: using existing '{}' (#{})", kind.name, name, key);
                Ok((key, false))
            }
            [] => {
                let translation = translate(kind, template, &state.registry)?;
                state.warnings.extend(translation.warnings);
                let mut record = translation.record;
                record.set(name_column, name);
                let key = self.destination.insert(&kind.table, &record).await?;
                self.destination.commit().await?;
                info!("{}: created '{}' (#{})", kind.name, name, key);
                Ok((key, true))
            }
            rows => Err(MigrateError::AmbiguousMatch {
                kind: kind.name.clone(),
                key: predicate.to_string(),
                matches: rows.len(),
            }),
        }
    }
}

/// Increment the policy column by one (one second for timestamps).
fn bump(record: &mut Record, policy: &ConflictPolicy) -> bool {
    let next = match record.get(&policy.increment) {
        Some(SqlValue::Int(v)) => SqlValue::Int(v + 1),
        Some(SqlValue::Timestamp(t)) => SqlValue::Timestamp(*t + chrono::Duration::seconds(1)),
        Some(SqlValue::Text(s)) => match s.trim().parse::<i64>() {
            Ok(v) => SqlValue::Int(v + 1),
            Err(_) => return false,
        },
        _ => return false,
    };
    record.set(policy.increment.clone(), next);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::CredentialPolicy;
    use crate::drivers::memory::MemoryStore;

    fn history() -> EntityKind {
        let mut kind = EntityKind::new("bug_history", "mantis_bug_history_table");
        kind.on_unique_violation = Some(ConflictPolicy {
            increment: "date_modified".into(),
            retries: 1,
        });
        kind
    }

    #[test]
    fn test_bump_int_and_timestamp() {
        let policy = ConflictPolicy {
            increment: "date_modified".into(),
            retries: 1,
        };
        let mut r = Record::new().with("date_modified", 100);
        assert!(bump(&mut r, &policy));
        assert_eq!(r.get_i64("date_modified"), Some(101));

        let t = chrono::NaiveDate::from_ymd_opt(2020, 1, 1)
            .unwrap()
            .and_hms_opt(0, 0, 59)
            .unwrap();
        let mut r = Record::new().with("date_modified", t);
        assert!(bump(&mut r, &policy));
        assert_eq!(
            r.get("date_modified"),
            Some(&SqlValue::Timestamp(t + chrono::Duration::seconds(1)))
        );

        let mut r = Record::new().with("date_modified", "soon");
        assert!(!bump(&mut r, &policy));
    }

    #[tokio::test]
    async fn test_copy_registers_and_counts() {
        let source = MemoryStore::new();
        source.seed(
            "mantis_user_table",
            vec![
                Record::new().with("id", 4).with("username", "bob").with("email", "b@x.com"),
                Record::new().with("id", 2).with("username", "carol").with("email", "c@x.com"),
            ],
        );
        let dest = MemoryStore::new();
        let mut kind = EntityKind::new("user", "mantis_user_table").natural_key(&["username", "email"]);
        kind.credentials = Some(CredentialPolicy::new("password", "cookie_string"));

        let mut state = RunState::new();
        let stats = TableMigrator::new(&source, &dest, &[], "Imported")
            .migrate(&kind, &mut state)
            .await
            .unwrap();

        assert_eq!(stats.migrated, 2);
        assert!(state.registry.is_complete("user"));
        // Source order is by primary key: carol (2) is inserted first.
        assert_eq!(state.registry.resolve("user", Some(2)).unwrap(), 1);
        assert_eq!(state.registry.resolve("user", Some(4)).unwrap(), 2);
        assert_eq!(dest.commits(), 2);
        let rows = dest.rows("mantis_user_table");
        assert!(rows.iter().all(|r| r.get("cookie_string").is_some()));
    }

    #[tokio::test]
    async fn test_unique_violation_retried_once_with_increment() {
        let source = MemoryStore::new();
        source.seed(
            "mantis_bug_history_table",
            vec![
                Record::new().with("id", 1).with("bug_id", 0).with("date_modified", 500),
                Record::new().with("id", 2).with("bug_id", 0).with("date_modified", 500),
                Record::new().with("id", 3).with("bug_id", 0).with("date_modified", 500),
            ],
        );
        let dest = MemoryStore::new();
        dest.add_unique("mantis_bug_history_table", &["bug_id", "date_modified"]);

        let mut state = RunState::new();
        let stats = TableMigrator::new(&source, &dest, &[], "Imported")
            .migrate(&history(), &mut state)
            .await
            .unwrap();

        // Second row succeeds at 501, third collides at 500 and 501.
        assert_eq!(stats.migrated, 2);
        assert_eq!(stats.skipped, 1);
        assert_eq!(state.errors.len(), 1);
        assert_eq!(state.errors[0].source_key, Some(3));
        let times: Vec<i64> = dest
            .rows("mantis_bug_history_table")
            .iter()
            .filter_map(|r| r.get_i64("date_modified"))
            .collect();
        assert_eq!(times, vec![500, 501]);
    }

    #[tokio::test]
    async fn test_row_persist_failure_skips_row() {
        let source = MemoryStore::new();
        source.seed(
            "mantis_bugnote_table",
            vec![Record::new().with("id", 1), Record::new().with("id", 2)],
        );
        let dest = MemoryStore::new();
        dest.fail_insert("mantis_bugnote_table", 1);

        let kind = EntityKind::new("bugnote", "mantis_bugnote_table");
        let mut state = RunState::new();
        let stats = TableMigrator::new(&source, &dest, &[], "Imported")
            .migrate(&kind, &mut state)
            .await
            .unwrap();
        assert_eq!(stats.migrated, 1);
        assert_eq!(stats.skipped, 1);
        assert_eq!(state.registry.try_resolve("bugnote", Some(1)), None);
        assert_eq!(state.registry.resolve("bugnote", Some(2)).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_collapse_into_existing_project() {
        let source = MemoryStore::new();
        source.seed(
            "mantis_project_table",
            vec![
                Record::new().with("id", 1).with("name", "Alpha"),
                Record::new().with("id", 2).with("name", "Beta"),
            ],
        );
        let dest = MemoryStore::new();
        dest.seed(
            "mantis_project_table",
            vec![Record::new().with("id", 7).with("name", "Imported")],
        );
        let mut kind = EntityKind::new("project", "mantis_project_table");
        kind.mode = MigrationMode::Collapse {
            name_column: "name".into(),
            name: None,
        };

        let mut state = RunState::new();
        let stats = TableMigrator::new(&source, &dest, &[], "Imported")
            .migrate(&kind, &mut state)
            .await
            .unwrap();
        assert_eq!(stats.merged, 2);
        assert_eq!(state.output_project_key, Some(7));
        assert_eq!(state.registry.resolve("project", Some(2)).unwrap(), 7);
        assert_eq!(dest.rows("mantis_project_table").len(), 1);
    }

    #[tokio::test]
    async fn test_selection_leaves_out_projects_and_their_rows() {
        let source = MemoryStore::new();
        source.seed(
            "mantis_project_table",
            vec![
                Record::new().with("id", 1).with("name", "Alpha"),
                Record::new().with("id", 2).with("name", "Beta"),
            ],
        );
        source.seed(
            "mantis_category_table",
            vec![
                Record::new().with("id", 1).with("project_id", 1).with("name", "UI"),
                Record::new().with("id", 2).with("project_id", 2).with("name", "UI"),
                Record::new().with("id", 3).with("project_id", 0).with("name", "General"),
            ],
        );
        let dest = MemoryStore::new();
        let mut project = EntityKind::new("project", "mantis_project_table");
        project.mode = MigrationMode::Collapse {
            name_column: "name".into(),
            name: None,
        };
        let category = EntityKind::new("category", "mantis_category_table").references("project_id", "project");
        let selection = ProjectSelection {
            kind: "project".into(),
            keys: BTreeSet::from([1]),
        };

        let mut state = RunState::new();
        let migrator = TableMigrator::new(&source, &dest, &[], "Imported").with_selection(&selection);
        let projects = migrator.migrate(&project, &mut state).await.unwrap();
        let categories = migrator.migrate(&category, &mut state).await.unwrap();

        assert_eq!((projects.migrated, projects.filtered), (1, 1));
        assert!(state.registry.is_excluded("project", Some(2)));
        // Global categories (project 0) are kept
        assert_eq!((categories.migrated, categories.filtered), (2, 1));
        assert!(state.registry.is_excluded("category", Some(2)));
        assert!(state.errors.is_empty());
        let names: Vec<String> = dest
            .rows("mantis_category_table")
            .iter()
            .map(|r| r.get("name").unwrap().lookup_key())
            .collect();
        assert_eq!(names, vec!["UI", "General"]);
    }

    #[tokio::test]
    async fn test_cancellation_stops_between_rows() {
        let source = MemoryStore::new();
        source.seed("t", vec![Record::new().with("id", 1)]);
        let dest = MemoryStore::new();
        let token = CancellationToken::new();
        token.cancel();

        let mut state = RunState::new();
        let err = TableMigrator::new(&source, &dest, &[], "Imported")
            .with_cancellation(&token)
            .migrate(&EntityKind::new("t", "t"), &mut state)
            .await
            .unwrap_err();
        assert!(matches!(err, MigrateError::Cancelled));
        assert!(dest.rows("t").is_empty());
    }
}
