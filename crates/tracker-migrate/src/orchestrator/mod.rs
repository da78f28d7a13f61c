//! Migration orchestrator - main workflow coordinator.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::config::Config;
use crate::core::{
    CleanPolicy, DestinationStore, EntityKind, MembershipRule, MigrationMode, Predicate, SourceQuery, SourceStore,
};
use crate::drivers;
use crate::engine::translate::key_value;
use crate::engine::{
    plan, KindStats, MigrationPlan, ProjectSelection, RowError, RunState, SecondPass, SecondPassStats, TableMigrator,
};
use crate::error::{MigrateError, Result};

/// Migration orchestrator.
pub struct Orchestrator {
    config: Config,
    kinds: Vec<EntityKind>,
    memberships: Vec<MembershipRule>,
    source: Arc<dyn SourceStore>,
    destination: Arc<dyn DestinationStore>,
}

/// Result of a migration run.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationResult {
    /// Unique run identifier.
    pub run_id: String,

    /// SHA-256 of the configuration the run used.
    pub config_hash: String,

    /// Final status: "completed" or "completed_with_errors".
    pub status: String,

    pub started_at: DateTime<Utc>,

    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Order the kinds were migrated in.
    pub plan: MigrationPlan,

    /// Per-kind counters, in plan order.
    pub kinds: Vec<KindStats>,

    pub second_pass: SecondPassStats,

    /// Rows that were skipped.
    pub errors: Vec<RowError>,

    pub warnings: Vec<String>,
}

/// Connectivity and destination state, as reported by `health-check`.
#[derive(Debug, Clone, Serialize)]
pub struct HealthCheckResult {
    pub source: String,
    pub destination: String,
    /// Destination row counts of the guard tables.
    pub guard_rows: BTreeMap<String, i64>,
}

/// The plan for a configuration, computed without touching any store.
pub fn migration_plan(config: &Config) -> Result<MigrationPlan> {
    plan(&config.entity_graph())
}

impl Orchestrator {
    /// Connect to the configured stores.
    pub async fn new(config: Config) -> Result<Self> {
        let source = drivers::connect_source(&config.source).await?;
        let destination = drivers::connect_destination(&config.target).await?;
        Ok(Self::with_stores(config, Arc::from(source), Arc::from(destination)))
    }

    /// Use already opened stores.
    pub fn with_stores(
        config: Config,
        source: Arc<dyn SourceStore>,
        destination: Arc<dyn DestinationStore>,
    ) -> Self {
        let kinds = config.entity_graph();
        let memberships = config.membership_rules();
        Self {
            config,
            kinds,
            memberships,
            source,
            destination,
        }
    }

    pub fn plan(&self) -> Result<MigrationPlan> {
        plan(&self.kinds)
    }

    /// Check both connections and report the guard table counts.
    pub async fn health_check(&self) -> Result<HealthCheckResult> {
        self.source.test_connection().await?;
        self.destination.test_connection().await?;

        let mut guard_rows = BTreeMap::new();
        for kind in self.kinds.iter().filter(|k| k.guard) {
            let count = self.destination.count(&kind.table).await?;
            guard_rows.insert(kind.table.clone(), count);
        }

        info!(
            "Health check passed: {} -> {}",
            self.source.store_name(),
            self.destination.store_name()
        );
        Ok(HealthCheckResult {
            source: self.source.store_name().to_string(),
            destination: self.destination.store_name().to_string(),
            guard_rows,
        })
    }

    /// Run the migration.
    ///
    /// Fatal errors abort the run; everything committed before the failure
    /// stays in the destination.
    pub async fn run(&self, cancel: Option<CancellationToken>) -> Result<MigrationResult> {
        let started_at = Utc::now();
        let run_id = uuid::Uuid::new_v4().to_string();
        let cancel = cancel.unwrap_or_default();
        let migration = &self.config.migration;

        info!("Starting migration run: {}", run_id);

        // Phase 1: Plan
        let plan = self.plan()?;
        info!("Phase 1: Planned {} kinds: {}", plan.steps.len(), plan.order().join(", "));

        // Phase 2: Preconditions and cleaning
        info!("Phase 2: Checking destination {}", self.destination.store_name());
        let selection = self.project_selection().await?;
        if migration.clean {
            let existing = self.guard_rows().await?;
            if existing > 0 && !migration.force {
                return Err(MigrateError::Precondition(format!(
                    "destination already holds {} issues; cleaning them requires force",
                    existing
                )));
            }
            if cancel.is_cancelled() {
                return Err(MigrateError::Cancelled);
            }
            self.clean(&plan).await?;
        }
        let remaining = self.guard_rows().await?;
        if remaining > 0 && !migration.append {
            return Err(MigrateError::Precondition(format!(
                "destination already holds {} issues; use append to add to them or clean to remove them",
                remaining
            )));
        }

        // Phase 3: Copy every kind in plan order
        info!("Phase 3: Migrating rows");
        let mut state = RunState::new();
        let mut migrator = TableMigrator::new(
            self.source.as_ref(),
            self.destination.as_ref(),
            &self.memberships,
            &migration.output_project,
        )
        .with_cancellation(&cancel);
        if let Some(selection) = &selection {
            migrator = migrator.with_selection(selection);
        }

        let mut kinds = Vec::with_capacity(plan.steps.len());
        for step in &plan.steps {
            let Some(kind) = self.kinds.iter().find(|k| k.name == step.kind) else {
                continue;
            };
            kinds.push(migrator.migrate(kind, &mut state).await?);
        }

        if state.output_project_key.is_none() {
            state.output_project_key = self.find_output_project().await?;
        }

        // Phase 4: Deferred references and memberships
        info!("Phase 4: Resolving deferred work");
        let second_pass = SecondPass::new(self.source.as_ref(), self.destination.as_ref(), &self.memberships)
            .with_cancellation(&cancel)
            .run(&mut state)
            .await?;

        let completed_at = Utc::now();
        let duration_seconds = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;
        let status = if state.errors.is_empty() {
            "completed"
        } else {
            "completed_with_errors"
        };

        let migrated: u64 = kinds.iter().map(|k| k.migrated).sum();
        info!(
            "Migration {}: {} rows migrated, {} row errors, {} warnings in {:.1}s",
            status,
            migrated,
            state.errors.len(),
            state.warnings.len(),
            duration_seconds
        );

        Ok(MigrationResult {
            run_id,
            config_hash: self.config.hash(),
            status: status.to_string(),
            started_at,
            completed_at,
            duration_seconds,
            plan,
            kinds,
            second_pass,
            errors: state.errors,
            warnings: state.warnings,
        })
    }

    async fn guard_rows(&self) -> Result<i64> {
        let mut total = 0;
        for kind in self.kinds.iter().filter(|k| k.guard) {
            total += self.destination.count(&kind.table).await?;
        }
        Ok(total)
    }

    /// Clean destination tables in reverse plan order.
    async fn clean(&self, plan: &MigrationPlan) -> Result<()> {
        let project = self.find_output_project().await?;

        for step in plan.steps.iter().rev() {
            let Some(kind) = self.kinds.iter().find(|k| k.name == step.kind) else {
                continue;
            };
            match &kind.clean {
                CleanPolicy::Keep => {}
                CleanPolicy::Truncate => {
                    info!("Cleaning {}", kind.table);
                    self.destination.truncate(&kind.table).await?;
                }
                CleanPolicy::Scoped { column } => match project {
                    Some(key) => {
                        let deleted = self
                            .destination
                            .delete(&kind.table, &Predicate::eq(column.clone(), key))
                            .await?;
                        info!("Cleaning {} where {} = {}: {} rows", kind.table, column, key, deleted);
                    }
                    None => warn!(
                        "Output project '{}' not found, nothing to clean in {}",
                        self.config.migration.output_project, kind.table
                    ),
                },
            }
        }

        self.destination.commit().await
    }

    /// The kind collapsed into the output project and its name column.
    fn project_kind(&self) -> Option<(&EntityKind, &String)> {
        let output = &self.config.migration.output_project;
        self.kinds.iter().find_map(|k| match &k.mode {
            MigrationMode::Collapse { name_column, name } if name.as_ref().map_or(true, |n| n == output) => {
                Some((k, name_column))
            }
            _ => None,
        })
    }

    /// Source keys of the configured projects, or `None` to migrate all.
    async fn project_selection(&self) -> Result<Option<ProjectSelection>> {
        let names = &self.config.migration.projects;
        if names.is_empty() {
            return Ok(None);
        }
        let Some((kind, name_column)) = self.project_kind() else {
            return Err(MigrateError::Config(
                "migration.projects needs a kind that collapses into the output project".into(),
            ));
        };
        let pk = kind.primary_key.as_deref().unwrap_or("id");

        let mut keys = BTreeSet::new();
        for name in names {
            let query = SourceQuery::table(&kind.table).filter(Predicate::eq(name_column.clone(), name.as_str()));
            let rows = self.source.query(&query).await?;
            if rows.is_empty() {
                return Err(MigrateError::Precondition(format!(
                    "project '{}' not found in source {}",
                    name, kind.table
                )));
            }
            for row in &rows {
                if let Some(key) = key_value(&kind.name, pk, row.get(pk))? {
                    keys.insert(key);
                }
            }
        }

        info!("Restricting run to projects {} ({:?})", names.join(", "), keys);
        Ok(Some(ProjectSelection {
            kind: kind.name.clone(),
            keys,
        }))
    }

    /// Destination key of the output project, if it already exists.
    async fn find_output_project(&self) -> Result<Option<i64>> {
        let output = &self.config.migration.output_project;
        let Some((kind, name_column)) = self.project_kind() else {
            return Ok(None);
        };
        let pk = kind.primary_key.as_deref().unwrap_or("id");

        let rows = self
            .destination
            .find(&kind.table, &Predicate::eq(name_column.clone(), output.as_str()))
            .await?;
        match rows.as_slice() {
            [] => Ok(None),
            [row] => key_value(&kind.name, pk, row.get(pk)),
            rows => Err(MigrateError::AmbiguousMatch {
                kind: kind.name.clone(),
                key: format!("{}={}", name_column, output),
                matches: rows.len(),
            }),
        }
    }
}

impl MigrationResult {
    /// Convert to JSON string.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }
}
