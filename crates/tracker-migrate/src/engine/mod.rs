//! The entity migration engine.
//!
//! Control flow for one run:
//!
//! 1. [`plan`] orders the entity kinds by their foreign-key graph.
//! 2. [`migrator::TableMigrator`] streams each kind's source rows through
//!    [`dedup`], [`translate`] and [`credentials`], inserts and registers
//!    them in the [`registry`], and queues deferred work.
//! 3. [`second_pass::SecondPass`] drains the queue once every kind is done.
//!
//! All state lives in a [`RunState`] created fresh for each run.

pub mod credentials;
pub mod dedup;
pub mod migrator;
pub mod plan;
pub mod registry;
pub mod second_pass;
pub mod translate;

use serde::Serialize;

pub use dedup::DedupOutcome;
pub use migrator::{KindStats, ProjectSelection, TableMigrator};
pub use plan::{plan, MigrationPlan, PlanStep};
pub use registry::{IdentityRegistry, Origin};
pub use second_pass::{Attachment, DeferredField, DeferredWork, SecondPass, SecondPassStats};
pub use translate::{translate, Translation};

use crate::error::MigrateError;

/// A row that was skipped.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowError {
    pub kind: String,
    pub source_key: Option<i64>,
    pub message: String,
}

/// Mutable state of one migration run.
#[derive(Debug, Default)]
pub struct RunState {
    pub registry: IdentityRegistry,
    pub deferred: Vec<DeferredWork>,
    pub errors: Vec<RowError>,
    pub warnings: Vec<String>,
    /// Destination key of the collapsed output project, once known.
    pub output_project_key: Option<i64>,
}

impl RunState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a non-fatal row failure.
    pub fn record_error(&mut self, kind: &str, source_key: Option<i64>, err: &MigrateError) {
        let message = match err {
            MigrateError::RowPersist { message, .. } => message.clone(),
            other => other.to_string(),
        };
        self.errors.push(RowError {
            kind: kind.to_string(),
            source_key,
            message,
        });
    }
}
