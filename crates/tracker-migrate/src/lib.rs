//! # tracker-migrate
//!
//! Referentially consistent migration of bug-tracker data between two
//! relational databases.
//!
//! Rows are copied kind by kind in foreign-key order. Every copied row gets
//! a new key in the destination, and every reference is rewritten through
//! an identity registry, so the destination stays consistent even when it
//! already holds data:
//!
//! - **Dedup** of users, categories, tags and versions by natural key
//! - **Project collapse** of all source projects into one output project
//! - **Deferred references** (issue "duplicate of") fixed in a second pass
//! - **Memberships** keeping the original project as a tag or custom field
//! - **Value maps** for enumerations and timestamp formats
//!
//! ## Example
//!
//! ```rust,no_run
//! use tracker_migrate::{Config, Orchestrator};
//!
//! #[tokio::main]
//! async fn main() -> tracker_migrate::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let orchestrator = Orchestrator::new(config).await?;
//!     let result = orchestrator.run(None).await?;
//!     println!("{} rows skipped", result.errors.len());
//!     Ok(())
//! }
//! ```

pub mod catalog;
pub mod config;
pub mod core;
pub mod drivers;
pub mod engine;
pub mod error;
pub mod orchestrator;

// Re-exports for convenient access
pub use config::{Config, DatabaseConfig, MembershipMode, MigrationConfig};
pub use crate::core::{DestinationStore, EntityKind, MembershipRule, Predicate, Record, SourceStore, SqlValue};
pub use drivers::MemoryStore;
pub use engine::{IdentityRegistry, KindStats, MigrationPlan, RowError, SecondPassStats};
pub use error::{MigrateError, Result};
pub use orchestrator::{migration_plan, HealthCheckResult, MigrationResult, Orchestrator};
