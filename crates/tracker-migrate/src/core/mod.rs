//! Core abstractions shared by the engine and the drivers.
//!
//! - [`value`]: column values and ordered records
//! - [`predicate`]: typed equality predicates for dedup and lookups
//! - [`schema`]: entity graph declarations
//! - [`traits`]: source and destination store traits

pub mod predicate;
pub mod schema;
pub mod traits;
pub mod value;

pub use predicate::Predicate;
pub use schema::{
    CleanPolicy, ColumnTemplate, ConflictPolicy, CredentialPolicy, EntityKind, FieldTemplate,
    ForeignKeyField, GroupTarget, LinkTarget, MembershipRule, MigrationMode, Unmapped, ValueMap,
};
pub use traits::{DestinationStore, SourceQuery, SourceStore};
pub use value::{ConfigValue, Record, SqlValue, ZERO_DATETIME};
