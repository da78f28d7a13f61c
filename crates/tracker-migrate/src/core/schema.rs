//! Entity graph declarations.
//!
//! An [`EntityKind`] describes one table to migrate: how its rows are keyed,
//! which columns reference other kinds, how rows are recognised as already
//! present in the destination, and how individual values are converted.
//! The whole graph is plain data so it can be declared in YAML or built in
//! code (see [`crate::catalog`]).

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use super::value::ConfigValue;

/// A logical record type migrated as a unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityKind {
    /// Unique name used for registry lookups and references ("bug", "user").
    pub name: String,

    /// Table name, identical in source and destination.
    pub table: String,

    /// Surrogate key column, `id` unless set. Kinds declared with
    /// `primary_key: null` (link tables) are never registered and cannot be
    /// referenced.
    #[serde(default = "default_primary_key")]
    pub primary_key: Option<String>,

    /// Columns compared for dedup. `None` means every row is new.
    #[serde(default)]
    pub natural_key: Option<Vec<String>>,

    /// Columns holding keys of other kinds.
    #[serde(default)]
    pub foreign_keys: Vec<ForeignKeyField>,

    /// Per-column value conversions, keyed by column name.
    #[serde(default)]
    pub value_maps: BTreeMap<String, ValueMap>,

    /// Source columns dropped before insertion.
    #[serde(default)]
    pub exclude_columns: Vec<String>,

    /// Generate authentication material for rows that are inserted.
    #[serde(default)]
    pub credentials: Option<CredentialPolicy>,

    /// Retry policy when the destination reports a unique violation.
    #[serde(default)]
    pub on_unique_violation: Option<ConflictPolicy>,

    #[serde(default)]
    pub mode: MigrationMode,

    #[serde(default)]
    pub clean: CleanPolicy,

    /// Rows of guarded kinds make the destination count as "non-empty".
    #[serde(default)]
    pub guard: bool,
}

fn default_primary_key() -> Option<String> {
    Some("id".to_string())
}

impl EntityKind {
    /// Create a plain copy kind with an `id` primary key.
    pub fn new(name: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            table: table.into(),
            primary_key: default_primary_key(),
            natural_key: None,
            foreign_keys: Vec::new(),
            value_maps: BTreeMap::new(),
            exclude_columns: Vec::new(),
            credentials: None,
            on_unique_violation: None,
            mode: MigrationMode::Copy,
            clean: CleanPolicy::Truncate,
            guard: false,
        }
    }

    /// Drop the surrogate key (link tables).
    #[must_use]
    pub fn keyless(mut self) -> Self {
        self.primary_key = None;
        self
    }

    #[must_use]
    pub fn natural_key(mut self, columns: &[&str]) -> Self {
        self.natural_key = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    #[must_use]
    pub fn references(mut self, column: &str, kind: &str) -> Self {
        self.foreign_keys.push(ForeignKeyField {
            column: column.to_string(),
            references: kind.to_string(),
            deferred: false,
        });
        self
    }

    /// Declare a reference resolved by the second pass.
    #[must_use]
    pub fn defers(mut self, column: &str, kind: &str) -> Self {
        self.foreign_keys.push(ForeignKeyField {
            column: column.to_string(),
            references: kind.to_string(),
            deferred: true,
        });
        self
    }

    #[must_use]
    pub fn map_value(mut self, column: &str, map: ValueMap) -> Self {
        self.value_maps.insert(column.to_string(), map);
        self
    }

    #[must_use]
    pub fn clean(mut self, policy: CleanPolicy) -> Self {
        self.clean = policy;
        self
    }

    #[must_use]
    pub fn guard(mut self) -> Self {
        self.guard = true;
        self
    }

    /// Foreign-key declaration for a column, if any.
    pub fn foreign_key(&self, column: &str) -> Option<&ForeignKeyField> {
        self.foreign_keys.iter().find(|fk| fk.column == column)
    }

    /// Kinds this kind must be scheduled after.
    pub fn dependencies(&self) -> impl Iterator<Item = &str> {
        self.foreign_keys
            .iter()
            .filter(|fk| !fk.deferred && fk.references != self.name)
            .map(|fk| fk.references.as_str())
    }
}

/// A column holding the key of another kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyField {
    pub column: String,

    /// Name of the referenced [`EntityKind`].
    pub references: String,

    /// Resolve in the second pass instead of requiring the referenced kind to
    /// be migrated first. Needed for self references and back references.
    #[serde(default)]
    pub deferred: bool,
}

/// Conversion applied to a single column during translation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValueMap {
    /// Table lookup (status/priority/severity style enumerations).
    Lookup {
        values: BTreeMap<ConfigValue, ConfigValue>,
        #[serde(default)]
        on_unmapped: Unmapped,
        /// Replacement used when `on_unmapped` is `default`.
        #[serde(default)]
        default: Option<ConfigValue>,
    },
    /// Integer seconds since the epoch to a timestamp.
    UnixToDatetime,
    /// Timestamp to integer seconds since the epoch.
    DatetimeToUnix,
    /// Ignore the source value.
    Constant { value: ConfigValue },
}

/// What a lookup does with a value it has no entry for.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Unmapped {
    /// Abort the run with `UnmappedValue`.
    #[default]
    Fail,
    /// Keep the source value unchanged.
    Passthrough,
    /// Use the map's `default` value.
    Default,
}

/// Authentication material generated for newly inserted account rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialPolicy {
    /// Column receiving the password digest.
    pub password_column: String,

    /// Column receiving the unique login token.
    pub token_column: String,

    #[serde(default = "default_password_length")]
    pub password_length: usize,

    #[serde(default = "default_token_length")]
    pub token_length: usize,

    /// Width of the stored digest (hex characters).
    #[serde(default = "default_digest_width")]
    pub digest_width: usize,
}

impl CredentialPolicy {
    pub fn new(password_column: &str, token_column: &str) -> Self {
        Self {
            password_column: password_column.to_string(),
            token_column: token_column.to_string(),
            password_length: default_password_length(),
            token_length: default_token_length(),
            digest_width: default_digest_width(),
        }
    }
}

fn default_password_length() -> usize {
    16
}

fn default_token_length() -> usize {
    64
}

fn default_digest_width() -> usize {
    32
}

/// "On unique-constraint violation, increment `increment` and retry."
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictPolicy {
    /// Integer column bumped by one per attempt.
    pub increment: String,

    #[serde(default = "default_retries")]
    pub retries: u32,
}

fn default_retries() -> u32 {
    1
}

/// How source rows of a kind become destination rows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MigrationMode {
    /// One destination row per source row.
    #[default]
    Copy,
    /// All source rows map onto a single destination row found or created by
    /// `name_column = name` (`name` defaults to the output project).
    Collapse {
        name_column: String,
        #[serde(default)]
        name: Option<String>,
    },
}

/// What `clean` does to a kind's destination table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CleanPolicy {
    #[default]
    Truncate,
    /// Never touched (users, projects).
    Keep,
    /// Delete only rows whose `column` equals the output project key.
    Scoped { column: String },
}

/// Attach every migrated member row to a group derived from a source field.
///
/// Used to keep the source project of each issue visible after all projects
/// have been collapsed into one.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MembershipRule {
    pub name: String,

    /// Kind whose migrated rows are attached ("bug").
    pub member_kind: String,

    /// Source column of the member holding the group's source key.
    pub group_field: String,

    /// Source table holding the group label.
    pub group_table: String,

    #[serde(default = "default_key_column")]
    pub group_key_column: String,

    /// Column of `group_table` rendered as `{label}`.
    pub group_label_column: String,

    pub group: GroupTarget,

    pub link: LinkTarget,
}

fn default_key_column() -> String {
    "id".to_string()
}

/// Destination row representing a group, found or inserted on demand.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupTarget {
    pub table: String,

    /// Key column returned for `{group_key}`.
    #[serde(default = "default_key_column")]
    pub key: String,

    /// Subset of `columns` used to look the group up.
    pub lookup: Vec<String>,

    pub columns: Vec<ColumnTemplate>,

    /// Rows inserted once, right after the group row is created.
    #[serde(default)]
    pub on_create: Vec<LinkTarget>,
}

/// A row inserted per member (or per created group).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkTarget {
    pub table: String,
    pub columns: Vec<ColumnTemplate>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ColumnTemplate {
    pub column: String,
    pub value: FieldTemplate,
}

impl ColumnTemplate {
    pub fn new(column: &str, value: FieldTemplate) -> Self {
        Self {
            column: column.to_string(),
            value,
        }
    }
}

/// Value source for a generated column.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FieldTemplate {
    Value { value: ConfigValue },
    /// The group label read from the source.
    Label,
    /// Text with `{label}` substituted.
    Format { template: String },
    /// Current time in unix seconds.
    Now,
    GroupKey,
    MemberKey,
    /// Destination key of the output project.
    OutputProject,
}

impl FieldTemplate {
    pub fn value(v: impl Into<ConfigValue>) -> Self {
        FieldTemplate::Value { value: v.into() }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_entity_kind_from_yaml_defaults() {
        let yaml = r#"
name: bug
table: mantis_bug_table
primary_key: id
foreign_keys:
  - { column: duplicate_id, references: bug, deferred: true }
  - { column: category_id, references: category }
"#;
        let kind: EntityKind = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(kind.mode, MigrationMode::Copy);
        assert_eq!(kind.clean, CleanPolicy::Truncate);
        assert!(!kind.guard);
        assert_eq!(kind.dependencies().collect::<Vec<_>>(), vec!["category"]);
    }

    #[test]
    fn test_primary_key_defaults_to_id_unless_null() {
        let kind: EntityKind = serde_yaml::from_str("{ name: note, table: notes }").unwrap();
        assert_eq!(kind.primary_key.as_deref(), Some("id"));

        let link: EntityKind =
            serde_yaml::from_str("{ name: watch, table: watches, primary_key: null }").unwrap();
        assert_eq!(link.primary_key, None);
    }

    #[test]
    fn test_lookup_map_from_yaml() {
        let yaml = r#"
type: lookup
values: { 10: new, 80: resolved }
on_unmapped: default
default: new
"#;
        let map: ValueMap = serde_yaml::from_str(yaml).unwrap();
        match map {
            ValueMap::Lookup {
                values,
                on_unmapped,
                default,
            } => {
                assert_eq!(values.get(&ConfigValue::Int(80)), Some(&ConfigValue::Text("resolved".into())));
                assert_eq!(on_unmapped, Unmapped::Default);
                assert_eq!(default, Some(ConfigValue::Text("new".into())));
            }
            other => panic!("unexpected map {:?}", other),
        }
    }

    #[test]
    fn test_collapse_and_scoped_clean_from_yaml() {
        let mode: MigrationMode =
            serde_yaml::from_str("{ type: collapse, name_column: name }").unwrap();
        assert_eq!(
            mode,
            MigrationMode::Collapse {
                name_column: "name".into(),
                name: None
            }
        );
        let clean: CleanPolicy = serde_yaml::from_str("{ type: scoped, column: project_id }").unwrap();
        assert_eq!(
            clean,
            CleanPolicy::Scoped {
                column: "project_id".into()
            }
        );
    }

    #[test]
    fn test_credential_policy_defaults() {
        let p: CredentialPolicy =
            serde_yaml::from_str("{ password_column: password, token_column: cookie_string }").unwrap();
        assert_eq!(p, CredentialPolicy::new("password", "cookie_string"));
        assert_eq!(p.token_length, 64);
    }
}
