//! Configuration type definitions.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::{EntityKind, MembershipRule, ValueMap};

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Database the issues are read from.
    pub source: DatabaseConfig,

    /// Database the issues are written to.
    pub target: DatabaseConfig,

    /// Migration behavior configuration.
    #[serde(default)]
    pub migration: MigrationConfig,

    /// Entity graph. Replaces the built-in Mantis graph when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entities: Option<Vec<EntityKind>>,

    /// Membership rules. Replace the rules derived from
    /// [`MigrationConfig::membership`] when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memberships: Option<Vec<MembershipRule>>,
}

/// Connection settings for one MySQL/MariaDB database.
#[derive(Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database type ("mysql" or "mariadb").
    #[serde(default = "default_mysql")]
    pub r#type: String,

    pub host: String,

    /// Database port (default: 3306).
    #[serde(default = "default_mysql_port")]
    pub port: u16,

    pub database: String,

    pub user: String,

    #[serde(default)]
    pub password: String,

    /// TLS mode: disable, prefer, require, verify-ca, verify-full.
    #[serde(default = "default_ssl_mode")]
    pub ssl_mode: String,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            r#type: default_mysql(),
            host: "localhost".to_string(),
            port: default_mysql_port(),
            database: String::new(),
            user: String::new(),
            password: String::new(),
            ssl_mode: default_ssl_mode(),
        }
    }
}

impl fmt::Debug for DatabaseConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DatabaseConfig")
            .field("type", &self.r#type)
            .field("host", &self.host)
            .field("port", &self.port)
            .field("database", &self.database)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("ssl_mode", &self.ssl_mode)
            .finish()
    }
}

/// How the original project of each issue is kept after all projects are
/// collapsed into the output project.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MembershipMode {
    /// One string custom field holding the project name.
    #[default]
    CustomField,
    /// One tag per project name.
    Tags,
    None,
}

/// Migration behavior configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MigrationConfig {
    /// Name of the destination project every source project collapses into.
    #[serde(default = "default_output_project")]
    pub output_project: String,

    /// Clean the destination tables before migrating.
    #[serde(default)]
    pub clean: bool,

    /// Allow cleaning when the destination already holds issues.
    #[serde(default)]
    pub force: bool,

    /// Allow migrating into a destination that still holds issues.
    #[serde(default)]
    pub append: bool,

    #[serde(default)]
    pub membership: MembershipMode,

    /// Name of the custom field used by [`MembershipMode::CustomField`].
    #[serde(default = "default_membership_field_name")]
    pub membership_field_name: String,

    /// Extra value maps merged into the entity graph: kind -> column -> map.
    #[serde(default)]
    pub value_maps: BTreeMap<String, BTreeMap<String, ValueMap>>,

    /// Kinds removed from the entity graph.
    #[serde(default)]
    pub exclude_kinds: Vec<String>,

    /// Source project names to migrate. Empty means every project.
    #[serde(default)]
    pub projects: Vec<String>,
}

impl Default for MigrationConfig {
    fn default() -> Self {
        Self {
            output_project: default_output_project(),
            clean: false,
            force: false,
            append: false,
            membership: MembershipMode::default(),
            membership_field_name: default_membership_field_name(),
            value_maps: BTreeMap::new(),
            exclude_kinds: Vec::new(),
            projects: Vec::new(),
        }
    }
}

fn default_mysql() -> String {
    "mysql".to_string()
}

fn default_mysql_port() -> u16 {
    3306
}

fn default_ssl_mode() -> String {
    "prefer".to_string()
}

fn default_output_project() -> String {
    "Imported Project".to_string()
}

fn default_membership_field_name() -> String {
    "Project".to_string()
}
