//! Configuration validation.

use std::collections::HashSet;

use super::{Config, DatabaseConfig, MigrationConfig};
use crate::core::{ColumnTemplate, EntityKind, FieldTemplate, MembershipRule, MigrationMode, Unmapped, ValueMap};
use crate::drivers::DbType;
use crate::error::{MigrateError, Result};

/// Validate the configuration.
pub fn validate(config: &Config) -> Result<()> {
    validate_database("source", &config.source)?;
    validate_database("target", &config.target)?;

    // Cannot migrate into the database being read
    if config.source.host == config.target.host
        && config.source.port == config.target.port
        && config.source.database == config.target.database
    {
        return Err(MigrateError::Config(
            "source and target cannot be the same database".into(),
        ));
    }

    let migration = &config.migration;
    if migration.output_project.trim().is_empty() {
        return Err(MigrateError::Config(
            "migration.output_project must not be empty".into(),
        ));
    }
    if migration.force && !migration.clean {
        return Err(MigrateError::Config(
            "migration.force only applies together with migration.clean".into(),
        ));
    }

    let declared: Vec<String> = match &config.entities {
        Some(kinds) => kinds.iter().map(|k| k.name.clone()).collect(),
        None => crate::catalog::mantis::entities().into_iter().map(|k| k.name).collect(),
    };
    for name in &migration.exclude_kinds {
        if !declared.contains(name) {
            return Err(MigrateError::Config(format!(
                "migration.exclude_kinds: unknown kind '{}'",
                name
            )));
        }
    }
    for name in migration.value_maps.keys() {
        if !declared.contains(name) || migration.exclude_kinds.contains(name) {
            return Err(MigrateError::Config(format!(
                "migration.value_maps: unknown kind '{}'",
                name
            )));
        }
    }

    let graph = config.entity_graph();
    validate_graph(&graph)?;
    validate_memberships(&config.membership_rules(), &graph)?;
    validate_projects(migration, &graph)?;

    Ok(())
}

fn validate_projects(migration: &MigrationConfig, kinds: &[EntityKind]) -> Result<()> {
    if migration.projects.is_empty() {
        return Ok(());
    }

    let mut seen = HashSet::new();
    for name in &migration.projects {
        if name.trim().is_empty() {
            return Err(MigrateError::Config(
                "migration.projects: project names must not be empty".into(),
            ));
        }
        if !seen.insert(name.as_str()) {
            return Err(MigrateError::Config(format!(
                "migration.projects: '{}' listed twice",
                name
            )));
        }
    }

    let collapses_into_output = kinds.iter().any(|k| {
        matches!(&k.mode, MigrationMode::Collapse { name, .. }
            if name.as_ref().map_or(true, |n| n == &migration.output_project))
    });
    if !collapses_into_output {
        return Err(MigrateError::Config(
            "migration.projects needs a kind that collapses into the output project".into(),
        ));
    }
    Ok(())
}

fn validate_database(role: &str, db: &DatabaseConfig) -> Result<()> {
    if db.host.is_empty() {
        return Err(MigrateError::Config(format!("{}.host is required", role)));
    }
    if db.database.is_empty() {
        return Err(MigrateError::Config(format!("{}.database is required", role)));
    }
    if db.user.is_empty() {
        return Err(MigrateError::Config(format!("{}.user is required", role)));
    }
    DbType::from_db_type(&db.r#type)
        .map_err(|_| MigrateError::Config(format!("{}.type must be 'mysql', got '{}'", role, db.r#type)))?;
    Ok(())
}

/// Structural checks on an entity graph. Cycles are reported by the planner.
pub fn validate_graph(kinds: &[EntityKind]) -> Result<()> {
    let mut names = HashSet::new();
    for kind in kinds {
        if !names.insert(kind.name.as_str()) {
            return Err(MigrateError::Config(format!("duplicate entity kind '{}'", kind.name)));
        }
    }

    for kind in kinds {
        let name = &kind.name;
        if kind.table.is_empty() {
            return Err(MigrateError::Config(format!("{}: table is required", name)));
        }
        if matches!(&kind.natural_key, Some(cols) if cols.is_empty()) {
            return Err(MigrateError::Config(format!("{}: natural_key must not be empty", name)));
        }
        if matches!(kind.mode, MigrationMode::Collapse { .. }) && kind.primary_key.is_none() {
            return Err(MigrateError::Config(format!(
                "{}: collapse mode needs a primary key",
                name
            )));
        }

        for fk in &kind.foreign_keys {
            let Some(target) = kinds.iter().find(|k| k.name == fk.references) else {
                return Err(MigrateError::Config(format!(
                    "{}.{} references unknown kind '{}'",
                    name, fk.column, fk.references
                )));
            };
            if target.primary_key.is_none() {
                return Err(MigrateError::Config(format!(
                    "{}.{} references '{}', which has no primary key",
                    name, fk.column, fk.references
                )));
            }
            if fk.deferred && kind.primary_key.is_none() {
                return Err(MigrateError::Config(format!(
                    "{}.{} is deferred but {} has no primary key to update by",
                    name, fk.column, name
                )));
            }
            if !fk.deferred && fk.references == *name {
                return Err(MigrateError::Config(format!(
                    "{}.{} references its own kind and must be deferred",
                    name, fk.column
                )));
            }
        }

        for (column, map) in &kind.value_maps {
            if let ValueMap::Lookup {
                on_unmapped: Unmapped::Default,
                default: None,
                ..
            } = map
            {
                return Err(MigrateError::Config(format!(
                    "{}.{}: on_unmapped 'default' needs a default value",
                    name, column
                )));
            }
        }

        if let Some(credentials) = &kind.credentials {
            if credentials.digest_width == 0 || credentials.token_length == 0 {
                return Err(MigrateError::Config(format!(
                    "{}: credential widths must be at least 1",
                    name
                )));
            }
        }
    }

    Ok(())
}

fn validate_memberships(rules: &[MembershipRule], kinds: &[EntityKind]) -> Result<()> {
    let mut names = HashSet::new();
    for rule in rules {
        if !names.insert(rule.name.as_str()) {
            return Err(MigrateError::Config(format!("duplicate membership rule '{}'", rule.name)));
        }
        let Some(member) = kinds.iter().find(|k| k.name == rule.member_kind) else {
            return Err(MigrateError::Config(format!(
                "membership '{}': unknown member kind '{}'",
                rule.name, rule.member_kind
            )));
        };
        if member.primary_key.is_none() {
            return Err(MigrateError::Config(format!(
                "membership '{}': member kind '{}' has no primary key",
                rule.name, rule.member_kind
            )));
        }
        if rule.group.lookup.is_empty() {
            return Err(MigrateError::Config(format!(
                "membership '{}': group.lookup must name at least one column",
                rule.name
            )));
        }
        for column in &rule.group.lookup {
            if !rule.group.columns.iter().any(|c| &c.column == column) {
                return Err(MigrateError::Config(format!(
                    "membership '{}': lookup column '{}' is not among group.columns",
                    rule.name, column
                )));
            }
        }
        // The group key does not exist yet while the group row is rendered
        if uses_keys(&rule.group.columns) {
            return Err(MigrateError::Config(format!(
                "membership '{}': group.columns cannot use group_key or member_key",
                rule.name
            )));
        }
        if rule.group.on_create.iter().any(|t| has_member_key(&t.columns)) {
            return Err(MigrateError::Config(format!(
                "membership '{}': group.on_create cannot use member_key",
                rule.name
            )));
        }
    }
    Ok(())
}

fn uses_keys(columns: &[ColumnTemplate]) -> bool {
    columns
        .iter()
        .any(|c| matches!(c.value, FieldTemplate::GroupKey | FieldTemplate::MemberKey))
}

fn has_member_key(columns: &[ColumnTemplate]) -> bool {
    columns.iter().any(|c| matches!(c.value, FieldTemplate::MemberKey))
}
