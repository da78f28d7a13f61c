//! Dependency scheduling of entity kinds.

use std::collections::HashSet;

use serde::Serialize;

use crate::core::EntityKind;
use crate::error::{MigrateError, Result};

/// One scheduled kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanStep {
    pub kind: String,
    pub table: String,
    /// Kinds migrated earlier that this kind references.
    pub depends_on: Vec<String>,
    /// `column -> kind` references left to the second pass.
    pub deferred: Vec<String>,
}

/// Total order over entity kinds consistent with the foreign-key graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct MigrationPlan {
    pub steps: Vec<PlanStep>,
}

impl MigrationPlan {
    /// Kind names in migration order.
    pub fn order(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.kind.as_str()).collect()
    }

    /// Position of a kind in the plan.
    pub fn position(&self, kind: &str) -> Option<usize> {
        self.steps.iter().position(|s| s.kind == kind)
    }
}

/// Order `kinds` so every kind follows the kinds it references.
///
/// Ties are broken by declaration order, so the same graph always yields
/// the same plan. Deferred references and self references do not constrain
/// the order.
pub fn plan(kinds: &[EntityKind]) -> Result<MigrationPlan> {
    let names: HashSet<&str> = kinds.iter().map(|k| k.name.as_str()).collect();
    for kind in kinds {
        for fk in &kind.foreign_keys {
            if !names.contains(fk.references.as_str()) {
                return Err(MigrateError::Config(format!(
                    "{}.{} references unknown kind '{}'",
                    kind.name, fk.column, fk.references
                )));
            }
        }
    }

    let mut placed: HashSet<&str> = HashSet::new();
    let mut steps = Vec::with_capacity(kinds.len());

    while steps.len() < kinds.len() {
        let next = kinds.iter().find(|k| {
            !placed.contains(k.name.as_str()) && k.dependencies().all(|d| placed.contains(d))
        });

        let Some(kind) = next else {
            let remaining: Vec<&EntityKind> = kinds
                .iter()
                .filter(|k| !placed.contains(k.name.as_str()))
                .collect();
            return Err(MigrateError::CyclicDependency(find_cycle(&remaining)));
        };

        placed.insert(kind.name.as_str());
        let mut depends_on: Vec<String> = Vec::new();
        for dep in kind.dependencies() {
            if !depends_on.iter().any(|d| d == dep) {
                depends_on.push(dep.to_string());
            }
        }
        steps.push(PlanStep {
            kind: kind.name.clone(),
            table: kind.table.clone(),
            depends_on,
            deferred: kind
                .foreign_keys
                .iter()
                .filter(|fk| fk.deferred)
                .map(|fk| format!("{} -> {}", fk.column, fk.references))
                .collect(),
        });
    }

    Ok(MigrationPlan { steps })
}

/// Walk unplaced dependencies until a kind repeats; every unplaced kind has
/// at least one unplaced dependency, so the walk always closes a cycle.
fn find_cycle(remaining: &[&EntityKind]) -> Vec<String> {
    let unplaced: HashSet<&str> = remaining.iter().map(|k| k.name.as_str()).collect();
    let mut path: Vec<&str> = Vec::new();
    let mut current = match remaining.first() {
        Some(k) => *k,
        None => return Vec::new(),
    };

    loop {
        if let Some(start) = path.iter().position(|n| *n == current.name) {
            let mut cycle: Vec<String> = path[start..].iter().map(|s| s.to_string()).collect();
            cycle.push(current.name.clone());
            return cycle;
        }
        path.push(current.name.as_str());

        let next = current
            .dependencies()
            .find(|d| unplaced.contains(d))
            .and_then(|d| remaining.iter().find(|k| k.name == d));
        match next {
            Some(k) => current = *k,
            None => return path.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dependencies_precede_dependents() {
        let kinds = vec![
            EntityKind::new("bug", "b")
                .references("reporter_id", "user")
                .references("category_id", "category"),
            EntityKind::new("category", "c").references("project_id", "project"),
            EntityKind::new("user", "u"),
            EntityKind::new("project", "p"),
        ];
        let plan = plan(&kinds).unwrap();
        assert_eq!(plan.order(), vec!["user", "project", "category", "bug"]);
        for kind in &kinds {
            for dep in kind.dependencies() {
                assert!(plan.position(dep) < plan.position(&kind.name));
            }
        }
    }

    #[test]
    fn test_ties_keep_declaration_order() {
        let kinds = vec![
            EntityKind::new("tag", "t"),
            EntityKind::new("user", "u"),
            EntityKind::new("project", "p"),
        ];
        assert_eq!(plan(&kinds).unwrap().order(), vec!["tag", "user", "project"]);
    }

    #[test]
    fn test_deferred_and_self_references_do_not_constrain() {
        let kinds = vec![
            EntityKind::new("bug", "b").defers("duplicate_id", "bug"),
            EntityKind::new("user", "u").defers("default_bug", "bug"),
        ];
        let plan = plan(&kinds).unwrap();
        assert_eq!(plan.order(), vec!["bug", "user"]);
        assert_eq!(plan.steps[0].deferred, vec!["duplicate_id -> bug"]);
    }

    #[test]
    fn test_cycle_is_reported() {
        let kinds = vec![
            EntityKind::new("user", "u"),
            EntityKind::new("a", "a").references("b_id", "b"),
            EntityKind::new("b", "b").references("a_id", "a"),
        ];
        let err = plan(&kinds).unwrap_err();
        match err {
            MigrateError::CyclicDependency(cycle) => assert_eq!(cycle, vec!["a", "b", "a"]),
            other => panic!("unexpected error {:?}", other),
        }
    }

    #[test]
    fn test_unknown_reference_is_config_error() {
        let kinds = vec![EntityKind::new("bug", "b").references("handler_id", "user")];
        assert!(matches!(plan(&kinds), Err(MigrateError::Config(_))));
    }
}
