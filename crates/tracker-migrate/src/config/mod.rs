//! Configuration loading and validation.

mod types;
mod validation;

pub use types::*;
pub use validation::validate_graph;

use crate::catalog::mantis;
use crate::core::{EntityKind, MembershipRule};
use crate::error::Result;
use sha2::{Digest, Sha256};
use std::path::Path;

impl Config {
    /// Load configuration from a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Config = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Compute a SHA256 hash of the configuration for the run summary.
    pub fn hash(&self) -> String {
        let yaml = serde_yaml::to_string(self).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(yaml.as_bytes());
        format!("{:x}", hasher.finalize())
    }

    /// The entity graph to migrate: the configured or built-in kinds, minus
    /// excluded kinds, with the configured value maps merged in.
    pub fn entity_graph(&self) -> Vec<EntityKind> {
        let mut kinds = self.entities.clone().unwrap_or_else(mantis::entities);
        kinds.retain(|k| !self.migration.exclude_kinds.contains(&k.name));

        for kind in &mut kinds {
            if let Some(maps) = self.migration.value_maps.get(&kind.name) {
                for (column, map) in maps {
                    kind.value_maps.insert(column.clone(), map.clone());
                }
            }
        }
        kinds
    }

    /// Membership rules for this run.
    pub fn membership_rules(&self) -> Vec<MembershipRule> {
        match &self.memberships {
            Some(rules) => rules.clone(),
            None => mantis::memberships(
                self.migration.membership,
                &self.migration.membership_field_name,
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ValueMap;
    use std::io::Write;

    const MINIMAL: &str = r#"
source:
  host: old-db
  database: bugtracker
  user: reader
  password: secret
target:
  host: new-db
  database: bugtracker
  user: writer
  password: secret
"#;

    #[test]
    fn test_defaults() {
        let config = Config::from_yaml(MINIMAL).unwrap();
        assert_eq!(config.source.port, 3306);
        assert_eq!(config.source.r#type, "mysql");
        assert_eq!(config.migration.output_project, "Imported Project");
        assert_eq!(config.migration.membership, MembershipMode::CustomField);
        assert!(!config.migration.clean);
        assert_eq!(config.entity_graph().len(), mantis::entities().len());
        assert_eq!(config.membership_rules().len(), 1);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(MINIMAL.as_bytes()).unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.target.host, "new-db");
    }

    #[test]
    fn test_missing_file_is_io_error() {
        let err = Config::load("/nonexistent/tracker.yaml").unwrap_err();
        assert_eq!(err.exit_code(), 7);
    }

    #[test]
    fn test_value_maps_and_exclusions_applied() {
        let yaml = format!(
            "{}{}",
            MINIMAL,
            r#"
migration:
  membership: none
  exclude_kinds: [bug_revision]
  projects: [Alpha, Beta]
  value_maps:
    bug:
      status:
        type: lookup
        values: { 10: 50, 80: 90 }
        on_unmapped: passthrough
"#
        );
        let config = Config::from_yaml(&yaml).unwrap();
        let graph = config.entity_graph();
        assert!(graph.iter().all(|k| k.name != "bug_revision"));
        let bug = graph.iter().find(|k| k.name == "bug").unwrap();
        assert!(matches!(bug.value_maps.get("status"), Some(ValueMap::Lookup { .. })));
        assert!(config.membership_rules().is_empty());
        assert_eq!(config.migration.projects, vec!["Alpha", "Beta"]);
    }

    #[test]
    fn test_hash_is_stable_and_sensitive() {
        let a = Config::from_yaml(MINIMAL).unwrap();
        let mut b = a.clone();
        assert_eq!(a.hash(), b.hash());
        assert_eq!(a.hash().len(), 64);
        b.migration.output_project = "Other".into();
        assert_ne!(a.hash(), b.hash());
    }
}
