//! Run-scoped identity mapping from source keys to destination keys.

use std::collections::{HashMap, HashSet};

use crate::error::{MigrateError, Result};

/// How a destination key came to be associated with a source key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Origin {
    /// The row was inserted by this run. Destination keys of inserted rows
    /// are claimed by exactly one source key.
    Inserted,
    /// The source row was matched to a row that already existed (or to a
    /// row another source key already created). Several source keys may
    /// alias the same destination key.
    Merged,
}

#[derive(Debug, Default)]
struct KindMap {
    forward: HashMap<i64, i64>,
    claimed: HashMap<i64, i64>,
    excluded: HashSet<i64>,
}

/// Per-kind source → destination key maps for one migration run.
///
/// Maps only grow. Key `0` (and NULL) is the "no reference" sentinel and
/// always resolves to itself.
#[derive(Debug, Default)]
pub struct IdentityRegistry {
    maps: HashMap<String, KindMap>,
    completed: HashSet<String>,
}

impl IdentityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `source_key` of `kind` lives at `dest_key`.
    ///
    /// Re-registering the same pair is a no-op.
    pub fn register(&mut self, kind: &str, source_key: i64, dest_key: i64, origin: Origin) -> Result<()> {
        if source_key == 0 {
            return Err(MigrateError::InvalidKey {
                kind: kind.to_string(),
                field: "source key".to_string(),
                value: "0".to_string(),
            });
        }

        let map = self.maps.entry(kind.to_string()).or_default();

        if let Some(&existing) = map.forward.get(&source_key) {
            if existing == dest_key {
                return Ok(());
            }
            return Err(MigrateError::Conflict {
                kind: kind.to_string(),
                source_key,
                existing,
                attempted: dest_key,
            });
        }

        if origin == Origin::Inserted {
            if let Some(&owner) = map.claimed.get(&dest_key) {
                if owner != source_key {
                    return Err(MigrateError::Conflict {
                        kind: kind.to_string(),
                        source_key,
                        existing: dest_key,
                        attempted: dest_key,
                    });
                }
            }
            map.claimed.insert(dest_key, source_key);
        }

        map.forward.insert(source_key, dest_key);
        Ok(())
    }

    /// Resolve a source key, failing if it was never registered.
    pub fn resolve(&self, kind: &str, source_key: Option<i64>) -> Result<i64> {
        self.try_resolve(kind, source_key)
            .ok_or_else(|| MigrateError::UnresolvedReference {
                referenced: kind.to_string(),
                source_key: source_key.unwrap_or_default(),
                context: "identity registry".to_string(),
            })
    }

    /// Resolve a source key; `None` means "not (yet) migrated".
    pub fn try_resolve(&self, kind: &str, source_key: Option<i64>) -> Option<i64> {
        match source_key {
            None | Some(0) => Some(0),
            Some(key) => self.maps.get(kind)?.forward.get(&key).copied(),
        }
    }

    /// Record that `source_key` of `kind` was left out of the run on purpose.
    pub fn exclude(&mut self, kind: &str, source_key: i64) {
        if source_key != 0 {
            self.maps.entry(kind.to_string()).or_default().excluded.insert(source_key);
        }
    }

    /// Whether a reference points at a row that was left out.
    pub fn is_excluded(&self, kind: &str, source_key: Option<i64>) -> bool {
        match source_key {
            None | Some(0) => false,
            Some(key) => self.maps.get(kind).is_some_and(|m| m.excluded.contains(&key)),
        }
    }

    /// Mark every row of `kind` as processed by the table migrator.
    pub fn mark_complete(&mut self, kind: &str) {
        self.completed.insert(kind.to_string());
    }

    /// Whether the table migrator has finished `kind`.
    pub fn is_complete(&self, kind: &str) -> bool {
        self.completed.contains(kind)
    }

    /// Number of source keys registered for `kind`.
    pub fn len(&self, kind: &str) -> usize {
        self.maps.get(kind).map_or(0, |m| m.forward.len())
    }

    pub fn is_empty(&self) -> bool {
        self.maps.values().all(|m| m.forward.is_empty())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_resolve() {
        let mut reg = IdentityRegistry::new();
        reg.register("bug", 5, 105, Origin::Inserted).unwrap();
        assert_eq!(reg.resolve("bug", Some(5)).unwrap(), 105);
        assert_eq!(reg.try_resolve("bug", Some(6)), None);
        assert_eq!(reg.len("bug"), 1);
    }

    #[test]
    fn test_sentinel_resolves_to_itself() {
        let reg = IdentityRegistry::new();
        assert_eq!(reg.resolve("user", Some(0)).unwrap(), 0);
        assert_eq!(reg.resolve("user", None).unwrap(), 0);
    }

    #[test]
    fn test_unknown_key_is_unresolved() {
        let reg = IdentityRegistry::new();
        let err = reg.resolve("user", Some(3)).unwrap_err();
        assert!(matches!(
            err,
            MigrateError::UnresolvedReference { source_key: 3, .. }
        ));
    }

    #[test]
    fn test_remap_to_different_key_conflicts() {
        let mut reg = IdentityRegistry::new();
        reg.register("bug", 5, 105, Origin::Inserted).unwrap();
        reg.register("bug", 5, 105, Origin::Inserted).unwrap();
        let err = reg.register("bug", 5, 106, Origin::Inserted).unwrap_err();
        assert!(matches!(
            err,
            MigrateError::Conflict {
                existing: 105,
                attempted: 106,
                ..
            }
        ));
    }

    #[test]
    fn test_inserted_keys_are_injective() {
        let mut reg = IdentityRegistry::new();
        reg.register("tag", 1, 10, Origin::Inserted).unwrap();
        assert!(reg.register("tag", 2, 10, Origin::Inserted).is_err());
        // A merge may alias an existing destination row.
        reg.register("tag", 3, 10, Origin::Merged).unwrap();
        assert_eq!(reg.resolve("tag", Some(3)).unwrap(), 10);
    }

    #[test]
    fn test_zero_source_key_rejected() {
        let mut reg = IdentityRegistry::new();
        assert!(reg.register("bug", 0, 1, Origin::Inserted).is_err());
    }

    #[test]
    fn test_excluded_keys_are_not_resolved() {
        let mut reg = IdentityRegistry::new();
        reg.exclude("project", 2);
        reg.exclude("project", 0);
        assert!(reg.is_excluded("project", Some(2)));
        assert!(!reg.is_excluded("project", Some(0)));
        assert!(!reg.is_excluded("project", None));
        assert!(!reg.is_excluded("bug", Some(2)));
        assert_eq!(reg.try_resolve("project", Some(2)), None);
    }

    #[test]
    fn test_completion_tracking() {
        let mut reg = IdentityRegistry::new();
        assert!(!reg.is_complete("user"));
        reg.mark_complete("user");
        assert!(reg.is_complete("user"));
        assert!(reg.is_empty());
    }
}
