use crate::core::{MigrationError, MigrationVersion, Result};
use crate::migration::Migration;
use std::collections::BTreeMap;

/// Ordered set of known migrations, lowest version first.
#[derive(Debug, Default)]
pub struct MigrationRegistry {
    migrations: BTreeMap<MigrationVersion, Migration>,
}

impl MigrationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a migration, validating its policy. Versions must be unique.
    pub fn register(&mut self, migration: Migration) -> Result<()> {
        migration.policy().validate()?;
        let version = migration.version();
        if self.migrations.contains_key(&version) {
            return Err(MigrationError::DuplicateVersion(version.get()));
        }
        self.migrations.insert(version, migration);
        Ok(())
    }

    /// Fluent variant of [`register`](Self::register).
    pub fn with(mut self, migration: Migration) -> Result<Self> {
        self.register(migration)?;
        Ok(self)
    }

    pub fn get(&self, version: MigrationVersion) -> Option<&Migration> {
        self.migrations.get(&version)
    }

    /// Migrations in ascending version order.
    pub fn iter(&self) -> impl Iterator<Item = &Migration> {
        self.migrations.values()
    }

    pub fn versions(&self) -> Vec<MigrationVersion> {
        self.migrations.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migration::MigrationPolicy;
    use crate::migration::strategies::Deprecated;

    fn migration(version: u64, name: &str) -> Migration {
        Migration::new(MigrationPolicy::new(version, name), Deprecated)
    }

    #[test]
    fn test_iterates_in_version_order() {
        let registry = MigrationRegistry::new()
            .with(migration(20240301, "third"))
            .unwrap()
            .with(migration(20240101, "first"))
            .unwrap()
            .with(migration(20240201, "second"))
            .unwrap();

        let names: Vec<&str> = registry.iter().map(Migration::name).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
        assert_eq!(registry.len(), 3);
    }

    #[test]
    fn test_duplicate_version_is_rejected() {
        let mut registry = MigrationRegistry::new();
        registry.register(migration(7, "a")).unwrap();
        let err = registry.register(migration(7, "b")).unwrap_err();
        assert_eq!(err, MigrationError::DuplicateVersion(7));
        assert_eq!(registry.get(MigrationVersion::new(7)).map(Migration::name), Some("a"));
    }

    #[test]
    fn test_invalid_policy_is_rejected() {
        let mut registry = MigrationRegistry::new();
        assert!(registry.register(migration(0, "zero")).is_err());
        assert!(registry.is_empty());
    }
}
