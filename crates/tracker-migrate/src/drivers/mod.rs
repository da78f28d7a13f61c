//! Store implementations.
//!
//! - [`mysql`]: MySQL/MariaDB source and destination
//! - [`memory`]: in-memory store for tests and embedding

pub mod memory;
pub mod mysql;

pub use memory::MemoryStore;
pub use mysql::{MysqlDestination, MysqlSource};

use crate::config::DatabaseConfig;
use crate::core::{DestinationStore, SourceStore};
use crate::error::{MigrateError, Result};

/// Supported database engines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbType {
    Mysql,
}

impl DbType {
    /// Parse a database type string.
    ///
    /// # Errors
    ///
    /// Returns an error if the database type is not recognized.
    pub fn from_db_type(db_type: &str) -> Result<Self> {
        match db_type.to_lowercase().as_str() {
            "mysql" | "mariadb" => Ok(DbType::Mysql),
            other => Err(MigrateError::Config(format!(
                "Unknown database type: '{}'. Supported types: mysql",
                other
            ))),
        }
    }
}

/// Open the source store described by `config`.
pub async fn connect_source(config: &DatabaseConfig) -> Result<Box<dyn SourceStore>> {
    match DbType::from_db_type(&config.r#type)? {
        DbType::Mysql => Ok(Box::new(MysqlSource::connect(config).await?)),
    }
}

/// Open the destination store described by `config`.
pub async fn connect_destination(config: &DatabaseConfig) -> Result<Box<dyn DestinationStore>> {
    match DbType::from_db_type(&config.r#type)? {
        DbType::Mysql => Ok(Box::new(MysqlDestination::connect(config).await?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_db_type() {
        assert_eq!(DbType::from_db_type("mysql").unwrap(), DbType::Mysql);
        assert_eq!(DbType::from_db_type("MariaDB").unwrap(), DbType::Mysql);
        assert!(DbType::from_db_type("postgres").is_err());
    }

    #[tokio::test]
    async fn test_unknown_type_fails_before_connecting() {
        let config = DatabaseConfig {
            r#type: "oracle".into(),
            ..DatabaseConfig::default()
        };
        let err = connect_destination(&config).await.err().unwrap();
        assert!(matches!(err, MigrateError::Config(_)));
    }
}
