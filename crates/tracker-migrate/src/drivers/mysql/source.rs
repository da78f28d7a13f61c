//! MySQL/MariaDB source store.
//!
//! Uses SQLx for connection pooling. Rows are decoded dynamically from the
//! column type reported by the server, so no schema has to be declared.

use std::time::Duration;

use async_trait::async_trait;
use sqlx::mysql::{
    MySql, MySqlArguments, MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlRow, MySqlSslMode,
};
use sqlx::query::Query;
use sqlx::{Column, Row, TypeInfo, ValueRef};
use tracing::{debug, info, warn};

use crate::config::DatabaseConfig;
use crate::core::{Record, SourceQuery, SourceStore, SqlValue, ZERO_DATETIME};
use crate::error::{MigrateError, Result};

use super::dialect::MysqlDialect;

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Reads are sequential; a small pool is plenty.
const MAX_CONNECTIONS: u32 = 2;

/// MySQL/MariaDB source store.
pub struct MysqlSource {
    pool: MySqlPool,
    dialect: MysqlDialect,
    name: String,
}

impl MysqlSource {
    /// Connect using the given configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let options = MySqlConnectOptions::new()
            .host(&config.host)
            .port(config.port)
            .database(&config.database)
            .username(&config.user)
            .password(&config.password)
            .ssl_mode(ssl_mode(&config.ssl_mode));

        let pool = MySqlPoolOptions::new()
            .max_connections(MAX_CONNECTIONS)
            .acquire_timeout(POOL_CONNECTION_TIMEOUT)
            .connect_with(options)
            .await
            .map_err(|e| MigrateError::pool(e, "creating MySQL source pool"))?;

        info!(
            "Connected to MySQL source: {}:{}/{}",
            config.host, config.port, config.database
        );

        Ok(Self {
            pool,
            dialect: MysqlDialect::new(),
            name: format!("mysql://{}:{}/{}", config.host, config.port, config.database),
        })
    }
}

fn ssl_mode(mode: &str) -> MySqlSslMode {
    match mode.to_lowercase().as_str() {
        "disable" => MySqlSslMode::Disabled,
        "prefer" => MySqlSslMode::Preferred,
        "require" => MySqlSslMode::Required,
        "verify-ca" | "verify_ca" => MySqlSslMode::VerifyCa,
        "verify-full" | "verify_identity" => MySqlSslMode::VerifyIdentity,
        other => {
            warn!("Unknown ssl_mode '{}', defaulting to Preferred", other);
            MySqlSslMode::Preferred
        }
    }
}

/// Bind one parameter.
fn bind_value<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &SqlValue,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        SqlValue::Null => query.bind(None::<String>),
        SqlValue::Int(v) => query.bind(*v),
        SqlValue::Text(s) => query.bind(s.clone()),
        SqlValue::Timestamp(t) => query.bind(*t),
        SqlValue::Bytes(b) => query.bind(b.clone()),
    }
}

/// Decode a row using the server-reported column types.
///
/// A value that cannot be represented is an error naming the column, never
/// a silent NULL.
fn row_to_record(row: &MySqlRow, table: &str) -> Result<Record> {
    let mut record = Record::new();
    for (i, column) in row.columns().iter().enumerate() {
        let type_name = column.type_info().name().to_lowercase();
        let value = decode_column(row, i, &type_name).map_err(|e| {
            MigrateError::pool(e, format!("decoding {}.{} ({})", table, column.name(), type_name))
        })?;
        record.set(column.name(), value);
    }
    Ok(record)
}

fn decode_column(row: &MySqlRow, i: usize, type_name: &str) -> std::result::Result<SqlValue, sqlx::Error> {
    if row.try_get_raw(i)?.is_null() {
        return Ok(SqlValue::Null);
    }

    let base = type_name.split_whitespace().next().unwrap_or_default();
    let value = match base {
        "tinyint" | "smallint" | "mediumint" | "int" | "integer" | "bigint" | "year" | "boolean" => {
            if type_name.contains("unsigned") {
                unsigned_value(row.try_get::<u64, _>(i)?)
            } else {
                SqlValue::Int(row.try_get::<i64, _>(i)?)
            }
        }
        "datetime" | "timestamp" => match row.try_get::<chrono::NaiveDateTime, _>(i) {
            Ok(t) => SqlValue::Timestamp(t),
            Err(e) => zero_date(row, i).ok_or(e)?,
        },
        "date" => match row.try_get::<chrono::NaiveDate, _>(i) {
            Ok(d) => d
                .and_hms_opt(0, 0, 0)
                .map(SqlValue::Timestamp)
                .unwrap_or_else(|| SqlValue::Text(d.to_string())),
            Err(e) => zero_date(row, i).ok_or(e)?,
        },
        "binary" | "varbinary" | "blob" | "tinyblob" | "mediumblob" | "longblob" => {
            SqlValue::Bytes(row.try_get::<Vec<u8>, _>(i)?)
        }
        "float" | "double" | "real" => SqlValue::Text(row.try_get::<f64, _>(i)?.to_string()),
        // Text, enum, decimal, json and anything else: fall back to string
        _ => match row.try_get::<String, _>(i) {
            Ok(s) => SqlValue::Text(s),
            Err(_) => SqlValue::Bytes(row.try_get::<Vec<u8>, _>(i)?),
        },
    };
    Ok(value)
}

/// Unsigned values above `i64::MAX` keep their digits as text.
fn unsigned_value(v: u64) -> SqlValue {
    i64::try_from(v)
        .map(SqlValue::Int)
        .unwrap_or_else(|_| SqlValue::Text(v.to_string()))
}

/// MySQL's zero date has no chrono form; keep it as the literal.
fn zero_date(row: &MySqlRow, i: usize) -> Option<SqlValue> {
    let raw = row.try_get_unchecked::<String, _>(i).ok()?;
    is_zero_date(&raw).then(|| SqlValue::Text(ZERO_DATETIME.to_string()))
}

/// The binary protocol sends the zero date as an empty value.
fn is_zero_date(raw: &str) -> bool {
    raw.is_empty() || raw.starts_with("0000-00-00")
}

#[async_trait]
impl SourceStore for MysqlSource {
    async fn query(&self, query: &SourceQuery) -> Result<Vec<Record>> {
        let (sql, params) = self.dialect.select(query);
        debug!("source: {}", sql);

        let mut q = sqlx::query(&sql);
        for p in &params {
            q = bind_value(q, p);
        }
        let rows = q
            .fetch_all(&self.pool)
            .await
            .map_err(|e| MigrateError::pool(e, format!("reading {}", query.table)))?;

        rows.iter().map(|row| row_to_record(row, &query.table)).collect()
    }

    fn store_name(&self) -> &str {
        &self.name
    }

    async fn test_connection(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .map_err(|e| MigrateError::pool(e, "testing MySQL source connection"))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ssl_mode_mapping() {
        assert!(matches!(ssl_mode("disable"), MySqlSslMode::Disabled));
        assert!(matches!(ssl_mode("REQUIRE"), MySqlSslMode::Required));
        assert!(matches!(ssl_mode("verify_identity"), MySqlSslMode::VerifyIdentity));
        assert!(matches!(ssl_mode("bogus"), MySqlSslMode::Preferred));
    }

    #[test]
    fn test_unsigned_overflow_keeps_digits() {
        assert_eq!(unsigned_value(42), SqlValue::Int(42));
        assert_eq!(
            unsigned_value(u64::MAX),
            SqlValue::Text("18446744073709551615".into())
        );
    }

    #[test]
    fn test_zero_date_detection() {
        assert!(is_zero_date(""));
        assert!(is_zero_date("0000-00-00 00:00:00"));
        assert!(is_zero_date("0000-00-00"));
        assert!(!is_zero_date("2004-02-29 12:00:00"));
        assert!(!is_zero_date("garbage"));
    }
}
