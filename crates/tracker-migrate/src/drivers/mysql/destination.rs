//! MySQL/MariaDB destination store.
//!
//! Uses one mysql_async connection for the whole run so that the explicit
//! transaction opened before the first mutation spans every statement up to
//! the next [`DestinationStore::commit`].

use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Timelike};
use mysql_async::prelude::*;
use mysql_async::{Conn, Opts, OptsBuilder, Params, SslOpts, Value};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::config::DatabaseConfig;
use crate::core::{DestinationStore, Predicate, Record, SqlValue, ZERO_DATETIME};
use crate::error::{MigrateError, Result};

use super::dialect::MysqlDialect;

/// MySQL error code for duplicate key entries.
const ER_DUP_ENTRY: u16 = 1062;

struct Session {
    conn: Conn,
    in_transaction: bool,
}

/// MySQL/MariaDB destination store.
pub struct MysqlDestination {
    session: Mutex<Session>,
    dialect: MysqlDialect,
    name: String,
}

impl MysqlDestination {
    /// Connect using the given configuration.
    pub async fn connect(config: &DatabaseConfig) -> Result<Self> {
        let ssl_opts = match config.ssl_mode.to_lowercase().as_str() {
            "disable" => {
                warn!("MySQL TLS is disabled. Credentials will be transmitted in plaintext.");
                None
            }
            "verify-ca" | "verify_ca" | "verify-full" | "verify_identity" => Some(SslOpts::default()),
            "prefer" | "require" => Some(SslOpts::default().with_danger_accept_invalid_certs(true)),
            other => {
                warn!("Unknown ssl_mode '{}', defaulting to Preferred", other);
                Some(SslOpts::default().with_danger_accept_invalid_certs(true))
            }
        };

        let mut builder = OptsBuilder::default()
            .ip_or_hostname(&config.host)
            .tcp_port(config.port)
            .db_name(Some(&config.database))
            .user(Some(&config.user))
            .pass(Some(&config.password))
            // Use utf8mb4 for full Unicode support
            .init(vec!["SET NAMES utf8mb4"]);
        if let Some(ssl) = ssl_opts {
            builder = builder.ssl_opts(ssl);
        }

        let opts: Opts = builder.into();
        let conn = Conn::new(opts)
            .await
            .map_err(|e| MigrateError::pool(e, "connecting to MySQL destination"))?;

        info!(
            "Connected to MySQL destination: {}:{}/{}",
            config.host, config.port, config.database
        );

        Ok(Self {
            session: Mutex::new(Session {
                conn,
                in_transaction: false,
            }),
            dialect: MysqlDialect::new(),
            name: format!("mysql://{}:{}/{}", config.host, config.port, config.database),
        })
    }

    async fn begin(session: &mut Session) -> Result<()> {
        if !session.in_transaction {
            session
                .conn
                .query_drop("START TRANSACTION")
                .await
                .map_err(|e| MigrateError::pool(e, "starting transaction"))?;
            session.in_transaction = true;
        }
        Ok(())
    }
}

fn params(values: Vec<SqlValue>) -> Params {
    if values.is_empty() {
        Params::Empty
    } else {
        Params::Positional(values.iter().map(to_mysql).collect())
    }
}

fn to_mysql(value: &SqlValue) -> Value {
    match value {
        SqlValue::Null => Value::NULL,
        SqlValue::Int(v) => Value::Int(*v),
        SqlValue::Text(s) => Value::from(s.as_str()),
        SqlValue::Bytes(b) => Value::Bytes(b.clone()),
        SqlValue::Timestamp(t) => Value::Date(
            t.year() as u16,
            t.month() as u8,
            t.day() as u8,
            t.hour() as u8,
            t.minute() as u8,
            t.second() as u8,
            t.nanosecond() / 1_000,
        ),
    }
}

fn from_mysql(value: &Value) -> SqlValue {
    match value {
        Value::NULL => SqlValue::Null,
        Value::Int(v) => SqlValue::Int(*v),
        Value::UInt(v) => i64::try_from(*v)
            .map(SqlValue::Int)
            .unwrap_or_else(|_| SqlValue::Text(v.to_string())),
        Value::Float(v) => SqlValue::Text(v.to_string()),
        Value::Double(v) => SqlValue::Text(v.to_string()),
        Value::Bytes(b) => match std::str::from_utf8(b) {
            Ok(s) => SqlValue::Text(s.to_string()),
            Err(_) => SqlValue::Bytes(b.clone()),
        },
        Value::Date(0, 0, 0, 0, 0, 0, 0) => SqlValue::Text(ZERO_DATETIME.to_string()),
        Value::Date(y, mo, d, h, mi, s, us) => NaiveDate::from_ymd_opt(i32::from(*y), u32::from(*mo), u32::from(*d))
            .and_then(|date| date.and_hms_micro_opt(u32::from(*h), u32::from(*mi), u32::from(*s), *us))
            .map(SqlValue::Timestamp)
            .unwrap_or(SqlValue::Null),
        Value::Time(neg, days, h, mi, s, _) => {
            let hours = u32::from(*h) + *days * 24;
            let sign = if *neg { "-" } else { "" };
            SqlValue::Text(format!("{}{:02}:{:02}:{:02}", sign, hours, mi, s))
        }
    }
}

fn row_to_record(row: &mysql_async::Row) -> Record {
    let mut record = Record::new();
    for (i, column) in row.columns_ref().iter().enumerate() {
        let value = row.as_ref(i).map(from_mysql).unwrap_or(SqlValue::Null);
        record.set(column.name_str().into_owned(), value);
    }
    record
}

/// Turn a failed write into a row-level or store-level error.
fn write_error(e: mysql_async::Error, table: &str, context: &str) -> MigrateError {
    if let mysql_async::Error::Server(server) = &e {
        if server.code == ER_DUP_ENTRY {
            return MigrateError::UniqueViolation {
                table: table.to_string(),
                message: server.message.clone(),
            };
        }
        return MigrateError::row(
            table,
            None,
            format!("{} (MySQL error {})", server.message, server.code),
        );
    }
    MigrateError::pool(e, context.to_string())
}

#[async_trait]
impl DestinationStore for MysqlDestination {
    async fn insert(&self, table: &str, fields: &Record) -> Result<i64> {
        let (sql, values) = self.dialect.insert(table, fields);
        debug!("destination: {}", sql);

        let mut session = self.session.lock().await;
        Self::begin(&mut session).await?;
        session
            .conn
            .exec_drop(sql.as_str(), params(values))
            .await
            .map_err(|e| write_error(e, table, "inserting row"))?;

        let id = session.conn.last_insert_id().unwrap_or(0);
        i64::try_from(id).map_err(|_| MigrateError::pool(format!("insert id {} out of range", id), table.to_string()))
    }

    async fn update(&self, table: &str, key_column: &str, key: i64, fields: &Record) -> Result<u64> {
        let (sql, values) = self.dialect.update(table, key_column, key, fields);
        debug!("destination: {}", sql);

        let mut session = self.session.lock().await;
        Self::begin(&mut session).await?;
        session
            .conn
            .exec_drop(sql.as_str(), params(values))
            .await
            .map_err(|e| write_error(e, table, "updating row"))?;
        Ok(session.conn.affected_rows())
    }

    async fn find(&self, table: &str, predicate: &Predicate) -> Result<Vec<Record>> {
        let (sql, values) = self.dialect.find(table, predicate);
        let mut session = self.session.lock().await;
        let rows: Vec<mysql_async::Row> = session
            .conn
            .exec(sql.as_str(), params(values))
            .await
            .map_err(|e| MigrateError::pool(e, format!("querying {}", table)))?;
        Ok(rows.iter().map(row_to_record).collect())
    }

    async fn count(&self, table: &str) -> Result<i64> {
        let sql = self.dialect.count(table);
        let mut session = self.session.lock().await;
        let count: Option<i64> = session
            .conn
            .query_first(sql.as_str())
            .await
            .map_err(|e| MigrateError::pool(e, format!("counting {}", table)))?;
        Ok(count.unwrap_or(0))
    }

    async fn delete(&self, table: &str, predicate: &Predicate) -> Result<u64> {
        let (sql, values) = self.dialect.delete(table, predicate);
        let mut session = self.session.lock().await;
        Self::begin(&mut session).await?;
        session
            .conn
            .exec_drop(sql.as_str(), params(values))
            .await
            .map_err(|e| MigrateError::pool(e, format!("deleting from {}", table)))?;
        Ok(session.conn.affected_rows())
    }

    async fn truncate(&self, table: &str) -> Result<()> {
        // TRUNCATE commits implicitly in MySQL
        let sql = self.dialect.truncate(table);
        let mut session = self.session.lock().await;
        session
            .conn
            .query_drop(sql.as_str())
            .await
            .map_err(|e| MigrateError::pool(e, format!("truncating {}", table)))?;
        session.in_transaction = false;
        Ok(())
    }

    async fn commit(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        if session.in_transaction {
            session
                .conn
                .query_drop("COMMIT")
                .await
                .map_err(|e| MigrateError::pool(e, "committing transaction"))?;
            session.in_transaction = false;
        }
        Ok(())
    }

    fn store_name(&self) -> &str {
        &self.name
    }

    async fn test_connection(&self) -> Result<()> {
        let mut session = self.session.lock().await;
        session
            .conn
            .query_drop("SELECT 1")
            .await
            .map_err(|e| MigrateError::pool(e, "testing MySQL destination connection"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_timestamp_round_trip_through_mysql_value() {
        let t = NaiveDate::from_ymd_opt(2009, 3, 14)
            .unwrap()
            .and_hms_opt(15, 9, 26)
            .unwrap();
        let v = to_mysql(&SqlValue::Timestamp(t));
        assert_eq!(v, Value::Date(2009, 3, 14, 15, 9, 26, 0));
        assert_eq!(from_mysql(&v), SqlValue::Timestamp(t));
    }

    #[test]
    fn test_from_mysql_bytes() {
        assert_eq!(
            from_mysql(&Value::Bytes(b"closed".to_vec())),
            SqlValue::Text("closed".into())
        );
        assert_eq!(
            from_mysql(&Value::Bytes(vec![0xff, 0xfe])),
            SqlValue::Bytes(vec![0xff, 0xfe])
        );
        assert_eq!(from_mysql(&Value::UInt(7)), SqlValue::Int(7));
    }

    #[test]
    fn test_zero_date_kept_as_literal() {
        assert_eq!(
            from_mysql(&Value::Date(0, 0, 0, 0, 0, 0, 0)),
            SqlValue::Text(ZERO_DATETIME.into())
        );
    }

    #[test]
    fn test_empty_params() {
        assert!(matches!(params(vec![]), Params::Empty));
        assert!(matches!(params(vec![SqlValue::Int(1)]), Params::Positional(_)));
    }
}
