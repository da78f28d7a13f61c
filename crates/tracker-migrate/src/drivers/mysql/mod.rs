//! MySQL/MariaDB driver.
//!
//! - [`MysqlDialect`]: SQL generation with `?` placeholders
//! - [`MysqlSource`]: source store on an SQLx pool
//! - [`MysqlDestination`]: destination store on a single mysql_async
//!   connection with explicit transactions
//!
//! # Supported Versions
//!
//! - MySQL 5.7+, 8.0+
//! - MariaDB 10.2+

mod destination;
mod dialect;
mod source;

pub use destination::MysqlDestination;
pub use dialect::MysqlDialect;
pub use source::MysqlSource;
