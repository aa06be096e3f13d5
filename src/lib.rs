//! polysql: one SQL connectivity core over several database backends.
//!
//! A [`Connection`] owns a driver connection loaded through the
//! [`DriverRegistry`]; a [`Query`] runs SQL with named `:param`
//! placeholders against it and exposes the current row as typed
//! [`ResultField`]s. [`ConnectionPool`] hands out connections as RAII
//! leases that go back to the pool on drop.
//!
//! SQLite is built in. Other backends are loaded from shared modules
//! named `<prefix>_<driver>` exporting `<driver>_create_connection` and
//! `<driver>_destroy_connection`; the [`mysql`], [`odbc`], [`oracle`] and
//! [`firebird`] modules carry their type tables and wire encodings.

pub mod buffer;
pub mod config;
pub mod connection;
pub mod datetime;
pub mod driver;
pub mod error;
pub mod field;
pub mod lob;
pub mod money;
pub mod param;
pub mod pool;
pub mod query;
pub mod registry;
pub mod value;

pub mod firebird;
pub mod mysql;
pub mod odbc;
pub mod oracle;
pub mod sqlite;

#[cfg(test)]
mod testing;

pub use config::{ConnectionString, PoolConfig};
pub use connection::Connection;
pub use datetime::DateTimeParts;
pub use driver::{DriverConnection, LobProtocol, ObjectType, StatementId, StatementSlab, TypeMapping};
pub use error::{DbError, DbResult, ErrorKind};
pub use field::{FieldList, ResultField};
pub use money::Money;
pub use param::{Parameter, ParameterList, PlaceholderStyle};
pub use pool::{ConnectionPool, PooledConnection};
pub use query::{Query, QueryState};
pub use registry::{DriverModule, DriverRegistry, DEFAULT_DRIVER_PREFIX};
pub use value::{DataType, TypedValue};
