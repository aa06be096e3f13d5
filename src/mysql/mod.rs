//! MySQL adapter.
//!
//! Type tables and wire encodings for the MySQL client API. Statements use
//! `?` markers, and BLOB/TEXT payloads are bound in-line with a length.
//! Temporal values travel as packed `MYSQL_TIME` structs.

pub mod types;

pub use types::{decode_mysql_time, encode_mysql_time, encode_temporal, MysqlTypes, TimestampKind};
