//! ODBC adapter, also used for Microsoft SQL Server (`mssql://` resolves
//! here).
//!
//! Type tables for the ODBC `SQL_*` codes plus the packed
//! `SQL_DATE_STRUCT` and `SQL_TIMESTAMP_STRUCT` encodings.

pub mod types;

pub use types::{
    decode_date_struct, decode_timestamp_struct, encode_date_struct, encode_temporal,
    encode_timestamp_struct, OdbcTypes,
};
