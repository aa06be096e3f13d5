//! Oracle adapter.
//!
//! Oracle binds by position with `:1`-style markers, encodes DATE as a
//! seven-byte excess-100 value, and moves BLOB/CLOB payloads through
//! locators: the row is inserted with `EMPTY_BLOB()`, the locator comes
//! back through `RETURNING ... INTO`, and the bytes are streamed with
//! [`crate::lob::write_lob`].

pub mod types;

pub use types::{
    decode_oracle_date, encode_oracle_date, encode_temporal, lob_insert_sql, number_type, OracleTypes,
    LOB_SEGMENT_SIZE, ORACLE_DATE_SIZE,
};
