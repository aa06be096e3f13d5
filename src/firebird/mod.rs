//! Firebird adapter.
//!
//! Firebird reports column types as ISC `SQL_*` codes whose low bit marks
//! a nullable column, stores dates as days since 1858-11-17 and times in
//! 1/10000 s, and streams BLOBs through handles in segments of at most
//! 64 KiB.

pub mod types;

pub use types::{
    decode_isc_date, decode_isc_time, decode_isc_timestamp, encode_isc_date, encode_isc_time,
    encode_isc_timestamp, encode_temporal, FirebirdTypes, MAX_SEGMENT_SIZE,
};
