//! SQLite3 driver.
//!
//! Built on rusqlite and registered with the process-wide registry as the
//! built-in `sqlite3` driver. BLOB and text values are bound directly.

pub mod connection;
pub mod error;
pub mod types;


use std::ffi::{c_char, c_void, CStr};

use tracing::debug;

use crate::config::ConnectionString;
use crate::driver::DriverConnection;

pub use connection::SqliteConnection;
pub use types::SqliteTypes;

/// Registry entry point: build an unopened connection from a connection
/// string. Returns null when the string cannot be parsed.
///
/// # Safety
///
/// `connection_string` must be null or a valid NUL-terminated string.
pub unsafe extern "C" fn sqlite3_create_connection(connection_string: *const c_char) -> *mut c_void {
    if connection_string.is_null() {
        return std::ptr::null_mut();
    }
    let text = unsafe { CStr::from_ptr(connection_string) }.to_string_lossy();
    match ConnectionString::parse(&text) {
        Ok(cs) => {
            let driver: Box<dyn DriverConnection> = Box::new(SqliteConnection::from_connection_string(&cs));
            Box::into_raw(Box::new(driver)) as *mut c_void
        }
        Err(e) => {
            debug!(target: "polysql::sqlite", error = %e, "rejected connection string");
            std::ptr::null_mut()
        }
    }
}

/// Registry entry point: release a connection made by
/// [`sqlite3_create_connection`].
///
/// # Safety
///
/// `connection` must be null or a pointer returned by
/// [`sqlite3_create_connection`] that has not been destroyed yet.
pub unsafe extern "C" fn sqlite3_destroy_connection(connection: *mut c_void) {
    if !connection.is_null() {
        drop(unsafe { Box::from_raw(connection as *mut Box<dyn DriverConnection>) });
    }
}
