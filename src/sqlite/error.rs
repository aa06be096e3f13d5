//! SQLite error conversion.

use crate::error::DbError;

impl From<rusqlite::Error> for DbError {
    fn from(e: rusqlite::Error) -> Self {
        match e {
            rusqlite::Error::SqliteFailure(code, message) => DbError::Native {
                code: Some(code.extended_code),
                message: message.unwrap_or_else(|| code.to_string()),
            },
            rusqlite::Error::SqlInputError { error, msg, .. } => DbError::Native {
                code: Some(error.extended_code),
                message: msg,
            },
            rusqlite::Error::InvalidParameterCount(given, expected) => DbError::native(format!(
                "expected {expected} parameters, got {given}"
            )),
            other => DbError::native(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_failure_keeps_extended_code() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let err: DbError = conn.execute("SELEC 1", []).unwrap_err().into();
        match &err {
            DbError::Native { code, message } => {
                assert_eq!(*code, Some(1));
                assert!(message.contains("syntax error"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
        assert_eq!(err.kind(), ErrorKind::Statement);
    }

    #[test]
    fn test_prepare_failure_keeps_code() {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        let err: DbError = conn.prepare("SELECT nope FROM missing").unwrap_err().into();
        match &err {
            DbError::Native { code, message } => {
                assert_eq!(*code, Some(1));
                assert!(message.contains("missing"));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }
}
