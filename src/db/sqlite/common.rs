use std::str::FromStr;

use uuid::Uuid;

use crate::db::error::{DbError, DbResult};

/// Parse a UUID string from the database, returning a DbError on failure
pub fn parse_uuid(s: &str) -> DbResult<Uuid> {
    Uuid::parse_str(s).map_err(|e| DbError::Internal(format!("Invalid UUID in database: {}", e)))
}

/// Parse an enum stored as text, returning a DbError on failure
pub fn parse_enum<T: FromStr<Err = String>>(s: &str) -> DbResult<T> {
    s.parse::<T>().map_err(DbError::Internal)
}
