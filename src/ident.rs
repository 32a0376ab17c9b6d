//! # Identifier Guard
//!
//! Table names come from configuration and must pass a strict allow-list.
//! Column names come from untrusted remote field names (spaces and punctuation
//! are normal, e.g. `Student Number`), so they are validated loosely and always
//! emitted as escaped, double-quoted identifiers. Values never pass through here.

use crate::error::{CacheError, CacheResult};
use lazy_static::lazy_static;
use regex::Regex;

/// Maximum identifier length
const MAX_IDENTIFIER_LEN: usize = 128;

lazy_static! {
    /// Only alphanumeric characters and underscores, must start with letter or underscore
    static ref TABLE_NAME_REGEX: Regex = Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*$").unwrap();
}

/// Validates a table name against the allow-list
pub fn validate_table_name(name: &str) -> CacheResult<()> {
    if name.is_empty() || name.len() > MAX_IDENTIFIER_LEN {
        return Err(CacheError::InvalidIdentifier(format!(
            "Table name '{}' must be 1-{} characters",
            name, MAX_IDENTIFIER_LEN
        )));
    }

    if !TABLE_NAME_REGEX.is_match(name) {
        return Err(CacheError::InvalidIdentifier(format!(
            "Table name '{}' contains invalid characters. Use only alphanumeric and underscores, starting with a letter or underscore",
            name
        )));
    }

    if name.starts_with("sqlite_") {
        return Err(CacheError::InvalidIdentifier(format!(
            "Table name '{}' uses the reserved sqlite_ prefix",
            name
        )));
    }

    Ok(())
}

/// Validates a column name derived from a remote field
pub fn validate_column_name(name: &str) -> CacheResult<()> {
    if name.trim().is_empty() || name.len() > MAX_IDENTIFIER_LEN {
        return Err(CacheError::InvalidIdentifier(format!(
            "Column name '{}' must be 1-{} characters",
            name.escape_debug(),
            MAX_IDENTIFIER_LEN
        )));
    }

    if name.chars().any(char::is_control) {
        return Err(CacheError::InvalidIdentifier(format!(
            "Column name '{}' contains control characters",
            name.escape_debug()
        )));
    }

    Ok(())
}

/// Quotes an identifier for SQLite, doubling embedded double quotes
pub fn quote(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Validates then quotes a table name
pub fn quote_table(name: &str) -> CacheResult<String> {
    validate_table_name(name)?;
    Ok(quote(name))
}

/// Validates then quotes a column name
pub fn quote_column(name: &str) -> CacheResult<String> {
    validate_column_name(name)?;
    Ok(quote(name))
}
