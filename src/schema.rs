//! Defines schema names and the statement that creates them.

use std::fmt;
use thiserror::Error;

/// Longest identifier PostgreSQL keeps without truncating it.
pub const MAX_IDENTIFIER_BYTES: usize = 63;

/// Reasons a schema name is rejected.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchemaNameError {
    #[error("schema name is empty")]
    Empty,
    #[error("schema name is {0} bytes long; at most 63 are allowed")]
    TooLong(usize),
    #[error("schema name contains a NUL character")]
    Nul,
}

/// A schema name that can be safely quoted into a data-definition
/// statement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaName(String);

impl SchemaName {
    /// Validate a raw schema name. Case and reserved words are kept
    /// as given, since the name is always quoted.
    pub fn parse(raw: &str) -> Result<Self, SchemaNameError> {
        if raw.is_empty() {
            return Err(SchemaNameError::Empty);
        }
        if raw.len() > MAX_IDENTIFIER_BYTES {
            return Err(SchemaNameError::TooLong(raw.len()));
        }
        if raw.contains('\0') {
            return Err(SchemaNameError::Nul);
        }
        Ok(SchemaName(String::from(raw)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The name as a quoted identifier, with embedded double quotes
    /// doubled.
    pub fn quoted(&self) -> String {
        format!("\"{}\"", self.0.replace('"', "\"\""))
    }

    /// The statement that creates the schema unless it already exists.
    pub fn create_statement(&self) -> String {
        format!("CREATE SCHEMA IF NOT EXISTS {}", self.quoted())
    }
}

impl fmt::Display for SchemaName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
