use std::fmt;

use sightings_store::StoreError;

use crate::dates::DateParseError;

#[derive(Debug)]
pub enum QueryError {
    /// `endpoint` names which side of a range failed (`from` / `to`).
    InvalidDate {
        endpoint: &'static str,
        source: DateParseError,
    },
    InvalidParams(String),
    Store {
        operation: &'static str,
        source: StoreError,
    },
    Timeout {
        operation: &'static str,
    },
}

impl QueryError {
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            QueryError::InvalidDate { .. } | QueryError::InvalidParams(_)
        )
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::InvalidDate { endpoint, source } => {
                write!(f, "invalid '{}' date: {}", endpoint, source)
            }
            QueryError::InvalidParams(message) => f.write_str(message),
            QueryError::Store { operation, source } => {
                write!(f, "{} failed: {}", operation, source)
            }
            QueryError::Timeout { operation } => {
                write!(f, "{} exceeded the query deadline", operation)
            }
        }
    }
}

impl std::error::Error for QueryError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            QueryError::InvalidDate { source, .. } => Some(source),
            QueryError::Store { source, .. } => Some(source),
            _ => None,
        }
    }
}
