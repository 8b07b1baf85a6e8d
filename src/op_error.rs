//! Operation-level error taxonomy.
//!
//! `GpkgError` (see [`crate::error`]) covers container/engine internals.
//! `GfoError` sits one layer up: it is what the coordinator (C6) and the
//! public operation wrappers (§6) hand back to callers.

use crate::error::GpkgError;
use std::error::Error;
use std::fmt;

#[derive(Debug)]
pub enum GfoError {
    /// Input file missing, output exists without `force`, shape-family
    /// layer/stem mismatch, or an unknown column name in a projection.
    Precondition(String),
    /// The embedded engine lacks a spatial function an operation needs.
    Capability(String),
    /// Failed to obtain rowid extrema while planning batches.
    Plan(String),
    /// A worker batch raised; carries the offending batch id and a
    /// truncated excerpt of the bound SQL plus the underlying diagnostic.
    Worker {
        batch_id: usize,
        sql_excerpt: String,
        diagnostic: String,
    },
    /// Container move/append/index failed during finalization.
    Io(String),
}

const SQL_EXCERPT_LIMIT: usize = 400;

impl GfoError {
    pub fn worker(batch_id: usize, sql: &str, diagnostic: impl fmt::Display) -> Self {
        let sql_excerpt = if sql.len() > SQL_EXCERPT_LIMIT {
            format!("{}…", &sql[..SQL_EXCERPT_LIMIT])
        } else {
            sql.to_string()
        };
        Self::Worker {
            batch_id,
            sql_excerpt,
            diagnostic: diagnostic.to_string(),
        }
    }
}

impl fmt::Display for GfoError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Precondition(msg) => write!(f, "precondition failed: {msg}"),
            Self::Capability(msg) => write!(f, "engine capability missing: {msg}"),
            Self::Plan(msg) => write!(f, "failed to plan batches: {msg}"),
            Self::Worker {
                batch_id,
                sql_excerpt,
                diagnostic,
            } => write!(
                f,
                "batch {batch_id} failed: {diagnostic} (sql: {sql_excerpt})"
            ),
            Self::Io(msg) => write!(f, "io error: {msg}"),
        }
    }
}

impl Error for GfoError {}

impl From<GpkgError> for GfoError {
    fn from(err: GpkgError) -> Self {
        GfoError::Io(err.to_string())
    }
}

impl From<std::io::Error> for GfoError {
    fn from(err: std::io::Error) -> Self {
        GfoError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for GfoError {
    fn from(err: serde_json::Error) -> Self {
        GfoError::Io(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GfoError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn worker_error_truncates_long_sql() {
        let sql = "SELECT ".to_string() + &"x".repeat(1000);
        let err = GfoError::worker(3, &sql, "syntax error");
        let rendered = err.to_string();
        assert!(rendered.contains("batch 3 failed"));
        assert!(rendered.len() < sql.len());
    }

    #[test]
    fn precondition_display_is_readable() {
        let err = GfoError::Precondition("output exists".to_string());
        assert_eq!(err.to_string(), "precondition failed: output exists");
    }
}
