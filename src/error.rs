use std::path::PathBuf;

use thiserror::Error;

/// Transport-level failure for a single URL. Never fatal to a run.
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("HTTP {status} for {url}")]
    Status { url: String, status: u16 },
    #[error("request to {url} failed: {message}")]
    Transport { url: String, message: String },
}

impl FetchError {
    /// Transient failures are worth retrying later (rate limits, server
    /// errors, timeouts, dropped connections). A 404 will not fix itself.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Status { status, .. } => {
                matches!(*status, 408 | 425 | 429) || (500..=599).contains(status)
            }
            FetchError::Transport { .. } => true,
        }
    }
}

/// The detail page did not have the shape the extractor expects.
#[derive(Debug, Error)]
pub enum ShapeError {
    #[error("product container not found")]
    NotFound,
}

/// The embedded product feed on a listing page was missing or malformed.
#[derive(Debug, Error)]
#[error("listing page {page}: {reason}")]
pub struct DecodeError {
    pub page: u32,
    pub reason: String,
}

/// Cannot read or write durable state. Always aborts the run.
#[derive(Debug, Error)]
pub enum PersistenceError {
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("{} is corrupt: {source}", .path.display())]
    Corrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("CSV error on {}: {source}", .path.display())]
    Csv {
        path: PathBuf,
        #[source]
        source: csv::Error,
    },
    #[error("{} has header {found:?}, expected the product record columns", .path.display())]
    SchemaMismatch { path: PathBuf, found: Vec<String> },
}

impl PersistenceError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PersistenceError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Why a single work item failed.
#[derive(Debug, Error)]
pub enum ItemError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error(transparent)]
    Shape(#[from] ShapeError),
}

impl ItemError {
    pub fn is_transient(&self) -> bool {
        match self {
            ItemError::Fetch(e) => e.is_transient(),
            ItemError::Shape(_) => false,
        }
    }
}
