//! Error types for IndexFlow.
//!
//! Library crates use [`IndexFlowError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all IndexFlow operations.
#[derive(Debug, thiserror::Error)]
pub enum IndexFlowError {
    /// The source table never appeared within the wait timeout. Fatal to the
    /// current collector pass.
    #[error("page load error: {message}")]
    PageLoad { message: String },

    /// Navigation to one page of a paginated table failed. Recoverable: the
    /// page is skipped.
    #[error("pagination error on page {page}: {message}")]
    Pagination { page: usize, message: String },

    /// Table layout or cell content did not match the expected schema.
    #[error("malformed table: {message}")]
    MalformedTable { message: String },

    /// Aggregation was asked to run over an empty dataset.
    #[error("empty dataset: nothing to aggregate")]
    EmptyDataset,

    /// Blob store failure (upload, download, delete, list).
    #[error("storage error: {0}")]
    Storage(String),

    /// Catalog database failure.
    #[error("catalog error: {0}")]
    Catalog(String),

    /// Browser automation session failure (launch, tab, script).
    #[error("session error: {0}")]
    Session(String),

    /// Network/HTTP error while fetching a page.
    #[error("network error: {0}")]
    Network(String),

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Data validation error (quality gate, overflow, codec mismatch).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, IndexFlowError>;

impl IndexFlowError {
    /// Create a page-load error from any displayable message.
    pub fn page_load(msg: impl Into<String>) -> Self {
        Self::PageLoad {
            message: msg.into(),
        }
    }

    /// Create a pagination error for `page`.
    pub fn pagination(page: usize, msg: impl Into<String>) -> Self {
        Self::Pagination {
            page,
            message: msg.into(),
        }
    }

    /// Create a malformed-table error from any displayable message.
    pub fn malformed(msg: impl Into<String>) -> Self {
        Self::MalformedTable {
            message: msg.into(),
        }
    }

    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether the failure only affects one unit of work and the caller may
    /// continue with the next one.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Pagination { .. })
    }
}
