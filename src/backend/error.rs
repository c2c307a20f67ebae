//! Error types for remote store operations
//!
//! Every failure a store can report is tagged by kind. The writer only needs
//! to single out [`StoreError::NotFound`]; everything else flows through the
//! retry path. Remote failures carry the diagnostics the store sent back so
//! the exhaustion log can print them without inspecting concrete types.

use std::io;
use thiserror::Error;

/// Result type alias for store operations
pub type StoreResult<T> = std::result::Result<T, StoreError>;

/// Unified error type for remote store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// The object does not exist (the store answered 404 or equivalent)
    #[error("Object not found on {store}: {path}")]
    NotFound { path: String, store: String },

    /// Another writer currently holds the append lease on the object
    #[error("Lease conflict on {path}: {message}")]
    LeaseConflict { path: String, message: String },

    /// Access to the object was denied
    #[error("Permission denied for {path}: {message}")]
    PermissionDenied { path: String, message: String },

    /// The store rejected the request and reported why
    #[error("Remote store error on {path}: {message}")]
    Remote {
        path: String,
        status: Option<u16>,
        remote_exception: Option<String>,
        remote_message: Option<String>,
        message: String,
    },

    /// Local I/O error while talking to the store
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Generic store error with context
    #[error("Store error on {store}: {message}")]
    Other { store: String, message: String },
}

impl StoreError {
    /// Build a not-found error for `path`
    pub fn not_found(path: impl Into<String>, store: impl Into<String>) -> Self {
        StoreError::NotFound {
            path: path.into(),
            store: store.into(),
        }
    }

    /// Check if this error is the store's distinguished "does not exist" signal
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }

    /// Check if this error is a lease conflict with another writer
    pub fn is_lease_conflict(&self) -> bool {
        matches!(self, StoreError::LeaseConflict { .. })
    }

    /// Message reported by the remote side, if the store sent one
    pub fn remote_message(&self) -> Option<&str> {
        match self {
            StoreError::Remote { remote_message, .. } => remote_message.as_deref(),
            StoreError::LeaseConflict { message, .. } => Some(message),
            _ => None,
        }
    }

    /// Remote exception name, if the store sent one
    pub fn remote_exception(&self) -> Option<&str> {
        match self {
            StoreError::Remote {
                remote_exception, ..
            } => remote_exception.as_deref(),
            _ => None,
        }
    }

    /// HTTP-style status code, if known
    pub fn status(&self) -> Option<u16> {
        match self {
            StoreError::NotFound { .. } => Some(404),
            StoreError::PermissionDenied { .. } => Some(403),
            StoreError::LeaseConflict { .. } => Some(409),
            StoreError::Remote { status, .. } => *status,
            _ => None,
        }
    }

    /// Path the failing operation targeted, if known
    pub fn path(&self) -> Option<&str> {
        match self {
            StoreError::NotFound { path, .. }
            | StoreError::LeaseConflict { path, .. }
            | StoreError::PermissionDenied { path, .. }
            | StoreError::Remote { path, .. } => Some(path),
            _ => None,
        }
    }

    /// True when the error carries remote-specific diagnostic fields
    pub fn has_remote_diagnostics(&self) -> bool {
        self.remote_message().is_some() || self.remote_exception().is_some()
    }
}
