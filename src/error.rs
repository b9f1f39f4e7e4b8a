//! Custom error types for the Lumen extension runtime
//!
//! This module provides a unified error type used throughout the crate.
//! Routing failures have their own taxonomy (`RoutingError` in the router
//! module) because they carry the offending URL and are surfaced to the user;
//! they convert into `LumenError` at module boundaries.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for extension runtime operations
#[derive(Error, Debug)]
pub enum LumenError {
    /// IO-related errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Filesystem watcher errors
    #[error("Watch error: {0}")]
    Watch(#[from] notify::Error),

    /// Protocol routing errors
    #[error("Routing error: {0}")]
    Routing(#[from] crate::router::RoutingError),

    /// Manifest parse or validation errors
    #[error("Manifest error at {path}: {message}")]
    Manifest { path: PathBuf, message: String },

    /// Route schema compilation errors
    #[error("Invalid route schema {schema:?}: {message}")]
    Schema { schema: String, message: String },

    /// Dependency installation errors
    #[error("Install failed for {name}: {message}")]
    Install { name: String, message: String },

    /// Extension entry-point load errors
    #[error("Failed to load entry point for {name}: {message}")]
    EntryPoint { name: String, message: String },

    /// Entity not found errors
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// General errors with a message
    #[error("{0}")]
    General(String),
}

impl LumenError {
    /// Create a manifest error
    pub fn manifest(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        Self::Manifest {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Create a route schema error
    pub fn schema(schema: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Schema {
            schema: schema.into(),
            message: message.into(),
        }
    }

    /// Create an install error
    pub fn install(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Install {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create an entry-point load error
    pub fn entry_point(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::EntryPoint {
            name: name.into(),
            message: message.into(),
        }
    }

    /// Create a not found error
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }
}

/// Convert String errors to LumenError
impl From<String> for LumenError {
    fn from(s: String) -> Self {
        Self::General(s)
    }
}

/// Convert &str errors to LumenError
impl From<&str> for LumenError {
    fn from(s: &str) -> Self {
        Self::General(s.to_string())
    }
}

/// Result type alias using LumenError
pub type Result<T> = std::result::Result<T, LumenError>;
