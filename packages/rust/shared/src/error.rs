//! Error types for fixturesmith.
//!
//! Library crates use [`FixtureError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.
//!
//! Only fatal conditions live here. Recoverable problems found while
//! planning or resolving a document are [`Warning`](crate::Warning)s.

use std::path::PathBuf;

/// Top-level error type for all fixturesmith operations.
#[derive(Debug, thiserror::Error)]
pub enum FixtureError {
    /// A configuration file that was explicitly requested does not exist,
    /// or no configuration source produced any data.
    #[error("config not found: {}", path.display())]
    ConfigNotFound { path: PathBuf },

    /// A configuration file exists but could not be parsed.
    #[error("failed to parse {}: {message}", path.display())]
    ConfigParse { path: PathBuf, message: String },

    /// The merged configuration violates the supplied schema.
    #[error("schema validation failed at {pointer}: {message}")]
    SchemaValidation { pointer: String, message: String },

    /// Configuration is well-formed but semantically unusable.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// The container writer failed to serialize a document.
    #[error("writer error: {0}")]
    Writer(String),

    /// An assembled document broke one of its own link or id guarantees.
    #[error("integrity error: {0}")]
    Integrity(String),
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, FixtureError>;

impl FixtureError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a parse error for the given source file.
    pub fn parse(path: impl Into<PathBuf>, msg: impl Into<String>) -> Self {
        Self::ConfigParse {
            path: path.into(),
            message: msg.into(),
        }
    }

    /// Create a schema violation at a JSON-pointer location.
    pub fn schema(pointer: impl Into<String>, msg: impl Into<String>) -> Self {
        Self::SchemaValidation {
            pointer: pointer.into(),
            message: msg.into(),
        }
    }

    /// Create a writer error from any displayable message.
    pub fn writer(msg: impl Into<String>) -> Self {
        Self::Writer(msg.into())
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this error belongs to the configuration class, which stops
    /// generation before any document is planned.
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigNotFound { .. }
                | Self::ConfigParse { .. }
                | Self::SchemaValidation { .. }
                | Self::Config { .. }
        )
    }
}
