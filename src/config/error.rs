//! Configuration error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised while loading, validating or saving configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A configuration or rule file could not be read.
    #[error("cannot read '{path}': {source}")]
    Read {
        /// File being read.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The configuration could not be written back.
    #[error("cannot write '{path}': {source}")]
    Write {
        /// Destination file.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// Malformed TOML.
    #[error("invalid TOML in {origin}: {source}")]
    Parse {
        /// File path, or `<string>` for in-memory content.
        origin: String,
        /// Parser error with line and column.
        #[source]
        source: toml::de::Error,
    },

    /// One or more validators rejected the configuration.
    #[error("invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),

    /// A configuration or included rule file does not exist.
    #[error("configuration file not found: {0}")]
    NotFound(PathBuf),

    /// The configuration could not be serialized.
    #[error("cannot serialize configuration: {0}")]
    Serialize(#[from] toml::ser::Error),
}

impl ConfigError {
    pub(crate) fn parse(origin: impl Into<String>, source: toml::de::Error) -> Self {
        Self::Parse {
            origin: origin.into(),
            source,
        }
    }
}

/// Result type for configuration operations.
pub type ConfigResult<T> = Result<T, ConfigError>;
