//! Error types shared across the workspace.
//!
//! Runtime-facing crates define their own error enums; this one only covers
//! what the leaf crate itself can fail at: reading and validating configuration.

use std::path::PathBuf;

use thiserror::Error;

/// Error raised while loading or validating shared configuration.
#[derive(Debug, Error)]
pub enum CommonError {
    /// An I/O operation failed.
    #[error("I/O error at {path}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// The configuration file is not valid YAML for the expected schema.
    #[error("malformed configuration file")]
    Yaml {
        /// Underlying deserialization error.
        #[from]
        source: serde_yaml::Error,
    },
}

/// Convenience alias used by this crate.
pub type Result<T> = std::result::Result<T, CommonError>;
