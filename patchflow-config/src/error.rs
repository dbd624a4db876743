//! Error types for patchflow-config.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use patchflow_core::error::StoreError;

/// All errors that can arise while producing a patched project.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// The diff applied cleanly but left the configuration file empty.
    #[error("received empty configuration file")]
    EmptyConfiguration,

    /// `git apply` exited non-zero.
    #[error(
        "running patch command (possibly due to merge conflict on configuration file '{path}'): {output}"
    )]
    PatchApply { path: String, output: String },

    /// No main-repository diff was found to apply.
    #[error("no patch on project")]
    NoMainPatch,

    /// A `rename to` / `copy to` header for the file has no matching source.
    #[error("malformed diff: '{header} {path}' without a matching source header")]
    MalformedRenameHeader { header: &'static str, path: String },

    /// Out-of-line diff text is missing from the store.
    #[error("patch contents '{file_id}' not found")]
    PatchContentsNotFound { file_id: String },

    #[error("fetching '{path}' at revision '{revision}' timed out after {timeout:?}")]
    FetchTimeout {
        path: String,
        revision: String,
        timeout: Duration,
    },

    #[error("fetching '{path}' at revision '{revision}': {message}")]
    Fetch {
        path: String,
        revision: String,
        message: String,
    },

    #[error("patch '{0}' already finalized")]
    AlreadyFinalized(String),

    #[error("project '{0}' not found")]
    ProjectNotFound(String),

    /// The configuration parsed but does not describe a valid project.
    #[error("invalid project configuration: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("parsing project configuration: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl ConfigError {
    /// Whether the caller sent something unusable, as opposed to an
    /// environment failure.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            ConfigError::EmptyConfiguration
                | ConfigError::PatchApply { .. }
                | ConfigError::MalformedRenameHeader { .. }
                | ConfigError::AlreadyFinalized(_)
                | ConfigError::Validation(_)
                | ConfigError::Yaml(_)
        )
    }
}

/// Convenience constructor for [`ConfigError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}
