//! Error types for patchflow-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from document store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// JSON serialization error (snapshot write path).
    #[error("store JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Snapshot parse error on load.
    #[error("failed to parse store snapshot at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("{collection} '{id}' already exists")]
    Duplicate { collection: &'static str, id: String },

    /// Unordered bulk insert: every other document was staged.
    #[error("duplicate task ids: {}", ids.join(", "))]
    DuplicateTasks { ids: Vec<String> },

    #[error("{collection} '{id}' not found")]
    NotFound { collection: &'static str, id: String },

    /// The patch is already linked to a version.
    #[error("patch '{patch}' is already finalized as version '{version}'")]
    AlreadyFinalized { patch: String, version: String },

    /// `dirs::home_dir()` returned `None`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

/// Errors loading [`crate::settings::Settings`].
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML parse error on load, with path and line context from serde_yaml.
    #[error("failed to parse settings at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

/// A selected pair the project doesn't define.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PairError {
    #[error("task name '{task}' in variant '{variant}' does not exist")]
    UnknownTask { variant: String, task: String },

    #[error("display task '{task}' in variant '{variant}' does not exist")]
    UnknownDisplayTask { variant: String, task: String },
}

/// Convenience constructor for [`StoreError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> StoreError {
    StoreError::Io {
        path: path.into(),
        source,
    }
}

impl StoreError {
    pub(crate) fn not_found(collection: &'static str, id: impl Into<String>) -> Self {
        StoreError::NotFound {
            collection,
            id: id.into(),
        }
    }

    pub(crate) fn duplicate(collection: &'static str, id: impl Into<String>) -> Self {
        StoreError::Duplicate {
            collection,
            id: id.into(),
        }
    }
}
