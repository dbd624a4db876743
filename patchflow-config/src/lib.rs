//! patchflow-config — from a patch's diff to a validated project definition.
//!
//! - [`retrieval`] — [`FileRetriever`] seam, git mirrors, fetch deadline
//! - [`apply`] — [`PatchApplier`] seam and `git apply`
//! - [`patcher`] — rename-aware diff application to the configuration file
//! - [`loader`] — YAML parsing, translation and validation
//! - [`patched`] — patched project / project config for a patch

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

pub mod apply;
pub mod error;
pub mod loader;
pub mod patched;
pub mod patcher;
pub mod retrieval;

pub use apply::{ApplyOutput, GitApply, PatchApplier};
pub use error::ConfigError;
pub use loader::{create_project_config, load_project, ParserProject};
pub use patched::{
    get_patched_project, get_patched_project_config, store_patched_project, PatchedProject,
};
pub use retrieval::{FetchRequest, FileRetriever, GitFileRetriever};

/// External collaborators used to read and patch configuration files.
#[derive(Clone)]
pub struct ConfigSources {
    pub retriever: Arc<dyn FileRetriever>,
    pub applier: Arc<dyn PatchApplier>,
    pub fetch_timeout: Duration,
}

impl ConfigSources {
    /// Git mirrors under `repos_root` and `git apply`.
    pub fn git(repos_root: impl Into<PathBuf>, fetch_timeout: Duration) -> Self {
        Self {
            retriever: Arc::new(GitFileRetriever::new(repos_root)),
            applier: Arc::new(GitApply),
            fetch_timeout,
        }
    }
}

impl std::fmt::Debug for ConfigSources {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConfigSources")
            .field("fetch_timeout", &self.fetch_timeout)
            .finish_non_exhaustive()
    }
}
