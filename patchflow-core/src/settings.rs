//! Engine settings loaded from `~/.patchflow/settings.yaml`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::SettingsError;
use crate::paths;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Maximum GitHub check runs a PR patch may request.
    pub check_run_limit: usize,
    /// Activated patch tasks a user may schedule per hour; 0 disables the
    /// limit.
    pub max_hourly_patch_tasks: u32,
    pub fetch_timeout_secs: u64,
    pub max_child_patch_depth: usize,
    /// Finalizes creating more tasks than this are logged.
    pub num_tasks_for_large_patch: usize,
    /// Root of local repository mirrors laid out as `<owner>/<repo>`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub repos_root: Option<PathBuf>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            check_run_limit: 10,
            max_hourly_patch_tasks: 500,
            fetch_timeout_secs: 30,
            max_child_patch_depth: 8,
            num_tasks_for_large_patch: 1000,
            repos_root: None,
        }
    }
}

impl Settings {
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Load settings under `home`. A missing file yields defaults.
    pub fn load_at(home: &Path) -> Result<Self, SettingsError> {
        let path = paths::settings_path_at(home);
        if !path.exists() {
            return Ok(Self::default());
        }
        let contents = std::fs::read_to_string(&path).map_err(|source| SettingsError::Io {
            path: path.clone(),
            source,
        })?;
        serde_yaml::from_str(&contents).map_err(|source| SettingsError::Parse { path, source })
    }

    /// `load_at` convenience wrapper.
    pub fn load() -> Result<Self, SettingsError> {
        Self::load_at(&paths::home().ok_or(SettingsError::HomeNotFound)?)
    }
}
