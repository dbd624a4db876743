//! On-disk layout.
//!
//! ```text
//! ~/.patchflow/
//!   settings.yaml   (optional; defaults apply when absent)
//!   store.json      (document store snapshot, mode 0600)
//!   repos/<owner>/<repo>   (local mirrors, unless settings name another root)
//! ```
//!
//! Every helper takes an explicit home so tests can point it at a `TempDir`;
//! [`home`] resolves the real one.

use std::path::{Path, PathBuf};

/// `<home>/.patchflow/`
pub fn root_at(home: &Path) -> PathBuf {
    home.join(".patchflow")
}

/// `<home>/.patchflow/store.json`
pub fn store_path_at(home: &Path) -> PathBuf {
    root_at(home).join("store.json")
}

/// `<home>/.patchflow/settings.yaml`
pub fn settings_path_at(home: &Path) -> PathBuf {
    root_at(home).join("settings.yaml")
}

/// `<home>/.patchflow/repos/` — default root of local repository mirrors.
pub fn repos_path_at(home: &Path) -> PathBuf {
    root_at(home).join("repos")
}

/// The current user's home directory.
pub fn home() -> Option<PathBuf> {
    dirs::home_dir()
}

#[cfg(unix)]
pub(crate) fn set_dir_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))
}
#[cfg(not(unix))]
pub(crate) fn set_dir_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

#[cfg(unix)]
pub(crate) fn set_file_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))
}
#[cfg(not(unix))]
pub(crate) fn set_file_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}
