//! Reading configuration files at a revision.
//!
//! [`FileRetriever`] is the seam; [`GitFileRetriever`] reads from local
//! mirrors laid out as `<root>/<owner>/<repo>`. [`fetch_with_deadline`] bounds
//! a fetch with a timeout by running it on a worker thread.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

use tracing::warn;

use patchflow_core::project::Module;

use crate::error::ConfigError;

/// What to read: `path` in `owner/repo` at `revision`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchRequest {
    pub owner: String,
    pub repo: String,
    pub path: String,
    pub revision: String,
}

impl FetchRequest {
    pub fn with_path(&self, path: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            ..self.clone()
        }
    }
}

pub trait FileRetriever: Send + Sync {
    /// File contents, or `None` when the file doesn't exist at the revision.
    fn fetch_file(&self, request: &FetchRequest) -> Result<Option<String>, ConfigError>;

    /// Head revision of the module's branch.
    fn branch_revision(&self, module: &Module) -> Result<String, ConfigError>;
}

/// Run `request` against `retriever`, giving up after `timeout`.
///
/// A timed-out fetch keeps running on its worker thread; its result is
/// dropped.
pub fn fetch_with_deadline(
    retriever: Arc<dyn FileRetriever>,
    request: &FetchRequest,
    timeout: Duration,
) -> Result<Option<String>, ConfigError> {
    let (tx, rx) = mpsc::channel();
    let req = request.clone();
    thread::spawn(move || {
        let _ = tx.send(retriever.fetch_file(&req));
    });
    match rx.recv_timeout(timeout) {
        Ok(result) => result,
        Err(mpsc::RecvTimeoutError::Timeout) => {
            warn!(path = %request.path, revision = %request.revision, ?timeout, "file fetch timed out");
            Err(ConfigError::FetchTimeout {
                path: request.path.clone(),
                revision: request.revision.clone(),
                timeout,
            })
        }
        Err(mpsc::RecvTimeoutError::Disconnected) => Err(ConfigError::Fetch {
            path: request.path.clone(),
            revision: request.revision.clone(),
            message: "retriever exited without a result".into(),
        }),
    }
}

// ---------------------------------------------------------------------------
// Git mirrors
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct GitFileRetriever {
    root: PathBuf,
}

impl GitFileRetriever {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn repo_dir(&self, owner: &str, repo: &str) -> PathBuf {
        self.root.join(owner).join(repo)
    }
}

fn git(dir: &Path, args: &[&str]) -> std::io::Result<std::process::Output> {
    Command::new("git").arg("-C").arg(dir).args(args).output()
}

impl FileRetriever for GitFileRetriever {
    fn fetch_file(&self, request: &FetchRequest) -> Result<Option<String>, ConfigError> {
        let dir = self.repo_dir(&request.owner, &request.repo);
        let fetch_err = |message: String| ConfigError::Fetch {
            path: request.path.clone(),
            revision: request.revision.clone(),
            message,
        };
        if !dir.exists() {
            return Err(fetch_err(format!("no mirror at {}", dir.display())));
        }

        // Distinguish a missing file from a missing revision.
        let exists = git(
            &dir,
            &["cat-file", "-e", &format!("{}:{}", request.revision, request.path)],
        )
        .map_err(|e| fetch_err(e.to_string()))?;
        if !exists.status.success() {
            let rev = git(&dir, &["cat-file", "-e", &format!("{}^{{commit}}", request.revision)])
                .map_err(|e| fetch_err(e.to_string()))?;
            if rev.status.success() {
                return Ok(None);
            }
            return Err(fetch_err(format!("unknown revision '{}'", request.revision)));
        }

        let out = git(&dir, &["show", &format!("{}:{}", request.revision, request.path)])
            .map_err(|e| fetch_err(e.to_string()))?;
        if !out.status.success() {
            return Err(fetch_err(String::from_utf8_lossy(&out.stderr).trim().to_string()));
        }
        Ok(Some(String::from_utf8_lossy(&out.stdout).into_owned()))
    }

    fn branch_revision(&self, module: &Module) -> Result<String, ConfigError> {
        let dir = self.repo_dir(&module.owner, &module.repo);
        let branch = if module.branch.is_empty() {
            "HEAD"
        } else {
            module.branch.as_str()
        };
        let fetch_err = |message: String| ConfigError::Fetch {
            path: module.repo.clone(),
            revision: branch.to_string(),
            message,
        };
        let out = git(&dir, &["rev-parse", branch]).map_err(|e| fetch_err(e.to_string()))?;
        if !out.status.success() {
            return Err(fetch_err(String::from_utf8_lossy(&out.stderr).trim().to_string()));
        }
        Ok(String::from_utf8_lossy(&out.stdout).trim().to_string())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
