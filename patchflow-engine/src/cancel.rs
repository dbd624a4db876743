//! Cancellation: abort a finalized patch's version or drop an unfinalized
//! patch.

use chrono::{DateTime, Utc};
use tracing::{debug, error};

use patchflow_core::patch::{AbortInfo, Patch};
use patchflow_core::types::PatchId;

use crate::env::{Job, PatchEnv};
use crate::error::CancelError;

/// Actor recorded on tasks aborted because of pull-request activity.
pub const GITHUB_PATCH_USER: &str = "github_pull_request";

/// Cancel one patch.
///
/// A finalized patch keeps its document; its version is deactivated and its
/// in-flight tasks are aborted with `reason` in one transaction. An
/// unfinalized patch is removed.
pub fn cancel_patch(env: &PatchEnv, patch_id: &PatchId, reason: &AbortInfo) -> Result<(), CancelError> {
    let patch = env
        .store
        .find_patch(patch_id)
        .ok_or_else(|| CancelError::PatchNotFound(patch_id.clone()))?;
    cancel(env, &patch, reason)
}

fn cancel(env: &PatchEnv, patch: &Patch, reason: &AbortInfo) -> Result<(), CancelError> {
    let Some(version) = patch.version.clone().filter(|_| patch.is_finalized()) else {
        return env.store.transaction(|docs| {
            docs.remove_patch(&patch.id);
            Ok(())
        });
    };

    let aborted = env.store.transaction(|docs| -> Result<usize, CancelError> {
        docs.set_version_activation(&version, false, &reason.user)?;
        Ok(docs.abort_version_tasks(&version, reason))
    })?;
    debug!(patch_id = %patch.id, version = %version, aborted, "cancelled patch version");
    env.enqueue(Job::VersionAborted {
        version,
        user: reason.user.clone(),
    });
    Ok(())
}

/// Which pull-request patches to abort and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GithubPrAbort {
    pub owner: String,
    pub repo: String,
    pub pr_number: u64,
    /// Only patches created strictly before this instant.
    pub created_before: DateTime<Utc>,
    pub pr_closed: bool,
    /// The version superseding the aborted ones, if any.
    pub new_version: Option<String>,
}

/// Abort every finalized patch of a pull request.
///
/// Unfinalized patches are left alone. Each patch is cancelled on its own;
/// failures are logged and returned together after the whole batch ran.
/// Returns how many patches were cancelled.
pub fn abort_patches_with_github_patch_data(env: &PatchEnv, request: &GithubPrAbort) -> Result<usize, CancelError> {
    let patches: Vec<Patch> = env.store.read(|docs| {
        docs.patches_matching_github_pr(
            &request.owner,
            &request.repo,
            request.pr_number,
            request.created_before,
        )
        .into_iter()
        .cloned()
        .collect()
    });

    let reason = AbortInfo {
        user: GITHUB_PATCH_USER.to_string(),
        new_version: request.new_version.clone(),
        pr_closed: request.pr_closed,
    };

    let mut cancelled = 0;
    let mut failures = Vec::new();
    for patch in patches.iter().filter(|p| p.is_finalized()) {
        match cancel(env, patch, &reason) {
            Ok(()) => cancelled += 1,
            Err(e) => {
                error!(
                    patch_id = %patch.id,
                    owner = %request.owner,
                    repo = %request.repo,
                    pr_number = request.pr_number,
                    error = %e,
                    "error aborting patch"
                );
                failures.push((patch.id.clone(), e.to_string()));
            }
        }
    }

    if failures.is_empty() {
        Ok(cancelled)
    } else {
        Err(CancelError::Batch { failures })
    }
}
