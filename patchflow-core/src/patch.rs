//! The patch document: a proposed change plus its selected work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::types::{PatchId, PatchStatus, Requester, StorageMethod, VersionId};

// ---------------------------------------------------------------------------
// Selections
// ---------------------------------------------------------------------------

/// A user-supplied key/value parameter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Parameter {
    pub key: String,
    pub value: String,
}

impl Parameter {
    pub fn new(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            value: value.into(),
        }
    }
}

/// A selected display task and the execution tasks it groups.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayTask {
    pub name: String,
    #[serde(default)]
    pub exec_tasks: Vec<String>,
}

/// The selection for one variant: execution task names plus display tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct VariantTasks {
    pub variant: String,
    #[serde(default)]
    pub tasks: Vec<String>,
    #[serde(default)]
    pub display_tasks: Vec<DisplayTask>,
}

// ---------------------------------------------------------------------------
// Diffs
// ---------------------------------------------------------------------------

/// Per-file summary of a diff.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileSummary {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_name: Option<String>,
    #[serde(default)]
    pub additions: u32,
    #[serde(default)]
    pub deletions: u32,
}

/// Diff text, either inline or stored separately under `patch_file_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct PatchSet {
    #[serde(default)]
    pub patch: String,
    #[serde(default)]
    pub patch_file_id: String,
    #[serde(default)]
    pub summary: Vec<FileSummary>,
}

/// One diff of a patch. An empty `module_name` targets the main repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ModulePatch {
    #[serde(default)]
    pub module_name: String,
    #[serde(default)]
    pub githash: String,
    #[serde(default)]
    pub patch_set: PatchSet,
}

impl ModulePatch {
    pub fn is_main(&self) -> bool {
        self.module_name.is_empty()
    }

    /// Whether this diff touches `path`, as a destination or a rename source.
    pub fn touches(&self, path: &str) -> bool {
        if !self.patch_set.summary.is_empty() {
            return self
                .patch_set
                .summary
                .iter()
                .any(|s| s.name == path || s.previous_name.as_deref() == Some(path));
        }
        let diff = &self.patch_set.patch;
        if diff.is_empty() {
            // Stored out of line and no summary: assume it may apply.
            return !self.patch_set.patch_file_id.is_empty();
        }
        diff.lines().any(|line| {
            line.strip_prefix("+++ b/") == Some(path)
                || line.strip_prefix("--- a/") == Some(path)
                || line.strip_prefix("rename to ") == Some(path)
                || line.strip_prefix("copy to ") == Some(path)
        })
    }
}

// ---------------------------------------------------------------------------
// Provenance
// ---------------------------------------------------------------------------

/// Parent/child trigger bookkeeping.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct TriggerInfo {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_patch: Option<PatchId>,
    #[serde(default)]
    pub child_patches: Vec<PatchId>,
    /// Parameters handed down to every child patch.
    #[serde(default)]
    pub downstream_parameters: Vec<Parameter>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GithubPatchData {
    pub pr_number: u64,
    pub base_owner: String,
    pub base_repo: String,
    #[serde(default)]
    pub head_owner: String,
    #[serde(default)]
    pub head_repo: String,
    pub head_hash: String,
    #[serde(default)]
    pub author: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GithubMergeData {
    pub head_sha: String,
    #[serde(default)]
    pub head_branch: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct GitMetadata {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub email: String,
}

// ---------------------------------------------------------------------------
// Patch
// ---------------------------------------------------------------------------

/// A proposed, not-yet-scheduled change plus its selected work.
///
/// `version` is empty until finalize and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Patch {
    pub id: PatchId,
    #[serde(default)]
    pub description: String,
    /// Project identifier.
    pub project: String,
    pub githash: String,
    #[serde(default)]
    pub patch_number: u32,
    #[serde(default)]
    pub author: String,
    /// Overrides the project's remote configuration path.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<VersionId>,
    #[serde(default)]
    pub status: PatchStatus,
    pub create_time: DateTime<Utc>,
    #[serde(default)]
    pub activated: bool,
    #[serde(default)]
    pub alias: String,

    /// Legacy selection: cross product of variants and tasks.
    #[serde(default)]
    pub build_variants: Vec<String>,
    #[serde(default)]
    pub tasks: Vec<String>,
    #[serde(default)]
    pub variants_tasks: Vec<VariantTasks>,
    #[serde(default)]
    pub parameters: Vec<Parameter>,

    #[serde(default)]
    pub patches: Vec<ModulePatch>,
    #[serde(default)]
    pub triggers: TriggerInfo,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_patch_data: Option<GithubPatchData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub github_merge_data: Option<GithubMergeData>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub git_info: Option<GitMetadata>,

    /// Set once the patched parser project has been stored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project_storage_method: Option<StorageMethod>,
    /// YAML projection of version-controlled project settings, possibly empty.
    #[serde(default)]
    pub patched_project_config: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reference_manifest_id: Option<String>,
    #[serde(default)]
    pub is_reconfigured: bool,
}

impl Patch {
    /// A fresh, unfinalized patch against `project` at `githash`.
    pub fn new(
        id: impl Into<PatchId>,
        project: impl Into<String>,
        githash: impl Into<String>,
        create_time: DateTime<Utc>,
    ) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            project: project.into(),
            githash: githash.into(),
            patch_number: 0,
            author: String::new(),
            path: None,
            version: None,
            status: PatchStatus::Created,
            create_time,
            activated: false,
            alias: String::new(),
            build_variants: vec![],
            tasks: vec![],
            variants_tasks: vec![],
            parameters: vec![],
            patches: vec![],
            triggers: TriggerInfo::default(),
            github_patch_data: None,
            github_merge_data: None,
            git_info: None,
            project_storage_method: None,
            patched_project_config: String::new(),
            reference_manifest_id: None,
            is_reconfigured: false,
        }
    }

    pub fn is_finalized(&self) -> bool {
        self.version.as_ref().is_some_and(|v| !v.0.is_empty())
    }

    pub fn is_github_pr_patch(&self) -> bool {
        self.github_patch_data
            .as_ref()
            .is_some_and(|d| !d.base_owner.is_empty())
    }

    pub fn is_merge_queue_patch(&self) -> bool {
        self.github_merge_data
            .as_ref()
            .is_some_and(|d| !d.head_sha.is_empty())
    }

    pub fn is_child(&self) -> bool {
        self.triggers.parent_patch.is_some()
    }

    pub fn is_parent(&self) -> bool {
        !self.triggers.child_patches.is_empty()
    }

    /// The requester implied by how the patch was created.
    pub fn requester(&self) -> Requester {
        if self.is_github_pr_patch() {
            Requester::GithubPr
        } else if self.is_merge_queue_patch() {
            Requester::MergeQueue
        } else {
            Requester::Patch
        }
    }

    /// Revision the configuration file is read at: the PR head for GitHub
    /// patches, the merge head for merge-queue patches, else the base githash.
    pub fn config_revision(&self) -> &str {
        if let Some(data) = self.github_patch_data.as_ref().filter(|_| self.is_github_pr_patch()) {
            return &data.head_hash;
        }
        if let Some(data) = self.github_merge_data.as_ref().filter(|_| self.is_merge_queue_patch()) {
            return &data.head_sha;
        }
        &self.githash
    }

    /// Diffs that target the main repository.
    pub fn main_patches(&self) -> impl Iterator<Item = &ModulePatch> {
        self.patches.iter().filter(|p| p.is_main())
    }

    /// Whether any main-repository diff touches `path`.
    pub fn should_patch_file_with_diff(&self, path: &str) -> bool {
        self.main_patches().any(|p| p.touches(path))
    }
}

// ---------------------------------------------------------------------------
// Trigger intents and abort reasons
// ---------------------------------------------------------------------------

/// How a child patch should follow its parent. Keyed by the child patch id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TriggerIntent {
    pub child_patch: PatchId,
    pub parent_patch: PatchId,
    /// Parent status the child waits for; `None` finalizes immediately.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_status: Option<String>,
}

impl TriggerIntent {
    pub fn required_parent_status(&self) -> Option<&str> {
        self.parent_status.as_deref().filter(|s| !s.is_empty())
    }
}

/// Why a version's tasks were aborted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct AbortInfo {
    pub user: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_version: Option<String>,
    #[serde(default)]
    pub pr_closed: bool,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
