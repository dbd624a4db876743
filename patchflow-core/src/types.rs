//! Identifiers and status enums shared by every patchflow document.
//!
//! Identifiers are string newtypes so a `TaskId` can never be passed where a
//! `BuildId` is expected. All types round-trip through serde (JSON for the
//! store snapshot, YAML for configuration files).

use std::fmt;

use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl $name {
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                self.0.fmt(f)
            }
        }

        impl From<String> for $name {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&str> for $name {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }
    };
}

string_id!(
    /// Identifier of a patch document.
    PatchId
);
string_id!(
    /// Identifier of a version. A finalized patch's version shares the patch id.
    VersionId
);
string_id!(
    /// Identifier of a build (one per variant per version).
    BuildId
);
string_id!(
    /// Identifier of a task, allocated deterministically at finalize time.
    TaskId
);

// ---------------------------------------------------------------------------
// Requesters
// ---------------------------------------------------------------------------

/// The class of caller a version was created for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Requester {
    #[default]
    #[serde(rename = "patch_request")]
    Patch,
    #[serde(rename = "github_pull_request")]
    GithubPr,
    #[serde(rename = "github_merge_request")]
    MergeQueue,
    #[serde(rename = "trigger_request")]
    Trigger,
    #[serde(rename = "gitter_request")]
    Mainline,
}

impl Requester {
    pub fn as_str(&self) -> &'static str {
        match self {
            Requester::Patch => "patch_request",
            Requester::GithubPr => "github_pull_request",
            Requester::MergeQueue => "github_merge_request",
            Requester::Trigger => "trigger_request",
            Requester::Mainline => "gitter_request",
        }
    }

    /// Requesters whose activated tasks count against a user's hourly quota.
    pub fn is_patch(&self) -> bool {
        matches!(
            self,
            Requester::Patch | Requester::GithubPr | Requester::Trigger
        )
    }
}

impl fmt::Display for Requester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Requester {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "patch_request" | "patch" => Ok(Requester::Patch),
            "github_pull_request" | "github_pr" => Ok(Requester::GithubPr),
            "github_merge_request" | "merge_queue" => Ok(Requester::MergeQueue),
            "trigger_request" | "trigger" => Ok(Requester::Trigger),
            "gitter_request" | "mainline" => Ok(Requester::Mainline),
            other => Err(format!("unknown requester '{other}'")),
        }
    }
}

// ---------------------------------------------------------------------------
// Statuses
// ---------------------------------------------------------------------------

/// Status of a patch document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum PatchStatus {
    #[default]
    Created,
    Started,
    Success,
    Failed,
}

/// Status shared by versions and builds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum VersionStatus {
    #[default]
    Created,
    Started,
    Success,
    Failed,
}

impl fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionStatus::Created => write!(f, "created"),
            VersionStatus::Started => write!(f, "started"),
            VersionStatus::Success => write!(f, "success"),
            VersionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Status of a single task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    #[default]
    Undispatched,
    Dispatched,
    Started,
    Success,
    Failed,
}

impl TaskStatus {
    /// Dispatched or running: the task can be aborted but not deactivated.
    pub fn is_in_flight(&self) -> bool {
        matches!(self, TaskStatus::Dispatched | TaskStatus::Started)
    }

    pub fn is_finished(&self) -> bool {
        matches!(self, TaskStatus::Success | TaskStatus::Failed)
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TaskStatus::Undispatched => write!(f, "undispatched"),
            TaskStatus::Dispatched => write!(f, "dispatched"),
            TaskStatus::Started => write!(f, "started"),
            TaskStatus::Success => write!(f, "success"),
            TaskStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Where a version's expanded project definition lives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StorageMethod {
    #[default]
    Db,
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
