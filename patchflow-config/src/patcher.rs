//! Applying a patch's diff to a remote configuration file.
//!
//! ## `make_patched_config`
//!
//! 1. Take the first main-repository diff (inline or stored out of line).
//! 2. Find whether it renames or copies another file onto the target path.
//! 3. Lay out the pre-diff file in a scratch directory, fetching it from the
//!    rename/copy source when the target didn't exist yet.
//! 4. Apply the diff with whitespace fixing, limited to the target path.
//! 5. Read the result back from the target path.
//!
//! The scratch directory is removed when it goes out of scope, on every path.

use std::io::ErrorKind;
use std::path::Path;

use similar::TextDiff;
use tracing::error;

use patchflow_core::patch::{ModulePatch, Patch};
use patchflow_core::Store;

use crate::error::{io_err, ConfigError};
use crate::retrieval::{fetch_with_deadline, FetchRequest};
use crate::ConfigSources;

/// Diff text of `part`, dereferencing out-of-line contents.
pub fn diff_contents(store: &Store, part: &ModulePatch) -> Result<String, ConfigError> {
    if !part.patch_set.patch.is_empty() {
        return Ok(part.patch_set.patch.clone());
    }
    let file_id = &part.patch_set.patch_file_id;
    if file_id.is_empty() {
        return Ok(String::new());
    }
    store
        .read(|docs| docs.patch_contents(file_id).map(str::to_string))
        .ok_or_else(|| ConfigError::PatchContentsNotFound {
            file_id: file_id.clone(),
        })
}

/// The file `target` was renamed or copied from in `diff`, if any.
///
/// Source headers are tracked per file section (`diff --git`). A destination
/// header naming `target` with no source in its section is malformed.
pub fn parse_renamed_or_copied_file(diff: &str, target: &str) -> Result<Option<String>, ConfigError> {
    let mut rename_from: Option<&str> = None;
    let mut copy_from: Option<&str> = None;

    for line in diff.lines() {
        if line.starts_with("diff --git ") {
            rename_from = None;
            copy_from = None;
        } else if let Some(from) = line.strip_prefix("rename from ") {
            rename_from = Some(from);
        } else if let Some(to) = line.strip_prefix("rename to ") {
            if to == target {
                return rename_from
                    .map(|from| Some(from.to_string()))
                    .ok_or_else(|| ConfigError::MalformedRenameHeader {
                        header: "rename to",
                        path: target.to_string(),
                    });
            }
        } else if let Some(from) = line.strip_prefix("copy from ") {
            copy_from = Some(from);
        } else if let Some(to) = line.strip_prefix("copy to ") {
            if to == target {
                return copy_from
                    .map(|from| Some(from.to_string()))
                    .ok_or_else(|| ConfigError::MalformedRenameHeader {
                        header: "copy to",
                        path: target.to_string(),
                    });
            }
        }
    }
    Ok(None)
}

/// Apply the patch's main diff to `original`, the file at `request.path`.
pub fn make_patched_config(
    sources: &ConfigSources,
    store: &Store,
    patch: &Patch,
    request: &FetchRequest,
    original: &str,
) -> Result<String, ConfigError> {
    let remote_path = request.path.as_str();

    for part in patch.main_patches() {
        let contents = diff_contents(store, part)?;
        if contents.is_empty() {
            continue;
        }
        let renamed_from = parse_renamed_or_copied_file(&contents, remote_path)?;

        let scratch = tempfile::Builder::new()
            .prefix("patchflow-")
            .tempdir()
            .map_err(|e| io_err(std::env::temp_dir(), e))?;
        let patch_file = scratch.path().join("changes.diff");
        std::fs::write(&patch_file, &contents).map_err(|e| io_err(&patch_file, e))?;
        let work_dir = scratch.path().join("work");

        let mut pre_diff = original.to_string();
        let local_rel = match renamed_from.as_deref() {
            Some(from) => {
                if pre_diff.is_empty() {
                    pre_diff = fetch_with_deadline(
                        sources.retriever.clone(),
                        &request.with_path(from),
                        sources.fetch_timeout,
                    )?
                    .unwrap_or_default();
                }
                from
            }
            None => remote_path,
        };

        let local_path = work_dir.join(local_rel);
        if let Some(dir) = local_path.parent() {
            std::fs::create_dir_all(dir).map_err(|e| io_err(dir, e))?;
        }
        if renamed_from.is_some() || !pre_diff.is_empty() {
            std::fs::write(&local_path, &pre_diff).map_err(|e| io_err(&local_path, e))?;
        }

        let applied = sources.applier.apply(&work_dir, &patch_file, remote_path)?;
        if !applied.success {
            error!(
                patch_id = %patch.id,
                path = remote_path,
                output = %applied.output,
                "error running patch command"
            );
            return Err(ConfigError::PatchApply {
                path: remote_path.to_string(),
                output: applied.output,
            });
        }

        let data = read_patched(&work_dir.join(remote_path))?;
        if data.is_empty() {
            return Err(ConfigError::EmptyConfiguration);
        }
        return Ok(data);
    }

    Err(ConfigError::NoMainPatch)
}

fn read_patched(path: &Path) -> Result<String, ConfigError> {
    match std::fs::read_to_string(path) {
        Ok(data) => Ok(data),
        // The diff deleted the file.
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(String::new()),
        Err(err) => Err(io_err(path, err)),
    }
}

/// Unified diff between two versions of the configuration file at `path`.
pub fn config_diff(before: &str, after: &str, path: &str) -> String {
    let old_header = format!("a/{path}");
    let new_header = format!("b/{path}");
    TextDiff::from_lines(before, after)
        .unified_diff()
        .header(&old_header, &new_header)
        .context_radius(3)
        .to_string()
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::rename(
        "diff --git a/old.yml b/ci.yml\nsimilarity index 90%\nrename from old.yml\nrename to ci.yml\n",
        Some("old.yml")
    )]
    #[case::copy(
        "diff --git a/base.yml b/ci.yml\ncopy from base.yml\ncopy to ci.yml\n",
        Some("base.yml")
    )]
    #[case::other_file_renamed(
        "diff --git a/a.yml b/b.yml\nrename from a.yml\nrename to b.yml\n",
        None
    )]
    #[case::plain_edit("--- a/ci.yml\n+++ b/ci.yml\n@@ -1 +1 @@\n-a\n+b\n", None)]
    fn finds_rename_source(#[case] diff: &str, #[case] expected: Option<&str>) {
        let got = parse_renamed_or_copied_file(diff, "ci.yml").expect("parse");
        assert_eq!(got.as_deref(), expected);
    }

    #[test]
    fn rename_source_does_not_leak_across_sections() {
        let diff = "diff --git a/x.yml b/y.yml\nrename from x.yml\nrename to y.yml\n\
                    diff --git a/ci.yml b/ci.yml\nrename to ci.yml\n";
        let err = parse_renamed_or_copied_file(diff, "ci.yml").unwrap_err();
        assert!(matches!(err, ConfigError::MalformedRenameHeader { header: "rename to", .. }));
    }

    #[test]
    fn config_diff_has_headers() {
        let diff = config_diff("a: 1\n", "a: 2\n", "ci.yml");
        assert!(diff.contains("--- a/ci.yml"));
        assert!(diff.contains("+++ b/ci.yml"));
        assert!(diff.contains("+a: 2"));
    }

    #[test]
    fn diff_contents_reads_out_of_line_text() {
        let store = Store::in_memory();
        store
            .transaction(|docs| {
                docs.insert_patch_contents("file-1", "+++ b/ci.yml\n");
                Ok::<_, patchflow_core::StoreError>(())
            })
            .expect("seed");
        let mut part = ModulePatch::default();
        part.patch_set.patch_file_id = "file-1".into();
        assert_eq!(diff_contents(&store, &part).expect("contents"), "+++ b/ci.yml\n");

        part.patch_set.patch_file_id = "missing".into();
        assert!(matches!(
            diff_contents(&store, &part),
            Err(ConfigError::PatchContentsNotFound { .. })
        ));
    }
}
