//! Task-ID allocation.
//!
//! Ids are derived from the project identifier, variant, task name, revision
//! and version, then cleaned to `[A-Za-z0-9_]`. A short digest of the
//! (variant, task) pair is appended whenever cleaning altered the variant or
//! task name, or the plain id is already taken, so distinct pairs never share
//! an id. Execution and display tasks share one namespace. Build ids follow
//! the same rules per variant in a namespace of their own.

use std::collections::{BTreeMap, BTreeSet};

use sha2::{Digest, Sha256};

use patchflow_core::pairs::{TVPair, TaskVariantPairs};
use patchflow_core::types::{BuildId, Requester, TaskId};
use patchflow_core::version::{Build, Task, Version};

/// Which half of the table an id lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Kind {
    Exec,
    Display,
}

impl Kind {
    fn tag(self) -> &'static str {
        match self {
            Kind::Exec => "exec",
            Kind::Display => "display",
        }
    }
}

/// (variant, task) → id for one version.
#[derive(Debug, Clone, Default)]
pub struct TaskIdTable {
    exec: BTreeMap<TVPair, TaskId>,
    display: BTreeMap<TVPair, TaskId>,
    taken: BTreeSet<TaskId>,
    builds: BTreeMap<String, BuildId>,
    taken_builds: BTreeSet<BuildId>,
}

impl TaskIdTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the tasks a version already has.
    pub fn seed_existing<'a>(&mut self, tasks: impl IntoIterator<Item = &'a Task>) {
        for task in tasks {
            let pair = TVPair::new(&task.build_variant, &task.display_name);
            self.taken.insert(task.id.clone());
            if task.display_only {
                self.display.insert(pair, task.id.clone());
            } else {
                self.exec.insert(pair, task.id.clone());
            }
        }
    }

    /// Register the builds a version already has.
    pub fn seed_builds<'a>(&mut self, builds: impl IntoIterator<Item = &'a Build>) {
        for build in builds {
            self.taken_builds.insert(build.id.clone());
            self.builds.insert(build.build_variant.clone(), build.id.clone());
        }
    }

    /// Allocate ids for every pair, and every variant's build, not yet in
    /// the table.
    pub fn allocate(&mut self, project: &str, version: &Version, pairs: &TaskVariantPairs) {
        for variant in pairs.exec_tasks.variants().into_iter().chain(pairs.display_tasks.variants()) {
            self.assign_build(project, version, variant);
        }
        for pair in pairs.exec_tasks.iter() {
            self.assign(project, version, pair, Kind::Exec);
        }
        for pair in pairs.display_tasks.iter() {
            self.assign(project, version, pair, Kind::Display);
        }
    }

    fn assign(&mut self, project: &str, version: &Version, pair: &TVPair, kind: Kind) {
        let map = match kind {
            Kind::Exec => &self.exec,
            Kind::Display => &self.display,
        };
        if map.contains_key(pair) {
            return;
        }

        let variant = clean(&pair.variant);
        let task = clean(&pair.task_name);
        let plain = clean(&format!("{project}_{variant}_{task}_{}", id_suffix(version)));
        let altered = variant != pair.variant || task != pair.task_name;

        let mut id = TaskId::from(plain.clone());
        if altered || self.taken.contains(&id) {
            id = TaskId::from(format!("{plain}_{}", pair_digest(pair, kind, 0)));
        }
        let mut attempt = 1;
        while self.taken.contains(&id) {
            id = TaskId::from(format!("{plain}_{}", pair_digest(pair, kind, attempt)));
            attempt += 1;
        }

        self.taken.insert(id.clone());
        match kind {
            Kind::Exec => self.exec.insert(pair.clone(), id),
            Kind::Display => self.display.insert(pair.clone(), id),
        };
    }

    fn assign_build(&mut self, project: &str, version: &Version, variant: &str) {
        if self.builds.contains_key(variant) {
            return;
        }

        let plain = build_id(project, variant, version);
        let mut id = plain.clone();
        if clean(variant) != variant || self.taken_builds.contains(&id) {
            id = BuildId::from(format!("{plain}_{}", variant_digest(variant, 0)));
        }
        let mut attempt = 1;
        while self.taken_builds.contains(&id) {
            id = BuildId::from(format!("{plain}_{}", variant_digest(variant, attempt)));
            attempt += 1;
        }

        self.taken_builds.insert(id.clone());
        self.builds.insert(variant.to_string(), id);
    }

    pub fn get_build(&self, variant: &str) -> Option<&BuildId> {
        self.builds.get(variant)
    }

    pub fn get_exec(&self, variant: &str, task: &str) -> Option<&TaskId> {
        self.exec.get(&TVPair::new(variant, task))
    }

    pub fn get_display(&self, variant: &str, task: &str) -> Option<&TaskId> {
        self.display.get(&TVPair::new(variant, task))
    }

    pub fn len(&self) -> usize {
        self.exec.len() + self.display.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Plain id of the build of `variant` in `version`, before any collision
/// suffix.
pub fn build_id(project: &str, variant: &str, version: &Version) -> BuildId {
    BuildId::from(clean(&format!("{project}_{variant}_{}", id_suffix(version))))
}

/// Patch-like versions carry their version id; mainline ones their creation
/// time.
fn id_suffix(version: &Version) -> String {
    match version.requester {
        Requester::Mainline => format!(
            "{}_{}",
            version.revision,
            version.create_time.format("%y_%m_%d_%H_%M_%S")
        ),
        _ => format!("patch_{}_{}", version.revision, version.id),
    }
}

fn clean(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' { c } else { '_' })
        .collect()
}

fn pair_digest(pair: &TVPair, kind: Kind, attempt: u32) -> String {
    let mut h = Sha256::new();
    h.update(pair.variant.as_bytes());
    h.update([0]);
    h.update(pair.task_name.as_bytes());
    h.update([0]);
    h.update(kind.tag().as_bytes());
    if attempt > 0 {
        h.update(attempt.to_be_bytes());
    }
    hex::encode(h.finalize())[..8].to_string()
}

fn variant_digest(variant: &str, attempt: u32) -> String {
    let mut h = Sha256::new();
    h.update(variant.as_bytes());
    h.update([0]);
    h.update(b"build");
    if attempt > 0 {
        h.update(attempt.to_be_bytes());
    }
    hex::encode(h.finalize())[..8].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use patchflow_core::patch::VariantTasks;
    use patchflow_core::types::{VersionId, VersionStatus};

    fn version(requester: Requester) -> Version {
        Version {
            id: VersionId::from("65a1"),
            create_time: Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap(),
            identifier: "proj".into(),
            revision: "abc123".into(),
            author: String::new(),
            author_id: String::new(),
            author_email: String::new(),
            message: String::new(),
            build_ids: vec![],
            build_variants: vec![],
            status: VersionStatus::Created,
            requester,
            parent_patch_id: None,
            parent_patch_number: 0,
            project_storage_method: None,
            branch: String::new(),
            revision_order_number: 0,
            parameters: vec![],
            activated: true,
        }
    }

    fn pairs(variant: &str, tasks: &[&str]) -> TaskVariantPairs {
        TaskVariantPairs::expand(&[VariantTasks {
            variant: variant.into(),
            tasks: tasks.iter().map(|t| t.to_string()).collect(),
            display_tasks: vec![],
        }])
    }

    #[test]
    fn patch_ids_are_deterministic() {
        let v = version(Requester::Patch);
        let mut a = TaskIdTable::new();
        a.allocate("proj", &v, &pairs("linux", &["compile"]));
        let mut b = TaskIdTable::new();
        b.allocate("proj", &v, &pairs("linux", &["compile"]));
        assert_eq!(
            a.get_exec("linux", "compile").map(TaskId::as_str),
            Some("proj_linux_compile_patch_abc123_65a1")
        );
        assert_eq!(a.get_exec("linux", "compile"), b.get_exec("linux", "compile"));
    }

    #[test]
    fn mainline_ids_use_creation_time() {
        let mut t = TaskIdTable::new();
        t.allocate("proj", &version(Requester::Mainline), &pairs("linux", &["compile"]));
        assert_eq!(
            t.get_exec("linux", "compile").map(TaskId::as_str),
            Some("proj_linux_compile_abc123_24_03_09_14_05_07")
        );
    }

    #[test]
    fn names_that_clean_alike_get_distinct_ids() {
        let mut t = TaskIdTable::new();
        t.allocate("proj", &version(Requester::Patch), &pairs("linux", &["a-b", "a.b", "a_b"]));
        let ids: BTreeSet<_> = ["a-b", "a.b", "a_b"]
            .iter()
            .filter_map(|n| t.get_exec("linux", n))
            .collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(
            t.get_exec("linux", "a_b").map(TaskId::as_str),
            Some("proj_linux_a_b_patch_abc123_65a1")
        );
    }

    #[test]
    fn seeded_ids_are_kept_and_avoided() {
        let v = version(Requester::Patch);
        let mut first = TaskIdTable::new();
        first.allocate("proj", &v, &pairs("linux", &["compile"]));
        let existing = first.get_exec("linux", "compile").cloned().expect("id");

        let mut table = TaskIdTable::new();
        table.taken.insert(TaskId::from("proj_linux_unit_patch_abc123_65a1"));
        table.exec.insert(TVPair::new("linux", "compile"), existing.clone());
        table.allocate("proj", &v, &pairs("linux", &["compile", "unit"]));

        assert_eq!(table.get_exec("linux", "compile"), Some(&existing));
        let unit = table.get_exec("linux", "unit").expect("unit");
        assert_ne!(unit.as_str(), "proj_linux_unit_patch_abc123_65a1");
        assert!(unit.as_str().starts_with("proj_linux_unit_patch_abc123_65a1_"));
    }

    #[test]
    fn build_ids_follow_the_same_scheme() {
        assert_eq!(
            build_id("proj", "linux-64", &version(Requester::Patch)).as_str(),
            "proj_linux_64_patch_abc123_65a1"
        );
    }

    #[test]
    fn variants_that_clean_alike_get_distinct_builds() {
        let v = version(Requester::Patch);
        let mut t = TaskIdTable::new();
        let selection: Vec<VariantTasks> = ["linux-64", "linux.64", "linux_64"]
            .iter()
            .map(|variant| VariantTasks {
                variant: variant.to_string(),
                tasks: vec!["compile".into()],
                display_tasks: vec![],
            })
            .collect();
        t.allocate("proj", &v, &TaskVariantPairs::expand(&selection));

        let ids: BTreeSet<_> = ["linux-64", "linux.64", "linux_64"]
            .iter()
            .filter_map(|variant| t.get_build(variant))
            .collect();
        assert_eq!(ids.len(), 3);
        assert_eq!(
            t.get_build("linux_64").map(BuildId::as_str),
            Some("proj_linux_64_patch_abc123_65a1")
        );
        let dashed = t.get_build("linux-64").expect("linux-64");
        assert!(dashed.as_str().starts_with("proj_linux_64_patch_abc123_65a1_"));
    }
}
