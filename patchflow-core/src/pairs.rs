//! Task-pair model: the expanded (variant, task) form of a selection.
//!
//! A [`VariantTasks`] list is the sparse form stored on a patch. Expanding it
//! yields two pair sets, one for execution tasks and one for display tasks,
//! with every display task's execution tasks copied into the execution set.
//! Collapsing groups the pairs back by variant. The two conversions agree on
//! set membership only; callers must not depend on list order.

use std::collections::{BTreeMap, BTreeSet};

use serde::{Deserialize, Serialize};

use crate::error::PairError;
use crate::patch::{DisplayTask, VariantTasks};
use crate::project::Project;

// ---------------------------------------------------------------------------
// TVPair
// ---------------------------------------------------------------------------

/// One (variant, task-name) selection.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TVPair {
    pub variant: String,
    pub task_name: String,
}

impl TVPair {
    pub fn new(variant: impl Into<String>, task_name: impl Into<String>) -> Self {
        Self {
            variant: variant.into(),
            task_name: task_name.into(),
        }
    }
}

/// Insertion-ordered set of pairs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TVPairSet {
    pairs: Vec<TVPair>,
    index: BTreeSet<TVPair>,
}

impl TVPairSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds `pair` unless present. Returns whether it was added.
    pub fn insert(&mut self, pair: TVPair) -> bool {
        if self.index.contains(&pair) {
            return false;
        }
        self.index.insert(pair.clone());
        self.pairs.push(pair);
        true
    }

    pub fn contains(&self, variant: &str, task: &str) -> bool {
        self.index.contains(&TVPair::new(variant, task))
    }

    pub fn iter(&self) -> impl Iterator<Item = &TVPair> {
        self.pairs.iter()
    }

    pub fn len(&self) -> usize {
        self.pairs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.pairs.is_empty()
    }

    pub fn as_slice(&self) -> &[TVPair] {
        &self.pairs
    }

    /// Distinct variants in first-seen order.
    pub fn variants(&self) -> Vec<&str> {
        let mut seen = BTreeSet::new();
        self.pairs
            .iter()
            .filter(|p| seen.insert(p.variant.as_str()))
            .map(|p| p.variant.as_str())
            .collect()
    }

    /// Task names selected for `variant`, in insertion order.
    pub fn task_names(&self, variant: &str) -> Vec<&str> {
        self.pairs
            .iter()
            .filter(|p| p.variant == variant)
            .map(|p| p.task_name.as_str())
            .collect()
    }
}

impl FromIterator<TVPair> for TVPairSet {
    fn from_iter<I: IntoIterator<Item = TVPair>>(iter: I) -> Self {
        let mut set = TVPairSet::new();
        for pair in iter {
            set.insert(pair);
        }
        set
    }
}

impl Extend<TVPair> for TVPairSet {
    fn extend<I: IntoIterator<Item = TVPair>>(&mut self, iter: I) {
        for pair in iter {
            self.insert(pair);
        }
    }
}

// ---------------------------------------------------------------------------
// TaskVariantPairs
// ---------------------------------------------------------------------------

/// Expanded selection: execution pairs, display pairs, and which execution
/// tasks each selected display task groups.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TaskVariantPairs {
    pub exec_tasks: TVPairSet,
    pub display_tasks: TVPairSet,
    display_members: BTreeMap<TVPair, Vec<String>>,
}

impl TaskVariantPairs {
    pub fn is_empty(&self) -> bool {
        self.exec_tasks.is_empty() && self.display_tasks.is_empty()
    }

    /// Fan a sparse selection out into pairs.
    pub fn expand(selection: &[VariantTasks]) -> Self {
        let mut out = TaskVariantPairs::default();
        for vt in selection {
            for task in &vt.tasks {
                out.exec_tasks.insert(TVPair::new(&vt.variant, task));
            }
            for dt in &vt.display_tasks {
                out.add_display_task(&vt.variant, &dt.name, &dt.exec_tasks);
            }
        }
        out
    }

    /// Select display task `name` of `variant` along with its execution tasks.
    pub fn add_display_task(&mut self, variant: &str, name: &str, exec_tasks: &[String]) {
        let pair = TVPair::new(variant, name);
        self.display_tasks.insert(pair.clone());
        let members = self.display_members.entry(pair).or_default();
        for et in exec_tasks {
            if !members.contains(et) {
                members.push(et.clone());
            }
            self.exec_tasks.insert(TVPair::new(variant, et));
        }
    }

    /// Execution task names grouped under display task `name` of `variant`.
    pub fn display_exec_tasks(&self, variant: &str, name: &str) -> &[String] {
        self.display_members
            .get(&TVPair::new(variant, name))
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Group pairs back by variant.
    ///
    /// Execution tasks grouped by a selected display task are listed under
    /// that display task only. A variant selected solely through display
    /// tasks still gets an entry.
    pub fn collapse(&self) -> Vec<VariantTasks> {
        let mut by_variant: BTreeMap<&str, VariantTasks> = BTreeMap::new();

        for pair in self.display_tasks.iter() {
            let vt = entry(&mut by_variant, &pair.variant);
            vt.display_tasks.push(DisplayTask {
                name: pair.task_name.clone(),
                exec_tasks: self.display_exec_tasks(&pair.variant, &pair.task_name).to_vec(),
            });
        }

        for pair in self.exec_tasks.iter() {
            let vt = entry(&mut by_variant, &pair.variant);
            let grouped = vt
                .display_tasks
                .iter()
                .any(|dt| dt.exec_tasks.contains(&pair.task_name));
            if !grouped {
                vt.tasks.push(pair.task_name.clone());
            }
        }

        by_variant.into_values().collect()
    }
}

fn entry<'a, 'm>(
    map: &'m mut BTreeMap<&'a str, VariantTasks>,
    variant: &'a str,
) -> &'m mut VariantTasks {
    map.entry(variant).or_insert_with(|| VariantTasks {
        variant: variant.to_string(),
        ..Default::default()
    })
}

// ---------------------------------------------------------------------------
// Project-aware helpers
// ---------------------------------------------------------------------------

/// Check that every pair exists in `project`.
pub fn validate_pairs(project: &Project, pairs: &TaskVariantPairs) -> Result<(), PairError> {
    for pair in pairs.exec_tasks.iter() {
        if project
            .find_task_for_variant(&pair.task_name, &pair.variant)
            .is_none()
        {
            return Err(PairError::UnknownTask {
                variant: pair.variant.clone(),
                task: pair.task_name.clone(),
            });
        }
    }
    for pair in pairs.display_tasks.iter() {
        let defined = project
            .find_build_variant(&pair.variant)
            .and_then(|bv| bv.display_task(&pair.task_name))
            .is_some();
        if !defined {
            return Err(PairError::UnknownDisplayTask {
                variant: pair.variant.clone(),
                task: pair.task_name.clone(),
            });
        }
    }
    Ok(())
}

/// Move requested task names that are really display tasks of their variant
/// into the display-task list, carrying the project's execution tasks.
pub fn normalize_display_requests(project: &Project, selection: &mut [VariantTasks]) {
    for vt in selection.iter_mut() {
        let Some(bv) = project.find_build_variant(&vt.variant) else {
            continue;
        };
        let mut kept = Vec::with_capacity(vt.tasks.len());
        for task in vt.tasks.drain(..) {
            match bv.display_task(&task) {
                Some(def) => {
                    if !vt.display_tasks.iter().any(|dt| dt.name == def.name) {
                        vt.display_tasks.push(DisplayTask {
                            name: def.name.clone(),
                            exec_tasks: def.execution_tasks.clone(),
                        });
                    }
                }
                None => kept.push(task),
            }
        }
        vt.tasks = kept;
    }
}

/// Pairs for the legacy schema: every listed task of every listed variant
/// that the project actually schedules there.
pub fn legacy_cross_product(project: &Project, variants: &[String], tasks: &[String]) -> TaskVariantPairs {
    let mut out = TaskVariantPairs::default();
    for variant in variants {
        for task in tasks {
            if project.find_task_for_variant(task, variant).is_some() {
                out.exec_tasks.insert(TVPair::new(variant, task));
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::project::{BuildVariant, BuildVariantTaskUnit, DisplayTaskDefinition, ProjectTask};

    fn vt(variant: &str, tasks: &[&str], display: &[(&str, &[&str])]) -> VariantTasks {
        VariantTasks {
            variant: variant.into(),
            tasks: tasks.iter().map(|t| t.to_string()).collect(),
            display_tasks: display
                .iter()
                .map(|(name, exec)| DisplayTask {
                    name: name.to_string(),
                    exec_tasks: exec.iter().map(|t| t.to_string()).collect(),
                })
                .collect(),
        }
    }

    fn project() -> Project {
        let unit = |name: &str| BuildVariantTaskUnit {
            name: name.into(),
            ..Default::default()
        };
        Project {
            identifier: "proj".into(),
            build_variants: vec![BuildVariant {
                name: "linux".into(),
                tasks: vec![unit("compile"), unit("unit"), unit("integration")],
                display_tasks: vec![DisplayTaskDefinition {
                    name: "tests".into(),
                    execution_tasks: vec!["unit".into(), "integration".into()],
                }],
                ..Default::default()
            }],
            tasks: ["compile", "unit", "integration"]
                .iter()
                .map(|n| ProjectTask {
                    name: n.to_string(),
                    ..Default::default()
                })
                .collect(),
            modules: vec![],
        }
    }

    #[test]
    fn expand_copies_display_members_into_exec_set() {
        let pairs = TaskVariantPairs::expand(&[vt("v1", &["t1"], &[("d", &["e1", "e2"])])]);
        assert!(pairs.exec_tasks.contains("v1", "t1"));
        assert!(pairs.exec_tasks.contains("v1", "e1"));
        assert!(pairs.exec_tasks.contains("v1", "e2"));
        assert!(pairs.display_tasks.contains("v1", "d"));
        assert_eq!(pairs.exec_tasks.len(), 3);
    }

    #[test]
    fn expand_deduplicates_repeated_variants() {
        let pairs = TaskVariantPairs::expand(&[vt("v1", &["t1"], &[]), vt("v1", &["t1", "t2"], &[])]);
        assert_eq!(pairs.exec_tasks.task_names("v1"), vec!["t1", "t2"]);
        assert_eq!(pairs.exec_tasks.variants(), vec!["v1"]);
    }

    #[test]
    fn display_only_variant_survives_collapse() {
        let pairs = TaskVariantPairs::expand(&[vt("v2", &[], &[("d", &["e1"])])]);
        let collapsed = pairs.collapse();
        assert_eq!(collapsed.len(), 1);
        assert_eq!(collapsed[0].variant, "v2");
        assert!(collapsed[0].tasks.is_empty());
        assert_eq!(collapsed[0].display_tasks[0].exec_tasks, vec!["e1".to_string()]);
    }

    #[test]
    fn collapse_groups_interleaved_variants() {
        let mut pairs = TaskVariantPairs::default();
        pairs.exec_tasks.insert(TVPair::new("v1", "t1"));
        pairs.exec_tasks.insert(TVPair::new("v2", "t1"));
        pairs.exec_tasks.insert(TVPair::new("v1", "t2"));
        pairs.add_display_task("v2", "d", &["e1".to_string()]);

        let collapsed = pairs.collapse();

        assert_eq!(collapsed.len(), 2);
        assert_eq!(collapsed[0].variant, "v1");
        assert_eq!(collapsed[0].tasks, vec!["t1".to_string(), "t2".to_string()]);
        assert_eq!(collapsed[1].variant, "v2");
        assert_eq!(collapsed[1].tasks, vec!["t1".to_string()]);
        assert_eq!(collapsed[1].display_tasks[0].exec_tasks, vec!["e1".to_string()]);
    }

    #[test]
    fn validate_reports_missing_pair() {
        let pairs = TaskVariantPairs::expand(&[vt("linux", &["compile", "lint"], &[])]);
        let err = validate_pairs(&project(), &pairs).unwrap_err();
        assert_eq!(err.to_string(), "task name 'lint' in variant 'linux' does not exist");
    }

    #[test]
    fn validate_accepts_defined_display_task() {
        let pairs = TaskVariantPairs::expand(&[vt("linux", &[], &[("tests", &["unit"])])]);
        validate_pairs(&project(), &pairs).expect("valid");
    }

    #[test]
    fn display_request_is_normalized() {
        let mut selection = vec![vt("linux", &["compile", "tests"], &[])];
        normalize_display_requests(&project(), &mut selection);
        assert_eq!(selection[0].tasks, vec!["compile".to_string()]);
        assert_eq!(selection[0].display_tasks[0].name, "tests");
        assert_eq!(selection[0].display_tasks[0].exec_tasks, vec!["unit", "integration"]);
    }

    #[test]
    fn legacy_cross_product_filters_to_existing_pairs() {
        let pairs = legacy_cross_product(
            &project(),
            &["linux".into(), "windows".into()],
            &["compile".into(), "missing".into()],
        );
        assert_eq!(pairs.exec_tasks.as_slice(), &[TVPair::new("linux", "compile")]);
    }
}
