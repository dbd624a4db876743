//! Translated, validated project definition.
//!
//! This is the structured form of a project's configuration file after
//! parsing (see `patchflow-config`). Lookups here are what the materializer
//! and the task-pair validation consume.

use serde::{Deserialize, Serialize};

use crate::patch::VariantTasks;

// ---------------------------------------------------------------------------
// Definition types
// ---------------------------------------------------------------------------

/// A dependency declared by a task or a variant's task unit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDependency {
    /// Task name, or `*` for every task of the variant.
    pub name: String,
    /// Variant to look in; `None` means the depending task's own variant,
    /// `*` means every variant.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub variant: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<String>,
    #[serde(default)]
    pub patch_optional: bool,
}

/// A task defined at project level.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ProjectTask {
    pub name: String,
    #[serde(default)]
    pub depends_on: Vec<TaskDependency>,
    #[serde(default)]
    pub run_on: Vec<String>,
    #[serde(default)]
    pub priority: i64,
    /// The task runs `generate.tasks`.
    #[serde(default)]
    pub generate_tasks: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_generated_tasks: Option<u32>,
    #[serde(default)]
    pub disable: bool,
}

/// A task as listed under a build variant, with per-variant overrides.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BuildVariantTaskUnit {
    pub name: String,
    /// Overrides the project task's dependencies when non-empty.
    #[serde(default)]
    pub depends_on: Vec<TaskDependency>,
    #[serde(default)]
    pub run_on: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub priority: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub activate: Option<bool>,
    #[serde(default)]
    pub create_check_run: bool,
    #[serde(default)]
    pub disable: bool,
}

/// A named group of execution tasks reported as one.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisplayTaskDefinition {
    pub name: String,
    #[serde(default)]
    pub execution_tasks: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct BuildVariant {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub run_on: Vec<String>,
    #[serde(default)]
    pub tasks: Vec<BuildVariantTaskUnit>,
    #[serde(default)]
    pub display_tasks: Vec<DisplayTaskDefinition>,
}

impl BuildVariant {
    pub fn task_unit(&self, name: &str) -> Option<&BuildVariantTaskUnit> {
        self.tasks.iter().find(|t| t.name == name)
    }

    pub fn display_task(&self, name: &str) -> Option<&DisplayTaskDefinition> {
        self.display_tasks.iter().find(|dt| dt.name == name)
    }

    pub fn display_name_or_name(&self) -> &str {
        if self.display_name.is_empty() {
            &self.name
        } else {
            &self.display_name
        }
    }
}

/// An additional repository whose revision is recorded in the manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Module {
    pub name: String,
    #[serde(default)]
    pub owner: String,
    pub repo: String,
    #[serde(default)]
    pub branch: String,
    /// Pinned revision; wins over the branch head.
    #[serde(default, rename = "ref", skip_serializing_if = "Option::is_none")]
    pub pinned_ref: Option<String>,
}

/// A validated project definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Project {
    pub identifier: String,
    #[serde(default)]
    pub build_variants: Vec<BuildVariant>,
    #[serde(default)]
    pub tasks: Vec<ProjectTask>,
    #[serde(default)]
    pub modules: Vec<Module>,
}

/// A task unit merged with its project-level definition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedTask {
    pub name: String,
    pub variant: String,
    pub depends_on: Vec<TaskDependency>,
    pub run_on: Vec<String>,
    pub priority: i64,
    pub activate: bool,
    pub generate_tasks: bool,
    pub estimated_generated_tasks: Option<u32>,
    pub create_check_run: bool,
}

// ---------------------------------------------------------------------------
// Lookups
// ---------------------------------------------------------------------------

impl Project {
    pub fn find_build_variant(&self, name: &str) -> Option<&BuildVariant> {
        self.build_variants.iter().find(|bv| bv.name == name)
    }

    pub fn find_project_task(&self, name: &str) -> Option<&ProjectTask> {
        self.tasks.iter().find(|t| t.name == name)
    }

    /// Resolve `task` as scheduled under `variant`.
    ///
    /// Returns `None` when the variant doesn't list the task, the task isn't
    /// defined, or either side disables it. Unit overrides win over the
    /// project task, which wins over the variant's `run_on`.
    pub fn find_task_for_variant(&self, task: &str, variant: &str) -> Option<ResolvedTask> {
        let bv = self.find_build_variant(variant)?;
        let unit = bv.task_unit(task)?;
        let def = self.find_project_task(task)?;
        if unit.disable || def.disable {
            return None;
        }

        let depends_on = if unit.depends_on.is_empty() {
            def.depends_on.clone()
        } else {
            unit.depends_on.clone()
        };
        let run_on = [&unit.run_on, &def.run_on, &bv.run_on]
            .into_iter()
            .find(|r| !r.is_empty())
            .cloned()
            .unwrap_or_default();

        Some(ResolvedTask {
            name: task.to_string(),
            variant: variant.to_string(),
            depends_on,
            run_on,
            priority: unit.priority.unwrap_or(def.priority),
            activate: unit.activate.unwrap_or(true),
            generate_tasks: def.generate_tasks,
            estimated_generated_tasks: def.estimated_generated_tasks,
            create_check_run: unit.create_check_run,
        })
    }

    /// Names of every schedulable task of `variant`, in declaration order.
    pub fn variant_task_names(&self, variant: &str) -> Vec<String> {
        let Some(bv) = self.find_build_variant(variant) else {
            return vec![];
        };
        bv.tasks
            .iter()
            .filter(|unit| self.find_task_for_variant(&unit.name, variant).is_some())
            .map(|unit| unit.name.clone())
            .collect()
    }

    /// Number of GitHub check runs the selection would create.
    pub fn num_check_runs(&self, variants_tasks: &[VariantTasks]) -> usize {
        variants_tasks
            .iter()
            .map(|vt| {
                vt.tasks
                    .iter()
                    .filter_map(|t| self.find_task_for_variant(t, &vt.variant))
                    .filter(|t| t.create_check_run)
                    .count()
            })
            .sum()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
