//! Parsing configuration text into a validated [`Project`].
//!
//! The file format is YAML:
//!
//! ```yaml
//! modules:
//!   - name: enterprise
//!     owner: evg
//!     repo: enterprise
//!     branch: main
//! tasks:
//!   - name: compile
//!   - name: test
//!     depends_on: [compile]
//!     commands:
//!       - command: generate.tasks
//! buildvariants:
//!   - name: linux
//!     run_on: [ubuntu2204]
//!     tasks: [compile, {name: test, activate: false}]
//!     display_tasks:
//!       - name: all
//!         execution_tasks: [compile, test]
//! patch_aliases:
//!   - alias: nightly
//!     variant: linux
//!     task: ".*"
//! ```
//!
//! Version-controlled settings (aliases, build-baron and annotation settings)
//! live in the same file and are projected separately by
//! [`create_project_config`].

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use patchflow_core::project::{
    BuildVariant, BuildVariantTaskUnit, DisplayTaskDefinition, Module, Project, ProjectTask,
    TaskDependency,
};
use patchflow_core::records::{ProjectConfig, ProjectConfigFields};

use crate::error::ConfigError;

// ---------------------------------------------------------------------------
// Parser project
// ---------------------------------------------------------------------------

/// A dependency written either as a bare task name or in full.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParserDependency {
    Name(String),
    Full(TaskDependency),
}

impl ParserDependency {
    fn into_dependency(self) -> TaskDependency {
        match self {
            ParserDependency::Name(name) => TaskDependency {
                name,
                variant: None,
                status: None,
                patch_optional: false,
            },
            ParserDependency::Full(dep) => dep,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ParserCommand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub func: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ParserTask {
    pub name: String,
    #[serde(default)]
    pub depends_on: Vec<ParserDependency>,
    #[serde(default)]
    pub run_on: Vec<String>,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub commands: Vec<ParserCommand>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub estimated_generated_tasks: Option<u32>,
    #[serde(default)]
    pub disable: bool,
}

/// A variant's task entry written either as a bare name or in full.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParserTaskUnit {
    Name(String),
    Full(ParserTaskUnitSpec),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ParserTaskUnitSpec {
    pub name: String,
    #[serde(default)]
    pub depends_on: Vec<ParserDependency>,
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

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ParserBuildVariant {
    pub name: String,
    #[serde(default)]
    pub display_name: String,
    #[serde(default)]
    pub run_on: Vec<String>,
    #[serde(default)]
    pub tasks: Vec<ParserTaskUnit>,
    #[serde(default)]
    pub display_tasks: Vec<DisplayTaskDefinition>,
}

/// The configuration file as written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct ParserProject {
    #[serde(default)]
    pub modules: Vec<Module>,
    #[serde(default)]
    pub tasks: Vec<ParserTask>,
    #[serde(default)]
    pub buildvariants: Vec<ParserBuildVariant>,
    #[serde(flatten)]
    pub config: ProjectConfigFields,
}

// ---------------------------------------------------------------------------
// Translation
// ---------------------------------------------------------------------------

/// Parse configuration text.
pub fn parse_project(yaml: &str) -> Result<ParserProject, ConfigError> {
    if yaml.trim().is_empty() {
        return Err(ConfigError::EmptyConfiguration);
    }
    Ok(serde_yaml::from_str(yaml)?)
}

/// Parse and validate configuration text into the project `identifier`.
pub fn load_project(yaml: &str, identifier: &str) -> Result<Project, ConfigError> {
    translate_project(parse_project(yaml)?, identifier)
}

/// Turn a parsed file into a validated [`Project`].
///
/// Every problem found is reported at once.
pub fn translate_project(pp: ParserProject, identifier: &str) -> Result<Project, ConfigError> {
    let tasks: Vec<ProjectTask> = pp.tasks.into_iter().map(translate_task).collect();
    let build_variants: Vec<BuildVariant> = pp
        .buildvariants
        .into_iter()
        .map(translate_variant)
        .collect();

    let project = Project {
        identifier: identifier.to_string(),
        build_variants,
        tasks,
        modules: pp.modules,
    };

    let problems = validate_project(&project);
    if problems.is_empty() {
        Ok(project)
    } else {
        Err(ConfigError::Validation(problems))
    }
}

fn translate_task(t: ParserTask) -> ProjectTask {
    let generate_tasks = t
        .commands
        .iter()
        .any(|c| c.command.as_deref() == Some("generate.tasks"));
    ProjectTask {
        name: t.name,
        depends_on: t.depends_on.into_iter().map(ParserDependency::into_dependency).collect(),
        run_on: t.run_on,
        priority: t.priority,
        generate_tasks,
        estimated_generated_tasks: t.estimated_generated_tasks,
        disable: t.disable,
    }
}

fn translate_variant(bv: ParserBuildVariant) -> BuildVariant {
    let tasks = bv
        .tasks
        .into_iter()
        .map(|unit| match unit {
            ParserTaskUnit::Name(name) => BuildVariantTaskUnit {
                name,
                ..Default::default()
            },
            ParserTaskUnit::Full(full) => BuildVariantTaskUnit {
                name: full.name,
                depends_on: full
                    .depends_on
                    .into_iter()
                    .map(ParserDependency::into_dependency)
                    .collect(),
                run_on: full.run_on,
                priority: full.priority,
                activate: full.activate,
                create_check_run: full.create_check_run,
                disable: full.disable,
            },
        })
        .collect();
    BuildVariant {
        name: bv.name,
        display_name: bv.display_name,
        run_on: bv.run_on,
        tasks,
        display_tasks: bv.display_tasks,
    }
}

fn validate_project(project: &Project) -> Vec<String> {
    let mut problems = Vec::new();

    let mut task_names = BTreeSet::new();
    for task in &project.tasks {
        if task.name.is_empty() {
            problems.push("task with an empty name".to_string());
        } else if !task_names.insert(task.name.as_str()) {
            problems.push(format!("task '{}' is defined more than once", task.name));
        }
    }

    let mut variant_names = BTreeSet::new();
    for bv in &project.build_variants {
        if bv.name.is_empty() {
            problems.push("build variant with an empty name".to_string());
        } else if !variant_names.insert(bv.name.as_str()) {
            problems.push(format!("build variant '{}' is defined more than once", bv.name));
        }

        for unit in &bv.tasks {
            if !task_names.contains(unit.name.as_str()) {
                problems.push(format!(
                    "build variant '{}' references undefined task '{}'",
                    bv.name, unit.name
                ));
            }
        }
        for dt in &bv.display_tasks {
            if task_names.contains(dt.name.as_str()) {
                problems.push(format!(
                    "display task '{}' in build variant '{}' shares a name with a task",
                    dt.name, bv.name
                ));
            }
            for et in &dt.execution_tasks {
                if bv.task_unit(et).is_none() {
                    problems.push(format!(
                        "display task '{}' in build variant '{}' references task '{}' not in the variant",
                        dt.name, bv.name, et
                    ));
                }
            }
        }
    }

    let unit_deps = project
        .build_variants
        .iter()
        .flat_map(|bv| bv.tasks.iter().map(move |u| (u.name.as_str(), &u.depends_on)));
    let task_deps = project
        .tasks
        .iter()
        .map(|t| (t.name.as_str(), &t.depends_on));
    for (owner, deps) in task_deps.chain(unit_deps) {
        for dep in deps.iter() {
            if dep.name != "*" && !task_names.contains(dep.name.as_str()) {
                problems.push(format!("task '{owner}' depends on undefined task '{}'", dep.name));
            }
            if let Some(variant) = dep.variant.as_deref() {
                if variant != "*" && !variant_names.contains(variant) {
                    problems.push(format!(
                        "task '{owner}' depends on '{}' in undefined build variant '{variant}'",
                        dep.name
                    ));
                }
            }
        }
    }

    problems
}

// ---------------------------------------------------------------------------
// Project config projection
// ---------------------------------------------------------------------------

/// The version-controlled settings declared in `yaml`, or `None` when it
/// declares none.
pub fn create_project_config(yaml: &str, identifier: &str) -> Result<Option<ProjectConfig>, ConfigError> {
    if yaml.trim().is_empty() {
        return Ok(None);
    }
    let fields: ProjectConfigFields = serde_yaml::from_str(yaml)?;
    if fields.is_empty() {
        return Ok(None);
    }
    Ok(Some(ProjectConfig {
        id: String::new(),
        project: identifier.to_string(),
        fields,
    }))
}

/// YAML text of a projection, as stored on a patch.
pub fn project_config_yaml(config: &ProjectConfig) -> Result<String, ConfigError> {
    Ok(serde_yaml::to_string(&config.fields)?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
