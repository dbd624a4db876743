//! Dependency inclusion: grow a pair set to the transitive closure of the
//! tasks its members depend on.

use std::collections::VecDeque;

use patchflow_core::pairs::{TVPair, TVPairSet};
use patchflow_core::project::{Project, TaskDependency};
use patchflow_core::types::Requester;

use crate::error::DependencyError;

const ALL: &str = "*";

/// Expands a selection with everything it depends on.
pub trait DependencyExpander: Send + Sync {
    fn include_dependencies(
        &self,
        project: &Project,
        pairs: &TVPairSet,
        requester: Requester,
    ) -> Result<TVPairSet, DependencyError>;
}

/// Worklist closure over the project's `depends_on` declarations.
///
/// A dependency names a task in the same variant unless it names a variant;
/// `*` in either position fans out over every variant or every task of the
/// variant. `patch_optional` dependencies are only followed for mainline
/// requesters. Wildcards silently skip pairs the project doesn't schedule;
/// an explicit dependency on a missing pair is an error.
#[derive(Debug, Default, Clone, Copy)]
pub struct DependencyIncluder;

impl DependencyExpander for DependencyIncluder {
    fn include_dependencies(
        &self,
        project: &Project,
        pairs: &TVPairSet,
        requester: Requester,
    ) -> Result<TVPairSet, DependencyError> {
        let mut out = pairs.clone();
        let mut queue: VecDeque<TVPair> = pairs.iter().cloned().collect();

        while let Some(pair) = queue.pop_front() {
            let Some(task) = project.find_task_for_variant(&pair.task_name, &pair.variant) else {
                continue;
            };
            for dep in &task.depends_on {
                if dep.patch_optional && requester != Requester::Mainline {
                    continue;
                }
                for target in dependency_targets(project, &pair, dep)? {
                    if out.insert(target.clone()) {
                        queue.push_back(target);
                    }
                }
            }
        }
        Ok(out)
    }
}

fn dependency_targets(
    project: &Project,
    from: &TVPair,
    dep: &TaskDependency,
) -> Result<Vec<TVPair>, DependencyError> {
    let variants: Vec<String> = match dep.variant.as_deref() {
        None | Some("") => vec![from.variant.clone()],
        Some(ALL) => project.build_variants.iter().map(|bv| bv.name.clone()).collect(),
        Some(v) => vec![v.to_string()],
    };

    let explicit = dep.name != ALL && dep.variant.as_deref() != Some(ALL);
    let mut targets = Vec::new();
    for variant in variants {
        if dep.name == ALL {
            targets.extend(
                project
                    .variant_task_names(&variant)
                    .into_iter()
                    .map(|name| TVPair::new(&variant, name))
                    .filter(|p| p != from),
            );
            continue;
        }
        if project.find_task_for_variant(&dep.name, &variant).is_some() {
            targets.push(TVPair::new(&variant, &dep.name));
        } else if explicit {
            return Err(DependencyError::MissingDependency {
                task: from.task_name.clone(),
                variant: from.variant.clone(),
                dependency: dep.name.clone(),
                dependency_variant: variant,
            });
        }
    }
    Ok(targets)
}
