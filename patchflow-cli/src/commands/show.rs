//! `patchflow show <patch>` — a patch and its materialized tasks.

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

use patchflow_core::patch::VariantTasks;
use patchflow_core::{Patch, Task};

use super::Workspace;

/// Arguments for `patchflow show`.
#[derive(Args, Debug)]
pub struct ShowArgs {
    /// Patch id.
    pub patch: String,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

impl ShowArgs {
    pub fn run(self) -> Result<()> {
        let workspace = Workspace::open()?;
        let patch = workspace.patch(&self.patch)?;
        let mut tasks: Vec<Task> = match patch.version.as_ref().filter(|_| patch.is_finalized()) {
            Some(version) => workspace
                .store()
                .read(|docs| docs.tasks_by_version(version).into_iter().cloned().collect()),
            None => Vec::new(),
        };
        tasks.sort_by(|a, b| {
            (a.build_variant.as_str(), a.display_name.as_str())
                .cmp(&(b.build_variant.as_str(), b.display_name.as_str()))
        });

        if self.json {
            return print_json(&patch, &tasks);
        }
        print_table(&patch, tasks);
        Ok(())
    }
}

#[derive(Serialize)]
struct PatchJson<'a> {
    id: &'a str,
    project: &'a str,
    githash: &'a str,
    author: &'a str,
    description: &'a str,
    finalized: bool,
    version: Option<&'a str>,
    variants_tasks: &'a [VariantTasks],
    tasks: Vec<TaskJson<'a>>,
}

#[derive(Serialize)]
struct TaskJson<'a> {
    id: &'a str,
    variant: &'a str,
    name: &'a str,
    status: String,
    activated: bool,
    display_only: bool,
    num_dependents: u32,
}

#[derive(Tabled)]
struct TaskRow {
    #[tabled(rename = "variant")]
    variant: String,
    #[tabled(rename = "task")]
    name: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "active")]
    active: String,
    #[tabled(rename = "dependents")]
    num_dependents: u32,
}

fn print_json(patch: &Patch, tasks: &[Task]) -> Result<()> {
    let payload = PatchJson {
        id: patch.id.as_str(),
        project: &patch.project,
        githash: &patch.githash,
        author: &patch.author,
        description: &patch.description,
        finalized: patch.is_finalized(),
        version: patch.version.as_ref().map(|v| v.as_str()),
        variants_tasks: &patch.variants_tasks,
        tasks: tasks
            .iter()
            .map(|t| TaskJson {
                id: t.id.as_str(),
                variant: &t.build_variant,
                name: &t.display_name,
                status: t.status.to_string(),
                activated: t.activated,
                display_only: t.display_only,
                num_dependents: t.num_dependents,
            })
            .collect(),
    };
    println!(
        "{}",
        serde_json::to_string_pretty(&payload).context("failed to serialize patch JSON")?
    );
    Ok(())
}

fn print_table(patch: &Patch, tasks: Vec<Task>) {
    let state = if patch.is_finalized() {
        "finalized".green().bold()
    } else {
        "unfinalized".yellow().bold()
    };
    println!(
        "{} {} | {} @ {} | {}",
        "patch".bold(),
        patch.id,
        patch.project,
        patch.githash,
        state
    );
    if !patch.description.is_empty() {
        println!("{}", patch.description);
    }

    if tasks.is_empty() {
        for vt in &patch.variants_tasks {
            let mut names = vt.tasks.clone();
            names.extend(vt.display_tasks.iter().map(|dt| dt.name.clone()));
            println!("  {}: {}", vt.variant.bold(), names.join(", "));
        }
        return;
    }

    let rows: Vec<TaskRow> = tasks
        .into_iter()
        .map(|t| TaskRow {
            variant: t.build_variant,
            name: if t.display_only {
                format!("{} (display)", t.display_name)
            } else {
                t.display_name
            },
            status: t.status.to_string(),
            active: if t.activated { "yes" } else { "no" }.to_string(),
            num_dependents: t.num_dependents,
        })
        .collect();
    let mut table = Table::new(rows);
    table.with(Style::rounded());
    println!("{table}");
}
