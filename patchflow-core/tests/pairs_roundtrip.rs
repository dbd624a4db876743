//! Expand / collapse agreement on set membership.
//!
//! Each `#[case]` is isolated — no shared state.

use std::collections::BTreeSet;

use patchflow_core::patch::{DisplayTask, VariantTasks};
use patchflow_core::TaskVariantPairs;
use rstest::rstest;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

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

/// (variant, task) for every execution task, display members included.
fn exec_membership(selection: &[VariantTasks]) -> BTreeSet<(String, String)> {
    let mut out = BTreeSet::new();
    for v in selection {
        for t in &v.tasks {
            out.insert((v.variant.clone(), t.clone()));
        }
        for dt in &v.display_tasks {
            for et in &dt.exec_tasks {
                out.insert((v.variant.clone(), et.clone()));
            }
        }
    }
    out
}

/// (variant, display task, sorted execution tasks).
fn display_membership(selection: &[VariantTasks]) -> BTreeSet<(String, String, Vec<String>)> {
    let mut out = BTreeSet::new();
    for v in selection {
        for dt in &v.display_tasks {
            let mut exec = dt.exec_tasks.clone();
            exec.sort();
            out.insert((v.variant.clone(), dt.name.clone(), exec));
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Round trip
// ---------------------------------------------------------------------------

#[rstest]
#[case::single_variant(vec![vt("v1", &["t1", "t2"], &[])])]
#[case::display_only(vec![vt("v1", &[], &[("d", &["e1", "e2"])])])]
#[case::mixed(vec![
    vt("v1", &["t1"], &[("d", &["e1"])]),
    vt("v2", &["t3"], &[]),
    vt("v3", &[], &[("d2", &["e4", "e5"]), ("d3", &["e6"])]),
])]
#[case::reverse_order(vec![vt("z", &["t"], &[]), vt("a", &["t"], &[])])]
#[case::empty(vec![])]
fn expand_then_collapse_preserves_membership(#[case] selection: Vec<VariantTasks>) {
    let collapsed = TaskVariantPairs::expand(&selection).collapse();
    assert_eq!(exec_membership(&collapsed), exec_membership(&selection));
    assert_eq!(display_membership(&collapsed), display_membership(&selection));
}

#[test]
fn collapse_emits_one_entry_per_variant() {
    let selection = vec![vt("v1", &["t1"], &[]), vt("v1", &["t2"], &[]), vt("v2", &["t1"], &[])];
    let collapsed = TaskVariantPairs::expand(&selection).collapse();
    let variants: BTreeSet<_> = collapsed.iter().map(|v| v.variant.as_str()).collect();
    assert_eq!(collapsed.len(), 2);
    assert_eq!(variants, BTreeSet::from(["v1", "v2"]));
}
