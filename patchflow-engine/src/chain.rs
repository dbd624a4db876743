//! Child-patch chaining after a parent commits.

use std::collections::BTreeSet;

use tracing::error;

use patchflow_core::error::StoreError;
use patchflow_core::patch::Patch;
use patchflow_core::records::{ChildPatchSubscriber, Subscription};
use patchflow_core::types::{PatchId, Requester};
use patchflow_core::Store;

use crate::env::PatchEnv;
use crate::error::FinalizeError;
use crate::finalize::finalize_in_chain;

/// Patches finalized by one top-level call and the current nesting depth.
#[derive(Debug, Clone)]
pub(crate) struct ChainState {
    visited: BTreeSet<PatchId>,
    depth: usize,
}

impl ChainState {
    pub(crate) fn new(root: &PatchId) -> Self {
        Self {
            visited: BTreeSet::from([root.clone()]),
            depth: 0,
        }
    }
}

/// Finalize or subscribe every child of `parent`. All children are
/// attempted; failures are logged and returned together.
pub(crate) fn finalize_or_subscribe_children(
    env: &PatchEnv,
    parent: &Patch,
    requester: Requester,
    chain: &mut ChainState,
) -> Result<(), FinalizeError> {
    let mut failures = Vec::new();
    for child in &parent.triggers.child_patches {
        if let Err(e) = finalize_or_subscribe_child(env, parent, child, requester, chain) {
            error!(
                patch_id = %child,
                parent_patch = %parent.id,
                source = %requester,
                error = %e,
                "failed to finalize child patch document"
            );
            failures.push((child.clone(), e.to_string()));
        }
    }
    if failures.is_empty() {
        Ok(())
    } else {
        Err(FinalizeError::ChildPatches {
            parent: parent.id.clone(),
            failures,
        })
    }
}

fn finalize_or_subscribe_child(
    env: &PatchEnv,
    parent: &Patch,
    child: &PatchId,
    requester: Requester,
    chain: &mut ChainState,
) -> Result<(), FinalizeError> {
    let intent = env
        .store
        .read(|docs| docs.trigger_intent(child).cloned())
        .ok_or_else(|| FinalizeError::TriggerIntentNotFound(child.clone()))?;

    if let Some(status) = intent.required_parent_status() {
        subscribe_on_parent_outcome(&env.store, status, child, &parent.id, requester)?;
        return Ok(());
    }

    let limit = env.settings.max_child_patch_depth;
    if chain.depth >= limit {
        return Err(FinalizeError::ChainTooDeep {
            patch: child.clone(),
            limit,
        });
    }
    if !chain.visited.insert(child.clone()) {
        return Err(FinalizeError::ChainCycle(child.clone()));
    }

    chain.depth += 1;
    let result = finalize_in_chain(env, child, requester, chain);
    chain.depth -= 1;
    result.map(|_| ())
}

/// Record that `child` should be finalized once `parent` reaches
/// `parent_status`. Re-subscribing replaces the earlier subscription.
pub fn subscribe_on_parent_outcome(
    store: &Store,
    parent_status: &str,
    child: &PatchId,
    parent: &PatchId,
    requester: Requester,
) -> Result<(), StoreError> {
    let subscription = Subscription::for_child(
        parent,
        ChildPatchSubscriber {
            parent_status: parent_status.to_string(),
            child_patch_id: child.clone(),
            requester,
        },
    );
    store.transaction(|docs| {
        docs.upsert_subscription(subscription);
        Ok(())
    })
}
