//! Per-user hourly scheduling limit for patch tasks.
//!
//! A user's counter covers a one-hour window starting at
//! `last_scheduled_tasks_at`; the first activation after the window expires
//! starts a new one. Only patch, GitHub PR and trigger requesters count.

use chrono::{DateTime, Duration, Utc};

use patchflow_core::types::Requester;
use patchflow_core::Documents;

use crate::error::QuotaError;

/// Charge `activated` tasks to `user`, failing without changes when the
/// limit would be exceeded. A `limit` of 0 disables the check; users without
/// a record are not tracked.
pub fn update_scheduling_limit(
    docs: &mut Documents,
    user: &str,
    requester: Requester,
    activated: u32,
    limit: u32,
    now: DateTime<Utc>,
) -> Result<(), QuotaError> {
    if !requester.is_patch() || activated == 0 {
        return Ok(());
    }
    let Some(record) = docs.user_mut(user) else {
        return Ok(());
    };

    let window_open = record
        .last_scheduled_tasks_at
        .is_some_and(|start| now - start < Duration::hours(1));
    let scheduled = if window_open {
        record.num_scheduled_patch_tasks
    } else {
        0
    };

    if limit > 0 && scheduled.saturating_add(activated) > limit {
        return Err(QuotaError::Exceeded {
            user: user.to_string(),
            scheduled,
            requested: activated,
            limit,
        });
    }

    if !window_open {
        record.last_scheduled_tasks_at = Some(now);
    }
    record.num_scheduled_patch_tasks = scheduled + activated;
    Ok(())
}
