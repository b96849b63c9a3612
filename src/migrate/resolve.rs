//! Conflict resolution for ignores sharing one asset key.
//!
//! Priority is by type bucket (`wont-fix`, then `not-vulnerable`, then
//! `temporary` and anything unrecognized). Within the winning bucket the
//! earliest `created_at` wins; equal timestamps fall back to the smallest id,
//! so the result never depends on input order.

use crate::error::{MigrateError, Result};
use crate::model::Ignore;

/// Index of the ignore that should become the policy, `None` for empty input.
#[must_use]
pub fn select_index(group: &[Ignore]) -> Option<usize> {
    group
        .iter()
        .enumerate()
        .min_by(|(_, a), (_, b)| {
            a.ignore_type
                .bucket()
                .cmp(&b.ignore_type.bucket())
                .then_with(|| a.created_at.cmp(&b.created_at))
                .then_with(|| a.id.cmp(&b.id))
        })
        .map(|(idx, _)| idx)
}

/// Select the winning ignore of a group.
///
/// # Errors
///
/// Returns a validation error for an empty group.
pub fn resolve(group: &[Ignore]) -> Result<&Ignore> {
    select_index(group)
        .map(|idx| &group[idx])
        .ok_or_else(|| MigrateError::validation("group", "cannot resolve an empty group"))
}
