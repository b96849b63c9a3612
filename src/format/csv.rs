//! CSV formatting for `print` and `print-plan`.
//!
//! Handles proper escaping of fields containing commas, quotes, or newlines.

use crate::model::{Ignore, Policy};
use crate::util::time::format_timestamp;
use chrono::{DateTime, Utc};
use std::io::{self, Write};

/// Columns written by `print --format csv`.
pub const IGNORE_FIELDS: &[&str] = &[
    "id",
    "org_id",
    "project_id",
    "issue_id",
    "asset_key",
    "ignore_type",
    "state",
    "reason",
    "created_at",
    "expires_at",
    "internal_policy_id",
    "policy_id",
    "migrated_at",
    "deleted_at",
];

/// Columns written by `print-plan --format csv`.
pub const POLICY_FIELDS: &[&str] = &[
    "internal_id",
    "org_id",
    "asset_key",
    "policy_type",
    "selected_ignore_id",
    "source_ignores",
    "reason",
    "expires_at",
    "external_id",
    "created_at",
];

/// Escape a CSV field value.
///
/// Wraps in double quotes if the value contains commas, quotes, or newlines.
/// Doubles any existing quotes within the value.
#[must_use]
pub fn escape_field(value: &str) -> String {
    let needs_quoting = value.contains(',')
        || value.contains('"')
        || value.contains('\n')
        || value.contains('\r');

    if needs_quoting {
        let escaped = value.replace('"', "\"\"");
        format!("\"{escaped}\"")
    } else {
        value.to_string()
    }
}

fn timestamp(value: Option<DateTime<Utc>>) -> String {
    value.map_or_else(String::new, |dt| format_timestamp(&dt))
}

/// Get a field value from an ignore by field name.
#[must_use]
pub fn ignore_field_value(ignore: &Ignore, field: &str) -> String {
    match field {
        "id" => ignore.id.clone(),
        "org_id" => ignore.org_id.clone(),
        "project_id" => ignore.project_id.clone(),
        "issue_id" => ignore.issue_id.clone(),
        "asset_key" => ignore.asset_key.clone(),
        "ignore_type" => ignore.ignore_type.as_str().to_string(),
        "state" => ignore.state().as_str().to_string(),
        "reason" => ignore.reason.clone(),
        "created_at" => format_timestamp(&ignore.created_at),
        "expires_at" => timestamp(ignore.expires_at),
        "internal_policy_id" => ignore.internal_policy_id.clone().unwrap_or_default(),
        "policy_id" => ignore.policy_id.clone().unwrap_or_default(),
        "migrated_at" => timestamp(ignore.migrated_at),
        "deleted_at" => timestamp(ignore.deleted_at),
        _ => String::new(),
    }
}

/// Get a field value from a planned policy by field name.
#[must_use]
pub fn policy_field_value(policy: &Policy, field: &str) -> String {
    match field {
        "internal_id" => policy.internal_id.clone(),
        "org_id" => policy.org_id.clone(),
        "asset_key" => policy.asset_key.clone(),
        "policy_type" => policy.policy_type.as_str().to_string(),
        "selected_ignore_id" => policy.selected_ignore_id.clone(),
        // Semicolons keep the list inside one unquoted cell.
        "source_ignores" => policy.source_ignores.join(";"),
        "reason" => policy.reason.clone(),
        "expires_at" => timestamp(policy.expires_at),
        "external_id" => policy.external_id.clone().unwrap_or_default(),
        "created_at" => timestamp(policy.created_at),
        _ => String::new(),
    }
}

/// Write CSV header row to the given writer.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_header<W: Write>(writer: &mut W, fields: &[&str]) -> io::Result<()> {
    let header = fields.join(",");
    writeln!(writer, "{header}")
}

/// Write ignores as CSV.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_ignores<W: Write>(writer: &mut W, ignores: &[Ignore]) -> io::Result<()> {
    write_header(writer, IGNORE_FIELDS)?;
    for ignore in ignores {
        let row = IGNORE_FIELDS
            .iter()
            .map(|&field| escape_field(&ignore_field_value(ignore, field)))
            .collect::<Vec<_>>()
            .join(",");
        writeln!(writer, "{row}")?;
    }
    Ok(())
}

/// Write planned policies as CSV.
///
/// # Errors
///
/// Returns an error if writing fails.
pub fn write_policies<W: Write>(writer: &mut W, policies: &[Policy]) -> io::Result<()> {
    write_header(writer, POLICY_FIELDS)?;
    for policy in policies {
        let row = POLICY_FIELDS
            .iter()
            .map(|&field| escape_field(&policy_field_value(policy, field)))
            .collect::<Vec<_>>()
            .join(",");
        writeln!(writer, "{row}")?;
    }
    Ok(())
}
