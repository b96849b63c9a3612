use super::{CommandContext, print_json, require_scope};
use crate::cli::ScopeArgs;
use crate::error::{MigrateError, Result};
use crate::migrate::verify::verify_org;

/// Execute the verify command.
///
/// # Errors
///
/// Returns [`MigrateError::VerificationFailed`] when any invariant is broken,
/// or an error if the ledger cannot be read.
pub fn execute(args: &ScopeArgs, ctx: &CommandContext) -> Result<()> {
    let scope = require_scope(args)?;
    let ledger = ctx.open_ledger()?;

    let mut reports = Vec::new();
    for org in scope.resolve_local(&ledger)? {
        reports.push(verify_org(&ledger, &org)?);
    }

    if ctx.json {
        print_json(&reports)?;
    } else if !ctx.quiet {
        for report in &reports {
            println!(
                "{}: {} ignore(s), {} policy(ies) checked, {} violation(s)",
                report.org,
                report.ignores_checked,
                report.policies_checked,
                report.violations.len()
            );
            for violation in &report.violations {
                println!(
                    "  {} {} [{}]: {}",
                    violation.entity, violation.id, violation.rule, violation.detail
                );
            }
        }
    }

    let count: usize = reports.iter().map(|r| r.violations.len()).sum();
    if count > 0 {
        return Err(MigrateError::VerificationFailed { count });
    }
    Ok(())
}
