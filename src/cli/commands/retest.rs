use super::{CommandContext, finish_phase, require_scope};
use crate::cli::ScopeArgs;
use crate::error::Result;
use crate::migrate::Deadline;
use crate::migrate::retest::retest_org;

/// Execute the retest command.
///
/// # Errors
///
/// Returns an error if the credential is missing or the ledger cannot be written.
pub fn execute(args: &ScopeArgs, ctx: &CommandContext) -> Result<()> {
    let scope = require_scope(args)?;
    let gateway = ctx.gateway()?;
    let mut ledger = ctx.open_ledger()?;
    let deadline = Deadline::unbounded();

    let mut summaries = Vec::new();
    for org in scope.resolve_local(&ledger)? {
        let summary = retest_org(&mut ledger, &gateway, &org, &deadline, ctx.show_progress)?;
        let timed_out = summary.timed_out;
        summaries.push(summary);
        if timed_out {
            break;
        }
    }
    finish_phase(ctx, "retest", summaries)
}
