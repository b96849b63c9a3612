use super::{CommandContext, finish_phase, require_scope};
use crate::cli::ExecuteArgs;
use crate::error::Result;
use crate::migrate::Deadline;
use crate::migrate::execute::{ExecuteOptions, execute_org};
use std::time::Duration;

/// Execute the execute command.
///
/// One deadline covers every organization in scope. Organizations after the
/// one that ran out of time are not started.
///
/// # Errors
///
/// Returns an error if the credential is missing or the ledger cannot be
/// written. A timeout is returned after the partial report is printed.
pub fn execute(args: &ExecuteArgs, ctx: &CommandContext) -> Result<()> {
    let scope = require_scope(&args.scope)?;
    let gateway = ctx.gateway()?;
    let mut ledger = ctx.open_ledger()?;

    let budget = args
        .timeout
        .map_or(ctx.config.execute_timeout, Duration::from_secs);
    let deadline = if budget.is_zero() {
        Deadline::unbounded()
    } else {
        Deadline::after(budget)
    };
    let options = ExecuteOptions {
        dry_run: args.dry_run,
        show_progress: ctx.show_progress,
    };

    let mut summaries = Vec::new();
    for org in scope.resolve_local(&ledger)? {
        let summary = execute_org(&mut ledger, &gateway, &org, options, &deadline)?;
        let timed_out = summary.timed_out;
        summaries.push(summary);
        if timed_out {
            break;
        }
    }
    finish_phase(ctx, "execute", summaries)
}
