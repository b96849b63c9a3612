use super::{CommandContext, finish_phase, require_scope};
use crate::cli::RollbackArgs;
use crate::error::Result;
use crate::gateway::Gateway;
use crate::migrate::rollback::rollback_org;

/// Execute the rollback command.
///
/// Only `--remote` needs a credential.
///
/// # Errors
///
/// Returns an error if `--remote` is set without a credential, or the ledger
/// cannot be written.
pub fn execute(args: &RollbackArgs, ctx: &CommandContext) -> Result<()> {
    let scope = require_scope(&args.scope)?;
    let gateway = if args.remote {
        Some(ctx.gateway()?)
    } else {
        None
    };
    let mut ledger = ctx.open_ledger()?;

    let mut summaries = Vec::new();
    for org in scope.resolve_local(&ledger)? {
        let remote = gateway.as_ref().map(|g| g as &dyn Gateway);
        summaries.push(rollback_org(&mut ledger, remote, &org)?);
    }
    finish_phase(ctx, "rollback", summaries)
}
