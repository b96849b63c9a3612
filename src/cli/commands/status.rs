use super::{CommandContext, print_json, require_scope};
use crate::cli::ScopeArgs;
use crate::error::Result;
use crate::format::format_org_status;
use crate::migrate::status::org_status;

/// Execute the status command.
///
/// # Errors
///
/// Returns an error if the ledger cannot be read or a group has no gathered orgs.
pub fn execute(args: &ScopeArgs, ctx: &CommandContext) -> Result<()> {
    let scope = require_scope(args)?;
    let ledger = ctx.open_ledger()?;

    let mut statuses = Vec::new();
    for org in scope.resolve_local(&ledger)? {
        statuses.push(org_status(&ledger, &org)?);
    }

    if ctx.json {
        return print_json(&statuses);
    }
    let blocks: Vec<String> = statuses
        .iter()
        .map(|status| format_org_status(status, ctx.use_color))
        .collect();
    println!("{}", blocks.join("\n\n"));
    Ok(())
}
