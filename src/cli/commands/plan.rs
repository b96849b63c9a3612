use super::{CommandContext, finish_phase, require_scope};
use crate::cli::PlanArgs;
use crate::error::Result;
use crate::migrate::plan::{PlanOptions, plan_org};

/// Execute the plan command.
///
/// # Errors
///
/// Returns [`crate::error::MigrateError::PlanBlocked`] when an org already has
/// executed policies and `--force` is off, or a ledger error.
pub fn execute(args: &PlanArgs, ctx: &CommandContext) -> Result<()> {
    let scope = require_scope(&args.scope)?;
    let mut ledger = ctx.open_ledger()?;
    let options = PlanOptions { force: args.force };

    let mut summaries = Vec::new();
    for org in scope.resolve_local(&ledger)? {
        summaries.push(plan_org(&mut ledger, &org, options)?);
    }
    finish_phase(ctx, "plan", summaries)
}
