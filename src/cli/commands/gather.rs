use super::{CommandContext, finish_phase, require_scope};
use crate::cli::ScopeArgs;
use crate::error::Result;
use crate::migrate::gather::Gatherer;
use tracing::info;

/// Execute the gather command.
///
/// # Errors
///
/// Returns an error if the credential is missing, a remote listing fails, or
/// the ledger cannot be written.
pub fn execute(args: &ScopeArgs, ctx: &CommandContext) -> Result<()> {
    let scope = require_scope(args)?;
    let gateway = ctx.gateway()?;
    let mut ledger = ctx.open_ledger()?;
    info!(workspace = %ctx.config.workspace.display(), "Gathering into ledger");

    let summaries = Gatherer::new(&gateway, ctx.config.collection_settings())
        .with_progress(ctx.show_progress)
        .run(&mut ledger, &scope)?;
    finish_phase(ctx, "gather", summaries)
}
