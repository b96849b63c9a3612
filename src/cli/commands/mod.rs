//! Command implementations.
//!
//! Every command loads a [`CommandContext`], opens the ledger, and resolves
//! its scope to organization ids before running a phase per organization.

pub mod backup;
pub mod cleanup;
pub mod execute;
pub mod gather;
pub mod plan;
pub mod print;
pub mod retest;
pub mod rollback;
pub mod status;
pub mod verify;

use crate::cli::ScopeArgs;
use crate::config::MigrateConfig;
use crate::error::{MigrateError, Result};
use crate::format::{PhaseReport, format_phase_summary};
use crate::gateway::http::HttpGateway;
use crate::migrate::{PhaseSummary, Scope};
use crate::storage::Ledger;
use crate::util::progress::should_show_progress;
use serde::Serialize;
use std::io::{self, IsTerminal};

/// Resolved configuration plus output switches shared by all commands.
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub config: MigrateConfig,
    pub json: bool,
    pub quiet: bool,
    pub use_color: bool,
    pub show_progress: bool,
}

impl CommandContext {
    #[must_use]
    pub fn from_config(config: MigrateConfig, json: bool, quiet: bool, no_color: bool) -> Self {
        Self {
            config,
            json,
            quiet,
            use_color: !no_color && !json && io::stdout().is_terminal(),
            show_progress: !json && !quiet && should_show_progress(),
        }
    }

    /// # Errors
    ///
    /// Returns an error if the ledger cannot be opened.
    pub fn open_ledger(&self) -> Result<Ledger> {
        self.config.open_ledger()
    }

    /// Gateway for commands that reach the remote API.
    ///
    /// # Errors
    ///
    /// Returns [`MigrateError::MissingCredential`] without a token, or an
    /// error if the HTTP client cannot be built.
    pub fn gateway(&self) -> Result<HttpGateway> {
        Ok(HttpGateway::new(self.config.gateway_config()?)?)
    }
}

/// The scope selected on the command line.
///
/// # Errors
///
/// Returns a validation error when neither `--org` nor `--group` is set.
pub fn require_scope(args: &ScopeArgs) -> Result<Scope> {
    args.scope()
        .ok_or_else(|| MigrateError::validation("scope", "either --org or --group is required"))
}

/// Print a value as pretty JSON on stdout.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print per-organization summaries, then fail if any organization timed out
/// or made no progress.
///
/// # Errors
///
/// Returns [`MigrateError::PhaseTimeout`] when an organization timed out,
/// else [`MigrateError::PhaseIncomplete`] for the first organization where
/// every attempted item failed.
pub fn finish_phase(ctx: &CommandContext, phase: &str, summaries: Vec<PhaseSummary>) -> Result<()> {
    let report = PhaseReport::new(phase, summaries);
    if ctx.json {
        print_json(&report)?;
    } else if !ctx.quiet {
        for summary in &report.organizations {
            println!("{}", format_phase_summary(summary, ctx.use_color));
        }
        if report.organizations.len() > 1 {
            println!(
                "{phase} total: attempted {}, succeeded {}, failed {}",
                report.attempted, report.succeeded, report.failed
            );
        }
    }

    let timed_out = report.organizations.iter().filter(|s| s.timed_out);
    for summary in timed_out.chain(&report.organizations) {
        summary.ensure_progress()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::default_config_layer;
    use crate::migrate::Deadline;
    use std::path::PathBuf;
    use std::time::Duration;

    fn quiet_context() -> CommandContext {
        let config =
            MigrateConfig::from_layer(PathBuf::from("/ws"), &default_config_layer()).unwrap();
        CommandContext {
            config,
            json: false,
            quiet: true,
            use_color: false,
            show_progress: false,
        }
    }

    #[test]
    fn timeout_wins_over_incomplete_after_report() {
        let mut stalled = PhaseSummary::new("execute", "org-a");
        stalled.record_failure();
        let mut partial = PhaseSummary::new("execute", "org-b");
        partial.record_success();
        partial.record_timeout(&Deadline::after(Duration::ZERO));

        let err = finish_phase(&quiet_context(), "execute", vec![stalled, partial]).unwrap_err();
        assert!(matches!(err, MigrateError::PhaseTimeout { .. }));
    }

    #[test]
    fn clean_summaries_finish_ok() {
        let mut summary = PhaseSummary::new("cleanup", "org-a");
        summary.record_success();
        assert!(finish_phase(&quiet_context(), "cleanup", vec![summary]).is_ok());
    }
}
