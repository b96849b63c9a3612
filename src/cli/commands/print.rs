use super::{CommandContext, print_json, require_scope};
use crate::cli::{OutputFormat, PrintArgs, PrintPlanArgs};
use crate::error::{MigrateError, Result};
use crate::format::{IgnoreView, PolicyView, csv, format_ignore_line, format_policy_block, terminal_width};
use crate::model::IgnoreState;
use std::io::{self, Write};

const STATES: &[IgnoreState] = &[
    IgnoreState::Unmapped,
    IgnoreState::Collected,
    IgnoreState::Superseded,
    IgnoreState::Selected,
    IgnoreState::Migrated,
    IgnoreState::Deleted,
];

fn parse_state(value: &str) -> Result<IgnoreState> {
    let needle = value.trim().to_lowercase();
    STATES
        .iter()
        .copied()
        .find(|state| state.as_str() == needle)
        .ok_or_else(|| MigrateError::validation("state", format!("unknown state '{value}'")))
}

const fn effective_format(format: OutputFormat, json: bool) -> OutputFormat {
    if json { OutputFormat::Json } else { format }
}

/// Execute the print command: list gathered ignores.
///
/// # Errors
///
/// Returns an error for an unknown `--state`, or if the ledger cannot be read.
pub fn execute(args: &PrintArgs, ctx: &CommandContext) -> Result<()> {
    let scope = require_scope(&args.scope)?;
    let state = args.state.as_deref().map(parse_state).transpose()?;
    let ledger = ctx.open_ledger()?;

    let mut ignores = Vec::new();
    for org in scope.resolve_local(&ledger)? {
        ignores.extend(
            ledger
                .ignores_by_org(&org)?
                .into_iter()
                .filter(|ignore| state.is_none_or(|s| ignore.state() == s)),
        );
    }

    match effective_format(args.format, ctx.json) {
        OutputFormat::Json => {
            let views: Vec<IgnoreView> = ignores.into_iter().map(IgnoreView::from).collect();
            print_json(&views)
        }
        OutputFormat::Csv => {
            let mut stdout = io::stdout().lock();
            csv::write_ignores(&mut stdout, &ignores)?;
            stdout.flush()?;
            Ok(())
        }
        OutputFormat::Text => {
            let width = terminal_width();
            for ignore in &ignores {
                println!("{}", format_ignore_line(ignore, ctx.use_color, width));
            }
            if !ctx.quiet {
                println!("{} ignore(s)", ignores.len());
            }
            Ok(())
        }
    }
}

/// Execute the print-plan command: list planned policies.
///
/// # Errors
///
/// Returns an error if the ledger cannot be read.
pub fn execute_plan(args: &PrintPlanArgs, ctx: &CommandContext) -> Result<()> {
    let scope = require_scope(&args.scope)?;
    let ledger = ctx.open_ledger()?;

    let mut policies = Vec::new();
    for org in scope.resolve_local(&ledger)? {
        if args.pending {
            policies.extend(ledger.unexecuted_policies(&org)?);
        } else {
            policies.extend(ledger.policies_by_org(&org)?);
        }
    }

    match effective_format(args.format, ctx.json) {
        OutputFormat::Json => {
            let views: Vec<PolicyView> = policies.into_iter().map(PolicyView::from).collect();
            print_json(&views)
        }
        OutputFormat::Csv => {
            let mut stdout = io::stdout().lock();
            csv::write_policies(&mut stdout, &policies)?;
            stdout.flush()?;
            Ok(())
        }
        OutputFormat::Text => {
            let blocks: Vec<String> = policies
                .iter()
                .map(|policy| format_policy_block(policy, ctx.use_color))
                .collect();
            if !blocks.is_empty() {
                println!("{}", blocks.join("\n\n"));
            }
            if !ctx.quiet {
                let executed = policies.iter().filter(|p| p.is_executed()).count();
                println!("{} policy(ies), {executed} executed", policies.len());
            }
            Ok(())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_state_is_case_insensitive() {
        assert_eq!(parse_state("Selected").unwrap(), IgnoreState::Selected);
        assert!(parse_state("bogus").is_err());
    }

    #[test]
    fn json_flag_wins_over_format() {
        assert_eq!(effective_format(OutputFormat::Csv, true), OutputFormat::Json);
        assert_eq!(effective_format(OutputFormat::Csv, false), OutputFormat::Csv);
    }
}
