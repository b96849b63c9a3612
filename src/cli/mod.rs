//! CLI definitions and entry point.

use crate::config::CliOverrides;
use crate::migrate::Scope;
use clap::{Args, Parser, Subcommand, ValueEnum};
use std::path::PathBuf;

pub mod commands;

/// Migrate legacy ignores into target policies through a local ledger
#[derive(Parser, Debug)]
#[command(name = "igm", author, version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Ledger path (defaults to .igm/ledger.db in the discovered workspace)
    #[arg(long, global = true)]
    pub db: Option<PathBuf>,

    /// API credential; only gather, execute, retest, cleanup and rollback --remote need it
    #[arg(long, global = true, env = "IGM_TOKEN", hide_env_values = true)]
    pub token: Option<String>,

    /// Output as JSON
    #[arg(long, global = true)]
    pub json: bool,

    /// `SQLite` busy timeout in ms
    #[arg(long, global = true)]
    pub lock_timeout: Option<u64>,

    /// Increase logging verbosity (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Quiet mode (no output except errors)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Disable colored output
    #[arg(long, global = true)]
    pub no_color: bool,
}

impl Cli {
    #[must_use]
    pub fn overrides(&self) -> CliOverrides {
        CliOverrides {
            db: self.db.clone(),
            token: self.token.clone(),
            lock_timeout: self.lock_timeout,
        }
    }
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Collect organizations, projects, ignores and findings into the ledger
    Gather(ScopeArgs),

    /// Check the ledger for broken invariants
    Verify(ScopeArgs),

    /// List gathered ignores
    Print(PrintArgs),

    /// Snapshot the whole ledger (--org/--group not needed)
    Backup(BackupArgs),

    /// Replace the whole ledger with a snapshot (--org/--group not needed)
    Restore(RestoreArgs),

    /// Group ignores by asset key and pick one per group
    Plan(PlanArgs),

    /// List planned policies
    PrintPlan(PrintPlanArgs),

    /// Create planned policies remotely
    Execute(ExecuteArgs),

    /// Trigger rescans of projects with migrated ignores
    Retest(ScopeArgs),

    /// Delete migrated legacy ignores
    Cleanup(ScopeArgs),

    /// Show migration progress (local, no credential needed)
    Status(ScopeArgs),

    /// Reset local migration progress
    Rollback(RollbackArgs),
}

/// Organization or group selection; exactly one is required.
#[derive(Args, Debug, Clone, Default)]
#[group(required = true, multiple = false)]
pub struct ScopeArgs {
    /// Organization id
    #[arg(long)]
    pub org: Option<String>,

    /// Group id (all of its organizations)
    #[arg(long)]
    pub group: Option<String>,
}

impl ScopeArgs {
    /// The selected scope; `--org` wins if both are somehow set.
    #[must_use]
    pub fn scope(&self) -> Option<Scope> {
        self.org
            .clone()
            .map(Scope::Org)
            .or_else(|| self.group.clone().map(Scope::Group))
    }
}

/// Same as [`ScopeArgs`], but may be omitted.
#[derive(Args, Debug, Clone, Default)]
#[group(required = false, multiple = false)]
pub struct OptionalScopeArgs {
    /// Organization id
    #[arg(long)]
    pub org: Option<String>,

    /// Group id
    #[arg(long)]
    pub group: Option<String>,
}

#[derive(ValueEnum, Debug, Clone, Copy, Default, Eq, PartialEq)]
pub enum OutputFormat {
    /// Human-readable lines
    #[default]
    Text,
    /// JSON array
    Json,
    /// CSV with a header row
    Csv,
}

#[derive(Args, Debug, Clone)]
pub struct PrintArgs {
    #[command(flatten)]
    pub scope: ScopeArgs,

    /// Output format (`--json` implies json)
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Only ignores in this state (unmapped, collected, superseded, selected, migrated, deleted)
    #[arg(long)]
    pub state: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct PrintPlanArgs {
    #[command(flatten)]
    pub scope: ScopeArgs,

    /// Output format (`--json` implies json)
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    pub format: OutputFormat,

    /// Only policies not yet created remotely
    #[arg(long)]
    pub pending: bool,
}

#[derive(Args, Debug, Clone)]
pub struct BackupArgs {
    #[command(flatten)]
    pub scope: OptionalScopeArgs,

    /// Snapshots to keep (overrides `backup-keep`; 0 keeps all)
    #[arg(long)]
    pub keep: Option<usize>,

    /// List snapshots instead of creating one
    #[arg(long)]
    pub list: bool,
}

#[derive(Args, Debug, Clone)]
pub struct RestoreArgs {
    #[command(flatten)]
    pub scope: OptionalScopeArgs,

    /// Snapshot file name (defaults to the newest)
    pub name: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct PlanArgs {
    #[command(flatten)]
    pub scope: ScopeArgs,

    /// Roll back local progress and re-plan even after execute
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug, Clone)]
pub struct ExecuteArgs {
    #[command(flatten)]
    pub scope: ScopeArgs,

    /// Report what would be created without calling the API
    #[arg(long)]
    pub dry_run: bool,

    /// Wall-clock budget in seconds (overrides `execute-timeout-secs`; 0 disables)
    #[arg(long)]
    pub timeout: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct RollbackArgs {
    #[command(flatten)]
    pub scope: ScopeArgs,

    /// Also delete created policies and recreate deleted legacy ignores
    #[arg(long)]
    pub remote: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn org_and_group_conflict() {
        let err = Cli::try_parse_from(["igm", "status", "--org", "a", "--group", "g"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::ArgumentConflict);
    }

    #[test]
    fn scope_is_required() {
        let err = Cli::try_parse_from(["igm", "plan"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::MissingRequiredArgument);
    }

    #[test]
    fn parses_execute_flags() {
        let cli = Cli::try_parse_from([
            "igm",
            "execute",
            "--org",
            "org-a",
            "--dry-run",
            "--token",
            "t",
            "-vv",
        ])
        .unwrap();
        assert_eq!(cli.verbose, 2);
        assert_eq!(cli.overrides().token.as_deref(), Some("t"));
        let Commands::Execute(args) = cli.command else {
            panic!("expected execute");
        };
        assert!(args.dry_run);
        assert_eq!(args.scope.scope(), Some(Scope::Org("org-a".into())));
    }

    #[test]
    fn print_plan_accepts_csv() {
        let cli =
            Cli::try_parse_from(["igm", "print-plan", "--group", "g", "--format", "csv"]).unwrap();
        let Commands::PrintPlan(args) = cli.command else {
            panic!("expected print-plan");
        };
        assert_eq!(args.format, OutputFormat::Csv);
        assert_eq!(args.scope.scope(), Some(Scope::Group("g".into())));
    }

    #[test]
    fn help_states_which_commands_need_a_credential() {
        let cmd = Cli::command();
        let token = cmd
            .get_arguments()
            .find(|arg| arg.get_id() == "token")
            .and_then(|arg| arg.get_help())
            .map(ToString::to_string)
            .unwrap();
        assert!(token.contains("only gather, execute, retest, cleanup and rollback --remote"));
        let backup = cmd.find_subcommand("backup").and_then(|c| c.get_about()).unwrap();
        assert!(backup.to_string().contains("--org/--group not needed"));
    }

    #[test]
    fn backup_needs_no_scope() {
        let cli = Cli::try_parse_from(["igm", "backup", "--list"]).unwrap();
        assert!(matches!(cli.command, Commands::Backup(BackupArgs { list: true, .. })));
    }
}
