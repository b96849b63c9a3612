use clap::Parser;
use ignore_migrate::cli::commands::{self, CommandContext};
use ignore_migrate::cli::{Cli, Commands};
use ignore_migrate::config::MigrateConfig;
use ignore_migrate::logging::init_logging;
use ignore_migrate::{MigrateError, StructuredError};
use std::io::{self, IsTerminal};

fn main() {
    let cli = Cli::parse();
    let overrides = cli.overrides();

    // Gather is the only command that may create the workspace.
    let create = matches!(cli.command, Commands::Gather(_));
    let config = match MigrateConfig::load(&overrides, create) {
        Ok(config) => config,
        Err(e) => {
            if let Err(log_err) = init_logging(cli.verbose, cli.quiet, None) {
                eprintln!("Failed to initialize logging: {log_err}");
            }
            handle_error(&e, cli.json);
        }
    };

    if let Err(e) = init_logging(cli.verbose, cli.quiet, config.log_file.as_deref()) {
        eprintln!("Failed to initialize logging: {e}");
        // Continue without logging
    }

    let ctx = CommandContext::from_config(config, cli.json, cli.quiet, cli.no_color);

    let result = match &cli.command {
        Commands::Gather(args) => commands::gather::execute(args, &ctx),
        Commands::Verify(args) => commands::verify::execute(args, &ctx),
        Commands::Print(args) => commands::print::execute(args, &ctx),
        Commands::Backup(args) => commands::backup::execute(args, &ctx),
        Commands::Restore(args) => commands::backup::execute_restore(args, &ctx),
        Commands::Plan(args) => commands::plan::execute(args, &ctx),
        Commands::PrintPlan(args) => commands::print::execute_plan(args, &ctx),
        Commands::Execute(args) => commands::execute::execute(args, &ctx),
        Commands::Retest(args) => commands::retest::execute(args, &ctx),
        Commands::Cleanup(args) => commands::cleanup::execute(args, &ctx),
        Commands::Status(args) => commands::status::execute(args, &ctx),
        Commands::Rollback(args) => commands::rollback::execute(args, &ctx),
    };

    if let Err(e) = result {
        handle_error(&e, cli.json);
    }
}

/// Handle errors with structured output support.
///
/// When --json is set or stdout is not a TTY, outputs structured JSON to stderr.
/// Otherwise, outputs human-readable error with optional color.
fn handle_error(err: &MigrateError, json_mode: bool) -> ! {
    let structured = StructuredError::from_error(err);
    let exit_code = structured.code.exit_code();

    let use_json = json_mode || !io::stdout().is_terminal();

    if use_json {
        let json = structured.to_json();
        eprintln!(
            "{}",
            serde_json::to_string_pretty(&json).unwrap_or_else(|_| json.to_string())
        );
    } else {
        let use_color = io::stderr().is_terminal();
        eprintln!("{}", structured.to_human(use_color));
    }

    std::process::exit(exit_code);
}
