use super::{CommandContext, print_json};
use crate::backup::{backup_dir, create_backup, list_backups, restore_backup};
use crate::cli::{BackupArgs, RestoreArgs};
use crate::error::Result;
use crate::util::time::format_timestamp;
use tracing::debug;

/// Execute the backup command: snapshot the ledger, or list snapshots.
///
/// Snapshots cover the whole ledger; a scope is accepted but not needed.
///
/// # Errors
///
/// Returns an error if the snapshot cannot be written or listed.
pub fn execute(args: &BackupArgs, ctx: &CommandContext) -> Result<()> {
    let dir = backup_dir(&ctx.config.workspace);
    debug!(org = ?args.scope.org, group = ?args.scope.group, "Backup covers the whole ledger");

    if args.list {
        let backups = list_backups(&dir)?;
        if ctx.json {
            return print_json(&backups);
        }
        for entry in &backups {
            println!(
                "{}  {}  {} bytes",
                entry.name,
                format_timestamp(&entry.timestamp),
                entry.size
            );
        }
        if !ctx.quiet {
            println!("{} snapshot(s) in {}", backups.len(), dir.display());
        }
        return Ok(());
    }

    let ledger = ctx.open_ledger()?;
    let keep = args.keep.unwrap_or(ctx.config.backup_keep);
    let entry = create_backup(&ledger, &dir, keep)?;
    if ctx.json {
        print_json(&entry)?;
    } else if !ctx.quiet {
        println!("Snapshot written to {}", entry.path.display());
    }
    Ok(())
}

/// Execute the restore command.
///
/// # Errors
///
/// Returns [`crate::error::MigrateError::BackupNotFound`] when no snapshot
/// matches, or an error if the snapshot is corrupt or cannot be copied.
pub fn execute_restore(args: &RestoreArgs, ctx: &CommandContext) -> Result<()> {
    let dir = backup_dir(&ctx.config.workspace);
    debug!(org = ?args.scope.org, group = ?args.scope.group, "Restore covers the whole ledger");

    let entry = restore_backup(&dir, &ctx.config.db_path, args.name.as_deref())?;
    if ctx.json {
        print_json(&entry)?;
    } else if !ctx.quiet {
        println!(
            "Restored {} into {}",
            entry.name,
            ctx.config.db_path.display()
        );
    }
    Ok(())
}
