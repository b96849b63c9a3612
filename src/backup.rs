//! Ledger snapshots.
//!
//! This module handles:
//! - Creating timestamped snapshots of the ledger with `VACUUM INTO`
//! - Rotating snapshots by count
//! - Listing and restoring snapshots

use crate::error::{MigrateError, Result, ResultExt};
use crate::storage::Ledger;
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};
use rusqlite::{Connection, OpenFlags};
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const BACKUP_DIR: &str = "backups";
const BACKUP_STEM: &str = "ledger";
const TIMESTAMP_FORMAT: &str = "%Y%m%d_%H%M%S%3f";

/// Snapshot metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BackupEntry {
    pub name: String,
    pub path: PathBuf,
    pub timestamp: DateTime<Utc>,
    pub size: u64,
}

/// Snapshot directory inside a workspace.
#[must_use]
pub fn backup_dir(workspace: &Path) -> PathBuf {
    workspace.join(BACKUP_DIR)
}

/// Snapshot the ledger into `dir`, then keep only the newest `keep` snapshots.
///
/// `keep == 0` disables rotation.
///
/// # Errors
///
/// Returns an error if the directory cannot be created or the snapshot fails.
pub fn create_backup(ledger: &Ledger, dir: &Path, keep: usize) -> Result<BackupEntry> {
    fs::create_dir_all(dir).with_context(|| format!("creating {}", dir.display()))?;

    let now = Utc::now();
    let stamp = now.format(TIMESTAMP_FORMAT).to_string();
    let mut path = dir.join(format!("{BACKUP_STEM}.{stamp}.db"));
    let mut n = 1;
    while path.exists() {
        path = dir.join(format!("{BACKUP_STEM}-{n}.{stamp}.db"));
        n += 1;
    }

    ledger.snapshot_to(&path)?;
    let size = fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
    let name = file_name(&path);
    info!(backup = %name, size, "Ledger snapshot created");

    if keep > 0 {
        rotate(dir, keep)?;
    }

    Ok(BackupEntry {
        name,
        path,
        timestamp: now,
        size,
    })
}

/// Delete all but the newest `keep` snapshots. Returns how many were removed.
fn rotate(dir: &Path, keep: usize) -> Result<usize> {
    let backups = list_backups(dir)?;
    let mut removed = 0;
    for entry in backups.iter().skip(keep) {
        fs::remove_file(&entry.path)?;
        removed += 1;
    }
    if removed > 0 {
        debug!(removed, "Pruned old snapshot(s)");
    }
    Ok(removed)
}

/// List snapshots, newest first.
///
/// # Errors
///
/// Returns an error if the directory cannot be read.
pub fn list_backups(dir: &Path) -> Result<Vec<BackupEntry>> {
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut backups = Vec::new();
    for entry in fs::read_dir(dir)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let name = file_name(&path);

        // <stem>.<timestamp>.db
        let parts: Vec<&str> = name.split('.').collect();
        if parts.len() != 3 || parts[2] != "db" || !parts[0].starts_with(BACKUP_STEM) {
            continue;
        }
        let Ok(dt) = NaiveDateTime::parse_from_str(parts[1], TIMESTAMP_FORMAT) else {
            continue;
        };
        let Ok(metadata) = fs::metadata(&path) else {
            continue;
        };

        backups.push(BackupEntry {
            timestamp: Utc.from_utc_datetime(&dt),
            size: metadata.len(),
            name,
            path,
        });
    }

    // Same-millisecond collisions carry a longer, numbered stem.
    backups.sort_by(|a, b| {
        b.timestamp
            .cmp(&a.timestamp)
            .then_with(|| b.name.len().cmp(&a.name.len()))
            .then_with(|| b.name.cmp(&a.name))
    });
    Ok(backups)
}

/// Replace the ledger file with a snapshot: the newest, or the one named.
///
/// The ledger must not be open while restoring.
///
/// # Errors
///
/// Returns [`MigrateError::BackupNotFound`] when no snapshot matches, or an
/// error if the snapshot fails its integrity check or cannot be copied.
pub fn restore_backup(dir: &Path, ledger_path: &Path, name: Option<&str>) -> Result<BackupEntry> {
    let backups = list_backups(dir)?;
    let entry = match name {
        Some(name) => backups
            .into_iter()
            .find(|b| b.name == name || b.name.trim_end_matches(".db") == name),
        None => backups.into_iter().next(),
    }
    .ok_or_else(|| MigrateError::BackupNotFound {
        name: name.unwrap_or("latest").to_string(),
    })?;

    check_integrity(&entry.path)?;

    for suffix in ["-wal", "-shm"] {
        let sidecar = PathBuf::from(format!("{}{suffix}", ledger_path.display()));
        if sidecar.exists() {
            fs::remove_file(&sidecar)?;
        }
    }
    fs::copy(&entry.path, ledger_path)
        .with_context(|| format!("restoring {}", entry.name))?;
    info!(backup = %entry.name, ledger = %ledger_path.display(), "Ledger restored");
    Ok(entry)
}

fn check_integrity(path: &Path) -> Result<()> {
    let conn = Connection::open_with_flags(path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
    let verdict: String = conn.query_row("PRAGMA quick_check", [], |row| row.get(0))?;
    if verdict != "ok" {
        return Err(MigrateError::validation(
            "backup",
            format!("{} failed integrity check: {verdict}", path.display()),
        ));
    }
    Ok(())
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}
