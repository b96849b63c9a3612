//! Ledger schema definitions and migration logic.

use crate::error::{MigrateError, Result};
use rusqlite::Connection;

pub const CURRENT_SCHEMA_VERSION: i32 = 1;

/// The complete SQL schema for the migration ledger.
pub const SCHEMA_SQL: &str = r"
    -- Legacy ignores. Progress columns are only written by plan/execute/cleanup/rollback.
    -- TEXT fields use NOT NULL DEFAULT '' and are read back as None when empty.
    CREATE TABLE IF NOT EXISTS ignores (
        id TEXT PRIMARY KEY,
        issue_id TEXT NOT NULL,
        org_id TEXT NOT NULL,
        project_id TEXT NOT NULL,
        reason TEXT NOT NULL DEFAULT '',
        ignore_type TEXT NOT NULL,
        created_at TEXT NOT NULL,
        expires_at TEXT,
        asset_key TEXT NOT NULL DEFAULT '',
        original_state TEXT NOT NULL,
        content_hash TEXT NOT NULL DEFAULT '',
        gathered_at TEXT,
        deleted_at TEXT,
        migrated_at TEXT,
        policy_id TEXT,
        internal_policy_id TEXT,
        selected_for_migration INTEGER NOT NULL DEFAULT 0,
        CHECK (deleted_at IS NULL OR migrated_at IS NOT NULL)
    );
    CREATE INDEX IF NOT EXISTS idx_ignores_org_id ON ignores(org_id);
    CREATE INDEX IF NOT EXISTS idx_ignores_org_asset ON ignores(org_id, asset_key);
    CREATE INDEX IF NOT EXISTS idx_ignores_internal_policy_id ON ignores(internal_policy_id);

    -- Target-system findings (asset key source)
    CREATE TABLE IF NOT EXISTS issues (
        id TEXT PRIMARY KEY,
        org_id TEXT NOT NULL,
        project_id TEXT NOT NULL DEFAULT '',
        asset_key TEXT NOT NULL DEFAULT '',
        project_key TEXT NOT NULL DEFAULT '',
        original_state TEXT NOT NULL,
        gathered_at TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_issues_org_id ON issues(org_id);
    CREATE INDEX IF NOT EXISTS idx_issues_project_key ON issues(org_id, project_id, project_key);

    -- Projects
    CREATE TABLE IF NOT EXISTS projects (
        id TEXT PRIMARY KEY,
        org_id TEXT NOT NULL,
        name TEXT NOT NULL DEFAULT '',
        target_id TEXT NOT NULL DEFAULT '',
        target_information TEXT NOT NULL DEFAULT '',
        retested_at TEXT,
        is_cli_project INTEGER NOT NULL DEFAULT 0,
        gathered_at TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_projects_org_id ON projects(org_id);

    -- Policy plan rows, one per (org, asset key)
    CREATE TABLE IF NOT EXISTS policies (
        internal_id TEXT PRIMARY KEY,
        org_id TEXT NOT NULL,
        asset_key TEXT NOT NULL,
        policy_type TEXT NOT NULL,
        reason TEXT NOT NULL DEFAULT '',
        expires_at TEXT,
        source_ignores TEXT NOT NULL DEFAULT '',
        selected_ignore_id TEXT NOT NULL DEFAULT '',
        external_id TEXT,
        created_at TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_policies_org_id ON policies(org_id);
    CREATE UNIQUE INDEX IF NOT EXISTS idx_policies_org_asset ON policies(org_id, asset_key);

    -- Organizations
    CREATE TABLE IF NOT EXISTS organizations (
        id TEXT PRIMARY KEY,
        group_id TEXT,
        name TEXT NOT NULL DEFAULT '',
        slug TEXT NOT NULL DEFAULT '',
        original_state TEXT NOT NULL DEFAULT '{}',
        gathered_at TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_organizations_group_id ON organizations(group_id);

    -- Singleton collection metadata
    CREATE TABLE IF NOT EXISTS collection_metadata (
        id INTEGER PRIMARY KEY CHECK (id = 1),
        collection_completed_at TEXT NOT NULL,
        collection_version TEXT NOT NULL,
        api_version TEXT NOT NULL
    );
";

/// Apply the schema to the ledger.
///
/// Idempotent: all statements use `IF NOT EXISTS`.
///
/// # Errors
///
/// Returns an error if the SQL execution fails, pragmas cannot be set, or the
/// on-disk schema is newer than [`CURRENT_SCHEMA_VERSION`].
pub fn apply_schema(conn: &Connection) -> Result<()> {
    let found: i32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if found > CURRENT_SCHEMA_VERSION {
        return Err(MigrateError::SchemaMismatch {
            expected: CURRENT_SCHEMA_VERSION,
            found,
        });
    }

    conn.execute_batch(SCHEMA_SQL)?;
    conn.pragma_update(None, "user_version", CURRENT_SCHEMA_VERSION)?;

    // Set journal mode to WAL for concurrency
    conn.pragma_update(None, "journal_mode", "WAL")?;
    conn.pragma_update(None, "foreign_keys", "ON")?;

    Ok(())
}
