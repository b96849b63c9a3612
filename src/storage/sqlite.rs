//! `SQLite` ledger implementation.

use crate::error::{MigrateError, Result, ResultExt};
use crate::model::{
    CollectionMetadata, Ignore, IgnoreType, Issue, Organization, Policy, Project,
    split_source_ignores,
};
use crate::storage::schema::apply_schema;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, ToSql, Transaction, TransactionBehavior, params};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;
use tracing::{debug, warn};

const IGNORE_COLUMNS: &str = "id, issue_id, org_id, project_id, reason, ignore_type, created_at,
    expires_at, asset_key, original_state, content_hash, gathered_at, deleted_at, migrated_at,
    policy_id, internal_policy_id, selected_for_migration";

const ISSUE_COLUMNS: &str =
    "id, org_id, project_id, asset_key, project_key, original_state, gathered_at";

const PROJECT_COLUMNS: &str = "id, org_id, name, target_id, target_information, retested_at,
    is_cli_project, gathered_at";

const POLICY_COLUMNS: &str = "internal_id, org_id, asset_key, policy_type, reason, expires_at,
    source_ignores, selected_ignore_id, external_id, created_at";

const ORGANIZATION_COLUMNS: &str = "id, group_id, name, slug, original_state, gathered_at";

/// Retry policy for transient busy/locked ledger errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Base back-off; attempt `n` waits `n * backoff`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 3,
            backoff: Duration::from_millis(500),
        }
    }
}

/// What an upsert did to an existing row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Inserted,
    Updated,
    Unchanged,
    /// Source content changed after the row was migrated.
    Drifted,
}

/// Raw per-org counts used by status reporting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerCounts {
    pub ignores: usize,
    pub ignores_with_asset_key: usize,
    pub ignores_selected: usize,
    pub ignores_migrated: usize,
    pub ignores_deleted: usize,
    pub policies: usize,
    pub policies_executed: usize,
    pub projects: usize,
    pub cli_projects: usize,
    pub retest_eligible: usize,
    pub retest_done: usize,
}

/// Rows touched by a local rollback.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RollbackCounts {
    pub ignores_reset: usize,
    pub policies_reset: usize,
    pub projects_reset: usize,
}

/// SQLite-backed migration ledger.
#[derive(Debug)]
pub struct Ledger {
    conn: Connection,
    retry: RetryPolicy,
}

impl Ledger {
    /// Open the ledger at the given path, creating it if needed.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema application fails.
    pub fn open(path: &Path) -> Result<Self> {
        Self::open_with_timeout(path, None)
    }

    /// Open the ledger with an optional busy timeout (ms).
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established or schema application fails.
    pub fn open_with_timeout(path: &Path, lock_timeout_ms: Option<u64>) -> Result<Self> {
        let conn = Connection::open(path)?;
        if let Some(timeout) = lock_timeout_ms {
            conn.busy_timeout(Duration::from_millis(timeout))?;
        }
        apply_schema(&conn)?;
        Ok(Self {
            conn,
            retry: RetryPolicy::default(),
        })
    }

    /// Open an in-memory ledger for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the connection cannot be established.
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        apply_schema(&conn)?;
        Ok(Self {
            conn,
            retry: RetryPolicy::default(),
        })
    }

    /// Replace the retry policy.
    #[must_use]
    pub fn with_retry_policy(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    #[must_use]
    pub const fn retry_policy(&self) -> RetryPolicy {
        self.retry
    }

    /// File backing this ledger, `None` for in-memory ledgers.
    #[must_use]
    pub fn path(&self) -> Option<PathBuf> {
        self.conn
            .path()
            .filter(|p| !p.is_empty())
            .map(PathBuf::from)
    }

    /// Run `f` in an immediate transaction, retrying busy/locked failures.
    ///
    /// The transaction is rolled back before every retry. Errors other than
    /// busy/locked abort immediately.
    ///
    /// # Errors
    ///
    /// Returns the closure's error, or [`MigrateError::LedgerLocked`] once every
    /// attempt hit a busy ledger.
    pub fn with_retry<F, R>(&mut self, op: &str, mut f: F) -> Result<R>
    where
        F: FnMut(&mut Transaction<'_>) -> Result<R>,
    {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;
        loop {
            match Self::run_transaction(&mut self.conn, &mut f) {
                Ok(value) => return Ok(value),
                Err(err) if err.is_transient_lock() => {
                    if attempt >= attempts {
                        warn!(op, attempts, "Ledger still locked; giving up");
                        return Err(MigrateError::LedgerLocked { attempts });
                    }
                    let wait = self.retry.backoff * attempt;
                    warn!(op, attempt, wait_ms = wait.as_millis(), "Ledger busy; retrying");
                    thread::sleep(wait);
                    attempt += 1;
                }
                Err(err) => return Err(err),
            }
        }
    }

    fn run_transaction<F, R>(conn: &mut Connection, f: &mut F) -> Result<R>
    where
        F: FnMut(&mut Transaction<'_>) -> Result<R>,
    {
        let mut tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
        match f(&mut tx) {
            Ok(value) => {
                tx.commit()?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback_err) = tx.rollback() {
                    warn!(error = %rollback_err, "Rollback failed");
                }
                Err(err)
            }
        }
    }

    // ========================================================================
    // RAW ACCESS
    // ========================================================================

    /// Execute a parameterized statement.
    ///
    /// # Errors
    ///
    /// Returns an error if the statement fails.
    pub fn execute_sql(&self, sql: &str, params: &[&dyn ToSql]) -> Result<usize> {
        Ok(self.conn.execute(sql, params)?)
    }

    /// Run a parameterized query and map every row.
    ///
    /// Rows are fully materialized before returning.
    ///
    /// # Errors
    ///
    /// Returns an error if the query or a row mapping fails.
    pub fn query_rows<T, F>(&self, sql: &str, params: &[&dyn ToSql], map: F) -> Result<Vec<T>>
    where
        F: FnMut(&Row<'_>) -> rusqlite::Result<T>,
    {
        let mut stmt = self.conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, map)?
            .collect::<std::result::Result<Vec<T>, _>>()?;
        Ok(rows)
    }

    /// Write a consistent snapshot of the ledger to `dest`.
    ///
    /// # Errors
    ///
    /// Returns an error if `dest` exists or the snapshot fails.
    pub fn snapshot_to(&self, dest: &Path) -> Result<()> {
        let target = dest.to_string_lossy().to_string();
        self.conn
            .execute("VACUUM INTO ?1", [target])
            .with_context(|| format!("snapshot to {}", dest.display()))?;
        Ok(())
    }

    // ========================================================================
    // UPSERTS
    // ========================================================================

    /// Upsert an ignore without regressing progress columns.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn upsert_ignore(&mut self, ignore: &Ignore) -> Result<UpsertOutcome> {
        Self::upsert_ignore_in_tx(&self.conn, ignore)
    }

    /// Upsert an ignore on an existing connection or transaction.
    ///
    /// `original_state` and the progress columns are written on insert only.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn upsert_ignore_in_tx(conn: &Connection, ignore: &Ignore) -> Result<UpsertOutcome> {
        let existing: Option<(String, bool)> = conn
            .query_row(
                "SELECT content_hash, migrated_at IS NOT NULL FROM ignores WHERE id = ?",
                [&ignore.id],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        conn.execute(
            "INSERT INTO ignores (
                id, issue_id, org_id, project_id, reason, ignore_type, created_at, expires_at,
                asset_key, original_state, content_hash, gathered_at, deleted_at, migrated_at,
                policy_id, internal_policy_id, selected_for_migration
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                issue_id = excluded.issue_id,
                org_id = excluded.org_id,
                project_id = excluded.project_id,
                reason = excluded.reason,
                ignore_type = excluded.ignore_type,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at,
                asset_key = CASE WHEN excluded.asset_key <> '' THEN excluded.asset_key
                                 ELSE ignores.asset_key END,
                content_hash = excluded.content_hash,
                gathered_at = excluded.gathered_at",
            params![
                ignore.id,
                ignore.issue_id,
                ignore.org_id,
                ignore.project_id,
                ignore.reason,
                ignore.ignore_type.as_str(),
                ignore.created_at.to_rfc3339(),
                ignore.expires_at.map(|dt| dt.to_rfc3339()),
                ignore.asset_key,
                ignore.original_state,
                ignore.content_hash,
                ignore.gathered_at.map(|dt| dt.to_rfc3339()),
                ignore.deleted_at.map(|dt| dt.to_rfc3339()),
                ignore.migrated_at.map(|dt| dt.to_rfc3339()),
                ignore.policy_id,
                ignore.internal_policy_id,
                ignore.selected_for_migration,
            ],
        )?;

        Ok(match existing {
            None => UpsertOutcome::Inserted,
            Some((hash, _)) if hash == ignore.content_hash => UpsertOutcome::Unchanged,
            Some((_, true)) => UpsertOutcome::Drifted,
            Some((_, false)) => UpsertOutcome::Updated,
        })
    }

    /// Upsert a target-system finding.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn upsert_issue(&mut self, issue: &Issue) -> Result<()> {
        Self::upsert_issue_in_tx(&self.conn, issue)
    }

    /// Upsert a finding on an existing connection or transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn upsert_issue_in_tx(conn: &Connection, issue: &Issue) -> Result<()> {
        conn.execute(
            "INSERT INTO issues (id, org_id, project_id, asset_key, project_key, original_state, gathered_at)
             VALUES (?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                org_id = excluded.org_id,
                project_id = excluded.project_id,
                asset_key = CASE WHEN excluded.asset_key <> '' THEN excluded.asset_key
                                 ELSE issues.asset_key END,
                project_key = excluded.project_key,
                original_state = excluded.original_state,
                gathered_at = excluded.gathered_at",
            params![
                issue.id,
                issue.org_id,
                issue.project_id,
                issue.asset_key,
                issue.project_key,
                issue.original_state,
                issue.gathered_at.map(|dt| dt.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Upsert a project without regressing `retested_at`.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn upsert_project(&mut self, project: &Project) -> Result<()> {
        Self::upsert_project_in_tx(&self.conn, project)
    }

    /// Upsert a project on an existing connection or transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn upsert_project_in_tx(conn: &Connection, project: &Project) -> Result<()> {
        conn.execute(
            "INSERT INTO projects (id, org_id, name, target_id, target_information, retested_at,
                                   is_cli_project, gathered_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                org_id = excluded.org_id,
                name = excluded.name,
                target_id = excluded.target_id,
                target_information = CASE WHEN excluded.target_information <> ''
                                          THEN excluded.target_information
                                          ELSE projects.target_information END,
                is_cli_project = excluded.is_cli_project,
                gathered_at = excluded.gathered_at",
            params![
                project.id,
                project.org_id,
                project.name,
                project.target_id,
                project.target_information,
                project.retested_at.map(|dt| dt.to_rfc3339()),
                project.is_cli_project,
                project.gathered_at.map(|dt| dt.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Insert a policy plan row, or update it in place.
    ///
    /// `external_id` and `created_at` are kept when the incoming row lacks them.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails, including a second
    /// policy for the same (org, asset key).
    pub fn insert_or_update_policy(&mut self, policy: &Policy) -> Result<()> {
        Self::insert_or_update_policy_in_tx(&self.conn, policy)
    }

    /// Insert or update a policy on an existing connection or transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn insert_or_update_policy_in_tx(conn: &Connection, policy: &Policy) -> Result<()> {
        conn.execute(
            "INSERT INTO policies (internal_id, org_id, asset_key, policy_type, reason, expires_at,
                                   source_ignores, selected_ignore_id, external_id, created_at)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
             ON CONFLICT(internal_id) DO UPDATE SET
                org_id = excluded.org_id,
                asset_key = excluded.asset_key,
                policy_type = excluded.policy_type,
                reason = excluded.reason,
                expires_at = excluded.expires_at,
                source_ignores = excluded.source_ignores,
                selected_ignore_id = excluded.selected_ignore_id,
                external_id = COALESCE(excluded.external_id, policies.external_id),
                created_at = COALESCE(excluded.created_at, policies.created_at)",
            params![
                policy.internal_id,
                policy.org_id,
                policy.asset_key,
                policy.policy_type.as_str(),
                policy.reason,
                policy.expires_at.map(|dt| dt.to_rfc3339()),
                policy.source_ignores_joined(),
                policy.selected_ignore_id,
                policy.external_id,
                policy.created_at.map(|dt| dt.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Upsert an organization.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn upsert_organization(&mut self, org: &Organization) -> Result<()> {
        Self::upsert_organization_in_tx(&self.conn, org)
    }

    /// Upsert an organization on an existing connection or transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn upsert_organization_in_tx(conn: &Connection, org: &Organization) -> Result<()> {
        conn.execute(
            "INSERT INTO organizations (id, group_id, name, slug, original_state, gathered_at)
             VALUES (?, ?, ?, ?, ?, ?)
             ON CONFLICT(id) DO UPDATE SET
                group_id = COALESCE(excluded.group_id, organizations.group_id),
                name = excluded.name,
                slug = excluded.slug,
                original_state = excluded.original_state,
                gathered_at = excluded.gathered_at",
            params![
                org.id,
                org.group_id,
                org.name,
                org.slug,
                org.original_state,
                org.gathered_at.map(|dt| dt.to_rfc3339()),
            ],
        )?;
        Ok(())
    }

    /// Overwrite the singleton collection metadata row.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn set_collection_metadata(&mut self, meta: &CollectionMetadata) -> Result<()> {
        Self::set_collection_metadata_in_tx(&self.conn, meta)
    }

    /// Overwrite the collection metadata on an existing connection or transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn set_collection_metadata_in_tx(conn: &Connection, meta: &CollectionMetadata) -> Result<()> {
        conn.execute(
            "INSERT OR REPLACE INTO collection_metadata
                (id, collection_completed_at, collection_version, api_version)
             VALUES (1, ?, ?, ?)",
            params![
                meta.collection_completed_at.to_rfc3339(),
                meta.collection_version,
                meta.api_version,
            ],
        )?;
        Ok(())
    }

    /// Read the collection metadata, if a gather has completed.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_collection_metadata(&self) -> Result<Option<CollectionMetadata>> {
        let meta = self
            .conn
            .query_row(
                "SELECT collection_completed_at, collection_version, api_version
                 FROM collection_metadata WHERE id = 1",
                [],
                |row| {
                    Ok(CollectionMetadata {
                        collection_completed_at: parse_datetime(0, &row.get::<_, String>(0)?)?,
                        collection_version: row.get(1)?,
                        api_version: row.get(2)?,
                    })
                },
            )
            .optional()?;
        Ok(meta)
    }

    // ========================================================================
    // TYPED QUERIES
    // ========================================================================

    /// Get an ignore by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_ignore(&self, id: &str) -> Result<Option<Ignore>> {
        let sql = format!("SELECT {IGNORE_COLUMNS} FROM ignores WHERE id = ?");
        Ok(self.conn.query_row(&sql, [id], ignore_from_row).optional()?)
    }

    /// All ignores of an org ordered by (created_at, id).
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn ignores_by_org(&self, org: &str) -> Result<Vec<Ignore>> {
        let sql = format!(
            "SELECT {IGNORE_COLUMNS} FROM ignores WHERE org_id = ? ORDER BY created_at, id"
        );
        self.query_rows(&sql, &[&org], ignore_from_row)
    }

    /// Ignores of an org that carry an asset key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn ignores_with_asset_key(&self, org: &str) -> Result<Vec<Ignore>> {
        let sql = format!(
            "SELECT {IGNORE_COLUMNS} FROM ignores
             WHERE org_id = ? AND asset_key <> ''
             ORDER BY asset_key, created_at, id"
        );
        self.query_rows(&sql, &[&org], ignore_from_row)
    }

    /// Ignores linked to a policy plan row.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn ignores_by_internal_policy(&self, internal_id: &str) -> Result<Vec<Ignore>> {
        let sql = format!(
            "SELECT {IGNORE_COLUMNS} FROM ignores WHERE internal_policy_id = ? ORDER BY created_at, id"
        );
        self.query_rows(&sql, &[&internal_id], ignore_from_row)
    }

    /// Migrated ignores whose legacy record is not yet deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn ignores_pending_cleanup(&self, org: &str) -> Result<Vec<Ignore>> {
        let sql = format!(
            "SELECT {IGNORE_COLUMNS} FROM ignores
             WHERE org_id = ? AND migrated_at IS NOT NULL AND deleted_at IS NULL
             ORDER BY created_at, id"
        );
        self.query_rows(&sql, &[&org], ignore_from_row)
    }

    /// Legacy ignores deleted by cleanup.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn deleted_ignores(&self, org: &str) -> Result<Vec<Ignore>> {
        let sql = format!(
            "SELECT {IGNORE_COLUMNS} FROM ignores
             WHERE org_id = ? AND deleted_at IS NOT NULL ORDER BY created_at, id"
        );
        self.query_rows(&sql, &[&org], ignore_from_row)
    }

    /// All findings of an org.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn issues_by_org(&self, org: &str) -> Result<Vec<Issue>> {
        let sql = format!("SELECT {ISSUE_COLUMNS} FROM issues WHERE org_id = ? ORDER BY id");
        self.query_rows(&sql, &[&org], issue_from_row)
    }

    /// All projects of an org.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn projects_by_org(&self, org: &str) -> Result<Vec<Project>> {
        let sql = format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE org_id = ? ORDER BY id");
        self.query_rows(&sql, &[&org], project_from_row)
    }

    /// Get a project by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_project(&self, id: &str) -> Result<Option<Project>> {
        let sql = format!("SELECT {PROJECT_COLUMNS} FROM projects WHERE id = ?");
        Ok(self.conn.query_row(&sql, [id], project_from_row).optional()?)
    }

    /// Non-CLI projects with a migrated ignore that have not been retested.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn projects_pending_retest(&self, org: &str) -> Result<Vec<Project>> {
        let sql = format!(
            "SELECT {PROJECT_COLUMNS} FROM projects p
             WHERE p.org_id = ?1 AND p.is_cli_project = 0 AND p.retested_at IS NULL
               AND EXISTS (SELECT 1 FROM ignores i
                           WHERE i.project_id = p.id AND i.org_id = ?1 AND i.migrated_at IS NOT NULL)
             ORDER BY p.id"
        );
        self.query_rows(&sql, &[&org], project_from_row)
    }

    /// All policy plan rows of an org.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn policies_by_org(&self, org: &str) -> Result<Vec<Policy>> {
        let sql = format!(
            "SELECT {POLICY_COLUMNS} FROM policies WHERE org_id = ? ORDER BY asset_key, internal_id"
        );
        self.query_rows(&sql, &[&org], policy_from_row)
    }

    /// Policy plan rows of an org without a remote policy yet.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn unexecuted_policies(&self, org: &str) -> Result<Vec<Policy>> {
        let sql = format!(
            "SELECT {POLICY_COLUMNS} FROM policies
             WHERE org_id = ? AND (external_id IS NULL OR external_id = '')
             ORDER BY asset_key, internal_id"
        );
        self.query_rows(&sql, &[&org], policy_from_row)
    }

    /// Unexecuted plan rows that no ignore links back to, as left by a local
    /// rollback. Executing them would mark nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn unlinked_policies(&self, org: &str) -> Result<Vec<String>> {
        self.query_rows(
            "SELECT p.internal_id FROM policies p
             WHERE p.org_id = ? AND (p.external_id IS NULL OR p.external_id = '')
               AND NOT EXISTS (
                   SELECT 1 FROM ignores i WHERE i.internal_policy_id = p.internal_id
               )
             ORDER BY p.internal_id",
            &[&org],
            |row| row.get(0),
        )
    }

    /// Get a policy by internal id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_policy(&self, internal_id: &str) -> Result<Option<Policy>> {
        let sql = format!("SELECT {POLICY_COLUMNS} FROM policies WHERE internal_id = ?");
        Ok(self
            .conn
            .query_row(&sql, [internal_id], policy_from_row)
            .optional()?)
    }

    /// Get an organization by id.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn get_organization(&self, id: &str) -> Result<Option<Organization>> {
        let sql = format!("SELECT {ORGANIZATION_COLUMNS} FROM organizations WHERE id = ?");
        Ok(self
            .conn
            .query_row(&sql, [id], organization_from_row)
            .optional()?)
    }

    /// Organizations recorded for a group.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn organizations_in_group(&self, group: &str) -> Result<Vec<Organization>> {
        let sql = format!(
            "SELECT {ORGANIZATION_COLUMNS} FROM organizations WHERE group_id = ? ORDER BY id"
        );
        self.query_rows(&sql, &[&group], organization_from_row)
    }

    /// Aggregate counts for one org.
    ///
    /// # Errors
    ///
    /// Returns an error if the database query fails.
    pub fn org_counts(&self, org: &str) -> Result<LedgerCounts> {
        let ignores = self.conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(asset_key <> ''), 0),
                    COALESCE(SUM(selected_for_migration <> 0), 0),
                    COALESCE(SUM(migrated_at IS NOT NULL), 0),
                    COALESCE(SUM(deleted_at IS NOT NULL), 0)
             FROM ignores WHERE org_id = ?",
            [org],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                    row.get::<_, i64>(4)?,
                ))
            },
        )?;
        let policies = self.conn.query_row(
            "SELECT COUNT(*), COALESCE(SUM(external_id IS NOT NULL AND external_id <> ''), 0)
             FROM policies WHERE org_id = ?",
            [org],
            |row| Ok((row.get::<_, i64>(0)?, row.get::<_, i64>(1)?)),
        )?;
        let projects = self.conn.query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(is_cli_project <> 0), 0),
                    COALESCE(SUM(is_cli_project = 0 AND EXISTS (
                        SELECT 1 FROM ignores i
                        WHERE i.project_id = p.id AND i.org_id = p.org_id
                          AND i.migrated_at IS NOT NULL)), 0),
                    COALESCE(SUM(is_cli_project = 0 AND retested_at IS NOT NULL AND EXISTS (
                        SELECT 1 FROM ignores i
                        WHERE i.project_id = p.id AND i.org_id = p.org_id
                          AND i.migrated_at IS NOT NULL)), 0)
             FROM projects p WHERE p.org_id = ?",
            [org],
            |row| {
                Ok((
                    row.get::<_, i64>(0)?,
                    row.get::<_, i64>(1)?,
                    row.get::<_, i64>(2)?,
                    row.get::<_, i64>(3)?,
                ))
            },
        )?;

        Ok(LedgerCounts {
            ignores: to_count(ignores.0),
            ignores_with_asset_key: to_count(ignores.1),
            ignores_selected: to_count(ignores.2),
            ignores_migrated: to_count(ignores.3),
            ignores_deleted: to_count(ignores.4),
            policies: to_count(policies.0),
            policies_executed: to_count(policies.1),
            projects: to_count(projects.0),
            cli_projects: to_count(projects.1),
            retest_eligible: to_count(projects.2),
            retest_done: to_count(projects.3),
        })
    }

    // ========================================================================
    // PHASE MUTATIONS (run inside `with_retry`)
    // ========================================================================

    /// Back-fill ignore asset keys from findings with a matching project key.
    ///
    /// Only unmigrated ignores are touched; ignores with no match keep their key.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn backfill_asset_keys(conn: &Connection, org: &str) -> Result<usize> {
        let updated = conn.execute(
            "UPDATE ignores SET asset_key = (
                 SELECT i.asset_key FROM issues i
                 WHERE i.org_id = ignores.org_id AND i.project_id = ignores.project_id
                   AND i.project_key = ignores.issue_id AND i.asset_key <> ''
                 ORDER BY i.id LIMIT 1)
             WHERE org_id = ?1 AND migrated_at IS NULL AND EXISTS (
                 SELECT 1 FROM issues i
                 WHERE i.org_id = ignores.org_id AND i.project_id = ignores.project_id
                   AND i.project_key = ignores.issue_id AND i.asset_key <> '')",
            [org],
        )?;
        Ok(updated)
    }

    /// Delete every policy plan row of an org.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn delete_policies_for_org(conn: &Connection, org: &str) -> Result<usize> {
        Ok(conn.execute("DELETE FROM policies WHERE org_id = ?", [org])?)
    }

    /// Clear plan links on every ignore of an org.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn reset_plan_flags_for_org(conn: &Connection, org: &str) -> Result<usize> {
        Ok(conn.execute(
            "UPDATE ignores SET selected_for_migration = 0, internal_policy_id = NULL
             WHERE org_id = ?",
            [org],
        )?)
    }

    /// Link an ignore to a plan row.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails or the ignore is missing.
    pub fn link_ignore_to_policy(
        conn: &Connection,
        ignore_id: &str,
        internal_id: &str,
        selected: bool,
    ) -> Result<()> {
        let updated = conn.execute(
            "UPDATE ignores SET internal_policy_id = ?, selected_for_migration = ? WHERE id = ?",
            params![internal_id, selected, ignore_id],
        )?;
        if updated == 0 {
            return Err(MigrateError::row_shape(
                "ignores",
                format!("ignore {ignore_id} vanished during planning"),
            ));
        }
        Ok(())
    }

    /// Record the remote policy on a plan row and every linked ignore.
    ///
    /// Returns the number of ignores marked migrated.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails or the policy is missing.
    pub fn mark_policy_executed(
        conn: &Connection,
        internal_id: &str,
        external_id: &str,
        at: DateTime<Utc>,
    ) -> Result<usize> {
        let at = at.to_rfc3339();
        let updated = conn.execute(
            "UPDATE policies SET external_id = ?, created_at = ? WHERE internal_id = ?",
            params![external_id, at, internal_id],
        )?;
        if updated == 0 {
            return Err(MigrateError::PolicyNotFound {
                id: internal_id.to_string(),
            });
        }
        let ignores = conn.execute(
            "UPDATE ignores SET migrated_at = COALESCE(migrated_at, ?), policy_id = ?
             WHERE internal_policy_id = ?",
            params![at, external_id, internal_id],
        )?;
        Ok(ignores)
    }

    /// Stamp `deleted_at` on a migrated ignore.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails or the ignore is not migrated.
    pub fn mark_ignore_deleted(conn: &Connection, id: &str, at: DateTime<Utc>) -> Result<()> {
        let updated = conn.execute(
            "UPDATE ignores SET deleted_at = ?
             WHERE id = ? AND migrated_at IS NOT NULL AND deleted_at IS NULL",
            params![at.to_rfc3339(), id],
        )?;
        if updated == 0 {
            debug!(id, "Ignore already deleted or not migrated");
        }
        Ok(())
    }

    /// Clear `deleted_at` after a legacy ignore was recreated remotely.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn clear_ignore_deleted(conn: &Connection, id: &str) -> Result<()> {
        conn.execute("UPDATE ignores SET deleted_at = NULL WHERE id = ?", [id])?;
        Ok(())
    }

    /// Stamp `retested_at` on a project.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn mark_project_retested(conn: &Connection, id: &str, at: DateTime<Utc>) -> Result<()> {
        conn.execute(
            "UPDATE projects SET retested_at = ? WHERE id = ?",
            params![at.to_rfc3339(), id],
        )?;
        Ok(())
    }

    /// Persist a lazily resolved target descriptor.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn set_project_target_information(
        conn: &Connection,
        id: &str,
        information: &str,
    ) -> Result<()> {
        conn.execute(
            "UPDATE projects SET target_information = ? WHERE id = ?",
            params![information, id],
        )?;
        Ok(())
    }

    /// Reset local migration bookkeeping for an org.
    ///
    /// # Errors
    ///
    /// Returns an error if the database operation fails.
    pub fn rollback_org(conn: &Connection, org: &str) -> Result<RollbackCounts> {
        let ignores_reset = conn.execute(
            "UPDATE ignores SET migrated_at = NULL, deleted_at = NULL, policy_id = NULL,
                                internal_policy_id = NULL, selected_for_migration = 0
             WHERE org_id = ?",
            [org],
        )?;
        let policies_reset = conn.execute(
            "UPDATE policies SET external_id = NULL, created_at = NULL WHERE org_id = ?",
            [org],
        )?;
        let projects_reset = conn.execute(
            "UPDATE projects SET retested_at = NULL WHERE org_id = ?",
            [org],
        )?;
        Ok(RollbackCounts {
            ignores_reset,
            policies_reset,
            projects_reset,
        })
    }
}

fn to_count(value: i64) -> usize {
    usize::try_from(value).unwrap_or(0)
}

/// Convert empty string to None; the schema stores '' for unset text.
#[inline]
fn empty_to_none(s: Option<String>) -> Option<String> {
    s.filter(|v| !v.is_empty())
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, message.into())
}

fn parse_datetime(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, format!("invalid timestamp '{s}': {e}")))
}

fn optional_datetime(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<DateTime<Utc>>> {
    match empty_to_none(row.get::<_, Option<String>>(idx)?) {
        Some(s) => parse_datetime(idx, &s).map(Some),
        None => Ok(None),
    }
}

fn ignore_type_at(row: &Row<'_>, idx: usize) -> rusqlite::Result<IgnoreType> {
    let raw: String = row.get(idx)?;
    raw.parse()
        .map_err(|e: MigrateError| conversion_error(idx, e.to_string()))
}

fn ignore_from_row(row: &Row<'_>) -> rusqlite::Result<Ignore> {
    Ok(Ignore {
        id: row.get(0)?,
        issue_id: row.get(1)?,
        org_id: row.get(2)?,
        project_id: row.get(3)?,
        reason: row.get(4)?,
        ignore_type: ignore_type_at(row, 5)?,
        created_at: parse_datetime(6, &row.get::<_, String>(6)?)?,
        expires_at: optional_datetime(row, 7)?,
        asset_key: row.get(8)?,
        original_state: row.get(9)?,
        content_hash: row.get(10)?,
        gathered_at: optional_datetime(row, 11)?,
        deleted_at: optional_datetime(row, 12)?,
        migrated_at: optional_datetime(row, 13)?,
        policy_id: empty_to_none(row.get(14)?),
        internal_policy_id: empty_to_none(row.get(15)?),
        selected_for_migration: row.get::<_, i64>(16)? != 0,
    })
}

fn issue_from_row(row: &Row<'_>) -> rusqlite::Result<Issue> {
    Ok(Issue {
        id: row.get(0)?,
        org_id: row.get(1)?,
        project_id: row.get(2)?,
        asset_key: row.get(3)?,
        project_key: row.get(4)?,
        original_state: row.get(5)?,
        gathered_at: optional_datetime(row, 6)?,
    })
}

fn project_from_row(row: &Row<'_>) -> rusqlite::Result<Project> {
    Ok(Project {
        id: row.get(0)?,
        org_id: row.get(1)?,
        name: row.get(2)?,
        target_id: row.get(3)?,
        target_information: row.get(4)?,
        retested_at: optional_datetime(row, 5)?,
        is_cli_project: row.get::<_, i64>(6)? != 0,
        gathered_at: optional_datetime(row, 7)?,
    })
}

fn policy_from_row(row: &Row<'_>) -> rusqlite::Result<Policy> {
    Ok(Policy {
        internal_id: row.get(0)?,
        org_id: row.get(1)?,
        asset_key: row.get(2)?,
        policy_type: ignore_type_at(row, 3)?,
        reason: row.get(4)?,
        expires_at: optional_datetime(row, 5)?,
        source_ignores: split_source_ignores(&row.get::<_, String>(6)?),
        selected_ignore_id: row.get(7)?,
        external_id: empty_to_none(row.get(8)?),
        created_at: optional_datetime(row, 9)?,
    })
}

fn organization_from_row(row: &Row<'_>) -> rusqlite::Result<Organization> {
    Ok(Organization {
        id: row.get(0)?,
        group_id: empty_to_none(row.get(1)?),
        name: row.get(2)?,
        slug: row.get(3)?,
        original_state: row.get(4)?,
        gathered_at: optional_datetime(row, 5)?,
    })
}

#[cfg(test)]
impl Ledger {
    /// Execute raw SQL for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the SQL execution fails.
    pub fn execute_test_sql(&self, sql: &str) -> Result<()> {
        self.conn.execute_batch(sql)?;
        Ok(())
    }
}
