//! ============================================================================
//! ClientDb - Embedded Local Store (redb)
//! ============================================================================
//! Persistent local storage for the auth identity and submission history.
//! Default path: ~/.pac/client.redb (override via PAC_DB_PATH env var).
//! The CSRF token is never written here.
//! ============================================================================

use std::path::{Path, PathBuf};

use anyhow::{anyhow, Result};
use redb::{Database, TableDefinition};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::auth::{AuthTokens, UserRecord};

// Table definitions
const IDENTITY: TableDefinition<&str, &[u8]> = TableDefinition::new("identity");
const SUBMISSIONS: TableDefinition<&str, &[u8]> = TableDefinition::new("submissions");

const KEY_TOKENS: &str = "identity:tokens";
const KEY_USER: &str = "identity:user";

/// One row per footage submission made from this client.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SubmissionRecord {
    pub task_id: String,
    pub url: String,
    /// Unix epoch seconds
    pub submitted_at: i64,
    pub outcome: SubmissionOutcome,
    pub media_id: Option<u64>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionOutcome {
    InFlight,
    Complete,
    Abandoned,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DbStats {
    pub submissions: usize,
    pub has_identity: bool,
    pub file_size_bytes: u64,
    pub path: String,
}

/// Embedded database for the accountability client.
pub struct ClientDb {
    db: Database,
    path: PathBuf,
}

impl ClientDb {
    /// Open (or create) the database. If `path` is None, uses PAC_DB_PATH
    /// env var or ~/.pac/client.redb.
    pub fn open(path: Option<&str>) -> Result<Self> {
        let db_path = if let Some(p) = path {
            PathBuf::from(p)
        } else if let Ok(env_path) = std::env::var("PAC_DB_PATH") {
            PathBuf::from(env_path)
        } else {
            let home = dirs::home_dir().ok_or_else(|| anyhow!("Cannot determine home directory"))?;
            home.join(".pac").join("client.redb")
        };
        Self::open_at(db_path)
    }

    /// Open at an explicit path, creating parent directories.
    pub fn open_at(db_path: PathBuf) -> Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)
                .map_err(|e| anyhow!("Failed to create {}: {}", parent.display(), e))?;
        }

        info!("Opening local store at: {}", db_path.display());

        let db = Database::create(&db_path)
            .map_err(|e| anyhow!("Failed to open database: {}", e))?;

        // Ensure tables exist by doing a write transaction
        let write_txn = db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let _ = write_txn
                .open_table(IDENTITY)
                .map_err(|e| anyhow!("Failed to create identity table: {}", e))?;
            let _ = write_txn
                .open_table(SUBMISSIONS)
                .map_err(|e| anyhow!("Failed to create submissions table: {}", e))?;
        }
        write_txn
            .commit()
            .map_err(|e| anyhow!("Failed to commit init: {}", e))?;

        Ok(Self { db, path: db_path })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    // ========================================================================
    // Identity
    // ========================================================================

    pub fn save_tokens(&self, tokens: &AuthTokens) -> Result<()> {
        self.put(IDENTITY, KEY_TOKENS, tokens)?;
        debug!("Persisted auth tokens");
        Ok(())
    }

    pub fn load_tokens(&self) -> Result<Option<AuthTokens>> {
        self.get(IDENTITY, KEY_TOKENS)
    }

    pub fn save_user(&self, user: &UserRecord) -> Result<()> {
        self.put(IDENTITY, KEY_USER, user)
    }

    pub fn load_user(&self) -> Result<Option<UserRecord>> {
        self.get(IDENTITY, KEY_USER)
    }

    /// Remove tokens and user record in one transaction.
    pub fn clear_identity(&self) -> Result<()> {
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let mut table = write_txn
                .open_table(IDENTITY)
                .map_err(|e| anyhow!("Failed to open identity table: {}", e))?;
            table
                .remove(KEY_TOKENS)
                .map_err(|e| anyhow!("Failed to remove tokens: {}", e))?;
            table
                .remove(KEY_USER)
                .map_err(|e| anyhow!("Failed to remove user: {}", e))?;
        }
        write_txn
            .commit()
            .map_err(|e| anyhow!("Failed to commit: {}", e))?;
        info!("Cleared stored identity");
        Ok(())
    }

    // ========================================================================
    // Submission History
    // ========================================================================

    pub fn record_submission(&self, record: &SubmissionRecord) -> Result<()> {
        let key = format!("submissions:{}", record.task_id);
        self.put(SUBMISSIONS, &key, record)?;
        debug!("Recorded submission for task {}", record.task_id);
        Ok(())
    }

    pub fn get_submission(&self, task_id: &str) -> Result<Option<SubmissionRecord>> {
        let key = format!("submissions:{}", task_id);
        self.get(SUBMISSIONS, &key)
    }

    pub fn update_submission_outcome(
        &self,
        task_id: &str,
        outcome: SubmissionOutcome,
        media_id: Option<u64>,
    ) -> Result<()> {
        let mut record = self
            .get_submission(task_id)?
            .ok_or_else(|| anyhow!("Unknown submission: {}", task_id))?;
        record.outcome = outcome;
        if media_id.is_some() {
            record.media_id = media_id;
        }
        self.record_submission(&record)
    }

    /// All submissions, newest first.
    pub fn list_submissions(&self) -> Result<Vec<SubmissionRecord>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn
            .open_table(SUBMISSIONS)
            .map_err(|e| anyhow!("Failed to open submissions table: {}", e))?;

        let mut results = Vec::new();
        let iter = table
            .range::<&str>(..)
            .map_err(|e| anyhow!("Failed to iterate submissions: {}", e))?;
        for entry in iter {
            let (_key, value) = entry.map_err(|e| anyhow!("Failed to read entry: {}", e))?;
            let record: SubmissionRecord = bincode::deserialize(value.value())
                .map_err(|e| anyhow!("Failed to deserialize submission: {}", e))?;
            results.push(record);
        }
        results.sort_by(|a, b| b.submitted_at.cmp(&a.submitted_at));
        Ok(results)
    }

    /// Delete finished submissions older than the cutoff. Returns the
    /// number removed.
    pub fn prune_submissions(&self, older_than_days: i64) -> Result<usize> {
        let cutoff = chrono::Utc::now().timestamp() - older_than_days * 86_400;
        let stale: Vec<String> = self
            .list_submissions()?
            .into_iter()
            .filter(|r| r.outcome != SubmissionOutcome::InFlight && r.submitted_at < cutoff)
            .map(|r| r.task_id)
            .collect();

        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let mut table = write_txn
                .open_table(SUBMISSIONS)
                .map_err(|e| anyhow!("Failed to open submissions table: {}", e))?;
            for task_id in &stale {
                let key = format!("submissions:{}", task_id);
                table
                    .remove(key.as_str())
                    .map_err(|e| anyhow!("Failed to remove submission: {}", e))?;
            }
        }
        write_txn
            .commit()
            .map_err(|e| anyhow!("Failed to commit: {}", e))?;

        info!("Pruned {} old submissions", stale.len());
        Ok(stale.len())
    }

    pub fn stats(&self) -> Result<DbStats> {
        let submissions = self.list_submissions()?.len();
        let has_identity = self.load_tokens()?.is_some();
        let file_size_bytes = std::fs::metadata(&self.path).map(|m| m.len()).unwrap_or(0);
        Ok(DbStats {
            submissions,
            has_identity,
            file_size_bytes,
            path: self.path.display().to_string(),
        })
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn put<T: Serialize>(
        &self,
        table_def: TableDefinition<&str, &[u8]>,
        key: &str,
        value: &T,
    ) -> Result<()> {
        let bytes =
            bincode::serialize(value).map_err(|e| anyhow!("Failed to serialize: {}", e))?;
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| anyhow!("Failed to begin write: {}", e))?;
        {
            let mut table = write_txn
                .open_table(table_def)
                .map_err(|e| anyhow!("Failed to open table: {}", e))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(|e| anyhow!("Failed to insert: {}", e))?;
        }
        write_txn
            .commit()
            .map_err(|e| anyhow!("Failed to commit: {}", e))?;
        Ok(())
    }

    fn get<T: for<'de> Deserialize<'de>>(
        &self,
        table_def: TableDefinition<&str, &[u8]>,
        key: &str,
    ) -> Result<Option<T>> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| anyhow!("Failed to begin read: {}", e))?;
        let table = read_txn
            .open_table(table_def)
            .map_err(|e| anyhow!("Failed to open table: {}", e))?;
        match table
            .get(key)
            .map_err(|e| anyhow!("Failed to get key: {}", e))?
        {
            Some(value) => {
                let parsed: T = bincode::deserialize(value.value())
                    .map_err(|e| anyhow!("Failed to deserialize: {}", e))?;
                Ok(Some(parsed))
            }
            None => Ok(None),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db() -> (ClientDb, PathBuf) {
        let dir = std::env::temp_dir().join(format!("pac-store-{}", uuid::Uuid::new_v4()));
        let db = ClientDb::open_at(dir.join("client.redb")).unwrap();
        (db, dir)
    }

    fn submission(task_id: &str, submitted_at: i64) -> SubmissionRecord {
        SubmissionRecord {
            task_id: task_id.into(),
            url: "https://example.com/footage".into(),
            submitted_at,
            outcome: SubmissionOutcome::InFlight,
            media_id: None,
        }
    }

    #[test]
    fn test_submission_roundtrip_and_ordering() {
        let (db, dir) = temp_db();
        db.record_submission(&submission("T1", 100)).unwrap();
        db.record_submission(&submission("T2", 200)).unwrap();

        let listed = db.list_submissions().unwrap();
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].task_id, "T2");

        db.update_submission_outcome("T1", SubmissionOutcome::Complete, Some(9))
            .unwrap();
        let updated = db.get_submission("T1").unwrap().unwrap();
        assert_eq!(updated.outcome, SubmissionOutcome::Complete);
        assert_eq!(updated.media_id, Some(9));

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_prune_keeps_in_flight() {
        let (db, dir) = temp_db();
        let old = chrono::Utc::now().timestamp() - 40 * 86_400;
        db.record_submission(&submission("T1", old)).unwrap();
        let mut finished = submission("T2", old);
        finished.outcome = SubmissionOutcome::Complete;
        db.record_submission(&finished).unwrap();

        let removed = db.prune_submissions(30).unwrap();
        assert_eq!(removed, 1);
        assert!(db.get_submission("T1").unwrap().is_some());
        assert!(db.get_submission("T2").unwrap().is_none());

        let _ = std::fs::remove_dir_all(dir);
    }

    #[test]
    fn test_stats_reflect_contents() {
        let (db, dir) = temp_db();
        db.record_submission(&submission("T1", 100)).unwrap();
        let stats = db.stats().unwrap();
        assert_eq!(stats.submissions, 1);
        assert!(!stats.has_identity);
        assert!(stats.file_size_bytes > 0);

        let _ = std::fs::remove_dir_all(dir);
    }
}
