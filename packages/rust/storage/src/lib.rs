//! Turso Embedded / libSQL job store.
//!
//! [`LibsqlJobStore`] keeps one row per job holding the latest
//! [`JobSnapshot`], so finished jobs survive a restart. [`open_job_store`]
//! picks the backend named in [`StorageConfig`].

mod migrations;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::SecondsFormat;
use libsql::{Connection, Database, params};

use briefwise_engine::{InMemoryJobStore, JobStore};
use briefwise_shared::{
    BriefwiseError, JobId, JobSnapshot, JobStatus, Result, StorageBackend, StorageConfig,
};

/// Build the job store selected by `config`.
pub async fn open_job_store(config: &StorageConfig) -> Result<Arc<dyn JobStore>> {
    match config.backend {
        StorageBackend::Memory => Ok(Arc::new(InMemoryJobStore::new())),
        StorageBackend::Libsql => {
            let path = config.resolved_path()?;
            Ok(Arc::new(LibsqlJobStore::open(&path).await?))
        }
    }
}

fn storage_err(e: impl std::fmt::Display) -> BriefwiseError {
    BriefwiseError::Storage(e.to_string())
}

/// Fixed-width timestamps so `ORDER BY created_at` sorts chronologically.
fn timestamp(at: &chrono::DateTime<chrono::Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub struct LibsqlJobStore {
    #[allow(dead_code)]
    db: Database,
    conn: Connection,
}

impl LibsqlJobStore {
    /// Open or create a database at `path` and apply pending migrations.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| BriefwiseError::io(parent, e))?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(storage_err)?;
        let conn = db.connect().map_err(storage_err)?;

        let store = Self { db, conn };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<()> {
        let current_version = self.schema_version().await;

        for migration in migrations::all_migrations() {
            if migration.version > current_version {
                tracing::info!(
                    version = migration.version,
                    description = migration.description,
                    "applying migration"
                );
                self.conn.execute_batch(migration.sql).await.map_err(|e| {
                    BriefwiseError::Storage(format!(
                        "migration v{} failed: {e}",
                        migration.version
                    ))
                })?;
            }
        }
        Ok(())
    }

    /// Current schema version, or 0 before the first migration.
    async fn schema_version(&self) -> u32 {
        let result = self
            .conn
            .query("SELECT MAX(version) FROM schema_migrations", params![])
            .await;

        match result {
            Ok(mut rows) => match rows.next().await {
                Ok(Some(row)) => row.get::<u32>(0).unwrap_or(0),
                _ => 0,
            },
            // Table doesn't exist yet
            Err(_) => 0,
        }
    }

    /// Stored jobs currently in `status`, newest first.
    pub async fn list_by_status(&self, status: JobStatus) -> Result<Vec<JobSnapshot>> {
        let rows = self
            .conn
            .query(
                "SELECT snapshot_json FROM jobs WHERE status = ?1
                 ORDER BY created_at DESC, id DESC",
                params![status.as_str()],
            )
            .await
            .map_err(storage_err)?;
        collect_snapshots(rows).await
    }

    /// Remove a job. Returns whether a row was deleted.
    pub async fn delete(&self, job_id: &JobId) -> Result<bool> {
        let affected = self
            .conn
            .execute("DELETE FROM jobs WHERE id = ?1", params![job_id.to_string()])
            .await
            .map_err(storage_err)?;
        Ok(affected > 0)
    }
}

fn decode(json: &str) -> Result<JobSnapshot> {
    serde_json::from_str(json)
        .map_err(|e| BriefwiseError::Storage(format!("corrupt job snapshot: {e}")))
}

async fn collect_snapshots(mut rows: libsql::Rows) -> Result<Vec<JobSnapshot>> {
    let mut jobs = Vec::new();
    while let Some(row) = rows.next().await.map_err(storage_err)? {
        let json = row.get::<String>(0).map_err(storage_err)?;
        jobs.push(decode(&json)?);
    }
    Ok(jobs)
}

#[async_trait]
impl JobStore for LibsqlJobStore {
    async fn put(&self, snapshot: &JobSnapshot) -> Result<()> {
        let json = serde_json::to_string(snapshot)
            .map_err(|e| BriefwiseError::Storage(format!("failed to encode snapshot: {e}")))?;
        self.conn
            .execute(
                "INSERT INTO jobs (id, status, created_at, updated_at, snapshot_json)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT(id) DO UPDATE SET
                     status = excluded.status,
                     updated_at = excluded.updated_at,
                     snapshot_json = excluded.snapshot_json",
                params![
                    snapshot.job_id.to_string(),
                    snapshot.status.as_str(),
                    timestamp(&snapshot.created_at),
                    timestamp(&snapshot.updated_at),
                    json
                ],
            )
            .await
            .map_err(storage_err)?;
        tracing::debug!(job_id = %snapshot.job_id, status = %snapshot.status, "stored job snapshot");
        Ok(())
    }

    async fn get(&self, job_id: &JobId) -> Result<Option<JobSnapshot>> {
        let mut rows = self
            .conn
            .query(
                "SELECT snapshot_json FROM jobs WHERE id = ?1",
                params![job_id.to_string()],
            )
            .await
            .map_err(storage_err)?;

        match rows.next().await.map_err(storage_err)? {
            Some(row) => {
                let json = row.get::<String>(0).map_err(storage_err)?;
                decode(&json).map(Some)
            }
            None => Ok(None),
        }
    }

    async fn list(&self) -> Result<Vec<JobSnapshot>> {
        let rows = self
            .conn
            .query(
                "SELECT snapshot_json FROM jobs ORDER BY created_at DESC, id DESC",
                params![],
            )
            .await
            .map_err(storage_err)?;
        collect_snapshots(rows).await
    }
}
