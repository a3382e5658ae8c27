//! libSQL backend: recipient store, digest archive and run audit log.
//!
//! Uses libsql's native async API over a single reused connection.
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::error::DatabaseError;
use crate::pipeline::types::{
    ArchiveStore, AuditLog, FailureKind, FailureRecord, Recipient, RecipientStore, RunRecord,
    RunResult, RunStatus, Tier,
};
use crate::store::migrations;

/// A delivered digest as stored in the archive.
#[derive(Debug, Clone)]
pub struct ArchivedDigest {
    pub id: Uuid,
    pub recipient_id: String,
    pub content: String,
    pub topics: Vec<String>,
    pub sent_at: DateTime<Utc>,
}

/// libSQL database backend.
///
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        info!(path = %path.display(), "Database opened");
        Ok(backend)
    }

    /// Create an in-memory database (for tests).
    pub async fn new_memory() -> Result<Self, DatabaseError> {
        let db = libsql::Builder::new_local(":memory:")
            .build()
            .await
            .map_err(|e| {
                DatabaseError::Pool(format!("Failed to create in-memory database: {e}"))
            })?;

        let backend = Self::from_database(db)?;
        backend.init_schema().await?;
        Ok(backend)
    }

    fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;
        Ok(Self {
            db: Arc::new(db),
            conn,
        })
    }

    async fn init_schema(&self) -> Result<(), DatabaseError> {
        migrations::run_migrations(&self.conn).await
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }

    // ── Recipients ──────────────────────────────────────────────────

    /// Insert or replace a recipient. New rows start `active`.
    pub async fn upsert_recipient(&self, recipient: &Recipient) -> Result<(), DatabaseError> {
        let topics = serde_json::to_string(&recipient.topics)
            .map_err(|e| DatabaseError::Serialization(format!("recipient topics: {e}")))?;
        let now = Utc::now().to_rfc3339();

        self.conn()
            .execute(
                "INSERT INTO recipients (id, email, name, tier, topics, paused, status, created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'active', ?7, ?7)
                 ON CONFLICT(id) DO UPDATE SET
                    email = excluded.email,
                    name = excluded.name,
                    tier = excluded.tier,
                    topics = excluded.topics,
                    paused = excluded.paused,
                    updated_at = excluded.updated_at",
                params![
                    recipient.id.as_str(),
                    recipient.email.as_str(),
                    opt_text(recipient.name.as_deref()),
                    recipient.tier.to_string(),
                    topics,
                    recipient.paused as i64,
                    now,
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_recipient: {e}")))?;

        debug!(recipient = %recipient.id, "Recipient upserted");
        Ok(())
    }

    /// Change a recipient's subscription status (`active`, `unsubscribed`, ...).
    /// Returns whether a row was updated.
    pub async fn set_recipient_status(&self, id: &str, status: &str) -> Result<bool, DatabaseError> {
        let updated = self
            .conn()
            .execute(
                "UPDATE recipients SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status, Utc::now().to_rfc3339(), id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_recipient_status: {e}")))?;
        Ok(updated > 0)
    }

    // ── Audit queries ───────────────────────────────────────────────

    /// Most recent runs first, with their failure records.
    pub async fn list_runs(&self, limit: usize) -> Result<Vec<RunRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {RUN_COLUMNS} FROM digest_runs ORDER BY started_at DESC, rowid DESC LIMIT ?1"
                ),
                params![limit as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_runs: {e}")))?;

        let mut runs = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_runs: {e}")))?
        {
            match row_to_run(&row) {
                Ok(run) => runs.push(run),
                Err(e) => warn!("Skipping run row: {e}"),
            }
        }

        for run in &mut runs {
            run.failures = self.list_failures(run.run_id).await?;
        }
        Ok(runs)
    }

    pub async fn list_failures(&self, run_id: Uuid) -> Result<Vec<FailureRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT kind, recipient_id, topic, detail FROM digest_failures WHERE run_id = ?1 ORDER BY id",
                params![run_id.to_string()],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_failures: {e}")))?;

        let mut failures = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_failures: {e}")))?
        {
            let kind: String = row
                .get(0)
                .map_err(|e| DatabaseError::Query(format!("list_failures row parse: {e}")))?;
            failures.push(FailureRecord {
                kind: kind.parse().unwrap_or(FailureKind::Unknown),
                recipient_id: row.get(1).ok(),
                topic: row.get(2).ok(),
                detail: row.get(3).unwrap_or_default(),
            });
        }
        Ok(failures)
    }

    /// Archived digests for one recipient, newest first.
    pub async fn list_archive(&self, recipient_id: &str) -> Result<Vec<ArchivedDigest>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                "SELECT id, recipient_id, content, topics, sent_at FROM digest_archive
                 WHERE recipient_id = ?1 ORDER BY sent_at DESC",
                params![recipient_id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_archive: {e}")))?;

        let mut archived = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_archive: {e}")))?
        {
            match row_to_archive(&row) {
                Ok(entry) => archived.push(entry),
                Err(e) => warn!("Skipping archive row: {e}"),
            }
        }
        Ok(archived)
    }
}

// ── Helper functions ────────────────────────────────────────────────

const RECIPIENT_COLUMNS: &str = "id, email, name, tier, topics, paused";

const RUN_COLUMNS: &str =
    "id, cursor, status, processed, successful, failed, skipped, errors, started_at, finished_at";

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> DateTime<Utc> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return dt.with_timezone(&Utc);
    }
    if let Ok(ndt) = chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return ndt.and_utc();
    }
    DateTime::<Utc>::MIN_UTC
}

fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

/// Column order matches RECIPIENT_COLUMNS.
fn row_to_recipient(row: &libsql::Row) -> Result<Recipient, libsql::Error> {
    let tier_str: String = row.get(3)?;
    let topics_str: String = row.get(4)?;
    let paused: i64 = row.get(5)?;

    Ok(Recipient {
        id: row.get(0)?,
        email: row.get(1)?,
        name: row.get(2).ok(),
        tier: tier_str.parse().unwrap_or(Tier::Free),
        topics: serde_json::from_str(&topics_str).unwrap_or_default(),
        paused: paused != 0,
    })
}

/// Column order matches RUN_COLUMNS. Failures are loaded separately.
fn row_to_run(row: &libsql::Row) -> Result<RunRecord, DatabaseError> {
    let parse = |e: libsql::Error| DatabaseError::Query(format!("run row parse: {e}"));

    let id: String = row.get(0).map_err(parse)?;
    let cursor: i64 = row.get(1).map_err(parse)?;
    let status: String = row.get(2).map_err(parse)?;
    let processed: i64 = row.get(3).map_err(parse)?;
    let successful: i64 = row.get(4).map_err(parse)?;
    let failed: i64 = row.get(5).map_err(parse)?;
    let skipped: i64 = row.get(6).map_err(parse)?;
    let errors: String = row.get(7).map_err(parse)?;
    let started_at: String = row.get(8).map_err(parse)?;
    let finished_at: String = row.get(9).map_err(parse)?;

    Ok(RunRecord {
        run_id: Uuid::parse_str(&id)
            .map_err(|e| DatabaseError::Serialization(format!("run id: {e}")))?,
        cursor: cursor as usize,
        started_at: parse_datetime(&started_at),
        finished_at: parse_datetime(&finished_at),
        result: RunResult {
            processed: processed as usize,
            successful: successful as usize,
            failed: failed as usize,
            skipped: skipped as usize,
            errors: serde_json::from_str(&errors)
                .map_err(|e| DatabaseError::Serialization(format!("run errors: {e}")))?,
            status: status.parse().unwrap_or(RunStatus::Failed),
        },
        failures: Vec::new(),
    })
}

fn row_to_archive(row: &libsql::Row) -> Result<ArchivedDigest, DatabaseError> {
    let parse = |e: libsql::Error| DatabaseError::Query(format!("archive row parse: {e}"));

    let id: String = row.get(0).map_err(parse)?;
    let topics: String = row.get(3).map_err(parse)?;
    let sent_at: String = row.get(4).map_err(parse)?;

    Ok(ArchivedDigest {
        id: Uuid::parse_str(&id)
            .map_err(|e| DatabaseError::Serialization(format!("archive id: {e}")))?,
        recipient_id: row.get(1).map_err(parse)?,
        content: row.get(2).map_err(parse)?,
        topics: serde_json::from_str(&topics).unwrap_or_default(),
        sent_at: parse_datetime(&sent_at),
    })
}

// ── Trait implementations ───────────────────────────────────────────

#[async_trait]
impl RecipientStore for LibSqlBackend {
    async fn list_eligible_recipients(
        &self,
        offset: usize,
        limit: usize,
    ) -> Result<Vec<Recipient>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!(
                    "SELECT {RECIPIENT_COLUMNS} FROM recipients
                     WHERE status = 'active'
                     ORDER BY created_at ASC, id ASC
                     LIMIT ?1 OFFSET ?2"
                ),
                params![limit as i64, offset as i64],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("list_eligible_recipients: {e}")))?;

        let mut recipients = Vec::new();
        while let Some(row) = rows
            .next()
            .await
            .map_err(|e| DatabaseError::Query(format!("list_eligible_recipients: {e}")))?
        {
            let recipient = row_to_recipient(&row).map_err(|e| {
                DatabaseError::Query(format!("list_eligible_recipients row parse: {e}"))
            })?;
            recipients.push(recipient);
        }
        Ok(recipients)
    }

    async fn total_eligible_count(&self) -> Result<usize, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT COUNT(*) FROM recipients WHERE status = 'active'", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("total_eligible_count: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row
                    .get(0)
                    .map_err(|e| DatabaseError::Query(format!("total_eligible_count: {e}")))?;
                Ok(count as usize)
            }
            Ok(None) => Ok(0),
            Err(e) => Err(DatabaseError::Query(format!("total_eligible_count: {e}"))),
        }
    }
}

#[async_trait]
impl ArchiveStore for LibSqlBackend {
    async fn record_digest(
        &self,
        recipient_id: &str,
        content: &str,
        topics: &[String],
    ) -> Result<(), DatabaseError> {
        let topics = serde_json::to_string(topics)
            .map_err(|e| DatabaseError::Serialization(format!("archive topics: {e}")))?;

        self.conn()
            .execute(
                "INSERT INTO digest_archive (id, recipient_id, content, topics, sent_at) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    Uuid::new_v4().to_string(),
                    recipient_id,
                    content,
                    topics,
                    Utc::now().to_rfc3339(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("record_digest: {e}")))?;

        debug!(recipient = %recipient_id, "Digest archived");
        Ok(())
    }
}

#[async_trait]
impl AuditLog for LibSqlBackend {
    /// The run row and its failure rows land together or not at all.
    async fn append_run(&self, run: &RunRecord) -> Result<(), DatabaseError> {
        let errors = serde_json::to_string(&run.result.errors)
            .map_err(|e| DatabaseError::Serialization(format!("run errors: {e}")))?;

        let tx = self
            .conn()
            .transaction()
            .await
            .map_err(|e| DatabaseError::Query(format!("append_run begin: {e}")))?;

        if let Err(e) = insert_run(&tx, run, errors).await {
            if let Err(rollback) = tx.rollback().await {
                warn!(run_id = %run.run_id, error = %rollback, "Audit rollback failed");
            }
            return Err(e);
        }
        tx.commit()
            .await
            .map_err(|e| DatabaseError::Query(format!("append_run commit: {e}")))?;

        debug!(
            run_id = %run.run_id,
            status = %run.result.status,
            failures = run.failures.len(),
            "Run appended to audit log"
        );
        Ok(())
    }
}

async fn insert_run(conn: &Connection, run: &RunRecord, errors: String) -> Result<(), DatabaseError> {
    let result = &run.result;
    let run_id = run.run_id.to_string();

    conn.execute(
        &format!("INSERT INTO digest_runs ({RUN_COLUMNS}) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)"),
        params![
            run_id.as_str(),
            run.cursor as i64,
            result.status.to_string(),
            result.processed as i64,
            result.successful as i64,
            result.failed as i64,
            result.skipped as i64,
            errors,
            run.started_at.to_rfc3339(),
            run.finished_at.to_rfc3339(),
        ],
    )
    .await
    .map_err(|e| DatabaseError::Query(format!("append_run: {e}")))?;

    for failure in &run.failures {
        conn.execute(
            "INSERT INTO digest_failures (run_id, kind, recipient_id, topic, detail) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                run_id.as_str(),
                failure.kind.label(),
                opt_text(failure.recipient_id.as_deref()),
                opt_text(failure.topic.as_deref()),
                failure.detail.as_str(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("append_run failure row: {e}")))?;
    }
    Ok(())
}
