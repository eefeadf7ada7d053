//! libSQL backend — async `MessageStore` implementation.
//!
//! Supports local file and in-memory databases.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use libsql::{Connection, Database as LibSqlDatabase, params};
use tracing::{debug, info, warn};

use crate::error::DatabaseError;
use crate::pipeline::types::MessageRecord;
use crate::store::migrations;
use crate::store::traits::MessageStore;

/// libSQL database backend.
///
/// Stores a single connection that is reused for all operations.
/// `libsql::Connection` is `Send + Sync` and safe for concurrent async use.
pub struct LibSqlBackend {
    #[allow(dead_code)]
    db: Arc<LibSqlDatabase>,
    conn: Connection,
}

impl LibSqlBackend {
    /// Open (or create) a local database file and run migrations.
    pub async fn new_local(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                DatabaseError::Pool(format!("Failed to create database directory: {e}"))
            })?;
        }

        let db = libsql::Builder::new_local(path)
            .build()
            .await
            .map_err(|e| DatabaseError::Pool(format!("Failed to open libSQL database: {e}")))?;

        let backend = Self::from_database(db).await?;
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
        Self::from_database(db).await
    }

    async fn from_database(db: LibSqlDatabase) -> Result<Self, DatabaseError> {
        let conn = db
            .connect()
            .map_err(|e| DatabaseError::Pool(format!("Failed to create connection: {e}")))?;

        let backend = Self {
            db: Arc::new(db),
            conn,
        };
        migrations::run_migrations(backend.conn()).await?;
        Ok(backend)
    }

    fn conn(&self) -> &Connection {
        &self.conn
    }
}

// ── Helper functions ────────────────────────────────────────────────

/// Fixed-width RFC 3339 so that text ordering equals time ordering.
fn format_datetime(dt: &DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

/// Parse an RFC 3339 or SQLite datetime string into DateTime<Utc>.
fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.with_timezone(&Utc));
    }
    chrono::NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f")
        .ok()
        .map(|ndt| ndt.and_utc())
}

/// Convert `Option<&str>` to libsql Value.
fn opt_text(s: Option<&str>) -> libsql::Value {
    match s {
        Some(s) => libsql::Value::Text(s.to_string()),
        None => libsql::Value::Null,
    }
}

const EMAIL_COLUMNS: &str = "id, sender, recipient, subject, body, received_at, is_read";

/// Map a libsql Row to a MessageRecord. Column order matches `EMAIL_COLUMNS`.
/// An unparseable `received_at` is an error, never a default.
fn row_to_message(row: &libsql::Row) -> Result<MessageRecord, DatabaseError> {
    let field = |e: libsql::Error| DatabaseError::Query(format!("row parse: {e}"));
    let id: String = row.get(0).map_err(field)?;
    let received_str: String = row.get(5).map_err(field)?;
    let is_read: i64 = row.get(6).map_err(field)?;

    let Some(received_at) = parse_datetime(&received_str) else {
        return Err(DatabaseError::Query(format!(
            "row parse: email {id} has unreadable received_at {received_str:?}"
        )));
    };

    Ok(MessageRecord {
        id,
        sender: row.get(1).map_err(field)?,
        recipient: row.get::<String>(2).ok(),
        subject: row.get(3).map_err(field)?,
        body: row.get(4).map_err(field)?,
        received_at,
        is_read: is_read != 0,
    })
}

/// Unreadable rows are logged and skipped; a cursor error ends the query.
async fn collect_messages(mut rows: libsql::Rows) -> Result<Vec<MessageRecord>, DatabaseError> {
    let mut messages = Vec::new();
    while let Some(row) = rows
        .next()
        .await
        .map_err(|e| DatabaseError::Query(format!("recent_messages: {e}")))?
    {
        match row_to_message(&row) {
            Ok(msg) => messages.push(msg),
            Err(e) => warn!(error = %e, "Skipping email row"),
        }
    }
    Ok(messages)
}

// ── Trait implementation ────────────────────────────────────────────

#[async_trait]
impl MessageStore for LibSqlBackend {
    async fn upsert_message(&self, message: &MessageRecord) -> Result<bool, DatabaseError> {
        let now = format_datetime(&Utc::now());
        let received_at = format_datetime(&message.received_at);
        let conn = self.conn();

        let inserted = conn
            .execute(
                "INSERT INTO emails (id, sender, recipient, subject, body, received_at, is_read,
                    created_at, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?8)
                 ON CONFLICT(id) DO NOTHING",
                params![
                    message.id.as_str(),
                    message.sender.as_str(),
                    opt_text(message.recipient.as_deref()),
                    message.subject.as_str(),
                    message.body.as_str(),
                    received_at.as_str(),
                    message.is_read as i64,
                    now.as_str(),
                ],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("upsert_message insert: {e}")))?;

        if inserted > 0 {
            debug!(id = %message.id, "Email inserted into DB");
            return Ok(true);
        }

        conn.execute(
            "UPDATE emails SET sender = ?1, recipient = ?2, subject = ?3, body = ?4,
                received_at = ?5, is_read = ?6, updated_at = ?7
             WHERE id = ?8",
            params![
                message.sender.as_str(),
                opt_text(message.recipient.as_deref()),
                message.subject.as_str(),
                message.body.as_str(),
                received_at.as_str(),
                message.is_read as i64,
                now.as_str(),
                message.id.as_str(),
            ],
        )
        .await
        .map_err(|e| DatabaseError::Query(format!("upsert_message update: {e}")))?;

        debug!(id = %message.id, "Email refreshed in DB");
        Ok(false)
    }

    async fn get_message(&self, id: &str) -> Result<Option<MessageRecord>, DatabaseError> {
        let mut rows = self
            .conn()
            .query(
                &format!("SELECT {EMAIL_COLUMNS} FROM emails WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("get_message: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => Ok(Some(row_to_message(&row)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(DatabaseError::Query(format!("get_message: {e}"))),
        }
    }

    async fn recent_messages(
        &self,
        limit: Option<usize>,
    ) -> Result<Vec<MessageRecord>, DatabaseError> {
        let conn = self.conn();
        let rows = match limit {
            Some(limit) => conn
                .query(
                    &format!(
                        "SELECT {EMAIL_COLUMNS} FROM emails ORDER BY received_at DESC, id ASC LIMIT ?1"
                    ),
                    params![limit as i64],
                )
                .await,
            None => conn
                .query(
                    &format!(
                        "SELECT {EMAIL_COLUMNS} FROM emails ORDER BY received_at DESC, id ASC"
                    ),
                    (),
                )
                .await,
        }
        .map_err(|e| DatabaseError::Query(format!("recent_messages: {e}")))?;

        collect_messages(rows).await
    }

    async fn set_read_state(&self, id: &str, read: bool) -> Result<(), DatabaseError> {
        let now = format_datetime(&Utc::now());
        self.conn()
            .execute(
                "UPDATE emails SET is_read = ?1, updated_at = ?2 WHERE id = ?3",
                params![read as i64, now.as_str(), id],
            )
            .await
            .map_err(|e| DatabaseError::Query(format!("set_read_state: {e}")))?;

        debug!(id, read, "Email read state updated in DB");
        Ok(())
    }

    async fn count(&self) -> Result<usize, DatabaseError> {
        let mut rows = self
            .conn()
            .query("SELECT COUNT(*) FROM emails", ())
            .await
            .map_err(|e| DatabaseError::Query(format!("count: {e}")))?;

        match rows.next().await {
            Ok(Some(row)) => {
                let count: i64 = row.get(0).unwrap_or(0);
                Ok(count as usize)
            }
            _ => Ok(0),
        }
    }
}
