//! Append-only persistence of code submissions.
//!
//! Every completed submission lands here with its exported result, captured
//! console, and error. Storage failures never propagate to the HTTP path
//! that performed the execution; they are logged and swallowed.

use std::sync::Arc;

use parking_lot::Mutex;
use quickserve_common::ExecSource;
use rusqlite::Connection;
use serde::Serialize;
use thiserror::Error;
use tracing::warn;

/// Failure talking to the relational store.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The driver reported an error.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

/// One persisted code submission.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionRecord {
    /// Store-assigned row id.
    pub id: i64,
    /// Session the submission belonged to.
    #[serde(rename = "sessionId")]
    pub session_id: String,
    /// The submitted source.
    pub code: String,
    /// JSON-encoded completion value.
    pub result: Option<String>,
    /// Captured console, one `"[level] text"` line per row.
    #[serde(rename = "consoleLog")]
    pub console_log: Option<String>,
    /// Error message when the submission failed.
    pub error: Option<String>,
    /// Insertion time, as recorded by the store.
    pub timestamp: String,
    /// Where the submission came from.
    pub source: String,
}

/// A record to append. Timestamps and ids are assigned by the store.
#[derive(Debug)]
pub struct NewExecution {
    /// Session the submission belongs to.
    pub session_id: String,
    /// The submitted source.
    pub code: String,
    /// JSON-encoded completion value.
    pub result: Option<String>,
    /// Rendered console capture, empty lines omitted entirely.
    pub console_log: Option<String>,
    /// Error message when the submission failed.
    pub error: Option<String>,
    /// Where the submission came from.
    pub source: ExecSource,
}

/// Filters and pagination for [`ExecutionStore::list`].
#[derive(Debug, Clone, Default)]
pub struct ListFilter {
    /// Substring matched against code, result, and console log.
    pub search: Option<String>,
    /// Exact session filter.
    pub session_id: Option<String>,
    /// Exact source filter.
    pub source: Option<String>,
    /// Page size.
    pub limit: i64,
    /// Row offset.
    pub offset: i64,
}

/// Handle on the `script_executions` table.
#[derive(Clone)]
pub struct ExecutionStore {
    connection: Arc<Mutex<Connection>>,
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS script_executions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    code TEXT NOT NULL,
    result TEXT,
    console_log TEXT,
    error TEXT,
    timestamp TIMESTAMP DEFAULT CURRENT_TIMESTAMP,
    source TEXT DEFAULT 'api'
);
CREATE INDEX IF NOT EXISTS idx_script_executions_session
    ON script_executions (session_id);
CREATE INDEX IF NOT EXISTS idx_script_executions_timestamp
    ON script_executions (timestamp);
CREATE INDEX IF NOT EXISTS idx_script_executions_source
    ON script_executions (source);
";

impl ExecutionStore {
    /// Wrap the shared connection. Call [`Self::init_schema`] once before
    /// use.
    pub fn new(connection: Arc<Mutex<Connection>>) -> Self {
        Self { connection }
    }

    /// Create the table and indexes when missing.
    pub fn init_schema(&self) -> Result<(), StoreError> {
        self.connection.lock().execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Append a record. Best-effort: a driver failure is logged and the
    /// record is dropped.
    pub fn append(&self, record: NewExecution) {
        let outcome = self.connection.lock().execute(
            "INSERT INTO script_executions (session_id, code, result, console_log, error, source)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            rusqlite::params![
                record.session_id,
                record.code,
                record.result,
                record.console_log,
                record.error,
                record.source.as_str(),
            ],
        );
        if let Err(error) = outcome {
            warn!(%error, session_id = %record.session_id, "failed to persist execution record");
        }
    }

    /// List records matching `filter`, newest first, along with the total
    /// count before pagination.
    pub fn list(&self, filter: &ListFilter) -> Result<(Vec<ExecutionRecord>, i64), StoreError> {
        let mut conditions: Vec<String> = Vec::new();
        let mut params: Vec<rusqlite::types::Value> = Vec::new();

        if let Some(search) = filter.search.as_deref().filter(|s| !s.is_empty()) {
            let index = params.len() + 1;
            conditions.push(format!(
                "(code LIKE ?{index} OR result LIKE ?{index} OR console_log LIKE ?{index})"
            ));
            params.push(format!("%{search}%").into());
        }
        if let Some(session_id) = filter.session_id.as_deref().filter(|s| !s.is_empty()) {
            conditions.push(format!("session_id = ?{}", params.len() + 1));
            params.push(session_id.to_string().into());
        }
        if let Some(source) = filter.source.as_deref().filter(|s| !s.is_empty()) {
            conditions.push(format!("source = ?{}", params.len() + 1));
            params.push(source.to_string().into());
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };

        let connection = self.connection.lock();

        let total: i64 = connection.query_row(
            &format!("SELECT COUNT(*) FROM script_executions{where_clause}"),
            rusqlite::params_from_iter(params.iter()),
            |row| row.get(0),
        )?;

        let sql = format!(
            "SELECT id, session_id, code, result, console_log, error, timestamp, source
             FROM script_executions{where_clause}
             ORDER BY timestamp DESC, id DESC
             LIMIT {} OFFSET {}",
            filter.limit.max(0),
            filter.offset.max(0),
        );
        let mut statement = connection.prepare(&sql)?;
        let rows = statement.query_map(rusqlite::params_from_iter(params.iter()), |row| {
            Ok(ExecutionRecord {
                id: row.get(0)?,
                session_id: row.get(1)?,
                code: row.get(2)?,
                result: row.get(3)?,
                console_log: row.get(4)?,
                error: row.get(5)?,
                timestamp: row.get(6)?,
                source: row.get(7)?,
            })
        })?;

        let mut records = Vec::new();
        for row in rows {
            records.push(row?);
        }
        Ok((records, total))
    }
}
