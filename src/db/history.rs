use chrono::{DateTime, Utc};
use duckdb::params;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use thiserror::Error;
use tracing::{debug, info};

use crate::db::db_pool::DbPool;
use crate::db::executor::Row;
use crate::sql::ValidatedSql;

const CREATE_HISTORY_SQL: &str = "
    CREATE SEQUENCE IF NOT EXISTS query_history_id_seq START 1;
    CREATE TABLE IF NOT EXISTS query_history (
        id BIGINT PRIMARY KEY DEFAULT nextval('query_history_id_seq'),
        session_id VARCHAR NOT NULL,
        natural_query VARCHAR NOT NULL,
        sql_query VARCHAR NOT NULL,
        explanation VARCHAR NOT NULL,
        query_result VARCHAR NOT NULL,
        title VARCHAR,
        created_at VARCHAR NOT NULL
    );
";

const INSERT_RECORD_SQL: &str = "
    INSERT INTO query_history (
        id, session_id, natural_query, sql_query, explanation, query_result, title, created_at
    )
    VALUES (?, ?, ?, ?, ?, ?, ?, ?)
";

const SELECT_RECORDS_SQL: &str = "
    SELECT id, session_id, natural_query, sql_query, explanation, query_result, title, created_at
    FROM query_history
";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("history store connection error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("history store query failed: {0}")]
    Database(#[from] duckdb::Error),
    #[error("history record encoding failed: {0}")]
    Encoding(#[from] serde_json::Error),
    #[error("history record has invalid timestamp: {0}")]
    Timestamp(#[from] chrono::ParseError),
    #[error("history store task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

/// One executed natural-language query, as persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryRecord {
    pub id: i64,
    pub session_id: String,
    pub natural_query: String,
    pub sql_query: String,
    #[serde(rename = "gpt_explanation")]
    pub explanation: String,
    /// Always a native JSON array of row objects
    pub query_result: Value,
    pub title: Option<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub id: String,
    pub queries: Vec<QueryRecord>,
}

/// Input to [`HistoryStore::record`].
pub struct NewQueryRecord<'a> {
    pub session_id: Option<&'a str>,
    pub natural_query: &'a str,
    pub sql: &'a ValidatedSql,
    pub explanation: &'a str,
    pub result: &'a [Row],
    pub title: Option<&'a str>,
}

/// Append-only, session-keyed log of executed queries.
#[derive(Clone)]
pub struct HistoryStore {
    pool: DbPool,
}

impl HistoryStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn init(&self) -> Result<(), StoreError> {
        let conn = self.pool.get()?;
        conn.execute_batch(CREATE_HISTORY_SQL)?;
        info!("Query history store ready");
        Ok(())
    }

    pub fn generate_session_id() -> String {
        uuid::Uuid::new_v4().to_string()
    }

    /// Appends one record. Without a session id a new session is started;
    /// an id never seen before also starts a session under that id.
    pub fn record(&self, new: NewQueryRecord<'_>) -> Result<QueryRecord, StoreError> {
        let session_id = match new.session_id {
            Some(id) => id.to_string(),
            None => Self::generate_session_id(),
        };
        let query_result = serde_json::to_value(new.result)?;
        let encoded_result = serde_json::to_string(&query_result)?;
        let timestamp = Utc::now();

        let conn = self.pool.get()?;
        let id: i64 = conn.query_row("SELECT nextval('query_history_id_seq')", [], |row| row.get(0))?;
        conn.execute(
            INSERT_RECORD_SQL,
            params![
                id,
                session_id,
                new.natural_query,
                new.sql.as_str(),
                new.explanation,
                encoded_result,
                new.title,
                timestamp.to_rfc3339(),
            ],
        )?;

        debug!("Recorded query {} in session {}", id, session_id);

        Ok(QueryRecord {
            id,
            session_id,
            natural_query: new.natural_query.to_string(),
            sql_query: new.sql.as_str().to_string(),
            explanation: new.explanation.to_string(),
            query_result,
            title: new.title.map(str::to_string),
            timestamp,
        })
    }

    /// All sessions, ordered by their first record; records oldest first.
    pub fn list_sessions(&self) -> Result<Vec<Session>, StoreError> {
        let records = self.load_records(None)?;
        Ok(group_sessions(records))
    }

    pub fn get_session(&self, session_id: &str) -> Result<Option<Session>, StoreError> {
        let records = self.load_records(Some(session_id))?;
        Ok(group_sessions(records).into_iter().next())
    }

    pub fn record_count(&self) -> Result<i64, StoreError> {
        let conn = self.pool.get()?;
        let count = conn.query_row("SELECT COUNT(*) FROM query_history", [], |row| row.get(0))?;
        Ok(count)
    }

    fn load_records(&self, session_id: Option<&str>) -> Result<Vec<QueryRecord>, StoreError> {
        let conn = self.pool.get()?;

        let raw = match session_id {
            Some(id) => {
                let mut stmt = conn.prepare(&format!("{} WHERE session_id = ? ORDER BY id", SELECT_RECORDS_SQL))?;
                let records = stmt
                    .query_map([id], RawRecord::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                records
            }
            None => {
                let mut stmt = conn.prepare(&format!("{} ORDER BY id", SELECT_RECORDS_SQL))?;
                let records = stmt
                    .query_map([], RawRecord::from_row)?
                    .collect::<Result<Vec<_>, _>>()?;
                records
            }
        };

        raw.into_iter().map(RawRecord::decode).collect()
    }
}

struct RawRecord {
    id: i64,
    session_id: String,
    natural_query: String,
    sql_query: String,
    explanation: String,
    query_result: String,
    title: Option<String>,
    created_at: String,
}

impl RawRecord {
    fn from_row(row: &duckdb::Row<'_>) -> duckdb::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            session_id: row.get(1)?,
            natural_query: row.get(2)?,
            sql_query: row.get(3)?,
            explanation: row.get(4)?,
            query_result: row.get(5)?,
            title: row.get(6)?,
            created_at: row.get(7)?,
        })
    }

    // Results are decoded here once so callers never see a JSON string
    fn decode(self) -> Result<QueryRecord, StoreError> {
        Ok(QueryRecord {
            id: self.id,
            session_id: self.session_id,
            natural_query: self.natural_query,
            sql_query: self.sql_query,
            explanation: self.explanation,
            query_result: serde_json::from_str(&self.query_result)?,
            title: self.title,
            timestamp: DateTime::parse_from_rfc3339(&self.created_at)?.with_timezone(&Utc),
        })
    }
}

fn group_sessions(records: Vec<QueryRecord>) -> Vec<Session> {
    let mut sessions: Vec<Session> = Vec::new();
    let mut index: HashMap<String, usize> = HashMap::new();

    for record in records {
        match index.get(&record.session_id) {
            Some(&i) => sessions[i].queries.push(record),
            None => {
                index.insert(record.session_id.clone(), sessions.len());
                sessions.push(Session {
                    id: record.session_id.clone(),
                    queries: vec![record],
                });
            }
        }
    }

    sessions
}
