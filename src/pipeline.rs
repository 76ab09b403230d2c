use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::db::executor::{ExecutionError, QueryExecutor};
use crate::db::history::{HistoryStore, NewQueryRecord, QueryRecord, Session, StoreError};
use crate::db::schema_catalog::SchemaCatalog;
use crate::llm::{GenerationError, SqlGenerator};
use crate::sql::{validate, ValidatedSql, ValidationError};

const TITLE_MAX_CHARS: usize = 60;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("{0}")]
    InvalidInput(String),
    #[error("SQL generation failed: {0}")]
    Generation(#[from] GenerationError),
    #[error("generated SQL was rejected: {0}")]
    Validation(#[from] ValidationError),
    #[error("SQL execution failed: {0}")]
    Execution(#[from] ExecutionError),
    #[error("could not save query history: {0}")]
    Store(#[from] StoreError),
}

/// SQL that passed validation, with the model's explanation.
#[derive(Debug, Clone)]
pub struct GeneratedQuery {
    pub sql: ValidatedSql,
    pub explanation: String,
}

/// Generate, validate, execute and record, in that order. Each stage fails
/// fast and nothing is recorded unless execution succeeded.
pub struct QueryPipeline {
    catalog: Arc<SchemaCatalog>,
    generator: SqlGenerator,
    executor: QueryExecutor,
    history: HistoryStore,
}

impl QueryPipeline {
    pub fn new(
        catalog: Arc<SchemaCatalog>,
        generator: SqlGenerator,
        executor: QueryExecutor,
        history: HistoryStore,
    ) -> Self {
        Self {
            catalog,
            generator,
            executor,
            history,
        }
    }

    pub fn catalog(&self) -> &SchemaCatalog {
        &self.catalog
    }

    pub async fn generate(&self, query: &str) -> Result<GeneratedQuery, PipelineError> {
        let query = require_query(query)?;

        let generated = self.generator.generate(query, &self.catalog).await?;
        let sql = validate(&generated.sql, &self.catalog).inspect_err(|e| {
            warn!("Rejected generated SQL ({}): {}", e, generated.sql);
        })?;

        Ok(GeneratedQuery {
            sql,
            explanation: generated.explanation,
        })
    }

    pub async fn execute(
        &self,
        query: &str,
        session_id: Option<&str>,
    ) -> Result<QueryRecord, PipelineError> {
        let query = require_query(query)?;
        let GeneratedQuery { sql, explanation } = self.generate(query).await?;

        let rows = self.executor.execute(&sql).await?;

        let history = self.history.clone();
        let natural_query = query.to_string();
        let session_id = session_id
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map(str::to_string);
        let title = derive_title(query);

        let record = tokio::task::spawn_blocking(move || {
            history.record(NewQueryRecord {
                session_id: session_id.as_deref(),
                natural_query: &natural_query,
                sql: &sql,
                explanation: &explanation,
                result: &rows,
                title: Some(&title),
            })
        })
        .await
        .map_err(StoreError::from)??;

        info!(
            "Recorded query {} in session {}",
            record.id, record.session_id
        );
        Ok(record)
    }

    pub async fn list_sessions(&self) -> Result<Vec<Session>, PipelineError> {
        let history = self.history.clone();
        let sessions = tokio::task::spawn_blocking(move || history.list_sessions())
            .await
            .map_err(StoreError::from)??;
        Ok(sessions)
    }

    pub async fn get_session(&self, session_id: &str) -> Result<Option<Session>, PipelineError> {
        let history = self.history.clone();
        let session_id = session_id.to_string();
        let session = tokio::task::spawn_blocking(move || history.get_session(&session_id))
            .await
            .map_err(StoreError::from)??;
        Ok(session)
    }

    pub async fn record_count(&self) -> Result<i64, PipelineError> {
        let history = self.history.clone();
        let count = tokio::task::spawn_blocking(move || history.record_count())
            .await
            .map_err(StoreError::from)??;
        Ok(count)
    }
}

fn require_query(query: &str) -> Result<&str, PipelineError> {
    let trimmed = query.trim();
    if trimmed.is_empty() {
        return Err(PipelineError::InvalidInput("Query cannot be empty".to_string()));
    }
    Ok(trimmed)
}

/// Short label for a history entry: the first line of the question, cut on a
/// word boundary when it is too long.
pub fn derive_title(query: &str) -> String {
    let first_line = query
        .lines()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or_default();

    if first_line.chars().count() <= TITLE_MAX_CHARS {
        return first_line.to_string();
    }

    let cut: String = first_line.chars().take(TITLE_MAX_CHARS).collect();
    let head = match cut.rfind(char::is_whitespace) {
        Some(idx) if idx > 0 => &cut[..idx],
        _ => cut.as_str(),
    };
    format!("{}...", head.trim_end())
}
