use arrow::datatypes::DataType;
use arrow::json::writer::JsonArray;
use arrow::json::WriterBuilder;
use arrow::record_batch::RecordBatch;
use serde_json::{Map, Value};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, error, info};

use crate::db::db_pool::DbPool;
use crate::sql::ValidatedSql;

/// One result row, columns in select-list order.
pub type Row = Map<String, Value>;

#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("query exceeded the {0:?} statement timeout")]
    Timeout(Duration),
    #[error("database rejected the query: {0}")]
    EngineRejected(String),
    #[error("no database connection available: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("column {column} has unsupported type {data_type}")]
    UnsupportedType { column: String, data_type: String },
    #[error("failed to serialize results: {0}")]
    Serialization(String),
    #[error("query task failed: {0}")]
    Task(#[from] tokio::task::JoinError),
}

impl From<duckdb::Error> for ExecutionError {
    fn from(err: duckdb::Error) -> Self {
        ExecutionError::EngineRejected(err.to_string())
    }
}

/// Runs validated statements on pooled connections.
#[derive(Clone)]
pub struct QueryExecutor {
    pool: DbPool,
    timeout: Duration,
}

impl QueryExecutor {
    pub fn new(pool: DbPool, timeout: Duration) -> Self {
        Self { pool, timeout }
    }

    /// Executes the statement under the configured timeout.
    ///
    /// The connection lives inside the blocking task and goes back to the
    /// pool when that task ends, whether it succeeded, failed or outlived the
    /// timeout. A timed-out query is not retried.
    ///
    /// The caller gets `Timeout` as soon as the budget runs out, but DuckDB
    /// cannot be interrupted from here: the statement keeps running and holds
    /// its pooled connection until it finishes. Enough slow queries at once
    /// can drain the pool, after which callers wait for
    /// `database.connection_timeout_secs` and get `Pool` errors.
    pub async fn execute(&self, sql: &ValidatedSql) -> Result<Vec<Row>, ExecutionError> {
        let pool = self.pool.clone();
        let sql_to_execute = sql.as_str().to_string();

        let task = tokio::task::spawn_blocking(move || -> Result<Vec<Row>, ExecutionError> {
            let start_time = Instant::now();
            let conn = pool.get()?;

            let mut stmt = conn.prepare(&sql_to_execute)?;
            let arrow = stmt.query_arrow([])?;
            let record_batches: Vec<RecordBatch> = arrow.collect();

            let rows = batches_to_rows(&record_batches)?;
            info!(
                "Query executed successfully. Row count: {}, Execution time: {}ms",
                rows.len(),
                start_time.elapsed().as_millis()
            );
            Ok(rows)
        });

        match tokio::time::timeout(self.timeout, task).await {
            Ok(joined) => joined?,
            Err(_) => {
                error!("Query timed out after {:?}: {}", self.timeout, sql);
                Err(ExecutionError::Timeout(self.timeout))
            }
        }
    }
}

/// Converts Arrow batches into JSON row maps, keeping nulls explicit.
pub fn batches_to_rows(batches: &[RecordBatch]) -> Result<Vec<Row>, ExecutionError> {
    let row_count: usize = batches.iter().map(|batch| batch.num_rows()).sum();
    if row_count == 0 {
        return Ok(Vec::new());
    }

    for field in batches[0].schema().fields() {
        if matches!(
            field.data_type(),
            DataType::Binary | DataType::LargeBinary | DataType::FixedSizeBinary(_) | DataType::BinaryView
        ) {
            return Err(ExecutionError::UnsupportedType {
                column: field.name().clone(),
                data_type: field.data_type().to_string(),
            });
        }
    }

    let mut writer = WriterBuilder::new()
        .with_explicit_nulls(true)
        .build::<_, JsonArray>(Vec::new());
    let batch_refs: Vec<&RecordBatch> = batches.iter().collect();
    writer
        .write_batches(&batch_refs)
        .map_err(|e| ExecutionError::Serialization(e.to_string()))?;
    writer
        .finish()
        .map_err(|e| ExecutionError::Serialization(e.to_string()))?;

    let buffer = writer.into_inner();
    debug!("Serialized {} bytes of row JSON", buffer.len());

    serde_json::from_slice(&buffer).map_err(|e| ExecutionError::Serialization(e.to_string()))
}
