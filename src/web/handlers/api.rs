use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Arc;
use tracing::{error, info, warn};

use crate::db::history::Session;
use crate::db::schema_catalog::SchemaDescriptor;
use crate::llm::GenerationError;
use crate::pipeline::PipelineError;
use crate::web::state::AppState;

// Request and response types

#[derive(Debug, Deserialize)]
pub struct QueryRequest {
    // Missing and empty are both rejected as invalid input
    #[serde(default)]
    pub query: String,
    #[serde(default)]
    pub session_id: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct GenerateSqlResponse {
    /// The generated SQL, under the key older clients read
    pub query: String,
    pub sql_query: String,
    pub explanation: String,
}

#[derive(Debug, Serialize)]
pub struct ExecuteSqlResponse {
    pub explanation: String,
    pub sql_query: String,
    pub results: Value,
    pub session_id: String,
    pub title: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct SystemStatus {
    pub version: String,
    pub uptime_seconds: i64,
    pub table_count: usize,
    pub session_count: usize,
    pub record_count: i64,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

// Errors

#[derive(Debug)]
pub enum ApiError {
    Pipeline(PipelineError),
    NotFound(String),
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        ApiError::Pipeline(err)
    }
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::NotFound(_) => StatusCode::NOT_FOUND,
            ApiError::Pipeline(err) => match err {
                PipelineError::InvalidInput(_)
                | PipelineError::Validation(_)
                | PipelineError::Generation(GenerationError::Unparsable) => StatusCode::BAD_REQUEST,
                PipelineError::Generation(_)
                | PipelineError::Execution(_)
                | PipelineError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            },
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = match &self {
            ApiError::Pipeline(err) => err.to_string(),
            ApiError::NotFound(message) => message.clone(),
        };

        if status.is_server_error() {
            error!("Request failed: {}", message);
        } else {
            warn!("Request rejected ({}): {}", status, message);
        }

        (status, Json(ErrorResponse { error: message })).into_response()
    }
}

// API Implementations

#[derive(Debug, Serialize)]
pub struct EndpointInfo {
    pub path: &'static str,
    pub method: &'static str,
    pub description: &'static str,
}

const ENDPOINTS: &[EndpointInfo] = &[
    EndpointInfo { path: "/", method: "GET", description: "This information" },
    EndpointInfo { path: "/generate-sql", method: "POST", description: "Generate SQL from natural language" },
    EndpointInfo { path: "/execute-sql", method: "POST", description: "Execute natural language query" },
    EndpointInfo { path: "/sessions", method: "GET", description: "Get all query sessions" },
    EndpointInfo { path: "/sessions/{id}", method: "GET", description: "Get one query session" },
    EndpointInfo { path: "/schema", method: "GET", description: "Tables and columns the generator may use" },
    EndpointInfo { path: "/status", method: "GET", description: "Uptime and history counts" },
];

pub async fn root() -> Json<Value> {
    Json(serde_json::json!({
        "name": env!("CARGO_PKG_NAME"),
        "version": env!("CARGO_PKG_VERSION"),
        "endpoints": ENDPOINTS,
    }))
}

pub async fn generate_sql(
    state: State<Arc<AppState>>,
    Json(payload): Json<QueryRequest>,
) -> Result<Json<GenerateSqlResponse>, ApiError> {
    info!("Generating SQL for: {}", payload.query);

    let generated = state.pipeline.generate(&payload.query).await?;
    let sql = generated.sql.into_inner();

    Ok(Json(GenerateSqlResponse {
        query: sql.clone(),
        sql_query: sql,
        explanation: generated.explanation,
    }))
}

pub async fn execute_sql(
    state: State<Arc<AppState>>,
    Json(payload): Json<QueryRequest>,
) -> Result<Json<ExecuteSqlResponse>, ApiError> {
    info!(
        "Executing natural language query (session {:?}): {}",
        payload.session_id, payload.query
    );

    let record = state
        .pipeline
        .execute(&payload.query, payload.session_id.as_deref())
        .await?;

    Ok(Json(ExecuteSqlResponse {
        explanation: record.explanation,
        sql_query: record.sql_query,
        results: record.query_result,
        session_id: record.session_id,
        title: record.title,
    }))
}

pub async fn list_sessions(state: State<Arc<AppState>>) -> Result<Json<Vec<Session>>, ApiError> {
    Ok(Json(state.pipeline.list_sessions().await?))
}

pub async fn get_session(
    state: State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<Session>, ApiError> {
    match state.pipeline.get_session(&id).await? {
        Some(session) => Ok(Json(session)),
        None => Err(ApiError::NotFound(format!("Session '{}' not found", id))),
    }
}

pub async fn get_schema(state: State<Arc<AppState>>) -> Json<Vec<SchemaDescriptor>> {
    Json(state.pipeline.catalog().describe().to_vec())
}

pub async fn system_status(state: State<Arc<AppState>>) -> Result<Json<SystemStatus>, ApiError> {
    let now = chrono::Utc::now();
    let uptime = now.signed_duration_since(state.startup_time).num_seconds();

    let session_count = state.pipeline.list_sessions().await?.len();
    let record_count = state.pipeline.record_count().await?;

    Ok(Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime,
        table_count: state.pipeline.catalog().tables().len(),
        session_count,
        record_count,
    }))
}
