use async_trait::async_trait;
use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

use txt2sql::config::AppConfig;
use txt2sql::db::db_pool::in_memory_pool;
use txt2sql::db::executor::QueryExecutor;
use txt2sql::db::history::HistoryStore;
use txt2sql::db::schema_catalog::SchemaCatalog;
use txt2sql::llm::{LlmError, LlmProvider, Prompt, SqlGenerator};
use txt2sql::pipeline::QueryPipeline;
use txt2sql::web::{self, state::AppState};

/// Answers known questions with canned replies, like a well-behaved model.
struct CannedLlm;

#[async_trait]
impl LlmProvider for CannedLlm {
    async fn complete(&self, prompt: &Prompt) -> Result<String, LlmError> {
        let reply = if prompt.user.contains("Show me all women's products") {
            "This selects every product in the Women category.\n```sql\nSELECT * FROM Products WHERE Category1 = 'Women' ORDER BY ProductId\n```"
        } else if prompt.user.contains("drop all products") {
            "```sql\nDROP TABLE Products\n```"
        } else if prompt.user.contains("How many products") {
            "Counts all products.\n```sql\nSELECT COUNT(*) AS total FROM Products\n```"
        } else {
            "I do not know how to answer that."
        };
        Ok(reply.to_string())
    }
}

fn app() -> Router {
    let pool = in_memory_pool(4).unwrap();
    pool.get()
        .unwrap()
        .execute_batch(
            "CREATE TABLE Products (
                ProductId INTEGER,
                Name VARCHAR,
                Category1 VARCHAR,
                Price DOUBLE,
                Discontinued BOOLEAN
            );
            INSERT INTO Products VALUES
                (1, 'Silk Scarf', 'Women', 19.5, false),
                (2, 'Denim Jacket', 'Men', 59.0, false),
                (3, 'Rain Boots', 'Kids', 25.0, true),
                (4, 'Linen Dress', 'Women', NULL, false);",
        )
        .unwrap();

    let history = HistoryStore::new(pool.clone());
    history.init().unwrap();
    let catalog = Arc::new(SchemaCatalog::load(&pool).unwrap());

    let pipeline = QueryPipeline::new(
        catalog,
        SqlGenerator::new(Arc::new(CannedLlm), Duration::from_secs(2)),
        QueryExecutor::new(pool, Duration::from_secs(5)),
        history,
    );
    web::router(Arc::new(AppState::new(AppConfig::default(), pipeline)))
}

async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
    let request = Request::builder().method(method).uri(uri);
    let request = match body {
        Some(body) => request
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => request.body(Body::empty()).unwrap(),
    };

    let response = app.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap()
    };
    (status, value)
}

#[tokio::test]
async fn test_womens_products_end_to_end() {
    let app = app();

    let (status, body) = send(
        &app,
        "POST",
        "/execute-sql",
        Some(json!({"query": "Show me all women's products"})),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        body["sql_query"],
        "SELECT * FROM Products WHERE Category1 = 'Women' ORDER BY ProductId"
    );
    assert_eq!(body["explanation"], "This selects every product in the Women category.");
    assert_eq!(body["title"], "Show me all women's products");
    assert_eq!(
        body["results"],
        json!([
            {"ProductId": 1, "Name": "Silk Scarf", "Category1": "Women", "Price": 19.5, "Discontinued": false},
            {"ProductId": 4, "Name": "Linen Dress", "Category1": "Women", "Price": null, "Discontinued": false}
        ])
    );

    let session_id = body["session_id"].as_str().unwrap().to_string();
    assert!(!session_id.is_empty());

    let (status, sessions) = send(&app, "GET", "/sessions", None).await;
    assert_eq!(status, StatusCode::OK);
    let sessions = sessions.as_array().unwrap();
    assert_eq!(sessions.len(), 1);
    assert_eq!(sessions[0]["id"], session_id);

    let record = &sessions[0]["queries"][0];
    assert_eq!(record["natural_query"], "Show me all women's products");
    assert_eq!(record["gpt_explanation"], "This selects every product in the Women category.");
    // Stored results come back as a JSON array, not a string
    assert!(record["query_result"].is_array());
    assert_eq!(record["query_result"], body["results"]);
}

#[tokio::test]
async fn test_destructive_request_is_rejected_and_not_recorded() {
    let app = app();

    let (status, body) = send(
        &app,
        "POST",
        "/execute-sql",
        Some(json!({"query": "drop all products", "session_id": "S1"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("DROP"));

    let (status, _) = send(&app, "GET", "/sessions/S1", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    // The table is still there
    let (status, body) = send(
        &app,
        "POST",
        "/execute-sql",
        Some(json!({"query": "How many products are there?"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["results"], json!([{"total": 4}]));
}

#[tokio::test]
async fn test_empty_query_is_bad_request() {
    let app = app();

    for payload in [json!({"query": ""}), json!({"query": "   "}), json!({})] {
        let (status, body) = send(&app, "POST", "/execute-sql", Some(payload)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["error"].is_string());
    }

    let (status, body) = send(&app, "POST", "/generate-sql", Some(json!({"query": ""}))).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].is_string());

    let (_, sessions) = send(&app, "GET", "/sessions", None).await;
    assert_eq!(sessions, json!([]));
}

#[tokio::test]
async fn test_session_keeps_insertion_order() {
    let app = app();

    let (_, first) = send(
        &app,
        "POST",
        "/execute-sql",
        Some(json!({"query": "How many products are there?", "session_id": "S7"})),
    )
    .await;
    assert_eq!(first["session_id"], "S7");

    let (_, second) = send(
        &app,
        "POST",
        "/execute-sql",
        Some(json!({"query": "Show me all women's products", "session_id": "S7"})),
    )
    .await;
    assert_eq!(second["session_id"], "S7");

    let (status, session) = send(&app, "GET", "/sessions/S7", None).await;
    assert_eq!(status, StatusCode::OK);
    let queries = session["queries"].as_array().unwrap();
    assert_eq!(queries.len(), 2);
    assert_eq!(queries[0]["natural_query"], "How many products are there?");
    assert_eq!(queries[1]["natural_query"], "Show me all women's products");
    assert!(queries[0]["id"].as_i64().unwrap() < queries[1]["id"].as_i64().unwrap());

    let (_, sessions) = send(&app, "GET", "/sessions", None).await;
    assert_eq!(sessions.as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn test_generate_sql_does_not_record() {
    let app = app();

    let (status, body) = send(
        &app,
        "POST",
        "/generate-sql",
        Some(json!({"query": "How many products are there?"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["query"], "SELECT COUNT(*) AS total FROM Products");
    assert_eq!(body["sql_query"], body["query"]);
    assert_eq!(body["explanation"], "Counts all products.");

    let (status, _) = send(
        &app,
        "POST",
        "/generate-sql",
        Some(json!({"query": "What is the meaning of life?"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (_, status_body) = send(&app, "GET", "/status", None).await;
    assert_eq!(status_body["record_count"], 0);
    assert_eq!(status_body["table_count"], 1);
}

#[tokio::test]
async fn test_schema_lists_introspected_columns() {
    let app = app();

    let (status, body) = send(&app, "GET", "/schema", None).await;
    assert_eq!(status, StatusCode::OK);
    let columns: Vec<&str> = body
        .as_array()
        .unwrap()
        .iter()
        .map(|d| d["column_name"].as_str().unwrap())
        .collect();
    assert_eq!(columns, ["ProductId", "Name", "Category1", "Price", "Discontinued"]);
    assert_eq!(body[0]["table_name"], "Products");
}

#[tokio::test]
async fn test_root_lists_endpoints() {
    let app = app();

    let (status, body) = send(&app, "GET", "/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "txt2sql");

    let endpoints = body["endpoints"].as_array().unwrap();
    assert!(endpoints.iter().all(|e| {
        e["path"].is_string() && e["method"].is_string() && e["description"].is_string()
    }));
    assert!(endpoints.contains(&json!({
        "path": "/execute-sql",
        "method": "POST",
        "description": "Execute natural language query"
    })));
}
