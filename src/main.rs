use clap::Parser;
use std::sync::Arc;
use tracing::{error, info};

use txt2sql::config::{AppConfig, CliArgs};
use txt2sql::db::db_pool::build_pool;
use txt2sql::db::executor::QueryExecutor;
use txt2sql::db::history::HistoryStore;
use txt2sql::db::schema_catalog::SchemaCatalog;
use txt2sql::llm::SqlGenerator;
use txt2sql::pipeline::QueryPipeline;
use txt2sql::util::logging::init_tracing;
use txt2sql::web::{self, state::AppState};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    // Parse command line arguments
    let args = CliArgs::parse();

    // Initialize logging
    init_tracing(args.log_json);

    // Load configuration
    let config = match AppConfig::new(&args) {
        Ok(config) => config,
        Err(e) => {
            error!("Failed to load configuration: {}", e);
            return Err(e.into());
        }
    };

    info!("Opening DuckDB database at {}", config.database.connection_string);
    let pool = build_pool(&config.database)?;

    let history = HistoryStore::new(pool.clone());
    if let Err(e) = history.init() {
        error!("Failed to initialize query history: {}", e);
        return Err(e.into());
    }

    // The catalog is loaded once; the service does not start without it
    info!("Loading schema catalog");
    let catalog_pool = pool.clone();
    let catalog = match tokio::task::spawn_blocking(move || SchemaCatalog::load(&catalog_pool)).await? {
        Ok(catalog) => Arc::new(catalog),
        Err(e) => {
            error!("Failed to load schema catalog: {}", e);
            return Err(e.into());
        }
    };
    info!("Schema catalog has {} tables", catalog.tables().len());

    info!("Initializing SQL generator with backend: {}", config.llm.backend);
    let generator = SqlGenerator::from_config(&config.llm)?;
    let executor = QueryExecutor::new(pool, config.executor.statement_timeout());

    let pipeline = QueryPipeline::new(catalog, generator, executor, history);
    let app_state = Arc::new(AppState::new(config.clone(), pipeline));

    // Start the web server
    info!("Starting txt2sql server on {}:{}", config.web.host, config.web.port);
    match web::run_server(config.web, app_state).await {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => {
            error!("Server error: {}", e);
            return Err(e);
        }
    }

    Ok(())
}
