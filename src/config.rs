use clap::Parser;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DatabaseConfig {
    pub connection_string: String,
    pub pool_size: usize,
    pub connection_timeout_secs: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct WebConfig {
    pub host: String,
    pub port: u16,
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct LlmConfig {
    pub backend: String, // "remote" or "ollama"
    pub model: String,
    pub api_key: Option<String>,
    pub api_url: Option<String>,
    pub timeout_secs: u64,
    pub temperature: f32,
}

impl LlmConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct ExecutorConfig {
    pub statement_timeout_secs: u64,
}

impl ExecutorConfig {
    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.statement_timeout_secs)
    }
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub web: WebConfig,
    pub llm: LlmConfig,
    pub executor: ExecutorConfig,
}

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct CliArgs {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Host to bind to
    #[arg(long)]
    pub host: Option<String>,

    /// Port to bind to
    #[arg(short, long)]
    pub port: Option<u16>,

    /// DuckDB database file holding the data, catalog and query history
    #[arg(long, value_name = "FILE")]
    pub database: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    pub log_json: bool,
}

impl AppConfig {
    pub fn new(args: &CliArgs) -> Result<Self, ConfigError> {
        // Defaults first so a partial file only overrides what it names
        let mut config_builder = Config::builder().add_source(Config::try_from(&AppConfig::default())?);

        if let Some(config_path) = &args.config {
            config_builder = config_builder.add_source(File::from(config_path.as_path()));
        } else {
            let default_locations = vec![
                "config.toml",
                "config/config.toml",
                "/etc/txt2sql/config.toml",
            ];

            for location in default_locations {
                if Path::new(location).exists() {
                    config_builder =
                        config_builder.add_source(File::new(location, config::FileFormat::Toml));
                    break;
                }
            }
        }

        // TXT2SQL__LLM__API_KEY=... style overrides
        config_builder = config_builder.add_source(
            Environment::with_prefix("TXT2SQL")
                .prefix_separator("__")
                .separator("__"),
        );

        let mut config: AppConfig = config_builder.build()?.try_deserialize()?;

        // Override with command line args if provided
        if let Some(host) = &args.host {
            config.web.host = host.clone();
        }
        if let Some(port) = args.port {
            config.web.port = port;
        }
        if let Some(database) = &args.database {
            config.database.connection_string = database.clone();
        }

        Ok(config)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                connection_string: "txt2sql.duckdb".to_string(),
                pool_size: 5,
                connection_timeout_secs: 5,
            },
            web: WebConfig {
                host: "127.0.0.1".to_string(),
                port: 8000,
                cors_origins: vec![
                    "http://localhost:3000".to_string(),
                    "http://localhost:3001".to_string(),
                ],
            },
            llm: LlmConfig {
                backend: "remote".to_string(),
                model: "gpt-4o".to_string(),
                api_key: None,
                api_url: Some("https://api.openai.com/v1/chat/completions".to_string()),
                timeout_secs: 60,
                temperature: 0.1,
            },
            executor: ExecutorConfig {
                statement_timeout_secs: 30,
            },
        }
    }
}
