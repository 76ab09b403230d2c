pub mod extract;
pub mod models;
pub mod prompt;
pub mod providers;

use crate::config::LlmConfig;
use crate::db::schema_catalog::SchemaCatalog;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, error, info};

pub use models::{GeneratedSql, Prompt};

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("LLM connection error: {0}")]
    ConnectionError(String),
    #[error("LLM response error: {0}")]
    ResponseError(String),
    #[error("LLM configuration error: {0}")]
    ConfigError(String),
}

#[derive(Debug, Error)]
pub enum GenerationError {
    #[error(transparent)]
    Provider(#[from] LlmError),
    #[error("language model did not answer within {0:?}")]
    Timeout(Duration),
    #[error("no SQL statement found in the model response")]
    Unparsable,
}

/// A text-completion capability. Tests substitute a deterministic stub.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn complete(&self, prompt: &Prompt) -> Result<String, LlmError>;
}

pub fn provider_from_config(config: &LlmConfig) -> Result<Arc<dyn LlmProvider>, LlmError> {
    let provider: Arc<dyn LlmProvider> = match config.backend.as_str() {
        "remote" => Arc::new(providers::remote::RemoteLlmProvider::new(config)?),
        "ollama" => Arc::new(providers::ollama::OllamaProvider::new(config)?),
        _ => {
            return Err(LlmError::ConfigError(format!(
                "Unsupported LLM backend: {}",
                config.backend
            )))
        }
    };

    Ok(provider)
}

/// Turns a question into `(sql, explanation)` through a language model.
pub struct SqlGenerator {
    provider: Arc<dyn LlmProvider>,
    timeout: Duration,
}

impl SqlGenerator {
    pub fn new(provider: Arc<dyn LlmProvider>, timeout: Duration) -> Self {
        Self { provider, timeout }
    }

    pub fn from_config(config: &LlmConfig) -> Result<Self, LlmError> {
        Ok(Self::new(provider_from_config(config)?, config.timeout()))
    }

    pub async fn generate(
        &self,
        question: &str,
        catalog: &SchemaCatalog,
    ) -> Result<GeneratedSql, GenerationError> {
        let prompt = prompt::build_prompt(question, catalog);
        debug!("Prepared LLM prompt: {}", prompt.user);

        let content = match tokio::time::timeout(self.timeout, self.provider.complete(&prompt)).await {
            Ok(result) => result?,
            Err(_) => {
                error!("LLM call timed out after {:?}", self.timeout);
                return Err(GenerationError::Timeout(self.timeout));
            }
        };

        let generated = extract::parse_response(&content).ok_or_else(|| {
            error!("Could not find SQL in model response: {}", content);
            GenerationError::Unparsable
        })?;

        info!("Generated SQL: {}", generated.sql);
        Ok(generated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::schema_catalog::SchemaDescriptor;
    use std::sync::Mutex;

    struct FixedLlm {
        reply: String,
        seen: Mutex<Vec<Prompt>>,
    }

    #[async_trait]
    impl LlmProvider for FixedLlm {
        async fn complete(&self, prompt: &Prompt) -> Result<String, LlmError> {
            self.seen.lock().unwrap().push(prompt.clone());
            Ok(self.reply.clone())
        }
    }

    struct SlowLlm;

    #[async_trait]
    impl LlmProvider for SlowLlm {
        async fn complete(&self, _prompt: &Prompt) -> Result<String, LlmError> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("SELECT 1".to_string())
        }
    }

    struct BrokenLlm;

    #[async_trait]
    impl LlmProvider for BrokenLlm {
        async fn complete(&self, _prompt: &Prompt) -> Result<String, LlmError> {
            Err(LlmError::ConnectionError("refused".to_string()))
        }
    }

    fn catalog() -> SchemaCatalog {
        SchemaCatalog::new(vec![SchemaDescriptor::new(
            "Products",
            "Category1",
            "Women, Men or Kids",
        )])
    }

    #[tokio::test]
    async fn test_generate_parses_sql_and_explanation() {
        let llm = Arc::new(FixedLlm {
            reply: "Filter products on the women's category.\n```sql\nSELECT * FROM Products WHERE Category1 = 'Women'\n```".to_string(),
            seen: Mutex::new(Vec::new()),
        });
        let generator = SqlGenerator::new(llm.clone(), Duration::from_secs(1));

        let generated = generator.generate("Show me all women's products", &catalog()).await.unwrap();
        assert_eq!(generated.sql, "SELECT * FROM Products WHERE Category1 = 'Women'");
        assert_eq!(generated.explanation, "Filter products on the women's category.");

        let seen = llm.seen.lock().unwrap();
        assert!(seen[0].user.contains("Show me all women's products"));
        assert!(seen[0].user.contains("Category1: Women, Men or Kids"));
    }

    #[tokio::test]
    async fn test_unparsable_reply() {
        let llm = Arc::new(FixedLlm {
            reply: "I am not sure what you mean.".to_string(),
            seen: Mutex::new(Vec::new()),
        });
        let generator = SqlGenerator::new(llm, Duration::from_secs(1));
        let err = generator.generate("hmm", &catalog()).await.unwrap_err();
        assert!(matches!(err, GenerationError::Unparsable));
    }

    #[tokio::test]
    async fn test_timeout() {
        let generator = SqlGenerator::new(Arc::new(SlowLlm), Duration::from_millis(100));
        let err = generator.generate("anything", &catalog()).await.unwrap_err();
        assert!(matches!(err, GenerationError::Timeout(_)));
    }

    #[tokio::test]
    async fn test_provider_errors_pass_through() {
        let generator = SqlGenerator::new(Arc::new(BrokenLlm), Duration::from_secs(1));
        let err = generator.generate("anything", &catalog()).await.unwrap_err();
        assert!(matches!(err, GenerationError::Provider(LlmError::ConnectionError(_))));
    }

    #[test]
    fn test_unknown_backend_is_config_error() {
        let mut config = crate::config::AppConfig::default().llm;
        config.backend = "local".to_string();
        assert!(matches!(
            provider_from_config(&config),
            Err(LlmError::ConfigError(_))
        ));
    }
}
