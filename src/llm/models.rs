use serde::{Deserialize, Serialize};

/// What is sent to a provider. Chat-style backends send the two parts as
/// separate messages; completion-style backends concatenate them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

// Output from SQL generation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedSql {
    pub sql: String,
    pub explanation: String,
}
