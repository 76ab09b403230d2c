use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use thiserror::Error;
use tracing::{info, warn};

use crate::db::db_pool::DbPool;

/// Table holding the human-readable column descriptions
pub const DESCRIPTIONS_TABLE: &str = "schema_descriptions";

const CREATE_DESCRIPTIONS_TABLE_SQL: &str = "
    CREATE TABLE IF NOT EXISTS schema_descriptions (
        table_name VARCHAR NOT NULL,
        column_name VARCHAR NOT NULL,
        description VARCHAR NOT NULL DEFAULT '',
        PRIMARY KEY (table_name, column_name)
    );
";

// rowid keeps the columns in the order they were described
const SELECT_DESCRIPTIONS_SQL: &str = "
    SELECT table_name, column_name, description
    FROM schema_descriptions
    ORDER BY table_name, rowid
";

const INTROSPECT_COLUMNS_SQL: &str = "
    SELECT table_name, column_name, data_type
    FROM information_schema.columns
    WHERE table_schema = 'main'
      AND table_name NOT IN ('schema_descriptions', 'query_history')
    ORDER BY table_name, ordinal_position
";

#[derive(Debug, Error)]
pub enum CatalogError {
    #[error("catalog connection error: {0}")]
    Pool(#[from] r2d2::Error),
    #[error("catalog query failed: {0}")]
    Database(#[from] duckdb::Error),
    #[error("catalog is empty: describe at least one table in schema_descriptions")]
    Empty,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchemaDescriptor {
    pub table_name: String,
    pub column_name: String,
    pub description: String,
}

impl SchemaDescriptor {
    pub fn new(table_name: &str, column_name: &str, description: &str) -> Self {
        Self {
            table_name: table_name.to_string(),
            column_name: column_name.to_string(),
            description: description.to_string(),
        }
    }
}

/// Known tables and columns, loaded once and shared read-only afterwards.
///
/// Lookups are exact: the catalog's spelling is the only accepted spelling.
#[derive(Debug, Clone)]
pub struct SchemaCatalog {
    descriptors: Vec<SchemaDescriptor>,
    tables: Vec<String>,
    table_set: HashSet<String>,
    column_set: HashSet<String>,
}

impl SchemaCatalog {
    pub fn new(descriptors: Vec<SchemaDescriptor>) -> Self {
        let mut tables = Vec::new();
        let mut table_set = HashSet::new();
        let mut column_set = HashSet::new();

        for descriptor in &descriptors {
            if table_set.insert(descriptor.table_name.clone()) {
                tables.push(descriptor.table_name.clone());
            }
            column_set.insert(descriptor.column_name.clone());
        }

        Self {
            descriptors,
            tables,
            table_set,
            column_set,
        }
    }

    /// Loads the catalog from the descriptions table, falling back to the
    /// engine's own column metadata when no descriptions were written.
    pub fn load(pool: &DbPool) -> Result<Self, CatalogError> {
        let conn = pool.get()?;
        conn.execute_batch(CREATE_DESCRIPTIONS_TABLE_SQL)?;

        let mut stmt = conn.prepare(SELECT_DESCRIPTIONS_SQL)?;
        let mut descriptors = stmt
            .query_map([], |row| {
                Ok(SchemaDescriptor {
                    table_name: row.get(0)?,
                    column_name: row.get(1)?,
                    description: row.get(2)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        if descriptors.is_empty() {
            warn!("No rows in {}, introspecting column metadata instead", DESCRIPTIONS_TABLE);
            let mut stmt = conn.prepare(INTROSPECT_COLUMNS_SQL)?;
            descriptors = stmt
                .query_map([], |row| {
                    Ok(SchemaDescriptor {
                        table_name: row.get(0)?,
                        column_name: row.get(1)?,
                        description: row.get(2)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
        }

        if descriptors.is_empty() {
            return Err(CatalogError::Empty);
        }

        let catalog = Self::new(descriptors);
        info!(
            "Loaded schema catalog: {} tables, {} columns",
            catalog.tables.len(),
            catalog.descriptors.len()
        );
        Ok(catalog)
    }

    pub fn describe(&self) -> &[SchemaDescriptor] {
        &self.descriptors
    }

    pub fn tables(&self) -> &[String] {
        &self.tables
    }

    pub fn has_table(&self, name: &str) -> bool {
        self.table_set.contains(name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_set.contains(name)
    }

    /// Schema context handed to the language model.
    pub fn render_for_prompt(&self) -> String {
        let mut out = String::new();

        for table in &self.tables {
            out.push_str(&format!("Table: {}\n", table));
            for descriptor in self.descriptors.iter().filter(|d| &d.table_name == table) {
                if descriptor.description.is_empty() {
                    out.push_str(&format!("  - {}\n", descriptor.column_name));
                } else {
                    out.push_str(&format!(
                        "  - {}: {}\n",
                        descriptor.column_name, descriptor.description
                    ));
                }
            }
            out.push('\n');
        }

        out
    }
}
