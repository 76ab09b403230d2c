use sqlparser::ast::{
    Expr, Ident, ObjectName, Query, SelectItem, SetExpr, Statement, TableFactor, Visit, Visitor,
};
use sqlparser::dialect::DuckDbDialect;
use sqlparser::parser::Parser;
use sqlparser::tokenizer::{Token, Tokenizer, Whitespace};
use std::collections::HashSet;
use std::fmt;
use std::ops::ControlFlow;
use thiserror::Error;
use tracing::debug;

use crate::db::schema_catalog::SchemaCatalog;

/// Verbs that can change data, schema or engine state, plus `INTO`
/// (`SELECT ... INTO` creates a table).
const FORBIDDEN_KEYWORDS: &[&str] = &[
    "INSERT", "UPDATE", "DELETE", "DROP", "ALTER", "CREATE", "TRUNCATE", "MERGE", "INTO",
    "ATTACH", "DETACH", "COPY", "PRAGMA", "INSTALL", "LOAD", "EXPORT", "IMPORT", "GRANT",
    "REVOKE", "CALL", "SET",
];

/// Functions that advance sequences, reseed, or read engine, host or file state.
const FORBIDDEN_FUNCTIONS: &[&str] = &[
    "nextval",
    "currval",
    "setval",
    "setseed",
    "current_setting",
    "getenv",
    "query",
    "query_table",
    "glob",
    "current_database",
    "current_schema",
    "current_schemas",
];

const FORBIDDEN_FUNCTION_PREFIXES: &[&str] = &["duckdb_", "pragma_", "read_", "sqlite_", "parquet_"];

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("query is empty")]
    Empty,
    #[error("could not parse SQL: {0}")]
    Unparsable(String),
    #[error("only a single SQL statement is allowed")]
    MultipleStatements,
    #[error("SQL comments are not allowed")]
    Comment,
    #[error("statement contains forbidden keyword {0}")]
    ForbiddenKeyword(String),
    #[error("function {0} is not allowed")]
    ForbiddenFunction(String),
    #[error("only read-only SELECT statements are allowed")]
    NotReadOnly,
    #[error("unknown table or column: {0}")]
    UnknownIdentifier(String),
}

/// SQL that passed [`validate`]. Only the validator can build one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedSql(String);

impl ValidatedSql {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_inner(self) -> String {
        self.0
    }
}

impl fmt::Display for ValidatedSql {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Pass/fail gate in front of the executor. The statement is returned
/// unchanged on success.
pub fn validate(sql: &str, catalog: &SchemaCatalog) -> Result<ValidatedSql, ValidationError> {
    if sql.trim().is_empty() {
        return Err(ValidationError::Empty);
    }

    let dialect = DuckDbDialect {};
    let tokens = Tokenizer::new(&dialect, sql)
        .tokenize()
        .map_err(|e| ValidationError::Unparsable(e.to_string()))?;

    check_tokens(&tokens)?;

    let statements =
        Parser::parse_sql(&dialect, sql).map_err(|e| ValidationError::Unparsable(e.to_string()))?;
    let statement = match statements.as_slice() {
        [statement @ Statement::Query(_)] => statement,
        [_] => return Err(ValidationError::NotReadOnly),
        [] => return Err(ValidationError::Empty),
        _ => return Err(ValidationError::MultipleStatements),
    };

    let mut aliases = AliasCollector::default();
    let _ = statement.visit(&mut aliases);

    let mut checker = ReferenceChecker {
        catalog,
        aliases: &aliases.names,
        cte_scopes: Vec::new(),
    };
    if let ControlFlow::Break(err) = statement.visit(&mut checker) {
        return Err(err);
    }

    debug!("SQL passed validation: {}", sql);
    Ok(ValidatedSql(sql.to_string()))
}

fn check_tokens(tokens: &[Token]) -> Result<(), ValidationError> {
    for (i, token) in tokens.iter().enumerate() {
        match token {
            Token::Whitespace(Whitespace::SingleLineComment { .. })
            | Token::Whitespace(Whitespace::MultiLineComment(_)) => {
                return Err(ValidationError::Comment);
            }
            Token::SemiColon => {
                // A single trailing terminator is fine
                if tokens[i + 1..].iter().any(|t| !is_blank(t)) {
                    return Err(ValidationError::MultipleStatements);
                }
            }
            Token::Word(word) if word.quote_style.is_none() => {
                let upper = word.value.to_uppercase();
                if FORBIDDEN_KEYWORDS.contains(&upper.as_str()) {
                    return Err(ValidationError::ForbiddenKeyword(upper));
                }
            }
            _ => {}
        }
    }
    Ok(())
}

fn is_blank(token: &Token) -> bool {
    matches!(token, Token::Whitespace(_) | Token::SemiColon | Token::EOF)
}

/// Table aliases and select-list aliases defined anywhere in the statement.
#[derive(Default)]
struct AliasCollector {
    names: HashSet<String>,
}

impl AliasCollector {
    fn collect_projection(&mut self, body: &SetExpr) {
        match body {
            SetExpr::Select(select) => {
                for item in &select.projection {
                    if let SelectItem::ExprWithAlias { alias, .. } = item {
                        self.names.insert(alias.value.clone());
                    }
                }
            }
            SetExpr::SetOperation { left, right, .. } => {
                self.collect_projection(left);
                self.collect_projection(right);
            }
            SetExpr::Query(query) => self.collect_projection(&query.body),
            _ => {}
        }
    }
}

impl Visitor for AliasCollector {
    type Break = ();

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<()> {
        self.collect_projection(&query.body);
        ControlFlow::Continue(())
    }

    fn pre_visit_table_factor(&mut self, table_factor: &TableFactor) -> ControlFlow<()> {
        let alias = match table_factor {
            TableFactor::Table { alias, .. }
            | TableFactor::Derived { alias, .. }
            | TableFactor::NestedJoin { alias, .. } => alias,
            _ => &None,
        };
        if let Some(alias) = alias {
            self.names.insert(alias.name.value.clone());
        }
        ControlFlow::Continue(())
    }
}

/// Checks every relation, column reference and function call. CTE names
/// are only visible inside the query that declares them.
struct ReferenceChecker<'a> {
    catalog: &'a SchemaCatalog,
    aliases: &'a HashSet<String>,
    cte_scopes: Vec<HashSet<String>>,
}

impl ReferenceChecker<'_> {
    fn cte_in_scope(&self, name: &str) -> bool {
        self.cte_scopes.iter().any(|scope| scope.contains(name))
    }

    fn known_column(&self, name: &str) -> bool {
        self.catalog.has_column(name) || self.aliases.contains(name)
    }

    fn known_qualifier(&self, name: &str) -> bool {
        self.catalog.has_table(name) || self.aliases.contains(name) || self.cte_in_scope(name)
    }

    fn check_function(&self, name: &ObjectName) -> ControlFlow<ValidationError> {
        let [ident] = name.0.as_slice() else {
            return ControlFlow::Break(ValidationError::UnknownIdentifier(name.to_string()));
        };

        let lower = ident.value.to_lowercase();
        if FORBIDDEN_FUNCTIONS.contains(&lower.as_str())
            || FORBIDDEN_FUNCTION_PREFIXES.iter().any(|prefix| lower.starts_with(prefix))
        {
            return ControlFlow::Break(ValidationError::ForbiddenFunction(ident.value.clone()));
        }
        ControlFlow::Continue(())
    }
}

impl Visitor for ReferenceChecker<'_> {
    type Break = ValidationError;

    fn pre_visit_query(&mut self, query: &Query) -> ControlFlow<ValidationError> {
        let names = query
            .with
            .iter()
            .flat_map(|with| with.cte_tables.iter())
            .map(|cte| cte.alias.name.value.clone())
            .collect();
        self.cte_scopes.push(names);
        ControlFlow::Continue(())
    }

    fn post_visit_query(&mut self, _query: &Query) -> ControlFlow<ValidationError> {
        self.cte_scopes.pop();
        ControlFlow::Continue(())
    }

    // Anything read from must be a catalog table or a CTE in scope
    fn pre_visit_relation(&mut self, relation: &ObjectName) -> ControlFlow<ValidationError> {
        match relation.0.as_slice() {
            [ident] if self.catalog.has_table(&ident.value) || self.cte_in_scope(&ident.value) => {
                ControlFlow::Continue(())
            }
            _ => ControlFlow::Break(ValidationError::UnknownIdentifier(relation.to_string())),
        }
    }

    fn pre_visit_expr(&mut self, expr: &Expr) -> ControlFlow<ValidationError> {
        match expr {
            Expr::Identifier(ident) if !self.known_column(&ident.value) => {
                ControlFlow::Break(ValidationError::UnknownIdentifier(ident.value.clone()))
            }
            Expr::CompoundIdentifier(parts) => match parts.as_slice() {
                [qualifier, column]
                    if self.known_qualifier(&qualifier.value) && self.known_column(&column.value) =>
                {
                    ControlFlow::Continue(())
                }
                _ => ControlFlow::Break(ValidationError::UnknownIdentifier(join_idents(parts))),
            },
            Expr::Function(function) => self.check_function(&function.name),
            _ => ControlFlow::Continue(()),
        }
    }
}

fn join_idents(parts: &[Ident]) -> String {
    parts
        .iter()
        .map(|ident| ident.value.as_str())
        .collect::<Vec<_>>()
        .join(".")
}
