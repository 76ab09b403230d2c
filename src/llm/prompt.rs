use crate::db::schema_catalog::SchemaCatalog;
use crate::llm::models::Prompt;

const SYSTEM_PROMPT: &str = "\
You are a SQL query converter for a DuckDB database.
Adhere to these rules:
- Produce exactly ONE read-only SELECT statement (a WITH ... SELECT is fine)
- Never write INSERT, UPDATE, DELETE, DROP, ALTER, CREATE or any other statement that changes data or schema
- Use only the tables and columns listed in the schema
- Table names, column names and category values are case sensitive: use the exact spelling from the schema
- Do not add SQL comments
- Use UPPERCASE for SQL keywords
- First give a short plain-English explanation of what the query does, then the query in a ```sql code block";

pub fn build_prompt(question: &str, catalog: &SchemaCatalog) -> Prompt {
    let user = format!(
        r#"### Database Schema:
{}
### Question:
{}

### Response:
A short explanation, followed by the SQL in a ```sql block."#,
        catalog.render_for_prompt(),
        question.trim()
    );

    Prompt {
        system: SYSTEM_PROMPT.to_string(),
        user,
    }
}
