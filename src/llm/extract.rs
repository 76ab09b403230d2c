use regex::Regex;
use std::sync::LazyLock;
use tracing::debug;

use crate::llm::models::GeneratedSql;

pub const FALLBACK_EXPLANATION: &str = "The model returned a query without an explanation.";

static SQL_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?is)```[ \t]*sql[ \t]*\r?\n?(.*?)```").expect("valid regex"));
static ANY_FENCE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```[a-zA-Z]*[ \t]*\r?\n?(.*?)```").expect("valid regex"));

const SQL_START_KEYWORDS: &[&str] = &["SELECT", "WITH"];

/// Splits a model reply into the SQL statement and the prose around it.
///
/// Tries a ```sql block, then any fenced block, then scans for a line that
/// starts like a query. Returns `None` when nothing SQL-shaped is found.
pub fn parse_response(content: &str) -> Option<GeneratedSql> {
    for fence in [&*SQL_FENCE, &*ANY_FENCE] {
        if let Some(captures) = fence.captures(content) {
            let sql = captures.get(1).map(|m| m.as_str().trim()).unwrap_or_default();
            if !sql.is_empty() {
                let whole = captures.get(0).map(|m| m.range()).unwrap_or(0..0);
                let prose = format!("{}\n{}", &content[..whole.start], &content[whole.end..]);
                debug!("Extracted SQL from fenced block");
                return Some(GeneratedSql {
                    sql: sql.to_string(),
                    explanation: explanation_from(&prose),
                });
            }
        }
    }

    // No code block: collect from the first line that looks like SQL up to
    // the terminating semicolon or a blank line
    let lines: Vec<&str> = content.lines().collect();
    for (i, line) in lines.iter().enumerate() {
        let upper = line.trim_start().to_uppercase();
        if !SQL_START_KEYWORDS.iter().any(|kw| upper.starts_with(kw)) {
            continue;
        }

        let mut end = i;
        while end < lines.len() {
            let current = lines[end].trim();
            if current.is_empty() {
                break;
            }
            end += 1;
            if current.ends_with(';') {
                break;
            }
        }

        let sql = lines[i..end]
            .iter()
            .map(|l| l.trim_end())
            .collect::<Vec<_>>()
            .join("\n");
        let prose = [&lines[..i], &lines[end..]].concat().join("\n");
        debug!("Extracted SQL using line scanning");
        return Some(GeneratedSql {
            sql: sql.trim().to_string(),
            explanation: explanation_from(&prose),
        });
    }

    None
}

fn explanation_from(prose: &str) -> String {
    let cleaned = prose
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .collect::<Vec<_>>()
        .join(" ");

    if cleaned.is_empty() {
        FALLBACK_EXPLANATION.to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sql_fence_with_explanation_before_and_after() {
        let reply = "This lists stores in New York.\n\n```sql\nSELECT *\nFROM Stores\nWHERE State = 'NY';\n```\nIt filters on the state code.";
        let parsed = parse_response(reply).unwrap();
        assert_eq!(parsed.sql, "SELECT *\nFROM Stores\nWHERE State = 'NY';");
        assert_eq!(
            parsed.explanation,
            "This lists stores in New York. It filters on the state code."
        );
    }

    #[test]
    fn test_uppercase_fence_and_bare_fence() {
        let parsed = parse_response("```SQL\nSELECT 1\n```").unwrap();
        assert_eq!(parsed.sql, "SELECT 1");
        assert_eq!(parsed.explanation, FALLBACK_EXPLANATION);

        let parsed = parse_response("Here:\n```\nSELECT Name FROM Products\n```").unwrap();
        assert_eq!(parsed.sql, "SELECT Name FROM Products");
        assert_eq!(parsed.explanation, "Here:");
    }

    #[test]
    fn test_line_scan_without_fences() {
        let reply = "Sure, this counts products.\nSELECT COUNT(*)\nFROM Products;\nLet me know if you need more.";
        let parsed = parse_response(reply).unwrap();
        assert_eq!(parsed.sql, "SELECT COUNT(*)\nFROM Products;");
        assert_eq!(
            parsed.explanation,
            "Sure, this counts products. Let me know if you need more."
        );
    }

    #[test]
    fn test_nothing_sql_shaped() {
        assert!(parse_response("I cannot answer that from this schema.").is_none());
        assert!(parse_response("```sql\n\n```").is_none());
        assert!(parse_response("").is_none());
    }
}
