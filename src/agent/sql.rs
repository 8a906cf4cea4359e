//! Post-processing of model answers into SQL.

use crate::models::Backend;
use pulldown_cmark::{Event, Parser as MarkdownParser, Tag, TagEnd};
use sqlparser::dialect::{Dialect, GenericDialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::parser::Parser;

/// Content of the first fenced or indented code block in `markdown`.
pub fn extract_code_block(markdown: &str) -> Option<String> {
    let mut inside = false;
    let mut code = String::new();
    for event in MarkdownParser::new(markdown) {
        match event {
            Event::Start(Tag::CodeBlock(_)) => inside = true,
            Event::End(TagEnd::CodeBlock) if inside => return Some(code),
            Event::Text(text) if inside => code.push_str(&text),
            _ => {}
        }
    }
    // unterminated fence: the parser still emits the block up to the end
    inside.then_some(code)
}

/// SQL from a model answer: the first code block, else the whole answer.
pub fn extract_sql(answer: &str) -> String {
    extract_code_block(answer)
        .unwrap_or_else(|| answer.to_string())
        .trim()
        .to_string()
}

/// Pretty-print `sql` with two-space indent and uppercase keywords.
pub fn format_sql(sql: &str) -> String {
    let options = sqlformat::FormatOptions {
        indent: sqlformat::Indent::Spaces(2),
        uppercase: Some(true),
        lines_between_queries: 1,
        ..Default::default()
    };
    sqlformat::format(sql.trim(), &Default::default(), &options)
        .trim()
        .to_string()
}

fn dialect_for(backend: Option<Backend>) -> Box<dyn Dialect> {
    match backend {
        Some(Backend::MySql) => Box::new(MySqlDialect {}),
        Some(Backend::Postgres) => Box::new(PostgreSqlDialect {}),
        Some(Backend::Sqlite) => Box::new(SQLiteDialect {}),
        None => Box::new(GenericDialect {}),
    }
}

/// Best-effort syntax check. Returns the parser message on failure.
pub fn check_syntax(sql: &str, backend: Option<Backend>) -> Result<(), String> {
    let dialect = dialect_for(backend);
    match Parser::parse_sql(dialect.as_ref(), sql) {
        Ok(statements) if statements.is_empty() => Err("no SQL statement found".to_string()),
        Ok(_) => Ok(()),
        Err(e) => Err(e.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_code_block() {
        let answer = "Here you go:\n\n```sql\nSELECT id FROM users;\n```\n\nand also\n```\nSELECT 2\n```";
        assert_eq!(
            extract_code_block(answer).as_deref(),
            Some("SELECT id FROM users;\n")
        );
        assert_eq!(extract_code_block("no code here"), None);
    }

    #[test]
    fn test_extract_sql_falls_back_to_answer() {
        assert_eq!(extract_sql("  SELECT 1  \n"), "SELECT 1");
        assert_eq!(extract_sql("```mysql\nSELECT 1\n```"), "SELECT 1");
    }

    #[test]
    fn test_format_sql_uppercases_keywords() {
        let formatted = format_sql("select id, name from users where id = 1");
        assert!(formatted.starts_with("SELECT"));
        assert!(formatted.contains("FROM"));
        assert!(formatted.contains("WHERE"));
        assert!(formatted.contains("\n  id,"));
    }

    #[test]
    fn test_check_syntax() {
        assert!(check_syntax("SELECT `id` FROM `users` LIMIT 5", Some(Backend::MySql)).is_ok());
        assert!(check_syntax("SELECT \"id\" FROM \"users\"", Some(Backend::Postgres)).is_ok());
        assert!(check_syntax("SELEC id FROM", Some(Backend::Sqlite)).is_err());
        assert!(check_syntax("", None).is_err());
    }
}
