//! Prompt templates.
//!
//! Placeholders are `{snake_case}` names. Variables may be given in any case
//! (`tableInfo`, `table_info`, `TableInfo`); each key is converted to snake
//! case before substitution. Unknown placeholders are left untouched.

use crate::models::Backend;
use std::fmt::Display;

const SQL_PROMPT_DEFAULT: &str = "You are a {dialect} expert. Given an input question, first create a syntactically correct {dialect} query to run, then look at the results of the query and return the answer to the input question.
Unless the user specifies in the question a specific number of examples to obtain, query for at most {top_k} results using the LIMIT clause as per {dialect}. You can order the results to return the most informative data in the database.
Never query for all columns from a table. You must query only the columns that are needed to answer the question.
Pay attention to use only the column names you can see in the tables below. Be careful to not query for columns that do not exist. Also, pay attention to which column is in which table.

Only use the following tables:
{table_info}

Question: {input}

Answer with the SQL query only, inside a ```sql code block.";

const SQL_PROMPT_MYSQL: &str = "You are a MySQL expert. Given an input question, first create a syntactically correct MySQL query to run, then look at the results of the query and return the answer to the input question.
Unless the user specifies in the question a specific number of examples to obtain, query for at most {top_k} results using the LIMIT clause as per MySQL. You can order the results to return the most informative data in the database.
Never query for all columns from a table. You must query only the columns that are needed to answer the question. Wrap each column name in backticks (`) to denote them as delimited identifiers.
Pay attention to use only the column names you can see in the tables below. Be careful to not query for columns that do not exist. Also, pay attention to which column is in which table.
Pay attention to use CURDATE() function to get the current date, if the question involves \"today\".

Only use the following tables:
{table_info}

Question: {input}

Answer with the SQL query only, inside a ```sql code block.";

const SQL_PROMPT_POSTGRES: &str = "You are a PostgreSQL expert. Given an input question, first create a syntactically correct PostgreSQL query to run, then look at the results of the query and return the answer to the input question.
Unless the user specifies in the question a specific number of examples to obtain, query for at most {top_k} results using the LIMIT clause as per PostgreSQL. You can order the results to return the most informative data in the database.
Never query for all columns from a table. You must query only the columns that are needed to answer the question. Wrap each column name in double quotes (\") to denote them as delimited identifiers.
Pay attention to use only the column names you can see in the tables below. Be careful to not query for columns that do not exist. Also, pay attention to which column is in which table.
Pay attention to use CURRENT_DATE function to get the current date, if the question involves \"today\".

Only use the following tables:
{table_info}

Question: {input}

Answer with the SQL query only, inside a ```sql code block.";

const SQL_PROMPT_SQLITE: &str = "You are a SQLite expert. Given an input question, first create a syntactically correct SQLite query to run, then look at the results of the query and return the answer to the input question.
Unless the user specifies in the question a specific number of examples to obtain, query for at most {top_k} results using the LIMIT clause as per SQLite. You can order the results to return the most informative data in the database.
Never query for all columns from a table. You must query only the columns that are needed to answer the question. Wrap each column name in double quotes (\") to denote them as delimited identifiers.
Pay attention to use only the column names you can see in the tables below. Be careful to not query for columns that do not exist. Also, pay attention to which column is in which table.
Pay attention to use date('now') function to get the current date, if the question involves \"today\".

Only use the following tables:
{table_info}

Question: {input}

Answer with the SQL query only, inside a ```sql code block.";

/// Instructions for the relevant-table tool call.
pub const RELEVANT_TABLES_PROMPT: &str = "Return the names of ALL the SQL tables that MIGHT be relevant to the user question.
The tables are:

{table_names}

Remember to include ALL POTENTIALLY RELEVANT tables, even if you're not sure that they're needed.";

/// Instructions for the final double-check of a generated query.
pub const SQL_VALIDATE_PROMPT: &str = "{not_formatted_query}
Double check the query above for common mistakes, including:
- Using NOT IN with NULL values
- Using UNION when UNION ALL should have been used
- Using BETWEEN for exclusive ranges
- Data type mismatch in predicates
- Properly quoting identifiers
- Using the correct number of arguments for functions
- Casting to the correct data type
- Using the proper columns for joins

If there are any of the above mistakes, rewrite the query. If there are no mistakes, just reproduce the original query.

Output the final SQL query only, inside a ```sql code block.";

/// Generation prompt for `backend`.
pub fn sql_prompt(backend: Option<Backend>) -> &'static str {
    match backend {
        Some(Backend::MySql) => SQL_PROMPT_MYSQL,
        Some(Backend::Postgres) => SQL_PROMPT_POSTGRES,
        Some(Backend::Sqlite) => SQL_PROMPT_SQLITE,
        None => SQL_PROMPT_DEFAULT,
    }
}

/// Convert `camelCase`, `PascalCase`, `kebab-case` or spaced keys to `snake_case`.
pub fn snake_case(key: &str) -> String {
    let mut out = String::with_capacity(key.len() + 4);
    let mut prev: Option<char> = None;
    for c in key.chars() {
        if c == '-' || c == ' ' || c == '_' {
            if !out.is_empty() && !out.ends_with('_') {
                out.push('_');
            }
        } else if c.is_uppercase() {
            if prev.is_some_and(|p| p.is_lowercase() || p.is_ascii_digit()) && !out.ends_with('_') {
                out.push('_');
            }
            out.extend(c.to_lowercase());
        } else {
            out.push(c);
        }
        prev = Some(c);
    }
    out
}

/// Substitute `{snake_case(key)}` with each value.
pub fn render_template<I, K, V>(template: &str, vars: I) -> String
where
    I: IntoIterator<Item = (K, V)>,
    K: AsRef<str>,
    V: Display,
{
    vars.into_iter().fold(template.to_string(), |output, (key, value)| {
        output.replace(
            &format!("{{{}}}", snake_case(key.as_ref())),
            &value.to_string(),
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snake_case() {
        assert_eq!(snake_case("tableInfo"), "table_info");
        assert_eq!(snake_case("topK"), "top_k");
        assert_eq!(snake_case("notFormattedQuery"), "not_formatted_query");
        assert_eq!(snake_case("table_names"), "table_names");
        assert_eq!(snake_case("Dialect"), "dialect");
        assert_eq!(snake_case("top-k"), "top_k");
    }

    #[test]
    fn test_render_template() {
        let rendered = render_template(
            "{dialect}: {input} (at most {top_k}) {unknown}",
            [("dialect", "sqlite".to_string()), ("input", "how many?".to_string()), ("topK", 5.to_string())],
        );
        assert_eq!(rendered, "sqlite: how many? (at most 5) {unknown}");
    }

    #[test]
    fn test_dialect_prompts_have_placeholders() {
        for backend in [None, Some(Backend::MySql), Some(Backend::Postgres), Some(Backend::Sqlite)] {
            let prompt = sql_prompt(backend);
            assert!(prompt.contains("{table_info}"));
            assert!(prompt.contains("{input}"));
            assert!(prompt.contains("{top_k}"));
        }
        assert!(sql_prompt(None).contains("{dialect}"));
        assert!(RELEVANT_TABLES_PROMPT.contains("{table_names}"));
        assert!(SQL_VALIDATE_PROMPT.contains("{not_formatted_query}"));
    }
}
