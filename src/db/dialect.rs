//! Dialect-aware SQL templates.
//!
//! [`sql_for`] maps a logical operation and a backend to concrete SQL text.
//! When a dialect has no real equivalent the result is degraded (synthesized
//! or empty) instead of an error; callers treat an empty string as "no
//! statement" and must not rely on degraded output being authoritative.
//!
//! Value normalization ([`normalize_query_value`]) only decides between quoted
//! and unquoted literals. It does not escape: inputs come from the same user
//! operating the local database.

use crate::models::Backend;

/// Logical operations with a per-dialect SQL rendition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SqlOperation<'a> {
    ShowTables,
    ShowCreateTable { table: &'a str },
    DescribeTable { table: &'a str },
    QueryUniqueColumns { database: &'a str, table: &'a str },
    TableMetadata { table: &'a str },
    CountRows { table: &'a str },
    SampleRows { table: &'a str, limit: usize },
}

/// Column that holds the DDL in `ShowCreateTable` results.
pub fn create_table_column(backend: Backend) -> &'static str {
    match backend {
        Backend::Sqlite => "sql",
        Backend::MySql | Backend::Postgres => "Create Table",
    }
}

/// Single-quote a string literal, doubling embedded quotes.
pub fn quote_literal(value: &str) -> String {
    format!("'{}'", value.replace('\'', "''"))
}

pub fn sql_for(operation: SqlOperation<'_>, backend: Backend) -> String {
    match operation {
        SqlOperation::ShowTables => show_tables(backend).to_string(),
        SqlOperation::ShowCreateTable { table } => show_create_table(table, backend),
        SqlOperation::DescribeTable { table } => describe_table(table, backend),
        SqlOperation::QueryUniqueColumns { database, table } => {
            unique_columns(database, table, backend)
        }
        SqlOperation::TableMetadata { table } => table_metadata(table, backend),
        SqlOperation::CountRows { table } => format!(
            "SELECT COUNT(*) AS count FROM {}",
            backend.quote_identifier(table)
        ),
        SqlOperation::SampleRows { table, limit } => format!(
            "SELECT * FROM {} LIMIT {}",
            backend.quote_identifier(table),
            limit
        ),
    }
}

fn show_tables(backend: Backend) -> &'static str {
    match backend {
        Backend::MySql => "SHOW TABLES;",
        Backend::Postgres => {
            "SELECT tablename::text AS table_name FROM pg_catalog.pg_tables \
             WHERE schemaname = current_schema() ORDER BY tablename;"
        }
        Backend::Sqlite => {
            "SELECT name FROM sqlite_master \
             WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name;"
        }
    }
}

fn show_create_table(table: &str, backend: Backend) -> String {
    match backend {
        Backend::MySql => format!("SHOW CREATE TABLE {};", backend.quote_identifier(table)),
        // No SHOW CREATE in Postgres: rebuild an approximate DDL from the catalog
        Backend::Postgres => format!(
            r#"SELECT 'CREATE TABLE ' || quote_ident(c.table_name::text) || E' (\n  ' ||
string_agg(quote_ident(c.column_name::text) || ' ' || c.data_type::text ||
CASE WHEN c.is_nullable = 'NO' THEN ' NOT NULL' ELSE '' END, E',\n  ' ORDER BY c.ordinal_position)
|| E'\n);' AS "Create Table"
FROM information_schema.columns c
WHERE c.table_schema = current_schema() AND c.table_name = {}
GROUP BY c.table_name;"#,
            quote_literal(table)
        ),
        Backend::Sqlite => format!(
            "SELECT sql FROM sqlite_master WHERE type = 'table' AND name = {};",
            quote_literal(table)
        ),
    }
}

fn describe_table(table: &str, backend: Backend) -> String {
    match backend {
        Backend::MySql => format!("DESCRIBE {};", backend.quote_identifier(table)),
        Backend::Postgres => format!(
            r#"SELECT column_name::text AS "Field", data_type::text AS "Type"
FROM information_schema.columns
WHERE table_schema = current_schema() AND table_name = {}
ORDER BY ordinal_position;"#,
            quote_literal(table)
        ),
        Backend::Sqlite => format!("PRAGMA table_info({});", quote_literal(table)),
    }
}

/// MySQL/Postgres report `is_unique` as the text `'TRUE'`/`'FALSE'`;
/// SQLite reports `pk = 1` for primary key columns.
fn unique_columns(database: &str, table: &str, backend: Backend) -> String {
    match backend {
        Backend::MySql => format!(
            r#"SELECT CONVERT(COLUMN_NAME USING utf8mb4) AS COLUMN_NAME,
CASE WHEN NON_UNIQUE = 0 THEN 'TRUE' ELSE 'FALSE' END AS is_unique
FROM information_schema.statistics
WHERE TABLE_SCHEMA = {} AND TABLE_NAME = {}
ORDER BY INDEX_NAME = 'PRIMARY' DESC, INDEX_NAME, SEQ_IN_INDEX;"#,
            quote_literal(database),
            quote_literal(table)
        ),
        Backend::Postgres => format!(
            r#"SELECT a.attname::text AS "COLUMN_NAME",
CASE WHEN i.indisunique THEN 'TRUE' ELSE 'FALSE' END AS is_unique
FROM pg_index i
JOIN pg_class t ON t.oid = i.indrelid
JOIN pg_namespace n ON n.oid = t.relnamespace
JOIN pg_attribute a ON a.attrelid = t.oid AND a.attnum = ANY(i.indkey)
WHERE t.relname = {} AND n.nspname = current_schema()
ORDER BY i.indisprimary DESC, a.attnum;"#,
            quote_literal(table)
        ),
        Backend::Sqlite => format!(
            "SELECT name AS COLUMN_NAME, CASE WHEN pk > 0 THEN 1 ELSE 0 END AS pk \
             FROM pragma_table_info({}) ORDER BY pk DESC, cid;",
            quote_literal(table)
        ),
    }
}

fn table_metadata(table: &str, backend: Backend) -> String {
    match backend {
        Backend::MySql => format!(
            "SELECT TABLE_CATALOG, TABLE_SCHEMA, TABLE_TYPE, TABLE_COLLATION \
             FROM information_schema.tables \
             WHERE TABLE_SCHEMA = DATABASE() AND TABLE_NAME = {};",
            quote_literal(table)
        ),
        Backend::Postgres => format!(
            r#"SELECT table_catalog::text AS "TABLE_CATALOG", table_schema::text AS "TABLE_SCHEMA",
table_type::text AS "TABLE_TYPE", NULL::text AS "TABLE_COLLATION"
FROM information_schema.tables
WHERE table_schema = current_schema() AND table_name = {};"#,
            quote_literal(table)
        ),
        // sqlite_master carries no catalog metadata
        Backend::Sqlite => String::new(),
    }
}

// =============================================================================
// Value normalization
// =============================================================================

const UNQUOTED_TYPES: &[&str] = &[
    // numeric
    "float",
    "double",
    "real",
    "decimal",
    "numeric",
    "tinyint",
    "smallint",
    "int",
    "integer",
    "mediumint",
    "bigint",
    // boolean
    "bool",
    "boolean",
    // blob
    "tinyblob",
    "mediumblob",
    "blob",
    "longblob",
];

/// Render `value` as a SQL literal for a column declared as `data_type`.
///
/// Numeric, boolean and blob types pass through; everything else, including
/// an unknown type, is wrapped in single quotes. No escaping is performed.
pub fn normalize_query_value(value: impl std::fmt::Display, data_type: Option<&str>) -> String {
    let base = data_type
        .map(|t| {
            t.split('(')
                .next()
                .unwrap_or_default()
                .trim()
                .to_lowercase()
        })
        .unwrap_or_default();
    let base = base.split_whitespace().next().unwrap_or_default();

    if !base.is_empty() && UNQUOTED_TYPES.contains(&base) {
        value.to_string()
    } else {
        format!("'{}'", value)
    }
}

// =============================================================================
// Filter building
// =============================================================================

/// Comparison operators for filter building. Values are rendered literals,
/// e.g. the output of [`normalize_query_value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    Equals,
    NotEquals,
    GreaterThan,
    GreaterThanOrEqual,
    LessThan,
    LessThanOrEqual,
    Like,
    NotLike,
    Contains,
    NotContains,
    StartsWith,
    EndsWith,
    In,
    NotIn,
    IsNull,
    IsNotNull,
}

impl Comparison {
    /// Build the condition for `column`. `values` holds one literal, a list
    /// for `In`/`NotIn`, and is ignored by the null checks.
    pub fn build(&self, column: &str, values: &[String], backend: Backend) -> String {
        let column = backend.quote_identifier(column);
        let first = values.first().map(String::as_str).unwrap_or("''");
        match self {
            Self::Equals => format!("{} = {}", column, first),
            Self::NotEquals => format!("{} <> {}", column, first),
            Self::GreaterThan => format!("{} > {}", column, first),
            Self::GreaterThanOrEqual => format!("{} >= {}", column, first),
            Self::LessThan => format!("{} < {}", column, first),
            Self::LessThanOrEqual => format!("{} <= {}", column, first),
            Self::Like => format!("{} LIKE {}", column, first),
            Self::NotLike => format!("{} NOT LIKE {}", column, first),
            Self::Contains => format!("{} LIKE {}", column, like_pattern(first, "%", "%")),
            Self::NotContains => {
                format!("{} NOT LIKE {}", column, like_pattern(first, "%", "%"))
            }
            Self::StartsWith => format!("{} LIKE {}", column, like_pattern(first, "", "%")),
            Self::EndsWith => format!("{} LIKE {}", column, like_pattern(first, "%", "")),
            Self::In => format!("{} IN ({})", column, values.join(", ")),
            Self::NotIn => format!("{} NOT IN ({})", column, values.join(", ")),
            Self::IsNull => format!("{} IS NULL", column),
            Self::IsNotNull => format!("{} IS NOT NULL", column),
        }
    }
}

/// Wrap a literal's content with LIKE wildcards, keeping it quoted.
fn like_pattern(literal: &str, prefix: &str, suffix: &str) -> String {
    let inner = literal
        .strip_prefix('\'')
        .and_then(|s| s.strip_suffix('\''))
        .unwrap_or(literal);
    format!("'{}{}{}'", prefix, inner, suffix)
}

/// `SELECT` statement builder used for table browsing.
#[derive(Debug, Clone, Default)]
pub struct SelectBuilder {
    table: String,
    columns: Vec<String>,
    conditions: Vec<String>,
    order_by: Vec<(String, bool)>,
    limit: Option<u64>,
    offset: Option<u64>,
}

impl SelectBuilder {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Default::default()
        }
    }

    pub fn columns<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.columns = columns.into_iter().map(Into::into).collect();
        self
    }

    /// Add a condition built with [`Comparison::build`]; conditions are AND-joined.
    pub fn filter(mut self, condition: impl Into<String>) -> Self {
        self.conditions.push(condition.into());
        self
    }

    pub fn order_by(mut self, column: impl Into<String>, ascending: bool) -> Self {
        self.order_by.push((column.into(), ascending));
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: u64) -> Self {
        self.offset = Some(offset);
        self
    }

    pub fn build(&self, backend: Backend) -> String {
        let columns = if self.columns.is_empty() {
            "*".to_string()
        } else {
            self.columns
                .iter()
                .map(|c| backend.quote_identifier(c))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let mut sql = format!(
            "SELECT {} FROM {}",
            columns,
            backend.quote_identifier(&self.table)
        );
        if !self.conditions.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.conditions.join(" AND "));
        }
        if !self.order_by.is_empty() {
            let order = self
                .order_by
                .iter()
                .map(|(c, asc)| {
                    format!(
                        "{} {}",
                        backend.quote_identifier(c),
                        if *asc { "ASC" } else { "DESC" }
                    )
                })
                .collect::<Vec<_>>()
                .join(", ");
            sql.push_str(" ORDER BY ");
            sql.push_str(&order);
        }
        if let Some(limit) = self.limit {
            sql.push_str(&format!(" LIMIT {}", limit));
        }
        if let Some(offset) = self.offset {
            // MySQL and SQLite only accept OFFSET after a LIMIT
            if self.limit.is_none() {
                match backend {
                    Backend::MySql => sql.push_str(" LIMIT 18446744073709551615"),
                    Backend::Sqlite => sql.push_str(" LIMIT -1"),
                    Backend::Postgres => {}
                }
            }
            sql.push_str(&format!(" OFFSET {}", offset));
        }
        sql
    }
}
