//! Rendering of query results for terminals and prompts.

use crate::models::{QueryOutcome, Row, StatementKind};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use unicode_width::UnicodeWidthStr;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum OutputFormat {
    /// ASCII table (like the MySQL CLI)
    #[default]
    Table,
    Json,
    /// Tab-separated values with a header line
    Tsv,
}

pub fn format_value(value: &JsonValue) -> String {
    match value {
        JsonValue::Null => "NULL".to_string(),
        JsonValue::Bool(b) => b.to_string(),
        JsonValue::Number(n) => n.to_string(),
        JsonValue::String(s) => s.clone(),
        JsonValue::Array(arr) => serde_json::to_string(arr).unwrap_or_default(),
        JsonValue::Object(obj) => serde_json::to_string(obj).unwrap_or_default(),
    }
}

fn pad(text: &str, width: usize, right_align: bool) -> String {
    let fill = " ".repeat(width.saturating_sub(text.width()));
    if right_align {
        format!("{}{}", fill, text)
    } else {
        format!("{}{}", text, fill)
    }
}

/// Header line plus one tab-separated line per row. Columns come from the first row.
pub fn format_as_tsv(rows: &[Row]) -> String {
    let Some(first) = rows.first() else {
        return String::new();
    };
    let columns: Vec<&String> = first.keys().collect();
    let mut lines = Vec::with_capacity(rows.len() + 1);
    lines.push(
        columns
            .iter()
            .map(|c| c.as_str())
            .collect::<Vec<_>>()
            .join("\t"),
    );
    for row in rows {
        lines.push(
            columns
                .iter()
                .map(|c| format_value(row.get(*c).unwrap_or(&JsonValue::Null)))
                .collect::<Vec<_>>()
                .join("\t"),
        );
    }
    lines.join("\n")
}

pub fn format_as_table(columns: &[String], rows: &[Row], execution_time_ms: u64) -> String {
    if columns.is_empty() {
        return format!("Empty set ({:.2} sec)\n", execution_time_ms as f64 / 1000.0);
    }

    let mut widths: Vec<usize> = columns.iter().map(|c| c.width()).collect();
    for row in rows {
        for (i, col) in columns.iter().enumerate() {
            if let Some(value) = row.get(col) {
                widths[i] = widths[i].max(format_value(value).width());
            }
        }
    }

    let mut output = String::new();
    let separator: String = widths
        .iter()
        .map(|w| format!("+{}", "-".repeat(w + 2)))
        .collect::<String>()
        + "+\n";

    output.push_str(&separator);
    let header: String = columns
        .iter()
        .zip(&widths)
        .map(|(col, w)| format!("| {} ", pad(col, *w, false)))
        .collect::<String>()
        + "|\n";
    output.push_str(&header);
    output.push_str(&separator);

    for row in rows {
        let line: String = columns
            .iter()
            .zip(&widths)
            .map(|(col, w)| {
                let value = row.get(col).unwrap_or(&JsonValue::Null);
                let right_align = matches!(value, JsonValue::Number(_));
                format!("| {} ", pad(&format_value(value), *w, right_align))
            })
            .collect::<String>()
            + "|\n";
        output.push_str(&line);
    }

    output.push_str(&separator);

    let row_text = if rows.len() == 1 { "row" } else { "rows" };
    output.push_str(&format!(
        "{} {} in set ({:.2} sec)\n",
        rows.len(),
        row_text,
        execution_time_ms as f64 / 1000.0
    ));

    output
}

/// Render an execution outcome in the requested format.
pub fn render_outcome(outcome: &QueryOutcome, format: OutputFormat) -> String {
    match (format, outcome.kind) {
        (OutputFormat::Json, _) => serde_json::to_string_pretty(outcome).unwrap_or_default(),
        (_, StatementKind::Write) => format!(
            "Query OK, {} rows affected ({:.2} sec)\n",
            outcome.rows_affected.unwrap_or(0),
            outcome.execution_time_ms as f64 / 1000.0
        ),
        (OutputFormat::Tsv, StatementKind::Read) => format_as_tsv(&outcome.rows),
        (OutputFormat::Table, StatementKind::Read) => {
            format_as_table(&outcome.columns, &outcome.rows, outcome.execution_time_ms)
        }
    }
}
