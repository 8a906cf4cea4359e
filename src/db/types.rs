//! Row decoding into JSON maps.
//!
//! Decoding is two-phase:
//! 1. `categorize_type` maps the backend's column type name to a [`TypeCategory`],
//!    or the value's own type when the column has none
//! 2. a per-backend decoder tries the Rust types that category can hold, then
//!    falls back to text and finally raw bytes
//!
//! A value that cannot be decoded at all becomes JSON `null`.

use crate::models::{Backend, Row};
use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use serde_json::Value as JsonValue;
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::postgres::{PgRow, PgTypeInfo, PgValueRef};
use sqlx::sqlite::SqliteRow;
use sqlx::{Column, ColumnIndex, Decode, Row as SqlxRow, Type, TypeInfo, ValueRef};

// =============================================================================
// Type Classification
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Binary,
    Json,
    Temporal,
    Text,
}

/// Classify a backend type name into a logical category.
pub fn categorize_type(type_name: &str, backend: Backend) -> TypeCategory {
    let lower = type_name.to_lowercase();

    if lower.contains("decimal") || lower.contains("numeric") {
        // SQLite's NUMERIC affinity holds plain numbers
        if backend == Backend::Sqlite {
            return TypeCategory::Float;
        }
        return TypeCategory::Decimal;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if (lower.contains("int") && !lower.contains("interval") && lower != "point")
        || lower.contains("serial")
        || lower == "year"
    {
        return TypeCategory::Integer;
    }

    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }

    if lower == "json" || lower == "jsonb" {
        return TypeCategory::Json;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bytea" {
        return TypeCategory::Binary;
    }

    if matches!(
        lower.as_str(),
        "datetime" | "timestamp" | "timestamptz" | "date" | "time"
    ) {
        return TypeCategory::Temporal;
    }

    TypeCategory::Text
}

// =============================================================================
// Decimal Support
// =============================================================================

/// DECIMAL/NUMERIC value kept in its exact textual form.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl std::fmt::Display for RawDecimal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

fn is_decimal_name(name: &str) -> bool {
    let lower = name.to_lowercase();
    lower.contains("decimal") || lower.contains("numeric")
}

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        is_decimal_name(ty.name())
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

impl Type<sqlx::Postgres> for RawDecimal {
    fn type_info() -> PgTypeInfo {
        <String as Type<sqlx::Postgres>>::type_info()
    }

    fn compatible(ty: &PgTypeInfo) -> bool {
        is_decimal_name(ty.name())
    }
}

impl<'r> Decode<'r, sqlx::Postgres> for RawDecimal {
    fn decode(value: PgValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        // text protocol only; binary NUMERIC falls through to null
        let s = <&str as Decode<sqlx::Postgres>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

// =============================================================================
// Generic helpers
// =============================================================================

/// `None` when the column cannot be read as `T`; `Some(None)` for SQL NULL.
fn try_decode<'r, R, T>(row: &'r R, idx: usize) -> Option<Option<T>>
where
    R: SqlxRow,
    usize: ColumnIndex<R>,
    T: Decode<'r, R::Database> + Type<R::Database>,
{
    row.try_get::<Option<T>, _>(idx).ok()
}

fn json_of<T: Into<JsonValue>>(decoded: Option<Option<T>>) -> Option<JsonValue> {
    decoded.map(|v| v.map_or(JsonValue::Null, Into::into))
}

fn text_of<T: ToString>(decoded: Option<Option<T>>) -> Option<JsonValue> {
    decoded.map(|v| v.map_or(JsonValue::Null, |v| JsonValue::String(v.to_string())))
}

/// UTF-8 bytes become text; anything else is base64 encoded.
pub fn bytes_to_json(bytes: &[u8]) -> JsonValue {
    match std::str::from_utf8(bytes) {
        Ok(s) => JsonValue::String(s.to_string()),
        Err(_) => JsonValue::String(STANDARD.encode(bytes)),
    }
}

fn bytes_of(decoded: Option<Option<Vec<u8>>>) -> Option<JsonValue> {
    decoded.map(|v| v.map_or(JsonValue::Null, |b| bytes_to_json(&b)))
}

fn text_fallback<'r, R>(row: &'r R, idx: usize) -> JsonValue
where
    R: SqlxRow,
    usize: ColumnIndex<R>,
    String: Decode<'r, R::Database> + Type<R::Database>,
    Vec<u8>: Decode<'r, R::Database> + Type<R::Database>,
{
    json_of(try_decode::<R, String>(row, idx))
        .or_else(|| bytes_of(try_decode::<R, Vec<u8>>(row, idx)))
        .unwrap_or(JsonValue::Null)
}

/// Category of column `idx`. Expression columns (`COUNT(*)`, `CASE`) carry
/// no declared type on SQLite, so the stored value's own type is used.
fn column_category<R>(row: &R, idx: usize, backend: Backend) -> TypeCategory
where
    R: SqlxRow,
    usize: ColumnIndex<R>,
{
    let declared = row.columns()[idx].type_info();
    if !declared.is_null() {
        return categorize_type(declared.name(), backend);
    }
    row.try_get_raw(idx)
        .map(|value| categorize_type(value.type_info().name(), backend))
        .unwrap_or(TypeCategory::Text)
}

fn map_row<R>(row: &R, backend: Backend, decode: fn(&R, usize, TypeCategory) -> JsonValue) -> Row
where
    R: SqlxRow,
    usize: ColumnIndex<R>,
{
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| {
            let category = column_category(row, idx, backend);
            (col.name().to_string(), decode(row, idx, category))
        })
        .collect()
}

// =============================================================================
// Row to JSON
// =============================================================================

/// Conversion of a backend row into an ordered JSON map.
pub trait RowToJson {
    fn to_json_map(&self) -> Row;
}

impl RowToJson for MySqlRow {
    fn to_json_map(&self) -> Row {
        map_row(self, Backend::MySql, decode_mysql)
    }
}

impl RowToJson for PgRow {
    fn to_json_map(&self) -> Row {
        map_row(self, Backend::Postgres, decode_postgres)
    }
}

impl RowToJson for SqliteRow {
    fn to_json_map(&self) -> Row {
        map_row(self, Backend::Sqlite, decode_sqlite)
    }
}

fn decode_mysql(row: &MySqlRow, idx: usize, category: TypeCategory) -> JsonValue {
    let value = match category {
        TypeCategory::Integer => json_of(try_decode::<_, i64>(row, idx))
            .or_else(|| json_of(try_decode::<_, u64>(row, idx)))
            .or_else(|| json_of(try_decode::<_, i32>(row, idx))),
        TypeCategory::Float => json_of(try_decode::<_, f64>(row, idx))
            .or_else(|| json_of(try_decode::<_, f32>(row, idx))),
        TypeCategory::Decimal => text_of(try_decode::<_, RawDecimal>(row, idx)),
        TypeCategory::Boolean => json_of(try_decode::<_, bool>(row, idx))
            .or_else(|| json_of(try_decode::<_, i8>(row, idx))),
        TypeCategory::Binary => bytes_of(try_decode::<_, Vec<u8>>(row, idx)),
        TypeCategory::Json => json_of(try_decode::<_, JsonValue>(row, idx)),
        TypeCategory::Temporal => text_of(try_decode::<_, NaiveDateTime>(row, idx))
            .or_else(|| text_of(try_decode::<_, DateTime<Utc>>(row, idx)))
            .or_else(|| text_of(try_decode::<_, NaiveDate>(row, idx)))
            .or_else(|| text_of(try_decode::<_, NaiveTime>(row, idx))),
        TypeCategory::Text => None,
    };
    value.unwrap_or_else(|| text_fallback(row, idx))
}

fn decode_postgres(row: &PgRow, idx: usize, category: TypeCategory) -> JsonValue {
    let value = match category {
        TypeCategory::Integer => json_of(try_decode::<_, i64>(row, idx))
            .or_else(|| json_of(try_decode::<_, i32>(row, idx)))
            .or_else(|| json_of(try_decode::<_, i16>(row, idx))),
        TypeCategory::Float => json_of(try_decode::<_, f64>(row, idx))
            .or_else(|| json_of(try_decode::<_, f32>(row, idx))),
        TypeCategory::Decimal => text_of(try_decode::<_, RawDecimal>(row, idx)),
        TypeCategory::Boolean => json_of(try_decode::<_, bool>(row, idx)),
        TypeCategory::Binary => bytes_of(try_decode::<_, Vec<u8>>(row, idx)),
        TypeCategory::Json => json_of(try_decode::<_, JsonValue>(row, idx)),
        TypeCategory::Temporal => text_of(try_decode::<_, NaiveDateTime>(row, idx))
            .or_else(|| text_of(try_decode::<_, DateTime<Utc>>(row, idx)))
            .or_else(|| text_of(try_decode::<_, NaiveDate>(row, idx)))
            .or_else(|| text_of(try_decode::<_, NaiveTime>(row, idx))),
        TypeCategory::Text => None,
    };
    value.unwrap_or_else(|| text_fallback(row, idx))
}

fn decode_sqlite(row: &SqliteRow, idx: usize, category: TypeCategory) -> JsonValue {
    // SQLite values are dynamically typed: a declared type is only a hint
    let value = match category {
        TypeCategory::Integer => json_of(try_decode::<_, i64>(row, idx)),
        TypeCategory::Float | TypeCategory::Decimal => json_of(try_decode::<_, f64>(row, idx)),
        TypeCategory::Boolean => json_of(try_decode::<_, bool>(row, idx)),
        TypeCategory::Binary => bytes_of(try_decode::<_, Vec<u8>>(row, idx)),
        TypeCategory::Json => json_of(try_decode::<_, JsonValue>(row, idx)),
        TypeCategory::Temporal | TypeCategory::Text => None,
    };
    value.unwrap_or_else(|| text_fallback(row, idx))
}
