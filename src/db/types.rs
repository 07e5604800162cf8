//! MySQL row decoding.
//!
//! Type conversion uses a two-phase approach:
//! 1. `TypeCategory` classifies column types into logical categories
//! 2. Per-category decoders extract a typed [`Value`]
//!
//! Values that have no lossless native form (DECIMAL, TIME, JSON, unsigned
//! integers above `i64::MAX`) are carried as text.

use crate::models::Value;
use chrono::{DateTime, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use sqlx::mysql::{MySqlRow, MySqlTypeInfo, MySqlValueRef};
use sqlx::{Column, Decode, Row, Type, TypeInfo};

// =============================================================================
// Type Classification
// =============================================================================

/// Logical category for database column types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TypeCategory {
    Integer,
    Float,
    Decimal,
    Boolean,
    Text,
    Binary,
    Json,
    Date,
    DateTime,
    Time,
    Null,
}

/// Classify a MySQL type name into a logical category.
pub fn categorize_type(type_name: &str) -> TypeCategory {
    let lower = type_name.to_lowercase();

    // Decimal - check first as it would otherwise fall through to text
    if lower.contains("decimal") || lower.contains("numeric") {
        return TypeCategory::Decimal;
    }

    if lower == "bool" || lower == "boolean" {
        return TypeCategory::Boolean;
    }

    if lower.contains("int") || lower == "year" {
        return TypeCategory::Integer;
    }

    if lower.contains("float") || lower.contains("double") || lower == "real" {
        return TypeCategory::Float;
    }

    if lower == "json" {
        return TypeCategory::Json;
    }

    if lower.contains("blob") || lower.contains("binary") || lower == "bit" {
        return TypeCategory::Binary;
    }

    match lower.as_str() {
        "date" => TypeCategory::Date,
        "datetime" | "timestamp" => TypeCategory::DateTime,
        "time" => TypeCategory::Time,
        "null" => TypeCategory::Null,
        // varchar, char, text, enum, set, ...
        _ => TypeCategory::Text,
    }
}

// =============================================================================
// Decimal Type Support
// =============================================================================

/// Wrapper type for raw DECIMAL values as strings.
/// This preserves the exact database representation.
#[derive(Debug)]
pub struct RawDecimal(pub String);

impl Type<sqlx::MySql> for RawDecimal {
    fn type_info() -> MySqlTypeInfo {
        <String as Type<sqlx::MySql>>::type_info()
    }

    fn compatible(ty: &MySqlTypeInfo) -> bool {
        let name = ty.name().to_lowercase();
        name.contains("decimal") || name.contains("numeric")
    }
}

impl<'r> Decode<'r, sqlx::MySql> for RawDecimal {
    fn decode(value: MySqlValueRef<'r>) -> Result<Self, sqlx::error::BoxDynError> {
        let s = <&str as Decode<sqlx::MySql>>::decode(value)?;
        Ok(RawDecimal(s.to_string()))
    }
}

// =============================================================================
// Row Decoding
// =============================================================================

/// Column names of a row, in order.
pub fn column_names(row: &MySqlRow) -> Vec<String> {
    row.columns().iter().map(|c| c.name().to_string()).collect()
}

/// Decode every cell of a row.
pub fn decode_row(row: &MySqlRow) -> Vec<Value> {
    row.columns()
        .iter()
        .enumerate()
        .map(|(idx, col)| decode_column(row, idx, categorize_type(col.type_info().name())))
        .collect()
}

fn decode_column(row: &MySqlRow, idx: usize, category: TypeCategory) -> Value {
    match category {
        TypeCategory::Decimal => decode_decimal(row, idx),
        TypeCategory::Integer => decode_integer(row, idx),
        TypeCategory::Boolean => decode_boolean(row, idx),
        TypeCategory::Float => decode_float(row, idx),
        TypeCategory::Binary => decode_binary(row, idx),
        TypeCategory::Json => decode_json(row, idx),
        TypeCategory::Date => decode_date(row, idx),
        TypeCategory::DateTime => decode_datetime(row, idx),
        TypeCategory::Time => decode_time(row, idx),
        TypeCategory::Null => Value::Null,
        TypeCategory::Text => decode_text(row, idx),
    }
}

fn decode_decimal(row: &MySqlRow, idx: usize) -> Value {
    match row.try_get::<Option<RawDecimal>, _>(idx) {
        Ok(Some(v)) => Value::Text(v.0),
        Ok(None) => Value::Null,
        Err(e) => {
            tracing::error!("Failed to decode DECIMAL: {:?}", e);
            Value::Null
        }
    }
}

fn decode_integer(row: &MySqlRow, idx: usize) -> Value {
    // Check NULL first
    if let Ok(None) = row.try_get::<Option<i64>, _>(idx) {
        return Value::Null;
    }
    // Try signed types
    if let Ok(Some(v)) = row.try_get::<Option<i8>, _>(idx) {
        return Value::Int(v.into());
    }
    if let Ok(Some(v)) = row.try_get::<Option<i16>, _>(idx) {
        return Value::Int(v.into());
    }
    if let Ok(Some(v)) = row.try_get::<Option<i32>, _>(idx) {
        return Value::Int(v.into());
    }
    if let Ok(Some(v)) = row.try_get::<Option<i64>, _>(idx) {
        return Value::Int(v);
    }
    // Try unsigned types
    if let Ok(Some(v)) = row.try_get::<Option<u8>, _>(idx) {
        return Value::Int(v.into());
    }
    if let Ok(Some(v)) = row.try_get::<Option<u16>, _>(idx) {
        return Value::Int(v.into());
    }
    if let Ok(Some(v)) = row.try_get::<Option<u32>, _>(idx) {
        return Value::Int(v.into());
    }
    if let Ok(Some(v)) = row.try_get::<Option<u64>, _>(idx) {
        return i64::try_from(v)
            .map(Value::Int)
            .unwrap_or_else(|_| Value::Text(v.to_string()));
    }
    Value::Null
}

fn decode_boolean(row: &MySqlRow, idx: usize) -> Value {
    row.try_get::<Option<bool>, _>(idx)
        .ok()
        .flatten()
        .map(Value::Bool)
        .unwrap_or(Value::Null)
}

fn decode_float(row: &MySqlRow, idx: usize) -> Value {
    if let Ok(Some(v)) = row.try_get::<Option<f64>, _>(idx) {
        return Value::Float(v);
    }
    if let Ok(Some(v)) = row.try_get::<Option<f32>, _>(idx) {
        return Value::Float(v as f64);
    }
    Value::Null
}

fn decode_binary(row: &MySqlRow, idx: usize) -> Value {
    row.try_get::<Option<Vec<u8>>, _>(idx)
        .ok()
        .flatten()
        .map(Value::Bytes)
        .unwrap_or(Value::Null)
}

fn decode_json(row: &MySqlRow, idx: usize) -> Value {
    row.try_get::<Option<serde_json::Value>, _>(idx)
        .ok()
        .flatten()
        .map(|v| Value::Text(v.to_string()))
        .unwrap_or(Value::Null)
}

fn decode_date(row: &MySqlRow, idx: usize) -> Value {
    match row.try_get::<Option<NaiveDate>, _>(idx) {
        Ok(Some(v)) => Value::Date(v),
        // Zero dates ("0000-00-00") fail to decode; fall back to text
        _ => decode_text(row, idx),
    }
}

fn decode_datetime(row: &MySqlRow, idx: usize) -> Value {
    if let Ok(Some(v)) = row.try_get::<Option<NaiveDateTime>, _>(idx) {
        return Value::DateTime(v);
    }
    if let Ok(Some(v)) = row.try_get::<Option<DateTime<Utc>>, _>(idx) {
        return Value::DateTime(v.naive_utc());
    }
    decode_text(row, idx)
}

fn decode_time(row: &MySqlRow, idx: usize) -> Value {
    match row.try_get::<Option<NaiveTime>, _>(idx) {
        Ok(Some(v)) => Value::Text(v.to_string()),
        _ => decode_text(row, idx),
    }
}

fn decode_text(row: &MySqlRow, idx: usize) -> Value {
    if let Ok(Some(v)) = row.try_get::<Option<String>, _>(idx) {
        return Value::Text(v);
    }
    // Non-UTF-8 text still carries bytes
    row.try_get_unchecked::<Option<Vec<u8>>, _>(idx)
        .ok()
        .flatten()
        .map(Value::Bytes)
        .unwrap_or(Value::Null)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_type_integer() {
        assert_eq!(categorize_type("INT"), TypeCategory::Integer);
        assert_eq!(categorize_type("BIGINT"), TypeCategory::Integer);
        assert_eq!(categorize_type("TINYINT"), TypeCategory::Integer);
        assert_eq!(categorize_type("BIGINT UNSIGNED"), TypeCategory::Integer);
        assert_eq!(categorize_type("YEAR"), TypeCategory::Integer);
    }

    #[test]
    fn test_categorize_type_decimal() {
        assert_eq!(categorize_type("DECIMAL"), TypeCategory::Decimal);
        assert_eq!(categorize_type("NUMERIC"), TypeCategory::Decimal);
    }

    #[test]
    fn test_categorize_type_boolean_before_integer() {
        assert_eq!(categorize_type("BOOLEAN"), TypeCategory::Boolean);
    }

    #[test]
    fn test_categorize_type_temporal() {
        assert_eq!(categorize_type("DATE"), TypeCategory::Date);
        assert_eq!(categorize_type("DATETIME"), TypeCategory::DateTime);
        assert_eq!(categorize_type("TIMESTAMP"), TypeCategory::DateTime);
        assert_eq!(categorize_type("TIME"), TypeCategory::Time);
    }

    #[test]
    fn test_categorize_type_binary_and_text() {
        assert_eq!(categorize_type("BLOB"), TypeCategory::Binary);
        assert_eq!(categorize_type("VARBINARY"), TypeCategory::Binary);
        assert_eq!(categorize_type("VARCHAR"), TypeCategory::Text);
        assert_eq!(categorize_type("ENUM"), TypeCategory::Text);
        assert_eq!(categorize_type("JSON"), TypeCategory::Json);
        assert_eq!(categorize_type("NULL"), TypeCategory::Null);
    }
}
