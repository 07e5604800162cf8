//! Result formatting.
//!
//! Turns a [`QueryResult`] into markdown, CSV or JSON text. Pure functions; the
//! core hands over typed values and all stringification happens here.

use crate::error::{GatewayError, GatewayResult};
use crate::models::{QueryResult, Value};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

pub const NO_RESULTS: &str = "No results";

/// Output type requested by the caller.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    /// Markdown saved to a result file (default)
    #[default]
    FileMd,
    /// CSV saved to a result file
    FileCsv,
    /// Markdown returned inline
    OutMd,
    /// CSV returned inline
    OutCsv,
    /// JSON returned inline
    OutJson,
}

/// On-disk format of a stored result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    Markdown,
    Csv,
}

impl FileKind {
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Markdown => "md",
            Self::Csv => "csv",
        }
    }

    pub fn content_type(&self) -> &'static str {
        match self {
            Self::Markdown => "text/markdown; charset=utf-8",
            Self::Csv => "text/csv; charset=utf-8",
        }
    }

    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext {
            "md" => Some(Self::Markdown),
            "csv" => Some(Self::Csv),
            _ => None,
        }
    }
}

impl OutputType {
    /// File kind for outputs persisted to the result store.
    pub fn file_kind(&self) -> Option<FileKind> {
        match self {
            Self::FileMd => Some(FileKind::Markdown),
            Self::FileCsv => Some(FileKind::Csv),
            _ => None,
        }
    }

    pub fn is_file(&self) -> bool {
        self.file_kind().is_some()
    }
}

/// Format a result for the requested output type.
pub fn format_result(result: &QueryResult, output: OutputType) -> GatewayResult<String> {
    match output {
        OutputType::FileMd | OutputType::OutMd => Ok(format_as_markdown(result)),
        OutputType::FileCsv | OutputType::OutCsv => format_as_csv(result),
        OutputType::OutJson => format_as_json(result),
    }
}

/// Text rendering of one cell. NULL renders as `null_text`.
pub fn format_value(value: &Value, null_text: &str) -> String {
    match value {
        Value::Null => null_text.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Int(i) => i.to_string(),
        Value::Float(f) => f.to_string(),
        Value::Text(s) => s.clone(),
        Value::Bytes(b) => String::from_utf8_lossy(b).into_owned(),
        Value::Date(d) => d.format("%Y-%m-%d").to_string(),
        Value::DateTime(dt) => dt.format("%Y-%m-%dT%H:%M:%S%.f").to_string(),
    }
}

/// Make text safe inside a markdown table cell: pipes are escaped and line
/// breaks collapse to a single space so a row stays on one line.
fn escape_markdown_cell(text: &str) -> String {
    text.replace('|', "\\|")
        .replace("\r\n", " ")
        .replace(['\n', '\r'], " ")
}

pub fn format_as_markdown(result: &QueryResult) -> String {
    if result.columns.is_empty() {
        return NO_RESULTS.to_string();
    }

    let header: Vec<String> = result.columns.iter().map(|c| escape_markdown_cell(c)).collect();
    let mut output = String::new();
    output.push_str("| ");
    output.push_str(&header.join(" | "));
    output.push_str(" |\n");

    let sep: String = result.columns.iter().map(|_| "|---").collect::<String>() + "|\n";
    output.push_str(&sep);

    for row in &result.rows {
        let cells: Vec<String> = row
            .iter()
            .map(|v| escape_markdown_cell(&format_value(v, "NULL")))
            .collect();
        output.push_str("| ");
        output.push_str(&cells.join(" | "));
        output.push_str(" |\n");
    }

    output
}

pub fn format_as_csv(result: &QueryResult) -> GatewayResult<String> {
    if result.columns.is_empty() {
        return Ok(NO_RESULTS.to_string());
    }

    let csv_error = |e: csv::Error| GatewayError::internal(format!("CSV formatting failed: {}", e));

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&result.columns).map_err(csv_error)?;
    for row in &result.rows {
        writer
            .write_record(row.iter().map(|v| format_value(v, "")))
            .map_err(csv_error)?;
    }

    let bytes = writer
        .into_inner()
        .map_err(|e| GatewayError::internal(format!("CSV formatting failed: {}", e)))?;
    String::from_utf8(bytes)
        .map_err(|e| GatewayError::internal(format!("CSV output is not UTF-8: {}", e)))
}

/// Pretty JSON array of objects keyed by column name.
pub fn format_as_json(result: &QueryResult) -> GatewayResult<String> {
    let objects: Vec<JsonValue> = result
        .rows
        .iter()
        .map(|row| {
            let map: serde_json::Map<String, JsonValue> = result
                .columns
                .iter()
                .zip(row)
                .map(|(col, value)| (col.clone(), to_json(value)))
                .collect();
            JsonValue::Object(map)
        })
        .collect();

    serde_json::to_string_pretty(&objects)
        .map_err(|e| GatewayError::internal(format!("JSON formatting failed: {}", e)))
}

fn to_json(value: &Value) -> JsonValue {
    match value {
        Value::Null => JsonValue::Null,
        Value::Bool(b) => JsonValue::Bool(*b),
        Value::Int(i) => JsonValue::from(*i),
        // NaN and infinities have no JSON number form
        Value::Float(f) => serde_json::Number::from_f64(*f)
            .map(JsonValue::Number)
            .unwrap_or_else(|| JsonValue::String(f.to_string())),
        other => JsonValue::String(format_value(other, "")),
    }
}
