// ABOUTME: Type-aware literal encoding for exported row values
// ABOUTME: Renders column values as SQL literals or CSV fields with identical rules

use crate::error::TransferError;
use tokio_postgres::Row;

/// Column kind, resolved once per column from `information_schema`'s
/// `udt_name` when the table schema is read. The encoder dispatches on this
/// closed set instead of inspecting value types at runtime.
///
/// Kinds without a native wire decoding (`Timestamp`, `Other`) are cast to
/// text in the SELECT list, so extraction always sees a known type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ColumnKind {
    Bool,
    Int2,
    Int4,
    Int8,
    Float4,
    Float8,
    Text,
    Bytes,
    Json,
    /// Timestamps, dates and times; fetched as their text rendering.
    Timestamp,
    /// Anything else (uuid, numeric, inet, enums, ...); fetched as text.
    Other,
    Array(Box<ColumnKind>),
}

impl ColumnKind {
    /// Map a `udt_name` (e.g. `int8`, `_text` for `text[]`) to a kind.
    pub fn from_udt(udt: &str) -> ColumnKind {
        if let Some(element) = udt.strip_prefix('_') {
            return ColumnKind::Array(Box::new(ColumnKind::from_udt(element)));
        }
        match udt {
            "bool" => ColumnKind::Bool,
            "int2" => ColumnKind::Int2,
            "int4" => ColumnKind::Int4,
            "int8" => ColumnKind::Int8,
            "float4" => ColumnKind::Float4,
            "float8" => ColumnKind::Float8,
            "text" | "varchar" | "bpchar" | "char" | "name" => ColumnKind::Text,
            "bytea" => ColumnKind::Bytes,
            "json" | "jsonb" => ColumnKind::Json,
            "timestamp" | "timestamptz" | "date" | "time" | "timetz" => ColumnKind::Timestamp,
            _ => ColumnKind::Other,
        }
    }

    /// Whether the wire value decodes directly without a text cast.
    fn is_native(&self) -> bool {
        match self {
            ColumnKind::Timestamp | ColumnKind::Other => false,
            ColumnKind::Array(inner) => inner.is_native(),
            _ => true,
        }
    }

    /// SELECT-list expression for a column of this kind, quoting the
    /// identifier and casting to text where the kind has no native decoding.
    pub fn select_expr(&self, column: &str) -> String {
        match self {
            ColumnKind::Timestamp | ColumnKind::Other => format!("\"{}\"::text", column),
            ColumnKind::Array(inner) if !inner.is_native() => {
                format!("\"{}\"::text[]", column)
            }
            _ => format!("\"{}\"", column),
        }
    }
}

/// A single column value, extracted from a row according to its resolved
/// [`ColumnKind`]. The closed set of variants is what both encoders render.
#[derive(Debug, Clone, PartialEq)]
pub enum ColumnValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
    Bytes(Vec<u8>),
    Json(serde_json::Value),
    Array(Vec<ColumnValue>),
}

/// Extract column `idx` from `row` as a [`ColumnValue`].
pub fn extract_value(row: &Row, idx: usize, kind: &ColumnKind) -> Result<ColumnValue, TransferError> {
    let value = match kind {
        ColumnKind::Bool => row.try_get::<_, Option<bool>>(idx)?.map(ColumnValue::Bool),
        ColumnKind::Int2 => row
            .try_get::<_, Option<i16>>(idx)?
            .map(|v| ColumnValue::Int(v as i64)),
        ColumnKind::Int4 => row
            .try_get::<_, Option<i32>>(idx)?
            .map(|v| ColumnValue::Int(v as i64)),
        ColumnKind::Int8 => row.try_get::<_, Option<i64>>(idx)?.map(ColumnValue::Int),
        ColumnKind::Float4 => row
            .try_get::<_, Option<f32>>(idx)?
            .map(|v| ColumnValue::Float(v as f64)),
        ColumnKind::Float8 => row.try_get::<_, Option<f64>>(idx)?.map(ColumnValue::Float),
        ColumnKind::Text | ColumnKind::Timestamp | ColumnKind::Other => row
            .try_get::<_, Option<String>>(idx)?
            .map(ColumnValue::Text),
        ColumnKind::Bytes => row
            .try_get::<_, Option<Vec<u8>>>(idx)?
            .map(ColumnValue::Bytes),
        ColumnKind::Json => row
            .try_get::<_, Option<serde_json::Value>>(idx)?
            .map(ColumnValue::Json),
        ColumnKind::Array(inner) => extract_array(row, idx, inner)?,
    };
    Ok(value.unwrap_or(ColumnValue::Null))
}

fn extract_array(
    row: &Row,
    idx: usize,
    inner: &ColumnKind,
) -> Result<Option<ColumnValue>, TransferError> {
    fn collect<T, F>(items: Option<Vec<Option<T>>>, f: F) -> Option<ColumnValue>
    where
        F: Fn(T) -> ColumnValue,
    {
        items.map(|items| {
            ColumnValue::Array(
                items
                    .into_iter()
                    .map(|v| v.map(&f).unwrap_or(ColumnValue::Null))
                    .collect(),
            )
        })
    }

    let value = match inner {
        ColumnKind::Bool => collect(row.try_get::<_, Option<Vec<Option<bool>>>>(idx)?, ColumnValue::Bool),
        ColumnKind::Int2 => collect(row.try_get::<_, Option<Vec<Option<i16>>>>(idx)?, |v| {
            ColumnValue::Int(v as i64)
        }),
        ColumnKind::Int4 => collect(row.try_get::<_, Option<Vec<Option<i32>>>>(idx)?, |v| {
            ColumnValue::Int(v as i64)
        }),
        ColumnKind::Int8 => collect(row.try_get::<_, Option<Vec<Option<i64>>>>(idx)?, ColumnValue::Int),
        ColumnKind::Float4 => collect(row.try_get::<_, Option<Vec<Option<f32>>>>(idx)?, |v| {
            ColumnValue::Float(v as f64)
        }),
        ColumnKind::Float8 => collect(
            row.try_get::<_, Option<Vec<Option<f64>>>>(idx)?,
            ColumnValue::Float,
        ),
        ColumnKind::Bytes => collect(
            row.try_get::<_, Option<Vec<Option<Vec<u8>>>>>(idx)?,
            ColumnValue::Bytes,
        ),
        ColumnKind::Json => collect(
            row.try_get::<_, Option<Vec<Option<serde_json::Value>>>>(idx)?,
            ColumnValue::Json,
        ),
        // Text, plus every kind that was cast to text[] in the SELECT list.
        _ => collect(
            row.try_get::<_, Option<Vec<Option<String>>>>(idx)?,
            ColumnValue::Text,
        ),
    };
    Ok(value)
}

/// Characters that force quoting of an individual array item.
fn needs_array_quoting(item: &str) -> bool {
    item.chars()
        .any(|c| c.is_whitespace() || matches!(c, ',' | '{' | '}' | '"'))
}

impl ColumnValue {
    /// Render as a SQL literal for statement-text chunks.
    pub fn sql_literal(&self) -> String {
        match self {
            ColumnValue::Null => "NULL".to_string(),
            ColumnValue::Bool(b) => b.to_string(),
            ColumnValue::Int(i) => i.to_string(),
            ColumnValue::Float(f) => f.to_string(),
            ColumnValue::Text(s) => format!("'{}'", s.replace('\'', "''")),
            ColumnValue::Bytes(b) => format!("decode('{}', 'hex')", hex::encode(b)),
            ColumnValue::Json(v) => format!("'{}'", v.to_string().replace('\'', "''")),
            ColumnValue::Array(items) => {
                let rendered: Vec<String> = items.iter().map(Self::sql_array_item).collect();
                format!("'{{{}}}'", rendered.join(","))
            }
        }
    }

    fn sql_array_item(item: &ColumnValue) -> String {
        match item {
            ColumnValue::Null => "NULL".to_string(),
            ColumnValue::Text(s) => {
                let escaped = s.replace('\'', "''");
                if needs_array_quoting(&escaped) {
                    format!("\"{}\"", escaped)
                } else {
                    escaped
                }
            }
            ColumnValue::Bytes(b) => hex::encode(b),
            ColumnValue::Array(items) => {
                let rendered: Vec<String> = items.iter().map(Self::sql_array_item).collect();
                format!("{{{}}}", rendered.join(","))
            }
            ColumnValue::Bool(b) => b.to_string(),
            ColumnValue::Int(i) => i.to_string(),
            ColumnValue::Float(f) => f.to_string(),
            ColumnValue::Json(v) => v.to_string(),
        }
    }

    /// Render as a raw CSV field for delimited-text chunks. RFC-4180
    /// quoting is applied later, per record, by [`write_csv_record`].
    pub fn csv_field(&self) -> String {
        match self {
            ColumnValue::Null => String::new(),
            ColumnValue::Bool(b) => b.to_string(),
            ColumnValue::Int(i) => i.to_string(),
            ColumnValue::Float(f) => f.to_string(),
            ColumnValue::Text(s) => s.clone(),
            ColumnValue::Bytes(b) => hex::encode(b),
            ColumnValue::Json(v) => v.to_string(),
            ColumnValue::Array(items) => {
                let rendered: Vec<String> = items.iter().map(Self::csv_array_item).collect();
                format!("{{{}}}", rendered.join(","))
            }
        }
    }

    fn csv_array_item(item: &ColumnValue) -> String {
        match item {
            ColumnValue::Null => String::new(),
            ColumnValue::Text(s) => {
                let escaped = s.replace('"', "\"\"");
                if needs_array_quoting(&escaped) {
                    format!("\"{}\"", escaped)
                } else {
                    escaped
                }
            }
            ColumnValue::Bytes(b) => hex::encode(b),
            ColumnValue::Array(items) => {
                let rendered: Vec<String> = items.iter().map(Self::csv_array_item).collect();
                format!("{{{}}}", rendered.join(","))
            }
            ColumnValue::Bool(b) => b.to_string(),
            ColumnValue::Int(i) => i.to_string(),
            ColumnValue::Float(f) => f.to_string(),
            ColumnValue::Json(v) => v.to_string(),
        }
    }
}

/// Quote one CSV field if it contains a comma, quote, or line break.
pub fn csv_quote(field: &str) -> String {
    if field.contains(&[',', '"', '\n', '\r'][..]) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Write one CSV record, newline-terminated.
pub fn write_csv_record<W: std::io::Write>(
    writer: &mut W,
    fields: &[String],
) -> std::io::Result<()> {
    let quoted: Vec<String> = fields.iter().map(|f| csv_quote(f)).collect();
    writeln!(writer, "{}", quoted.join(","))
}

/// Split one CSV record into fields, honoring quoted fields with doubled
/// quotes. Used to read chunk header rows back for validation.
pub fn parse_csv_record(line: &str) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut chars = line.chars().peekable();
    let mut in_quotes = false;

    while let Some(c) = chars.next() {
        if in_quotes {
            if c == '"' {
                if chars.peek() == Some(&'"') {
                    chars.next();
                    field.push('"');
                } else {
                    in_quotes = false;
                }
            } else {
                field.push(c);
            }
        } else {
            match c {
                '"' => in_quotes = true,
                ',' => fields.push(std::mem::take(&mut field)),
                _ => field.push(c),
            }
        }
    }
    fields.push(field);
    fields
}
