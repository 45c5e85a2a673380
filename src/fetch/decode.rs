use std::io::Cursor;

use serde_json::{Map, Value};

use crate::error::{AppError, Result};
use crate::records::{RawRow, Tabular};

use super::request::OutputFormat;

/// Parsed outcome of one page: its header, its raw rows and the continuation, if any.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PageResult {
    pub columns: Vec<String>,
    pub rows: Vec<RawRow>,
    pub next_page: Option<String>,
}

impl PageResult {
    /// The "nothing for this slice" result: no header, no rows, no continuation.
    pub fn empty() -> Self {
        Self::default()
    }

    pub fn has_header(&self) -> bool {
        !self.columns.is_empty()
    }
}

impl Tabular for PageResult {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn cell(&self, row: usize, column: &str) -> Option<&Value> {
        let position = self.columns.iter().position(|name| name == column);
        match self.rows.get(row)? {
            RawRow::Values(values) => values.get(position?),
            RawRow::Keyed(object) => object.get(column),
            RawRow::Contract { contract, ticks } => position
                .and_then(|position| ticks.first().and_then(|tick| tick.get(position)))
                .or_else(|| contract.get(column)),
        }
    }
}

pub fn decode_page(format: OutputFormat, body: &str) -> Result<PageResult> {
    match format {
        OutputFormat::Json => decode_json(body),
        OutputFormat::Ndjson => decode_ndjson(body),
        OutputFormat::Csv => decode_csv(body),
    }
}

/// `{"header": {"format": [...]}, "response": [...]}`. A missing `response` means no
/// rows; rows without a `header.format` to align against are malformed.
pub fn decode_json(body: &str) -> Result<PageResult> {
    let root: Value = serde_json::from_str(body)?;
    let object = root
        .as_object()
        .ok_or_else(|| AppError::malformed("response body is not a JSON object"))?;

    let rows = match object.get("response") {
        None | Some(Value::Null) => Vec::new(),
        Some(Value::Array(items)) => items
            .iter()
            .cloned()
            .map(RawRow::from_json)
            .collect::<Result<Vec<_>>>()?,
        Some(other) => {
            return Err(AppError::malformed(format!(
                "`response` must be an array, found {other}"
            )))
        }
    };

    let format = object.get("header").and_then(|header| header.get("format"));
    let columns = match format {
        Some(Value::Array(names)) => names
            .iter()
            .map(|name| match name {
                Value::String(name) => Ok(name.clone()),
                other => Err(AppError::malformed(format!(
                    "`header.format` entries must be strings, found {other}"
                ))),
            })
            .collect::<Result<Vec<_>>>()?,
        None | Some(Value::Null) => Vec::new(),
        Some(other) => {
            return Err(AppError::malformed(format!(
                "`header.format` must be an array, found {other}"
            )))
        }
    };

    let needs_header = rows
        .iter()
        .any(|row| !matches!(row, RawRow::Keyed(_)));
    if columns.is_empty() && needs_header {
        return Err(AppError::malformed(
            "response rows present but `header.format` is missing",
        ));
    }

    Ok(PageResult {
        columns,
        rows,
        next_page: None,
    })
}

/// One JSON object per non-blank line; columns are the keys in first-seen order.
pub fn decode_ndjson(body: &str) -> Result<PageResult> {
    let mut columns: Vec<String> = Vec::new();
    let mut rows = Vec::new();

    for (line_no, line) in body.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let object: Map<String, Value> = serde_json::from_str(line).map_err(|err| {
            AppError::malformed(format!("NDJSON line {} is not an object: {err}", line_no + 1))
        })?;
        for key in object.keys() {
            if !columns.iter().any(|column| column == key) {
                columns.push(key.clone());
            }
        }
        rows.push(RawRow::Keyed(object));
    }

    Ok(PageResult {
        columns,
        rows,
        next_page: None,
    })
}

/// First record is the header. Blank lines are skipped; ragged records are malformed.
pub fn decode_csv(body: &str) -> Result<PageResult> {
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(false)
        .from_reader(Cursor::new(body.as_bytes()));

    let columns: Vec<String> = reader
        .headers()?
        .iter()
        .map(|name| name.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|err| AppError::malformed(format!("bad CSV record: {err}")))?;
        if record.iter().all(|field| field.trim().is_empty()) {
            continue;
        }
        rows.push(RawRow::Values(record.iter().map(parse_cell).collect()));
    }

    if columns.is_empty() && !rows.is_empty() {
        return Err(AppError::malformed("CSV body has rows but no header"));
    }

    Ok(PageResult {
        columns,
        rows,
        next_page: None,
    })
}

/// Integers and floats become numbers, empty cells null, everything else a string.
pub fn parse_cell(raw: &str) -> Value {
    let cell = raw.trim();
    if cell.is_empty() {
        return Value::Null;
    }
    if let Ok(int) = cell.parse::<i64>() {
        return Value::from(int);
    }
    if let Ok(float) = cell.parse::<f64>() {
        if float.is_finite() {
            return Value::from(float);
        }
    }
    Value::String(cell.to_string())
}
