use std::collections::HashMap;

use serde_json::{Map, Value};

use crate::error::{AppError, Result};

pub mod normalize;

pub use normalize::{apply_renames, normalize_rows, COLUMN_RENAMES};

/// Read access shared by every row/column shaped result in the crate.
pub trait Tabular {
    fn columns(&self) -> &[String];

    fn row_count(&self) -> usize;

    fn cell(&self, row: usize, column: &str) -> Option<&Value>;

    fn is_empty(&self) -> bool {
        self.row_count() == 0
    }

    fn has_column(&self, column: &str) -> bool {
        self.columns().iter().any(|name| name == column)
    }
}

/// One row as the service sent it, before it is flattened against a header.
#[derive(Debug, Clone, PartialEq)]
pub enum RawRow {
    /// Positional values aligned with the page header.
    Values(Vec<Value>),
    /// A self-describing object (NDJSON lines).
    Keyed(Map<String, Value>),
    /// A contract description plus its tick tuples, aligned with the page header.
    Contract {
        contract: Map<String, Value>,
        ticks: Vec<Vec<Value>>,
    },
}

impl RawRow {
    pub fn from_json(value: Value) -> Result<Self> {
        match value {
            Value::Array(values) => Ok(RawRow::Values(values)),
            Value::Object(mut object) => match object.remove("contract") {
                Some(Value::Object(contract)) => {
                    let ticks = match object.remove("ticks") {
                        None | Some(Value::Null) => Vec::new(),
                        Some(Value::Array(ticks)) => ticks
                            .into_iter()
                            .map(|tick| match tick {
                                Value::Array(values) => Ok(values),
                                other => Err(AppError::malformed(format!(
                                    "tick entries must be arrays, found {other}"
                                ))),
                            })
                            .collect::<Result<Vec<_>>>()?,
                        Some(other) => {
                            return Err(AppError::malformed(format!(
                                "`ticks` must be an array, found {other}"
                            )))
                        }
                    };
                    Ok(RawRow::Contract { contract, ticks })
                }
                Some(other) => Err(AppError::malformed(format!(
                    "`contract` must be an object, found {other}"
                ))),
                None => Ok(RawRow::Keyed(object)),
            },
            scalar => Ok(RawRow::Values(vec![scalar])),
        }
    }
}

/// Flat, column-ordered records produced once all pages of a fetch are merged.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct NormalizedTable {
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl NormalizedTable {
    pub fn new(columns: Vec<String>, rows: Vec<Vec<Value>>) -> Result<Self> {
        if let Some((row, values)) = rows
            .iter()
            .enumerate()
            .find(|(_, values)| values.len() != columns.len())
        {
            return Err(AppError::ColumnMismatch {
                row,
                expected: columns.len(),
                actual: values.len(),
            });
        }
        Ok(Self { columns, rows })
    }

    pub fn empty() -> Self {
        Self::default()
    }

    pub fn record(&self, index: usize) -> Option<Record<'_>> {
        self.rows.get(index).map(|values| Record {
            columns: &self.columns,
            values,
        })
    }

    pub fn records(&self) -> impl Iterator<Item = Record<'_>> {
        self.rows.iter().map(move |values| Record {
            columns: &self.columns,
            values,
        })
    }

    pub fn column_values<'a>(&'a self, column: &str) -> Option<impl Iterator<Item = &'a Value>> {
        let index = self.column_index(column)?;
        Some(self.rows.iter().map(move |values| &values[index]))
    }

    /// Remove the named columns, returning the table and the names that were absent.
    pub fn without_columns<'n>(mut self, names: &[&'n str]) -> (Self, Vec<&'n str>) {
        let mut missing = Vec::new();
        for name in names {
            match self.column_index(name) {
                Some(index) => {
                    self.columns.remove(index);
                    for values in &mut self.rows {
                        values.remove(index);
                    }
                }
                None => missing.push(*name),
            }
        }
        (self, missing)
    }

    /// Stack tables on top of each other. Columns are unioned in first-seen order and
    /// cells a table lacks are null.
    pub fn concat<I>(tables: I) -> Self
    where
        I: IntoIterator<Item = NormalizedTable>,
    {
        let mut columns: Vec<String> = Vec::new();
        let mut index: HashMap<String, usize> = HashMap::new();
        let mut rows = Vec::new();

        for table in tables {
            let positions: Vec<usize> = table
                .columns
                .iter()
                .map(|name| {
                    *index.entry(name.clone()).or_insert_with(|| {
                        columns.push(name.clone());
                        columns.len() - 1
                    })
                })
                .collect();

            for values in table.rows {
                let mut row = vec![Value::Null; columns.len()];
                for (position, value) in positions.iter().zip(values) {
                    row[*position] = value;
                }
                rows.push(row);
            }
        }

        let width = columns.len();
        for row in &mut rows {
            row.resize(width, Value::Null);
        }
        Self { columns, rows }
    }

    pub fn into_maps(self) -> Vec<Map<String, Value>> {
        let columns = self.columns;
        self.rows
            .into_iter()
            .map(|values| columns.iter().cloned().zip(values).collect())
            .collect()
    }

    pub(crate) fn rename_column(&mut self, from: &str, to: &str) -> bool {
        match self.column_index(from) {
            Some(index) if !self.has_column(to) => {
                self.columns[index] = to.to_string();
                true
            }
            _ => false,
        }
    }

    fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|name| name == column)
    }
}

impl Tabular for NormalizedTable {
    fn columns(&self) -> &[String] {
        &self.columns
    }

    fn row_count(&self) -> usize {
        self.rows.len()
    }

    fn cell(&self, row: usize, column: &str) -> Option<&Value> {
        let index = self.column_index(column)?;
        self.rows.get(row).map(|values| &values[index])
    }
}

/// Borrowed view of one row of a [`NormalizedTable`].
#[derive(Debug, Clone, Copy)]
pub struct Record<'a> {
    columns: &'a [String],
    values: &'a [Value],
}

impl<'a> Record<'a> {
    pub fn get(&self, column: &str) -> Option<&'a Value> {
        self.columns
            .iter()
            .position(|name| name == column)
            .map(|index| &self.values[index])
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'a str, &'a Value)> {
        self.columns
            .iter()
            .map(String::as_str)
            .zip(self.values.iter())
    }

    pub fn to_map(&self) -> Map<String, Value> {
        self.iter()
            .map(|(name, value)| (name.to_string(), value.clone()))
            .collect()
    }
}
