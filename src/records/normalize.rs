use std::collections::HashMap;

use log::warn;
use serde_json::Value;

use crate::error::{AppError, Result};

use super::{NormalizedTable, RawRow, Tabular};

/// Upstream column names rewritten to the names callers work with.
pub const COLUMN_RENAMES: [(&str, &str); 4] = [
    ("strike", "strike_milli"),
    ("underlying_price", "underlying"),
    ("expiration", "exp"),
    ("root", "symbol"),
];

/// Flatten raw rows against the page header and apply [`COLUMN_RENAMES`].
///
/// Positional rows zip against `columns`. Contract rows contribute their contract
/// fields first, then their first tick zipped against `columns`; a tick value wins
/// over a contract field of the same name. Keyed rows keep their own keys. Columns
/// are the union across rows in first-seen order, and a row lacking a column gets
/// null. Any positional length mismatch fails the whole batch.
pub fn normalize_rows(rows: &[RawRow], columns: &[String]) -> Result<NormalizedTable> {
    let mut builder = TableBuilder::default();

    if rows.is_empty() {
        for column in columns {
            builder.position(column);
        }
    }

    for (index, row) in rows.iter().enumerate() {
        let mut cells: Vec<(usize, Value)> = Vec::new();
        match row {
            RawRow::Values(values) => {
                zip_checked(index, columns, values, &mut builder, &mut cells)?;
            }
            RawRow::Keyed(object) => {
                for (key, value) in object {
                    cells.push((builder.position(key), value.clone()));
                }
            }
            RawRow::Contract { contract, ticks } => {
                for (key, value) in contract {
                    cells.push((builder.position(key), value.clone()));
                }
                if let Some(tick) = ticks.first() {
                    zip_checked(index, columns, tick, &mut builder, &mut cells)?;
                }
            }
        }
        builder.rows.push(cells);
    }

    Ok(apply_renames(builder.finish()))
}

/// Rename every present column listed in [`COLUMN_RENAMES`]. Running it again is a
/// no-op. A rename whose target already exists is skipped, leaving both untouched.
pub fn apply_renames(mut table: NormalizedTable) -> NormalizedTable {
    for (from, to) in COLUMN_RENAMES {
        if table.has_column(from) && !table.rename_column(from, to) {
            warn!("Keeping column `{from}`: `{to}` is already present");
        }
    }
    table
}

fn zip_checked(
    row: usize,
    columns: &[String],
    values: &[Value],
    builder: &mut TableBuilder,
    cells: &mut Vec<(usize, Value)>,
) -> Result<()> {
    if values.len() != columns.len() {
        return Err(AppError::ColumnMismatch {
            row,
            expected: columns.len(),
            actual: values.len(),
        });
    }
    for (column, value) in columns.iter().zip(values) {
        cells.push((builder.position(column), value.clone()));
    }
    Ok(())
}

#[derive(Default)]
struct TableBuilder {
    columns: Vec<String>,
    index: HashMap<String, usize>,
    rows: Vec<Vec<(usize, Value)>>,
}

impl TableBuilder {
    fn position(&mut self, column: &str) -> usize {
        if let Some(position) = self.index.get(column) {
            return *position;
        }
        self.columns.push(column.to_string());
        let position = self.columns.len() - 1;
        self.index.insert(column.to_string(), position);
        position
    }

    fn finish(self) -> NormalizedTable {
        let width = self.columns.len();
        let rows = self
            .rows
            .into_iter()
            .map(|cells| {
                let mut values = vec![Value::Null; width];
                for (position, value) in cells {
                    values[position] = value;
                }
                values
            })
            .collect();
        NormalizedTable {
            columns: self.columns,
            rows,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn columns(names: &[&str]) -> Vec<String> {
        names.iter().map(|name| name.to_string()).collect()
    }

    fn raw(value: Value) -> RawRow {
        RawRow::from_json(value).expect("raw row")
    }

    #[test]
    fn flattens_contract_rows_with_ticks() {
        let rows = vec![raw(json!({
            "contract": {"root": "SPY", "strike": 450000},
            "ticks": [[12345, 1.23, 1.25]]
        }))];

        let table = normalize_rows(&rows, &columns(&["ms_of_day", "bid", "ask"])).unwrap();

        assert_eq!(table.row_count(), 1);
        let record = table.record(0).unwrap().to_map();
        assert_eq!(
            Value::Object(record),
            json!({
                "symbol": "SPY",
                "strike_milli": 450000,
                "ms_of_day": 12345,
                "bid": 1.23,
                "ask": 1.25
            })
        );
        assert!(!table.has_column("root"));
        assert!(!table.has_column("strike"));
    }

    #[test]
    fn zips_positional_rows_in_header_order() {
        let rows = vec![
            raw(json!(["SPY", 20250117, 1.0])),
            raw(json!(["SPY", 20250221, 2.0])),
        ];

        let table = normalize_rows(&rows, &columns(&["root", "expiration", "bid"])).unwrap();

        assert_eq!(table.columns(), ["symbol", "exp", "bid"]);
        assert_eq!(table.cell(1, "exp"), Some(&json!(20250221)));
    }

    #[test]
    fn mismatched_row_fails_instead_of_truncating() {
        let rows = vec![raw(json!([1, 2, 3])), raw(json!([4, 5]))];

        let err = normalize_rows(&rows, &columns(&["a", "b", "c"])).unwrap_err();

        assert!(matches!(
            err,
            AppError::ColumnMismatch {
                row: 1,
                expected: 3,
                actual: 2
            }
        ));
    }

    #[test]
    fn mismatched_tick_fails() {
        let rows = vec![raw(json!({"contract": {"root": "SPY"}, "ticks": [[1, 2]]}))];
        assert!(normalize_rows(&rows, &columns(&["a", "b", "c"])).is_err());
    }

    #[test]
    fn rename_is_idempotent() {
        let rows = vec![raw(json!(["SPY", 450000, 451.2]))];
        let once = normalize_rows(&rows, &columns(&["root", "strike", "underlying_price"])).unwrap();
        let twice = apply_renames(once.clone());

        assert_eq!(once, twice);
        assert_eq!(twice.columns(), ["symbol", "strike_milli", "underlying"]);
    }

    #[test]
    fn rename_skips_when_target_exists() {
        let rows = vec![raw(json!(["SPY", "SPY"]))];
        let table = normalize_rows(&rows, &columns(&["root", "symbol"])).unwrap();

        assert_eq!(table.columns(), ["root", "symbol"]);
    }

    #[test]
    fn keyed_rows_union_columns() {
        let rows = vec![raw(json!({"a": 1, "b": 2})), raw(json!({"b": 3, "c": 4}))];

        let table = normalize_rows(&rows, &[]).unwrap();

        assert_eq!(table.columns(), ["a", "b", "c"]);
        assert_eq!(table.cell(1, "a"), Some(&Value::Null));
        assert_eq!(table.cell(1, "c"), Some(&json!(4)));
    }

    #[test]
    fn empty_rows_keep_header() {
        let table = normalize_rows(&[], &columns(&["root", "bid"])).unwrap();
        assert!(table.is_empty());
        assert_eq!(table.columns(), ["symbol", "bid"]);
    }
}
