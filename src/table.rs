use std::collections::HashMap;
use std::path::Path;

use polars::prelude::*;

use crate::error::{FlowError, Result};
use crate::schema::flow;

/// Cell values source agencies use to mark a withheld amount.
pub const WITHHELD_MARKERS: [&str; 4] = ["(D)", "(S)", "(X)", "(Z)"];

const KEY_SEPARATOR: char = '\u{1f}';
const NULL_KEY: &str = "\u{0}";

/// Read a CSV file with all columns as String dtype.
/// Trims whitespace from column names and applies optional rename.
pub fn read_csv_as_strings(
    path: impl AsRef<Path>,
    rename: Option<&HashMap<String, String>>,
) -> Result<DataFrame> {
    let mut df = CsvReadOptions::default()
        .with_has_header(true)
        .with_infer_schema_length(Some(0)) // all columns as String
        .try_into_reader_with_file_path(Some(path.as_ref().to_path_buf()))?
        .finish()?;

    let trimmed: Vec<String> = df
        .get_column_names_str()
        .iter()
        .map(|c| c.trim().to_string())
        .collect();
    df.set_column_names(trimmed.as_slice())?;

    if let Some(map) = rename {
        let old: Vec<&str> = map.keys().map(|s| s.as_str()).collect();
        let new: Vec<&str> = map.values().map(|s| s.as_str()).collect();
        df = df.lazy().rename(old, new, true).collect()?;
    }

    Ok(df)
}

pub fn has_column(df: &DataFrame, name: &str) -> bool {
    df.schema().contains(name)
}

pub fn require_columns(df: &DataFrame, required: &[&str]) -> Result<()> {
    for &col_name in required {
        if !has_column(df, col_name) {
            return Err(FlowError::MissingColumn(col_name.to_string()));
        }
    }
    Ok(())
}

/// Return a copy of `df` without the named columns. Absent names are ignored.
pub fn drop_columns(df: &DataFrame, names: &[&str]) -> Result<DataFrame> {
    let keep: Vec<String> = df
        .get_column_names_str()
        .iter()
        .filter(|c| !names.contains(c))
        .map(|c| c.to_string())
        .collect();
    Ok(df.select(keep)?)
}

pub fn string_values(df: &DataFrame, name: &str) -> Result<Vec<Option<String>>> {
    let column = df.column(name)?.cast(&DataType::String)?;
    let values = column
        .str()?
        .into_iter()
        .map(|v| v.map(|s| s.to_string()))
        .collect();
    Ok(values)
}

pub fn f64_values(df: &DataFrame, name: &str) -> Result<Vec<Option<f64>>> {
    let column = df.column(name)?.cast(&DataType::Float64)?;
    Ok(column.f64()?.into_iter().collect())
}

/// Boolean column values; nulls read as `false`.
pub fn bool_values(df: &DataFrame, name: &str) -> Result<Vec<bool>> {
    let column = df.column(name)?.cast(&DataType::Boolean)?;
    Ok(column
        .bool()?
        .into_iter()
        .map(|v| v.unwrap_or(false))
        .collect())
}

pub fn u32_values(df: &DataFrame, name: &str) -> Result<Vec<u32>> {
    let column = df.column(name)?.cast(&DataType::UInt32)?;
    column
        .u32()?
        .into_iter()
        .enumerate()
        .map(|(i, v)| v.ok_or_else(|| FlowError::InvalidData(format!("Null {name} at row {i}"))))
        .collect()
}

/// Sequential `u32` ids for `height` rows.
pub fn row_ids(height: usize) -> Result<Vec<u32>> {
    let n = u32::try_from(height).map_err(|_| {
        FlowError::InvalidData(format!("{height} rows exceed the u32 id range"))
    })?;
    Ok((0..n).collect())
}

/// One composite string key per row over `names`, nulls kept distinct from "".
pub fn row_keys(df: &DataFrame, names: &[&str]) -> Result<Vec<String>> {
    let mut keys = vec![String::new(); df.height()];
    for (n, name) in names.iter().enumerate() {
        let values = string_values(df, name)?;
        for (key, value) in keys.iter_mut().zip(values) {
            if n > 0 {
                key.push(KEY_SEPARATOR);
            }
            key.push_str(value.as_deref().unwrap_or(NULL_KEY));
        }
    }
    Ok(keys)
}

/// Parse a raw amount cell into (amount, withheld).
///
/// Withheld markers give `(None, true)`; blanks give `(None, false)`.
/// Thousands separators are accepted.
pub fn parse_amount(raw: Option<&str>) -> Result<(Option<f64>, bool)> {
    let Some(raw) = raw.map(str::trim) else {
        return Ok((None, false));
    };
    if raw.is_empty() {
        return Ok((None, false));
    }
    if WITHHELD_MARKERS.contains(&raw) {
        return Ok((None, true));
    }
    raw.replace(',', "")
        .parse::<f64>()
        .map(|v| (Some(v), false))
        .map_err(|_| FlowError::InvalidData(format!("Cannot parse amount '{raw}'")))
}

/// Replace a String `FlowAmount` column with Float64 amounts plus the `Suppressed` flag.
pub fn parse_amount_column(mut df: DataFrame) -> Result<DataFrame> {
    let raw = string_values(&df, flow::FLOW_AMOUNT)?;
    let mut amounts = Vec::with_capacity(raw.len());
    let mut withheld = Vec::with_capacity(raw.len());
    for value in &raw {
        let (amount, is_withheld) = parse_amount(value.as_deref())?;
        amounts.push(amount);
        withheld.push(is_withheld);
    }
    df.with_column(Column::new(flow::FLOW_AMOUNT.into(), amounts))?;
    df.with_column(Column::new(flow::SUPPRESSED.into(), withheld))?;
    Ok(df)
}
