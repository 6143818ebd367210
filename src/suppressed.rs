//! Estimation of withheld values from their parent totals.
//!
//! Depth by depth, a withheld child receives an equal share of what its parent
//! has left after the known children are subtracted. Each depth's fills are
//! visible to the next, so a filled code can serve as a parent one level down.
use std::collections::{BTreeMap, HashMap};

use polars::prelude::*;
use serde::Deserialize;

use crate::error::Result;
use crate::hierarchy::{code_depth, truncate_code, MIN_DEPTH};
use crate::schema::{flow, reference};
use crate::table;

fn default_code_column() -> String {
    reference::SECTOR.to_string()
}

fn default_location_column() -> String {
    flow::LOCATION.to_string()
}

/// Columns identifying the hierarchy and the partitions it is filled within.
#[derive(Debug, Clone, Deserialize)]
pub struct SuppressedConfig {
    #[serde(default = "default_code_column")]
    pub code_column: String,
    #[serde(default = "default_location_column")]
    pub location_column: String,
    /// Extra partition columns, e.g. `FlowName`.
    #[serde(default)]
    pub category_columns: Vec<String>,
}

impl Default for SuppressedConfig {
    fn default() -> Self {
        Self {
            code_column: default_code_column(),
            location_column: default_location_column(),
            category_columns: Vec::new(),
        }
    }
}

impl SuppressedConfig {
    pub fn with_categories(mut self, columns: &[&str]) -> Self {
        self.category_columns = columns.iter().map(|c| c.to_string()).collect();
        self
    }
}

/// Fill withheld amounts and clear the `Suppressed` flag.
///
/// A row is withheld when its `Suppressed` flag is set, or, in a frame with no
/// such column, when its amount is null. Fills are clamped at zero; anything
/// still withheld after the deepest pass becomes zero.
pub fn estimate_suppressed(mut df: DataFrame, config: &SuppressedConfig) -> Result<DataFrame> {
    let mut partition_columns = vec![config.location_column.as_str()];
    partition_columns.extend(config.category_columns.iter().map(String::as_str));
    table::require_columns(&df, &[config.code_column.as_str(), flow::FLOW_AMOUNT])?;
    table::require_columns(&df, &partition_columns)?;

    let codes: Vec<String> = table::string_values(&df, &config.code_column)?
        .into_iter()
        .map(|c| c.unwrap_or_default())
        .collect();
    let mut amounts = table::f64_values(&df, flow::FLOW_AMOUNT)?;
    let mut withheld: Vec<bool> = if table::has_column(&df, flow::SUPPRESSED) {
        table::bool_values(&df, flow::SUPPRESSED)?
    } else {
        amounts.iter().map(Option::is_none).collect()
    };

    let pending = withheld.iter().filter(|w| **w).count();
    if pending == 0 {
        log::debug!("No withheld values to estimate");
    }

    let mut partitions: HashMap<String, Vec<usize>> = HashMap::new();
    for (i, key) in table::row_keys(&df, &partition_columns)?.into_iter().enumerate() {
        partitions.entry(key).or_default().push(i);
    }

    let max_depth = codes.iter().map(|c| code_depth(c)).max().unwrap_or(0);
    let mut filled = 0;
    for depth in MIN_DEPTH..max_depth {
        for members in partitions.values() {
            // first row per depth-L code is its parent
            let mut parents: BTreeMap<&str, usize> = BTreeMap::new();
            let mut children: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
            for &i in members {
                let code = codes[i].as_str();
                match code_depth(code) {
                    d if d == depth => {
                        parents.entry(code).or_insert(i);
                    }
                    d if d == depth + 1 => {
                        children.entry(truncate_code(code, depth)).or_default().push(i);
                    }
                    _ => {}
                }
            }

            for (prefix, parent) in parents {
                let Some(kids) = children.get(prefix) else {
                    continue;
                };
                let Some(parent_amount) = amounts[parent].filter(|_| !withheld[parent]) else {
                    continue;
                };
                let missing: Vec<usize> = kids.iter().copied().filter(|&k| withheld[k]).collect();
                if missing.is_empty() {
                    continue;
                }
                let known: f64 = kids
                    .iter()
                    .filter(|&&k| !withheld[k])
                    .map(|&k| amounts[k].unwrap_or(0.0))
                    .sum();
                let fill = ((parent_amount - known) / missing.len() as f64).max(0.0);
                for k in missing {
                    amounts[k] = Some(fill);
                    withheld[k] = false;
                    filled += 1;
                }
            }
        }
    }

    let mut defaulted = 0;
    for (amount, flag) in amounts.iter_mut().zip(withheld.iter()) {
        if *flag {
            *amount = Some(0.0);
            defaulted += 1;
        }
    }
    if pending > 0 {
        log::info!(
            "Estimated {filled} of {pending} withheld value(s); {defaulted} defaulted to 0"
        );
    }

    df.with_column(Column::new(flow::FLOW_AMOUNT.into(), amounts))?;
    df.with_column(Column::new(
        flow::SUPPRESSED.into(),
        vec![false; df.height()],
    ))?;
    Ok(df)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(rows: &[(&str, &str, Option<f64>)]) -> DataFrame {
        df!(
            reference::SECTOR => rows.iter().map(|r| r.0).collect::<Vec<_>>(),
            flow::LOCATION => rows.iter().map(|r| r.1).collect::<Vec<_>>(),
            flow::FLOW_AMOUNT => rows.iter().map(|r| r.2).collect::<Vec<_>>(),
        )
        .unwrap()
    }

    fn amounts(df: &DataFrame) -> Vec<f64> {
        table::f64_values(df, flow::FLOW_AMOUNT)
            .unwrap()
            .into_iter()
            .map(|v| v.unwrap())
            .collect()
    }

    #[test]
    fn splits_parent_remainder_across_withheld_children() {
        let df = frame(&[
            ("31", "00000", Some(100.0)),
            ("311", "00000", Some(40.0)),
            ("312", "00000", None),
            ("313", "00000", None),
        ]);
        let out = estimate_suppressed(df, &SuppressedConfig::default()).unwrap();
        assert_eq!(amounts(&out), vec![100.0, 40.0, 30.0, 30.0]);
        assert_eq!(
            table::bool_values(&out, flow::SUPPRESSED).unwrap(),
            vec![false; 4]
        );
    }

    #[test]
    fn fills_cascade_to_deeper_levels() {
        let df = frame(&[
            ("31", "00000", Some(100.0)),
            ("311", "00000", Some(40.0)),
            ("312", "00000", None),
            ("3121", "00000", None),
            ("3122", "00000", Some(10.0)),
        ]);
        let out = estimate_suppressed(df, &SuppressedConfig::default()).unwrap();
        assert_eq!(amounts(&out), vec![100.0, 40.0, 60.0, 50.0, 10.0]);
    }

    #[test]
    fn fills_are_never_negative() {
        let df = frame(&[
            ("31", "00000", Some(10.0)),
            ("311", "00000", Some(40.0)),
            ("312", "00000", None),
        ]);
        let out = estimate_suppressed(df, &SuppressedConfig::default()).unwrap();
        assert_eq!(amounts(&out), vec![10.0, 40.0, 0.0]);
    }

    #[test]
    fn orphaned_withheld_values_default_to_zero() {
        let df = frame(&[("311", "00000", Some(4.0)), ("3121", "00000", None)]);
        let out = estimate_suppressed(df, &SuppressedConfig::default()).unwrap();
        assert_eq!(amounts(&out), vec![4.0, 0.0]);
    }

    #[test]
    fn locations_are_filled_independently() {
        let df = frame(&[
            ("31", "06000", Some(10.0)),
            ("311", "06000", None),
            ("31", "41000", Some(50.0)),
            ("311", "41000", Some(20.0)),
            ("312", "41000", None),
        ]);
        let out = estimate_suppressed(df, &SuppressedConfig::default()).unwrap();
        assert_eq!(amounts(&out), vec![10.0, 10.0, 50.0, 20.0, 30.0]);
    }

    #[test]
    fn suppressed_flag_marks_withheld_rows() {
        // the zero under "312" is a true zero, not withheld
        let mut df = frame(&[
            ("31", "00000", Some(9.0)),
            ("311", "00000", None),
            ("312", "00000", Some(0.0)),
            ("313", "00000", None),
        ]);
        df.with_column(Column::new(
            flow::SUPPRESSED.into(),
            &[false, true, false, true],
        ))
        .unwrap();
        let out = estimate_suppressed(df, &SuppressedConfig::default()).unwrap();
        assert_eq!(amounts(&out), vec![9.0, 4.5, 0.0, 4.5]);
    }

    #[test]
    fn category_columns_partition_the_fill() {
        let df = df!(
            reference::SECTOR => ["31", "311", "31", "311"],
            flow::LOCATION => ["00000"; 4],
            flow::FLOW_NAME => ["Water", "Water", "Land", "Land"],
            flow::FLOW_AMOUNT => [Some(8.0), None, Some(3.0), None],
        )
        .unwrap();
        let config = SuppressedConfig::default().with_categories(&[flow::FLOW_NAME]);
        let out = estimate_suppressed(df, &config).unwrap();
        assert_eq!(amounts(&out), vec![8.0, 8.0, 3.0, 3.0]);
    }
}
