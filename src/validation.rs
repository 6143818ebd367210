//! Consistency checks between a dataset and its geoscale-converted form.
use std::collections::BTreeMap;

use polars::prelude::*;
use serde::Deserialize;

use crate::error::{FlowError, Result};
use crate::geoscale::{with_truncated_location, Geoscale};
use crate::schema::flow;
use crate::table;

const COMPARISON_LOCATION: &str = "__comparison_location";

fn default_tolerance() -> f64 {
    0.01
}

#[derive(Debug, Clone, Deserialize)]
pub struct ValidationConfig {
    /// Relative difference above which a location is reported.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    /// Raise `DataLoss` on the first reported location instead of logging.
    #[serde(default)]
    pub fail_on_loss: bool,
}

impl Default for ValidationConfig {
    fn default() -> Self {
        Self {
            tolerance: default_tolerance(),
            fail_on_loss: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Discrepancy {
    /// Subset column values joined with `/`.
    pub subset: String,
    pub location: String,
    pub original: f64,
    pub converted: f64,
    pub relative_difference: f64,
}

#[derive(Debug, Clone)]
pub struct GeoscaleComparison {
    pub target: Geoscale,
    /// Number of (subset, location) totals compared.
    pub compared: usize,
    pub discrepancies: Vec<Discrepancy>,
}

impl GeoscaleComparison {
    pub fn is_consistent(&self) -> bool {
        self.discrepancies.is_empty()
    }
}

fn relative_difference(original: f64, converted: f64) -> f64 {
    if original == converted {
        0.0
    } else if original == 0.0 {
        f64::INFINITY
    } else {
        (original - converted).abs() / original.abs()
    }
}

/// Flow totals by (subset values, location truncated to `target`).
fn totals_at(
    df: &DataFrame,
    target: Geoscale,
    subset: &[&str],
) -> Result<BTreeMap<(String, String), f64>> {
    let df = with_truncated_location(df.clone(), target, COMPARISON_LOCATION)?;
    let mut by: Vec<Expr> = subset.iter().map(|c| col(*c)).collect();
    by.push(col(COMPARISON_LOCATION));
    let summed = df
        .lazy()
        .group_by(by)
        .agg([col(flow::FLOW_AMOUNT).sum()])
        .collect()?;

    let keys = table::row_keys(&summed, subset)?;
    let locations = table::string_values(&summed, COMPARISON_LOCATION)?;
    let amounts = table::f64_values(&summed, flow::FLOW_AMOUNT)?;
    Ok(keys
        .into_iter()
        .zip(locations)
        .zip(amounts)
        .map(|((key, location), amount)| {
            (
                (key.replace('\u{1f}', "/"), location.unwrap_or_default()),
                amount.unwrap_or(0.0),
            )
        })
        .collect())
}

/// Compare flow totals of `original` and `converted` at the `target` geoscale,
/// per subset of `subset` column values. Differences beyond the configured
/// relative tolerance are logged, or raised as `DataLoss` when
/// `fail_on_loss` is set.
pub fn compare_geographic_totals(
    original: &DataFrame,
    converted: &DataFrame,
    target: Geoscale,
    subset: &[&str],
    config: &ValidationConfig,
) -> Result<GeoscaleComparison> {
    let mut required = vec![flow::FLOW_AMOUNT, flow::LOCATION];
    required.extend_from_slice(subset);
    table::require_columns(original, &required)?;
    table::require_columns(converted, &required)?;

    let before = totals_at(original, target, subset)?;
    let after = totals_at(converted, target, subset)?;

    let mut keys: Vec<&(String, String)> = before.keys().chain(after.keys()).collect();
    keys.sort();
    keys.dedup();

    let mut discrepancies = Vec::new();
    for key in &keys {
        let original = before.get(*key).copied().unwrap_or(0.0);
        let converted = after.get(*key).copied().unwrap_or(0.0);
        let relative = relative_difference(original, converted);
        if relative > config.tolerance {
            let (subset, location) = (*key).clone();
            log::warn!(
                "Geoscale conversion to {target} changed {subset} at {location}: \
                 {original} -> {converted} (relative difference {relative:.4})"
            );
            if config.fail_on_loss {
                return Err(FlowError::DataLoss {
                    location,
                    original,
                    converted,
                    relative_difference: relative,
                });
            }
            discrepancies.push(Discrepancy {
                subset,
                location,
                original,
                converted,
                relative_difference: relative,
            });
        }
    }

    log::info!(
        "Compared {} total(s) at {target}; {} beyond tolerance {}",
        keys.len(),
        discrepancies.len(),
        config.tolerance
    );
    Ok(GeoscaleComparison {
        target,
        compared: keys.len(),
        discrepancies,
    })
}
