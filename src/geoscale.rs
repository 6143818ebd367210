//! Geographic resolution levels and the harmonizer that lines up a calling
//! dataset with an attribution reference reported at another level.

use std::fmt;
use std::str::FromStr;

use polars::prelude::*;
use serde::Deserialize;

use crate::error::{FlowError, Result};
use crate::frames::ReferenceFrame;
use crate::schema::{attribution, flow, location, reference};
use crate::table;

/// Ordered geographic resolution; `County < State < National`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Geoscale {
    County,
    State,
    National,
}

impl Geoscale {
    /// Truncate a FIPS location code to this resolution.
    pub fn truncate(&self, code: &str) -> String {
        match self {
            Self::National => location::US_FIPS.to_string(),
            Self::State => {
                let state: String = code.chars().take(location::STATE_DIGITS).collect();
                format!("{state:0<width$}", width = location::FIPS_LEN)
            }
            Self::County => code.to_string(),
        }
    }

    /// Resolution a single FIPS code is reported at.
    pub fn of_location(code: &str) -> Self {
        if code == location::US_FIPS {
            Self::National
        } else if code.len() == location::FIPS_LEN && code.ends_with("000") {
            Self::State
        } else {
            Self::County
        }
    }

    /// Finest resolution present in a frame's `Location` column.
    pub fn finest_in(df: &DataFrame) -> Result<Option<Self>> {
        let locations = table::string_values(df, flow::LOCATION)?;
        Ok(locations
            .iter()
            .flatten()
            .map(|code| Self::of_location(code))
            .min())
    }
}

impl fmt::Display for Geoscale {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::County => write!(f, "county"),
            Self::State => write!(f, "state"),
            Self::National => write!(f, "national"),
        }
    }
}

impl FromStr for Geoscale {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().as_str() {
            "county" => Ok(Self::County),
            "state" => Ok(Self::State),
            "national" => Ok(Self::National),
            other => Err(FlowError::Configuration(format!(
                "Unknown geoscale '{other}'. Must be 'county', 'state' or 'national'"
            ))),
        }
    }
}

/// A calling dataset and a reference dataset ready to be joined on
/// (sector, `AttributionLocation`).
pub struct Harmonized {
    pub calling: DataFrame,
    pub reference: ReferenceFrame,
    pub calling_scale: Geoscale,
    pub reference_scale: Geoscale,
}

/// Align `reference` with `calling` so the attribution join is one-to-one on location.
///
/// - reference finer than calling: reference locations are truncated and summed.
/// - reference coarser than calling: calling keeps its true `Location` and gets an
///   `AttributionLocation` truncated to the reference level, so each calling row
///   receives the coarser value unchanged.
/// - equal: `AttributionLocation` is a copy of `Location`.
pub fn harmonize(calling: DataFrame, reference: &ReferenceFrame) -> Result<Harmonized> {
    let calling_scale = Geoscale::finest_in(&calling)?
        .ok_or_else(|| FlowError::InvalidData("Calling dataset has no locations".into()))?;
    let reference_scale = reference.geoscale()?;

    let join_scale = calling_scale.max(reference_scale);
    let calling = with_truncated_location(calling, join_scale, attribution::ATTRIBUTION_LOCATION)?;

    let reference = if reference_scale < calling_scale {
        log::info!("Aggregating {reference_scale} reference data up to {calling_scale}");
        aggregate_to_scale(reference, calling_scale)?
    } else {
        if reference_scale > calling_scale {
            log::info!(
                "Broadcasting {reference_scale} reference data to {calling_scale} calling data"
            );
        }
        reference.clone()
    };

    Ok(Harmonized {
        calling,
        reference,
        calling_scale,
        reference_scale,
    })
}

/// Add (or replace) `target` with `Location` truncated to `scale`.
pub fn with_truncated_location(
    mut df: DataFrame,
    scale: Geoscale,
    target: &str,
) -> Result<DataFrame> {
    let truncated: Vec<Option<String>> = table::string_values(&df, flow::LOCATION)?
        .into_iter()
        .map(|code| code.map(|c| scale.truncate(&c)))
        .collect();
    df.with_column(Column::new(target.into(), truncated))?;
    Ok(df)
}

fn aggregate_to_scale(reference: &ReferenceFrame, scale: Geoscale) -> Result<ReferenceFrame> {
    let df = with_truncated_location(reference.as_frame().clone(), scale, reference::LOCATION)?;
    let summed = df
        .lazy()
        .group_by_stable([col(reference::SECTOR), col(reference::LOCATION)])
        .agg([col(reference::FLOW_AMOUNT).sum()])
        .collect()?;
    ReferenceFrame::try_new(summed)
}

/// Truncate every location of a finer frame to `target`.
///
/// Frames already at or above `target` are returned unchanged; a coarser frame
/// cannot be disaggregated here and is only logged.
pub fn convert_to_geoscale(df: DataFrame, target: Geoscale) -> Result<DataFrame> {
    let Some(current) = Geoscale::finest_in(&df)? else {
        return Ok(df);
    };
    if current > target {
        log::warn!("Data at {current} cannot be converted down to {target}; leaving as is");
        return Ok(df);
    }
    if current == target {
        return Ok(df);
    }
    with_truncated_location(df, target, flow::LOCATION)
}
