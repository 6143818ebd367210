//! Stage-typed record batches.
//!
//! Each stage wraps a `DataFrame` whose required columns are checked once at
//! construction, so downstream components can rely on a fixed schema:
//!
//! `ActivityFrame` --map--> `MappedFrame` --attribute--> `SectorFrame` --into_output--> `DataFrame`
use std::collections::HashMap;
use std::path::Path;

use polars::prelude::*;

use crate::attribution::sector_roles;
use crate::error::{FlowError, Result};
use crate::geoscale::Geoscale;
use crate::schema::{flow, group, reference, sector};
use crate::table;

// ── Activity stage ──────────────────────────────────────────────────────────

/// Parser output: flows tagged with free-form activity labels.
#[derive(Debug, Clone)]
pub struct ActivityFrame(DataFrame);

impl ActivityFrame {
    /// Required columns: FlowAmount, Unit, ActivityProducedBy, ActivityConsumedBy,
    /// FlowType, Location, Year, Class, SourceName.
    /// A missing `Suppressed` column is added as all-false.
    pub fn try_new(df: DataFrame) -> Result<Self> {
        table::require_columns(&df, &flow::REQUIRED)?;
        let stale: Vec<&str> = [sector::SECTOR_PRODUCED_BY, sector::SECTOR_CONSUMED_BY]
            .into_iter()
            .chain(group::ALL)
            .collect();
        let df = table::drop_columns(&df, &stale)?;

        let suppressed = if table::has_column(&df, flow::SUPPRESSED) {
            col(flow::SUPPRESSED).cast(DataType::Boolean)
        } else {
            lit(false).alias(flow::SUPPRESSED)
        };
        let df = df
            .lazy()
            .with_columns([
                col(flow::FLOW_AMOUNT).cast(DataType::Float64),
                col(flow::ACTIVITY_PRODUCED_BY).cast(DataType::String),
                col(flow::ACTIVITY_CONSUMED_BY).cast(DataType::String),
                col(flow::LOCATION).cast(DataType::String),
                suppressed,
            ])
            .collect()?;
        Ok(Self(df))
    }

    /// Load a parser CSV. Amount cells carrying a withheld marker become
    /// null amounts flagged `Suppressed`; quality scores are parsed as floats.
    pub fn from_csv(path: impl AsRef<Path>) -> Result<Self> {
        let raw = table::read_csv_as_strings(path, None)?;
        table::require_columns(&raw, &flow::REQUIRED)?;
        let mut df = table::parse_amount_column(raw)?;
        for score in flow::QUALITY_SCORES {
            if table::has_column(&df, score) {
                df = df
                    .lazy()
                    .with_columns([col(score)
                        .str()
                        .strip_chars(lit(" \t\r\n"))
                        .cast(DataType::Float64)])
                    .collect()?;
            }
        }
        // Empty activity cells mean "no activity" rather than an empty label.
        for activity in [flow::ACTIVITY_PRODUCED_BY, flow::ACTIVITY_CONSUMED_BY] {
            let values: Vec<Option<String>> = table::string_values(&df, activity)?
                .into_iter()
                .map(|v| v.filter(|s| !s.trim().is_empty()))
                .collect();
            df.with_column(Column::new(activity.into(), values))?;
        }
        Self::try_new(df)
    }

    pub fn as_frame(&self) -> &DataFrame {
        &self.0
    }

    pub fn into_inner(self) -> DataFrame {
        self.0
    }

    /// Tag every record with its origin (`group_id`) and pre-fan-out amount (`group_total`).
    pub(crate) fn into_tagged(self) -> Result<DataFrame> {
        let mut df = self.0;
        let ids = table::row_ids(df.height())?;
        let totals = df
            .column(flow::FLOW_AMOUNT)?
            .clone()
            .with_name(group::GROUP_TOTAL.into());
        df.with_column(Column::new(group::GROUP_ID.into(), ids))?;
        df.with_column(totals)?;
        Ok(df)
    }
}

// ── Mapped stage ────────────────────────────────────────────────────────────

/// Activity records fanned out to candidate sectors, one row per candidate.
#[derive(Debug, Clone)]
pub struct MappedFrame(DataFrame);

impl MappedFrame {
    pub fn try_new(df: DataFrame) -> Result<Self> {
        table::require_columns(&df, &flow::REQUIRED)?;
        table::require_columns(
            &df,
            &[sector::SECTOR_PRODUCED_BY, sector::SECTOR_CONSUMED_BY],
        )?;
        table::require_columns(&df, &group::ALL)?;
        Ok(Self(df))
    }

    pub fn as_frame(&self) -> &DataFrame {
        &self.0
    }

    pub fn into_inner(self) -> DataFrame {
        self.0
    }

    /// Number of distinct origin records.
    pub fn group_count(&self) -> Result<usize> {
        Ok(self.0.column(group::GROUP_ID)?.n_unique()?)
    }
}

// ── Sector stage ────────────────────────────────────────────────────────────

/// Attributed records. Bookkeeping columns are still present so group
/// invariants can be checked; `into_output` removes them.
#[derive(Debug, Clone)]
pub struct SectorFrame(DataFrame);

impl SectorFrame {
    pub fn try_new(df: DataFrame) -> Result<Self> {
        table::require_columns(&df, &flow::REQUIRED)?;
        table::require_columns(
            &df,
            &[sector::SECTOR_PRODUCED_BY, sector::SECTOR_CONSUMED_BY],
        )?;
        table::require_columns(&df, &group::ALL)?;
        Ok(Self(df))
    }

    pub fn as_frame(&self) -> &DataFrame {
        &self.0
    }

    /// Final delivery form: every descriptive column, no bookkeeping.
    pub fn into_output(self) -> Result<DataFrame> {
        table::drop_columns(&self.0, &group::ALL)
    }
}

// ── Reference stage ─────────────────────────────────────────────────────────

/// Attribution source: amounts by (Sector, Location).
#[derive(Debug, Clone)]
pub struct ReferenceFrame(DataFrame);

impl ReferenceFrame {
    pub fn try_new(df: DataFrame) -> Result<Self> {
        table::require_columns(
            &df,
            &[reference::SECTOR, reference::LOCATION, reference::FLOW_AMOUNT],
        )?;
        let df = df
            .lazy()
            .with_columns([
                col(reference::SECTOR).cast(DataType::String),
                col(reference::LOCATION).cast(DataType::String),
                col(reference::FLOW_AMOUNT).cast(DataType::Float64),
            ])
            .collect()?;
        Ok(Self(df))
    }

    /// Collapse an attributed dataset to reference form on its primary sector role.
    pub fn from_sector_frame(frame: &SectorFrame) -> Result<Self> {
        let df = frame.as_frame();
        let (primary, _) = sector_roles(df)?;
        let amounts = table::f64_values(df, flow::FLOW_AMOUNT)?;
        let locations = table::string_values(df, flow::LOCATION)?;
        let reference = DataFrame::new(vec![
            Column::new(reference::SECTOR.into(), primary),
            Column::new(reference::LOCATION.into(), locations),
            Column::new(reference::FLOW_AMOUNT.into(), amounts),
        ])?;
        let summed = reference
            .lazy()
            .filter(col(reference::SECTOR).is_not_null())
            .group_by_stable([col(reference::SECTOR), col(reference::LOCATION)])
            .agg([col(reference::FLOW_AMOUNT).sum()])
            .collect()?;
        Self::try_new(summed)
    }

    pub fn as_frame(&self) -> &DataFrame {
        &self.0
    }

    pub fn into_inner(self) -> DataFrame {
        self.0
    }

    pub fn geoscale(&self) -> Result<Geoscale> {
        Geoscale::finest_in(&self.0)?
            .ok_or_else(|| FlowError::InvalidData("Reference dataset has no locations".into()))
    }

    /// Reference amount per (sector, location); duplicate keys are summed and
    /// null amounts count as zero.
    pub fn weights(&self) -> Result<HashMap<(String, String), f64>> {
        let sectors = table::string_values(&self.0, reference::SECTOR)?;
        let locations = table::string_values(&self.0, reference::LOCATION)?;
        let amounts = table::f64_values(&self.0, reference::FLOW_AMOUNT)?;

        let mut weights = HashMap::new();
        for ((sector, location), amount) in sectors.into_iter().zip(locations).zip(amounts) {
            if let (Some(sector), Some(location)) = (sector, location) {
                *weights.entry((sector, location)).or_insert(0.0) += amount.unwrap_or(0.0);
            }
        }
        Ok(weights)
    }
}
