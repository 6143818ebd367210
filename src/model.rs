use std::collections::HashMap;
use std::path::PathBuf;

use polars::prelude::*;

use pyo3::prelude::*;
use pyo3_polars::PyDataFrame;

use crate::aggregation::{self, AggregationSpec};
use crate::error::FlowError;
use crate::frames::{ActivityFrame, ReferenceFrame};
use crate::industry_spec::{self, resolve_crosswalk};
use crate::pipeline::{PipelineConfig, PipelineContext, SectorPipeline};
use crate::sector_mapper::{ActivityCrosswalk, CodeTranslation};
use crate::suppressed::{self, SuppressedConfig};
use crate::table;

#[pyclass]
pub struct SectorEngine {
    base_path: PathBuf,
    config: PipelineConfig,
    crosswalk: Option<ActivityCrosswalk>,
    hierarchy: Option<DataFrame>,
    translation: Option<CodeTranslation>,
    references: HashMap<String, ReferenceFrame>,
}

#[pymethods]
impl SectorEngine {
    /// Build an engine from a TOML pipeline configuration.
    #[new]
    #[pyo3(signature = (config, base_path="."))]
    fn new(config: &str, base_path: &str) -> PyResult<Self> {
        Ok(Self {
            base_path: PathBuf::from(base_path),
            config: PipelineConfig::from_toml(config)?,
            crosswalk: None,
            hierarchy: None,
            translation: None,
            references: HashMap::new(),
        })
    }

    // ── Data loading ────────────────────────────────────────────────────────

    /// Load any CSV into a Polars DataFrame with all columns as strings.
    /// Optionally rename columns via a map.
    #[pyo3(signature = (filename, rename=None))]
    fn load_csv(
        &self,
        filename: &str,
        rename: Option<HashMap<String, String>>,
    ) -> PyResult<PyDataFrame> {
        let df = table::read_csv_as_strings(self.base_path.join(filename), rename.as_ref())?;
        Ok(PyDataFrame(df))
    }

    /// Load a parser CSV in activity form. Withheld markers become null
    /// amounts flagged `Suppressed`.
    fn load_activity(&self, filename: &str) -> PyResult<PyDataFrame> {
        let frame = ActivityFrame::from_csv(self.base_path.join(filename))?;
        Ok(PyDataFrame(frame.into_inner()))
    }

    /// Load the activity → sector crosswalk.
    ///
    /// Required columns: Activity, Sector, SectorType, SectorSourceName
    fn load_activity_crosswalk(&mut self, filename: &str) -> PyResult<PyDataFrame> {
        let df = table::read_csv_as_strings(self.base_path.join(filename), None)?;
        self.crosswalk = Some(ActivityCrosswalk::try_new(&df)?);
        Ok(PyDataFrame(df))
    }

    /// Load the master sector hierarchy (one column per depth).
    fn load_hierarchy(&mut self, filename: &str) -> PyResult<PyDataFrame> {
        let df = industry_spec::load_hierarchy(self.base_path.join(filename))?;
        self.hierarchy = Some(df.clone());
        Ok(PyDataFrame(df))
    }

    /// Load a same-length code concordance between two revisions.
    fn load_code_translation(
        &mut self,
        filename: &str,
        from_column: &str,
        to_column: &str,
    ) -> PyResult<()> {
        self.translation = Some(CodeTranslation::from_csv(
            self.base_path.join(filename),
            from_column,
            to_column,
        )?);
        Ok(())
    }

    /// Make a reference dataset (Sector, Location, FlowAmount) available to
    /// attribution under `id`.
    fn register_reference(&mut self, id: String, df: PyDataFrame) -> PyResult<()> {
        self.references.insert(id, ReferenceFrame::try_new(df.0)?);
        Ok(())
    }

    // ── Processing ──────────────────────────────────────────────────────────

    /// Resolve the configured industry spec against the loaded hierarchy.
    fn resolve_industry_spec(&self) -> PyResult<PyDataFrame> {
        let spec = self
            .config
            .industry_spec
            .as_ref()
            .ok_or_else(|| FlowError::Configuration("No industry_spec configured".into()))?;
        let hierarchy = self
            .hierarchy
            .as_ref()
            .ok_or_else(|| FlowError::NotLoaded("sector hierarchy".into()))?;
        Ok(PyDataFrame(resolve_crosswalk(spec, hierarchy)?.to_frame()?))
    }

    /// Map, attribute, convert and aggregate an activity-form DataFrame.
    fn run(&self, activity: PyDataFrame) -> PyResult<PyDataFrame> {
        let crosswalk = self
            .crosswalk
            .clone()
            .ok_or_else(|| FlowError::NotLoaded("activity crosswalk".into()))?;

        let mut pipeline = SectorPipeline::new(self.config.clone(), crosswalk);
        if let Some(translation) = &self.translation {
            pipeline = pipeline.with_translation(translation.clone());
        }
        match &self.hierarchy {
            Some(hierarchy) => pipeline = pipeline.with_hierarchy(hierarchy)?,
            None if self.config.industry_spec.is_some() => {
                return Err(FlowError::NotLoaded("sector hierarchy".into()).into())
            }
            None => {}
        }

        let mut ctx = PipelineContext::new();
        let output = pipeline.run(&mut ctx, ActivityFrame::try_new(activity.0)?, |id| {
            self.references
                .get(id)
                .cloned()
                .ok_or_else(|| FlowError::NotLoaded(format!("reference '{id}'")))
        })?;
        ctx.finish();
        Ok(PyDataFrame(output.frame))
    }

    /// Sum amounts and amount-weight averaged columns per key.
    #[staticmethod]
    #[pyo3(signature = (df, group_by=None, average=None, retain_zeros=false))]
    fn aggregate(
        df: PyDataFrame,
        group_by: Option<Vec<String>>,
        average: Option<Vec<String>>,
        retain_zeros: bool,
    ) -> PyResult<PyDataFrame> {
        let spec = AggregationSpec {
            group_by,
            average,
            retain_zeros,
        };
        Ok(PyDataFrame(aggregation::aggregate(&df.0, &spec)?))
    }

    /// Fill withheld amounts from parent totals.
    #[staticmethod]
    #[pyo3(signature = (df, code_column=None, location_column=None, category_columns=None))]
    fn estimate_suppressed(
        df: PyDataFrame,
        code_column: Option<String>,
        location_column: Option<String>,
        category_columns: Option<Vec<String>>,
    ) -> PyResult<PyDataFrame> {
        let defaults = SuppressedConfig::default();
        let config = SuppressedConfig {
            code_column: code_column.unwrap_or(defaults.code_column),
            location_column: location_column.unwrap_or(defaults.location_column),
            category_columns: category_columns.unwrap_or(defaults.category_columns),
        };
        Ok(PyDataFrame(suppressed::estimate_suppressed(df.0, &config)?))
    }

    // ── Properties ──────────────────────────────────────────────────────────

    #[getter]
    fn attribution_method(&self) -> String {
        self.config.attribution.method.to_string()
    }

    #[getter]
    fn hierarchy_df(&self) -> Option<PyDataFrame> {
        self.hierarchy.clone().map(PyDataFrame)
    }
}
