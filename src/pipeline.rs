//! Run-scoped orchestration: mapping, attribution, geoscale conversion,
//! validation and aggregation of one activity batch.
use std::collections::hash_map::Entry;
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use polars::prelude::*;
use serde::Deserialize;
use uuid::Uuid;

use crate::aggregation::{aggregate, AggregationSpec};
use crate::attribution::{attribute, AttributionConfig, AttributionReport};
use crate::error::{FlowError, Result};
use crate::frames::{ActivityFrame, ReferenceFrame};
use crate::geoscale::{convert_to_geoscale, Geoscale};
use crate::industry_spec::{resolve_crosswalk, IndustrySpec};
use crate::schema::flow;
use crate::sector_mapper::{ActivityCrosswalk, CodeTranslation, SectorMapper};
use crate::suppressed::{estimate_suppressed, SuppressedConfig};
use crate::table;
use crate::validation::{compare_geographic_totals, GeoscaleComparison, ValidationConfig};

/// Columns totals are compared over after geoscale conversion: one subset
/// per flow and activity pair.
const VALIDATION_SUBSET: [&str; 4] = [
    flow::FLOW_NAME,
    flow::UNIT,
    flow::ACTIVITY_PRODUCED_BY,
    flow::ACTIVITY_CONSUMED_BY,
];

// ── Configuration ───────────────────────────────────────────────────────────

fn default_target_year() -> u16 {
    2012
}

fn default_keep_unmapped() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
pub struct MappingConfig {
    /// Classification revision output codes are expressed in.
    #[serde(default = "default_target_year")]
    pub target_year: u16,
    #[serde(default = "default_keep_unmapped")]
    pub keep_unmapped: bool,
}

impl Default for MappingConfig {
    fn default() -> Self {
        Self {
            target_year: default_target_year(),
            keep_unmapped: default_keep_unmapped(),
        }
    }
}

/// Everything one source needs to go from activity to sector form.
///
/// ```toml
/// target_geoscale = "state"
///
/// [mapping]
/// target_year = 2012
///
/// [attribution]
/// method = "proportional"
/// attribution_source = "Employment_national_2012"
///
/// [industry_spec]
/// default = "NAICS_6"
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineConfig {
    pub attribution: AttributionConfig,
    #[serde(default)]
    pub industry_spec: Option<IndustrySpec>,
    #[serde(default)]
    pub target_geoscale: Option<Geoscale>,
    #[serde(default)]
    pub mapping: MappingConfig,
    #[serde(default)]
    pub validation: ValidationConfig,
    #[serde(default)]
    pub aggregation: AggregationSpec,
    #[serde(default)]
    pub suppressed: SuppressedConfig,
}

impl PipelineConfig {
    pub fn new(attribution: AttributionConfig) -> Self {
        Self {
            attribution,
            industry_spec: None,
            target_geoscale: None,
            mapping: MappingConfig::default(),
            validation: ValidationConfig::default(),
            aggregation: AggregationSpec::default(),
            suppressed: SuppressedConfig::default(),
        }
    }

    pub fn from_toml(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| FlowError::Configuration(e.to_string()))
    }
}

// ── Run context ─────────────────────────────────────────────────────────────

/// Reference datasets loaded during one run, keyed by dataset identifier.
#[derive(Debug, Default)]
pub struct ReferenceCache {
    frames: HashMap<String, ReferenceFrame>,
    hits: usize,
    misses: usize,
}

impl ReferenceCache {
    /// Return the cached dataset for `id`, loading it on first use.
    /// A failed load is not cached.
    pub fn get_or_load<F>(&mut self, id: &str, load: F) -> Result<&ReferenceFrame>
    where
        F: FnOnce(&str) -> Result<ReferenceFrame>,
    {
        match self.frames.entry(id.to_string()) {
            Entry::Occupied(entry) => {
                self.hits += 1;
                log::debug!("Reference '{id}' served from cache");
                Ok(&*entry.into_mut())
            }
            Entry::Vacant(entry) => {
                self.misses += 1;
                log::info!("Loading reference '{id}'");
                Ok(&*entry.insert(load(id)?))
            }
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.frames.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn hits(&self) -> usize {
        self.hits
    }

    pub fn misses(&self) -> usize {
        self.misses
    }
}

/// State for one top-level run. The cache is dropped with the context.
#[derive(Debug)]
pub struct PipelineContext {
    run_id: Uuid,
    started_at: DateTime<Utc>,
    cache: ReferenceCache,
}

#[derive(Debug, Clone)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub references_loaded: usize,
    pub cache_hits: usize,
}

impl PipelineContext {
    pub fn new() -> Self {
        let run_id = Uuid::new_v4();
        log::info!("Starting run {run_id}");
        Self {
            run_id,
            started_at: Utc::now(),
            cache: ReferenceCache::default(),
        }
    }

    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    pub fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    pub fn cache(&self) -> &ReferenceCache {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut ReferenceCache {
        &mut self.cache
    }

    pub fn finish(self) -> RunSummary {
        let finished_at = Utc::now();
        log::info!(
            "Run {} finished in {} ms: {} reference(s) loaded, {} cache hit(s)",
            self.run_id,
            (finished_at - self.started_at).num_milliseconds(),
            self.cache.misses,
            self.cache.hits
        );
        RunSummary {
            run_id: self.run_id,
            started_at: self.started_at,
            finished_at,
            references_loaded: self.cache.misses,
            cache_hits: self.cache.hits,
        }
    }
}

impl Default for PipelineContext {
    fn default() -> Self {
        Self::new()
    }
}

// ── Pipeline ────────────────────────────────────────────────────────────────

pub struct PipelineOutput {
    /// Sector-form records, bookkeeping removed, converted and aggregated.
    pub frame: DataFrame,
    pub attribution: AttributionReport,
    /// Present when a target geoscale is configured.
    pub validation: Option<GeoscaleComparison>,
}

pub struct SectorPipeline {
    config: PipelineConfig,
    mapper: SectorMapper,
}

impl SectorPipeline {
    pub fn new(config: PipelineConfig, crosswalk: ActivityCrosswalk) -> Self {
        let mapper = SectorMapper::new(crosswalk, config.mapping.target_year)
            .keep_unmapped(config.mapping.keep_unmapped);
        Self { config, mapper }
    }

    pub fn with_translation(mut self, translation: CodeTranslation) -> Self {
        self.mapper = self.mapper.with_translation(translation);
        self
    }

    /// Resolve the configured industry spec against `hierarchy` and rewrite
    /// mapped codes to it. Without an industry spec this is a no-op.
    pub fn with_hierarchy(mut self, hierarchy: &DataFrame) -> Result<Self> {
        if let Some(spec) = &self.config.industry_spec {
            let crosswalk = resolve_crosswalk(spec, hierarchy)?;
            self.mapper = self.mapper.with_industry_crosswalk(crosswalk);
        }
        Ok(self)
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Take one activity batch to final sector form.
    ///
    /// `loader` is called at most once per reference identifier per context.
    pub fn run<L>(
        &self,
        ctx: &mut PipelineContext,
        activity: ActivityFrame,
        mut loader: L,
    ) -> Result<PipelineOutput>
    where
        L: FnMut(&str) -> Result<ReferenceFrame>,
    {
        let run_id = ctx.run_id();
        let attribution = &self.config.attribution;
        log::info!(
            "Run {run_id}: {} activity rows, {} attribution",
            activity.as_frame().height(),
            attribution.method
        );

        let mapped = self.mapper.map(activity)?;

        let reference = match &attribution.attribution_source {
            Some(source) => {
                let estimate = attribution.estimate_suppressed;
                let suppressed = &self.config.suppressed;
                Some(ctx.cache_mut().get_or_load(source, |id| {
                    let reference = loader(id)?;
                    if estimate {
                        ReferenceFrame::try_new(estimate_suppressed(
                            reference.into_inner(),
                            suppressed,
                        )?)
                    } else {
                        Ok(reference)
                    }
                })?)
            }
            None if attribution.method.needs_reference() => {
                return Err(FlowError::Configuration(format!(
                    "Attribution method '{}' needs an attribution_source",
                    attribution.method
                )))
            }
            None => None,
        };

        let attributed = attribute(mapped, reference, attribution)?;
        let output = attributed.frame.into_output()?;

        let (frame, validation) = match self.config.target_geoscale {
            Some(target) => {
                let converted = convert_to_geoscale(output.clone(), target)?;
                let aggregated = aggregate(&converted, &self.config.aggregation)?;
                let subset: Vec<&str> = VALIDATION_SUBSET
                    .into_iter()
                    .filter(|c| table::has_column(&output, c) && table::has_column(&aggregated, c))
                    .collect();
                let comparison = compare_geographic_totals(
                    &output,
                    &aggregated,
                    target,
                    &subset,
                    &self.config.validation,
                )?;
                (aggregated, Some(comparison))
            }
            None => (aggregate(&output, &self.config.aggregation)?, None),
        };

        log::info!("Run {run_id}: {} sector rows", frame.height());
        Ok(PipelineOutput {
            frame,
            attribution: attributed.report,
            validation,
        })
    }
}
