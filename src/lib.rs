//! Sector attribution and geoscale harmonization for environmental and
//! economic flow data.
//!
//! Activity-form records are mapped to candidate sectors, amounts are
//! attributed across candidates, and the result is converted to a target
//! geoscale and aggregated. See [`pipeline::SectorPipeline`] for the full run.

pub mod aggregation;
pub mod attribution;
pub mod error;
pub mod frames;
pub mod geoscale;
pub mod hierarchy;
pub mod industry_spec;
pub mod pipeline;
pub mod schema;
pub mod sector_mapper;
pub mod suppressed;
pub mod table;
pub mod validation;

#[cfg(feature = "python")]
mod model;

pub use aggregation::{aggregate, AggregationSpec};
pub use attribution::{attribute, AttributionConfig, AttributionMethod, AttributionReport};
pub use error::{FlowError, Result};
pub use frames::{ActivityFrame, MappedFrame, ReferenceFrame, SectorFrame};
pub use geoscale::{convert_to_geoscale, harmonize, Geoscale};
pub use industry_spec::{resolve_crosswalk, IndustrySpec, SectorCrosswalk};
pub use pipeline::{PipelineConfig, PipelineContext, SectorPipeline};
pub use sector_mapper::{ActivityCrosswalk, CodeTranslation, SectorMapper};
pub use suppressed::{estimate_suppressed, SuppressedConfig};
pub use validation::{compare_geographic_totals, GeoscaleComparison, ValidationConfig};

#[cfg(feature = "python")]
use pyo3::prelude::*;

/// Export schema constants as Python submodules
#[cfg(feature = "python")]
fn add_schema_exports(m: &Bound<'_, PyModule>) -> PyResult<()> {
    // Flow
    let flow = PyModule::new(m.py(), "flow")?;
    flow.add("FLOW_AMOUNT", schema::flow::FLOW_AMOUNT)?;
    flow.add("FLOW_NAME", schema::flow::FLOW_NAME)?;
    flow.add("UNIT", schema::flow::UNIT)?;
    flow.add("CLASS", schema::flow::CLASS)?;
    flow.add("SOURCE_NAME", schema::flow::SOURCE_NAME)?;
    flow.add("FLOW_TYPE", schema::flow::FLOW_TYPE)?;
    flow.add("LOCATION", schema::flow::LOCATION)?;
    flow.add("YEAR", schema::flow::YEAR)?;
    flow.add("ACTIVITY_PRODUCED_BY", schema::flow::ACTIVITY_PRODUCED_BY)?;
    flow.add("ACTIVITY_CONSUMED_BY", schema::flow::ACTIVITY_CONSUMED_BY)?;
    flow.add("SUPPRESSED", schema::flow::SUPPRESSED)?;
    m.add_submodule(&flow)?;

    // Sector
    let sector = PyModule::new(m.py(), "sector")?;
    sector.add("SECTOR_PRODUCED_BY", schema::sector::SECTOR_PRODUCED_BY)?;
    sector.add("SECTOR_CONSUMED_BY", schema::sector::SECTOR_CONSUMED_BY)?;
    m.add_submodule(&sector)?;

    // Crosswalk
    let crosswalk = PyModule::new(m.py(), "crosswalk")?;
    crosswalk.add("ACTIVITY", schema::crosswalk::ACTIVITY)?;
    crosswalk.add("SECTOR", schema::crosswalk::SECTOR)?;
    crosswalk.add("SECTOR_TYPE", schema::crosswalk::SECTOR_TYPE)?;
    crosswalk.add("SECTOR_SOURCE_NAME", schema::crosswalk::SECTOR_SOURCE_NAME)?;
    crosswalk.add("SOURCE_CODE", schema::crosswalk::SOURCE_CODE)?;
    crosswalk.add("TARGET_CODE", schema::crosswalk::TARGET_CODE)?;
    m.add_submodule(&crosswalk)?;

    // Reference
    let reference = PyModule::new(m.py(), "reference")?;
    reference.add("SECTOR", schema::reference::SECTOR)?;
    reference.add("LOCATION", schema::reference::LOCATION)?;
    reference.add("FLOW_AMOUNT", schema::reference::FLOW_AMOUNT)?;
    m.add_submodule(&reference)?;

    // FlowType
    let flow_type = PyModule::new(m.py(), "flow_type")?;
    flow_type.add("ELEMENTARY", schema::flow_type::ELEMENTARY)?;
    flow_type.add("TECHNOSPHERE", schema::flow_type::TECHNOSPHERE)?;
    flow_type.add("WASTE", schema::flow_type::WASTE)?;
    m.add_submodule(&flow_type)?;

    Ok(())
}

#[cfg(feature = "python")]
#[pymodule]
fn _core(m: &Bound<'_, PyModule>) -> PyResult<()> {
    m.add_class::<model::SectorEngine>()?;
    add_schema_exports(m)?;
    Ok(())
}
