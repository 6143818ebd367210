mod common;

use std::fs;
use std::path::Path;

use common::*;
use flowsector::industry_spec::load_hierarchy;
use flowsector::schema::{flow, sector};
use flowsector::{
    ActivityCrosswalk, ActivityFrame, FlowError, PipelineConfig, PipelineContext, SectorPipeline,
};
use tempfile::TempDir;

const ACTIVITY_CSV: &str = "\
FlowName,FlowAmount,Unit,ActivityProducedBy,ActivityConsumedBy,FlowType,Location,Year,Class,SourceName
Water,\"1,200\",Mgal,Irrigation,,ELEMENTARY_FLOW,06037,2012,Water,USGS_Water
Water,(D),Mgal,Mining,,ELEMENTARY_FLOW,06001,2012,Water,USGS_Water
Water,300,Mgal,Livestock,,ELEMENTARY_FLOW,41001,2012,Water,USGS_Water
";

const CROSSWALK_CSV: &str = "\
Activity,Sector,SectorType,SectorSourceName
Irrigation,111120,I,NAICS_2012_Code
Irrigation,111150,I,NAICS_2012_Code
Mining,213110,I,NAICS_2012_Code
Livestock,1129,I,NAICS_2012_Code
";

const HIERARCHY_CSV: &str = "\
NAICS_2,NAICS_3,NAICS_4,NAICS_5,NAICS_6
11,111,1111,11112,111120
11,111,1111,11115,111150
11,112,1129,11291,112910
11,112,1129,11299,112990
21,213,2131,21311,213110
";

const CONFIG: &str = r#"
target_geoscale = "state"

[attribution]
method = "equal"

[industry_spec]
default = "NAICS_3"

[[industry_spec.overrides]]
level = "NAICS_6"
codes = ["1129"]
"#;

fn write(dir: &Path, name: &str, contents: &str) -> std::path::PathBuf {
    let path = dir.join(name);
    fs::write(&path, contents).unwrap();
    path
}

#[test]
fn csv_sources_run_end_to_end() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let activity = ActivityFrame::from_csv(write(dir.path(), "flows.csv", ACTIVITY_CSV)).unwrap();
    let crosswalk =
        ActivityCrosswalk::from_csv(write(dir.path(), "crosswalk.csv", CROSSWALK_CSV)).unwrap();
    let hierarchy = load_hierarchy(write(dir.path(), "naics.csv", HIERARCHY_CSV)).unwrap();

    assert_eq!(
        flowsector::table::bool_values(activity.as_frame(), flow::SUPPRESSED).unwrap(),
        vec![false, true, false]
    );

    let pipeline = SectorPipeline::new(PipelineConfig::from_toml(CONFIG).unwrap(), crosswalk)
        .with_hierarchy(&hierarchy)
        .unwrap();
    let mut ctx = PipelineContext::new();
    let output = pipeline
        .run(&mut ctx, activity, |id| {
            Err(FlowError::NotLoaded(id.to_string()))
        })
        .unwrap();
    let summary = ctx.finish();

    let frame = &output.frame;
    assert_eq!(
        strings(frame, sector::SECTOR_PRODUCED_BY),
        vec!["111", "213", "112910", "112990"]
    );
    assert_eq!(
        strings(frame, flow::LOCATION),
        vec!["06000", "06000", "41000", "41000"]
    );
    // the withheld Mining record stays withheld rather than vanishing
    assert_eq!(
        flowsector::table::f64_values(frame, flow::FLOW_AMOUNT).unwrap(),
        vec![Some(1200.0), None, Some(150.0), Some(150.0)]
    );
    assert_eq!(
        flowsector::table::bool_values(frame, flow::SUPPRESSED).unwrap(),
        vec![false, true, false, false]
    );
    assert!(output.validation.unwrap().is_consistent());
    assert!(output.attribution.mismatches.is_empty());
    assert_eq!(summary.references_loaded, 0);
}

#[test]
fn unparseable_amount_is_invalid_data() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let bad = ACTIVITY_CSV.replace("300", "three hundred");
    let result = ActivityFrame::from_csv(write(dir.path(), "flows.csv", &bad));
    assert!(matches!(result, Err(FlowError::InvalidData(_))));
}

#[test]
fn crosswalk_without_source_name_is_rejected() {
    init_logging();
    let dir = TempDir::new().unwrap();
    let csv = "Activity,Sector,SectorType\nIrrigation,111,I\n";
    let result = ActivityCrosswalk::from_csv(write(dir.path(), "crosswalk.csv", csv));
    assert!(matches!(result, Err(FlowError::Configuration(_))));
}
