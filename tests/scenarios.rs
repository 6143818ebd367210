mod common;

use std::collections::HashMap;

use common::*;
use flowsector::schema::{attribution, flow, reference, sector};
use flowsector::{
    attribute, estimate_suppressed, harmonize, resolve_crosswalk, AttributionConfig,
    AttributionMethod, Geoscale, IndustrySpec, SectorMapper, SuppressedConfig,
};
use polars::prelude::*;

#[test]
fn subtree_override_resolves_deeper() {
    init_logging();
    let spec = IndustrySpec::new("NAICS_3").with_override("NAICS_6", &["1129"]);
    let crosswalk =
        resolve_crosswalk(&spec, &hierarchy(&["111120", "112990", "112910", "221310"])).unwrap();

    assert_eq!(crosswalk.target("112990"), Some("112990"));
    assert_eq!(crosswalk.target("111120"), Some("111"));
    assert_eq!(crosswalk.target("221310"), Some("221"));
}

#[test]
fn equal_attribution_splits_by_shared_prefix() {
    init_logging();
    let mapper = SectorMapper::new(
        activity_crosswalk(&[
            ("Mixed", "111210"),
            ("Mixed", "111220"),
            ("Mixed", "213110"),
        ]),
        2012,
    );
    let mapped = mapper
        .map(activity(&[(Some(12.0), Some("Mixed"), None, "06000")]))
        .unwrap();
    let out = attribute(
        mapped,
        None,
        &AttributionConfig::new(AttributionMethod::Equal),
    )
    .unwrap();

    let frame = out.frame.into_output().unwrap();
    let by_sector: HashMap<String, f64> = strings(&frame, sector::SECTOR_PRODUCED_BY)
        .into_iter()
        .zip(amounts(&frame))
        .collect();
    assert_eq!(by_sector["111210"], 3.0);
    assert_eq!(by_sector["111220"], 3.0);
    assert_eq!(by_sector["213110"], 6.0);
}

#[test]
fn withheld_children_share_parent_remainder() {
    init_logging();
    let mut df = df!(
        reference::SECTOR => ["31", "311", "312", "313"],
        reference::LOCATION => ["00000"; 4],
        reference::FLOW_AMOUNT => [Some(100.0), Some(40.0), None, None],
    )
    .unwrap();
    df.with_column(Column::new(
        flow::SUPPRESSED.into(),
        &[false, false, true, true],
    ))
    .unwrap();

    let filled = estimate_suppressed(df, &SuppressedConfig::default()).unwrap();
    assert_close(&amounts(&filled), &[100.0, 40.0, 30.0, 30.0]);
}

#[test]
fn national_reference_broadcasts_to_counties() {
    init_logging();
    let calling = activity(&[
        (Some(1.0), Some("A"), None, "06037"),
        (Some(2.0), Some("A"), None, "06001"),
        (Some(3.0), Some("A"), None, "41001"),
    ])
    .into_inner();
    let reference = reference(&[("111", "00000", 42.0)]);

    let harmonized = harmonize(calling, &reference).unwrap();
    assert_eq!(harmonized.calling_scale, Geoscale::County);
    assert_eq!(harmonized.reference_scale, Geoscale::National);

    // true locations untouched, join key truncated
    assert_eq!(
        strings(&harmonized.calling, flow::LOCATION),
        vec!["06037", "06001", "41001"]
    );
    let keys = strings(&harmonized.calling, attribution::ATTRIBUTION_LOCATION);
    assert_eq!(keys, vec!["00000"; 3]);

    let weights = harmonized.reference.weights().unwrap();
    for key in keys {
        assert_eq!(weights[&("111".to_string(), key)], 42.0);
    }
}

#[test]
fn county_reference_is_summed_up_to_state_caller() {
    init_logging();
    let calling = activity(&[(Some(1.0), Some("A"), None, "06000")]).into_inner();
    let reference = reference(&[
        ("111", "06037", 2.0),
        ("111", "06001", 5.0),
        ("111", "41001", 7.0),
    ]);

    let harmonized = harmonize(calling, &reference).unwrap();
    let weights = harmonized.reference.weights().unwrap();
    assert_eq!(weights[&("111".to_string(), "06000".to_string())], 7.0);
    assert_eq!(weights[&("111".to_string(), "41000".to_string())], 7.0);
    assert_eq!(weights.len(), 2);
}

#[test]
fn proportional_attribution_broadcasts_coarser_weights() {
    init_logging();
    let mapper = SectorMapper::new(
        activity_crosswalk(&[("Farming", "111"), ("Farming", "112")]),
        2012,
    );
    let mapped = mapper
        .map(activity(&[
            (Some(10.0), Some("Farming"), None, "06037"),
            (Some(20.0), Some("Farming"), None, "06001"),
        ]))
        .unwrap();
    let out = attribute(
        mapped,
        Some(&reference(&[("111", "06000", 1.0), ("112", "06000", 4.0)])),
        &AttributionConfig::new(AttributionMethod::Proportional),
    )
    .unwrap();

    let frame = out.frame.into_output().unwrap();
    assert_eq!(
        strings(&frame, flow::LOCATION),
        vec!["06037", "06037", "06001", "06001"]
    );
    assert_close(&amounts(&frame), &[2.0, 8.0, 4.0, 16.0]);
}
