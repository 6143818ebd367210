#![allow(dead_code)]

use flowsector::schema::{crosswalk, flow, flow_type, reference};
use flowsector::{ActivityCrosswalk, ActivityFrame, ReferenceFrame};
use polars::prelude::*;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// Activity rows: (amount, produced-by, consumed-by, location).
pub fn activity(rows: &[(Option<f64>, Option<&str>, Option<&str>, &str)]) -> ActivityFrame {
    let n = rows.len();
    let df = df!(
        flow::FLOW_NAME => vec!["Water"; n],
        flow::FLOW_AMOUNT => rows.iter().map(|r| r.0).collect::<Vec<_>>(),
        flow::UNIT => vec!["Mgal"; n],
        flow::ACTIVITY_PRODUCED_BY => rows.iter().map(|r| r.1).collect::<Vec<_>>(),
        flow::ACTIVITY_CONSUMED_BY => rows.iter().map(|r| r.2).collect::<Vec<_>>(),
        flow::FLOW_TYPE => vec![flow_type::ELEMENTARY; n],
        flow::LOCATION => rows.iter().map(|r| r.3).collect::<Vec<_>>(),
        flow::YEAR => vec![2012i32; n],
        flow::CLASS => vec!["Water"; n],
        flow::SOURCE_NAME => vec!["USGS_Water"; n],
    )
    .unwrap();
    ActivityFrame::try_new(df).unwrap()
}

pub fn activity_crosswalk(rows: &[(&str, &str)]) -> ActivityCrosswalk {
    let n = rows.len();
    let df = df!(
        crosswalk::ACTIVITY => rows.iter().map(|r| r.0).collect::<Vec<_>>(),
        crosswalk::SECTOR => rows.iter().map(|r| r.1).collect::<Vec<_>>(),
        crosswalk::SECTOR_TYPE => vec!["I"; n],
        crosswalk::SECTOR_SOURCE_NAME => vec!["NAICS_2012_Code"; n],
    )
    .unwrap();
    ActivityCrosswalk::try_new(&df).unwrap()
}

/// Master hierarchy with columns NAICS_2 … NAICS_6 for the given six-digit leaves.
pub fn hierarchy(leaves: &[&str]) -> DataFrame {
    let columns = (2..=6)
        .map(|depth| {
            let values: Vec<String> = leaves.iter().map(|l| l[..depth].to_string()).collect();
            Column::new(format!("NAICS_{depth}").into(), values)
        })
        .collect();
    DataFrame::new(columns).unwrap()
}

pub fn reference(rows: &[(&str, &str, f64)]) -> ReferenceFrame {
    let df = df!(
        reference::SECTOR => rows.iter().map(|r| r.0).collect::<Vec<_>>(),
        reference::LOCATION => rows.iter().map(|r| r.1).collect::<Vec<_>>(),
        reference::FLOW_AMOUNT => rows.iter().map(|r| r.2).collect::<Vec<_>>(),
    )
    .unwrap();
    ReferenceFrame::try_new(df).unwrap()
}

pub fn strings(df: &DataFrame, column: &str) -> Vec<String> {
    flowsector::table::string_values(df, column)
        .unwrap()
        .into_iter()
        .map(|v| v.unwrap_or_default())
        .collect()
}

pub fn amounts(df: &DataFrame) -> Vec<f64> {
    flowsector::table::f64_values(df, flow::FLOW_AMOUNT)
        .unwrap()
        .into_iter()
        .map(|v| v.unwrap_or(f64::NAN))
        .collect()
}

pub fn assert_close(actual: &[f64], expected: &[f64]) {
    assert_eq!(actual.len(), expected.len(), "{actual:?} vs {expected:?}");
    for (a, e) in actual.iter().zip(expected) {
        assert!((a - e).abs() < 1e-9, "{actual:?} vs {expected:?}");
    }
}
