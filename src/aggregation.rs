use crate::error::Result;
use crate::schema::{flow, group};
use crate::table;
use polars::prelude::*;
use serde::Deserialize;

/// Declarative aggregation specification.
///
/// Unset key or averaging lists are derived from the frame's dtypes at call
/// time: every non-float column except descriptions and group bookkeeping is
/// a key, every other float column except the flow amount is averaged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AggregationSpec {
    #[serde(default)]
    pub group_by: Option<Vec<String>>,
    #[serde(default)]
    pub average: Option<Vec<String>>,
    /// Keep rows whose amount is exactly zero. Withheld (null) amounts are
    /// always kept.
    #[serde(default)]
    pub retain_zeros: bool,
}

impl AggregationSpec {
    pub fn with_group_by(mut self, columns: &[&str]) -> Self {
        self.group_by = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn with_average(mut self, columns: &[&str]) -> Self {
        self.average = Some(columns.iter().map(|c| c.to_string()).collect());
        self
    }
}

fn is_float(dtype: &DataType) -> bool {
    matches!(dtype, DataType::Float32 | DataType::Float64)
}

fn is_excluded(name: &str) -> bool {
    name == flow::FLOW_AMOUNT || flow::DESCRIPTIONS.contains(&name) || group::ALL.contains(&name)
}

pub fn default_group_columns(df: &DataFrame) -> Vec<String> {
    df.schema()
        .iter()
        .filter(|(name, dtype)| !is_float(dtype) && !is_excluded(name.as_str()))
        .map(|(name, _)| name.to_string())
        .collect()
}

pub fn default_average_columns(df: &DataFrame) -> Vec<String> {
    df.schema()
        .iter()
        .filter(|(name, dtype)| is_float(dtype) && !is_excluded(name.as_str()))
        .map(|(name, _)| name.to_string())
        .collect()
}

/// Amount-weighted mean of `column`; rows where `column` is null count in
/// neither numerator nor denominator. Null when no weight remains.
fn weighted_mean(column: &str) -> Expr {
    let value = col(column);
    let amount = col(flow::FLOW_AMOUNT);
    let numerator = (amount.clone() * value.clone()).sum();
    let denominator = when(value.is_not_null())
        .then(amount)
        .otherwise(lit(0.0))
        .sum();
    when(denominator.clone().neq(lit(0.0)))
        .then(numerator / denominator)
        .otherwise(lit(NULL).cast(DataType::Float64))
        .alias(column)
}

/// Collapse rows sharing the key columns: amounts are summed and averaged
/// columns take their amount-weighted mean. A group made only of withheld
/// amounts stays withheld. Zero amounts are dropped on the way in and out
/// unless retained, so aggregating twice is a no-op. Column order follows
/// the input; columns neither keyed nor averaged are dropped.
pub fn aggregate(df: &DataFrame, spec: &AggregationSpec) -> Result<DataFrame> {
    table::require_columns(df, &[flow::FLOW_AMOUNT])?;

    let keys = spec
        .group_by
        .clone()
        .unwrap_or_else(|| default_group_columns(df));
    let average: Vec<String> = spec
        .average
        .clone()
        .unwrap_or_else(|| default_average_columns(df))
        .into_iter()
        .filter(|c| !keys.contains(c))
        .collect();
    let key_refs: Vec<&str> = keys.iter().map(String::as_str).collect();
    let average_refs: Vec<&str> = average.iter().map(String::as_str).collect();
    table::require_columns(df, &key_refs)?;
    table::require_columns(df, &average_refs)?;

    log::debug!(
        "Aggregating {} rows on {} key column(s), averaging {:?}",
        df.height(),
        keys.len(),
        average
    );

    let order: Vec<Expr> = df
        .get_column_names_str()
        .iter()
        .filter(|c| {
            **c == flow::FLOW_AMOUNT || key_refs.contains(*c) || average_refs.contains(*c)
        })
        .map(|c| col(*c))
        .collect();

    // null != 0 is null under `neq`, which `filter` would drop
    let non_zero = col(flow::FLOW_AMOUNT).neq_missing(lit(0.0));
    let mut lf = df.clone().lazy();
    if !spec.retain_zeros {
        lf = lf.filter(non_zero.clone());
    }

    let amount = col(flow::FLOW_AMOUNT);
    let mut aggs = vec![when(amount.clone().count().eq(lit(0)))
        .then(lit(NULL).cast(DataType::Float64))
        .otherwise(amount.sum())
        .alias(flow::FLOW_AMOUNT)];
    aggs.extend(average.iter().map(|c| weighted_mean(c)));

    let mut lf = lf
        .group_by_stable(key_refs.iter().map(|c| col(*c)).collect::<Vec<_>>())
        .agg(aggs)
        .select(order);
    if !spec.retain_zeros {
        lf = lf.filter(non_zero);
    }
    Ok(lf.collect()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> DataFrame {
        df!(
            flow::FLOW_NAME => ["Water", "Water", "Water", "Land", "Land"],
            flow::LOCATION => ["06000", "06000", "06000", "06000", "41000"],
            flow::YEAR => [2017i32, 2017, 2017, 2017, 2017],
            flow::FLOW_AMOUNT => [2.0, 6.0, 0.0, 4.0, 8.0],
            "DataReliability" => [Some(0.5), Some(1.0), Some(3.0), None, Some(2.0)],
            flow::DESCRIPTION => ["a", "b", "c", "d", "e"],
            group::GROUP_TOTAL => [2.0, 6.0, 0.0, 4.0, 8.0],
        )
        .unwrap()
    }

    #[test]
    fn default_columns_follow_dtypes() {
        let df = sample();
        assert_eq!(
            default_group_columns(&df),
            vec![flow::FLOW_NAME, flow::LOCATION, flow::YEAR]
        );
        assert_eq!(default_average_columns(&df), vec!["DataReliability"]);
    }

    #[test]
    fn sums_amounts_and_weights_scores() {
        let out = aggregate(&sample(), &AggregationSpec::default()).unwrap();

        assert_eq!(
            out.get_column_names_str(),
            vec![
                flow::FLOW_NAME,
                flow::LOCATION,
                flow::YEAR,
                flow::FLOW_AMOUNT,
                "DataReliability"
            ]
        );
        assert_eq!(out.height(), 3);
        assert_eq!(
            table::f64_values(&out, flow::FLOW_AMOUNT).unwrap(),
            vec![Some(8.0), Some(4.0), Some(8.0)]
        );
        // (2*0.5 + 6*1.0) / 8; the zero row is dropped first
        assert_eq!(
            table::f64_values(&out, "DataReliability").unwrap(),
            vec![Some(0.875), None, Some(2.0)]
        );
    }

    #[test]
    fn retains_zero_rows_on_request() {
        let spec = AggregationSpec {
            retain_zeros: true,
            ..Default::default()
        }
        .with_group_by(&[flow::FLOW_NAME, flow::LOCATION])
        .with_average(&[]);
        let mut df = sample();
        df.with_column(Column::new(
            flow::FLOW_AMOUNT.into(),
            &[0.0, 0.0, 0.0, 4.0, 8.0],
        ))
        .unwrap();

        let out = aggregate(&df, &spec).unwrap();
        assert_eq!(out.height(), 3);
        assert_eq!(
            table::f64_values(&out, flow::FLOW_AMOUNT).unwrap(),
            vec![Some(0.0), Some(4.0), Some(8.0)]
        );
    }

    #[test]
    fn reaggregation_is_a_no_op() {
        let spec = AggregationSpec::default();
        let once = aggregate(&sample(), &spec).unwrap();
        let twice = aggregate(&once, &spec).unwrap();
        assert!(once.equals_missing(&twice));
    }

    #[test]
    fn withheld_amounts_survive_aggregation() {
        let df = df!(
            flow::FLOW_NAME => ["Water", "Land", "Water"],
            flow::LOCATION => ["06000", "06000", "06000"],
            flow::FLOW_AMOUNT => [Some(5.0), None, Some(0.0)],
        )
        .unwrap();
        let spec = AggregationSpec::default();

        let out = aggregate(&df, &spec).unwrap();
        assert_eq!(
            table::string_values(&out, flow::FLOW_NAME).unwrap(),
            vec![Some("Water".to_string()), Some("Land".to_string())]
        );
        assert_eq!(
            table::f64_values(&out, flow::FLOW_AMOUNT).unwrap(),
            vec![Some(5.0), None]
        );
        assert!(out.equals_missing(&aggregate(&out, &spec).unwrap()));
    }

    #[test]
    fn missing_key_column_is_reported() {
        let spec = AggregationSpec::default().with_group_by(&["Nope"]);
        assert!(aggregate(&sample(), &spec).is_err());
    }

    #[test]
    fn spec_from_toml() {
        let spec: AggregationSpec =
            toml::from_str("group_by = [\"FlowName\"]\nretain_zeros = true").unwrap();
        assert_eq!(spec.group_by, Some(vec!["FlowName".to_string()]));
        assert!(spec.average.is_none());
        assert!(spec.retain_zeros);
    }
}
