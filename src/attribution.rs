//! Attribution of one-to-many sector mappings.
//!
//! Every strategy is a pure function of (rows, optional reference weights,
//! config) dispatched from [`attribute`]. Rows descended from the same input
//! record share a `group_id`; `group_total` is the amount that record carried
//! before fan-out.
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use polars::prelude::*;
use serde::Deserialize;

use crate::error::{FlowError, Result};
use crate::frames::{MappedFrame, ReferenceFrame, SectorFrame};
use crate::geoscale::harmonize;
use crate::hierarchy::{equal_shares, truncate_code, MIN_DEPTH};
use crate::schema::{attribution, flow, flow_type, group, sector};
use crate::table;

/// Producer codes whose flows are booked against a consuming household
/// rather than the producer.
pub const MULTI_USE_CODES: [&str; 5] = ["22", "221", "2213", "22131", "221310"];

/// Household final-demand codes.
pub const HOUSEHOLD_CODES: [&str; 3] = ["F010", "F0100", "F01000"];

/// Columns identifying one output row under weighted-average attribution.
const WEIGHTED_AVERAGE_KEYS: [&str; 9] = [
    sector::SECTOR_PRODUCED_BY,
    sector::SECTOR_CONSUMED_BY,
    flow::FLOW_NAME,
    flow::UNIT,
    flow::LOCATION,
    flow::YEAR,
    flow::FLOW_TYPE,
    flow::CLASS,
    flow::SOURCE_NAME,
];

// ── Configuration ───────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize)]
#[serde(try_from = "String")]
pub enum AttributionMethod {
    Direct,
    Equal,
    Proportional,
    Multiplication,
    WeightedAverage,
}

impl AttributionMethod {
    /// Whether output rows of a group must sum to the group total.
    pub fn preserves_totals(&self) -> bool {
        matches!(self, Self::Direct | Self::Equal | Self::Proportional)
    }

    pub fn needs_reference(&self) -> bool {
        matches!(
            self,
            Self::Proportional | Self::Multiplication | Self::WeightedAverage
        )
    }
}

impl fmt::Display for AttributionMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Direct => write!(f, "direct"),
            Self::Equal => write!(f, "equal"),
            Self::Proportional => write!(f, "proportional"),
            Self::Multiplication => write!(f, "multiplication"),
            Self::WeightedAverage => write!(f, "weighted_average"),
        }
    }
}

impl FromStr for AttributionMethod {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "direct" => Ok(Self::Direct),
            "equal" => Ok(Self::Equal),
            "proportional" => Ok(Self::Proportional),
            "multiplication" => Ok(Self::Multiplication),
            "weighted_average" => Ok(Self::WeightedAverage),
            other => Err(FlowError::Configuration(format!(
                "Unknown attribution method '{other}'"
            ))),
        }
    }
}

impl TryFrom<String> for AttributionMethod {
    type Error = FlowError;

    fn try_from(value: String) -> Result<Self> {
        value.parse()
    }
}

fn default_tolerance() -> f64 {
    1e-6
}

#[derive(Debug, Clone, Deserialize)]
pub struct AttributionConfig {
    pub method: AttributionMethod,
    /// Identifier of the reference dataset used as weights.
    #[serde(default)]
    pub attribution_source: Option<String>,
    /// Tolerance for the group-total check, scaled by the total when above 1.
    #[serde(default = "default_tolerance")]
    pub tolerance: f64,
    /// Fail the run instead of logging when a group total is not preserved.
    #[serde(default)]
    pub strict_invariants: bool,
    /// Fill withheld reference values before using them as weights.
    #[serde(default)]
    pub estimate_suppressed: bool,
}

impl AttributionConfig {
    pub fn new(method: AttributionMethod) -> Self {
        Self {
            method,
            attribution_source: None,
            tolerance: default_tolerance(),
            strict_invariants: false,
            estimate_suppressed: false,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.attribution_source = Some(source.into());
        self
    }
}

// ── Report ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct GroupMismatch {
    pub group_id: u32,
    pub expected: f64,
    pub actual: f64,
}

#[derive(Debug, Clone)]
pub struct AttributionReport {
    pub method: AttributionMethod,
    pub groups: usize,
    /// Groups that arrived with a single row and passed through unchanged.
    pub directly_attributed: usize,
    /// Proportional groups whose reference weights summed to zero.
    pub unattributable_groups: Vec<u32>,
    /// Rows with no reference match (multiplication / weighted average).
    pub unmatched_rows: usize,
    pub mismatches: Vec<GroupMismatch>,
}

impl AttributionReport {
    fn new(method: AttributionMethod) -> Self {
        Self {
            method,
            groups: 0,
            directly_attributed: 0,
            unattributable_groups: Vec::new(),
            unmatched_rows: 0,
            mismatches: Vec::new(),
        }
    }
}

pub struct Attributed {
    pub frame: SectorFrame,
    pub report: AttributionReport,
}

// ── Sector roles ────────────────────────────────────────────────────────────

/// Primary and secondary sector per row.
///
/// Technosphere flows are attributed to the consumer; everything else to the
/// producer, unless the producer is missing, or a multi-use producer delivers
/// to households. Whichever role was not chosen is the secondary.
pub fn sector_roles(df: &DataFrame) -> Result<(Vec<Option<String>>, Vec<Option<String>>)> {
    let produced = table::string_values(df, sector::SECTOR_PRODUCED_BY)?;
    let consumed = table::string_values(df, sector::SECTOR_CONSUMED_BY)?;
    let flow_types = table::string_values(df, flow::FLOW_TYPE)?;

    let mut primary = Vec::with_capacity(df.height());
    let mut secondary = Vec::with_capacity(df.height());
    for ((p, c), ft) in produced.into_iter().zip(consumed).zip(flow_types) {
        let technosphere = ft.as_deref() == Some(flow_type::TECHNOSPHERE);
        let household_delivery = matches!(
            (p.as_deref(), c.as_deref()),
            (Some(p), Some(c)) if MULTI_USE_CODES.contains(&p) && HOUSEHOLD_CODES.contains(&c)
        );
        let consumer_first = technosphere || p.is_none() || household_delivery;
        let (first, second) = if consumer_first { (c, p) } else { (p, c) };
        match first {
            Some(code) => {
                primary.push(Some(code));
                secondary.push(second);
            }
            None => {
                primary.push(second);
                secondary.push(None);
            }
        }
    }
    Ok((primary, secondary))
}

// ── Working rows ────────────────────────────────────────────────────────────

struct Rows {
    group_ids: Vec<u32>,
    totals: Vec<Option<f64>>,
    amounts: Vec<Option<f64>>,
    primary: Vec<Option<String>>,
    secondary: Vec<Option<String>>,
}

impl Rows {
    fn from_frame(df: &DataFrame) -> Result<Self> {
        let (primary, secondary) = sector_roles(df)?;
        Ok(Self {
            group_ids: table::u32_values(df, group::GROUP_ID)?,
            totals: table::f64_values(df, group::GROUP_TOTAL)?,
            amounts: table::f64_values(df, flow::FLOW_AMOUNT)?,
            primary,
            secondary,
        })
    }

    fn groups(&self) -> BTreeMap<u32, Vec<usize>> {
        let mut groups: BTreeMap<u32, Vec<usize>> = BTreeMap::new();
        for (i, gid) in self.group_ids.iter().enumerate() {
            groups.entry(*gid).or_default().push(i);
        }
        groups
    }

    fn primary_code(&self, i: usize) -> Option<&str> {
        self.primary[i].as_deref()
    }

    fn secondary_code(&self, i: usize) -> Option<&str> {
        self.secondary[i].as_deref()
    }

    fn write_amounts(&self, df: &mut DataFrame) -> Result<()> {
        df.with_column(Column::new(
            flow::FLOW_AMOUNT.into(),
            self.amounts.clone(),
        ))?;
        Ok(())
    }
}

// ── Dispatcher ──────────────────────────────────────────────────────────────

/// Finalize per-sector amounts for a mapped batch.
///
/// `reference` is required by proportional, multiplication and weighted-average
/// attribution; it is geoscale-harmonized against the batch before use.
pub fn attribute(
    mapped: MappedFrame,
    reference: Option<&ReferenceFrame>,
    config: &AttributionConfig,
) -> Result<Attributed> {
    let method = config.method;
    let mut report = AttributionReport::new(method);

    let mut df = mapped.into_inner();
    let mut rows = Rows::from_frame(&df)?;
    let groups = rows.groups();
    report.groups = groups.len();
    report.directly_attributed = groups.values().filter(|idx| idx.len() == 1).count();

    log::info!(
        "Attributing {} rows in {} groups using {method}",
        df.height(),
        report.groups
    );

    match (method, reference) {
        (AttributionMethod::Direct, _) => {
            let ambiguous = groups.values().filter(|idx| idx.len() > 1).count();
            if ambiguous > 0 {
                log::warn!(
                    "{ambiguous} group(s) map to more than one sector under direct attribution; \
                     splitting them equally"
                );
            }
            split_primary_equally(&mut rows, &groups);
            split_secondary_equally(&mut rows, &groups);
            rows.write_amounts(&mut df)?;
        }
        (AttributionMethod::Equal, _) => {
            split_primary_equally(&mut rows, &groups);
            split_secondary_equally(&mut rows, &groups);
            rows.write_amounts(&mut df)?;
        }
        (AttributionMethod::Proportional, Some(reference)) => {
            let (harmonized, weights) = reference_weights(df, &rows, reference)?;
            df = harmonized;
            report.unattributable_groups = split_proportionally(&mut rows, &groups, &weights);
            split_secondary_equally(&mut rows, &groups);
            rows.write_amounts(&mut df)?;
        }
        (AttributionMethod::Multiplication, Some(reference)) => {
            let (harmonized, weights) = reference_weights(df, &rows, reference)?;
            df = harmonized;
            report.unmatched_rows = multiply(&mut rows, &weights);
            rows.write_amounts(&mut df)?;
        }
        (AttributionMethod::WeightedAverage, Some(reference)) => {
            let (harmonized, weights) = reference_weights(df, &rows, reference)?;
            report.unmatched_rows = weights.iter().filter(|w| w.is_none()).count();
            df = weighted_average(harmonized, &rows, &weights)?;
        }
        (method, None) => {
            return Err(FlowError::Configuration(format!(
                "Attribution method '{method}' requires an attribution source"
            )))
        }
    }

    if method.preserves_totals() {
        let skip: HashSet<u32> = report.unattributable_groups.iter().copied().collect();
        report.mismatches = check_group_totals(&df, config.tolerance, &skip)?;
        if config.strict_invariants && !report.mismatches.is_empty() {
            return Err(FlowError::InvariantViolation(format!(
                "{} group(s) do not sum to their original total",
                report.mismatches.len()
            )));
        }
    }

    let df = table::drop_columns(&df, &attribution::WORKING)?;
    Ok(Attributed {
        frame: SectorFrame::try_new(df)?,
        report,
    })
}

// ── Strategies ──────────────────────────────────────────────────────────────

/// Equal shares over role codes, where a missing code is a top-level branch
/// of its own next to the depth-2 prefixes of the present ones.
fn role_shares<'a>(codes: &BTreeSet<Option<&'a str>>) -> HashMap<Option<&'a str>, f64> {
    let present: Vec<&str> = codes.iter().flatten().copied().collect();
    let code_shares = equal_shares(present.iter().copied());

    let mut shares = HashMap::with_capacity(codes.len());
    let mut scale = 1.0;
    if codes.contains(&None) {
        let branches: BTreeSet<&str> = present.iter().map(|c| truncate_code(c, MIN_DEPTH)).collect();
        let n = branches.len() as f64 + 1.0;
        shares.insert(None, 1.0 / n);
        scale = (n - 1.0) / n;
    }
    for code in present {
        let share = code_shares.get(code).copied().unwrap_or(0.0);
        shares.insert(Some(code), share * scale);
    }
    shares
}

/// Split each ambiguous group's total across its distinct primary codes,
/// digit level by digit level. Groups with one primary pass through.
fn split_primary_equally(rows: &mut Rows, groups: &BTreeMap<u32, Vec<usize>>) {
    for idx in groups.values() {
        let Some(total) = rows.totals[idx[0]] else {
            continue;
        };
        let codes: BTreeSet<Option<&str>> = idx.iter().map(|&i| rows.primary_code(i)).collect();
        if codes.len() <= 1 {
            continue;
        }
        let shares = role_shares(&codes);
        let updates: Vec<(usize, f64)> = idx
            .iter()
            .map(|&i| {
                let share = shares.get(&rows.primary_code(i)).copied().unwrap_or(0.0);
                (i, total * share)
            })
            .collect();
        for (i, amount) in updates {
            rows.amounts[i] = Some(amount);
        }
    }
}

/// Within each (group, primary) partition, split the primary's amount across
/// distinct secondary codes; identical rows then share their code's portion.
fn split_secondary_equally(rows: &mut Rows, groups: &BTreeMap<u32, Vec<usize>>) {
    for idx in groups.values() {
        let mut partitions: BTreeMap<Option<&str>, Vec<usize>> = BTreeMap::new();
        for &i in idx {
            partitions.entry(rows.primary_code(i)).or_default().push(i);
        }

        let mut updates = Vec::new();
        for members in partitions.values().filter(|m| m.len() > 1) {
            let Some(base) = rows.amounts[members[0]] else {
                continue;
            };
            let mut counts: BTreeMap<Option<&str>, usize> = BTreeMap::new();
            for &i in members {
                *counts.entry(rows.secondary_code(i)).or_default() += 1;
            }
            let codes: BTreeSet<Option<&str>> = counts.keys().copied().collect();
            let shares = role_shares(&codes);
            for &i in members {
                let code = rows.secondary_code(i);
                let share = shares.get(&code).copied().unwrap_or(0.0);
                updates.push((i, base * share / counts[&code] as f64));
            }
        }
        for (i, amount) in updates {
            rows.amounts[i] = Some(amount);
        }
    }
}

/// Reference amount per row, looked up on (primary sector, harmonized location).
fn reference_weights(
    df: DataFrame,
    rows: &Rows,
    reference: &ReferenceFrame,
) -> Result<(DataFrame, Vec<Option<f64>>)> {
    let harmonized = harmonize(df, reference)?;
    log::info!(
        "Attributing {} data with {} reference data",
        harmonized.calling_scale,
        harmonized.reference_scale
    );
    let lookup = harmonized.reference.weights()?;
    let locations = table::string_values(&harmonized.calling, attribution::ATTRIBUTION_LOCATION)?;

    let weights = rows
        .primary
        .iter()
        .zip(locations)
        .map(|(sector, location)| match (sector, location) {
            (Some(sector), Some(location)) => lookup.get(&(sector.clone(), location)).copied(),
            _ => None,
        })
        .collect();
    Ok((harmonized.calling, weights))
}

/// Share each group's total by reference weight of its distinct primaries.
/// Returns groups whose weights summed to zero; those are left at zero.
fn split_proportionally(
    rows: &mut Rows,
    groups: &BTreeMap<u32, Vec<usize>>,
    weights: &[Option<f64>],
) -> Vec<u32> {
    let mut unattributable = Vec::new();
    for (gid, idx) in groups {
        let mut by_code: BTreeMap<Option<&str>, f64> = BTreeMap::new();
        for &i in idx {
            by_code
                .entry(rows.primary_code(i))
                .or_insert(weights[i].unwrap_or(0.0));
        }
        if by_code.len() <= 1 {
            continue;
        }
        let Some(total) = rows.totals[idx[0]] else {
            continue;
        };

        let weight_sum: f64 = by_code.values().sum();
        if weight_sum == 0.0 {
            log::warn!(
                "Group {gid}: reference weights for {:?} sum to zero; amounts left at 0",
                by_code.keys().collect::<Vec<_>>()
            );
            for &i in idx {
                rows.amounts[i] = Some(0.0);
            }
            unattributable.push(*gid);
            continue;
        }

        let updates: Vec<(usize, f64)> = idx
            .iter()
            .map(|&i| {
                let weight = by_code.get(&rows.primary_code(i)).copied().unwrap_or(0.0);
                (i, total * weight / weight_sum)
            })
            .collect();
        for (i, amount) in updates {
            rows.amounts[i] = Some(amount);
        }
    }
    unattributable
}

/// Amount × reference amount, unnormalized. Unmatched rows become zero.
fn multiply(rows: &mut Rows, weights: &[Option<f64>]) -> usize {
    let mut unmatched = 0;
    for (amount, weight) in rows.amounts.iter_mut().zip(weights) {
        match weight {
            Some(w) => *amount = amount.map(|a| a * w),
            None => {
                *amount = Some(0.0);
                unmatched += 1;
            }
        }
    }
    if unmatched > 0 {
        log::warn!("{unmatched} row(s) had no reference match and were set to zero");
    }
    let zeros = rows.amounts.iter().filter(|a| **a == Some(0.0)).count();
    if zeros > 0 {
        log::info!("Multiplication produced {zeros} zero-valued row(s)");
    }
    unmatched
}

/// Collapse rows sharing an output key into one row holding the
/// reference-weighted mean, then restart group bookkeeping from the new values.
fn weighted_average(df: DataFrame, rows: &Rows, weights: &[Option<f64>]) -> Result<DataFrame> {
    let keys: Vec<&str> = WEIGHTED_AVERAGE_KEYS
        .into_iter()
        .filter(|k| table::has_column(&df, k))
        .collect();
    let row_keys = table::row_keys(&df, &keys)?;

    let mut order: Vec<Vec<usize>> = Vec::new();
    let mut position: HashMap<&str, usize> = HashMap::new();
    for (i, key) in row_keys.iter().enumerate() {
        let slot = *position.entry(key.as_str()).or_insert_with(|| {
            order.push(Vec::new());
            order.len() - 1
        });
        order[slot].push(i);
    }

    let mut firsts: Vec<IdxSize> = Vec::with_capacity(order.len());
    let mut means: Vec<Option<f64>> = Vec::with_capacity(order.len());
    for members in &order {
        firsts.push(members[0] as IdxSize);
        let known: Vec<(f64, f64)> = members
            .iter()
            .filter_map(|&i| Some((rows.amounts[i]?, weights[i].unwrap_or(0.0))))
            .collect();
        if known.is_empty() {
            means.push(None);
            continue;
        }
        let weight_sum: f64 = known.iter().map(|(_, w)| w).sum();
        let mean = if weight_sum == 0.0 {
            log::warn!(
                "No reference weight for {}; using the unweighted mean",
                row_keys[members[0]].replace('\u{1f}', "/")
            );
            known.iter().map(|(v, _)| v).sum::<f64>() / known.len() as f64
        } else {
            known.iter().map(|(v, w)| v * w).sum::<f64>() / weight_sum
        };
        means.push(Some(mean));
    }

    let mut out = df.take(&IdxCa::from_vec(PlSmallStr::EMPTY, firsts))?;
    let ids = table::row_ids(out.height())?;
    out.with_column(Column::new(flow::FLOW_AMOUNT.into(), means.clone()))?;
    out.with_column(Column::new(group::GROUP_TOTAL.into(), means))?;
    out.with_column(Column::new(group::GROUP_ID.into(), ids))?;
    Ok(out)
}

// ── Invariant ───────────────────────────────────────────────────────────────

/// Groups whose output amounts do not sum to `group_total`. Each mismatch is
/// logged together with the group's rows.
pub fn check_group_totals(
    df: &DataFrame,
    tolerance: f64,
    skip: &HashSet<u32>,
) -> Result<Vec<GroupMismatch>> {
    let group_ids = table::u32_values(df, group::GROUP_ID)?;
    let totals = table::f64_values(df, group::GROUP_TOTAL)?;
    let amounts = table::f64_values(df, flow::FLOW_AMOUNT)?;

    let mut sums: BTreeMap<u32, (Option<f64>, f64)> = BTreeMap::new();
    for ((gid, total), amount) in group_ids.iter().zip(&totals).zip(&amounts) {
        let entry = sums.entry(*gid).or_insert((*total, 0.0));
        entry.1 += amount.unwrap_or(0.0);
    }

    let mut mismatches = Vec::new();
    for (gid, (total, actual)) in sums {
        let Some(expected) = total else { continue };
        if skip.contains(&gid) {
            continue;
        }
        if (actual - expected).abs() > tolerance * expected.abs().max(1.0) {
            mismatches.push(GroupMismatch {
                group_id: gid,
                expected,
                actual,
            });
        }
    }

    if !mismatches.is_empty() {
        let bad: HashSet<u32> = mismatches.iter().map(|m| m.group_id).collect();
        let mask: BooleanChunked = group_ids.iter().map(|g| bad.contains(g)).collect();
        let detail = df.filter(&mask)?;
        for m in &mismatches {
            log::warn!(
                "Group {} sums to {} after attribution, expected {}",
                m.group_id,
                m.actual,
                m.expected
            );
        }
        log::warn!("Rows of mismatched groups:\n{detail}");
    }
    Ok(mismatches)
}
