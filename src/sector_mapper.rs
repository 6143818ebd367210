//! Activity → sector mapping with classification-revision reconciliation.
use std::collections::{BTreeSet, HashSet};
use std::path::Path;

use polars::prelude::*;

use crate::error::{FlowError, Result};
use crate::frames::{ActivityFrame, MappedFrame};
use crate::industry_spec::SectorCrosswalk;
use crate::schema::{crosswalk, flow, group, sector};
use crate::table;

const MAP_KEY: &str = "__map_key";
const MAP_VALUE: &str = "__map_value";

const ROLES: [(&str, &str); 2] = [
    (flow::ACTIVITY_PRODUCED_BY, sector::SECTOR_PRODUCED_BY),
    (flow::ACTIVITY_CONSUMED_BY, sector::SECTOR_CONSUMED_BY),
];

/// First plausible four-digit year in a name such as `NAICS_2012_Code`.
pub fn revision_year_of(name: &str) -> Option<u16> {
    name.split(|c: char| !c.is_ascii_digit())
        .filter(|run| run.len() == 4)
        .filter_map(|run| run.parse::<u16>().ok())
        .find(|year| (1900..2100).contains(year))
}

// ── Activity crosswalk ──────────────────────────────────────────────────────

/// Activity → sector table for one source, tagged with the classification
/// revision its codes belong to.
#[derive(Debug, Clone)]
pub struct ActivityCrosswalk {
    pairs: Vec<(String, String)>,
    activities: HashSet<String>,
    revision_year: Option<u16>,
}

impl ActivityCrosswalk {
    /// Required columns: Activity, Sector, SectorType, SectorSourceName.
    pub fn try_new(df: &DataFrame) -> Result<Self> {
        for column in crosswalk::REQUIRED {
            if !table::has_column(df, column) {
                return Err(FlowError::Configuration(format!(
                    "Activity crosswalk is missing column '{column}'"
                )));
            }
        }

        let years: BTreeSet<u16> = table::string_values(df, crosswalk::SECTOR_SOURCE_NAME)?
            .iter()
            .flatten()
            .filter_map(|name| revision_year_of(name))
            .collect();
        if years.len() > 1 {
            return Err(FlowError::Configuration(format!(
                "Activity crosswalk mixes classification revisions {years:?}"
            )));
        }

        let activities = table::string_values(df, crosswalk::ACTIVITY)?;
        let sectors = table::string_values(df, crosswalk::SECTOR)?;
        let mut seen = HashSet::new();
        let pairs: Vec<(String, String)> = activities
            .into_iter()
            .zip(sectors)
            .filter_map(|(a, s)| Some((a?, s?)))
            .filter(|pair| seen.insert(pair.clone()))
            .collect();

        Ok(Self {
            activities: pairs.iter().map(|(a, _)| a.clone()).collect(),
            pairs,
            revision_year: years.into_iter().next(),
        })
    }

    pub fn from_csv(path: impl AsRef<Path>) -> Result<Self> {
        Self::try_new(&table::read_csv_as_strings(path, None)?)
    }

    pub fn revision_year(&self) -> Option<u16> {
        self.revision_year
    }

    pub fn contains(&self, activity: &str) -> bool {
        self.activities.contains(activity)
    }
}

// ── Revision translation ────────────────────────────────────────────────────

/// Same-length code rewrites between two classification revisions.
#[derive(Debug, Clone)]
pub struct CodeTranslation {
    pub from_year: u16,
    pub to_year: u16,
    pairs: Vec<(String, String)>,
}

impl CodeTranslation {
    /// Build from a concordance table with one code column per revision,
    /// e.g. `NAICS_2012_Code` → `NAICS_2017_Code`. Pairs whose codes differ in
    /// length are dropped.
    pub fn from_frame(df: &DataFrame, from_column: &str, to_column: &str) -> Result<Self> {
        let year = |name: &str| {
            revision_year_of(name).ok_or_else(|| {
                FlowError::Configuration(format!("No revision year in column name '{name}'"))
            })
        };
        let (from_year, to_year) = (year(from_column)?, year(to_column)?);
        for column in [from_column, to_column] {
            if !table::has_column(df, column) {
                return Err(FlowError::Configuration(format!(
                    "Code translation table is missing column '{column}'"
                )));
            }
        }

        let from = table::string_values(df, from_column)?;
        let to = table::string_values(df, to_column)?;
        let mut seen = HashSet::new();
        let pairs = from
            .into_iter()
            .zip(to)
            .filter_map(|(f, t)| Some((f?, t?)))
            .filter(|(f, t)| f.len() == t.len())
            .filter(|pair| seen.insert(pair.clone()))
            .collect();

        Ok(Self {
            from_year,
            to_year,
            pairs,
        })
    }

    pub fn from_csv(path: impl AsRef<Path>, from_column: &str, to_column: &str) -> Result<Self> {
        Self::from_frame(&table::read_csv_as_strings(path, None)?, from_column, to_column)
    }
}

// ── Mapper ──────────────────────────────────────────────────────────────────

pub struct SectorMapper {
    crosswalk: ActivityCrosswalk,
    target_year: u16,
    translation: Option<CodeTranslation>,
    industry: Option<SectorCrosswalk>,
    keep_unmapped: bool,
}

impl SectorMapper {
    pub fn new(crosswalk: ActivityCrosswalk, target_year: u16) -> Self {
        Self {
            crosswalk,
            target_year,
            translation: None,
            industry: None,
            keep_unmapped: true,
        }
    }

    pub fn with_translation(mut self, translation: CodeTranslation) -> Self {
        self.translation = Some(translation);
        self
    }

    /// Rewrite mapped codes to the resolution of an industry spec.
    pub fn with_industry_crosswalk(mut self, industry: SectorCrosswalk) -> Self {
        self.industry = Some(industry);
        self
    }

    /// Retain (true, default) or drop rows whose activity found no sector.
    pub fn keep_unmapped(mut self, keep: bool) -> Self {
        self.keep_unmapped = keep;
        self
    }

    /// Distinct non-null activities in either role with no crosswalk entry.
    pub fn unmapped_activities(&self, activity: &ActivityFrame) -> Result<Vec<String>> {
        let mut missing = BTreeSet::new();
        for (activity_col, _) in ROLES {
            for value in table::string_values(activity.as_frame(), activity_col)?
                .into_iter()
                .flatten()
            {
                if !self.crosswalk.contains(&value) {
                    missing.insert(value);
                }
            }
        }
        Ok(missing.into_iter().collect())
    }

    /// Attach candidate sectors to each record.
    ///
    /// Each role is joined independently, so a record with m produced-by and
    /// n consumed-by candidates becomes m × n rows sharing one `group_id`.
    pub fn map(&self, activity: ActivityFrame) -> Result<MappedFrame> {
        let translation = self.translation_for_target()?;

        for missing in self.unmapped_activities(&activity)? {
            log::warn!("No sector mapping found for activity '{missing}'");
        }

        let input_rows = activity.as_frame().height();
        let mut df = activity.into_tagged()?;

        let activity_map = mapping_frame(&self.crosswalk.pairs)?;
        for (activity_col, sector_col) in ROLES {
            df = join_mapping(df, activity_col, &activity_map, sector_col, false)?;
        }

        if let Some(translation) = translation {
            log::info!(
                "Translating sector codes from {} to {}",
                translation.from_year,
                translation.to_year
            );
            let translation_map = mapping_frame(&translation.pairs)?;
            for (_, sector_col) in ROLES {
                df = join_mapping(df, sector_col, &translation_map, sector_col, true)?;
            }
        }

        if let Some(industry) = &self.industry {
            let industry_map = mapping_frame(&industry_pairs(&df, industry)?)?;
            for (_, sector_col) in ROLES {
                df = join_mapping(df, sector_col, &industry_map, sector_col, true)?;
            }
        }

        if !self.keep_unmapped {
            let unmapped = ROLES
                .iter()
                .map(|(a, s)| col(*a).is_not_null().and(col(*s).is_null()))
                .reduce(|acc, e| acc.or(e))
                .unwrap_or(lit(false));
            df = df.lazy().filter(unmapped.not()).collect()?;
        }

        // groups in input order, candidates by code within a group
        let df = df.sort(
            [
                group::GROUP_ID,
                sector::SECTOR_PRODUCED_BY,
                sector::SECTOR_CONSUMED_BY,
            ],
            SortMultipleOptions::default().with_maintain_order(true),
        )?;
        log::info!("Mapped {input_rows} activity rows to {} sector rows", df.height());
        MappedFrame::try_new(df)
    }

    fn translation_for_target(&self) -> Result<Option<&CodeTranslation>> {
        let Some(source_year) = self.crosswalk.revision_year() else {
            log::debug!("Activity crosswalk carries no revision year; codes used as is");
            return Ok(None);
        };
        if source_year == self.target_year {
            return Ok(None);
        }
        match &self.translation {
            Some(t) if t.from_year == source_year && t.to_year == self.target_year => Ok(Some(t)),
            Some(t) => Err(FlowError::Configuration(format!(
                "Code translation {}→{} does not match crosswalk {source_year}→{}",
                t.from_year, t.to_year, self.target_year
            ))),
            None => Err(FlowError::Configuration(format!(
                "Crosswalk codes are {source_year} revision but {} was requested and no \
                 code translation was provided",
                self.target_year
            ))),
        }
    }
}

/// Source → target pairs for every sector code present in `df`.
fn industry_pairs(df: &DataFrame, industry: &SectorCrosswalk) -> Result<Vec<(String, String)>> {
    let mut codes = BTreeSet::new();
    for (_, sector_col) in ROLES {
        codes.extend(table::string_values(df, sector_col)?.into_iter().flatten());
    }

    let mut pairs = Vec::new();
    for code in codes {
        let targets = industry.targets_for(&code);
        if targets.is_empty() {
            log::debug!("Sector '{code}' not in industry hierarchy; kept as is");
            pairs.push((code.clone(), code));
        } else {
            pairs.extend(targets.into_iter().map(|t| (code.clone(), t)));
        }
    }
    Ok(pairs)
}

fn mapping_frame(pairs: &[(String, String)]) -> Result<DataFrame> {
    let keys: Vec<&str> = pairs.iter().map(|(k, _)| k.as_str()).collect();
    let values: Vec<&str> = pairs.iter().map(|(_, v)| v.as_str()).collect();
    Ok(DataFrame::new(vec![
        Column::new(MAP_KEY.into(), keys),
        Column::new(MAP_VALUE.into(), values),
    ])?)
}

/// Left-join `mapping` on `on` and write the mapped value into `out`.
/// One row per match; unmatched rows get null, or keep `on` when `keep_unmatched`.
fn join_mapping(
    df: DataFrame,
    on: &str,
    mapping: &DataFrame,
    out: &str,
    keep_unmatched: bool,
) -> Result<DataFrame> {
    let fallback = if keep_unmatched {
        col(on)
    } else {
        lit(NULL).cast(DataType::String)
    };
    let joined = df
        .lazy()
        .join(
            mapping.clone().lazy(),
            [col(on)],
            [col(MAP_KEY)],
            JoinArgs::new(JoinType::Left),
        )
        .with_column(
            when(col(MAP_VALUE).is_not_null())
                .then(col(MAP_VALUE))
                .otherwise(fallback)
                .alias(out),
        )
        .collect()?;
    table::drop_columns(&joined, &[MAP_KEY, MAP_VALUE])
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::frames::tests::activity_df;
    use crate::industry_spec::{resolve_crosswalk, IndustrySpec};

    pub(crate) fn crosswalk_df(rows: &[(&str, &str)], source_name: &str) -> DataFrame {
        let n = rows.len();
        DataFrame::new(vec![
            Column::new(
                crosswalk::ACTIVITY.into(),
                rows.iter().map(|r| r.0).collect::<Vec<_>>(),
            ),
            Column::new(
                crosswalk::SECTOR.into(),
                rows.iter().map(|r| r.1).collect::<Vec<_>>(),
            ),
            Column::new(crosswalk::SECTOR_TYPE.into(), vec!["I"; n]),
            Column::new(crosswalk::SECTOR_SOURCE_NAME.into(), vec![source_name; n]),
        ])
        .unwrap()
    }

    fn sectors(frame: &MappedFrame, column: &str) -> Vec<Option<String>> {
        table::string_values(frame.as_frame(), column).unwrap()
    }

    #[test]
    fn revision_year_from_source_name() {
        assert_eq!(revision_year_of("NAICS_2012_Code"), Some(2012));
        assert_eq!(revision_year_of("NAICS_Code"), None);
    }

    #[test]
    fn missing_crosswalk_column_is_configuration_error() {
        let df = table::drop_columns(
            &crosswalk_df(&[("Crops", "111")], "NAICS_2012_Code"),
            &[crosswalk::SECTOR_TYPE],
        )
        .unwrap();
        assert!(matches!(
            ActivityCrosswalk::try_new(&df),
            Err(FlowError::Configuration(_))
        ));
    }

    #[test]
    fn fans_out_per_role_and_keeps_group_ids() {
        let xwalk = ActivityCrosswalk::try_new(&crosswalk_df(
            &[("Irrigation", "111"), ("Irrigation", "112"), ("Homes", "F010")],
            "NAICS_2012_Code",
        ))
        .unwrap();
        let mapper = SectorMapper::new(xwalk, 2012);
        let activity = ActivityFrame::try_new(activity_df(&[
            (Some(10.0), Some("Irrigation"), Some("Homes"), "06000"),
            (Some(4.0), Some("Homes"), None, "06000"),
        ]))
        .unwrap();

        let mapped = mapper.map(activity).unwrap();
        assert_eq!(mapped.as_frame().height(), 3);
        assert_eq!(mapped.group_count().unwrap(), 2);
        assert_eq!(
            table::u32_values(mapped.as_frame(), group::GROUP_ID).unwrap(),
            vec![0, 0, 1]
        );
        let produced: BTreeSet<Option<String>> =
            sectors(&mapped, sector::SECTOR_PRODUCED_BY)[..2].iter().cloned().collect();
        assert_eq!(
            produced,
            BTreeSet::from([Some("111".to_string()), Some("112".to_string())])
        );
        assert_eq!(
            sectors(&mapped, sector::SECTOR_CONSUMED_BY),
            vec![Some("F010".into()), Some("F010".into()), None]
        );
    }

    #[test]
    fn unmapped_rows_are_kept_or_dropped() {
        let xwalk = ActivityCrosswalk::try_new(&crosswalk_df(&[("Crops", "111")], "NAICS_2012_Code"))
            .unwrap();
        let rows = [
            (Some(1.0), Some("Crops"), None, "06000"),
            (Some(2.0), Some("Unknown"), None, "06000"),
        ];

        let mapper = SectorMapper::new(xwalk.clone(), 2012);
        let activity = ActivityFrame::try_new(activity_df(&rows)).unwrap();
        assert_eq!(mapper.unmapped_activities(&activity).unwrap(), vec!["Unknown"]);
        let kept = mapper.map(activity).unwrap();
        assert_eq!(
            sectors(&kept, sector::SECTOR_PRODUCED_BY),
            vec![Some("111".into()), None]
        );

        let dropping = SectorMapper::new(xwalk, 2012).keep_unmapped(false);
        let dropped = dropping
            .map(ActivityFrame::try_new(activity_df(&rows)).unwrap())
            .unwrap();
        assert_eq!(dropped.as_frame().height(), 1);
    }

    #[test]
    fn translates_revision_years() {
        let xwalk = ActivityCrosswalk::try_new(&crosswalk_df(
            &[("Mining", "212111"), ("Crops", "111")],
            "NAICS_2012_Code",
        ))
        .unwrap();
        let concordance = DataFrame::new(vec![
            Column::new("NAICS_2012_Code".into(), &["212111", "2121"]),
            Column::new("NAICS_2017_Code".into(), &["212114", "21211"]),
        ])
        .unwrap();
        let translation =
            CodeTranslation::from_frame(&concordance, "NAICS_2012_Code", "NAICS_2017_Code").unwrap();

        let activity = ActivityFrame::try_new(activity_df(&[
            (Some(1.0), Some("Mining"), None, "06000"),
            (Some(1.0), Some("Crops"), None, "06000"),
        ]))
        .unwrap();

        assert!(matches!(
            SectorMapper::new(xwalk.clone(), 2017).map(activity.clone()),
            Err(FlowError::Configuration(_))
        ));

        let mapped = SectorMapper::new(xwalk, 2017)
            .with_translation(translation)
            .map(activity)
            .unwrap();
        assert_eq!(
            sectors(&mapped, sector::SECTOR_PRODUCED_BY),
            vec![Some("212114".into()), Some("111".into())]
        );
    }

    #[test]
    fn applies_industry_spec_resolution() {
        let xwalk = ActivityCrosswalk::try_new(&crosswalk_df(
            &[("Livestock", "1129"), ("Corn", "111150")],
            "NAICS_2012_Code",
        ))
        .unwrap();
        let spec = IndustrySpec::new("NAICS_3").with_override("NAICS_6", &["1129"]);
        let industry =
            resolve_crosswalk(&spec, &crate::industry_spec::tests::hierarchy()).unwrap();

        let mapped = SectorMapper::new(xwalk, 2012)
            .with_industry_crosswalk(industry)
            .map(
                ActivityFrame::try_new(activity_df(&[
                    (Some(1.0), Some("Livestock"), None, "06000"),
                    (Some(1.0), Some("Corn"), None, "06000"),
                ]))
                .unwrap(),
            )
            .unwrap();

        let produced: BTreeSet<String> = sectors(&mapped, sector::SECTOR_PRODUCED_BY)
            .into_iter()
            .flatten()
            .collect();
        assert_eq!(
            produced,
            BTreeSet::from(["111".to_string(), "112910".to_string(), "112990".to_string()])
        );
        assert_eq!(mapped.group_count().unwrap(), 2);
        assert!(mapped.as_frame().height() >= 2);
    }
}
