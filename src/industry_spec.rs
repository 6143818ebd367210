//! Resolution of a (possibly non-uniform) target classification into a
//! leaf-code → target-code crosswalk.
use std::collections::{BTreeSet, HashMap, HashSet};
use std::path::Path;

use polars::prelude::*;
use serde::Deserialize;

use crate::error::{FlowError, Result};
use crate::schema::crosswalk;
use crate::table;

/// Desired target resolution: a default depth column plus ordered overrides
/// for subtrees that resolve at a different depth.
///
/// ```toml
/// default = "NAICS_3"
/// additional = ["F010"]
///
/// [[overrides]]
/// level = "NAICS_6"
/// codes = ["1129"]
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct IndustrySpec {
    pub default: String,
    #[serde(default)]
    pub overrides: Vec<SpecOverride>,
    /// Non-hierarchical codes carried through as self-mapped rows.
    #[serde(default)]
    pub additional: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SpecOverride {
    pub level: String,
    pub codes: Vec<String>,
}

impl IndustrySpec {
    pub fn new(default: impl Into<String>) -> Self {
        Self {
            default: default.into(),
            overrides: Vec::new(),
            additional: Vec::new(),
        }
    }

    pub fn with_override(mut self, level: impl Into<String>, codes: &[&str]) -> Self {
        self.overrides.push(SpecOverride {
            level: level.into(),
            codes: codes.iter().map(|c| c.to_string()).collect(),
        });
        self
    }

    pub fn with_additional(mut self, codes: &[&str]) -> Self {
        self.additional.extend(codes.iter().map(|c| c.to_string()));
        self
    }

    pub fn from_toml(s: &str) -> Result<Self> {
        toml::from_str(s).map_err(|e| FlowError::Configuration(e.to_string()))
    }

    /// Deepest depth named by the default or any override.
    pub fn deepest_level(&self) -> Option<usize> {
        std::iter::once(self.default.as_str())
            .chain(self.overrides.iter().map(|o| o.level.as_str()))
            .filter_map(depth_of)
            .max()
    }
}

/// Depth encoded in a hierarchy column name, e.g. `NAICS_4` → 4.
pub fn depth_of(column: &str) -> Option<usize> {
    column.rsplit_once('_')?.1.parse().ok()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectorCrosswalkEntry {
    pub source_code: String,
    pub target_code: String,
}

/// Resolved crosswalk: exactly one entry per leaf code.
#[derive(Debug, Clone, Default)]
pub struct SectorCrosswalk {
    entries: Vec<SectorCrosswalkEntry>,
    index: HashMap<String, usize>,
}

impl SectorCrosswalk {
    fn push(&mut self, source_code: String, target_code: String) -> bool {
        if self.index.contains_key(&source_code) {
            return false;
        }
        self.index.insert(source_code.clone(), self.entries.len());
        self.entries.push(SectorCrosswalkEntry {
            source_code,
            target_code,
        });
        true
    }

    pub fn entries(&self) -> &[SectorCrosswalkEntry] {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn target(&self, source_code: &str) -> Option<&str> {
        self.index
            .get(source_code)
            .map(|&i| self.entries[i].target_code.as_str())
    }

    /// Target codes for an arbitrary code.
    ///
    /// A leaf maps to its own target. A code above the leaves maps to the
    /// distinct targets of every leaf beneath it (one-to-many). Codes the
    /// hierarchy does not know are returned empty.
    pub fn targets_for(&self, code: &str) -> Vec<String> {
        if let Some(target) = self.target(code) {
            return vec![target.to_string()];
        }
        self.entries
            .iter()
            .filter(|e| e.source_code.starts_with(code))
            .map(|e| e.target_code.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    pub fn to_frame(&self) -> Result<DataFrame> {
        let sources: Vec<&str> = self.entries.iter().map(|e| e.source_code.as_str()).collect();
        let targets: Vec<&str> = self.entries.iter().map(|e| e.target_code.as_str()).collect();
        Ok(DataFrame::new(vec![
            Column::new(crosswalk::SOURCE_CODE.into(), sources),
            Column::new(crosswalk::TARGET_CODE.into(), targets),
        ])?)
    }
}

/// Build the leaf → target crosswalk for `spec` from a master hierarchy table
/// with one column per depth (`<SYSTEM>_2` … `<SYSTEM>_7`).
///
/// Every row starts at its ancestor in the default column; each override then
/// reassigns rows having any ancestor in its trigger list, in order, so later
/// overrides win. `additional` codes are appended self-mapped.
pub fn resolve_crosswalk(spec: &IndustrySpec, hierarchy: &DataFrame) -> Result<SectorCrosswalk> {
    let mut depth_columns: Vec<(usize, String)> = hierarchy
        .get_column_names_str()
        .iter()
        .filter_map(|c| depth_of(c).map(|d| (d, c.to_string())))
        .collect();
    depth_columns.sort();

    let position = |name: &str| -> Result<usize> {
        depth_columns
            .iter()
            .position(|(_, c)| c == name)
            .ok_or_else(|| {
                FlowError::Configuration(format!(
                    "Industry spec level '{name}' is not a column of the sector hierarchy"
                ))
            })
    };
    let default_pos = position(&spec.default)?;
    let overrides = spec
        .overrides
        .iter()
        .map(|o| {
            Ok((
                position(&o.level)?,
                o.codes.iter().map(String::as_str).collect::<HashSet<&str>>(),
            ))
        })
        .collect::<Result<Vec<_>>>()?;

    let levels: Vec<Vec<Option<String>>> = depth_columns
        .iter()
        .map(|(_, c)| table::string_values(hierarchy, c))
        .collect::<Result<_>>()?;

    let mut result = SectorCrosswalk::default();
    for row in 0..hierarchy.height() {
        let ancestors: Vec<Option<&str>> = levels.iter().map(|l| l[row].as_deref()).collect();
        let Some(leaf) = ancestors.iter().rev().flatten().next().copied() else {
            continue;
        };

        let mut target = ancestors[default_pos].unwrap_or(leaf);
        for (level_pos, triggers) in &overrides {
            if ancestors.iter().flatten().any(|a| triggers.contains(a)) {
                target = ancestors[*level_pos].unwrap_or(leaf);
            }
        }

        if !result.push(leaf.to_string(), target.to_string()) {
            log::debug!("Duplicate hierarchy leaf '{leaf}' ignored");
        }
    }

    for code in &spec.additional {
        result.push(code.clone(), code.clone());
    }

    log::info!(
        "Resolved industry spec '{}' with {} override(s): {} crosswalk rows",
        spec.default,
        spec.overrides.len(),
        result.len()
    );
    Ok(result)
}

/// Load a master hierarchy table; all columns as strings.
pub fn load_hierarchy(path: impl AsRef<Path>) -> Result<DataFrame> {
    table::read_csv_as_strings(path, None)
}
