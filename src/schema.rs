/// Column-name constants for flowsector tables.
/// Single source of truth - exported to Python via PyO3.

// ── Flow record columns ─────────────────────────────────────────────────────
pub mod flow {
    pub const FLOW_AMOUNT: &str = "FlowAmount";
    pub const FLOW_NAME: &str = "FlowName";
    pub const UNIT: &str = "Unit";
    pub const CLASS: &str = "Class";
    pub const SOURCE_NAME: &str = "SourceName";
    pub const FLOW_TYPE: &str = "FlowType";
    pub const LOCATION: &str = "Location";
    pub const YEAR: &str = "Year";
    pub const ACTIVITY_PRODUCED_BY: &str = "ActivityProducedBy";
    pub const ACTIVITY_CONSUMED_BY: &str = "ActivityConsumedBy";
    pub const DESCRIPTION: &str = "Description";
    pub const SUPPRESSED: &str = "Suppressed";

    /// Columns every parser must deliver.
    pub const REQUIRED: [&str; 9] = [
        FLOW_AMOUNT,
        UNIT,
        ACTIVITY_PRODUCED_BY,
        ACTIVITY_CONSUMED_BY,
        FLOW_TYPE,
        LOCATION,
        YEAR,
        CLASS,
        SOURCE_NAME,
    ];

    /// Numeric quality scores, averaged (not summed) on aggregation.
    pub const QUALITY_SCORES: [&str; 2] = ["DataReliability", "DataCollection"];

    /// Free-text fields never used as grouping keys.
    pub const DESCRIPTIONS: [&str; 1] = [DESCRIPTION];
}

// ── Sector columns ──────────────────────────────────────────────────────────
pub mod sector {
    pub const SECTOR_PRODUCED_BY: &str = "SectorProducedBy";
    pub const SECTOR_CONSUMED_BY: &str = "SectorConsumedBy";
}

// ── Group bookkeeping (attribution only) ────────────────────────────────────
pub mod group {
    pub const GROUP_ID: &str = "group_id";
    pub const GROUP_TOTAL: &str = "group_total";

    pub const ALL: [&str; 2] = [GROUP_ID, GROUP_TOTAL];
}

// ── Attribution working columns ─────────────────────────────────────────────
pub mod attribution {
    pub const ATTRIBUTION_LOCATION: &str = "AttributionLocation";

    pub const WORKING: [&str; 1] = [ATTRIBUTION_LOCATION];
}

// ── Activity crosswalk / sector crosswalk columns ───────────────────────────
pub mod crosswalk {
    pub const ACTIVITY: &str = "Activity";
    pub const SECTOR: &str = "Sector";
    pub const SECTOR_TYPE: &str = "SectorType";
    pub const SECTOR_SOURCE_NAME: &str = "SectorSourceName";

    pub const REQUIRED: [&str; 4] = [ACTIVITY, SECTOR, SECTOR_TYPE, SECTOR_SOURCE_NAME];

    pub const SOURCE_CODE: &str = "source_code";
    pub const TARGET_CODE: &str = "target_code";
}

// ── Reference (attribution source) columns ──────────────────────────────────
pub mod reference {
    pub const SECTOR: &str = "Sector";
    pub const LOCATION: &str = "Location";
    pub const FLOW_AMOUNT: &str = "FlowAmount";
}

// ── FlowType values ─────────────────────────────────────────────────────────
pub mod flow_type {
    pub const ELEMENTARY: &str = "ELEMENTARY_FLOW";
    pub const TECHNOSPHERE: &str = "TECHNOSPHERE_FLOW";
    pub const WASTE: &str = "WASTE_FLOW";
}

// ── Location codes ──────────────────────────────────────────────────────────
pub mod location {
    pub const US_FIPS: &str = "00000";
    pub const FIPS_LEN: usize = 5;
    pub const STATE_DIGITS: usize = 2;
}
