//! Estimator configuration
//!
//! Options recognised by every estimator. Loaded from JSON (same pattern as the
//! calibration files) or assembled with the builder methods.

use std::fs;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Land classification scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LandType {
    /// COND_STATUS_CD == 1
    #[default]
    Forest,
    /// Forest on productive (SITECLCD 1-6), unreserved (RESERVCD 0) land
    Timber,
    /// No land restriction
    All,
}

/// Tree status scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TreeType {
    /// STATUSCD == 1
    #[default]
    Live,
    /// STATUSCD == 2
    Dead,
    /// Live trees with TREECLCD == 2
    #[serde(alias = "gs")]
    GrowingStock,
    /// No status restriction
    All,
}

/// Options shared by all estimators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EstimatorConfig {
    /// Extra grouping columns (TREE, COND or PLOT column names)
    pub grp_by: Vec<String>,
    /// Group by SPCD
    pub by_species: bool,
    /// Group by derived SIZE_CLASS
    pub by_size_class: bool,
    /// Group area by derived LAND_TYPE (area estimator only)
    pub by_land_type: bool,
    pub land_type: LandType,
    pub tree_type: TreeType,
    /// SQL-like filter over TREE columns
    pub tree_domain: Option<String>,
    /// SQL-like filter over COND/PLOT columns
    pub area_domain: Option<String>,
    /// Include population totals alongside per-acre values
    pub totals: bool,
    /// Report variance instead of standard error
    pub variance: bool,
    /// Auto-select the most recent evaluation when none is selected
    pub most_recent: bool,
}

impl Default for EstimatorConfig {
    fn default() -> Self {
        Self {
            grp_by: Vec::new(),
            by_species: false,
            by_size_class: false,
            by_land_type: false,
            land_type: LandType::Forest,
            tree_type: TreeType::Live,
            tree_domain: None,
            area_domain: None,
            totals: false,
            variance: false,
            most_recent: false,
        }
    }
}

impl EstimatorConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load configuration from a JSON file
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read estimator config: {:?}", path))?;
        Self::from_json_str(&contents)
    }

    pub fn from_json_str(json: &str) -> Result<Self> {
        let config = serde_json::from_str(json)
            .with_context(|| "Failed to parse estimator config JSON")?;
        Ok(config)
    }

    pub fn grp_by<I, S>(mut self, columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.grp_by = columns.into_iter().map(Into::into).collect();
        self
    }

    pub fn by_species(mut self, on: bool) -> Self {
        self.by_species = on;
        self
    }

    pub fn by_size_class(mut self, on: bool) -> Self {
        self.by_size_class = on;
        self
    }

    pub fn by_land_type(mut self, on: bool) -> Self {
        self.by_land_type = on;
        self
    }

    pub fn land_type(mut self, land_type: LandType) -> Self {
        self.land_type = land_type;
        self
    }

    pub fn tree_type(mut self, tree_type: TreeType) -> Self {
        self.tree_type = tree_type;
        self
    }

    pub fn tree_domain(mut self, expr: impl Into<String>) -> Self {
        self.tree_domain = Some(expr.into());
        self
    }

    pub fn area_domain(mut self, expr: impl Into<String>) -> Self {
        self.area_domain = Some(expr.into());
        self
    }

    pub fn totals(mut self, on: bool) -> Self {
        self.totals = on;
        self
    }

    pub fn variance(mut self, on: bool) -> Self {
        self.variance = on;
        self
    }

    pub fn most_recent(mut self, on: bool) -> Self {
        self.most_recent = on;
        self
    }

    /// Grouping columns in output order: explicit `grp_by`, then the
    /// convenience flags (SPCD, SIZE_CLASS, LAND_TYPE), without repeats.
    pub fn group_columns(&self) -> Vec<String> {
        let mut columns: Vec<String> = Vec::new();
        let mut push = |name: &str| {
            let upper = name.to_ascii_uppercase();
            if !columns.contains(&upper) {
                columns.push(upper);
            }
        };
        for name in &self.grp_by {
            push(name);
        }
        if self.by_species {
            push("SPCD");
        }
        if self.by_size_class {
            push("SIZE_CLASS");
        }
        if self.by_land_type {
            push("LAND_TYPE");
        }
        columns
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = EstimatorConfig::default();
        assert_eq!(config.land_type, LandType::Forest);
        assert_eq!(config.tree_type, TreeType::Live);
        assert!(!config.totals);
        assert!(config.group_columns().is_empty());
    }

    #[test]
    fn test_json_partial_config() {
        let config = EstimatorConfig::from_json_str(
            r#"{"grp_by": ["fortypcd"], "by_species": true, "land_type": "timber", "tree_type": "gs", "totals": true}"#,
        )
        .unwrap();
        assert_eq!(config.land_type, LandType::Timber);
        assert_eq!(config.tree_type, TreeType::GrowingStock);
        assert!(config.totals);
        assert_eq!(config.group_columns(), vec!["FORTYPCD", "SPCD"]);
    }

    #[test]
    fn test_group_columns_deduplicated() {
        let config = EstimatorConfig::new()
            .grp_by(["SPCD", "OWNGRPCD"])
            .by_species(true)
            .by_size_class(true);
        assert_eq!(config.group_columns(), vec!["SPCD", "OWNGRPCD", "SIZE_CLASS"]);
    }

    #[test]
    fn test_bad_json_is_an_error() {
        assert!(EstimatorConfig::from_json_str(r#"{"land_type": "swamp"}"#).is_err());
    }
}
