//! Grouping column resolution and derived group labels
//!
//! A requested grouping column is condition-level when COND or PLOT carries
//! it (or it is the derived LAND_TYPE), tree-level when only TREE carries it
//! (or it is the derived SIZE_CLASS). Condition-level columns come first in
//! the group key; they are the only ones that split the denominator.

use crate::error::{FiaError, Result};

pub const SIZE_CLASS: &str = "SIZE_CLASS";
pub const LAND_TYPE: &str = "LAND_TYPE";

/// Diameter class label (inches)
pub fn size_class_label(dia: Option<f64>) -> Option<&'static str> {
    let dia = dia.filter(|d| !d.is_nan())?;
    let label = if dia < 1.0 {
        "<1.0"
    } else if dia < 5.0 {
        "1.0-4.9"
    } else if dia < 10.0 {
        "5.0-9.9"
    } else if dia < 20.0 {
        "10.0-19.9"
    } else if dia < 30.0 {
        "20.0-29.9"
    } else {
        "30.0+"
    };
    Some(label)
}

/// Land class label from COND_STATUS_CD, SITECLCD and RESERVCD
pub fn land_type_label(cond_status: Option<i64>, siteclcd: Option<i64>, reservcd: Option<i64>) -> &'static str {
    match cond_status {
        Some(1) => {
            let productive = siteclcd.is_some_and(|s| (1..=6).contains(&s));
            if productive && reservcd == Some(0) {
                "Timber"
            } else {
                "Non-timber forest"
            }
        }
        Some(2) => "Non-forest",
        Some(3) | Some(4) => "Water",
        _ => "Non-sampled",
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupPlan {
    /// Condition-level columns, in key order (COND, PLOT or LAND_TYPE)
    pub cond_columns: Vec<String>,
    /// Condition-level columns that must be attached from PLOT
    pub plot_columns: Vec<String>,
    /// Tree-level columns, in key order (TREE or SIZE_CLASS)
    pub tree_columns: Vec<String>,
}

fn find(schema: &[String], name: &str) -> Option<String> {
    schema.iter().find(|c| c.eq_ignore_ascii_case(name)).cloned()
}

impl GroupPlan {
    pub fn resolve(
        requested: &[String],
        cond_schema: &[String],
        plot_schema: &[String],
        tree_schema: Option<&[String]>,
    ) -> Result<Self> {
        let mut plan = GroupPlan::default();
        for name in requested {
            let upper = name.to_ascii_uppercase();
            if upper == LAND_TYPE {
                plan.cond_columns.push(LAND_TYPE.to_string());
            } else if upper == SIZE_CLASS {
                if tree_schema.is_none() {
                    return Err(FiaError::InvalidConfig(
                        "SIZE_CLASS grouping requires tree records".to_string(),
                    ));
                }
                plan.tree_columns.push(SIZE_CLASS.to_string());
            } else if let Some(col) = find(cond_schema, &upper) {
                plan.cond_columns.push(col);
            } else if let Some(col) = find(plot_schema, &upper) {
                plan.cond_columns.push(col.clone());
                plan.plot_columns.push(col);
            } else if let Some(col) = tree_schema.and_then(|s| find(s, &upper)) {
                plan.tree_columns.push(col);
            } else {
                return Err(FiaError::InvalidConfig(format!(
                    "grouping column {} not found in COND, PLOT or TREE",
                    name
                )));
            }
        }
        // a column can arrive twice through grp_by spelling variants
        dedup_in_order(&mut plan.cond_columns);
        dedup_in_order(&mut plan.plot_columns);
        dedup_in_order(&mut plan.tree_columns);
        Ok(plan)
    }

    /// Output names in key order
    pub fn names(&self) -> Vec<String> {
        self.cond_columns.iter().chain(self.tree_columns.iter()).cloned().collect()
    }

    pub fn has_tree_groups(&self) -> bool {
        !self.tree_columns.is_empty()
    }

    pub fn is_empty(&self) -> bool {
        self.cond_columns.is_empty() && self.tree_columns.is_empty()
    }

    /// Tree-level columns read from TREE (derived ones excluded)
    pub fn stored_tree_columns(&self) -> impl Iterator<Item = &String> {
        self.tree_columns.iter().filter(|c| c.as_str() != SIZE_CLASS)
    }

    /// Condition-level columns read from COND
    pub fn stored_cond_columns(&self) -> impl Iterator<Item = &String> {
        self.cond_columns
            .iter()
            .filter(|c| c.as_str() != LAND_TYPE && !self.plot_columns.contains(c))
    }
}

fn dedup_in_order(columns: &mut Vec<String>) {
    let mut seen: Vec<String> = Vec::with_capacity(columns.len());
    columns.retain(|c| {
        if seen.contains(c) {
            false
        } else {
            seen.push(c.clone());
            true
        }
    });
}
