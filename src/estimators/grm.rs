//! Growth, removal and mortality (GRM) records
//!
//! TREE_GRM_COMPONENT carries, per remeasured tree and per land/tree scope,
//! the tree's component between the two inventories, its sample design
//! (SUBPTYP_GRM) and its annual per-acre growth, mortality and removal
//! expansion. The tree's t1 and midpoint measurements come from
//! TREE_GRM_BEGIN and TREE_GRM_MIDPT, its t2 measurement from TREE.
//!
//! GRM records pick their adjustment factor from SUBPTYP_GRM, never from DIA.

use std::fmt;
use std::str::FromStr;

use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use super::biomass::POUNDS_PER_TON;
use super::growth::{growth_delta, GrowthBasis};
use super::EstimationContext;
use crate::aggregation::{ResponseRow, Values};
use crate::basis::{grm_basis, TreeBasis};
use crate::config::{EstimatorConfig, LandType, TreeType};
use crate::data::tables;
use crate::error::{FiaError, Result};
use crate::utils::columns::{f64_values, i64_values, key_values, str_values};
use crate::utils::group_key::GroupKey;
use crate::utils::lazy_helpers::{filter_rows, materialize_with_columns, ColumnRequest};

/// Component of change of one tree between inventories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GrmComponent {
    Survivor,
    Ingrowth,
    Reversion,
    Cut,
    Diversion,
    Mortality,
    NotUsed,
}

impl GrmComponent {
    pub fn is_removal(self) -> bool {
        matches!(self, GrmComponent::Cut | GrmComponent::Diversion)
    }
}

impl FromStr for GrmComponent {
    type Err = String;

    /// FIA codes, with or without the 1/2 suffix (`CUT1`, `MORTALITY2` ...)
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let code = s.trim().to_ascii_uppercase();
        let base = code.trim_end_matches(['1', '2']);
        match base {
            "SURVIVOR" => Ok(GrmComponent::Survivor),
            "INGROWTH" => Ok(GrmComponent::Ingrowth),
            "REVERSION" => Ok(GrmComponent::Reversion),
            "CUT" => Ok(GrmComponent::Cut),
            "DIVERSION" => Ok(GrmComponent::Diversion),
            "MORTALITY" => Ok(GrmComponent::Mortality),
            "NOT USED" | "NOT_USED" | "" => Ok(GrmComponent::NotUsed),
            _ => Err(format!("unknown GRM component '{}'", s)),
        }
    }
}

impl fmt::Display for GrmComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GrmComponent::Survivor => "SURVIVOR",
            GrmComponent::Ingrowth => "INGROWTH",
            GrmComponent::Reversion => "REVERSION",
            GrmComponent::Cut => "CUT",
            GrmComponent::Diversion => "DIVERSION",
            GrmComponent::Mortality => "MORTALITY",
            GrmComponent::NotUsed => "NOT USED",
        };
        write!(f, "{}", s)
    }
}

/// What a GRM estimate measures per tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GrmMeasure {
    /// Net cubic-foot volume
    #[default]
    Volume,
    /// Aboveground dry biomass, short tons
    Biomass,
    /// Trees
    Count,
}

impl GrmMeasure {
    pub fn column(self) -> Option<&'static str> {
        match self {
            GrmMeasure::Volume => Some("VOLCFNET"),
            GrmMeasure::Biomass => Some("DRYBIO_AG"),
            GrmMeasure::Count => None,
        }
    }

    /// Per-tree value from the raw column value (null -> 0)
    pub fn value(self, raw: Option<f64>) -> f64 {
        match self {
            GrmMeasure::Volume => raw.unwrap_or(0.0),
            GrmMeasure::Biomass => raw.unwrap_or(0.0) / POUNDS_PER_TON,
            GrmMeasure::Count => 1.0,
        }
    }
}

/// TREE_GRM_COMPONENT columns for one land/tree scope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GrmColumns {
    pub component: String,
    pub subptyp: String,
    pub tpagrow: String,
    pub tpamort: String,
    pub tparemv: String,
}

impl GrmColumns {
    pub fn for_config(config: &EstimatorConfig) -> Result<Self> {
        let trees = match config.tree_type {
            TreeType::GrowingStock => "GS",
            TreeType::Live | TreeType::All => "AL",
            TreeType::Dead => {
                return Err(FiaError::InvalidConfig(
                    "GRM estimates track trees alive at the first inventory; tree_type dead is not supported"
                        .to_string(),
                ))
            }
        };
        let land = match config.land_type {
            LandType::Timber => "TIMBER",
            LandType::Forest | LandType::All => "FOREST",
        };
        let column = |field: &str| format!("SUBP_{}_{}_{}", field, trees, land);
        Ok(Self {
            component: column("COMPONENT"),
            subptyp: column("SUBPTYP_GRM"),
            tpagrow: column("TPAGROW_UNADJ"),
            tpamort: column("TPAMORT_UNADJ"),
            tparemv: column("TPAREMV_UNADJ"),
        })
    }
}

/// One remeasured tree on a condition of the area domain
#[derive(Debug, Clone, PartialEq)]
pub struct GrmRecord {
    pub plt_cn: String,
    pub condid: i64,
    pub cond_key: GroupKey,
    pub tree_key: GroupKey,
    pub component: GrmComponent,
    pub basis: Option<TreeBasis>,
    pub tpagrow: f64,
    pub tpamort: f64,
    pub tparemv: f64,
    /// Measure at t1, midpoint and t2
    pub begin: f64,
    pub midpt: f64,
    pub end: f64,
    pub remper: Option<f64>,
}

impl GrmRecord {
    /// Annual growth contribution per acre
    pub fn growth(&self, basis: GrowthBasis) -> f64 {
        let delta = growth_delta(self.component, basis, self.begin, self.midpt, self.end);
        match self.remper {
            Some(remper) if remper > 0.0 => self.tpagrow * delta / remper,
            _ => 0.0,
        }
    }

    pub fn mortality(&self) -> f64 {
        if self.component == GrmComponent::Mortality {
            self.tpamort * self.midpt
        } else {
            0.0
        }
    }

    pub fn removals(&self) -> f64 {
        if self.component.is_removal() {
            self.tparemv * self.midpt
        } else {
            0.0
        }
    }

    pub fn response(&self, values: Values) -> ResponseRow {
        ResponseRow {
            plt_cn: self.plt_cn.clone(),
            condid: self.condid,
            basis: self.basis,
            cond_key: self.cond_key.clone(),
            tree_key: self.tree_key.clone(),
            values,
        }
    }
}

/// Measure keyed by TRE_CN
fn measure_by_tree(
    ctx: &EstimationContext<'_>,
    table: &str,
    measure: GrmMeasure,
) -> Result<FxHashMap<String, f64>> {
    let Some(column) = measure.column() else {
        return Ok(FxHashMap::default());
    };
    let request = ColumnRequest::new(["TRE_CN", column]);
    let df = materialize_with_columns(ctx.source, table, &request, ctx.estimator)?;
    let keys = key_values(&df, "TRE_CN")?;
    let values = f64_values(&df, column)?;
    Ok(keys
        .into_iter()
        .zip(values)
        .filter_map(|(k, v)| k.map(|k| (k, measure.value(v))))
        .collect())
}

/// Load GRM records for the context's evaluation, land/tree scope and domains
pub fn load_grm(ctx: &EstimationContext<'_>, measure: GrmMeasure, with_begin: bool) -> Result<Vec<GrmRecord>> {
    let columns = GrmColumns::for_config(ctx.config)?;

    // ===================================================================
    // STEP 1: t2 TREE rows (condition, groups, tree domain, end measure)
    // ===================================================================
    let mut tree_request = ColumnRequest::new(["CN", "PLT_CN", "CONDID", "DIA"]);
    tree_request.require_all(measure.column());
    tree_request.require_all(ctx.groups.stored_tree_columns().cloned());
    if let Some(domain) = &ctx.tree_domain {
        tree_request.require_all(domain.columns());
    }
    let tree_df = materialize_with_columns(ctx.source, tables::TREE, &tree_request, ctx.estimator)?;
    let tree_df = filter_rows(tree_df, ctx.tree_domain.as_ref().map(|d| d.to_polars()))?;
    let end_columns: Vec<&str> = measure.column().into_iter().collect();
    let trees = ctx.collect_trees(&tree_df, &end_columns, false)?;
    let tree_index: FxHashMap<&str, usize> = trees
        .cn
        .iter()
        .enumerate()
        .filter_map(|(i, cn)| cn.as_deref().map(|cn| (cn, i)))
        .collect();

    // ===================================================================
    // STEP 2: begin / midpoint measures
    // ===================================================================
    let midpt = measure_by_tree(ctx, tables::TREE_GRM_MIDPT, measure)?;
    let begin = if with_begin {
        measure_by_tree(ctx, tables::TREE_GRM_BEGIN, measure)?
    } else {
        FxHashMap::default()
    };

    // ===================================================================
    // STEP 3: component records
    // ===================================================================
    let request = ColumnRequest::new([
        "TRE_CN".to_string(),
        columns.component.clone(),
        columns.subptyp.clone(),
        columns.tpagrow.clone(),
        columns.tpamort.clone(),
        columns.tparemv.clone(),
    ]);
    let grm = materialize_with_columns(ctx.source, tables::TREE_GRM_COMPONENT, &request, ctx.estimator)?;
    let tre_cns = key_values(&grm, "TRE_CN")?;
    let components = str_values(&grm, &columns.component)?;
    let subptyps = i64_values(&grm, &columns.subptyp)?;
    let tpagrow = f64_values(&grm, &columns.tpagrow)?;
    let tpamort = f64_values(&grm, &columns.tpamort)?;
    let tparemv = f64_values(&grm, &columns.tparemv)?;

    let mut records = Vec::new();
    for i in 0..grm.height() {
        let Some(tre_cn) = &tre_cns[i] else { continue };
        let Some(&t) = tree_index.get(tre_cn.as_str()) else { continue };
        let condition = &ctx.conditions.records[trees.cond[t]];
        if !condition.in_area {
            continue;
        }
        let component = match &components[i] {
            None => GrmComponent::NotUsed,
            Some(code) => code.parse::<GrmComponent>().map_err(|reason| FiaError::InvalidData {
                table: tables::TREE_GRM_COMPONENT.to_string(),
                column: columns.component.clone(),
                reason,
            })?,
        };
        if component == GrmComponent::NotUsed {
            continue;
        }
        let end = match measure.column() {
            Some(column) => measure.value(trees.values.get(column).and_then(|v| v[t])),
            None => 1.0,
        };
        let lookup = |map: &FxHashMap<String, f64>| match measure {
            GrmMeasure::Count => 1.0,
            _ => map.get(tre_cn).copied().unwrap_or(0.0),
        };
        records.push(GrmRecord {
            plt_cn: trees.plt_cn[t].clone(),
            condid: trees.condid[t],
            cond_key: condition.key.clone(),
            tree_key: trees.tree_key[t].clone(),
            component,
            basis: grm_basis(subptyps[i]),
            tpagrow: tpagrow[i].unwrap_or(0.0),
            tpamort: tpamort[i].unwrap_or(0.0),
            tparemv: tparemv[i].unwrap_or(0.0),
            begin: lookup(&begin),
            midpt: lookup(&midpt),
            end,
            remper: ctx.remper(&trees.plt_cn[t]),
        });
    }
    tracing::debug!(
        "{}: {} GRM records ({}) in domain",
        ctx.estimator,
        records.len(),
        columns.component
    );
    Ok(records)
}
