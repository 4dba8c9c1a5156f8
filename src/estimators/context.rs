//! Per-estimate context: resolved groups, compiled domains, the evaluation's
//! stratification and its conditions, plus the shared TREE loader.

use std::sync::Arc;

use polars::prelude::*;
use rustc_hash::FxHashMap;

use super::grouping::{land_type_label, size_class_label, GroupPlan, LAND_TYPE, SIZE_CLASS};
use crate::aggregation::{ConditionRow, ResponseRow, Values};
use crate::basis::{classify, condition_basis, TreeBasis};
use crate::config::{EstimatorConfig, TreeType};
use crate::data::{tables, TableSource};
use crate::domain::{land_type_columns, land_type_predicate, tree_type_columns, tree_type_predicate, DomainExpr, DomainFilter};
use crate::error::{FiaError, Result};
use crate::stratification::Stratification;
use crate::utils::columns::{f64_values, f64_values_or_null, has_column, i64_values, i64_values_or_null, key_values, str_values_or_null};
use crate::utils::group_key::{group_values, GroupKey, GroupValue};
use crate::utils::lazy_helpers::{filter_rows, materialize_with_columns, predicate_mask, ColumnRequest};

/// One condition of the selected evaluation
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionRecord {
    pub plt_cn: String,
    pub condid: i64,
    /// CONDPROP_UNADJ (null -> 0)
    pub condprop: f64,
    pub basis: TreeBasis,
    pub status: Option<i64>,
    pub key: GroupKey,
    /// Passes the land-type preset
    pub in_land: bool,
    /// Passes the area domain
    pub in_area: bool,
}

impl ConditionRecord {
    pub fn in_domain(&self) -> bool {
        self.in_land && self.in_area
    }

    pub fn to_row(&self) -> ConditionRow {
        ConditionRow {
            plt_cn: self.plt_cn.clone(),
            condid: self.condid,
            condprop: self.condprop,
            basis: self.basis,
            cond_key: self.key.clone(),
        }
    }
}

/// Conditions on the evaluation's plots, aligned with their COND(+PLOT) frame
#[derive(Debug, Clone)]
pub struct ConditionSet {
    pub records: Vec<ConditionRecord>,
    pub frame: DataFrame,
    index: FxHashMap<String, FxHashMap<i64, usize>>,
}

impl ConditionSet {
    pub fn load(
        source: &dyn TableSource,
        strat: &Stratification,
        config: &EstimatorConfig,
        groups: &GroupPlan,
        area_domain: Option<&DomainFilter>,
        plot_columns: &[String],
        extra_columns: &[String],
        estimator: &str,
    ) -> Result<Self> {
        let cond_schema = source.columns(tables::COND)?;
        let in_cond = |name: &str| cond_schema.iter().any(|c| c == name);

        let mut request = ColumnRequest::new(["PLT_CN", "CONDID", "CONDPROP_UNADJ"]);
        request.optional("PROP_BASIS").optional("COND_STATUS_CD");
        request.require_all(land_type_columns(config.land_type).iter().copied());
        if groups.cond_columns.iter().any(|c| c == LAND_TYPE) {
            request.require_all(["COND_STATUS_CD", "SITECLCD", "RESERVCD"]);
        }
        request.require_all(groups.stored_cond_columns().cloned());
        if let Some(domain) = area_domain {
            for name in domain.columns() {
                if in_cond(&name) {
                    request.require(name);
                }
            }
        }
        request.require_all(extra_columns.iter().cloned());

        let cond = materialize_with_columns(source, tables::COND, &request, estimator)?;
        let frame = strat.attach_plot_columns(&cond, "PLT_CN", plot_columns)?;

        let plt_cns = key_values(&frame, "PLT_CN")?;
        let condids = i64_values(&frame, "CONDID")?;
        let condprops = f64_values(&frame, "CONDPROP_UNADJ")?;
        let prop_basis = str_values_or_null(&frame, "PROP_BASIS")?;
        let status = i64_values_or_null(&frame, "COND_STATUS_CD")?;
        let in_land = predicate_mask(&frame, land_type_predicate(config.land_type).map(|e| e.to_polars()))?;
        let in_area = predicate_mask(&frame, area_domain.map(DomainFilter::to_polars))?;
        let keys = condition_keys(&frame, &groups.cond_columns)?;

        let mut records = Vec::with_capacity(frame.height());
        let mut index: FxHashMap<String, FxHashMap<i64, usize>> = FxHashMap::default();
        for (i, key) in keys.into_iter().enumerate() {
            let (Some(plt_cn), Some(condid)) = (plt_cns[i].clone(), condids[i]) else { continue };
            index.entry(plt_cn.clone()).or_default().insert(condid, records.len());
            records.push(ConditionRecord {
                plt_cn,
                condid,
                condprop: condprops[i].unwrap_or(0.0),
                basis: condition_basis(prop_basis[i].as_deref()),
                status: status[i],
                key,
                in_land: in_land[i],
                in_area: in_area[i],
            });
        }
        check_plot_proportions(&records)?;
        tracing::debug!(
            "{}: {} conditions on evaluation plots, {} in land/area domain",
            estimator,
            records.len(),
            records.iter().filter(|r| r.in_domain()).count()
        );
        Ok(Self { records, frame, index })
    }

    pub fn position(&self, plt_cn: &str, condid: i64) -> Option<usize> {
        self.index.get(plt_cn).and_then(|m| m.get(&condid)).copied()
    }

    pub fn get(&self, plt_cn: &str, condid: i64) -> Option<&ConditionRecord> {
        self.position(plt_cn, condid).map(|i| &self.records[i])
    }

    /// Conditions in both the land-type and the area domain
    pub fn domain_rows(&self) -> Vec<ConditionRow> {
        self.records
            .iter()
            .filter(|r| r.in_domain())
            .map(ConditionRecord::to_row)
            .collect()
    }

    /// A COND column aligned with `records`
    pub fn f64_column(&self, name: &str) -> Result<Vec<Option<f64>>> {
        // records skip rows with null keys; realign through the frame keys
        let values = f64_values(&self.frame, name)?;
        self.realign(values)
    }

    pub fn i64_column(&self, name: &str) -> Result<Vec<Option<i64>>> {
        let values = i64_values(&self.frame, name)?;
        self.realign(values)
    }

    fn realign<T: Clone>(&self, values: Vec<Option<T>>) -> Result<Vec<Option<T>>> {
        if values.len() == self.records.len() {
            return Ok(values);
        }
        let plt_cns = key_values(&self.frame, "PLT_CN")?;
        let condids = i64_values(&self.frame, "CONDID")?;
        Ok(values
            .into_iter()
            .enumerate()
            .filter(|(i, _)| plt_cns[*i].is_some() && condids[*i].is_some())
            .map(|(_, v)| v)
            .collect())
    }
}

fn condition_keys(frame: &DataFrame, columns: &[String]) -> Result<Vec<GroupKey>> {
    let mut per_column: Vec<Vec<GroupValue>> = Vec::with_capacity(columns.len());
    for name in columns {
        if name == LAND_TYPE {
            let status = i64_values(frame, "COND_STATUS_CD")?;
            let site = i64_values(frame, "SITECLCD")?;
            let reserved = i64_values(frame, "RESERVCD")?;
            per_column.push(
                (0..frame.height())
                    .map(|i| GroupValue::Str(land_type_label(status[i], site[i], reserved[i]).to_string()))
                    .collect(),
            );
        } else {
            per_column.push(group_values(frame, name)?);
        }
    }
    Ok((0..frame.height())
        .map(|i| GroupKey(per_column.iter().map(|c| c[i].clone()).collect()))
        .collect())
}

/// Tolerance on the per-plot CONDPROP_UNADJ sum
pub const CONDPROP_TOLERANCE: f64 = 1e-6;

/// A plot's condition proportions must not add up to more than the plot
fn check_plot_proportions(records: &[ConditionRecord]) -> Result<()> {
    let mut totals: FxHashMap<&str, f64> = FxHashMap::default();
    for r in records {
        *totals.entry(r.plt_cn.as_str()).or_insert(0.0) += r.condprop;
    }
    let mut over: Vec<(&str, f64)> = totals
        .into_iter()
        .filter(|(_, total)| *total > 1.0 + CONDPROP_TOLERANCE)
        .collect();
    if over.is_empty() {
        return Ok(());
    }
    over.sort_by(|a, b| a.0.cmp(b.0));
    let (plt_cn, total) = over[0];
    Err(FiaError::InvalidData {
        table: tables::COND.to_string(),
        column: "CONDPROP_UNADJ".to_string(),
        reason: format!(
            "conditions of plot {} sum to {:.4} (> 1.0); {} plot(s) affected",
            plt_cn,
            total,
            over.len()
        ),
    })
}

/// Filtered live/dead tree records joined to their conditions
#[derive(Debug, Clone)]
pub struct TreeSet {
    /// TREE.CN when loaded
    pub cn: Vec<Option<String>>,
    pub plt_cn: Vec<String>,
    pub condid: Vec<i64>,
    /// Index into `ConditionSet::records`
    pub cond: Vec<usize>,
    pub dia: Vec<Option<f64>>,
    pub tpa: Vec<f64>,
    pub tree_key: Vec<GroupKey>,
    /// Requested value columns, aligned with the records
    pub values: FxHashMap<String, Vec<Option<f64>>>,
}

impl TreeSet {
    pub fn len(&self) -> usize {
        self.plt_cn.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plt_cn.is_empty()
    }

    pub fn value(&self, column: &str, i: usize) -> f64 {
        self.values
            .get(column)
            .and_then(|v| v[i])
            .unwrap_or(0.0)
    }
}

/// Everything an estimator sees while building its response rows
pub struct EstimationContext<'a> {
    pub source: &'a dyn TableSource,
    pub config: &'a EstimatorConfig,
    pub estimator: &'static str,
    pub strat: Arc<Stratification>,
    pub groups: GroupPlan,
    pub tree_domain: Option<DomainFilter>,
    pub area_domain: Option<DomainFilter>,
    pub conditions: ConditionSet,
}

impl EstimationContext<'_> {
    /// Basis of a tree on its plot
    pub fn tree_basis(&self, plt_cn: &str, dia: Option<f64>) -> TreeBasis {
        let breakpoint = self.strat.plot(plt_cn).and_then(|p| p.macro_breakpoint);
        classify(dia, breakpoint)
    }

    pub fn remper(&self, plt_cn: &str) -> Option<f64> {
        self.strat.plot(plt_cn).and_then(|p| p.remper)
    }

    /// Load TREE records passing `tree_type`, the tree domain and `extra`,
    /// located on conditions of the land/area domain.
    pub fn load_trees(
        &self,
        tree_type: TreeType,
        value_columns: &[&str],
        extra: Option<DomainExpr>,
        extra_columns: &[&str],
    ) -> Result<TreeSet> {
        let mut request = ColumnRequest::new(["PLT_CN", "CONDID", "DIA", "TPA_UNADJ"]);
        request.optional("CN");
        request.require_all(value_columns.iter().copied());
        request.require_all(tree_type_columns(tree_type).iter().copied());
        request.require_all(extra_columns.iter().copied());
        request.require_all(self.groups.stored_tree_columns().cloned());
        if let Some(domain) = &self.tree_domain {
            request.require_all(domain.columns());
        }
        if let Some(expr) = &extra {
            request.require_all(expr.columns());
        }
        let trees = materialize_with_columns(self.source, tables::TREE, &request, self.estimator)?;

        let predicate = DomainExpr::all([
            tree_type_predicate(tree_type),
            self.tree_domain.as_ref().map(|d| d.expr().clone()),
            extra,
        ]);
        let trees = filter_rows(trees, predicate.map(|p| p.to_polars()))?;
        self.collect_trees(&trees, value_columns, true)
    }

    /// Typed extraction of a filtered TREE frame; rows off the evaluation (or,
    /// with `domain_only`, outside the land/area domain) are dropped.
    pub fn collect_trees(&self, trees: &DataFrame, value_columns: &[&str], domain_only: bool) -> Result<TreeSet> {
        let cns = if has_column(trees, "CN") {
            key_values(trees, "CN")?
        } else {
            vec![None; trees.height()]
        };
        let plt_cns = key_values(trees, "PLT_CN")?;
        let condids = i64_values(trees, "CONDID")?;
        let dias = f64_values_or_null(trees, "DIA")?;
        let tpas = f64_values_or_null(trees, "TPA_UNADJ")?;
        let raw_values: Vec<Vec<Option<f64>>> = value_columns
            .iter()
            .map(|c| f64_values(trees, c))
            .collect::<Result<_>>()?;
        let mut key_columns: Vec<Vec<GroupValue>> = Vec::new();
        for name in &self.groups.tree_columns {
            if name == SIZE_CLASS {
                key_columns.push(
                    dias.iter()
                        .map(|d| size_class_label(*d).map_or(GroupValue::Null, |s| GroupValue::Str(s.to_string())))
                        .collect(),
                );
            } else {
                key_columns.push(group_values(trees, name)?);
            }
        }

        let mut set = TreeSet {
            cn: Vec::new(),
            plt_cn: Vec::new(),
            condid: Vec::new(),
            cond: Vec::new(),
            dia: Vec::new(),
            tpa: Vec::new(),
            tree_key: Vec::new(),
            values: value_columns.iter().map(|c| (c.to_string(), Vec::new())).collect(),
        };
        for i in 0..trees.height() {
            let (Some(plt_cn), Some(condid)) = (&plt_cns[i], condids[i]) else { continue };
            let Some(cond) = self.conditions.position(plt_cn, condid) else { continue };
            if domain_only && !self.conditions.records[cond].in_domain() {
                continue;
            }
            set.cn.push(cns[i].clone());
            set.plt_cn.push(plt_cn.clone());
            set.condid.push(condid);
            set.cond.push(cond);
            set.dia.push(dias[i]);
            set.tpa.push(tpas[i].unwrap_or(0.0));
            set.tree_key.push(GroupKey(key_columns.iter().map(|c| c[i].clone()).collect()));
            for (name, column) in value_columns.iter().zip(raw_values.iter()) {
                if let Some(target) = set.values.get_mut(*name) {
                    target.push(column[i]);
                }
            }
        }
        tracing::debug!("{}: {} tree records in domain", self.estimator, set.len());
        Ok(set)
    }

    /// Response row for tree `i` of `trees`
    pub fn tree_response(&self, trees: &TreeSet, i: usize, basis: Option<TreeBasis>, values: Values) -> ResponseRow {
        ResponseRow {
            plt_cn: trees.plt_cn[i].clone(),
            condid: trees.condid[i],
            basis,
            cond_key: self.conditions.records[trees.cond[i]].key.clone(),
            tree_key: trees.tree_key[i].clone(),
            values,
        }
    }

    /// Response rows for every tree, valued by `value` and adjusted on the
    /// tree's DIA basis
    pub fn tree_responses<F>(&self, trees: &TreeSet, mut value: F) -> Vec<ResponseRow>
    where
        F: FnMut(usize) -> Values,
    {
        (0..trees.len())
            .map(|i| {
                let basis = self.tree_basis(&trees.plt_cn[i], trees.dia[i]);
                self.tree_response(trees, i, Some(basis), value(i))
            })
            .collect()
    }
}
