//! Stage 2: plot roll-up and population expansion
//!
//! Condition sums are rolled up to plot-level y (per group) and x (per
//! denominator key). Population totals are Y = sum(EXPNS * y) and
//! X = sum(EXPNS * x); the per-acre estimate is the ratio of means Y / X,
//! defined as 0.0 when X is 0. The plot-level values are kept for the
//! variance stage.

use std::collections::BTreeMap;

use rustc_hash::FxHashMap;

use super::{EstimationPlan, Stage1, Values};
use crate::stratification::Stratification;
use crate::utils::group_key::GroupKey;

#[derive(Debug, Clone, PartialEq)]
pub struct GroupTotals {
    pub key: GroupKey,
    pub denominator_key: GroupKey,
    /// Plot index -> plot-level y
    pub plots: FxHashMap<usize, Values>,
    /// Expanded totals Y per variable
    pub totals: Values,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DenominatorTotals {
    /// Plot index -> plot-level x
    pub plots: FxHashMap<usize, f64>,
    /// Expanded total X (acres)
    pub total: f64,
}

#[derive(Debug, Clone)]
pub struct PopulationTotals {
    pub n_vars: usize,
    pub has_tree_groups: bool,
    /// Sorted by key
    pub groups: Vec<GroupTotals>,
    pub denominators: FxHashMap<GroupKey, DenominatorTotals>,
    /// Stratum index of each plot index
    pub plot_strata: Vec<usize>,
}

impl PopulationTotals {
    pub fn denominator(&self, group: &GroupTotals) -> Option<&DenominatorTotals> {
        self.denominators.get(&group.denominator_key)
    }

    /// Expanded denominator X of a group
    pub fn area(&self, group: &GroupTotals) -> f64 {
        self.denominator(group).map_or(0.0, |d| d.total)
    }

    /// Ratio of means Y_v / X (0.0 for an empty denominator)
    pub fn ratio(&self, group: &GroupTotals, var: usize) -> f64 {
        safe_ratio(group.totals[var], self.area(group))
    }
}

pub fn safe_ratio(numerator: f64, denominator: f64) -> f64 {
    if denominator == 0.0 || !denominator.is_finite() {
        0.0
    } else {
        numerator / denominator
    }
}

pub fn expand(stage1: &Stage1, plan: &EstimationPlan, strat: &Stratification) -> PopulationTotals {
    let plot_index: FxHashMap<&str, usize> = strat
        .plot_cns()
        .iter()
        .enumerate()
        .map(|(i, cn)| (cn.as_str(), i))
        .collect();
    let plot_strata: Vec<usize> = strat
        .plot_cns()
        .iter()
        .map(|cn| strat.plot(cn).map_or(0, |p| p.stratum))
        .collect();
    let expns = |plot: usize| strat.strata()[plot_strata[plot]].expns;

    // ===================================================================
    // Numerator: plot-level y per group
    // ===================================================================
    let mut groups: BTreeMap<GroupKey, FxHashMap<usize, Values>> = BTreeMap::new();
    for sum in &stage1.sums {
        let Some(&plot) = plot_index.get(sum.plt_cn.as_str()) else { continue };
        let entry = groups
            .entry(sum.key.clone())
            .or_default()
            .entry(plot)
            .or_insert_with(|| Values::from_elem(0.0, plan.n_vars));
        for (acc, v) in entry.iter_mut().zip(sum.values.iter()) {
            *acc += v;
        }
    }
    let ungrouped = plan.cond_key_len == 0 && !plan.has_tree_groups;
    if ungrouped && groups.is_empty() {
        groups.insert(GroupKey::empty(), FxHashMap::default());
    }

    // ===================================================================
    // Denominator: plot-level x per denominator key
    // ===================================================================
    let mut denominators: FxHashMap<GroupKey, DenominatorTotals> = FxHashMap::default();
    for area in &stage1.areas {
        let Some(&plot) = plot_index.get(area.plt_cn.as_str()) else { continue };
        let entry = denominators.entry(area.denominator_key.clone()).or_default();
        *entry.plots.entry(plot).or_insert(0.0) += area.area;
        entry.total += expns(plot) * area.area;
    }

    let groups: Vec<GroupTotals> = groups
        .into_iter()
        .map(|(key, plots)| {
            let mut totals = Values::from_elem(0.0, plan.n_vars);
            // sum in plot order so totals are reproducible
            let mut ordered: Vec<(&usize, &Values)> = plots.iter().collect();
            ordered.sort_by_key(|(plot, _)| **plot);
            for (&plot, values) in ordered {
                let w = expns(plot);
                for (acc, v) in totals.iter_mut().zip(values.iter()) {
                    *acc += w * v;
                }
            }
            GroupTotals {
                denominator_key: plan.denominator_key(&key),
                key,
                plots,
                totals,
            }
        })
        .collect();

    tracing::debug!(
        "stage 2: {} group(s), {} denominator key(s) over {} plots",
        groups.len(),
        denominators.len(),
        plot_strata.len()
    );
    PopulationTotals {
        n_vars: plan.n_vars,
        has_tree_groups: plan.has_tree_groups,
        groups,
        denominators,
        plot_strata,
    }
}
