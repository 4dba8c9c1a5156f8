//! Estimate tables
//!
//! Turns population totals and their covariance matrices into the output
//! DataFrame: grouping columns, then per metric `<NAME>` and `<NAME>_SE` (or
//! `_VAR`), then with totals `<TOTAL>`, `<TOTAL>_SE|_VAR` and `AREA_TOTAL`,
//! then `N_PLOTS` and `YEAR`.

use polars::prelude::*;
use rustc_hash::FxHashSet;
use smallvec::{smallvec, SmallVec};

use crate::aggregation::{GroupTotals, PopulationTotals};
use crate::error::{EstimationWarning, FiaError, Result, MIN_RELIABLE_PLOTS};
use crate::evaluation::EvalId;
use crate::utils::columns::{f64_values, i64_values};
use crate::utils::group_key::group_columns;
use crate::variance::{clamp_variance, standard_error, CovarianceMatrix};

/// One reported metric: a linear combination of the estimator's variables
#[derive(Debug, Clone, PartialEq)]
pub struct MetricSpec {
    /// Per-unit column name (`TPA`, `VOLCFNET_ACRE`, ...)
    pub name: String,
    /// Total column name, if the metric has one
    pub total_name: Option<String>,
    /// (variable index, coefficient)
    pub terms: SmallVec<[(usize, f64); 4]>,
    /// Multiplier applied to the per-unit ratio only (100 for percentages)
    pub per_unit_scale: f64,
}

impl MetricSpec {
    /// Variable `var` reported as-is
    pub fn variable(name: &str, total_name: &str, var: usize) -> Self {
        Self {
            name: name.to_string(),
            total_name: Some(total_name.to_string()),
            terms: smallvec![(var, 1.0)],
            per_unit_scale: 1.0,
        }
    }

    pub fn combination(name: &str, total_name: &str, terms: &[(usize, f64)]) -> Self {
        Self {
            name: name.to_string(),
            total_name: Some(total_name.to_string()),
            terms: terms.iter().copied().collect(),
            per_unit_scale: 1.0,
        }
    }

    pub fn with_scale(mut self, scale: f64) -> Self {
        self.per_unit_scale = scale;
        self
    }

    pub fn without_total(mut self) -> Self {
        self.total_name = None;
        self
    }

    fn coefficients(&self, n_vars: usize) -> Vec<f64> {
        let mut a = vec![0.0; n_vars];
        for &(var, coef) in &self.terms {
            if var < n_vars {
                a[var] += coef;
            }
        }
        a
    }
}

/// Output of one estimator call
#[derive(Debug, Clone)]
pub struct Estimate {
    pub table: DataFrame,
    pub warnings: Vec<EstimationWarning>,
    pub evalids: Vec<EvalId>,
}

impl Estimate {
    pub fn height(&self) -> usize {
        self.table.height()
    }

    /// Numeric cell (integers are cast)
    pub fn value(&self, column: &str, row: usize) -> Result<Option<f64>> {
        let values = f64_values(&self.table, column)?;
        values.get(row).copied().ok_or_else(|| FiaError::InvalidData {
            table: "estimate".to_string(),
            column: column.to_string(),
            reason: format!("row {} out of range ({} rows)", row, values.len()),
        })
    }

    pub fn column_f64(&self, column: &str) -> Result<Vec<Option<f64>>> {
        f64_values(&self.table, column)
    }

    pub fn n_plots(&self) -> Result<Vec<Option<i64>>> {
        i64_values(&self.table, "N_PLOTS")
    }

    pub fn column_names(&self) -> Vec<String> {
        self.table
            .get_column_names()
            .into_iter()
            .map(|s| s.to_string())
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct FormatOptions<'a> {
    pub group_names: &'a [String],
    pub totals: bool,
    pub variance: bool,
    /// Report the denominator as AREA_TOTAL (every estimator except area)
    pub area_total: bool,
    pub year: Option<i64>,
}

/// Plots supporting a group: nonzero y, plus nonzero x when the group owns its
/// own denominator
fn supporting_plots(pop: &PopulationTotals, group: &GroupTotals) -> usize {
    let mut plots: FxHashSet<usize> = group
        .plots
        .iter()
        .filter(|(_, y)| y.iter().any(|v| *v != 0.0))
        .map(|(p, _)| *p)
        .collect();
    if !pop.has_tree_groups && group.denominator_key == group.key {
        if let Some(d) = pop.denominator(group) {
            plots.extend(d.plots.iter().filter(|(_, x)| **x != 0.0).map(|(p, _)| *p));
        }
    }
    plots.len()
}

pub fn format_table(
    pop: &PopulationTotals,
    covariances: &[CovarianceMatrix],
    metrics: &[MetricSpec],
    options: &FormatOptions<'_>,
) -> Result<(DataFrame, Vec<EstimationWarning>)> {
    let suffix = if options.variance { "_VAR" } else { "_SE" };
    let spread = |v: f64| if options.variance { clamp_variance(v) } else { standard_error(v) };
    let rows = pop.groups.len();

    let mut per_unit: Vec<Vec<f64>> = vec![Vec::with_capacity(rows); metrics.len()];
    let mut per_unit_spread: Vec<Vec<f64>> = vec![Vec::with_capacity(rows); metrics.len()];
    let mut totals: Vec<Vec<f64>> = vec![Vec::with_capacity(rows); metrics.len()];
    let mut totals_spread: Vec<Vec<f64>> = vec![Vec::with_capacity(rows); metrics.len()];
    let mut area_total = Vec::with_capacity(rows);
    let mut n_plots: Vec<i64> = Vec::with_capacity(rows);
    let mut warnings = Vec::new();

    for (group, cov) in pop.groups.iter().zip(covariances) {
        let x = pop.area(group);
        for (m, metric) in metrics.iter().enumerate() {
            let a = metric.coefficients(pop.n_vars);
            let y: f64 = a.iter().zip(group.totals.iter()).map(|(c, t)| c * t).sum();
            let ratio = if x == 0.0 { 0.0 } else { y / x };
            let scale = metric.per_unit_scale;
            per_unit[m].push(scale * ratio);
            per_unit_spread[m].push(spread(scale * scale * cov.ratio_variance(&a, ratio, x)));
            totals[m].push(y);
            totals_spread[m].push(spread(cov.combination_variance(&a)));
        }
        area_total.push(x);

        let n = supporting_plots(pop, group);
        n_plots.push(n as i64);
        if n < MIN_RELIABLE_PLOTS {
            warnings.push(
                EstimationWarning::InsufficientData {
                    group: group.key.describe(options.group_names),
                    n_plots: n,
                }
                .emit(),
            );
        }
    }

    // ===================================================================
    // Assemble columns in output order
    // ===================================================================
    let keys: Vec<_> = pop.groups.iter().map(|g| g.key.clone()).collect();
    let mut columns: Vec<Column> = group_columns(options.group_names, &keys);
    for (m, metric) in metrics.iter().enumerate() {
        columns.push(Column::new(metric.name.as_str().into(), std::mem::take(&mut per_unit[m])));
        columns.push(Column::new(
            format!("{}{}", metric.name, suffix).into(),
            std::mem::take(&mut per_unit_spread[m]),
        ));
    }
    if options.totals {
        for (m, metric) in metrics.iter().enumerate() {
            let Some(total_name) = &metric.total_name else { continue };
            columns.push(Column::new(total_name.as_str().into(), std::mem::take(&mut totals[m])));
            columns.push(Column::new(
                format!("{}{}", total_name, suffix).into(),
                std::mem::take(&mut totals_spread[m]),
            ));
        }
        if options.area_total {
            columns.push(Column::new("AREA_TOTAL".into(), area_total));
        }
    }
    columns.push(Column::new("N_PLOTS".into(), n_plots));
    columns.push(Column::new("YEAR".into(), vec![options.year; rows]));

    Ok((DataFrame::new(columns)?, warnings))
}
