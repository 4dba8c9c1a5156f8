//! Stratification provider
//!
//! Joins POP_PLOT_STRATUM_ASSGN (plot -> stratum) with POP_STRATUM (EXPNS and
//! the three adjustment factors) for the selected evaluations, and attaches
//! the PLOT attributes every estimator needs (MACRO_BREAKPOINT_DIA, INVYR,
//! REMPER) plus any extra PLOT columns an estimate groups or filters on.
//!
//! Both source tables are deduplicated before the join. Exact duplicate rows
//! are collapsed with a `DuplicateStratification` warning; rows that disagree
//! (a plot in two strata of one evaluation, two different EXPNS for one
//! stratum) are data errors.
//!
//! Loaded stratifications are shared through `StratificationCache`, keyed by
//! the EVALIDs and the PLOT column set. A cached value is never mutated; a key
//! change replaces it.

use std::sync::Arc;

use polars::prelude::*;
use rustc_hash::{FxHashMap, FxHashSet};

use crate::basis::TreeBasis;
use crate::data::{tables, TableSource};
use crate::error::{EstimationWarning, FiaError, Result};
use crate::evaluation::EvalId;
use crate::utils::columns::{f64_values, f64_values_or_null, has_column, i64_values, i64_values_or_null, key_values};
use crate::utils::join::attach_columns;
use crate::utils::lazy_helpers::{materialize_with_columns, ColumnRequest};

const STAGE: &str = "stratification";

/// PLOT columns loaded for every stratification when the table has them
pub const BASE_PLOT_COLUMNS: &[&str] = &["MACRO_BREAKPOINT_DIA", "INVYR", "REMPER", "STATECD"];

/// One stratum of the selected evaluations
#[derive(Debug, Clone, PartialEq)]
pub struct StratumInfo {
    pub cn: String,
    pub evalid: EvalId,
    pub expns: f64,
    pub adj_factor_micr: f64,
    pub adj_factor_subp: f64,
    pub adj_factor_macr: f64,
    /// Plots assigned to the stratum (n_h)
    pub n_plots: usize,
}

impl StratumInfo {
    pub fn adj_factor(&self, basis: TreeBasis) -> f64 {
        match basis {
            TreeBasis::Micro => self.adj_factor_micr,
            TreeBasis::Subplot => self.adj_factor_subp,
            TreeBasis::Macroplot => self.adj_factor_macr,
        }
    }
}

/// Per-plot design attributes
#[derive(Debug, Clone, PartialEq)]
pub struct PlotInfo {
    /// Index into `Stratification::strata`
    pub stratum: usize,
    pub macro_breakpoint: Option<f64>,
    pub invyr: Option<i64>,
    pub remper: Option<f64>,
}

#[derive(Debug, Clone)]
pub struct Stratification {
    evalids: Vec<EvalId>,
    strata: Vec<StratumInfo>,
    plots: FxHashMap<String, PlotInfo>,
    /// Plot CNs in stratum order, then CN order
    plot_order: Vec<String>,
    /// PLOT rows of the assigned plots (CN + requested columns)
    plot_frame: DataFrame,
    end_invyr: Option<i64>,
    warnings: Vec<EstimationWarning>,
}

impl Stratification {
    /// Load the stratification of `evalids` with extra PLOT columns
    pub fn load<S: TableSource + ?Sized>(
        source: &S,
        evalids: &[EvalId],
        plot_columns: &[String],
    ) -> Result<Self> {
        if evalids.is_empty() {
            return Err(FiaError::NoEvaluationSelected);
        }
        let mut warnings = Vec::new();
        let selected: FxHashSet<i64> = evalids.iter().map(|e| e.code()).collect();

        // ===================================================================
        // STEP 1: plot -> stratum assignments, deduplicated
        // ===================================================================
        let request = ColumnRequest::new(["PLT_CN", "STRATUM_CN", "EVALID"]);
        let assignments = materialize_with_columns(source, tables::POP_PLOT_STRATUM_ASSGN, &request, STAGE)?;
        let plt_cns = key_values(&assignments, "PLT_CN")?;
        let stratum_cns = key_values(&assignments, "STRATUM_CN")?;
        let assign_evalids = i64_values(&assignments, "EVALID")?;

        // plt_cn -> (stratum_cn, evalid)
        let mut assigned: FxHashMap<String, (String, i64)> = FxHashMap::default();
        let mut duplicate_assignments = 0usize;
        for i in 0..assignments.height() {
            let (Some(plt), Some(stratum), Some(evalid)) = (&plt_cns[i], &stratum_cns[i], assign_evalids[i]) else {
                continue;
            };
            if !selected.contains(&evalid) {
                continue;
            }
            match assigned.get(plt) {
                None => {
                    assigned.insert(plt.clone(), (stratum.clone(), evalid));
                }
                Some((_, prev_evalid)) if *prev_evalid != evalid => {
                    return Err(FiaError::IncompatibleEvaluations {
                        first: format!("{:06}", prev_evalid),
                        second: format!("{:06}", evalid),
                        plt_cn: plt.clone(),
                    });
                }
                Some((prev_stratum, _)) if prev_stratum == stratum => duplicate_assignments += 1,
                Some((prev_stratum, _)) => {
                    return Err(FiaError::InvalidData {
                        table: tables::POP_PLOT_STRATUM_ASSGN.to_string(),
                        column: "STRATUM_CN".to_string(),
                        reason: format!(
                            "plot {} is assigned to strata {} and {} in evaluation {:06}",
                            plt, prev_stratum, stratum, evalid
                        ),
                    });
                }
            }
        }
        if duplicate_assignments > 0 {
            warnings.push(
                EstimationWarning::DuplicateStratification {
                    table: tables::POP_PLOT_STRATUM_ASSGN.to_string(),
                    duplicates: duplicate_assignments,
                }
                .emit(),
            );
        }
        if assigned.is_empty() {
            return Err(FiaError::InvalidData {
                table: tables::POP_PLOT_STRATUM_ASSGN.to_string(),
                column: "EVALID".to_string(),
                reason: format!(
                    "no plot assignments for evaluation(s) {}",
                    evalids.iter().map(|e| e.to_string()).collect::<Vec<_>>().join(", ")
                ),
            });
        }

        // ===================================================================
        // STEP 2: strata, deduplicated
        // ===================================================================
        let strata_request = ColumnRequest::new([
            "CN",
            "EVALID",
            "EXPNS",
            "ADJ_FACTOR_MICR",
            "ADJ_FACTOR_SUBP",
            "ADJ_FACTOR_MACR",
        ]);
        let pop_stratum = materialize_with_columns(source, tables::POP_STRATUM, &strata_request, STAGE)?;
        let cns = key_values(&pop_stratum, "CN")?;
        let s_evalids = i64_values(&pop_stratum, "EVALID")?;
        let expns = f64_values(&pop_stratum, "EXPNS")?;
        let micr = f64_values(&pop_stratum, "ADJ_FACTOR_MICR")?;
        let subp = f64_values(&pop_stratum, "ADJ_FACTOR_SUBP")?;
        let macr = f64_values(&pop_stratum, "ADJ_FACTOR_MACR")?;

        let mut strata: Vec<StratumInfo> = Vec::new();
        let mut stratum_index: FxHashMap<String, usize> = FxHashMap::default();
        let mut duplicate_strata = 0usize;
        for i in 0..pop_stratum.height() {
            let (Some(cn), Some(evalid)) = (&cns[i], s_evalids[i]) else { continue };
            if !selected.contains(&evalid) {
                continue;
            }
            let expns = expns[i].ok_or_else(|| FiaError::InvalidData {
                table: tables::POP_STRATUM.to_string(),
                column: "EXPNS".to_string(),
                reason: format!("stratum {} has no expansion factor", cn),
            })?;
            // a stratum without a macroplot carries null ADJ_FACTOR_MACR
            let info = StratumInfo {
                cn: cn.clone(),
                evalid: EvalId::new(evalid)?,
                expns,
                adj_factor_micr: micr[i].unwrap_or(0.0),
                adj_factor_subp: subp[i].unwrap_or(0.0),
                adj_factor_macr: macr[i].unwrap_or(0.0),
                n_plots: 0,
            };
            match stratum_index.get(cn) {
                None => {
                    stratum_index.insert(cn.clone(), strata.len());
                    strata.push(info);
                }
                Some(&existing) if strata[existing] == info => duplicate_strata += 1,
                Some(_) => {
                    return Err(FiaError::InvalidData {
                        table: tables::POP_STRATUM.to_string(),
                        column: "CN".to_string(),
                        reason: format!("stratum {} appears with conflicting EXPNS/adjustment factors", cn),
                    });
                }
            }
        }
        if duplicate_strata > 0 {
            warnings.push(
                EstimationWarning::DuplicateStratification {
                    table: tables::POP_STRATUM.to_string(),
                    duplicates: duplicate_strata,
                }
                .emit(),
            );
        }

        // ===================================================================
        // STEP 3: PLOT attributes of the assigned plots
        // ===================================================================
        let mut plot_request = ColumnRequest::new(["CN"]);
        for name in BASE_PLOT_COLUMNS {
            plot_request.optional(*name);
        }
        plot_request.require_all(plot_columns.iter().cloned());
        let plot = materialize_with_columns(source, tables::PLOT, &plot_request, STAGE)?;
        let plot_cns = key_values(&plot, "CN")?;
        let keep: Vec<bool> = plot_cns
            .iter()
            .map(|cn| cn.as_ref().is_some_and(|cn| assigned.contains_key(cn)))
            .collect();
        let mask = BooleanChunked::from_slice("keep".into(), &keep);
        let plot_frame = plot.filter(&mask)?;

        let frame_cns = key_values(&plot_frame, "CN")?;
        let breakpoints = f64_values_or_null(&plot_frame, "MACRO_BREAKPOINT_DIA")?;
        let invyrs = i64_values_or_null(&plot_frame, "INVYR")?;
        let rempers = f64_values_or_null(&plot_frame, "REMPER")?;
        let mut plot_attrs: FxHashMap<&str, (Option<f64>, Option<i64>, Option<f64>)> = FxHashMap::default();
        for (i, cn) in frame_cns.iter().enumerate() {
            if let Some(cn) = cn {
                plot_attrs.entry(cn.as_str()).or_insert((breakpoints[i], invyrs[i], rempers[i]));
            }
        }

        // ===================================================================
        // STEP 4: plot -> stratum index, n_h
        // ===================================================================
        let mut plots: FxHashMap<String, PlotInfo> = FxHashMap::default();
        for (plt, (stratum_cn, _)) in &assigned {
            let stratum = *stratum_index.get(stratum_cn).ok_or_else(|| FiaError::InvalidData {
                table: tables::POP_STRATUM.to_string(),
                column: "CN".to_string(),
                reason: format!("plot {} references unknown stratum {}", plt, stratum_cn),
            })?;
            strata[stratum].n_plots += 1;
            let (macro_breakpoint, invyr, remper) = plot_attrs.get(plt.as_str()).copied().unwrap_or((None, None, None));
            plots.insert(
                plt.clone(),
                PlotInfo {
                    stratum,
                    macro_breakpoint,
                    invyr,
                    remper,
                },
            );
        }
        // strata without plots in this selection stay with n_h = 0 and add no variance
        let mut plot_order: Vec<String> = plots.keys().cloned().collect();
        plot_order.sort_by(|a, b| plots[a].stratum.cmp(&plots[b].stratum).then_with(|| a.cmp(b)));

        let end_invyr = load_end_invyr(source, evalids)?;

        tracing::info!(
            "stratification for {}: {} plots in {} strata",
            evalids.iter().map(|e| e.to_string()).collect::<Vec<_>>().join(", "),
            plots.len(),
            strata.iter().filter(|s| s.n_plots > 0).count()
        );

        let mut evalids = evalids.to_vec();
        evalids.sort();
        Ok(Self {
            evalids,
            strata,
            plots,
            plot_order,
            plot_frame,
            end_invyr,
            warnings,
        })
    }

    pub fn evalids(&self) -> &[EvalId] {
        &self.evalids
    }

    pub fn strata(&self) -> &[StratumInfo] {
        &self.strata
    }

    pub fn plot(&self, plt_cn: &str) -> Option<&PlotInfo> {
        self.plots.get(plt_cn)
    }

    pub fn stratum_of(&self, plt_cn: &str) -> Option<&StratumInfo> {
        self.plots.get(plt_cn).map(|p| &self.strata[p.stratum])
    }

    pub fn contains_plot(&self, plt_cn: &str) -> bool {
        self.plots.contains_key(plt_cn)
    }

    /// Assigned plot CNs, grouped by stratum
    pub fn plot_cns(&self) -> &[String] {
        &self.plot_order
    }

    pub fn n_plots(&self) -> usize {
        self.plots.len()
    }

    pub fn plot_frame(&self) -> &DataFrame {
        &self.plot_frame
    }

    pub fn warnings(&self) -> &[EstimationWarning] {
        &self.warnings
    }

    /// Inventory year reported with estimates: the evaluation END_INVYR,
    /// otherwise the latest plot INVYR
    pub fn report_year(&self) -> Option<i64> {
        self.end_invyr
            .or_else(|| self.plots.values().filter_map(|p| p.invyr).max())
    }

    /// Restrict `df` to rows on assigned plots and attach PLOT `columns`
    pub fn attach_plot_columns(&self, df: &DataFrame, plt_cn_column: &str, columns: &[String]) -> Result<DataFrame> {
        attach_columns(df, plt_cn_column, &self.plot_frame, "CN", columns, false)
    }
}

fn load_end_invyr<S: TableSource + ?Sized>(source: &S, evalids: &[EvalId]) -> Result<Option<i64>> {
    if !source.has_table(tables::POP_EVAL) {
        return Ok(None);
    }
    let available = source.columns(tables::POP_EVAL)?;
    if !available.iter().any(|c| c == "END_INVYR") {
        return Ok(None);
    }
    let request = ColumnRequest::new(["EVALID", "END_INVYR"]);
    let pop_eval = materialize_with_columns(source, tables::POP_EVAL, &request, STAGE)?;
    if !has_column(&pop_eval, "END_INVYR") {
        return Ok(None);
    }
    let ids = i64_values(&pop_eval, "EVALID")?;
    let years = i64_values(&pop_eval, "END_INVYR")?;
    let wanted: FxHashSet<i64> = evalids.iter().map(|e| e.code()).collect();
    Ok(ids
        .into_iter()
        .zip(years)
        .filter_map(|(id, year)| match (id, year) {
            (Some(id), Some(year)) if wanted.contains(&id) => Some(year),
            _ => None,
        })
        .max())
}

/// Cache key: selected EVALIDs and the PLOT column set
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct StratificationKey {
    evalids: Vec<EvalId>,
    plot_columns: Vec<String>,
}

impl StratificationKey {
    pub fn new(evalids: &[EvalId], plot_columns: &[String]) -> Self {
        let mut evalids = evalids.to_vec();
        evalids.sort();
        evalids.dedup();
        let mut plot_columns = plot_columns.to_vec();
        plot_columns.sort();
        plot_columns.dedup();
        Self { evalids, plot_columns }
    }
}

/// Single-entry cache owned by a session
#[derive(Debug, Default)]
pub struct StratificationCache {
    entry: Option<(StratificationKey, Arc<Stratification>)>,
    loads: usize,
}

impl StratificationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Cached stratification for the key, loading (and replacing) on a miss
    pub fn get_or_load<S: TableSource + ?Sized>(
        &mut self,
        source: &S,
        evalids: &[EvalId],
        plot_columns: &[String],
    ) -> Result<Arc<Stratification>> {
        let key = StratificationKey::new(evalids, plot_columns);
        if let Some((cached_key, strat)) = &self.entry {
            if *cached_key == key {
                tracing::debug!("stratification cache hit");
                return Ok(Arc::clone(strat));
            }
        }
        let strat = Arc::new(Stratification::load(source, &key.evalids, &key.plot_columns)?);
        self.loads += 1;
        self.entry = Some((key, Arc::clone(&strat)));
        Ok(strat)
    }

    pub fn invalidate(&mut self) {
        self.entry = None;
    }

    /// Number of loads performed (cache misses)
    pub fn loads(&self) -> usize {
        self.loads
    }
}
