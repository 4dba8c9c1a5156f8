//! Remeasurement panels
//!
//! Links each t2 plot to its previous measurement through PLOT.PREV_PLT_CN and
//! produces one row per remeasured condition, or per t2 tree linked through
//! TREE.PREV_TRE_CN, with the two measurements side by side (`t1_` / `t2_`).
//!
//! Harvest on a condition is signalled first by a cutting or site-preparation
//! treatment code at t2, otherwise by a live volume loss above
//! `harvest_volume_threshold`. Tree fate depends only on the two status codes
//! and whether a previous tree exists. Reclassifying mortality on harvested
//! conditions as cut is a heuristic for states that record harvested trees as
//! dead; it is off unless `infer_cut_from_harvest` is set.

use std::fmt;

use polars::prelude::*;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};

use crate::data::{tables, TableSource};
use crate::error::Result;
use crate::stratification::Stratification;
use crate::utils::columns::{f64_values, f64_values_or_null, i64_values, i64_values_or_null, key_values};
use crate::utils::lazy_helpers::{materialize_with_columns, ColumnRequest};

const STAGE: &str = "panel";

/// TRTCD values signalling harvest: cutting, site preparation
pub const HARVEST_TREATMENTS: [i64; 2] = [10, 20];

const TREATMENT_COLUMNS: [&str; 3] = ["TRTCD1", "TRTCD2", "TRTCD3"];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PanelLevel {
    #[default]
    Condition,
    Tree,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PanelConfig {
    pub level: PanelLevel,
    /// Fractional live-volume loss that counts as harvest without a treatment code
    pub harvest_volume_threshold: f64,
    /// Treat mortality on harvested conditions as cut
    pub infer_cut_from_harvest: bool,
    /// Drop pairs remeasured over fewer years
    pub min_remper: f64,
    /// Extra COND (condition level) or TREE (tree level) columns to pair
    pub attributes: Vec<String>,
}

impl Default for PanelConfig {
    fn default() -> Self {
        Self {
            level: PanelLevel::Condition,
            harvest_volume_threshold: 0.25,
            infer_cut_from_harvest: false,
            min_remper: 0.0,
            attributes: Vec::new(),
        }
    }
}

impl PanelConfig {
    pub fn trees() -> Self {
        Self {
            level: PanelLevel::Tree,
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HarvestSignal {
    Treatment,
    Volume,
}

impl HarvestSignal {
    pub fn as_str(self) -> &'static str {
        match self {
            HarvestSignal::Treatment => "treatment",
            HarvestSignal::Volume => "volume",
        }
    }
}

/// Harvest signal of one condition pair
pub fn detect_harvest(
    treatments: &[Option<i64>],
    t1_volume: Option<f64>,
    t2_volume: f64,
    threshold: f64,
) -> Option<HarvestSignal> {
    if treatments
        .iter()
        .flatten()
        .any(|code| HARVEST_TREATMENTS.contains(code))
    {
        return Some(HarvestSignal::Treatment);
    }
    match t1_volume {
        Some(t1) if t1 > 0.0 && (t1 - t2_volume) / t1 > threshold => Some(HarvestSignal::Volume),
        _ => None,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TreeFate {
    Survivor,
    Mortality,
    Cut,
    Ingrowth,
    Other,
}

impl fmt::Display for TreeFate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TreeFate::Survivor => "survivor",
            TreeFate::Mortality => "mortality",
            TreeFate::Cut => "cut",
            TreeFate::Ingrowth => "ingrowth",
            TreeFate::Other => "other",
        };
        write!(f, "{}", s)
    }
}

/// Fate from the t1 and t2 STATUSCD (1 live, 2 dead, 3 removed)
pub fn classify_fate(prev_status: Option<i64>, status: Option<i64>, has_prev_tree: bool) -> TreeFate {
    if !has_prev_tree {
        return TreeFate::Ingrowth;
    }
    match (prev_status, status) {
        (Some(1), Some(1)) => TreeFate::Survivor,
        (Some(1), Some(2)) => TreeFate::Mortality,
        (Some(1), Some(3)) => TreeFate::Cut,
        _ => TreeFate::Other,
    }
}

/// Optional mortality -> cut reclassification on harvested conditions
pub fn apply_harvest_policy(fate: TreeFate, harvested: bool, infer_cut_from_harvest: bool) -> TreeFate {
    if infer_cut_from_harvest && harvested && fate == TreeFate::Mortality {
        TreeFate::Cut
    } else {
        fate
    }
}

/// A t2 plot and its previous measurement
#[derive(Debug, Clone, PartialEq)]
struct PlotPair {
    plt_cn: String,
    prev_plt_cn: String,
    remper: Option<f64>,
    t1_invyr: Option<i64>,
    t2_invyr: Option<i64>,
}

fn plot_pairs(source: &dyn TableSource, strat: Option<&Stratification>, config: &PanelConfig) -> Result<Vec<PlotPair>> {
    let mut request = ColumnRequest::new(["CN", "PREV_PLT_CN"]);
    request.optional("INVYR").optional("REMPER");
    let plot = materialize_with_columns(source, tables::PLOT, &request, STAGE)?;
    let cns = key_values(&plot, "CN")?;
    let prev = key_values(&plot, "PREV_PLT_CN")?;
    let invyrs = i64_values_or_null(&plot, "INVYR")?;
    let rempers = f64_values_or_null(&plot, "REMPER")?;
    let invyr_by_cn: FxHashMap<&str, Option<i64>> = cns
        .iter()
        .zip(invyrs.iter())
        .filter_map(|(cn, yr)| cn.as_deref().map(|cn| (cn, *yr)))
        .collect();

    let mut pairs = Vec::new();
    for i in 0..plot.height() {
        let (Some(cn), Some(prev_cn)) = (&cns[i], &prev[i]) else { continue };
        if strat.is_some_and(|s| !s.contains_plot(cn)) {
            continue;
        }
        let remper = rempers[i];
        if config.min_remper > 0.0 && remper.map_or(true, |r| r < config.min_remper) {
            continue;
        }
        pairs.push(PlotPair {
            plt_cn: cn.clone(),
            prev_plt_cn: prev_cn.clone(),
            remper,
            t1_invyr: invyr_by_cn.get(prev_cn.as_str()).copied().flatten(),
            t2_invyr: invyrs[i],
        });
    }
    pairs.sort_by(|a, b| a.plt_cn.cmp(&b.plt_cn));
    tracing::debug!("{}: {} remeasured plots", STAGE, pairs.len());
    Ok(pairs)
}

/// `df[columns]` gathered at `rows`, renamed `<prefix><name>`
fn paired_columns(df: &DataFrame, columns: &[String], rows: Vec<Option<IdxSize>>, prefix: &str) -> Result<Vec<Column>> {
    if columns.is_empty() {
        return Ok(Vec::new());
    }
    let idx = IdxCa::new("idx".into(), rows);
    let gathered = df.select(columns.iter().map(String::as_str))?.take(&idx)?;
    Ok(gathered
        .get_columns()
        .iter()
        .map(|c| {
            let name = format!("{}{}", prefix, c.name());
            let mut c = c.clone();
            c.rename(name.into());
            c
        })
        .collect())
}

/// Live volume per acre (TPA_UNADJ x VOLCFNET) by (PLT_CN, CONDID)
fn live_volume(source: &dyn TableSource) -> Result<FxHashMap<(String, i64), f64>> {
    let request = ColumnRequest::new(["PLT_CN", "CONDID", "STATUSCD", "TPA_UNADJ", "VOLCFNET"]);
    let tree = materialize_with_columns(source, tables::TREE, &request, STAGE)?;
    let plt_cns = key_values(&tree, "PLT_CN")?;
    let condids = i64_values(&tree, "CONDID")?;
    let status = i64_values(&tree, "STATUSCD")?;
    let tpa = f64_values(&tree, "TPA_UNADJ")?;
    let vol = f64_values(&tree, "VOLCFNET")?;
    let mut volume: FxHashMap<(String, i64), f64> = FxHashMap::default();
    for i in 0..tree.height() {
        let (Some(plt), Some(condid)) = (&plt_cns[i], condids[i]) else { continue };
        if status[i] != Some(1) {
            continue;
        }
        *volume.entry((plt.clone(), condid)).or_insert(0.0) += tpa[i].unwrap_or(0.0) * vol[i].unwrap_or(0.0);
    }
    Ok(volume)
}

/// Harvest signal of each t2 condition, keyed by (PLT_CN, CONDID)
struct ConditionHarvest {
    treatment: FxHashMap<(String, i64), bool>,
}

impl ConditionHarvest {
    fn treated(&self, plt_cn: &str, condid: i64) -> bool {
        self.treatment
            .get(&(plt_cn.to_string(), condid))
            .copied()
            .unwrap_or(false)
    }
}

fn condition_treatments(cond: &DataFrame) -> Result<Vec<Vec<Option<i64>>>> {
    let per_column: Vec<Vec<Option<i64>>> = TREATMENT_COLUMNS
        .iter()
        .map(|c| i64_values_or_null(cond, c))
        .collect::<Result<_>>()?;
    Ok((0..cond.height())
        .map(|i| per_column.iter().map(|c| c[i]).collect())
        .collect())
}

/// Build the panel described by `config`
pub fn build_panel(source: &dyn TableSource, strat: Option<&Stratification>, config: &PanelConfig) -> Result<DataFrame> {
    let pairs = plot_pairs(source, strat, config)?;
    let panel = match config.level {
        PanelLevel::Condition => condition_panel(source, &pairs, config)?,
        PanelLevel::Tree => tree_panel(source, &pairs, config)?,
    };
    tracing::info!("{:?} panel: {} pairs from {} plots", config.level, panel.height(), pairs.len());
    Ok(panel)
}

fn load_conditions(source: &dyn TableSource, attributes: &[String]) -> Result<DataFrame> {
    let mut request = ColumnRequest::new(["PLT_CN", "CONDID"]);
    for name in TREATMENT_COLUMNS {
        request.optional(name);
    }
    request.require_all(attributes.iter().cloned());
    materialize_with_columns(source, tables::COND, &request, STAGE)
}

fn condition_panel(source: &dyn TableSource, pairs: &[PlotPair], config: &PanelConfig) -> Result<DataFrame> {
    // ===================================================================
    // STEP 1: conditions of both measurements
    // ===================================================================
    let cond = load_conditions(source, &config.attributes)?;
    let plt_cns = key_values(&cond, "PLT_CN")?;
    let condids = i64_values(&cond, "CONDID")?;
    let treatments = condition_treatments(&cond)?;
    let mut cond_index: FxHashMap<(&str, i64), usize> = FxHashMap::default();
    for (i, (plt, condid)) in plt_cns.iter().zip(condids.iter()).enumerate() {
        if let (Some(plt), Some(condid)) = (plt, condid) {
            cond_index.entry((plt.as_str(), *condid)).or_insert(i);
        }
    }
    let volume = live_volume(source)?;
    let volume_of = |plt: &str, condid: i64| volume.get(&(plt.to_string(), condid)).copied().unwrap_or(0.0);

    // ===================================================================
    // STEP 2: pair t2 conditions with t1 conditions
    // ===================================================================
    let pair_by_plot: FxHashMap<&str, &PlotPair> = pairs.iter().map(|p| (p.plt_cn.as_str(), p)).collect();
    let mut t2_rows: Vec<(usize, &PlotPair, i64)> = Vec::new();
    for (i, (plt, condid)) in plt_cns.iter().zip(condids.iter()).enumerate() {
        let (Some(plt), Some(condid)) = (plt, condid) else { continue };
        if let Some(pair) = pair_by_plot.get(plt.as_str()) {
            t2_rows.push((i, pair, *condid));
        }
    }
    t2_rows.sort_by(|a, b| a.1.plt_cn.cmp(&b.1.plt_cn).then(a.2.cmp(&b.2)));

    let n = t2_rows.len();
    let mut plt_col = Vec::with_capacity(n);
    let mut prev_col = Vec::with_capacity(n);
    let mut condid_col = Vec::with_capacity(n);
    let mut remper_col = Vec::with_capacity(n);
    let mut t1_invyr = Vec::with_capacity(n);
    let mut t2_invyr = Vec::with_capacity(n);
    let mut t1_rows: Vec<Option<IdxSize>> = Vec::with_capacity(n);
    let mut t2_idx: Vec<Option<IdxSize>> = Vec::with_capacity(n);
    let mut t1_vol: Vec<Option<f64>> = Vec::with_capacity(n);
    let mut t2_vol: Vec<f64> = Vec::with_capacity(n);
    let mut harvest: Vec<bool> = Vec::with_capacity(n);
    let mut signal: Vec<Option<String>> = Vec::with_capacity(n);

    for (row, pair, condid) in &t2_rows {
        let t1 = cond_index.get(&(pair.prev_plt_cn.as_str(), *condid)).copied();
        let before = t1.map(|_| volume_of(&pair.prev_plt_cn, *condid));
        let after = volume_of(&pair.plt_cn, *condid);
        let detected = detect_harvest(&treatments[*row], before, after, config.harvest_volume_threshold);

        plt_col.push(pair.plt_cn.clone());
        prev_col.push(pair.prev_plt_cn.clone());
        condid_col.push(*condid);
        remper_col.push(pair.remper);
        t1_invyr.push(pair.t1_invyr);
        t2_invyr.push(pair.t2_invyr);
        t1_rows.push(t1.map(|r| r as IdxSize));
        t2_idx.push(Some(*row as IdxSize));
        t1_vol.push(before);
        t2_vol.push(after);
        harvest.push(detected.is_some());
        signal.push(detected.map(|s| s.as_str().to_string()));
    }

    // ===================================================================
    // STEP 3: assemble
    // ===================================================================
    let mut columns = vec![
        Column::new("PLT_CN".into(), plt_col),
        Column::new("PREV_PLT_CN".into(), prev_col),
        Column::new("CONDID".into(), condid_col),
        Column::new("REMPER".into(), remper_col),
        Column::new("t1_INVYR".into(), t1_invyr),
        Column::new("t2_INVYR".into(), t2_invyr),
    ];
    columns.extend(paired_columns(&cond, &config.attributes, t1_rows, "t1_")?);
    columns.extend(paired_columns(&cond, &config.attributes, t2_idx, "t2_")?);
    columns.push(Column::new("t1_VOL_ACRE".into(), t1_vol));
    columns.push(Column::new("t2_VOL_ACRE".into(), t2_vol));
    columns.push(Column::new("HARVEST".into(), harvest));
    columns.push(Column::new("HARVEST_SIGNAL".into(), signal));
    Ok(DataFrame::new(columns)?)
}

fn tree_panel(source: &dyn TableSource, pairs: &[PlotPair], config: &PanelConfig) -> Result<DataFrame> {
    const PAIRED: [&str; 4] = ["STATUSCD", "DIA", "SPCD", "TPA_UNADJ"];

    // ===================================================================
    // STEP 1: trees of both measurements
    // ===================================================================
    let mut request = ColumnRequest::new(["CN", "PREV_TRE_CN", "PLT_CN", "CONDID"]);
    request.require_all(PAIRED);
    request.require_all(config.attributes.iter().cloned());
    let tree = materialize_with_columns(source, tables::TREE, &request, STAGE)?;
    let cns = key_values(&tree, "CN")?;
    let prev_cns = key_values(&tree, "PREV_TRE_CN")?;
    let plt_cns = key_values(&tree, "PLT_CN")?;
    let condids = i64_values(&tree, "CONDID")?;
    let status = i64_values(&tree, "STATUSCD")?;
    let dia = f64_values(&tree, "DIA")?;
    let tree_index: FxHashMap<&str, usize> = cns
        .iter()
        .enumerate()
        .filter_map(|(i, cn)| cn.as_deref().map(|cn| (cn, i)))
        .collect();

    // treatment codes of t2 conditions for the harvest policy
    let cond = load_conditions(source, &[])?;
    let cond_plts = key_values(&cond, "PLT_CN")?;
    let cond_ids = i64_values(&cond, "CONDID")?;
    let treatments = condition_treatments(&cond)?;
    let harvest = ConditionHarvest {
        treatment: (0..cond.height())
            .filter_map(|i| {
                let plt = cond_plts[i].clone()?;
                let condid = cond_ids[i]?;
                let treated = detect_harvest(&treatments[i], None, 0.0, f64::INFINITY).is_some();
                Some(((plt, condid), treated))
            })
            .collect(),
    };

    // ===================================================================
    // STEP 2: link t2 trees to t1 trees
    // ===================================================================
    let pair_by_plot: FxHashMap<&str, &PlotPair> = pairs.iter().map(|p| (p.plt_cn.as_str(), p)).collect();
    let mut rows: Vec<(usize, &PlotPair)> = (0..tree.height())
        .filter_map(|i| {
            let plt = plt_cns[i].as_deref()?;
            pair_by_plot.get(plt).map(|p| (i, *p))
        })
        .collect();
    rows.sort_by(|a, b| a.1.plt_cn.cmp(&b.1.plt_cn).then_with(|| cns[a.0].cmp(&cns[b.0])));

    let n = rows.len();
    let mut tre_cn = Vec::with_capacity(n);
    let mut prev_tre_cn = Vec::with_capacity(n);
    let mut plt_col = Vec::with_capacity(n);
    let mut prev_plt_col = Vec::with_capacity(n);
    let mut condid_col = Vec::with_capacity(n);
    let mut t1_rows: Vec<Option<IdxSize>> = Vec::with_capacity(n);
    let mut t2_rows: Vec<Option<IdxSize>> = Vec::with_capacity(n);
    let mut dia_growth: Vec<Option<f64>> = Vec::with_capacity(n);
    let mut fate: Vec<String> = Vec::with_capacity(n);

    for (row, pair) in &rows {
        let prev = prev_cns[*row].as_deref();
        let t1 = prev.and_then(|cn| tree_index.get(cn)).copied();
        let raw_fate = classify_fate(t1.and_then(|r| status[r]), status[*row], prev.is_some());
        let harvested = condids[*row].is_some_and(|c| harvest.treated(&pair.plt_cn, c));
        let growth = match (t1.and_then(|r| dia[r]), dia[*row], pair.remper) {
            (Some(d1), Some(d2), Some(remper)) if remper > 0.0 => Some((d2 - d1) / remper),
            _ => None,
        };

        tre_cn.push(cns[*row].clone());
        prev_tre_cn.push(prev.map(str::to_string));
        plt_col.push(pair.plt_cn.clone());
        prev_plt_col.push(pair.prev_plt_cn.clone());
        condid_col.push(condids[*row]);
        t1_rows.push(t1.map(|r| r as IdxSize));
        t2_rows.push(Some(*row as IdxSize));
        dia_growth.push(growth);
        fate.push(apply_harvest_policy(raw_fate, harvested, config.infer_cut_from_harvest).to_string());
    }

    // ===================================================================
    // STEP 3: assemble
    // ===================================================================
    let mut paired: Vec<String> = PAIRED.iter().map(|s| s.to_string()).collect();
    paired.extend(config.attributes.iter().filter(|a| !PAIRED.contains(&a.as_str())).cloned());

    let mut columns = vec![
        Column::new("TRE_CN".into(), tre_cn),
        Column::new("PREV_TRE_CN".into(), prev_tre_cn),
        Column::new("PLT_CN".into(), plt_col),
        Column::new("PREV_PLT_CN".into(), prev_plt_col),
        Column::new("CONDID".into(), condid_col),
    ];
    let t1 = paired_columns(&tree, &paired, t1_rows, "t1_")?;
    let t2 = paired_columns(&tree, &paired, t2_rows, "t2_")?;
    for (a, b) in t1.into_iter().zip(t2) {
        columns.push(a);
        columns.push(b);
    }
    columns.push(Column::new("DIA_GROWTH".into(), dia_growth));
    columns.push(Column::new("TREE_FATE".into(), fate));
    Ok(DataFrame::new(columns)?)
}
