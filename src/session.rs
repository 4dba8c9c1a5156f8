//! Estimation session
//!
//! A session owns one table source, the evaluation selection and the
//! stratification cache. Estimates made through it are always scoped to the
//! selection; with `most_recent` set the selection is made once, on the first
//! estimate, and reused afterwards.

use std::path::PathBuf;

use polars::prelude::DataFrame;

use crate::config::EstimatorConfig;
use crate::data::{DirectorySource, TableSource};
use crate::error::{EstimationWarning, FiaError, Result};
use crate::estimators::{
    run_estimate, AreaEstimator, BiomassComponent, BiomassEstimator, CarbonEstimator, CarbonFluxEstimator,
    CarbonPool, Estimate, Estimator, GrmMeasure, GrowthBasis, GrowthEstimator, MortalityEstimator,
    RemovalsEstimator, SiteIndexEstimator, TpaEstimator, VolumeEstimator, VolumeType,
};
use crate::evaluation::{most_recent, EvalId, EvalType};
use crate::panel::{build_panel, PanelConfig};
use crate::stratification::StratificationCache;

pub struct FiaSession<S: TableSource> {
    source: S,
    evalids: Vec<EvalId>,
    /// Warnings raised by the selection, attached to every estimate
    selection_warnings: Vec<EstimationWarning>,
    cache: StratificationCache,
}

impl FiaSession<DirectorySource> {
    /// Session over a directory of `<TABLE>.parquet` / `<TABLE>.csv` files
    pub fn open(root: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self::new(DirectorySource::new(root)?))
    }
}

impl<S: TableSource> FiaSession<S> {
    pub fn new(source: S) -> Self {
        Self {
            source,
            evalids: Vec::new(),
            selection_warnings: Vec::new(),
            cache: StratificationCache::new(),
        }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    pub fn evalids(&self) -> &[EvalId] {
        &self.evalids
    }

    /// Select evaluations explicitly
    pub fn select_evalids(&mut self, codes: &[i64]) -> Result<&[EvalId]> {
        let mut evalids = codes.iter().map(|&c| EvalId::new(c)).collect::<Result<Vec<_>>>()?;
        evalids.sort();
        evalids.dedup();
        if evalids.is_empty() {
            return Err(FiaError::NoEvaluationSelected);
        }
        tracing::info!(
            "selected evaluation(s) {}",
            evalids.iter().map(|e| e.to_string()).collect::<Vec<_>>().join(", ")
        );
        self.evalids = evalids;
        self.selection_warnings.clear();
        Ok(&self.evalids)
    }

    /// Select the most recent `eval_type` evaluation of each state
    pub fn clip_most_recent(&mut self, eval_type: EvalType, states: Option<&[i64]>) -> Result<&[EvalId]> {
        let (evalids, warnings) = most_recent(&self.source, states, eval_type)?;
        self.evalids = evalids;
        self.selection_warnings = warnings;
        Ok(&self.evalids)
    }

    /// Drop the cached stratification (after the underlying tables change)
    pub fn invalidate_cache(&mut self) {
        self.cache.invalidate();
    }

    fn ensure_selection(&mut self, eval_type: EvalType, config: &EstimatorConfig) -> Result<()> {
        if !self.evalids.is_empty() {
            return Ok(());
        }
        if !config.most_recent {
            return Err(FiaError::NoEvaluationSelected);
        }
        self.clip_most_recent(eval_type, None)?;
        let auto = EstimationWarning::AutoSelectedEvaluation {
            evalids: self.evalids.iter().map(|e| e.to_string()).collect(),
        }
        .emit();
        self.selection_warnings.insert(0, auto);
        Ok(())
    }

    /// Run any estimator over the current selection
    pub fn estimate(&mut self, estimator: &dyn Estimator, config: &EstimatorConfig) -> Result<Estimate> {
        self.ensure_selection(estimator.eval_type(), config)?;
        let mut estimate = run_estimate(&self.source, &mut self.cache, &self.evalids, estimator, config)?;
        if !self.selection_warnings.is_empty() {
            let mut warnings = self.selection_warnings.clone();
            warnings.append(&mut estimate.warnings);
            estimate.warnings = warnings;
        }
        Ok(estimate)
    }

    pub fn area(&mut self, config: &EstimatorConfig) -> Result<Estimate> {
        self.estimate(&AreaEstimator, config)
    }

    pub fn tpa(&mut self, config: &EstimatorConfig) -> Result<Estimate> {
        self.estimate(&TpaEstimator, config)
    }

    pub fn volume(&mut self, vol_type: VolumeType, config: &EstimatorConfig) -> Result<Estimate> {
        self.estimate(&VolumeEstimator::new(vol_type), config)
    }

    pub fn biomass(&mut self, component: BiomassComponent, config: &EstimatorConfig) -> Result<Estimate> {
        self.estimate(&BiomassEstimator::new(component), config)
    }

    pub fn carbon(&mut self, pool: CarbonPool, config: &EstimatorConfig) -> Result<Estimate> {
        self.estimate(&CarbonEstimator::new(pool), config)
    }

    pub fn growth(&mut self, measure: GrmMeasure, basis: GrowthBasis, config: &EstimatorConfig) -> Result<Estimate> {
        self.estimate(&GrowthEstimator::new(measure, basis), config)
    }

    pub fn mortality(&mut self, measure: GrmMeasure, config: &EstimatorConfig) -> Result<Estimate> {
        self.estimate(&MortalityEstimator::new(measure), config)
    }

    pub fn removals(&mut self, measure: GrmMeasure, config: &EstimatorConfig) -> Result<Estimate> {
        self.estimate(&RemovalsEstimator::new(measure), config)
    }

    pub fn carbon_flux(&mut self, config: &EstimatorConfig) -> Result<Estimate> {
        self.estimate(&CarbonFluxEstimator, config)
    }

    pub fn site_index(&mut self, config: &EstimatorConfig) -> Result<Estimate> {
        self.estimate(&SiteIndexEstimator, config)
    }

    /// Remeasurement panel, restricted to the selected plots when a selection exists
    pub fn panel(&mut self, config: &PanelConfig) -> Result<DataFrame> {
        if self.evalids.is_empty() {
            return build_panel(&self.source, None, config);
        }
        let strat = self.cache.get_or_load(&self.source, &self.evalids, &[])?;
        build_panel(&self.source, Some(strat.as_ref()), config)
    }
}
