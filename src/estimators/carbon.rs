//! Tree carbon pools and net carbon flux
//!
//! Pools read the TREE carbon columns (pounds of carbon per tree). Net flux is
//! computed from GRM records in aboveground biomass: gross growth minus
//! mortality minus removals, converted to carbon. The three components are
//! separate response variables so the flux variance carries their covariance.

use serde::{Deserialize, Serialize};
use smallvec::smallvec;

use super::biomass::{CARBON_FRACTION, POUNDS_PER_TON};
use super::grm::{load_grm, GrmColumns, GrmMeasure};
use super::growth::GrowthBasis;
use super::{EstimationContext, Estimator, MetricSpec};
use crate::aggregation::ResponseRow;
use crate::config::{EstimatorConfig, TreeType};
use crate::domain::DomainExpr;
use crate::error::Result;
use crate::evaluation::EvalType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum CarbonPool {
    /// Live trees, above and belowground
    #[default]
    Live,
    LiveAboveground,
    /// Standing dead trees, above and belowground
    StandingDead,
    /// Live and standing dead trees
    Total,
}

impl CarbonPool {
    fn columns(self) -> &'static [&'static str] {
        match self {
            CarbonPool::LiveAboveground => &["CARBON_AG"],
            _ => &["CARBON_AG", "CARBON_BG"],
        }
    }

    fn tree_filter(self) -> DomainExpr {
        match self {
            CarbonPool::Live | CarbonPool::LiveAboveground => DomainExpr::eq_int("STATUSCD", 1),
            CarbonPool::StandingDead => DomainExpr::eq_int("STATUSCD", 2),
            CarbonPool::Total => DomainExpr::in_ints("STATUSCD", &[1, 2]),
        }
    }
}

/// `CARBON_ACRE`
#[derive(Debug, Clone, Copy, Default)]
pub struct CarbonEstimator {
    pub pool: CarbonPool,
}

impl CarbonEstimator {
    pub fn new(pool: CarbonPool) -> Self {
        Self { pool }
    }
}

impl Estimator for CarbonEstimator {
    fn name(&self) -> &'static str {
        "carbon"
    }

    fn eval_type(&self) -> EvalType {
        EvalType::ExpVol
    }

    fn n_vars(&self) -> usize {
        1
    }

    fn metrics(&self) -> Vec<MetricSpec> {
        vec![MetricSpec::variable("CARBON_ACRE", "CARBON_TOTAL", 0)]
    }

    fn responses(&self, ctx: &EstimationContext<'_>) -> Result<Vec<ResponseRow>> {
        let columns = self.pool.columns();
        // the pool decides tree status; tree_type is not applied
        let trees = ctx.load_trees(TreeType::All, columns, Some(self.pool.tree_filter()), &["STATUSCD"])?;
        Ok(ctx.tree_responses(&trees, |i| {
            let pounds: f64 = columns.iter().map(|c| trees.value(c, i)).sum();
            smallvec![trees.tpa[i] * pounds / POUNDS_PER_TON]
        }))
    }
}

/// `NET_CARBON_FLUX_ACRE`
#[derive(Debug, Clone, Copy, Default)]
pub struct CarbonFluxEstimator;

impl Estimator for CarbonFluxEstimator {
    fn name(&self) -> &'static str {
        "carbon_flux"
    }

    fn eval_type(&self) -> EvalType {
        EvalType::ExpGrow
    }

    /// gross growth, mortality, removals (biomass tons)
    fn n_vars(&self) -> usize {
        3
    }

    fn metrics(&self) -> Vec<MetricSpec> {
        vec![MetricSpec::combination(
            "NET_CARBON_FLUX_ACRE",
            "NET_CARBON_FLUX_TOTAL",
            &[(0, CARBON_FRACTION), (1, -CARBON_FRACTION), (2, -CARBON_FRACTION)],
        )]
    }

    fn validate(&self, config: &EstimatorConfig) -> Result<()> {
        GrmColumns::for_config(config).map(|_| ())
    }

    fn responses(&self, ctx: &EstimationContext<'_>) -> Result<Vec<ResponseRow>> {
        let records = load_grm(ctx, GrmMeasure::Biomass, true)?;
        Ok(records
            .iter()
            .map(|r| r.response(smallvec![r.growth(GrowthBasis::Gross), r.mortality(), r.removals()]))
            .collect())
    }
}
