//! Average annual growth per acre

use serde::{Deserialize, Serialize};
use smallvec::smallvec;

use super::grm::{load_grm, GrmColumns, GrmComponent, GrmMeasure};
use super::{EstimationContext, Estimator, MetricSpec};
use crate::aggregation::ResponseRow;
use crate::config::EstimatorConfig;
use crate::error::Result;
use crate::evaluation::EvalType;

/// How trees that died during the period enter growth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum GrowthBasis {
    /// Mortality trees remove their t1 measure
    #[default]
    Net,
    /// Mortality trees add their growth up to the midpoint
    Gross,
}

/// Change in the measure attributed to one tree over the period
///
/// `begin`, `midpt` and `end` are the tree's measure at t1, at the
/// remeasurement midpoint and at t2.
pub fn growth_delta(component: GrmComponent, basis: GrowthBasis, begin: f64, midpt: f64, end: f64) -> f64 {
    match component {
        GrmComponent::Survivor => end - begin,
        GrmComponent::Ingrowth | GrmComponent::Reversion => end,
        GrmComponent::Cut | GrmComponent::Diversion => midpt - begin,
        GrmComponent::Mortality => match basis {
            GrowthBasis::Net => -begin,
            GrowthBasis::Gross => midpt - begin,
        },
        GrmComponent::NotUsed => 0.0,
    }
}

/// `GROWTH_ACRE`
#[derive(Debug, Clone, Copy, Default)]
pub struct GrowthEstimator {
    pub measure: GrmMeasure,
    pub basis: GrowthBasis,
}

impl GrowthEstimator {
    pub fn new(measure: GrmMeasure, basis: GrowthBasis) -> Self {
        Self { measure, basis }
    }
}

impl Estimator for GrowthEstimator {
    fn name(&self) -> &'static str {
        "growth"
    }

    fn eval_type(&self) -> EvalType {
        EvalType::ExpGrow
    }

    fn n_vars(&self) -> usize {
        1
    }

    fn metrics(&self) -> Vec<MetricSpec> {
        vec![MetricSpec::variable("GROWTH_ACRE", "GROWTH_TOTAL", 0)]
    }

    fn validate(&self, config: &EstimatorConfig) -> Result<()> {
        GrmColumns::for_config(config).map(|_| ())
    }

    fn responses(&self, ctx: &EstimationContext<'_>) -> Result<Vec<ResponseRow>> {
        let records = load_grm(ctx, self.measure, true)?;
        Ok(records
            .iter()
            .map(|r| r.response(smallvec![r.growth(self.basis)]))
            .collect())
    }
}
