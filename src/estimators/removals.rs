//! Average annual removals per acre (harvest and land-use diversion)

use smallvec::smallvec;

use super::grm::{load_grm, GrmColumns, GrmMeasure};
use super::{EstimationContext, Estimator, MetricSpec};
use crate::aggregation::ResponseRow;
use crate::config::EstimatorConfig;
use crate::error::Result;
use crate::evaluation::EvalType;

/// `REMV_ACRE`
#[derive(Debug, Clone, Copy, Default)]
pub struct RemovalsEstimator {
    pub measure: GrmMeasure,
}

impl RemovalsEstimator {
    pub fn new(measure: GrmMeasure) -> Self {
        Self { measure }
    }
}

impl Estimator for RemovalsEstimator {
    fn name(&self) -> &'static str {
        "removals"
    }

    fn eval_type(&self) -> EvalType {
        EvalType::ExpRemv
    }

    fn n_vars(&self) -> usize {
        1
    }

    fn metrics(&self) -> Vec<MetricSpec> {
        vec![MetricSpec::variable("REMV_ACRE", "REMV_TOTAL", 0)]
    }

    fn validate(&self, config: &EstimatorConfig) -> Result<()> {
        GrmColumns::for_config(config).map(|_| ())
    }

    fn responses(&self, ctx: &EstimationContext<'_>) -> Result<Vec<ResponseRow>> {
        let records = load_grm(ctx, self.measure, false)?;
        Ok(records
            .iter()
            .filter(|r| r.component.is_removal())
            .map(|r| r.response(smallvec![r.removals()]))
            .collect())
    }
}
