//! Trees and basal area per acre

use smallvec::smallvec;

use super::{EstimationContext, Estimator, MetricSpec};
use crate::aggregation::ResponseRow;
use crate::error::Result;
use crate::evaluation::EvalType;

/// Square feet of basal area per square inch of DIA
pub const BASAL_AREA_FACTOR: f64 = 0.005454154;

pub fn basal_area(dia: Option<f64>) -> f64 {
    dia.map_or(0.0, |d| BASAL_AREA_FACTOR * d * d)
}

/// `TPA` and `BAA`
#[derive(Debug, Clone, Copy, Default)]
pub struct TpaEstimator;

impl Estimator for TpaEstimator {
    fn name(&self) -> &'static str {
        "tpa"
    }

    fn eval_type(&self) -> EvalType {
        EvalType::ExpVol
    }

    fn n_vars(&self) -> usize {
        2
    }

    fn metrics(&self) -> Vec<MetricSpec> {
        vec![
            MetricSpec::variable("TPA", "TPA_TOTAL", 0),
            MetricSpec::variable("BAA", "BAA_TOTAL", 1),
        ]
    }

    fn responses(&self, ctx: &EstimationContext<'_>) -> Result<Vec<ResponseRow>> {
        let trees = ctx.load_trees(ctx.config.tree_type, &[], None, &[])?;
        Ok(ctx.tree_responses(&trees, |i| {
            let tpa = trees.tpa[i];
            smallvec![tpa, tpa * basal_area(trees.dia[i])]
        }))
    }
}
