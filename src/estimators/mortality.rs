//! Average annual mortality per acre

use serde::{Deserialize, Serialize};
use smallvec::smallvec;

use super::grm::{load_grm, GrmColumns, GrmComponent, GrmMeasure};
use super::{EstimationContext, Estimator, MetricSpec};
use crate::aggregation::ResponseRow;
use crate::config::{EstimatorConfig, TreeType};
use crate::domain::DomainExpr;
use crate::error::Result;
use crate::evaluation::EvalType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MortalityMethod {
    /// MORTALITY components of TREE_GRM_COMPONENT
    #[default]
    Grm,
    /// Dead TREE records with a mortality year, annualised by REMPER
    TreeStatus,
}

/// `MORT_ACRE`
#[derive(Debug, Clone, Copy, Default)]
pub struct MortalityEstimator {
    pub measure: GrmMeasure,
    pub method: MortalityMethod,
}

impl MortalityEstimator {
    pub fn new(measure: GrmMeasure) -> Self {
        Self {
            measure,
            method: MortalityMethod::Grm,
        }
    }

    pub fn with_method(mut self, method: MortalityMethod) -> Self {
        self.method = method;
        self
    }

    fn tree_status_responses(&self, ctx: &EstimationContext<'_>) -> Result<Vec<ResponseRow>> {
        let died = DomainExpr::eq_int("STATUSCD", 2).and(DomainExpr::is_not_null("MORTYR"));
        let columns: Vec<&str> = self.measure.column().into_iter().collect();
        let trees = ctx.load_trees(TreeType::All, &columns, Some(died), &[])?;
        Ok(ctx.tree_responses(&trees, |i| {
            let raw = self.measure.column().and_then(|c| trees.values.get(c).and_then(|v| v[i]));
            let annual = match ctx.remper(&trees.plt_cn[i]) {
                Some(remper) if remper > 0.0 => trees.tpa[i] * self.measure.value(raw) / remper,
                _ => 0.0,
            };
            smallvec![annual]
        }))
    }
}

impl Estimator for MortalityEstimator {
    fn name(&self) -> &'static str {
        "mortality"
    }

    fn eval_type(&self) -> EvalType {
        EvalType::ExpMort
    }

    fn n_vars(&self) -> usize {
        1
    }

    fn metrics(&self) -> Vec<MetricSpec> {
        vec![MetricSpec::variable("MORT_ACRE", "MORT_TOTAL", 0)]
    }

    fn validate(&self, config: &EstimatorConfig) -> Result<()> {
        match self.method {
            MortalityMethod::Grm => GrmColumns::for_config(config).map(|_| ()),
            MortalityMethod::TreeStatus => Ok(()),
        }
    }

    fn responses(&self, ctx: &EstimationContext<'_>) -> Result<Vec<ResponseRow>> {
        match self.method {
            MortalityMethod::Grm => {
                let records = load_grm(ctx, self.measure, false)?;
                Ok(records
                    .iter()
                    .filter(|r| r.component == GrmComponent::Mortality)
                    .map(|r| r.response(smallvec![r.mortality()]))
                    .collect())
            }
            MortalityMethod::TreeStatus => self.tree_status_responses(ctx),
        }
    }
}
