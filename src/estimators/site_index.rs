//! Area-weighted mean site index, by site index base age

use smallvec::smallvec;

use super::{EstimationContext, Estimator, MetricSpec};
use crate::aggregation::{ConditionRow, DenominatorScope, ResponseRow};
use crate::config::EstimatorConfig;
use crate::error::{FiaError, Result};
use crate::evaluation::EvalType;
use crate::utils::group_key::GroupKey;

/// `SI`
#[derive(Debug, Clone, Copy, Default)]
pub struct SiteIndexEstimator;

impl SiteIndexEstimator {
    /// Domain conditions with a known site index, and that index
    fn known(ctx: &EstimationContext<'_>) -> Result<Vec<(usize, f64)>> {
        let sicond = ctx.conditions.f64_column("SICOND")?;
        Ok(ctx
            .conditions
            .records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.in_domain())
            .filter_map(|(i, _)| sicond[i].filter(|v| !v.is_nan()).map(|v| (i, v)))
            .collect())
    }
}

impl Estimator for SiteIndexEstimator {
    fn name(&self) -> &'static str {
        "site_index"
    }

    fn eval_type(&self) -> EvalType {
        EvalType::ExpCurr
    }

    fn n_vars(&self) -> usize {
        1
    }

    fn metrics(&self) -> Vec<MetricSpec> {
        vec![MetricSpec::variable("SI", "SI_TOTAL", 0).without_total()]
    }

    fn validate(&self, config: &EstimatorConfig) -> Result<()> {
        if config.tree_domain.as_deref().is_some_and(|d| !d.trim().is_empty()) {
            return Err(FiaError::InvalidConfig(
                "site index is a condition attribute; use area_domain instead of tree_domain".to_string(),
            ));
        }
        Ok(())
    }

    fn allows_tree_groups(&self) -> bool {
        false
    }

    fn uses_tree_table(&self, _config: &EstimatorConfig) -> bool {
        false
    }

    fn condition_columns(&self, _config: &EstimatorConfig) -> Vec<String> {
        vec!["SICOND".to_string()]
    }

    fn forced_groups(&self) -> Vec<String> {
        vec!["SIBASE".to_string()]
    }

    fn responses(&self, ctx: &EstimationContext<'_>) -> Result<Vec<ResponseRow>> {
        Ok(Self::known(ctx)?
            .into_iter()
            .map(|(i, si)| {
                let r = &ctx.conditions.records[i];
                ResponseRow {
                    plt_cn: r.plt_cn.clone(),
                    condid: r.condid,
                    basis: Some(r.basis),
                    cond_key: r.key.clone(),
                    tree_key: GroupKey::empty(),
                    values: smallvec![r.condprop * si],
                }
            })
            .collect())
    }

    fn denominator(&self, ctx: &EstimationContext<'_>) -> Result<(Vec<ConditionRow>, DenominatorScope)> {
        let rows = Self::known(ctx)?
            .into_iter()
            .map(|(i, _)| ctx.conditions.records[i].to_row())
            .collect();
        Ok((rows, DenominatorScope::ByConditionGroups))
    }
}
