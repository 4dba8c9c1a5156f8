//! Area as a percentage of the land in scope
//!
//! Numerator: condition area in the land type, the area domain and (with a
//! tree domain) holding at least one matching tree. Denominator: all condition
//! area in the land type, whatever the group. Grouping by LAND_TYPE replaces
//! the land-type restriction and measures against sampled land
//! (COND_STATUS_CD 1 or 2).

use rustc_hash::FxHashMap;
use smallvec::{smallvec, SmallVec};

use super::grouping::LAND_TYPE;
use super::{EstimationContext, Estimator, MetricSpec};
use crate::aggregation::{ConditionRow, DenominatorScope, ResponseRow};
use crate::config::EstimatorConfig;
use crate::data::tables;
use crate::error::Result;
use crate::evaluation::EvalType;
use crate::utils::columns::{i64_values, key_values};
use crate::utils::group_key::GroupKey;
use crate::utils::lazy_helpers::{filter_rows, materialize_with_columns, ColumnRequest};

/// `AREA_PERC`
#[derive(Debug, Clone, Copy, Default)]
pub struct AreaEstimator;

impl AreaEstimator {
    fn by_land_type(ctx: &EstimationContext<'_>) -> bool {
        ctx.groups.cond_columns.iter().any(|c| c == LAND_TYPE)
    }

    /// (PLT_CN, CONDID) of conditions holding a tree in the tree domain
    fn conditions_with_trees(ctx: &EstimationContext<'_>) -> Result<Option<TreeConditions>> {
        let Some(domain) = &ctx.tree_domain else {
            return Ok(None);
        };
        let mut request = ColumnRequest::new(["PLT_CN", "CONDID"]);
        request.require_all(domain.columns());
        let trees = materialize_with_columns(ctx.source, tables::TREE, &request, ctx.estimator)?;
        let trees = filter_rows(trees, Some(domain.to_polars()))?;
        let plt_cns = key_values(&trees, "PLT_CN")?;
        let condids = i64_values(&trees, "CONDID")?;

        let mut held = TreeConditions::default();
        for (plt_cn, condid) in plt_cns.into_iter().zip(condids) {
            let (Some(plt_cn), Some(condid)) = (plt_cn, condid) else { continue };
            let conds = held.entry(plt_cn).or_default();
            if !conds.contains(&condid) {
                conds.push(condid);
            }
        }
        Ok(Some(held))
    }
}

/// CONDIDs holding at least one domain tree, per plot
type TreeConditions = FxHashMap<String, SmallVec<[i64; 4]>>;

fn holds_tree(held: &TreeConditions, plt_cn: &str, condid: i64) -> bool {
    held.get(plt_cn).is_some_and(|conds| conds.contains(&condid))
}

impl Estimator for AreaEstimator {
    fn name(&self) -> &'static str {
        "area"
    }

    fn eval_type(&self) -> EvalType {
        EvalType::ExpCurr
    }

    fn n_vars(&self) -> usize {
        1
    }

    fn metrics(&self) -> Vec<MetricSpec> {
        vec![MetricSpec::variable("AREA_PERC", "AREA", 0).with_scale(100.0)]
    }

    fn allows_tree_groups(&self) -> bool {
        false
    }

    fn uses_tree_table(&self, config: &EstimatorConfig) -> bool {
        config.tree_domain.as_deref().is_some_and(|d| !d.trim().is_empty())
    }

    fn reports_area_total(&self) -> bool {
        false
    }

    fn responses(&self, ctx: &EstimationContext<'_>) -> Result<Vec<ResponseRow>> {
        let with_trees = Self::conditions_with_trees(ctx)?;
        let by_land_type = Self::by_land_type(ctx);
        Ok(ctx
            .conditions
            .records
            .iter()
            .filter(|r| r.in_area && (by_land_type || r.in_land))
            .filter(|r| {
                with_trees
                    .as_ref()
                    .map_or(true, |held| holds_tree(held, &r.plt_cn, r.condid))
            })
            .map(|r| ResponseRow {
                plt_cn: r.plt_cn.clone(),
                condid: r.condid,
                basis: Some(r.basis),
                cond_key: r.key.clone(),
                tree_key: GroupKey::empty(),
                values: smallvec![r.condprop],
            })
            .collect())
    }

    fn denominator(&self, ctx: &EstimationContext<'_>) -> Result<(Vec<ConditionRow>, DenominatorScope)> {
        let by_land_type = Self::by_land_type(ctx);
        let rows = ctx
            .conditions
            .records
            .iter()
            .filter(|r| {
                if by_land_type {
                    matches!(r.status, Some(1) | Some(2))
                } else {
                    r.in_land
                }
            })
            .map(|r| r.to_row())
            .collect();
        Ok((rows, DenominatorScope::Total))
    }
}
