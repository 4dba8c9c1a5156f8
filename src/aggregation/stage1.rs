//! Stage 1: condition-level sums
//!
//! Response values are adjusted by their own basis factor
//! (ADJ_FACTOR_MICR/_SUBP/_MACR of the plot's stratum) and summed per
//! (plot, condition, group). Condition area is adjusted by the PROP_BASIS
//! factor and recorded once per (plot, condition).

use rustc_hash::FxHashMap;

use super::{EstimationPlan, Values};
use crate::stratification::Stratification;
use crate::utils::group_key::GroupKey;

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionSum {
    pub plt_cn: String,
    pub condid: i64,
    pub key: GroupKey,
    pub values: Values,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ConditionArea {
    pub plt_cn: String,
    pub condid: i64,
    pub denominator_key: GroupKey,
    /// CONDPROP_UNADJ x area adjustment factor
    pub area: f64,
}

#[derive(Debug, Clone, Default)]
pub struct Stage1 {
    pub sums: Vec<ConditionSum>,
    pub areas: Vec<ConditionArea>,
}

pub fn condition_sums(plan: &EstimationPlan, strat: &Stratification) -> Stage1 {
    // ===================================================================
    // Numerator: adjusted values per (plot, condition, group)
    // ===================================================================
    let mut sums: FxHashMap<(&str, i64, GroupKey), Values> = FxHashMap::default();
    let mut outside = 0usize;
    for row in &plan.responses {
        let Some(stratum) = strat.stratum_of(&row.plt_cn) else {
            outside += 1;
            continue;
        };
        let factor = row.basis.map_or(0.0, |b| stratum.adj_factor(b));
        let entry = sums
            .entry((row.plt_cn.as_str(), row.condid, EstimationPlan::full_key(row)))
            .or_insert_with(|| Values::from_elem(0.0, plan.n_vars));
        for (acc, v) in entry.iter_mut().zip(row.values.iter()) {
            *acc += v * factor;
        }
    }
    if outside > 0 {
        tracing::debug!("stage 1: {} response row(s) on plots outside the evaluation ignored", outside);
    }

    let mut sums: Vec<ConditionSum> = sums
        .into_iter()
        .map(|((plt_cn, condid, key), values)| ConditionSum {
            plt_cn: plt_cn.to_string(),
            condid,
            key,
            values,
        })
        .collect();
    sums.sort_by(|a, b| {
        (a.plt_cn.as_str(), a.condid, &a.key).cmp(&(b.plt_cn.as_str(), b.condid, &b.key))
    });

    // ===================================================================
    // Denominator: adjusted area, once per (plot, condition)
    // ===================================================================
    let mut areas: FxHashMap<(&str, i64), ConditionArea> = FxHashMap::default();
    for cond in &plan.conditions {
        let Some(stratum) = strat.stratum_of(&cond.plt_cn) else { continue };
        areas.entry((cond.plt_cn.as_str(), cond.condid)).or_insert_with(|| ConditionArea {
            plt_cn: cond.plt_cn.clone(),
            condid: cond.condid,
            denominator_key: plan.condition_denominator_key(cond),
            area: cond.condprop * stratum.adj_factor(cond.basis),
        });
    }
    let mut areas: Vec<ConditionArea> = areas.into_values().collect();
    areas.sort_by(|a, b| (a.plt_cn.as_str(), a.condid).cmp(&(b.plt_cn.as_str(), b.condid)));

    tracing::debug!(
        "stage 1: {} response rows -> {} condition sums, {} condition areas",
        plan.responses.len(),
        sums.len(),
        areas.len()
    );
    Stage1 { sums, areas }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregation::test_support::*;
    use crate::aggregation::{DenominatorScope, EstimationPlan};
    use crate::basis::TreeBasis;
    use crate::utils::group_key::GroupValue;
    use approx::assert_relative_eq;

    fn spcd(v: i64) -> GroupKey {
        GroupKey(vec![GroupValue::Int(v)])
    }

    #[test]
    fn test_trees_summed_per_condition_and_area_counted_once() {
        let strat = stratification(&[("p1", "s1")], &[("s1", 100.0)]);
        let mut responses: Vec<_> = (0..26)
            .map(|_| response("p1", &[5.0], GroupKey::empty(), GroupKey::empty()))
            .collect();
        // a sapling on the microplot
        responses[0].basis = Some(TreeBasis::Micro);
        let plan = EstimationPlan {
            n_vars: 1,
            cond_key_len: 0,
            has_tree_groups: false,
            responses,
            conditions: vec![condition("p1", 1.0, GroupKey::empty())],
            denominator: DenominatorScope::ByConditionGroups,
        };
        let stage1 = condition_sums(&plan, &strat);
        assert_eq!(stage1.sums.len(), 1);
        // 25 trees x 5 x 1.0 + 1 tree x 5 x 2.0
        assert_relative_eq!(stage1.sums[0].values[0], 135.0);
        assert_eq!(stage1.areas.len(), 1);
        assert_relative_eq!(stage1.areas[0].area, 1.0);
    }

    #[test]
    fn test_tree_groups_split_numerator_only() {
        let strat = stratification(&[("p1", "s1")], &[("s1", 100.0)]);
        let plan = EstimationPlan {
            n_vars: 1,
            cond_key_len: 0,
            has_tree_groups: true,
            responses: vec![
                response("p1", &[3.0], GroupKey::empty(), spcd(131)),
                response("p1", &[4.0], GroupKey::empty(), spcd(110)),
                response("p1", &[1.0], GroupKey::empty(), spcd(131)),
            ],
            conditions: vec![
                condition("p1", 0.6, GroupKey::empty()),
                // listed twice, counted once
                condition("p1", 0.6, GroupKey::empty()),
            ],
            denominator: DenominatorScope::ByConditionGroups,
        };
        let stage1 = condition_sums(&plan, &strat);
        assert_eq!(stage1.sums.len(), 2);
        assert_eq!(stage1.sums[0].key, spcd(110));
        assert_relative_eq!(stage1.sums[1].values[0], 4.0);
        assert_eq!(stage1.areas.len(), 1);
        assert_relative_eq!(stage1.areas[0].area, 0.6);
    }

    #[test]
    fn test_unsampled_basis_and_foreign_plots_contribute_nothing() {
        let strat = stratification(&[("p1", "s1")], &[("s1", 100.0)]);
        let mut unsampled = response("p1", &[9.0], GroupKey::empty(), GroupKey::empty());
        unsampled.basis = None;
        let plan = EstimationPlan {
            n_vars: 1,
            cond_key_len: 0,
            has_tree_groups: false,
            responses: vec![unsampled, response("elsewhere", &[7.0], GroupKey::empty(), GroupKey::empty())],
            conditions: vec![condition("p1", 1.0, GroupKey::empty())],
            denominator: DenominatorScope::Total,
        };
        let stage1 = condition_sums(&plan, &strat);
        assert_eq!(stage1.sums.len(), 1);
        assert_relative_eq!(stage1.sums[0].values[0], 0.0);
    }
}
