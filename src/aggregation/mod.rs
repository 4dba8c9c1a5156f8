//! Two-stage aggregation
//!
//! Every estimator reduces to an `EstimationPlan`: response rows (trees, GRM
//! records or conditions) carrying one or more response values, plus the set
//! of conditions whose area forms the ratio denominator.
//!
//! - Stage 1 (`stage1`) sums adjusted response values to one row per
//!   (plot, condition, group) and the adjusted area to one row per
//!   (plot, condition). A condition's area is counted once no matter how many
//!   trees it holds.
//! - Stage 2 (`stage2`) rolls conditions up to plots, expands by EXPNS and
//!   forms the ratio of means Y / X per group.
//!
//! Grouping keys are condition-level values followed by tree-level values.
//! Only the condition-level prefix splits the denominator; grouping by a tree
//! attribute (species, size class) never divides the area.

pub mod stage1;
pub mod stage2;

use smallvec::SmallVec;

use crate::basis::TreeBasis;
use crate::utils::group_key::GroupKey;

pub use stage1::{condition_sums, ConditionArea, ConditionSum, Stage1};
pub use stage2::{expand, DenominatorTotals, GroupTotals, PopulationTotals};

/// Response values of one record (one slot per estimator variable)
pub type Values = SmallVec<[f64; 4]>;

/// One tree / GRM record / condition contributing to the numerator
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseRow {
    pub plt_cn: String,
    pub condid: i64,
    /// Plot design the values were measured on; `None` contributes nothing
    pub basis: Option<TreeBasis>,
    /// Condition-level group values
    pub cond_key: GroupKey,
    /// Tree-level group values
    pub tree_key: GroupKey,
    /// Unadjusted per-acre values (nulls already mapped to 0)
    pub values: Values,
}

/// One condition contributing area to the denominator
#[derive(Debug, Clone, PartialEq)]
pub struct ConditionRow {
    pub plt_cn: String,
    pub condid: i64,
    /// CONDPROP_UNADJ
    pub condprop: f64,
    /// Adjustment basis from PROP_BASIS
    pub basis: TreeBasis,
    pub cond_key: GroupKey,
}

/// How a group's denominator is formed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DenominatorScope {
    /// Area of conditions sharing the group's condition-level values
    ByConditionGroups,
    /// Area of every denominator condition, whatever the group
    Total,
}

#[derive(Debug, Clone)]
pub struct EstimationPlan {
    pub n_vars: usize,
    /// Number of leading key values that are condition-level
    pub cond_key_len: usize,
    /// True when the key has tree-level values
    pub has_tree_groups: bool,
    pub responses: Vec<ResponseRow>,
    pub conditions: Vec<ConditionRow>,
    pub denominator: DenominatorScope,
}

impl EstimationPlan {
    /// Full group key of a response row
    pub fn full_key(row: &ResponseRow) -> GroupKey {
        GroupKey::concat(&row.cond_key, &row.tree_key)
    }

    /// Denominator key of a full group key
    pub fn denominator_key(&self, key: &GroupKey) -> GroupKey {
        match self.denominator {
            DenominatorScope::Total => GroupKey::empty(),
            DenominatorScope::ByConditionGroups => GroupKey(key.0[..self.cond_key_len.min(key.0.len())].to_vec()),
        }
    }

    /// Denominator key of a condition
    pub fn condition_denominator_key(&self, row: &ConditionRow) -> GroupKey {
        match self.denominator {
            DenominatorScope::Total => GroupKey::empty(),
            DenominatorScope::ByConditionGroups => row.cond_key.clone(),
        }
    }
}
