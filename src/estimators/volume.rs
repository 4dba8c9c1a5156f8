//! Merchantable volume per acre

use serde::{Deserialize, Serialize};
use smallvec::smallvec;

use super::{EstimationContext, Estimator, MetricSpec};
use crate::aggregation::ResponseRow;
use crate::error::Result;
use crate::evaluation::EvalType;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum VolumeType {
    /// Net cubic-foot volume
    #[default]
    Net,
    /// Gross cubic-foot volume
    Gross,
    /// Sound cubic-foot volume
    Sound,
    /// Net sawlog cubic-foot volume
    Sawlog,
    /// Net board-foot volume (Scribner)
    BoardFeet,
}

impl VolumeType {
    pub fn column(self) -> &'static str {
        match self {
            VolumeType::Net => "VOLCFNET",
            VolumeType::Gross => "VOLCFGRS",
            VolumeType::Sound => "VOLCFSND",
            VolumeType::Sawlog => "VOLCSNET",
            VolumeType::BoardFeet => "VOLBFNET",
        }
    }
}

/// `<COL>_ACRE` for the chosen volume column
#[derive(Debug, Clone, Copy, Default)]
pub struct VolumeEstimator {
    pub vol_type: VolumeType,
}

impl VolumeEstimator {
    pub fn new(vol_type: VolumeType) -> Self {
        Self { vol_type }
    }
}

impl Estimator for VolumeEstimator {
    fn name(&self) -> &'static str {
        "volume"
    }

    fn eval_type(&self) -> EvalType {
        EvalType::ExpVol
    }

    fn n_vars(&self) -> usize {
        1
    }

    fn metrics(&self) -> Vec<MetricSpec> {
        let column = self.vol_type.column();
        vec![MetricSpec::variable(
            &format!("{}_ACRE", column),
            &format!("{}_TOTAL", column),
            0,
        )]
    }

    fn responses(&self, ctx: &EstimationContext<'_>) -> Result<Vec<ResponseRow>> {
        let column = self.vol_type.column();
        let trees = ctx.load_trees(ctx.config.tree_type, &[column], None, &[])?;
        // saplings carry null volume
        Ok(ctx.tree_responses(&trees, |i| smallvec![trees.tpa[i] * trees.value(column, i)]))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metric_names_follow_column() {
        let names: Vec<String> = VolumeEstimator::new(VolumeType::BoardFeet)
            .metrics()
            .into_iter()
            .map(|m| m.name)
            .collect();
        assert_eq!(names, vec!["VOLBFNET_ACRE"]);
        let vol: VolumeType = serde_json::from_str("\"sawlog\"").unwrap();
        assert_eq!(vol.column(), "VOLCSNET");
    }
}
