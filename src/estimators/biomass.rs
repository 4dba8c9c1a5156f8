//! Dry biomass and carbon per acre
//!
//! TREE biomass columns are pounds per tree; estimates are short tons.

use serde::{Deserialize, Serialize};
use smallvec::smallvec;

use super::{EstimationContext, Estimator, MetricSpec};
use crate::aggregation::ResponseRow;
use crate::error::Result;
use crate::evaluation::EvalType;

pub const POUNDS_PER_TON: f64 = 2000.0;

/// Carbon fraction of dry biomass
pub const CARBON_FRACTION: f64 = 0.47;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BiomassComponent {
    /// Aboveground
    #[default]
    Ag,
    /// Belowground (coarse roots)
    Bg,
    /// Aboveground plus belowground
    Total,
    Bole,
    Stump,
}

impl BiomassComponent {
    pub fn columns(self) -> &'static [&'static str] {
        match self {
            BiomassComponent::Ag => &["DRYBIO_AG"],
            BiomassComponent::Bg => &["DRYBIO_BG"],
            BiomassComponent::Total => &["DRYBIO_AG", "DRYBIO_BG"],
            BiomassComponent::Bole => &["DRYBIO_BOLE"],
            BiomassComponent::Stump => &["DRYBIO_STUMP"],
        }
    }
}

/// `BIO_ACRE` and `CARB_ACRE`
#[derive(Debug, Clone, Copy, Default)]
pub struct BiomassEstimator {
    pub component: BiomassComponent,
}

impl BiomassEstimator {
    pub fn new(component: BiomassComponent) -> Self {
        Self { component }
    }
}

impl Estimator for BiomassEstimator {
    fn name(&self) -> &'static str {
        "biomass"
    }

    fn eval_type(&self) -> EvalType {
        EvalType::ExpVol
    }

    fn n_vars(&self) -> usize {
        1
    }

    fn metrics(&self) -> Vec<MetricSpec> {
        vec![
            MetricSpec::variable("BIO_ACRE", "BIO_TOTAL", 0),
            MetricSpec::combination("CARB_ACRE", "CARB_TOTAL", &[(0, CARBON_FRACTION)]),
        ]
    }

    fn responses(&self, ctx: &EstimationContext<'_>) -> Result<Vec<ResponseRow>> {
        let columns = self.component.columns();
        let trees = ctx.load_trees(ctx.config.tree_type, columns, None, &[])?;
        Ok(ctx.tree_responses(&trees, |i| {
            let pounds: f64 = columns.iter().map(|c| trees.value(c, i)).sum();
            smallvec![trees.tpa[i] * pounds / POUNDS_PER_TON]
        }))
    }
}
