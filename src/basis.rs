//! Tree basis (plot design) classification
//!
//! Each tree was measured on one of three nested fixed-radius plots. The basis
//! decides which stratum adjustment factor (ADJ_FACTOR_MICR / _SUBP / _MACR)
//! applies to it. It is always derived from DIA and the plot's macroplot
//! breakpoint, never read from storage.
//!
//! Order of tests matters: null DIA, then the microplot cutoff, then the
//! breakpoint. Swapping the two comparisons reclassifies every sapling on a
//! plot with a macroplot.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Largest diameter (exclusive, inches) measured on the microplot
pub const MICROPLOT_MAX_DIA: f64 = 5.0;

/// Breakpoint used when a plot has no macroplot
pub const NO_MACRO_BREAKPOINT: f64 = 9999.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum TreeBasis {
    Micro,
    Subplot,
    Macroplot,
}

impl TreeBasis {
    /// Stratum adjustment factor column for this basis
    pub fn adj_column(self) -> &'static str {
        match self {
            TreeBasis::Micro => "ADJ_FACTOR_MICR",
            TreeBasis::Subplot => "ADJ_FACTOR_SUBP",
            TreeBasis::Macroplot => "ADJ_FACTOR_MACR",
        }
    }
}

impl fmt::Display for TreeBasis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TreeBasis::Micro => "MICR",
            TreeBasis::Subplot => "SUBP",
            TreeBasis::Macroplot => "MACR",
        };
        write!(f, "{}", s)
    }
}

/// Classify a tree from its diameter and its plot's MACRO_BREAKPOINT_DIA
pub fn classify(dia: Option<f64>, macro_breakpoint: Option<f64>) -> TreeBasis {
    let dia = match dia {
        Some(d) if !d.is_nan() => d,
        _ => return TreeBasis::Subplot,
    };
    if dia < MICROPLOT_MAX_DIA {
        return TreeBasis::Micro;
    }
    let breakpoint = macro_breakpoint
        .filter(|b| !b.is_nan())
        .unwrap_or(NO_MACRO_BREAKPOINT);
    if dia < breakpoint {
        TreeBasis::Subplot
    } else {
        TreeBasis::Macroplot
    }
}

/// Basis of a GRM record from its SUBPTYP_GRM code
///
/// 0 means the record is not sampled on any plot design (it contributes
/// nothing); unknown codes are treated the same way.
pub fn grm_basis(subptyp_grm: Option<i64>) -> Option<TreeBasis> {
    match subptyp_grm {
        Some(1) => Some(TreeBasis::Subplot),
        Some(2) => Some(TreeBasis::Micro),
        Some(3) => Some(TreeBasis::Macroplot),
        _ => None,
    }
}

/// Condition-area basis from COND.PROP_BASIS
pub fn condition_basis(prop_basis: Option<&str>) -> TreeBasis {
    match prop_basis.map(str::trim) {
        Some(b) if b.eq_ignore_ascii_case("MACR") => TreeBasis::Macroplot,
        _ => TreeBasis::Subplot,
    }
}
