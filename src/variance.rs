//! Post-stratified variance (Bechtold & Patterson 2005)
//!
//! For each group the plot-level numerator values y_1..y_k and the
//! denominator x are treated as one vector per plot. Within stratum h with
//! n_h plots and expansion factor w_h the sample covariance S_h (ddof = 1) is
//! computed over all n_h plots, plots without data counting as zeros. The
//! covariance of the expanded totals is
//!
//! ```text
//! C = sum_h w_h^2 * n_h * S_h
//! ```
//!
//! Everything else derives from C:
//!
//! ```text
//! Var(a.Y)              = a' C a
//! Var(R)                = (C_yy - 2 R C_yx + R^2 C_xx) / X^2
//! Cov(R_i, R_j)         = (C_ij - R_j C_ix - R_i C_jx + R_i R_j C_xx) / X^2
//! ```
//!
//! so compound estimates (net flux = growth - mortality - removals) carry the
//! full covariance between their components. Strata with n_h <= 1 contribute
//! nothing.

use std::collections::BTreeMap;

use rayon::prelude::*;
use rustc_hash::FxHashSet;
use smallvec::SmallVec;

use crate::aggregation::{GroupTotals, PopulationTotals};
use crate::stratification::StratumInfo;

/// Symmetric covariance matrix of expanded totals
#[derive(Debug, Clone, PartialEq)]
pub struct CovarianceMatrix {
    n: usize,
    data: Vec<f64>,
}

impl CovarianceMatrix {
    pub fn zeros(n: usize) -> Self {
        Self { n, data: vec![0.0; n * n] }
    }

    pub fn dim(&self) -> usize {
        self.n
    }

    pub fn get(&self, i: usize, j: usize) -> f64 {
        self.data[i * self.n + j]
    }

    fn add(&mut self, i: usize, j: usize, v: f64) {
        self.data[i * self.n + j] += v;
    }

    /// Variance of the linear combination a.Y
    pub fn combination_variance(&self, a: &[f64]) -> f64 {
        let mut v = 0.0;
        for (i, ai) in a.iter().enumerate() {
            if *ai == 0.0 {
                continue;
            }
            for (j, aj) in a.iter().enumerate() {
                v += ai * aj * self.get(i, j);
            }
        }
        v
    }

    /// Variance of the ratio (a.Y) / X, where X is the last variable
    pub fn ratio_variance(&self, a: &[f64], ratio: f64, x_total: f64) -> f64 {
        if x_total == 0.0 {
            return 0.0;
        }
        let x = self.n - 1;
        let c_zz = self.combination_variance(a);
        let c_zx: f64 = a.iter().enumerate().map(|(i, ai)| ai * self.get(i, x)).sum();
        let c_xx = self.get(x, x);
        (c_zz - 2.0 * ratio * c_zx + ratio * ratio * c_xx) / (x_total * x_total)
    }

    /// Covariance of ratios Y_i / X and Y_j / X
    pub fn ratio_covariance(&self, i: usize, j: usize, r_i: f64, r_j: f64, x_total: f64) -> f64 {
        if x_total == 0.0 {
            return 0.0;
        }
        let x = self.n - 1;
        (self.get(i, j) - r_j * self.get(i, x) - r_i * self.get(j, x) + r_i * r_j * self.get(x, x))
            / (x_total * x_total)
    }
}

/// Stratified covariance of expanded totals
///
/// `rows` holds `(stratum index, values)` for plots with data; every other
/// plot of a stratum counts as an all-zero row.
pub fn stratified_covariance(n: usize, rows: &[(usize, &[f64])], strata: &[StratumInfo]) -> CovarianceMatrix {
    let mut by_stratum: BTreeMap<usize, Vec<&[f64]>> = BTreeMap::new();
    for (stratum, values) in rows {
        by_stratum.entry(*stratum).or_default().push(values);
    }

    let mut cov = CovarianceMatrix::zeros(n);
    for (h, plots) in by_stratum {
        let info = &strata[h];
        let n_h = info.n_plots.max(plots.len());
        if n_h <= 1 {
            continue;
        }
        let nf = n_h as f64;
        let zeros = (n_h - plots.len()) as f64;

        // pass 1: means over all n_h plots
        let mut means = vec![0.0; n];
        for values in &plots {
            for (m, v) in means.iter_mut().zip(values.iter()) {
                *m += v;
            }
        }
        for m in means.iter_mut() {
            *m /= nf;
        }

        // pass 2: centred cross products (implicit zero rows add mean_u * mean_v)
        let scale = info.expns * info.expns * nf / (nf - 1.0);
        for i in 0..n {
            for j in i..n {
                let mut s: f64 = plots
                    .iter()
                    .map(|v| (v[i] - means[i]) * (v[j] - means[j]))
                    .sum();
                s += zeros * means[i] * means[j];
                let c = scale * s;
                cov.add(i, j, c);
                if i != j {
                    cov.add(j, i, c);
                }
            }
        }
    }
    cov
}

/// Covariance matrix of one group: its k numerator variables plus its
/// denominator as the last variable
pub fn group_covariance(pop: &PopulationTotals, group: &GroupTotals, strata: &[StratumInfo]) -> CovarianceMatrix {
    let n = pop.n_vars + 1;
    let denominator = pop.denominator(group);

    let mut plots: Vec<usize> = group.plots.keys().copied().collect();
    if let Some(d) = denominator {
        let seen: FxHashSet<usize> = plots.iter().copied().collect();
        plots.extend(d.plots.keys().copied().filter(|p| !seen.contains(p)));
    }
    plots.sort_unstable();

    let vectors: Vec<(usize, SmallVec<[f64; 5]>)> = plots
        .iter()
        .map(|&plot| {
            let mut row: SmallVec<[f64; 5]> = SmallVec::from_elem(0.0, n);
            if let Some(y) = group.plots.get(&plot) {
                row[..pop.n_vars].copy_from_slice(y);
            }
            row[n - 1] = denominator.and_then(|d| d.plots.get(&plot)).copied().unwrap_or(0.0);
            (pop.plot_strata[plot], row)
        })
        .collect();
    let rows: Vec<(usize, &[f64])> = vectors.iter().map(|(h, v)| (*h, v.as_slice())).collect();
    stratified_covariance(n, &rows, strata)
}

/// Covariance matrices of every group, in group order
pub fn all_group_covariances(pop: &PopulationTotals, strata: &[StratumInfo]) -> Vec<CovarianceMatrix> {
    pop.groups
        .par_iter()
        .map(|group| group_covariance(pop, group, strata))
        .collect()
}

/// sqrt(max(0, v)); never NaN
pub fn standard_error(variance: f64) -> f64 {
    if variance.is_nan() || variance <= 0.0 {
        0.0
    } else {
        variance.sqrt()
    }
}

/// Variance clamped to be non-negative and finite
pub fn clamp_variance(variance: f64) -> f64 {
    if variance.is_nan() || variance < 0.0 {
        0.0
    } else {
        variance
    }
}
