// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Reference MMD estimators and the per-run metrics recorder.

use std::collections::HashMap;

use ndarray::{Array1, Array2, Axis};

use crate::model::MmdGlm;

/// External metrics callback: `(model, t, data_spikes, sim_spikes)` to a map
/// of metric name to value.
pub type MetricsFn =
    Box<dyn FnMut(&MmdGlm, &Array1<f64>, &Array2<f64>, &Array2<f64>) -> HashMap<String, f64>>;

/// Squared MMD estimated from explicit feature sets (`[feature, trial]`).
///
/// The biased variant is the V-statistic `‖mean φ_d - mean φ_fr‖²`; the
/// unbiased variant replaces both squared-norm terms with off-diagonal
/// U-statistics.
pub fn mmd_from_features(phi_d: &Array2<f64>, phi_fr: &Array2<f64>, biased: bool) -> f64 {
    let n_d = phi_d.ncols() as f64;
    let n_fr = phi_fr.ncols() as f64;
    let sum_d = phi_d.sum_axis(Axis(1));
    let sum_fr = phi_fr.sum_axis(Axis(1));
    if biased {
        let mut acc = 0.0;
        for f in 0..sum_d.len() {
            let delta = sum_d[[f]] / n_d - sum_fr[[f]] / n_fr;
            acc += delta * delta;
        }
        acc
    } else {
        let sq = |phi: &Array2<f64>| phi.iter().map(|v| v * v).sum::<f64>();
        let norm2_d =
            (sum_d.iter().map(|v| v * v).sum::<f64>() - sq(phi_d)) / (n_d * (n_d - 1.0));
        let norm2_fr =
            (sum_fr.iter().map(|v| v * v).sum::<f64>() - sq(phi_fr)) / (n_fr * (n_fr - 1.0));
        let mean_dot = sum_d
            .iter()
            .zip(sum_fr.iter())
            .map(|(a, b)| a * b)
            .sum::<f64>()
            / (n_d * n_fr);
        norm2_d + norm2_fr - 2.0 * mean_dot
    }
}

/// Squared MMD estimated from precomputed gramians. The unbiased variant
/// averages the off-diagonal entries of both within-population gramians, so a
/// zeroed diagonal (as the unbiased surrogate leaves behind) changes nothing.
pub fn mmd_from_gramians(
    g_dd: &Array2<f64>,
    g_ff: &Array2<f64>,
    g_df: &Array2<f64>,
    biased: bool,
) -> f64 {
    let full_mean = |g: &Array2<f64>| g.sum() / (g.nrows() * g.ncols()) as f64;
    if biased {
        full_mean(g_dd) + full_mean(g_ff) - 2.0 * full_mean(g_df)
    } else {
        let offdiag_mean = |g: &Array2<f64>| {
            let n = g.nrows() as f64;
            let trace: f64 = (0..g.nrows()).map(|i| g[[i, i]]).sum();
            (g.sum() - trace) / (n * (n - 1.0))
        };
        offdiag_mean(g_dd) + offdiag_mean(g_ff) - 2.0 * full_mean(g_df)
    }
}

/// Accumulates one series per metric key across recorded epochs.
#[derive(Default)]
pub struct MetricsRecord {
    series: HashMap<String, Vec<f64>>,
}

impl MetricsRecord {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends one recorded epoch's values.
    pub fn record(&mut self, values: HashMap<String, f64>) {
        for (key, value) in values {
            self.series.entry(key).or_default().push(value);
        }
    }

    pub fn into_series(self) -> HashMap<String, Vec<f64>> {
        self.series
    }
}
