// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Score-function surrogates for the squared maximum mean discrepancy.
//!
//! Every estimator variant is linear in the per-trial log-probabilities of
//! the simulated batch, so each builder returns the coefficient vector `c`
//! and the loss becomes `lam_mmd * (c · log_proba)` through
//! [`crate::ops::weighted_sum`]. The gradient of that scalar equals, in
//! expectation, the gradient of the true MMD² between the simulated and data
//! spike-train distributions.
//!
//! Unbiased variants divide the simulated-pair term by
//! `n_batch (n_batch - 1)`, the per-epoch minibatch size, also when the
//! history buffer concatenates several minibatches. A minibatch of one trial
//! therefore divides by zero and floods the loss with non-finite values; the
//! caller owns that contract.

use ndarray::{Array1, Array2, Axis};

/// Zeroes the diagonal of a square gramian in place, removing self-pairs for
/// the unbiased estimators.
pub fn zero_diagonal(gramian: &mut Array2<f64>) {
    let n = gramian.nrows().min(gramian.ncols());
    for i in 0..n {
        gramian[[i, i]] = 0.0;
    }
}

/// Scales the feature columns of the concatenated simulated batch by the
/// discount weight of the minibatch each column came from. `entry_weights`
/// is in insertion order (oldest first) and every minibatch spans `n_batch`
/// columns.
pub fn discount_columns(phi: &mut Array2<f64>, entry_weights: &[f64], n_batch: usize) {
    debug_assert_eq!(phi.ncols(), entry_weights.len() * n_batch);
    for (index, weight) in entry_weights.iter().enumerate() {
        let start = index * n_batch;
        for mut column in phi
            .slice_mut(ndarray::s![.., start..start + n_batch])
            .axis_iter_mut(Axis(1))
        {
            column.mapv_inplace(|v| v * weight);
        }
    }
}

/// Unbiased feature-map surrogate coefficients:
/// `c_j = 2 φ_j·(Σφ - φ_j) / (n_b (n_b - 1)) - 2 φ_j·Σφ_d / (n_d n_b)`.
/// Self-pairs are excluded from the simulated sum.
pub fn feature_unbiased(phi_fr: &Array2<f64>, phi_d: &Array2<f64>, n_batch: usize) -> Array1<f64> {
    let n_total = phi_fr.ncols();
    let n_d = phi_d.ncols();
    let sum_fr = phi_fr.sum_axis(Axis(1));
    let sum_d = phi_d.sum_axis(Axis(1));
    let pair_norm = (n_batch * n_batch.saturating_sub(1)) as f64;
    let cross_norm = (n_d * n_batch) as f64;
    let mut coeffs = Array1::<f64>::zeros(n_total);
    for j in 0..n_total {
        let column = phi_fr.index_axis(Axis(1), j);
        let mut pair = 0.0;
        let mut cross = 0.0;
        for (f, &value) in column.iter().enumerate() {
            pair += value * (sum_fr[[f]] - value);
            cross += value * sum_d[[f]];
        }
        coeffs[[j]] = 2.0 * pair / pair_norm - 2.0 * cross / cross_norm;
    }
    coeffs
}

/// Biased feature-map surrogate coefficients, re-derived from the biased
/// V-statistic `MMD² = ‖mean φ_d - mean φ_fr‖²`:
/// `c_j = -(2 / n_total) φ_j·(mean φ_d - mean φ_fr)`.
pub fn feature_biased(phi_fr: &Array2<f64>, phi_d: &Array2<f64>) -> Array1<f64> {
    let n_total = phi_fr.ncols();
    let mean_fr = phi_fr.sum_axis(Axis(1)) / n_total as f64;
    let mean_d = phi_d.sum_axis(Axis(1)) / phi_d.ncols() as f64;
    let delta = &mean_d - &mean_fr;
    let mut coeffs = Array1::<f64>::zeros(n_total);
    for j in 0..n_total {
        let column = phi_fr.index_axis(Axis(1), j);
        let dot: f64 = column.iter().zip(delta.iter()).map(|(a, b)| a * b).sum();
        coeffs[[j]] = -2.0 * dot / n_total as f64;
    }
    coeffs
}

/// Unbiased kernel surrogate coefficients. `g_ff` must have its diagonal
/// zeroed (see [`zero_diagonal`]); `g_df` is the data-by-simulated gramian.
pub fn kernel_unbiased(g_ff: &Array2<f64>, g_df: &Array2<f64>, n_batch: usize) -> Array1<f64> {
    let n_total = g_ff.nrows();
    let n_d = g_df.nrows();
    let pair_norm = (n_batch * n_batch.saturating_sub(1)) as f64;
    let cross_norm = (n_d * n_total) as f64;
    let row_sums = g_ff.sum_axis(Axis(1));
    let col_sums = g_df.sum_axis(Axis(0));
    let mut coeffs = Array1::<f64>::zeros(n_total);
    for j in 0..n_total {
        coeffs[[j]] = 2.0 * row_sums[[j]] / pair_norm - 2.0 * col_sums[[j]] / cross_norm;
    }
    coeffs
}

/// Biased kernel surrogate coefficients; self-pairs stay in.
pub fn kernel_biased(g_ff: &Array2<f64>, g_df: &Array2<f64>) -> Array1<f64> {
    let n_total = g_ff.nrows();
    let n_d = g_df.nrows();
    let pair_norm = (n_total * n_total) as f64;
    let cross_norm = (n_d * n_total) as f64;
    let row_sums = g_ff.sum_axis(Axis(1));
    let col_sums_ff = g_ff.sum_axis(Axis(0));
    let col_sums_df = g_df.sum_axis(Axis(0));
    let mut coeffs = Array1::<f64>::zeros(n_total);
    for j in 0..n_total {
        coeffs[[j]] = (row_sums[[j]] + col_sums_ff[[j]]) / pair_norm
            - 2.0 * col_sums_df[[j]] / cross_norm;
    }
    coeffs
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr2;

    #[test]
    fn kernel_unbiased_matches_the_pairwise_expansion() {
        // Direct evaluation of
        //   2 Σ_i lp_i Σ_j G_ij / (n_b (n_b - 1)) - 2 mean(lp_j G_dj)
        // against the coefficient form c · lp.
        let mut g_ff = arr2(&[[1.0, 0.5, 0.2], [0.5, 2.0, 0.3], [0.2, 0.3, 1.5]]);
        let g_df = arr2(&[[0.4, 0.6, 0.1], [0.7, 0.2, 0.9]]);
        let lp = [0.3, -1.2, 0.8];
        let n_batch = 3;

        zero_diagonal(&mut g_ff);
        let coeffs = kernel_unbiased(&g_ff, &g_df, n_batch);
        let via_coeffs: f64 = coeffs.iter().zip(lp.iter()).map(|(c, l)| c * l).sum();

        let mut pair = 0.0;
        for i in 0..3 {
            for j in 0..3 {
                pair += lp[i] * g_ff[[i, j]];
            }
        }
        let mut cross = 0.0;
        for d in 0..2 {
            for j in 0..3 {
                cross += lp[j] * g_df[[d, j]];
            }
        }
        let direct = 2.0 * pair / (n_batch * (n_batch - 1)) as f64 - 2.0 * cross / 6.0;
        assert!((via_coeffs - direct).abs() < 1e-12);
    }

    #[test]
    fn kernel_biased_keeps_self_pairs() {
        let g_ff = arr2(&[[1.0, 0.5], [0.5, 2.0]]);
        let g_df = arr2(&[[0.4, 0.6]]);
        let lp = [1.0, -1.0];

        let coeffs = kernel_biased(&g_ff, &g_df);
        let via_coeffs: f64 = coeffs.iter().zip(lp.iter()).map(|(c, l)| c * l).sum();

        // mean((lp_i + lp_j) G_ij) - 2 mean(lp_j G_dj)
        let mut pair = 0.0;
        for i in 0..2 {
            for j in 0..2 {
                pair += (lp[i] + lp[j]) * g_ff[[i, j]];
            }
        }
        let mut cross = 0.0;
        for j in 0..2 {
            cross += lp[j] * g_df[[0, j]];
        }
        let direct = pair / 4.0 - 2.0 * cross / 2.0;
        assert!((via_coeffs - direct).abs() < 1e-12);
    }

    #[test]
    fn feature_unbiased_excludes_self_pairs() {
        let phi_fr = arr2(&[[1.0, 0.0], [0.0, 1.0]]);
        let phi_d = arr2(&[[1.0], [0.0]]);
        let coeffs = feature_unbiased(&phi_fr, &phi_d, 2);
        // Column 0: pair term 2·(φ_0·(Σφ - φ_0)) / 2 = 0 (orthogonal
        // columns), cross term 2·(φ_0·φ_d) / 2 = 1.
        assert!((coeffs[[0]] - (0.0 - 1.0)).abs() < 1e-12);
        // Column 1: both dot products vanish.
        assert!((coeffs[[1]] - 0.0).abs() < 1e-12);
    }

    #[test]
    fn feature_biased_points_along_the_mean_gap() {
        let phi_fr = arr2(&[[0.0, 0.0], [1.0, 1.0]]);
        let phi_d = arr2(&[[1.0, 1.0], [0.0, 0.0]]);
        let coeffs = feature_biased(&phi_fr, &phi_d);
        // delta = (1, -1); each column dots to -1; c = -(2/2)(-1) = 1.
        assert!((coeffs[[0]] - 1.0).abs() < 1e-12);
        assert!((coeffs[[1]] - 1.0).abs() < 1e-12);
    }

    #[test]
    fn identical_populations_cancel_the_unbiased_kernel_coefficients() {
        // Two identical data trials and four identical simulated trials with
        // a dot-product kernel: the pair and cross terms cancel exactly.
        let q = 3.0;
        let mut g_ff = Array2::from_elem((4, 4), q);
        let g_df = Array2::from_elem((2, 4), q);
        zero_diagonal(&mut g_ff);
        let coeffs = kernel_unbiased(&g_ff, &g_df, 4);
        for j in 0..4 {
            assert!(coeffs[[j]].abs() < 1e-12);
        }
    }

    #[test]
    fn discount_scales_whole_minibatch_blocks() {
        let mut phi = arr2(&[[1.0, 1.0, 1.0, 1.0], [2.0, 2.0, 2.0, 2.0]]);
        discount_columns(&mut phi, &[0.5, 1.0], 2);
        assert_eq!(phi[[0, 0]], 0.5);
        assert_eq!(phi[[0, 1]], 0.5);
        assert_eq!(phi[[0, 2]], 1.0);
        assert_eq!(phi[[1, 3]], 2.0);
    }

    #[test]
    fn degenerate_single_trial_batch_floods_with_non_finite_values() {
        let mut g_ff = Array2::from_elem((1, 1), 1.0);
        let g_df = Array2::from_elem((1, 1), 1.0);
        zero_diagonal(&mut g_ff);
        let coeffs = kernel_unbiased(&g_ff, &g_df, 1);
        assert!(!coeffs[[0]].is_finite() || coeffs[[0]].is_nan());
    }
}
