// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Detached rate, likelihood, and score computations.
//!
//! These run outside the autodiff graph. The tracked counterparts used by the
//! training loss live in [`crate::ops`]; the closed-form score here exists
//! only to build control variates and must never feed the loss directly.

use ndarray::{Array1, Array2, Array3};

use crate::nonlinearity::Nonlinearity;

/// Conditional intensity `r[t, k]` for a design tensor and flat parameters.
pub fn conditional_intensity(
    x: &Array3<f64>,
    theta: &Array1<f64>,
    nonlinearity: Nonlinearity,
) -> Array2<f64> {
    let (n_time, n_trials, n_basis) = x.dim();
    let mut rate = Array2::<f64>::zeros((n_time, n_trials));
    for t in 0..n_time {
        for k in 0..n_trials {
            let mut u = 0.0;
            for a in 0..n_basis {
                u += x[[t, k, a]] * theta[[a]];
            }
            rate[[t, k]] = nonlinearity.eval(u);
        }
    }
    rate
}

/// Negative log-likelihood of an observed spike mask under the discretised
/// point-process model, summed over bins and trials.
pub fn neg_log_likelihood(
    dt: f64,
    mask: &Array2<f64>,
    x: &Array3<f64>,
    theta: &Array1<f64>,
    nonlinearity: Nonlinearity,
) -> f64 {
    let rate = conditional_intensity(x, theta, nonlinearity);
    let (n_time, n_trials) = mask.dim();
    let mut acc = 0.0;
    for t in 0..n_time {
        for k in 0..n_trials {
            let r = rate[[t, k]];
            let m = mask[[t, k]];
            acc += (1.0 - (-dt * r).exp()).ln() * m - dt * r * (1.0 - m);
        }
    }
    -acc
}

/// Closed-form score of the per-trial log-likelihood with respect to each
/// parameter:
/// `score[k, a] = dt Σ_t x[t,k,a] r/(exp(r dt) - 1) m - dt Σ_t x[t,k,a] r (1 - m)`.
pub fn score(
    dt: f64,
    mask: &Array2<f64>,
    x: &Array3<f64>,
    theta: &Array1<f64>,
    nonlinearity: Nonlinearity,
) -> Array2<f64> {
    let rate = conditional_intensity(x, theta, nonlinearity);
    let (n_time, n_trials, n_basis) = x.dim();
    let mut scores = Array2::<f64>::zeros((n_trials, n_basis));
    for k in 0..n_trials {
        for t in 0..n_time {
            let r = rate[[t, k]];
            let m = mask[[t, k]];
            // exp_m1 keeps r/(exp(r dt) - 1) well conditioned near r = 0.
            let spiking = if m > 0.0 {
                dt * r / (r * dt).exp_m1()
            } else {
                0.0
            };
            let weight = spiking * m - dt * r * (1.0 - m);
            for a in 0..n_basis {
                scores[[k, a]] += x[[t, k, a]] * weight;
            }
        }
    }
    scores
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, Array3};

    fn toy_design(n_time: usize, n_trials: usize, n_basis: usize) -> Array3<f64> {
        Array3::from_shape_fn((n_time, n_trials, n_basis), |(t, k, a)| {
            (0.4 * t as f64 - 0.2 * k as f64 + 0.9 * a as f64).cos() * 0.4
        })
    }

    #[test]
    fn silent_trials_reduce_to_integrated_rate() {
        let x = Array3::<f64>::zeros((6, 2, 1));
        let theta = arr1(&[0.0]);
        // exp(0) = 1 everywhere, no spikes: NLL = dt * sum(r) = 6 * 2.
        let mask = Array2::<f64>::zeros((6, 2));
        let nll = neg_log_likelihood(1.0, &mask, &x, &theta, Nonlinearity::Exp);
        assert!((nll - 12.0).abs() < 1e-12);
    }

    #[test]
    fn score_matches_per_trial_log_likelihood_gradient() {
        let dt = 0.4;
        let x = toy_design(8, 3, 2);
        let theta = arr1(&[0.3, -0.5]);
        let mask =
            Array2::from_shape_fn((8, 3), |(t, k)| ((t + k) % 4 == 0) as u8 as f64);

        let per_trial_ll = |theta: &Array1<f64>, trial: usize| -> f64 {
            let rate = conditional_intensity(&x, theta, Nonlinearity::Exp);
            let mut acc = 0.0;
            for t in 0..8 {
                let r = rate[[t, trial]];
                let m = mask[[t, trial]];
                acc += (1.0 - (-dt * r).exp()).ln() * m - dt * r * (1.0 - m);
            }
            acc
        };

        let scores = score(dt, &mask, &x, &theta, Nonlinearity::Exp);
        let h = 1e-6;
        for k in 0..3 {
            for a in 0..2 {
                let mut plus = theta.clone();
                plus[[a]] += h;
                let mut minus = theta.clone();
                minus[[a]] -= h;
                let numeric = (per_trial_ll(&plus, k) - per_trial_ll(&minus, k)) / (2.0 * h);
                assert!(
                    (scores[[k, a]] - numeric).abs() < 1e-5,
                    "trial {k} basis {a}: {} vs {numeric}",
                    scores[[k, a]]
                );
            }
        }
    }

    #[test]
    fn intensity_is_positive_for_both_links() {
        let x = toy_design(5, 2, 2);
        let theta = arr1(&[-3.0, 2.0]);
        for nl in [Nonlinearity::Exp, Nonlinearity::LogExp] {
            let rate = conditional_intensity(&x, &theta, nl);
            assert!(rate.iter().all(|&r| r > 0.0));
        }
    }
}
