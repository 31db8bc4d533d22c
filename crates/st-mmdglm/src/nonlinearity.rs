// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use ndarray::ArrayD;
use serde::{Deserialize, Serialize};

/// Link nonlinearity mapping the linear response onto a positive conditional
/// intensity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Nonlinearity {
    /// `exp(u)`.
    Exp,
    /// `log(1 + exp(u))`, a softplus-shaped link.
    LogExp,
}

impl Nonlinearity {
    /// Evaluates the nonlinearity at a single point. The result is strictly
    /// positive for finite input.
    pub fn eval(self, u: f64) -> f64 {
        match self {
            Nonlinearity::Exp => u.exp(),
            Nonlinearity::LogExp => {
                if u > 30.0 {
                    u
                } else {
                    u.exp().ln_1p()
                }
            }
        }
    }

    /// First derivative at a single point.
    pub fn deriv(self, u: f64) -> f64 {
        match self {
            Nonlinearity::Exp => u.exp(),
            Nonlinearity::LogExp => 1.0 / (1.0 + (-u).exp()),
        }
    }

    /// Elementwise evaluation.
    pub fn map(self, u: &ArrayD<f64>) -> ArrayD<f64> {
        u.mapv(|v| self.eval(v))
    }

    /// Elementwise derivative.
    pub fn deriv_map(self, u: &ArrayD<f64>) -> ArrayD<f64> {
        u.mapv(|v| self.deriv(v))
    }
}
