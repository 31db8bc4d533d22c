// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! External forward-sampler interface.

use ndarray::{Array1, Array2};

use crate::error::FitResult;
use crate::model::MmdGlm;

/// Draws simulated spike trains conditioned on the model's current (synced)
/// parameter vector.
///
/// The sampling step is not differentiable; the training loop recomputes the
/// design matrix and rate of the returned mask through the tracked pipeline,
/// and gradients flow through that recomputation only. The returned mask must
/// be `[time, n_trials]` with entries in `{0, 1}`.
pub trait Sampler {
    fn sample(
        &mut self,
        model: &MmdGlm,
        t: &Array1<f64>,
        stim: Option<&Array2<f64>>,
        n_trials: usize,
    ) -> FitResult<Array2<f64>>;
}
