// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Interchangeable similarity representations over spike trains.
//!
//! The estimator accepts either an explicit feature map or a pairwise kernel;
//! the closed [`Similarity`] enum makes the two mutually exclusive by
//! construction. Auxiliary configuration (bandwidths, lags, …) belongs to the
//! implementing struct.

use ndarray::{Array1, Array2};

use crate::error::FitResult;

/// Maps a batch of spike masks `[time, trial]` to a feature set
/// `[feature, trial]`, one column per trial.
pub trait FeatureMap {
    fn features(&self, t: &Array1<f64>, spikes: &Array2<f64>) -> FitResult<Array2<f64>>;
}

/// Evaluates the pairwise similarity of two batches of spike masks, returning
/// the gramian `[rows_trial, cols_trial]`.
pub trait SpikeKernel {
    fn gramian(
        &self,
        t: &Array1<f64>,
        rows: &Array2<f64>,
        cols: &Array2<f64>,
    ) -> FitResult<Array2<f64>>;
}

/// The similarity representation chosen for a training run.
pub enum Similarity {
    /// Explicit feature maps; the surrogate works on feature means.
    Features(Box<dyn FeatureMap>),
    /// Pairwise kernel; the surrogate works on gramian statistics.
    Kernel(Box<dyn SpikeKernel>),
}

impl Similarity {
    /// Wraps a feature map.
    pub fn features<F: FeatureMap + 'static>(map: F) -> Self {
        Similarity::Features(Box::new(map))
    }

    /// Wraps a pairwise kernel.
    pub fn kernel<K: SpikeKernel + 'static>(kernel: K) -> Self {
        Similarity::Kernel(Box::new(kernel))
    }
}

impl core::fmt::Debug for Similarity {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Similarity::Features(_) => write!(f, "Similarity::Features"),
            Similarity::Kernel(_) => write!(f, "Similarity::Kernel"),
        }
    }
}
