// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Spiking point-process GLM parameterised by a bias and two basis
//! expansions.

use ndarray::{Array1, ArrayView1};

use crate::error::FitResult;
use crate::nonlinearity::Nonlinearity;
use crate::ops;
use crate::tensor::Tensor;

/// Generative model state: a bias term plus optional stimulus (`kappa`) and
/// spike-history (`eta`) coefficient blocks.
///
/// The blocks are gradient leaves for the training loop; `theta` is the flat
/// detached copy handed to the external sampler and the score estimator. The
/// two views are reconciled once per epoch by [`MmdGlm::sync_params`].
pub struct MmdGlm {
    bias: Tensor,
    kappa_coefs: Option<Tensor>,
    eta_coefs: Option<Tensor>,
    theta: Array1<f64>,
    nonlinearity: Nonlinearity,
}

impl MmdGlm {
    /// Creates a model from an initial bias and optional basis coefficients.
    pub fn new(
        u0: f64,
        kappa: Option<Array1<f64>>,
        eta: Option<Array1<f64>>,
        nonlinearity: Nonlinearity,
    ) -> Self {
        let bias = Tensor::from_vec(vec![u0]).requires_grad(true);
        let kappa_coefs = kappa.map(|c| Tensor::from_vec(c.to_vec()).requires_grad(true));
        let eta_coefs = eta.map(|c| Tensor::from_vec(c.to_vec()).requires_grad(true));
        let mut model = Self {
            bias,
            kappa_coefs,
            eta_coefs,
            theta: Array1::zeros(0),
            nonlinearity,
        };
        model.sync_params();
        model
    }

    pub fn nonlinearity(&self) -> Nonlinearity {
        self.nonlinearity
    }

    pub fn n_kappa(&self) -> usize {
        self.kappa_coefs.as_ref().map_or(0, Tensor::len)
    }

    pub fn n_eta(&self) -> usize {
        self.eta_coefs.as_ref().map_or(0, Tensor::len)
    }

    /// Total parameter count: `1 + n_kappa + n_eta`.
    pub fn n_params(&self) -> usize {
        1 + self.n_kappa() + self.n_eta()
    }

    /// Gradient leaves in flat-vector order.
    pub fn leaves(&self) -> Vec<Tensor> {
        let mut leaves = vec![self.bias.clone()];
        if let Some(kappa) = &self.kappa_coefs {
            leaves.push(kappa.clone());
        }
        if let Some(eta) = &self.eta_coefs {
            leaves.push(eta.clone());
        }
        leaves
    }

    /// Assembles the flat parameter vector `[bias, kappa.., eta..]` from the
    /// leaf storages. Pure.
    pub fn params(&self) -> Array1<f64> {
        let mut values = Vec::with_capacity(self.n_params());
        for leaf in self.leaves() {
            values.extend(leaf.data().iter().copied());
        }
        Array1::from_vec(values)
    }

    /// Overwrites every parameter block from a flat vector.
    ///
    /// # Panics
    ///
    /// Panics when `values.len() != 1 + n_kappa + n_eta`; a mismatched vector
    /// is a broken caller contract, not a recoverable state.
    pub fn set_params(&mut self, values: ArrayView1<'_, f64>) {
        assert_eq!(
            values.len(),
            self.n_params(),
            "parameter vector length must equal 1 + n_kappa + n_eta"
        );
        let mut offset = 0;
        for leaf in self.leaves() {
            let len = leaf.len();
            let block = values.slice(ndarray::s![offset..offset + len]).to_owned();
            leaf.set_data(block.into_dyn());
            offset += len;
        }
        self.theta = values.to_owned();
    }

    /// Copies the leaf values into the detached flat vector used by the
    /// sampler and the score estimator. Called after every optimizer step.
    pub fn sync_params(&mut self) {
        self.theta = self.params();
    }

    /// Detached flat parameter vector as last synchronised.
    pub fn theta(&self) -> &Array1<f64> {
        &self.theta
    }

    /// Flat parameter vector with graph tracking, for the differentiable
    /// rate pipeline.
    pub fn params_tracked(&self) -> FitResult<Tensor> {
        ops::concat1d(&self.leaves())
    }

    /// Clears the gradient accumulator of every leaf.
    pub fn zero_grad(&self) {
        for leaf in self.leaves() {
            leaf.zero_grad();
        }
    }

    /// Flat gradient vector, or `None` when no leaf has accumulated one.
    pub fn grad_vector(&self) -> Option<Array1<f64>> {
        let leaves = self.leaves();
        if leaves.iter().all(|leaf| leaf.grad().is_none()) {
            return None;
        }
        let mut values = Vec::with_capacity(self.n_params());
        for leaf in leaves {
            match leaf.grad() {
                Some(grad) => values.extend(grad.iter().copied()),
                None => values.extend(std::iter::repeat(0.0).take(leaf.len())),
            }
        }
        Some(Array1::from_vec(values))
    }

    /// Adds a flat update directly into the leaf gradient accumulators,
    /// bypassing the reverse pass. This is the injection channel for the
    /// control-variate correction.
    pub fn accumulate_gradients(&self, update: ArrayView1<'_, f64>) {
        assert_eq!(
            update.len(),
            self.n_params(),
            "gradient update length must equal 1 + n_kappa + n_eta"
        );
        let mut offset = 0;
        for leaf in self.leaves() {
            let len = leaf.len();
            let block = update.slice(ndarray::s![offset..offset + len]).to_owned();
            leaf.accumulate_grad(&block.into_dyn());
            offset += len;
        }
    }

    /// Clamps every leaf gradient component to `[-limit, limit]`.
    pub fn clip_gradients(&self, limit: f64) {
        for leaf in self.leaves() {
            leaf.clip_grad(limit);
        }
    }
}

impl core::fmt::Debug for MmdGlm {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(
            f,
            "MmdGlm(n_kappa={},n_eta={},nonlinearity={:?})",
            self.n_kappa(),
            self.n_eta(),
            self.nonlinearity
        )
    }
}
