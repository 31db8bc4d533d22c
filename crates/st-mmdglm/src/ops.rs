// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Differentiable operators for the spike-train fitting pipeline.
//!
//! Each operator computes its forward value eagerly and, when a parent
//! requires gradients, attaches an inline [`BackwardNode`] that owns whatever
//! forward state the reverse map needs. Saved state lives as long as the
//! output tensor does, which is what allows history entries to be swept by
//! reverse passes in later epochs.

use ndarray::{Array1, Array2, Array3, ArrayD};

use crate::autograd::{BackwardNode, GradFn};
use crate::error::{FitError, FitResult};
use crate::nonlinearity::Nonlinearity;
use crate::tensor::Tensor;

/// Additive guard inside `log(1 - exp(-dt r))` for the surrogate path. Keeps
/// the per-trial log-probability finite at vanishing rates at the cost of a
/// small bias there.
pub const LOG_EPS: f64 = 1e-24;

fn expect_rank(label: &'static str, tensor: &Tensor, rank: usize) -> FitResult<()> {
    if tensor.ndim() != rank {
        return Err(FitError::RankMismatch {
            label,
            expected: rank,
            got: tensor.ndim(),
        });
    }
    Ok(())
}

/// Concatenates 1-D tensors into a single vector. Used both to assemble the
/// flat parameter vector from its block leaves and to join per-minibatch
/// log-probability vectors along the trial axis.
pub fn concat1d(parts: &[Tensor]) -> FitResult<Tensor> {
    if parts.is_empty() {
        return Err(FitError::EmptyInput("concat1d parts"));
    }
    let mut data = Vec::new();
    for part in parts {
        expect_rank("concat1d operand", part, 1)?;
        data.extend(part.data().iter().copied());
    }
    let out = Tensor::from_vec(data);
    if parts.iter().any(Tensor::requires_grad_flag) {
        struct Node {
            parts: Vec<Tensor>,
        }
        impl BackwardNode for Node {
            fn name(&self) -> &'static str {
                "concat1d"
            }
            fn parents(&self) -> Vec<Tensor> {
                self.parts.clone()
            }
            fn backward(&self, grad_out: &ArrayD<f64>) -> Vec<Option<ArrayD<f64>>> {
                let flat: Vec<f64> = grad_out.iter().copied().collect();
                let mut grads = Vec::with_capacity(self.parts.len());
                let mut offset = 0;
                for part in &self.parts {
                    let len = part.len();
                    let slice = flat[offset..offset + len].to_vec();
                    offset += len;
                    grads.push(Some(Array1::from_vec(slice).into_dyn()));
                }
                grads
            }
        }
        out.attach_grad_fn(GradFn::new(Node {
            parts: parts.to_vec(),
        }));
    }
    Ok(out)
}

/// Contracts the design tensor `x[t, k, a]` with the flat parameter vector,
/// producing the linear response `u[t, k]`.
pub fn basis_response(x: &Array3<f64>, theta: &Tensor) -> FitResult<Tensor> {
    expect_rank("basis_response theta", theta, 1)?;
    let (n_time, n_trials, n_basis) = x.dim();
    if theta.len() != n_basis {
        return Err(FitError::ShapeMismatch {
            left: x.shape().to_vec(),
            right: theta.shape(),
        });
    }
    let theta_v = theta.data();
    let mut u = Array2::<f64>::zeros((n_time, n_trials));
    for t in 0..n_time {
        for k in 0..n_trials {
            let mut acc = 0.0;
            for a in 0..n_basis {
                acc += x[[t, k, a]] * theta_v[[a]];
            }
            u[[t, k]] = acc;
        }
    }
    let out = Tensor::from_array(u.into_dyn());
    if theta.requires_grad_flag() {
        struct Node {
            x: Array3<f64>,
            theta: Tensor,
        }
        impl BackwardNode for Node {
            fn name(&self) -> &'static str {
                "basis_response"
            }
            fn parents(&self) -> Vec<Tensor> {
                vec![self.theta.clone()]
            }
            fn backward(&self, grad_out: &ArrayD<f64>) -> Vec<Option<ArrayD<f64>>> {
                let (n_time, n_trials, n_basis) = self.x.dim();
                let mut g_theta = Array1::<f64>::zeros(n_basis);
                for t in 0..n_time {
                    for k in 0..n_trials {
                        let go = grad_out[[t, k]];
                        if go == 0.0 {
                            continue;
                        }
                        for a in 0..n_basis {
                            g_theta[[a]] += go * self.x[[t, k, a]];
                        }
                    }
                }
                vec![Some(g_theta.into_dyn())]
            }
        }
        out.attach_grad_fn(GradFn::new(Node {
            x: x.clone(),
            theta: theta.clone(),
        }));
    }
    Ok(out)
}

/// Applies the link nonlinearity elementwise, mapping the linear response
/// onto a strictly positive conditional intensity.
pub fn intensity(u: &Tensor, nonlinearity: Nonlinearity) -> FitResult<Tensor> {
    let data = u.data();
    let out = Tensor::from_array(nonlinearity.map(&data));
    if u.requires_grad_flag() {
        struct Node {
            u: Tensor,
            nonlinearity: Nonlinearity,
        }
        impl BackwardNode for Node {
            fn name(&self) -> &'static str {
                "intensity"
            }
            fn parents(&self) -> Vec<Tensor> {
                vec![self.u.clone()]
            }
            fn backward(&self, grad_out: &ArrayD<f64>) -> Vec<Option<ArrayD<f64>>> {
                let deriv = self.nonlinearity.deriv_map(&self.u.data());
                vec![Some(grad_out * &deriv)]
            }
        }
        out.attach_grad_fn(GradFn::new(Node {
            u: u.clone(),
            nonlinearity,
        }));
    }
    Ok(out)
}

/// Per-trial log-probability of a simulated spike mask under the discretised
/// point-process model:
/// `lp[k] = Σ_t log(1 - exp(-dt r) + ε) m - dt Σ_t r (1 - m)`.
///
/// The epsilon keeps the value finite at vanishing rates; this vector is the
/// REINFORCE weight that routes gradient through the sampling step.
pub fn log_proba(rate: &Tensor, mask: &Array2<f64>, dt: f64) -> FitResult<Tensor> {
    expect_rank("log_proba rate", rate, 2)?;
    if rate.shape() != mask.shape() {
        return Err(FitError::ShapeMismatch {
            left: rate.shape(),
            right: mask.shape().to_vec(),
        });
    }
    let r = rate.data();
    let (n_time, n_trials) = mask.dim();
    let mut lp = Array1::<f64>::zeros(n_trials);
    for k in 0..n_trials {
        let mut acc = 0.0;
        for t in 0..n_time {
            let rv = r[[t, k]];
            let m = mask[[t, k]];
            acc += (1.0 - (-dt * rv).exp() + LOG_EPS).ln() * m - dt * rv * (1.0 - m);
        }
        lp[[k]] = acc;
    }
    let out = Tensor::from_array(lp.into_dyn());
    if rate.requires_grad_flag() {
        struct Node {
            rate: Tensor,
            mask: Array2<f64>,
            dt: f64,
        }
        impl BackwardNode for Node {
            fn name(&self) -> &'static str {
                "log_proba"
            }
            fn parents(&self) -> Vec<Tensor> {
                vec![self.rate.clone()]
            }
            fn backward(&self, grad_out: &ArrayD<f64>) -> Vec<Option<ArrayD<f64>>> {
                let r = self.rate.data();
                let (n_time, n_trials) = self.mask.dim();
                let mut g = Array2::<f64>::zeros((n_time, n_trials));
                for k in 0..n_trials {
                    let go = grad_out[[k]];
                    if go == 0.0 {
                        continue;
                    }
                    for t in 0..n_time {
                        let rv = r[[t, k]];
                        let m = self.mask[[t, k]];
                        let decay = (-self.dt * rv).exp();
                        let spiking = m * self.dt * decay / (1.0 - decay + LOG_EPS);
                        g[[t, k]] = go * (spiking - self.dt * (1.0 - m));
                    }
                }
                vec![Some(g.into_dyn())]
            }
        }
        out.attach_grad_fn(GradFn::new(Node {
            rate: rate.clone(),
            mask: mask.clone(),
            dt,
        }));
    }
    Ok(out)
}

/// Negative log-likelihood of observed spikes, summed over all bins and
/// trials:
/// `-(Σ log(1 - exp(-dt r)) m - dt Σ r (1 - m))`.
///
/// Unlike [`log_proba`] this term carries no epsilon; a vanishing rate under
/// an observed spike legitimately drives the loss to infinity.
pub fn spike_nll(rate: &Tensor, mask: &Array2<f64>, dt: f64) -> FitResult<Tensor> {
    expect_rank("spike_nll rate", rate, 2)?;
    if rate.shape() != mask.shape() {
        return Err(FitError::ShapeMismatch {
            left: rate.shape(),
            right: mask.shape().to_vec(),
        });
    }
    let r = rate.data();
    let (n_time, n_trials) = mask.dim();
    let mut acc = 0.0;
    for t in 0..n_time {
        for k in 0..n_trials {
            let rv = r[[t, k]];
            let m = mask[[t, k]];
            acc += (1.0 - (-dt * rv).exp()).ln() * m - dt * rv * (1.0 - m);
        }
    }
    let out = Tensor::from_array(ndarray::arr0(-acc).into_dyn());
    if rate.requires_grad_flag() {
        struct Node {
            rate: Tensor,
            mask: Array2<f64>,
            dt: f64,
        }
        impl BackwardNode for Node {
            fn name(&self) -> &'static str {
                "spike_nll"
            }
            fn parents(&self) -> Vec<Tensor> {
                vec![self.rate.clone()]
            }
            fn backward(&self, grad_out: &ArrayD<f64>) -> Vec<Option<ArrayD<f64>>> {
                let go = grad_out.iter().next().copied().unwrap_or(0.0);
                let r = self.rate.data();
                let (n_time, n_trials) = self.mask.dim();
                let mut g = Array2::<f64>::zeros((n_time, n_trials));
                for t in 0..n_time {
                    for k in 0..n_trials {
                        let rv = r[[t, k]];
                        let m = self.mask[[t, k]];
                        let decay = (-self.dt * rv).exp();
                        let spiking = m * self.dt * decay / (1.0 - decay);
                        g[[t, k]] = -go * (spiking - self.dt * (1.0 - m));
                    }
                }
                vec![Some(g.into_dyn())]
            }
        }
        out.attach_grad_fn(GradFn::new(Node {
            rate: rate.clone(),
            mask: mask.clone(),
            dt,
        }));
    }
    Ok(out)
}

/// Dot product of a tracked vector with a constant coefficient vector,
/// yielding a scalar. The MMD surrogate is linear in the per-trial
/// log-probabilities, so every estimator variant funnels through this op.
pub fn weighted_sum(values: &Tensor, coeffs: &Array1<f64>) -> FitResult<Tensor> {
    expect_rank("weighted_sum values", values, 1)?;
    if values.len() != coeffs.len() {
        return Err(FitError::ShapeMismatch {
            left: values.shape(),
            right: vec![coeffs.len()],
        });
    }
    let v = values.data();
    let total: f64 = v.iter().zip(coeffs.iter()).map(|(a, b)| a * b).sum();
    let out = Tensor::from_array(ndarray::arr0(total).into_dyn());
    if values.requires_grad_flag() {
        struct Node {
            values: Tensor,
            coeffs: Array1<f64>,
        }
        impl BackwardNode for Node {
            fn name(&self) -> &'static str {
                "weighted_sum"
            }
            fn parents(&self) -> Vec<Tensor> {
                vec![self.values.clone()]
            }
            fn backward(&self, grad_out: &ArrayD<f64>) -> Vec<Option<ArrayD<f64>>> {
                let go = grad_out.iter().next().copied().unwrap_or(0.0);
                vec![Some(self.coeffs.mapv(|c| c * go).into_dyn())]
            }
        }
        out.attach_grad_fn(GradFn::new(Node {
            values: values.clone(),
            coeffs: coeffs.clone(),
        }));
    }
    Ok(out)
}

/// Multiplies a tensor by a constant factor.
pub fn scale(x: &Tensor, factor: f64) -> FitResult<Tensor> {
    let out = Tensor::from_array(x.data().mapv(|v| v * factor));
    if x.requires_grad_flag() {
        struct Node {
            x: Tensor,
            factor: f64,
        }
        impl BackwardNode for Node {
            fn name(&self) -> &'static str {
                "scale"
            }
            fn parents(&self) -> Vec<Tensor> {
                vec![self.x.clone()]
            }
            fn backward(&self, grad_out: &ArrayD<f64>) -> Vec<Option<ArrayD<f64>>> {
                vec![Some(grad_out.mapv(|g| g * self.factor))]
            }
        }
        out.attach_grad_fn(GradFn::new(Node {
            x: x.clone(),
            factor,
        }));
    }
    Ok(out)
}

/// Elementwise sum of two tensors of identical shape.
pub fn add(a: &Tensor, b: &Tensor) -> FitResult<Tensor> {
    if a.shape() != b.shape() {
        return Err(FitError::ShapeMismatch {
            left: a.shape(),
            right: b.shape(),
        });
    }
    let out = Tensor::from_array(&a.data() + &b.data());
    if a.requires_grad_flag() || b.requires_grad_flag() {
        struct Node {
            a: Tensor,
            b: Tensor,
        }
        impl BackwardNode for Node {
            fn name(&self) -> &'static str {
                "add"
            }
            fn parents(&self) -> Vec<Tensor> {
                vec![self.a.clone(), self.b.clone()]
            }
            fn backward(&self, grad_out: &ArrayD<f64>) -> Vec<Option<ArrayD<f64>>> {
                vec![Some(grad_out.clone()), Some(grad_out.clone())]
            }
        }
        out.attach_grad_fn(GradFn::new(Node {
            a: a.clone(),
            b: b.clone(),
        }));
    }
    Ok(out)
}
