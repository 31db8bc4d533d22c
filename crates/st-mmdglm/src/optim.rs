// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Gradient optimisers and learning-rate schedules.
//!
//! The training loop only ever talks to the [`Optimizer`] and [`LrScheduler`]
//! traits; `Adam` and `StepDecay` are the stock implementations.

use ndarray::ArrayD;

use crate::error::{FitError, FitResult};
use crate::model::MmdGlm;

/// Gradient-based parameter update rule driven by the training loop.
pub trait Optimizer {
    /// Clears the gradient accumulator of every parameter leaf.
    fn zero_grad(&mut self, model: &MmdGlm);
    /// Applies one update from the accumulated gradients.
    fn step(&mut self, model: &MmdGlm) -> FitResult<()>;
    /// Current learning rate.
    fn learning_rate(&self) -> f64;
    /// Overrides the learning rate, validating positivity.
    fn set_learning_rate(&mut self, learning_rate: f64) -> FitResult<()>;
}

/// Adam with bias-corrected first and second moments.
pub struct Adam {
    learning_rate: f64,
    beta1: f64,
    beta2: f64,
    eps: f64,
    step: u32,
    moments: Option<Vec<(ArrayD<f64>, ArrayD<f64>)>>,
}

impl Adam {
    /// Creates an Adam optimiser with the usual moment defaults.
    pub fn new(learning_rate: f64) -> FitResult<Self> {
        if learning_rate <= 0.0 || !learning_rate.is_finite() {
            return Err(FitError::NonPositiveLearningRate {
                rate: learning_rate,
            });
        }
        Ok(Self {
            learning_rate,
            beta1: 0.9,
            beta2: 0.999,
            eps: 1e-8,
            step: 0,
            moments: None,
        })
    }

    /// Overrides the moment decay factors.
    pub fn with_betas(mut self, beta1: f64, beta2: f64) -> Self {
        self.beta1 = beta1;
        self.beta2 = beta2;
        self
    }
}

impl Optimizer for Adam {
    fn zero_grad(&mut self, model: &MmdGlm) {
        model.zero_grad();
    }

    fn step(&mut self, model: &MmdGlm) -> FitResult<()> {
        let leaves = model.leaves();
        if self.moments.is_none() {
            self.moments = Some(
                leaves
                    .iter()
                    .map(|leaf| {
                        let shape = leaf.shape();
                        (
                            ArrayD::zeros(ndarray::IxDyn(&shape)),
                            ArrayD::zeros(ndarray::IxDyn(&shape)),
                        )
                    })
                    .collect(),
            );
        }
        self.step += 1;
        let (beta1, beta2, eps, lr) = (self.beta1, self.beta2, self.eps, self.learning_rate);
        let bc1 = 1.0 - beta1.powi(self.step as i32);
        let bc2 = 1.0 - beta2.powi(self.step as i32);
        let moments = self.moments.as_mut().expect("moment buffers initialised");
        for (leaf, (m, v)) in leaves.iter().zip(moments.iter_mut()) {
            let Some(grad) = leaf.grad() else { continue };
            let mut value = leaf.data();
            ndarray::Zip::from(&mut value)
                .and(m)
                .and(v)
                .and(&grad)
                .for_each(|value, m, v, &g| {
                    *m = beta1 * *m + (1.0 - beta1) * g;
                    *v = beta2 * *v + (1.0 - beta2) * g * g;
                    let m_hat = *m / bc1;
                    let v_hat = *v / bc2;
                    *value -= lr * m_hat / (v_hat.sqrt() + eps);
                });
            leaf.set_data(value);
        }
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, learning_rate: f64) -> FitResult<()> {
        if learning_rate <= 0.0 || !learning_rate.is_finite() {
            return Err(FitError::NonPositiveLearningRate {
                rate: learning_rate,
            });
        }
        self.learning_rate = learning_rate;
        Ok(())
    }
}

/// Plain gradient descent; mostly useful in tests where an exactly
/// predictable update matters.
pub struct GradientDescent {
    learning_rate: f64,
}

impl GradientDescent {
    pub fn new(learning_rate: f64) -> FitResult<Self> {
        if learning_rate <= 0.0 || !learning_rate.is_finite() {
            return Err(FitError::NonPositiveLearningRate {
                rate: learning_rate,
            });
        }
        Ok(Self { learning_rate })
    }
}

impl Optimizer for GradientDescent {
    fn zero_grad(&mut self, model: &MmdGlm) {
        model.zero_grad();
    }

    fn step(&mut self, model: &MmdGlm) -> FitResult<()> {
        for leaf in model.leaves() {
            let Some(grad) = leaf.grad() else { continue };
            let value = leaf.data() - grad.mapv(|g| g * self.learning_rate);
            leaf.set_data(value);
        }
        Ok(())
    }

    fn learning_rate(&self) -> f64 {
        self.learning_rate
    }

    fn set_learning_rate(&mut self, learning_rate: f64) -> FitResult<()> {
        if learning_rate <= 0.0 || !learning_rate.is_finite() {
            return Err(FitError::NonPositiveLearningRate {
                rate: learning_rate,
            });
        }
        self.learning_rate = learning_rate;
        Ok(())
    }
}

/// Learning-rate schedule advanced once per epoch after the optimiser step.
pub trait LrScheduler {
    /// Advances the schedule, returning the new learning rate.
    fn step(&mut self) -> f64;
    /// The most recent learning rate produced by [`step`](LrScheduler::step).
    fn current_lr(&self) -> f64;
    /// Resets the schedule to its initial state.
    fn reset(&mut self);
}

/// Multiplies the learning rate by `gamma` every `step_size` epochs.
#[derive(Debug, Clone)]
pub struct StepDecay {
    base_lr: f64,
    gamma: f64,
    step_size: u32,
    step: u32,
    last_lr: f64,
}

impl StepDecay {
    pub fn new(base_lr: f64, gamma: f64, step_size: u32) -> FitResult<Self> {
        if base_lr <= 0.0 || !base_lr.is_finite() {
            return Err(FitError::NonPositiveLearningRate { rate: base_lr });
        }
        if step_size == 0 {
            return Err(FitError::EmptyInput("scheduler step size"));
        }
        Ok(Self {
            base_lr,
            gamma,
            step_size,
            step: 0,
            last_lr: base_lr,
        })
    }
}

impl LrScheduler for StepDecay {
    fn step(&mut self) -> f64 {
        self.step = self.step.saturating_add(1);
        self.last_lr = self.base_lr * self.gamma.powi((self.step / self.step_size) as i32);
        self.last_lr
    }

    fn current_lr(&self) -> f64 {
        self.last_lr
    }

    fn reset(&mut self) {
        self.step = 0;
        self.last_lr = self.base_lr;
    }
}
