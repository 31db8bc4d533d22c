//! MMD-driven fitting of spiking point-process GLMs.
//!
//! This crate trains a generative spike-train model by minimising a
//! maximum-mean-discrepancy surrogate between simulated and observed spike
//! distributions. Sampling is not differentiable, so the loss routes
//! gradient through a score-function (REINFORCE) weight: the per-trial
//! log-probability of each simulated train under the current parameters. A
//! bounded "forgetting" buffer lets every epoch reuse several recent
//! simulated minibatches with geometric age discounting, and an optional
//! control-variate correction cuts the variance of the resulting gradient
//! estimates.
//!
//! The sampler, design-matrix builder, similarity functions, optimiser, and
//! metrics callback are injected through traits; the crate owns the training
//! loop, the estimators, and a small retained-graph reverse-mode engine they
//! run on.

pub mod autograd;
pub mod control;
pub mod design;
pub mod error;
pub mod history;
pub mod likelihood;
pub mod metrics;
pub mod mmd;
pub mod model;
pub mod nonlinearity;
pub mod ops;
pub mod optim;
pub mod sample;
pub mod similarity;
pub mod tensor;
pub mod trainer;

pub use design::{get_dt, DesignBuilder};
pub use error::{FitError, FitResult};
pub use history::{ForgettingBuffer, HistoryEntry};
pub use metrics::{mmd_from_features, mmd_from_gramians, MetricsFn, MetricsRecord};
pub use model::MmdGlm;
pub use nonlinearity::Nonlinearity;
pub use optim::{Adam, GradientDescent, LrScheduler, Optimizer, StepDecay};
pub use sample::Sampler;
pub use similarity::{FeatureMap, Similarity, SpikeKernel};
pub use tensor::Tensor;
pub use trainer::{MmdTrainer, TrainConfig, TrainRecord};
