// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

use thiserror::Error;

/// Errors emitted by the fitting stack.
#[derive(Debug, Error)]
pub enum FitError {
    /// Two arrays were combined with incompatible shapes.
    #[error("shape mismatch: left={left:?}, right={right:?} cannot be combined")]
    ShapeMismatch { left: Vec<usize>, right: Vec<usize> },
    /// An operand did not have the rank the operation requires.
    #[error("{label}: expected rank {expected}, got {got}")]
    RankMismatch {
        label: &'static str,
        expected: usize,
        got: usize,
    },
    /// A computation received an empty input which would otherwise panic.
    #[error("{0} must not be empty for this computation")]
    EmptyInput(&'static str),
    /// The time grid cannot produce a positive bin width.
    #[error("time grid must hold at least two increasing, uniformly spaced points")]
    DegenerateTimeGrid,
    /// Learning rate must be positive for gradient optimisers.
    #[error("learning rate must be positive, got {rate}")]
    NonPositiveLearningRate { rate: f64 },
    /// History discount factor must lie in (0, 1].
    #[error("history discount factor must lie in (0, 1], got {beta}")]
    InvalidDiscount { beta: f64 },
    /// The history buffer needs room for at least one minibatch.
    #[error("history buffer capacity must be at least one")]
    ZeroCapacity,
    /// A similarity function returned a gramian or feature set sized for the
    /// wrong number of trials.
    #[error("similarity output covers {got} trials, expected {expected}")]
    TrialCountMismatch { expected: usize, got: usize },
    /// Failure reported by an external collaborator (sampler, design builder,
    /// similarity function).
    #[error("{context} failed: {message}")]
    External {
        context: &'static str,
        message: String,
    },
}

/// Result alias used throughout the crate.
pub type FitResult<T> = Result<T, FitError>;
