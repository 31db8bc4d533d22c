// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! External design-matrix builder interface and time-grid helpers.

use ndarray::{Array1, Array2, Array3};

use crate::error::{FitError, FitResult};

/// Builds the feature tensor `[time, trial, basis]` for a batch of spike
/// masks, aligned to the flat parameter vector. Produced fresh per
/// invocation; the result is treated as immutable.
pub trait DesignBuilder {
    fn design(
        &self,
        t: &Array1<f64>,
        mask: &Array2<f64>,
        stim: Option<&Array2<f64>>,
    ) -> FitResult<Array3<f64>>;
}

/// Bin width of a uniformly spaced time grid.
pub fn get_dt(t: &Array1<f64>) -> FitResult<f64> {
    if t.len() < 2 {
        return Err(FitError::DegenerateTimeGrid);
    }
    let dt = t[[1]] - t[[0]];
    if !(dt > 0.0 && dt.is_finite()) {
        return Err(FitError::DegenerateTimeGrid);
    }
    Ok(dt)
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::arr1;

    #[test]
    fn dt_comes_from_the_first_pair() {
        let t = arr1(&[0.0, 0.25, 0.5, 0.75]);
        assert!((get_dt(&t).unwrap() - 0.25).abs() < 1e-15);
    }

    #[test]
    fn short_or_decreasing_grids_are_rejected() {
        assert!(get_dt(&arr1(&[0.0])).is_err());
        assert!(get_dt(&arr1(&[1.0, 0.5])).is_err());
    }
}
