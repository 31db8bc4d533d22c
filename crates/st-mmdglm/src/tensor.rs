// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Double-precision tensor with an attached reverse-mode graph.

use std::cell::RefCell;
use std::collections::{HashMap, HashSet};
use std::rc::Rc;
use std::sync::atomic::{AtomicUsize, Ordering};

use ndarray::{ArrayD, IxDyn};

use crate::autograd::GradFn;
use crate::error::FitResult;

static NEXT_ID: AtomicUsize = AtomicUsize::new(1);

/// Shared tensor handle. Cloning is cheap and aliases the same storage, which
/// is what lets history entries keep their forward subgraphs alive across
/// epochs.
#[derive(Clone)]
pub struct Tensor(pub(crate) Rc<RefCell<Inner>>);

pub(crate) struct Inner {
    id: usize,
    pub(crate) data: ArrayD<f64>,
    pub(crate) requires_grad: bool,
    pub(crate) grad: Option<ArrayD<f64>>,
    pub(crate) grad_fn: Option<GradFn>,
}

impl Tensor {
    /// Wraps an owned array.
    pub fn from_array(data: ArrayD<f64>) -> Self {
        let inner = Inner {
            id: NEXT_ID.fetch_add(1, Ordering::Relaxed),
            data,
            requires_grad: false,
            grad: None,
            grad_fn: None,
        };
        Tensor(Rc::new(RefCell::new(inner)))
    }

    /// Builds a 1-D tensor from a vector.
    pub fn from_vec(data: Vec<f64>) -> Self {
        Self::from_array(ndarray::Array1::from_vec(data).into_dyn())
    }

    /// Builds a 0-D scalar tensor.
    pub fn scalar(value: f64) -> Self {
        Self::from_array(ndarray::arr0(value).into_dyn())
    }

    /// Zero-filled tensor of the given shape.
    pub fn zeros(shape: &[usize]) -> Self {
        Self::from_array(ArrayD::zeros(IxDyn(shape)))
    }

    pub fn id(&self) -> usize {
        self.0.borrow().id
    }

    pub fn shape(&self) -> Vec<usize> {
        self.0.borrow().data.shape().to_vec()
    }

    pub fn ndim(&self) -> usize {
        self.0.borrow().data.ndim()
    }

    pub fn len(&self) -> usize {
        self.0.borrow().data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Clones out the underlying array.
    pub fn data(&self) -> ArrayD<f64> {
        self.0.borrow().data.clone()
    }

    /// Extracts the value of a single-element tensor; NaN if it holds none.
    pub fn item(&self) -> f64 {
        self.0.borrow().data.iter().next().copied().unwrap_or(f64::NAN)
    }

    /// Replaces the stored values, keeping shape and graph state untouched.
    pub fn set_data(&self, data: ArrayD<f64>) {
        self.0.borrow_mut().data = data;
    }

    /// Marks the tensor as a gradient leaf.
    pub fn requires_grad(self, flag: bool) -> Self {
        self.0.borrow_mut().requires_grad = flag;
        self
    }

    pub fn requires_grad_flag(&self) -> bool {
        self.0.borrow().requires_grad
    }

    /// Clones out the accumulated gradient, if any.
    pub fn grad(&self) -> Option<ArrayD<f64>> {
        self.0.borrow().grad.clone()
    }

    /// Clears the gradient accumulator.
    pub fn zero_grad(&self) {
        self.0.borrow_mut().grad = None;
    }

    /// Adds an update directly into the gradient accumulator. This is the
    /// channel used by the control-variate estimator, which writes parameter
    /// gradients without a reverse pass.
    pub fn accumulate_grad(&self, update: &ArrayD<f64>) {
        let mut inner = self.0.borrow_mut();
        match inner.grad.as_mut() {
            Some(existing) => *existing += update,
            None => inner.grad = Some(update.clone()),
        }
    }

    /// Rescales the gradient accumulator in place.
    pub fn scale_grad(&self, factor: f64) {
        if let Some(grad) = self.0.borrow_mut().grad.as_mut() {
            grad.mapv_inplace(|g| g * factor);
        }
    }

    /// Clamps every gradient component to `[-limit, limit]`.
    pub fn clip_grad(&self, limit: f64) {
        if let Some(grad) = self.0.borrow_mut().grad.as_mut() {
            grad.mapv_inplace(|g| g.clamp(-limit, limit));
        }
    }

    pub(crate) fn attach_grad_fn(&self, gf: GradFn) {
        let mut inner = self.0.borrow_mut();
        inner.grad_fn = Some(gf);
        inner.requires_grad = true;
    }

    pub(crate) fn grad_fn(&self) -> Option<GradFn> {
        self.0.borrow().grad_fn.clone()
    }

    /// Runs a reverse sweep seeded with ones. The graph is left intact, so a
    /// caller holding references into it may sweep again; the graph is freed
    /// only when the tensors referencing it drop.
    pub fn backward(&self) -> FitResult<()> {
        let seed = ArrayD::from_elem(IxDyn(&self.shape()), 1.0);
        self.backward_with_grad(&seed)
    }

    /// Reverse sweep with a caller-supplied seed gradient.
    pub fn backward_with_grad(&self, seed: &ArrayD<f64>) -> FitResult<()> {
        if self.grad_fn().is_none() {
            self.accumulate_grad(seed);
            return Ok(());
        }

        let mut topo: Vec<GradFn> = Vec::new();
        let mut visited: HashSet<usize> = HashSet::new();
        fn collect(t: &Tensor, topo: &mut Vec<GradFn>, visited: &mut HashSet<usize>) {
            if let Some(gf) = t.grad_fn() {
                if visited.insert(gf.key()) {
                    for parent in gf.parents() {
                        collect(&parent, topo, visited);
                    }
                    topo.push(gf);
                }
            }
        }
        collect(self, &mut topo, &mut visited);

        let mut out_grads: HashMap<usize, ArrayD<f64>> = HashMap::new();
        self.accumulate_grad(seed);
        if let Some(gf) = self.grad_fn() {
            out_grads.insert(gf.key(), seed.clone());
        }

        for gf in topo.into_iter().rev() {
            let Some(grad_out) = out_grads.remove(&gf.key()) else {
                continue;
            };
            let gradients = gf.backward(&grad_out);
            for (parent, maybe_grad) in gf.parents().into_iter().zip(gradients.into_iter()) {
                let Some(grad) = maybe_grad else { continue };
                parent.accumulate_grad(&grad);
                if let Some(parent_fn) = parent.grad_fn() {
                    match out_grads.get_mut(&parent_fn.key()) {
                        Some(existing) => *existing += &grad,
                        None => {
                            out_grads.insert(parent_fn.key(), grad);
                        }
                    }
                }
            }
        }
        Ok(())
    }
}

impl core::fmt::Debug for Tensor {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let inner = self.0.borrow();
        write!(
            f,
            "Tensor(id={},shape={:?},requires_grad={},has_grad={},has_grad_fn={})",
            inner.id,
            inner.data.shape(),
            inner.requires_grad,
            inner.grad.is_some(),
            inner.grad_fn.is_some()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaf_backward_accumulates_seed() {
        let t = Tensor::from_vec(vec![1.0, 2.0]).requires_grad(true);
        t.backward().unwrap();
        t.backward().unwrap();
        let grad = t.grad().unwrap();
        assert_eq!(grad.iter().copied().collect::<Vec<_>>(), vec![2.0, 2.0]);
    }

    #[test]
    fn zero_grad_clears_accumulator() {
        let t = Tensor::from_vec(vec![1.0]).requires_grad(true);
        t.backward().unwrap();
        assert!(t.grad().is_some());
        t.zero_grad();
        assert!(t.grad().is_none());
    }

    #[test]
    fn clip_grad_bounds_components() {
        let t = Tensor::from_vec(vec![0.0, 0.0, 0.0]);
        t.accumulate_grad(&ndarray::arr1(&[5.0, -3.0, 0.2]).into_dyn());
        t.clip_grad(1.0);
        let grad = t.grad().unwrap();
        assert!(grad.iter().all(|g| g.abs() <= 1.0));
        assert_eq!(grad[[2]], 0.2);
    }

    #[test]
    fn item_reads_scalar() {
        assert_eq!(Tensor::scalar(3.5).item(), 3.5);
    }
}
