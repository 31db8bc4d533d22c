// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Reverse-mode core: the node trait and the `GradFn` wrapper.
//!
//! The engine keeps the computation graph alive for exactly as long as some
//! tensor still references it. Nodes own clones of their parent tensors, so a
//! buffered forward result can be swept by several reverse passes across
//! epochs; dropping the last tensor that points into a subgraph frees it.

use std::cell::RefCell;
use std::rc::Rc;

use ndarray::ArrayD;

use crate::tensor::Tensor;

/// Nodes implement this trait to participate in backprop.
pub trait BackwardNode {
    /// Short operator name used for debugging output.
    fn name(&self) -> &'static str;
    /// Parent tensors in the order gradients are returned.
    fn parents(&self) -> Vec<Tensor>;
    /// Maps the output gradient to one gradient per parent. `None` marks a
    /// parent that does not receive a gradient.
    fn backward(&self, grad_out: &ArrayD<f64>) -> Vec<Option<ArrayD<f64>>>;
}

/// Shared handle to a backward node with a stable identity.
#[derive(Clone)]
pub struct GradFn(pub(crate) Rc<RefCell<dyn BackwardNode>>);

impl GradFn {
    /// Wraps a node for attachment to an output tensor.
    pub fn new<N: BackwardNode + 'static>(node: N) -> Self {
        GradFn(Rc::new(RefCell::new(node)))
    }

    /// Stable key used for topological bookkeeping.
    pub fn key(&self) -> usize {
        Rc::as_ptr(&self.0) as *const () as usize
    }

    /// Parent tensors of the wrapped node.
    pub fn parents(&self) -> Vec<Tensor> {
        self.0.borrow().parents()
    }

    /// Runs the wrapped node's backward map.
    pub fn backward(&self, grad_out: &ArrayD<f64>) -> Vec<Option<ArrayD<f64>>> {
        self.0.borrow().backward(grad_out)
    }
}
