// SPDX-License-Identifier: AGPL-3.0-or-later
// © 2025 Ryo ∴ SpiralArchitect (kishkavsesvit@icloud.com)
// Part of SpiralTorch — Licensed under AGPL-3.0-or-later.
// Unauthorized derivative works or closed redistribution prohibited under AGPL §13.

//! Bounded "forgetting" window over recent simulated minibatches.

use ndarray::{Array2, Axis};

use crate::error::{FitError, FitResult};
use crate::tensor::Tensor;

/// One simulated minibatch: the tracked rate (whose graph reaches back to the
/// parameter leaves) and the sampled spike mask.
pub struct HistoryEntry {
    pub rate: Tensor,
    pub mask: Array2<f64>,
}

/// Fixed-capacity circular buffer of [`HistoryEntry`] values with geometric
/// age discounting.
///
/// Insertion appends, eviction removes the oldest entry (strict FIFO), and
/// slot reuse is plain modulo arithmetic, so no reallocation happens after
/// construction. With capacity one the buffer degenerates to "no history";
/// with `beta = 1` every retained entry weighs the same.
pub struct ForgettingBuffer {
    slots: Vec<Option<HistoryEntry>>,
    head: usize,
    len: usize,
    beta: f64,
}

impl ForgettingBuffer {
    /// Creates a buffer holding up to `capacity` minibatches, discounted by
    /// `beta` per epoch of age.
    pub fn new(capacity: usize, beta: f64) -> FitResult<Self> {
        if capacity == 0 {
            return Err(FitError::ZeroCapacity);
        }
        if !(beta > 0.0 && beta <= 1.0) {
            return Err(FitError::InvalidDiscount { beta });
        }
        let mut slots = Vec::with_capacity(capacity);
        slots.resize_with(capacity, || None);
        Ok(Self {
            slots,
            head: 0,
            len: 0,
            beta,
        })
    }

    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn beta(&self) -> f64 {
        self.beta
    }

    /// Appends an entry, evicting the oldest one first when full.
    pub fn push(&mut self, entry: HistoryEntry) {
        let capacity = self.capacity();
        if self.len == capacity {
            self.slots[self.head] = Some(entry);
            self.head = (self.head + 1) % capacity;
        } else {
            self.slots[(self.head + self.len) % capacity] = Some(entry);
            self.len += 1;
        }
    }

    /// Iterates entries in insertion order, oldest first.
    pub fn iter(&self) -> impl Iterator<Item = &HistoryEntry> {
        let capacity = self.capacity();
        (0..self.len).map(move |i| {
            self.slots[(self.head + i) % capacity]
                .as_ref()
                .expect("occupied slot within len")
        })
    }

    /// The most recently pushed entry.
    pub fn newest(&self) -> Option<&HistoryEntry> {
        if self.len == 0 {
            return None;
        }
        self.slots[(self.head + self.len - 1) % self.capacity()].as_ref()
    }

    /// Discount weights `beta^age`, most recent first: the newest entry has
    /// age zero and weight exactly one.
    pub fn weights(&self) -> Vec<f64> {
        (0..self.len).map(|age| self.beta.powi(age as i32)).collect()
    }

    /// Discount weight of the entry at `position` in insertion order (oldest
    /// is position zero).
    pub fn weight_at(&self, position: usize) -> f64 {
        self.beta.powi((self.len - 1 - position) as i32)
    }

    /// Concatenates the buffered spike masks along the trial axis, oldest
    /// first, producing the effective simulated batch for the epoch.
    pub fn concat_masks(&self) -> FitResult<Array2<f64>> {
        if self.is_empty() {
            return Err(FitError::EmptyInput("history buffer"));
        }
        let views: Vec<_> = self.iter().map(|entry| entry.mask.view()).collect();
        ndarray::concatenate(Axis(1), &views).map_err(|_| FitError::ShapeMismatch {
            left: views[0].shape().to_vec(),
            right: views[views.len() - 1].shape().to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::Array2;

    fn entry(tag: f64) -> HistoryEntry {
        HistoryEntry {
            rate: Tensor::from_array(Array2::from_elem((2, 3), tag).into_dyn()),
            mask: Array2::from_elem((2, 3), tag),
        }
    }

    #[test]
    fn rejects_degenerate_configuration() {
        assert!(matches!(
            ForgettingBuffer::new(0, 0.9),
            Err(FitError::ZeroCapacity)
        ));
        assert!(matches!(
            ForgettingBuffer::new(3, 0.0),
            Err(FitError::InvalidDiscount { .. })
        ));
        assert!(matches!(
            ForgettingBuffer::new(3, 1.5),
            Err(FitError::InvalidDiscount { .. })
        ));
    }

    #[test]
    fn overflow_keeps_the_most_recent_entries_in_order() {
        let mut buffer = ForgettingBuffer::new(3, 0.5).unwrap();
        for tag in 0..5 {
            buffer.push(entry(tag as f64));
        }
        assert_eq!(buffer.len(), 3);
        let tags: Vec<f64> = buffer.iter().map(|e| e.mask[[0, 0]]).collect();
        assert_eq!(tags, vec![2.0, 3.0, 4.0]);
        assert_eq!(buffer.newest().unwrap().mask[[0, 0]], 4.0);
    }

    #[test]
    fn newest_entry_always_weighs_one() {
        let mut buffer = ForgettingBuffer::new(4, 0.7).unwrap();
        for tag in 0..7 {
            buffer.push(entry(tag as f64));
            let weights = buffer.weights();
            assert!((weights[0] - 1.0).abs() < 1e-15);
        }
        let weights = buffer.weights();
        assert_eq!(weights.len(), 4);
        assert!((weights[1] - 0.7).abs() < 1e-15);
        assert!((weights[3] - 0.7f64.powi(3)).abs() < 1e-15);
        // Insertion-order accessor agrees: oldest carries the deepest discount.
        assert!((buffer.weight_at(0) - 0.7f64.powi(3)).abs() < 1e-15);
        assert!((buffer.weight_at(3) - 1.0).abs() < 1e-15);
    }

    #[test]
    fn unit_beta_weighs_all_entries_equally() {
        let mut buffer = ForgettingBuffer::new(3, 1.0).unwrap();
        for tag in 0..3 {
            buffer.push(entry(tag as f64));
        }
        assert!(buffer.weights().iter().all(|&w| (w - 1.0).abs() < 1e-15));
    }

    #[test]
    fn capacity_one_degenerates_to_no_history() {
        let mut buffer = ForgettingBuffer::new(1, 0.9).unwrap();
        for tag in 0..4 {
            buffer.push(entry(tag as f64));
            assert_eq!(buffer.len(), 1);
            let concat = buffer.concat_masks().unwrap();
            assert_eq!(concat.dim(), (2, 3));
            assert_eq!(concat[[0, 0]], tag as f64);
        }
    }

    #[test]
    fn concatenation_stacks_trials_oldest_first() {
        let mut buffer = ForgettingBuffer::new(2, 1.0).unwrap();
        buffer.push(entry(1.0));
        buffer.push(entry(2.0));
        let concat = buffer.concat_masks().unwrap();
        assert_eq!(concat.dim(), (2, 6));
        assert_eq!(concat[[0, 0]], 1.0);
        assert_eq!(concat[[0, 5]], 2.0);
    }
}
