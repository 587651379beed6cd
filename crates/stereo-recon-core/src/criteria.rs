use serde::{Deserialize, Serialize};

/// Stop condition shared by every iterative stage: corner refinement,
/// Levenberg-Marquardt fits and point undistortion.
///
/// Iteration stops after `max_iters` steps or as soon as a step moves the
/// estimate by less than `epsilon`, whichever happens first.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TermCriteria {
    /// Hard cap on the number of iterations.
    pub max_iters: usize,
    /// Minimum update norm; smaller steps count as converged.
    pub epsilon: f64,
}

impl TermCriteria {
    pub const fn new(max_iters: usize, epsilon: f64) -> Self {
        Self { max_iters, epsilon }
    }

    /// `true` once `step_norm` is below `epsilon`.
    #[inline]
    pub fn converged(&self, step_norm: f64) -> bool {
        step_norm < self.epsilon
    }

    /// `true` once `iteration` (zero-based count of completed steps) hits the cap.
    #[inline]
    pub fn exhausted(&self, iteration: usize) -> bool {
        iteration >= self.max_iters
    }
}

impl Default for TermCriteria {
    fn default() -> Self {
        Self::new(30, 1e-3)
    }
}
