//! Fixed-point iteration that stops on a relative-error tolerance.

use crate::core::{PdeError, Real, Vector, SCALE, TOLERANCE};
use crate::solver::LinearSolver;

use super::{relative_error, run, Iteration, IterationBase, NodeRef, Phases};

/// An iterative method that terminates when adjacent iterands agree to within
/// a relative tolerance.
///
/// Used as the inner iteration of a time stepper: the implicit time is
/// inherited from the parent and held fixed while the fixed-point loop runs.
/// The convergence predicate compares the two most recent solver-produced
/// iterands, so every call performs at least two iterations.
pub struct ToleranceIteration {
    base: IterationBase,
    tolerance: Real,
    scale: Real,
    max_iterations: Option<u64>,
}

impl ToleranceIteration {
    /// Creates a tolerance iteration with the default tolerance and scale.
    pub fn new() -> Self {
        Self::with_parameters(TOLERANCE, SCALE)
    }

    /// Creates a tolerance iteration with an explicit tolerance and scale.
    pub fn with_parameters(tolerance: Real, scale: Real) -> Self {
        assert!(tolerance > 0.0, "tolerance must be positive");
        assert!(scale > 0.0, "scale must be positive");
        Self {
            base: IterationBase::new(),
            tolerance,
            scale,
            max_iterations: None,
        }
    }

    /// Caps the number of fixed-point iterations per call; exceeding the cap
    /// surfaces a [`PdeError::ConvergenceFailure`]. Unlimited by default.
    pub fn with_max_iterations(mut self, max_iterations: u64) -> Self {
        assert!(max_iterations >= 2, "the loop always runs at least twice");
        self.max_iterations = Some(max_iterations);
        self
    }
}

impl Default for ToleranceIteration {
    fn default() -> Self {
        Self::new()
    }
}

impl Iteration for ToleranceIteration {
    fn iterate_until_done(
        &mut self,
        iterand: Vector,
        root: &NodeRef,
        solver: &mut dyn LinearSolver,
        parent_time: Real,
        initialized: bool,
    ) -> Result<Vector, PdeError> {
        run(self, iterand, root, solver, parent_time, initialized)
    }

    fn base(&self) -> &IterationBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut IterationBase {
        &mut self.base
    }

    /// The predicate needs the two most recent iterands.
    fn minimum_lookback(&self) -> usize {
        2
    }
}

impl Phases for ToleranceIteration {
    fn set_time(&mut self, parent_time: Real) {
        self.base.core.borrow_mut().implicit_time = parent_time;
    }

    fn not_done(&self) -> Result<bool, PdeError> {
        let core = self.base.core.borrow();
        let steps = *core.its.last().expect("iteration count missing");

        // Both compared entries must be solver-produced; the seed pushed at
        // the start of the call does not count.
        if steps < 2 {
            return Ok(true);
        }
        let error =
            relative_error(core.history.iterand(0), core.history.iterand(1), self.scale);
        if error <= self.tolerance {
            return Ok(false);
        }
        if let Some(cap) = self.max_iterations {
            if steps >= cap {
                return Err(PdeError::ConvergenceFailure(format!(
                    "tolerance iteration exhausted {cap} iterations at t = {} (relative error {error:.3e})",
                    core.implicit_time
                )));
            }
        }
        Ok(true)
    }
}
