//! Penalty method for free-boundary (early-exercise) problems.

use std::cell::RefCell;
use std::rc::Rc;

use nalgebra_sparse::CooMatrix;

use crate::core::{Matrix, Real, Vector, TOLERANCE};
use crate::grid::{PointwiseMap, RectilinearGrid};
use crate::iteration::{IterationNode, LinearSystem, NodeContext};

/// Enforces `V ≥ obstacle` by adding a large penalty to every row where the
/// previous iterand violates the constraint.
///
/// Wraps a discretization and perturbs its system: where `x_i < obstacle_i`,
/// the diagonal gains the penalty weight and the right-hand side gains
/// `weight · obstacle_i`, driving the solution onto the obstacle there. The
/// active set moves with the iterand, so the node reports a changed matrix
/// every iteration and is meant to drive a
/// [`ToleranceIteration`](crate::iteration::ToleranceIteration) nested
/// inside the time march.
pub struct PenaltyMethod {
    context: NodeContext,
    system: Rc<RefCell<dyn LinearSystem>>,
    obstacle: Vector,
    weight: Real,
}

impl PenaltyMethod {
    /// Penalizes `system` against the obstacle sampled on `grid`. The
    /// default weight is the reciprocal of the default tolerance.
    pub fn new<const D: usize>(
        grid: &Rc<RectilinearGrid<D>>,
        system: Rc<RefCell<dyn LinearSystem>>,
        obstacle: impl Fn([Real; D]) -> Real,
    ) -> Self {
        Self {
            context: NodeContext::new(),
            system,
            obstacle: PointwiseMap::new(grid.clone()).apply(obstacle),
            weight: 1.0 / TOLERANCE,
        }
    }

    /// Overrides the penalty weight.
    pub fn with_weight(mut self, weight: Real) -> Self {
        assert!(weight > 0.0, "penalty weight must be positive");
        self.weight = weight;
        self
    }

    fn active_set(&self) -> Vec<bool> {
        let x = self.context.iterand(0);
        debug_assert_eq!(x.len(), self.obstacle.len(), "iterand/obstacle mismatch");
        x.iter()
            .zip(self.obstacle.iter())
            .map(|(&xi, &qi)| xi < qi)
            .collect()
    }
}

impl LinearSystem for PenaltyMethod {
    fn a(&mut self, t: Real) -> Matrix {
        let a = self.system.borrow_mut().a(t);
        let n = a.nrows();
        let mut penalty = CooMatrix::new(n, n);
        for (i, active) in self.active_set().into_iter().enumerate() {
            if active {
                penalty.push(i, i, self.weight);
            }
        }
        &a + &Matrix::from(&penalty)
    }

    fn b(&mut self, t: Real) -> Vector {
        let mut b = self.system.borrow_mut().b(t);
        for (i, active) in self.active_set().into_iter().enumerate() {
            if active {
                b[i] += self.weight * self.obstacle[i];
            }
        }
        b
    }

    /// The active set moves with the iterand.
    fn is_a_the_same(&self) -> bool {
        false
    }
}

impl IterationNode for PenaltyMethod {
    fn context(&self) -> &NodeContext {
        &self.context
    }

    fn context_mut(&mut self) -> &mut NodeContext {
        &mut self.context
    }
}
