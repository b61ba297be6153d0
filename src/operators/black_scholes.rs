//! The Black-Scholes spatial operator in one dimension.

use std::rc::Rc;

use nalgebra_sparse::CooMatrix;

use crate::coefficient::{Coefficient, ControlledLinearSystem};
use crate::core::{Matrix, Real, Vector};
use crate::grid::Grid1;
use crate::iteration::LinearSystem;

/// Spatial discretization of the Black-Scholes operator, assembled so that
/// the pricing problem reads `dV/dt = −A V` and a reverse θ-scheme march
/// recovers the usual pricing equations:
///
/// `A = −( σ²S²/2 ∂²/∂S² + (r−q)S ∂/∂S − r )`.
///
/// Interior rows use central differences on the nonuniform grid, falling
/// back to upwinded drift whenever a central off-diagonal coupling would
/// turn negative. The first and last rows assume the solution is linear in
/// `S` (vanishing second derivative), which is exact in the far field of
/// vanilla payoffs.
///
/// Every coefficient is a [`Coefficient`]: constant rates, local
/// volatility surfaces, and controlled rates all fit.
pub struct BlackScholes {
    grid: Rc<Grid1>,
    interest: Coefficient<1>,
    volatility: Coefficient<1>,
    dividends: Coefficient<1>,
}

impl BlackScholes {
    pub fn new(
        grid: Rc<Grid1>,
        interest: impl Into<Coefficient<1>>,
        volatility: impl Into<Coefficient<1>>,
        dividends: impl Into<Coefficient<1>>,
    ) -> Self {
        Self {
            grid,
            interest: interest.into(),
            volatility: volatility.into(),
            dividends: dividends.into(),
        }
    }
}

impl LinearSystem for BlackScholes {
    fn a(&mut self, t: Real) -> Matrix {
        let ticks = self.grid.axis(0).ticks();
        let n = ticks.len();
        let mut coo = CooMatrix::new(n, n);

        for i in 1..n - 1 {
            let s = ticks[i];
            let h_minus = s - ticks[i - 1];
            let h_plus = ticks[i + 1] - s;

            let r = self.interest.value(t, [s]);
            let q = self.dividends.value(t, [s]);
            let sigma = self.volatility.value(t, [s]);

            let diffusion = 0.5 * sigma * sigma * s * s;
            let drift = (r - q) * s;

            let d2_minus = 2.0 / (h_minus * (h_minus + h_plus));
            let d2_center = -2.0 / (h_minus * h_plus);
            let d2_plus = 2.0 / (h_plus * (h_minus + h_plus));

            // Central drift weights first.
            let mut lower = diffusion * d2_minus - drift * h_plus / (h_minus * (h_minus + h_plus));
            let mut center =
                diffusion * d2_center + drift * (h_plus - h_minus) / (h_minus * h_plus);
            let mut upper = diffusion * d2_plus + drift * h_minus / (h_plus * (h_minus + h_plus));

            // Upwind the drift whenever central differencing would break the
            // positive-coefficient condition.
            if lower < 0.0 || upper < 0.0 {
                if drift >= 0.0 {
                    lower = diffusion * d2_minus;
                    center = diffusion * d2_center - drift / h_plus;
                    upper = diffusion * d2_plus + drift / h_plus;
                } else {
                    lower = diffusion * d2_minus - drift / h_minus;
                    center = diffusion * d2_center + drift / h_minus;
                    upper = diffusion * d2_plus;
                }
            }

            coo.push(i, i - 1, -lower);
            coo.push(i, i, -center + r);
            coo.push(i, i + 1, -upper);
        }

        // Lowest node: no diffusion or inbound drift to the left; one-sided
        // drift when it points inward, pure discounting otherwise. At S = 0
        // both terms vanish and the row reduces to discounting.
        {
            let s = ticks[0];
            let r = self.interest.value(t, [s]);
            let q = self.dividends.value(t, [s]);
            let drift = (r - q) * s;
            if drift > 0.0 {
                let h = ticks[1] - ticks[0];
                coo.push(0, 0, r + drift / h);
                coo.push(0, 1, -drift / h);
            } else {
                coo.push(0, 0, r);
            }
        }

        // Highest node: the solution is taken linear in S, so the second
        // derivative drops and the drift uses the only available one-sided
        // difference.
        {
            let s = ticks[n - 1];
            let r = self.interest.value(t, [s]);
            let q = self.dividends.value(t, [s]);
            let drift = (r - q) * s;
            let h = ticks[n - 1] - ticks[n - 2];
            coo.push(n - 1, n - 2, drift / h);
            coo.push(n - 1, n - 1, r - drift / h);
        }

        Matrix::from(&coo)
    }

    fn b(&mut self, _t: Real) -> Vector {
        Vector::zeros(self.grid.size())
    }

    fn is_a_the_same(&self) -> bool {
        self.interest.is_constant_in_time()
            && self.volatility.is_constant_in_time()
            && self.dividends.is_constant_in_time()
    }
}

impl ControlledLinearSystem<1> for BlackScholes {
    fn controls_mut(&mut self) -> Vec<&mut Coefficient<1>> {
        [
            &mut self.interest,
            &mut self.volatility,
            &mut self.dividends,
        ]
        .into_iter()
        .filter(|c| c.is_controllable())
        .collect()
    }

    fn control_dimension(&self) -> usize {
        [&self.interest, &self.volatility, &self.dividends]
            .into_iter()
            .filter(|c| c.is_controllable())
            .count()
    }
}
