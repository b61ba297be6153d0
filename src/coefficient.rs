//! Coefficients for discrete operators: constants, functions of space or
//! space-time, and controls driven by an externally supplied vector.

use std::rc::Rc;

use crate::core::{Real, Vector};
use crate::grid::{Interpolant, InterpolantFactory, RectilinearGrid};
use crate::iteration::LinearSystem;

/// A control: an interpolant rebuilt from an input vector on demand.
pub struct Control<const D: usize> {
    factory: InterpolantFactory<D>,
    interpolant: Option<Interpolant<D>>,
}

impl<const D: usize> Control<D> {
    pub fn new(factory: InterpolantFactory<D>) -> Self {
        Self {
            factory,
            interpolant: None,
        }
    }

    /// A control interpolating over the given grid.
    pub fn on_grid(grid: &Rc<RectilinearGrid<D>>) -> Self {
        Self::new(InterpolantFactory::new(grid.clone()))
    }
}

/// An operator coefficient: a constant, a function of space, a function of
/// space and time, or a control.
///
/// Discrete operators built from these stay robust across model variants —
/// the same Black-Scholes operator takes a constant rate, a local
/// volatility function, or a controlled rate without changing shape.
pub enum Coefficient<const D: usize> {
    /// A fixed scalar.
    Constant(Real),
    /// A pure function of the spatial coordinates.
    SpaceFn(Rc<dyn Fn([Real; D]) -> Real>),
    /// A function of time and the spatial coordinates.
    SpaceTimeFn(Rc<dyn Fn(Real, [Real; D]) -> Real>),
    /// An interpolant rebuilt from an input vector via `set_input`.
    Control(Control<D>),
}

impl<const D: usize> Coefficient<D> {
    /// A coefficient from a function of space.
    pub fn space_fn(f: impl Fn([Real; D]) -> Real + 'static) -> Self {
        Self::SpaceFn(Rc::new(f))
    }

    /// A coefficient from a function of time and space.
    pub fn space_time_fn(f: impl Fn(Real, [Real; D]) -> Real + 'static) -> Self {
        Self::SpaceTimeFn(Rc::new(f))
    }

    /// A controlled coefficient interpolating over `grid`.
    pub fn control(grid: &Rc<RectilinearGrid<D>>) -> Self {
        Self::Control(Control::on_grid(grid))
    }

    /// The coefficient value at the given time and coordinates.
    pub fn value(&self, t: Real, coordinates: [Real; D]) -> Real {
        match self {
            Self::Constant(c) => *c,
            Self::SpaceFn(f) => f(coordinates),
            Self::SpaceTimeFn(f) => f(t, coordinates),
            Self::Control(control) => control
                .interpolant
                .as_ref()
                .expect("control queried before set_input")
                .value(coordinates),
        }
    }

    /// True if and only if this is not a function of time.
    pub fn is_constant_in_time(&self) -> bool {
        matches!(self, Self::Constant(_) | Self::SpaceFn(_))
    }

    /// True if and only if this is a control.
    pub fn is_controllable(&self) -> bool {
        matches!(self, Self::Control(_))
    }

    /// Rebuilds the control's interpolant from `input`. Does nothing for
    /// non-control coefficients.
    pub fn set_input(&mut self, input: Vector) {
        if let Self::Control(control) = self {
            control.interpolant = Some(control.factory.make(input));
        }
    }
}

impl<const D: usize> From<Real> for Coefficient<D> {
    fn from(constant: Real) -> Self {
        Self::Constant(constant)
    }
}

impl<const D: usize> std::fmt::Debug for Coefficient<D> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Constant(c) => write!(f, "Constant({c})"),
            Self::SpaceFn(_) => f.write_str("SpaceFn"),
            Self::SpaceTimeFn(_) => f.write_str("SpaceTimeFn"),
            Self::Control(_) => f.write_str("Control"),
        }
    }
}

/// A linear system whose coefficients may include controls.
pub trait ControlledLinearSystem<const D: usize>: LinearSystem {
    /// Mutable views of the controllable coefficients, in registration
    /// order.
    fn controls_mut(&mut self) -> Vec<&mut Coefficient<D>>;

    /// The number of controllable coefficients.
    fn control_dimension(&self) -> usize;

    /// Dispatches one input vector to each control, in registration order.
    fn set_inputs(&mut self, inputs: &[Vector]) {
        assert_eq!(
            inputs.len(),
            self.control_dimension(),
            "expected {} control inputs, got {}",
            self.control_dimension(),
            inputs.len()
        );
        for (control, input) in self.controls_mut().into_iter().zip(inputs) {
            control.set_input(input.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::Axis;

    #[test]
    fn constant_and_space_functions_are_constant_in_time() {
        let constant: Coefficient<1> = 0.25.into();
        let space = Coefficient::space_fn(|x: [Real; 1]| x[0]);
        let space_time = Coefficient::space_time_fn(|t, x: [Real; 1]| t * x[0]);

        assert!(constant.is_constant_in_time());
        assert!(space.is_constant_in_time());
        assert!(!space_time.is_constant_in_time());

        assert_eq!(constant.value(9.0, [3.0]), 0.25);
        assert_eq!(space.value(9.0, [3.0]), 3.0);
        assert_eq!(space_time.value(2.0, [3.0]), 6.0);
    }

    #[test]
    fn control_interpolates_its_input_vector() {
        let grid = crate::grid::Grid1::from_axis(Axis::uniform(0.0, 1.0, 2));
        let mut control = Coefficient::control(&grid);
        assert!(control.is_controllable());

        control.set_input(Vector::from_vec(vec![0.0, 1.0, 4.0]));
        assert_eq!(control.value(0.0, [0.5]), 1.0);
        assert!((control.value(0.0, [0.75]) - 2.5).abs() < 1.0e-14);
    }

    #[test]
    fn set_input_on_a_constant_is_a_no_op() {
        let mut constant: Coefficient<1> = 1.0.into();
        constant.set_input(Vector::zeros(3));
        assert_eq!(constant.value(0.0, [0.0]), 1.0);
    }
}
