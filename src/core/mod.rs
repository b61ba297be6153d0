//! Core scalar types, global tolerances, and library-wide error structures.

pub mod history;

pub use history::History;

/// Double-precision scalar used throughout the crate.
pub type Real = f64;

/// Index type for grid nodes and matrix rows.
pub type Index = usize;

/// Dense column vector holding one iterand.
pub type Vector = nalgebra::DVector<Real>;

/// Sparse system matrix in compressed-row form.
pub type Matrix = nalgebra_sparse::CsrMatrix<Real>;

/// Strictness threshold for near-zero comparisons: degenerate timesteps,
/// event clamping, and the explicit limit of the θ-scheme.
pub const EPSILON: Real = 1.0e-6;

/// Relative-error floor; keeps the denominator of the relative error away
/// from zero for near-zero iterand entries.
pub const SCALE: Real = 1.0;

/// Default stopping tolerance for fixed-point iterations.
pub const TOLERANCE: Real = 1.0e-6;

/// Errors surfaced by solvers and iterative methods.
///
/// Contract violations (bad timesteps, mismatched sizes, out-of-range event
/// times) are programmer errors and assert instead.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PdeError {
    /// Input validation error.
    InvalidInput(String),
    /// Non-convergence in an iterative algorithm.
    ConvergenceFailure(String),
    /// Numerical issue (singular system, breakdown, invalid state).
    NumericalError(String),
}

impl std::fmt::Display for PdeError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidInput(msg) => write!(f, "invalid input: {msg}"),
            Self::ConvergenceFailure(msg) => write!(f, "convergence failure: {msg}"),
            Self::NumericalError(msg) => write!(f, "numerical error: {msg}"),
        }
    }
}

impl std::error::Error for PdeError {}
