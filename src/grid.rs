//! Rectilinear grids, interpolants, and pointwise maps.
//!
//! Grids are tensor products of strictly increasing axes. The iteration
//! engine consumes them through a narrow surface: node count, node
//! coordinates, the sparse identity, and interpolant construction.

use std::rc::Rc;

use crate::core::{Matrix, Real, Vector};

/// A strictly increasing set of ticks along one spatial dimension.
#[derive(Debug, Clone, PartialEq)]
pub struct Axis {
    ticks: Vec<Real>,
}

/// The standard option-pricing node set, normalized to a strike of 100.
/// Dense near the money, sparse in the far field.
const OPTION_PRICING_TICKS: [Real; 32] = [
    0.0, 10.0, 20.0, 30.0, 40.0, 50.0, 60.0, 70.0, 75.0, 80.0, 84.0, 88.0, 92.0, 96.0, 98.0,
    100.0, 102.0, 104.0, 106.0, 108.0, 110.0, 114.0, 118.0, 123.0, 130.0, 150.0, 175.0, 225.0,
    300.0, 750.0, 2000.0, 10000.0,
];

impl Axis {
    /// Creates an axis from ticks, which must be finite, strictly
    /// increasing, and at least two.
    pub fn new(ticks: Vec<Real>) -> Self {
        assert!(ticks.len() >= 2, "an axis needs at least two ticks");
        assert!(
            ticks.iter().all(|t| t.is_finite()),
            "axis ticks must be finite"
        );
        assert!(
            ticks.windows(2).all(|w| w[0] < w[1]),
            "axis ticks must be strictly increasing"
        );
        Self { ticks }
    }

    /// A uniform axis over `[a, b]` with the given number of intervals.
    pub fn uniform(a: Real, b: Real, intervals: usize) -> Self {
        assert!(intervals >= 1, "at least one interval");
        assert!(a < b, "interval must be nonempty");
        let h = (b - a) / intervals as Real;
        let mut ticks: Vec<Real> = (0..=intervals).map(|i| a + h * i as Real).collect();
        // Pin the endpoint exactly.
        ticks[intervals] = b;
        Self::new(ticks)
    }

    /// The standard nonuniform option-pricing axis scaled so its money node
    /// lands on `anchor`.
    pub fn option_pricing(anchor: Real) -> Self {
        assert!(anchor > 0.0, "anchor must be positive");
        let scale = anchor / 100.0;
        Self::new(OPTION_PRICING_TICKS.iter().map(|t| t * scale).collect())
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.ticks.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        false
    }

    #[inline]
    pub fn ticks(&self) -> &[Real] {
        &self.ticks
    }

    #[inline]
    pub fn tick(&self, index: usize) -> Real {
        self.ticks[index]
    }

    /// Merges the ticks of two axes, dropping near-duplicates.
    pub fn union(&self, other: &Axis) -> Axis {
        let mut merged: Vec<Real> = Vec::with_capacity(self.len() + other.len());
        let (mut i, mut j) = (0, 0);
        while i < self.len() || j < other.len() {
            let next = match (self.ticks.get(i), other.ticks.get(j)) {
                (Some(&a), Some(&b)) => {
                    if a <= b {
                        i += 1;
                        a
                    } else {
                        j += 1;
                        b
                    }
                }
                (Some(&a), None) => {
                    i += 1;
                    a
                }
                (None, Some(&b)) => {
                    j += 1;
                    b
                }
                (None, None) => unreachable!(),
            };
            match merged.last() {
                Some(&last) if (next - last).abs() <= 1.0e-10 * last.abs().max(1.0) => {}
                _ => merged.push(next),
            }
        }
        Axis::new(merged)
    }

    /// Inserts the midpoint of every interval, doubling the resolution.
    pub fn refined(&self) -> Axis {
        let mut ticks = Vec::with_capacity(2 * self.len() - 1);
        for w in self.ticks.windows(2) {
            ticks.push(w[0]);
            ticks.push(0.5 * (w[0] + w[1]));
        }
        ticks.push(*self.ticks.last().expect("nonempty axis"));
        Axis::new(ticks)
    }

    /// Bracketing interval and linear weight for `x`, clamped flat outside
    /// the tick range.
    pub(crate) fn bracket(&self, x: Real) -> (usize, Real) {
        let n = self.ticks.len();
        if x <= self.ticks[0] {
            return (0, 0.0);
        }
        if x >= self.ticks[n - 1] {
            return (n - 2, 1.0);
        }
        let hi = self.ticks.partition_point(|&t| t < x).clamp(1, n - 1);
        let lo = hi - 1;
        let weight = (x - self.ticks[lo]) / (self.ticks[hi] - self.ticks[lo]);
        (lo, weight)
    }
}

/// A tensor-product grid over `D` axes; axis 0 varies fastest in the node
/// ordering.
#[derive(Debug, Clone)]
pub struct RectilinearGrid<const D: usize> {
    axes: [Axis; D],
}

pub type Grid1 = RectilinearGrid<1>;
pub type Grid2 = RectilinearGrid<2>;
pub type Grid3 = RectilinearGrid<3>;

impl<const D: usize> RectilinearGrid<D> {
    pub fn new(axes: [Axis; D]) -> Self {
        assert!(D > 0, "dimension must be positive");
        Self { axes }
    }

    /// Total number of grid nodes.
    pub fn size(&self) -> usize {
        self.axes.iter().map(Axis::len).product()
    }

    #[inline]
    pub fn axis(&self, dimension: usize) -> &Axis {
        &self.axes[dimension]
    }

    /// Coordinates of the node with the given linear index.
    pub fn node(&self, index: usize) -> [Real; D] {
        debug_assert!(index < self.size(), "node index out of range");
        let mut remainder = index;
        let mut out = [0.0; D];
        for (d, axis) in self.axes.iter().enumerate() {
            out[d] = axis.tick(remainder % axis.len());
            remainder /= axis.len();
        }
        out
    }

    /// The sparse identity sized to this grid.
    pub fn identity(&self) -> Matrix {
        Matrix::identity(self.size())
    }

    /// The grid with every axis refined `times` times.
    pub fn refined(&self, times: usize) -> Self {
        let mut axes = self.axes.clone();
        for _ in 0..times {
            for axis in axes.iter_mut() {
                *axis = axis.refined();
            }
        }
        Self { axes }
    }
}

impl Grid1 {
    /// Convenience constructor for the one-dimensional case.
    pub fn from_axis(axis: Axis) -> Rc<Self> {
        Rc::new(Self::new([axis]))
    }
}

/// Piecewise-multilinear interpolant of nodal values on a grid, constant
/// outside the grid.
#[derive(Debug, Clone)]
pub struct Interpolant<const D: usize> {
    grid: Rc<RectilinearGrid<D>>,
    values: Vector,
}

impl<const D: usize> Interpolant<D> {
    /// Interpolated value at the given coordinates.
    pub fn value(&self, coordinates: [Real; D]) -> Real {
        let mut lo = [0usize; D];
        let mut weight = [0.0; D];
        for d in 0..D {
            (lo[d], weight[d]) = self.grid.axis(d).bracket(coordinates[d]);
        }

        let mut accumulated = 0.0;
        for corner in 0..(1usize << D) {
            let mut index = 0;
            let mut stride = 1;
            let mut w = 1.0;
            for d in 0..D {
                let high = (corner >> d) & 1 == 1;
                w *= if high { weight[d] } else { 1.0 - weight[d] };
                index += (lo[d] + high as usize) * stride;
                stride *= self.grid.axis(d).len();
            }
            accumulated += w * self.values[index];
        }
        accumulated
    }

    /// The nodal values backing this interpolant.
    #[inline]
    pub fn values(&self) -> &Vector {
        &self.values
    }
}

impl Interpolant<1> {
    /// One-dimensional evaluation without the array wrapper.
    #[inline]
    pub fn at(&self, x: Real) -> Real {
        self.value([x])
    }
}

/// Builds interpolants over a fixed grid from nodal value vectors.
#[derive(Debug, Clone)]
pub struct InterpolantFactory<const D: usize> {
    grid: Rc<RectilinearGrid<D>>,
}

impl<const D: usize> InterpolantFactory<D> {
    pub fn new(grid: Rc<RectilinearGrid<D>>) -> Self {
        Self { grid }
    }

    pub fn make(&self, values: Vector) -> Interpolant<D> {
        assert_eq!(
            values.len(),
            self.grid.size(),
            "value vector does not match the grid"
        );
        Interpolant {
            grid: self.grid.clone(),
            values,
        }
    }
}

/// Samples a function of space onto the nodes of a grid.
#[derive(Debug, Clone)]
pub struct PointwiseMap<const D: usize> {
    grid: Rc<RectilinearGrid<D>>,
}

impl<const D: usize> PointwiseMap<D> {
    pub fn new(grid: Rc<RectilinearGrid<D>>) -> Self {
        Self { grid }
    }

    pub fn apply(&self, f: impl Fn([Real; D]) -> Real) -> Vector {
        Vector::from_fn(self.grid.size(), |i, _| f(self.grid.node(i)))
    }
}
