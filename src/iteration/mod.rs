//! Iterative methods and the node protocol they drive.
//!
//! An [`Iteration`] marches a solution vector through a sequence of linear
//! solves. Iterations nest: a time stepper may delegate every timestep to an
//! inner [`ToleranceIteration`](tolerance::ToleranceIteration) that runs a
//! fixed-point loop (e.g. a penalty method) to convergence before the outer
//! march continues. Attached [`IterationNode`]s generate the per-step systems
//! and observe the iteration lifecycle; they read previous iterands through
//! the owning iteration's history buffer.
//!
//! The loop skeleton is shared: each iteration kind only supplies the
//! `set_time` / `outer_head` / `timestep` / `outer_tail` phases and the
//! `not_done` predicate.

pub mod time;
pub mod tolerance;

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::core::{History, Matrix, PdeError, Real, Vector};
use crate::grid::{Interpolant, InterpolantFactory, PointwiseMap, RectilinearGrid};
use crate::solver::LinearSolver;

pub use time::{Event, TimeDirection, TimeIteration};
pub use tolerance::ToleranceIteration;

/// Generates the left- and right-hand sides of the linear system solved at
/// each iteration.
pub trait LinearSystem {
    /// The left-hand-side matrix at time `t`.
    fn a(&mut self, t: Real) -> Matrix;

    /// The right-hand-side vector at time `t`.
    fn b(&mut self, t: Real) -> Vector;

    /// False if and only if the left-hand-side matrix has changed since the
    /// previous iteration. When true, the solver keeps its factorization.
    fn is_a_the_same(&self) -> bool {
        false
    }
}

/// A linear system bound to an iteration: it generates the per-step systems
/// and receives lifecycle callbacks from the iteration driving it.
pub trait IterationNode: LinearSystem {
    /// The node's handle to its owning iteration.
    fn context(&self) -> &NodeContext;

    fn context_mut(&mut self) -> &mut NodeContext;

    /// Called once before each top-level solve and at every event boundary.
    fn clear(&mut self) {}

    /// Called after an event has been applied.
    fn on_after_event(&mut self) {
        self.clear();
    }

    /// Called at the start of every step, in attachment order.
    fn on_iteration_start(&mut self) {}

    /// Called at the end of every step, in reverse attachment order.
    fn on_iteration_end(&mut self) {}

    /// The minimum number of previous iterands this node needs to function.
    fn minimum_lookback(&self) -> usize {
        1
    }
}

/// Shared handle to a node attached to an iteration.
pub type NodeRef = Rc<RefCell<dyn IterationNode>>;

/// Mutable state shared between an iteration and its attached nodes.
pub(crate) struct IterationCore {
    pub(crate) history: History,
    pub(crate) nodes: Vec<NodeRef>,
    pub(crate) implicit_time: Real,
    pub(crate) timestep_same: bool,
    pub(crate) its: Vec<u64>,
}

impl IterationCore {
    fn new() -> Self {
        Self {
            history: History::new(1),
            nodes: Vec::new(),
            // Infeasible until a solve sets it.
            implicit_time: -1.0,
            timestep_same: true,
            its: Vec::new(),
        }
    }
}

pub(crate) type CoreRef = Rc<RefCell<IterationCore>>;

/// Back-pointer from a node to the iteration it is attached to.
///
/// Holds a weak handle so that node and iteration never own each other;
/// attaching to another iteration detaches from the previous one.
pub struct NodeContext {
    core: Weak<RefCell<IterationCore>>,
}

impl NodeContext {
    pub fn new() -> Self {
        Self { core: Weak::new() }
    }

    fn core(&self) -> CoreRef {
        self.core
            .upgrade()
            .expect("node is not attached to an iteration")
    }

    /// Previously encountered time, in order of most-to-least recent.
    pub fn time(&self, index: usize) -> Real {
        self.core().borrow().history.time(index)
    }

    /// Snapshot of a previously encountered iterand, most recent first.
    pub fn iterand(&self, index: usize) -> Vector {
        self.core().borrow().history.iterand(index).clone()
    }

    /// The time the next solution is being computed for.
    pub fn next_time(&self) -> Real {
        let t = self.core().borrow().implicit_time;
        assert!(t >= 0.0, "next_time queried outside a solve");
        t
    }

    /// False if and only if the timestep size changed on the previous step.
    pub fn is_timestep_the_same(&self) -> bool {
        self.core().borrow().timestep_same
    }
}

impl Default for NodeContext {
    fn default() -> Self {
        Self::new()
    }
}

/// State common to every iteration kind: the shared core plus an optional
/// inner iteration that each step is delegated to.
pub struct IterationBase {
    pub(crate) core: CoreRef,
    pub(crate) child: Option<Rc<RefCell<dyn Iteration>>>,
}

impl IterationBase {
    pub(crate) fn new() -> Self {
        Self {
            core: Rc::new(RefCell::new(IterationCore::new())),
            child: None,
        }
    }
}

/// An iterative method: a node in a chain `outer → inner → … → innermost`.
pub trait Iteration {
    /// Runs this method to completion starting from `iterand`, solving one
    /// linear system per step (or delegating each step to the inner
    /// iteration), and returns the final iterand.
    fn iterate_until_done(
        &mut self,
        iterand: Vector,
        root: &NodeRef,
        solver: &mut dyn LinearSolver,
        parent_time: Real,
        initialized: bool,
    ) -> Result<Vector, PdeError>;

    fn base(&self) -> &IterationBase;

    fn base_mut(&mut self) -> &mut IterationBase;

    /// The minimum history depth this iteration itself requires.
    fn minimum_lookback(&self) -> usize {
        1
    }

    /// Wires an inner iterative method; each outer step then runs the inner
    /// method to completion.
    fn set_inner_iteration(&mut self, inner: Rc<RefCell<dyn Iteration>>) {
        self.base_mut().child = Some(inner);
    }

    /// Attaches a node to this iteration, detaching it from any previous one.
    fn attach(&self, node: &NodeRef) {
        if let Some(previous) = node.borrow().context().core.upgrade() {
            previous
                .borrow_mut()
                .nodes
                .retain(|n| !Rc::ptr_eq(n, node));
        }
        node.borrow_mut().context_mut().core = Rc::downgrade(&self.base().core);
        self.base().core.borrow_mut().nodes.push(node.clone());
    }

    /// The time this iteration is currently computing a solution for.
    fn next_time(&self) -> Real {
        let t = self.base().core.borrow().implicit_time;
        assert!(t >= 0.0, "next_time queried outside a solve");
        t
    }

    /// Per-step iteration counts recorded during the most recent solve.
    fn iterations(&self) -> Vec<u64> {
        self.base().core.borrow().its.clone()
    }

    /// Sizes every history buffer in the chain and clears iteration counts.
    /// Called once at the start of each solve.
    fn prepare(&self) {
        let lookback = {
            let core = self.base().core.borrow();
            core.nodes
                .iter()
                .map(|node| node.borrow().minimum_lookback())
                .fold(self.minimum_lookback(), usize::max)
        };
        {
            let mut core = self.base().core.borrow_mut();
            core.history = History::new(lookback);
            core.its.clear();
            core.implicit_time = -1.0;
            core.timestep_same = true;
        }
        if let Some(child) = &self.base().child {
            child.borrow().prepare();
        }
    }

    /// Maps the initial condition onto the domain nodes, iterates, and
    /// interpolates the final iterand back onto the whole domain.
    fn solve<const D: usize>(
        &mut self,
        grid: &Rc<RectilinearGrid<D>>,
        initial_condition: impl Fn([Real; D]) -> Real,
        root: &NodeRef,
        solver: &mut dyn LinearSolver,
    ) -> Result<Interpolant<D>, PdeError>
    where
        Self: Sized,
    {
        self.solve_mapped(
            &PointwiseMap::new(grid.clone()),
            &InterpolantFactory::new(grid.clone()),
            initial_condition,
            root,
            solver,
        )
    }

    /// [`solve`](Iteration::solve) with an explicit map and interpolant
    /// factory.
    fn solve_mapped<const D: usize>(
        &mut self,
        map: &PointwiseMap<D>,
        factory: &InterpolantFactory<D>,
        initial_condition: impl Fn([Real; D]) -> Real,
        root: &NodeRef,
        solver: &mut dyn LinearSolver,
    ) -> Result<Interpolant<D>, PdeError>
    where
        Self: Sized,
    {
        self.prepare();
        let iterand = map.apply(initial_condition);
        // The parent time is infeasible on purpose; outermost set_time
        // phases do not read it.
        let solution = self.iterate_until_done(iterand, root, solver, -1.0, false)?;
        Ok(factory.make(solution))
    }
}

/// The per-phase hooks each iteration kind plugs into the shared skeleton.
pub(crate) trait Phases: Iteration {
    /// Sets the implicit time at the start of a call.
    fn set_time(&mut self, parent_time: Real);

    /// Per-call preamble before the stepping loop (e.g. copying the event
    /// queue).
    fn outer_head(&mut self) {}

    /// Advances the implicit time by one step.
    fn timestep(&mut self) {}

    /// Per-pass epilogue (e.g. applying events at a boundary). Returns true
    /// when the stepping loop must run again for another pass.
    fn outer_tail(&mut self) -> Result<bool, PdeError> {
        Ok(false)
    }

    /// Whether the current stepping loop should continue.
    fn not_done(&self) -> Result<bool, PdeError>;
}

pub(crate) fn attached_nodes(base: &IterationBase) -> Vec<NodeRef> {
    base.core.borrow().nodes.clone()
}

/// Initializes the solver if needed and performs one linear solve, pushing
/// the result into the history. The solver keeps its factorization whenever
/// the root reports an unchanged matrix.
fn solve_linear_system(
    base: &IterationBase,
    root: &NodeRef,
    solver: &mut dyn LinearSolver,
    initialized: bool,
) -> Result<(), PdeError> {
    let t = base.core.borrow().implicit_time;

    if !initialized || !root.borrow().is_a_the_same() {
        let a = root.borrow_mut().a(t);
        solver.initialize(a)?;
    }

    let b = root.borrow_mut().b(t);
    let solution = {
        let core = base.core.borrow();
        solver.solve(&b, core.history.iterand(0))?
    };
    base.core.borrow_mut().history.push(t, solution);
    Ok(())
}

/// The loop skeleton shared by every iteration kind.
pub(crate) fn run<P: Phases>(
    this: &mut P,
    iterand: Vector,
    root: &NodeRef,
    solver: &mut dyn LinearSolver,
    parent_time: Real,
    mut initialized: bool,
) -> Result<Vector, PdeError> {
    this.set_time(parent_time);
    this.base().core.borrow_mut().its.push(0);

    for node in attached_nodes(this.base()) {
        node.borrow_mut().clear();
    }
    {
        let mut core = this.base().core.borrow_mut();
        core.history.clear();
        let t = core.implicit_time;
        core.history.push(t, iterand);
    }

    this.outer_head();
    loop {
        loop {
            this.timestep();

            let nodes = attached_nodes(this.base());
            for node in &nodes {
                node.borrow_mut().on_iteration_start();
            }

            let child = this.base().child.clone();
            if let Some(child) = child {
                let (t, previous) = {
                    let core = this.base().core.borrow();
                    (core.implicit_time, core.history.iterand(0).clone())
                };
                let solution = child
                    .borrow_mut()
                    .iterate_until_done(previous, root, solver, t, initialized)?;
                this.base().core.borrow_mut().history.push(t, solution);
            } else {
                solve_linear_system(this.base(), root, solver, initialized)?;
            }

            initialized = true;
            {
                let mut core = this.base().core.borrow_mut();
                *core.its.last_mut().expect("iteration count missing") += 1;
            }
            for node in nodes.iter().rev() {
                node.borrow_mut().on_iteration_end();
            }

            if !this.not_done()? {
                break;
            }
        }
        if !this.outer_tail()? {
            break;
        }
    }

    let result = this.base().core.borrow().history.iterand(0).clone();
    Ok(result)
}

/// Maximum elementwise relative difference between two vectors:
/// `max_i |a_i − b_i| / max(scale, |a_i|, |b_i|)`.
///
/// ```
/// use ferricpde::core::Vector;
/// use ferricpde::iteration::relative_error;
///
/// let a = Vector::from_vec(vec![1.0, 2.0]);
/// let b = Vector::from_vec(vec![1.0, 2.1]);
/// assert!((relative_error(&a, &b, 1.0) - 0.1 / 2.1).abs() < 1.0e-15);
/// ```
pub fn relative_error(a: &Vector, b: &Vector, scale: Real) -> Real {
    assert_eq!(a.len(), b.len(), "relative_error requires equal sizes");
    assert!(scale >= 0.0, "scale must be nonnegative");

    a.iter()
        .zip(b.iter())
        .map(|(&x, &y)| (x - y).abs() / scale.max(x.abs()).max(y.abs()))
        .fold(0.0, Real::max)
}
