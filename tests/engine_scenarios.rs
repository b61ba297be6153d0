//! End-to-end scenarios for the iteration engine: marches, events, nesting,
//! θ-scheme identities, solver-reuse gating, and lifecycle ordering.

use std::cell::RefCell;
use std::rc::Rc;

use approx::assert_relative_eq;
use nalgebra_sparse::CooMatrix;

use ferricpde::prelude::*;

fn diagonal_matrix(n: usize, value: Real) -> Matrix {
    let mut coo = CooMatrix::new(n, n);
    for i in 0..n {
        coo.push(i, i, value);
    }
    Matrix::from(&coo)
}

fn two_node_grid() -> Rc<Grid1> {
    Grid1::from_axis(Axis::uniform(0.0, 1.0, 1))
}

/// A spatial system frozen in time, with a switch for whether it reports its
/// matrix as unchanged.
struct FixedSystem {
    a: Matrix,
    b: Vector,
    same: bool,
}

impl FixedSystem {
    fn shared(a: Matrix, b: Vector) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self { a, b, same: true }))
    }
}

impl LinearSystem for FixedSystem {
    fn a(&mut self, _t: Real) -> Matrix {
        self.a.clone()
    }

    fn b(&mut self, _t: Real) -> Vector {
        self.b.clone()
    }

    fn is_a_the_same(&self) -> bool {
        self.same
    }
}

/// A root whose solve reproduces the previous iterand: `A = I`,
/// `b = iterand(0)`.
struct IdentityCarry {
    context: NodeContext,
    size: usize,
}

impl IdentityCarry {
    fn node(size: usize) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            context: NodeContext::new(),
            size,
        }))
    }
}

impl LinearSystem for IdentityCarry {
    fn a(&mut self, _t: Real) -> Matrix {
        Matrix::identity(self.size)
    }

    fn b(&mut self, _t: Real) -> Vector {
        self.context.iterand(0)
    }

    fn is_a_the_same(&self) -> bool {
        true
    }
}

impl IterationNode for IdentityCarry {
    fn context(&self) -> &NodeContext {
        &self.context
    }

    fn context_mut(&mut self) -> &mut NodeContext {
        &mut self.context
    }
}

/// Records lifecycle callbacks and the implicit time of every step.
struct Probe {
    context: NodeContext,
    name: &'static str,
    log: Rc<RefCell<Vec<String>>>,
    times: Rc<RefCell<Vec<Real>>>,
}

impl Probe {
    fn node(
        name: &'static str,
        log: &Rc<RefCell<Vec<String>>>,
        times: &Rc<RefCell<Vec<Real>>>,
    ) -> Rc<RefCell<Self>> {
        Rc::new(RefCell::new(Self {
            context: NodeContext::new(),
            name,
            log: log.clone(),
            times: times.clone(),
        }))
    }
}

impl LinearSystem for Probe {
    fn a(&mut self, _t: Real) -> Matrix {
        unreachable!("a probe is never the root")
    }

    fn b(&mut self, _t: Real) -> Vector {
        unreachable!("a probe is never the root")
    }
}

impl IterationNode for Probe {
    fn context(&self) -> &NodeContext {
        &self.context
    }

    fn context_mut(&mut self) -> &mut NodeContext {
        &mut self.context
    }

    fn clear(&mut self) {
        self.log.borrow_mut().push(format!("clear:{}", self.name));
    }

    fn on_after_event(&mut self) {
        self.log
            .borrow_mut()
            .push(format!("after_event:{}", self.name));
    }

    fn on_iteration_start(&mut self) {
        self.log.borrow_mut().push(format!("start:{}", self.name));
        self.times.borrow_mut().push(self.context.next_time());
    }

    fn on_iteration_end(&mut self) {
        self.log.borrow_mut().push(format!("end:{}", self.name));
    }
}

/// Forwards to BiCGSTAB while counting initializations.
struct CountingSolver {
    inner: BiCgStab,
    initializations: Rc<RefCell<usize>>,
}

impl LinearSolver for CountingSolver {
    fn initialize(&mut self, a: Matrix) -> Result<(), PdeError> {
        *self.initializations.borrow_mut() += 1;
        self.inner.initialize(a)
    }

    fn solve(&mut self, b: &Vector, warm_start: &Vector) -> Result<Vector, PdeError> {
        self.inner.solve(b, warm_start)
    }
}

#[test]
fn an_identity_march_under_reverse_crank_nicolson_preserves_the_iterand() {
    let grid = Grid1::from_axis(Axis::new(vec![0.0, 1.0, 2.0]));
    let system = FixedSystem::shared(diagonal_matrix(3, 0.0), Vector::zeros(3));
    let scheme = Rc::new(RefCell::new(ThetaScheme::crank_nicolson(
        grid.clone(),
        system,
        TimeDirection::Reverse,
    )));
    let root: NodeRef = scheme;

    let mut stepper = TimeIteration::constant(TimeDirection::Reverse, 0.0, 1.0, 0.25);
    stepper.attach(&root);

    let mut solver = BiCgStab::new();
    let solution = stepper
        .solve(&grid, |x| 1.0 + x[0], &root, &mut solver)
        .unwrap();

    for (i, expected) in [1.0, 2.0, 3.0].into_iter().enumerate() {
        assert_relative_eq!(solution.values()[i], expected, epsilon = 1.0e-14);
    }
    assert_eq!(stepper.iterations(), vec![1, 1, 1, 1]);
}

#[test]
fn diagonal_decay_under_the_implicit_scheme_compounds_per_step() {
    let grid = two_node_grid();
    let system = FixedSystem::shared(diagonal_matrix(2, 1.0), Vector::zeros(2));
    let scheme = Rc::new(RefCell::new(ThetaScheme::implicit(
        grid.clone(),
        system,
        TimeDirection::Forward,
    )));
    let root: NodeRef = scheme;

    let mut stepper = TimeIteration::constant(TimeDirection::Forward, 0.0, 1.0, 0.1);
    stepper.attach(&root);

    let mut solver = BiCgStab::new();
    let solution = stepper.solve(&grid, |_| 1.0, &root, &mut solver).unwrap();

    let expected = (1.0_f64 / 1.1).powi(10);
    assert_relative_eq!(solution.values()[0], expected, epsilon = 1.0e-9);
    assert_relative_eq!(solution.values()[1], expected, epsilon = 1.0e-9);
    assert_eq!(stepper.iterations().len(), 10);
}

#[test]
fn timesteps_clamp_onto_events_and_never_overshoot() {
    let grid = two_node_grid();
    let root: NodeRef = IdentityCarry::node(2);

    let log = Rc::new(RefCell::new(Vec::new()));
    let times = Rc::new(RefCell::new(Vec::new()));
    let probe: NodeRef = Probe::node("probe", &log, &times);

    let mut stepper = TimeIteration::constant(TimeDirection::Forward, 0.0, 1.0, 0.3);
    stepper.attach(&probe);
    stepper.attach(&root);
    stepper.add_event(0.5, Event::new(|v| Vector::zeros(v.len())));

    let mut solver = BiCgStab::new();
    let solution = stepper.solve(&grid, |_| 7.0, &root, &mut solver).unwrap();

    let times = times.borrow();
    assert_eq!(times.len(), 4, "expected four steps, got {times:?}");
    assert_relative_eq!(times[0], 0.3, epsilon = 1.0e-12);
    assert_eq!(times[1], 0.5, "the step must land exactly on the event");
    assert_relative_eq!(times[2], 0.8, epsilon = 1.0e-12);
    assert_eq!(times[3], 1.0, "the march must stop exactly at the end");

    // The zeroing event fired and the identity carry kept the zeros.
    assert_eq!(solution.values().amax(), 0.0);
    assert_eq!(stepper.iterations(), vec![1, 1, 1, 1]);
}

#[test]
fn a_step_landing_within_epsilon_snaps_to_the_event_time() {
    let grid = two_node_grid();
    let root: NodeRef = IdentityCarry::node(2);

    let log = Rc::new(RefCell::new(Vec::new()));
    let times = Rc::new(RefCell::new(Vec::new()));
    let probe: NodeRef = Probe::node("probe", &log, &times);

    let event_time = 0.5 + 5.0e-7;
    let mut stepper = TimeIteration::constant(TimeDirection::Forward, 0.0, 1.0, 0.5);
    stepper.attach(&probe);
    stepper.attach(&root);
    stepper.add_event(event_time, Event::new(|v| v.clone()));

    let mut solver = BiCgStab::new();
    stepper.solve(&grid, |_| 1.0, &root, &mut solver).unwrap();

    let times = times.borrow();
    assert_eq!(
        times[0], event_time,
        "a 0.5 step lands 5e-7 short of the event and must snap onto it"
    );
    assert_eq!(*times.last().unwrap(), 1.0);
}

#[test]
fn simultaneous_events_fire_later_inserted_first_when_forward() {
    let grid = two_node_grid();
    let root: NodeRef = IdentityCarry::node(2);

    let mut stepper = TimeIteration::constant(TimeDirection::Forward, 0.0, 1.0, 0.5);
    stepper.attach(&root);
    stepper.add_event(0.5, Event::new(|v| v.add_scalar(1.0)));
    stepper.add_event(0.5, Event::new(|v| v * 2.0));

    let mut solver = BiCgStab::new();
    let solution = stepper.solve(&grid, |_| 3.0, &root, &mut solver).unwrap();

    // Multiply fires first, then add: 2·3 + 1.
    assert_relative_eq!(solution.values()[0], 7.0, epsilon = 1.0e-12);
}

#[test]
fn simultaneous_events_fire_in_insertion_order_when_reverse() {
    let grid = two_node_grid();
    let root: NodeRef = IdentityCarry::node(2);

    let mut stepper = TimeIteration::constant(TimeDirection::Reverse, 0.0, 1.0, 0.5);
    stepper.attach(&root);
    stepper.add_event(0.5, Event::new(|v| v.add_scalar(1.0)));
    stepper.add_event(0.5, Event::new(|v| v * 2.0));

    let mut solver = BiCgStab::new();
    let solution = stepper.solve(&grid, |_| 3.0, &root, &mut solver).unwrap();

    // Add fires first, then multiply: 2·(3 + 1).
    assert_relative_eq!(solution.values()[0], 8.0, epsilon = 1.0e-12);
}

#[test]
fn tolerance_iteration_nested_inside_a_time_march() {
    let grid = two_node_grid();
    let root: NodeRef = IdentityCarry::node(2);

    let mut stepper = TimeIteration::constant(TimeDirection::Reverse, 0.0, 1.0, 0.25);
    let tolerance = Rc::new(RefCell::new(ToleranceIteration::new()));
    stepper.set_inner_iteration(tolerance.clone());
    tolerance.borrow().attach(&root);

    let mut solver = BiCgStab::new();
    let solution = stepper.solve(&grid, |_| 5.0, &root, &mut solver).unwrap();

    assert_relative_eq!(solution.values()[0], 5.0, epsilon = 1.0e-12);
    assert_eq!(stepper.iterations(), vec![1, 1, 1, 1]);
    assert_eq!(tolerance.borrow().iterations(), vec![2, 2, 2, 2]);
}

#[test]
fn theta_scheme_identities_for_one_manufactured_step() {
    // A = diag(2), b = 3, x0 = 1 over a single step of Δt = 1/2:
    //   implicit:       (1 + 1)·x1 = x0 + 3              → x1 = 2
    //   explicit:        x1 = (1 − 1)·x0 + 3             → x1 = 3
    //   Crank-Nicolson: (1 + 1/2)·x1 = (1 − 1/2)·x0 + 3  → x1 = 7/3
    type Make = fn(Rc<Grid1>, Rc<RefCell<dyn LinearSystem>>, TimeDirection) -> ThetaScheme<1>;
    let cases: [(Real, Make); 3] = [
        (2.0, ThetaScheme::implicit),
        (3.0, ThetaScheme::explicit),
        (7.0 / 3.0, ThetaScheme::crank_nicolson),
    ];

    for (expected, make) in cases {
        let grid = two_node_grid();
        let system = FixedSystem::shared(diagonal_matrix(2, 2.0), Vector::from_element(2, 3.0));
        let root: NodeRef =
            Rc::new(RefCell::new(make(grid.clone(), system, TimeDirection::Forward)));

        let mut stepper = TimeIteration::constant(TimeDirection::Forward, 0.0, 0.5, 0.5);
        stepper.attach(&root);

        let mut solver = BiCgStab::new();
        let solution = stepper.solve(&grid, |_| 1.0, &root, &mut solver).unwrap();
        assert_relative_eq!(solution.values()[0], expected, epsilon = 1.0e-10);
    }
}

#[test]
fn solver_reinitializes_only_when_the_matrix_changes() {
    for (system_same, expected_initializations) in [(true, 1), (false, 4)] {
        let grid = two_node_grid();
        let system = FixedSystem::shared(diagonal_matrix(2, 1.0), Vector::zeros(2));
        system.borrow_mut().same = system_same;
        let scheme = Rc::new(RefCell::new(ThetaScheme::implicit(
            grid.clone(),
            system,
            TimeDirection::Forward,
        )));
        let root: NodeRef = scheme;

        let mut stepper = TimeIteration::constant(TimeDirection::Forward, 0.0, 1.0, 0.25);
        stepper.attach(&root);

        let initializations = Rc::new(RefCell::new(0));
        let mut solver = CountingSolver {
            inner: BiCgStab::new(),
            initializations: initializations.clone(),
        };
        stepper.solve(&grid, |_| 1.0, &root, &mut solver).unwrap();

        assert_eq!(
            *initializations.borrow(),
            expected_initializations,
            "system_same = {system_same}"
        );
    }
}

#[test]
fn lifecycle_hooks_fire_in_attachment_order_and_reverse() {
    let grid = two_node_grid();
    let root: NodeRef = IdentityCarry::node(2);

    let log = Rc::new(RefCell::new(Vec::new()));
    let times = Rc::new(RefCell::new(Vec::new()));
    let first: NodeRef = Probe::node("a", &log, &times);
    let second: NodeRef = Probe::node("b", &log, &times);

    let mut stepper = TimeIteration::constant(TimeDirection::Forward, 0.0, 1.0, 0.5);
    stepper.attach(&first);
    stepper.attach(&second);
    stepper.attach(&root);
    stepper.add_event(0.5, Event::new(|v| v.clone()));

    let mut solver = BiCgStab::new();
    stepper.solve(&grid, |_| 1.0, &root, &mut solver).unwrap();

    let expected: Vec<String> = [
        "clear:a",
        "clear:b",
        "start:a",
        "start:b",
        "end:b",
        "end:a",
        "after_event:a",
        "after_event:b",
        "start:a",
        "start:b",
        "end:b",
        "end:a",
        "after_event:a",
        "after_event:b",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    assert_eq!(*log.borrow(), expected);
}

#[test]
fn variable_steps_terminate_exactly_at_the_terminal_time() {
    let grid = two_node_grid();
    let root: NodeRef = IdentityCarry::node(2);

    let log = Rc::new(RefCell::new(Vec::new()));
    let times = Rc::new(RefCell::new(Vec::new()));
    let probe: NodeRef = Probe::node("probe", &log, &times);

    let mut stepper = TimeIteration::variable(TimeDirection::Forward, 0.0, 1.0, 0.2, 1.0);
    stepper.attach(&probe);
    stepper.attach(&root);

    let mut solver = BiCgStab::new();
    stepper.solve(&grid, |_| 4.0, &root, &mut solver).unwrap();

    let times = times.borrow();
    assert_relative_eq!(times[0], 0.2, epsilon = 1.0e-12);
    assert_eq!(
        *times.last().unwrap(),
        1.0,
        "march must stop exactly at the terminal time, got {times:?}"
    );
    assert!(
        times.windows(2).all(|w| w[0] < w[1]),
        "times must be strictly increasing: {times:?}"
    );
}

#[test]
fn dirichlet_overlay_pins_rows_and_right_hand_sides() {
    let grid = two_node_grid();
    let system = FixedSystem::shared(diagonal_matrix(2, 2.0), Vector::zeros(2));
    let mut scheme = ThetaScheme::implicit(grid.clone(), system, TimeDirection::Forward);
    scheme.add_dirichlet_node(0, |_t, _x| 42.0);
    let root: NodeRef = Rc::new(RefCell::new(scheme));

    let mut stepper = TimeIteration::constant(TimeDirection::Forward, 0.0, 1.0, 0.5);
    stepper.attach(&root);

    let mut solver = BiCgStab::new();
    let solution = stepper.solve(&grid, |_| 1.0, &root, &mut solver).unwrap();

    // Node 0 is pinned to the boundary value; node 1 decays under
    // (1 + Δt·2)⁻¹ per step, untouched by the overlay.
    assert_relative_eq!(solution.values()[0], 42.0, epsilon = 1.0e-10);
    assert_relative_eq!(solution.values()[1], 0.25, epsilon = 1.0e-10);
}

#[test]
fn a_capped_tolerance_iteration_surfaces_exhaustion() {
    // The root alternates the right-hand side between two values, so the
    // fixed point never settles.
    struct Alternating {
        context: NodeContext,
        flip: bool,
    }

    impl LinearSystem for Alternating {
        fn a(&mut self, _t: Real) -> Matrix {
            Matrix::identity(2)
        }

        fn b(&mut self, _t: Real) -> Vector {
            self.flip = !self.flip;
            Vector::from_element(2, if self.flip { 1.0 } else { 2.0 })
        }
    }

    impl IterationNode for Alternating {
        fn context(&self) -> &NodeContext {
            &self.context
        }

        fn context_mut(&mut self) -> &mut NodeContext {
            &mut self.context
        }
    }

    let grid = two_node_grid();
    let root: NodeRef = Rc::new(RefCell::new(Alternating {
        context: NodeContext::new(),
        flip: false,
    }));

    let mut stepper = TimeIteration::constant(TimeDirection::Forward, 0.0, 1.0, 0.5);
    let tolerance = Rc::new(RefCell::new(
        ToleranceIteration::new().with_max_iterations(8),
    ));
    stepper.set_inner_iteration(tolerance.clone());
    tolerance.borrow().attach(&root);

    let mut solver = BiCgStab::new();
    let err = stepper
        .solve(&grid, |_| 0.0, &root, &mut solver)
        .unwrap_err();
    assert!(matches!(err, PdeError::ConvergenceFailure(_)), "{err}");
}
