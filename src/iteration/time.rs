//! Time marching with scheduled events.

use std::collections::VecDeque;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use crate::core::{PdeError, Real, Vector, EPSILON, SCALE};
use crate::grid::RectilinearGrid;
use crate::solver::LinearSolver;

use super::{attached_nodes, relative_error, run, Iteration, IterationBase, NodeRef, Phases};

/// March direction of a time iteration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TimeDirection {
    /// Time increases from the start time to the end time.
    Forward,
    /// Time decreases from the end time to the start time.
    Reverse,
}

impl TimeDirection {
    /// Returns +1.0 when forward and -1.0 when reverse.
    #[inline]
    pub fn sign(self) -> Real {
        match self {
            Self::Forward => 1.0,
            Self::Reverse => -1.0,
        }
    }

    /// True if and only if `a` lies strictly beyond `b` in march order.
    #[inline]
    pub fn order(self, a: Real, b: Real) -> bool {
        match self {
            Self::Forward => a > b,
            Self::Reverse => a < b,
        }
    }
}

type EventFn = dyn Fn(&Vector) -> Vector;

/// A pure transformation of the iterand applied at a scheduled time.
///
/// Events never mutate their input; they return the transformed vector.
#[derive(Clone)]
pub struct Event {
    apply: Rc<EventFn>,
}

impl Event {
    /// Wraps a raw vector transformation.
    pub fn new(apply: impl Fn(&Vector) -> Vector + 'static) -> Self {
        Self {
            apply: Rc::new(apply),
        }
    }

    /// An event that transforms the solution value at every grid node:
    /// `v_i ← transform(v_i, x_i)`. Payoff transforms, rebates, and discrete
    /// dividends are all of this shape.
    pub fn transform<const D: usize>(
        grid: &Rc<RectilinearGrid<D>>,
        transform: impl Fn(Real, [Real; D]) -> Real + 'static,
    ) -> Self {
        let grid = grid.clone();
        Self::new(move |v| {
            let mut out = v.clone();
            for i in 0..grid.size() {
                out[i] = transform(v[i], grid.node(i));
            }
            out
        })
    }

    /// The do-nothing event; scheduled at the terminal time so the march is
    /// guaranteed to stop there.
    fn identity() -> Self {
        Self::new(|v| v.clone())
    }

    /// Applies the event to an iterand.
    pub fn apply(&self, iterand: &Vector) -> Vector {
        (self.apply)(iterand)
    }
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("Event")
    }
}

#[derive(Clone)]
struct ScheduledEvent {
    seq: u32,
    time: Real,
    event: Event,
}

/// Step-size policy supplied to a time iteration.
enum StepPolicy {
    /// A fixed step size.
    Constant(Real),
    /// Steps sized so the relative change per step stays near `target`.
    Variable { initial_dt: Real, target: Real },
}

/// An iterative method that marches from an initial to a terminal time,
/// firing scheduled events along the way.
///
/// Timesteps never overshoot an event: a step landing within
/// [`EPSILON`](crate::core::EPSILON) of the next event snaps to it, and a
/// longer step is shortened to land on it exactly. Simultaneous events fire
/// later-inserted-first when marching forward and earlier-inserted-first when
/// marching in reverse.
pub struct TimeIteration {
    base: IterationBase,
    direction: TimeDirection,
    start_time: Real,
    end_time: Real,
    dt: Real,
    dt_previous: Real,
    policy: StepPolicy,
    schedule: Vec<ScheduledEvent>,
    next_seq: u32,
    // Working copy consumed during one solve; the schedule itself survives
    // so the iteration can be reused.
    queue: VecDeque<ScheduledEvent>,
}

impl TimeIteration {
    fn new(
        direction: TimeDirection,
        start_time: Real,
        end_time: Real,
        policy: StepPolicy,
    ) -> Self {
        assert!(start_time >= 0.0, "start time must be nonnegative");
        assert!(start_time < end_time, "start time must precede end time");
        Self {
            base: IterationBase::new(),
            direction,
            start_time,
            end_time,
            dt: -1.0,
            dt_previous: -1.0,
            policy,
            schedule: Vec::new(),
            next_seq: 0,
            queue: VecDeque::new(),
        }
    }

    /// A time iteration taking constant steps of size `dt`.
    pub fn constant(
        direction: TimeDirection,
        start_time: Real,
        end_time: Real,
        dt: Real,
    ) -> Self {
        assert!(dt > EPSILON, "timestep must exceed EPSILON");
        Self::new(direction, start_time, end_time, StepPolicy::Constant(dt))
    }

    /// A time iteration choosing each step so the relative change of the
    /// iterand per step stays near `target`; the first step of each segment
    /// uses `initial_dt`.
    pub fn variable(
        direction: TimeDirection,
        start_time: Real,
        end_time: Real,
        initial_dt: Real,
        target: Real,
    ) -> Self {
        assert!(initial_dt > EPSILON, "initial timestep must exceed EPSILON");
        assert!(target > 0.0, "target must be positive");
        Self::new(
            direction,
            start_time,
            end_time,
            StepPolicy::Variable { initial_dt, target },
        )
    }

    #[inline]
    pub fn start_time(&self) -> Real {
        self.start_time
    }

    #[inline]
    pub fn end_time(&self) -> Real {
        self.end_time
    }

    /// The time the march starts from.
    #[inline]
    pub fn initial_time(&self) -> Real {
        match self.direction {
            TimeDirection::Forward => self.start_time,
            TimeDirection::Reverse => self.end_time,
        }
    }

    /// The time the march stops at.
    #[inline]
    pub fn terminal_time(&self) -> Real {
        match self.direction {
            TimeDirection::Forward => self.end_time,
            TimeDirection::Reverse => self.start_time,
        }
    }

    /// Schedules an event. The time must lie inside the march interval and
    /// must not coincide with the initial time.
    pub fn add_event(&mut self, time: Real, event: Event) {
        assert!(time >= self.start_time, "event before the start time");
        assert!(
            time < self.end_time - EPSILON,
            "event at or beyond the end time"
        );
        assert!(time != self.initial_time(), "event at the initial time");

        self.schedule.push(ScheduledEvent {
            seq: self.next_seq,
            time,
            event,
        });
        self.next_seq += 1;
    }

    /// Schedules a per-node solution transform; see [`Event::transform`].
    pub fn add_transform<const D: usize>(
        &mut self,
        time: Real,
        grid: &Rc<RectilinearGrid<D>>,
        transform: impl Fn(Real, [Real; D]) -> Real + 'static,
    ) {
        self.add_event(time, Event::transform(grid, transform));
    }

    fn next_event_time(&self) -> Real {
        self.queue
            .front()
            .expect("event queue exhausted before the terminal time")
            .time
    }

    fn step_size(&self) -> Real {
        match &self.policy {
            StepPolicy::Constant(dt) => *dt,
            StepPolicy::Variable { initial_dt, target } => {
                let core = self.base.core.borrow();
                if self.dt <= 0.0 || core.history.len() < 2 {
                    return *initial_dt;
                }
                let change = relative_error(
                    core.history.iterand(0),
                    core.history.iterand(1),
                    SCALE,
                );
                self.dt * target / change.max(EPSILON)
            }
        }
    }
}

impl Iteration for TimeIteration {
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

    fn minimum_lookback(&self) -> usize {
        match self.policy {
            StepPolicy::Constant(_) => 1,
            // The step-size rule compares the two most recent iterands.
            StepPolicy::Variable { .. } => 2,
        }
    }
}

impl Phases for TimeIteration {
    fn set_time(&mut self, _parent_time: Real) {
        self.base.core.borrow_mut().implicit_time = self.initial_time();
        self.dt = -1.0;
    }

    fn outer_head(&mut self) {
        let mut entries = self.schedule.clone();
        entries.push(ScheduledEvent {
            seq: u32::MAX,
            time: self.terminal_time(),
            event: Event::identity(),
        });
        // Pop order: closest time in march order first; simultaneous events
        // later-inserted-first when forward, earlier-inserted-first when
        // reverse.
        match self.direction {
            TimeDirection::Forward => {
                entries.sort_by(|a, b| a.time.total_cmp(&b.time).then(b.seq.cmp(&a.seq)));
            }
            TimeDirection::Reverse => {
                entries.sort_by(|a, b| b.time.total_cmp(&a.time).then(a.seq.cmp(&b.seq)));
            }
        }
        self.queue = entries.into();
    }

    fn timestep(&mut self) {
        // Every step gets its own iteration-count slot; the first slot of a
        // call is pushed by the skeleton.
        if self.dt > 0.0 {
            self.base.core.borrow_mut().its.push(0);
        }

        self.dt_previous = self.dt;
        self.dt = self.step_size();
        assert!(self.dt > 0.0, "timestep must be positive");

        let event_time = self.next_event_time();
        let current = self.base.core.borrow().implicit_time;
        let mut target = current + self.direction.sign() * self.dt;

        if (target - event_time).abs() < EPSILON {
            // Landing within EPSILON of the event snaps to it without
            // shrinking the step.
            target = event_time;
        } else if self.direction.order(target, event_time) {
            target = event_time;
            self.dt = self.direction.sign() * (event_time - current);
        }

        let mut core = self.base.core.borrow_mut();
        core.implicit_time = target;
        core.timestep_same = self.dt == self.dt_previous;
    }

    fn not_done(&self) -> Result<bool, PdeError> {
        let event_time = self.next_event_time();
        let current = self.base.core.borrow().implicit_time;
        Ok(self
            .direction
            .order(event_time, current + self.direction.sign() * EPSILON))
    }

    fn outer_tail(&mut self) -> Result<bool, PdeError> {
        let event_time = self.next_event_time();
        self.base.core.borrow_mut().implicit_time = event_time;

        let mut current = self.base.core.borrow().history.iterand(0).clone();
        while self.queue.front().is_some_and(|entry| entry.time == event_time) {
            let entry = self.queue.pop_front().expect("front checked");
            current = entry.event.apply(&current);
        }

        for node in attached_nodes(&self.base) {
            node.borrow_mut().on_after_event();
        }
        {
            let mut core = self.base.core.borrow_mut();
            core.history.clear();
            core.history.push(event_time, current);
        }

        Ok(self.direction.order(self.terminal_time(), event_time))
    }
}
