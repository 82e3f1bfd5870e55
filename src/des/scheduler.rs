//! Event scheduler: simulated clock, handler binding and the dispatch loop.
//!
//! The scheduler is generic over four types: the event kind `K` (a small
//! closed enumeration), the attachment `A` carried by events, the mutable
//! run state `S` and the read-only parameters `P`. Handlers are plain
//! function pointers wrapped in [`Handler`], whose variant selects the
//! calling convention (no extra arguments, entity index, attachment, or
//! both).
//!
//! A run is strictly single-threaded: handlers execute to completion, may
//! schedule follow-up events at or after the current simulated time, and
//! never block. Simulated time is monotonic; a schedule into the past or a
//! pop that would move time backwards indicates a scenario bug and aborts
//! immediately.

use std::collections::HashMap;
use std::fmt::Debug;
use std::hash::Hash;

use log::trace;

use super::queue::{Event, EventId, EventQueue};

/// Simulated clock and event queue, exposed to handlers through [`Context`].
pub struct Kernel<K, A> {
    queue: EventQueue<K, A>,
    time: f64,
    stopped: bool,
}

impl<K: Copy + Eq + Hash + Debug, A> Kernel<K, A> {
    fn new() -> Self {
        Kernel {
            queue: EventQueue::new(),
            time: 0.0,
            stopped: false,
        }
    }

    /// Current simulated time in seconds.
    pub fn time(&self) -> f64 {
        self.time
    }

    /// Schedule an event at an absolute fire time and return its identifier.
    ///
    /// Panics if `time` lies before the current simulated time.
    pub fn schedule(&mut self, time: f64, kind: K, index: i64, att: Option<A>) -> EventId {
        assert!(
            time >= self.time,
            "schedule into the past: {kind:?} at t={time:.9} while now={:.9}",
            self.time
        );
        self.queue.push(time, kind, index, att)
    }

    /// Cancel a previously scheduled event. Idempotent; a stale identifier
    /// is harmless.
    pub fn cancel(&mut self, id: EventId) {
        self.queue.remove(id);
    }

    /// Raise the stop latch. The dispatch loop exits once the current
    /// event's handlers have returned.
    pub fn stop(&mut self) {
        self.stopped = true;
    }

    pub fn num_pending(&self) -> usize {
        self.queue.len()
    }

    fn pop_next(&mut self) -> Option<Event<K, A>> {
        let event = self.queue.pop()?;
        assert!(
            event.time >= self.time,
            "time regression: popped {:?} at t={:.9} while now={:.9}",
            event.kind,
            event.time,
            self.time
        );
        self.time = event.time;
        Some(event)
    }
}

/// Everything a handler sees: the kernel for scheduling and the shared
/// state/parameter pair installed via [`Scheduler::setup_context`].
pub struct Context<'a, K, A, S, P> {
    pub sim: &'a mut Kernel<K, A>,
    pub state: &'a mut S,
    pub params: &'a P,
}

/// A handler bound to an event kind. The variant selects which of the
/// event's fields are passed on.
pub enum Handler<K, A, S, P> {
    Empty(for<'a, 'b> fn(&'b mut Context<'a, K, A, S, P>)),
    Index(for<'a, 'b> fn(&'b mut Context<'a, K, A, S, P>, i64)),
    Att(for<'a, 'b> fn(&'b mut Context<'a, K, A, S, P>, &A)),
    IndexAtt(for<'a, 'b> fn(&'b mut Context<'a, K, A, S, P>, i64, &A)),
}

impl<K: Copy + Eq + Hash + Debug, A, S, P> Handler<K, A, S, P> {
    fn call(&self, ctx: &mut Context<'_, K, A, S, P>, kind: K, index: i64, att: Option<&A>) {
        match self {
            Handler::Empty(f) => f(ctx),
            Handler::Index(f) => f(ctx, index),
            Handler::Att(f) => match att {
                Some(att) => f(ctx, att),
                None => panic!("event {kind:?} at t={:.9} carries no attachment", ctx.sim.time()),
            },
            Handler::IndexAtt(f) => match att {
                Some(att) => f(ctx, index, att),
                None => panic!("event {kind:?} at t={:.9} carries no attachment", ctx.sim.time()),
            },
        }
    }
}

type InitFn<K, A, S, P> = for<'a, 'b> fn(&'b mut Context<'a, K, A, S, P>);

/// Drives the simulated clock and dispatches events to bound handlers.
pub struct Scheduler<K, A, S, P> {
    kernel: Kernel<K, A>,
    handlers: HashMap<K, Vec<Handler<K, A, S, P>>>,
    init_handlers: Vec<InitFn<K, A, S, P>>,
    state: Option<S>,
    params: Option<P>,
}

impl<K: Copy + Eq + Hash + Debug, A, S, P> Scheduler<K, A, S, P> {
    pub fn new() -> Self {
        Scheduler {
            kernel: Kernel::new(),
            handlers: HashMap::new(),
            init_handlers: Vec::new(),
            state: None,
            params: None,
        }
    }

    /// Register a handler for an event kind. Multiple handlers per kind are
    /// allowed and run in bind order.
    pub fn bind(&mut self, kind: K, handler: Handler<K, A, S, P>) {
        self.handlers.entry(kind).or_default().push(handler);
    }

    /// Register a one-shot initializer invoked before the first event pops.
    pub fn bind_init(&mut self, handler: InitFn<K, A, S, P>) {
        self.init_handlers.push(handler);
    }

    /// Install the state/parameter pair handed to every handler.
    pub fn setup_context(&mut self, state: S, params: P) {
        self.state = Some(state);
        self.params = Some(params);
    }

    /// Schedule an event before (or between) runs. Thin pass-through to the
    /// kernel, mostly useful to seed externally triggered events.
    pub fn schedule(&mut self, time: f64, kind: K, index: i64, att: Option<A>) -> EventId {
        self.kernel.schedule(time, kind, index, att)
    }

    pub fn cancel(&mut self, id: EventId) {
        self.kernel.cancel(id);
    }

    pub fn time(&self) -> f64 {
        self.kernel.time()
    }

    /// Run the event loop: reset the clock, invoke initializers, then pop
    /// and dispatch until the queue drains or [`Kernel::stop`] is raised.
    pub fn run(&mut self) {
        let Scheduler { kernel, handlers, init_handlers, state, params } = self;
        let state = state.as_mut().expect("setup_context() must be called before run()");
        let params = params.as_ref().expect("setup_context() must be called before run()");

        kernel.time = 0.0;
        let mut ctx = Context { sim: kernel, state, params };

        for init in init_handlers.iter() {
            init(&mut ctx);
        }

        while !ctx.sim.stopped {
            let Some(event) = ctx.sim.pop_next() else { break };
            let Some(bound) = handlers.get(&event.kind) else { continue };
            for handler in bound {
                handler.call(&mut ctx, event.kind, event.index, event.att.as_ref());
            }
        }
        trace!("event loop finished: {} events left pending", ctx.sim.num_pending());
    }

    /// Take back the run state once the loop has returned.
    pub fn into_state(self) -> S {
        self.state.expect("setup_context() must be called before into_state()")
    }

    pub fn state(&self) -> &S {
        self.state.as_ref().expect("setup_context() must be called before state()")
    }
}

impl<K: Copy + Eq + Hash + Debug, A, S, P> Default for Scheduler<K, A, S, P> {
    fn default() -> Self {
        Self::new()
    }
}
