//! Reaction Implementation
//!
//! A Reaction runs a side-effecting [`Reactor`] whenever its input changes.
//!
//! # How Reactions Work
//!
//! 1. Starting a reaction subscribes it to its input and runs the reactor
//!    once with the current value.
//!
//! 2. A change upstream marks the reaction pending and queues it. Marking
//!    stops at nodes already pending, so a reaction is queued at most once
//!    per cycle no matter how many paths lead to it.
//!
//! 3. When the queue runs, the reaction resolves its input. The reactor is
//!    only called if the input actually changed.
//!
//! 4. If the input becomes unset, the reaction stops itself.
//!
//! # Lifetime
//!
//! Parents only hold reactions weakly. A reaction lives as long as one of
//! its handles does; dropping the last handle stops it.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::rc::{Rc, Weak};

use super::derivable::{Derivable, Input};
use super::equality::Datum;
use super::reactor::Reactor;
use super::runtime::{Raised, Runtime};
use crate::error::{Result, StateError};
use crate::graph::{Color, Node, NodeCore, NodeId, ReactionQueue};

pub(crate) struct ReactionNode<T: Datum> {
    core: NodeCore,
    input: RefCell<Option<Input<T>>>,
    reactor: RefCell<Option<Box<dyn Reactor<T>>>>,
    enabled: Cell<bool>,
    /// Raised while the reactor is out of its slot being called.
    reacting: Cell<bool>,
    /// A stop requested while reacting; its hook runs once the call returns.
    stop_pending: Cell<bool>,
    this: Weak<ReactionNode<T>>,
}

impl<T: Datum> ReactionNode<T> {
    fn erased(&self) -> Option<Rc<dyn Node>> {
        self.this.upgrade().map(|this| this as Rc<dyn Node>)
    }

    fn input(&self) -> Option<Input<T>> {
        self.input.borrow().clone()
    }

    /// Call `f` on the reactor, outside of its slot so that the reactor may
    /// reach back into this reaction.
    fn call_reactor(&self, f: impl FnOnce(&mut Box<dyn Reactor<T>>)) {
        let taken = self.reactor.borrow_mut().take();
        let Some(mut reactor) = taken else { return };
        {
            let _reacting = Raised::raise(&self.reacting);
            f(&mut reactor);
        }
        self.restore_reactor(reactor);
        if !self.enabled.get() && self.stop_pending.replace(false) {
            self.run_on_stop();
        }
    }

    fn run_on_stop(&self) {
        let taken = self.reactor.borrow_mut().take();
        let Some(mut reactor) = taken else { return };
        reactor.on_stop();
        self.restore_reactor(reactor);
    }

    /// Put `reactor` back unless a new one was installed meanwhile.
    fn restore_reactor(&self, reactor: Box<dyn Reactor<T>>) {
        let mut slot = self.reactor.borrow_mut();
        if slot.is_none() {
            *slot = Some(reactor);
        }
    }

    fn start(&self) -> Result<()> {
        if self.enabled.get() {
            return Ok(());
        }
        let input = self.input().ok_or(StateError::NoInput)?;
        if self.reactor.borrow().is_none() {
            return Err(StateError::NoReactor.into());
        }

        if let Some(this) = self.erased() {
            input.node().core().add_child(&this);
        }
        self.enabled.set(true);
        tracing::debug!(reaction = %self.core.id(), input = %input.id(), "reaction started");

        self.call_reactor(|reactor| reactor.on_start());
        if !self.enabled.get() {
            return Ok(());
        }
        self.force()
    }

    fn stop(&self) {
        if !self.enabled.replace(false) {
            return;
        }
        if let Some(input) = self.input.borrow().as_ref() {
            input.node().core().remove_child(self.core.id());
        }
        self.core.set_color(Color::Green);
        tracing::debug!(reaction = %self.core.id(), "reaction stopped");

        if self.reacting.get() {
            self.stop_pending.set(true);
        } else {
            self.run_on_stop();
        }
    }

    /// Call the reactor with the input's current value.
    fn force(&self) -> Result<()> {
        let input = self.input().ok_or(StateError::NoInput)?;
        if self.reactor.borrow().is_none() {
            return Err(StateError::NoReactor.into());
        }

        let runtime = input.runtime();
        match input.read_untracked()? {
            Some(value) => {
                let _reactions = runtime.enter_reactions();
                self.call_reactor(|reactor| reactor.react(&value));
            }
            None => tracing::trace!(reaction = %self.core.id(), "input unset, reactor not called"),
        }
        if self.enabled.get() {
            self.core.set_color(Color::White);
        }
        runtime.drain_deferred()
    }

    fn set_input(&self, next: Option<Input<T>>) {
        let previous = self.input.replace(next.clone());
        if let Some(previous) = previous {
            previous.node().core().remove_child(self.core.id());
        }
        if !self.enabled.get() {
            return;
        }
        match next {
            Some(input) => {
                if let Some(this) = self.erased() {
                    input.node().core().add_child(&this);
                }
            }
            None => self.stop(),
        }
    }
}

impl<T: Datum> Node for ReactionNode<T> {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn mark(&self, queue: &mut ReactionQueue) {
        if self.core.color() == Color::Black {
            return;
        }
        self.core.set_color(Color::Black);
        if self.enabled.get() {
            if let Some(this) = self.erased() {
                queue.push(this);
            }
        }
    }

    fn remark(&self, queue: &mut ReactionQueue, _seen: &mut HashSet<NodeId>) {
        if self.enabled.get() {
            self.core.set_color(Color::Black);
            if let Some(this) = self.erased() {
                queue.push(this);
            }
        }
    }

    fn sweep(&self) {}

    fn invalidate(&self, _seen: &mut HashSet<NodeId>) {
        if self.enabled.get() {
            self.core.set_color(Color::White);
        }
    }

    fn maybe_react(&self) -> Result<()> {
        if self.core.color() != Color::Black || !self.enabled.get() {
            return Ok(());
        }
        let Some(input) = self.input() else {
            self.core.set_color(Color::White);
            return Ok(());
        };

        if let Err(error) = input.resolve() {
            self.core.set_color(Color::White);
            return Err(error);
        }
        if input.is_unset() {
            tracing::debug!(reaction = %self.core.id(), "input became unset");
            self.stop();
            return Ok(());
        }
        if input.color() == Color::Red {
            self.force()
        } else {
            self.core.set_color(Color::White);
            Ok(())
        }
    }
}

impl<T: Datum> Drop for ReactionNode<T> {
    fn drop(&mut self) {
        if self.enabled.get() {
            if let Some(reactor) = self.reactor.get_mut() {
                reactor.on_stop();
            }
        }
    }
}

/// A side effect bound to an input.
///
/// # Example
///
/// ```rust
/// use std::cell::Cell;
/// use std::rc::Rc;
///
/// use ratom_core::{Reaction, Runtime};
///
/// let rt = Runtime::new();
/// let count = rt.atom(0);
/// let seen = Rc::new(Cell::new(-1));
/// let sink = seen.clone();
///
/// let reaction = Reaction::new();
/// reaction.set_input(&count).set_reactor(move |n: &i32| sink.set(*n));
/// reaction.start().unwrap();
/// assert_eq!(seen.get(), 0);
///
/// count.set(3).unwrap();
/// assert_eq!(seen.get(), 3);
///
/// reaction.stop();
/// count.set(4).unwrap();
/// assert_eq!(seen.get(), 3);
/// ```
#[must_use = "a reaction stops when its last handle is dropped"]
pub struct Reaction<T: Datum>(Rc<ReactionNode<T>>);

impl<T: Datum> Reaction<T> {
    /// Create a stopped reaction with no input and no reactor.
    pub fn new() -> Self {
        let node = Rc::new_cyclic(|this| ReactionNode {
            core: NodeCore::new(Color::Green),
            input: RefCell::new(None),
            reactor: RefCell::new(None),
            enabled: Cell::new(false),
            reacting: Cell::new(false),
            stop_pending: Cell::new(false),
            this: this.clone(),
        });
        tracing::trace!(reaction = %node.core.id(), "reaction created");
        Self(node)
    }

    /// Get the reaction's unique ID.
    pub fn id(&self) -> NodeId {
        self.0.core.id()
    }

    /// Current color. Stopped reactions are green.
    pub fn color(&self) -> Color {
        self.0.core.color()
    }

    /// Check if the reaction is started.
    pub fn is_enabled(&self) -> bool {
        self.0.enabled.get()
    }

    /// Monitor `input`, replacing the previous input.
    ///
    /// A started reaction moves its subscription immediately.
    pub fn set_input<D>(&self, input: &D) -> &Self
    where
        D: Derivable<T> + ?Sized,
    {
        self.0.set_input(Some(input.input()));
        self
    }

    /// Drop the input. A started reaction stops.
    pub fn clear_input(&self) -> &Self {
        self.0.set_input(None);
        self
    }

    /// Replace the reactor.
    pub fn set_reactor<R>(&self, reactor: R) -> &Self
    where
        R: Reactor<T> + 'static,
    {
        *self.0.reactor.borrow_mut() = Some(Box::new(reactor));
        self
    }

    /// Subscribe to the input and run the reactor with its current value.
    ///
    /// A no-op if already started. Fails if there is no input or no reactor.
    /// An unset input does not call the reactor, but the reaction stays
    /// started and fires once a value appears.
    pub fn start(&self) -> Result<()> {
        self.0.start()
    }

    /// Unsubscribe from the input. Idempotent.
    pub fn stop(&self) {
        self.0.stop()
    }

    /// Run the reactor with the input's current value, whether or not it
    /// changed.
    pub fn force(&self) -> Result<()> {
        self.0.force()
    }
}

impl Runtime {
    /// Create a stopped reaction. Give it an input and a reactor, then
    /// [`start`](Reaction::start) it.
    pub fn reaction<T: Datum>(&self) -> Reaction<T> {
        Reaction::new()
    }
}

impl<T: Datum> Default for Reaction<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T: Datum> Clone for Reaction<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Datum> fmt::Debug for Reaction<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reaction")
            .field("id", &self.id())
            .field("input", &self.0.input.borrow().as_ref().map(Input::id))
            .field("enabled", &self.is_enabled())
            .field("color", &self.color())
            .finish()
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    type Log = Rc<RefCell<Vec<String>>>;

    struct Logged(Log);

    impl Reactor<i32> for Logged {
        fn react(&mut self, value: &i32) {
            self.0.borrow_mut().push(format!("react {value}"));
        }

        fn on_start(&mut self) {
            self.0.borrow_mut().push("start".into());
        }

        fn on_stop(&mut self) {
            self.0.borrow_mut().push("stop".into());
        }
    }

    #[test]
    fn start_requires_input_and_reactor() {
        let rt = Runtime::new();
        let reaction: Reaction<i32> = Reaction::new();
        assert_eq!(reaction.start(), Err(Error::State(StateError::NoInput)));

        reaction.set_input(&rt.atom(1));
        assert_eq!(reaction.start(), Err(Error::State(StateError::NoReactor)));
        assert_eq!(reaction.force(), Err(Error::State(StateError::NoReactor)));
        assert!(!reaction.is_enabled());
    }

    #[test]
    fn lifecycle_hooks_run_in_order() {
        let rt = Runtime::new();
        let a = rt.atom(1);
        let log: Log = Rc::default();

        let reaction = a.react(Logged(log.clone())).unwrap();
        a.set(2).unwrap();
        reaction.stop();
        reaction.stop();
        a.set(3).unwrap();

        assert_eq!(*log.borrow(), vec!["start", "react 1", "react 2", "stop"]);
        assert_eq!(reaction.color(), Color::Green);
        assert_eq!(a.dependent_count(), 0);
    }

    #[test]
    fn starting_twice_is_a_no_op() {
        let rt = Runtime::new();
        let a = rt.atom(1);
        let log: Log = Rc::default();
        let reaction = a.react(Logged(log.clone())).unwrap();
        reaction.start().unwrap();
        assert_eq!(log.borrow().len(), 2);
    }

    #[test]
    fn stop_from_inside_the_reactor_is_deferred() {
        let rt = Runtime::new();
        let a = rt.atom(0);
        let handle: Rc<RefCell<Option<Reaction<i32>>>> = Rc::default();
        let stops = Rc::new(Cell::new(0));

        struct StopAtThree {
            handle: Rc<RefCell<Option<Reaction<i32>>>>,
            stops: Rc<Cell<i32>>,
        }
        impl Reactor<i32> for StopAtThree {
            fn react(&mut self, value: &i32) {
                if *value == 3 {
                    if let Some(reaction) = self.handle.borrow().as_ref() {
                        reaction.stop();
                    }
                }
            }
            fn on_stop(&mut self) {
                self.stops.set(self.stops.get() + 1);
            }
        }

        let reaction = a
            .react(StopAtThree {
                handle: handle.clone(),
                stops: stops.clone(),
            })
            .unwrap();
        *handle.borrow_mut() = Some(reaction.clone());

        a.set(1).unwrap();
        assert!(reaction.is_enabled());
        a.set(3).unwrap();
        assert!(!reaction.is_enabled());
        assert_eq!(stops.get(), 1);

        handle.borrow_mut().take();
    }

    #[test]
    fn unset_input_stops_reaction() {
        let rt = Runtime::new();
        let a = rt.atom(Some(1));
        let source = a.clone();
        let inner = rt.derive_optional(move || source.get());
        let seen = Rc::new(Cell::new(0));
        let sink = seen.clone();
        let reaction = inner.react(move |v: &i32| sink.set(*v)).unwrap();
        assert_eq!(seen.get(), 1);

        a.set(None).unwrap();
        assert!(!reaction.is_enabled());
        assert_eq!(reaction.color(), Color::Green);

        a.set(Some(5)).unwrap();
        assert_eq!(seen.get(), 1);
    }

    #[test]
    fn switching_input_moves_subscription() {
        let rt = Runtime::new();
        let first = rt.atom(1);
        let second = rt.atom(10);
        let seen = Rc::new(Cell::new(0));
        let sink = seen.clone();

        let reaction = first.react(move |v: &i32| sink.set(*v)).unwrap();
        reaction.set_input(&second);
        assert_eq!(first.dependent_count(), 0);
        assert_eq!(second.dependent_count(), 1);

        first.set(2).unwrap();
        assert_eq!(seen.get(), 1);
        second.set(20).unwrap();
        assert_eq!(seen.get(), 20);

        reaction.clear_input();
        assert!(!reaction.is_enabled());
    }

    #[test]
    fn dropping_last_handle_stops() {
        let rt = Runtime::new();
        let a = rt.atom(1);
        let log: Log = Rc::default();
        {
            let _reaction = a.react(Logged(log.clone())).unwrap();
            assert_eq!(a.dependent_count(), 1);
        }
        assert_eq!(a.dependent_count(), 0);
        assert_eq!(log.borrow().last().map(String::as_str), Some("stop"));
    }
}
