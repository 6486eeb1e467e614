//! Reactive Runtime
//!
//! The runtime is the execution context that connects atoms, derivations and
//! reactions. Every node created from a runtime shares its dependency-capture
//! stack, its transaction stack and its configuration, so two runtimes never
//! observe each other's state and tests can build as many as they like.
//!
//! # How It Works
//!
//! 1. A write outside a transaction applies the value, marks everything
//!    downstream as pending and collects the reactions it reaches.
//!
//! 2. The queued reactions run once each. Reading their inputs pulls fresh
//!    values through the pending derivations.
//!
//! 3. The written atoms are swept, returning the graph to a settled state.
//!
//! 4. Writes made by reactions while step 2 runs are replayed afterwards as
//!    ordinary cycles, one batch at a time.
//!
//! # Threading
//!
//! The runtime is single-threaded (`Rc`/`RefCell`, not `Send`). Every
//! operation runs to completion before control returns to the caller.

use std::cell::{Cell, RefCell};
use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::rc::Rc;

use super::context::CaptureStack;
use super::equality::Datum;
use crate::config::RuntimeConfig;
use crate::error::{Error, Result};
use crate::graph::{Color, Node, NodeId, ReactionQueue};
use crate::transaction::{PendingWrite, TxnFrame};

/// State shared by a runtime and every node created from it.
struct Shared {
    config: RuntimeConfig,
    capture: CaptureStack,
    txns: RefCell<Vec<Rc<TxnFrame>>>,
    /// Raised while reactions run; writes made meanwhile are deferred.
    propagating: Cell<bool>,
    /// Raised while deferred batches are being replayed.
    draining: Cell<bool>,
    deferred: RefCell<VecDeque<Vec<PendingWrite>>>,
}

/// Handle to a reactive runtime.
///
/// Cloning is cheap and yields a handle to the same runtime.
///
/// # Example
///
/// ```rust
/// use ratom_core::{Derivable, Runtime};
///
/// let rt = Runtime::new();
/// let count = rt.atom(1);
/// let doubled = count.derive(|x| x * 2);
///
/// assert_eq!(doubled.get().unwrap(), Some(2));
/// count.set(5).unwrap();
/// assert_eq!(doubled.get().unwrap(), Some(10));
/// ```
#[derive(Clone)]
pub struct Runtime {
    shared: Rc<Shared>,
}

impl Runtime {
    /// Create a runtime with the default configuration.
    pub fn new() -> Self {
        Self::with_config(RuntimeConfig::default())
    }

    /// Create a runtime with the given configuration.
    pub fn with_config(config: RuntimeConfig) -> Self {
        Self {
            shared: Rc::new(Shared {
                config,
                capture: CaptureStack::default(),
                txns: RefCell::new(Vec::new()),
                propagating: Cell::new(false),
                draining: Cell::new(false),
                deferred: RefCell::new(VecDeque::new()),
            }),
        }
    }

    /// The configuration this runtime was built with.
    pub fn config(&self) -> &RuntimeConfig {
        &self.shared.config
    }

    /// Check if a transaction is running.
    pub fn in_transaction(&self) -> bool {
        !self.shared.txns.borrow().is_empty()
    }

    /// Run `f` without recording any of its reads as dependencies of the
    /// derivation currently being evaluated.
    pub fn untracked<R>(&self, f: impl FnOnce() -> R) -> R {
        let capture = self.shared.capture.suppress();
        let result = f();
        capture.finish();
        result
    }

    /// Check if two handles point at the same runtime.
    pub fn same(&self, other: &Runtime) -> bool {
        Rc::ptr_eq(&self.shared, &other.shared)
    }

    // ------------------------------------------------------------------------
    // Dependency capture
    // ------------------------------------------------------------------------

    pub(crate) fn capture(&self) -> &CaptureStack {
        &self.shared.capture
    }

    pub(crate) fn record_read(&self, node: Rc<dyn Node>) {
        self.shared.capture.record(node);
    }

    // ------------------------------------------------------------------------
    // Transaction stack
    // ------------------------------------------------------------------------

    pub(crate) fn current_txn(&self) -> Option<Rc<TxnFrame>> {
        self.shared.txns.borrow().last().cloned()
    }

    pub(crate) fn push_txn(&self, frame: Rc<TxnFrame>) {
        self.shared.txns.borrow_mut().push(frame);
    }

    /// Pop `frame` if it is the innermost transaction.
    pub(crate) fn pop_txn(&self, frame: &Rc<TxnFrame>) -> bool {
        let mut txns = self.shared.txns.borrow_mut();
        match txns.last() {
            Some(top) if Rc::ptr_eq(top, frame) => {
                txns.pop();
                true
            }
            _ => false,
        }
    }

    /// Look up the nearest pending write to `id` and pass it to `f`.
    pub(crate) fn with_pending<T: Datum, R>(
        &self,
        id: NodeId,
        f: impl FnOnce(&T) -> R,
    ) -> Option<R> {
        let txns = self.shared.txns.borrow();
        for frame in txns.iter().rev() {
            let log = frame.log.borrow();
            if let Some(value) = log.get(&id).and_then(|write| write.value.downcast_ref::<T>()) {
                return Some(f(value));
            }
        }
        None
    }

    /// Re-mark every atom still pending in the transaction stack into the
    /// queue of `into`. Used after a nested abort reset part of the graph.
    ///
    /// Nodes left pending by the enclosing writes may sit above nodes the
    /// abort reset, so the walk covers every descendant.
    pub(crate) fn remark_pending(&self, into: &TxnFrame) {
        let txns = self.shared.txns.borrow();
        let mut queue = into.queue.borrow_mut();
        let mut seen = HashSet::new();
        for frame in txns.iter() {
            for (id, write) in frame.log.borrow().iter() {
                if seen.insert(*id) {
                    write.node.set_color(Color::Red);
                    write.node.core().remark_children(&mut queue, &mut seen);
                }
            }
        }
    }

    // ------------------------------------------------------------------------
    // Propagation
    // ------------------------------------------------------------------------

    pub(crate) fn is_propagating(&self) -> bool {
        self.shared.propagating.get()
    }

    /// Raise the propagation flag until the guard is dropped.
    pub(crate) fn enter_reactions(&self) -> Raised<'_> {
        Raised::raise(&self.shared.propagating)
    }

    /// Route a write that passed validation and the equality check.
    pub(crate) fn write(&self, write: PendingWrite) -> Result<()> {
        if self.shared.config.warn_impure_writes && self.shared.capture.is_active() {
            tracing::warn!(
                atom = %write.node.id(),
                "atom written while a derivation is being evaluated"
            );
        }

        if let Some(frame) = self.current_txn() {
            let node = write.node.clone();
            if !frame.detached {
                node.set_color(Color::Red);
                node.core().mark_children(&mut frame.queue.borrow_mut());
            }
            frame.log.borrow_mut().insert(node.id(), write);
            return Ok(());
        }

        self.submit(vec![write])
    }

    /// Run `writes` as one cycle now, or after the running cycle finishes.
    pub(crate) fn submit(&self, writes: Vec<PendingWrite>) -> Result<()> {
        if self.is_propagating() {
            tracing::debug!(
                writes = writes.len(),
                "deferring writes until the running cycle completes"
            );
            self.shared.deferred.borrow_mut().push_back(writes);
            return Ok(());
        }
        self.run_batch(writes)
    }

    /// Apply `writes` to committed state and propagate the ones that changed.
    fn run_batch(&self, writes: Vec<PendingWrite>) -> Result<()> {
        let mut queue = ReactionQueue::default();
        let mut written = Vec::with_capacity(writes.len());
        for PendingWrite { node, target, value } in writes {
            if target.apply(value) {
                node.set_color(Color::Red);
                node.core().mark_children(&mut queue);
                written.push(node);
            }
        }
        self.propagate(queue, written)
    }

    /// Apply an outermost transaction's log. Its atoms are already red and
    /// its reactions already queued.
    ///
    /// An atom whose final value equals its committed one turns white, so
    /// nothing downstream of it reacts.
    pub(crate) fn commit_writes(
        &self,
        writes: Vec<PendingWrite>,
        queue: ReactionQueue,
    ) -> Result<()> {
        let mut written = Vec::with_capacity(writes.len());
        for PendingWrite { node, target, value } in writes {
            if !target.apply(value) {
                tracing::trace!(atom = %node.id(), "committed value unchanged");
                node.set_color(Color::White);
            }
            written.push(node);
        }
        self.propagate(queue, written)
    }

    /// Run the queued reactions, sweep the written atoms, then replay any
    /// writes the reactions made.
    fn propagate(&self, queue: ReactionQueue, written: Vec<Rc<dyn Node>>) -> Result<()> {
        let span =
            tracing::debug_span!("propagate", atoms = written.len(), reactions = queue.len());
        let _span = span.enter();

        let reacted = if queue.is_empty() {
            Ok(())
        } else {
            let _reactions = self.enter_reactions();
            queue.run()
        };
        for node in &written {
            node.sweep();
        }
        tracing::debug!("cycle settled");

        let drained = self.drain_deferred();
        reacted.and(drained)
    }

    /// Replay deferred batches until none are left.
    ///
    /// Only the outermost caller drains; batches queued by a replayed cycle
    /// are picked up by the same loop.
    pub(crate) fn drain_deferred(&self) -> Result<()> {
        if self.shared.draining.get() || self.is_propagating() {
            return Ok(());
        }
        let _draining = Raised::raise(&self.shared.draining);
        let limit = self.shared.config.max_cascade;
        let mut cycles = 0;
        let mut first_error = None;

        loop {
            let batch = self.shared.deferred.borrow_mut().pop_front();
            let Some(batch) = batch else { break };

            cycles += 1;
            if cycles > limit {
                let dropped = self.shared.deferred.borrow_mut().drain(..).count() + 1;
                tracing::warn!(limit, dropped, "cascade limit reached, dropping follow-up writes");
                return Err(Error::CascadeLimit { limit });
            }
            tracing::debug!(cycle = cycles, writes = batch.len(), "replaying deferred writes");
            if let Err(error) = self.run_batch(batch) {
                first_error.get_or_insert(error);
            }
        }

        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl Default for Runtime {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for Runtime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("config", &self.shared.config)
            .field("transactions", &self.shared.txns.borrow().len())
            .field("propagating", &self.shared.propagating.get())
            .field("deferred", &self.shared.deferred.borrow().len())
            .finish()
    }
}

/// Guard that raises a flag and restores its previous value when dropped.
pub(crate) struct Raised<'a> {
    flag: &'a Cell<bool>,
    previous: bool,
}

impl<'a> Raised<'a> {
    pub(crate) fn raise(flag: &'a Cell<bool>) -> Self {
        let previous = flag.replace(true);
        Self { flag, previous }
    }
}

impl Drop for Raised<'_> {
    fn drop(&mut self) {
        self.flag.set(self.previous);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn runtimes_are_isolated() {
        let first = Runtime::new();
        let second = Runtime::new();
        assert!(!first.same(&second));
        assert!(first.same(&first.clone()));

        let _txn = first.transaction();
        assert!(first.in_transaction());
        assert!(!second.in_transaction());
    }

    #[test]
    fn raised_flag_restores_previous_value() {
        let flag = Cell::new(false);
        {
            let _outer = Raised::raise(&flag);
            {
                let _inner = Raised::raise(&flag);
                assert!(flag.get());
            }
            assert!(flag.get());
        }
        assert!(!flag.get());
    }

    #[test]
    fn untracked_reads_do_not_leak_into_capture() {
        let rt = Runtime::new();
        let a = rt.atom(7);
        assert!(!rt.capture().is_active());
        let capture = rt.capture().enter(NodeId::new());
        let value = rt.untracked(|| {
            assert!(!rt.capture().is_active());
            a.get()
        });
        assert!(rt.capture().is_active());
        assert!(capture.finish().is_empty());
        assert_eq!(value, 7);
        assert!(!rt.capture().is_active());
    }

    #[test]
    fn config_is_carried() {
        let rt = Runtime::with_config(RuntimeConfig {
            max_cascade: 2,
            warn_impure_writes: false,
        });
        assert_eq!(rt.config().max_cascade, 2);
        assert!(format!("{rt:?}").contains("max_cascade: 2"));
    }
}
