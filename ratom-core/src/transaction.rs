//! Transactions
//!
//! A transaction groups atom writes so that the rest of the world observes
//! them all at once, or not at all.
//!
//! # How Transactions Work
//!
//! 1. Writes inside a transaction land in its log instead of the atom. Reads
//!    made inside the transaction see the log (nearest transaction first).
//!
//! 2. Each write still marks the graph downstream of the atom, and the
//!    reactions it reaches are collected in the transaction's queue.
//!
//! 3. Committing a nested transaction hands its log and queue to the parent.
//!    Committing the outermost one applies the log, runs the queue and
//!    sweeps the written atoms.
//!
//! 4. Aborting throws the log away and invalidates everything the writes
//!    marked, so cached values computed from the discarded state are never
//!    served again.
//!
//! A transaction opened while reactions are running is *detached*: it logs
//! writes without touching colors, and its outermost commit is replayed as
//! a follow-up cycle once the running one finishes.

use std::any::Any;
use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::rc::Rc;
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;

use crate::error::{Error, Result, StateError, TxnState};
use crate::graph::{Color, Node, NodeId, ReactionQueue};
use crate::reactive::Runtime;

/// Something a logged write can be applied to.
pub(crate) trait WriteTarget {
    /// Store `value` as committed state. Returns whether it changed.
    fn apply(&self, value: Box<dyn Any>) -> bool;
}

/// One logged write.
pub(crate) struct PendingWrite {
    pub(crate) node: Rc<dyn Node>,
    pub(crate) target: Rc<dyn WriteTarget>,
    pub(crate) value: Box<dyn Any>,
}

impl PendingWrite {
    pub(crate) fn new<A>(atom: Rc<A>, value: Box<dyn Any>) -> Self
    where
        A: Node + WriteTarget + 'static,
    {
        Self {
            node: atom.clone(),
            target: atom,
            value,
        }
    }
}

impl fmt::Debug for PendingWrite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingWrite")
            .field("atom", &self.node.id())
            .finish_non_exhaustive()
    }
}

fn next_txn_id() -> u64 {
    static COUNTER: AtomicU64 = AtomicU64::new(0);
    COUNTER.fetch_add(1, Ordering::Relaxed)
}

/// A transaction's context on the runtime's stack.
pub(crate) struct TxnFrame {
    pub(crate) id: u64,
    pub(crate) state: Cell<TxnState>,
    pub(crate) detached: bool,
    pub(crate) log: RefCell<IndexMap<NodeId, PendingWrite>>,
    pub(crate) queue: RefCell<ReactionQueue>,
}

/// Handle to a running (or finished) transaction.
///
/// Only the innermost running transaction can be committed or aborted.
/// Dropping a handle that is still running aborts it.
///
/// # Example
///
/// ```rust
/// use ratom_core::Runtime;
///
/// let rt = Runtime::new();
/// let a = rt.atom(1);
///
/// let txn = rt.transaction();
/// a.set(2).unwrap();
/// assert_eq!(a.get(), 2);
/// txn.abort().unwrap();
///
/// assert_eq!(a.get(), 1);
/// ```
#[must_use = "a transaction is aborted when its handle is dropped"]
pub struct Transaction {
    runtime: Runtime,
    frame: Rc<TxnFrame>,
}

impl Transaction {
    /// Transaction id, for diagnostics.
    pub fn id(&self) -> u64 {
        self.frame.id
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TxnState {
        self.frame.state.get()
    }

    /// Number of distinct atoms written so far.
    pub fn write_count(&self) -> usize {
        self.frame.log.borrow().len()
    }

    /// Commit the transaction.
    ///
    /// A nested commit makes the writes visible to the parent only. The
    /// outermost commit applies them and runs the affected reactions; an
    /// error returned by a reaction is reported here, after the state has
    /// been committed.
    pub fn commit(&self) -> Result<()> {
        self.finish(TxnState::Committed)?;
        let log = self.frame.log.take();
        let queue = self.frame.queue.take();

        if let Some(parent) = self.runtime.current_txn() {
            tracing::debug!(
                txn = self.id(),
                parent = parent.id,
                writes = log.len(),
                "merging into parent transaction"
            );
            parent.log.borrow_mut().extend(log);
            parent.queue.borrow_mut().append(queue);
            return Ok(());
        }

        tracing::debug!(txn = self.id(), writes = log.len(), reactions = queue.len(), "committing");
        let writes: Vec<PendingWrite> = log.into_values().collect();
        if self.frame.detached {
            return self.runtime.submit(writes);
        }
        self.runtime.commit_writes(writes, queue)
    }

    /// Abort the transaction, discarding its writes.
    pub fn abort(&self) -> Result<()> {
        self.finish(TxnState::Aborted)?;
        discard(&self.runtime, &self.frame);
        Ok(())
    }

    fn finish(&self, next: TxnState) -> Result<()> {
        let state = self.state();
        if state != TxnState::Running {
            return Err(StateError::NotRunning { id: self.id(), state }.into());
        }
        if !self.runtime.pop_txn(&self.frame) {
            return Err(StateError::NotInnermost { id: self.id() }.into());
        }
        self.frame.state.set(next);
        Ok(())
    }
}

/// Throw away an aborted frame's log and reset what its writes marked.
/// The frame must already be off the stack.
fn discard(runtime: &Runtime, frame: &TxnFrame) {
    let log = frame.log.take();
    drop(frame.queue.take());
    tracing::debug!(txn = frame.id, writes = log.len(), "aborting");

    if frame.detached || log.is_empty() {
        return;
    }

    let mut seen = HashSet::new();
    for write in log.values() {
        write.node.set_color(Color::White);
        write.node.core().invalidate_children(&mut seen);
    }
    // Invalidation may have cleared nodes the ancestors' writes marked.
    if let Some(parent) = runtime.current_txn() {
        runtime.remark_pending(&parent);
    }
}

impl Drop for Transaction {
    /// A running transaction is aborted, together with every transaction
    /// still running inside it.
    fn drop(&mut self) {
        if self.state() != TxnState::Running {
            return;
        }
        tracing::warn!(txn = self.id(), "transaction dropped while running, aborting");
        while let Some(top) = self.runtime.current_txn() {
            self.runtime.pop_txn(&top);
            top.state.set(TxnState::Aborted);
            discard(&self.runtime, &top);
            if Rc::ptr_eq(&top, &self.frame) {
                break;
            }
            tracing::warn!(txn = top.id, "nested transaction aborted with its parent");
        }
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id())
            .field("state", &self.state())
            .field("detached", &self.frame.detached)
            .field("writes", &self.write_count())
            .finish()
    }
}

impl Runtime {
    /// Begin a transaction nested inside the current one, if any.
    pub fn transaction(&self) -> Transaction {
        let parent = self.current_txn();
        let detached = self.is_propagating() || parent.as_ref().is_some_and(|p| p.detached);
        let frame = Rc::new(TxnFrame {
            id: next_txn_id(),
            state: Cell::new(TxnState::Running),
            detached,
            log: RefCell::new(IndexMap::new()),
            queue: RefCell::new(ReactionQueue::default()),
        });
        tracing::trace!(
            txn = frame.id,
            parent = parent.map(|p| p.id),
            detached,
            "transaction started"
        );
        self.push_txn(frame.clone());
        Transaction {
            runtime: self.clone(),
            frame,
        }
    }

    /// Run `body` in a transaction.
    ///
    /// Commits when `body` returns `Ok`, aborts when it returns `Err` or
    /// unwinds.
    ///
    /// ```rust
    /// use ratom_core::{Error, Runtime};
    ///
    /// let rt = Runtime::new();
    /// let a = rt.atom(1);
    /// let b = rt.atom(2);
    ///
    /// rt.transact(|| -> Result<(), Error> {
    ///     a.set(10)?;
    ///     b.set(20)?;
    ///     Ok(())
    /// })
    /// .unwrap();
    ///
    /// assert_eq!(a.get() + b.get(), 30);
    /// ```
    pub fn transact<R, E, F>(&self, body: F) -> Result<R, E>
    where
        F: FnOnce() -> Result<R, E>,
        E: From<Error>,
    {
        let txn = self.transaction();
        match body() {
            Ok(value) => {
                txn.commit()?;
                Ok(value)
            }
            Err(error) => {
                txn.abort()?;
                Err(error)
            }
        }
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Derivable;

    #[test]
    fn writes_are_isolated_until_commit() {
        let rt = Runtime::new();
        let a = rt.atom(1);
        let seen = Rc::new(Cell::new(0));
        let sink = seen.clone();
        let _reaction = a.react(move |v: &i32| sink.set(*v)).unwrap();
        assert_eq!(seen.get(), 1);

        let txn = rt.transaction();
        a.set(5).unwrap();
        assert_eq!(a.get(), 5);
        assert_eq!(seen.get(), 1);
        assert_eq!(txn.write_count(), 1);

        txn.commit().unwrap();
        assert_eq!(seen.get(), 5);
        assert_eq!(txn.state(), TxnState::Committed);
    }

    #[test]
    fn finished_transaction_rejects_commit_and_abort() {
        let rt = Runtime::new();
        let txn = rt.transaction();
        txn.commit().unwrap();

        assert!(matches!(
            txn.commit(),
            Err(Error::State(StateError::NotRunning {
                state: TxnState::Committed,
                ..
            }))
        ));
        assert!(matches!(
            txn.abort(),
            Err(Error::State(StateError::NotRunning { .. }))
        ));
    }

    #[test]
    fn outer_cannot_finish_before_inner() {
        let rt = Runtime::new();
        let outer = rt.transaction();
        let inner = rt.transaction();

        let err = outer.commit().unwrap_err();
        assert_eq!(err, Error::State(StateError::NotInnermost { id: outer.id() }));
        assert_eq!(outer.state(), TxnState::Running);

        inner.commit().unwrap();
        outer.commit().unwrap();
        assert!(!rt.in_transaction());
    }

    #[test]
    fn dropped_transaction_aborts() {
        let rt = Runtime::new();
        let a = rt.atom("committed");
        {
            let _txn = rt.transaction();
            a.set("pending").unwrap();
        }
        assert!(!rt.in_transaction());
        assert_eq!(a.get(), "committed");
    }

    #[test]
    fn nearest_write_wins() {
        let rt = Runtime::new();
        let a = rt.atom(0);

        let outer = rt.transaction();
        a.set(1).unwrap();
        let inner = rt.transaction();
        assert_eq!(a.get(), 1);
        a.set(2).unwrap();
        assert_eq!(a.get(), 2);
        inner.abort().unwrap();

        assert_eq!(a.get(), 1);
        outer.commit().unwrap();
        assert_eq!(a.get(), 1);
    }

    #[test]
    fn transact_aborts_on_error() {
        let rt = Runtime::new();
        let a = rt.atom(1);

        let result: Result<(), Error> = rt.transact(|| {
            a.set(2)?;
            Err(Error::failed("boom"))
        });

        assert_eq!(result, Err(Error::Failed("boom".into())));
        assert_eq!(a.get(), 1);
        assert!(!rt.in_transaction());
    }
}
