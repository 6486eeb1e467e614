//! Derivation Implementation
//!
//! A Derivation is a cached value computed from other nodes. It recomputes
//! only when something it read during its last evaluation has changed.
//!
//! # How Derivations Work
//!
//! 1. On first access, the deriver runs inside a capture frame. Every node
//!    it reads becomes a parent and the derivation subscribes to each one.
//!
//! 2. A change upstream marks the derivation pending (black) without
//!    running anything.
//!
//! 3. The next read resolves the pending state: parents are resolved in
//!    the order they were first read, and the first one that actually
//!    changed triggers a recomputation. If none changed, the cache is kept.
//!
//! 4. A derivation that ends up unreachable from a change is disowned
//!    (green) by the sweep. It forgets its subscriptions and recomputes from
//!    scratch on its next read.
//!
//! # Unset Values
//!
//! A deriver may produce no value. The derivation then reports `None`, and
//! anything derived from it is unset as well until a value appears.

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::rc::{Rc, Weak};

use super::context::Reads;
use super::equality::{default_equality, Datum, Equality};
use super::runtime::{Raised, Runtime};
use super::validator::{self, Validator, Verdict};
use crate::error::{Error, Result};
use crate::graph::{Color, Node, NodeCore, NodeId};

/// The boxed user computation.
pub(crate) type Deriver<T> = Box<dyn Fn() -> Result<Option<T>>>;

/// Cached output of a derivation.
#[derive(Debug, Clone, PartialEq)]
enum Slot<T> {
    Unset,
    Value(T),
}

impl<T> Slot<T> {
    fn value(&self) -> Option<&T> {
        match self {
            Slot::Unset => None,
            Slot::Value(value) => Some(value),
        }
    }
}

impl<T> From<Option<T>> for Slot<T> {
    fn from(value: Option<T>) -> Self {
        value.map_or(Slot::Unset, Slot::Value)
    }
}

pub(crate) struct DerivationNode<T: Datum> {
    core: NodeCore,
    runtime: Runtime,
    deriver: Deriver<T>,
    slot: RefCell<Slot<T>>,
    /// Nodes read by the last evaluation, in first-read order.
    parents: RefCell<Reads>,
    /// Set when the cache may hold a value computed from discarded state.
    stale: Cell<bool>,
    /// Set when an evaluation inside a transaction changed the cache, so the
    /// commit still reports the change downstream.
    changed_in_txn: Cell<bool>,
    evaluating: Cell<bool>,
    validator: RefCell<Option<Validator<T>>>,
    equality: RefCell<Equality<T>>,
    this: Weak<DerivationNode<T>>,
}

impl<T: Datum> DerivationNode<T> {
    fn erased(&self) -> Option<Rc<dyn Node>> {
        self.this.upgrade().map(|this| this as Rc<dyn Node>)
    }

    fn value(&self) -> Option<T> {
        self.slot.borrow().value().cloned()
    }

    /// Run the deriver and store the result.
    fn force(&self) -> Result<()> {
        if self.evaluating.get() {
            return Err(Error::Cycle(self.core.id()));
        }

        let (outcome, reads) = {
            let _evaluating = Raised::raise(&self.evaluating);
            let capture = self.runtime.capture().enter(self.core.id());
            let outcome = (self.deriver)();
            (outcome, capture.finish())
        };
        let next = match outcome.and_then(|next| self.validate(next)) {
            Ok(next) => next,
            Err(error) => {
                // Stay subscribed to what was read so the next change retries.
                self.reconcile(reads);
                self.stale.set(true);
                self.core.set_color(Color::White);
                tracing::trace!(derivation = %self.core.id(), %error, "evaluation failed");
                return Err(error);
            }
        };

        let changed = self.stale.get() || self.changed_in_txn.get() || {
            let equality = self.equality.borrow().clone();
            match (&*self.slot.borrow(), &next) {
                (Slot::Value(old), Some(new)) => !equality(old, new),
                (Slot::Unset, None) => false,
                _ => true,
            }
        };

        self.reconcile(reads);
        if changed {
            *self.slot.borrow_mut() = Slot::from(next);
        }
        self.stale.set(false);
        self.changed_in_txn.set(changed && self.runtime.in_transaction());
        self.core.set_color(if changed { Color::Red } else { Color::White });
        tracing::trace!(derivation = %self.core.id(), changed, "recomputed");
        Ok(())
    }

    fn validate(&self, next: Option<T>) -> Result<Option<T>> {
        if let Some(value) = &next {
            let validator = self.validator.borrow().clone();
            validator::check(validator.as_ref(), value)?;
        }
        Ok(next)
    }

    /// Swap in the parents read by the last evaluation, unsubscribing from
    /// the ones no longer read and subscribing to the new ones.
    fn reconcile(&self, reads: Reads) {
        let id = self.core.id();
        let previous = self.parents.replace(reads);
        let parents = self.parents.borrow();
        for (parent_id, parent) in &previous {
            if !parents.contains_key(parent_id) {
                parent.core().remove_child(id);
            }
        }
        if let Some(this) = self.erased() {
            for parent in parents.values() {
                parent.core().add_child(&this);
            }
        }
    }

    /// Settle a pending derivation by checking its parents in capture order.
    fn resolve_pending(&self) -> Result<()> {
        if self.changed_in_txn.get() {
            return self.force();
        }
        let parents: Vec<Rc<dyn Node>> = self.parents.borrow().values().cloned().collect();
        for parent in parents {
            if parent.needs_resolve() {
                parent.resolve()?;
            }
            if parent.is_unset() {
                tracing::trace!(
                    derivation = %self.core.id(),
                    parent = %parent.id(),
                    "parent unset, short-circuiting"
                );
                let was_set = !self.is_unset();
                *self.slot.borrow_mut() = Slot::Unset;
                self.core.set_color(if was_set { Color::Red } else { Color::White });
                return Ok(());
            }
            if parent.color() == Color::Red {
                return self.force();
            }
        }
        self.core.set_color(Color::White);
        Ok(())
    }
}

impl<T: Datum> Node for DerivationNode<T> {
    fn core(&self) -> &NodeCore {
        &self.core
    }

    fn sweep(&self) {
        self.changed_in_txn.set(false);
        self.core.sweep();
    }

    fn invalidate(&self, seen: &mut HashSet<NodeId>) {
        self.stale.set(true);
        self.core.set_color(Color::White);
        self.core.invalidate_children(seen);
    }

    fn needs_resolve(&self) -> bool {
        self.stale.get() || matches!(self.core.color(), Color::Black | Color::Green)
    }

    fn resolve(&self) -> Result<()> {
        if self.stale.get() {
            return self.force();
        }
        match self.core.color() {
            Color::Green => self.force(),
            Color::Black => self.resolve_pending(),
            Color::White | Color::Red => Ok(()),
        }
    }

    fn is_unset(&self) -> bool {
        matches!(*self.slot.borrow(), Slot::Unset)
    }
}

/// A cached computed value.
///
/// Cloning a `Derivation` yields another handle to the same node.
///
/// # Example
///
/// ```rust
/// use ratom_core::{Derivable, Runtime};
///
/// let rt = Runtime::new();
/// let name = rt.atom("world".to_string());
/// let greeting = name.derive(|n| format!("Hello, {n}!"));
///
/// assert_eq!(greeting.get().unwrap().as_deref(), Some("Hello, world!"));
/// ```
pub struct Derivation<T: Datum>(pub(crate) Rc<DerivationNode<T>>);

impl<T: Datum> Derivation<T> {
    fn new(runtime: Runtime, deriver: Deriver<T>) -> Self {
        let node = Rc::new_cyclic(|this| DerivationNode {
            core: NodeCore::new(Color::Green),
            runtime,
            deriver,
            slot: RefCell::new(Slot::Unset),
            parents: RefCell::new(Reads::new()),
            stale: Cell::new(false),
            changed_in_txn: Cell::new(false),
            evaluating: Cell::new(false),
            validator: RefCell::new(None),
            equality: RefCell::new(default_equality()),
            this: this.clone(),
        });
        tracing::trace!(derivation = %node.core.id(), "derivation created");
        Self(node)
    }

    /// Get the derivation's unique ID.
    pub fn id(&self) -> NodeId {
        self.0.core.id()
    }

    /// Current color.
    pub fn color(&self) -> Color {
        self.0.core.color()
    }

    /// The runtime this derivation belongs to.
    pub fn runtime(&self) -> &Runtime {
        &self.0.runtime
    }

    /// Get the current value, recomputing if necessary.
    ///
    /// Returns `Ok(None)` when the value is unset. If called while another
    /// derivation is evaluating, that derivation subscribes to this one.
    pub fn get(&self) -> Result<Option<T>> {
        let node = &self.0;
        if node.evaluating.get() {
            return Err(Error::Cycle(node.core.id()));
        }
        node.runtime.record_read(node.clone());
        node.resolve()?;
        Ok(node.value())
    }

    /// Get the current value without recording a dependency.
    pub fn get_untracked(&self) -> Result<Option<T>> {
        let node = &self.0;
        if node.evaluating.get() {
            return Err(Error::Cycle(node.core.id()));
        }
        node.resolve()?;
        Ok(node.value())
    }

    /// Number of parents read by the last evaluation.
    pub fn dependency_count(&self) -> usize {
        self.0.parents.borrow().len()
    }

    /// Number of live subscribers.
    pub fn dependent_count(&self) -> usize {
        self.0.core.child_count()
    }

    /// Attach a validator checked against every computed value. A rejected
    /// value fails the read and leaves the cache untouched.
    pub fn with_validator<V, F>(self, f: F) -> Self
    where
        V: Verdict,
        F: Fn(&T) -> V + 'static,
    {
        *self.0.validator.borrow_mut() = Some(validator::validator(f));
        self
    }

    /// Replace the equality used to decide whether a recomputation changed
    /// anything.
    pub fn with_equality<F>(self, f: F) -> Self
    where
        F: Fn(&T, &T) -> bool + 'static,
    {
        *self.0.equality.borrow_mut() = Rc::new(f);
        self
    }
}

impl<T: Datum> Clone for Derivation<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Datum> fmt::Debug for Derivation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Derivation")
            .field("id", &self.id())
            .field("value", &self.0.slot.borrow().value())
            .field("color", &self.color())
            .field("dependency_count", &self.dependency_count())
            .field("dependent_count", &self.dependent_count())
            .finish()
    }
}

impl Runtime {
    /// Create a derivation from a computation.
    ///
    /// The computation does not run until the derivation is first read.
    pub fn derive<T, F>(&self, f: F) -> Derivation<T>
    where
        T: Datum,
        F: Fn() -> T + 'static,
    {
        self.try_derive(move || Ok(Some(f())))
    }

    /// Create a derivation whose computation may produce no value.
    pub fn derive_optional<T, F>(&self, f: F) -> Derivation<T>
    where
        T: Datum,
        F: Fn() -> Option<T> + 'static,
    {
        self.try_derive(move || Ok(f()))
    }

    /// Create a derivation whose computation may fail.
    ///
    /// An error fails the read that triggered the evaluation and leaves the
    /// previous value cached.
    pub fn try_derive<T, F>(&self, f: F) -> Derivation<T>
    where
        T: Datum,
        F: Fn() -> Result<Option<T>> + 'static,
    {
        Derivation::new(self.clone(), Box::new(f))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
