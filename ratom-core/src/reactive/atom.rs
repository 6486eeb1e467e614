//! Atom Implementation
//!
//! An Atom is the fundamental reactive primitive: a mutable cell whose value
//! other nodes can depend on.
//!
//! # How Atoms Work
//!
//! 1. When an atom is read while a derivation is evaluating, the read is
//!    recorded and the derivation subscribes to the atom.
//!
//! 2. A write is validated, compared against the visible value and dropped
//!    if equal. Otherwise it is applied (or logged, inside a transaction)
//!    and everything downstream is marked.
//!
//! 3. Inside a transaction, reads see the nearest pending write before the
//!    committed value.

use std::any::Any;
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

use super::equality::{default_equality, Datum, Equality};
use super::runtime::Runtime;
use super::validator::{self, Validator, Verdict};
use crate::error::Result;
use crate::graph::{Color, Node, NodeCore, NodeId};
use crate::transaction::{PendingWrite, WriteTarget};

pub(crate) struct AtomNode<T: Datum> {
    core: NodeCore,
    runtime: Runtime,
    /// Committed state.
    state: RefCell<T>,
    validator: RefCell<Option<Validator<T>>>,
    equality: RefCell<Equality<T>>,
}

impl<T: Datum> AtomNode<T> {
    fn equals(&self, a: &T, b: &T) -> bool {
        let equality = self.equality.borrow().clone();
        equality(a, b)
    }

    /// The value a read made right now would see.
    fn visible(&self) -> T {
        self.runtime
            .with_pending(self.core.id(), T::clone)
            .unwrap_or_else(|| self.state.borrow().clone())
    }

    fn is_visible(&self, value: &T) -> bool {
        let equality = self.equality.borrow().clone();
        self.runtime
            .with_pending(self.core.id(), |pending: &T| equality(pending, value))
            .unwrap_or_else(|| equality(&self.state.borrow(), value))
    }
}

impl<T: Datum> Node for AtomNode<T> {
    fn core(&self) -> &NodeCore {
        &self.core
    }
}

impl<T: Datum> WriteTarget for AtomNode<T> {
    fn apply(&self, value: Box<dyn Any>) -> bool {
        let Ok(value) = value.downcast::<T>() else {
            tracing::warn!(atom = %self.core.id(), "logged write has the wrong type, ignoring");
            return false;
        };
        let changed = !self.equals(&self.state.borrow(), &value);
        if changed {
            *self.state.borrow_mut() = *value;
        }
        changed
    }
}

/// A mutable reactive cell.
///
/// Cloning an `Atom` yields another handle to the same cell.
///
/// # Example
///
/// ```rust
/// use ratom_core::Runtime;
///
/// let rt = Runtime::new();
/// let count = rt.atom(0);
///
/// count.set(5).unwrap();
/// assert_eq!(count.get(), 5);
///
/// count.swap(|n| n + 1).unwrap();
/// assert_eq!(count.get(), 6);
/// ```
pub struct Atom<T: Datum>(pub(crate) Rc<AtomNode<T>>);

impl<T: Datum> Atom<T> {
    /// Get the atom's unique ID.
    pub fn id(&self) -> NodeId {
        self.0.core.id()
    }

    /// Current color. Settled atoms are white.
    pub fn color(&self) -> Color {
        self.0.core.color()
    }

    /// Number of live subscribers.
    pub fn dependent_count(&self) -> usize {
        self.0.core.child_count()
    }

    /// The runtime this atom belongs to.
    pub fn runtime(&self) -> &Runtime {
        &self.0.runtime
    }

    /// Get the visible value.
    ///
    /// If called while a derivation is evaluating, the derivation subscribes
    /// to this atom.
    pub fn get(&self) -> T {
        self.0.runtime.record_read(self.0.clone());
        self.0.visible()
    }

    /// Get the visible value without recording a dependency.
    pub fn get_untracked(&self) -> T {
        self.0.visible()
    }

    /// Set a new value.
    ///
    /// Fails without changing anything if the validator rejects `value`.
    /// Writing a value equal to the visible one is a no-op. Outside a
    /// transaction every affected reaction has run by the time this returns,
    /// and the first error any of them raised is returned.
    pub fn set(&self, value: T) -> Result<()> {
        let node = &self.0;
        let validator = node.validator.borrow().clone();
        validator::check(validator.as_ref(), &value)?;

        if node.is_visible(&value) {
            tracing::trace!(atom = %self.id(), "write of an equal value ignored");
            return Ok(());
        }
        node.runtime.write(PendingWrite::new(node.clone(), Box::new(value)))
    }

    /// Replace the value with `f(current)` and return the new value.
    pub fn swap<F>(&self, f: F) -> Result<T>
    where
        F: FnOnce(&T) -> T,
    {
        let next = f(&self.0.visible());
        self.set(next.clone())?;
        Ok(next)
    }

    /// Attach a validator, replacing any previous one.
    ///
    /// The current value is not checked.
    pub fn with_validator<V, F>(self, f: F) -> Self
    where
        V: Verdict,
        F: Fn(&T) -> V + 'static,
    {
        self.set_validator(f);
        self
    }

    /// Attach a validator, replacing any previous one.
    pub fn set_validator<V, F>(&self, f: F)
    where
        V: Verdict,
        F: Fn(&T) -> V + 'static,
    {
        *self.0.validator.borrow_mut() = Some(validator::validator(f));
    }

    /// Remove the validator.
    pub fn clear_validator(&self) {
        self.0.validator.borrow_mut().take();
    }

    /// Replace the equality used to decide whether a write changes anything.
    pub fn with_equality<F>(self, f: F) -> Self
    where
        F: Fn(&T, &T) -> bool + 'static,
    {
        *self.0.equality.borrow_mut() = Rc::new(f);
        self
    }
}

impl<T: Datum> Clone for Atom<T> {
    fn clone(&self) -> Self {
        Self(self.0.clone())
    }
}

impl<T: Datum> fmt::Debug for Atom<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Atom")
            .field("id", &self.id())
            .field("value", &*self.0.state.borrow())
            .field("color", &self.color())
            .field("dependent_count", &self.dependent_count())
            .finish()
    }
}

impl Runtime {
    /// Create an atom holding `value`.
    pub fn atom<T: Datum>(&self, value: T) -> Atom<T> {
        let node = AtomNode {
            core: NodeCore::new(Color::White),
            runtime: self.clone(),
            state: RefCell::new(value),
            validator: RefCell::new(None),
            equality: RefCell::new(default_equality()),
        };
        tracing::trace!(atom = %node.core.id(), "atom created");
        Atom(Rc::new(node))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    #[test]
    fn get_and_set() {
        let rt = Runtime::new();
        let atom = rt.atom(0);
        assert_eq!(atom.get(), 0);

        atom.set(42).unwrap();
        assert_eq!(atom.get(), 42);
        assert_eq!(atom.color(), Color::White);
    }

    #[test]
    fn swap_returns_new_value() {
        let rt = Runtime::new();
        let atom = rt.atom(10);
        assert_eq!(atom.swap(|x| x * 2).unwrap(), 20);
        assert_eq!(atom.get(), 20);
    }

    #[test]
    fn rejected_write_leaves_value() {
        let rt = Runtime::new();
        let atom = rt.atom(1).with_validator(|x: &i32| *x > 0);

        let err = atom.set(-5).unwrap_err();
        assert!(matches!(err, Error::Validation { ref value, .. } if value == "-5"));
        assert_eq!(atom.get(), 1);

        atom.clear_validator();
        atom.set(-5).unwrap();
        assert_eq!(atom.get(), -5);
    }

    #[test]
    fn validator_is_not_applied_to_current_value() {
        let rt = Runtime::new();
        let atom = rt.atom(-1);
        atom.set_validator(|x: &i32| *x >= 0);
        assert_eq!(atom.get(), -1);
    }

    #[test]
    fn custom_equality_suppresses_writes() {
        let rt = Runtime::new();
        let atom = rt
            .atom("Hello".to_string())
            .with_equality(|a: &String, b: &String| a.eq_ignore_ascii_case(b));

        atom.set("HELLO".to_string()).unwrap();
        assert_eq!(atom.get(), "Hello");

        atom.set("World".to_string()).unwrap();
        assert_eq!(atom.get(), "World");
    }

    #[test]
    fn clones_share_state() {
        let rt = Runtime::new();
        let atom = rt.atom(vec![1]);
        let other = atom.clone();
        other.set(vec![1, 2]).unwrap();
        assert_eq!(atom.get(), vec![1, 2]);
        assert_eq!(atom.id(), other.id());
    }

    #[test]
    fn debug_shows_committed_value() {
        let rt = Runtime::new();
        let atom = rt.atom(7);
        let debug = format!("{atom:?}");
        assert!(debug.contains("value: 7"));
    }
}
