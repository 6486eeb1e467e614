//! Reactors
//!
//! A reactor is the side-effecting callback a [`Reaction`](crate::Reaction)
//! runs whenever its input changes. Any `FnMut(&T)` closure is a reactor;
//! implement the trait directly to get the start and stop hooks.

/// Callback invoked by a reaction.
pub trait Reactor<T> {
    /// Called with the input's new value.
    fn react(&mut self, value: &T);

    /// Called when the reaction starts, before its first `react`.
    fn on_start(&mut self) {}

    /// Called when the reaction stops.
    fn on_stop(&mut self) {}
}

impl<T, F> Reactor<T> for F
where
    F: FnMut(&T),
{
    fn react(&mut self, value: &T) {
        self(value)
    }
}

/// Reactor that also receives the value seen by the previous call.
///
/// Built by [`with_previous`].
pub struct WithPrevious<T, F> {
    previous: T,
    f: F,
}

impl<T, F> Reactor<T> for WithPrevious<T, F>
where
    T: Clone,
    F: FnMut(&T, &T),
{
    fn react(&mut self, value: &T) {
        let previous = std::mem::replace(&mut self.previous, value.clone());
        (self.f)(value, &previous);
    }
}

/// Wrap `f(new, previous)` as a reactor. The first call sees `initial` as
/// the previous value.
///
/// ```rust
/// use std::cell::RefCell;
/// use std::rc::Rc;
///
/// use ratom_core::{reactor, Derivable, Runtime};
///
/// let rt = Runtime::new();
/// let a = rt.atom(1);
/// let deltas = Rc::new(RefCell::new(Vec::new()));
/// let sink = deltas.clone();
///
/// let _watch = a
///     .react(reactor::with_previous(0, move |new: &i32, old: &i32| {
///         sink.borrow_mut().push(new - old)
///     }))
///     .unwrap();
/// a.set(4).unwrap();
///
/// assert_eq!(*deltas.borrow(), vec![1, 3]);
/// ```
pub fn with_previous<T, F>(initial: T, f: F) -> WithPrevious<T, F>
where
    T: Clone,
    F: FnMut(&T, &T),
{
    WithPrevious { previous: initial, f }
}
