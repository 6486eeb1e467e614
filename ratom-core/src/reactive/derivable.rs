//! Derivable Values
//!
//! Atoms and derivations can both be read, derived from and reacted to.
//! [`Derivable`] is that shared capability; [`Input`] is a type-erased handle
//! to either kind, used where a reaction or a combinator needs to hold "some
//! readable node of type `T`".

use std::fmt;
use std::rc::Rc;

use super::atom::Atom;
use super::derivation::Derivation;
use super::equality::Datum;
use super::reaction::Reaction;
use super::reactor::Reactor;
use super::runtime::Runtime;
use crate::error::{Error, Result};
use crate::graph::{Color, Node, NodeId};

/// A readable node: an atom, a derivation, or an [`Input`] wrapping either.
pub trait Derivable<T: Datum> {
    /// Type-erased handle to this node.
    fn input(&self) -> Input<T>;

    /// Read the value, recording a dependency if a derivation is evaluating.
    /// `None` means unset.
    fn read(&self) -> Result<Option<T>>;

    /// Derive a new value by applying `f` to this one.
    ///
    /// The derivation is unset while this node is unset.
    fn derive<U, F>(&self, f: F) -> Derivation<U>
    where
        U: Datum,
        F: Fn(&T) -> U + 'static,
    {
        let input = self.input();
        let runtime = input.runtime().clone();
        runtime.try_derive(move || Ok(input.read()?.map(|value| f(&value))))
    }

    /// Build a reaction to this node without starting it.
    fn reaction<R>(&self, reactor: R) -> Reaction<T>
    where
        R: Reactor<T> + 'static,
    {
        let reaction = Reaction::new();
        reaction.set_input(self).set_reactor(reactor);
        reaction
    }

    /// Build a reaction to this node and start it.
    fn react<R>(&self, reactor: R) -> Result<Reaction<T>>
    where
        R: Reactor<T> + 'static,
    {
        let reaction = self.reaction(reactor);
        reaction.start()?;
        Ok(reaction)
    }
}

enum Source<T: Datum> {
    Atom(Atom<T>),
    Derivation(Derivation<T>),
}

/// Type-erased handle to an atom or a derivation.
pub struct Input<T: Datum>(Source<T>);

impl<T: Datum> Input<T> {
    /// ID of the wrapped node.
    pub fn id(&self) -> NodeId {
        match &self.0 {
            Source::Atom(atom) => atom.id(),
            Source::Derivation(derivation) => derivation.id(),
        }
    }

    /// Runtime of the wrapped node.
    pub fn runtime(&self) -> &Runtime {
        match &self.0 {
            Source::Atom(atom) => atom.runtime(),
            Source::Derivation(derivation) => derivation.runtime(),
        }
    }

    pub(crate) fn node(&self) -> Rc<dyn Node> {
        match &self.0 {
            Source::Atom(atom) => atom.0.clone(),
            Source::Derivation(derivation) => derivation.0.clone(),
        }
    }

    pub(crate) fn read_untracked(&self) -> Result<Option<T>> {
        match &self.0 {
            Source::Atom(atom) => Ok(Some(atom.get_untracked())),
            Source::Derivation(derivation) => derivation.get_untracked(),
        }
    }

    /// Settle the wrapped node's color without reading its value.
    pub(crate) fn resolve(&self) -> Result<()> {
        let node = self.node();
        if node.needs_resolve() {
            node.resolve()
        } else {
            Ok(())
        }
    }

    pub(crate) fn color(&self) -> Color {
        self.node().color()
    }

    pub(crate) fn is_unset(&self) -> bool {
        self.node().is_unset()
    }
}

impl<T: Datum> Derivable<T> for Input<T> {
    fn input(&self) -> Input<T> {
        self.clone()
    }

    fn read(&self) -> Result<Option<T>> {
        match &self.0 {
            Source::Atom(atom) => Ok(Some(atom.get())),
            Source::Derivation(derivation) => derivation.get(),
        }
    }
}

impl<T: Datum> Derivable<T> for Atom<T> {
    fn input(&self) -> Input<T> {
        Input(Source::Atom(self.clone()))
    }

    fn read(&self) -> Result<Option<T>> {
        Ok(Some(self.get()))
    }
}

impl<T: Datum> Derivable<T> for Derivation<T> {
    fn input(&self) -> Input<T> {
        Input(Source::Derivation(self.clone()))
    }

    fn read(&self) -> Result<Option<T>> {
        self.get()
    }
}

impl<T: Datum> From<Atom<T>> for Input<T> {
    fn from(atom: Atom<T>) -> Self {
        Input(Source::Atom(atom))
    }
}

impl<T: Datum> From<Derivation<T>> for Input<T> {
    fn from(derivation: Derivation<T>) -> Self {
        Input(Source::Derivation(derivation))
    }
}

impl<T: Datum> Clone for Input<T> {
    fn clone(&self) -> Self {
        match &self.0 {
            Source::Atom(atom) => Input(Source::Atom(atom.clone())),
            Source::Derivation(derivation) => Input(Source::Derivation(derivation.clone())),
        }
    }
}

impl<T: Datum> fmt::Debug for Input<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Source::Atom(atom) => f.debug_tuple("Input").field(atom).finish(),
            Source::Derivation(derivation) => f.debug_tuple("Input").field(derivation).finish(),
        }
    }
}

// ----------------------------------------------------------------------------
// Combinators
// ----------------------------------------------------------------------------

impl Runtime {
    /// Derive a value from two inputs. Unset while either input is unset.
    pub fn derive2<A, B, U, F>(
        &self,
        a: &impl Derivable<A>,
        b: &impl Derivable<B>,
        f: F,
    ) -> Derivation<U>
    where
        A: Datum,
        B: Datum,
        U: Datum,
        F: Fn(&A, &B) -> U + 'static,
    {
        let (a, b) = (a.input(), b.input());
        self.try_derive(move || {
            let Some(x) = a.read()? else { return Ok(None) };
            let Some(y) = b.read()? else { return Ok(None) };
            Ok(Some(f(&x, &y)))
        })
    }

    /// Derive a value from three inputs. Unset while any input is unset.
    pub fn derive3<A, B, C, U, F>(
        &self,
        a: &impl Derivable<A>,
        b: &impl Derivable<B>,
        c: &impl Derivable<C>,
        f: F,
    ) -> Derivation<U>
    where
        A: Datum,
        B: Datum,
        C: Datum,
        U: Datum,
        F: Fn(&A, &B, &C) -> U + 'static,
    {
        let (a, b, c) = (a.input(), b.input(), c.input());
        self.try_derive(move || {
            let Some(x) = a.read()? else { return Ok(None) };
            let Some(y) = b.read()? else { return Ok(None) };
            let Some(z) = c.read()? else { return Ok(None) };
            Ok(Some(f(&x, &y, &z)))
        })
    }

    /// Derive a value from any number of inputs of the same type.
    ///
    /// Inputs are read in order and the first unset one makes the result
    /// unset. Fails with [`Error::Arity`] when `inputs` is empty.
    pub fn derive_all<T, U, F>(&self, inputs: &[Input<T>], f: F) -> Result<Derivation<U>>
    where
        T: Datum,
        U: Datum,
        F: Fn(&[T]) -> U + 'static,
    {
        if inputs.is_empty() {
            return Err(Error::Arity);
        }
        let inputs = inputs.to_vec();
        Ok(self.try_derive(move || {
            let mut values = Vec::with_capacity(inputs.len());
            for input in &inputs {
                match input.read()? {
                    Some(value) => values.push(value),
                    None => return Ok(None),
                }
            }
            Ok(Some(f(&values)))
        }))
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
