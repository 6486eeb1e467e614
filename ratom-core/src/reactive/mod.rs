//! Reactive Primitives
//!
//! This module implements the node kinds of the graph: atoms, derivations
//! and reactions, plus the runtime that ties them together.
//!
//! # Concepts
//!
//! ## Atoms
//!
//! An Atom is a container for mutable state. When an atom is read while a
//! derivation is evaluating, the derivation subscribes to it. Writing a new
//! value marks everything downstream as pending.
//!
//! ## Derivations
//!
//! A Derivation is a cached value computed from atoms and other derivations.
//! It never runs eagerly: a change only marks it, and the next read decides
//! whether a recomputation is actually needed.
//!
//! ## Reactions
//!
//! A Reaction binds a side-effecting reactor to one input. Reactions are the
//! only eager part of the system; after every change the ones downstream run
//! exactly once.
//!
//! # Implementation Notes
//!
//! Dependencies are discovered automatically: each runtime keeps a stack of
//! capture frames, and every read made while a frame is active is recorded
//! in it. Nodes are reference counted; parents keep only weak links to their
//! children, so a node lives exactly as long as its handles and the
//! derivations that read it.

mod atom;
mod context;
mod derivable;
mod derivation;
mod equality;
mod reaction;
pub mod reactor;
mod runtime;
mod validator;

pub use atom::Atom;
pub use derivable::{Derivable, Input};
pub use derivation::Derivation;
pub use equality::{same, Datum};
pub use reaction::Reaction;
pub use reactor::Reactor;
pub use runtime::Runtime;
pub use validator::Verdict;
