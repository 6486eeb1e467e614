//! Ratom Core
//!
//! This crate provides an in-memory incremental computation engine. It
//! implements:
//!
//! - Atoms: mutable cells of state
//! - Derivations: lazily cached values computed from other nodes
//! - Reactions: side effects that run exactly once per change
//! - Transactions: nested, all-or-nothing batches of writes
//!
//! Dependencies between nodes are discovered automatically while derivations
//! evaluate, and change propagation uses a mark/sweep coloring scheme so that
//! only the work that is actually needed gets done.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - `graph`: node identity, colors, child registries and the reaction queue
//! - `reactive`: atoms, derivations, reactions and the runtime context
//! - `transaction`: write logs, nested commit and abort
//! - `accessor`: key, index and pattern shorthands for JSON values
//! - `config`: runtime tunables
//!
//! # Example
//!
//! ```rust
//! use std::cell::RefCell;
//! use std::rc::Rc;
//!
//! use ratom_core::{Derivable, Error, Runtime};
//!
//! let rt = Runtime::new();
//!
//! // Create atoms
//! let price = rt.atom(10);
//! let quantity = rt.atom(2);
//!
//! // Create a derived value
//! let total = rt.derive2(&price, &quantity, |p, q| p * q);
//!
//! // React to it
//! let log = Rc::new(RefCell::new(Vec::new()));
//! let sink = log.clone();
//! let _reaction = total.react(move |t: &i32| sink.borrow_mut().push(*t)).unwrap();
//!
//! // Update both atoms at once; the reaction runs a single time
//! rt.transact(|| -> Result<(), Error> {
//!     price.set(12)?;
//!     quantity.set(3)?;
//!     Ok(())
//! })
//! .unwrap();
//!
//! assert_eq!(*log.borrow(), vec![20, 36]);
//! ```

pub mod accessor;
pub mod config;
pub mod error;
pub mod graph;
pub mod reactive;
pub mod transaction;

pub use accessor::{Accessor, DeriveJson};
pub use config::RuntimeConfig;
pub use error::{Error, Result, StateError, TxnState};
pub use graph::{Color, NodeId};
pub use reactive::{
    reactor, same, Atom, Datum, Derivable, Derivation, Input, Reaction, Reactor, Runtime, Verdict,
};
pub use transaction::Transaction;
