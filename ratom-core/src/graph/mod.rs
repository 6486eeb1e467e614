//! Dependency Graph
//!
//! This module implements the graph that connects atoms, derivations and
//! reactions, and the coloring scheme used to propagate changes through it.
//!
//! # Overview
//!
//! Edges point from a node to the nodes that read it (its children). When an
//! atom changes:
//!
//! 1. The atom turns red and every node reachable from it is marked black
//!    ("pending"). Reactions found on the way are queued.
//! 2. Each queued reaction resolves its input. Resolution walks back up
//!    through pending parents; a derivation recomputes only if one of its
//!    parents actually turned red.
//! 3. The atom is swept: settled nodes return to white, and nodes that were
//!    never reached by a resolution are disowned (turned green), which prunes
//!    edges left behind when a derivation switched branches.
//!
//! Marking never runs user code, so it can freely walk the graph; sweeping and
//! marking both iterate over snapshots because edges may change mid-walk.

mod node;
mod queue;

pub use node::{Color, NodeId};
pub(crate) use node::{Node, NodeCore};
pub(crate) use queue::ReactionQueue;

#[cfg(test)]
pub(crate) use node::tests::Probe;
