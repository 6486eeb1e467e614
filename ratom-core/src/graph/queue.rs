//! Reaction Queue
//!
//! Reactions discovered while marking are collected here and run once the
//! whole affected subgraph has been flagged as pending.
//!
//! # Ordering
//!
//! The queue is first-in first-out in discovery order. A reaction can only be
//! enqueued once per pass: marking stops at nodes that are already pending,
//! and the queue itself is keyed by node id, so merging the queues of nested
//! transactions never duplicates an entry either.

use std::fmt;
use std::rc::Rc;

use indexmap::IndexMap;

use super::node::{Node, NodeId};
use crate::error::{Error, Result};

/// Pending reactions of one propagation cycle or transaction context.
#[derive(Default)]
pub(crate) struct ReactionQueue {
    pending: IndexMap<NodeId, Rc<dyn Node>>,
}

impl ReactionQueue {
    /// Enqueue a reaction. Returns false if it was already queued.
    pub(crate) fn push(&mut self, reaction: Rc<dyn Node>) -> bool {
        let id = reaction.id();
        if self.pending.contains_key(&id) {
            return false;
        }
        self.pending.insert(id, reaction);
        true
    }

    /// Move every reaction of `other` to the back of this queue.
    pub(crate) fn append(&mut self, other: ReactionQueue) {
        for (_, reaction) in other.pending {
            self.push(reaction);
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.pending.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }

    /// Run every queued reaction once, in order.
    ///
    /// A failing reaction does not prevent the rest of the queue from running;
    /// the first error is returned once the queue is drained.
    pub(crate) fn run(self) -> Result<()> {
        let mut first_error: Option<Error> = None;
        for (id, reaction) in self.pending {
            if let Err(error) = reaction.maybe_react() {
                tracing::warn!(reaction = %id, %error, "reaction failed during propagation");
                first_error.get_or_insert(error);
            }
        }
        match first_error {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

impl fmt::Debug for ReactionQueue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.pending.keys()).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::node::tests::Probe;
    use crate::graph::Color;

    #[test]
    fn push_dedups_by_id() {
        let reaction = Probe::reaction();
        let mut queue = ReactionQueue::default();

        assert!(queue.push(reaction.erased()));
        assert!(!queue.push(reaction.erased()));
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn append_keeps_discovery_order() {
        let first = Probe::reaction();
        let second = Probe::reaction();
        let third = Probe::reaction();

        let mut outer = ReactionQueue::default();
        outer.push(first.erased());
        outer.push(second.erased());

        let mut inner = ReactionQueue::default();
        inner.push(second.erased());
        inner.push(third.erased());

        outer.append(inner);
        let order: Vec<NodeId> = outer.pending.keys().copied().collect();
        assert_eq!(order, vec![first.id(), second.id(), third.id()]);
    }

    #[test]
    fn run_visits_every_reaction() {
        let first = Probe::reaction();
        let second = Probe::reaction();
        first.set_color(Color::Black);
        second.set_color(Color::Black);

        let mut queue = ReactionQueue::default();
        queue.push(first.erased());
        queue.push(second.erased());
        assert!(!queue.is_empty());

        queue.run().unwrap();
        assert_eq!(first.color(), Color::White);
        assert_eq!(second.color(), Color::White);
    }
}
