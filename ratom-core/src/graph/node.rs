//! Graph Nodes
//!
//! This module defines the capability shared by every node in the dependency
//! graph: identity, color and the registry of children (subscribers).
//!
//! Children are held weakly. A node never owns its subscribers; it only tracks
//! them so a change can be propagated. A node's lifetime is controlled by the
//! handles pointing at it and by the derivations that read it (a derivation
//! keeps its parents alive, never the reverse).

use std::cell::{Cell, RefCell};
use std::collections::HashSet;
use std::fmt;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use indexmap::IndexMap;
use smallvec::SmallVec;

use super::queue::ReactionQueue;
use crate::error::Result;

/// Unique identifier for a node in the dependency graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(u64);

impl NodeId {
    /// Generate a new unique node ID.
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }

    /// Get the raw ID value.
    pub fn raw(&self) -> u64 {
        self.0
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Propagation status of a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    /// Settled, unchanged since it was last read.
    White,

    /// Pending: downstream of a change, status not resolved yet.
    Black,

    /// Settled, changed.
    Red,

    /// Never evaluated, disowned by a sweep, or a stopped reaction.
    Green,
}

/// Snapshot of a node's children, taken before any traversal mutates edges.
pub(crate) type Snapshot = SmallVec<[Rc<dyn Node>; 4]>;

/// State every node kind embeds.
pub(crate) struct NodeCore {
    id: NodeId,
    color: Cell<Color>,
    children: RefCell<IndexMap<NodeId, Weak<dyn Node>>>,
}

impl NodeCore {
    pub(crate) fn new(color: Color) -> Self {
        Self {
            id: NodeId::new(),
            color: Cell::new(color),
            children: RefCell::new(IndexMap::new()),
        }
    }

    pub(crate) fn id(&self) -> NodeId {
        self.id
    }

    pub(crate) fn color(&self) -> Color {
        self.color.get()
    }

    pub(crate) fn set_color(&self, color: Color) {
        self.color.set(color);
    }

    /// Subscribe `child` to this node. Idempotent.
    pub(crate) fn add_child(&self, child: &Rc<dyn Node>) {
        self.children
            .borrow_mut()
            .insert(child.id(), Rc::downgrade(child));
    }

    /// Unsubscribe the child with the given id. Idempotent.
    pub(crate) fn remove_child(&self, child: NodeId) {
        self.children.borrow_mut().shift_remove(&child);
    }

    /// Live children in subscription order. Dropped children are pruned.
    pub(crate) fn children(&self) -> Snapshot {
        let mut children = self.children.borrow_mut();
        children.retain(|_, child| child.strong_count() > 0);
        children.values().filter_map(Weak::upgrade).collect()
    }

    pub(crate) fn child_count(&self) -> usize {
        self.children
            .borrow()
            .values()
            .filter(|child| child.strong_count() > 0)
            .count()
    }

    /// Mark every child as pending.
    pub(crate) fn mark_children(&self, queue: &mut ReactionQueue) {
        for child in self.children() {
            child.mark(queue);
        }
    }

    /// Re-flag every descendant as pending, visiting each one once.
    pub(crate) fn remark_children(&self, queue: &mut ReactionQueue, seen: &mut HashSet<NodeId>) {
        for child in self.children() {
            if seen.insert(child.id()) {
                child.remark(queue, seen);
            }
        }
    }

    /// Settle this node and everything below it.
    ///
    /// A child still pending (or already disowned elsewhere) never received a
    /// visit during the cycle: it is no longer on a live path through this
    /// node, so the edge is dropped and the child must fully recompute and
    /// resubscribe on its next read.
    pub(crate) fn sweep(&self) {
        self.set_color(Color::White);
        for child in self.children() {
            match child.color() {
                Color::Black | Color::Green => {
                    tracing::trace!(parent = %self.id, child = %child.id(), "disowning child");
                    self.remove_child(child.id());
                    child.disown();
                }
                Color::White | Color::Red => child.sweep(),
            }
        }
    }

    pub(crate) fn invalidate_children(&self, seen: &mut HashSet<NodeId>) {
        for child in self.children() {
            if seen.insert(child.id()) {
                child.invalidate(seen);
            }
        }
    }
}

impl fmt::Debug for NodeCore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NodeCore")
            .field("id", &self.id)
            .field("color", &self.color())
            .field("child_count", &self.child_count())
            .finish()
    }
}

/// Type-erased view of an atom, derivation or reaction.
pub(crate) trait Node {
    fn core(&self) -> &NodeCore;

    fn id(&self) -> NodeId {
        self.core().id()
    }

    fn color(&self) -> Color {
        self.core().color()
    }

    fn set_color(&self, color: Color) {
        self.core().set_color(color);
    }

    /// Flag this node as pending. Stops at nodes already visited this pass.
    fn mark(&self, queue: &mut ReactionQueue) {
        if self.color() != Color::Black {
            self.set_color(Color::Black);
            self.core().mark_children(queue);
        }
    }

    /// Flag this node as pending again after part of the graph was reset.
    ///
    /// Unlike [`mark`](Node::mark) the walk does not stop at nodes that are
    /// already pending: their descendants may have been reset below them.
    fn remark(&self, queue: &mut ReactionQueue, seen: &mut HashSet<NodeId>) {
        if matches!(self.color(), Color::White | Color::Green) {
            self.set_color(Color::Black);
        }
        self.core().remark_children(queue, seen);
    }

    fn sweep(&self) {
        self.core().sweep();
    }

    /// Called when a parent drops this node during a sweep.
    fn disown(&self) {
        self.set_color(Color::Green);
    }

    /// Forget any value derived from state that is being rolled back.
    fn invalidate(&self, seen: &mut HashSet<NodeId>) {
        self.core().invalidate_children(seen);
    }

    /// Whether the color must be resolved before it can be trusted.
    fn needs_resolve(&self) -> bool {
        matches!(self.color(), Color::Black | Color::Green)
    }

    /// Settle the color without recording a dependency.
    fn resolve(&self) -> Result<()> {
        Ok(())
    }

    /// Whether the settled value is the explicit unset state.
    fn is_unset(&self) -> bool {
        false
    }

    /// Run a queued reaction. A no-op for every other node kind.
    fn maybe_react(&self) -> Result<()> {
        Ok(())
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Minimal node used to exercise traversal without the typed nodes.
    pub(crate) struct Probe {
        core: NodeCore,
        reacts: bool,
        this: Weak<Probe>,
    }

    impl Probe {
        pub(crate) fn new(color: Color) -> Rc<Self> {
            Rc::new_cyclic(|this| Self {
                core: NodeCore::new(color),
                reacts: false,
                this: this.clone(),
            })
        }

        pub(crate) fn reaction() -> Rc<Self> {
            Rc::new_cyclic(|this| Self {
                core: NodeCore::new(Color::White),
                reacts: true,
                this: this.clone(),
            })
        }

        pub(crate) fn erased(self: &Rc<Self>) -> Rc<dyn Node> {
            self.clone()
        }
    }

    impl Node for Probe {
        fn core(&self) -> &NodeCore {
            &self.core
        }

        fn mark(&self, queue: &mut ReactionQueue) {
            if self.color() == Color::Black {
                return;
            }
            self.set_color(Color::Black);
            if self.reacts {
                if let Some(this) = self.this.upgrade() {
                    queue.push(this);
                }
            } else {
                self.core.mark_children(queue);
            }
        }

        fn maybe_react(&self) -> Result<()> {
            self.set_color(Color::White);
            Ok(())
        }
    }

    #[test]
    fn node_ids_are_unique() {
        let id1 = NodeId::new();
        let id2 = NodeId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn children_are_idempotent_and_weak() {
        let parent = Probe::new(Color::White);
        let child = Probe::new(Color::White);

        parent.core().add_child(&child.erased());
        parent.core().add_child(&child.erased());
        assert_eq!(parent.core().child_count(), 1);

        parent.core().remove_child(child.id());
        parent.core().remove_child(child.id());
        assert_eq!(parent.core().child_count(), 0);

        parent.core().add_child(&child.erased());
        drop(child);
        assert!(parent.core().children().is_empty());
    }

    #[test]
    fn mark_visits_diamond_once() {
        // parent -> left, right -> reaction
        let parent = Probe::new(Color::White);
        let left = Probe::new(Color::White);
        let right = Probe::new(Color::White);
        let reaction = Probe::reaction();

        parent.core().add_child(&left.erased());
        parent.core().add_child(&right.erased());
        left.core().add_child(&reaction.erased());
        right.core().add_child(&reaction.erased());

        let mut queue = ReactionQueue::default();
        parent.core().mark_children(&mut queue);

        assert_eq!(left.color(), Color::Black);
        assert_eq!(right.color(), Color::Black);
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn sweep_disowns_unvisited_children() {
        let parent = Probe::new(Color::Red);
        let visited = Probe::new(Color::Red);
        let stale = Probe::new(Color::Black);

        parent.core().add_child(&visited.erased());
        parent.core().add_child(&stale.erased());

        parent.sweep();

        assert_eq!(parent.color(), Color::White);
        assert_eq!(visited.color(), Color::White);
        assert_eq!(stale.color(), Color::Green);
        assert_eq!(parent.core().child_count(), 1);
    }
}
