//! Dependency Capture
//!
//! While a derivation evaluates, every node it reads is recorded so the
//! derivation can subscribe to exactly those nodes afterwards.
//!
//! # Implementation
//!
//! Each runtime owns a stack of capture frames. Forcing a derivation pushes a
//! frame, reads register themselves in the topmost frame, and finishing the
//! evaluation pops it again. Nested evaluations (a derivation reading another
//! derivation that has to recompute) simply push another frame.
//!
//! Push and pop must balance. A frame that is popped out of order can only be
//! the result of an engine bug, so it panics rather than returning an error.

use std::cell::RefCell;
use std::rc::Rc;

use indexmap::IndexMap;

use crate::graph::{Node, NodeId};

/// Nodes read during one evaluation, in first-read order.
pub(crate) type Reads = IndexMap<NodeId, Rc<dyn Node>>;

/// An entry in the capture stack.
struct CaptureFrame {
    /// The node being evaluated.
    owner: NodeId,
    /// Nodes read so far.
    reads: Reads,
    /// False for frames that only suppress recording.
    recording: bool,
}

/// The capture stack of one runtime.
#[derive(Default)]
pub(crate) struct CaptureStack {
    frames: RefCell<Vec<CaptureFrame>>,
}

impl CaptureStack {
    /// Push a new frame for `owner`.
    ///
    /// The frame is popped by [`Capture::finish`], or when the guard is
    /// dropped while unwinding out of a panicking deriver.
    pub(crate) fn enter(&self, owner: NodeId) -> Capture<'_> {
        self.push(owner, true)
    }

    /// Push a frame that swallows reads without recording them.
    pub(crate) fn suppress(&self) -> Capture<'_> {
        self.push(NodeId::new(), false)
    }

    fn push(&self, owner: NodeId, recording: bool) -> Capture<'_> {
        let mut frames = self.frames.borrow_mut();
        frames.push(CaptureFrame {
            owner,
            reads: IndexMap::new(),
            recording,
        });
        Capture {
            stack: self,
            owner,
            depth: frames.len(),
            finished: false,
        }
    }

    /// Check if a derivation is evaluating and its reads are being recorded.
    pub(crate) fn is_active(&self) -> bool {
        self.frames.borrow().last().is_some_and(|frame| frame.recording)
    }

    /// Record a read of `node` in the topmost frame, if it records.
    pub(crate) fn record(&self, node: Rc<dyn Node>) {
        if let Some(frame) = self.frames.borrow_mut().last_mut() {
            if frame.recording {
                frame.reads.entry(node.id()).or_insert(node);
            }
        }
    }

    fn pop(&self, owner: NodeId, depth: usize) -> Reads {
        let mut frames = self.frames.borrow_mut();
        let found = frames.len();
        match frames.pop() {
            Some(frame) if frame.owner == owner && found == depth => frame.reads,
            Some(frame) => panic!(
                "dependency capture stack mismanagement: expected frame of {owner} \
                 at depth {depth}, found frame of {} at depth {found}",
                frame.owner
            ),
            None => panic!(
                "dependency capture stack mismanagement: frame of {owner} popped \
                 from an empty stack"
            ),
        }
    }
}

/// Guard for one capture frame.
pub(crate) struct Capture<'a> {
    stack: &'a CaptureStack,
    owner: NodeId,
    depth: usize,
    finished: bool,
}

impl Capture<'_> {
    /// Pop the frame and return everything read while it was on top.
    pub(crate) fn finish(mut self) -> Reads {
        self.finished = true;
        self.stack.pop(self.owner, self.depth)
    }
}

impl Drop for Capture<'_> {
    fn drop(&mut self) {
        if !self.finished {
            // Unwinding out of a deriver: restore the stack without checking,
            // a second panic here would abort.
            let mut frames = self.stack.frames.borrow_mut();
            frames.truncate(self.depth.saturating_sub(1));
        }
    }
}
