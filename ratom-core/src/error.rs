//! Error Types
//!
//! Every fallible engine operation returns [`Result`], whose error type is
//! [`Error`]. Errors always surface synchronously to the caller of the
//! operation that raised them.
//!
//! A broken dependency-capture stack is not represented here: it can only be
//! caused by an engine bug and panics instead.

use std::fmt;

use crate::graph::NodeId;

/// Result alias used throughout the crate.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors raised by atoms, derivations, reactions and transactions.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// A node's validator rejected a new value. Nothing was applied.
    #[error("failed validation with value `{value}`: validator returned `{outcome}`")]
    Validation {
        /// Debug rendering of the rejected value.
        value: String,
        /// What the validator returned instead of success.
        outcome: String,
    },

    /// A derive-style call was given no inputs.
    #[error("wrong arity for derive: expecting at least one input")]
    Arity,

    /// An accessor argument (or the value it was applied to) has an
    /// unsupported shape.
    #[error("type error: {0}")]
    Type(String),

    /// An operation was invoked on a transaction or reaction in the wrong state.
    #[error(transparent)]
    State(#[from] StateError),

    /// A derivation read itself while it was being evaluated.
    #[error("derivation {0} read itself during its own evaluation")]
    Cycle(NodeId),

    /// Reactions kept writing to the graph for more follow-up cycles than
    /// the runtime allows.
    #[error("propagation cascaded for more than {limit} follow-up cycles")]
    CascadeLimit {
        /// The configured `max_cascade`.
        limit: usize,
    },

    /// A user deriver reported a failure.
    #[error("derivation failed: {0}")]
    Failed(String),
}

impl Error {
    /// Build an [`Error::Failed`] from anything printable.
    ///
    /// Meant for fallible derivers created with
    /// [`Runtime::try_derive`](crate::Runtime::try_derive).
    pub fn failed(reason: impl fmt::Display) -> Self {
        Self::Failed(reason.to_string())
    }

    pub(crate) fn type_error(reason: impl fmt::Display) -> Self {
        Self::Type(reason.to_string())
    }
}

/// Lifecycle of a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxnState {
    /// Accepting writes.
    Running,
    /// Committed; terminal.
    Committed,
    /// Aborted; terminal.
    Aborted,
}

impl fmt::Display for TxnState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Running => "running",
            Self::Committed => "committed",
            Self::Aborted => "aborted",
        };
        f.write_str(name)
    }
}

/// Errors about the state of a transaction or reaction.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    /// Commit or abort on a transaction that already finished.
    #[error("transaction {id} must be running to commit or abort, but it is {state}")]
    NotRunning {
        /// Transaction id.
        id: u64,
        /// The terminal state it is in.
        state: TxnState,
    },

    /// Commit or abort on a transaction that still has a running child.
    #[error("transaction {id} is not the innermost running transaction")]
    NotInnermost {
        /// Transaction id.
        id: u64,
    },

    /// A reaction was forced without a reactor.
    #[error("no reactor available")]
    NoReactor,

    /// A reaction was started without an input.
    #[error("reaction has no input to monitor")]
    NoInput,
}
