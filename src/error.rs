//! Error types emitted by the test interpreter.
//!
//! Two groups of failures flow through the interpreter and must never be
//! confused with each other:
//!
//! * interpreter-integrity errors (everything except [`Error::Driver`] and
//!   [`Error::TestFailure`]), which indicate a malformed test file or an
//!   unimplemented code path and abort the enclosing test, and
//! * driver errors, which are caught at the dispatch boundary and turned
//!   into an error-valued operation result so that they can be checked
//!   against the test's expectations.

use thiserror::Error;

use crate::entity::EntityKind;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// No entity has been registered under the given identifier.
    #[error("no entity named {id:?} has been registered")]
    UnknownEntity { id: String },

    /// An entity resolved to a different kind than the operation requires.
    #[error("entity {id:?} is a {actual}, expected a {expected}")]
    WrongEntityKind {
        id: String,
        actual: EntityKind,
        expected: EntityKind,
    },

    /// An identifier was registered twice within one test run.
    #[error("an entity named {id:?} is already registered")]
    DuplicateEntity { id: String },

    /// A session entity was used after `endSession`.
    #[error("session {id:?} has already been ended")]
    SessionEnded { id: String },

    /// The operation name does not appear in the dispatch table.
    #[error("unrecognized operation {name:?}")]
    UnknownOperation { name: String },

    /// The argument bag contained a key the operation does not declare, or
    /// an argument failed to decode into its declared shape.
    #[error("invalid arguments for {operation:?}: {message}")]
    UnsupportedArgument { operation: String, message: String },

    /// The operation exists but has no execution method for the entity kind
    /// it was dispatched to.
    #[error("operation {operation:?} cannot execute on a {target}")]
    UnsupportedTarget {
        operation: String,
        target: EntityKind,
    },

    /// A targeted fail point was requested through a session with no pinned
    /// server.
    #[error("session {id:?} is not pinned to a server")]
    UnpinnedSession { id: String },

    /// An error returned by the driver while executing an operation. This is
    /// the only kind that participates in expected-error matching.
    #[error(transparent)]
    Driver(#[from] mongodb::error::Error),

    /// An assertion operation observed state that contradicts the test's
    /// declaration. Reported as a test diagnostic, not a system fault.
    #[error("assertion failed: {message} (test: {path})")]
    TestFailure { message: String, path: String },
}

impl Error {
    pub(crate) fn unknown_entity(id: impl Into<String>) -> Self {
        Self::UnknownEntity { id: id.into() }
    }

    pub(crate) fn wrong_entity_kind(
        id: impl Into<String>,
        actual: EntityKind,
        expected: EntityKind,
    ) -> Self {
        Self::WrongEntityKind {
            id: id.into(),
            actual,
            expected,
        }
    }

    pub(crate) fn unsupported_argument(
        operation: impl Into<String>,
        message: impl ToString,
    ) -> Self {
        Self::UnsupportedArgument {
            operation: operation.into(),
            message: message.to_string(),
        }
    }

    pub(crate) fn unsupported_target(operation: impl Into<String>, target: EntityKind) -> Self {
        Self::UnsupportedTarget {
            operation: operation.into(),
            target,
        }
    }

    pub(crate) fn test_failure(message: impl Into<String>, path: impl Into<String>) -> Self {
        Self::TestFailure {
            message: message.into(),
            path: path.into(),
        }
    }

    /// Whether this error may be matched against an `expectError`
    /// declaration. Integrity errors and assertion failures always abort the
    /// test instead.
    pub fn is_expectable(&self) -> bool {
        matches!(self, Self::Driver(_))
    }

    /// Attaches the operation name to an `UnsupportedTarget` raised by a
    /// variant's default execution method, which does not know it.
    pub(crate) fn with_operation_name(self, name: &str) -> Self {
        match self {
            Self::UnsupportedTarget { operation, target } if operation.is_empty() => {
                Self::UnsupportedTarget {
                    operation: name.to_string(),
                    target,
                }
            }
            other => other,
        }
    }
}
