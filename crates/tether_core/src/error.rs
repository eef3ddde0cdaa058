//! Error types for tether_core

use thiserror::Error;

/// Errors raised by graph, list and binding operations
///
/// Structural violations are returned directly to the caller. Binding
/// failures and handler failures are never returned; they are routed to the
/// graph's error handler instead (see [`Graph::set_error_handler`]).
///
/// [`Graph::set_error_handler`]: crate::Graph::set_error_handler
#[derive(Error, Debug)]
pub enum Error {
    /// Operation on an object that has already been unlinked
    #[error("Object is unlinked")]
    ObjectUnlinked,

    /// Malformed, duplicate or mistyped parameter
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A type-restricted list received an object of another class
    #[error("List restriction violated: {0}")]
    ListRestriction(String),

    /// Object is already a member of the list
    #[error("Object is already in the list")]
    ListDuplicate,

    /// Attachment would create a cycle or attach a root object
    #[error("Cannot attach: {0}")]
    NoAttach(String),

    /// Property cannot be made observable
    #[error("Cannot observe property: {0}")]
    NoObserve(String),

    /// Binding path could not be resolved up to the root
    #[error("Cannot bind {0}")]
    NoBind(String),

    /// A user handler returned an error during dispatch
    #[error("Handler failed: {0}")]
    Handler(anyhow::Error),
}

impl From<anyhow::Error> for Error {
    fn from(err: anyhow::Error) -> Self {
        Error::Handler(err)
    }
}

/// Result type for tether_core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Result type returned by user-supplied handlers
pub type HandlerResult = anyhow::Result<()>;
