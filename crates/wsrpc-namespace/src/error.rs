//! Error types for the namespace layer.
//!
//! These are local API misuse errors, returned to the caller that made the
//! bad registration. They never travel over the wire.

/// Errors that can occur during namespace operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NamespaceError {
    /// Namespace names must be non-empty and start with `/`.
    #[error("invalid namespace name '{0}': must start with '/'")]
    InvalidName(String),

    /// A method or notification name was empty.
    #[error("method and notification names must not be empty")]
    EmptyName,

    /// An application registration used the reserved `rpc.` prefix.
    #[error("'{0}' uses the reserved 'rpc.' prefix")]
    ReservedName(String),

    /// An internal registration is missing the `rpc.` prefix.
    #[error("internal name '{0}' must start with 'rpc.'")]
    MissingPrefix(String),

    /// The namespace does not exist.
    #[error("namespace '{0}' not found")]
    NotFound(String),

    /// The namespace has been closed and accepts nothing new.
    #[error("namespace '{0}' is closed")]
    Closed(String),
}
