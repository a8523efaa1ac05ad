//! Error types for the tenancy operator
//!
//! Errors carry the object they relate to so that reconcile failures can be
//! logged with enough context to act on. Not-found conditions are never
//! errors here: the store maps them to `None` and the reconciler treats a
//! missing object as a terminal state.

use thiserror::Error;

/// Main error type for tenancy operations
#[derive(Debug, Error)]
pub enum Error {
    /// Kubernetes API error
    #[error("kubernetes error: {source}")]
    Kube {
        /// The underlying kube-rs error
        #[from]
        source: kube::Error,
    },

    /// A conditional write lost against a concurrent modification
    #[error("conflicting update of {kind} {name}, object changed since it was read")]
    Conflict {
        /// Kind of the object being written
        kind: String,
        /// Name of the object being written
        name: String,
    },

    /// The request lives in a namespace that does not belong to a workspace
    #[error("namespace {namespace} is not a workspace namespace")]
    InvalidNamespace {
        /// Offending namespace
        namespace: String,
    },

    /// The tenant to enroll does not exist (yet)
    #[error("tenant {tenant} not found")]
    TenantNotFound {
        /// Name of the missing tenant
        tenant: String,
    },

    /// A store call did not finish before the reconcile deadline
    #[error("{operation} timed out")]
    Timeout {
        /// Operation that was running
        operation: String,
    },

    /// The reconcile was cancelled while a store call was in flight
    #[error("{operation} cancelled")]
    Cancelled {
        /// Operation that was running
        operation: String,
    },

    /// The webhook server failed to start or stopped with an error
    #[error("server error: {message}")]
    Server {
        /// Description of what failed
        message: String,
    },

    /// Invalid operator configuration
    #[error("configuration error: {message}")]
    Config {
        /// Description of what is wrong
        message: String,
    },
}

impl Error {
    /// Create a conflict error for an object
    pub fn conflict(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::Conflict {
            kind: kind.into(),
            name: name.into(),
        }
    }

    /// Create an invalid namespace error
    pub fn invalid_namespace(namespace: impl Into<String>) -> Self {
        Self::InvalidNamespace {
            namespace: namespace.into(),
        }
    }

    /// Create a tenant not found error
    pub fn tenant_not_found(tenant: impl Into<String>) -> Self {
        Self::TenantNotFound {
            tenant: tenant.into(),
        }
    }

    /// Create a timeout error for the given operation
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    /// Create a cancellation error for the given operation
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Self::Cancelled {
            operation: operation.into(),
        }
    }

    /// Create a server error with the given message
    pub fn server(msg: impl Into<String>) -> Self {
        Self::Server {
            message: msg.into(),
        }
    }

    /// Create a configuration error with the given message
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Check if this error is retryable
    ///
    /// Retryable errors clear up on their own (network trouble, lost races,
    /// deadlines). The rest need an operator to fix a naming or configuration
    /// problem, although the controller still requeues them slowly.
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::Kube { source } => {
                // Retry on transient K8s errors (connection, timeout, 409, 429)
                !matches!(
                    source,
                    kube::Error::Api(ae)
                        if (400..500).contains(&ae.code) && ae.code != 409 && ae.code != 429
                )
            }
            Error::Conflict { .. } => true,
            Error::InvalidNamespace { .. } => false,
            Error::TenantNotFound { .. } => true,
            Error::Timeout { .. } => true,
            Error::Cancelled { .. } => true,
            Error::Server { .. } => false,
            Error::Config { .. } => false,
        }
    }

    /// Returns true if this error is an optimistic-concurrency conflict
    pub fn is_conflict(&self) -> bool {
        match self {
            Error::Conflict { .. } => true,
            Error::Kube {
                source: kube::Error::Api(ae),
            } => ae.code == 409,
            _ => false,
        }
    }
}
