//! Error types for reconciliation
//!
//! Every node propagates the first error it sees. The variants only classify
//! errors for logging and events; retry and backoff belong to the scheduler
//! hosting the runtime.

use thiserror::Error;

/// Result type used throughout the runtime
pub type Result<T, E = ReconcileError> = std::result::Result<T, E>;

/// Errors surfaced by reconcile nodes, stores and the parent controller
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// The referenced object does not exist
    #[error("{kind} {name:?} not found")]
    NotFound { kind: String, name: String },

    /// Optimistic concurrency check failed (stale resourceVersion)
    #[error("conflict updating {kind} {name:?}: {message}")]
    Conflict {
        kind: String,
        name: String,
        message: String,
    },

    /// Create rejected because the name is taken
    #[error("{kind} {name:?} already exists")]
    AlreadyExists { kind: String, name: String },

    /// Misconfiguration or an ambiguous state that retrying will not fix
    #[error("validation error: {0}")]
    Validation(String),

    /// Transient store failure (network, server errors)
    #[error("store error: {message}")]
    Store {
        message: String,
        #[source]
        source: Option<kube::Error>,
    },

    /// Error returned by a caller-supplied function
    #[error("{node}: {source}")]
    UserFunction {
        node: String,
        #[source]
        source: anyhow::Error,
    },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// The ambient cancellation token fired mid-reconcile
    #[error("reconciliation cancelled")]
    Cancelled,
}

impl ReconcileError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Wrap an error coming out of user code, tagging it with the node name
    pub fn user(node: impl Into<String>, source: impl Into<anyhow::Error>) -> Self {
        Self::UserFunction {
            node: node.into(),
            source: source.into(),
        }
    }

    /// Convert an error returned by a user function
    ///
    /// A `ReconcileError` that user code propagated with `?` keeps its
    /// classification; anything else becomes `UserFunction`.
    pub fn from_user(node: &str, err: anyhow::Error) -> Self {
        match err.downcast::<ReconcileError>() {
            Ok(inner) => inner,
            Err(other) => Self::user(node, other),
        }
    }

    pub fn store(msg: impl Into<String>) -> Self {
        Self::Store {
            message: msg.into(),
            source: None,
        }
    }

    pub fn not_found(kind: impl Into<String>, name: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            name: name.into(),
        }
    }

    pub fn conflict(
        kind: impl Into<String>,
        name: impl Into<String>,
        msg: impl Into<String>,
    ) -> Self {
        Self::Conflict {
            kind: kind.into(),
            name: name.into(),
            message: msg.into(),
        }
    }

    /// Fill in the object identity on variants that name one
    ///
    /// Errors converted from `kube::Error` only carry the server message.
    pub fn for_object(self, kind: &str, name: &str) -> Self {
        match self {
            Self::NotFound { .. } => Self::not_found(kind, name),
            Self::AlreadyExists { .. } => Self::AlreadyExists {
                kind: kind.to_string(),
                name: name.to_string(),
            },
            Self::Conflict { message, .. } => Self::conflict(kind, name, message),
            other => other,
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Conflict { .. })
    }

    /// Whether the scheduler should retry with backoff.
    ///
    /// Validation errors and cancellation wait for an external change instead.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, Self::Validation(_) | Self::Cancelled)
    }

    /// Short machine-readable category, used for event reasons and log fields
    pub fn category(&self) -> &'static str {
        match self {
            Self::NotFound { .. } => "NotFound",
            Self::Conflict { .. } => "Conflict",
            Self::AlreadyExists { .. } => "AlreadyExists",
            Self::Validation(_) => "ValidationError",
            Self::Store { .. } => "TransientStoreError",
            Self::UserFunction { .. } => "UserFunctionError",
            Self::Serialization(_) => "SerializationError",
            Self::Cancelled => "Cancelled",
        }
    }
}

impl From<kube::Error> for ReconcileError {
    fn from(err: kube::Error) -> Self {
        match &err {
            kube::Error::Api(ae) if ae.code == 404 => Self::NotFound {
                kind: String::new(),
                name: ae.message.clone(),
            },
            kube::Error::Api(ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                Self::AlreadyExists {
                    kind: String::new(),
                    name: ae.message.clone(),
                }
            }
            kube::Error::Api(ae) if ae.code == 409 => Self::Conflict {
                kind: String::new(),
                name: String::new(),
                message: ae.message.clone(),
            },
            _ => Self::Store {
                message: err.to_string(),
                source: Some(err),
            },
        }
    }
}
