//! The status taxonomy for Strata client operations.
//!
//! Every error a caller can observe is a [`Status`]. Transient conditions
//! (master leadership changes, service unavailability) are normally
//! consumed by internal retry loops and never reach callers; the variants
//! exist so retry classification has a single input.

use thiserror::Error;

/// The result type for Strata operations.
pub type Result<T> = std::result::Result<T, Status>;

/// Status of a Strata client operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Status {
    /// The requested entity does not exist, e.g. a partition key falling in
    /// a non-covered range.
    #[error("not found: {message}")]
    NotFound {
        /// Description of what was not found.
        message: String,
    },

    /// A peer response violated protocol invariants.
    #[error("corruption: {message}")]
    Corruption {
        /// Description of the violated invariant.
        message: String,
    },

    /// DNS produced no addresses, or a transport failure persisted past
    /// retries.
    #[error("network error: {message}")]
    NetworkError {
        /// Description of the failure.
        message: String,
    },

    /// The peer reported itself unavailable; retried with backoff until the
    /// deadline.
    #[error("service unavailable: {message}")]
    ServiceUnavailable {
        /// Description reported by the peer.
        message: String,
    },

    /// A deadline expired, including the master-lookup permit wait.
    #[error("timed out: {message}")]
    TimedOut {
        /// Description of what timed out.
        message: String,
    },

    /// The contacted peer is not the leader of the addressed entity.
    #[error("not the leader: {message}")]
    NotLeader {
        /// Description including the addressed entity.
        message: String,
    },

    /// The operation was aborted, e.g. by client shutdown.
    #[error("aborted: {message}")]
    Aborted {
        /// Description of the abort cause.
        message: String,
    },

    /// An application-level error reported by a remote peer.
    #[error("remote error: {message}")]
    RemoteError {
        /// Description reported by the peer.
        message: String,
    },

    /// An invalid argument was provided.
    #[error("invalid argument: {message}")]
    InvalidArgument {
        /// Description of the invalid argument.
        message: String,
    },
}

impl Status {
    /// Creates a `NotFound` status.
    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound { message: message.into() }
    }

    /// Creates a `Corruption` status.
    pub fn corruption(message: impl Into<String>) -> Self {
        Self::Corruption { message: message.into() }
    }

    /// Creates a `NetworkError` status.
    pub fn network_error(message: impl Into<String>) -> Self {
        Self::NetworkError { message: message.into() }
    }

    /// Creates a `ServiceUnavailable` status.
    pub fn service_unavailable(message: impl Into<String>) -> Self {
        Self::ServiceUnavailable { message: message.into() }
    }

    /// Creates a `TimedOut` status.
    pub fn timed_out(message: impl Into<String>) -> Self {
        Self::TimedOut { message: message.into() }
    }

    /// Creates a `NotLeader` status.
    pub fn not_leader(message: impl Into<String>) -> Self {
        Self::NotLeader { message: message.into() }
    }

    /// Creates an `Aborted` status.
    pub fn aborted(message: impl Into<String>) -> Self {
        Self::Aborted { message: message.into() }
    }

    /// Creates a `RemoteError` status.
    pub fn remote_error(message: impl Into<String>) -> Self {
        Self::RemoteError { message: message.into() }
    }

    /// Creates an `InvalidArgument` status.
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self::InvalidArgument { message: message.into() }
    }

    /// Returns the human-readable message, without the kind prefix.
    #[must_use]
    pub fn message(&self) -> &str {
        match self {
            Self::NotFound { message }
            | Self::Corruption { message }
            | Self::NetworkError { message }
            | Self::ServiceUnavailable { message }
            | Self::TimedOut { message }
            | Self::NotLeader { message }
            | Self::Aborted { message }
            | Self::RemoteError { message }
            | Self::InvalidArgument { message } => message,
        }
    }

    /// Returns a status of the same kind with `context` prepended to the
    /// message, for attaching operation context while propagating.
    #[must_use]
    pub fn prepend(self, context: impl AsRef<str>) -> Self {
        let context = context.as_ref();
        self.map_message(|message| format!("{context}: {message}"))
    }

    fn map_message(self, f: impl FnOnce(String) -> String) -> Self {
        match self {
            Self::NotFound { message } => Self::NotFound { message: f(message) },
            Self::Corruption { message } => Self::Corruption { message: f(message) },
            Self::NetworkError { message } => Self::NetworkError { message: f(message) },
            Self::ServiceUnavailable { message } => Self::ServiceUnavailable { message: f(message) },
            Self::TimedOut { message } => Self::TimedOut { message: f(message) },
            Self::NotLeader { message } => Self::NotLeader { message: f(message) },
            Self::Aborted { message } => Self::Aborted { message: f(message) },
            Self::RemoteError { message } => Self::RemoteError { message: f(message) },
            Self::InvalidArgument { message } => Self::InvalidArgument { message: f(message) },
        }
    }

    /// Returns true for `NotFound`.
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Returns true for `Corruption`.
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        matches!(self, Self::Corruption { .. })
    }

    /// Returns true for `NetworkError`.
    #[must_use]
    pub const fn is_network_error(&self) -> bool {
        matches!(self, Self::NetworkError { .. })
    }

    /// Returns true for `ServiceUnavailable`.
    #[must_use]
    pub const fn is_service_unavailable(&self) -> bool {
        matches!(self, Self::ServiceUnavailable { .. })
    }

    /// Returns true for `TimedOut`.
    #[must_use]
    pub const fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut { .. })
    }

    /// Returns true for `NotLeader`.
    #[must_use]
    pub const fn is_not_leader(&self) -> bool {
        matches!(self, Self::NotLeader { .. })
    }
}
