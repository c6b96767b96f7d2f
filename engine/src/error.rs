//! Error types for the Paddock engine.

use crate::{EntityKind, LocalId, ServerId};
use thiserror::Error;

/// Errors raised by local operations: the store, the gateway and the engine.
///
/// Remote failures never surface here from the gateway; they are swallowed
/// and the record stays unsynced. See [`RemoteError`].
#[derive(Debug, Error)]
pub enum Error {
    // Domain errors
    #[error("duplicate {kind}: {reason}")]
    DuplicateRecord { kind: EntityKind, reason: String },

    #[error("{kind} not found: {id}")]
    NotFound { kind: EntityKind, id: LocalId },

    #[error("invalid {kind}: {reason}")]
    InvalidRecord { kind: EntityKind, reason: String },

    #[error("server id {server_id} is already bound to another {kind}")]
    IdentityConflict { kind: EntityKind, server_id: ServerId },

    // Infrastructure errors
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(#[from] crate::config::ConfigError),
}

impl Error {
    pub(crate) fn not_found(kind: EntityKind, id: LocalId) -> Self {
        Self::NotFound { kind, id }
    }

    pub(crate) fn invalid(kind: EntityKind, reason: impl Into<String>) -> Self {
        Self::InvalidRecord {
            kind,
            reason: reason.into(),
        }
    }

    /// True for the domain errors a caller is expected to handle (as opposed to store faults).
    pub fn is_domain(&self) -> bool {
        matches!(
            self,
            Self::DuplicateRecord { .. }
                | Self::NotFound { .. }
                | Self::InvalidRecord { .. }
                | Self::IdentityConflict { .. }
        )
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Failure of a single remote call.
///
/// Every variant means "this attempt did not happen": callers retry the
/// record verbatim on a later pass.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RemoteError {
    /// No connectivity, DNS failure, timeout, connection reset.
    #[error("network error: {0}")]
    Network(String),

    /// The server answered with a non-2xx status.
    #[error("api error ({status}): {message}")]
    Api { status: u16, message: String },

    /// The server answered 2xx but the body was not a record we understand.
    #[error("unexpected response: {0}")]
    Decode(String),
}

impl RemoteError {
    /// Whether this failure came from the transport rather than the server.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}

/// Result type for remote calls.
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = Error::DuplicateRecord {
            kind: EntityKind::Report,
            reason: "animal 3 already has a report on 2024-06-01".into(),
        };
        assert_eq!(
            err.to_string(),
            "duplicate report: animal 3 already has a report on 2024-06-01"
        );

        let err = Error::not_found(EntityKind::Animal, LocalId::new(7));
        assert_eq!(err.to_string(), "animal not found: 7");

        let err = RemoteError::Api {
            status: 409,
            message: "Report already exists".into(),
        };
        assert_eq!(err.to_string(), "api error (409): Report already exists");
    }

    #[test]
    fn domain_errors_are_classified() {
        assert!(Error::not_found(EntityKind::Crop, LocalId::new(1)).is_domain());
        assert!(Error::invalid(EntityKind::Crop, "blank name").is_domain());
        assert!(!Error::Database(sqlx::Error::RowNotFound).is_domain());
        assert!(RemoteError::Network("offline".into()).is_network());
        assert!(!RemoteError::Decode("bad".into()).is_network());
    }
}
