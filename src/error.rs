//! Error types for pairclaw.

/// Top-level error type for the service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Credential error: {0}")]
    Credential(#[from] CredentialError),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Pairing error: {0}")]
    Pairing(#[from] SubmitError),

    #[error("Web error: {0}")]
    Web(#[from] WebError),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the credential store.
#[derive(Debug, thiserror::Error)]
pub enum CredentialError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Credential delta must be a JSON object, got {0}")]
    MalformedDelta(String),
}

/// Errors surfaced by a protocol session.
///
/// The wire protocol itself is out of scope; these are the only failure
/// shapes the orchestration layer reacts to.
#[derive(Debug, Clone, thiserror::Error)]
pub enum SessionError {
    #[error("Pairing-code request timed out")]
    Timeout,

    #[error("Remote service rejected the request: {reason}")]
    Rejected { reason: String },

    #[error("No open connection")]
    NotConnected,

    #[error("Transport failure: {0}")]
    Transport(String),
}

/// Synchronous rejection of a pairing submission.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubmitError {
    #[error("Invalid phone number length: {len} digits (expected 8-15)")]
    InvalidLength { len: usize },

    #[error("Already processing this number")]
    AlreadyInFlight,
}

/// HTTP surface errors.
#[derive(Debug, thiserror::Error)]
pub enum WebError {
    #[error("Failed to bind to {addr}: {reason}")]
    BindFailed { addr: String, reason: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_submit_error_display() {
        let err = SubmitError::InvalidLength { len: 4 };
        assert!(err.to_string().contains("4 digits"));
        assert_eq!(
            SubmitError::AlreadyInFlight.to_string(),
            "Already processing this number"
        );
    }

    #[test]
    fn test_session_error_display() {
        assert_eq!(
            SessionError::Timeout.to_string(),
            "Pairing-code request timed out"
        );
        let err = SessionError::Rejected {
            reason: "rate limited".to_string(),
        };
        assert!(err.to_string().contains("rate limited"));
    }

    #[test]
    fn test_top_level_conversions() {
        let err: Error = SubmitError::AlreadyInFlight.into();
        assert!(matches!(err, Error::Pairing(_)));

        let err: Error = SessionError::NotConnected.into();
        assert!(matches!(err, Error::Session(_)));
    }
}
