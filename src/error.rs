//! Error types for the TideFS client I/O engine

use thiserror::Error;

/// Result type alias using our Error type
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the client I/O engine.
///
/// Storage servers report failures as negative values on the wire; the
/// [`Error::code`] / [`Error::from_code`] pair maps those values onto this
/// enum so that a per-target outcome can travel through the engine as an
/// ordinary `Result`.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Error {
    /// Transient communication failure (connect, send or receive)
    #[error("communication with storage target failed")]
    Communication,

    /// The calling thread was cancelled while the operation was in flight
    #[error("operation interrupted by caller")]
    Interrupted,

    /// A target ID could not be resolved (invalid mirror group, stale map)
    #[error("unknown storage target")]
    UnknownTarget,

    /// A target resolved to a node that is not in the node store
    #[error("unknown storage node")]
    UnknownNode,

    /// The server asked the client to retry unconditionally
    #[error("server requested retry")]
    Again,

    /// Protocol violation or internal engine bug
    #[error("internal error: {0}")]
    Internal(String),

    /// Invalid engine or pattern configuration
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

// Wire error codes. Kept stable: servers serialize failures as the negated
// code, so renumbering breaks mixed-version clusters.
const CODE_INTERNAL: i64 = 1;
const CODE_INTERRUPTED: i64 = 2;
const CODE_COMMUNICATION: i64 = 3;
const CODE_UNKNOWN_NODE: i64 = 4;
const CODE_UNKNOWN_TARGET: i64 = 5;
const CODE_AGAIN: i64 = 6;

impl Error {
    /// Positive wire code for this error.
    pub fn code(&self) -> i64 {
        match self {
            Error::Internal(_) | Error::InvalidConfig(_) => CODE_INTERNAL,
            Error::Interrupted => CODE_INTERRUPTED,
            Error::Communication => CODE_COMMUNICATION,
            Error::UnknownNode => CODE_UNKNOWN_NODE,
            Error::UnknownTarget => CODE_UNKNOWN_TARGET,
            Error::Again => CODE_AGAIN,
        }
    }

    /// Map a positive wire code back to an error.
    ///
    /// Codes this client does not know are folded into [`Error::Internal`]
    /// so that a newer server cannot crash an older client.
    pub fn from_code(code: i64) -> Self {
        match code {
            CODE_INTERRUPTED => Error::Interrupted,
            CODE_COMMUNICATION => Error::Communication,
            CODE_UNKNOWN_NODE => Error::UnknownNode,
            CODE_UNKNOWN_TARGET => Error::UnknownTarget,
            CODE_AGAIN => Error::Again,
            _ => Error::Internal(format!("wire error code {}", code)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_roundtrip() {
        for err in [
            Error::Communication,
            Error::Interrupted,
            Error::UnknownTarget,
            Error::UnknownNode,
            Error::Again,
        ] {
            assert_eq!(Error::from_code(err.code()), err);
        }
    }

    #[test]
    fn test_unknown_code_folds_to_internal() {
        assert!(matches!(Error::from_code(9999), Error::Internal(_)));
    }

    #[test]
    fn test_internal_detail_not_preserved_over_wire() {
        let err = Error::Internal("length prefix overflow".into());
        assert_eq!(err.code(), 1);
        assert!(matches!(Error::from_code(1), Error::Internal(_)));
    }
}
