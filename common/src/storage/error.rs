use std::io;
use std::time::Duration;

use thiserror::Error;

// storage error taxonomy
//
// the transient/permanent split lives on the value so that retry policy can
// consult the tag instead of matching error text
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("transport error: {0}")]
    Transport(String),

    #[error("operation timed out after {0:?}")]
    Timeout(Duration),

    #[error("authentication failed: {0}")]
    Auth(String),

    #[error("permission denied: {0}")]
    PermissionDenied(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("path escapes the configured base: {0}")]
    PathTraversal(String),

    #[error("unsupported protocol: {0}")]
    UnsupportedProtocol(String),

    #[error("circuit breaker is open")]
    CircuitOpen,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl StorageError {
    // only transport-class failures are worth retrying; protocol and
    // validation failures will not improve on a second attempt
    pub fn is_transient(&self) -> bool {
        matches!(self, StorageError::Transport(_) | StorageError::Timeout(_))
    }

    // errors the backend itself produced: the request failed but the
    // transport demonstrably works, which matters to circuit breakers
    pub fn is_backend_answer(&self) -> bool {
        matches!(
            self,
            StorageError::Auth(_)
                | StorageError::PermissionDenied(_)
                | StorageError::NotFound(_)
                | StorageError::Protocol(_)
        )
    }
}

impl From<io::Error> for StorageError {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::NotFound => StorageError::NotFound(err.to_string()),
            io::ErrorKind::PermissionDenied => StorageError::PermissionDenied(err.to_string()),
            io::ErrorKind::TimedOut => StorageError::Timeout(Duration::from_secs(0)),
            // everything else (connection resets, broken pipes, EIO from a
            // dead network mount) is treated as transport trouble
            _ => StorageError::Transport(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transient_classification() {
        assert!(StorageError::Transport("reset".to_owned()).is_transient());
        assert!(StorageError::Timeout(Duration::from_secs(1)).is_transient());

        assert!(!StorageError::Auth("denied".to_owned()).is_transient());
        assert!(!StorageError::NotFound("gone".to_owned()).is_transient());
        assert!(!StorageError::CircuitOpen.is_transient());
        assert!(!StorageError::PathTraversal("/x".to_owned()).is_transient());
    }

    #[test]
    fn io_error_mapping() {
        let nf = io::Error::new(io::ErrorKind::NotFound, "missing");
        assert!(matches!(StorageError::from(nf), StorageError::NotFound(_)));

        let perm = io::Error::new(io::ErrorKind::PermissionDenied, "nope");
        assert!(matches!(
            StorageError::from(perm),
            StorageError::PermissionDenied(_)
        ));

        let reset = io::Error::new(io::ErrorKind::ConnectionReset, "reset");
        assert!(StorageError::from(reset).is_transient());
    }
}
