//! Error types shared across the gantry protocol crates.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the protocol layer.
#[derive(Error, Debug)]
pub enum Error {
    /// Key material failed validation (wrong length or out-of-range scalar).
    #[error("invalid key: {0}")]
    InvalidKey(String),

    /// A human-readable identity string with a bad checksum or an
    /// unexpected prefix.
    #[error("malformed identity string: {0}")]
    MalformedIdentity(String),

    /// The configured identity holds only a verification key and cannot
    /// author events.
    #[error("read-only identity: no secret key available for signing")]
    ReadOnlyIdentity,

    /// A site path that cannot be normalized (empty or escaping the root).
    #[error("invalid site path '{path}': {reason}")]
    InvalidPath {
        /// The offending path as given.
        path: String,
        /// Description of what's wrong.
        reason: &'static str,
    },

    /// The nonce search hit the wall clock before reaching the target
    /// difficulty.
    #[error("proof-of-work timed out after {elapsed_ms}ms at difficulty {difficulty}")]
    PowTimeout {
        /// Target difficulty in leading zero bits.
        difficulty: u8,
        /// Wall-clock time spent mining.
        elapsed_ms: u64,
    },

    /// A background mining task failed to complete.
    #[error("mining task failed: {0}")]
    MiningTask(String),

    /// JSON serialization error (canonical id or wire form).
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Nostr library error (key parsing, signing).
    #[error("nostr error: {0}")]
    Nostr(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    // =========================================================================
    // Error Display formatting tests
    // =========================================================================

    #[test]
    fn test_invalid_key_display() {
        let err = Error::InvalidKey("secret key must be 32 bytes".to_string());
        let msg = err.to_string();
        assert!(msg.contains("invalid key"));
        assert!(msg.contains("32 bytes"));
    }

    #[test]
    fn test_malformed_identity_display() {
        let err = Error::MalformedIdentity("unexpected prefix 'note'".to_string());
        let msg = err.to_string();
        assert!(msg.contains("malformed identity string"));
        assert!(msg.contains("note"));
    }

    #[test]
    fn test_read_only_identity_display() {
        let msg = Error::ReadOnlyIdentity.to_string();
        assert!(msg.contains("read-only identity"));
        assert!(msg.contains("signing"));
    }

    #[test]
    fn test_invalid_path_display() {
        let err = Error::InvalidPath {
            path: "../etc/passwd".to_string(),
            reason: "parent traversal",
        };
        let msg = err.to_string();
        assert!(msg.contains("../etc/passwd"));
        assert!(msg.contains("parent traversal"));
    }

    #[test]
    fn test_pow_timeout_display() {
        let err = Error::PowTimeout {
            difficulty: 21,
            elapsed_ms: 5000,
        };
        let msg = err.to_string();
        assert!(msg.contains("proof-of-work timed out"));
        assert!(msg.contains("21"));
        assert!(msg.contains("5000"));
    }

    // =========================================================================
    // Error From conversions
    // =========================================================================

    #[test]
    fn test_from_json_error() {
        let json_err = serde_json::from_str::<serde_json::Value>("not valid json").unwrap_err();
        let err: Error = json_err.into();
        assert!(matches!(err, Error::Json(_)));
        assert!(err.to_string().contains("JSON error"));
    }

    // =========================================================================
    // Result type alias
    // =========================================================================

    #[test]
    fn test_result_type_ok() {
        let result: Result<i32> = Ok(7);
        assert!(matches!(result, Ok(7)));
    }

    #[test]
    fn test_result_type_err() {
        let result: Result<i32> = Err(Error::ReadOnlyIdentity);
        assert!(result.is_err());
    }
}
