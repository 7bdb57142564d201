//! Error types for the deployment engine.

use thiserror::Error;

/// Result type alias using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while deploying or inspecting a site.
#[derive(Error, Debug)]
pub enum Error {
    /// Protocol-layer error (identity, event drafts, mining).
    #[error(transparent)]
    Core(#[from] gantry_core::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP transport error.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Nostr SDK error.
    #[error("Nostr SDK error: {0}")]
    NostrSdk(#[from] nostr_sdk::client::Error),

    /// Event signing failed.
    #[error("signing error: {0}")]
    Signing(String),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Site validation error (missing directory, nothing to deploy).
    #[error("Validation error: {0}")]
    Validation(String),

    /// No file was accepted by any storage server.
    #[error("no file was accepted by any storage server")]
    NoFilesUploaded,

    /// The server list would be empty.
    #[error("no storage servers available")]
    NoServersAvailable,

    /// Every relay rejected the event.
    #[error("event {event_id} was rejected by every relay")]
    PublishRejected {
        /// Hex id of the rejected event.
        event_id: String,
    },

    /// The relays hold no records for the queried identity.
    #[error("no published records found: {0}")]
    NoRecords(String),

    /// A blob could not be retrieved from any listed server.
    #[error("blob {sha256} not available on any server")]
    BlobUnavailable {
        /// Content hash of the missing blob.
        sha256: String,
    },

    /// Retrieved bytes do not hash to the requested id.
    #[error("digest mismatch: expected {expected}, got {actual}")]
    DigestMismatch {
        /// The hash the bytes were requested by.
        expected: String,
        /// The hash of what the server actually returned.
        actual: String,
    },
}
