//! Gantry deployment pipeline.
//!
//! This crate drives a full static-site deployment: scan a directory,
//! upload every file to content-addressed storage, then publish the
//! signed records that map site paths to content hashes.
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────┐
//! │    scan_site    │  Walks the site directory, normalizes paths
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │  BlossomClient  │  SHA-256 per file, offers blobs to every server
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │  build_records  │  One location record per stored file
//! └────────┬────────┘
//!          │
//!          ▼
//! ┌─────────────────┐
//! │ EventPublisher  │  Signs and broadcasts to every relay
//! └─────────────────┘
//! ```
//!
//! The pipeline is storage-first: location records are only published for
//! files at least one server actually holds, so a published site never
//! points at a blob nobody stores.

pub mod config;
pub mod deploy;
pub mod error;
pub mod publish;
pub mod scan;
pub mod upload;

// Re-export commonly used types at crate root
pub use error::{Error, Result};

pub use config::{DeployConfig, PowPolicy};
pub use deploy::{build_records, deploy, DeployPhase, DeploymentReport, FileRecord};
pub use publish::{EventPublisher, PublishOutcome, RelayOutcome, SiteRecord};
pub use scan::{scan_site, SiteFile};
pub use upload::{BlobUpload, BlossomClient, FileOutcome, ServerOutcome};

/// Current unix time in seconds.
pub(crate) fn unix_now() -> u64 {
    chrono::Utc::now().timestamp().max(0) as u64
}
