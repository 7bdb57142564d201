//! Core types and pure logic for the gantry deployment pipeline.
//!
//! This crate provides:
//! - Identity keys and their bech32 encodings (npub/nsec) via the nostr crate
//! - Unsigned event drafts with NIP-01 canonical ids, and the closed set of
//!   record kinds gantry emits
//! - Site path normalization (the d-tag form every producer agrees on)
//! - Proof-of-work mining (NIP-13) bounded by wall-clock time
//! - Metric definitions shared across the pipeline

mod error;
mod event;
mod identity;
pub mod metrics;
mod paths;
pub mod pow;

pub use error::{Error, Result};
pub use event::{AuthVerb, EventDraft, RecordKind};
pub use identity::{
    DecodedIdentity, Identity, decode_identity, derive_public_key, encode_public, encode_secret,
};
pub use paths::normalize_site_path;
pub use pow::{MinerOutcome, leading_zero_bits, mine, mine_with_timeout};
