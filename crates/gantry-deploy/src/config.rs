//! Deployment configuration assembled from environment variables.
//!
//! The engine takes an explicit [`DeployConfig`] by reference; there is no
//! global settings object. `main` builds one with [`DeployConfig::from_env`]
//! and lets CLI flags overwrite individual fields afterwards, so precedence
//! is flags over environment over defaults.
//!
//! # Normalization Rules
//!
//! Relay and server URLs are normalized before use to prevent duplicates
//! caused by trailing slashes or case differences:
//!
//! - Bare hosts get a scheme: `wss://` for relays, `https://` for servers
//! - Trailing slashes are removed
//! - Scheme and host are lowercased by the URL parser
//! - Duplicates are dropped, first occurrence wins

use std::time::Duration;

use gantry_core::Identity;
use nostr_sdk::RelayUrl;

use crate::error::{Error, Result};

/// Difficulties beyond this are not minable on a CPU before any sane
/// timeout and almost certainly mean a typo.
const MAX_POW_DIFFICULTY: u8 = 40;

/// Proof-of-work policy for published events.
#[derive(Debug, Clone)]
pub struct PowPolicy {
    /// Target difficulty in leading zero bits; `None` publishes unmined.
    pub difficulty: Option<u8>,
    /// Wall-clock budget for the nonce search, per event.
    pub timeout: Duration,
    /// When true, a mining timeout fails the publish instead of
    /// downgrading it to an unmined event.
    pub require: bool,
}

impl Default for PowPolicy {
    fn default() -> Self {
        Self {
            difficulty: None,
            timeout: Duration::from_secs(60),
            require: false,
        }
    }
}

/// Engine configuration.
#[derive(Debug, Clone)]
pub struct DeployConfig {
    /// The deployment identity (full or watch-only).
    pub identity: Identity,
    /// Relay URLs, normalized and deduplicated, order preserved.
    pub relays: Vec<String>,
    /// Storage server base URLs, normalized (no trailing slash). May be
    /// empty for commands that only read relays.
    pub servers: Vec<String>,
    /// Proof-of-work policy.
    pub pow: PowPolicy,
    /// Per-request timeout for storage-server HTTP calls.
    pub http_timeout: Duration,
    /// Per-relay timeout for publishing one event.
    pub publish_timeout: Duration,
    /// Timeout for relay queries.
    pub fetch_timeout: Duration,
    /// Maximum files in flight during upload (at least 1).
    pub concurrency: usize,
}

impl DeployConfig {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `GANTRY_KEY`: identity as `nsec1...`, `npub1...` (watch-only), or
    ///   64 hex characters (secret key)
    /// - `GANTRY_RELAYS`: comma-separated relay URLs
    ///
    /// Optional:
    /// - `GANTRY_SERVERS`: comma-separated storage server URLs
    /// - `GANTRY_POW`: target difficulty in bits (default: no mining)
    /// - `GANTRY_POW_TIMEOUT_SECS`: mining budget per event (default: 60)
    /// - `GANTRY_POW_REQUIRED`: fail instead of publishing unmined on
    ///   timeout (default: false)
    /// - `GANTRY_HTTP_TIMEOUT_SECS`: storage-server request timeout
    ///   (default: 30)
    /// - `GANTRY_PUBLISH_TIMEOUT_SECS`: per-relay publish timeout
    ///   (default: 20)
    /// - `GANTRY_FETCH_TIMEOUT_SECS`: relay query timeout (default: 10)
    /// - `GANTRY_CONCURRENCY`: files in flight during upload (default: 8)
    pub fn from_env() -> Result<Self> {
        let raw_key = std::env::var("GANTRY_KEY")
            .map_err(|_| Error::Config("GANTRY_KEY is not set".to_string()))?;
        let identity = Identity::parse(&raw_key)
            .map_err(|e| Error::Config(format!("GANTRY_KEY: {e}")))?;

        let raw_relays = std::env::var("GANTRY_RELAYS")
            .map_err(|_| Error::Config("GANTRY_RELAYS is not set".to_string()))?;
        let relays = parse_relay_list(&raw_relays)?;
        if relays.is_empty() {
            return Err(Error::Config("GANTRY_RELAYS lists no relays".to_string()));
        }

        let servers = match std::env::var("GANTRY_SERVERS") {
            Ok(raw) => parse_server_list(&raw)?,
            Err(_) => Vec::new(),
        };

        let difficulty = match std::env::var("GANTRY_POW") {
            Ok(raw) => Some(parse_difficulty(&raw)?),
            Err(_) => None,
        };
        let pow = PowPolicy {
            difficulty,
            timeout: env_duration_secs("GANTRY_POW_TIMEOUT_SECS", 60)?,
            require: env_flag("GANTRY_POW_REQUIRED"),
        };

        let config = Self {
            identity,
            relays,
            servers,
            pow,
            http_timeout: env_duration_secs("GANTRY_HTTP_TIMEOUT_SECS", 30)?,
            publish_timeout: env_duration_secs("GANTRY_PUBLISH_TIMEOUT_SECS", 20)?,
            fetch_timeout: env_duration_secs("GANTRY_FETCH_TIMEOUT_SECS", 10)?,
            concurrency: env_usize("GANTRY_CONCURRENCY", 8)?.max(1),
        };
        config.log_summary();
        Ok(config)
    }

    /// Replace the relay list from a comma-separated string (CLI override).
    pub fn set_relays(&mut self, raw: &str) -> Result<()> {
        let relays = parse_relay_list(raw)?;
        if relays.is_empty() {
            return Err(Error::Config("relay list is empty".to_string()));
        }
        self.relays = relays;
        Ok(())
    }

    /// Replace the server list from a comma-separated string (CLI override).
    pub fn set_servers(&mut self, raw: &str) -> Result<()> {
        self.servers = parse_server_list(raw)?;
        Ok(())
    }

    /// Set the proof-of-work difficulty (CLI override).
    pub fn set_pow_difficulty(&mut self, difficulty: u8) -> Result<()> {
        if difficulty > MAX_POW_DIFFICULTY {
            return Err(Error::Config(format!(
                "pow difficulty {difficulty} exceeds maximum {MAX_POW_DIFFICULTY}"
            )));
        }
        self.pow.difficulty = Some(difficulty);
        Ok(())
    }

    fn log_summary(&self) {
        tracing::info!(
            npub = %self.identity.npub().unwrap_or_else(|_| self.identity.public_key_hex()),
            can_sign = self.identity.can_sign(),
            relays = self.relays.len(),
            servers = self.servers.len(),
            pow = ?self.pow.difficulty,
            concurrency = self.concurrency,
            "configuration loaded"
        );
    }
}

/// Result of URL normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    /// URL is valid, in canonical form.
    Ok(String),
    /// URL is syntactically unusable.
    Invalid(String),
}

impl Normalized {
    /// Returns the normalized URL if valid.
    pub fn ok(self) -> Option<String> {
        match self {
            Self::Ok(url) => Some(url),
            Self::Invalid(_) => None,
        }
    }

    /// Returns true if the URL is valid.
    pub fn is_ok(&self) -> bool {
        matches!(self, Self::Ok(_))
    }
}

/// Normalize a relay URL.
///
/// Bare hosts get `wss://`; explicit non-websocket schemes are invalid.
pub fn normalize_relay_url(url: &str) -> Normalized {
    let url = url.trim();
    if url.is_empty() {
        return Normalized::Invalid("empty URL".to_string());
    }
    let candidate = if url.starts_with("wss://") || url.starts_with("ws://") {
        url.to_string()
    } else if url.contains("://") {
        return Normalized::Invalid("relay URL must use wss:// or ws://".to_string());
    } else {
        format!("wss://{url}")
    };

    let parsed = match RelayUrl::parse(&candidate) {
        Ok(u) => u,
        Err(e) => return Normalized::Invalid(format!("invalid relay URL: {e}")),
    };

    let mut normalized = parsed.to_string();
    while normalized.ends_with('/') {
        normalized.pop();
    }
    Normalized::Ok(normalized)
}

/// Normalize a storage server base URL.
///
/// Bare hosts get `https://`; explicit non-HTTP schemes are invalid. The
/// result never carries a trailing slash, so paths can be appended with a
/// plain `/`.
pub fn normalize_server_url(url: &str) -> Normalized {
    let url = url.trim();
    if url.is_empty() {
        return Normalized::Invalid("empty URL".to_string());
    }
    let candidate = if url.starts_with("https://") || url.starts_with("http://") {
        url.to_string()
    } else if url.contains("://") {
        return Normalized::Invalid("server URL must use https:// or http://".to_string());
    } else {
        format!("https://{url}")
    };

    let parsed = match reqwest::Url::parse(&candidate) {
        Ok(u) => u,
        Err(e) => return Normalized::Invalid(format!("invalid server URL: {e}")),
    };
    if parsed.host_str().is_none() {
        return Normalized::Invalid("server URL has no host".to_string());
    }

    let mut normalized = parsed.to_string();
    while normalized.ends_with('/') {
        normalized.pop();
    }
    Normalized::Ok(normalized)
}

/// Split a comma-separated list, trimming entries and dropping empties.
fn split_csv(raw: &str) -> Vec<&str> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Parse and normalize a comma-separated relay list. Any invalid entry
/// fails the whole list; these are operator-supplied, not wild data.
pub fn parse_relay_list(raw: &str) -> Result<Vec<String>> {
    let mut relays = Vec::new();
    for entry in split_csv(raw) {
        match normalize_relay_url(entry) {
            Normalized::Ok(url) => {
                if !relays.contains(&url) {
                    relays.push(url);
                }
            }
            Normalized::Invalid(reason) => {
                return Err(Error::Config(format!("relay '{entry}': {reason}")));
            }
        }
    }
    Ok(relays)
}

/// Parse and normalize a comma-separated server list.
pub fn parse_server_list(raw: &str) -> Result<Vec<String>> {
    let mut servers = Vec::new();
    for entry in split_csv(raw) {
        match normalize_server_url(entry) {
            Normalized::Ok(url) => {
                if !servers.contains(&url) {
                    servers.push(url);
                }
            }
            Normalized::Invalid(reason) => {
                return Err(Error::Config(format!("server '{entry}': {reason}")));
            }
        }
    }
    Ok(servers)
}

fn parse_difficulty(raw: &str) -> Result<u8> {
    let difficulty: u8 = raw
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("GANTRY_POW: '{raw}' is not a difficulty")))?;
    if difficulty > MAX_POW_DIFFICULTY {
        return Err(Error::Config(format!(
            "GANTRY_POW: difficulty {difficulty} exceeds maximum {MAX_POW_DIFFICULTY}"
        )));
    }
    Ok(difficulty)
}

fn env_duration_secs(key: &str, default: u64) -> Result<Duration> {
    match std::env::var(key) {
        Ok(raw) => {
            let secs: u64 = raw
                .trim()
                .parse()
                .map_err(|_| Error::Config(format!("{key}: '{raw}' is not a number of seconds")))?;
            Ok(Duration::from_secs(secs))
        }
        Err(_) => Ok(Duration::from_secs(default)),
    }
}

fn env_usize(key: &str, default: usize) -> Result<usize> {
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map_err(|_| Error::Config(format!("{key}: '{raw}' is not a number"))),
        Err(_) => Ok(default),
    }
}

fn env_flag(key: &str) -> bool {
    std::env::var(key)
        .map(|v| matches!(v.trim().to_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(false)
}
