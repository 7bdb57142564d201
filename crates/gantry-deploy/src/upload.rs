//! Content-addressed uploads to Blossom storage servers.
//!
//! Every file is identified by the SHA-256 of its bytes. The engine offers
//! each file to every configured server and records one outcome per
//! (file, server) pair; a file is publishable once at least one server
//! holds it, so a dead mirror degrades coverage instead of failing the
//! deployment.
//!
//! # Upload Protocol
//!
//! Per file and server, in order:
//!
//! 1. `HEAD /<sha256>`: success means the server already holds the blob
//!    and the transfer is skipped.
//! 2. `HEAD /upload` with `X-SHA-256`, `X-Content-Length` and
//!    `X-Content-Type`: the server answers 200 (send it), 401 (send it
//!    with authorization) or a final rejection (403, 413, 415) whose
//!    reason may travel in an `X-Reason` header.
//! 3. `PUT /upload` with the raw bytes, carrying an `Authorization:
//!    Nostr <base64 event>` header when the server asked for one.
//!
//! Servers that never implemented the negotiation endpoint answer step 2
//! with some other status and get the authorized PUT anyway; the PUT
//! response is authoritative either way.

use std::collections::BTreeMap;

use futures::future::join_all;
use futures::stream::{self, StreamExt};
use gantry_core::{AuthVerb, EventDraft, Identity};
use metrics::counter;
use nostr::JsonUtil;
use serde::Deserialize;
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::config::DeployConfig;
use crate::error::{Error, Result};
use crate::scan::{content_type_for, SiteFile};
use crate::unix_now;

/// Storage authorizations are single-purpose and expire an hour after
/// minting.
const AUTH_EXPIRY_SECS: u64 = 3600;

/// Outcome of one attempt against one server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerOutcome {
    /// Whether the server ended up holding (or, for deletes, no longer
    /// holding) the blob.
    pub success: bool,
    /// Failure reason, present only when `success` is false.
    pub error: Option<String>,
    /// Fetch URL reported by the server, present only for stored blobs.
    pub locator: Option<String>,
}

impl ServerOutcome {
    /// The server holds the blob at `locator`.
    pub fn stored(locator: impl Into<String>) -> Self {
        Self {
            success: true,
            error: None,
            locator: Some(locator.into()),
        }
    }

    /// The operation succeeded with nothing to fetch (deletes).
    pub fn completed() -> Self {
        Self {
            success: true,
            error: None,
            locator: None,
        }
    }

    /// The operation failed for the given reason.
    pub fn failed(reason: impl Into<String>) -> Self {
        Self {
            success: false,
            error: Some(reason.into()),
            locator: None,
        }
    }
}

/// A hashed file and its per-server outcomes.
#[derive(Debug, Clone)]
pub struct BlobUpload {
    /// Normalized absolute site path.
    pub site_path: String,
    /// SHA-256 of the file bytes, 64 hex characters.
    pub sha256: String,
    /// Size in bytes.
    pub size: u64,
    /// MIME type sent to the servers.
    pub content_type: &'static str,
    /// One entry per configured server, keyed by base URL.
    pub outcomes: BTreeMap<String, ServerOutcome>,
}

impl BlobUpload {
    /// A file is publishable once at least one server holds it.
    pub fn is_stored(&self) -> bool {
        self.outcomes.values().any(|outcome| outcome.success)
    }

    /// Servers that hold the blob, in key order.
    pub fn stored_on(&self) -> impl Iterator<Item = &str> {
        self.outcomes
            .iter()
            .filter(|(_, outcome)| outcome.success)
            .map(|(server, _)| server.as_str())
    }
}

/// How one file fared.
#[derive(Debug, Clone)]
pub enum FileOutcome {
    /// The file was hashed and offered to every server; individual
    /// servers may still have failed.
    Uploaded(BlobUpload),
    /// The file could not be read, so no server was contacted.
    Unreadable {
        /// Normalized absolute site path.
        site_path: String,
        /// The read error.
        error: String,
    },
}

impl FileOutcome {
    /// The site path this outcome describes.
    pub fn site_path(&self) -> &str {
        match self {
            Self::Uploaded(upload) => &upload.site_path,
            Self::Unreadable { site_path, .. } => site_path,
        }
    }
}

/// HTTP client for the content-addressed storage protocol.
pub struct BlossomClient {
    http: reqwest::Client,
    identity: Identity,
    servers: Vec<String>,
    concurrency: usize,
}

impl BlossomClient {
    /// Build a client from the deployment configuration.
    pub fn new(config: &DeployConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.http_timeout)
            .build()?;
        Ok(Self {
            http,
            identity: config.identity.clone(),
            servers: config.servers.clone(),
            concurrency: config.concurrency.max(1),
        })
    }

    /// Upload every file to every configured server.
    ///
    /// At most `concurrency` files are in flight at once; within a file,
    /// all servers are tried concurrently. Failures are recorded in the
    /// outcomes, never raised: whether partial coverage is acceptable is
    /// the caller's decision.
    pub async fn upload_site(&self, files: &[SiteFile]) -> Vec<FileOutcome> {
        let mut outcomes: Vec<FileOutcome> =
            stream::iter(files.iter().map(|file| self.upload_file(file)))
                .buffer_unordered(self.concurrency)
                .collect()
                .await;
        // buffer_unordered yields in completion order.
        outcomes.sort_by(|a, b| a.site_path().cmp(b.site_path()));
        outcomes
    }

    /// Hash one file and offer it to every server.
    pub async fn upload_file(&self, file: &SiteFile) -> FileOutcome {
        let bytes = match tokio::fs::read(&file.disk_path).await {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(path = %file.site_path, error = %e, "cannot read file");
                return FileOutcome::Unreadable {
                    site_path: file.site_path.clone(),
                    error: e.to_string(),
                };
            }
        };
        // One hash per file, shared across every server attempt.
        let sha256 = hex::encode(Sha256::digest(&bytes));
        let content_type = content_type_for(&file.site_path);

        let attempts = self.servers.iter().map(|server| {
            let site_path = file.site_path.as_str();
            let sha256 = sha256.as_str();
            let bytes = bytes.as_slice();
            async move {
                let outcome = self
                    .offer_blob(server, site_path, sha256, bytes, content_type)
                    .await;
                (server.clone(), outcome)
            }
        });
        let outcomes: BTreeMap<String, ServerOutcome> =
            join_all(attempts).await.into_iter().collect();

        FileOutcome::Uploaded(BlobUpload {
            site_path: file.site_path.clone(),
            sha256,
            size: bytes.len() as u64,
            content_type,
            outcomes,
        })
    }

    /// Offer one blob to one server, reducing transport errors to an
    /// outcome.
    async fn offer_blob(
        &self,
        server: &str,
        site_path: &str,
        sha256: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> ServerOutcome {
        match self
            .try_offer(server, site_path, sha256, bytes, content_type)
            .await
        {
            Ok(outcome) => outcome,
            Err(e) => {
                counter!("upload_attempts_total", "result" => "error").increment(1);
                warn!(server, path = site_path, error = %e, "upload failed");
                ServerOutcome::failed(e.to_string())
            }
        }
    }

    async fn try_offer(
        &self,
        server: &str,
        site_path: &str,
        sha256: &str,
        bytes: &[u8],
        content_type: &str,
    ) -> Result<ServerOutcome> {
        // Skip the transfer when the server already holds the blob.
        let head = self.http.head(format!("{server}/{sha256}")).send().await?;
        if head.status().is_success() {
            counter!("upload_skipped_total").increment(1);
            debug!(server, path = site_path, sha256, "blob already stored");
            return Ok(ServerOutcome::stored(format!("{server}/{sha256}")));
        }

        // Negotiate before sending bytes.
        let answer = self
            .http
            .head(format!("{server}/upload"))
            .header("X-SHA-256", sha256)
            .header("X-Content-Length", bytes.len().to_string())
            .header("X-Content-Type", content_type)
            .send()
            .await?;
        let status = answer.status().as_u16();
        let with_auth = match upload_action(status, reason_header(&answer)) {
            UploadAction::Send { authorized } => authorized,
            UploadAction::Refuse(reason) => {
                counter!("upload_attempts_total", "result" => "rejected").increment(1);
                warn!(server, path = site_path, status, reason = %reason, "server refused upload");
                return Ok(ServerOutcome::failed(reason));
            }
        };

        let mut request = self
            .http
            .put(format!("{server}/upload"))
            .header("X-SHA-256", sha256)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(bytes.to_vec());
        if with_auth {
            let authorization =
                self.authorization(AuthVerb::Upload, sha256, &format!("Upload {site_path}"))?;
            request = request.header(reqwest::header::AUTHORIZATION, authorization);
        }

        let resp = request.send().await?;
        let status = resp.status();
        if status.is_success() {
            counter!("upload_attempts_total", "result" => "ok").increment(1);
            counter!("upload_bytes_total").increment(bytes.len() as u64);
            let locator = descriptor_url(resp)
                .await
                .unwrap_or_else(|| format!("{server}/{sha256}"));
            info!(server, path = site_path, sha256, size = bytes.len(), "uploaded");
            Ok(ServerOutcome::stored(locator))
        } else {
            let reason = reason_header(&resp)
                .unwrap_or_else(|| format!("upload refused with status {status}"));
            counter!("upload_attempts_total", "result" => "rejected").increment(1);
            warn!(server, path = site_path, %status, reason = %reason, "server refused upload");
            Ok(ServerOutcome::failed(reason))
        }
    }

    /// Fetch a blob by hash, trying `servers` in order.
    ///
    /// The bytes are verified against the digest before being returned,
    /// so a corrupt or lying server is skipped rather than trusted.
    pub async fn download(&self, sha256: &str, servers: &[String]) -> Result<Vec<u8>> {
        for server in servers {
            match self.fetch_blob(server, sha256).await {
                Ok(bytes) => {
                    debug!(server, sha256, size = bytes.len(), "blob fetched");
                    return Ok(bytes);
                }
                Err(e) => {
                    warn!(server, sha256, error = %e, "fetch failed, trying next server");
                }
            }
        }
        Err(Error::BlobUnavailable {
            sha256: sha256.to_string(),
        })
    }

    async fn fetch_blob(&self, server: &str, sha256: &str) -> Result<Vec<u8>> {
        let resp = self
            .http
            .get(format!("{server}/{sha256}"))
            .send()
            .await?
            .error_for_status()?;
        let bytes = resp.bytes().await?;
        check_digest(sha256, &bytes)?;
        Ok(bytes.to_vec())
    }

    /// Delete a blob from every server, with delete authorization.
    ///
    /// A 404 counts as success: the server does not hold the blob.
    pub async fn purge(
        &self,
        sha256: &str,
        servers: &[String],
    ) -> Result<Vec<(String, ServerOutcome)>> {
        // The authorization is scoped to the verb and hash, not the
        // server, so one event covers the whole fan-out. Minting fails up
        // front for watch-only identities.
        let authorization =
            self.authorization(AuthVerb::Delete, sha256, &format!("Delete {sha256}"))?;
        let attempts = servers.iter().map(|server| {
            let authorization = authorization.clone();
            async move {
                let outcome = match self.delete_blob(server, sha256, &authorization).await {
                    Ok(outcome) => outcome,
                    Err(e) => ServerOutcome::failed(e.to_string()),
                };
                (server.clone(), outcome)
            }
        });
        Ok(join_all(attempts).await)
    }

    async fn delete_blob(
        &self,
        server: &str,
        sha256: &str,
        authorization: &str,
    ) -> Result<ServerOutcome> {
        let resp = self
            .http
            .delete(format!("{server}/{sha256}"))
            .header(reqwest::header::AUTHORIZATION, authorization)
            .send()
            .await?;
        let status = resp.status();
        if status.is_success() || status.as_u16() == 404 {
            debug!(server, sha256, "blob deleted");
            Ok(ServerOutcome::completed())
        } else {
            let reason = reason_header(&resp)
                .unwrap_or_else(|| format!("delete refused with status {status}"));
            warn!(server, sha256, %status, reason = %reason, "server refused delete");
            Ok(ServerOutcome::failed(reason))
        }
    }

    /// Mint an `Authorization: Nostr <base64>` header value: a signed
    /// single-purpose authorization event covering `verb` on one blob.
    fn authorization(&self, verb: AuthVerb, sha256: &str, description: &str) -> Result<String> {
        let keys = self.identity.keys()?;
        let now = unix_now();
        let draft = EventDraft::upload_auth(
            &self.identity.public_key(),
            verb,
            sha256,
            now + AUTH_EXPIRY_SECS,
            description,
            now,
        );
        let event = draft
            .into_unsigned()?
            .sign_with_keys(keys)
            .map_err(|e| Error::Signing(e.to_string()))?;
        let json = event.as_json();
        let b64 = base64::Engine::encode(&base64::engine::general_purpose::STANDARD, json);
        Ok(format!("Nostr {b64}"))
    }
}

/// What to do with a blob after the `HEAD /upload` negotiation.
#[derive(Debug, Clone, PartialEq, Eq)]
enum UploadAction {
    /// Transfer the bytes, with an authorization header when asked for.
    Send {
        /// Whether the server demanded authorization.
        authorized: bool,
    },
    /// Do not transfer; the server refused the blob outright.
    Refuse(String),
}

/// Map the negotiation answer to an action.
///
/// 403, 413 and 415 are final refusals; the server's reason may travel in
/// an `X-Reason` header. Any other unexpected status means the server
/// never implemented the negotiation endpoint, and the authorized PUT
/// decides.
fn upload_action(status: u16, reason: Option<String>) -> UploadAction {
    match status {
        200 => UploadAction::Send { authorized: false },
        401 => UploadAction::Send { authorized: true },
        status @ (403 | 413 | 415) => UploadAction::Refuse(
            reason.unwrap_or_else(|| format!("upload refused with status {status}")),
        ),
        _ => UploadAction::Send { authorized: true },
    }
}

/// The server's `X-Reason` header, when present and readable.
fn reason_header(resp: &reqwest::Response) -> Option<String> {
    resp.headers()
        .get("x-reason")
        .and_then(|value| value.to_str().ok())
        .map(str::to_string)
}

/// Check fetched bytes against the digest they were requested by.
fn check_digest(sha256: &str, bytes: &[u8]) -> Result<()> {
    let actual = hex::encode(Sha256::digest(bytes));
    if actual != sha256 {
        return Err(Error::DigestMismatch {
            expected: sha256.to_string(),
            actual,
        });
    }
    Ok(())
}

/// Subset of the blob descriptor servers return on upload.
#[derive(Debug, Deserialize)]
struct BlobDescriptor {
    url: String,
}

/// The fetch URL from the response body, when the server sent a valid
/// blob descriptor.
async fn descriptor_url(resp: reqwest::Response) -> Option<String> {
    let descriptor: BlobDescriptor = resp.json().await.ok()?;
    if descriptor.url.is_empty() {
        None
    } else {
        Some(descriptor.url)
    }
}
