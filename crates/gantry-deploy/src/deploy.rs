//! Deployment orchestration.
//!
//! A deployment runs through fixed phases: validate the identity and
//! site directory, upload every file, turn the outcomes into records,
//! publish the records, report. Each transition is logged, and a failure
//! is logged with the phase it happened in.
//!
//! Ordering matters at the publishing step: per-file location records go
//! out first and the server-list record goes out last, so a consumer that
//! sees the new server list can already resolve every file it points at.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use gantry_core::EventDraft;
use tracing::{debug, error, info, warn};

use crate::config::DeployConfig;
use crate::error::{Error, Result};
use crate::publish::{EventPublisher, PublishOutcome};
use crate::scan::scan_site;
use crate::unix_now;
use crate::upload::{BlossomClient, FileOutcome};

/// Pause between consecutive publishes; relays rate-limit bursts.
const PUBLISH_GAP: Duration = Duration::from_millis(300);

/// Phase of a running deployment, logged at every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeployPhase {
    /// Checking the identity and scanning the site directory.
    Validating,
    /// Hashing files and offering them to storage servers.
    Uploading,
    /// Turning upload outcomes into publishable records.
    BuildingRecords,
    /// Broadcasting signed records to relays.
    Publishing,
    /// Finished successfully.
    Done,
    /// Aborted; the error names the cause.
    Failed,
}

impl DeployPhase {
    /// Lowercase phase name for logs.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validating => "validating",
            Self::Uploading => "uploading",
            Self::BuildingRecords => "building_records",
            Self::Publishing => "publishing",
            Self::Done => "done",
            Self::Failed => "failed",
        }
    }
}

/// A path-to-hash record ready to publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileRecord {
    /// Absolute site path.
    pub path: String,
    /// Content hash, 64 hex characters.
    pub sha256: String,
}

/// Summary of a finished deployment.
#[derive(Debug, Clone)]
pub struct DeploymentReport {
    /// Publishing identity, bech32.
    pub npub: String,
    /// Files found in the site directory.
    pub files_total: usize,
    /// Files at least one server accepted.
    pub files_uploaded: usize,
    /// The published records, sorted by path.
    pub records: Vec<FileRecord>,
    /// Servers named in the published server list.
    pub servers: Vec<String>,
    /// Per-relay outcomes for each location record, in record order.
    pub record_outcomes: Vec<PublishOutcome>,
    /// Per-relay outcomes for the server-list event.
    pub server_list_outcome: PublishOutcome,
    /// When the deployment finished, unix seconds.
    pub completed_at: u64,
}

impl DeploymentReport {
    /// Events broadcast: one per record, plus the server list.
    pub fn events_total(&self) -> usize {
        self.record_outcomes.len() + 1
    }
}

/// Turn upload outcomes into publishable records.
///
/// A file qualifies once at least one server holds it; files that failed
/// everywhere or could not be read are logged and excluded without
/// aborting the deployment. The server list keeps the configured order,
/// narrowed to servers that accepted at least one blob.
pub fn build_records(
    uploads: &[FileOutcome],
    configured_servers: &[String],
) -> Result<(Vec<FileRecord>, Vec<String>)> {
    let mut records = Vec::new();
    let mut stored_on: HashSet<&str> = HashSet::new();
    for outcome in uploads {
        match outcome {
            FileOutcome::Uploaded(upload) if upload.is_stored() => {
                records.push(FileRecord {
                    path: upload.site_path.clone(),
                    sha256: upload.sha256.clone(),
                });
                stored_on.extend(upload.stored_on());
            }
            FileOutcome::Uploaded(upload) => {
                warn!(path = %upload.site_path, "no server accepted file, skipping record");
            }
            FileOutcome::Unreadable { site_path, error } => {
                warn!(path = %site_path, error = %error, "unreadable file, skipping record");
            }
        }
    }
    if records.is_empty() {
        return Err(Error::NoFilesUploaded);
    }
    records.sort_by(|a, b| a.path.cmp(&b.path));

    let servers: Vec<String> = configured_servers
        .iter()
        .filter(|server| stored_on.contains(server.as_str()))
        .cloned()
        .collect();
    if servers.is_empty() {
        return Err(Error::NoServersAvailable);
    }
    Ok((records, servers))
}

/// Run a full deployment of the site under `site_dir`.
pub async fn deploy(config: &DeployConfig, site_dir: &Path) -> Result<DeploymentReport> {
    let mut phase = DeployPhase::Validating;
    match run(config, site_dir, &mut phase).await {
        Ok(report) => Ok(report),
        Err(e) => {
            error!(phase = phase.as_str(), error = %e, "deployment failed");
            Err(e)
        }
    }
}

async fn run(
    config: &DeployConfig,
    site_dir: &Path,
    phase: &mut DeployPhase,
) -> Result<DeploymentReport> {
    enter(*phase);
    // A deployment signs events, so a watch-only identity fails here,
    // before any network traffic.
    config.identity.keys()?;
    if config.servers.is_empty() {
        return Err(Error::NoServersAvailable);
    }
    let files = scan_site(site_dir)?;
    let files_total = files.len();

    *phase = DeployPhase::Uploading;
    enter(*phase);
    let uploader = BlossomClient::new(config)?;
    let uploads = uploader.upload_site(&files).await;

    *phase = DeployPhase::BuildingRecords;
    enter(*phase);
    let (records, servers) = build_records(&uploads, &config.servers)?;

    *phase = DeployPhase::Publishing;
    enter(*phase);
    let publisher = EventPublisher::new(config);
    publisher.connect().await;
    let published = publish_records(config, &publisher, &records, &servers).await;
    publisher.disconnect().await;
    let (record_outcomes, server_list_outcome) = published?;

    *phase = DeployPhase::Done;
    enter(*phase);
    let report = DeploymentReport {
        npub: config.identity.npub()?,
        files_total,
        files_uploaded: records.len(),
        records,
        servers,
        record_outcomes,
        server_list_outcome,
        completed_at: unix_now(),
    };
    info!(
        files = report.files_uploaded,
        events = report.events_total(),
        "deployment complete"
    );
    Ok(report)
}

/// Publish location records sequentially, then the server list last.
///
/// An event rejected by every relay aborts publishing right away; the
/// records accepted so far stay on their relays and a re-run replaces
/// them. Partial relay acceptance is tolerated and logged per relay.
async fn publish_records(
    config: &DeployConfig,
    publisher: &EventPublisher,
    records: &[FileRecord],
    servers: &[String],
) -> Result<(Vec<PublishOutcome>, PublishOutcome)> {
    let pubkey = config.identity.public_key();
    let mut outcomes = Vec::with_capacity(records.len());

    for record in records {
        let draft = EventDraft::file_location(&pubkey, &record.path, &record.sha256, unix_now());
        let outcome = publisher.publish(draft).await?;
        debug!(path = %record.path, event_id = %outcome.event_id, "record published");
        outcomes.push(outcome);
        tokio::time::sleep(PUBLISH_GAP).await;
    }

    let draft = EventDraft::server_list(&pubkey, servers, unix_now());
    let server_list = publisher.publish(draft).await?;
    debug!(event_id = %server_list.event_id, "server list published");

    Ok((outcomes, server_list))
}

fn enter(phase: DeployPhase) {
    info!(phase = phase.as_str(), "deployment phase");
}
