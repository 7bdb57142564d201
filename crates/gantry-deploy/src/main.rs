//! Command line interface for deploying static sites.
//!
//! `gantry deploy` walks a directory, uploads every file to the
//! configured storage servers and publishes the signed records that map
//! site paths to content hashes. `ls`, `download` and `purge` operate on
//! what is already published.
//!
//! # Usage
//!
//! ```bash
//! export GANTRY_KEY=nsec1...
//! export GANTRY_RELAYS=wss://relay.example,wss://relay.other
//! export GANTRY_SERVERS=https://blobs.example
//!
//! # Deploy a built site
//! gantry deploy ./public
//!
//! # List the published records
//! gantry ls
//!
//! # Mirror the published site into a directory
//! gantry download ./restored
//!
//! # Delete the site's blobs from the storage servers
//! gantry purge
//! ```

use std::collections::{BTreeSet, HashSet};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use gantry_core::normalize_site_path;
use gantry_deploy::{
    deploy, BlossomClient, DeployConfig, DeploymentReport, Error, EventPublisher, SiteRecord,
};
use tracing_subscriber::EnvFilter;

/// Static-site deployment over Nostr relays and Blossom storage.
#[derive(Parser)]
#[command(name = "gantry")]
#[command(about = "Deploy static sites to Nostr relays and Blossom storage")]
#[command(version)]
struct Cli {
    /// Relay URLs (comma-separated, overrides GANTRY_RELAYS)
    #[arg(long, global = true)]
    relays: Option<String>,

    /// Storage server URLs (comma-separated, overrides GANTRY_SERVERS)
    #[arg(long, global = true)]
    servers: Option<String>,

    /// Subcommand to execute.
    #[command(subcommand)]
    command: Commands,
}

/// Supported CLI subcommands.
#[derive(Subcommand)]
enum Commands {
    /// Upload a site directory and publish its records.
    Deploy {
        /// Directory containing the built site.
        dir: PathBuf,

        /// Proof-of-work difficulty for published events.
        #[arg(long)]
        pow: Option<u8>,
    },
    /// List the published records for the configured identity.
    Ls,
    /// Download the published site into a directory.
    Download {
        /// Directory to write the site into.
        out_dir: PathBuf,
    },
    /// Delete the site's blobs from every listed server.
    Purge {
        /// Only purge the blob backing this site path.
        #[arg(long)]
        path: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Required when both ring and aws-lc-rs are present in the tree.
    rustls::crypto::ring::default_provider()
        .install_default()
        .map_err(|_| anyhow::anyhow!("failed to install rustls crypto provider"))?;

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,gantry_deploy=debug")),
        )
        .init();

    gantry_core::metrics::describe_metrics();

    let cli = Cli::parse();
    let mut config = DeployConfig::from_env().context("loading configuration")?;
    if let Some(raw) = &cli.relays {
        config.set_relays(raw).context("applying --relays")?;
    }
    if let Some(raw) = &cli.servers {
        config.set_servers(raw).context("applying --servers")?;
    }

    run(cli.command, config).await
}

/// Execute the selected subcommand.
async fn run(command: Commands, mut config: DeployConfig) -> Result<()> {
    match command {
        Commands::Deploy { dir, pow } => {
            if let Some(difficulty) = pow {
                config.set_pow_difficulty(difficulty)?;
            }
            let report = deploy(&config, &dir)
                .await
                .with_context(|| format!("deploying {}", dir.display()))?;
            print_report(&report);
        }
        Commands::Ls => {
            let (records, servers) = fetch_published(&config).await?;
            if records.is_empty() {
                println!("no records published for {}", config.identity.npub()?);
            }
            for record in &records {
                println!("{}  {}", record.sha256, record.path);
            }
            if !servers.is_empty() {
                println!();
                println!("servers:");
                for server in &servers {
                    println!("  {server}");
                }
            }
        }
        Commands::Download { out_dir } => download_site(&config, &out_dir).await?,
        Commands::Purge { path } => purge_site(&config, path.as_deref()).await?,
    }
    Ok(())
}

/// Fetch the published records and server list in one relay session.
async fn fetch_published(config: &DeployConfig) -> Result<(Vec<SiteRecord>, Vec<String>)> {
    let author = config.identity.public_key();
    let publisher = EventPublisher::new(config);
    publisher.connect().await;
    let records = publisher.fetch_site_records(&author).await;
    let servers = publisher.fetch_server_list(&author).await;
    publisher.disconnect().await;
    Ok((records?, servers?))
}

/// Mirror the published site into `out_dir`, digest-verifying every blob.
async fn download_site(config: &DeployConfig, out_dir: &Path) -> Result<()> {
    let (records, published_servers) = fetch_published(config).await?;
    if records.is_empty() {
        return Err(Error::NoRecords(config.identity.npub()?).into());
    }
    // Configured servers win; the published list is the fallback, so a
    // watch-only mirror needs no server configuration at all.
    let servers = if config.servers.is_empty() {
        published_servers
    } else {
        config.servers.clone()
    };
    if servers.is_empty() {
        return Err(Error::NoServersAvailable.into());
    }

    let client = BlossomClient::new(config)?;
    let mut written = 0usize;
    for record in &records {
        // Record paths are wild data from relays; renormalize before
        // touching the filesystem.
        let site_path = match normalize_site_path(&record.path) {
            Ok(p) => p,
            Err(e) => {
                tracing::warn!(path = %record.path, error = %e, "skipping unusable record path");
                continue;
            }
        };
        let bytes = client.download(&record.sha256, &servers).await?;
        let target = out_dir.join(site_path.trim_start_matches('/'));
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&target, &bytes).await?;
        println!("{}  {}", record.sha256, target.display());
        written += 1;
    }
    println!("downloaded {} files to {}", written, out_dir.display());
    Ok(())
}

/// Delete published blobs from every listed server.
async fn purge_site(config: &DeployConfig, path: Option<&str>) -> Result<()> {
    let (all_records, published_servers) = fetch_published(config).await?;
    let selected: Vec<SiteRecord> = match path {
        Some(p) => {
            let wanted = normalize_site_path(p)?;
            all_records
                .iter()
                .filter(|r| r.path == wanted)
                .cloned()
                .collect()
        }
        None => all_records.clone(),
    };
    if selected.is_empty() {
        return Err(Error::NoRecords(config.identity.npub()?).into());
    }

    let servers = if config.servers.is_empty() {
        published_servers
    } else {
        config.servers.clone()
    };
    if servers.is_empty() {
        return Err(Error::NoServersAvailable.into());
    }

    // A blob shared with a record outside the selection must survive.
    let retained: HashSet<&str> = all_records
        .iter()
        .filter(|r| !selected.iter().any(|s| s.path == r.path))
        .map(|r| r.sha256.as_str())
        .collect();
    let hashes: BTreeSet<&str> = selected
        .iter()
        .map(|r| r.sha256.as_str())
        .filter(|h| !retained.contains(h))
        .collect();
    if hashes.is_empty() {
        println!("nothing to purge; every selected blob is shared with another record");
        return Ok(());
    }

    let client = BlossomClient::new(config)?;
    for sha256 in hashes {
        let outcomes = client.purge(sha256, &servers).await?;
        for (server, outcome) in &outcomes {
            if outcome.success {
                println!("deleted {sha256} from {server}");
            } else {
                println!(
                    "failed to delete {sha256} from {server}: {}",
                    outcome.error.as_deref().unwrap_or("unknown")
                );
            }
        }
    }
    Ok(())
}

fn print_report(report: &DeploymentReport) {
    let completed = chrono::DateTime::from_timestamp(report.completed_at as i64, 0)
        .map(|dt| dt.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| report.completed_at.to_string());
    println!(
        "deployed {} of {} files",
        report.files_uploaded, report.files_total
    );
    println!(
        "published {} events ({} records + server list)",
        report.events_total(),
        report.record_outcomes.len()
    );
    let rejections: usize = report
        .record_outcomes
        .iter()
        .chain(std::iter::once(&report.server_list_outcome))
        .map(|o| o.relays.len() - o.accepted())
        .sum();
    if rejections > 0 {
        println!("note: {rejections} per-relay rejections; see the log for reasons");
    }
    println!("servers: {}", report.servers.join(", "));
    println!("completed: {completed}");
    println!("site published as {}", report.npub);
    println!(
        "any nsite gateway can serve it, e.g. https://{}.nsite.lol",
        report.npub
    );
}
