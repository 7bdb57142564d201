//! Signed-event publishing with per-relay outcomes.
//!
//! Broadcasting is an explicit fan-out: one send per relay, each with its
//! own timeout, producing one [`RelayOutcome`] per relay. An event counts
//! as published once a single relay accepts it; only total rejection is an
//! error. The same connection pool reads records back for listing and
//! download.

use std::collections::BTreeMap;
use std::time::Duration;

use futures::future::join_all;
use gantry_core::pow::mine_with_timeout;
use gantry_core::{EventDraft, Identity, RecordKind};
use metrics::counter;
use nostr_sdk::prelude::*;
use tracing::{debug, info, warn};

use crate::config::{DeployConfig, PowPolicy};
use crate::error::{Error, Result};

/// Outcome of offering one event to one relay.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RelayOutcome {
    /// Whether the relay acknowledged the event.
    pub accepted: bool,
    /// Relay-supplied or transport reason, present only when not
    /// accepted.
    pub reason: Option<String>,
}

impl RelayOutcome {
    /// The relay acknowledged the event.
    pub fn ok() -> Self {
        Self {
            accepted: true,
            reason: None,
        }
    }

    /// The relay rejected the event, timed out or was unreachable.
    pub fn rejected(reason: impl Into<String>) -> Self {
        Self {
            accepted: false,
            reason: Some(reason.into()),
        }
    }
}

/// Result of broadcasting one event to the relay set.
#[derive(Debug, Clone)]
pub struct PublishOutcome {
    /// Hex id of the signed event.
    pub event_id: String,
    /// What kind of record the event carried.
    pub kind: RecordKind,
    /// One entry per relay, keyed by URL.
    pub relays: BTreeMap<String, RelayOutcome>,
}

impl PublishOutcome {
    /// Number of relays that accepted the event.
    pub fn accepted(&self) -> usize {
        self.relays.values().filter(|o| o.accepted).count()
    }

    /// An event is published once at least one relay accepted it.
    pub fn is_published(&self) -> bool {
        self.accepted() > 0
    }
}

/// A published path-to-hash record, as read back from relays.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SiteRecord {
    /// Absolute site path (the record's `d` tag).
    pub path: String,
    /// Content hash (the record's `x` tag).
    pub sha256: String,
    /// When the record was created, unix seconds.
    pub created_at: u64,
}

/// Broadcasts signed events to a fixed relay set and reads records back.
pub struct EventPublisher {
    client: Client,
    identity: Identity,
    relays: Vec<String>,
    pow: PowPolicy,
    publish_timeout: Duration,
    fetch_timeout: Duration,
}

impl EventPublisher {
    /// Build a publisher from the deployment configuration.
    ///
    /// Watch-only identities can build one and fetch records; publishing
    /// fails at the signing step.
    pub fn new(config: &DeployConfig) -> Self {
        let client = Client::builder().opts(ClientOptions::new()).build();
        Self {
            client,
            identity: config.identity.clone(),
            relays: config.relays.clone(),
            pow: config.pow.clone(),
            publish_timeout: config.publish_timeout,
            fetch_timeout: config.fetch_timeout,
        }
    }

    /// Add every relay to the pool and open connections.
    ///
    /// Failures here are logged, not raised; an unreachable relay shows up
    /// later as a per-relay publish outcome.
    pub async fn connect(&self) {
        for relay_url in &self.relays {
            if let Err(e) = self.client.add_relay(relay_url).await {
                warn!(relay = %relay_url, error = %e, "failed to add relay");
            }
        }
        self.client.connect().await;
    }

    /// Close every relay connection.
    pub async fn disconnect(&self) {
        self.client.disconnect().await;
    }

    /// Mine (per policy), sign and broadcast one draft to every relay.
    ///
    /// `Err` means no relay accepted the event, or mining timed out under
    /// a `require` policy; partial acceptance is a success with the
    /// rejections recorded in the outcome.
    pub async fn publish(&self, draft: EventDraft) -> Result<PublishOutcome> {
        let draft = self.apply_pow(draft).await?;
        let kind = draft.kind;
        let keys = self.identity.keys()?;
        let event = draft
            .into_unsigned()?
            .sign_with_keys(keys)
            .map_err(|e| Error::Signing(e.to_string()))?;
        let event_id = event.id.to_hex();

        let attempts = self.relays.iter().map(|relay_url| {
            let event = &event;
            let event_id = event_id.as_str();
            async move {
                let outcome = self.send_to_relay(relay_url, event, event_id).await;
                (relay_url.clone(), outcome)
            }
        });
        let relays: BTreeMap<String, RelayOutcome> =
            join_all(attempts).await.into_iter().collect();
        let outcome = PublishOutcome {
            event_id,
            kind,
            relays,
        };

        for (relay, relay_outcome) in &outcome.relays {
            if !relay_outcome.accepted {
                warn!(
                    relay = %relay,
                    event_id = %outcome.event_id,
                    reason = relay_outcome.reason.as_deref().unwrap_or("unknown"),
                    "relay did not accept event"
                );
            }
        }

        if outcome.is_published() {
            counter!("publish_events_total", "result" => "ok").increment(1);
            info!(
                event_id = %outcome.event_id,
                kind = kind.as_u16(),
                accepted = outcome.accepted(),
                relays = self.relays.len(),
                "event published"
            );
            Ok(outcome)
        } else {
            counter!("publish_events_total", "result" => "rejected").increment(1);
            Err(Error::PublishRejected {
                event_id: outcome.event_id,
            })
        }
    }

    /// Read back the newest location record per path for `author`.
    ///
    /// Relays handle replaceable kinds unevenly, so stale versions are
    /// filtered here: for each path, only the newest record survives.
    pub async fn fetch_site_records(&self, author: &PublicKey) -> Result<Vec<SiteRecord>> {
        let filter = Filter::new()
            .author(*author)
            .kind(Kind::from(RecordKind::FileLocation.as_u16()));
        let events = self.client.fetch_events(filter, self.fetch_timeout).await?;
        let records = newest_per_path(
            events
                .into_iter()
                .filter_map(|event| site_record_from_event(&event)),
        );
        debug!(
            author = %author.to_hex(),
            records = records.len(),
            "fetched site records"
        );
        Ok(records)
    }

    /// Read back the newest published server list for `author`. Empty when
    /// none is published.
    pub async fn fetch_server_list(&self, author: &PublicKey) -> Result<Vec<String>> {
        let filter = Filter::new()
            .author(*author)
            .kind(Kind::from(RecordKind::ServerList.as_u16()));
        let events = self.client.fetch_events(filter, self.fetch_timeout).await?;

        let newest = events.into_iter().max_by_key(|event| event.created_at);
        let servers = newest.as_ref().map(servers_from_event).unwrap_or_default();
        Ok(servers)
    }

    async fn send_to_relay(&self, relay_url: &str, event: &Event, event_id: &str) -> RelayOutcome {
        let send = self.client.send_event_to([relay_url], event);
        let outcome = match tokio::time::timeout(self.publish_timeout, send).await {
            Err(_) => RelayOutcome::rejected(format!(
                "no response within {}s",
                self.publish_timeout.as_secs()
            )),
            Ok(Err(e)) => RelayOutcome::rejected(e.to_string()),
            Ok(Ok(output)) => {
                if output.failed.is_empty() {
                    RelayOutcome::ok()
                } else {
                    let reason = output
                        .failed
                        .into_values()
                        .next()
                        .unwrap_or_else(|| "rejected".to_string());
                    RelayOutcome::rejected(reason)
                }
            }
        };
        if outcome.accepted {
            counter!("publish_relay_results_total", "result" => "accepted").increment(1);
            debug!(relay = relay_url, event_id, "event accepted");
        } else {
            counter!("publish_relay_results_total", "result" => "rejected").increment(1);
        }
        outcome
    }

    /// Apply the proof-of-work policy to a draft.
    ///
    /// Without a target difficulty the draft passes through untouched. A
    /// mining timeout downgrades to the unmined draft unless the policy
    /// requires the target, in which case it propagates as an error.
    async fn apply_pow(&self, draft: EventDraft) -> Result<EventDraft> {
        let Some(difficulty) = self.pow.difficulty else {
            return Ok(draft);
        };
        match mine_with_timeout(draft.clone(), difficulty, self.pow.timeout).await {
            Ok(mined) => Ok(mined),
            Err(gantry_core::Error::PowTimeout { .. }) if !self.pow.require => {
                warn!(difficulty, "mining timed out, publishing unmined event");
                Ok(draft)
            }
            Err(e) => Err(Error::Core(e)),
        }
    }
}

/// First value of the named tag on a signed event.
fn first_tag_value<'a>(event: &'a Event, name: &str) -> Option<&'a str> {
    event.tags.iter().find_map(|tag| {
        let tag = tag.as_slice();
        match (tag.first().map(String::as_str), tag.get(1)) {
            (Some(n), Some(value)) if n == name => Some(value.as_str()),
            _ => None,
        }
    })
}

/// Read a location record off a signed event. Events missing the path
/// (`d`) or hash (`x`) tag are skipped.
fn site_record_from_event(event: &Event) -> Option<SiteRecord> {
    let path = first_tag_value(event, "d")?.to_string();
    let sha256 = first_tag_value(event, "x")?.to_string();
    Some(SiteRecord {
        path,
        sha256,
        created_at: event.created_at.as_u64(),
    })
}

/// Every server URL tagged on a server-list event, in tag order.
fn servers_from_event(event: &Event) -> Vec<String> {
    event
        .tags
        .iter()
        .filter_map(|tag| {
            let tag = tag.as_slice();
            match (tag.first().map(String::as_str), tag.get(1)) {
                (Some("server"), Some(url)) => Some(url.clone()),
                _ => None,
            }
        })
        .collect()
}

/// Keep only the newest record per path. On equal timestamps the first
/// seen wins.
fn newest_per_path(records: impl IntoIterator<Item = SiteRecord>) -> Vec<SiteRecord> {
    let mut newest: BTreeMap<String, SiteRecord> = BTreeMap::new();
    for record in records {
        match newest.get(&record.path) {
            Some(existing) if existing.created_at >= record.created_at => {}
            _ => {
                newest.insert(record.path.clone(), record);
            }
        }
    }
    newest.into_values().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config(keys: &Keys) -> DeployConfig {
        DeployConfig {
            identity: Identity::from_secret_key(keys.secret_key().clone()),
            relays: vec!["wss://relay.example".to_string()],
            servers: Vec::new(),
            pow: PowPolicy::default(),
            http_timeout: Duration::from_secs(5),
            publish_timeout: Duration::from_secs(5),
            fetch_timeout: Duration::from_secs(5),
            concurrency: 2,
        }
    }

    fn record(path: &str, sha256: &str, created_at: u64) -> SiteRecord {
        SiteRecord {
            path: path.to_string(),
            sha256: sha256.to_string(),
            created_at,
        }
    }

    fn signed(draft: EventDraft, keys: &Keys) -> Event {
        draft
            .into_unsigned()
            .unwrap()
            .sign_with_keys(keys)
            .unwrap()
    }

    // =========================================================================
    // Outcome types
    // =========================================================================

    #[test]
    fn relay_outcome_constructors() {
        let ok = RelayOutcome::ok();
        assert!(ok.accepted);
        assert_eq!(ok.reason, None);

        let rejected = RelayOutcome::rejected("rate limited");
        assert!(!rejected.accepted);
        assert_eq!(rejected.reason.as_deref(), Some("rate limited"));
    }

    #[test]
    fn publish_outcome_counts_acceptances() {
        let mut relays = BTreeMap::new();
        relays.insert("wss://a.example".to_string(), RelayOutcome::ok());
        relays.insert(
            "wss://b.example".to_string(),
            RelayOutcome::rejected("closed"),
        );
        let outcome = PublishOutcome {
            event_id: "ab".repeat(32),
            kind: RecordKind::FileLocation,
            relays,
        };
        assert_eq!(outcome.accepted(), 1);
        assert!(outcome.is_published());
    }

    #[test]
    fn publish_outcome_with_no_acceptance_is_unpublished() {
        let outcome = PublishOutcome {
            event_id: "ab".repeat(32),
            kind: RecordKind::FileLocation,
            relays: BTreeMap::new(),
        };
        assert_eq!(outcome.accepted(), 0);
        assert!(!outcome.is_published());
    }

    // =========================================================================
    // Record folding
    // =========================================================================

    #[test]
    fn newest_record_wins_per_path() {
        let records = newest_per_path(vec![
            record("/index.html", "aa", 100),
            record("/index.html", "bb", 200),
            record("/style.css", "cc", 50),
            record("/index.html", "dd", 150),
        ]);
        assert_eq!(
            records,
            vec![record("/index.html", "bb", 200), record("/style.css", "cc", 50)]
        );
    }

    #[test]
    fn equal_timestamps_keep_first_seen() {
        let records = newest_per_path(vec![
            record("/a", "first", 100),
            record("/a", "second", 100),
        ]);
        assert_eq!(records, vec![record("/a", "first", 100)]);
    }

    // =========================================================================
    // Reading events back
    // =========================================================================

    #[test]
    fn location_record_read_back_from_signed_event() {
        let keys = Keys::generate();
        let hash = "7d".repeat(32);
        let event = signed(
            EventDraft::file_location(&keys.public_key(), "/blog/post.html", &hash, 1_700_000_000),
            &keys,
        );

        let record = site_record_from_event(&event).unwrap();
        assert_eq!(record.path, "/blog/post.html");
        assert_eq!(record.sha256, hash);
        assert_eq!(record.created_at, 1_700_000_000);
    }

    #[test]
    fn event_without_location_tags_yields_no_record() {
        let keys = Keys::generate();
        let servers = vec!["https://cdn.example".to_string()];
        let event = signed(
            EventDraft::server_list(&keys.public_key(), &servers, 1_700_000_000),
            &keys,
        );
        assert_eq!(site_record_from_event(&event), None);
    }

    #[test]
    fn server_urls_read_back_in_list_order() {
        let keys = Keys::generate();
        let servers = vec![
            "https://cdn.example".to_string(),
            "https://backup.example".to_string(),
        ];
        let event = signed(
            EventDraft::server_list(&keys.public_key(), &servers, 1_700_000_000),
            &keys,
        );
        assert_eq!(servers_from_event(&event), servers);

        // A location event carries no server tags.
        let hash = "11".repeat(32);
        let location = signed(
            EventDraft::file_location(&keys.public_key(), "/index.html", &hash, 1_700_000_000),
            &keys,
        );
        assert!(servers_from_event(&location).is_empty());
    }

    // =========================================================================
    // Proof-of-work policy
    // =========================================================================

    #[tokio::test]
    async fn pow_passthrough_without_difficulty() {
        let keys = Keys::generate();
        let publisher = EventPublisher::new(&test_config(&keys));
        let draft =
            EventDraft::file_location(&keys.public_key(), "/index.html", "00ff", 1_700_000_000);

        let out = publisher.apply_pow(draft.clone()).await.unwrap();
        assert_eq!(out, draft);
    }

    #[tokio::test]
    async fn pow_stamps_nonce_when_configured() {
        let keys = Keys::generate();
        let mut config = test_config(&keys);
        config.pow.difficulty = Some(4);
        config.pow.timeout = Duration::from_secs(30);
        let publisher = EventPublisher::new(&config);
        let draft =
            EventDraft::file_location(&keys.public_key(), "/index.html", "00ff", 1_700_000_000);

        let mined = publisher.apply_pow(draft).await.unwrap();
        assert!(mined.tag_value("nonce").is_some());
    }

    #[tokio::test]
    async fn pow_timeout_downgrades_by_default() {
        let keys = Keys::generate();
        let mut config = test_config(&keys);
        config.pow.difficulty = Some(30);
        config.pow.timeout = Duration::from_millis(20);
        let publisher = EventPublisher::new(&config);
        let draft =
            EventDraft::file_location(&keys.public_key(), "/index.html", "00ff", 1_700_000_000);

        let out = publisher.apply_pow(draft.clone()).await.unwrap();
        // The unmined draft goes out as-is.
        assert_eq!(out, draft);
        assert!(out.tag_value("nonce").is_none());
    }

    #[tokio::test]
    async fn pow_timeout_fails_when_required() {
        let keys = Keys::generate();
        let mut config = test_config(&keys);
        config.pow.difficulty = Some(30);
        config.pow.timeout = Duration::from_millis(20);
        config.pow.require = true;
        let publisher = EventPublisher::new(&config);
        let draft =
            EventDraft::file_location(&keys.public_key(), "/index.html", "00ff", 1_700_000_000);

        let err = publisher.apply_pow(draft).await.unwrap_err();
        assert!(matches!(
            err,
            Error::Core(gantry_core::Error::PowTimeout { .. })
        ));
    }
}
