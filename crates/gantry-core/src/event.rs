//! Unsigned event drafts and the closed set of record kinds gantry emits.
//!
//! Everything gantry publishes is one of three record kinds:
//! - file location: one absolute site path mapped to the content hash
//!   currently served there (parameterized-replaceable, d-tag = path)
//! - server list: the storage servers holding this identity's blobs
//!   (replaceable)
//! - upload authorization: a short-lived credential for one storage-server
//!   request, carried in an HTTP header rather than published to relays
//!
//! Drafts are plain serde data in wire shape. The event id is the SHA-256 of
//! the canonical serialization `[0, pubkey, created_at, kind, tags, content]`
//! per NIP-01 and is recomputed on demand, which is what lets the
//! proof-of-work miner vary the nonce tag cheaply.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use nostr::{JsonUtil, PublicKey, UnsignedEvent};

use crate::error::{Error, Result};

/// The record kinds this tool emits, as a closed enumeration.
///
/// Wire kind numbers exist only inside [`RecordKind::as_u16`] and
/// [`RecordKind::from_u16`]; the rest of the codebase speaks in variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "u16", try_from = "u16")]
pub enum RecordKind {
    /// Maps one absolute site path to a content hash.
    FileLocation,
    /// Lists the storage servers holding the author's blobs.
    ServerList,
    /// Authorizes one storage-server request (never published to relays).
    UploadAuth,
}

impl RecordKind {
    /// The wire kind number.
    pub fn as_u16(self) -> u16 {
        match self {
            RecordKind::FileLocation => 34128,
            RecordKind::ServerList => 10063,
            RecordKind::UploadAuth => 24242,
        }
    }

    /// Reverse mapping; `None` for kinds outside the closed set.
    pub fn from_u16(kind: u16) -> Option<Self> {
        match kind {
            34128 => Some(RecordKind::FileLocation),
            10063 => Some(RecordKind::ServerList),
            24242 => Some(RecordKind::UploadAuth),
            _ => None,
        }
    }
}

impl From<RecordKind> for u16 {
    fn from(kind: RecordKind) -> u16 {
        kind.as_u16()
    }
}

impl TryFrom<u16> for RecordKind {
    type Error = String;

    fn try_from(kind: u16) -> std::result::Result<Self, String> {
        RecordKind::from_u16(kind).ok_or_else(|| format!("unknown record kind {kind}"))
    }
}

/// Storage-server verbs an authorization event can cover (its `t` tag).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthVerb {
    /// Store a blob.
    Upload,
    /// Remove a blob.
    Delete,
    /// Retrieve a blob from a server that gates reads.
    Get,
}

impl AuthVerb {
    /// The `t` tag value.
    pub fn as_str(self) -> &'static str {
        match self {
            AuthVerb::Upload => "upload",
            AuthVerb::Delete => "delete",
            AuthVerb::Get => "get",
        }
    }
}

impl std::fmt::Display for AuthVerb {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An unsigned event: everything but the id and signature, in wire shape.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventDraft {
    /// Author verification key, 64 hex characters.
    pub pubkey: String,
    /// Unix seconds.
    pub created_at: u64,
    /// Record kind; serialized as the wire integer.
    pub kind: RecordKind,
    /// Tag list exactly as it appears on the wire.
    pub tags: Vec<Vec<String>>,
    /// Free-form content.
    pub content: String,
}

impl EventDraft {
    /// Location record for one file: `d` tag is the normalized absolute
    /// site path, `x` tag is the content hash. Publishing a new record for
    /// the same path replaces the previous one on well-behaved relays.
    pub fn file_location(
        pubkey: &PublicKey,
        site_path: &str,
        sha256_hex: &str,
        created_at: u64,
    ) -> Self {
        Self {
            pubkey: pubkey.to_hex(),
            created_at,
            kind: RecordKind::FileLocation,
            tags: vec![
                vec!["d".to_string(), site_path.to_string()],
                vec!["x".to_string(), sha256_hex.to_string()],
            ],
            content: String::new(),
        }
    }

    /// Server list record: one `server` tag per storage server, in the
    /// order given.
    pub fn server_list(pubkey: &PublicKey, servers: &[String], created_at: u64) -> Self {
        Self {
            pubkey: pubkey.to_hex(),
            created_at,
            kind: RecordKind::ServerList,
            tags: servers
                .iter()
                .map(|s| vec!["server".to_string(), s.clone()])
                .collect(),
            content: String::new(),
        }
    }

    /// One-shot storage authorization covering `verb` on the blob
    /// `sha256_hex`, valid until `expires_at` (unix seconds, checked by the
    /// server at receipt time).
    pub fn upload_auth(
        pubkey: &PublicKey,
        verb: AuthVerb,
        sha256_hex: &str,
        expires_at: u64,
        description: &str,
        created_at: u64,
    ) -> Self {
        Self {
            pubkey: pubkey.to_hex(),
            created_at,
            kind: RecordKind::UploadAuth,
            tags: vec![
                vec!["t".to_string(), verb.as_str().to_string()],
                vec!["x".to_string(), sha256_hex.to_string()],
                vec!["expiration".to_string(), expires_at.to_string()],
            ],
            content: description.to_string(),
        }
    }

    /// SHA-256 of the canonical serialization
    /// `[0, pubkey, created_at, kind, tags, content]` (NIP-01).
    pub fn canonical_id(&self) -> Result<[u8; 32]> {
        let arr = serde_json::json!([
            0,
            self.pubkey,
            self.created_at,
            self.kind,
            self.tags,
            self.content
        ]);
        let data = serde_json::to_vec(&arr)?;
        Ok(Sha256::digest(&data).into())
    }

    /// The canonical id as 64 hex characters.
    pub fn canonical_id_hex(&self) -> Result<String> {
        Ok(hex::encode(self.canonical_id()?))
    }

    /// Set the proof-of-work nonce tag `["nonce", <nonce>, <target bits>]`,
    /// replacing any existing nonce tag. A draft carries at most one.
    pub fn set_nonce(&mut self, nonce: u64, target_bits: u8) {
        self.tags
            .retain(|tag| tag.first().map(String::as_str) != Some("nonce"));
        self.tags.push(vec![
            "nonce".to_string(),
            nonce.to_string(),
            target_bits.to_string(),
        ]);
    }

    /// First value of the named tag, if present.
    pub fn tag_value(&self, name: &str) -> Option<&str> {
        self.tags
            .iter()
            .find(|tag| tag.first().map(String::as_str) == Some(name))
            .and_then(|tag| tag.get(1))
            .map(String::as_str)
    }

    /// Bridge into the nostr signing type. The canonical id travels along,
    /// so a mined draft keeps the id its nonce was searched for.
    pub fn into_unsigned(self) -> Result<UnsignedEvent> {
        let id = self.canonical_id_hex()?;
        let mut value = serde_json::to_value(&self)?;
        if let Some(obj) = value.as_object_mut() {
            obj.insert("id".to_string(), serde_json::Value::String(id));
        }
        UnsignedEvent::from_json(value.to_string()).map_err(|e| Error::Nostr(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use nostr::Keys;

    fn test_pubkey() -> PublicKey {
        Keys::generate().public_key()
    }

    // =========================================================================
    // Kind mapping
    // =========================================================================

    #[test]
    fn test_kind_wire_numbers() {
        assert_eq!(RecordKind::FileLocation.as_u16(), 34128);
        assert_eq!(RecordKind::ServerList.as_u16(), 10063);
        assert_eq!(RecordKind::UploadAuth.as_u16(), 24242);
    }

    #[test]
    fn test_kind_round_trip() {
        for kind in [
            RecordKind::FileLocation,
            RecordKind::ServerList,
            RecordKind::UploadAuth,
        ] {
            assert_eq!(RecordKind::from_u16(kind.as_u16()), Some(kind));
        }
        assert_eq!(RecordKind::from_u16(1), None);
        assert_eq!(RecordKind::from_u16(30023), None);
    }

    #[test]
    fn test_kind_replaceability_ranges() {
        // Location records are parameterized-replaceable, the server list
        // is replaceable; relays key the former on (author, kind, d-tag)
        // and the latter on (author, kind).
        let loc = RecordKind::FileLocation.as_u16();
        assert!((30000..40000).contains(&loc));
        let list = RecordKind::ServerList.as_u16();
        assert!((10000..20000).contains(&list));
    }

    // =========================================================================
    // Draft serialization
    // =========================================================================

    #[test]
    fn test_draft_serializes_kind_as_integer() {
        let draft = EventDraft::file_location(&test_pubkey(), "/index.html", "ab12", 1700000000);
        let json = serde_json::to_value(&draft).unwrap();
        assert_eq!(json["kind"], serde_json::json!(34128));
        assert_eq!(json["content"], serde_json::json!(""));
    }

    #[test]
    fn test_draft_round_trips_through_json() {
        let draft = EventDraft::server_list(
            &test_pubkey(),
            &["https://blobs.example".to_string()],
            1700000000,
        );
        let json = serde_json::to_string(&draft).unwrap();
        let back: EventDraft = serde_json::from_str(&json).unwrap();
        assert_eq!(back, draft);
    }

    #[test]
    fn test_unknown_kind_rejected_on_deserialize() {
        let json = r#"{"pubkey":"ab","created_at":1,"kind":1,"tags":[],"content":""}"#;
        assert!(serde_json::from_str::<EventDraft>(json).is_err());
    }

    // =========================================================================
    // Builders
    // =========================================================================

    #[test]
    fn test_file_location_tags() {
        let draft = EventDraft::file_location(
            &test_pubkey(),
            "/css/style.css",
            "deadbeef",
            1700000000,
        );
        assert_eq!(draft.tag_value("d"), Some("/css/style.css"));
        assert_eq!(draft.tag_value("x"), Some("deadbeef"));
        assert!(draft.content.is_empty());
    }

    #[test]
    fn test_server_list_preserves_order() {
        let servers = vec![
            "https://a.example".to_string(),
            "https://b.example".to_string(),
        ];
        let draft = EventDraft::server_list(&test_pubkey(), &servers, 1700000000);
        let listed: Vec<&str> = draft
            .tags
            .iter()
            .filter(|t| t.first().map(String::as_str) == Some("server"))
            .filter_map(|t| t.get(1))
            .map(String::as_str)
            .collect();
        assert_eq!(listed, vec!["https://a.example", "https://b.example"]);
    }

    #[test]
    fn test_upload_auth_tags() {
        let draft = EventDraft::upload_auth(
            &test_pubkey(),
            AuthVerb::Upload,
            "cafe",
            1700000600,
            "Upload /index.html",
            1700000000,
        );
        assert_eq!(draft.kind, RecordKind::UploadAuth);
        assert_eq!(draft.tag_value("t"), Some("upload"));
        assert_eq!(draft.tag_value("x"), Some("cafe"));
        assert_eq!(draft.tag_value("expiration"), Some("1700000600"));
        assert_eq!(draft.content, "Upload /index.html");
    }

    #[test]
    fn test_auth_verbs() {
        assert_eq!(AuthVerb::Upload.as_str(), "upload");
        assert_eq!(AuthVerb::Delete.as_str(), "delete");
        assert_eq!(AuthVerb::Get.as_str(), "get");
        assert_eq!(AuthVerb::Delete.to_string(), "delete");
    }

    // =========================================================================
    // Canonical id
    // =========================================================================

    #[test]
    fn test_canonical_id_is_deterministic() {
        let pk = test_pubkey();
        let a = EventDraft::file_location(&pk, "/a.html", "00ff", 1700000000);
        let b = EventDraft::file_location(&pk, "/a.html", "00ff", 1700000000);
        assert_eq!(a.canonical_id_hex().unwrap(), b.canonical_id_hex().unwrap());
        assert_eq!(a.canonical_id_hex().unwrap().len(), 64);
    }

    #[test]
    fn test_canonical_id_changes_with_fields() {
        let pk = test_pubkey();
        let base = EventDraft::file_location(&pk, "/a.html", "00ff", 1700000000);
        let other_path = EventDraft::file_location(&pk, "/b.html", "00ff", 1700000000);
        let other_time = EventDraft::file_location(&pk, "/a.html", "00ff", 1700000001);
        assert_ne!(
            base.canonical_id().unwrap(),
            other_path.canonical_id().unwrap()
        );
        assert_ne!(
            base.canonical_id().unwrap(),
            other_time.canonical_id().unwrap()
        );
    }

    #[test]
    fn test_nonce_changes_canonical_id() {
        let mut draft = EventDraft::file_location(&test_pubkey(), "/a.html", "00ff", 1700000000);
        let before = draft.canonical_id().unwrap();
        draft.set_nonce(42, 8);
        assert_ne!(draft.canonical_id().unwrap(), before);
    }

    // =========================================================================
    // Nonce tag handling
    // =========================================================================

    #[test]
    fn test_set_nonce_replaces_existing() {
        let mut draft = EventDraft::file_location(&test_pubkey(), "/a.html", "00ff", 1700000000);
        draft.set_nonce(1, 16);
        draft.set_nonce(2, 16);
        let nonce_tags: Vec<_> = draft
            .tags
            .iter()
            .filter(|t| t.first().map(String::as_str) == Some("nonce"))
            .collect();
        assert_eq!(nonce_tags.len(), 1);
        assert_eq!(nonce_tags[0], &vec!["nonce".to_string(), "2".to_string(), "16".to_string()]);
        // The d and x tags are untouched.
        assert_eq!(draft.tag_value("d"), Some("/a.html"));
        assert_eq!(draft.tag_value("x"), Some("00ff"));
    }

    // =========================================================================
    // Signing bridge
    // =========================================================================

    #[test]
    fn test_into_unsigned_preserves_fields_and_id() {
        let pk = test_pubkey();
        let draft = EventDraft::file_location(&pk, "/index.html", "00ff", 1700000000);
        let expected_id = draft.canonical_id_hex().unwrap();
        let unsigned = draft.clone().into_unsigned().unwrap();
        assert_eq!(unsigned.pubkey.to_hex(), draft.pubkey);
        assert_eq!(unsigned.created_at.as_u64(), 1700000000);
        assert_eq!(unsigned.kind.as_u16(), 34128);
        assert_eq!(unsigned.content, "");
        assert_eq!(unsigned.id.map(|i| i.to_hex()), Some(expected_id));
    }

    #[test]
    fn test_signed_event_verifies() {
        // Signing goes through the nostr crate, which recomputes and checks
        // the NIP-01 hash; agreement here proves the canonical id matches
        // the reference implementation.
        let keys = Keys::generate();
        let mut draft = EventDraft::file_location(
            &keys.public_key(),
            "/index.html",
            "00ff",
            1700000000,
        );
        draft.set_nonce(7, 4);
        let event = draft
            .into_unsigned()
            .unwrap()
            .sign_with_keys(&keys)
            .unwrap();
        assert!(event.verify_id());
        assert!(event.verify_signature());
    }
}
