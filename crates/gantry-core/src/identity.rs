//! Identity keys and their human-readable encodings.
//!
//! A deployment identity is a secp256k1 keypair. On the wire every key is 32
//! bytes of hex; at the edges (CLI flags, environment variables, gateway
//! subdomains) keys travel bech32-encoded with a discriminant prefix: `npub`
//! for verification keys, `nsec` for secret keys. The npub string doubles as
//! the site's subdomain label on resolving gateways.

use nostr::nips::nip19::{FromBech32, Nip19};
use nostr::{Keys, PublicKey, SecretKey, ToBech32};

use crate::error::{Error, Result};

/// A decoded identity string, tagged by what its prefix declared.
#[derive(Debug, Clone)]
pub enum DecodedIdentity {
    /// An `npub1...` verification key.
    Public(PublicKey),
    /// An `nsec1...` secret key.
    Secret(SecretKey),
}

/// Decode an `npub`/`nsec` bech32 string.
///
/// Checksum failures and non-key prefixes (`note`, `nevent`, `naddr`, ...)
/// are both rejected; this function never guesses at the caller's intent.
pub fn decode_identity(input: &str) -> Result<DecodedIdentity> {
    let trimmed = input.trim();
    match Nip19::from_bech32(trimmed) {
        Ok(Nip19::Pubkey(pk)) => Ok(DecodedIdentity::Public(pk)),
        Ok(Nip19::Secret(sk)) => Ok(DecodedIdentity::Secret(sk)),
        Ok(_) => {
            let prefix = trimmed.split('1').next().unwrap_or_default();
            Err(Error::MalformedIdentity(format!(
                "'{prefix}' does not encode a key"
            )))
        }
        Err(e) => Err(Error::MalformedIdentity(e.to_string())),
    }
}

/// Encode a verification key as `npub1...`.
pub fn encode_public(pk: &PublicKey) -> Result<String> {
    pk.to_bech32().map_err(|e| Error::Nostr(e.to_string()))
}

/// Encode a secret key as `nsec1...`.
pub fn encode_secret(sk: &SecretKey) -> Result<String> {
    sk.to_bech32().map_err(|e| Error::Nostr(e.to_string()))
}

/// Derive the verification key from 32 bytes of secret key material.
///
/// Rejects wrong lengths and scalars outside the curve order (including
/// zero) with [`Error::InvalidKey`].
pub fn derive_public_key(secret: &[u8]) -> Result<PublicKey> {
    let sk = SecretKey::from_slice(secret).map_err(|e| Error::InvalidKey(e.to_string()))?;
    Ok(Keys::new(sk).public_key())
}

/// A configured deployment identity.
///
/// Either full (holds the secret key, can author events) or watch-only
/// (verification key only). A watch-only identity is valid configuration:
/// it can list and download a published site, but any operation that signs
/// surfaces [`Error::ReadOnlyIdentity`].
#[derive(Debug, Clone)]
pub struct Identity {
    keys: Option<Keys>,
    public_key: PublicKey,
}

impl Identity {
    /// Full identity from a secret key.
    pub fn from_secret_key(secret: SecretKey) -> Self {
        let keys = Keys::new(secret);
        let public_key = keys.public_key();
        Self {
            keys: Some(keys),
            public_key,
        }
    }

    /// Watch-only identity from a verification key.
    pub fn watch_only(public_key: PublicKey) -> Self {
        Self {
            keys: None,
            public_key,
        }
    }

    /// Parse an identity from `nsec1...`, `npub1...`, or 64 hex characters
    /// (hex is treated as a secret key).
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = input.trim();
        if trimmed.len() == 64 && trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
            let sk =
                SecretKey::from_hex(trimmed).map_err(|e| Error::InvalidKey(e.to_string()))?;
            return Ok(Self::from_secret_key(sk));
        }
        match decode_identity(trimmed)? {
            DecodedIdentity::Secret(sk) => Ok(Self::from_secret_key(sk)),
            DecodedIdentity::Public(pk) => Ok(Self::watch_only(pk)),
        }
    }

    /// The verification key.
    pub fn public_key(&self) -> PublicKey {
        self.public_key
    }

    /// The verification key as 64 hex characters (the event `pubkey` field).
    pub fn public_key_hex(&self) -> String {
        self.public_key.to_hex()
    }

    /// The npub encoding; also the subdomain label under which gateways
    /// serve the site.
    pub fn npub(&self) -> Result<String> {
        encode_public(&self.public_key)
    }

    /// Whether this identity can author events.
    pub fn can_sign(&self) -> bool {
        self.keys.is_some()
    }

    /// The signing keys, or [`Error::ReadOnlyIdentity`] for watch-only.
    pub fn keys(&self) -> Result<&Keys> {
        self.keys.as_ref().ok_or(Error::ReadOnlyIdentity)
    }
}
