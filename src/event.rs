//! Signed social-network messages (Nostr events).
//!
//! An event's `id` is the SHA-256 of its canonical encoding, the compact JSON
//! array `[0, pubkey, created_at, kind, tags, content]`, and `sig` is a
//! BIP-340 Schnorr signature of that id by `pubkey`.

use std::str::FromStr;

use secp256k1::{schnorr, Message, Secp256k1, XOnlyPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{ParseError, SigningError};
use crate::keys::Keys;

/// Key of the topic tag.
pub const TOPIC_TAG: &str = "t";

/// Key of the tag referencing another event or author in a reply.
pub const REPLY_TAG: &str = "e";

/// Marker placed in the fourth slot of a reply tag.
pub const REPLY_MARKER: &str = "reply";

/// A signed event as it travels over the wire.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    /// Lowercase hex SHA-256 of the canonical encoding.
    pub id: String,
    /// Author's x-only public key, lowercase hex.
    pub pubkey: String,
    /// Unix timestamp in seconds.
    pub created_at: i64,
    /// Event kind.
    pub kind: u32,
    /// Ordered label lists; the first element of each is the label key.
    pub tags: Vec<Vec<String>>,
    /// Free-form text.
    pub content: String,
    /// Schnorr signature of `id`, lowercase hex.
    pub sig: String,
}

/// An event that has not been signed yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedEvent {
    /// Author's x-only public key, lowercase hex.
    pub pubkey: String,
    /// Unix timestamp in seconds.
    pub created_at: i64,
    /// Event kind.
    pub kind: u32,
    /// Ordered label lists.
    pub tags: Vec<Vec<String>>,
    /// Free-form text.
    pub content: String,
}

/// Canonical encoding over which the id is computed.
///
/// # Errors
///
/// Fails only if serialization fails, which cannot happen for these types.
pub fn canonical_encoding(
    pubkey: &str,
    created_at: i64,
    kind: u32,
    tags: &[Vec<String>],
    content: &str,
) -> serde_json::Result<String> {
    serde_json::to_string(&(0, pubkey, created_at, kind, tags, content))
}

fn digest(encoding: &str) -> [u8; 32] {
    Sha256::digest(encoding.as_bytes()).into()
}

impl Event {
    /// Parse an event from its JSON form. The signature is not checked.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::Json`] if the body is not a well-formed event.
    pub fn from_json(body: &[u8]) -> Result<Self, ParseError> {
        Ok(serde_json::from_slice(body)?)
    }

    /// Recompute the id from the event's contents.
    ///
    /// # Errors
    ///
    /// Returns [`ParseError::Json`] if the contents cannot be serialized.
    pub fn compute_id(&self) -> Result<[u8; 32], ParseError> {
        let encoding = canonical_encoding(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )?;
        Ok(digest(&encoding))
    }

    /// Check that the id matches the contents and the signature matches the
    /// author.
    ///
    /// # Errors
    ///
    /// Returns the [`ParseError`] describing the first check that failed.
    pub fn verify(&self) -> Result<(), ParseError> {
        let id = self.compute_id()?;
        if !hex::encode(id).eq_ignore_ascii_case(&self.id) {
            return Err(ParseError::IdMismatch);
        }
        let author = XOnlyPublicKey::from_str(&self.pubkey)
            .map_err(|e| ParseError::PublicKey(e.to_string()))?;
        let sig = schnorr::Signature::from_str(&self.sig)
            .map_err(|e| ParseError::SignatureEncoding(e.to_string()))?;
        Secp256k1::verification_only()
            .verify_schnorr(&sig, &Message::from_digest(id), &author)
            .map_err(|_| ParseError::BadSignature)
    }

    /// Whether any tag is exactly `[key, value, ...]`.
    #[must_use]
    pub fn has_tag(&self, key: &str, value: &str) -> bool {
        self.tags
            .iter()
            .any(|tag| tag.len() >= 2 && tag[0] == key && tag[1] == value)
    }
}

impl UnsignedEvent {
    /// Start a reply authored by `keys`, stamped with `created_at`.
    ///
    /// The reply carries the kind of the message it answers and a single
    /// `["e", <original author>, "", "reply"]` tag.
    #[must_use]
    pub fn reply_to(original: &Event, keys: &Keys, content: String, created_at: i64) -> Self {
        Self {
            pubkey: keys.public_key_hex(),
            created_at,
            kind: original.kind,
            tags: vec![vec![
                REPLY_TAG.to_string(),
                original.pubkey.clone(),
                String::new(),
                REPLY_MARKER.to_string(),
            ]],
            content,
        }
    }

    /// Compute the id, sign it and check the result verifies.
    ///
    /// # Errors
    ///
    /// Returns [`SigningError::Serialize`] if the canonical encoding fails, or
    /// [`SigningError::SelfCheck`] if `keys` does not match `pubkey`.
    pub fn sign(self, keys: &Keys) -> Result<Event, SigningError> {
        let encoding = canonical_encoding(
            &self.pubkey,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        )?;
        let id = digest(&encoding);
        let sig = keys.sign(id);

        let event = Event {
            id: hex::encode(id),
            pubkey: self.pubkey,
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags,
            content: self.content,
            sig: sig.to_string(),
        };
        event.verify().map_err(SigningError::SelfCheck)?;
        Ok(event)
    }
}
