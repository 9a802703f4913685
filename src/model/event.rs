//! Event: the immutable, signed record the whole pipeline revolves around.
//!
//! Field widths and the `id`/`sig` hex encodings follow spec §3. The hash
//! and signature scheme (SHA-256 id over a canonical JSON array, BIP-340
//! Schnorr over secp256k1) are fixed by this crate — see SPEC_FULL.md §3.

use secp256k1::schnorr::Signature as SchnorrSignature;
use secp256k1::{Message, XOnlyPublicKey, SECP256K1};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub type EventId = [u8; 32];
pub type PubKey = [u8; 32];

/// A single `[name, value, ...]` tag. `tags[0]` is the name, `tags[1]` the
/// primary value used for indexing and `#X` filters; later elements are
/// marker data the core does not interpret.
pub type Tag = Vec<String>;

/// The wire representation of an event, as received in an `EVENT` frame or
/// returned by an `EventStore` query. Field order does not matter on the
/// wire; `EventRecord` carries them in the §3 order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub pubkey: String,
    pub created_at: i64,
    pub kind: u32,
    pub tags: Vec<Tag>,
    pub content: String,
    pub sig: String,
}

/// A structurally-valid, hash- and signature-verified event, ready for the
/// broadcast engine and the storage batcher. Cheap to clone (`Arc`-wrapped
/// by callers); the fields mirror `EventRecord` but in decoded form.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub id: EventId,
    pub id_hex: String,
    pub pubkey: PubKey,
    pub pubkey_hex: String,
    pub created_at: i64,
    pub kind: u32,
    pub tags: Vec<Tag>,
    pub content: String,
    pub sig_hex: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventClass {
    Regular,
    Replaceable,
    Ephemeral,
    Addressable,
}

impl Event {
    /// §3 event-class derivation from `kind`.
    pub fn class(&self) -> EventClass {
        classify_kind(self.kind)
    }

    /// The `d` tag's primary value, defaulting to `""` (§3 addressable key).
    pub fn d_tag(&self) -> &str {
        self.tags
            .iter()
            .find(|t| t.first().map(String::as_str) == Some("d"))
            .and_then(|t| t.get(1))
            .map(String::as_str)
            .unwrap_or("")
    }

    /// The replaceable/addressable storage key, if this event participates
    /// in replace semantics at all.
    pub fn replace_key(&self) -> Option<ReplaceKey> {
        match self.class() {
            EventClass::Replaceable => Some(ReplaceKey {
                pubkey: self.pubkey,
                kind: self.kind,
                d: None,
            }),
            EventClass::Addressable => Some(ReplaceKey {
                pubkey: self.pubkey,
                kind: self.kind,
                d: Some(self.d_tag().to_owned()),
            }),
            EventClass::Regular | EventClass::Ephemeral => None,
        }
    }

    /// §3 tie-break: higher `created_at` wins; on equality, lexicographically
    /// lower `id` wins. Returns `true` if `self` should replace `other`.
    pub fn wins_tiebreak(&self, other: &Event) -> bool {
        match self.created_at.cmp(&other.created_at) {
            std::cmp::Ordering::Greater => true,
            std::cmp::Ordering::Less => false,
            std::cmp::Ordering::Equal => self.id < other.id,
        }
    }

    pub fn to_record(&self) -> EventRecord {
        EventRecord {
            id: self.id_hex.clone(),
            pubkey: self.pubkey_hex.clone(),
            created_at: self.created_at,
            kind: self.kind,
            tags: self.tags.clone(),
            content: self.content.clone(),
            sig: self.sig_hex.clone(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ReplaceKey {
    pub pubkey: PubKey,
    pub kind: u32,
    /// `None` for replaceable events, `Some(d-value)` for addressable ones.
    pub d: Option<String>,
}

/// §3 event-class ranges.
pub fn classify_kind(kind: u32) -> EventClass {
    if kind == 0 || kind == 3 || (10000..20000).contains(&kind) {
        EventClass::Replaceable
    } else if (20000..30000).contains(&kind) {
        EventClass::Ephemeral
    } else if (30000..40000).contains(&kind) {
        EventClass::Addressable
    } else {
        EventClass::Regular
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum EventDecodeError {
    #[error("id must be 64 hex characters")]
    BadIdLength,
    #[error("pubkey must be 64 hex characters")]
    BadPubkeyLength,
    #[error("sig must be 128 hex characters")]
    BadSigLength,
    #[error("id/pubkey/sig must be lowercase hex")]
    BadHex,
    #[error("tag entries must be non-empty arrays of strings")]
    MalformedTags,
}

/// Structural decode (spec §4.2 step 2): field presence/types/lengths.
/// Does NOT verify the id hash or the signature — see [`Event::verify`].
impl TryFrom<EventRecord> for Event {
    type Error = EventDecodeError;

    fn try_from(r: EventRecord) -> Result<Self, Self::Error> {
        if r.id.len() != 64 {
            return Err(EventDecodeError::BadIdLength);
        }
        if r.pubkey.len() != 64 {
            return Err(EventDecodeError::BadPubkeyLength);
        }
        if r.sig.len() != 128 {
            return Err(EventDecodeError::BadSigLength);
        }
        let id = decode_32(&r.id).ok_or(EventDecodeError::BadHex)?;
        let pubkey = decode_32(&r.pubkey).ok_or(EventDecodeError::BadHex)?;
        for tag in &r.tags {
            if tag.is_empty() {
                return Err(EventDecodeError::MalformedTags);
            }
        }
        Ok(Event {
            id,
            id_hex: r.id.to_lowercase(),
            pubkey,
            pubkey_hex: r.pubkey.to_lowercase(),
            created_at: r.created_at,
            kind: r.kind,
            tags: r.tags,
            content: r.content,
            sig_hex: r.sig.to_lowercase(),
        })
    }
}

fn decode_32(hex_str: &str) -> Option<[u8; 32]> {
    let bytes = hex::decode(hex_str).ok()?;
    bytes.try_into().ok()
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum VerifyError {
    #[error("id does not match the canonical hash of the event fields")]
    IdMismatch,
    #[error("signature does not verify against pubkey for this id")]
    BadSignature,
    #[error("malformed signature or public key encoding")]
    BadEncoding,
}

impl Event {
    /// Canonical serialization the id hash is taken over:
    /// `[0, pubkey, created_at, kind, tags, content]`, compact JSON.
    pub fn canonical_bytes(
        pubkey_hex: &str,
        created_at: i64,
        kind: u32,
        tags: &[Tag],
        content: &str,
    ) -> Vec<u8> {
        let arr = serde_json::json!([0, pubkey_hex, created_at, kind, tags, content]);
        serde_json::to_vec(&arr).expect("json array serialization cannot fail")
    }

    pub fn recompute_id(&self) -> EventId {
        let bytes = Self::canonical_bytes(
            &self.pubkey_hex,
            self.created_at,
            self.kind,
            &self.tags,
            &self.content,
        );
        Sha256::digest(&bytes).into()
    }

    /// §4.2 steps 2 (id) and 5 (signature). Checks the id hash first since
    /// it is far cheaper than a Schnorr verification.
    pub fn verify(&self) -> Result<(), VerifyError> {
        if self.recompute_id() != self.id {
            return Err(VerifyError::IdMismatch);
        }
        let msg = Message::from_digest(self.id);
        let pk = XOnlyPublicKey::from_slice(&self.pubkey).map_err(|_| VerifyError::BadEncoding)?;
        let sig = SchnorrSignature::from_slice(&hex::decode(&self.sig_hex).map_err(|_| VerifyError::BadEncoding)?)
            .map_err(|_| VerifyError::BadEncoding)?;
        SECP256K1
            .verify_schnorr(&sig, &msg, &pk)
            .map_err(|_| VerifyError::BadSignature)
    }
}
