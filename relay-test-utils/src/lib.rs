//! Shared test helpers: well-signed events and in-memory stores, mirroring
//! the shape of a dedicated test-support crate kept alongside the library
//! it exercises.

use relay::model::event::{Event, EventRecord};
use secp256k1::{rand, Keypair, Secp256k1};
use sha2::{Digest, Sha256};

pub use relay::store::memory::{MemoryEventStore, MemoryPolicyStore};

/// A keypair usable across several `sign_event_as` calls when a test needs
/// more than one event from the same author.
pub struct TestKeypair {
    keypair: Keypair,
    pub pubkey_hex: String,
}

impl TestKeypair {
    pub fn generate() -> Self {
        let secp = Secp256k1::new();
        let keypair = Keypair::new(&secp, &mut rand::thread_rng());
        let (xonly, _parity) = keypair.x_only_public_key();
        Self {
            keypair,
            pubkey_hex: hex::encode(xonly.serialize()),
        }
    }
}

/// Builds and signs a well-formed event with a fresh keypair.
pub fn sign_event(kind: u32, created_at: i64, tags: Vec<Vec<String>>, content: String) -> EventRecord {
    sign_event_as(&TestKeypair::generate(), kind, created_at, tags, content)
}

/// Builds and signs a well-formed event using a caller-supplied keypair, so
/// a test can produce several events from the same author.
pub fn sign_event_as(
    key: &TestKeypair,
    kind: u32,
    created_at: i64,
    tags: Vec<Vec<String>>,
    content: String,
) -> EventRecord {
    let bytes = Event::canonical_bytes(&key.pubkey_hex, created_at, kind, &tags, &content);
    let id: [u8; 32] = Sha256::digest(&bytes).into();

    let secp = Secp256k1::new();
    let message = secp256k1::Message::from_digest(id);
    let sig = secp.sign_schnorr(&message, &key.keypair);

    EventRecord {
        id: hex::encode(id),
        pubkey: key.pubkey_hex.clone(),
        created_at,
        kind,
        tags,
        content,
        sig: hex::encode(sig.as_ref()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn signed_event_verifies() {
        let record = sign_event(1, 1000, vec![], "hello".to_owned());
        let event = Event::try_from(record).unwrap();
        assert!(event.verify().is_ok());
    }

    #[test]
    fn two_events_from_same_keypair_share_a_pubkey() {
        let key = TestKeypair::generate();
        let a = sign_event_as(&key, 0, 100, vec![], "a".to_owned());
        let b = sign_event_as(&key, 0, 200, vec![], "b".to_owned());
        assert_eq!(a.pubkey, b.pubkey);
    }
}
