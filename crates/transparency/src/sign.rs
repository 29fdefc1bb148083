//! Signing side, used by the auction logger and by tests.

use base64::Engine;
use ed25519_dalek::{Signer, SigningKey};

use vra_core::{AuctionRecord, CandidateBid, IntegritySignature};

use crate::keys::key_id;
use crate::payload::canonical_auction;

pub const ALGO_ED25519: &str = "ed25519";

/// Sign the canonical payload of `record` and its bids.
pub fn sign_auction(record: &AuctionRecord, bids: &[CandidateBid], signing_key: &SigningKey) -> IntegritySignature {
    let message = canonical_auction(record, bids);
    let signature = signing_key.sign(message.as_bytes());
    IntegritySignature {
        algo: ALGO_ED25519.to_string(),
        key_id: key_id(&signing_key.verifying_key()),
        signature: base64::engine::general_purpose::STANDARD.encode(signature.to_bytes()),
    }
}
