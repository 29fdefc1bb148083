//! Auction records as logged by the auction-logging collaborator.
//!
//! The reconciliation side only reads these for signature verification.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Integrity block attached to a signed auction record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IntegritySignature {
    /// Signature algorithm, e.g. `"ed25519"`.
    pub algo: String,
    pub key_id: String,
    /// Base64-encoded signature over the canonical auction payload.
    pub signature: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuctionWinner {
    pub bidder: String,
    pub price_cpm: f64,
    #[serde(default)]
    pub creative_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuctionRecord {
    pub auction_id: String,
    pub request_id: String,
    pub placement_id: String,
    pub ts: DateTime<Utc>,
    pub floor_cpm: f64,
    pub currency: String,
    #[serde(default)]
    pub winner: Option<AuctionWinner>,
    #[serde(default)]
    pub integrity: Option<IntegritySignature>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateBid {
    pub auction_id: String,
    pub bidder: String,
    pub price_cpm: f64,
    /// `won`, `lost`, `timeout`, `no_bid`, ...
    pub status: String,
}
