use chrono::SecondsFormat;
use serde_json::{json, Value};

use vra_core::{AuctionRecord, CandidateBid};

use crate::canonical::canonicalize;

/// The signed field set of an auction.
///
/// Signing and verification must both build the payload here; any field
/// added or renamed changes every signature.
pub fn auction_payload(record: &AuctionRecord, bids: &[CandidateBid]) -> Value {
    let mut candidates: Vec<&CandidateBid> = bids
        .iter()
        .filter(|b| b.auction_id == record.auction_id)
        .collect();
    candidates.sort_by(|a, b| {
        a.bidder
            .cmp(&b.bidder)
            .then_with(|| a.price_cpm.total_cmp(&b.price_cpm))
            .then_with(|| a.status.cmp(&b.status))
    });

    let winner = record.winner.as_ref().map_or(Value::Null, |w| {
        json!({
            "bidder": w.bidder,
            "price_cpm": w.price_cpm,
            "creative_id": w.creative_id,
        })
    });

    json!({
        "auction_id": record.auction_id,
        "request_id": record.request_id,
        "placement_id": record.placement_id,
        "ts": record.ts.to_rfc3339_opts(SecondsFormat::Millis, true),
        "floor_cpm": record.floor_cpm,
        "currency": record.currency,
        "winner": winner,
        "candidates": candidates
            .iter()
            .map(|b| json!({
                "bidder": b.bidder,
                "price_cpm": b.price_cpm,
                "status": b.status,
            }))
            .collect::<Vec<_>>(),
    })
}

/// Canonical string of [`auction_payload`].
pub fn canonical_auction(record: &AuctionRecord, bids: &[CandidateBid]) -> String {
    canonicalize(&auction_payload(record, bids))
}
