use std::fmt;

use base64::Engine;
use ed25519_dalek::{Signature, Verifier};
use log::{debug, warn};
use serde::Serialize;

use vra_core::{AuctionRecord, AuctionSource, CandidateBid};

use crate::error::TransparencyError;
use crate::keys::KeyResolver;
use crate::payload::canonical_auction;
use crate::sign::ALGO_ED25519;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum VerifyStatus {
    Pass,
    Fail,
    /// The record carries no integrity block.
    NotApplicable,
    UnknownKey,
}

impl fmt::Display for VerifyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pass => write!(f, "pass"),
            Self::Fail => write!(f, "fail"),
            Self::NotApplicable => write!(f, "not_applicable"),
            Self::UnknownKey => write!(f, "unknown_key"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct VerificationReport {
    pub auction_id: String,
    pub status: VerifyStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl VerificationReport {
    fn new(record: &AuctionRecord, status: VerifyStatus, reason: Option<String>) -> Self {
        Self {
            auction_id: record.auction_id.clone(),
            status,
            key_id: record.integrity.as_ref().map(|i| i.key_id.clone()),
            reason,
        }
    }
}

/// Verify an already-loaded record against its bids.
pub fn verify_record(record: &AuctionRecord, bids: &[CandidateBid], keys: &dyn KeyResolver) -> VerificationReport {
    let Some(integrity) = &record.integrity else {
        return VerificationReport::new(record, VerifyStatus::NotApplicable, None);
    };
    let fail = |reason: String| VerificationReport::new(record, VerifyStatus::Fail, Some(reason));

    if !integrity.algo.eq_ignore_ascii_case(ALGO_ED25519) {
        return fail(format!("unsupported algorithm '{}'", integrity.algo));
    }
    let Some(key) = keys.resolve(&integrity.key_id) else {
        return VerificationReport::new(record, VerifyStatus::UnknownKey, None);
    };

    let sig_bytes = match base64::engine::general_purpose::STANDARD.decode(integrity.signature.trim()) {
        Ok(bytes) => bytes,
        Err(e) => return fail(format!("invalid signature base64: {e}")),
    };
    let Ok(sig_array) = <[u8; 64]>::try_from(sig_bytes) else {
        return fail("signature must be 64 bytes".into());
    };
    let signature = Signature::from_bytes(&sig_array);

    let message = canonical_auction(record, bids);
    match key.verify(message.as_bytes(), &signature) {
        Ok(()) => VerificationReport::new(record, VerifyStatus::Pass, None),
        Err(e) => fail(format!("signature verification failed: {e}")),
    }
}

/// Fetch an auction and its bids, then verify.
pub fn verify_auction(
    source: &dyn AuctionSource,
    auction_id: &str,
    keys: &dyn KeyResolver,
) -> Result<VerificationReport, TransparencyError> {
    let record = source
        .auction(auction_id)?
        .ok_or_else(|| TransparencyError::AuctionNotFound(auction_id.to_string()))?;
    let bids = source.candidate_bids(auction_id)?;

    let report = verify_record(&record, &bids, keys);
    match report.status {
        VerifyStatus::Pass | VerifyStatus::NotApplicable => {
            debug!("auction {auction_id}: {}", report.status)
        }
        _ => warn!(
            "auction {auction_id}: {}{}",
            report.status,
            report.reason.as_deref().map(|r| format!(" ({r})")).unwrap_or_default()
        ),
    }
    Ok(report)
}
