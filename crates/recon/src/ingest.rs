//! Statement ingestion: allowlist gate, idempotency by
//! (network, load_id, report_id), and one write of raw + normalized rows.

use chrono::Utc;
use log::{info, warn};
use serde::Serialize;

use vra_core::{RawStatementRecord, StatementStore};
use vra_io::{normalize, payload_hash, RowError};

use crate::config::IngestSettings;
use crate::error::ReconError;

pub const REASON_NOT_ALLOWED: &str = "network_not_allowed";
pub const REASON_ALREADY_INGESTED: &str = "already_ingested";
pub const REASON_UNREADABLE: &str = "unreadable_statement";

#[derive(Debug, Clone)]
pub struct IngestRequest<'a> {
    pub network: &'a str,
    pub schema_version: &'a str,
    pub load_id: &'a str,
    pub report_id: &'a str,
    pub csv: &'a str,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct IngestOutcome {
    pub skipped: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub normalized_rows: usize,
    pub row_errors: Vec<RowError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schema_version: Option<String>,
}

impl IngestOutcome {
    fn skipped(reason: &str) -> Self {
        Self {
            skipped: true,
            reason: Some(reason.to_string()),
            ..Self::default()
        }
    }
}

pub fn ingest(
    store: &dyn StatementStore,
    settings: &IngestSettings,
    req: &IngestRequest<'_>,
) -> Result<IngestOutcome, ReconError> {
    let network = req.network.trim().to_ascii_lowercase();

    if !settings.allows(&network) {
        info!("ingest skipped network={network} reason={REASON_NOT_ALLOWED}");
        return Ok(IngestOutcome::skipped(REASON_NOT_ALLOWED));
    }

    if store.has_load(&network, req.load_id, req.report_id)? {
        info!(
            "ingest skipped network={network} load={} report={} reason={REASON_ALREADY_INGESTED}",
            req.load_id, req.report_id
        );
        return Ok(IngestOutcome::skipped(REASON_ALREADY_INGESTED));
    }

    let normalized = normalize(&network, req.schema_version, req.csv);
    if normalized.unreadable {
        // Nothing is recorded, so a corrected export can reuse the same load id.
        warn!(
            "ingest skipped network={network} load={} report={} reason={REASON_UNREADABLE}",
            req.load_id, req.report_id
        );
        return Ok(IngestOutcome {
            row_errors: normalized.errors,
            schema_version: Some(normalized.schema_version),
            ..IngestOutcome::skipped(REASON_UNREADABLE)
        });
    }
    if !normalized.errors.is_empty() {
        warn!(
            "ingest network={network} load={}: {} malformed row(s) skipped",
            req.load_id,
            normalized.errors.len()
        );
    }

    let raw = RawStatementRecord {
        network: network.clone(),
        schema_version: normalized.schema_version.clone(),
        load_id: req.load_id.to_string(),
        report_id: req.report_id.to_string(),
        payload_blake3: payload_hash(req.csv.as_bytes()),
        byte_size: req.csv.len(),
        row_count: normalized.rows.len(),
        error_count: normalized.errors.len(),
        ingested_at: Utc::now(),
        payload: req.csv.to_string(),
    };

    if !store.write_load(&raw, &normalized.rows)? {
        // Another run wrote the same load between the check and the write.
        return Ok(IngestOutcome::skipped(REASON_ALREADY_INGESTED));
    }

    info!(
        "ingest network={network} load={} report={} rows={} errors={}",
        req.load_id,
        req.report_id,
        normalized.rows.len(),
        normalized.errors.len()
    );

    Ok(IngestOutcome {
        skipped: false,
        reason: None,
        normalized_rows: normalized.rows.len(),
        row_errors: normalized.errors,
        schema_version: Some(normalized.schema_version),
    })
}
