//! Expected revenue: transparency receipts left-joined with observed revenue
//! events by request id.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Instant;

use log::{debug, info, warn};
use serde::Serialize;

use vra_core::{
    ExpectedRevenueRow, Micros, ReceiptSource, ReconStore, RevenueEvent, RevenueEventSource,
    ViewabilityPayload, Window,
};

use crate::config::{fetch_limit, within_limit, Caps, RunFlags};
use crate::error::ReconError;

/// Collaborator handles the builder reads from and writes to.
#[derive(Clone, Copy)]
pub struct ExpectedSources<'a> {
    pub receipts: &'a dyn ReceiptSource,
    pub events: &'a dyn RevenueEventSource,
    pub recon: &'a dyn ReconStore,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BuildMetrics {
    /// Expected rows that found a revenue event.
    pub joined: usize,
    pub unjoined: usize,
    pub expected_total: Micros,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExpectedOutcome {
    pub seen: usize,
    pub written: usize,
    pub skipped: usize,
    pub dry_run: bool,
    /// The window held more receipts than the row limit; only the first
    /// `limit` (by time, then request id) were processed.
    pub truncated: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metrics: Option<BuildMetrics>,
}

pub fn build_expected(
    sources: ExpectedSources<'_>,
    window: &Window,
    caps: &Caps,
    flags: &RunFlags,
    collect_metrics: bool,
) -> Result<ExpectedOutcome, ReconError> {
    let started = Instant::now();
    let limit = caps.admit(window, flags)?;

    let (receipts, truncated) = within_limit(sources.receipts.receipts(window, fetch_limit(limit))?, limit);
    if truncated {
        warn!("expected window={window}: more than {limit} receipts, processing the first {limit}");
    }
    let seen = receipts.len();

    let mut ids = BTreeSet::new();
    let mut valid = Vec::with_capacity(receipts.len());
    let mut skipped = 0usize;
    for receipt in receipts {
        let id = receipt.request_id.trim();
        if id.is_empty() || !receipt.expected_value.is_positive() || !ids.insert(id.to_string()) {
            debug!("expected: skipping receipt '{}'", receipt.request_id);
            skipped += 1;
            continue;
        }
        valid.push(receipt);
    }

    let events = sources.events.revenue_events_for(window, &ids)?;
    let mut by_id: BTreeMap<&str, &RevenueEvent> = BTreeMap::new();
    for event in &events {
        by_id.entry(event.request_id.as_str()).or_insert(event);
    }

    let mut joined = 0usize;
    let rows: Vec<ExpectedRevenueRow> = valid
        .into_iter()
        .map(|r| {
            let request_id = r.request_id.trim().to_string();
            let event = by_id.get(request_id.as_str());
            if event.is_some() {
                joined += 1;
            }
            let viewability = ViewabilityPayload {
                om_viewable_pct: r.om_viewable_pct,
                statement_viewable_pct: event.and_then(|e| e.statement_viewable_pct),
            };
            ExpectedRevenueRow {
                request_id,
                ts: r.ts,
                network: r.network.to_ascii_lowercase(),
                app_id: r.app_id,
                ad_unit_id: r.ad_unit_id,
                country: r.country.to_ascii_uppercase(),
                format: r.format,
                expected_value: r.expected_value,
                viewability: (!viewability.is_empty()).then_some(viewability),
            }
        })
        .collect();

    let written = if flags.dry_run || rows.is_empty() {
        0
    } else {
        sources.recon.upsert_expected(&rows)?
    };

    let metrics = collect_metrics.then(|| BuildMetrics {
        joined,
        unjoined: rows.len() - joined,
        expected_total: rows.iter().map(|r| r.expected_value).sum(),
        elapsed_ms: started.elapsed().as_millis() as u64,
    });
    if let Some(m) = &metrics {
        info!(
            "expected metrics window={window} joined={} unjoined={} expected_total={} elapsed_ms={}",
            m.joined, m.unjoined, m.expected_total, m.elapsed_ms
        );
    }
    info!(
        "expected window={window} seen={seen} written={written} skipped={skipped} truncated={truncated} dry_run={}",
        flags.dry_run
    );

    Ok(ExpectedOutcome {
        seen,
        written,
        skipped,
        dry_run: flags.dry_run,
        truncated,
        metrics,
    })
}
