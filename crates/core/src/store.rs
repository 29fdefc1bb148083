//! Collaborator handles.
//!
//! Every job receives its data access as explicitly constructed handles
//! implementing these traits. Production wiring uses the SQLite store in
//! `vra-io`; tests use [`crate::memory::MemoryStore`].
//!
//! Windows are half-open `[from, to)`. Statement days belong to a window when
//! their midnight does (see [`Window::contains_date`]).

use std::collections::BTreeSet;

use thiserror::Error;

use crate::amount::Micros;
use crate::auction::{AuctionRecord, CandidateBid};
use crate::model::{
    CurrencyWindowRate, DailyRatio, Delta, ExpectedRevenueRow, FxObservation, IvtTotals,
    NormalizedStatementRow, RawStatementRecord, RevenueEvent, TransparencyReceipt,
    ViewabilitySample,
};
use crate::window::Window;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store backend error: {0}")]
    Backend(String),
    #[error("corrupt stored value: {0}")]
    Corrupt(String),
    #[error("query '{0}' failed")]
    QueryFailed(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Raw-statement audit table + normalized statement table.
pub trait StatementStore {
    fn has_load(&self, network: &str, load_id: &str, report_id: &str) -> StoreResult<bool>;

    /// Persist the raw audit record and its normalized rows as one unit.
    /// Returns `false` without writing when the load already exists.
    fn write_load(&self, raw: &RawStatementRecord, rows: &[NormalizedStatementRow]) -> StoreResult<bool>;

    fn statements_in(&self, window: &Window, limit: usize) -> StoreResult<Vec<NormalizedStatementRow>>;
}

/// Transparency receipts (auction-logging collaborator).
pub trait ReceiptSource {
    /// Receipts with `ts` in the window, ordered by (ts, request_id).
    fn receipts(&self, window: &Window, limit: usize) -> StoreResult<Vec<TransparencyReceipt>>;
}

/// Observed revenue events (analytics-ingestion collaborator).
pub trait RevenueEventSource {
    /// Events with `ts` in the window whose request id is in `request_ids`.
    fn revenue_events_for(
        &self,
        window: &Window,
        request_ids: &BTreeSet<String>,
    ) -> StoreResult<Vec<RevenueEvent>>;
}

/// Shared reconciliation store: `recon_expected`, `recon_statements_norm`,
/// `recon_deltas`, plus aggregated revenue events.
pub trait ReconStore {
    /// Insert or replace by request id. Returns the number of rows written.
    fn upsert_expected(&self, rows: &[ExpectedRevenueRow]) -> StoreResult<usize>;

    /// Expected rows in the window, ordered by (ts, request_id).
    fn expected_in(&self, window: &Window, limit: usize) -> StoreResult<Vec<ExpectedRevenueRow>>;

    /// Sum of expected value over the window.
    fn expected_usd(&self, window: &Window) -> StoreResult<Micros>;

    /// Paid revenue in the window, restricted to request ids referenced by
    /// expected rows in the same window.
    fn paid_usd(&self, window: &Window) -> StoreResult<Micros>;

    /// Expected value of rows with no paid event in the window.
    fn unmatched_usd(&self, window: &Window) -> StoreResult<Micros>;

    /// Per statement day, `sum(ivt) / sum(paid)` for days with paid > 0, ascending by date.
    fn daily_ivt_ratios(&self, window: &Window) -> StoreResult<Vec<DailyRatio>>;

    fn ivt_totals(&self, window: &Window) -> StoreResult<IvtTotals>;

    /// Daily average rate per non-USD currency, ascending by (date, currency).
    fn daily_fx_rates(&self, window: &Window) -> StoreResult<Vec<FxObservation>>;

    /// Window average rate per non-USD currency, ascending by currency.
    fn window_fx_rates(&self, window: &Window) -> StoreResult<Vec<CurrencyWindowRate>>;

    /// `None` when no expected row in the window carries both measurements.
    fn window_viewability(&self, window: &Window) -> StoreResult<Option<ViewabilitySample>>;

    /// Insert with conflict-ignore on (kind, window_start, window_end, evidence_id).
    /// Returns the number of rows actually inserted.
    fn insert_deltas(&self, deltas: &[Delta]) -> StoreResult<usize>;

    fn deltas_by_evidence_ids(&self, evidence_ids: &[String]) -> StoreResult<Vec<Delta>>;
}

/// Read access to logged auctions for transparency verification.
pub trait AuctionSource {
    fn auction(&self, auction_id: &str) -> StoreResult<Option<AuctionRecord>>;

    fn candidate_bids(&self, auction_id: &str) -> StoreResult<Vec<CandidateBid>>;
}
