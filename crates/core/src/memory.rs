//! In-memory implementation of every collaborator handle.
//!
//! Used by tests in place of the SQLite store. Individual queries can be made
//! to fail with [`MemoryStore::fail_query`] to exercise degraded paths.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, NaiveDate, Utc};

use crate::amount::Micros;
use crate::auction::{AuctionRecord, CandidateBid};
use crate::model::{
    CurrencyWindowRate, DailyRatio, Delta, DeltaKind, ExpectedRevenueRow, FxObservation,
    IvtTotals, NormalizedStatementRow, RawStatementRecord, RevenueEvent, TransparencyReceipt,
    ViewabilitySample,
};
use crate::store::{
    AuctionSource, ReceiptSource, ReconStore, RevenueEventSource, StatementStore, StoreError,
    StoreResult,
};
use crate::window::Window;

type LoadKey = (String, String, String);
type DeltaKey = (DeltaKind, DateTime<Utc>, DateTime<Utc>, String);

#[derive(Default)]
struct MemoryState {
    loads: BTreeMap<LoadKey, RawStatementRecord>,
    statements: Vec<NormalizedStatementRow>,
    receipts: Vec<TransparencyReceipt>,
    events: Vec<RevenueEvent>,
    expected: BTreeMap<String, ExpectedRevenueRow>,
    deltas: BTreeMap<DeltaKey, Delta>,
    auctions: BTreeMap<String, AuctionRecord>,
    bids: Vec<CandidateBid>,
    failing: BTreeSet<String>,
    writes: usize,
}

impl MemoryState {
    fn expected_in_window<'a>(&'a self, window: &'a Window) -> impl Iterator<Item = &'a ExpectedRevenueRow> + 'a {
        self.expected.values().filter(move |row| window.contains(&row.ts))
    }

    fn events_in_window<'a>(&'a self, window: &'a Window) -> impl Iterator<Item = &'a RevenueEvent> + 'a {
        self.events.iter().filter(move |ev| window.contains(&ev.ts))
    }

    fn fx_events_in_window<'a>(&'a self, window: &'a Window) -> impl Iterator<Item = (&'a RevenueEvent, f64)> + 'a {
        self.events_in_window(window).filter_map(|ev| {
            if ev.currency.eq_ignore_ascii_case("USD") {
                return None;
            }
            match ev.fx_rate {
                Some(rate) if rate.is_finite() && rate > 0.0 => Some((ev, rate)),
                _ => None,
            }
        })
    }
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".into()))
    }

    fn query(&self, name: &str) -> StoreResult<MutexGuard<'_, MemoryState>> {
        let state = self.lock()?;
        if state.failing.contains(name) {
            return Err(StoreError::QueryFailed(name.to_string()));
        }
        Ok(state)
    }

    /// Make every subsequent call of the named trait method fail.
    pub fn fail_query(&self, name: &str) {
        if let Ok(mut state) = self.state.lock() {
            state.failing.insert(name.to_string());
        }
    }

    pub fn add_receipts(&self, receipts: impl IntoIterator<Item = TransparencyReceipt>) {
        if let Ok(mut state) = self.state.lock() {
            state.receipts.extend(receipts);
        }
    }

    pub fn add_revenue_events(&self, events: impl IntoIterator<Item = RevenueEvent>) {
        if let Ok(mut state) = self.state.lock() {
            state.events.extend(events);
        }
    }

    pub fn add_statements(&self, rows: impl IntoIterator<Item = NormalizedStatementRow>) {
        if let Ok(mut state) = self.state.lock() {
            state.statements.extend(rows);
        }
    }

    pub fn add_auction(&self, record: AuctionRecord, bids: impl IntoIterator<Item = CandidateBid>) {
        if let Ok(mut state) = self.state.lock() {
            state.auctions.insert(record.auction_id.clone(), record);
            state.bids.extend(bids);
        }
    }

    /// Rows written through any trait method.
    pub fn write_count(&self) -> usize {
        self.state.lock().map(|s| s.writes).unwrap_or(0)
    }

    pub fn raw_load_count(&self) -> usize {
        self.state.lock().map(|s| s.loads.len()).unwrap_or(0)
    }

    pub fn statement_count(&self) -> usize {
        self.state.lock().map(|s| s.statements.len()).unwrap_or(0)
    }

    pub fn expected_rows(&self) -> Vec<ExpectedRevenueRow> {
        self.state
            .lock()
            .map(|s| s.expected.values().cloned().collect())
            .unwrap_or_default()
    }

    pub fn deltas(&self) -> Vec<Delta> {
        self.state
            .lock()
            .map(|s| s.deltas.values().cloned().collect())
            .unwrap_or_default()
    }
}

impl StatementStore for MemoryStore {
    fn has_load(&self, network: &str, load_id: &str, report_id: &str) -> StoreResult<bool> {
        let state = self.query("has_load")?;
        let key = (network.to_string(), load_id.to_string(), report_id.to_string());
        Ok(state.loads.contains_key(&key))
    }

    fn write_load(&self, raw: &RawStatementRecord, rows: &[NormalizedStatementRow]) -> StoreResult<bool> {
        let mut state = self.query("write_load")?;
        let key = (raw.network.clone(), raw.load_id.clone(), raw.report_id.clone());
        if state.loads.contains_key(&key) {
            return Ok(false);
        }
        state.loads.insert(key, raw.clone());
        state.statements.extend(rows.iter().cloned());
        state.writes += 1 + rows.len();
        Ok(true)
    }

    fn statements_in(&self, window: &Window, limit: usize) -> StoreResult<Vec<NormalizedStatementRow>> {
        let state = self.query("statements_in")?;
        let mut rows: Vec<NormalizedStatementRow> = state
            .statements
            .iter()
            .filter(|row| window.contains_date(row.event_date))
            .cloned()
            .collect();
        rows.sort_by(|a, b| {
            a.event_date
                .cmp(&b.event_date)
                .then_with(|| a.network.cmp(&b.network))
                .then_with(|| a.source_line.cmp(&b.source_line))
        });
        rows.truncate(limit);
        Ok(rows)
    }
}

impl ReceiptSource for MemoryStore {
    fn receipts(&self, window: &Window, limit: usize) -> StoreResult<Vec<TransparencyReceipt>> {
        let state = self.query("receipts")?;
        let mut rows: Vec<TransparencyReceipt> = state
            .receipts
            .iter()
            .filter(|r| window.contains(&r.ts))
            .cloned()
            .collect();
        rows.sort_by(|a, b| a.ts.cmp(&b.ts).then_with(|| a.request_id.cmp(&b.request_id)));
        rows.truncate(limit);
        Ok(rows)
    }
}

impl RevenueEventSource for MemoryStore {
    fn revenue_events_for(
        &self,
        window: &Window,
        request_ids: &BTreeSet<String>,
    ) -> StoreResult<Vec<RevenueEvent>> {
        let state = self.query("revenue_events_for")?;
        Ok(state
            .events_in_window(window)
            .filter(|ev| request_ids.contains(&ev.request_id))
            .cloned()
            .collect())
    }
}

impl ReconStore for MemoryStore {
    fn upsert_expected(&self, rows: &[ExpectedRevenueRow]) -> StoreResult<usize> {
        let mut state = self.query("upsert_expected")?;
        for row in rows {
            state.expected.insert(row.request_id.clone(), row.clone());
        }
        state.writes += rows.len();
        Ok(rows.len())
    }

    fn expected_in(&self, window: &Window, limit: usize) -> StoreResult<Vec<ExpectedRevenueRow>> {
        let state = self.query("expected_in")?;
        let mut rows: Vec<ExpectedRevenueRow> = state.expected_in_window(window).cloned().collect();
        rows.sort_by(|a, b| a.ts.cmp(&b.ts).then_with(|| a.request_id.cmp(&b.request_id)));
        rows.truncate(limit);
        Ok(rows)
    }

    fn expected_usd(&self, window: &Window) -> StoreResult<Micros> {
        let state = self.query("expected_usd")?;
        Ok(state.expected_in_window(window).map(|row| row.expected_value).sum())
    }

    fn paid_usd(&self, window: &Window) -> StoreResult<Micros> {
        let state = self.query("paid_usd")?;
        let ids: BTreeSet<&str> = state
            .expected_in_window(window)
            .map(|row| row.request_id.as_str())
            .collect();
        Ok(state
            .events_in_window(window)
            .filter(|ev| ids.contains(ev.request_id.as_str()))
            .map(|ev| ev.revenue_usd)
            .sum())
    }

    fn unmatched_usd(&self, window: &Window) -> StoreResult<Micros> {
        let state = self.query("unmatched_usd")?;
        let paid_ids: BTreeSet<&str> = state
            .events_in_window(window)
            .map(|ev| ev.request_id.as_str())
            .collect();
        Ok(state
            .expected_in_window(window)
            .filter(|row| !paid_ids.contains(row.request_id.as_str()))
            .map(|row| row.expected_value)
            .sum())
    }

    fn daily_ivt_ratios(&self, window: &Window) -> StoreResult<Vec<DailyRatio>> {
        let state = self.query("daily_ivt_ratios")?;
        let mut days: BTreeMap<NaiveDate, IvtTotals> = BTreeMap::new();
        for row in state.statements.iter().filter(|r| window.contains_date(r.event_date)) {
            let entry = days.entry(row.event_date).or_default();
            entry.paid += row.paid;
            entry.ivt += row.ivt_or_zero();
        }
        Ok(days
            .into_iter()
            .filter(|(_, t)| t.paid.is_positive())
            .filter_map(|(date, t)| t.ivt.ratio(t.paid).map(|ratio| DailyRatio { date, ratio }))
            .collect())
    }

    fn ivt_totals(&self, window: &Window) -> StoreResult<IvtTotals> {
        let state = self.query("ivt_totals")?;
        let mut totals = IvtTotals::default();
        for row in state.statements.iter().filter(|r| window.contains_date(r.event_date)) {
            totals.paid += row.paid;
            totals.ivt += row.ivt_or_zero();
        }
        Ok(totals)
    }

    fn daily_fx_rates(&self, window: &Window) -> StoreResult<Vec<FxObservation>> {
        let state = self.query("daily_fx_rates")?;
        let mut groups: BTreeMap<(NaiveDate, String), (f64, usize)> = BTreeMap::new();
        for (ev, rate) in state.fx_events_in_window(window) {
            let key = (ev.ts.date_naive(), ev.currency.to_ascii_uppercase());
            let entry = groups.entry(key).or_insert((0.0, 0));
            entry.0 += rate;
            entry.1 += 1;
        }
        Ok(groups
            .into_iter()
            .map(|((date, currency), (sum, n))| FxObservation {
                date,
                currency,
                rate: sum / n as f64,
            })
            .collect())
    }

    fn window_fx_rates(&self, window: &Window) -> StoreResult<Vec<CurrencyWindowRate>> {
        let state = self.query("window_fx_rates")?;
        let mut groups: BTreeMap<String, (f64, usize, Micros)> = BTreeMap::new();
        for (ev, rate) in state.fx_events_in_window(window) {
            let entry = groups
                .entry(ev.currency.to_ascii_uppercase())
                .or_insert((0.0, 0, Micros::ZERO));
            entry.0 += rate;
            entry.1 += 1;
            entry.2 += ev.revenue_usd;
        }
        Ok(groups
            .into_iter()
            .map(|(currency, (sum, n, revenue_usd))| CurrencyWindowRate {
                currency,
                avg_rate: sum / n as f64,
                revenue_usd,
            })
            .collect())
    }

    fn window_viewability(&self, window: &Window) -> StoreResult<Option<ViewabilitySample>> {
        let state = self.query("window_viewability")?;
        let pairs: Vec<(f64, f64)> = state
            .expected_in_window(window)
            .filter_map(|row| row.viewability.as_ref().and_then(|v| v.pair()))
            .collect();
        if pairs.is_empty() {
            return Ok(None);
        }
        let n = pairs.len() as f64;
        Ok(Some(ViewabilitySample {
            om_viewable_pct: pairs.iter().map(|p| p.0).sum::<f64>() / n,
            statement_viewable_pct: pairs.iter().map(|p| p.1).sum::<f64>() / n,
            samples: pairs.len(),
        }))
    }

    fn insert_deltas(&self, deltas: &[Delta]) -> StoreResult<usize> {
        let mut state = self.query("insert_deltas")?;
        let mut inserted = 0;
        for delta in deltas {
            let key = (
                delta.kind,
                delta.window_start,
                delta.window_end,
                delta.evidence_id.clone(),
            );
            if !state.deltas.contains_key(&key) {
                state.deltas.insert(key, delta.clone());
                inserted += 1;
            }
        }
        state.writes += inserted;
        Ok(inserted)
    }

    fn deltas_by_evidence_ids(&self, evidence_ids: &[String]) -> StoreResult<Vec<Delta>> {
        let state = self.query("deltas_by_evidence_ids")?;
        let wanted: BTreeSet<&str> = evidence_ids.iter().map(String::as_str).collect();
        Ok(state
            .deltas
            .values()
            .filter(|d| wanted.contains(d.evidence_id.as_str()))
            .cloned()
            .collect())
    }
}

impl AuctionSource for MemoryStore {
    fn auction(&self, auction_id: &str) -> StoreResult<Option<AuctionRecord>> {
        let state = self.query("auction")?;
        Ok(state.auctions.get(auction_id).cloned())
    }

    fn candidate_bids(&self, auction_id: &str) -> StoreResult<Vec<CandidateBid>> {
        let state = self.query("candidate_bids")?;
        Ok(state
            .bids
            .iter()
            .filter(|b| b.auction_id == auction_id)
            .cloned()
            .collect())
    }
}
