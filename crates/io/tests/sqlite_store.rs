//! SQLite store behaviour against a file-backed database.

use std::collections::BTreeSet;

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use tempfile::TempDir;

use vra_core::{
    AuctionRecord, AuctionSource, AuctionWinner, CandidateBid, Delta, DeltaKind,
    ExpectedRevenueRow, IntegritySignature, Micros, RawStatementRecord, ReceiptSource,
    ReconStore, RevenueEvent, RevenueEventSource, StatementStore, TransparencyReceipt,
    ViewabilityPayload, Window,
};
use vra_io::{normalize, payload_hash, SqliteStore};

fn ts(day: u32, hour: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 2, day, hour, 0, 0).unwrap()
}

fn window() -> Window {
    Window::new(ts(10, 0), ts(13, 0)).unwrap()
}

fn open(dir: &TempDir) -> SqliteStore {
    SqliteStore::open(&dir.path().join("vra.db")).unwrap()
}

fn raw(load_id: &str, csv: &str, rows: usize) -> RawStatementRecord {
    RawStatementRecord {
        network: "unity".into(),
        schema_version: "v1".into(),
        load_id: load_id.into(),
        report_id: "r1".into(),
        payload_blake3: payload_hash(csv.as_bytes()),
        byte_size: csv.len(),
        row_count: rows,
        error_count: 0,
        ingested_at: ts(14, 0),
        payload: csv.into(),
    }
}

fn expected(id: &str, day: u32, units: i64) -> ExpectedRevenueRow {
    ExpectedRevenueRow {
        request_id: id.into(),
        ts: ts(day, 8),
        network: "unity".into(),
        app_id: "g1".into(),
        ad_unit_id: "video".into(),
        country: "US".into(),
        format: "rewarded".into(),
        expected_value: Micros::from_units(units),
        viewability: None,
    }
}

fn event(id: &str, day: u32, units: i64, currency: &str, fx_rate: Option<f64>) -> RevenueEvent {
    RevenueEvent {
        request_id: id.into(),
        ts: ts(day, 9),
        network: "unity".into(),
        revenue_usd: Micros::from_units(units),
        currency: currency.into(),
        fx_rate,
        statement_viewable_pct: None,
    }
}

#[test]
fn load_is_written_once() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let csv = "Date,Placement ID,Country,Revenue,IVT Adjustments\n\
               2026-02-10,video,US,100,4\n\
               2026-02-11,video,US,50,\n";
    let out = normalize("unity", "v1", csv);
    assert_eq!(out.rows.len(), 2);

    assert!(!store.has_load("unity", "L1", "r1").unwrap());
    assert!(store.write_load(&raw("L1", csv, 2), &out.rows).unwrap());
    assert!(store.has_load("unity", "L1", "r1").unwrap());
    assert!(!store.write_load(&raw("L1", csv, 2), &out.rows).unwrap());

    assert_eq!(store.raw_load_count().unwrap(), 1);
    assert_eq!(store.statement_count().unwrap(), 2);

    let rows = store.statements_in(&window(), 100).unwrap();
    assert_eq!(rows, out.rows);

    let totals = store.ivt_totals(&window()).unwrap();
    assert_eq!(totals.paid, Micros::from_units(150));
    assert_eq!(totals.ivt, Micros::from_units(4));

    let ratios = store.daily_ivt_ratios(&window()).unwrap();
    assert_eq!(ratios.len(), 2);
    assert_eq!(ratios[0].date, NaiveDate::from_ymd_opt(2026, 2, 10).unwrap());
    assert!((ratios[0].ratio - 0.04).abs() < 1e-12);
    assert_eq!(ratios[1].ratio, 0.0);
}

#[test]
fn window_aggregates() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    store
        .upsert_expected(&[expected("a", 10, 50), expected("b", 11, 30), expected("c", 12, 20)])
        .unwrap();
    store
        .insert_revenue_events(&[
            event("a", 10, 40, "USD", None),
            event("b", 11, 20, "EUR", Some(0.9)),
            event("zzz", 11, 999, "USD", None),
        ])
        .unwrap();

    let w = window();
    assert_eq!(store.expected_usd(&w).unwrap(), Micros::from_units(100));
    assert_eq!(store.paid_usd(&w).unwrap(), Micros::from_units(60));
    assert_eq!(store.unmatched_usd(&w).unwrap(), Micros::from_units(20));

    let fx = store.window_fx_rates(&w).unwrap();
    assert_eq!(fx.len(), 1);
    assert_eq!(fx[0].currency, "EUR");
    assert_eq!(fx[0].revenue_usd, Micros::from_units(20));

    let daily = store.daily_fx_rates(&w).unwrap();
    assert_eq!(daily[0].date, NaiveDate::from_ymd_opt(2026, 2, 11).unwrap());
}

#[test]
fn expected_upsert_and_viewability() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let mut row = expected("a", 10, 50);
    store.upsert_expected(&[row.clone()]).unwrap();
    row.viewability = Some(ViewabilityPayload {
        om_viewable_pct: Some(72.0),
        statement_viewable_pct: Some(50.0),
    });
    store.upsert_expected(&[row.clone()]).unwrap();

    assert_eq!(store.expected_count().unwrap(), 1);
    assert_eq!(store.expected_in(&window(), 10).unwrap(), vec![row]);

    let sample = store.window_viewability(&window()).unwrap().unwrap();
    assert_eq!(sample.samples, 1);
    assert_eq!(sample.om_viewable_pct, 72.0);
}

#[test]
fn receipts_and_events_filter_by_window() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let receipt = |id: &str, day: u32| TransparencyReceipt {
        request_id: id.into(),
        ts: ts(day, 8),
        network: "unity".into(),
        app_id: "g1".into(),
        ad_unit_id: "video".into(),
        country: "US".into(),
        format: "rewarded".into(),
        expected_value: Micros::from_units(1),
        om_viewable_pct: Some(60.0),
    };
    store
        .insert_receipts(&[receipt("late", 13), receipt("b", 11), receipt("a", 10)])
        .unwrap();
    let got: Vec<String> = store
        .receipts(&window(), 10)
        .unwrap()
        .into_iter()
        .map(|r| r.request_id)
        .collect();
    assert_eq!(got, vec!["a", "b"]);

    store
        .insert_revenue_events(&[event("a", 10, 1, "USD", None), event("x", 10, 1, "USD", None)])
        .unwrap();
    let ids: BTreeSet<String> = ["a".to_string()].into_iter().collect();
    let events = store.revenue_events_for(&window(), &ids).unwrap();
    assert_eq!(events.len(), 1);
}

#[test]
fn deltas_conflict_ignore_and_lookup() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let delta = Delta {
        kind: DeltaKind::FxMismatch,
        amount: Micros(1_250_000),
        currency: "EUR".into(),
        reason_code: "fx deviation".into(),
        window_start: ts(10, 0),
        window_end: ts(13, 0),
        evidence_id: "ev_abc".into(),
        confidence: 0.6,
    };
    assert_eq!(store.insert_deltas(&[delta.clone()]).unwrap(), 1);
    assert_eq!(store.insert_deltas(&[delta.clone()]).unwrap(), 0);
    assert_eq!(store.delta_count().unwrap(), 1);

    let found = store
        .deltas_by_evidence_ids(&["ev_abc".to_string(), "ev_missing".to_string()])
        .unwrap();
    assert_eq!(found, vec![delta]);
    assert!(store.deltas_by_evidence_ids(&[]).unwrap().is_empty());
}

#[test]
fn auctions_round_trip() {
    let dir = TempDir::new().unwrap();
    let store = open(&dir);
    let record = AuctionRecord {
        auction_id: "auc-1".into(),
        request_id: "req-1".into(),
        placement_id: "pl-1".into(),
        ts: Utc.with_ymd_and_hms(2026, 2, 10, 12, 0, 0).unwrap(),
        floor_cpm: 0.5,
        currency: "USD".into(),
        winner: Some(AuctionWinner {
            bidder: "meta".into(),
            price_cpm: 2.25,
            creative_id: None,
        }),
        integrity: Some(IntegritySignature {
            algo: "ed25519".into(),
            key_id: "k1".into(),
            signature: "c2ln".into(),
        }),
    };
    let bids = vec![CandidateBid {
        auction_id: "auc-1".into(),
        bidder: "meta".into(),
        price_cpm: 2.25,
        status: "won".into(),
    }];
    store.insert_auction(&record, &bids).unwrap();

    assert_eq!(store.auction("auc-1").unwrap(), Some(record));
    assert_eq!(store.candidate_bids("auc-1").unwrap(), bids);
    assert_eq!(store.auction("nope").unwrap(), None);
}
