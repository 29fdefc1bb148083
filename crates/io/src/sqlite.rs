// SQLite-backed reconciliation store for local and dev use

use std::collections::BTreeSet;
use std::path::Path;

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::{params, params_from_iter, Connection, OptionalExtension, Row};

use vra_core::{
    AuctionRecord, AuctionSource, AuctionWinner, CandidateBid, CurrencyWindowRate, DailyRatio,
    Delta, DeltaKind, ExpectedRevenueRow, FxObservation, IntegritySignature, IvtTotals, Micros,
    NormalizedStatementRow, RawStatementRecord, ReceiptSource, ReconStore, RevenueEvent,
    RevenueEventSource, StatementStore, StoreError, StoreResult, TransparencyReceipt,
    ViewabilityPayload, ViewabilitySample, Window,
};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS recon_statements_raw (
    network TEXT NOT NULL,
    load_id TEXT NOT NULL,
    report_id TEXT NOT NULL,
    schema_version TEXT NOT NULL,
    payload_blake3 TEXT NOT NULL,
    byte_size INTEGER NOT NULL,
    row_count INTEGER NOT NULL,
    error_count INTEGER NOT NULL,
    ingested_at TEXT NOT NULL,
    payload TEXT NOT NULL,
    PRIMARY KEY (network, load_id, report_id)
);

CREATE TABLE IF NOT EXISTS recon_statements_norm (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    network TEXT NOT NULL,
    load_id TEXT NOT NULL,
    report_id TEXT NOT NULL,
    schema_version TEXT NOT NULL,
    event_date TEXT NOT NULL,           -- YYYY-MM-DD
    app_id TEXT NOT NULL,
    ad_unit_id TEXT NOT NULL,
    country TEXT NOT NULL,
    format TEXT NOT NULL,
    currency TEXT NOT NULL,
    impressions INTEGER NOT NULL,
    clicks INTEGER NOT NULL,
    paid_micros INTEGER NOT NULL,
    ivt_micros INTEGER,                 -- NULL when the export has no IVT column
    source_line INTEGER NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_norm_date ON recon_statements_norm (event_date);

CREATE TABLE IF NOT EXISTS transparency_receipts (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    request_id TEXT NOT NULL,
    ts TEXT NOT NULL,
    network TEXT NOT NULL,
    app_id TEXT NOT NULL,
    ad_unit_id TEXT NOT NULL,
    country TEXT NOT NULL,
    format TEXT NOT NULL,
    expected_micros INTEGER NOT NULL,
    om_viewable_pct REAL
);
CREATE INDEX IF NOT EXISTS idx_receipts_ts ON transparency_receipts (ts);

CREATE TABLE IF NOT EXISTS revenue_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    request_id TEXT NOT NULL,
    ts TEXT NOT NULL,
    network TEXT NOT NULL,
    revenue_micros INTEGER NOT NULL,
    currency TEXT NOT NULL,
    fx_rate REAL,
    statement_viewable_pct REAL
);
CREATE INDEX IF NOT EXISTS idx_events_ts ON revenue_events (ts);
CREATE INDEX IF NOT EXISTS idx_events_request ON revenue_events (request_id);

CREATE TABLE IF NOT EXISTS recon_expected (
    request_id TEXT PRIMARY KEY,
    ts TEXT NOT NULL,
    network TEXT NOT NULL,
    app_id TEXT NOT NULL,
    ad_unit_id TEXT NOT NULL,
    country TEXT NOT NULL,
    format TEXT NOT NULL,
    expected_micros INTEGER NOT NULL,
    om_viewable_pct REAL,
    statement_viewable_pct REAL
);
CREATE INDEX IF NOT EXISTS idx_expected_ts ON recon_expected (ts);

CREATE TABLE IF NOT EXISTS recon_deltas (
    kind TEXT NOT NULL,
    window_start TEXT NOT NULL,
    window_end TEXT NOT NULL,
    evidence_id TEXT NOT NULL,
    amount_micros INTEGER NOT NULL,
    currency TEXT NOT NULL,
    reason_code TEXT NOT NULL,
    confidence REAL NOT NULL,
    PRIMARY KEY (kind, window_start, window_end, evidence_id)
);
CREATE INDEX IF NOT EXISTS idx_deltas_evidence ON recon_deltas (evidence_id);

CREATE TABLE IF NOT EXISTS auctions (
    auction_id TEXT PRIMARY KEY,
    request_id TEXT NOT NULL,
    placement_id TEXT NOT NULL,
    ts TEXT NOT NULL,
    floor_cpm REAL NOT NULL,
    currency TEXT NOT NULL,
    winner_bidder TEXT,
    winner_price_cpm REAL,
    winner_creative_id TEXT,
    integrity_algo TEXT,
    integrity_key_id TEXT,
    integrity_signature TEXT
);

CREATE TABLE IF NOT EXISTS auction_candidates (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    auction_id TEXT NOT NULL,
    bidder TEXT NOT NULL,
    price_cpm REAL NOT NULL,
    status TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_candidates_auction ON auction_candidates (auction_id);
"#;

// Fixed width so that text comparison orders timestamps correctly.
const TS_FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.6fZ";
const DATE_FORMAT: &str = "%Y-%m-%d";

fn ts_text(ts: &DateTime<Utc>) -> String {
    ts.format(TS_FORMAT).to_string()
}

fn date_text(date: NaiveDate) -> String {
    date.format(DATE_FORMAT).to_string()
}

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

fn conversion_error(idx: usize, message: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(
        idx,
        rusqlite::types::Type::Text,
        message.into(),
    )
}

fn ts_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let raw: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, format!("timestamp '{raw}': {e}")))
}

fn date_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<NaiveDate> {
    let raw: String = row.get(idx)?;
    NaiveDate::parse_from_str(&raw, DATE_FORMAT)
        .map_err(|e| conversion_error(idx, format!("date '{raw}': {e}")))
}

fn micros_col(row: &Row<'_>, idx: usize) -> rusqlite::Result<Micros> {
    row.get::<_, i64>(idx).map(Micros)
}

fn window_params(window: &Window) -> (String, String) {
    (ts_text(&window.from), ts_text(&window.to))
}

fn date_params(window: &Window) -> (String, String) {
    let (first, end) = window.date_bounds();
    (date_text(first), date_text(end))
}

pub struct SqliteStore {
    conn: Connection,
}

impl SqliteStore {
    pub fn open(path: &Path) -> StoreResult<Self> {
        let conn = Connection::open(path).map_err(backend)?;
        Self::with_connection(conn)
    }

    pub fn open_in_memory() -> StoreResult<Self> {
        let conn = Connection::open_in_memory().map_err(backend)?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> StoreResult<Self> {
        conn.execute_batch(SCHEMA).map_err(backend)?;
        Ok(Self { conn })
    }

    fn count(&self, table: &str) -> StoreResult<usize> {
        let n: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |r| r.get(0))
            .map_err(backend)?;
        Ok(n.max(0) as usize)
    }

    pub fn raw_load_count(&self) -> StoreResult<usize> {
        self.count("recon_statements_raw")
    }

    pub fn statement_count(&self) -> StoreResult<usize> {
        self.count("recon_statements_norm")
    }

    pub fn expected_count(&self) -> StoreResult<usize> {
        self.count("recon_expected")
    }

    pub fn delta_count(&self) -> StoreResult<usize> {
        self.count("recon_deltas")
    }

    // ── Collaborator-owned tables ───────────────────────────────────

    pub fn insert_receipts(&self, receipts: &[TransparencyReceipt]) -> StoreResult<usize> {
        let tx = self.conn.unchecked_transaction().map_err(backend)?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO transparency_receipts
                     (request_id, ts, network, app_id, ad_unit_id, country, format, expected_micros, om_viewable_pct)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                )
                .map_err(backend)?;
            for r in receipts {
                stmt.execute(params![
                    r.request_id,
                    ts_text(&r.ts),
                    r.network,
                    r.app_id,
                    r.ad_unit_id,
                    r.country,
                    r.format,
                    r.expected_value.raw(),
                    r.om_viewable_pct,
                ])
                .map_err(backend)?;
            }
        }
        tx.commit().map_err(backend)?;
        Ok(receipts.len())
    }

    pub fn insert_revenue_events(&self, events: &[RevenueEvent]) -> StoreResult<usize> {
        let tx = self.conn.unchecked_transaction().map_err(backend)?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO revenue_events
                     (request_id, ts, network, revenue_micros, currency, fx_rate, statement_viewable_pct)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                )
                .map_err(backend)?;
            for e in events {
                stmt.execute(params![
                    e.request_id,
                    ts_text(&e.ts),
                    e.network,
                    e.revenue_usd.raw(),
                    e.currency,
                    e.fx_rate,
                    e.statement_viewable_pct,
                ])
                .map_err(backend)?;
            }
        }
        tx.commit().map_err(backend)?;
        Ok(events.len())
    }

    pub fn insert_auction(&self, record: &AuctionRecord, bids: &[CandidateBid]) -> StoreResult<()> {
        let tx = self.conn.unchecked_transaction().map_err(backend)?;
        tx.execute(
            "INSERT OR REPLACE INTO auctions
             (auction_id, request_id, placement_id, ts, floor_cpm, currency,
              winner_bidder, winner_price_cpm, winner_creative_id,
              integrity_algo, integrity_key_id, integrity_signature)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            params![
                record.auction_id,
                record.request_id,
                record.placement_id,
                ts_text(&record.ts),
                record.floor_cpm,
                record.currency,
                record.winner.as_ref().map(|w| w.bidder.clone()),
                record.winner.as_ref().map(|w| w.price_cpm),
                record.winner.as_ref().and_then(|w| w.creative_id.clone()),
                record.integrity.as_ref().map(|i| i.algo.clone()),
                record.integrity.as_ref().map(|i| i.key_id.clone()),
                record.integrity.as_ref().map(|i| i.signature.clone()),
            ],
        )
        .map_err(backend)?;
        tx.execute(
            "DELETE FROM auction_candidates WHERE auction_id = ?1",
            params![record.auction_id],
        )
        .map_err(backend)?;
        for bid in bids {
            tx.execute(
                "INSERT INTO auction_candidates (auction_id, bidder, price_cpm, status)
                 VALUES (?1, ?2, ?3, ?4)",
                params![bid.auction_id, bid.bidder, bid.price_cpm, bid.status],
            )
            .map_err(backend)?;
        }
        tx.commit().map_err(backend)
    }

    fn sum_micros(&self, sql: &str, window: &Window) -> StoreResult<Micros> {
        let (from, to) = window_params(window);
        self.conn
            .query_row(sql, params![from, to], |r| micros_col(r, 0))
            .map_err(backend)
    }
}

// ── Statements ──────────────────────────────────────────────────────

fn statement_from_row(row: &Row<'_>) -> rusqlite::Result<NormalizedStatementRow> {
    Ok(NormalizedStatementRow {
        network: row.get(0)?,
        schema_version: row.get(1)?,
        event_date: date_col(row, 2)?,
        app_id: row.get(3)?,
        ad_unit_id: row.get(4)?,
        country: row.get(5)?,
        format: row.get(6)?,
        currency: row.get(7)?,
        impressions: row.get::<_, i64>(8)?.max(0) as u64,
        clicks: row.get::<_, i64>(9)?.max(0) as u64,
        paid: micros_col(row, 10)?,
        ivt_adjustments: row.get::<_, Option<i64>>(11)?.map(Micros),
        source_line: row.get::<_, i64>(12)?.max(0) as usize,
    })
}

impl StatementStore for SqliteStore {
    fn has_load(&self, network: &str, load_id: &str, report_id: &str) -> StoreResult<bool> {
        self.conn
            .query_row(
                "SELECT 1 FROM recon_statements_raw WHERE network = ?1 AND load_id = ?2 AND report_id = ?3",
                params![network, load_id, report_id],
                |_| Ok(()),
            )
            .optional()
            .map(|hit| hit.is_some())
            .map_err(backend)
    }

    fn write_load(&self, raw: &RawStatementRecord, rows: &[NormalizedStatementRow]) -> StoreResult<bool> {
        let tx = self.conn.unchecked_transaction().map_err(backend)?;
        let inserted = tx
            .execute(
                "INSERT OR IGNORE INTO recon_statements_raw
                 (network, load_id, report_id, schema_version, payload_blake3, byte_size,
                  row_count, error_count, ingested_at, payload)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    raw.network,
                    raw.load_id,
                    raw.report_id,
                    raw.schema_version,
                    raw.payload_blake3,
                    raw.byte_size as i64,
                    raw.row_count as i64,
                    raw.error_count as i64,
                    ts_text(&raw.ingested_at),
                    raw.payload,
                ],
            )
            .map_err(backend)?;
        if inserted == 0 {
            // Dropping the transaction rolls it back.
            return Ok(false);
        }
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO recon_statements_norm
                     (network, load_id, report_id, schema_version, event_date, app_id, ad_unit_id,
                      country, format, currency, impressions, clicks, paid_micros, ivt_micros, source_line)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                )
                .map_err(backend)?;
            for row in rows {
                stmt.execute(params![
                    row.network,
                    raw.load_id,
                    raw.report_id,
                    row.schema_version,
                    date_text(row.event_date),
                    row.app_id,
                    row.ad_unit_id,
                    row.country,
                    row.format,
                    row.currency,
                    row.impressions as i64,
                    row.clicks as i64,
                    row.paid.raw(),
                    row.ivt_adjustments.map(Micros::raw),
                    row.source_line as i64,
                ])
                .map_err(backend)?;
            }
        }
        tx.commit().map_err(backend)?;
        Ok(true)
    }

    fn statements_in(&self, window: &Window, limit: usize) -> StoreResult<Vec<NormalizedStatementRow>> {
        let (first, end) = date_params(window);
        let mut stmt = self
            .conn
            .prepare(
                "SELECT network, schema_version, event_date, app_id, ad_unit_id, country, format,
                        currency, impressions, clicks, paid_micros, ivt_micros, source_line
                 FROM recon_statements_norm
                 WHERE event_date >= ?1 AND event_date < ?2
                 ORDER BY event_date, network, source_line
                 LIMIT ?3",
            )
            .map_err(backend)?;
        let rows = stmt
            .query_map(params![first, end, limit as i64], statement_from_row)
            .map_err(backend)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(backend)
    }
}

// ── Collaborator sources ────────────────────────────────────────────

impl ReceiptSource for SqliteStore {
    fn receipts(&self, window: &Window, limit: usize) -> StoreResult<Vec<TransparencyReceipt>> {
        let (from, to) = window_params(window);
        let mut stmt = self
            .conn
            .prepare(
                "SELECT request_id, ts, network, app_id, ad_unit_id, country, format,
                        expected_micros, om_viewable_pct
                 FROM transparency_receipts
                 WHERE ts >= ?1 AND ts < ?2
                 ORDER BY ts, request_id, id
                 LIMIT ?3",
            )
            .map_err(backend)?;
        let rows = stmt
            .query_map(params![from, to, limit as i64], |r| {
                Ok(TransparencyReceipt {
                    request_id: r.get(0)?,
                    ts: ts_col(r, 1)?,
                    network: r.get(2)?,
                    app_id: r.get(3)?,
                    ad_unit_id: r.get(4)?,
                    country: r.get(5)?,
                    format: r.get(6)?,
                    expected_value: micros_col(r, 7)?,
                    om_viewable_pct: r.get(8)?,
                })
            })
            .map_err(backend)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(backend)
    }
}

impl RevenueEventSource for SqliteStore {
    fn revenue_events_for(
        &self,
        window: &Window,
        request_ids: &BTreeSet<String>,
    ) -> StoreResult<Vec<RevenueEvent>> {
        let (from, to) = window_params(window);
        let mut stmt = self
            .conn
            .prepare(
                "SELECT request_id, ts, network, revenue_micros, currency, fx_rate, statement_viewable_pct
                 FROM revenue_events
                 WHERE ts >= ?1 AND ts < ?2
                 ORDER BY ts, request_id, id",
            )
            .map_err(backend)?;
        let rows = stmt
            .query_map(params![from, to], |r| {
                Ok(RevenueEvent {
                    request_id: r.get(0)?,
                    ts: ts_col(r, 1)?,
                    network: r.get(2)?,
                    revenue_usd: micros_col(r, 3)?,
                    currency: r.get(4)?,
                    fx_rate: r.get(5)?,
                    statement_viewable_pct: r.get(6)?,
                })
            })
            .map_err(backend)?;
        let mut events = Vec::new();
        for ev in rows {
            let ev = ev.map_err(backend)?;
            if request_ids.contains(&ev.request_id) {
                events.push(ev);
            }
        }
        Ok(events)
    }
}

// ── Reconciliation store ────────────────────────────────────────────

fn expected_from_row(r: &Row<'_>) -> rusqlite::Result<ExpectedRevenueRow> {
    let viewability = ViewabilityPayload {
        om_viewable_pct: r.get(8)?,
        statement_viewable_pct: r.get(9)?,
    };
    Ok(ExpectedRevenueRow {
        request_id: r.get(0)?,
        ts: ts_col(r, 1)?,
        network: r.get(2)?,
        app_id: r.get(3)?,
        ad_unit_id: r.get(4)?,
        country: r.get(5)?,
        format: r.get(6)?,
        expected_value: micros_col(r, 7)?,
        viewability: (!viewability.is_empty()).then_some(viewability),
    })
}

fn delta_from_row(r: &Row<'_>) -> rusqlite::Result<Delta> {
    let kind: String = r.get(0)?;
    let kind: DeltaKind = kind.parse().map_err(|e: String| conversion_error(0, e))?;
    Ok(Delta {
        kind,
        window_start: ts_col(r, 1)?,
        window_end: ts_col(r, 2)?,
        evidence_id: r.get(3)?,
        amount: micros_col(r, 4)?,
        currency: r.get(5)?,
        reason_code: r.get(6)?,
        confidence: r.get(7)?,
    })
}

impl ReconStore for SqliteStore {
    fn upsert_expected(&self, rows: &[ExpectedRevenueRow]) -> StoreResult<usize> {
        let tx = self.conn.unchecked_transaction().map_err(backend)?;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT INTO recon_expected
                     (request_id, ts, network, app_id, ad_unit_id, country, format, expected_micros,
                      om_viewable_pct, statement_viewable_pct)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                     ON CONFLICT (request_id) DO UPDATE SET
                       ts = excluded.ts,
                       network = excluded.network,
                       app_id = excluded.app_id,
                       ad_unit_id = excluded.ad_unit_id,
                       country = excluded.country,
                       format = excluded.format,
                       expected_micros = excluded.expected_micros,
                       om_viewable_pct = excluded.om_viewable_pct,
                       statement_viewable_pct = excluded.statement_viewable_pct",
                )
                .map_err(backend)?;
            for row in rows {
                let v = row.viewability.clone().unwrap_or_default();
                stmt.execute(params![
                    row.request_id,
                    ts_text(&row.ts),
                    row.network,
                    row.app_id,
                    row.ad_unit_id,
                    row.country,
                    row.format,
                    row.expected_value.raw(),
                    v.om_viewable_pct,
                    v.statement_viewable_pct,
                ])
                .map_err(backend)?;
            }
        }
        tx.commit().map_err(backend)?;
        Ok(rows.len())
    }

    fn expected_in(&self, window: &Window, limit: usize) -> StoreResult<Vec<ExpectedRevenueRow>> {
        let (from, to) = window_params(window);
        let mut stmt = self
            .conn
            .prepare(
                "SELECT request_id, ts, network, app_id, ad_unit_id, country, format, expected_micros,
                        om_viewable_pct, statement_viewable_pct
                 FROM recon_expected
                 WHERE ts >= ?1 AND ts < ?2
                 ORDER BY ts, request_id
                 LIMIT ?3",
            )
            .map_err(backend)?;
        let rows = stmt
            .query_map(params![from, to, limit as i64], expected_from_row)
            .map_err(backend)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(backend)
    }

    fn expected_usd(&self, window: &Window) -> StoreResult<Micros> {
        self.sum_micros(
            "SELECT COALESCE(SUM(expected_micros), 0) FROM recon_expected WHERE ts >= ?1 AND ts < ?2",
            window,
        )
    }

    fn paid_usd(&self, window: &Window) -> StoreResult<Micros> {
        self.sum_micros(
            "SELECT COALESCE(SUM(e.revenue_micros), 0)
             FROM revenue_events e
             WHERE e.ts >= ?1 AND e.ts < ?2
               AND e.request_id IN (SELECT request_id FROM recon_expected WHERE ts >= ?1 AND ts < ?2)",
            window,
        )
    }

    fn unmatched_usd(&self, window: &Window) -> StoreResult<Micros> {
        self.sum_micros(
            "SELECT COALESCE(SUM(x.expected_micros), 0)
             FROM recon_expected x
             WHERE x.ts >= ?1 AND x.ts < ?2
               AND NOT EXISTS (
                 SELECT 1 FROM revenue_events e
                 WHERE e.request_id = x.request_id AND e.ts >= ?1 AND e.ts < ?2
               )",
            window,
        )
    }

    fn daily_ivt_ratios(&self, window: &Window) -> StoreResult<Vec<DailyRatio>> {
        let (first, end) = date_params(window);
        let mut stmt = self
            .conn
            .prepare(
                "SELECT event_date, SUM(paid_micros), COALESCE(SUM(ivt_micros), 0)
                 FROM recon_statements_norm
                 WHERE event_date >= ?1 AND event_date < ?2
                 GROUP BY event_date
                 ORDER BY event_date",
            )
            .map_err(backend)?;
        let rows = stmt
            .query_map(params![first, end], |r| {
                Ok((date_col(r, 0)?, micros_col(r, 1)?, micros_col(r, 2)?))
            })
            .map_err(backend)?;
        let mut out = Vec::new();
        for row in rows {
            let (date, paid, ivt) = row.map_err(backend)?;
            if !paid.is_positive() {
                continue;
            }
            if let Some(ratio) = ivt.ratio(paid) {
                out.push(DailyRatio { date, ratio });
            }
        }
        Ok(out)
    }

    fn ivt_totals(&self, window: &Window) -> StoreResult<IvtTotals> {
        let (first, end) = date_params(window);
        self.conn
            .query_row(
                "SELECT COALESCE(SUM(paid_micros), 0), COALESCE(SUM(ivt_micros), 0)
                 FROM recon_statements_norm
                 WHERE event_date >= ?1 AND event_date < ?2",
                params![first, end],
                |r| {
                    Ok(IvtTotals {
                        paid: micros_col(r, 0)?,
                        ivt: micros_col(r, 1)?,
                    })
                },
            )
            .map_err(backend)
    }

    fn daily_fx_rates(&self, window: &Window) -> StoreResult<Vec<FxObservation>> {
        let (from, to) = window_params(window);
        let mut stmt = self
            .conn
            .prepare(
                "SELECT substr(ts, 1, 10) AS day, UPPER(currency) AS cur, AVG(fx_rate)
                 FROM revenue_events
                 WHERE ts >= ?1 AND ts < ?2
                   AND UPPER(currency) <> 'USD'
                   AND fx_rate IS NOT NULL AND fx_rate > 0
                 GROUP BY day, cur
                 ORDER BY day, cur",
            )
            .map_err(backend)?;
        let rows = stmt
            .query_map(params![from, to], |r| {
                Ok(FxObservation {
                    date: date_col(r, 0)?,
                    currency: r.get(1)?,
                    rate: r.get(2)?,
                })
            })
            .map_err(backend)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(backend)
    }

    fn window_fx_rates(&self, window: &Window) -> StoreResult<Vec<CurrencyWindowRate>> {
        let (from, to) = window_params(window);
        let mut stmt = self
            .conn
            .prepare(
                "SELECT UPPER(currency) AS cur, AVG(fx_rate), SUM(revenue_micros)
                 FROM revenue_events
                 WHERE ts >= ?1 AND ts < ?2
                   AND UPPER(currency) <> 'USD'
                   AND fx_rate IS NOT NULL AND fx_rate > 0
                 GROUP BY cur
                 ORDER BY cur",
            )
            .map_err(backend)?;
        let rows = stmt
            .query_map(params![from, to], |r| {
                Ok(CurrencyWindowRate {
                    currency: r.get(0)?,
                    avg_rate: r.get(1)?,
                    revenue_usd: micros_col(r, 2)?,
                })
            })
            .map_err(backend)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(backend)
    }

    fn window_viewability(&self, window: &Window) -> StoreResult<Option<ViewabilitySample>> {
        let (from, to) = window_params(window);
        let (om, stmt, n): (Option<f64>, Option<f64>, i64) = self
            .conn
            .query_row(
                "SELECT AVG(om_viewable_pct), AVG(statement_viewable_pct), COUNT(*)
                 FROM recon_expected
                 WHERE ts >= ?1 AND ts < ?2
                   AND om_viewable_pct IS NOT NULL AND statement_viewable_pct IS NOT NULL",
                params![from, to],
                |r| Ok((r.get(0)?, r.get(1)?, r.get(2)?)),
            )
            .map_err(backend)?;
        Ok(match (om, stmt) {
            (Some(om), Some(stmt)) if n > 0 => Some(ViewabilitySample {
                om_viewable_pct: om,
                statement_viewable_pct: stmt,
                samples: n as usize,
            }),
            _ => None,
        })
    }

    fn insert_deltas(&self, deltas: &[Delta]) -> StoreResult<usize> {
        let tx = self.conn.unchecked_transaction().map_err(backend)?;
        let mut inserted = 0;
        {
            let mut stmt = tx
                .prepare(
                    "INSERT OR IGNORE INTO recon_deltas
                     (kind, window_start, window_end, evidence_id, amount_micros, currency, reason_code, confidence)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                )
                .map_err(backend)?;
            for d in deltas {
                inserted += stmt
                    .execute(params![
                        d.kind.as_str(),
                        ts_text(&d.window_start),
                        ts_text(&d.window_end),
                        d.evidence_id,
                        d.amount.raw(),
                        d.currency,
                        d.reason_code,
                        d.confidence,
                    ])
                    .map_err(backend)?;
            }
        }
        tx.commit().map_err(backend)?;
        Ok(inserted)
    }

    fn deltas_by_evidence_ids(&self, evidence_ids: &[String]) -> StoreResult<Vec<Delta>> {
        if evidence_ids.is_empty() {
            return Ok(Vec::new());
        }
        let placeholders = vec!["?"; evidence_ids.len()].join(", ");
        let sql = format!(
            "SELECT kind, window_start, window_end, evidence_id, amount_micros, currency, reason_code, confidence
             FROM recon_deltas
             WHERE evidence_id IN ({placeholders})
             ORDER BY kind, window_start, evidence_id"
        );
        let mut stmt = self.conn.prepare(&sql).map_err(backend)?;
        let rows = stmt
            .query_map(params_from_iter(evidence_ids.iter()), delta_from_row)
            .map_err(backend)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(backend)
    }
}

// ── Auctions ────────────────────────────────────────────────────────

impl AuctionSource for SqliteStore {
    fn auction(&self, auction_id: &str) -> StoreResult<Option<AuctionRecord>> {
        self.conn
            .query_row(
                "SELECT auction_id, request_id, placement_id, ts, floor_cpm, currency,
                        winner_bidder, winner_price_cpm, winner_creative_id,
                        integrity_algo, integrity_key_id, integrity_signature
                 FROM auctions WHERE auction_id = ?1",
                params![auction_id],
                |r| {
                    let winner = match (r.get::<_, Option<String>>(6)?, r.get::<_, Option<f64>>(7)?) {
                        (Some(bidder), Some(price_cpm)) => Some(AuctionWinner {
                            bidder,
                            price_cpm,
                            creative_id: r.get(8)?,
                        }),
                        _ => None,
                    };
                    let integrity = match (
                        r.get::<_, Option<String>>(9)?,
                        r.get::<_, Option<String>>(10)?,
                        r.get::<_, Option<String>>(11)?,
                    ) {
                        (Some(algo), Some(key_id), Some(signature)) => Some(IntegritySignature {
                            algo,
                            key_id,
                            signature,
                        }),
                        _ => None,
                    };
                    Ok(AuctionRecord {
                        auction_id: r.get(0)?,
                        request_id: r.get(1)?,
                        placement_id: r.get(2)?,
                        ts: ts_col(r, 3)?,
                        floor_cpm: r.get(4)?,
                        currency: r.get(5)?,
                        winner,
                        integrity,
                    })
                },
            )
            .optional()
            .map_err(backend)
    }

    fn candidate_bids(&self, auction_id: &str) -> StoreResult<Vec<CandidateBid>> {
        let mut stmt = self
            .conn
            .prepare(
                "SELECT auction_id, bidder, price_cpm, status
                 FROM auction_candidates WHERE auction_id = ?1 ORDER BY id",
            )
            .map_err(backend)?;
        let rows = stmt
            .query_map(params![auction_id], |r| {
                Ok(CandidateBid {
                    auction_id: r.get(0)?,
                    bidder: r.get(1)?,
                    price_cpm: r.get(2)?,
                    status: r.get(3)?,
                })
            })
            .map_err(backend)?;
        rows.collect::<rusqlite::Result<Vec<_>>>().map_err(backend)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timestamps_sort_as_text() {
        let a = DateTime::parse_from_rfc3339("2026-01-01T09:00:00Z").unwrap().with_timezone(&Utc);
        let b = DateTime::parse_from_rfc3339("2026-01-01T10:00:00.5Z").unwrap().with_timezone(&Utc);
        assert!(ts_text(&a) < ts_text(&b));
        assert_eq!(ts_text(&a), "2026-01-01T09:00:00.000000Z");
    }

    #[test]
    fn schema_is_reentrant() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.conn.execute_batch(SCHEMA).unwrap();
        assert_eq!(store.delta_count().unwrap(), 0);
    }
}
