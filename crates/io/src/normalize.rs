//! Network statement CSV → [`NormalizedStatementRow`].
//!
//! Normalization is partial-success: malformed rows land in
//! [`NormalizeOutput::errors`] with their source line and never abort the
//! batch. An unknown network or a header row lacking the date, ad unit or
//! revenue column yields no rows, one line-1 error, and `unreadable` set.

use std::collections::HashMap;

use chrono::NaiveDate;
use log::warn;
use serde::Serialize;
use thiserror::Error;

use vra_core::{Micros, NormalizedStatementRow};

use crate::networks::{self, header_key, NetworkSchema, DEFAULT_CURRENCY};

/// Why a whole export could not be read.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("unknown network '{0}'")]
    UnknownNetwork(String),
    #[error("{network} statement is missing required column(s): {}", .missing.join(", "))]
    MissingHeaders {
        network: String,
        missing: Vec<&'static str>,
    },
    #[error("unreadable CSV header: {0}")]
    Csv(#[from] csv::Error),
}

/// A source row that could not be normalized.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RowError {
    /// 1-based CSV line (header is line 1).
    pub line: usize,
    pub message: String,
}

#[derive(Debug, Clone, Default)]
pub struct NormalizeOutput {
    /// Schema version actually applied (may differ after fallback).
    pub schema_version: String,
    pub rows: Vec<NormalizedStatementRow>,
    pub errors: Vec<RowError>,
    /// No row could be read: unknown network or unusable header.
    pub unreadable: bool,
}

impl NormalizeOutput {
    fn unreadable(schema_version: &str, err: NormalizeError) -> Self {
        Self {
            schema_version: schema_version.to_string(),
            rows: Vec::new(),
            errors: vec![RowError {
                line: 1,
                message: err.to_string(),
            }],
            unreadable: true,
        }
    }
}

// ── Column resolution ───────────────────────────────────────────────

/// Column indices resolved against one export's header row.
struct Columns {
    date: usize,
    app_id: Option<usize>,
    ad_unit_id: usize,
    country: Option<usize>,
    format: Option<usize>,
    currency: Option<usize>,
    impressions: Option<usize>,
    clicks: Option<usize>,
    revenue: usize,
    ivt: Option<usize>,
}

fn find(index: &HashMap<String, usize>, aliases: &[&str]) -> Option<usize> {
    aliases.iter().find_map(|alias| index.get(&header_key(alias)).copied())
}

impl Columns {
    fn resolve(schema: &NetworkSchema, headers: &csv::StringRecord) -> Result<Self, NormalizeError> {
        let mut index = HashMap::new();
        for (i, h) in headers.iter().enumerate() {
            // First occurrence wins on duplicate headers.
            index.entry(header_key(h)).or_insert(i);
        }

        let date = find(&index, schema.date);
        let ad_unit_id = find(&index, schema.ad_unit_id);
        let revenue = find(&index, schema.revenue);

        let (date, ad_unit_id, revenue) = match (date, ad_unit_id, revenue) {
            (Some(d), Some(u), Some(r)) => (d, u, r),
            _ => {
                let mut missing = Vec::new();
                if date.is_none() {
                    missing.push("date");
                }
                if ad_unit_id.is_none() {
                    missing.push("ad_unit_id");
                }
                if revenue.is_none() {
                    missing.push("revenue");
                }
                return Err(NormalizeError::MissingHeaders {
                    network: schema.network.to_string(),
                    missing,
                });
            }
        };

        Ok(Self {
            date,
            app_id: find(&index, schema.app_id),
            ad_unit_id,
            country: find(&index, schema.country),
            format: find(&index, schema.format()),
            currency: find(&index, schema.currency()),
            impressions: find(&index, schema.impressions()),
            clicks: find(&index, schema.clicks()),
            revenue,
            ivt: if schema.ivt.is_empty() {
                None
            } else {
                find(&index, schema.ivt)
            },
        })
    }
}

// ── Entry point ─────────────────────────────────────────────────────

/// Normalize one statement export.
pub fn normalize(network: &str, schema_version: &str, csv_text: &str) -> NormalizeOutput {
    let network = network.trim().to_ascii_lowercase();
    let Some(resolved) = networks::resolve(&network, schema_version) else {
        warn!("no statement schema for network '{network}'");
        return NormalizeOutput::unreadable(schema_version, NormalizeError::UnknownNetwork(network));
    };
    if resolved.fell_back {
        warn!(
            "unknown schema version '{}' for {}, using {}",
            schema_version, network, resolved.schema.version
        );
    }
    let schema = resolved.schema;

    let text = csv_text.strip_prefix('\u{feff}').unwrap_or(csv_text);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(text.as_bytes());

    let cols = match reader
        .headers()
        .map_err(NormalizeError::from)
        .and_then(|headers| Columns::resolve(schema, headers))
    {
        Ok(cols) => cols,
        Err(e) => {
            warn!("{network} statement rejected: {e}");
            return NormalizeOutput::unreadable(schema.version, e);
        }
    };

    let mut out = NormalizeOutput {
        schema_version: schema.version.to_string(),
        ..NormalizeOutput::default()
    };

    for (i, result) in reader.records().enumerate() {
        let fallback_line = i + 2;
        let record = match result {
            Ok(r) => r,
            Err(e) => {
                out.errors.push(RowError {
                    line: e.position().map(|p| p.line() as usize).unwrap_or(fallback_line),
                    message: format!("unreadable row: {e}"),
                });
                continue;
            }
        };
        let line = record.position().map(|p| p.line() as usize).unwrap_or(fallback_line);
        if record.iter().all(str::is_empty) {
            continue;
        }
        match parse_row(schema, &cols, &record, line) {
            Ok(row) => out.rows.push(row),
            Err(message) => out.errors.push(RowError { line, message }),
        }
    }

    out
}

fn cell<'r>(record: &'r csv::StringRecord, idx: Option<usize>) -> &'r str {
    idx.and_then(|i| record.get(i)).unwrap_or("")
}

fn parse_row(
    schema: &NetworkSchema,
    cols: &Columns,
    record: &csv::StringRecord,
    line: usize,
) -> Result<NormalizedStatementRow, String> {
    let date_raw = cell(record, Some(cols.date));
    let event_date = parse_date(date_raw).ok_or_else(|| format!("invalid date '{date_raw}'"))?;

    let ad_unit_id = cell(record, Some(cols.ad_unit_id));
    if ad_unit_id.is_empty() {
        return Err("missing ad unit id".to_string());
    }

    let revenue_raw = cell(record, Some(cols.revenue));
    let paid = Micros::parse(revenue_raw).map_err(|e| format!("revenue: {e}"))?;

    // Some networks report IVT deductions as negative numbers.
    let ivt_adjustments = match cols.ivt {
        None => None,
        Some(i) => Some(
            Micros::parse(cell(record, Some(i)))
                .map(|m| Micros(m.raw().saturating_abs()))
                .map_err(|e| format!("ivt adjustments: {e}"))?,
        ),
    };

    let currency = match cell(record, cols.currency) {
        "" => DEFAULT_CURRENCY.to_string(),
        c => c.to_ascii_uppercase(),
    };

    Ok(NormalizedStatementRow {
        network: schema.network.to_string(),
        schema_version: schema.version.to_string(),
        event_date,
        app_id: cell(record, cols.app_id).to_string(),
        ad_unit_id: ad_unit_id.to_string(),
        country: cell(record, cols.country).to_ascii_uppercase(),
        format: canonical_format(cell(record, cols.format)),
        currency,
        impressions: parse_count(cell(record, cols.impressions)).map_err(|e| format!("impressions: {e}"))?,
        clicks: parse_count(cell(record, cols.clicks)).map_err(|e| format!("clicks: {e}"))?,
        paid,
        ivt_adjustments,
        source_line: line,
    })
}

// ── Cell parsers ────────────────────────────────────────────────────

const DATE_FORMATS: [&str; 4] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y", "%Y%m%d"];

/// Accepts `YYYY-MM-DD`, `YYYY/MM/DD`, `MM/DD/YYYY`, `YYYYMMDD`, and a
/// trailing time component (`2026-01-02 00:00:00`, `2026-01-02T00:00:00Z`).
pub fn parse_date(raw: &str) -> Option<NaiveDate> {
    let head = raw.trim().split(|c| c == ' ' || c == 'T').next()?;
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(head, fmt).ok())
}

/// Non-negative integer count. Empty is zero; `1,234` and `12.0` are accepted.
fn parse_count(raw: &str) -> Result<u64, String> {
    let cleaned: String = raw.chars().filter(|c| *c != ',' && *c != '_').collect();
    if cleaned.is_empty() {
        return Ok(0);
    }
    if let Ok(n) = cleaned.parse::<u64>() {
        return Ok(n);
    }
    match cleaned.parse::<f64>() {
        Ok(f) if f.is_finite() && f >= 0.0 && f.fract() == 0.0 => Ok(f as u64),
        _ => Err(format!("invalid count '{raw}'")),
    }
}

/// Map the many spellings of an ad format onto a small canonical set.
pub fn canonical_format(raw: &str) -> String {
    let key = header_key(raw);
    let canonical = match key.as_str() {
        "banner" | "banners" | "mrec" | "medium rectangle" | "leaderboard" | "adaptive banner" => "banner",
        "interstitial" | "inter" | "fullscreen" | "full screen" | "interstitial video" => "interstitial",
        "rewarded" | "rewarded video" | "rewarded interstitial" | "reward" | "rv" => "rewarded",
        "native" | "native banner" | "native advanced" => "native",
        "app open" | "appopen" | "app open ad" => "app_open",
        _ => return key.replace(' ', "_"),
    };
    canonical.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalizes_admob_export() {
        let csv = "\u{feff}Date,App ID,Ad unit ID,Country,Format,Impressions,Clicks,Estimated earnings\n\
                   2026-01-02,ca-app-1,ca-unit-9,us,Banner,\"1,200\",14,\"$12.3456789\"\n";
        let out = normalize("AdMob", "v1", csv);
        assert!(out.errors.is_empty(), "{:?}", out.errors);
        let row = &out.rows[0];
        assert_eq!(row.network, "admob");
        assert_eq!(row.event_date, NaiveDate::from_ymd_opt(2026, 1, 2).unwrap());
        assert_eq!(row.country, "US");
        assert_eq!(row.format, "banner");
        assert_eq!(row.currency, "USD");
        assert_eq!(row.impressions, 1200);
        assert_eq!(row.paid, Micros(12_345_679));
        assert_eq!(row.ivt_adjustments, None);
        assert_eq!(row.source_line, 2);
    }

    #[test]
    fn empty_numeric_cells_are_zero() {
        let csv = "Date,Placement ID,Country,Impressions,Clicks,Revenue,IVT Adjustments\n\
                   2026-01-02,video_1,DE,,,,\n";
        let out = normalize("unity", "v1", csv);
        let row = &out.rows[0];
        assert_eq!(row.impressions, 0);
        assert_eq!(row.clicks, 0);
        assert_eq!(row.paid, Micros::ZERO);
        assert_eq!(row.ivt_adjustments, Some(Micros::ZERO));
    }

    #[test]
    fn malformed_rows_are_collected_not_fatal() {
        let csv = "Day,Zone ID,Country,Revenue\n\
                   2026-01-02,z1,US,1.50\n\
                   not-a-date,z2,US,2.00\n\
                   2026-01-02,,US,2.00\n\
                   2026-01-03,z3,US,abc\n\
                   01/04/2026,z4,US,3\n";
        let out = normalize("applovin", "v1", csv);
        assert_eq!(out.rows.len(), 2);
        assert_eq!(out.errors.iter().map(|e| e.line).collect::<Vec<_>>(), vec![3, 4, 5]);
        assert_eq!(out.rows[1].event_date, NaiveDate::from_ymd_opt(2026, 1, 4).unwrap());
    }

    #[test]
    fn missing_required_headers_reject_the_batch() {
        let out = normalize("ironsource", "v1", "Date,Country,Revenue\n2026-01-01,US,1\n");
        assert!(out.unreadable);
        assert!(out.rows.is_empty());
        assert_eq!(out.errors.len(), 1);
        assert_eq!(out.errors[0].line, 1);
        assert!(out.errors[0].message.contains("missing required column(s): ad_unit_id"), "{:?}", out.errors);
    }

    #[test]
    fn unrelated_header_reports_every_missing_column() {
        let out = normalize("admob", "v1", "foo,bar\n1,2\n");
        assert!(out.unreadable);
        assert!(out.rows.is_empty());
        assert_eq!(out.errors[0].line, 1);
        assert!(out.errors[0].message.ends_with("date, ad_unit_id, revenue"), "{:?}", out.errors);
    }

    #[test]
    fn unknown_network_yields_a_batch_error() {
        let out = normalize("adcolony", "v1", "Date\n");
        assert!(out.unreadable);
        assert!(out.rows.is_empty());
        assert_eq!(out.schema_version, "v1");
        assert_eq!(out.errors[0].message, "unknown network 'adcolony'");
    }

    #[test]
    fn unknown_version_uses_latest_schema() {
        let csv = "date,ad_unit_id,estimated_earnings_usd,ivt_deductions\n2026-01-02,u1,10,-1.5\n";
        let out = normalize("admob", "v7", csv);
        assert_eq!(out.schema_version, "v2");
        assert_eq!(out.rows[0].ivt_adjustments, Some(Micros(1_500_000)));
    }

    #[test]
    fn date_formats() {
        let want = NaiveDate::from_ymd_opt(2026, 3, 9);
        for raw in ["2026-03-09", "2026/03/09", "03/09/2026", "20260309", "2026-03-09 00:00:00"] {
            assert_eq!(parse_date(raw), want, "{raw}");
        }
        assert_eq!(parse_date("Total"), None);
    }

    #[test]
    fn format_canonicalization() {
        assert_eq!(canonical_format("Rewarded Video"), "rewarded");
        assert_eq!(canonical_format("APP_OPEN"), "app_open");
        assert_eq!(canonical_format("Playable"), "playable");
        assert_eq!(canonical_format(""), "");
    }
}
