use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::amount::Micros;

// ---------------------------------------------------------------------------
// Statements
// ---------------------------------------------------------------------------

/// One network statement row in the canonical cross-network shape.
///
/// Numeric fields are never absent: a missing optional column or an empty
/// cell both normalize to zero. `ivt_adjustments` is `None` only when the
/// network's export carries no IVT column at all; aggregations treat that as zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedStatementRow {
    pub network: String,
    pub schema_version: String,
    pub event_date: NaiveDate,
    pub app_id: String,
    pub ad_unit_id: String,
    pub country: String,
    pub format: String,
    pub currency: String,
    pub impressions: u64,
    pub clicks: u64,
    pub paid: Micros,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ivt_adjustments: Option<Micros>,
    /// 1-based line in the source CSV (header is line 1).
    pub source_line: usize,
}

impl NormalizedStatementRow {
    /// Stable reference used by match results.
    pub fn row_key(&self) -> String {
        format!(
            "{}/{}/{}/{}/{}#{}",
            self.network, self.event_date, self.app_id, self.ad_unit_id, self.country, self.source_line
        )
    }

    pub fn ivt_or_zero(&self) -> Micros {
        self.ivt_adjustments.unwrap_or(Micros::ZERO)
    }
}

/// Raw payload audit record written alongside the normalized rows of one load.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawStatementRecord {
    pub network: String,
    pub schema_version: String,
    pub load_id: String,
    pub report_id: String,
    /// BLAKE3 of the CSV bytes (hex).
    pub payload_blake3: String,
    pub byte_size: usize,
    pub row_count: usize,
    pub error_count: usize,
    pub ingested_at: DateTime<Utc>,
    pub payload: String,
}

// ---------------------------------------------------------------------------
// Expected revenue inputs (collaborator-owned)
// ---------------------------------------------------------------------------

/// Signed auction-transparency receipt, owned by the auction-logging collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransparencyReceipt {
    pub request_id: String,
    pub ts: DateTime<Utc>,
    pub network: String,
    pub app_id: String,
    pub ad_unit_id: String,
    pub country: String,
    pub format: String,
    /// Expected publisher revenue in USD.
    pub expected_value: Micros,
    #[serde(default)]
    pub om_viewable_pct: Option<f64>,
}

/// Observed revenue event, owned by the analytics-ingestion collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RevenueEvent {
    pub request_id: String,
    pub ts: DateTime<Utc>,
    pub network: String,
    pub revenue_usd: Micros,
    /// Currency the network paid in.
    pub currency: String,
    /// Units of `currency` per USD at the time of the event.
    #[serde(default)]
    pub fx_rate: Option<f64>,
    #[serde(default)]
    pub statement_viewable_pct: Option<f64>,
}

// ---------------------------------------------------------------------------
// Expected revenue
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ViewabilityPayload {
    #[serde(default)]
    pub om_viewable_pct: Option<f64>,
    #[serde(default)]
    pub statement_viewable_pct: Option<f64>,
}

impl ViewabilityPayload {
    pub fn is_empty(&self) -> bool {
        self.om_viewable_pct.is_none() && self.statement_viewable_pct.is_none()
    }

    /// Both measurements, when present.
    pub fn pair(&self) -> Option<(f64, f64)> {
        match (self.om_viewable_pct, self.statement_viewable_pct) {
            (Some(om), Some(stmt)) if om.is_finite() && stmt.is_finite() => Some((om, stmt)),
            _ => None,
        }
    }
}

/// Revenue a publisher should receive for one request. Upserted by `request_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExpectedRevenueRow {
    pub request_id: String,
    pub ts: DateTime<Utc>,
    pub network: String,
    pub app_id: String,
    pub ad_unit_id: String,
    pub country: String,
    pub format: String,
    pub expected_value: Micros,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub viewability: Option<ViewabilityPayload>,
}

// ---------------------------------------------------------------------------
// Matching
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchBucket {
    Auto,
    Review,
    Unmatched,
}

impl fmt::Display for MatchBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Auto => write!(f, "auto"),
            Self::Review => write!(f, "review"),
            Self::Unmatched => write!(f, "unmatched"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchResult {
    pub bucket: MatchBucket,
    pub confidence: f64,
    pub statement_ref: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_ref: Option<String>,
}

// ---------------------------------------------------------------------------
// Deltas
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeltaKind {
    TimingLag,
    Underpay,
    IvtOutlier,
    FxMismatch,
    ViewabilityGap,
}

impl DeltaKind {
    pub const ALL: [DeltaKind; 5] = [
        DeltaKind::TimingLag,
        DeltaKind::Underpay,
        DeltaKind::IvtOutlier,
        DeltaKind::FxMismatch,
        DeltaKind::ViewabilityGap,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TimingLag => "timing_lag",
            Self::Underpay => "underpay",
            Self::IvtOutlier => "ivt_outlier",
            Self::FxMismatch => "fx_mismatch",
            Self::ViewabilityGap => "viewability_gap",
        }
    }
}

impl fmt::Display for DeltaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DeltaKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        DeltaKind::ALL
            .into_iter()
            .find(|k| k.as_str() == s)
            .ok_or_else(|| format!("unknown delta kind: {s}"))
    }
}

/// A typed, quantified discrepancy for one window.
///
/// Natural key: (kind, window_start, window_end, evidence_id).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub kind: DeltaKind,
    pub amount: Micros,
    pub currency: String,
    /// Free text; redact before it leaves the process.
    pub reason_code: String,
    pub window_start: DateTime<Utc>,
    pub window_end: DateTime<Utc>,
    pub evidence_id: String,
    pub confidence: f64,
}

// ---------------------------------------------------------------------------
// Classifier aggregates
// ---------------------------------------------------------------------------

/// Daily IVT ratio: sum(ivt_adjustments) / sum(paid) for one statement day.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DailyRatio {
    pub date: NaiveDate,
    pub ratio: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct IvtTotals {
    pub paid: Micros,
    pub ivt: Micros,
}

/// Daily average exchange rate for one non-USD currency.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FxObservation {
    pub date: NaiveDate,
    pub currency: String,
    pub rate: f64,
}

/// Window average exchange rate and the USD revenue paid in that currency.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CurrencyWindowRate {
    pub currency: String,
    pub avg_rate: f64,
    pub revenue_usd: Micros,
}

/// Average OM-measured and statement-reported viewability over a window.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ViewabilitySample {
    pub om_viewable_pct: f64,
    pub statement_viewable_pct: f64,
    pub samples: usize,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delta_kind_round_trips_through_str() {
        for kind in DeltaKind::ALL {
            assert_eq!(kind.as_str().parse::<DeltaKind>().unwrap(), kind);
        }
        assert!("overpay".parse::<DeltaKind>().is_err());
    }

    #[test]
    fn delta_kind_serializes_snake_case() {
        let json = serde_json::to_string(&DeltaKind::ViewabilityGap).unwrap();
        assert_eq!(json, "\"viewability_gap\"");
    }

    #[test]
    fn viewability_pair_requires_both() {
        let partial = ViewabilityPayload {
            om_viewable_pct: Some(70.0),
            statement_viewable_pct: None,
        };
        assert_eq!(partial.pair(), None);
        let full = ViewabilityPayload {
            om_viewable_pct: Some(70.0),
            statement_viewable_pct: Some(50.0),
        };
        assert_eq!(full.pair(), Some((70.0, 50.0)));
    }
}
