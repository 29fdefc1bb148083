use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use vra_core::{midnight, ExpectedRevenueRow, MatchBucket, MatchResult, Micros, NormalizedStatementRow};

use crate::config::MatchOptions;

const KEY_WEIGHT: f64 = 0.6;
const AMOUNT_WEIGHT: f64 = 0.3;
const TIME_WEIGHT: f64 = 0.1;
const MAX_REACH_SEC: u64 = 366 * 86_400;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MatchOutput {
    pub auto: Vec<MatchResult>,
    pub review: Vec<MatchResult>,
    pub unmatched: Vec<MatchResult>,
    /// Expected rows in the batch that no statement claimed.
    pub unclaimed_expected: usize,
}

impl MatchOutput {
    pub fn counts(&self) -> (usize, usize, usize) {
        (self.auto.len(), self.review.len(), self.unmatched.len())
    }
}

/// Fraction of (app, ad unit, date, country) that agree.
fn key_score(stmt: &NormalizedStatementRow, exp: &ExpectedRevenueRow) -> f64 {
    let hits = [
        stmt.app_id == exp.app_id,
        stmt.ad_unit_id == exp.ad_unit_id,
        stmt.event_date == exp.ts.date_naive(),
        stmt.country.eq_ignore_ascii_case(&exp.country),
    ]
    .into_iter()
    .filter(|hit| *hit)
    .count();
    hits as f64 / 4.0
}

fn amount_closeness(a: Micros, b: Micros) -> f64 {
    let (a, b) = (a.as_f64(), b.as_f64());
    let scale = a.abs().max(b.abs());
    if scale == 0.0 {
        return 1.0;
    }
    (1.0 - (a - b).abs() / scale).clamp(0.0, 1.0)
}

/// 1 inside `[day_start, day_end)`, then linear decay to 0 at `window_sec` outside.
fn time_alignment(ts: DateTime<Utc>, day_start: DateTime<Utc>, day_end: DateTime<Utc>, window_sec: u64) -> f64 {
    let outside = if ts < day_start {
        (day_start - ts).num_seconds()
    } else if ts >= day_end {
        (ts - day_end).num_seconds()
    } else {
        return 1.0;
    };
    if window_sec == 0 {
        return 0.0;
    }
    (1.0 - outside as f64 / window_sec as f64).max(0.0)
}

fn round6(x: f64) -> f64 {
    (x * 1e6).round() / 1e6
}

/// Confidence in [0, 1] that `exp` is the expected row behind `stmt`.
pub fn confidence(stmt: &NormalizedStatementRow, exp: &ExpectedRevenueRow, window_sec: u64) -> f64 {
    let day_start = midnight(stmt.event_date);
    let day_end = day_start + Duration::days(1);
    let score = KEY_WEIGHT * key_score(stmt, exp)
        + AMOUNT_WEIGHT * amount_closeness(stmt.paid, exp.expected_value)
        + TIME_WEIGHT * time_alignment(exp.ts, day_start, day_end, window_sec);
    round6(score.clamp(0.0, 1.0))
}

struct Candidate {
    stmt: usize,
    exp: usize,
    confidence: f64,
}

/// Pair statements with expected rows one-to-one.
///
/// Candidates share the network and lie within `time_window_sec` of the
/// statement day. Pairs at or above `min_confidence` are claimed greedily in
/// (confidence desc, statement key asc, request id asc) order, so identical
/// input always yields identical output. Each bucket is sorted by statement key.
pub fn match_statements(
    statements: &[NormalizedStatementRow],
    expected: &[ExpectedRevenueRow],
    opts: &MatchOptions,
) -> MatchOutput {
    let mut order: Vec<usize> = (0..expected.len()).collect();
    order.sort_by(|&a, &b| {
        expected[a]
            .ts
            .cmp(&expected[b].ts)
            .then_with(|| expected[a].request_id.cmp(&expected[b].request_id))
    });

    // Capped at a year; no statement day is matched further out than that.
    let reach = Duration::seconds(opts.time_window_sec.min(MAX_REACH_SEC) as i64);
    let keys: Vec<String> = statements.iter().map(|s| s.row_key()).collect();

    let mut per_statement: Vec<Vec<Candidate>> = Vec::with_capacity(statements.len());
    for (si, stmt) in statements.iter().enumerate() {
        let day_start = midnight(stmt.event_date);
        let lo = day_start - reach;
        let hi = day_start + Duration::days(1) + reach;
        let first = order.partition_point(|&ei| expected[ei].ts < lo);

        let candidates = order[first..]
            .iter()
            .take_while(|&&ei| expected[ei].ts <= hi)
            .filter(|&&ei| expected[ei].network.eq_ignore_ascii_case(&stmt.network))
            .map(|&ei| Candidate {
                stmt: si,
                exp: ei,
                confidence: confidence(stmt, &expected[ei], opts.time_window_sec),
            })
            .collect();
        per_statement.push(candidates);
    }

    let mut eligible: Vec<&Candidate> = per_statement
        .iter()
        .flatten()
        .filter(|c| c.confidence >= opts.min_confidence)
        .collect();
    eligible.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| keys[a.stmt].cmp(&keys[b.stmt]))
            .then_with(|| expected[a.exp].request_id.cmp(&expected[b.exp].request_id))
            .then_with(|| a.stmt.cmp(&b.stmt))
    });

    let mut stmt_claim: Vec<Option<(usize, f64)>> = vec![None; statements.len()];
    let mut exp_taken = vec![false; expected.len()];
    for c in eligible {
        if stmt_claim[c.stmt].is_some() || exp_taken[c.exp] {
            continue;
        }
        stmt_claim[c.stmt] = Some((c.exp, c.confidence));
        exp_taken[c.exp] = true;
    }

    let mut out = MatchOutput::default();
    for (si, claim) in stmt_claim.into_iter().enumerate() {
        let statement_ref = keys[si].clone();
        match claim {
            Some((ei, confidence)) => {
                let bucket = if confidence >= opts.auto_threshold {
                    MatchBucket::Auto
                } else {
                    MatchBucket::Review
                };
                let result = MatchResult {
                    bucket,
                    confidence,
                    statement_ref,
                    expected_ref: Some(expected[ei].request_id.clone()),
                };
                match bucket {
                    MatchBucket::Auto => out.auto.push(result),
                    _ => out.review.push(result),
                }
            }
            None => {
                // Best score among candidates still free, for triage.
                let best = per_statement[si]
                    .iter()
                    .filter(|c| !exp_taken[c.exp])
                    .map(|c| c.confidence)
                    .fold(0.0_f64, f64::max);
                out.unmatched.push(MatchResult {
                    bucket: MatchBucket::Unmatched,
                    confidence: best,
                    statement_ref,
                    expected_ref: None,
                });
            }
        }
    }

    for bucket in [&mut out.auto, &mut out.review, &mut out.unmatched] {
        bucket.sort_by(|a, b| a.statement_ref.cmp(&b.statement_ref));
    }
    out.unclaimed_expected = exp_taken.iter().filter(|t| !**t).count();
    out
}
