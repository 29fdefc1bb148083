//! Window reconciliation and delta classification.
//!
//! Steps, per window:
//!
//! 1. expected, paid and unmatched totals (fatal on failure)
//! 2. timing lag and underpay from the gap between expected and paid
//! 3. IVT outlier, FX mismatch, and viewability gap rules, each against a
//!    trailing baseline and each skipped on its own if its data is missing
//!
//! Every threshold test is strict: a value exactly at its limit never emits.

use std::collections::BTreeMap;

use log::{debug, info, warn};
use serde::Serialize;

use vra_core::{Delta, DeltaKind, Micros, ReconStore, StoreError, Window};

use crate::config::{Caps, RunFlags, Thresholds};
use crate::error::ReconError;
use crate::evidence::evidence_id;
use crate::redact::Redactor;
use crate::stats::{median, p95};

/// Guard against float noise at rule boundaries.
const EPS: f64 = 1e-9;

const TIMING_LAG_CONFIDENCE: f64 = 0.7;
const UNDERPAY_BASE: f64 = 0.6;
const IVT_BASE: f64 = 0.6;
const FX_BASE: f64 = 0.6;
const VIEWABILITY_BASE: f64 = 0.5;

const REPORT_CURRENCY: &str = "USD";

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct WindowAmounts {
    pub expected: Micros,
    pub paid: Micros,
    pub unmatched: Micros,
    pub gap: Micros,
    pub timing_lag: Micros,
    pub residual: Micros,
}

impl WindowAmounts {
    /// `gap = max(0, expected - paid)`, the part of it explained by unmatched
    /// expected revenue is timing lag, the rest is residual.
    pub fn compute(expected: Micros, paid: Micros, unmatched: Micros) -> Self {
        let gap = (expected - paid).non_negative();
        let timing_lag = unmatched.non_negative().min(gap);
        let residual = (gap - timing_lag).non_negative();
        Self {
            expected,
            paid,
            unmatched,
            gap,
            timing_lag,
            residual,
        }
    }
}

/// A statistical rule that did not run for this window.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RuleSkip {
    pub rule: DeltaKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    pub reason: String,
}

pub const SKIP_QUERY_FAILED: &str = "query_failed";
pub const SKIP_BASELINE_EMPTY: &str = "baseline_empty";
pub const SKIP_NO_WINDOW_DATA: &str = "no_window_data";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcileOutcome {
    pub window: Window,
    pub dry_run: bool,
    /// True when the window had no expected revenue and nothing was evaluated.
    pub noop: bool,
    pub inserted: usize,
    /// Reason codes and rule scopes here are redacted; stored rows keep the
    /// raw reason text for dispute kits, which redact on their own.
    pub deltas: Vec<Delta>,
    pub amounts: WindowAmounts,
    pub skipped_rules: Vec<RuleSkip>,
}

impl ReconcileOutcome {
    fn redacted(mut self, redactor: &Redactor) -> Result<Self, ReconError> {
        for delta in &mut self.deltas {
            delta.reason_code = redactor.redact(&delta.reason_code)?;
        }
        for skip in &mut self.skipped_rules {
            if let Some(scope) = &skip.scope {
                skip.scope = Some(redactor.redact(scope)?);
            }
        }
        Ok(self)
    }
}

/// How strongly an observation past its limit supports a delta.
fn confidence(base: f64, value: f64, limit: f64) -> f64 {
    let excess = if limit > 0.0 {
        ((value - limit) / limit).clamp(0.0, 1.0)
    } else {
        1.0
    };
    let c = (base + (1.0 - base) * excess).clamp(0.0, 1.0);
    (c * 1e6).round() / 1e6
}

struct Classifier<'a> {
    store: &'a dyn ReconStore,
    window: &'a Window,
    thresholds: &'a Thresholds,
    deltas: Vec<Delta>,
    skipped: Vec<RuleSkip>,
}

impl<'a> Classifier<'a> {
    fn emit(&mut self, kind: DeltaKind, scope: &str, amount: Micros, reason_code: String, confidence: f64) {
        let delta = Delta {
            kind,
            amount: amount.non_negative(),
            currency: REPORT_CURRENCY.to_string(),
            reason_code,
            window_start: self.window.from,
            window_end: self.window.to,
            evidence_id: evidence_id(kind, self.window, scope),
            confidence,
        };
        debug!(
            "delta kind={} amount={} evidence_id={} confidence={:.4}",
            delta.kind, delta.amount, delta.evidence_id, delta.confidence
        );
        self.deltas.push(delta);
    }

    fn skip(&mut self, rule: DeltaKind, scope: Option<&str>, reason: &str) {
        debug!("rule {rule} skipped for {}: {reason}", self.window);
        self.skipped.push(RuleSkip {
            rule,
            scope: scope.map(str::to_string),
            reason: reason.to_string(),
        });
    }

    /// Run one rule query; a failure is logged and skips the rule.
    fn query<T>(&mut self, rule: DeltaKind, result: Result<T, StoreError>) -> Option<T> {
        match result {
            Ok(v) => Some(v),
            Err(e) => {
                warn!("rule {rule} skipped for {}: {e}", self.window);
                self.skipped.push(RuleSkip {
                    rule,
                    scope: None,
                    reason: SKIP_QUERY_FAILED.to_string(),
                });
                None
            }
        }
    }

    fn gap_rules(&mut self, amounts: &WindowAmounts) {
        if amounts.timing_lag.is_positive() {
            self.emit(
                DeltaKind::TimingLag,
                "",
                amounts.timing_lag,
                format!(
                    "timing_lag unmatched={} gap={}",
                    amounts.unmatched, amounts.gap
                ),
                TIMING_LAG_CONFIDENCE,
            );
        }

        let tolerance = amounts.expected.scale(self.thresholds.underpay_tolerance);
        if amounts.residual > tolerance {
            self.emit(
                DeltaKind::Underpay,
                "",
                amounts.residual,
                format!("underpay residual={} tolerance={}", amounts.residual, tolerance),
                confidence(UNDERPAY_BASE, amounts.residual.as_f64(), tolerance.as_f64()),
            );
        }
    }

    fn ivt_rule(&mut self) {
        let rule = DeltaKind::IvtOutlier;
        let baseline_window = self.window.baseline(self.thresholds.baseline_days);
        let Some(daily) = self.query(rule, self.store.daily_ivt_ratios(&baseline_window)) else {
            return;
        };
        let ratios: Vec<f64> = daily.iter().map(|d| d.ratio).collect();
        let Some(baseline_p95) = p95(&ratios) else {
            self.skip(rule, None, SKIP_BASELINE_EMPTY);
            return;
        };

        let Some(totals) = self.query(rule, self.store.ivt_totals(self.window)) else {
            return;
        };
        let Some(current) = totals.ivt.ratio(totals.paid).filter(|_| totals.paid.is_positive()) else {
            self.skip(rule, None, SKIP_NO_WINDOW_DATA);
            return;
        };

        let limit = baseline_p95 + self.thresholds.ivt_band;
        if current - limit > EPS {
            let excess = totals.ivt - totals.paid.scale(limit);
            self.emit(
                rule,
                "",
                excess,
                format!(
                    "ivt_outlier ratio={current:.6} p95={baseline_p95:.6} band={:.6}",
                    self.thresholds.ivt_band
                ),
                confidence(IVT_BASE, current, limit),
            );
        }
    }

    fn fx_rule(&mut self) {
        let rule = DeltaKind::FxMismatch;
        let baseline_window = self.window.baseline(self.thresholds.baseline_days);
        let Some(daily) = self.query(rule, self.store.daily_fx_rates(&baseline_window)) else {
            return;
        };
        let Some(current) = self.query(rule, self.store.window_fx_rates(self.window)) else {
            return;
        };
        if current.is_empty() {
            self.skip(rule, None, SKIP_NO_WINDOW_DATA);
            return;
        }

        let mut history: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for obs in daily {
            history.entry(obs.currency.to_ascii_uppercase()).or_default().push(obs.rate);
        }

        for cur in current {
            let code = cur.currency.to_ascii_uppercase();
            let baseline_median = history.get(&code).and_then(|rates| median(rates));
            let Some(baseline_median) = baseline_median.filter(|m| *m > 0.0) else {
                self.skip(rule, Some(&code), SKIP_BASELINE_EMPTY);
                continue;
            };
            if !cur.avg_rate.is_finite() {
                self.skip(rule, Some(&code), SKIP_NO_WINDOW_DATA);
                continue;
            }

            let deviation = (cur.avg_rate - baseline_median).abs() / baseline_median;
            let band = self.thresholds.fx_band;
            if deviation - band > EPS {
                self.emit(
                    rule,
                    &code,
                    cur.revenue_usd.scale(deviation),
                    format!(
                        "fx_mismatch currency={code} rate={:.6} median={baseline_median:.6} deviation={deviation:.6} band={band:.6}",
                        cur.avg_rate
                    ),
                    confidence(FX_BASE, deviation, band),
                );
            }
        }
    }

    fn viewability_rule(&mut self, expected: Micros) {
        let rule = DeltaKind::ViewabilityGap;
        let Some(sample) = self.query(rule, self.store.window_viewability(self.window)) else {
            return;
        };
        let Some(sample) = sample else {
            self.skip(rule, None, SKIP_NO_WINDOW_DATA);
            return;
        };

        let gap = (sample.om_viewable_pct - sample.statement_viewable_pct).abs();
        let limit = self.thresholds.viewability_gap_pp;
        if gap - limit > EPS {
            self.emit(
                rule,
                "",
                expected.scale(gap / 100.0),
                format!(
                    "viewability_gap om={:.2} statement={:.2} gap_pp={gap:.2} threshold_pp={limit:.2} samples={}",
                    sample.om_viewable_pct, sample.statement_viewable_pct, sample.samples
                ),
                confidence(VIEWABILITY_BASE, gap, limit),
            );
        }
    }
}

/// Classify one window and, unless `flags.dry_run`, persist the deltas.
///
/// Totals and the final insert are fatal on failure. The statistical rules
/// only ever skip themselves.
pub fn reconcile_window(
    store: &dyn ReconStore,
    window: &Window,
    thresholds: &Thresholds,
    caps: &Caps,
    flags: &RunFlags,
) -> Result<ReconcileOutcome, ReconError> {
    caps.admit(window, flags)?;
    let redactor = Redactor::new()?;

    let expected = store.expected_usd(window)?;
    if !expected.is_positive() {
        info!("reconcile window={window}: no expected revenue, nothing to do");
        return Ok(ReconcileOutcome {
            window: *window,
            dry_run: flags.dry_run,
            noop: true,
            inserted: 0,
            deltas: Vec::new(),
            amounts: WindowAmounts {
                expected,
                ..WindowAmounts::default()
            },
            skipped_rules: Vec::new(),
        });
    }
    let paid = store.paid_usd(window)?;
    let unmatched = store.unmatched_usd(window)?;
    let amounts = WindowAmounts::compute(expected, paid, unmatched);

    let mut classifier = Classifier {
        store,
        window,
        thresholds,
        deltas: Vec::new(),
        skipped: Vec::new(),
    };
    classifier.gap_rules(&amounts);
    classifier.ivt_rule();
    classifier.fx_rule();
    classifier.viewability_rule(expected);

    let Classifier { deltas, skipped, .. } = classifier;

    let inserted = if flags.dry_run || deltas.is_empty() {
        0
    } else {
        store.insert_deltas(&deltas)?
    };

    info!(
        "reconcile window={window} expected={} paid={} unmatched={} deltas={} inserted={inserted} skipped_rules={} dry_run={}",
        amounts.expected,
        amounts.paid,
        amounts.unmatched,
        deltas.len(),
        skipped.len(),
        flags.dry_run
    );

    ReconcileOutcome {
        window: *window,
        dry_run: flags.dry_run,
        noop: false,
        inserted,
        deltas,
        amounts,
        skipped_rules: skipped,
    }
    .redacted(&redactor)
}
