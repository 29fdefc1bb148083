//! `vra ingest`, `build-expected`, `match`, and `reconcile`.

use std::io::Read;
use std::path::Path;

use serde::Serialize;

use vra_core::{ReconStore, StatementStore, Window};
use vra_recon::{
    build_expected, fetch_limit, ingest, match_statements, reconcile_window, within_limit, ExpectedSources,
    IngestRequest, MatchOutput, RunFlags,
};

use crate::{window, CliError, Context, WindowArgs};

/// Row errors echoed to stderr; the JSON result carries all of them.
const SHOWN_ROW_ERRORS: usize = 5;

const ROW_LIMIT_HINT: &str = "narrow the window, or raise --limit with --force --yes";

fn read_input(file: &Path) -> Result<String, CliError> {
    if file.as_os_str() == "-" {
        let mut text = String::new();
        std::io::stdin()
            .read_to_string(&mut text)
            .map_err(|e| CliError::fatal(format!("cannot read stdin: {e}")))?;
        return Ok(text);
    }
    std::fs::read_to_string(file)
        .map_err(|e| CliError::fatal(format!("cannot read {}: {e}", file.display())))
}

// ---------------------------------------------------------------------------
// ingest
// ---------------------------------------------------------------------------

pub fn cmd_ingest(
    ctx: &Context,
    network: &str,
    schema_version: &str,
    load_id: &str,
    report_id: &str,
    file: &Path,
) -> Result<(), CliError> {
    let csv = read_input(file)?;
    let store = ctx.open_store()?;
    let outcome = ingest(
        &store,
        &ctx.settings.ingest,
        &IngestRequest {
            network,
            schema_version,
            load_id,
            report_id,
            csv: &csv,
        },
    )?;
    ctx.emit(&outcome)?;

    if outcome.skipped {
        for err in outcome.row_errors.iter().take(SHOWN_ROW_ERRORS) {
            eprintln!("  line {}: {}", err.line, err.message);
        }
        let reason = outcome.reason.as_deref().unwrap_or("skipped");
        return Err(CliError::warning(format!("{network} load {load_id}/{report_id} not ingested: {reason}")));
    }

    eprintln!(
        "ingested {} rows from {network} (schema {}), {} rejected",
        outcome.normalized_rows,
        outcome.schema_version.as_deref().unwrap_or(schema_version),
        outcome.row_errors.len(),
    );
    for err in outcome.row_errors.iter().take(SHOWN_ROW_ERRORS) {
        eprintln!("  line {}: {}", err.line, err.message);
    }

    if !outcome.row_errors.is_empty() {
        return Err(CliError::warning(format!("{} malformed rows skipped", outcome.row_errors.len())));
    }
    if outcome.normalized_rows == 0 {
        return Err(CliError::warning("statement contained no rows"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// build-expected
// ---------------------------------------------------------------------------

pub fn cmd_build_expected(
    ctx: &Context,
    window_args: &WindowArgs,
    flags: RunFlags,
    metrics: bool,
) -> Result<(), CliError> {
    let window = window::resolve(window_args)?;
    let store = ctx.open_store()?;
    let sources = ExpectedSources {
        receipts: &store,
        events: &store,
        recon: &store,
    };
    let outcome = build_expected(sources, &window, &ctx.settings.caps, &flags, metrics)?;
    ctx.emit(&outcome)?;

    eprintln!(
        "build-expected {window}: {} receipts, {} written, {} skipped{}",
        outcome.seen,
        outcome.written,
        outcome.skipped,
        if outcome.dry_run { " (dry run)" } else { "" },
    );
    if let Some(m) = &outcome.metrics {
        eprintln!(
            "  joined {}, unjoined {}, expected total {} USD, {} ms",
            m.joined, m.unjoined, m.expected_total, m.elapsed_ms
        );
    }

    if outcome.truncated {
        return Err(CliError::warning(format!(
            "window holds more receipts than the row limit; only {} processed",
            outcome.seen
        ))
        .with_hint(ROW_LIMIT_HINT));
    }
    if outcome.dry_run {
        return Err(CliError::warning("dry run: nothing written"));
    }
    if outcome.written == 0 {
        return Err(CliError::warning("no expected rows written"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// match
// ---------------------------------------------------------------------------

#[derive(Serialize)]
struct MatchReport<'a> {
    window: &'a Window,
    statements: usize,
    expected: usize,
    auto: usize,
    review: usize,
    unmatched: usize,
    unclaimed_expected: usize,
    /// Statement or expected rows past the row limit were left out.
    truncated: bool,
    results: &'a MatchOutput,
}

pub fn cmd_match(ctx: &Context, window_args: &WindowArgs, flags: RunFlags) -> Result<(), CliError> {
    let window = window::resolve(window_args)?;
    let limit = ctx.settings.caps.admit(&window, &flags)?;
    let store = ctx.open_store()?;

    let (statements, statements_cut) = within_limit(store.statements_in(&window, fetch_limit(limit))?, limit);
    let reach = window::candidate_window(&window, ctx.settings.matching.time_window_sec);
    let (expected, expected_cut) = within_limit(store.expected_in(&reach, fetch_limit(limit))?, limit);
    let truncated = statements_cut || expected_cut;

    let output = match_statements(&statements, &expected, &ctx.settings.matching);
    let (auto, review, unmatched) = output.counts();
    ctx.emit(&MatchReport {
        window: &window,
        statements: statements.len(),
        expected: expected.len(),
        auto,
        review,
        unmatched,
        unclaimed_expected: output.unclaimed_expected,
        truncated,
        results: &output,
    })?;

    eprintln!(
        "match {window}: {} statement rows vs {} expected: {auto} auto, {review} review, {unmatched} unmatched ({} expected unclaimed)",
        statements.len(),
        expected.len(),
        output.unclaimed_expected,
    );

    if statements.is_empty() {
        return Err(CliError::warning("no statement rows in window").with_hint("run `vra ingest` first"));
    }
    if truncated {
        return Err(CliError::warning(format!(
            "more than {limit} rows in window; buckets cover only the first {limit}"
        ))
        .with_hint(ROW_LIMIT_HINT));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// reconcile
// ---------------------------------------------------------------------------

pub fn cmd_reconcile(ctx: &Context, window_args: &WindowArgs, flags: RunFlags) -> Result<(), CliError> {
    let window = window::resolve(window_args)?;
    let store = ctx.open_store()?;
    let outcome = reconcile_window(&store, &window, &ctx.settings.thresholds, &ctx.settings.caps, &flags)?;
    ctx.emit(&outcome)?;

    if outcome.noop {
        return Err(CliError::warning(format!("no expected revenue in {window}"))
            .with_hint("run `vra build-expected` for the window first"));
    }

    let a = &outcome.amounts;
    eprintln!(
        "reconcile {window}: expected {} paid {} gap {} timing lag {} residual {}",
        a.expected, a.paid, a.gap, a.timing_lag, a.residual
    );
    for d in &outcome.deltas {
        eprintln!(
            "  {:<16} {:>14} {} conf={:.2} {} {}",
            d.kind.as_str(),
            d.amount.to_string(),
            d.currency,
            d.confidence,
            d.evidence_id,
            d.reason_code,
        );
    }
    for skip in &outcome.skipped_rules {
        match &skip.scope {
            Some(scope) => eprintln!("  skipped {} [{scope}]: {}", skip.rule, skip.reason),
            None => eprintln!("  skipped {}: {}", skip.rule, skip.reason),
        }
    }

    if outcome.dry_run {
        return Err(CliError::warning(format!("dry run: {} deltas not written", outcome.deltas.len())));
    }
    if outcome.inserted == 0 {
        return Err(CliError::warning("no new deltas"));
    }
    eprintln!("{} deltas written", outcome.inserted);
    Ok(())
}
