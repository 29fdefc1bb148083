//! Evidence CSV embedded in dispute kits.
//!
//! Output is deterministic: rows sorted by (kind, window_start, evidence_id),
//! amounts at fixed 6 decimals, `\n` terminators. Callers pass deltas whose
//! free text has already been redacted.

use std::io::Write;

use vra_core::{format_ts, Delta};

/// Column order of `evidence.csv`.
pub const EVIDENCE_HEADER: &[&str] = &[
    "evidence_id",
    "kind",
    "window_start",
    "window_end",
    "amount",
    "currency",
    "confidence",
    "reason_code",
];

pub fn write_evidence_csv(deltas: &[Delta], writer: impl Write) -> Result<(), csv::Error> {
    let mut sorted: Vec<&Delta> = deltas.iter().collect();
    sorted.sort_by(|a, b| {
        a.kind
            .as_str()
            .cmp(b.kind.as_str())
            .then_with(|| a.window_start.cmp(&b.window_start))
            .then_with(|| a.evidence_id.cmp(&b.evidence_id))
    });

    let mut csv = csv::WriterBuilder::new()
        .terminator(csv::Terminator::Any(b'\n'))
        .from_writer(writer);

    csv.write_record(EVIDENCE_HEADER)?;
    for d in sorted {
        csv.write_record(&[
            d.evidence_id.clone(),
            d.kind.as_str().to_string(),
            format_ts(&d.window_start),
            format_ts(&d.window_end),
            d.amount.to_string(),
            d.currency.clone(),
            format!("{:.4}", d.confidence),
            d.reason_code.clone(),
        ])?;
    }
    csv.flush()?;
    Ok(())
}

/// Render to a `String`.
pub fn evidence_csv_string(deltas: &[Delta]) -> Result<String, csv::Error> {
    let mut buf = Vec::new();
    write_evidence_csv(deltas, &mut buf)?;
    // The writer only ever emits the UTF-8 it was given.
    Ok(String::from_utf8_lossy(&buf).into_owned())
}
