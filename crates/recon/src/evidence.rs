use vra_core::{format_ts, DeltaKind, Window};

/// Deterministic evidence id for one delta of one window.
///
/// `scope` separates several deltas of the same kind in one window (the
/// currency for FX mismatches) and is empty otherwise. Re-running a window
/// yields the same id, which is what makes delta inserts conflict-ignore.
pub fn evidence_id(kind: DeltaKind, window: &Window, scope: &str) -> String {
    let input = format!(
        "{}|{}|{}|{}",
        kind.as_str(),
        format_ts(&window.from),
        format_ts(&window.to),
        scope
    );
    let hex = blake3::hash(input.as_bytes()).to_hex();
    format!("ev_{}", &hex[..24])
}
