//! Baseline statistics for the classifier.
//!
//! Non-finite samples are dropped before any computation.

fn finite_sorted(values: &[f64]) -> Vec<f64> {
    let mut v: Vec<f64> = values.iter().copied().filter(|x| x.is_finite()).collect();
    v.sort_by(f64::total_cmp);
    v
}

/// Nearest-rank percentile: the smallest sample such that at least `p`
/// percent of samples are ≤ it. `None` for an empty set.
pub fn percentile_nearest_rank(values: &[f64], p: f64) -> Option<f64> {
    let v = finite_sorted(values);
    if v.is_empty() {
        return None;
    }
    let p = p.clamp(0.0, 100.0);
    let rank = ((p / 100.0) * v.len() as f64).ceil() as usize;
    Some(v[rank.clamp(1, v.len()) - 1])
}

pub fn p95(values: &[f64]) -> Option<f64> {
    percentile_nearest_rank(values, 95.0)
}

/// Middle sample, or the mean of the middle pair for an even count.
pub fn median(values: &[f64]) -> Option<f64> {
    let v = finite_sorted(values);
    let n = v.len();
    match n {
        0 => None,
        _ if n % 2 == 1 => Some(v[n / 2]),
        _ => Some((v[n / 2 - 1] + v[n / 2]) / 2.0),
    }
}
