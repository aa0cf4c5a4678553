/// Computes the arithmetic mean of a slice of values. Returns `None` for empty input.
pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

/// Lower nearest-rank percentile: sorts ascending and picks index
/// `floor(q * (n - 1))`. Returns `None` for empty input.
pub fn percentile_floor(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);

    let k = (q * (sorted.len() - 1) as f64).floor().max(0.0) as usize;
    Some(sorted[k.min(sorted.len() - 1)])
}

/// Rounds to two decimal places.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}
