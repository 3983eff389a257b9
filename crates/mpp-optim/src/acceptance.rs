/// Metropolis-Hastings acceptance probability for an energy change `delta`
/// at `temperature` with proposal ratio `ratio`.
///
/// Improvements (`delta <= 0`) are accepted with `min(1, ratio)`; otherwise
/// `min(1, ratio * exp(-delta / temperature))`. A non-positive temperature
/// rejects every strict increase, and a NaN `delta` is never accepted.
pub fn acceptance_probability(delta: f64, temperature: f64, ratio: f64) -> f64 {
    if delta.is_nan() {
        return 0.0;
    }
    let ratio = if ratio.is_nan() { 0.0 } else { ratio.max(0.0) };
    if delta <= 0.0 {
        return ratio.min(1.0);
    }
    if !(temperature > 0.0) {
        return 0.0;
    }
    (ratio * (-delta / temperature).exp()).min(1.0)
}

/// Accepts when a uniform draw in `[0, 1)` falls below `probability`.
pub fn accept(probability: f64, draw: f64) -> bool {
    draw < probability
}
