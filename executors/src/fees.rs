//! Fee escalation for retried submissions.
//!
//! The multiplier is computed in f64 and the scaled fee truncated afterwards,
//! so `20 gwei × 1.2²` lands on exactly `28.8 gwei`. Fees above 2^53 wei lose
//! precision in the conversion; real fee values sit far below that.

/// `min(factor^retry_count, max_multiplier)`
pub fn gas_multiplier(retry_count: u32, escalation_factor: f64, max_multiplier: f64) -> f64 {
    let exponent = i32::try_from(retry_count).unwrap_or(i32::MAX);
    escalation_factor.powi(exponent).min(max_multiplier)
}

/// `floor(fee × multiplier)`
pub fn scale_fee(fee: u128, multiplier: f64) -> u128 {
    (fee as f64 * multiplier).floor() as u128
}
