//! Transformer: turns a located numeral into its canonical output text.

/// Every relayed numeral is divided by this rate.
pub const DIVISOR: f64 = 3.63;

/// 2^53: above this every `f64` is an even integer.
const EXACT_INT_LIMIT: f64 = 9_007_199_254_740_992.0;

/// `value / 3.63`, rounded half away from zero to two decimals and printed
/// with exactly two fractional digits (`2000.00`, `-4.27`, `0.00`).
///
/// `None` only for a non-finite `value`; dividing a finite value by 3.63
/// cannot overflow.
pub fn transform(value: f64) -> Option<String> {
    format_cents(value / DIVISOR)
}

/// Round `x` half away from zero at two decimals and print it.
///
/// Rounding is done on the exact binary value of `x`, so the output always
/// reparses to a double that rounds back to the same text.
pub fn format_cents(x: f64) -> Option<String> {
    if !x.is_finite() {
        return None;
    }

    // A double sits exactly on a cent midpoint only when its fraction is an
    // odd number of eighths (.125, .375, .625, .875). `{:.2}` breaks those
    // ties to even, so they are rounded here on the integer eighths.
    let eighths = x.abs() * 8.0;
    if eighths < EXACT_INT_LIMIT && eighths.fract() == 0.0 && eighths % 2.0 == 1.0 {
        let cents = (eighths as u64 as u128 * 25 + 1) / 2;
        let sign = if x < 0.0 { "-" } else { "" };
        return Some(format!("{sign}{}.{:02}", cents / 100, cents % 100));
    }

    let out = format!("{x:.2}");
    // Avoid printing "-0.00".
    if out == "-0.00" {
        return Some("0.00".to_string());
    }
    Some(out)
}
