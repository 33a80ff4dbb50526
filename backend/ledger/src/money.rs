/// Rounds to two decimals, half away from zero.
pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Formats an amount the way notifications print money.
pub fn cents(value: f64) -> String {
    format!("{value:.2}")
}
