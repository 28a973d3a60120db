use bigdecimal::BigDecimal;
use std::str::FromStr;

/// Converts a provider amount to a two-decimal `BigDecimal`.
///
/// Going through the formatted string rounds to the nearest cent instead of
/// carrying the binary expansion of the float, so `19.99` stays `19.99` and
/// exact-equality matching between records works.
pub fn amount_from_provider(value: f64) -> BigDecimal {
    BigDecimal::from_str(&format!("{:.2}", value)).unwrap_or_else(|_| BigDecimal::from(0))
}
