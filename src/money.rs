//! Conversions between decimal amounts and the provider's integer minor units.

use once_cell::sync::Lazy;
use rust_decimal::Decimal;
use std::collections::HashMap;

const ZERO_DECIMAL: [&str; 16] = [
    "BIF", "CLP", "DJF", "GNF", "ISK", "JPY", "KMF", "KRW", "PYG", "RWF", "UGX", "VND", "VUV",
    "XAF", "XOF", "XPF",
];
const THREE_DECIMAL: [&str; 7] = ["BHD", "IQD", "JOD", "KWD", "LYD", "OMR", "TND"];

static EXPONENTS: Lazy<HashMap<&'static str, u32>> = Lazy::new(|| {
    ZERO_DECIMAL
        .iter()
        .map(|code| (*code, 0))
        .chain(THREE_DECIMAL.iter().map(|code| (*code, 3)))
        .collect()
});

/// Trims and uppercases `raw`; blank or missing input yields `default`.
pub fn normalize_currency(raw: Option<&str>, default: &str) -> String {
    match raw.map(str::trim).filter(|code| !code.is_empty()) {
        Some(code) => code.to_ascii_uppercase(),
        None => default.trim().to_ascii_uppercase(),
    }
}

/// Number of fractional digits the provider uses for `currency`.
pub fn currency_exponent(currency: &str) -> u32 {
    EXPONENTS
        .get(currency.trim().to_ascii_uppercase().as_str())
        .copied()
        .unwrap_or(2)
}

pub fn from_minor_units(amount_minor: i64, currency: &str) -> Decimal {
    Decimal::new(amount_minor, currency_exponent(currency))
}

/// Converts to minor units. Returns `None` when the amount has more
/// precision than the currency allows or does not fit in an `i64`.
pub fn to_minor_units(amount: Decimal, currency: &str) -> Option<i64> {
    let exponent = currency_exponent(currency);
    let scaled = amount.checked_mul(Decimal::from(10i64.pow(exponent)))?;
    if scaled.fract() != Decimal::ZERO {
        return None;
    }
    i64::try_from(scaled.trunc()).ok()
}
