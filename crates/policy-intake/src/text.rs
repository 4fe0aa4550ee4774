//! Small text normalisation helpers shared by the extractors.

use unicode_normalization::UnicodeNormalization;

/// Lowercases and strips diacritics so that `"Póliza"` and `"poliza"`
/// compare equal. Whitespace runs collapse to a single space.
pub fn fold(text: &str) -> String {
    let stripped: String = text
        .nfd()
        .filter(|c| !unicode_normalization::char::is_combining_mark(*c))
        .collect::<String>()
        .to_lowercase();
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Parses a currency amount as printed on a document (`"$12,500.00"`,
/// `"12500"`, `"MXN 1,200.5"`). Thousands separators must be commas.
pub fn parse_amount(raw: &str) -> Option<f64> {
    let cleaned: String = raw
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.' || *c == '-')
        .collect();
    if cleaned.is_empty() || cleaned == "." || cleaned == "-" {
        return None;
    }
    let value = cleaned.parse::<f64>().ok()?;
    value.is_finite().then_some(value)
}
