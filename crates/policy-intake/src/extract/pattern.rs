//! Label- and pattern-based field extraction.
//!
//! Each field is looked up in three steps: a form key matching one of the
//! field's labels, then a field-specific pattern over the page text, then a
//! fixed default. Labels are compared diacritic- and case-insensitively and
//! must start at a word boundary of the key.

use std::sync::LazyLock;

use async_trait::async_trait;
use regex::Regex;
use tracing::debug;

use super::structures::RecognizedDocument;
use super::{Extraction, ExtractError, FieldExtractor};
use crate::document::{normalize_confidence, FieldName, PolicyType};
use crate::renewal::{format_date, parse_policy_date};
use crate::text::{fold, parse_amount};

static POLICY_NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b[A-Z0-9]{2,5}[-/][A-Z0-9\-]{4,20}\b").unwrap());
static DATE_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(?:\d{4}-\d{2}-\d{2}|\d{1,2}[/\-]\d{1,2}[/\-]\d{2,4})\b").unwrap()
});
static AMOUNT_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[\d,]+\.\d{2}").unwrap());
static CURRENCY_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\b(?:MXN|USD|EUR)\b").unwrap());

/// Confidence for a pattern match whose source line cannot be identified.
const UNLOCATED_CONFIDENCE: f64 = 0.5;
/// Confidence for a field filled from its default.
const DEFAULT_CONFIDENCE: f64 = 1.0;

struct FieldRule {
    field: FieldName,
    /// Folded labels, most specific first.
    labels: &'static [&'static str],
    /// Keys containing any of these are never used for the field.
    exclude: &'static [&'static str],
    pattern: Option<&'static LazyLock<Regex>>,
    /// Which match of `pattern` to take.
    occurrence: usize,
    default: Option<&'static str>,
}

static RULES: [FieldRule; 8] = [
    FieldRule {
        field: FieldName::PolicyNumber,
        labels: &[
            "numero de poliza",
            "num. poliza",
            "no. poliza",
            "no poliza",
            "poliza no",
            "poliza",
        ],
        exclude: &["tipo", "vigencia"],
        pattern: Some(&POLICY_NUMBER_RE),
        occurrence: 0,
        default: None,
    },
    FieldRule {
        field: FieldName::InsuredName,
        labels: &[
            "nombre del asegurado",
            "nombre del contratante",
            "asegurado",
            "contratante",
            "titular",
            "nombre",
        ],
        exclude: &["aseguradora", "compania"],
        pattern: None,
        occurrence: 0,
        default: None,
    },
    FieldRule {
        field: FieldName::PolicyType,
        labels: &["tipo de seguro", "tipo de poliza", "ramo", "producto", "plan"],
        exclude: &[],
        pattern: None,
        occurrence: 0,
        default: None,
    },
    FieldRule {
        field: FieldName::Insurer,
        labels: &["empresa emisora", "aseguradora", "compania", "cia"],
        exclude: &[],
        pattern: None,
        occurrence: 0,
        default: None,
    },
    FieldRule {
        field: FieldName::StartDate,
        labels: &[
            "inicio de vigencia",
            "vigencia desde",
            "fecha de inicio",
            "fecha inicio",
            "vigencia de",
            "desde",
            "inicio",
        ],
        exclude: &[],
        pattern: Some(&DATE_RE),
        occurrence: 0,
        default: None,
    },
    FieldRule {
        field: FieldName::EndDate,
        labels: &[
            "fin de vigencia",
            "vigencia hasta",
            "vigencia al",
            "fecha de fin",
            "fecha fin",
            "vencimiento",
            "expiraci",
            "hasta",
            "fin",
        ],
        exclude: &[],
        pattern: Some(&DATE_RE),
        occurrence: 1,
        default: None,
    },
    FieldRule {
        field: FieldName::PremiumTotal,
        labels: &[
            "prima total",
            "total a pagar",
            "importe total",
            "prima neta",
            "prima",
        ],
        exclude: &[],
        pattern: Some(&AMOUNT_RE),
        occurrence: 0,
        default: None,
    },
    FieldRule {
        field: FieldName::Currency,
        labels: &["moneda", "currency", "divisa"],
        exclude: &[],
        pattern: Some(&CURRENCY_RE),
        occurrence: 0,
        default: Some("MXN"),
    },
];

/// Whether `label` occurs in `key` starting at a word boundary.
fn has_label(key: &str, label: &str) -> bool {
    key.match_indices(label).any(|(idx, _)| {
        key[..idx]
            .chars()
            .next_back()
            .map_or(true, |c| !c.is_alphanumeric())
    })
}

/// Normalizes a raw value for its field. Returns `None` when nothing usable
/// remains.
fn normalize_value(field: FieldName, raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    let value = match field {
        FieldName::StartDate | FieldName::EndDate | FieldName::RenewalDate => {
            let candidate = DATE_RE.find(raw).map(|m| m.as_str()).unwrap_or(raw);
            parse_policy_date(candidate)
                .map(format_date)
                .unwrap_or_else(|| raw.to_string())
        }
        FieldName::PremiumTotal => {
            let candidate = AMOUNT_RE.find(raw).map(|m| m.as_str()).unwrap_or(raw);
            format!("{:.2}", parse_amount(candidate)?)
        }
        FieldName::Currency => {
            let folded = fold(raw);
            if let Some(code) = CURRENCY_RE.find(&raw.to_uppercase()) {
                code.as_str().to_string()
            } else if folded.contains("peso") {
                "MXN".to_string()
            } else if folded.contains("dolar") {
                "USD".to_string()
            } else if folded.contains("euro") {
                "EUR".to_string()
            } else {
                raw.to_uppercase()
            }
        }
        FieldName::PolicyType => PolicyType::from_label(raw)
            .map(|t| t.as_str().to_string())
            .unwrap_or_else(|| raw.to_string()),
        _ => raw.to_string(),
    };
    Some(value)
}

pub struct PatternExtractor;

impl PatternExtractor {
    pub fn new() -> Self {
        Self
    }

    fn from_pairs(rule: &FieldRule, document: &RecognizedDocument) -> Option<(String, f64)> {
        let keys: Vec<String> = document.pairs.iter().map(|p| fold(&p.key)).collect();
        for label in rule.labels {
            for (pair, key) in document.pairs.iter().zip(&keys) {
                if rule.exclude.iter().any(|ex| key.contains(ex)) || !has_label(key, label) {
                    continue;
                }
                if let Some(value) = normalize_value(rule.field, &pair.value) {
                    return Some((value, pair.confidence));
                }
            }
        }
        None
    }

    fn from_text(
        rule: &FieldRule,
        document: &RecognizedDocument,
        text: &str,
    ) -> Option<(String, f64)> {
        let pattern: &Regex = rule.pattern?;
        let dates: Vec<_> = if rule.field == FieldName::PolicyNumber {
            DATE_RE.find_iter(text).map(|m| m.range()).collect()
        } else {
            Vec::new()
        };
        // Policy numbers never overlap a date.
        let found = pattern
            .find_iter(text)
            .filter(|m| !dates.iter().any(|d| m.start() < d.end && d.start < m.end()))
            .nth(rule.occurrence)?;
        let value = normalize_value(rule.field, found.as_str())?;
        let confidence = document
            .lines
            .iter()
            .find(|line| line.text.contains(found.as_str()))
            .map(|line| line.confidence)
            .unwrap_or(UNLOCATED_CONFIDENCE);
        Some((value, confidence))
    }

    /// Runs every field rule over a recognized document.
    pub fn extract_fields(&self, document: &RecognizedDocument) -> Extraction {
        let text = document
            .lines
            .iter()
            .map(|l| l.text.as_str())
            .collect::<Vec<_>>()
            .join(" ");

        let mut extraction = Extraction::default();
        for rule in &RULES {
            let found = Self::from_pairs(rule, document)
                .map(|hit| (hit, "label"))
                .or_else(|| Self::from_text(rule, document, &text).map(|hit| (hit, "pattern")))
                .or_else(|| {
                    rule.default
                        .map(|d| ((d.to_string(), DEFAULT_CONFIDENCE), "default"))
                });

            let Some(((value, confidence), source)) = found else {
                continue;
            };
            if extraction.fields.set_text(rule.field, &value).is_ok() {
                debug!(field = %rule.field, source, confidence, "field extracted");
                extraction
                    .confidence
                    .insert(rule.field, normalize_confidence(confidence));
            }
        }
        extraction
    }
}

impl Default for PatternExtractor {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl FieldExtractor for PatternExtractor {
    fn name(&self) -> &'static str {
        "pattern"
    }

    async fn extract(&self, document: &RecognizedDocument) -> Result<Extraction, ExtractError> {
        Ok(self.extract_fields(document))
    }
}
