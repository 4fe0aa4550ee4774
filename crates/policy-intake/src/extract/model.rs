//! Language-model field extraction.
//!
//! The page text is sent with a fixed instruction prompt and the reply must be
//! a single JSON object of the form `{"fields": {..}, "confidence": {..}}`.
//! Values the model returns are checked against the same closed vocabularies
//! the pattern extractor produces; anything outside them is kept and flagged.

use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, warn};

use super::llm::CompletionClient;
use super::structures::RecognizedDocument;
use super::{Extraction, ExtractError, FieldExtractor};
use crate::document::{normalize_confidence, FieldName, PolicyType};
use crate::renewal::{format_date, parse_policy_date};
use crate::sanitize::snippet;
use crate::text::parse_amount;

const SYSTEM_PROMPT: &str = "\
You extract data from insurance policy documents.
Reply with one JSON object and nothing else, shaped as
{\"fields\": {...}, \"confidence\": {...}}.
Allowed field keys: policyNumber, insuredName, policyType, insurer, startDate,
endDate, premiumTotal, currency.
policyType must be one of: auto, life, permanent_life, major_medical,
minor_medical, home, property, liability, travel, business, other.
Dates use the format YYYY-MM-DD. premiumTotal is a plain number without
currency symbols or thousands separators. currency is MXN, USD or EUR.
confidence maps each returned field key to a number between 0 and 1.
Omit fields that do not appear in the document.";

const CURRENCIES: [&str; 3] = ["MXN", "USD", "EUR"];

#[derive(Debug, Deserialize)]
struct ModelReply {
    #[serde(default)]
    fields: Map<String, Value>,
    #[serde(default)]
    confidence: Map<String, Value>,
}

/// Removes a surrounding Markdown code fence, if any.
pub fn strip_code_fence(reply: &str) -> &str {
    let trimmed = reply.trim();
    if !trimmed.starts_with("```") {
        return trimmed;
    }
    let body = match trimmed.find('\n') {
        Some(idx) => &trimmed[idx + 1..],
        None => return "",
    };
    match body.rfind("```") {
        Some(idx) => body[..idx].trim(),
        None => body.trim(),
    }
}

pub struct ModelExtractor {
    client: Arc<dyn CompletionClient>,
    required_fields: Vec<FieldName>,
}

impl ModelExtractor {
    pub fn new(client: Arc<dyn CompletionClient>, required_fields: Vec<FieldName>) -> Self {
        Self {
            client,
            required_fields,
        }
    }

    /// Interprets a raw model reply.
    pub fn parse_reply(&self, reply: &str) -> Result<Extraction, ExtractError> {
        let body = strip_code_fence(reply);
        let parsed: ModelReply =
            serde_json::from_str(body).map_err(|e| ExtractError::MalformedResponse {
                reason: e.to_string(),
                snippet: snippet(body),
            })?;

        let mut extraction = Extraction::default();
        for (key, value) in &parsed.fields {
            let name = match key.parse::<FieldName>() {
                Ok(FieldName::RenewalDate) => continue,
                Ok(name) => name,
                Err(_) => {
                    debug!(key = %key, "ignoring unknown field from model");
                    continue;
                }
            };

            let Some(accepted) = Self::accept_value(&mut extraction, name, value) else {
                continue;
            };
            if extraction.fields.set_text(name, &accepted).is_err() {
                extraction.flag(name);
                continue;
            }

            let confidence = parsed
                .confidence
                .get(key)
                .and_then(Value::as_f64)
                .unwrap_or(0.0);
            extraction
                .confidence
                .insert(name, normalize_confidence(confidence));
        }

        for name in &self.required_fields {
            if !extraction.fields.is_present(*name) {
                extraction.flag(*name);
            }
        }
        Ok(extraction)
    }

    /// Canonicalizes a returned value, flagging it when it falls outside the
    /// field's vocabulary. Returns `None` when there is nothing to store.
    fn accept_value(extraction: &mut Extraction, name: FieldName, value: &Value) -> Option<String> {
        let raw = match value {
            Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
            Value::Number(n) => n.to_string(),
            Value::Null | Value::String(_) => return None,
            other => {
                extraction.flag(name);
                debug!(field = %name, kind = ?other, "non-scalar value from model");
                return None;
            }
        };

        match name {
            FieldName::PolicyType => match PolicyType::from_label(&raw) {
                Some(kind) => Some(kind.as_str().to_string()),
                None => {
                    extraction.flag(name);
                    Some(raw)
                }
            },
            FieldName::StartDate | FieldName::EndDate => match parse_policy_date(&raw) {
                Some(date) => Some(format_date(date)),
                None => {
                    extraction.flag(name);
                    Some(raw)
                }
            },
            FieldName::Currency => {
                let code = raw.to_uppercase();
                if !CURRENCIES.contains(&code.as_str()) {
                    extraction.flag(name);
                }
                Some(code)
            }
            FieldName::PremiumTotal => match parse_amount(&raw) {
                Some(_) => Some(raw),
                None => {
                    extraction.flag(name);
                    None
                }
            },
            _ => Some(raw),
        }
    }
}

#[async_trait]
impl FieldExtractor for ModelExtractor {
    fn name(&self) -> &'static str {
        "model"
    }

    async fn extract(&self, document: &RecognizedDocument) -> Result<Extraction, ExtractError> {
        let text = document.full_text();
        if text.trim().is_empty() {
            warn!("document has no text; skipping model call");
            let mut extraction = Extraction::default();
            for name in &self.required_fields {
                extraction.flag(*name);
            }
            return Ok(extraction);
        }

        let reply = self.client.complete(SYSTEM_PROMPT, &text).await?;
        self.parse_reply(&reply)
    }
}
