use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::text::{fold, parse_amount};

/// Names of the business fields extracted from a policy document.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FieldName {
    PolicyNumber,
    InsuredName,
    PolicyType,
    Insurer,
    StartDate,
    EndDate,
    PremiumTotal,
    Currency,
    RenewalDate,
}

impl FieldName {
    pub const ALL: [FieldName; 9] = [
        FieldName::PolicyNumber,
        FieldName::InsuredName,
        FieldName::PolicyType,
        FieldName::Insurer,
        FieldName::StartDate,
        FieldName::EndDate,
        FieldName::PremiumTotal,
        FieldName::Currency,
        FieldName::RenewalDate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldName::PolicyNumber => "policyNumber",
            FieldName::InsuredName => "insuredName",
            FieldName::PolicyType => "policyType",
            FieldName::Insurer => "insurer",
            FieldName::StartDate => "startDate",
            FieldName::EndDate => "endDate",
            FieldName::PremiumTotal => "premiumTotal",
            FieldName::Currency => "currency",
            FieldName::RenewalDate => "renewalDate",
        }
    }
}

impl fmt::Display for FieldName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FieldName::ALL
            .iter()
            .copied()
            .find(|name| name.as_str() == s)
            .ok_or_else(|| format!("unknown field '{}'", s))
    }
}

/// Per-field confidence scores in `[0.0, 1.0]`.
pub type FieldConfidence = BTreeMap<FieldName, f64>;

/// Clamps a score into `[0.0, 1.0]` and rounds it to four decimals.
pub fn normalize_confidence(score: f64) -> f64 {
    if !score.is_finite() {
        return 0.0;
    }
    (score.clamp(0.0, 1.0) * 10_000.0).round() / 10_000.0
}

/// The extracted business fields. Every field is optional until extraction
/// succeeds; absent fields are omitted when serialized.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PolicyFields {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insured_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub policy_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub insurer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub start_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub end_date: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub premium_total: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub renewal_date: Option<String>,
}

impl PolicyFields {
    /// Returns the value of a field rendered as text.
    pub fn text(&self, name: FieldName) -> Option<String> {
        match name {
            FieldName::PolicyNumber => self.policy_number.clone(),
            FieldName::InsuredName => self.insured_name.clone(),
            FieldName::PolicyType => self.policy_type.clone(),
            FieldName::Insurer => self.insurer.clone(),
            FieldName::StartDate => self.start_date.clone(),
            FieldName::EndDate => self.end_date.clone(),
            FieldName::PremiumTotal => self.premium_total.map(|v| format!("{:.2}", v)),
            FieldName::Currency => self.currency.clone(),
            FieldName::RenewalDate => self.renewal_date.clone(),
        }
    }

    pub fn is_present(&self, name: FieldName) -> bool {
        match name {
            FieldName::PremiumTotal => self.premium_total.is_some(),
            other => self
                .text(other)
                .map(|v| !v.trim().is_empty())
                .unwrap_or(false),
        }
    }

    /// Fields holding a non-empty value, in canonical order.
    pub fn present(&self) -> Vec<FieldName> {
        FieldName::ALL
            .iter()
            .copied()
            .filter(|name| self.is_present(*name))
            .collect()
    }

    /// Sets a field from raw text. Blank input clears nothing and is
    /// rejected; a premium that is not a number is rejected.
    pub fn set_text(&mut self, name: FieldName, raw: &str) -> Result<(), String> {
        let value = raw.trim();
        if value.is_empty() {
            return Err(format!("empty value for {}", name));
        }
        let owned = Some(value.to_string());
        match name {
            FieldName::PolicyNumber => self.policy_number = owned,
            FieldName::InsuredName => self.insured_name = owned,
            FieldName::PolicyType => self.policy_type = owned,
            FieldName::Insurer => self.insurer = owned,
            FieldName::StartDate => self.start_date = owned,
            FieldName::EndDate => self.end_date = owned,
            FieldName::PremiumTotal => {
                self.premium_total = Some(
                    parse_amount(value)
                        .ok_or_else(|| format!("'{}' is not a valid amount", value))?,
                )
            }
            FieldName::Currency => self.currency = Some(value.to_uppercase()),
            FieldName::RenewalDate => self.renewal_date = owned,
        }
        Ok(())
    }

    /// Overlays every present field of `other` onto `self`.
    pub fn apply(&mut self, other: &PolicyFields) {
        macro_rules! overlay {
            ($($field:ident),*) => {
                $(if other.$field.is_some() { self.$field = other.$field.clone(); })*
            };
        }
        overlay!(
            policy_number,
            insured_name,
            policy_type,
            insurer,
            start_date,
            end_date,
            premium_total,
            currency,
            renewal_date
        );
    }

    pub fn is_empty(&self) -> bool {
        self.present().is_empty()
    }
}

/// Closed enumeration of policy lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PolicyType {
    Auto,
    Life,
    PermanentLife,
    MajorMedical,
    MinorMedical,
    Home,
    Property,
    Liability,
    Travel,
    Business,
    Other,
}

impl PolicyType {
    pub const ALL: [PolicyType; 11] = [
        PolicyType::Auto,
        PolicyType::Life,
        PolicyType::PermanentLife,
        PolicyType::MajorMedical,
        PolicyType::MinorMedical,
        PolicyType::Home,
        PolicyType::Property,
        PolicyType::Liability,
        PolicyType::Travel,
        PolicyType::Business,
        PolicyType::Other,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            PolicyType::Auto => "auto",
            PolicyType::Life => "life",
            PolicyType::PermanentLife => "permanent_life",
            PolicyType::MajorMedical => "major_medical",
            PolicyType::MinorMedical => "minor_medical",
            PolicyType::Home => "home",
            PolicyType::Property => "property",
            PolicyType::Liability => "liability",
            PolicyType::Travel => "travel",
            PolicyType::Business => "business",
            PolicyType::Other => "other",
        }
    }

    /// Document-side labels (folded) that map onto this type.
    fn aliases(&self) -> &'static [&'static str] {
        match self {
            PolicyType::Auto => &["autos", "automovil", "automoviles", "auto individual"],
            PolicyType::Life => &["vida", "vida individual", "vida temporal"],
            PolicyType::PermanentLife => &["vida permanente", "vida entera", "permanent life"],
            PolicyType::MajorMedical => &["gastos medicos mayores", "gmm"],
            PolicyType::MinorMedical => &["gastos medicos menores"],
            PolicyType::Home => &["hogar", "casa habitacion"],
            PolicyType::Property => &["danos"],
            PolicyType::Liability => &["responsabilidad civil"],
            PolicyType::Travel => &["viaje", "viajero"],
            PolicyType::Business => &["empresarial", "empresa", "pyme"],
            PolicyType::Other => &["otro", "otros"],
        }
    }

    /// Recognises both the canonical identifier (`"permanent_life"`) and the
    /// labels printed on documents (`"Seguro de Vida Permanente"`).
    pub fn from_label(label: &str) -> Option<PolicyType> {
        let folded = fold(label).replace('_', " ");
        let folded = folded
            .strip_prefix("seguro de ")
            .or_else(|| folded.strip_prefix("seguro "))
            .unwrap_or(&folded)
            .trim()
            .to_string();
        if folded.is_empty() {
            return None;
        }
        PolicyType::ALL.iter().copied().find(|kind| {
            kind.as_str().replace('_', " ") == folded || kind.aliases().contains(&folded.as_str())
        })
    }
}

impl fmt::Display for PolicyType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
