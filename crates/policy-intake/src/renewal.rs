//! Renewal date calculation and renewal urgency.

use chrono::{Months, NaiveDate};
use serde::{Deserialize, Serialize};

use crate::document::PolicyType;

/// Policies renew one year after they start.
const RENEWAL_PERIOD: Months = Months::new(12);

/// Parses a date as printed on a policy or produced by an extractor.
///
/// Accepts ISO `YYYY-MM-DD` (a trailing time part is ignored) and day-first
/// `dd/mm/yyyy`, `dd-mm-yyyy` and `dd/mm/yy`. Two-digit years are 20yy.
pub fn parse_policy_date(raw: &str) -> Option<NaiveDate> {
    let raw = raw.trim();
    if let Some(head) = raw.get(..10) {
        if let Ok(date) = NaiveDate::parse_from_str(head, "%Y-%m-%d") {
            return Some(date);
        }
    }

    let parts: Vec<&str> = raw.split(['/', '-']).collect();
    let all_digits = parts
        .iter()
        .all(|p| !p.is_empty() && p.chars().all(|c| c.is_ascii_digit()));
    if parts.len() != 3 || !all_digits {
        return None;
    }
    let day: u32 = parts[0].parse().ok()?;
    let month: u32 = parts[1].parse().ok()?;
    let year: i32 = match parts[2].len() {
        2 => 2000 + parts[2].parse::<i32>().ok()?,
        4 => parts[2].parse().ok()?,
        _ => return None,
    };
    NaiveDate::from_ymd_opt(year, month, day)
}

pub fn format_date(date: NaiveDate) -> String {
    date.format("%Y-%m-%d").to_string()
}

/// Start date plus twelve months. Permanent life policies never renew;
/// a missing or unparseable start date yields `None`.
pub fn renewal_date(policy_type: Option<&str>, start_date: Option<&str>) -> Option<NaiveDate> {
    if policy_type.and_then(PolicyType::from_label) == Some(PolicyType::PermanentLife) {
        return None;
    }
    parse_policy_date(start_date?)?.checked_add_months(RENEWAL_PERIOD)
}

/// How soon a policy needs renewing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RenewalStatus {
    Overdue,
    #[serde(rename = "DUE_30_DAYS")]
    Due30Days,
    #[serde(rename = "DUE_60_DAYS")]
    Due60Days,
    #[serde(rename = "DUE_90_DAYS")]
    Due90Days,
    NotUrgent,
}

pub fn renewal_status(renewal: NaiveDate, today: NaiveDate) -> RenewalStatus {
    let days = (renewal - today).num_days();
    match days {
        d if d < 0 => RenewalStatus::Overdue,
        d if d <= 30 => RenewalStatus::Due30Days,
        d if d <= 60 => RenewalStatus::Due60Days,
        d if d <= 90 => RenewalStatus::Due90Days,
        _ => RenewalStatus::NotUrgent,
    }
}
