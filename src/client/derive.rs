//! Normalization and derived view fields
//!
//! Records arrive with decimals as text (`"12.000"`) and dates in several
//! notations. [`prepare`] normalizes them per collection and attaches the
//! derived, read-only fields the UI binds to (status labels, progress
//! percentages). Derived fields are recomputed on every store write and are
//! never sent back to the server.

use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};

use crate::shared::config::{CollectionConfig, DerivedRules};
use crate::shared::record::{FieldValue, Record};

const LOT_FIELDS: &[&str] = &["StatusText", "StatusState", "ProgressPercent"];
const RESULT_FIELDS: &[&str] = &["RecordedDateFormatted", "StatusState"];
const USAGE_FIELDS: &[&str] = &["StatusState", "DecisionCodeText", "QuantityProgress"];

/// Names of the derived fields a rule set produces
pub fn derived_fields(rules: DerivedRules) -> &'static [&'static str] {
    match rules {
        DerivedRules::None => &[],
        DerivedRules::InspectionLot => LOT_FIELDS,
        DerivedRules::InspectionResult => RESULT_FIELDS,
        DerivedRules::UsageDecision => USAGE_FIELDS,
    }
}

/// Whether `field` is derived under the collection's rules
pub fn is_derived(config: &CollectionConfig, field: &str) -> bool {
    derived_fields(config.derived).contains(&field)
}

/// Normalize field representations and attach derived fields
pub fn prepare(config: &CollectionConfig, mut record: Record) -> Record {
    normalize(config, &mut record);
    attach_derived(config.derived, &mut record);
    record
}

/// Apply decimal and date normalization rules in place
pub fn normalize(config: &CollectionConfig, record: &mut Record) {
    for field in &config.decimal_fields {
        if let Some(FieldValue::Text(text)) = record.get(field) {
            if let Ok(value) = text.trim().parse::<f64>() {
                record.set(field.clone(), value);
            }
        }
    }
    for field in &config.date_fields {
        if let Some(FieldValue::Text(text)) = record.get(field) {
            if let Some(date) = parse_date(text) {
                record.set(field.clone(), date);
            }
        }
    }
}

/// Recompute derived fields in place
pub fn attach_derived(rules: DerivedRules, record: &mut Record) {
    match rules {
        DerivedRules::None => {}
        DerivedRules::InspectionLot => {
            let status = record.text("UsageDecisionStatus").unwrap_or_default().to_string();
            record.set("StatusText", lot_status_text(&status));
            record.set("StatusState", lot_status_state(&status));
            let progress = progress_percent(
                record.number("InspectedQuantity"),
                record.number("ActualQuantity"),
            );
            record.set("ProgressPercent", progress);
        }
        DerivedRules::InspectionResult => {
            let formatted = match record.get("RecordedDate") {
                Some(FieldValue::Date(date)) => format_date(date),
                Some(FieldValue::Text(text)) => {
                    parse_date(text).map(|d| format_date(&d)).unwrap_or_else(|| text.clone())
                }
                _ => String::new(),
            };
            record.set("RecordedDateFormatted", formatted);
            let status = record.text("RecordingStatus").unwrap_or_default().to_string();
            record.set("StatusState", result_status_state(&status));
        }
        DerivedRules::UsageDecision => {
            let status = record.text("DecisionStatus").unwrap_or_default().to_string();
            record.set("StatusState", decision_status_state(&status));
            let code = record.text("UsageDecisionCode").unwrap_or_default().to_string();
            record.set("DecisionCodeText", decision_code_text(&code));
            let progress = progress_percent(
                record.number("InspectedQuantity"),
                record.number("LotQuantity"),
            );
            record.set("QuantityProgress", progress);
        }
    }
}

/// Copy of `record` without derived fields
pub fn strip_derived(config: &CollectionConfig, record: &Record) -> Record {
    let mut stripped = record.clone();
    for field in derived_fields(config.derived) {
        stripped.remove(field);
    }
    stripped
}

/// Whole-number percentage of `done` against `total`, capped at 100
pub fn progress_percent(done: f64, total: f64) -> f64 {
    if total == 0.0 {
        return 0.0;
    }
    ((done / total) * 100.0).round().min(100.0)
}

pub fn lot_status_text(status: &str) -> &'static str {
    match status {
        "Decision Made" => "Completed",
        "Pending" => "Pending",
        _ => "Unknown",
    }
}

pub fn lot_status_state(status: &str) -> &'static str {
    match status {
        "Decision Made" => "Success",
        "Pending" => "Warning",
        _ => "None",
    }
}

pub fn result_status_state(status: &str) -> &'static str {
    match status {
        "Active" => "Success",
        "View Only" => "Information",
        _ => "None",
    }
}

pub fn decision_status_state(status: &str) -> &'static str {
    match status {
        "Allowed" => "Success",
        "Blocked" => "Error",
        "Checked" => "Information",
        _ => "Warning",
    }
}

pub fn decision_code_text(code: &str) -> String {
    match code {
        "A" => "Approved".to_string(),
        "R" => "Rejected".to_string(),
        "R2" => "Rework Required".to_string(),
        "" => "Pending".to_string(),
        other => other.to_string(),
    }
}

/// Parse RFC 3339, naive ISO date-times, plain dates and OData `/Date(ms)/`
pub fn parse_date(text: &str) -> Option<DateTime<Utc>> {
    let text = text.trim();
    if let Some(ms) = text
        .strip_prefix("/Date(")
        .and_then(|rest| rest.strip_suffix(")/"))
    {
        let digits = ms.split(['+', '-']).find(|s| !s.is_empty())?;
        let millis = digits.parse::<i64>().ok()?;
        let millis = if ms.starts_with('-') { -millis } else { millis };
        return Utc.timestamp_millis_opt(millis).single();
    }
    if let Ok(date) = DateTime::parse_from_rfc3339(text) {
        return Some(date.with_timezone(&Utc));
    }
    if let Ok(naive) = NaiveDateTime::parse_from_str(text, "%Y-%m-%dT%H:%M:%S") {
        return Some(Utc.from_utc_datetime(&naive));
    }
    NaiveDate::parse_from_str(text, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|naive| Utc.from_utc_datetime(&naive))
}

/// `M/D/YYYY` display format
pub fn format_date(date: &DateTime<Utc>) -> String {
    date.format("%-m/%-d/%Y").to_string()
}
