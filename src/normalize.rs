// 🧽 Normalizer - canonical, comparison-ready field values
//
// Pure and total: malformed input never fails, it degrades the field to
// `Unreliable` and the scorer leaves it out.

use crate::profile::{FieldKind, FieldSpec};
use crate::record::{EntityType, FieldValue, MasterRecord};
use chrono::NaiveDate;
use std::collections::BTreeMap;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

// ============================================================================
// NORMALIZED VALUES
// ============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum Canonical {
    /// Lowercased, accent-free, punctuation-free, single-spaced text
    Text(String),

    /// Digits only (documents, phone numbers)
    Digits(String),

    Number(f64),

    Date(NaiveDate),

    Flag(bool),
}

impl Canonical {
    /// String form used for blocking keys
    pub fn key_text(&self) -> String {
        match self {
            Canonical::Text(s) | Canonical::Digits(s) => s.clone(),
            Canonical::Number(n) => format!("{}", n),
            Canonical::Date(d) => d.format("%Y-%m-%d").to_string(),
            Canonical::Flag(b) => b.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum NormalizedField {
    Value(Canonical),

    /// Absent, null or blank
    Missing,

    /// Present but malformed. Excluded from scoring.
    Unreliable(String),
}

impl NormalizedField {
    pub fn reliable(&self) -> Option<&Canonical> {
        match self {
            NormalizedField::Value(c) => Some(c),
            _ => None,
        }
    }

    fn unreliable(reason: impl Into<String>) -> Self {
        NormalizedField::Unreliable(reason.into())
    }
}

static MISSING: NormalizedField = NormalizedField::Missing;

#[derive(Debug, Clone, PartialEq)]
pub struct NormalizedRecord {
    pub record_id: String,
    pub entity_type: EntityType,
    pub fields: BTreeMap<String, NormalizedField>,
}

impl NormalizedRecord {
    pub fn get(&self, name: &str) -> &NormalizedField {
        self.fields.get(name).unwrap_or(&MISSING)
    }

    pub fn reliable(&self, name: &str) -> Option<&Canonical> {
        self.get(name).reliable()
    }

    /// Names of fields that were present but could not be trusted
    pub fn unreliable_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(_, f)| matches!(f, NormalizedField::Unreliable(_)))
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

// ============================================================================
// NORMALIZER
// ============================================================================

/// Normalize every field named in `specs`. Fields not in `specs` are ignored.
pub fn normalize(record: &MasterRecord, specs: &[FieldSpec]) -> NormalizedRecord {
    let fields = specs
        .iter()
        .map(|spec| {
            let field = match record.get(&spec.name) {
                None => NormalizedField::Missing,
                Some(value) if value.is_empty() => NormalizedField::Missing,
                Some(value) => normalize_value(value, &spec.kind),
            };
            if let NormalizedField::Unreliable(reason) = &field {
                tracing::trace!(
                    record = %record.id,
                    field = %spec.name,
                    reason = %reason,
                    "field excluded from scoring"
                );
            }
            (spec.name.clone(), field)
        })
        .collect();

    NormalizedRecord {
        record_id: record.id.clone(),
        entity_type: record.entity_type.clone(),
        fields,
    }
}

/// Normalize a single non-empty value according to its field kind
pub fn normalize_value(value: &FieldValue, kind: &FieldKind) -> NormalizedField {
    match kind {
        FieldKind::Name | FieldKind::Address | FieldKind::Text => {
            let text = normalize_text(&value.to_string());
            if text.is_empty() {
                NormalizedField::unreliable("no letters or digits")
            } else {
                NormalizedField::Value(Canonical::Text(text))
            }
        }
        FieldKind::Document { valid_lengths } => normalize_document(value, valid_lengths),
        FieldKind::Email => normalize_email(value),
        FieldKind::Phone => normalize_phone(value),
        FieldKind::Code => {
            let code: String = normalize_text(&value.to_string()).replace(' ', "");
            if code.is_empty() {
                NormalizedField::unreliable("no letters or digits")
            } else {
                NormalizedField::Value(Canonical::Text(code))
            }
        }
        FieldKind::Number => normalize_number(value),
        FieldKind::Date => normalize_date(value),
        FieldKind::Flag => normalize_flag(value),
    }
}

/// Lowercase, strip diacritics, turn punctuation into spaces, collapse whitespace
pub fn normalize_text(input: &str) -> String {
    let cleaned: String = input
        .nfkd()
        .filter(|c| !is_combining_mark(*c))
        .flat_map(|c| c.to_lowercase())
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .collect();

    cleaned.split_whitespace().collect::<Vec<_>>().join(" ")
}

pub fn digits_only(input: &str) -> String {
    input.chars().filter(|c| c.is_ascii_digit()).collect()
}

fn normalize_document(value: &FieldValue, valid_lengths: &[usize]) -> NormalizedField {
    let raw = match value {
        FieldValue::Text(s) => s.clone(),
        FieldValue::Integer(n) if *n >= 0 => n.to_string(),
        _ => return NormalizedField::unreliable("document is not text"),
    };

    let digits = digits_only(&raw);
    if digits.is_empty() {
        return NormalizedField::unreliable("document has no digits");
    }
    if !valid_lengths.contains(&digits.len()) {
        return NormalizedField::unreliable(format!(
            "document has {} digits, expected one of {:?}",
            digits.len(),
            valid_lengths
        ));
    }

    NormalizedField::Value(Canonical::Digits(digits))
}

/// National phone number: country code 55 and trunk prefix 0 removed
fn normalize_phone(value: &FieldValue) -> NormalizedField {
    let mut digits = match value {
        FieldValue::Text(s) => digits_only(s),
        FieldValue::Integer(n) if *n > 0 => n.to_string(),
        _ => return NormalizedField::unreliable("phone is not text"),
    };

    if matches!(digits.len(), 12 | 13) && digits.starts_with("55") {
        digits = digits[2..].to_string();
    }
    if matches!(digits.len(), 11 | 12) && digits.starts_with('0') {
        digits = digits[1..].to_string();
    }

    if matches!(digits.len(), 10 | 11) {
        NormalizedField::Value(Canonical::Digits(digits))
    } else {
        NormalizedField::unreliable(format!("phone has {} digits", digits.len()))
    }
}

fn normalize_email(value: &FieldValue) -> NormalizedField {
    let email = match value {
        FieldValue::Text(s) => s.trim().to_lowercase(),
        _ => return NormalizedField::unreliable("email is not text"),
    };

    let mut parts = email.split('@');
    let (local, domain) = match (parts.next(), parts.next(), parts.next()) {
        (Some(local), Some(domain), None) => (local, domain),
        _ => return NormalizedField::unreliable("email must contain exactly one '@'"),
    };

    let domain_ok = domain.contains('.') && !domain.starts_with('.') && !domain.ends_with('.');
    if local.is_empty() || !domain_ok || email.chars().any(char::is_whitespace) {
        return NormalizedField::unreliable("malformed email");
    }

    NormalizedField::Value(Canonical::Text(email))
}

fn normalize_number(value: &FieldValue) -> NormalizedField {
    let number = match value {
        FieldValue::Integer(n) => Some(*n as f64),
        FieldValue::Decimal(n) => Some(*n),
        FieldValue::Text(s) => s.trim().replace(',', ".").parse::<f64>().ok(),
        _ => None,
    };

    match number {
        Some(n) if n.is_finite() => NormalizedField::Value(Canonical::Number(n)),
        _ => NormalizedField::unreliable("not a number"),
    }
}

const DATE_FORMATS_LONG: [&str; 4] = ["%Y-%m-%d", "%d/%m/%Y", "%d-%m-%Y", "%Y/%m/%d"];
const DATE_FORMATS_SHORT: [&str; 2] = ["%d/%m/%y", "%d-%m-%y"];

/// Parse the date formats accepted by the entity forms. A trailing time
/// component ("2024-01-31 10:00:00", "2024-01-31T10:00:00Z") is ignored.
pub fn parse_date(input: &str) -> Option<NaiveDate> {
    let trimmed = input.trim();
    let date_part = match trimmed.char_indices().nth(10) {
        Some((idx, ' ')) | Some((idx, 'T')) => &trimmed[..idx],
        _ => trimmed,
    };

    let formats: &[&str] = match date_part.len() {
        10 => &DATE_FORMATS_LONG,
        8 => &DATE_FORMATS_SHORT,
        _ => return None,
    };

    formats
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(date_part, fmt).ok())
}

fn normalize_date(value: &FieldValue) -> NormalizedField {
    let date = match value {
        FieldValue::Date(d) => Some(*d),
        FieldValue::Text(s) => parse_date(s),
        _ => None,
    };

    match date {
        Some(d) => NormalizedField::Value(Canonical::Date(d)),
        None => NormalizedField::unreliable("unparseable date"),
    }
}

const TRUE_VALUES: [&str; 7] = ["true", "verdadeiro", "sim", "s", "1", "yes", "y"];
const FALSE_VALUES: [&str; 7] = ["false", "falso", "nao", "n", "0", "no", "f"];

fn normalize_flag(value: &FieldValue) -> NormalizedField {
    let flag = match value {
        FieldValue::Boolean(b) => Some(*b),
        FieldValue::Integer(0) => Some(false),
        FieldValue::Integer(1) => Some(true),
        FieldValue::Text(s) => {
            let lowered = normalize_text(s);
            if TRUE_VALUES.contains(&lowered.as_str()) {
                Some(true)
            } else if FALSE_VALUES.contains(&lowered.as_str()) {
                Some(false)
            } else {
                None
            }
        }
        _ => None,
    };

    match flag {
        Some(b) => NormalizedField::Value(Canonical::Flag(b)),
        None => NormalizedField::unreliable("not a boolean"),
    }
}

// ============================================================================
// TESTS
// ============================================================================
