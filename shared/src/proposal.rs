//! Proposals and their indicator values.
//!
//! Extraction results arrive in several loose shapes (a bare number, a string
//! with units, `null`, or `{value, source}`). They are read into
//! [`IndicatorEntry`] once and consumed through the [`IndicatorValue`] tagged
//! union, so scoring never has to guess what it is looking at.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, Default)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum ProposalStatus {
    #[default]
    Pending,
    Processing,
    #[serde(alias = "zpracován", alias = "zpracovan", alias = "processed")]
    #[strum(to_string = "completed", serialize = "zpracován")]
    Completed,
    Error,
}

/// Where an indicator value came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(from = "String", into = "String")]
pub enum SourceKind {
    Document,
    Manual,
    Ai,
    NotFound,
    #[default]
    Unknown,
    Other(String),
}

impl From<String> for SourceKind {
    fn from(raw: String) -> Self {
        let lower = raw.trim().to_lowercase();
        match lower.as_str() {
            "" | "unknown" => SourceKind::Unknown,
            "pdf" | "document" | "extracted" | "extraction" => SourceKind::Document,
            "manual" | "user" | "manually" => SourceKind::Manual,
            "ai" | "openai" | "llm" => SourceKind::Ai,
            "not_found" | "notfound" | "nenalezeno" => SourceKind::NotFound,
            _ if lower.contains("not found") || lower.contains("nenalezen") => SourceKind::NotFound,
            _ => SourceKind::Other(raw),
        }
    }
}

impl From<SourceKind> for String {
    fn from(kind: SourceKind) -> Self {
        kind.to_string()
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Document => f.write_str("document"),
            SourceKind::Manual => f.write_str("manual"),
            SourceKind::Ai => f.write_str("ai"),
            SourceKind::NotFound => f.write_str("not_found"),
            SourceKind::Unknown => f.write_str("unknown"),
            SourceKind::Other(s) => f.write_str(s),
        }
    }
}

/// Raw stored value of an indicator entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(untagged)]
pub enum EntryValue {
    Number(f64),
    Text(String),
    #[default]
    Null,
}

/// Numeric view of an entry.
#[derive(Debug, Clone, PartialEq)]
pub enum IndicatorValue {
    Present { value: f64, source: SourceKind },
    Absent { source: SourceKind },
}

impl IndicatorValue {
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            IndicatorValue::Present { value, .. } => Some(*value),
            IndicatorValue::Absent { .. } => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(from = "RawEntry")]
pub struct IndicatorEntry {
    pub value: EntryValue,
    pub source: SourceKind,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawEntry {
    Full {
        #[serde(default)]
        value: EntryValue,
        #[serde(default)]
        source: Option<String>,
    },
    Bare(EntryValue),
}

impl From<RawEntry> for IndicatorEntry {
    fn from(raw: RawEntry) -> Self {
        match raw {
            RawEntry::Full { value, source } => IndicatorEntry {
                value,
                source: source.map(SourceKind::from).unwrap_or_default(),
            },
            RawEntry::Bare(value) => IndicatorEntry {
                value,
                source: SourceKind::Unknown,
            },
        }
    }
}

impl IndicatorEntry {
    pub fn new(value: EntryValue, source: SourceKind) -> Self {
        Self { value, source }
    }

    pub fn number(value: f64, source: SourceKind) -> Self {
        Self::new(EntryValue::Number(value), source)
    }

    pub fn not_found() -> Self {
        Self::new(EntryValue::Null, SourceKind::NotFound)
    }

    pub fn numeric(&self) -> IndicatorValue {
        let parsed = match &self.value {
            EntryValue::Number(n) if n.is_finite() => Some(*n),
            EntryValue::Number(_) => None,
            EntryValue::Text(s) => parse_number(s),
            EntryValue::Null => None,
        };
        match parsed {
            Some(value) => IndicatorValue::Present {
                value,
                source: self.source.clone(),
            },
            None => IndicatorValue::Absent {
                source: self.source.clone(),
            },
        }
    }

    /// Not found in the document and nothing usable stored.
    pub fn is_skipped(&self) -> bool {
        self.source == SourceKind::NotFound && self.numeric().as_f64().is_none()
    }
}

/// Lenient number parsing for extracted text such as `"13 650 m²"`, `"0,45"`
/// or `"1,234.5"`. Anything that cannot be read unambiguously is `None`.
pub fn parse_number(raw: &str) -> Option<f64> {
    let compact: String = raw
        .trim()
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '\u{a0}' && *c != '\u{202f}')
        .collect();
    let (sign, body) = match compact.strip_prefix('-') {
        Some(rest) => ("-", rest),
        None => ("", compact.strip_prefix('+').unwrap_or(&compact)),
    };
    let mantissa_len = body
        .find(|c: char| !(c.is_ascii_digit() || c == '.' || c == ','))
        .unwrap_or(body.len());
    let (mantissa, rest) = body.split_at(mantissa_len);
    let (exponent, unit) = split_exponent(rest);
    // a second number or a range follows, e.g. "12-15" or "1/2"
    if unit.starts_with(|c: char| c.is_ascii_digit() || matches!(c, '.' | ',' | '-' | '+' | '/')) {
        return None;
    }
    let mantissa = normalize_separators(mantissa)?;
    format!("{sign}{mantissa}{exponent}")
        .parse::<f64>()
        .ok()
        .filter(|v| v.is_finite())
}

fn split_exponent(rest: &str) -> (&str, &str) {
    let Some(tail) = rest.strip_prefix(|c: char| c == 'e' || c == 'E') else {
        return ("", rest);
    };
    let unsigned = tail.strip_prefix(|c: char| c == '+' || c == '-').unwrap_or(tail);
    let digits = unsigned.len() - unsigned.trim_start_matches(|c: char| c.is_ascii_digit()).len();
    if digits == 0 {
        return ("", rest);
    }
    rest.split_at(rest.len() - unsigned.len() + digits)
}

/// A single comma followed by exactly three digits is English thousands
/// grouping (`13,650`), unless the integer part is zero (`0,450`).
fn comma_is_grouping(m: &str) -> bool {
    match m.split_once(',') {
        Some((int, frac)) => frac.len() == 3 && (1..=3).contains(&int.len()) && !int.trim_start_matches('0').is_empty(),
        None => false,
    }
}

/// Resolves `.`/`,` into a plain `digits[.digits]` string. The last separator
/// is the decimal one when both kinds occur; a repeated separator is grouping.
fn normalize_separators(m: &str) -> Option<String> {
    if !m.chars().any(|c| c.is_ascii_digit()) {
        return None;
    }
    let dots = m.matches('.').count();
    let commas = m.matches(',').count();
    let (decimal, grouping) = match (m.rfind('.'), m.rfind(',')) {
        (None, None) => return Some(m.to_string()),
        (Some(d), Some(c)) if d > c => (Some('.'), Some(',')),
        (Some(_), Some(_)) => (Some(','), Some('.')),
        (Some(_), None) if dots == 1 => (Some('.'), None),
        (Some(_), None) => (None, Some('.')),
        (None, Some(_)) if commas == 1 && !comma_is_grouping(m) => (Some(','), None),
        (None, Some(_)) => (None, Some(',')),
    };

    let (int_part, frac_part) = match decimal {
        Some(d) => {
            if m.matches(d).count() > 1 {
                return None;
            }
            let (int, frac) = m.split_once(d)?;
            (int, frac)
        }
        None => (m, ""),
    };

    let int_digits = match grouping {
        Some(g) if int_part.contains(g) => {
            let mut groups = int_part.split(g);
            let first = groups.next()?;
            if !(1..=3).contains(&first.len()) || !groups.all(|group| group.len() == 3) {
                return None;
            }
            int_part.replace(g, "")
        }
        _ => int_part.to_string(),
    };
    let all_digits = |s: &str| s.chars().all(|c| c.is_ascii_digit());
    if !all_digits(&int_digits) || !all_digits(frac_part) {
        return None;
    }
    match (int_digits.is_empty(), frac_part.is_empty()) {
        (true, true) => None,
        (false, true) => Some(int_digits),
        (true, false) => Some(format!("0.{frac_part}")),
        (false, false) => Some(format!("{int_digits}.{frac_part}")),
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub status: ProposalStatus,
    /// Proposals are never deleted, only hidden from view.
    #[serde(default)]
    pub hidden: bool,
    #[serde(default)]
    pub data: BTreeMap<String, IndicatorEntry>,
    #[serde(default = "Utc::now")]
    pub created_at: DateTime<Utc>,
    #[serde(default = "Utc::now")]
    pub updated_at: DateTime<Utc>,
}

impl Proposal {
    pub fn new(name: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            status: ProposalStatus::Pending,
            hidden: false,
            data: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == ProposalStatus::Completed
    }

    pub fn entry(&self, indicator_id: &str) -> Option<&IndicatorEntry> {
        self.data.get(indicator_id)
    }

    pub fn value(&self, indicator_id: &str) -> IndicatorValue {
        match self.data.get(indicator_id) {
            Some(entry) => entry.numeric(),
            None => IndicatorValue::Absent {
                source: SourceKind::Unknown,
            },
        }
    }

    pub fn set_value(&mut self, indicator_id: impl Into<String>, entry: IndicatorEntry) {
        self.data.insert(indicator_id.into(), entry);
        self.updated_at = Utc::now();
    }

    pub fn set_status(&mut self, status: ProposalStatus) {
        self.status = status;
        self.updated_at = Utc::now();
    }
}
