use crate::defs::ResourceKind;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::{Display, Formatter};

#[derive(Debug, Clone, Eq, PartialEq, Serialize, Deserialize)]
pub enum ResourceValue {
    Long(i64),
    /// Seconds
    Time(u64),
    /// Bytes
    Size(u64),
    Str(String),
}

impl ResourceValue {
    pub fn parse(kind: ResourceKind, value: &str) -> Result<Self, String> {
        let value = value.trim();
        match kind {
            ResourceKind::Long => value
                .parse::<i64>()
                .map(ResourceValue::Long)
                .map_err(|e| e.to_string()),
            ResourceKind::Time => parse_time(value).map(ResourceValue::Time),
            ResourceKind::Size => parse_size(value).map(ResourceValue::Size),
            ResourceKind::Str => Ok(ResourceValue::Str(value.to_string())),
        }
    }

    /// Numeric view used by the time-based preemption heuristics.
    pub fn as_seconds(&self) -> Option<u64> {
        match self {
            ResourceValue::Time(secs) => Some(*secs),
            ResourceValue::Long(value) => u64::try_from(*value).ok(),
            _ => None,
        }
    }

    /// Adds `other` to `self`; non-numeric values and mismatched kinds are replaced.
    pub fn increment(&mut self, other: &ResourceValue) {
        match (self, other) {
            (ResourceValue::Long(a), ResourceValue::Long(b)) => *a += b,
            (ResourceValue::Time(a), ResourceValue::Time(b)) => *a += b,
            (ResourceValue::Size(a), ResourceValue::Size(b)) => *a += b,
            (this, other) => *this = other.clone(),
        }
    }

    pub fn decrement(&mut self, other: &ResourceValue) {
        match (self, other) {
            (ResourceValue::Long(a), ResourceValue::Long(b)) => *a -= b,
            (ResourceValue::Time(a), ResourceValue::Time(b)) => *a = a.saturating_sub(*b),
            (ResourceValue::Size(a), ResourceValue::Size(b)) => *a = a.saturating_sub(*b),
            _ => {}
        }
    }
}

impl Display for ResourceValue {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            ResourceValue::Long(value) => write!(f, "{value}"),
            ResourceValue::Time(secs) => f.write_str(&format_time(*secs)),
            ResourceValue::Size(bytes) => f.write_str(&format_size(*bytes)),
            ResourceValue::Str(value) => f.write_str(value),
        }
    }
}

pub type ResourceList = BTreeMap<String, ResourceValue>;

/// Parses `[[HH:]MM:]SS` (seconds may carry a fraction, which is dropped).
pub fn parse_time(value: &str) -> Result<u64, String> {
    if value.is_empty() {
        return Err("empty time value".to_string());
    }
    let parts: Vec<&str> = value.split(':').collect();
    if parts.len() > 3 {
        return Err(format!("invalid time '{value}'"));
    }
    let mut total: u64 = 0;
    for (i, part) in parts.iter().enumerate() {
        let part = if i == parts.len() - 1 {
            part.split('.').next().unwrap_or(part)
        } else {
            part
        };
        let number = part
            .parse::<u64>()
            .map_err(|_| format!("invalid time '{value}'"))?;
        if i > 0 && number >= 60 {
            return Err(format!("invalid time '{value}'"));
        }
        total = total * 60 + number;
    }
    Ok(total)
}

pub fn format_time(secs: u64) -> String {
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs / 60) % 60, secs % 60)
}

const SIZE_UNITS: [(&str, u32); 6] = [
    ("pb", 5),
    ("tb", 4),
    ("gb", 3),
    ("mb", 2),
    ("kb", 1),
    ("b", 0),
];

/// Parses sizes such as `512`, `100kb` or `4GB`. A bare number is bytes.
pub fn parse_size(value: &str) -> Result<u64, String> {
    let lower = value.to_ascii_lowercase();
    let split = lower
        .find(|c: char| !c.is_ascii_digit())
        .unwrap_or(lower.len());
    let (number, suffix) = lower.split_at(split);
    let number = number
        .parse::<u64>()
        .map_err(|_| format!("invalid size '{value}'"))?;
    let exponent = if suffix.is_empty() {
        0
    } else {
        SIZE_UNITS
            .iter()
            .find(|(unit, _)| *unit == suffix)
            .map(|(_, exp)| *exp)
            .ok_or_else(|| format!("invalid size unit in '{value}'"))?
    };
    number
        .checked_mul(1024u64.pow(exponent))
        .ok_or_else(|| format!("size '{value}' is too large"))
}

pub fn format_size(bytes: u64) -> String {
    for (unit, exp) in SIZE_UNITS {
        let scale = 1024u64.pow(exp);
        if bytes >= scale && bytes % scale == 0 {
            return format!("{}{unit}", bytes / scale);
        }
    }
    format!("{bytes}b")
}
