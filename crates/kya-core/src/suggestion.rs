//! Suggestion and metrics records as read from the agent's datastore.

use crate::error::{KyaError, Result};
use chrono::{Local, TimeZone};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::cmp::Ordering;

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// Ordered severity: `info < warning < critical`.
///
/// The agent writes free-form strings, so unrecognised values are kept
/// verbatim as `Other` and rank below `Info`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Severity {
    Info,
    Warning,
    Critical,
    Other(String),
}

impl Severity {
    pub fn parse(s: &str) -> Self {
        match s.trim().to_ascii_lowercase().as_str() {
            "info" => Severity::Info,
            "warn" | "warning" => Severity::Warning,
            "crit" | "critical" => Severity::Critical,
            _ => Severity::Other(s.to_string()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
            Severity::Other(s) => s,
        }
    }

    /// Desktop-notification urgency hint.
    pub fn urgency(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::Warning => "normal",
            Severity::Info | Severity::Other(_) => "low",
        }
    }

    fn rank(&self) -> u8 {
        match self {
            Severity::Other(_) => 0,
            Severity::Info => 1,
            Severity::Warning => 2,
            Severity::Critical => 3,
        }
    }
}

impl Ord for Severity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.rank()
            .cmp(&other.rank())
            .then_with(|| self.as_str().cmp(other.as_str()))
    }
}

impl PartialOrd for Severity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for Severity {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for Severity {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let raw = String::deserialize(d)?;
        Ok(Severity::parse(&raw))
    }
}

// ---------------------------------------------------------------------------
// SuggestionStatus
// ---------------------------------------------------------------------------

/// `open` is the only non-terminal status; the control utility moves a
/// record to `applied` or `dismissed` and never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SuggestionStatus {
    Open,
    Applied,
    Dismissed,
}

impl SuggestionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SuggestionStatus::Open => "open",
            SuggestionStatus::Applied => "applied",
            SuggestionStatus::Dismissed => "dismissed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, SuggestionStatus::Open)
    }
}

impl std::fmt::Display for SuggestionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SuggestionStatus {
    type Err = KyaError;
    fn from_str(s: &str) -> Result<Self> {
        match s {
            "open" => Ok(SuggestionStatus::Open),
            "applied" => Ok(SuggestionStatus::Applied),
            "dismissed" => Ok(SuggestionStatus::Dismissed),
            other => Err(KyaError::InvalidStatus(other.to_string())),
        }
    }
}

// ---------------------------------------------------------------------------
// SuggestionRecord
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SuggestionRecord {
    pub id: i64,
    /// Unix seconds.
    pub timestamp: i64,
    pub check_name: String,
    pub severity: Severity,
    pub message: String,
    /// Descriptive only; never executed here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fix_command: Option<String>,
    pub status: SuggestionStatus,
}

impl SuggestionRecord {
    pub fn title(&self) -> String {
        format!("Kydras: new suggestion #{}", self.id)
    }

    pub fn body(&self) -> String {
        format!("[{}] {}\n{}", self.severity, self.check_name, self.message)
    }

    pub fn when(&self) -> String {
        format_local(self.timestamp)
    }
}

// ---------------------------------------------------------------------------
// MetricsSample
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSample {
    pub timestamp: i64,
    pub cpu: f64,
    pub mem_used: f64,
    pub mem_total: f64,
    pub load1: f64,
    pub load5: f64,
    pub load15: f64,
}

impl MetricsSample {
    pub fn mem_percent(&self) -> f64 {
        if self.mem_total > 0.0 {
            self.mem_used / self.mem_total * 100.0
        } else {
            0.0
        }
    }

    pub fn status_line(&self) -> String {
        format!(
            "Last sample: {}  CPU: {:.1}%  Mem: {:.1}%  Load: {:.2}/{:.2}/{:.2}",
            format_local(self.timestamp),
            self.cpu,
            self.mem_percent(),
            self.load1,
            self.load5,
            self.load15
        )
    }
}

fn format_local(ts: i64) -> String {
    match Local.timestamp_opt(ts, 0).single() {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => ts.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record(id: i64, severity: &str) -> SuggestionRecord {
        SuggestionRecord {
            id,
            timestamp: 1_700_000_000,
            check_name: "disk_full".into(),
            severity: Severity::parse(severity),
            message: "Root filesystem at 93%".into(),
            fix_command: None,
            status: SuggestionStatus::Open,
        }
    }

    #[test]
    fn severity_orders_info_warning_critical() {
        assert!(Severity::Info < Severity::Warning);
        assert!(Severity::Warning < Severity::Critical);
        assert!(Severity::Other("debug".into()) < Severity::Info);
    }

    #[test]
    fn severity_parse_is_lenient() {
        assert_eq!(Severity::parse("WARN"), Severity::Warning);
        assert_eq!(Severity::parse(" critical "), Severity::Critical);
        assert_eq!(Severity::parse("notice"), Severity::Other("notice".into()));
        assert_eq!(Severity::parse("notice").as_str(), "notice");
    }

    #[test]
    fn severity_serializes_as_plain_string() {
        let json = serde_json::to_string(&Severity::Warning).unwrap();
        assert_eq!(json, "\"warning\"");
        let back: Severity = serde_json::from_str("\"crit\"").unwrap();
        assert_eq!(back, Severity::Critical);
    }

    #[test]
    fn status_parse_rejects_unknown() {
        assert_eq!(
            "applied".parse::<SuggestionStatus>().unwrap(),
            SuggestionStatus::Applied
        );
        assert!("closed".parse::<SuggestionStatus>().is_err());
        assert!(SuggestionStatus::Dismissed.is_terminal());
        assert!(!SuggestionStatus::Open.is_terminal());
    }

    #[test]
    fn notification_text_matches_tray_format() {
        let r = record(6, "warning");
        assert_eq!(r.title(), "Kydras: new suggestion #6");
        assert_eq!(r.body(), "[warning] disk_full\nRoot filesystem at 93%");
    }

    #[test]
    fn mem_percent_handles_zero_total() {
        let s = MetricsSample {
            timestamp: 0,
            cpu: 1.0,
            mem_used: 10.0,
            mem_total: 0.0,
            load1: 0.0,
            load5: 0.0,
            load15: 0.0,
        };
        assert_eq!(s.mem_percent(), 0.0);
    }

    #[test]
    fn status_line_reports_percentages() {
        let s = MetricsSample {
            timestamp: 1_700_000_000,
            cpu: 12.345,
            mem_used: 512.0,
            mem_total: 2048.0,
            load1: 0.5,
            load5: 0.25,
            load15: 0.15,
        };
        let line = s.status_line();
        assert!(line.starts_with("Last sample: "), "{line}");
        assert!(line.contains("CPU: 12.3%"), "{line}");
        assert!(line.contains("Mem: 25.0%"), "{line}");
        assert!(line.contains("Load: 0.50/0.25/0.15"), "{line}");
    }
}
