//! Data models for the survey harvester.
//!
//! Wire shapes returned by the survey API (`QuestionBlock`, `RawResponse`)
//! and the canonical rows produced from them (`ResponseRecord`).

use crate::analysis::Analysis;
use crate::fetcher::RunReport;
use anyhow::{bail, Result};
use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Date format the API expects.
pub const API_DATE_FORMAT: &str = "%Y-%m-%d";

/// Inclusive range of calendar days.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DateRange {
    pub start: NaiveDate,
    pub end: NaiveDate,
}

impl DateRange {
    pub fn new(start: NaiveDate, end: NaiveDate) -> Result<Self> {
        if start > end {
            bail!("Start date {} is after end date {}", start, end);
        }
        Ok(Self { start, end })
    }

    /// Number of days covered, both ends included.
    pub fn days(&self) -> i64 {
        (self.end - self.start).num_days() + 1
    }

    /// Split into consecutive sub-ranges of at most `max_days` days.
    ///
    /// A non-positive `max_days` disables chunking.
    pub fn chunks(&self, max_days: i64) -> Vec<DateRange> {
        if max_days <= 0 || max_days >= self.days() {
            return vec![*self];
        }

        let mut chunks = Vec::new();
        let mut start = self.start;
        loop {
            let end = start
                .checked_add_signed(Duration::days(max_days - 1))
                .map_or(self.end, |d| d.min(self.end));
            chunks.push(DateRange { start, end });
            match end.succ_opt() {
                Some(next) if end < self.end => start = next,
                _ => break,
            }
        }
        chunks
    }

    /// The last `days` days of this range (or the whole range if shorter).
    pub fn tail(&self, days: i64) -> DateRange {
        if days <= 0 || days >= self.days() {
            return *self;
        }
        DateRange {
            start: self.end - Duration::days(days - 1),
            end: self.end,
        }
    }

    pub fn start_param(&self) -> String {
        self.start.format(API_DATE_FORMAT).to_string()
    }

    pub fn end_param(&self) -> String {
        self.end.format(API_DATE_FORMAT).to_string()
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start_param(), self.end_param())
    }
}

/// A survey discovered for an account in a date range.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Survey {
    pub id: String,
    pub name: String,
}

impl fmt::Display for Survey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.name.is_empty() {
            write!(f, "{}", self.id)
        } else {
            write!(f, "{} ({})", self.name, self.id)
        }
    }
}

/// One question's worth of a downloaded page.
///
/// The API is loose about types (ids arrive as numbers or strings), so the
/// scalar fields are kept as raw JSON values and read through accessors.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QuestionBlock {
    #[serde(default)]
    pub cod_pergunta: Value,
    #[serde(default)]
    pub nom_pergunta: Value,
    #[serde(default)]
    pub respostas: Vec<RawResponse>,
}

impl QuestionBlock {
    pub fn question_id(&self) -> String {
        value_to_string(&self.cod_pergunta).unwrap_or_default()
    }

    pub fn question_text(&self) -> String {
        value_to_string(&self.nom_pergunta).unwrap_or_default()
    }

    /// Label used by the question audit trail.
    pub fn label(&self) -> String {
        let id = self.question_id();
        let text = self.question_text();
        if id.is_empty() {
            text
        } else {
            format!("[{}] {}", id, text)
        }
    }
}

/// A single survey answer as returned by the API.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawResponse {
    #[serde(default)]
    pub num_protocolo: Value,
    #[serde(default)]
    pub nom_agente: Value,
    #[serde(default)]
    pub nom_valor: Value,
    #[serde(default)]
    pub nom_resposta: Value,
    #[serde(default)]
    pub dat_resposta: Value,
    #[serde(default, alias = "servico")]
    pub nom_servico: Value,
}

/// The canonical, normalized row kept by the dedup store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponseRecord {
    /// Normalized protocol, `None` when absent or zero.
    pub protocol: Option<String>,
    pub agent: String,
    pub sector: String,
    /// Grade on the survey scale; `None` when the value did not parse.
    pub grade: Option<i32>,
    pub comment: String,
    pub responded_at: String,
    pub account_id: String,
    pub account_name: String,
    pub survey_id: String,
    pub question_id: String,
    pub question_text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deep_link: Option<String>,
}

/// Where a report's records came from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReportSource {
    Api {
        base_url: String,
        range: DateRange,
        accounts: Vec<String>,
        surveys: Vec<String>,
    },
    Import {
        file: String,
        rows: usize,
    },
}

/// Report metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetadata {
    pub source: ReportSource,
    pub generated_at: DateTime<Utc>,
    pub merge_policy: String,
    /// Service the records were filtered to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service: Option<String>,
    pub records: usize,
    pub duration_seconds: f64,
}

/// Complete CSAT report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Report {
    pub metadata: ReportMetadata,
    pub analysis: Analysis,
    /// Fetch counters, absent for imports.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<RunReport>,
}

/// Render a loosely typed JSON scalar as a trimmed string.
///
/// Integral floats lose their fractional part (`123.0` -> `"123"`), empty
/// strings and nulls become `None`.
pub fn value_to_string(value: &Value) -> Option<String> {
    let s = match value {
        Value::Null => return None,
        Value::String(s) => s.trim().to_string(),
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                i.to_string()
            } else if let Some(u) = n.as_u64() {
                u.to_string()
            } else {
                match n.as_f64() {
                    Some(f) if f.is_finite() && f.fract() == 0.0 => format!("{:.0}", f),
                    Some(f) => f.to_string(),
                    None => n.to_string(),
                }
            }
        }
        Value::Bool(b) => b.to_string(),
        Value::Array(_) | Value::Object(_) => return None,
    };

    if s.is_empty() {
        None
    } else {
        Some(s)
    }
}
