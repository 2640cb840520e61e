//! Response normalization.
//!
//! Turns a raw API answer plus the context it was fetched in (account,
//! survey, question) into a canonical `ResponseRecord`.

use crate::config::{AccountsConfig, Config};
use crate::models::{value_to_string, RawResponse, ResponseRecord};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Agent name used when the API sends none.
pub const UNKNOWN_AGENT: &str = "DESCONHECIDO";

/// Sector of agents no roster entry matches.
pub const DEFAULT_SECTOR: &str = "OUTROS";

/// Characters of the protocol kept for the deep link.
const DEEP_LINK_SUFFIX_LEN: usize = 7;

/// One roster entry: agents whose name contains any pattern belong to `name`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SectorRule {
    pub name: String,
    #[serde(default)]
    pub patterns: Vec<String>,
}

/// Grade coercion and scoring rules.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GradePolicy {
    /// Treat `0` as a real grade instead of a missing one.
    #[serde(default = "default_true")]
    pub accept_zero: bool,

    /// Grade given to imported rows whose grade is missing or unreadable.
    /// Falls outside `min..=max`, so those rows never count in statistics.
    #[serde(default = "default_missing_sentinel")]
    pub missing_sentinel: i32,

    /// Lowest grade counted in statistics.
    #[serde(default)]
    pub min: i32,

    /// Highest grade counted in statistics.
    #[serde(default = "default_max_grade")]
    pub max: i32,

    /// Grades at or above this are promoters.
    #[serde(default = "default_promoter_threshold")]
    pub promoter_threshold: i32,
}

impl Default for GradePolicy {
    fn default() -> Self {
        Self {
            accept_zero: true,
            missing_sentinel: default_missing_sentinel(),
            min: 0,
            max: default_max_grade(),
            promoter_threshold: default_promoter_threshold(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_missing_sentinel() -> i32 {
    -1
}

fn default_max_grade() -> i32 {
    10
}

fn default_promoter_threshold() -> i32 {
    8
}

impl GradePolicy {
    /// Coerce a raw grade to an integer; `None` when it does not parse.
    pub fn coerce(&self, value: &Value) -> Option<i32> {
        let text = value_to_string(value)?;
        self.coerce_str(&text)
    }

    pub fn coerce_str(&self, text: &str) -> Option<i32> {
        let parsed: f64 = text.trim().replace(',', ".").parse().ok()?;
        if !parsed.is_finite() {
            return None;
        }

        let grade = parsed.round() as i32;
        if grade == 0 && !self.accept_zero {
            return None;
        }
        Some(grade)
    }

    /// Whether a grade counts towards statistics.
    pub fn is_valid(&self, grade: i32) -> bool {
        grade >= self.min && grade <= self.max
    }

    pub fn is_promoter(&self, grade: i32) -> bool {
        self.is_valid(grade) && grade >= self.promoter_threshold
    }
}

/// Where a raw response came from.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResponseContext<'a> {
    pub account_id: &'a str,
    pub survey_id: &'a str,
    pub question_id: &'a str,
    pub question_text: &'a str,
    /// Service name used when the response carries none.
    pub service: Option<&'a str>,
}

/// Normalizes raw responses into canonical rows.
#[derive(Debug, Clone)]
pub struct Normalizer {
    sectors: Vec<SectorRule>,
    accounts: BTreeMap<String, String>,
    unknown_account: String,
    grades: GradePolicy,
    deep_link_template: String,
}

impl Normalizer {
    pub fn new(
        sectors: &[SectorRule],
        accounts: &AccountsConfig,
        grades: GradePolicy,
        deep_link_template: impl Into<String>,
    ) -> Self {
        let sectors = sectors
            .iter()
            .map(|rule| SectorRule {
                name: rule.name.clone(),
                patterns: rule
                    .patterns
                    .iter()
                    .map(|p| p.trim().to_uppercase())
                    .filter(|p| !p.is_empty())
                    .collect(),
            })
            .collect();

        Self {
            sectors,
            accounts: accounts.names.clone(),
            unknown_account: accounts.unknown_label.clone(),
            grades,
            deep_link_template: deep_link_template.into(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            &config.sectors,
            &config.accounts,
            config.grades.clone(),
            config.api.deep_link_template.clone(),
        )
    }

    pub fn grades(&self) -> &GradePolicy {
        &self.grades
    }

    /// Normalize one API response.
    pub fn normalize(&self, raw: &RawResponse, ctx: &ResponseContext<'_>) -> ResponseRecord {
        let protocol = normalize_protocol(&raw.num_protocolo);
        let agent = normalize_agent(value_to_string(&raw.nom_agente).as_deref());
        let service = value_to_string(&raw.nom_servico).or_else(|| ctx.service.map(String::from));

        ResponseRecord {
            deep_link: self.deep_link(protocol.as_deref()),
            protocol,
            sector: self.sector_for(&agent),
            agent,
            grade: self.grades.coerce(&raw.nom_valor),
            comment: value_to_string(&raw.nom_resposta).unwrap_or_default(),
            responded_at: value_to_string(&raw.dat_resposta).unwrap_or_default(),
            account_id: ctx.account_id.to_string(),
            account_name: self.account_name(ctx.account_id),
            survey_id: ctx.survey_id.to_string(),
            question_id: ctx.question_id.to_string(),
            question_text: ctx.question_text.to_string(),
            service,
        }
    }

    /// First roster sector whose pattern appears in the (normalized) agent name.
    pub fn sector_for(&self, agent: &str) -> String {
        let agent = agent.to_uppercase();
        self.sectors
            .iter()
            .find(|rule| rule.patterns.iter().any(|p| agent.contains(p.as_str())))
            .map(|rule| rule.name.clone())
            .unwrap_or_else(|| DEFAULT_SECTOR.to_string())
    }

    pub fn account_name(&self, account_id: &str) -> String {
        self.accounts
            .get(account_id.trim())
            .cloned()
            .unwrap_or_else(|| self.unknown_account.clone())
    }

    /// Deep link built from the last characters of the protocol.
    pub fn deep_link(&self, protocol: Option<&str>) -> Option<String> {
        let protocol = protocol?;
        let chars: Vec<char> = protocol.chars().collect();
        let start = chars.len().saturating_sub(DEEP_LINK_SUFFIX_LEN);
        let suffix: String = chars[start..].iter().collect();
        Some(self.deep_link_template.replace("{protocol}", &suffix))
    }
}

/// Normalize a protocol value.
///
/// Numeric renderings lose a trailing `.0`; absent, placeholder and
/// all-zero protocols become `None`. Leading zeros are kept.
pub fn normalize_protocol(value: &Value) -> Option<String> {
    let text = value_to_string(value)?;
    normalize_protocol_str(&text)
}

pub fn normalize_protocol_str(text: &str) -> Option<String> {
    let mut protocol = text.trim();

    if let Some((int_part, frac)) = protocol.split_once('.') {
        if !int_part.is_empty()
            && int_part.chars().all(|c| c.is_ascii_digit())
            && !frac.is_empty()
            && frac.chars().all(|c| c == '0')
        {
            protocol = int_part;
        }
    }

    if protocol.is_empty() {
        return None;
    }

    let lowered = protocol.to_lowercase();
    if matches!(lowered.as_str(), "nan" | "none" | "null") {
        return None;
    }

    if protocol.chars().all(|c| c == '0') {
        return None;
    }

    Some(protocol.to_string())
}

/// Trim and upper-case an agent name, falling back to `DESCONHECIDO`.
pub fn normalize_agent(name: Option<&str>) -> String {
    let name = name.map(str::trim).unwrap_or("").to_uppercase();
    if name.is_empty() || matches!(name.as_str(), "NAN" | "NONE" | "NULL") {
        UNKNOWN_AGENT.to_string()
    } else {
        name
    }
}
