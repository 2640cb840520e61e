//! Configuration file handling.
//!
//! This module handles loading and merging configuration from
//! `.csat-harvester.toml` files.

use crate::classifier::RuleSet;
use crate::normalizer::{GradePolicy, SectorRule};
use crate::store::MergePolicy;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

/// Default config file name, looked up in the working directory.
pub const DEFAULT_CONFIG_FILE: &str = ".csat-harvester.toml";

/// Root configuration structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// General settings.
    #[serde(default)]
    pub general: GeneralConfig,

    /// Survey API connection settings.
    #[serde(default)]
    pub api: ApiConfig,

    /// Pagination, retry and merge settings.
    #[serde(default)]
    pub fetch: FetchConfig,

    /// Question inclusion rules.
    #[serde(default)]
    pub classifier: RuleSet,

    /// Grade coercion and scoring.
    #[serde(default)]
    pub grades: GradePolicy,

    /// Account display names.
    #[serde(default)]
    pub accounts: AccountsConfig,

    /// Manual CSV import settings.
    #[serde(default)]
    pub import: ImportConfig,

    /// Agent roster: sector name to agent-name substrings, first match wins.
    #[serde(default)]
    pub sectors: Vec<SectorRule>,
}

/// General application settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Default output file path.
    #[serde(default = "default_output")]
    pub output: String,

    /// Enable verbose logging by default.
    #[serde(default)]
    pub verbose: bool,

    /// Minimum responses for an agent to appear in the ranking.
    #[serde(default = "default_min_responses")]
    pub min_agent_responses: usize,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            output: default_output(),
            verbose: false,
            min_agent_responses: default_min_responses(),
        }
    }
}

fn default_output() -> String {
    "csat_report.md".to_string()
}

fn default_min_responses() -> usize {
    1
}

/// Survey API connection settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    /// Base URL, without the `/rest/v2` suffix.
    #[serde(default = "default_base_url")]
    pub base_url: String,

    /// API user login.
    #[serde(default)]
    pub login: String,

    /// API user key.
    #[serde(default)]
    pub key: String,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout")]
    pub timeout_seconds: u64,

    /// Deep link template; `{protocol}` is replaced by the protocol suffix.
    #[serde(default = "default_deep_link_template")]
    pub deep_link_template: String,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            login: String::new(),
            key: String::new(),
            timeout_seconds: default_timeout(),
            deep_link_template: default_deep_link_template(),
        }
    }
}

fn default_base_url() -> String {
    "https://api.example.com".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_deep_link_template() -> String {
    "https://app.example.com/atendimento/{protocol}".to_string()
}

/// Pagination, retry and merge settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchConfig {
    /// Records requested per page.
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Maximum days per date sub-range.
    #[serde(default = "default_chunk_days")]
    pub chunk_days: i64,

    /// Hard limit on pages per combination.
    #[serde(default = "default_max_pages")]
    pub max_pages: usize,

    /// Retries after the first failed attempt of a page request.
    #[serde(default = "default_max_retries")]
    pub max_retries: usize,

    /// Fixed pause between attempts, in milliseconds.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,

    /// A page holding fewer than `page_size * last_page_ratio` responses is the last one.
    #[serde(default = "default_last_page_ratio")]
    pub last_page_ratio: f64,

    /// Consecutive non-empty pages without a new record before giving up.
    #[serde(default = "default_max_zero_yield_pages")]
    pub max_zero_yield_pages: usize,

    /// Combinations fetched at the same time.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// Identity key and collision policy of the dedup store.
    #[serde(default)]
    pub merge_policy: MergePolicy,

    /// Window used for service discovery when the full range yields nothing.
    #[serde(default = "default_service_fallback_days")]
    pub service_fallback_days: i64,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            page_size: default_page_size(),
            chunk_days: default_chunk_days(),
            max_pages: default_max_pages(),
            max_retries: default_max_retries(),
            retry_backoff_ms: default_retry_backoff_ms(),
            last_page_ratio: default_last_page_ratio(),
            max_zero_yield_pages: default_max_zero_yield_pages(),
            concurrency: default_concurrency(),
            merge_policy: MergePolicy::default(),
            service_fallback_days: default_service_fallback_days(),
        }
    }
}

fn default_page_size() -> usize {
    500
}

fn default_chunk_days() -> i64 {
    20
}

fn default_max_pages() -> usize {
    200
}

fn default_max_retries() -> usize {
    2
}

fn default_retry_backoff_ms() -> u64 {
    1500
}

fn default_last_page_ratio() -> f64 {
    0.9
}

fn default_max_zero_yield_pages() -> usize {
    3
}

fn default_concurrency() -> usize {
    1
}

fn default_service_fallback_days() -> i64 {
    30
}

/// Account display names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccountsConfig {
    /// Label for accounts missing from `names`.
    #[serde(default = "default_unknown_account")]
    pub unknown_label: String,

    /// Account id to display name.
    #[serde(default)]
    pub names: BTreeMap<String, String>,
}

impl Default for AccountsConfig {
    fn default() -> Self {
        Self {
            unknown_label: default_unknown_account(),
            names: BTreeMap::new(),
        }
    }
}

fn default_unknown_account() -> String {
    "desconhecida/outra".to_string()
}

/// Manual CSV import settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Every keyword must appear in the grade column header.
    #[serde(default = "default_grade_keywords")]
    pub grade_column_keywords: Vec<String>,

    #[serde(default = "default_protocol_columns")]
    pub protocol_columns: Vec<String>,

    #[serde(default = "default_agent_columns")]
    pub agent_columns: Vec<String>,

    #[serde(default = "default_date_columns")]
    pub date_columns: Vec<String>,

    #[serde(default = "default_comment_columns")]
    pub comment_columns: Vec<String>,

    /// Account the imported rows are attributed to.
    #[serde(default)]
    pub account_id: String,
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self {
            grade_column_keywords: default_grade_keywords(),
            protocol_columns: default_protocol_columns(),
            agent_columns: default_agent_columns(),
            date_columns: default_date_columns(),
            comment_columns: default_comment_columns(),
            account_id: String::new(),
        }
    }
}

fn to_strings(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

fn default_grade_keywords() -> Vec<String> {
    to_strings(&["sobre sua experiência", "atendimento"])
}

fn default_protocol_columns() -> Vec<String> {
    to_strings(&["protocolo", "num_protocolo"])
}

fn default_agent_columns() -> Vec<String> {
    to_strings(&["agente", "nom_agente", "atendente"])
}

fn default_date_columns() -> Vec<String> {
    to_strings(&["data", "dat_resposta", "data da resposta"])
}

fn default_comment_columns() -> Vec<String> {
    to_strings(&["comentário", "comentario", "nom_resposta"])
}

impl Config {
    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Try to load configuration from the default location.
    ///
    /// Returns `Ok(None)` if the file doesn't exist, `Err` if it exists but can't be parsed.
    pub fn load_default() -> Result<Option<Self>> {
        let default_path = Path::new(DEFAULT_CONFIG_FILE);

        if default_path.exists() {
            Ok(Some(Self::load(default_path)?))
        } else {
            Ok(None)
        }
    }

    /// Merge this configuration with CLI arguments.
    ///
    /// CLI arguments take precedence over config file settings, but only
    /// when they were explicitly provided.
    pub fn merge_with_args(&mut self, args: &crate::cli::Args) {
        if let Some(ref base_url) = args.base_url {
            self.api.base_url = base_url.clone();
        }
        if let Some(ref login) = args.login {
            self.api.login = login.clone();
        }
        if let Some(ref key) = args.key {
            self.api.key = key.clone();
        }
        if let Some(timeout) = args.timeout {
            self.api.timeout_seconds = timeout;
        }

        if let Some(page_size) = args.page_size {
            self.fetch.page_size = page_size;
        }
        if let Some(chunk_days) = args.chunk_days {
            self.fetch.chunk_days = chunk_days;
        }
        if let Some(max_pages) = args.max_pages {
            self.fetch.max_pages = max_pages;
        }
        if let Some(concurrency) = args.concurrency {
            self.fetch.concurrency = concurrency;
        }
        if let Some(policy) = args.merge_policy {
            self.fetch.merge_policy = policy;
        }

        if let Some(min) = args.min_responses {
            self.general.min_agent_responses = min;
        }

        // Flags always override
        if args.verbose {
            self.general.verbose = true;
        }
    }

    /// Generate a default configuration file content.
    pub fn default_toml() -> String {
        let config = Config::default();
        toml::to_string_pretty(&config).unwrap_or_else(|_| String::new())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.fetch.page_size, 500);
        assert_eq!(config.fetch.chunk_days, 20);
        assert_eq!(config.fetch.max_retries, 2);
        assert_eq!(config.fetch.merge_policy, MergePolicy::Composite);
        assert_eq!(config.accounts.unknown_label, "desconhecida/outra");
        assert!(config.classifier.deny_terms.contains(&"internet".to_string()));
    }

    #[test]
    fn test_parse_config() {
        let toml_content = r#"
[api]
base_url = "https://cc.example.net"
login = "robot"

[fetch]
page_size = 100
merge_policy = "priority"

[accounts.names]
"12" = "Conta Norte"

[[sectors]]
name = "SUPORTE"
patterns = ["SUP_", "N2"]

[[classifier.excluded_questions]]
survey = "77"
question = "301"
"#;

        let config: Config = toml::from_str(toml_content).unwrap();
        assert_eq!(config.api.base_url, "https://cc.example.net");
        assert_eq!(config.api.login, "robot");
        assert_eq!(config.api.timeout_seconds, 30);
        assert_eq!(config.fetch.page_size, 100);
        assert_eq!(config.fetch.merge_policy, MergePolicy::PriorityMerge);
        assert_eq!(config.accounts.names.get("12").map(String::as_str), Some("Conta Norte"));
        assert_eq!(config.sectors.len(), 1);
        assert_eq!(config.sectors[0].patterns, vec!["SUP_", "N2"]);
        assert_eq!(config.classifier.excluded_questions.len(), 1);
        // Untouched sections keep their defaults
        assert!(config.classifier.allow_terms.contains(&"atendimento".to_string()));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[fetch]\nmax_pages = 7").unwrap();

        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.fetch.max_pages, 7);
    }

    #[test]
    fn test_load_rejects_invalid_toml() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[fetch\nmax_pages = ").unwrap();

        assert!(Config::load(file.path()).is_err());
    }

    #[test]
    fn test_default_toml_generation() {
        let toml_str = Config::default_toml();
        assert!(!toml_str.is_empty());
        assert!(toml_str.contains("[api]"));
        assert!(toml_str.contains("[fetch]"));
        assert!(toml_str.contains("[classifier]"));

        let reparsed: Config = toml::from_str(&toml_str).unwrap();
        assert_eq!(reparsed.fetch.page_size, 500);
    }
}
