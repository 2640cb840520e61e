//! Command-line interface argument parsing.
//!
//! This module handles all CLI argument parsing using clap,
//! including validation and default values.

use crate::store::MergePolicy;
use chrono::NaiveDate;
use clap::Parser;
use std::path::PathBuf;

/// csat-harvester - survey-response harvester for call-center APIs
///
/// Downloads post-service survey answers for a date range, keeps only
/// customer-service questions, deduplicates them and reports CSAT.
///
/// Examples:
///   csat-harvester --from 2025-01-01 --to 2025-01-31 --account 12
///   csat-harvester --from 2025-01-01 --to 2025-03-31 --account 12 --account 14 --survey 77
///   csat-harvester --from 2025-01-01 --to 2025-01-31 --account 12 --list-surveys
///   csat-harvester --import export.csv --format json
///   csat-harvester --init-config
#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Args {
    /// First day of the range (YYYY-MM-DD)
    #[arg(
        long,
        value_name = "DATE",
        required_unless_present_any = ["init_config", "import"]
    )]
    pub from: Option<NaiveDate>,

    /// Last day of the range, inclusive (YYYY-MM-DD)
    #[arg(
        long,
        value_name = "DATE",
        required_unless_present_any = ["init_config", "import"]
    )]
    pub to: Option<NaiveDate>,

    /// Account id to harvest (repeatable)
    ///
    /// Defaults to every account listed under [accounts.names] in the config.
    #[arg(short, long = "account", value_name = "ID")]
    pub accounts: Vec<String>,

    /// Survey id to harvest (repeatable)
    ///
    /// When omitted, surveys are discovered per account.
    #[arg(short, long = "survey", value_name = "ID")]
    pub surveys: Vec<String>,

    /// Survey API base URL
    #[arg(long, value_name = "URL", env = "CSAT_API_URL")]
    pub base_url: Option<String>,

    /// API login
    #[arg(long, env = "CSAT_API_LOGIN")]
    pub login: Option<String>,

    /// API key
    #[arg(long, env = "CSAT_API_KEY", hide_env_values = true)]
    pub key: Option<String>,

    /// Request timeout in seconds
    #[arg(long, value_name = "SECS")]
    pub timeout: Option<u64>,

    /// Responses requested per page
    #[arg(long, value_name = "N")]
    pub page_size: Option<usize>,

    /// Split the range into chunks of at most this many days (0 disables)
    #[arg(long, value_name = "DAYS")]
    pub chunk_days: Option<i64>,

    /// Page limit per (chunk, account, survey)
    #[arg(long, value_name = "N")]
    pub max_pages: Option<usize>,

    /// How duplicate responses are resolved
    #[arg(long, value_name = "POLICY")]
    pub merge_policy: Option<MergePolicy>,

    /// Number of combinations fetched concurrently
    #[arg(long, value_name = "NUM")]
    pub concurrency: Option<usize>,

    /// Minimum graded responses for an agent to be ranked
    #[arg(long, value_name = "N")]
    pub min_responses: Option<usize>,

    /// Keep only responses of this service
    #[arg(long, value_name = "NAME")]
    pub service: Option<String>,

    /// Output file path for the report
    ///
    /// Defaults to the config's general.output.
    #[arg(short, long, value_name = "FILE")]
    pub output: Option<PathBuf>,

    /// Output format (markdown, json)
    #[arg(long, default_value = "markdown", value_name = "FORMAT")]
    pub format: OutputFormat,

    /// Also write every record to this CSV file
    #[arg(long, value_name = "FILE")]
    pub export_csv: Option<PathBuf>,

    /// List surveys and services for the range and exit
    #[arg(long)]
    pub list_surveys: bool,

    /// Build the report from a CSV export instead of the API
    #[arg(long, value_name = "FILE", conflicts_with = "list_surveys")]
    pub import: Option<PathBuf>,

    /// Path to configuration file
    ///
    /// If not specified, looks for .csat-harvester.toml in the current directory
    #[arg(short, long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging output
    #[arg(short, long)]
    pub verbose: bool,

    /// Run in quiet mode (minimal output)
    #[arg(short, long)]
    pub quiet: bool,

    /// Generate a default .csat-harvester.toml configuration file
    #[arg(long)]
    pub init_config: bool,
}

/// Output format for the report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, clap::ValueEnum)]
pub enum OutputFormat {
    /// Markdown format (default)
    #[default]
    Markdown,
    /// JSON format
    Json,
}

impl Args {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate the parsed arguments.
    pub fn validate(&self) -> Result<(), String> {
        if self.init_config {
            return Ok(());
        }

        if let (Some(from), Some(to)) = (self.from, self.to) {
            if from > to {
                return Err(format!("--from ({}) must not be after --to ({})", from, to));
            }
        }

        if self.page_size == Some(0) {
            return Err("Page size must be at least 1".to_string());
        }

        if self.concurrency == Some(0) {
            return Err("Concurrency must be at least 1".to_string());
        }

        if self.max_pages == Some(0) {
            return Err("Max pages must be at least 1".to_string());
        }

        if let Some(timeout) = self.timeout {
            if timeout == 0 {
                return Err("Timeout must be at least 1 second".to_string());
            }
        }

        if self.verbose && self.quiet {
            return Err("Cannot use both --verbose and --quiet".to_string());
        }

        if let Some(ref path) = self.import {
            if !path.is_file() {
                return Err(format!("Import file does not exist: {}", path.display()));
            }
        }

        Ok(())
    }

    /// Returns the log level based on verbosity settings.
    ///
    /// `config_verbose` is `general.verbose` from the config file; `--quiet`
    /// still wins over it.
    pub fn log_level(&self, config_verbose: bool) -> tracing::Level {
        if self.quiet {
            tracing::Level::ERROR
        } else if self.verbose || config_verbose {
            tracing::Level::DEBUG
        } else {
            tracing::Level::INFO
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn make_args() -> Args {
        Args {
            from: NaiveDate::from_ymd_opt(2025, 1, 1),
            to: NaiveDate::from_ymd_opt(2025, 1, 31),
            accounts: vec!["12".to_string()],
            surveys: Vec::new(),
            base_url: None,
            login: None,
            key: None,
            timeout: None,
            page_size: None,
            chunk_days: None,
            max_pages: None,
            merge_policy: None,
            concurrency: None,
            min_responses: None,
            service: None,
            output: None,
            format: OutputFormat::Markdown,
            export_csv: None,
            list_surveys: false,
            import: None,
            config: None,
            verbose: false,
            quiet: false,
            init_config: false,
        }
    }

    #[test]
    fn test_valid_args() {
        assert!(make_args().validate().is_ok());
    }

    #[test]
    fn test_validation_inverted_range() {
        let mut args = make_args();
        args.from = NaiveDate::from_ymd_opt(2025, 2, 1);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_zero_values() {
        let mut args = make_args();
        args.page_size = Some(0);
        assert!(args.validate().is_err());

        let mut args = make_args();
        args.concurrency = Some(0);
        assert!(args.validate().is_err());

        let mut args = make_args();
        args.timeout = Some(0);
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_conflicting_options() {
        let mut args = make_args();
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_validation_missing_import_file() {
        let mut args = make_args();
        args.import = Some(PathBuf::from("/nonexistent/export.csv"));
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_init_config_skips_validation() {
        let mut args = make_args();
        args.init_config = true;
        args.verbose = true;
        args.quiet = true;
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_parse_from_command_line() {
        let args = Args::try_parse_from([
            "csat-harvester",
            "--from",
            "2025-01-01",
            "--to",
            "2025-01-31",
            "--account",
            "12",
            "--account",
            "14",
            "--merge-policy",
            "priority",
            "--format",
            "json",
        ])
        .unwrap();

        assert_eq!(args.accounts, vec!["12", "14"]);
        assert_eq!(args.merge_policy, Some(MergePolicy::PriorityMerge));
        assert_eq!(args.format, OutputFormat::Json);
    }

    #[test]
    fn test_log_level() {
        let mut args = make_args();
        assert_eq!(args.log_level(false), tracing::Level::INFO);

        args.verbose = true;
        assert_eq!(args.log_level(false), tracing::Level::DEBUG);

        args.verbose = false;
        args.quiet = true;
        assert_eq!(args.log_level(false), tracing::Level::ERROR);
    }

    #[test]
    fn test_log_level_follows_config_verbose() {
        let mut args = make_args();
        assert_eq!(args.log_level(true), tracing::Level::DEBUG);

        args.quiet = true;
        assert_eq!(args.log_level(true), tracing::Level::ERROR);
    }
}
