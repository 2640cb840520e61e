//! csat-harvester - survey-response harvester for call-center REST APIs
//!
//! Downloads post-service survey answers, keeps the customer-service
//! questions, deduplicates responses and writes a CSAT report.
//!
//! Exit codes:
//!   0 - Success
//!   1 - Runtime error (authentication, config, I/O, etc.)

mod analysis;
mod api;
mod classifier;
mod cli;
mod config;
mod discovery;
mod fetcher;
mod import;
mod models;
mod normalizer;
mod report;
mod store;

use anyhow::{bail, Context, Result};
use api::{HttpSurveyApi, SurveyApi};
use chrono::Utc;
use classifier::QuestionClassifier;
use cli::{Args, OutputFormat};
use config::{Config, DEFAULT_CONFIG_FILE};
use fetcher::{FetchPlan, FetchSettings, Fetcher, ProgressSink, RunReport};
use indicatif::{ProgressBar, ProgressStyle};
use models::{DateRange, Report, ReportMetadata, ReportSource, ResponseRecord};
use normalizer::Normalizer;
use std::path::{Path, PathBuf};
use std::time::Instant;
use tracing::{debug, error, info, warn};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<()> {
    // Parse command-line arguments
    let args = Args::parse_args();

    // Validate arguments
    if let Err(e) = args.validate() {
        eprintln!("Error: {}", e);
        std::process::exit(1);
    }

    // Handle --init-config early (no logging needed)
    if args.init_config {
        return handle_init_config();
    }

    init_logging(&args);

    info!("csat-harvester v{}", env!("CARGO_PKG_VERSION"));
    debug!("Arguments: {:?}", args);

    match run(args).await {
        Ok(exit_code) => {
            std::process::exit(exit_code);
        }
        Err(e) => {
            error!("Run failed: {:#}", e);
            eprintln!("\n❌ Error: {:#}", e);
            std::process::exit(1);
        }
    }
}

/// Handle --init-config: generate a default config file.
fn handle_init_config() -> Result<()> {
    let path = Path::new(DEFAULT_CONFIG_FILE);

    if path.exists() {
        eprintln!(
            "⚠️  {} already exists. Remove it first or edit it manually.",
            DEFAULT_CONFIG_FILE
        );
        std::process::exit(1);
    }

    let content = Config::default_toml();
    std::fs::write(path, &content)
        .with_context(|| format!("Failed to write {}", DEFAULT_CONFIG_FILE))?;

    println!("✅ Created {} with default settings.", DEFAULT_CONFIG_FILE);
    println!("   Edit it to set the API URL, accounts, sectors and question rules.");
    Ok(())
}

/// Initialize logging based on verbosity settings.
fn init_logging(args: &Args) {
    let level = args.log_level(config_verbose(args));

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
    }
}

/// Run the harvest (or import) workflow. Returns the exit code.
async fn run(args: Args) -> Result<i32> {
    let start_time = Instant::now();

    let mut config = load_config(&args)?;
    config.merge_with_args(&args);

    let normalizer = Normalizer::from_config(&config);

    if let Some(ref path) = args.import {
        return run_import(&args, &config, &normalizer, path, start_time);
    }

    let (Some(from), Some(to)) = (args.from, args.to) else {
        bail!("--from and --to are required");
    };
    let range = DateRange::new(from, to)?;
    let accounts = resolve_accounts(&args, &config)?;

    // Step 1: Authenticate
    println!("🔐 Authenticating at {}", config.api.base_url);
    let client = api::build_http_client(config.api.timeout_seconds)?;
    let session = match api::authenticate(
        &client,
        &config.api.base_url,
        &config.api.login,
        &config.api.key,
    )
    .await
    {
        Ok(session) => session,
        Err(e) => {
            error!("{}", e);
            eprintln!("\n❌ {}", e);
            return Ok(1);
        }
    };
    let api = HttpSurveyApi::new(client, session);

    if args.list_surveys {
        return handle_list_surveys(&api, &accounts, &range, &config).await;
    }

    // Step 2: Decide which surveys to fetch
    let surveys = if args.surveys.is_empty() {
        println!("🔎 Discovering surveys for {} account(s)...", accounts.len());
        let found = discovery::discover_surveys(
            &api,
            &accounts,
            &range,
            config.fetch.page_size,
            config.fetch.max_pages,
        )
        .await;
        for survey in &found.items {
            println!("   📋 {}", survey);
        }
        found.items.into_iter().map(|s| s.id).collect()
    } else {
        args.surveys.clone()
    };

    if surveys.is_empty() {
        bail!("No surveys found for {} in {}", accounts.join(", "), range);
    }

    if let Some(ref service) = args.service {
        check_service(&api, &accounts, &range, &config, service).await;
    }

    // Step 3: Fetch
    println!(
        "\n📥 Fetching {} survey(s) for {} account(s), {}...",
        surveys.len(),
        accounts.len(),
        range
    );

    let classifier = QuestionClassifier::new(&config.classifier);
    let settings = FetchSettings::from(&config.fetch);
    let plan = FetchPlan {
        accounts: accounts.clone(),
        surveys: surveys.clone(),
        range,
        service: args.service.clone(),
    };

    let progress = BarProgress::new(args.quiet);
    let outcome = Fetcher::new(&api, &classifier, &normalizer, settings)
        .fetch(&plan, &progress)
        .await;
    progress.finish(outcome.report.records);

    let source = ReportSource::Api {
        base_url: config.api.base_url.clone(),
        range,
        accounts,
        surveys,
    };

    finish_report(
        &args,
        &config,
        &normalizer,
        outcome.records,
        source,
        Some(outcome.report),
        start_time,
    )
}

/// Handle --import: build the report from a CSV export.
fn run_import(
    args: &Args,
    config: &Config,
    normalizer: &Normalizer,
    path: &Path,
    start_time: Instant,
) -> Result<i32> {
    println!("📄 Importing {}", path.display());

    let outcome =
        import::import_csv(path, &config.import, normalizer, config.fetch.merge_policy)?;

    match outcome.grade_column {
        Some(ref column) => println!("   Grade column: {}", column),
        None => println!("   No grade column configured; grades set to the missing sentinel"),
    }
    println!(
        "   {} rows, {} records, {} duplicates",
        outcome.rows,
        outcome.records.len(),
        outcome.duplicates
    );

    let source = ReportSource::Import {
        file: path.display().to_string(),
        rows: outcome.rows,
    };

    finish_report(
        args,
        config,
        normalizer,
        outcome.records,
        source,
        None,
        start_time,
    )
}

/// Filter, aggregate, write the report and print the summary.
fn finish_report(
    args: &Args,
    config: &Config,
    normalizer: &Normalizer,
    mut records: Vec<ResponseRecord>,
    source: ReportSource,
    run: Option<RunReport>,
    start_time: Instant,
) -> Result<i32> {
    if let Some(ref service) = args.service {
        let before = records.len();
        records = analysis::filter_by_service(records, service);
        info!(
            "Service filter '{}' kept {} of {} records",
            service,
            records.len(),
            before
        );
    }

    println!("\n📝 Generating report...");

    let analysis = analysis::analyze(
        &records,
        normalizer.grades(),
        config.general.min_agent_responses,
    );

    let report = Report {
        metadata: ReportMetadata {
            source,
            generated_at: Utc::now(),
            merge_policy: config.fetch.merge_policy.to_string(),
            service: args.service.clone(),
            records: records.len(),
            duration_seconds: start_time.elapsed().as_secs_f64(),
        },
        analysis,
        run,
    };

    let output_path = args
        .output
        .clone()
        .unwrap_or_else(|| PathBuf::from(&config.general.output));

    let output = match args.format {
        OutputFormat::Json => report::generate_json_report(&report)?,
        OutputFormat::Markdown => report::generate_markdown_report(&report),
    };

    std::fs::write(&output_path, &output)
        .with_context(|| format!("Failed to write report to {}", output_path.display()))?;

    if let Some(ref csv_path) = args.export_csv {
        report::write_csv_export(&records, csv_path)?;
        println!("   Records exported to: {}", csv_path.display());
    }

    print_summary(&report);
    println!(
        "\n✅ Done! Report saved to: {}",
        output_path.display()
    );

    Ok(0)
}

fn print_summary(report: &Report) {
    let summary = &report.analysis.summary;

    println!("\n📊 CSAT Summary:");
    println!(
        "   Responses: {} | Graded: {} | Promoters: {}",
        summary.total, summary.graded, summary.promoters
    );
    match summary.csat {
        Some(csat) => println!("   CSAT: {:.1}%", csat),
        None => println!("   CSAT: n/a (no graded responses)"),
    }
    if let Some(best) = report.analysis.agents.first() {
        println!("   Top agent: {} ({} graded)", best.agent, best.summary.graded);
    }

    if let Some(ref run) = report.run {
        println!(
            "   Pages: {} | Retries: {} | Duplicates dropped: {}",
            run.pages_fetched, run.retries, run.duplicates
        );
        if !run.abandoned.is_empty() {
            println!(
                "   ⚠️  {} combination(s) abandoned after repeated failures",
                run.abandoned.len()
            );
        }
        if run.max_pages_hits > 0 {
            println!(
                "   ⚠️  Page limit reached {} time(s); raise --max-pages if data looks incomplete",
                run.max_pages_hits
            );
        }
    }
    println!(
        "   Duration: {:.1}s",
        report.metadata.duration_seconds
    );
}

/// Handle --list-surveys: print surveys and services, then exit.
async fn handle_list_surveys<A: SurveyApi + ?Sized>(
    api: &A,
    accounts: &[String],
    range: &DateRange,
    config: &Config,
) -> Result<i32> {
    println!("\n🔎 Listing surveys for {} ({} account(s))...\n", range, accounts.len());

    let surveys = discovery::discover_surveys(
        api,
        accounts,
        range,
        config.fetch.page_size,
        config.fetch.max_pages,
    )
    .await;

    if surveys.items.is_empty() {
        println!("   No surveys found.");
    } else {
        for survey in &surveys.items {
            println!("   📋 {}", survey);
        }
        println!("\n   Total: {} surveys", surveys.items.len());
    }

    let services =
        discovery::discover_services(api, accounts, range, config.fetch.service_fallback_days)
            .await;
    if !services.items.is_empty() {
        println!("\n   Services:");
        for service in &services.items {
            println!("     🏷️  {}", service);
        }
    }

    for (account, e) in surveys.errors.iter().chain(services.errors.iter()) {
        println!("   ⚠️  Account {}: {}", account, e);
    }

    println!("\n✅ Listing complete. No responses were fetched.");
    Ok(0)
}

/// Warn when the requested service is not among those the API reports.
async fn check_service<A: SurveyApi + ?Sized>(
    api: &A,
    accounts: &[String],
    range: &DateRange,
    config: &Config,
    service: &str,
) {
    let services =
        discovery::discover_services(api, accounts, range, config.fetch.service_fallback_days)
            .await;

    if services.items.is_empty() {
        debug!("No service list available to check '{}'", service);
        return;
    }

    let wanted = service.to_lowercase();
    if !services.items.iter().any(|s| s.to_lowercase() == wanted) {
        warn!(
            "Service '{}' not found; known services: {}",
            service,
            services.items.join(", ")
        );
    }
}

/// Accounts from the command line, or every configured account.
fn resolve_accounts(args: &Args, config: &Config) -> Result<Vec<String>> {
    if !args.accounts.is_empty() {
        return Ok(args.accounts.clone());
    }

    let accounts: Vec<String> = config.accounts.names.keys().cloned().collect();
    if accounts.is_empty() {
        bail!("No accounts given. Use --account or list them under [accounts.names] in the config");
    }
    Ok(accounts)
}

/// `general.verbose` from the config file, read before logging is up.
///
/// Load errors are ignored here; `load_config` reports them once logging runs.
fn config_verbose(args: &Args) -> bool {
    let config = match args.config {
        Some(ref path) => Config::load(path).ok(),
        None => Config::load_default().ok().flatten(),
    };
    config.is_some_and(|c| c.general.verbose)
}

/// Load configuration from file or use defaults.
fn load_config(args: &Args) -> Result<Config> {
    // Try explicit config path
    if let Some(ref config_path) = args.config {
        info!("Loading config from: {}", config_path.display());
        return Config::load(config_path);
    }

    // Try default location
    match Config::load_default() {
        Ok(Some(config)) => {
            info!("Loaded default config from {}", DEFAULT_CONFIG_FILE);
            Ok(config)
        }
        Ok(None) => {
            debug!("No config file found, using defaults");
            Ok(Config::default())
        }
        Err(e) => {
            warn!("Failed to load config: {}", e);
            Ok(Config::default())
        }
    }
}

/// Terminal progress bar over fetch combinations.
struct BarProgress {
    bar: ProgressBar,
}

impl BarProgress {
    fn new(hidden: bool) -> Self {
        let bar = if hidden {
            ProgressBar::hidden()
        } else {
            ProgressBar::new(0)
        };
        let style = ProgressStyle::default_bar()
            .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_bar())
            .progress_chars("#>-");
        bar.set_style(style);
        Self { bar }
    }

    fn finish(&self, records: usize) {
        self.bar
            .finish_with_message(format!("{} records collected", records));
    }
}

impl ProgressSink for BarProgress {
    fn on_progress(&self, done: usize, total: usize, label: &str) {
        self.bar.set_length(total as u64);
        self.bar.set_position(done as u64);
        self.bar.set_message(label.to_string());
    }
}
