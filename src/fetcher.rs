//! Paginated survey-response fetcher.
//!
//! Walks every (date chunk, account, survey) combination, pages through the
//! survey API until a termination signal fires, and folds the accepted
//! responses into a `DedupStore`. A failing combination is abandoned after a
//! bounded number of retries; it never aborts the run.

use crate::api::{ApiError, PageQuery, SurveyApi};
use crate::classifier::{Decision, QuestionAudit, QuestionClassifier};
use crate::config::FetchConfig;
use crate::models::{DateRange, QuestionBlock, ResponseRecord};
use crate::normalizer::{Normalizer, ResponseContext};
use crate::store::{DedupStore, MergePolicy, PutOutcome};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Tunables of a fetch run.
#[derive(Debug, Clone)]
pub struct FetchSettings {
    pub page_size: usize,
    pub chunk_days: i64,
    pub max_pages: usize,
    pub max_retries: usize,
    pub retry_backoff: Duration,
    pub last_page_ratio: f64,
    /// `0` disables the zero-yield valve.
    pub max_zero_yield_pages: usize,
    pub concurrency: usize,
    pub merge_policy: MergePolicy,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self::from(&FetchConfig::default())
    }
}

impl From<&FetchConfig> for FetchSettings {
    fn from(config: &FetchConfig) -> Self {
        Self {
            page_size: config.page_size.max(1),
            chunk_days: config.chunk_days,
            max_pages: config.max_pages,
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            last_page_ratio: config.last_page_ratio,
            max_zero_yield_pages: config.max_zero_yield_pages,
            concurrency: config.concurrency.max(1),
            merge_policy: config.merge_policy,
        }
    }
}

impl FetchSettings {
    /// Responses a page must hold for another page to be requested.
    fn full_page_threshold(&self) -> usize {
        let ratio = self.last_page_ratio.clamp(0.0, 1.0);
        (self.page_size as f64 * ratio).ceil() as usize
    }
}

/// What to fetch.
#[derive(Debug, Clone)]
pub struct FetchPlan {
    pub accounts: Vec<String>,
    pub surveys: Vec<String>,
    pub range: DateRange,
    /// Service the run is scoped to. Given to records whose response does
    /// not name a service of its own.
    pub service: Option<String>,
}

/// One unit of pagination.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Combination {
    pub chunk: DateRange,
    pub account_id: String,
    pub survey_id: String,
    pub service: Option<String>,
}

impl fmt::Display for Combination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "account {} / survey {} / {}",
            self.account_id, self.survey_id, self.chunk
        )
    }
}

impl FetchPlan {
    /// Combinations in processing order: chunk, then account, then survey.
    pub fn combinations(&self, chunk_days: i64) -> Vec<Combination> {
        let mut combos = Vec::new();
        for chunk in self.range.chunks(chunk_days) {
            for account in &self.accounts {
                for survey in &self.surveys {
                    combos.push(Combination {
                        chunk,
                        account_id: account.clone(),
                        survey_id: survey.clone(),
                        service: self.service.clone(),
                    });
                }
            }
        }
        combos
    }
}

/// Receives progress updates as combinations finish.
pub trait ProgressSink: Send + Sync {
    fn on_progress(&self, done: usize, total: usize, label: &str);
}

/// Why pagination of a combination stopped.
#[derive(Debug, Clone, PartialEq)]
pub enum StopReason {
    /// Short page.
    LastPage,
    /// Page without responses.
    EmptyPage,
    /// Safety valve: page limit reached.
    MaxPages,
    /// Safety valve: consecutive pages admitted nothing.
    ZeroYield,
    /// A request kept failing after its retries.
    Failed(ApiError),
}

/// A combination given up after repeated failures.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AbandonedCombination {
    pub combination: String,
    pub page: usize,
    pub error: String,
}

/// Run-level counters and failures.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunReport {
    pub combinations: usize,
    pub pages_fetched: usize,
    pub retries: usize,
    /// Responses seen in raw pages, accepted or not.
    pub raw_responses: usize,
    /// Responses under rejected questions.
    pub rejected_responses: usize,
    /// Responses dropped as duplicates of an already stored identity.
    pub duplicates: usize,
    /// Records in the final collection.
    pub records: usize,
    pub max_pages_hits: usize,
    pub zero_yield_stops: usize,
    pub abandoned: Vec<AbandonedCombination>,
    pub audit: QuestionAudit,
}

/// Result of a whole fetch run.
#[derive(Debug, Clone)]
pub struct FetchOutcome {
    pub records: Vec<ResponseRecord>,
    pub report: RunReport,
}

#[derive(Debug, Default)]
struct PageYield {
    admitted: usize,
    rejected: usize,
    duplicates: usize,
}

/// Everything one combination produced.
struct CombinationRun {
    store: DedupStore,
    audit: QuestionAudit,
    pages: usize,
    retries: usize,
    raw_responses: usize,
    rejected_responses: usize,
    duplicates: usize,
    stop: StopReason,
    failed_page: usize,
}

/// Drives the survey API through the classifier and normalizer into a store.
pub struct Fetcher<'a, A: SurveyApi + ?Sized> {
    api: &'a A,
    classifier: &'a QuestionClassifier,
    normalizer: &'a Normalizer,
    settings: FetchSettings,
}

impl<'a, A: SurveyApi + ?Sized> Fetcher<'a, A> {
    pub fn new(
        api: &'a A,
        classifier: &'a QuestionClassifier,
        normalizer: &'a Normalizer,
        settings: FetchSettings,
    ) -> Self {
        Self {
            api,
            classifier,
            normalizer,
            settings,
        }
    }

    /// Fetch every combination of the plan into a fresh store.
    pub async fn fetch(&self, plan: &FetchPlan, progress: &dyn ProgressSink) -> FetchOutcome {
        let mut store = DedupStore::new(self.settings.merge_policy);
        let report = self.fetch_into(plan, &mut store, progress).await;
        FetchOutcome {
            records: store.drain(),
            report,
        }
    }

    /// Fetch every combination of the plan into `store`.
    ///
    /// Combinations may run concurrently, but their results are folded into
    /// `store` in plan order so the outcome does not depend on timing.
    pub async fn fetch_into(
        &self,
        plan: &FetchPlan,
        store: &mut DedupStore,
        progress: &dyn ProgressSink,
    ) -> RunReport {
        let combos = plan.combinations(self.settings.chunk_days);
        let total = combos.len();
        let mut report = RunReport {
            combinations: total,
            ..RunReport::default()
        };

        info!(
            "Fetching {} combinations ({} accounts x {} surveys x {} chunks)",
            total,
            plan.accounts.len(),
            plan.surveys.len(),
            plan.range.chunks(self.settings.chunk_days).len()
        );

        let mut runs = stream::iter(combos.iter().map(|combo| async move {
            let run = self.fetch_combination(combo).await;
            (combo, run)
        }))
        .buffered(self.settings.concurrency);

        let mut done = 0;
        while let Some((combo, run)) = runs.next().await {
            done += 1;

            report.pages_fetched += run.pages;
            report.retries += run.retries;
            report.raw_responses += run.raw_responses;
            report.rejected_responses += run.rejected_responses;
            report.duplicates += run.duplicates;
            report.audit.merge(run.audit);

            match run.stop {
                StopReason::MaxPages => report.max_pages_hits += 1,
                StopReason::ZeroYield => report.zero_yield_stops += 1,
                StopReason::Failed(ref error) => {
                    report.abandoned.push(AbandonedCombination {
                        combination: combo.to_string(),
                        page: run.failed_page,
                        error: error.to_string(),
                    });
                }
                StopReason::LastPage | StopReason::EmptyPage => {}
            }

            let offered = run.store.len();
            let admitted = store.absorb(run.store);
            report.duplicates += offered - admitted;

            progress.on_progress(done, total, &combo.to_string());
        }

        report.records = store.len();
        info!(
            "Fetch finished: {} records, {} pages, {} retries, {} abandoned",
            report.records,
            report.pages_fetched,
            report.retries,
            report.abandoned.len()
        );
        report
    }

    /// Paginate one combination into its own store.
    async fn fetch_combination(&self, combo: &Combination) -> CombinationRun {
        let mut run = CombinationRun {
            store: DedupStore::new(self.settings.merge_policy),
            audit: QuestionAudit::default(),
            pages: 0,
            retries: 0,
            raw_responses: 0,
            rejected_responses: 0,
            duplicates: 0,
            stop: StopReason::EmptyPage,
            failed_page: 0,
        };

        let threshold = self.settings.full_page_threshold();
        let mut zero_yield_streak = 0;
        let mut page = 1;

        loop {
            if page > self.settings.max_pages {
                warn!(
                    "{}: page limit of {} reached, stopping",
                    combo, self.settings.max_pages
                );
                run.stop = StopReason::MaxPages;
                break;
            }

            let query = PageQuery {
                range: combo.chunk,
                account_id: combo.account_id.clone(),
                survey_id: combo.survey_id.clone(),
                page,
                limit: self.settings.page_size,
            };

            let blocks = match self.request_page(&query, &mut run.retries).await {
                Ok(blocks) => blocks,
                Err(error) => {
                    warn!("{}: abandoning at page {}: {}", combo, page, error);
                    run.stop = StopReason::Failed(error);
                    run.failed_page = page;
                    break;
                }
            };
            run.pages += 1;

            let raw: usize = blocks.iter().map(|b| b.respostas.len()).sum();
            if raw == 0 {
                debug!("{}: page {} is empty", combo, page);
                run.stop = StopReason::EmptyPage;
                break;
            }
            run.raw_responses += raw;

            let yielded = self.merge_page(&blocks, combo, &mut run.store, &mut run.audit);
            run.rejected_responses += yielded.rejected;
            run.duplicates += yielded.duplicates;
            debug!(
                "{}: page {} had {} responses, {} admitted",
                combo, page, raw, yielded.admitted
            );

            if raw < threshold {
                run.stop = StopReason::LastPage;
                break;
            }

            if yielded.admitted == 0 {
                zero_yield_streak += 1;
                if self.settings.max_zero_yield_pages > 0
                    && zero_yield_streak >= self.settings.max_zero_yield_pages
                {
                    warn!(
                        "{}: {} consecutive pages without new records, stopping",
                        combo, zero_yield_streak
                    );
                    run.stop = StopReason::ZeroYield;
                    break;
                }
            } else {
                zero_yield_streak = 0;
            }

            page += 1;
        }

        run
    }

    /// Request a page, retrying failures with a fixed pause.
    async fn request_page(
        &self,
        query: &PageQuery,
        retries: &mut usize,
    ) -> Result<Vec<QuestionBlock>, ApiError> {
        let mut attempt = 0;
        loop {
            match self.api.fetch_page(query).await {
                Ok(blocks) => return Ok(blocks),
                Err(error) if attempt < self.settings.max_retries => {
                    attempt += 1;
                    *retries += 1;
                    warn!(
                        "Page {} of survey {} (account {}) failed, retry {}/{}: {}",
                        query.page,
                        query.survey_id,
                        query.account_id,
                        attempt,
                        self.settings.max_retries,
                        error
                    );
                    tokio::time::sleep(self.settings.retry_backoff).await;
                }
                Err(error) => return Err(error),
            }
        }
    }

    /// Classify, normalize and store the responses of one page.
    fn merge_page(
        &self,
        blocks: &[QuestionBlock],
        combo: &Combination,
        store: &mut DedupStore,
        audit: &mut QuestionAudit,
    ) -> PageYield {
        let mut yielded = PageYield::default();

        for block in blocks {
            let question_id = block.question_id();
            let question_text = block.question_text();
            let decision = self.classifier.classify(
                &question_text,
                Some(&question_id),
                Some(&combo.survey_id),
            );
            let label = block.label();
            debug!("{}: question {} scored {}", combo, label, decision.score());
            audit.record(&label, &decision);

            let Decision::Accept { priority } = decision else {
                yielded.rejected += block.respostas.len();
                continue;
            };

            let ctx = ResponseContext {
                account_id: &combo.account_id,
                survey_id: &combo.survey_id,
                question_id: &question_id,
                question_text: &question_text,
                service: combo.service.as_deref(),
            };

            for raw in &block.respostas {
                let record = self.normalizer.normalize(raw, &ctx);
                match store.insert(record, priority) {
                    PutOutcome::Inserted | PutOutcome::Replaced => yielded.admitted += 1,
                    PutOutcome::Kept => yielded.duplicates += 1,
                }
            }
        }

        yielded
    }
}
