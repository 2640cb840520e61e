//! Survey and service discovery.

use crate::api::{ApiError, SurveyApi};
use crate::models::{DateRange, Survey};
use std::collections::{BTreeSet, HashSet};
use tracing::{debug, info, warn};

/// Items found across accounts plus the per-account failures.
#[derive(Debug, Clone)]
pub struct Discovery<T> {
    pub items: Vec<T>,
    pub errors: Vec<(String, ApiError)>,
}

impl<T> Default for Discovery<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            errors: Vec::new(),
        }
    }
}

/// Page through the survey listing of every account.
///
/// Surveys are deduplicated by id, keeping the first name seen. A failing
/// account is logged and skipped.
pub async fn discover_surveys<A: SurveyApi + ?Sized>(
    api: &A,
    accounts: &[String],
    range: &DateRange,
    page_size: usize,
    max_pages: usize,
) -> Discovery<Survey> {
    let mut found = Discovery::default();
    let mut seen = HashSet::new();
    let page_size = page_size.max(1);

    for account in accounts {
        let mut page = 1;
        while page <= max_pages {
            let surveys = match api.list_surveys(account, range, page, page_size).await {
                Ok(surveys) => surveys,
                Err(e) => {
                    warn!("Survey listing failed for account {}: {}", account, e);
                    found.errors.push((account.clone(), e));
                    break;
                }
            };

            let count = surveys.len();
            debug!("Account {}: page {} listed {} surveys", account, page, count);
            for survey in surveys {
                if seen.insert(survey.id.clone()) {
                    found.items.push(survey);
                }
            }

            if count < page_size {
                break;
            }
            page += 1;
        }
    }

    info!(
        "Discovered {} surveys across {} accounts",
        found.items.len(),
        accounts.len()
    );
    found
}

/// Collect service names with activity in `range`.
///
/// When the full range fails or comes back empty for an account, the last
/// `fallback_days` days are tried instead.
pub async fn discover_services<A: SurveyApi + ?Sized>(
    api: &A,
    accounts: &[String],
    range: &DateRange,
    fallback_days: i64,
) -> Discovery<String> {
    let mut found = Discovery::default();
    let mut services = BTreeSet::new();

    for account in accounts {
        let first = api.list_services(account, range).await;
        let result = match first {
            Ok(names) if !names.is_empty() => Ok(names),
            first => {
                let fallback = range.tail(fallback_days);
                if fallback == *range {
                    first
                } else {
                    if let Err(ref e) = first {
                        warn!("Service listing failed for account {}: {}", account, e);
                    }
                    info!(
                        "Retrying service listing for account {} over {}",
                        account, fallback
                    );
                    api.list_services(account, &fallback).await
                }
            }
        };

        match result {
            Ok(names) => services.extend(names),
            Err(e) => {
                warn!("Service listing failed for account {}: {}", account, e);
                found.errors.push((account.clone(), e));
            }
        }
    }

    found.items = services.into_iter().collect();
    found
}
