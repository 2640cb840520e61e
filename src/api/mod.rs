//! Survey REST API access.
//!
//! The fetcher talks to the API through the `SurveyApi` trait so it can be
//! driven by the HTTP client in production and by in-memory fakes in tests.

pub mod client;

pub use client::{authenticate, build_http_client, HttpSurveyApi};

use crate::models::{DateRange, QuestionBlock, Survey};
use async_trait::async_trait;

/// Failure of a single API call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ApiError {
    #[error("request failed: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    #[error("API returned status {status}: {body}")]
    Status { status: u16, body: String },
    #[error("failed to decode response: {0}")]
    Decode(String),
    #[error("authentication failed: {0}")]
    Auth(String),
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            ApiError::Timeout
        } else if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else {
            ApiError::Transport(e.to_string())
        }
    }
}

/// One page request for survey responses.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageQuery {
    pub range: DateRange,
    pub account_id: String,
    pub survey_id: String,
    /// 1-based page number.
    pub page: usize,
    pub limit: usize,
}

/// Operations the harvester needs from the survey API.
#[async_trait]
pub trait SurveyApi: Send + Sync {
    /// One page of surveys answered for `account_id` within `range`.
    async fn list_surveys(
        &self,
        account_id: &str,
        range: &DateRange,
        page: usize,
        limit: usize,
    ) -> Result<Vec<Survey>, ApiError>;

    /// One page of question blocks with their responses.
    async fn fetch_page(&self, query: &PageQuery) -> Result<Vec<QuestionBlock>, ApiError>;

    /// Service names with activity for `account_id` within `range`.
    async fn list_services(
        &self,
        account_id: &str,
        range: &DateRange,
    ) -> Result<Vec<String>, ApiError>;
}
