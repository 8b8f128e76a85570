//! Search provider contract and implementations.
//!
//! The engine consumes a public-records index through [`SearchProvider`]:
//! one query in, a list of raw [`ProviderRecord`]s out. Errors are typed
//! so the queue can tell throttling apart from a query that will never
//! succeed:
//!
//! - [`ProviderError::Transient`]: timeout, connection failure, HTTP 408,
//!   429 or 5xx. The task goes to `rate_limited` and is retried later.
//! - [`ProviderError::Permanent`]: any other 4xx, an undecodable
//!   response, or a disabled provider. The task is marked `failed`.
//!
//! Providers never retry internally; retry policy belongs to the queue.
//!
//! Implementations:
//! - **[`HttpSearchProvider`]**: `POST {base_url}/search` with a JSON body.
//! - **[`FixtureSearchProvider`]**: answers from a local JSON index file.
//! - **[`DisabledProvider`]**: every search fails permanently.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::NaiveDate;
use serde::Deserialize;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use title_chain_core::models::{BookPage, Operator, ProviderRecord, SearchQuery, SearchType};

use crate::config::ProviderConfig;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProviderError {
    #[error("transient provider error: {message}")]
    Transient { message: String },
    #[error("permanent provider error: {message}")]
    Permanent { message: String },
}

impl ProviderError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient {
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent {
            message: message.into(),
        }
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }

    /// Classify an HTTP status that is not a success. Records indexes
    /// answer 403 when throttling or when a session lapses, so it is
    /// retried; only statuses that cannot change on a retry are permanent.
    pub fn from_status(status: u16, body: &str) -> Self {
        let message = format!("HTTP {}: {}", status, body.trim());
        match status {
            400 | 401 | 404 | 405 | 410 | 413 | 414 | 415 | 422 | 501 => Self::permanent(message),
            _ => Self::transient(message),
        }
    }
}

impl From<reqwest::Error> for ProviderError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            Self::permanent(format!("malformed response: {}", err))
        } else if err.is_builder() {
            Self::permanent(err.to_string())
        } else {
            Self::transient(err.to_string())
        }
    }
}

/// A public-records search backend.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    fn name(&self) -> &str;

    async fn search(&self, query: &SearchQuery) -> Result<Vec<ProviderRecord>, ProviderError>;
}

/// Instantiate the provider named by `provider.kind`.
pub fn build_provider(config: &ProviderConfig) -> Result<Arc<dyn SearchProvider>> {
    match config.kind.as_str() {
        "http" => {
            let base_url = config
                .base_url
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("provider.base_url required"))?;
            Ok(Arc::new(HttpSearchProvider::new(
                base_url,
                Duration::from_secs(config.timeout_secs),
            )?))
        }
        "fixture" => {
            let path = config
                .fixture_path
                .as_deref()
                .ok_or_else(|| anyhow::anyhow!("provider.fixture_path required"))?;
            Ok(Arc::new(FixtureSearchProvider::load(path)?))
        }
        "disabled" => Ok(Arc::new(DisabledProvider)),
        other => anyhow::bail!("Unknown provider kind: {}", other),
    }
}

// ============ Disabled Provider ============

pub struct DisabledProvider;

#[async_trait]
impl SearchProvider for DisabledProvider {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn search(&self, _query: &SearchQuery) -> Result<Vec<ProviderRecord>, ProviderError> {
        Err(ProviderError::permanent("search provider is disabled"))
    }
}

// ============ HTTP Provider ============

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    records: Vec<ProviderRecord>,
}

/// JSON-over-HTTP records index.
///
/// Request body is the serialized [`SearchQuery`]
/// (`{type, term, operator, date_from, date_to}`); the response is
/// `{"records": [...]}`.
pub struct HttpSearchProvider {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSearchProvider {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: format!("{}/search", base_url.trim_end_matches('/')),
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl SearchProvider for HttpSearchProvider {
    fn name(&self) -> &str {
        "http"
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<ProviderRecord>, ProviderError> {
        let response = self
            .client
            .post(&self.endpoint)
            .header("Content-Type", "application/json")
            .json(query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status.as_u16(), &body_text));
        }

        let body: SearchResponse = response.json().await?;
        Ok(body.records)
    }
}

// ============ Fixture Provider ============

#[derive(Debug, Clone, Deserialize)]
struct FixtureRecord {
    #[serde(flatten)]
    record: ProviderRecord,
    #[serde(default)]
    case_number: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
struct FixtureFile {
    #[serde(default)]
    records: Vec<FixtureRecord>,
}

/// Offline index backed by a JSON file of records.
///
/// Queries are answered the way a county index would: legal searches
/// compare against the record's legal text, name searches against every
/// party, and instrument, book/page and case searches against their
/// identifiers, all honouring the query operator and date bounds.
pub struct FixtureSearchProvider {
    records: Vec<FixtureRecord>,
}

impl FixtureSearchProvider {
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read fixture file: {}", path.display()))?;
        Self::from_json(&content)
            .with_context(|| format!("Failed to parse fixture file: {}", path.display()))
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let file: FixtureFile = serde_json::from_str(json)?;
        Ok(Self {
            records: file.records,
        })
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn squash(text: &str) -> String {
    text.split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_uppercase()
}

fn compare(operator: Operator, candidate: &str, term: &str) -> bool {
    let candidate = squash(candidate);
    let term = squash(term.trim_end_matches('*'));
    if term.is_empty() {
        return false;
    }
    match operator {
        Operator::Equals => candidate == term,
        Operator::Begins => candidate.starts_with(&term),
        Operator::Contains => candidate.contains(&term),
    }
}

fn within(date: Option<NaiveDate>, from: Option<NaiveDate>, to: Option<NaiveDate>) -> bool {
    let Some(date) = date else {
        return true;
    };
    from.is_none_or(|f| date >= f) && to.is_none_or(|t| date <= t)
}

fn book_page_of(record: &ProviderRecord) -> Option<BookPage> {
    match (&record.book, &record.page) {
        (Some(book), Some(page)) => Some(BookPage {
            book: book.trim().to_string(),
            page: page.trim().to_string(),
        }),
        _ => None,
    }
}

impl FixtureRecord {
    fn answers(&self, query: &SearchQuery) -> bool {
        let r = &self.record;
        if !within(r.record_date, query.date_from, query.date_to) {
            return false;
        }
        let term = query.term.as_str();
        match query.search_type {
            SearchType::Legal => r
                .legal_description
                .as_deref()
                .is_some_and(|l| compare(query.operator, l, term)),
            SearchType::Name => r.parties().any(|p| compare(query.operator, p, term)),
            SearchType::Instrument => r
                .instrument_number
                .as_deref()
                .is_some_and(|i| compare(Operator::Equals, i, term)),
            SearchType::BookPage | SearchType::Plat => {
                book_page_of(r).is_some_and(|bp| compare(Operator::Equals, &bp.term(), term))
            }
            SearchType::Case => self
                .case_number
                .as_deref()
                .is_some_and(|c| compare(query.operator, c, term)),
        }
    }
}

#[async_trait]
impl SearchProvider for FixtureSearchProvider {
    fn name(&self) -> &str {
        "fixture"
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<ProviderRecord>, ProviderError> {
        Ok(self
            .records
            .iter()
            .filter(|r| r.answers(query))
            .map(|r| r.record.clone())
            .collect())
    }
}
