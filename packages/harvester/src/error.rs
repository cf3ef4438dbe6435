//! Error types for the harvester.
//!
//! Fatal errors carry the endpoint, the query, the page index and the
//! endpoint's page-size ceiling at the time of failure, so a caller can log
//! them and resume the harvest.

use thiserror::Error;

/// Main error type for the harvester library.
#[derive(Debug, Error)]
pub enum HarvesterError {
    /// The query violates its own invariants (e.g. start date after end date).
    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    /// Invalid client configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Invalid date format.
    #[error("Invalid date format: '{0}'. Expected YYYY-MM-DD or YYYYMMDD (e.g., 2025-01-08)")]
    InvalidDate(String),

    /// The server rejected the request with a 4xx unrelated to page size.
    #[error(
        "Request to {endpoint} [{query}] page {page} (page size {page_size}, ceiling {ceiling}) \
         rejected with status {status}: {message}"
    )]
    RequestRejected {
        endpoint: String,
        query: String,
        page: u32,
        page_size: usize,
        ceiling: usize,
        status: u16,
        message: String,
    },

    /// Network or server failures outlasted the retry budget.
    ///
    /// The harvest can be resumed from `page`.
    #[error(
        "Fetching {endpoint} [{query}] page {page} (page size {page_size}, ceiling {ceiling}) \
         failed after {attempts} attempts: {message}"
    )]
    TransientFetchFailure {
        endpoint: String,
        query: String,
        page: u32,
        page_size: usize,
        ceiling: usize,
        attempts: u32,
        message: String,
    },

    /// No page size was accepted by the server.
    ///
    /// `page` is `None` when raised by ceiling discovery.
    #[error("No acceptable page size for {endpoint} [{query}]{}; rejected: {tried:?}", page_suffix(.page))]
    NoAcceptableSize {
        endpoint: String,
        query: String,
        page: Option<u32>,
        ceiling: usize,
        tried: Vec<usize>,
    },

    /// A successful response whose body could not be normalized.
    #[error("Malformed response from {endpoint} [{query}] page {page} (ceiling {ceiling}): {message}")]
    MalformedResponse {
        endpoint: String,
        query: String,
        page: u32,
        ceiling: usize,
        message: String,
    },

    /// HTTP client failure that is not worth retrying.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization error.
    #[error("JSON serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl HarvesterError {
    /// Page index to resume from, for errors that happened mid-harvest.
    #[must_use]
    pub fn resume_page(&self) -> Option<u32> {
        match self {
            Self::TransientFetchFailure { page, .. } => Some(*page),
            _ => None,
        }
    }
}

fn page_suffix(page: &Option<u32>) -> String {
    page.map(|page| format!(" page {page}")).unwrap_or_default()
}

/// Result type alias for harvester operations.
pub type Result<T> = std::result::Result<T, HarvesterError>;
