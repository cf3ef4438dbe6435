//! Configuration constants, client settings and date validation.

use std::sync::LazyLock;
use std::time::Duration;

use chrono::NaiveDate;
use regex::Regex;

use crate::error::{HarvesterError, Result};

/// Base URL of the PNCP consultation API (paginated listings).
pub const CONSULTA_BASE_URL: &str = "https://pncp.gov.br/api/consulta/v1";

/// Base URL of the PNCP resource API (per-purchase items and files).
pub const PNCP_BASE_URL: &str = "https://pncp.gov.br/api/pncp/v1";

/// HTTP timeout in seconds for a single request.
pub const HTTP_TIMEOUT_SECS: u64 = 30;

/// Maximum number of attempts for a request failing transiently.
pub const MAX_RETRIES: u32 = 3;

/// Base delay for exponential backoff (milliseconds).
pub const RETRY_BASE_DELAY_MS: u64 = 500;

/// Backoff growth factor between attempts.
pub const RETRY_MULTIPLIER: u32 = 2;

/// Upper bound for a single backoff delay (milliseconds).
pub const RETRY_MAX_DELAY_MS: u64 = 10_000;

/// Page size used when the caller does not ask for one.
pub const DEFAULT_PAGE_SIZE: usize = 50;

/// Initial page-size ceiling for an endpoint nobody has negotiated yet.
///
/// The server documents 500 as its maximum but some modalities reject far
/// less, so this is only an upper starting point.
pub const DEFAULT_CEILING: usize = 500;

/// Minimum spacing between two requests (milliseconds).
///
/// The API allows 5 requests per second; 250 ms keeps us at 4.
pub const MIN_REQUEST_INTERVAL_MS: u64 = 250;

/// Page sizes tried by ceiling discovery when none are given.
pub const DEFAULT_CANDIDATE_SIZES: [usize; 5] = [500, 200, 100, 50, 10];

/// Category (modality) used by the discovery probe: Pregão Eletrônico.
pub const PROBE_CATEGORY: u32 = 6;

/// Date pattern: YYYY-MM-DD.
#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static ISO_DATE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{4}-\d{2}-\d{2}$").expect("valid regex"));

/// Date pattern: YYYYMMDD, as used on the wire.
#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static COMPACT_DATE_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{8}$").expect("valid regex"));

/// CNPJ pattern: 14 digits, no punctuation.
#[allow(clippy::expect_used)] // Static regex that is guaranteed to be valid
static CNPJ_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^\d{14}$").expect("valid regex"));

/// Parse a calendar date given as `YYYY-MM-DD` or `YYYYMMDD`.
///
/// # Examples
/// ```
/// use pncp_harvester::config::parse_date;
///
/// assert_eq!(parse_date("2025-01-08").unwrap(), parse_date("20250108").unwrap());
/// assert!(parse_date("2025-13-01").is_err());
/// assert!(parse_date("08/01/2025").is_err());
/// ```
pub fn parse_date(date_str: &str) -> Result<NaiveDate> {
    let format = if ISO_DATE_PATTERN.is_match(date_str) {
        "%Y-%m-%d"
    } else if COMPACT_DATE_PATTERN.is_match(date_str) {
        "%Y%m%d"
    } else {
        return Err(HarvesterError::InvalidDate(date_str.to_string()));
    };

    NaiveDate::parse_from_str(date_str, format)
        .map_err(|_| HarvesterError::InvalidDate(date_str.to_string()))
}

/// Format a date the way the API expects it (`YYYYMMDD`).
#[must_use]
pub fn format_api_date(date: NaiveDate) -> String {
    date.format("%Y%m%d").to_string()
}

/// Validate a CNPJ (14 digits, punctuation already stripped).
pub fn validate_cnpj(cnpj: &str) -> Result<()> {
    if CNPJ_PATTERN.is_match(cnpj) {
        Ok(())
    } else {
        Err(HarvesterError::InvalidQuery(format!(
            "CNPJ must be 14 digits, got '{cnpj}'"
        )))
    }
}

/// Settings for a [`HarvestClient`](crate::client::HarvestClient).
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub consulta_base_url: String,
    pub pncp_base_url: String,
    pub timeout: Duration,
    /// Total attempts per request, including the first one.
    pub max_retries: u32,
    pub retry_base_delay: Duration,
    pub retry_multiplier: u32,
    pub retry_max_delay: Duration,
    pub default_page_size: usize,
    pub default_ceiling: usize,
    pub min_request_interval: Duration,
    /// Hard cap on pages per harvest, regardless of what the server reports.
    pub max_pages: Option<u32>,
    pub probe_start: NaiveDate,
    pub probe_end: NaiveDate,
    pub probe_category: Option<u32>,
    pub user_agent: String,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            consulta_base_url: CONSULTA_BASE_URL.to_string(),
            pncp_base_url: PNCP_BASE_URL.to_string(),
            timeout: Duration::from_secs(HTTP_TIMEOUT_SECS),
            max_retries: MAX_RETRIES,
            retry_base_delay: Duration::from_millis(RETRY_BASE_DELAY_MS),
            retry_multiplier: RETRY_MULTIPLIER,
            retry_max_delay: Duration::from_millis(RETRY_MAX_DELAY_MS),
            default_page_size: DEFAULT_PAGE_SIZE,
            default_ceiling: DEFAULT_CEILING,
            min_request_interval: Duration::from_millis(MIN_REQUEST_INTERVAL_MS),
            max_pages: None,
            // Ten days of early January 2024: small, always populated.
            probe_start: NaiveDate::from_ymd_opt(2024, 1, 1).unwrap_or_default(),
            probe_end: NaiveDate::from_ymd_opt(2024, 1, 10).unwrap_or_default(),
            probe_category: Some(PROBE_CATEGORY),
            user_agent: concat!("pncp-harvester/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl ClientConfig {
    /// Build a configuration from `PNCP_*` environment variables.
    ///
    /// Unset variables fall back to the defaults.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let config = Self {
            consulta_base_url: std::env::var("PNCP_CONSULTA_URL")
                .unwrap_or(defaults.consulta_base_url),
            pncp_base_url: std::env::var("PNCP_API_URL").unwrap_or(defaults.pncp_base_url),
            timeout: env_parse("PNCP_TIMEOUT_SECS")?
                .map(Duration::from_secs)
                .unwrap_or(defaults.timeout),
            max_retries: env_parse("PNCP_MAX_RETRIES")?.unwrap_or(defaults.max_retries),
            retry_base_delay: env_parse("PNCP_RETRY_BASE_DELAY_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.retry_base_delay),
            retry_multiplier: env_parse("PNCP_RETRY_MULTIPLIER")?
                .unwrap_or(defaults.retry_multiplier),
            retry_max_delay: defaults.retry_max_delay,
            default_page_size: env_parse("PNCP_PAGE_SIZE")?.unwrap_or(defaults.default_page_size),
            default_ceiling: env_parse("PNCP_PAGE_SIZE_CEILING")?
                .unwrap_or(defaults.default_ceiling),
            min_request_interval: env_parse("PNCP_MIN_REQUEST_INTERVAL_MS")?
                .map(Duration::from_millis)
                .unwrap_or(defaults.min_request_interval),
            max_pages: env_parse("PNCP_MAX_PAGES")?,
            ..defaults
        };

        config.validate()?;
        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        self.pncp_base_url = base_url.clone();
        self.consulta_base_url = base_url;
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    pub fn with_retry_base_delay(mut self, delay: Duration) -> Self {
        self.retry_base_delay = delay;
        self
    }

    pub fn with_default_page_size(mut self, page_size: usize) -> Self {
        self.default_page_size = page_size;
        self
    }

    pub fn with_default_ceiling(mut self, ceiling: usize) -> Self {
        self.default_ceiling = ceiling;
        self
    }

    pub fn with_min_request_interval(mut self, interval: Duration) -> Self {
        self.min_request_interval = interval;
        self
    }

    pub fn with_max_pages(mut self, max_pages: Option<u32>) -> Self {
        self.max_pages = max_pages;
        self
    }

    /// Reject settings that would make the client unusable.
    pub fn validate(&self) -> Result<()> {
        if self.max_retries == 0 {
            return Err(HarvesterError::Config(
                "max_retries must be at least 1".into(),
            ));
        }
        if self.default_page_size == 0 || self.default_ceiling == 0 {
            return Err(HarvesterError::Config(
                "page size and ceiling must be greater than 0".into(),
            ));
        }
        if self.retry_multiplier == 0 {
            return Err(HarvesterError::Config(
                "retry_multiplier must be greater than 0".into(),
            ));
        }
        if self.probe_start > self.probe_end {
            return Err(HarvesterError::Config(
                "probe start date is after probe end date".into(),
            ));
        }
        if self.max_pages == Some(0) {
            return Err(HarvesterError::Config(
                "max_pages must be greater than 0 when set".into(),
            ));
        }
        Ok(())
    }

    /// Backoff delay before retry number `retry` (1-based).
    ///
    /// 500ms, 1000ms, 2000ms, ... with the defaults, capped at `retry_max_delay`.
    #[must_use]
    pub fn retry_delay(&self, retry: u32) -> Duration {
        let factor = self
            .retry_multiplier
            .saturating_pow(retry.saturating_sub(1));
        self.retry_base_delay
            .saturating_mul(factor)
            .min(self.retry_max_delay)
    }
}

/// Read and parse an optional environment variable.
fn env_parse<T: std::str::FromStr>(name: &str) -> Result<Option<T>> {
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| HarvesterError::Config(format!("{name} has an invalid value: '{value}'"))),
        Err(_) => Ok(None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_date_formats() {
        let expected = NaiveDate::from_ymd_opt(2025, 1, 8).unwrap();
        assert_eq!(parse_date("2025-01-08").unwrap(), expected);
        assert_eq!(parse_date("20250108").unwrap(), expected);
    }

    #[test]
    fn test_parse_date_invalid() {
        assert!(parse_date("").is_err());
        assert!(parse_date("2025/01/08").is_err());
        assert!(parse_date("2025-1-8").is_err());
        assert!(parse_date("2025010").is_err());
        assert!(parse_date("20251301").is_err()); // Invalid month
        assert!(parse_date("2025-02-30").is_err()); // Invalid day
    }

    #[test]
    fn test_format_api_date() {
        let date = NaiveDate::from_ymd_opt(2024, 12, 31).unwrap();
        assert_eq!(format_api_date(date), "20241231");
    }

    #[test]
    fn test_validate_cnpj() {
        assert!(validate_cnpj("05995955000140").is_ok());
        assert!(validate_cnpj("05.995.955/0001-40").is_err());
        assert!(validate_cnpj("0599595500014").is_err());
    }

    #[test]
    fn test_default_config_is_valid() {
        let config = ClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.default_page_size, 50);
        assert_eq!(config.max_retries, 3);
        assert!(config.user_agent.starts_with("pncp-harvester/"));
    }

    #[test]
    fn test_validate_rejects_zero_retries() {
        let config = ClientConfig::default().with_max_retries(0);
        assert!(matches!(config.validate(), Err(HarvesterError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_zero_ceiling() {
        let config = ClientConfig::default().with_default_ceiling(0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_retry_delay_grows_exponentially() {
        let config = ClientConfig::default();
        assert_eq!(config.retry_delay(1), Duration::from_millis(500));
        assert_eq!(config.retry_delay(2), Duration::from_millis(1000));
        assert_eq!(config.retry_delay(3), Duration::from_millis(2000));
        assert_eq!(config.retry_delay(10), Duration::from_millis(10_000));
    }

    #[test]
    fn test_with_base_url_sets_both_apis() {
        let config = ClientConfig::default().with_base_url("http://127.0.0.1:8080");
        assert_eq!(config.consulta_base_url, "http://127.0.0.1:8080");
        assert_eq!(config.pncp_base_url, "http://127.0.0.1:8080");
    }
}
