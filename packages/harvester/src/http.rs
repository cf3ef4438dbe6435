//! HTTP transport and response classification.
//!
//! [`Transport`] is the seam between the client's pagination logic and the
//! network: production code uses [`HttpTransport`] (blocking reqwest), tests
//! can substitute a scripted implementation.

use reqwest::blocking::Client;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT};
use reqwest::Url;
use thiserror::Error;

use crate::config::ClientConfig;
use crate::error::{HarvesterError, Result};

/// Status code and body of a completed HTTP exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl RawResponse {
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }
}

/// Failure to complete an HTTP exchange at all.
#[derive(Debug, Error)]
pub enum TransportError {
    /// The request did not finish within the timeout.
    #[error("request timed out: {0}")]
    Timeout(String),

    /// The server could not be reached.
    #[error("connection failed: {0}")]
    Connect(String),

    /// The connection broke after the request was sent, e.g. the server
    /// closed it or the body stopped halfway.
    #[error("connection interrupted: {0}")]
    Interrupted(String),

    /// The URL could not be built.
    #[error("invalid URL '{url}': {message}")]
    InvalidUrl { url: String, message: String },

    /// Any other client error (e.g. TLS setup, body decoding).
    #[error(transparent)]
    Other(#[from] reqwest::Error),
}

impl TransportError {
    /// Timeouts and connection failures are worth retrying.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Timeout(_) | Self::Connect(_) | Self::Interrupted(_)
        )
    }
}

impl From<TransportError> for HarvesterError {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::Other(source) => HarvesterError::Http(source),
            other => HarvesterError::Config(other.to_string()),
        }
    }
}

/// Issues GET requests.
pub trait Transport: Send + Sync {
    /// Send `GET url?query` and return the status and body, whatever the status.
    fn get(
        &self,
        url: &str,
        query: &[(&'static str, String)],
    ) -> std::result::Result<RawResponse, TransportError>;
}

/// Create a configured HTTP client.
///
/// # Returns
/// A `reqwest::blocking::Client` with the configured timeout, user agent and
/// a JSON `Accept` header.
pub fn create_client(config: &ClientConfig) -> Result<Client> {
    let mut headers = HeaderMap::new();
    headers.insert(ACCEPT, HeaderValue::from_static("application/json"));

    let client = Client::builder()
        .timeout(config.timeout)
        .user_agent(config.user_agent.clone())
        .default_headers(headers)
        .build()?;
    Ok(client)
}

/// [`Transport`] backed by a blocking reqwest client.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(config: &ClientConfig) -> Result<Self> {
        Ok(Self {
            client: create_client(config)?,
        })
    }

}

impl Transport for HttpTransport {
    fn get(
        &self,
        url: &str,
        query: &[(&'static str, String)],
    ) -> std::result::Result<RawResponse, TransportError> {
        let parsed = if query.is_empty() {
            Url::parse(url)
        } else {
            Url::parse_with_params(url, query.iter().map(|(k, v)| (*k, v.as_str())))
        };
        let full_url = parsed.map_err(|e| TransportError::InvalidUrl {
            url: url.to_string(),
            message: e.to_string(),
        })?;

        let response = self.client.get(full_url).send().map_err(classify_error)?;
        let status = response.status().as_u16();
        let body = response.bytes().map_err(classify_error)?;

        Ok(RawResponse::new(status, body.to_vec()))
    }
}

fn classify_error(err: reqwest::Error) -> TransportError {
    if err.is_timeout() {
        TransportError::Timeout(err.to_string())
    } else if err.is_connect() {
        TransportError::Connect(err.to_string())
    } else if !err.is_builder() && (err.is_request() || err.is_body() || err.is_decode()) {
        TransportError::Interrupted(err.to_string())
    } else {
        TransportError::Other(err)
    }
}

/// What a final (non-transient) response means for the caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// 2xx other than 204, with its body.
    Success(Vec<u8>),
    /// 204: the server has nothing for this query.
    NoContent,
    /// 400 complaining about the page size.
    SizeRejected { message: String },
    /// Any other 4xx (or an unfollowed 3xx): retrying will not help.
    Rejected { status: u16, message: String },
}

/// Fragments of a 400 message that identify a page-size violation.
const SIZE_MESSAGE_MARKERS: [&str; 9] = [
    "tamanhopagina",
    "tamanho",
    "pagesize",
    "page size",
    "page_size",
    "por página",
    "por pagina",
    "registros por",
    "records per",
];

/// A "limit" message is only about the page size if it also mentions one of
/// these; "limite de 365 dias" is about the date range.
const LIMIT_MARKERS: [&str; 2] = ["limite", "limit"];
const LIMIT_SUBJECTS: [&str; 5] = ["registro", "record", "página", "pagina", "page"];

/// Map a raw response to an [`Outcome`].
///
/// # Errors
/// The reason of a transient failure (5xx or 429), which is worth retrying.
pub fn classify(response: RawResponse) -> std::result::Result<Outcome, String> {
    match response.status {
        204 => Ok(Outcome::NoContent),
        200..=299 => Ok(Outcome::Success(response.body)),
        400 => {
            let message = error_message(&response.body);
            if is_size_violation(&message) {
                Ok(Outcome::SizeRejected { message })
            } else {
                Ok(Outcome::Rejected {
                    status: 400,
                    message,
                })
            }
        }
        429 => Err("Rate limited: 429 Too Many Requests".to_string()),
        status @ 500..=599 => Err(format!("Server error: {status}")),
        status => Ok(Outcome::Rejected {
            status,
            message: error_message(&response.body),
        }),
    }
}

/// Whether an error message is about the page size.
#[must_use]
pub fn is_size_violation(message: &str) -> bool {
    let message = message.to_lowercase();
    let mentions = |markers: &[&str]| markers.iter().any(|marker| message.contains(marker));
    mentions(&SIZE_MESSAGE_MARKERS) || (mentions(&LIMIT_MARKERS) && mentions(&LIMIT_SUBJECTS))
}

/// Human-readable message of an error body.
///
/// Prefers the `message` (or `erro`/`error`) field of a JSON body and falls
/// back to the raw text, truncated.
#[must_use]
pub fn error_message(body: &[u8]) -> String {
    const MAX_LEN: usize = 300;

    if let Ok(serde_json::Value::Object(fields)) = serde_json::from_slice::<serde_json::Value>(body) {
        for key in ["message", "erro", "error", "detail"] {
            if let Some(serde_json::Value::String(message)) = fields.get(key) {
                return message.clone();
            }
        }
    }

    let text = String::from_utf8_lossy(body);
    let text = text.trim();
    if text.is_empty() {
        return "no message".to_string();
    }
    text.chars().take(MAX_LEN).collect()
}
