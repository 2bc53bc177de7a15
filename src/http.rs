//! Shared HTTP construction policy and fetch primitives for backends.
//!
//! This module centralizes backend networking defaults so the concrete
//! backends stay consistent on timeout, user-agent and compression, and it
//! provides the two fetch primitives every backend is written against: a
//! string GET for API/HTML responses and a validated binary GET for PDFs.

use std::time::Duration;

use reqwest::Client;
use thiserror::Error;
use tracing::debug;

/// Browser-style user-agent for PDF portals that refuse non-browser clients.
pub(crate) const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64; rv:106.0) Gecko/20100101 Firefox/106.0";

/// Project URL for User-Agent identification (good citizenship; RFC 9308).
const PROJECT_UA_URL: &str = "https://github.com/scipaper/scipaper";

/// Minimum byte count below which a response cannot be a useful PDF.
const MIN_PDF_LEN: usize = 100;

/// Default User-Agent for API requests (identifies the library).
#[must_use]
pub(crate) fn library_user_agent() -> String {
    let version = env!("CARGO_PKG_VERSION");
    format!("scipaper/{version} (metadata-federation-library; +{PROJECT_UA_URL})")
}

/// Errors from the HTTP primitives.
///
/// These never cross the public federation surface; backends log them and
/// degrade to `None` returns.
#[derive(Debug, Error)]
pub enum HttpError {
    /// HTTP client construction failed
    #[error("failed to construct http client: {source}")]
    Build {
        /// Underlying reqwest error
        source: reqwest::Error,
    },

    /// The request could not be completed (includes timeouts)
    #[error("could not load from '{url}': {source}")]
    Request {
        /// The URL that failed
        url: String,
        /// Underlying reqwest error
        source: reqwest::Error,
    },

    /// The server answered with a non-success status
    #[error("'{url}' returned http status {status}")]
    Status {
        /// The URL that failed
        url: String,
        /// The HTTP status code
        status: u16,
    },
}

/// Builds an HTTP client with the shared backend policy.
///
/// # Errors
///
/// Returns [`HttpError::Build`] when client construction fails.
pub(crate) fn build_client(user_agent: &str, timeout_secs: u64) -> Result<Client, HttpError> {
    Client::builder()
        .connect_timeout(Duration::from_secs(timeout_secs.max(1) / 3 + 1))
        .timeout(Duration::from_secs(timeout_secs))
        .user_agent(user_agent)
        .gzip(true)
        .build()
        .map_err(|source| HttpError::Build { source })
}

/// Fetches a URL and returns the response body as text.
///
/// # Errors
///
/// Returns [`HttpError`] on transport failure or a non-success status.
pub(crate) async fn get_string(client: &Client, url: &str) -> Result<String, HttpError> {
    get_string_with_timeout(client, url, None).await
}

/// Fetches a URL as text with an optional per-request timeout override.
///
/// # Errors
///
/// Returns [`HttpError`] on transport failure or a non-success status.
pub(crate) async fn get_string_with_timeout(
    client: &Client,
    url: &str,
    timeout: Option<Duration>,
) -> Result<String, HttpError> {
    let mut request = client.get(url);
    if let Some(timeout) = timeout {
        request = request.timeout(timeout);
    }

    let response = request.send().await.map_err(|source| HttpError::Request {
        url: url.to_string(),
        source,
    })?;

    let status = response.status();
    if !status.is_success() {
        return Err(HttpError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    response.text().await.map_err(|source| HttpError::Request {
        url: url.to_string(),
        source,
    })
}

/// Fetches a URL and returns the raw response bytes.
///
/// # Errors
///
/// Returns [`HttpError`] on transport failure or a non-success status.
pub(crate) async fn get_bytes(client: &Client, url: &str) -> Result<Vec<u8>, HttpError> {
    let response = client
        .get(url)
        .send()
        .await
        .map_err(|source| HttpError::Request {
            url: url.to_string(),
            source,
        })?;

    let status = response.status();
    if !status.is_success() {
        return Err(HttpError::Status {
            url: url.to_string(),
            status: status.as_u16(),
        });
    }

    response
        .bytes()
        .await
        .map(|bytes| bytes.to_vec())
        .map_err(|source| HttpError::Request {
            url: url.to_string(),
            source,
        })
}

/// Returns true when the bytes qualify as a PDF: at least [`MIN_PDF_LEN`]
/// bytes long and opening with the `%PDF` magic.
#[must_use]
pub(crate) fn is_pdf(data: &[u8]) -> bool {
    data.len() >= MIN_PDF_LEN && data.starts_with(b"%PDF")
}

/// Fetches a URL expected to serve a PDF and validates the payload.
///
/// Transport failures and non-PDF payloads are logged and collapse to `None`.
pub(crate) async fn get_pdf_bytes(client: &Client, url: &str) -> Option<Vec<u8>> {
    let data = match get_bytes(client, url).await {
        Ok(data) => data,
        Err(error) => {
            debug!(url = %url, error = %error, "pdf fetch failed");
            return None;
        }
    };

    if data.len() < MIN_PDF_LEN {
        debug!(
            url = %url,
            length = data.len(),
            "return data too short to be a pdf"
        );
        return None;
    }
    if !is_pdf(&data) {
        debug!(url = %url, "got invalid pdf data");
        return None;
    }

    Some(data)
}
