//! Direct PDF-resolver backend over a download portal.
//!
//! The [`ScihubBackend`] resolves a DOI into PDF bytes by loading the
//! portal's landing page and extracting the download link from it: first
//! from an `onclick` handler mentioning a pdf, then via a raw scan for a
//! quoted `download=true` URL when the attribute extraction comes up empty.

use std::sync::LazyLock;
use std::sync::atomic::{AtomicI32, Ordering};

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use tracing::{debug, warn};

use crate::http::{self, HttpError};
use crate::meta::{Capabilities, DocumentMeta, PdfData};

use super::{Backend, BackendInfo};

/// Matches an onclick attribute with either quoting style.
static ONCLICK_RE: LazyLock<Regex> = LazyLock::new(|| {
    compile_static_regex(r#"(?is)onclick\s*=\s*(?:"([^"]*)"|'([^']*)')"#)
});

fn compile_static_regex(pattern: &str) -> Regex {
    Regex::new(pattern).unwrap_or_else(|e| panic!("invalid static regex '{pattern}': {e}"))
}

/// PDF backend over a direct-download portal.
///
/// The portal serves an HTML page per DOI; the page embeds the actual file
/// location in a script handler rather than a plain link, so resolution is
/// a text extraction, not a crawl. Fetches use a browser-style user-agent.
pub struct ScihubBackend {
    info: BackendInfo,
    client: Client,
    base_url: String,
    id: AtomicI32,
}

impl ScihubBackend {
    /// Creates a backend for the portal at `base_url`.
    ///
    /// The DOI is appended to `base_url` as-is, so the configured value
    /// normally ends with a `/`.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError`] if HTTP client construction fails.
    pub fn new(base_url: impl Into<String>, timeout_secs: u64) -> Result<Self, HttpError> {
        Ok(Self {
            info: BackendInfo::new("scihub", Capabilities::GET_PDF),
            client: http::build_client(http::BROWSER_USER_AGENT, timeout_secs)?,
            base_url: base_url.into(),
            id: AtomicI32::new(0),
        })
    }

    fn bound_id(&self) -> i32 {
        self.id.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl Backend for ScihubBackend {
    fn info(&self) -> &BackendInfo {
        &self.info
    }

    fn bind_id(&self, id: i32) {
        self.id.store(id, Ordering::Relaxed);
    }

    async fn get_pdf(&self, meta: &DocumentMeta) -> Option<PdfData> {
        let doi = meta.doi.as_deref()?;
        let page_url = format!("{}{}", self.base_url, doi);

        debug!(url = %page_url, "loading portal page");
        let html = match http::get_string(&self.client, &page_url).await {
            Ok(html) => html,
            Err(error) => {
                warn!(doi = %doi, error = %error, "got no usable portal page");
                return None;
            }
        };

        let Some(pdf_url) = extract_pdf_url(&html).or_else(|| extract_download_url(&html)) else {
            warn!(doi = %doi, "could not get pdf url from portal page");
            return None;
        };

        debug!(url = %pdf_url, "fetching pdf");
        let Some(data) = http::get_pdf_bytes(&self.client, &pdf_url).await else {
            warn!("unable to grab pdf from portal pdf link");
            return None;
        };

        let mut pdf_meta = meta.clone();
        pdf_meta.download_url = Some(pdf_url);
        pdf_meta.backend_id = self.bound_id();
        Some(PdfData {
            data,
            meta: pdf_meta,
        })
    }
}

impl std::fmt::Debug for ScihubBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScihubBackend")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

/// Extracts the URL from the first onclick handler mentioning a pdf.
///
/// The handler value has the shape `location.href='<url>'`; everything after
/// the first `=` is taken, surrounding single quotes are stripped and the
/// quoted section ends the URL.
fn extract_pdf_url(html: &str) -> Option<String> {
    for captures in ONCLICK_RE.captures_iter(html) {
        let value = captures
            .get(1)
            .or_else(|| captures.get(2))
            .map(|group| group.as_str())?;
        if !value.contains("pdf") {
            continue;
        }
        let Some((_, target)) = value.split_once('=') else {
            continue;
        };

        let target = target.trim();
        let url = if let Some(quoted) = target.strip_prefix('\'') {
            quoted.split('\'').next().unwrap_or(quoted)
        } else {
            target.split('\'').next().unwrap_or(target)
        };
        if url.is_empty() {
            continue;
        }
        return Some(url.to_string());
    }
    None
}

/// Fallback heuristic: finds a single-quoted URL containing `download=true`
/// anywhere in the raw page text.
fn extract_download_url(html: &str) -> Option<String> {
    let marker = html.find("download=true")?;
    let open = html[..marker].rfind('\'')?;
    let quoted = &html[open + 1..];
    let close = quoted.find('\'')?;
    let url = &quoted[..close];
    if url.is_empty() {
        return None;
    }
    Some(url.to_string())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_extract_pdf_url_from_onclick() {
        let html = r#"<html><body>
            <button onclick="location.href='https://host/x.pdf'">download</button>
        </body></html>"#;
        assert_eq!(extract_pdf_url(html).as_deref(), Some("https://host/x.pdf"));
    }

    #[test]
    fn test_extract_pdf_url_takes_first_matching_element() {
        let html = r#"
            <a onclick="trackClick()">stats</a>
            <button onclick="location.href='https://host/first.pdf'">one</button>
            <button onclick="location.href='https://host/second.pdf'">two</button>
        "#;
        assert_eq!(
            extract_pdf_url(html).as_deref(),
            Some("https://host/first.pdf")
        );
    }

    #[test]
    fn test_extract_pdf_url_ignores_handlers_without_pdf() {
        let html = r#"<button onclick="location.href='https://host/x.docx'">doc</button>"#;
        assert!(extract_pdf_url(html).is_none());
    }

    #[test]
    fn test_extract_pdf_url_single_quoted_attribute() {
        let html = "<button onclick='openPdf=https://host/plain.pdf'>x</button>";
        assert_eq!(
            extract_pdf_url(html).as_deref(),
            Some("https://host/plain.pdf")
        );
    }

    #[test]
    fn test_fallback_extracts_quoted_download_url() {
        let html = "<script>var u = 'https://other/y.pdf?download=true'; open(u);</script>";
        assert_eq!(
            extract_download_url(html).as_deref(),
            Some("https://other/y.pdf?download=true")
        );
    }

    #[test]
    fn test_fallback_requires_marker_and_quotes() {
        assert!(extract_download_url("no marker here").is_none());
        assert!(extract_download_url("download=true but unquoted").is_none());
    }

    fn pdf_body() -> Vec<u8> {
        let mut body = b"%PDF-1.7\n".to_vec();
        body.resize(1024, b'p');
        body
    }

    #[tokio::test]
    async fn test_get_pdf_end_to_end() {
        let server = MockServer::start().await;
        let page = format!(
            r#"<html><button onclick="location.href='{}/files/paper.pdf'">get</button></html>"#,
            server.uri()
        );
        Mock::given(method("GET"))
            .and(path("/portal/10.1000/xyz"))
            .and(header("user-agent", http::BROWSER_USER_AGENT))
            .respond_with(ResponseTemplate::new(200).set_body_string(page))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/files/paper.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(pdf_body()))
            .mount(&server)
            .await;

        let backend =
            ScihubBackend::new(format!("{}/portal/", server.uri()), 5).unwrap();
        backend.bind_id(4);
        let meta = DocumentMeta::from_doi("10.1000/xyz", 0);

        let pdf = backend.get_pdf(&meta).await.unwrap();
        assert_eq!(pdf.data, pdf_body());
        assert_eq!(pdf.meta.doi.as_deref(), Some("10.1000/xyz"));
        assert_eq!(pdf.meta.backend_id, 4);
        assert!(
            pdf.meta
                .download_url
                .as_deref()
                .unwrap()
                .ends_with("/files/paper.pdf")
        );
    }

    #[tokio::test]
    async fn test_get_pdf_uses_fallback_heuristic() {
        let server = MockServer::start().await;
        let page = format!(
            "<html><script>go('{}/files/fallback.pdf?download=true')</script></html>",
            server.uri()
        );
        Mock::given(method("GET"))
            .and(path("/portal/10.1000/fb"))
            .respond_with(ResponseTemplate::new(200).set_body_string(page))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/files/fallback.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(pdf_body()))
            .mount(&server)
            .await;

        let backend =
            ScihubBackend::new(format!("{}/portal/", server.uri()), 5).unwrap();
        let pdf = backend.get_pdf(&DocumentMeta::from_doi("10.1000/fb", 0)).await;
        assert!(pdf.is_some());
    }

    #[tokio::test]
    async fn test_get_pdf_without_doi_returns_none() {
        let server = MockServer::start().await;
        let backend = ScihubBackend::new(format!("{}/portal/", server.uri()), 5).unwrap();
        let meta = DocumentMeta::from_title("no doi");
        assert!(backend.get_pdf(&meta).await.is_none());
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_get_pdf_page_without_link_returns_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/portal/10.1000/empty"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>nothing</html>"))
            .mount(&server)
            .await;

        let backend = ScihubBackend::new(format!("{}/portal/", server.uri()), 5).unwrap();
        assert!(
            backend
                .get_pdf(&DocumentMeta::from_doi("10.1000/empty", 0))
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_get_pdf_rejects_non_pdf_payload() {
        let server = MockServer::start().await;
        let page = format!(
            r#"<button onclick="location.href='{}/files/fake.pdf'">x</button>"#,
            server.uri()
        );
        Mock::given(method("GET"))
            .and(path("/portal/10.1000/fake"))
            .respond_with(ResponseTemplate::new(200).set_body_string(page))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/files/fake.pdf"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html>not a pdf</html>"))
            .mount(&server)
            .await;

        let backend = ScihubBackend::new(format!("{}/portal/", server.uri()), 5).unwrap();
        assert!(
            backend
                .get_pdf(&DocumentMeta::from_doi("10.1000/fake", 0))
                .await
                .is_none()
        );
    }
}
