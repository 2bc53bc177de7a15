//! Repository backend over a CORE-style open-access search API.
//!
//! The [`CoreBackend`] can search metadata, serve cached full texts and
//! download PDFs. Searches support two continuation strategies: fast paging
//! reuses the opaque scroll token the server returned with the previous
//! page, slow paging sends a numeric offset. The scroll bookkeeping lives in
//! a per-backend [`PageState`] guarded by the backend's own lock.

use std::any::Any;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use reqwest::Client;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::http::{self, HttpError};
use crate::meta::{
    BackendData, Capabilities, DocumentMeta, PdfData, SearchResults, SortMode,
};

use super::{Backend, BackendInfo};

/// Default CORE API base URL.
const DEFAULT_BASE_URL: &str = "https://api.core.ac.uk/v3/";

/// Search method path under the API base.
const METHOD_SEARCH_WORKS: &str = "search/works/";

/// Base delay for the retry backoff.
const RETRY_BASE_DELAY: Duration = Duration::from_millis(500);

/// Maximum jitter added to each retry delay.
const RETRY_MAX_JITTER_MS: u64 = 250;

/// A DOI shorter than this cannot be real; fall back to the identifier scan.
const MIN_PLAUSIBLE_DOI_LEN: usize = 6;

/// Per-record cache attached to every parsed result.
#[derive(Debug, Clone)]
struct CoreData {
    full_text: Option<String>,
    core_id: Option<String>,
}

impl BackendData for CoreData {
    fn clone_data(&self) -> Box<dyn BackendData> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Scroll continuation state of the last served page.
#[derive(Debug, Default)]
struct PageState {
    last_query: Option<DocumentMeta>,
    last_max_count: usize,
    scroll_token: Option<String>,
    next_page: usize,
}

/// Outcome of one search attempt, driving the retry loop.
enum Attempt {
    Served(SearchResults),
    Empty,
    Retryable,
}

/// Search, full-text and PDF backend over an open-repository API.
pub struct CoreBackend {
    info: BackendInfo,
    client: Client,
    pdf_client: Client,
    base_url: String,
    api_key: String,
    timeout_secs: u64,
    retry: u32,
    id: AtomicI32,
    state: Mutex<PageState>,
}

impl CoreBackend {
    /// Creates a backend against the public API.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError`] if HTTP client construction fails.
    pub fn new(
        api_key: impl Into<String>,
        timeout_secs: u64,
        retry: u32,
    ) -> Result<Self, HttpError> {
        Self::with_base_url(api_key, timeout_secs, retry, DEFAULT_BASE_URL)
    }

    /// Creates a backend with a custom base URL (for testing with wiremock).
    ///
    /// # Errors
    ///
    /// Returns [`HttpError`] if HTTP client construction fails.
    pub fn with_base_url(
        api_key: impl Into<String>,
        timeout_secs: u64,
        retry: u32,
        base_url: impl Into<String>,
    ) -> Result<Self, HttpError> {
        Ok(Self {
            info: BackendInfo::new(
                "core",
                Capabilities::FILL | Capabilities::GET_TEXT | Capabilities::GET_PDF,
            ),
            client: http::build_client(&http::library_user_agent(), timeout_secs)?,
            pdf_client: http::build_client(http::BROWSER_USER_AGENT, timeout_secs)?,
            base_url: base_url.into(),
            api_key: api_key.into(),
            timeout_secs,
            retry,
            id: AtomicI32::new(0),
            state: Mutex::new(PageState::default()),
        })
    }

    fn bound_id(&self) -> i32 {
        self.id.load(Ordering::Relaxed)
    }

    /// One complete search, including the retry loop.
    async fn search(
        &self,
        query: &DocumentMeta,
        max_count: usize,
        page: usize,
    ) -> Option<SearchResults> {
        let q = build_search_clauses(query);
        if q.is_empty() {
            debug!(
                "can not fill meta that does not contain author, title, keywords, abstract \
                 or search text"
            );
            return None;
        }

        let attempts = self.retry.max(1);
        for attempt in 0..attempts {
            if attempt != 0 {
                warn!(
                    attempt = attempt + 1,
                    of = attempts,
                    "could not get results from core, retrying"
                );
                tokio::time::sleep(backoff_delay(attempt)).await;
            }
            match self.search_once(query, &q, max_count, page).await {
                Attempt::Served(results) => return Some(results),
                Attempt::Empty => return None,
                Attempt::Retryable => {}
            }
        }
        None
    }

    /// One request/response cycle; decides fast vs slow paging, performs the
    /// request and updates the scroll state.
    async fn search_once(
        &self,
        query: &DocumentMeta,
        q: &str,
        max_count: usize,
        page: usize,
    ) -> Attempt {
        let mut state = self.state.lock().await;

        let same_query = state
            .last_query
            .as_ref()
            .is_some_and(|last| last.is_equal(query));
        let fast_page = page == 0
            || (same_query
                && state.last_max_count == max_count
                && state.scroll_token.is_some()
                && in_scroll_range(page, state.next_page));

        if fast_page {
            if page != 0 {
                debug!("using fast paging for this request");
            }
        } else {
            debug!(
                page,
                expected = state.next_page,
                same_query,
                has_token = state.scroll_token.is_some(),
                same_max_count = state.last_max_count == max_count,
                "using slow paging for this request"
            );
        }

        let mut params: Vec<(&str, String)> = vec![("apiKey", self.api_key.clone())];
        params.push(("q", q.to_string()));
        params.push(("stats", "false".to_string()));
        if fast_page {
            params.push(("scroll", "true".to_string()));
            if page > 0
                && let Some(token) = &state.scroll_token
            {
                params.push(("scrollId", token.clone()));
            }
        } else {
            params.push(("offset", (page * max_count).to_string()));
        }
        params.push(("limit", max_count.to_string()));

        let url = format!("{}{}", self.base_url, METHOD_SEARCH_WORKS);
        // Large pages take the server longer to assemble; scale the ceiling.
        let timeout = Duration::from_secs(self.timeout_secs + max_count as u64);
        let request = self.client.get(&url).query(&params).timeout(timeout);

        let body = match request.send().await {
            Ok(response) if response.status().is_success() => match response.text().await {
                Ok(body) => body,
                Err(error) => {
                    warn!(error = %error, "could not read search response");
                    return Attempt::Retryable;
                }
            },
            Ok(response) => {
                warn!(status = response.status().as_u16(), "search request failed");
                return Attempt::Retryable;
            }
            Err(error) => {
                warn!(error = %error, "search request failed");
                return Attempt::Retryable;
            }
        };

        let Ok(json) = serde_json::from_str::<Value>(&body) else {
            warn!("invalid response, not json");
            return Attempt::Retryable;
        };
        let Some(items) = json.get("results").and_then(Value::as_array) else {
            warn!("invalid response, no results entry");
            return Attempt::Retryable;
        };
        if items.is_empty() {
            debug!("search returned no results");
            return Attempt::Empty;
        }

        let documents: Vec<Option<DocumentMeta>> = items
            .iter()
            .map(|item| Some(self.parse_document(item)))
            .collect();

        let served_page = if fast_page {
            page
        } else {
            json.get("offset")
                .and_then(Value::as_u64)
                .map(|offset| offset as usize / max_count.max(1))
                .unwrap_or(page)
        };
        let total_count = json
            .get("totalHits")
            .and_then(Value::as_u64)
            .map(|hits| usize::try_from(hits).unwrap_or(usize::MAX))
            .unwrap_or(0);

        if fast_page {
            debug!("saving scroll token for the next request");
            state.last_max_count = max_count;
            state.next_page = page + 1;
            state.last_query = Some(query.clone());
            state.scroll_token = json
                .get("scrollId")
                .and_then(Value::as_str)
                .map(ToString::to_string);
        } else {
            state.last_query = None;
            state.scroll_token = None;
        }

        Attempt::Served(SearchResults {
            documents,
            max_count,
            page: served_page,
            total_count,
        })
    }

    /// Parses one result object into a record with the backend cache
    /// attached.
    fn parse_document(&self, item: &Value) -> DocumentMeta {
        let mut meta = DocumentMeta::new();
        meta.backend_id = self.bound_id();
        meta.has_full_text = true;

        let identifiers = item.get("identifiers");
        meta.backend_data = Some(Box::new(CoreData {
            full_text: item
                .get("fullText")
                .and_then(Value::as_str)
                .map(ToString::to_string),
            core_id: identifiers.and_then(|ids| scan_identifier(ids, "CORE_ID")),
        }));

        if let Some(authors) = item.get("authors").and_then(Value::as_array) {
            let names: Vec<&str> = authors
                .iter()
                .filter_map(|author| author.get("name").and_then(Value::as_str))
                .collect();
            if !names.is_empty() {
                meta.author = Some(names.join(", "));
            }
        }

        meta.abstract_text = item
            .get("abstract")
            .and_then(Value::as_str)
            .map(ToString::to_string);

        meta.doi = match item.get("doi").and_then(Value::as_str) {
            Some(doi) if doi.len() >= MIN_PLAUSIBLE_DOI_LEN => Some(doi.to_string()),
            _ => identifiers.and_then(|ids| scan_identifier(ids, "DOI")),
        };

        meta.title = item
            .get("title")
            .and_then(Value::as_str)
            .map(ToString::to_string);
        meta.publisher = item
            .get("publisher")
            .and_then(Value::as_str)
            .map(ToString::to_string);
        meta.year = item
            .get("yearPublished")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        meta.download_url = item
            .get("downloadUrl")
            .and_then(Value::as_str)
            .map(ToString::to_string);

        meta
    }

    /// Cached full text of a record belonging to this backend.
    fn cached_text(meta: &DocumentMeta) -> Option<String> {
        meta.backend_data
            .as_ref()
            .and_then(|data| data.as_any().downcast_ref::<CoreData>())
            .and_then(|data| data.full_text.clone())
    }
}

#[async_trait]
impl Backend for CoreBackend {
    fn info(&self) -> &BackendInfo {
        &self.info
    }

    fn bind_id(&self, id: i32) {
        self.id.store(id, Ordering::Relaxed);
    }

    async fn fill_meta(
        &self,
        query: &DocumentMeta,
        max_count: usize,
        page: usize,
        sort: SortMode,
    ) -> Option<SearchResults> {
        if max_count == 0 {
            warn!("a request for 0 results was given");
            return None;
        }
        if sort != SortMode::Relevance {
            debug!(sort = %sort, "requested sort order is not supported, serving relevance");
        }

        self.search(query, max_count, page).await
    }

    async fn get_text(&self, meta: &DocumentMeta) -> Option<String> {
        if meta.backend_id == self.bound_id()
            && let Some(data) = meta
                .backend_data
                .as_ref()
                .and_then(|data| data.as_any().downcast_ref::<CoreData>())
        {
            if let Some(core_id) = &data.core_id {
                debug!(core_id = %core_id, "serving cached full text");
            }
            return data.full_text.clone();
        }

        let results = self.search(meta, 1, 0).await?;
        results.first().and_then(Self::cached_text)
    }

    async fn get_pdf(&self, meta: &DocumentMeta) -> Option<PdfData> {
        debug!(backend_id = meta.backend_id, "got pdf request for record");

        let pdf_meta = if meta.backend_id == self.bound_id() {
            meta.clone()
        } else {
            let doi = meta.doi.as_deref()?;
            let lookup = DocumentMeta::from_doi(doi, self.bound_id());
            let Some(found) = self
                .search(&lookup, 1, 0)
                .await
                .and_then(SearchResults::into_first)
            else {
                debug!(doi = %doi, "unable to fill for doi to get pdf");
                return None;
            };
            found
        };

        let download_url = pdf_meta.download_url.as_deref()?;
        debug!(url = %download_url, "trying to get pdf");

        let url = if is_arxiv_url(download_url) {
            let Some(rewritten) = arxiv_pdf_url(download_url) else {
                debug!("url is from arxiv, but unable to find real pdf url");
                return None;
            };
            debug!(url = %rewritten, "url is from arxiv, diverting");
            rewritten
        } else {
            download_url.to_string()
        };

        let data = http::get_pdf_bytes(&self.pdf_client, &url).await?;
        Some(PdfData {
            data,
            meta: pdf_meta,
        })
    }
}

impl std::fmt::Debug for CoreBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CoreBackend")
            .field("base_url", &self.base_url)
            .field("timeout_secs", &self.timeout_secs)
            .field("retry", &self.retry)
            .finish_non_exhaustive()
    }
}

/// True when the token stored for `next_page` may serve `page`: the page
/// just consumed may be retried and small forward gaps are tolerated.
fn in_scroll_range(page: usize, next_page: usize) -> bool {
    page + 1 >= next_page && page < next_page + 3
}

/// Builds the field-scoped `q` clauses joined with `+`.
fn build_search_clauses(query: &DocumentMeta) -> String {
    let mut q = String::new();
    if let Some(author) = &query.author {
        q.push_str(&format!("authors:\"{author}\"+"));
    }
    if let Some(title) = &query.title {
        q.push_str(&format!("title:\"{title}\"+"));
    }
    if let Some(keywords) = &query.keywords {
        for token in keywords
            .split(|c: char| !c.is_alphanumeric())
            .filter(|token| !token.is_empty())
        {
            q.push_str(&token.to_lowercase());
            q.push('+');
        }
    }
    if let Some(abstract_text) = &query.abstract_text {
        q.push_str(&format!("abstract:\"{abstract_text}\"+"));
    }
    if let Some(search_text) = &query.search_text {
        q.push_str(&format!("\"{search_text}\"+"));
    }
    q.truncate(q.len().saturating_sub(1));
    q
}

/// Scans the identifiers array for the entry of the given type.
fn scan_identifier(identifiers: &Value, wanted_type: &str) -> Option<String> {
    identifiers.as_array()?.iter().find_map(|identifier| {
        if identifier.get("type").and_then(Value::as_str) == Some(wanted_type) {
            identifier
                .get("identifier")
                .and_then(Value::as_str)
                .map(ToString::to_string)
        } else {
            None
        }
    })
}

/// True when the download URL points at an arXiv host.
fn is_arxiv_url(download_url: &str) -> bool {
    url::Url::parse(download_url)
        .ok()
        .and_then(|parsed| parsed.host_str().map(|host| host.contains("arxiv.org")))
        .unwrap_or(false)
}

/// Rewrites an arXiv abstract URL into the direct PDF URL.
fn arxiv_pdf_url(download_url: &str) -> Option<String> {
    if !download_url.contains("/abs/") {
        return None;
    }
    Some(format!("{}.pdf", download_url.replace("/abs/", "/pdf/")))
}

/// Bounded exponential backoff with jitter for the retry loop.
fn backoff_delay(attempt: u32) -> Duration {
    let exponential = RETRY_BASE_DELAY * 2u32.saturating_pow(attempt.saturating_sub(1));
    let jitter = Duration::from_millis(rand::thread_rng().gen_range(0..=RETRY_MAX_JITTER_MS));
    exponential.min(Duration::from_secs(8)) + jitter
}
