//! Identifier-resolver backend over the Crossref REST API.
//!
//! The [`CrossrefBackend`] answers metadata queries only. A query carrying a
//! DOI is resolved with a single `works/<doi>` lookup; anything else is
//! translated into a field-scoped work query. Parsed records with an ISSN
//! but no publisher or journal are enriched with a secondary
//! `journals/<issn>` lookup.

use std::sync::atomic::{AtomicI32, Ordering};

use async_trait::async_trait;
use reqwest::Client;
use serde_json::Value;
use tracing::{debug, warn};

use crate::http::{self, HttpError};
use crate::meta::{Capabilities, DocumentMeta, SearchResults, SortMode};

use super::{Backend, BackendInfo};

/// Default Crossref API base URL.
const DEFAULT_BASE_URL: &str = "https://api.crossref.org";

/// Field list requested for work queries so responses stay small.
const WORKS_SELECT: &str =
    "DOI,ISSN,abstract,author,publisher,reference,volume,title,issue,page,published";

/// Metadata backend over the Crossref registry.
///
/// # Polite Pool
///
/// When a contact email is configured it is attached as the `mailto` query
/// parameter, which moves requests into Crossref's polite pool with its
/// higher rate limits.
pub struct CrossrefBackend {
    info: BackendInfo,
    client: Client,
    base_url: String,
    email: Option<String>,
    id: AtomicI32,
}

impl CrossrefBackend {
    /// Creates a backend against the public Crossref API.
    ///
    /// # Errors
    ///
    /// Returns [`HttpError`] if HTTP client construction fails.
    pub fn new(email: Option<String>, timeout_secs: u64) -> Result<Self, HttpError> {
        Self::with_base_url(email, timeout_secs, DEFAULT_BASE_URL)
    }

    /// Creates a backend with a custom base URL (for testing with wiremock).
    ///
    /// # Errors
    ///
    /// Returns [`HttpError`] if HTTP client construction fails.
    pub fn with_base_url(
        email: Option<String>,
        timeout_secs: u64,
        base_url: impl Into<String>,
    ) -> Result<Self, HttpError> {
        Ok(Self {
            info: BackendInfo::new("crossref", Capabilities::FILL),
            client: http::build_client(&http::library_user_agent(), timeout_secs)?,
            base_url: base_url.into(),
            email,
            id: AtomicI32::new(0),
        })
    }

    fn bound_id(&self) -> i32 {
        self.id.load(Ordering::Relaxed)
    }

    /// Resolves a DOI with a single work lookup.
    async fn fill_from_doi(&self, query: &DocumentMeta, max_count: usize) -> Option<SearchResults> {
        let doi = query.doi.as_deref()?;
        let url = format!("{}/works/{}", self.base_url, urlencoding::encode(doi));

        debug!(url = %url, "looking up work by doi");
        let body = match http::get_string(&self.client, &url).await {
            Ok(body) => body,
            Err(error) => {
                warn!(doi = %doi, error = %error, "work lookup failed");
                return None;
            }
        };

        let json: Value = serde_json::from_str(&body).ok()?;
        let message = get_message(&json, "work")?;
        let mut record = self.parse_work(message, Some(query)).await;
        record.backend_id = self.bound_id();

        Some(SearchResults {
            documents: vec![Some(record)],
            max_count,
            page: 0,
            total_count: 0,
        })
    }

    /// Resolves a field query with a work-list search.
    async fn fill_from_work_query(
        &self,
        query: &DocumentMeta,
        max_count: usize,
        page: usize,
        sort: SortMode,
    ) -> Option<SearchResults> {
        let mut params: Vec<(&str, String)> = Vec::new();
        if let Some(author) = &query.author {
            params.push(("query.author", author.clone()));
        }
        if let Some(title) = &query.title {
            params.push(("query.title", title.clone()));
        }
        if let Some(journal) = &query.journal {
            params.push(("query.publisher-name", journal.clone()));
        }
        if query.has_full_text {
            params.push(("filter", "has-full-text:true".to_string()));
        }
        if query.year != 0 {
            params.push(("query.bibliographic", query.year.to_string()));
        }
        if params.is_empty() {
            return None;
        }

        params.push(("rows", max_count.to_string()));
        params.push(("select", WORKS_SELECT.to_string()));
        if let Some((sort_key, order)) = sort_params(sort) {
            params.push(("sort", sort_key.to_string()));
            if let Some(order) = order {
                params.push(("order", order.to_string()));
            }
        }
        if let Some(email) = &self.email {
            params.push(("mailto", email.clone()));
        }

        let url = format!("{}/works", self.base_url);
        debug!(url = %url, "searching works");
        let response = match self.client.get(&url).query(&params).send().await {
            Ok(response) => response,
            Err(error) => {
                warn!(error = %error, "work search request failed");
                return None;
            }
        };
        if !response.status().is_success() {
            warn!(status = response.status().as_u16(), "work search failed");
            return None;
        }
        let body = match response.text().await {
            Ok(body) => body,
            Err(error) => {
                warn!(error = %error, "could not read work search response");
                return None;
            }
        };

        let json: Value = serde_json::from_str(&body).ok()?;
        let message = get_message(&json, "work-list")?;

        let total_results = message
            .get("total-results")
            .and_then(Value::as_u64)
            .unwrap_or(0);
        let Some(items) = message.get("items").and_then(Value::as_array) else {
            warn!("no items array node in work list");
            return None;
        };
        debug!(
            total_results,
            processed = items.len().min(max_count),
            "got work search results"
        );

        let mut documents = Vec::with_capacity(items.len().min(max_count));
        for item in items.iter().take(max_count) {
            if item.is_object() {
                let mut record = self.parse_work(item, None).await;
                record.backend_id = self.bound_id();
                documents.push(Some(record));
            } else {
                warn!("invalid work array item");
                documents.push(None);
            }
        }
        if documents.is_empty() {
            return None;
        }

        Some(SearchResults {
            documents,
            max_count,
            page,
            total_count: usize::try_from(total_results).unwrap_or(usize::MAX),
        })
    }

    /// Parses one work object, optionally on top of the caller's query
    /// record so user-supplied context survives.
    async fn parse_work(&self, json: &Value, base: Option<&DocumentMeta>) -> DocumentMeta {
        let mut meta = base.cloned().unwrap_or_default();
        meta.completed = true;

        meta.url = string_field(json, "URL");

        if let Some(authors) = json.get("author").and_then(Value::as_array) {
            let joined = join_authors(authors);
            if !joined.is_empty() {
                meta.author = Some(joined);
            }
        }

        meta.year = json
            .get("published")
            .and_then(|published| published.get("date-parts"))
            .and_then(Value::as_array)
            .and_then(|parts| parts.first())
            .and_then(Value::as_array)
            .and_then(|first| first.first())
            .and_then(Value::as_u64)
            .unwrap_or(0);

        // The served response really does spell this node "referance".
        if let Some(journal_node) = json.get("referance") {
            meta.journal = string_field(journal_node, "journal-title");
            if meta.year == 0
                && let Some(year_text) = journal_node.get("year").and_then(Value::as_str)
            {
                meta.year = year_text.parse().unwrap_or(0);
            }
        }

        meta.publisher = string_field(json, "publisher");
        meta.volume = string_field(json, "volume");
        meta.title = json
            .get("title")
            .and_then(Value::as_array)
            .and_then(|titles| titles.first())
            .and_then(Value::as_str)
            .map(ToString::to_string);
        meta.abstract_text = string_field(json, "abstract");

        if meta.doi.is_none() {
            meta.doi = string_field(json, "DOI");
        }
        meta.issn = json
            .get("ISSN")
            .and_then(Value::as_array)
            .and_then(|issns| issns.first())
            .and_then(Value::as_str)
            .map(ToString::to_string);

        self.add_journal_info(&mut meta).await;
        meta
    }

    /// Fills publisher and journal from the journal record when the work
    /// only carried an ISSN.
    async fn add_journal_info(&self, meta: &mut DocumentMeta) {
        let Some(issn) = meta.issn.as_deref() else {
            return;
        };
        if meta.publisher.is_some() && meta.journal.is_some() {
            return;
        }
        debug!(issn = %issn, "adding journal info");

        let url = format!("{}/journals/{}", self.base_url, urlencoding::encode(issn));
        let body = match http::get_string(&self.client, &url).await {
            Ok(body) => body,
            Err(error) => {
                debug!(error = %error, "journal lookup failed");
                return;
            }
        };
        let Ok(json) = serde_json::from_str::<Value>(&body) else {
            return;
        };
        let Some(message) = get_message(&json, "journal") else {
            return;
        };

        if meta.publisher.is_none() {
            meta.publisher = string_field(message, "publisher");
        }
        if meta.journal.is_none() {
            meta.journal = string_field(message, "title");
        }
    }
}

#[async_trait]
impl Backend for CrossrefBackend {
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

        if query.doi.is_some() {
            self.fill_from_doi(query, max_count).await
        } else {
            self.fill_from_work_query(query, max_count, page, sort).await
        }
    }
}

impl std::fmt::Debug for CrossrefBackend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CrossrefBackend")
            .field("base_url", &self.base_url)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// Unwraps the Crossref response envelope: the status must be "ok", the
/// message type must match and a message node must exist.
fn get_message<'a>(json: &'a Value, expected_type: &str) -> Option<&'a Value> {
    if json.get("status").and_then(Value::as_str) != Some("ok") {
        warn!("returned invalid status");
        return None;
    }
    let message_type = json.get("message-type").and_then(Value::as_str);
    if message_type != Some(expected_type) {
        warn!(
            got = message_type.unwrap_or("none"),
            expected = expected_type,
            "returned message of unexpected type"
        );
        return None;
    }
    let message = json.get("message")?;
    if message.is_null() {
        warn!("message does not contain a document entry");
        return None;
    }
    Some(message)
}

/// String value of an object key, when present and a string.
fn string_field(json: &Value, key: &str) -> Option<String> {
    json.get(key)
        .and_then(Value::as_str)
        .map(ToString::to_string)
}

/// Joins author objects into the canonical `"Given Family, Given Family"`
/// form.
fn join_authors(authors: &[Value]) -> String {
    let mut joined = String::new();
    for author in authors {
        let given = author.get("given").and_then(Value::as_str);
        let family = author.get("family").and_then(Value::as_str);
        if given.is_none() && family.is_none() {
            continue;
        }

        if !joined.is_empty() {
            joined.push_str(", ");
        }
        if let Some(given) = given {
            joined.push_str(given);
            if family.is_some() {
                joined.push(' ');
            }
        }
        if let Some(family) = family {
            joined.push_str(family);
        }
    }
    joined
}

/// Maps the advisory sort mode onto Crossref's sort/order parameters.
fn sort_params(sort: SortMode) -> Option<(&'static str, Option<&'static str>)> {
    match sort {
        SortMode::Relevance => None,
        SortMode::References => Some(("is-referenced-by-count", None)),
        SortMode::Oldest => Some(("published", Some("asc"))),
        SortMode::Newest => Some(("published", Some("desc"))),
        SortMode::Invalid => {
            warn!("invalid sort mode requested, using relevance");
            None
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn work_json() -> Value {
        serde_json::json!({
            "status": "ok",
            "message-type": "work",
            "message": {
                "URL": "https://journal.example/w1",
                "DOI": "10.1000/w1",
                "author": [
                    {"given": "Ada", "family": "Lovelace"},
                    {"given": "Charles", "family": "Babbage"}
                ],
                "published": {"date-parts": [[1941, 5, 1]]},
                "publisher": "Demo Press",
                "volume": "54",
                "title": ["A Singular Work"],
                "abstract": "All about it."
            }
        })
    }

    async fn backend(server: &MockServer) -> CrossrefBackend {
        let backend =
            CrossrefBackend::with_base_url(Some("tester@example.com".to_string()), 5, server.uri())
                .unwrap();
        backend.bind_id(7);
        backend
    }

    #[test]
    fn test_join_authors_given_family_form() {
        let authors = vec![
            serde_json::json!({"given": "Ada", "family": "Lovelace"}),
            serde_json::json!({"given": "Charles", "family": "Babbage"}),
        ];
        assert_eq!(join_authors(&authors), "Ada Lovelace, Charles Babbage");
    }

    #[test]
    fn test_join_authors_handles_missing_pieces() {
        let authors = vec![
            serde_json::json!({"family": "Consortium"}),
            serde_json::json!({"given": "Mono"}),
            serde_json::json!({}),
        ];
        assert_eq!(join_authors(&authors), "Consortium, Mono");
    }

    #[test]
    fn test_sort_params_mapping() {
        assert_eq!(sort_params(SortMode::Relevance), None);
        assert_eq!(
            sort_params(SortMode::References),
            Some(("is-referenced-by-count", None))
        );
        assert_eq!(sort_params(SortMode::Oldest), Some(("published", Some("asc"))));
        assert_eq!(sort_params(SortMode::Newest), Some(("published", Some("desc"))));
        assert_eq!(sort_params(SortMode::Invalid), None);
    }

    #[test]
    fn test_get_message_envelope_checks() {
        let bad_status = serde_json::json!({"status": "error", "message-type": "work", "message": {}});
        assert!(get_message(&bad_status, "work").is_none());

        let wrong_type =
            serde_json::json!({"status": "ok", "message-type": "journal", "message": {}});
        assert!(get_message(&wrong_type, "work").is_none());

        let null_message =
            serde_json::json!({"status": "ok", "message-type": "work", "message": null});
        assert!(get_message(&null_message, "work").is_none());

        let good = work_json();
        assert!(get_message(&good, "work").is_some());
    }

    #[tokio::test]
    async fn test_fill_by_doi_parses_work() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/works/10.1000%2Fw1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(work_json()))
            .mount(&server)
            .await;

        let backend = backend(&server).await;
        let query = DocumentMeta::from_doi("10.1000/w1", 0);
        let results = backend
            .fill_meta(&query, 1, 0, SortMode::Relevance)
            .await
            .unwrap();

        let record = results.first().unwrap();
        assert_eq!(record.doi.as_deref(), Some("10.1000/w1"));
        assert_eq!(record.author.as_deref(), Some("Ada Lovelace, Charles Babbage"));
        assert_eq!(record.year, 1941);
        assert_eq!(record.title.as_deref(), Some("A Singular Work"));
        assert_eq!(record.publisher.as_deref(), Some("Demo Press"));
        assert_eq!(record.backend_id, 7);
    }

    #[tokio::test]
    async fn test_fill_by_doi_keeps_query_context() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/works/10.1000%2Fw1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(work_json()))
            .mount(&server)
            .await;

        let backend = backend(&server).await;
        let query = DocumentMeta {
            doi: Some("10.1000/w1".to_string()),
            keywords: Some("user supplied".to_string()),
            ..DocumentMeta::default()
        };
        let results = backend
            .fill_meta(&query, 1, 0, SortMode::Relevance)
            .await
            .unwrap();

        assert_eq!(
            results.first().unwrap().keywords.as_deref(),
            Some("user supplied")
        );
    }

    #[tokio::test]
    async fn test_year_falls_back_to_referance_node() {
        let server = MockServer::start().await;
        let body = serde_json::json!({
            "status": "ok",
            "message-type": "work",
            "message": {
                "DOI": "10.1000/old",
                "title": ["Old Work"],
                "referance": {"journal-title": "Annalen", "year": "1905"}
            }
        });
        Mock::given(method("GET"))
            .and(path("/works/10.1000%2Fold"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let backend = backend(&server).await;
        let results = backend
            .fill_meta(&DocumentMeta::from_doi("10.1000/old", 0), 1, 0, SortMode::Relevance)
            .await
            .unwrap();

        let record = results.first().unwrap();
        assert_eq!(record.journal.as_deref(), Some("Annalen"));
        assert_eq!(record.year, 1905);
    }

    #[tokio::test]
    async fn test_issn_triggers_journal_enrichment() {
        let server = MockServer::start().await;
        let work = serde_json::json!({
            "status": "ok",
            "message-type": "work",
            "message": {
                "DOI": "10.1000/j1",
                "title": ["Journal Backed"],
                "ISSN": ["2222-3333"]
            }
        });
        let journal = serde_json::json!({
            "status": "ok",
            "message-type": "journal",
            "message": {"publisher": "Journal Press", "title": "The Journal"}
        });
        Mock::given(method("GET"))
            .and(path("/works/10.1000%2Fj1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(work))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/journals/2222-3333"))
            .respond_with(ResponseTemplate::new(200).set_body_json(journal))
            .mount(&server)
            .await;

        let backend = backend(&server).await;
        let results = backend
            .fill_meta(&DocumentMeta::from_doi("10.1000/j1", 0), 1, 0, SortMode::Relevance)
            .await
            .unwrap();

        let record = results.first().unwrap();
        assert_eq!(record.issn.as_deref(), Some("2222-3333"));
        assert_eq!(record.publisher.as_deref(), Some("Journal Press"));
        assert_eq!(record.journal.as_deref(), Some("The Journal"));
    }

    #[tokio::test]
    async fn test_work_query_translation() {
        let server = MockServer::start().await;
        let body = serde_json::json!({
            "status": "ok",
            "message-type": "work-list",
            "message": {
                "total-results": 1,
                "items": [{"DOI": "10.1000/hit", "title": ["Hit"]}]
            }
        });
        Mock::given(method("GET"))
            .and(path("/works"))
            .and(query_param("query.author", "Wallauer"))
            .and(query_param("query.publisher-name", "Nature"))
            .and(query_param("query.bibliographic", "1999"))
            .and(query_param("filter", "has-full-text:true"))
            .and(query_param("rows", "20"))
            .and(query_param("select", WORKS_SELECT))
            .and(query_param("mailto", "tester@example.com"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let backend = backend(&server).await;
        let query = DocumentMeta {
            author: Some("Wallauer".to_string()),
            journal: Some("Nature".to_string()),
            year: 1999,
            has_full_text: true,
            ..DocumentMeta::default()
        };
        let results = backend
            .fill_meta(&query, 20, 0, SortMode::Relevance)
            .await
            .unwrap();

        assert_eq!(results.count(), 1);
        assert_eq!(results.total_count, 1);
        assert_eq!(results.first().unwrap().doi.as_deref(), Some("10.1000/hit"));
    }

    #[tokio::test]
    async fn test_work_query_sends_sort_parameters() {
        let server = MockServer::start().await;
        let body = serde_json::json!({
            "status": "ok",
            "message-type": "work-list",
            "message": {"total-results": 1, "items": [{"title": ["Newest"]}]}
        });
        Mock::given(method("GET"))
            .and(path("/works"))
            .and(query_param("sort", "published"))
            .and(query_param("order", "desc"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let backend = backend(&server).await;
        let results = backend
            .fill_meta(&DocumentMeta::from_title("x"), 5, 0, SortMode::Newest)
            .await;
        assert!(results.is_some(), "sort parameters must be attached");
    }

    #[tokio::test]
    async fn test_query_without_searchable_fields_returns_none() {
        let server = MockServer::start().await;
        let backend = backend(&server).await;

        let query = DocumentMeta {
            pages: Some("1-2".to_string()),
            ..DocumentMeta::default()
        };
        assert!(
            backend
                .fill_meta(&query, 5, 0, SortMode::Relevance)
                .await
                .is_none()
        );
        assert!(
            server.received_requests().await.unwrap().is_empty(),
            "no request may be sent without a translatable field"
        );
    }

    #[tokio::test]
    async fn test_zero_max_count_returns_none() {
        let server = MockServer::start().await;
        let backend = backend(&server).await;
        assert!(
            backend
                .fill_meta(&DocumentMeta::from_title("x"), 0, 0, SortMode::Relevance)
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_doi_lookup_404_returns_none() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/works/10.9999%2Fmissing"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let backend = backend(&server).await;
        assert!(
            backend
                .fill_meta(
                    &DocumentMeta::from_doi("10.9999/missing", 0),
                    1,
                    0,
                    SortMode::Relevance
                )
                .await
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_malformed_work_list_returns_none() {
        let server = MockServer::start().await;
        let body = serde_json::json!({
            "status": "ok",
            "message-type": "work-list",
            "message": {"total-results": 0}
        });
        Mock::given(method("GET"))
            .and(path("/works"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let backend = backend(&server).await;
        assert!(
            backend
                .fill_meta(&DocumentMeta::from_title("x"), 5, 0, SortMode::Relevance)
                .await
                .is_none()
        );
    }
}
