//! Backend registry and the federated query engine.
//!
//! The [`BackendRegistry`] keeps an ordered collection of registered
//! backends and routes caller requests across them: newest registration
//! first, first non-null answer wins. On a metadata search the engine also
//! folds the caller's query context into each returned record and, when a
//! [`FillRequest`] is given, completes missing fields from other backends
//! via DOI lookups.

use std::sync::{Arc, RwLock};

use tracing::{debug, warn};

use crate::meta::{Capabilities, DocumentMeta, FillRequest, PdfData, SearchResults, SortMode};

use super::{Backend, BackendInfo};

/// One registered backend.
struct Registration {
    id: i32,
    backend: Arc<dyn Backend>,
}

/// Ordered collection of backends with the federation engine.
///
/// Registrations are kept newest-first; ids are strictly increasing and
/// never reused within one registry. The descriptor listing is cached and
/// rebuilt lazily after any registration change.
pub struct BackendRegistry {
    /// Registrations, newest first.
    backends: Vec<Registration>,
    id_counter: i32,
    /// Lazily-built descriptor listing in registration order.
    snapshot: RwLock<Option<Arc<[BackendInfo]>>>,
}

impl BackendRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            backends: Vec::new(),
            id_counter: 0,
            snapshot: RwLock::new(None),
        }
    }

    /// Registers a backend and returns its assigned id.
    ///
    /// Newer registrations are tried first by every federated operation.
    pub fn register(&mut self, backend: Arc<dyn Backend>) -> i32 {
        self.id_counter += 1;
        let id = self.id_counter;

        let info = backend.info();
        if info.capabilities.is_empty() {
            warn!(backend = %info.name, "registering backend without any capabilities");
        }
        debug!(
            backend = %info.name,
            id,
            capabilities = %info.capabilities.describe(),
            "registering backend"
        );

        backend.bind_id(id);
        self.backends.insert(0, Registration { id, backend });
        self.invalidate_snapshot();
        id
    }

    /// Removes the backend with the given id.
    ///
    /// Removing an unknown id is a warning and otherwise a no-op.
    pub fn unregister(&mut self, id: i32) {
        let Some(position) = self.backends.iter().position(|reg| reg.id == id) else {
            warn!(id, "trying to remove non-existing backend");
            return;
        };
        let removed = self.backends.remove(position);
        debug!(backend = %removed.backend.info().name, id, "unregistered backend");
        self.invalidate_snapshot();
    }

    fn invalidate_snapshot(&self) {
        if let Ok(mut snapshot) = self.snapshot.write() {
            *snapshot = None;
        }
    }

    /// Number of registered backends.
    #[must_use]
    pub fn backend_count(&self) -> usize {
        self.backends.len()
    }

    /// Descriptors of every registered backend in registration order.
    ///
    /// The listing is cached until the next register/unregister.
    #[must_use]
    pub fn backends(&self) -> Arc<[BackendInfo]> {
        if let Some(snapshot) = self.snapshot.read().ok().and_then(|guard| guard.clone()) {
            return snapshot;
        }

        let built: Arc<[BackendInfo]> = self
            .backends
            .iter()
            .rev()
            .map(|reg| reg.backend.info().clone())
            .collect();
        if let Ok(mut guard) = self.snapshot.write() {
            *guard = Some(built.clone());
        }
        built
    }

    /// Descriptor of the backend with the given id.
    #[must_use]
    pub fn backend_info(&self, id: i32) -> Option<BackendInfo> {
        self.backends
            .iter()
            .find(|reg| reg.id == id)
            .map(|reg| reg.backend.info().clone())
    }

    /// Display name of the backend with the given id.
    ///
    /// Id 0 is the unscoped query marker, unknown ids render as "Invalid".
    #[must_use]
    pub fn backend_name(&self, id: i32) -> String {
        if id == 0 {
            return "Unknown/Any".to_string();
        }
        self.backend_info(id)
            .map_or_else(|| "Invalid".to_string(), |info| info.name)
    }

    /// Id of the backend with the given name, or 0 when absent.
    #[must_use]
    pub fn backend_id_by_name(&self, name: &str) -> i32 {
        self.backends
            .iter()
            .find(|reg| reg.backend.info().name == name)
            .map_or(0, |reg| reg.id)
    }

    /// Searches for up to `max_count` documents matching the query across
    /// the registered backends.
    ///
    /// Backends are tried newest-first and the first page of results wins.
    /// The caller's query fields are folded into every returned record, and
    /// when `fill` is given every record that does not satisfy it is
    /// completed from the remaining backends by DOI lookup. A query pinned
    /// to one backend (`query.backend_id != 0`) excludes cross-backend
    /// completion; a fill request passed alongside a pin is ignored with a
    /// warning.
    pub async fn fill_meta(
        &self,
        query: &DocumentMeta,
        mut fill: Option<&FillRequest>,
        max_count: usize,
        page: usize,
        sort: SortMode,
    ) -> Option<SearchResults> {
        if query.backend_id != 0 && fill.is_some() {
            warn!(
                backend_id = query.backend_id,
                "a search request with an explicitly set backend id also has a fill request, \
                 it will be ignored"
            );
            fill = None;
        }

        for reg in &self.backends {
            if !reg.backend.info().capabilities.contains(Capabilities::FILL) {
                continue;
            }
            if query.backend_id != 0 && query.backend_id != reg.id {
                continue;
            }

            let Some(mut results) = reg.backend.fill_meta(query, max_count, page, sort).await
            else {
                continue;
            };

            for slot in &mut results.documents {
                let Some(record) = slot.as_mut() else {
                    continue;
                };
                record.combine(query);
                if query.backend_id == 0
                    && let Some(fill) = fill
                    && !fill.is_satisfied_by(record)
                {
                    debug!(
                        backend = %reg.backend.info().name,
                        "document found but fill request not yet satisfied"
                    );
                    self.complete_fill(record, fill).await;
                }
                record.completed = true;
            }
            return Some(results);
        }

        if query.backend_id == 0 {
            warn!("unable to fill meta");
        } else {
            warn!(
                backend = %self.backend_name(query.backend_id),
                "unable to get meta from pinned backend, maybe try without specifying a backend"
            );
        }
        None
    }

    /// Completes missing fields on `record` from other backends.
    ///
    /// Each backend other than the record's producer is asked for the
    /// record's DOI in turn; found fields are folded in without ever
    /// overwriting existing ones. Stops as soon as the request is satisfied
    /// or every backend was tried. A record without a DOI cannot be
    /// completed.
    async fn complete_fill(&self, record: &mut DocumentMeta, fill: &FillRequest) {
        let Some(doi) = record.doi.clone() else {
            return;
        };

        for reg in &self.backends {
            if reg.id == record.backend_id {
                continue;
            }
            if !reg.backend.info().capabilities.contains(Capabilities::FILL) {
                continue;
            }

            debug!(backend = %reg.backend.info().name, "trying to complete record");
            let query = DocumentMeta::from_doi(doi.clone(), reg.id);
            let source = match reg
                .backend
                .fill_meta(&query, 1, 0, SortMode::Relevance)
                .await
            {
                Some(results) => results.into_first(),
                None => None,
            };
            if let Some(source) = source {
                record.combine(&source);
            }
            if fill.is_satisfied_by(record) {
                break;
            }
        }
    }

    /// Returns the full text of the document described by `meta`.
    ///
    /// Backends are tried newest-first; the first text wins.
    pub async fn get_text(&self, meta: &DocumentMeta) -> Option<String> {
        for reg in &self.backends {
            if !reg
                .backend
                .info()
                .capabilities
                .contains(Capabilities::GET_TEXT)
            {
                continue;
            }
            if meta.backend_id != 0 && meta.backend_id != reg.id {
                continue;
            }
            if let Some(text) = reg.backend.get_text(meta).await {
                return Some(text);
            }
        }

        if meta.backend_id == 0 {
            warn!("unable to get text");
        } else {
            warn!(
                backend = %self.backend_name(meta.backend_id),
                "unable to get text from pinned backend, maybe try without specifying a backend"
            );
        }
        None
    }

    /// Returns the PDF of the document described by `meta`.
    ///
    /// Backends are tried newest-first; the first PDF wins.
    pub async fn get_pdf(&self, meta: &DocumentMeta) -> Option<PdfData> {
        let mut backend_available = false;
        for reg in &self.backends {
            if !reg
                .backend
                .info()
                .capabilities
                .contains(Capabilities::GET_PDF)
            {
                continue;
            }
            if meta.backend_id != 0 && meta.backend_id != reg.id {
                continue;
            }
            backend_available = true;
            if let Some(data) = reg.backend.get_pdf(meta).await {
                return Some(data);
            }
        }

        if meta.backend_id == 0 {
            warn!(
                backend_available,
                "unable to get pdf data{}",
                if backend_available {
                    ""
                } else {
                    ", no backend available"
                }
            );
        } else {
            warn!(
                backend = %self.backend_name(meta.backend_id),
                "unable to get pdf data from pinned backend, maybe try without specifying a backend"
            );
        }
        None
    }

    /// Finds the metadata of the document with the given DOI.
    pub async fn find_by_doi(&self, doi: &str, backend_id: i32) -> Option<DocumentMeta> {
        let query = DocumentMeta::from_doi(doi, backend_id);
        self.fill_meta(&query, None, 1, 0, SortMode::Relevance)
            .await
            .and_then(SearchResults::into_first)
    }

    /// Finds the metadata of the document with the given title.
    pub async fn find_by_title(&self, title: &str) -> Option<DocumentMeta> {
        let query = DocumentMeta::from_title(title);
        self.fill_meta(&query, None, 1, 0, SortMode::Relevance)
            .await
            .and_then(SearchResults::into_first)
    }

    /// Finds documents by a certain author.
    pub async fn find_by_author(&self, author: &str, max_count: usize) -> Option<SearchResults> {
        let query = DocumentMeta::from_author(author);
        self.fill_meta(&query, None, max_count, 0, SortMode::Relevance)
            .await
    }

    /// Finds documents in a certain journal.
    pub async fn find_by_journal(&self, journal: &str, max_count: usize) -> Option<SearchResults> {
        let query = DocumentMeta::from_journal(journal);
        self.fill_meta(&query, None, max_count, 0, SortMode::Relevance)
            .await
    }
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for BackendRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<&str> = self
            .backends
            .iter()
            .map(|reg| reg.backend.info().name.as_str())
            .collect();
        f.debug_struct("BackendRegistry")
            .field("backend_count", &self.backends.len())
            .field("backends", &names)
            .finish()
    }
}
