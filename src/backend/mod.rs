//! Backend contract and the concrete backends shipped with the crate.
//!
//! A backend is anything that can answer one or more of three questions
//! about a paper: what is its metadata ([`Backend::fill_meta`]), what is its
//! full text ([`Backend::get_text`]) and where are its PDF bytes
//! ([`Backend::get_pdf`]). Backends register with the
//! [`registry::BackendRegistry`], which routes caller requests across them.
//!
//! - [`Backend`] - async trait every backend implements
//! - [`BackendInfo`] - name and capability flags of a backend
//! - [`crossref::CrossrefBackend`] - identifier resolver over a registry API
//! - [`core::CoreBackend`] - open-repository search with scroll paging
//! - [`scihub::ScihubBackend`] - direct PDF resolver over a portal page

pub mod core;
pub mod crossref;
pub mod registry;
pub mod scihub;

use async_trait::async_trait;

use crate::meta::{Capabilities, DocumentMeta, PdfData, SearchResults, SortMode};

/// Name and capabilities of a backend.
///
/// Names are case-sensitive and assumed unique across a registry. The
/// capability flags must cover exactly the operations the backend
/// implements; the registry never invokes an operation whose flag is unset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackendInfo {
    /// Name of the backend
    pub name: String,
    /// Flags that describe what the backend can do
    pub capabilities: Capabilities,
}

impl BackendInfo {
    /// Creates a descriptor.
    #[must_use]
    pub fn new(name: impl Into<String>, capabilities: Capabilities) -> Self {
        Self {
            name: name.into(),
            capabilities,
        }
    }
}

/// Trait every backend implements.
///
/// The default operation bodies return `None`; a backend overrides exactly
/// the operations its [`BackendInfo::capabilities`] advertise. Operations
/// must not retain references into the query record past their return, and
/// errors never cross this boundary: a backend logs and returns `None`.
///
/// # Object Safety
///
/// This trait uses `async_trait` to support dynamic dispatch via
/// `Arc<dyn Backend>`. Rust 2024 native async traits are not object-safe,
/// so `async_trait` is required for the registry pattern.
#[async_trait]
pub trait Backend: Send + Sync {
    /// Returns the backend's descriptor.
    fn info(&self) -> &BackendInfo;

    /// Called by the registry when the backend is registered, handing it its
    /// assigned id so it can stamp result records and recognize its own
    /// records later. The default does nothing; backends that never compare
    /// ids can ignore this.
    fn bind_id(&self, id: i32) {
        let _ = id;
    }

    /// Searches for up to `max_count` documents matching the query record.
    ///
    /// Returns `None` when the backend has no results or cannot serve the
    /// query; a returned page carries at most `max_count` records, each
    /// stamped with this backend's id.
    async fn fill_meta(
        &self,
        query: &DocumentMeta,
        max_count: usize,
        page: usize,
        sort: SortMode,
    ) -> Option<SearchResults> {
        let _ = (query, max_count, page, sort);
        None
    }

    /// Returns the full body text of the document, if obtainable.
    async fn get_text(&self, meta: &DocumentMeta) -> Option<String> {
        let _ = meta;
        None
    }

    /// Returns the raw PDF of the document plus a record describing the
    /// resolved source.
    async fn get_pdf(&self, meta: &DocumentMeta) -> Option<PdfData> {
        let _ = meta;
        None
    }
}
