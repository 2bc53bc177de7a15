//! Document metadata model.
//!
//! This module defines the types every other part of the crate is written
//! against:
//!
//! - [`DocumentMeta`] - the normalized metadata of one paper, used both as a
//!   query (caller fills some fields) and as a result (backend fills fields)
//! - [`SearchResults`] - one page of results from a metadata search
//! - [`PdfData`] - raw PDF bytes plus the metadata of the document they
//!   belong to
//! - [`FillRequest`] - the per-field mask a caller uses to demand fields be
//!   present in every returned record
//! - [`SortMode`] - advisory result ordering
//! - [`Capabilities`] - what a backend can do
//! - [`BackendData`] - opaque per-backend state attached to records

mod biblatex;
mod json;

use std::any::Any;
use std::fmt;
use std::fs;
use std::path::Path;

/// Opaque per-backend state attached to a [`DocumentMeta`].
///
/// Backends use this to cache lookups (for example a full text that arrived
/// with a search response) so later operations on the same record stay in
/// memory. The deep-copy hook is `clone_data`; dropping the box is the free
/// hook, so a record carrying data always carries both.
pub trait BackendData: fmt::Debug + Send + Sync + 'static {
    /// Deep-copies the state for an independently-owned record.
    fn clone_data(&self) -> Box<dyn BackendData>;

    /// Downcasting access for the owning backend.
    fn as_any(&self) -> &dyn Any;
}

impl Clone for Box<dyn BackendData> {
    fn clone(&self) -> Self {
        self.clone_data()
    }
}

/// The metadata of one paper.
///
/// Every textual field is optional; `year == 0` and `references < 0` mean
/// "unknown". A caller builds one of these as a query by setting the fields
/// it knows; backends return them with the fields they found. `search_text`
/// is only meaningful on queries and is never set on results.
#[derive(Debug, Clone)]
pub struct DocumentMeta {
    /// The DOI of the paper
    pub doi: Option<String>,
    /// The URL of the paper in the journal
    pub url: Option<String>,
    /// Publication year of the paper, 0 if unknown
    pub year: u64,
    /// Publisher of the paper
    pub publisher: Option<String>,
    /// Journal volume where the paper appeared
    pub volume: Option<String>,
    /// Page(s) where the paper is to be found in the volume
    pub pages: Option<String>,
    /// The author(s) of the paper, `"Given Family, Given Family"`
    pub author: Option<String>,
    /// The title of the paper
    pub title: Option<String>,
    /// The journal in which the paper was published
    pub journal: Option<String>,
    /// The journal issn in which the paper was published
    pub issn: Option<String>,
    /// Comma-separated keywords given by the author
    pub keywords: Option<String>,
    /// URL where the full text of the document can be found
    pub download_url: Option<String>,
    /// Abstract of the document
    pub abstract_text: Option<String>,
    /// How often the article has been cited, -1 if unknown
    pub references: i64,
    /// Freeform text to search for in backends; queries only
    pub search_text: Option<String>,
    /// A hint that the document has full text available
    pub has_full_text: bool,
    /// The id of the backend that found the document, or the id of the
    /// backend that shall be tried to find it; 0 means any
    pub backend_id: i32,
    /// Backend specific data, not to be interpreted by clients
    pub backend_data: Option<Box<dyn BackendData>>,
    /// Set by the federation engine once the record passed enrichment
    pub completed: bool,
}

impl Default for DocumentMeta {
    fn default() -> Self {
        Self {
            doi: None,
            url: None,
            year: 0,
            publisher: None,
            volume: None,
            pages: None,
            author: None,
            title: None,
            journal: None,
            issn: None,
            keywords: None,
            download_url: None,
            abstract_text: None,
            references: -1,
            search_text: None,
            has_full_text: false,
            backend_id: 0,
            backend_data: None,
            completed: false,
        }
    }
}

impl DocumentMeta {
    /// Creates an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a query record for a DOI, optionally pinned to a backend.
    #[must_use]
    pub fn from_doi(doi: impl Into<String>, backend_id: i32) -> Self {
        Self {
            doi: Some(doi.into()),
            backend_id,
            ..Self::default()
        }
    }

    /// Creates a query record for an author.
    #[must_use]
    pub fn from_author(author: impl Into<String>) -> Self {
        Self {
            author: Some(author.into()),
            ..Self::default()
        }
    }

    /// Creates a query record for a title.
    #[must_use]
    pub fn from_title(title: impl Into<String>) -> Self {
        Self {
            title: Some(title.into()),
            ..Self::default()
        }
    }

    /// Creates a query record for a journal.
    #[must_use]
    pub fn from_journal(journal: impl Into<String>) -> Self {
        Self {
            journal: Some(journal.into()),
            ..Self::default()
        }
    }

    /// Creates a free-text query record.
    #[must_use]
    pub fn from_search_text(text: impl Into<String>) -> Self {
        Self {
            search_text: Some(text.into()),
            ..Self::default()
        }
    }

    /// Adds the fields set in `source` but not in `self` to `self`.
    ///
    /// Fields already set are never overwritten; `references` keeps the
    /// larger of the two values.
    pub fn combine(&mut self, source: &DocumentMeta) {
        fill_string(&mut self.doi, &source.doi);
        fill_string(&mut self.url, &source.url);
        if self.year == 0 {
            self.year = source.year;
        }
        fill_string(&mut self.publisher, &source.publisher);
        fill_string(&mut self.volume, &source.volume);
        fill_string(&mut self.pages, &source.pages);
        fill_string(&mut self.author, &source.author);
        fill_string(&mut self.title, &source.title);
        fill_string(&mut self.journal, &source.journal);
        fill_string(&mut self.issn, &source.issn);
        fill_string(&mut self.keywords, &source.keywords);
        fill_string(&mut self.download_url, &source.download_url);
        fill_string(&mut self.abstract_text, &source.abstract_text);
        if self.references < source.references {
            self.references = source.references;
        }
    }

    /// Compares the user-visible text and number fields of two records.
    ///
    /// This does not tell you whether the two records refer to the same work;
    /// it is a bitwise-sense equality useful for detecting repeated queries.
    #[must_use]
    pub fn is_equal(&self, other: &DocumentMeta) -> bool {
        self.doi == other.doi
            && self.url == other.url
            && self.year == other.year
            && self.publisher == other.publisher
            && self.volume == other.volume
            && self.pages == other.pages
            && self.author == other.author
            && self.title == other.title
            && self.journal == other.journal
            && self.issn == other.issn
            && self.keywords == other.keywords
    }

    /// Creates a human readable string describing the record.
    #[must_use]
    pub fn describe(&self) -> String {
        format!(
            "Document:\nDOI: {}\nTitle: {}\nAuthor: {}\nJournal: {}\nKeywords: {}\nAbstract: {}\n",
            self.doi.as_deref().unwrap_or(""),
            self.title.as_deref().unwrap_or(""),
            self.author.as_deref().unwrap_or(""),
            self.journal.as_deref().unwrap_or(""),
            self.keywords.as_deref().unwrap_or(""),
            self.abstract_text.as_deref().unwrap_or("")
        )
    }
}

fn fill_string(target: &mut Option<String>, source: &Option<String>) {
    if target.is_none() {
        target.clone_from(source);
    }
}

/// One page of results from a metadata search.
///
/// `documents` may contain `None` entries where a backend could not parse an
/// individual result; callers skip them.
#[derive(Debug, Clone, Default)]
pub struct SearchResults {
    /// The documents of this page, in backend order
    pub documents: Vec<Option<DocumentMeta>>,
    /// The result-count ceiling the caller requested
    pub max_count: usize,
    /// The 0-based page that was actually served
    pub page: usize,
    /// Total hits known to the backend, 0 when unsupported
    pub total_count: usize,
}

impl SearchResults {
    /// Creates an empty result page for a request ceiling.
    #[must_use]
    pub fn new(max_count: usize) -> Self {
        Self {
            max_count,
            ..Self::default()
        }
    }

    /// Number of entries on this page, including unparsable ones.
    #[must_use]
    pub fn count(&self) -> usize {
        self.documents.len()
    }

    /// Iterates over the valid records of this page.
    pub fn records(&self) -> impl Iterator<Item = &DocumentMeta> {
        self.documents.iter().filter_map(Option::as_ref)
    }

    /// First valid record of this page, if any.
    #[must_use]
    pub fn first(&self) -> Option<&DocumentMeta> {
        self.records().next()
    }

    /// Consumes the page and returns its first valid record.
    #[must_use]
    pub fn into_first(self) -> Option<DocumentMeta> {
        self.documents.into_iter().flatten().next()
    }
}

/// Raw data of a PDF document plus the metadata it belongs to.
#[derive(Debug, Clone)]
pub struct PdfData {
    /// Raw PDF bytes
    pub data: Vec<u8>,
    /// Metadata of the document the PDF belongs to
    pub meta: DocumentMeta,
}

impl PdfData {
    /// Length of the raw data in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// True when no bytes are present.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Writes the raw bytes to a file.
    ///
    /// # Errors
    ///
    /// Returns the underlying io error when the file cannot be written.
    pub fn save_to_file(&self, path: &Path) -> std::io::Result<()> {
        fs::write(path, &self.data)
    }
}

/// Tells the federation engine which fields the caller requires to be
/// present in every returned record.
///
/// Backends are tried in sequence until every requested field is filled or
/// no backend is left.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[allow(missing_docs, clippy::struct_excessive_bools)]
pub struct FillRequest {
    pub doi: bool,
    pub url: bool,
    pub year: bool,
    pub publisher: bool,
    pub volume: bool,
    pub pages: bool,
    pub author: bool,
    pub title: bool,
    pub journal: bool,
    pub issn: bool,
    pub keywords: bool,
    pub download_url: bool,
    pub abstract_text: bool,
    pub references: bool,
}

impl FillRequest {
    /// A request demanding every field.
    #[must_use]
    pub fn all() -> Self {
        Self {
            doi: true,
            url: true,
            year: true,
            publisher: true,
            volume: true,
            pages: true,
            author: true,
            title: true,
            journal: true,
            issn: true,
            keywords: true,
            download_url: true,
            abstract_text: true,
            references: true,
        }
    }

    /// True when every requested field is present on `meta`.
    ///
    /// Strings must be set, a requested year must be non-zero and requested
    /// references must be non-negative.
    #[must_use]
    pub fn is_satisfied_by(&self, meta: &DocumentMeta) -> bool {
        !(self.doi && meta.doi.is_none()
            || self.url && meta.url.is_none()
            || self.year && meta.year == 0
            || self.publisher && meta.publisher.is_none()
            || self.volume && meta.volume.is_none()
            || self.pages && meta.pages.is_none()
            || self.author && meta.author.is_none()
            || self.title && meta.title.is_none()
            || self.journal && meta.journal.is_none()
            || self.issn && meta.issn.is_none()
            || self.keywords && meta.keywords.is_none()
            || self.download_url && meta.download_url.is_none()
            || self.abstract_text && meta.abstract_text.is_none()
            || self.references && meta.references < 0)
    }
}

/// Advisory sorting direction of search output.
///
/// Backends that cannot honor the requested order fall back to
/// [`SortMode::Relevance`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SortMode {
    /// Effectively lets the backend choose an ordering
    #[default]
    Relevance,
    /// Most referenced work to least referenced work
    References,
    /// Publication date, oldest to newest
    Oldest,
    /// Publication date, newest to oldest
    Newest,
    /// Sentinel for an unrecognized mode; treated as relevance with a warning
    Invalid,
}

impl SortMode {
    /// Stable display name of the mode.
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Self::Relevance => "relevance",
            Self::References => "references",
            Self::Oldest => "oldest",
            Self::Newest => "newest",
            Self::Invalid => "invalid",
        }
    }
}

impl fmt::Display for SortMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Flags that describe what a backend can do.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Capabilities(u8);

impl Capabilities {
    /// No capabilities at all.
    pub const NONE: Capabilities = Capabilities(0);
    /// Backend can fill [`DocumentMeta`] records.
    pub const FILL: Capabilities = Capabilities(1);
    /// Backend can get the full text of documents.
    pub const GET_TEXT: Capabilities = Capabilities(1 << 1);
    /// Backend can get pdfs of documents.
    pub const GET_PDF: Capabilities = Capabilities(1 << 2);

    /// True when every capability in `other` is present.
    #[must_use]
    pub fn contains(self, other: Capabilities) -> bool {
        self.0 & other.0 == other.0
    }

    /// True when no capability is set.
    #[must_use]
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }

    /// Human readable list of the set flags.
    #[must_use]
    pub fn describe(self) -> String {
        let mut parts = Vec::new();
        if self.contains(Self::FILL) {
            parts.push("fill metadata");
        }
        if self.contains(Self::GET_TEXT) {
            parts.push("get full text");
        }
        if self.contains(Self::GET_PDF) {
            parts.push("get pdfs");
        }
        parts.join(", ")
    }
}

impl std::ops::BitOr for Capabilities {
    type Output = Capabilities;

    fn bitor(self, rhs: Capabilities) -> Capabilities {
        Capabilities(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for Capabilities {
    fn bitor_assign(&mut self, rhs: Capabilities) {
        self.0 |= rhs.0;
    }
}
