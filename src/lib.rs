//! Scipaper Library
//!
//! This library unifies bibliographic metadata lookup, full-text retrieval
//! and PDF download for scientific papers across heterogeneous online
//! sources. Callers build a [`DocumentMeta`] query, the federation engine
//! routes it across the registered backends and returns normalized result
//! records; full texts and PDFs are fetched the same way.
//!
//! # Architecture
//!
//! The library is organized into the following modules:
//! - [`meta`] - Document record model, result pages, PDF payloads and the
//!   JSON/BibLaTeX serialization surface
//! - [`backend`] - Backend contract, the registry with the federated query
//!   engine and the bundled reference backends
//! - [`config`] - Layered INI configuration
//! - [`modules`] - Config-driven loading of the bundled backends
//! - [`paper`] - Library lifecycle handle and the public surface
//!
//! # Example
//!
//! ```no_run
//! use scipaper::Scipaper;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let library = Scipaper::init(None, Some(b"[Modules]\nModules=crossref\n".as_slice()))?;
//! if let Some(record) = library.find_by_doi("10.1016/j.ensm.2021.05.047", 0).await {
//!     println!("{}", record.describe());
//! }
//! library.exit();
//! # Ok(())
//! # }
//! ```

// Clippy lints - strict for library code
#![deny(clippy::unwrap_used)]
#![deny(clippy::expect_used)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod backend;
pub mod config;
mod http;
pub mod meta;
pub mod modules;
pub mod paper;

// Re-export commonly used types
pub use backend::registry::BackendRegistry;
pub use backend::{Backend, BackendInfo};
pub use backend::{core::CoreBackend, crossref::CrossrefBackend, scihub::ScihubBackend};
pub use config::{Config, ConfigError};
pub use http::HttpError;
pub use meta::{
    BackendData, Capabilities, DocumentMeta, FillRequest, PdfData, SearchResults, SortMode,
};
pub use modules::ModuleError;
pub use paper::{InitError, Scipaper};
