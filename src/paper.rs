//! Library lifecycle and the public federation surface.
//!
//! [`Scipaper`] owns the configuration, the backend registry and the loaded
//! modules. It is created by [`Scipaper::init`] and torn down by
//! [`Scipaper::exit`], which consumes the handle; any call after exit is a
//! compile error rather than a runtime one.

use std::path::Path;
use std::sync::Arc;

use thiserror::Error;
use tracing::{error, warn};
use tracing_subscriber::EnvFilter;

use crate::backend::registry::BackendRegistry;
use crate::backend::{Backend, BackendInfo};
use crate::config::{Config, ConfigError};
use crate::meta::{DocumentMeta, FillRequest, PdfData, SearchResults, SortMode};
use crate::modules::{self, Module, ModuleError};

/// Errors raised by [`Scipaper::init`].
#[derive(Debug, Error)]
pub enum InitError {
    /// A caller-supplied configuration source could not be loaded
    #[error("failed to load configuration: {0}")]
    Config(#[from] ConfigError),

    /// A configured module name is unknown
    #[error("failed to load module '{name}': no such module")]
    ModuleLoad {
        /// The unresolvable module name
        name: String,
    },

    /// A configured module refused to initialize
    #[error("failed to initialize module '{name}': {source}")]
    ModuleInit {
        /// The failing module
        name: String,
        /// The module's error
        source: ModuleError,
    },
}

/// The library handle.
///
/// All state is owned here: the layered configuration, the backend registry
/// and the modules loaded from it. The handle is built for a
/// single-threaded cooperative caller; embedders that share it across
/// threads must serialize access externally.
pub struct Scipaper {
    config: Config,
    registry: BackendRegistry,
    modules: Vec<Box<dyn Module>>,
}

impl Scipaper {
    /// Initializes the library.
    ///
    /// Opens stderr logging, loads the layered configuration (optionally
    /// extended by a caller-supplied `.ini` path and in-memory bytes) and
    /// initializes every module listed under `Modules/Modules`.
    ///
    /// # Errors
    ///
    /// Returns [`InitError`] when a caller-supplied configuration source is
    /// unusable, a configured module is unknown, or a module fails to
    /// initialize. A failed init leaves nothing registered.
    pub fn init(
        config_path: Option<&Path>,
        config_bytes: Option<&[u8]>,
    ) -> Result<Self, InitError> {
        init_logging();

        let config = Config::load(config_path, config_bytes)?;
        let mut registry = BackendRegistry::new();
        let modules = modules::load_modules(&config, &mut registry)?;

        Ok(Self {
            config,
            registry,
            modules,
        })
    }

    /// Tears the library down: exits every module in load order, drops the
    /// configuration and warns about backends that failed to unregister.
    pub fn exit(mut self) {
        let mut modules = std::mem::take(&mut self.modules);
        for module in &mut modules {
            module.exit(&mut self.registry);
        }

        if self.registry.backend_count() != 0 {
            let leaked: Vec<String> = self
                .registry
                .backends()
                .iter()
                .map(|info| info.name.clone())
                .collect();
            warn!(
                count = leaked.len(),
                backends = %leaked.join(", "),
                "backend(s) have failed to unregister"
            );
        }
    }

    /// The library version.
    #[must_use]
    pub fn version() -> &'static str {
        env!("CARGO_PKG_VERSION")
    }

    /// The loaded configuration.
    #[must_use]
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Registers an embedder-supplied backend; returns its id.
    pub fn register_backend(&mut self, backend: Arc<dyn Backend>) -> i32 {
        self.registry.register(backend)
    }

    /// Unregisters a backend by id; unknown ids warn and do nothing.
    pub fn unregister_backend(&mut self, id: i32) {
        self.registry.unregister(id);
    }

    /// Descriptors of every registered backend in registration order.
    #[must_use]
    pub fn backends(&self) -> Arc<[BackendInfo]> {
        self.registry.backends()
    }

    /// Descriptor of one backend.
    #[must_use]
    pub fn backend_info(&self, id: i32) -> Option<BackendInfo> {
        self.registry.backend_info(id)
    }

    /// Display name of one backend.
    #[must_use]
    pub fn backend_name(&self, id: i32) -> String {
        self.registry.backend_name(id)
    }

    /// Id of the backend with the given name, 0 when absent.
    #[must_use]
    pub fn backend_id_by_name(&self, name: &str) -> i32 {
        self.registry.backend_id_by_name(name)
    }

    /// Number of registered backends.
    #[must_use]
    pub fn backend_count(&self) -> usize {
        self.registry.backend_count()
    }

    /// Searches for up to `max_count` documents matching the query record;
    /// see [`BackendRegistry::fill_meta`].
    pub async fn fill_meta(
        &self,
        query: &DocumentMeta,
        fill: Option<&FillRequest>,
        max_count: usize,
        page: usize,
        sort: SortMode,
    ) -> Option<SearchResults> {
        self.registry
            .fill_meta(query, fill, max_count, page, sort)
            .await
    }

    /// Returns the full text of the document described by `meta`.
    pub async fn get_document_text(&self, meta: &DocumentMeta) -> Option<String> {
        self.registry.get_text(meta).await
    }

    /// Returns the PDF of the document described by `meta`.
    pub async fn get_document_pdf(&self, meta: &DocumentMeta) -> Option<PdfData> {
        self.registry.get_pdf(meta).await
    }

    /// Finds the metadata of the document with the given DOI.
    pub async fn find_by_doi(&self, doi: &str, backend_id: i32) -> Option<DocumentMeta> {
        self.registry.find_by_doi(doi, backend_id).await
    }

    /// Finds the metadata of the document with the given title.
    pub async fn find_by_title(&self, title: &str) -> Option<DocumentMeta> {
        self.registry.find_by_title(title).await
    }

    /// Finds documents by a certain author.
    pub async fn find_by_author(&self, author: &str, max_count: usize) -> Option<SearchResults> {
        self.registry.find_by_author(author, max_count).await
    }

    /// Finds documents in a certain journal.
    pub async fn find_by_journal(&self, journal: &str, max_count: usize) -> Option<SearchResults> {
        self.registry.find_by_journal(journal, max_count).await
    }

    /// Fetches the PDF of the document described by `meta` and writes it to
    /// `path`. Returns false, with the cause logged, when no PDF could be
    /// obtained or written.
    pub async fn save_document_to_file(&self, meta: &DocumentMeta, path: &Path) -> bool {
        let Some(pdf) = self.get_document_pdf(meta).await else {
            return false;
        };
        match pdf.save_to_file(path) {
            Ok(()) => true,
            Err(err) => {
                error!(path = %path.display(), error = %err, "could not save pdf");
                false
            }
        }
    }
}

impl std::fmt::Debug for Scipaper {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scipaper")
            .field("registry", &self.registry)
            .field("module_count", &self.modules.len())
            .finish_non_exhaustive()
    }
}

/// Installs the stderr logging sink once per process.
///
/// Verbosity follows `RUST_LOG` and defaults to warnings, matching the
/// library's propagation policy of logging instead of raising.
fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init();
}
