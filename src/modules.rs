//! Module subsystem: config-driven backend loading.
//!
//! Backends ship as modules that know how to configure themselves and
//! register with a [`BackendRegistry`]. Which modules are active is decided
//! by the `Modules/Modules` configuration key; every listed name is
//! resolved against the built-in module table and initialized in order. A
//! module that fails to initialize fails the whole library init.

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error};

use crate::backend::core::CoreBackend;
use crate::backend::crossref::CrossrefBackend;
use crate::backend::registry::BackendRegistry;
use crate::backend::scihub::ScihubBackend;
use crate::config::Config;
use crate::http::HttpError;

/// Errors a module can raise during its init.
#[derive(Debug, Error)]
pub enum ModuleError {
    /// A configuration key the module cannot work without is absent
    #[error("required configuration key {group}/{key} is not set: {reason}")]
    MissingConfig {
        /// The configuration group
        group: &'static str,
        /// The configuration key
        key: &'static str,
        /// What the module needs the key for
        reason: &'static str,
    },

    /// The module's HTTP client could not be constructed
    #[error(transparent)]
    Http(#[from] HttpError),
}

/// A loadable backend module.
///
/// `init` reads the module's configuration, constructs its backend and
/// registers it; `exit` unregisters it again. Modules are driven by the
/// library lifecycle and exited in load order.
pub(crate) trait Module: Send + std::fmt::Debug {
    /// Stable module name, matched against the `Modules/Modules` list.
    fn name(&self) -> &'static str;

    /// Configures the module and registers its backend.
    ///
    /// # Errors
    ///
    /// Returns [`ModuleError`] when required configuration is missing or
    /// the backend cannot be constructed; this fails the library init.
    fn init(&mut self, conf: &Config, backends: &mut BackendRegistry) -> Result<(), ModuleError>;

    /// Unregisters the module's backend.
    fn exit(&mut self, backends: &mut BackendRegistry);
}

/// Resolves a module name against the built-in table.
fn builtin_module(name: &str) -> Option<Box<dyn Module>> {
    match name {
        "crossref" => Some(Box::new(CrossrefModule::default())),
        "core" => Some(Box::new(CoreModule::default())),
        "scihub" => Some(Box::new(ScihubModule::default())),
        _ => None,
    }
}

/// Loads every module named by the `Modules/Modules` configuration list.
///
/// On a failed module init every module already initialized is exited
/// again, so a failed load never leaks registrations.
pub(crate) fn load_modules(
    conf: &Config,
    backends: &mut BackendRegistry,
) -> Result<Vec<Box<dyn Module>>, crate::paper::InitError> {
    if let Some(path) = conf.get_string("Modules", "ModulePath") {
        debug!(path = %path, "ModulePath is advisory, backends are linked into the library");
    }

    let names = conf.get_string_list("Modules", "Modules");
    let mut modules: Vec<Box<dyn Module>> = Vec::with_capacity(names.len());

    for name in names {
        let Some(mut module) = builtin_module(&name) else {
            error!(module = %name, "failed to load module: no such module");
            unwind(&mut modules, backends);
            return Err(crate::paper::InitError::ModuleLoad { name });
        };

        debug!(module = %name, "loading module");
        if let Err(source) = module.init(conf, backends) {
            error!(module = %name, error = %source, "failed to load module");
            unwind(&mut modules, backends);
            return Err(crate::paper::InitError::ModuleInit { name, source });
        }
        debug!(module = module.name(), "module initialized");
        modules.push(module);
    }

    Ok(modules)
}

fn unwind(modules: &mut Vec<Box<dyn Module>>, backends: &mut BackendRegistry) {
    for module in modules.iter_mut() {
        module.exit(backends);
    }
    modules.clear();
}

/// Identifier-resolver module.
#[derive(Default, Debug)]
struct CrossrefModule {
    id: Option<i32>,
}

impl Module for CrossrefModule {
    fn name(&self) -> &'static str {
        "crossref"
    }

    fn init(&mut self, conf: &Config, backends: &mut BackendRegistry) -> Result<(), ModuleError> {
        let email = conf.get_string("Crossref", "Email");
        let timeout = timeout_secs(conf, "Crossref");
        let backend = CrossrefBackend::new(email, timeout)?;
        self.id = Some(backends.register(Arc::new(backend)));
        Ok(())
    }

    fn exit(&mut self, backends: &mut BackendRegistry) {
        if let Some(id) = self.id.take() {
            backends.unregister(id);
        }
    }
}

/// Repository search module.
#[derive(Default, Debug)]
struct CoreModule {
    id: Option<i32>,
}

impl Module for CoreModule {
    fn name(&self) -> &'static str {
        "core"
    }

    fn init(&mut self, conf: &Config, backends: &mut BackendRegistry) -> Result<(), ModuleError> {
        let rate_limit = conf.get_int("Core", "RateLimit", 10);
        debug!(rate_limit, "core module advisory rate limit");

        let Some(api_key) = conf.get_string("Core", "ApiKey") else {
            return Err(ModuleError::MissingConfig {
                group: "Core",
                key: "ApiKey",
                reason: "this module can not work without an api key",
            });
        };
        let timeout = timeout_secs(conf, "Core");
        let retry = u32::try_from(conf.get_int("Core", "Retry", 1).max(1)).unwrap_or(1);

        let backend = CoreBackend::new(api_key, timeout, retry)?;
        self.id = Some(backends.register(Arc::new(backend)));
        Ok(())
    }

    fn exit(&mut self, backends: &mut BackendRegistry) {
        if let Some(id) = self.id.take() {
            backends.unregister(id);
        }
    }
}

/// PDF-resolver module.
#[derive(Default, Debug)]
struct ScihubModule {
    id: Option<i32>,
}

impl Module for ScihubModule {
    fn name(&self) -> &'static str {
        "scihub"
    }

    fn init(&mut self, conf: &Config, backends: &mut BackendRegistry) -> Result<(), ModuleError> {
        let Some(base_url) = conf.get_string("Scihub", "Url") else {
            return Err(ModuleError::MissingConfig {
                group: "Scihub",
                key: "Url",
                reason: "a portal url is required",
            });
        };
        let timeout = timeout_secs(conf, "Scihub");

        let backend = ScihubBackend::new(base_url, timeout)?;
        self.id = Some(backends.register(Arc::new(backend)));
        Ok(())
    }

    fn exit(&mut self, backends: &mut BackendRegistry) {
        if let Some(id) = self.id.take() {
            backends.unregister(id);
        }
    }
}

/// Per-module request timeout with the shared default of 20 seconds.
fn timeout_secs(conf: &Config, group: &str) -> u64 {
    u64::try_from(conf.get_int(group, "Timeout", 20).max(1)).unwrap_or(20)
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn conf(text: &str) -> Config {
        Config::from_bytes(text.as_bytes()).unwrap()
    }

    #[test]
    fn test_builtin_table_resolves_known_names() {
        assert!(builtin_module("crossref").is_some());
        assert!(builtin_module("core").is_some());
        assert!(builtin_module("scihub").is_some());
        assert!(builtin_module("telepathy").is_none());
    }

    #[test]
    fn test_load_modules_registers_in_list_order() {
        let conf = conf(
            "[Modules]\nModules=crossref;scihub\n\
             [Scihub]\nUrl=https://portal.example/\n",
        );
        let mut backends = BackendRegistry::new();
        let modules = load_modules(&conf, &mut backends).unwrap();

        assert_eq!(modules.len(), 2);
        assert_eq!(backends.backend_count(), 2);
        // scihub was registered last, so it is tried first.
        let listing = backends.backends();
        assert_eq!(listing[0].name, "crossref");
        assert_eq!(listing[1].name, "scihub");
    }

    #[test]
    fn test_empty_module_list_loads_nothing() {
        let mut backends = BackendRegistry::new();
        let modules = load_modules(&conf("[Modules]\n"), &mut backends).unwrap();
        assert!(modules.is_empty());
        assert_eq!(backends.backend_count(), 0);
    }

    #[test]
    fn test_unknown_module_fails_and_unwinds() {
        let conf = conf(
            "[Modules]\nModules=crossref;telepathy\n",
        );
        let mut backends = BackendRegistry::new();
        let result = load_modules(&conf, &mut backends);

        assert!(matches!(
            result,
            Err(crate::paper::InitError::ModuleLoad { .. })
        ));
        assert_eq!(backends.backend_count(), 0, "crossref must be unwound");
    }

    #[test]
    fn test_core_module_requires_api_key() {
        let conf = conf("[Modules]\nModules=core\n");
        let mut backends = BackendRegistry::new();
        let result = load_modules(&conf, &mut backends);

        match result {
            Err(crate::paper::InitError::ModuleInit { name, source }) => {
                assert_eq!(name, "core");
                assert!(source.to_string().contains("Core/ApiKey"));
            }
            other => panic!("expected ModuleInit error, got {other:?}"),
        }
        assert_eq!(backends.backend_count(), 0);
    }

    #[test]
    fn test_scihub_module_requires_base_url() {
        let conf = conf("[Modules]\nModules=scihub\n");
        let mut backends = BackendRegistry::new();
        assert!(load_modules(&conf, &mut backends).is_err());
    }

    #[test]
    fn test_module_exit_unregisters_backend() {
        let conf = conf("[Modules]\nModules=crossref\n");
        let mut backends = BackendRegistry::new();
        let mut modules = load_modules(&conf, &mut backends).unwrap();
        assert_eq!(backends.backend_count(), 1);

        for module in &mut modules {
            module.exit(&mut backends);
        }
        assert_eq!(backends.backend_count(), 0);
    }
}
