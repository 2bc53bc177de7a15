//! Library lifecycle: init from configuration, module loading, teardown.

use std::io::Write;
use std::sync::Arc;

use scipaper::{Backend, BackendInfo, Capabilities, InitError, Scipaper};

struct InertBackend {
    info: BackendInfo,
}

#[async_trait::async_trait]
impl Backend for InertBackend {
    fn info(&self) -> &BackendInfo {
        &self.info
    }
}

#[test]
fn init_without_configuration_loads_no_backends() {
    let library = Scipaper::init(None, None).expect("empty init succeeds");
    assert_eq!(library.backend_count(), 0);
    assert!(library.backends().is_empty());
    library.exit();
}

#[test]
fn init_from_bytes_loads_listed_modules() {
    let config: &[u8] = b"[Modules]\nModules=crossref;scihub\n\
                          [Crossref]\nEmail=tester@example.com\n\
                          [Scihub]\nUrl=https://portal.example/\n";
    let library = Scipaper::init(None, Some(config)).expect("modules load");

    assert_eq!(library.backend_count(), 2);
    let crossref_id = library.backend_id_by_name("crossref");
    let scihub_id = library.backend_id_by_name("scihub");
    assert_ne!(crossref_id, 0);
    assert_ne!(scihub_id, 0);
    assert!(scihub_id > crossref_id, "list order assigns increasing ids");

    let info = library.backend_info(crossref_id).expect("descriptor");
    assert!(info.capabilities.contains(Capabilities::FILL));
    assert_eq!(library.backend_name(scihub_id), "scihub");
    assert_eq!(library.backend_name(0), "Unknown/Any");

    library.exit();
}

#[test]
fn init_from_ini_file_path() {
    let mut file = tempfile::Builder::new()
        .suffix(".ini")
        .tempfile()
        .expect("temp config");
    write!(
        file,
        "[Modules]\nModules=scihub\n[Scihub]\nUrl=https://portal.example/\n"
    )
    .expect("write config");

    let library = Scipaper::init(Some(file.path()), None).expect("file config loads");
    assert_eq!(library.backend_count(), 1);
    assert_eq!(library.backend_id_by_name("scihub"), 1);
    library.exit();
}

#[test]
fn config_bytes_override_config_file() {
    let mut file = tempfile::Builder::new()
        .suffix(".ini")
        .tempfile()
        .expect("temp config");
    write!(file, "[Scihub]\nUrl=https://from-file.example/\n").expect("write config");

    let bytes: &[u8] = b"[Modules]\nModules=scihub\n[Scihub]\nUrl=https://from-bytes.example/\n";
    let library = Scipaper::init(Some(file.path()), Some(bytes)).expect("layered init");

    assert_eq!(
        library
            .config()
            .get_string("Scihub", "Url")
            .as_deref(),
        Some("https://from-bytes.example/")
    );
    library.exit();
}

#[test]
fn unknown_module_fails_init() {
    let result = Scipaper::init(None, Some(b"[Modules]\nModules=antigravity\n".as_slice()));
    match result {
        Err(InitError::ModuleLoad { name }) => assert_eq!(name, "antigravity"),
        other => panic!("expected ModuleLoad error, got {other:?}"),
    }
}

#[test]
fn module_missing_required_key_fails_init() {
    let result = Scipaper::init(None, Some(b"[Modules]\nModules=core\n".as_slice()));
    match result {
        Err(InitError::ModuleInit { name, source }) => {
            assert_eq!(name, "core");
            assert!(source.to_string().contains("Core/ApiKey"));
        }
        other => panic!("expected ModuleInit error, got {other:?}"),
    }
}

#[test]
fn failed_init_unwinds_earlier_modules() {
    // crossref loads fine, core then fails on the missing key.
    let result = Scipaper::init(None, Some(b"[Modules]\nModules=crossref;core\n".as_slice()));
    assert!(matches!(result, Err(InitError::ModuleInit { .. })));
}

#[test]
fn core_module_loads_with_api_key() {
    let config: &[u8] = b"[Modules]\nModules=core\n[Core]\nApiKey=secret\nRetry=2\n";
    let library = Scipaper::init(None, Some(config)).expect("core loads with key");
    let id = library.backend_id_by_name("core");
    let info = library.backend_info(id).expect("descriptor");
    assert!(info.capabilities.contains(Capabilities::FILL));
    assert!(info.capabilities.contains(Capabilities::GET_TEXT));
    assert!(info.capabilities.contains(Capabilities::GET_PDF));
    assert_eq!(
        info.capabilities.describe(),
        "fill metadata, get full text, get pdfs"
    );
    library.exit();
}

#[test]
fn exit_warns_about_backends_left_registered() {
    // An embedder-registered backend is not owned by any module, so exit
    // reports it as leaked; the call itself must stay well-behaved.
    let mut library = Scipaper::init(None, None).expect("init");
    library.register_backend(Arc::new(InertBackend {
        info: BackendInfo::new("leaky", Capabilities::FILL),
    }));
    assert_eq!(library.backend_count(), 1);
    library.exit();
}

#[test]
fn unregister_removes_embedder_backend_before_exit() {
    let mut library = Scipaper::init(None, None).expect("init");
    let id = library.register_backend(Arc::new(InertBackend {
        info: BackendInfo::new("tidy", Capabilities::FILL),
    }));
    library.unregister_backend(id);
    assert_eq!(library.backend_count(), 0);
    library.exit();
}

#[test]
fn version_reports_crate_version() {
    assert_eq!(Scipaper::version(), env!("CARGO_PKG_VERSION"));
}
