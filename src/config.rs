//! Layered INI configuration.
//!
//! Configuration is read from up to four sources, later sources overriding
//! earlier ones: a system file, a per-user file, a caller-supplied path and
//! caller-supplied in-memory bytes. Lookups search the layers from the most
//! specific down and stop at the first layer that defines the key, so an
//! explicitly empty value in a later layer masks values from earlier ones.

use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::{debug, warn};

/// System-wide configuration file location.
const SYSTEM_CONFIG_PATH: &str = "/etc/scipaper/scipaper.ini";

/// Per-user configuration path fragment under the config home.
const USER_CONFIG_SUFFIX: &str = "scipaper/scipaper.ini";

/// Errors raised while loading explicitly-requested configuration sources.
///
/// Missing or malformed ambient sources (the system and user files) are
/// logged and skipped instead.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A caller-supplied configuration file could not be read
    #[error("failed to read config file '{path}': {source}")]
    Io {
        /// The file that failed
        path: PathBuf,
        /// Underlying io error
        source: std::io::Error,
    },

    /// A configuration source contained an invalid line
    #[error("invalid config syntax in {origin} on line {line}: {reason}")]
    Parse {
        /// Human-readable description of the source
        origin: String,
        /// 1-based line number of the offending line
        line: usize,
        /// What was wrong with the line
        reason: String,
    },
}

/// One parsed configuration source.
#[derive(Debug, Default)]
struct ConfLayer {
    origin: String,
    groups: HashMap<String, HashMap<String, String>>,
}

impl ConfLayer {
    fn lookup(&self, group: &str, key: &str) -> Option<&str> {
        self.groups
            .get(group)
            .and_then(|keys| keys.get(key))
            .map(String::as_str)
    }
}

/// Layered key/value configuration store.
///
/// Keys are addressed as `Group/Key` pairs. All getters take a default and
/// log at debug level when they fall back to it, so a missing optional key
/// never surprises anyone silently at a higher level.
#[derive(Debug, Default)]
pub struct Config {
    /// Layers ordered lowest precedence first.
    layers: Vec<ConfLayer>,
}

impl Config {
    /// Creates an empty configuration (every lookup yields the default).
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }

    /// Loads the layered configuration.
    ///
    /// The system and user files are optional and skipped with a debug log
    /// when absent or malformed. `config_path` is only honored when it has an
    /// `.ini` suffix; `config_bytes` is an in-memory keyfile taking the
    /// highest precedence.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when a caller-supplied source cannot be read
    /// or parsed. Ambient sources never fail the load.
    pub fn load(
        config_path: Option<&Path>,
        config_bytes: Option<&[u8]>,
    ) -> Result<Self, ConfigError> {
        let mut config = Self::default();

        config.push_ambient_file(Path::new(SYSTEM_CONFIG_PATH));
        if let Some(user_path) = user_config_path() {
            config.push_ambient_file(&user_path);
        }

        if let Some(path) = config_path {
            if path.extension().is_some_and(|ext| ext == "ini") {
                config.push_required_file(path)?;
            } else {
                warn!(
                    path = %path.display(),
                    "ignoring config file without .ini suffix"
                );
            }
        }

        if let Some(bytes) = config_bytes {
            let text = String::from_utf8_lossy(bytes);
            let layer = parse_ini(&text, "supplied raw data")?;
            config.layers.push(layer);
        }

        Ok(config)
    }

    /// Parses a single in-memory source; used by tests and embedders that
    /// manage their own layering.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] on the first malformed line.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, ConfigError> {
        Self::load(None, Some(bytes))
    }

    fn push_ambient_file(&mut self, path: &Path) {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(error) => {
                debug!(path = %path.display(), error = %error, "could not load config file");
                return;
            }
        };
        match parse_ini(&raw, &path.display().to_string()) {
            Ok(layer) => self.layers.push(layer),
            Err(error) => warn!(path = %path.display(), error = %error, "skipping config file"),
        }
    }

    fn push_required_file(&mut self, path: &Path) -> Result<(), ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let layer = parse_ini(&raw, &path.display().to_string())?;
        self.layers.push(layer);
        Ok(())
    }

    /// Finds the first layer, highest precedence first, defining the key.
    fn lookup(&self, group: &str, key: &str) -> Option<&str> {
        for layer in self.layers.iter().rev() {
            if let Some(value) = layer.lookup(group, key) {
                return Some(value);
            }
        }
        None
    }

    /// Gets a string value; an empty value counts as unset.
    #[must_use]
    pub fn get_string(&self, group: &str, key: &str) -> Option<String> {
        match self.lookup(group, key) {
            Some(value) if !value.is_empty() => Some(value.to_string()),
            Some(_) => {
                debug!(group, key, "config key present but empty");
                None
            }
            None => {
                debug!(group, key, "could not get config key");
                None
            }
        }
    }

    /// Gets an integer value, falling back to `default` when the key is
    /// missing or unparseable.
    #[must_use]
    pub fn get_int(&self, group: &str, key: &str, default: i64) -> i64 {
        let Some(value) = self.get_string(group, key) else {
            debug!(group, key, default, "defaulting config key");
            return default;
        };
        match value.parse::<i64>() {
            Ok(parsed) => parsed,
            Err(error) => {
                debug!(
                    group,
                    key,
                    value = %value,
                    error = %error,
                    default,
                    "could not parse config key, defaulting"
                );
                default
            }
        }
    }

    /// Gets a boolean value, falling back to `default` when the key is
    /// missing or unparseable. Accepts `true`/`false`/`1`/`0`.
    #[must_use]
    pub fn get_bool(&self, group: &str, key: &str, default: bool) -> bool {
        let Some(value) = self.get_string(group, key) else {
            debug!(group, key, default, "defaulting config key");
            return default;
        };
        match value.to_ascii_lowercase().as_str() {
            "true" | "1" => true,
            "false" | "0" => false,
            other => {
                debug!(
                    group,
                    key,
                    value = %other,
                    default,
                    "could not parse boolean config key, defaulting"
                );
                default
            }
        }
    }

    /// Gets a `;`-separated string list; missing key yields an empty list.
    #[must_use]
    pub fn get_string_list(&self, group: &str, key: &str) -> Vec<String> {
        let Some(value) = self.get_string(group, key) else {
            debug!(group, key, "could not get config key list");
            return Vec::new();
        };
        value
            .split(';')
            .map(str::trim)
            .filter(|entry| !entry.is_empty())
            .map(ToString::to_string)
            .collect()
    }
}

/// Resolves the per-user configuration file path.
///
/// Priority: `$XDG_CONFIG_HOME`, then `$HOME/.config`.
fn user_config_path() -> Option<PathBuf> {
    if let Some(xdg) = env_var_non_empty("XDG_CONFIG_HOME") {
        return Some(PathBuf::from(xdg).join(USER_CONFIG_SUFFIX));
    }
    let home = env_var_non_empty("HOME")?;
    Some(PathBuf::from(home).join(".config").join(USER_CONFIG_SUFFIX))
}

fn env_var_non_empty(name: &str) -> Option<String> {
    env::var(name).ok().filter(|value| !value.is_empty())
}

/// Parses keyfile-style INI text: `[Group]` headers, `key=value` lines and
/// `#`/`;` comment lines.
fn parse_ini(raw: &str, origin: &str) -> Result<ConfLayer, ConfigError> {
    let mut layer = ConfLayer {
        origin: origin.to_string(),
        groups: HashMap::new(),
    };
    let mut current_group = String::new();

    for (line_index, raw_line) in raw.lines().enumerate() {
        let line = raw_line.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(header) = line.strip_prefix('[') {
            let Some(group) = header.strip_suffix(']') else {
                return Err(ConfigError::Parse {
                    origin: layer.origin.clone(),
                    line: line_index + 1,
                    reason: "unterminated group header".to_string(),
                });
            };
            current_group = group.trim().to_string();
            layer.groups.entry(current_group.clone()).or_default();
            continue;
        }

        let Some((raw_key, raw_value)) = line.split_once('=') else {
            return Err(ConfigError::Parse {
                origin: layer.origin.clone(),
                line: line_index + 1,
                reason: "expected key=value".to_string(),
            });
        };
        if current_group.is_empty() {
            return Err(ConfigError::Parse {
                origin: layer.origin.clone(),
                line: line_index + 1,
                reason: "key outside of any [Group]".to_string(),
            });
        }

        layer
            .groups
            .entry(current_group.clone())
            .or_default()
            .insert(raw_key.trim().to_string(), raw_value.trim().to_string());
    }

    Ok(layer)
}
