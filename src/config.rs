//! User configuration, loaded from `azul.json` in the platform config
//! directory. Every key is optional: unknown keys are ignored, and a key
//! with an invalid value falls back to its default with a warning instead
//! of poisoning the rest of the file.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_SYNC_DIR: &str = "sync";
pub const DEFAULT_SOURCEMAP_PATH: &str = "sourcemap.json";
pub const DEFAULT_SCRIPT_EXTENSION: &str = ".luau";
pub const DEFAULT_FILE_WATCH_DEBOUNCE_MS: u64 = 100;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub port: u16,
    pub debug_mode: bool,
    pub sync_dir: PathBuf,
    pub sourcemap_path: PathBuf,
    pub script_extension: String,
    pub file_watch_debounce: u64,
    pub delete_orphans_on_connect: bool,
    pub suffix_module_scripts: bool,
    pub request_snapshot_on_connect: bool,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            port: DEFAULT_PORT,
            debug_mode: false,
            sync_dir: PathBuf::from(DEFAULT_SYNC_DIR),
            sourcemap_path: PathBuf::from(DEFAULT_SOURCEMAP_PATH),
            script_extension: DEFAULT_SCRIPT_EXTENSION.to_owned(),
            file_watch_debounce: DEFAULT_FILE_WATCH_DEBOUNCE_MS,
            delete_orphans_on_connect: false,
            suffix_module_scripts: false,
            request_snapshot_on_connect: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file is not valid JSON: {source}")]
    Malformed {
        #[from]
        source: serde_json::Error,
    },

    #[error("config file must contain a JSON object")]
    NotAnObject,
}

impl Config {
    /// Loads the user config, falling back to defaults on any problem.
    pub fn load() -> Config {
        let Some(path) = Self::user_config_path() else {
            return Config::default();
        };
        Self::load_from(&path)
    }

    pub fn load_from(path: &Path) -> Config {
        let contents = match fs_err::read_to_string(path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Config::default();
            }
            Err(err) => {
                log::warn!(
                    "Could not read config at {}: {}; using defaults",
                    path.display(),
                    err
                );
                return Config::default();
            }
        };

        match Self::parse(&contents) {
            Ok(config) => config,
            Err(err) => {
                log::warn!(
                    "Could not parse config at {}: {}; using defaults",
                    path.display(),
                    err
                );
                Config::default()
            }
        }
    }

    /// Parses a config object field by field so one bad value doesn't
    /// discard the rest.
    pub fn parse(contents: &str) -> Result<Config, ConfigError> {
        let value: Value = serde_json::from_str(contents)?;
        let object = value.as_object().ok_or(ConfigError::NotAnObject)?;

        let mut config = Config::default();

        if let Some(port) = object.get("port") {
            match port.as_u64() {
                Some(port @ 1..=65535) => config.port = port as u16,
                _ => log::warn!("Ignoring invalid 'port' value {}", port),
            }
        }

        if let Some(debug_mode) = object.get("debugMode") {
            match debug_mode.as_bool() {
                Some(debug_mode) => config.debug_mode = debug_mode,
                None => log::warn!("Ignoring invalid 'debugMode' value {}", debug_mode),
            }
        }

        if let Some(sync_dir) = object.get("syncDir") {
            match sync_dir.as_str() {
                Some(sync_dir) if !sync_dir.is_empty() => {
                    config.sync_dir = normalize_path(sync_dir);
                }
                _ => log::warn!("Ignoring invalid 'syncDir' value {}", sync_dir),
            }
        }

        if let Some(sourcemap_path) = object.get("sourcemapPath") {
            match sourcemap_path.as_str() {
                Some(sourcemap_path) if !sourcemap_path.is_empty() => {
                    config.sourcemap_path = normalize_path(sourcemap_path);
                }
                _ => log::warn!("Ignoring invalid 'sourcemapPath' value {}", sourcemap_path),
            }
        }

        if let Some(extension) = object.get("scriptExtension") {
            match extension.as_str() {
                Some(extension) if !extension.is_empty() => {
                    config.script_extension = normalize_extension(extension);
                }
                _ => log::warn!("Ignoring invalid 'scriptExtension' value {}", extension),
            }
        }

        if let Some(debounce) = object.get("fileWatchDebounce") {
            match debounce.as_u64() {
                Some(debounce) if debounce > 0 => config.file_watch_debounce = debounce,
                _ => log::warn!("Ignoring invalid 'fileWatchDebounce' value {}", debounce),
            }
        }

        if let Some(delete_orphans) = object.get("deleteOrphansOnConnect") {
            match delete_orphans.as_bool() {
                Some(delete_orphans) => config.delete_orphans_on_connect = delete_orphans,
                None => log::warn!(
                    "Ignoring invalid 'deleteOrphansOnConnect' value {}",
                    delete_orphans
                ),
            }
        }

        if let Some(suffix) = object.get("suffixModuleScripts") {
            match suffix.as_bool() {
                Some(suffix) => config.suffix_module_scripts = suffix,
                None => log::warn!("Ignoring invalid 'suffixModuleScripts' value {}", suffix),
            }
        }

        if let Some(request) = object.get("requestSnapshotOnConnect") {
            match request.as_bool() {
                Some(request) => config.request_snapshot_on_connect = request,
                None => log::warn!(
                    "Ignoring invalid 'requestSnapshotOnConnect' value {}",
                    request
                ),
            }
        }

        Ok(config)
    }

    pub fn user_config_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("azul").join("azul.json"))
    }
}

/// Strips a redundant leading `./` so derived paths (notably sourcemap
/// `filePaths`) come out clean.
fn normalize_path(raw: &str) -> PathBuf {
    PathBuf::from(raw.strip_prefix("./").unwrap_or(raw))
}

/// Script extensions are stored with their leading dot.
fn normalize_extension(raw: &str) -> String {
    if raw.starts_with('.') {
        raw.to_owned()
    } else {
        format!(".{}", raw)
    }
}
