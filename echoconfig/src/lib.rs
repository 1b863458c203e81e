//! # EchoRadio Configuration Module
//!
//! This module provides configuration management for EchoRadio, including:
//! - Loading configuration from YAML files
//! - Merging with embedded default configuration
//! - Environment variable overrides
//! - Type-safe getters and setters for configuration values
//! - Thread-safe singleton access pattern
//!
//! ## Usage
//!
//! ```no_run
//! use echoconfig::init_config;
//!
//! // Load the global configuration (once, at startup)
//! let config = init_config("")?;
//!
//! // Access configuration values
//! let port = config.get_http_port();
//! let bitrate = config.get_encoder_bitrate()?;
//!
//! // Update configuration values
//! config.set_http_port(9000)?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{anyhow, Context, Result};
use dirs::home_dir;
use once_cell::sync::OnceCell;
use serde_yaml::{Mapping, Number, Value};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::{Arc, Mutex, MutexGuard, PoisonError},
};
use tracing::{info, warn};

// Configuration par défaut intégrée
const DEFAULT_CONFIG: &str = include_str!("echoradio.yaml");

static CONFIG: OnceCell<Arc<Config>> = OnceCell::new();

const ENV_CONFIG_DIR: &str = "ECHORADIO_CONFIG";
const ENV_PREFIX: &str = "ECHORADIO_CONFIG__";
const DEFAULT_DIR_NAME: &str = ".echoradio";

// Default values for configuration
const DEFAULT_HTTP_PORT: u16 = 8080;
const DEFAULT_LISTEN_HOST: &str = "0.0.0.0";
const DEFAULT_LOG_BUFFER_CAPACITY: usize = 1000;
const DEFAULT_LOG_MIN_LEVEL: &str = "INFO";
const DEFAULT_LOG_ENABLE_CONSOLE: bool = true;

const DEFAULT_INTERLUDE: &str = "echorythms.mp3";
const DEFAULT_ALBUM_CHANCE: f64 = 0.1;
const DEFAULT_RESHUFFLE_HOURS: u64 = 7;
const DEFAULT_MAX_RELOAD_ATTEMPTS: usize = 3;
const DEFAULT_EMPTY_BACKOFF_SECS: u64 = 30;
const DEFAULT_STRIP_METADATA: bool = false;
const DEFAULT_EXTENSIONS: &[&str] = &["mp3"];

const DEFAULT_FFMPEG: &str = "ffmpeg";
const DEFAULT_CODEC: &str = "libmp3lame";
const DEFAULT_FORMAT: &str = "mp3";
const DEFAULT_BITRATE: u64 = 128;
const DEFAULT_FADE_IN_SECONDS: u64 = 5;

const DEFAULT_CHUNK_SIZE: usize = 4096;
const DEFAULT_READ_TIMEOUT_SECS: u64 = 5;
const DEFAULT_MAX_STALLS: usize = 10;
const DEFAULT_TERMINATE_TIMEOUT_SECS: u64 = 5;

const DEFAULT_LISTENER_BUFFER: usize = 32;

/// Macro to generate getter/setter for usize values with default
macro_rules! impl_usize_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<usize> {
            Ok(self.get_u64_or($path, $default as u64)? as usize)
        }

        pub fn $setter(&self, size: usize) -> Result<()> {
            let n = Number::from(size as u64);
            self.set_value($path, Value::Number(n))
        }
    };
}

/// Macro to generate getter/setter for u64 values with default
macro_rules! impl_u64_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<u64> {
            self.get_u64_or($path, $default)
        }

        pub fn $setter(&self, value: u64) -> Result<()> {
            self.set_value($path, Value::Number(Number::from(value)))
        }
    };
}

/// Macro to generate getter/setter for f64 values with default
macro_rules! impl_f64_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<f64> {
            match self.get_value($path) {
                Ok(Value::Number(n)) => Ok(n.as_f64().unwrap_or($default)),
                Ok(Value::String(s)) => Ok(s.trim().parse::<f64>().unwrap_or($default)),
                _ => Ok($default),
            }
        }

        pub fn $setter(&self, value: f64) -> Result<()> {
            self.set_value($path, Value::Number(Number::from(value)))
        }
    };
}

/// Macro to generate getter/setter for bool values with default
macro_rules! impl_bool_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<bool> {
            match self.get_value($path) {
                Ok(Value::Bool(b)) => Ok(b),
                _ => Ok($default),
            }
        }

        pub fn $setter(&self, value: bool) -> Result<()> {
            self.set_value($path, Value::Bool(value))
        }
    };
}

/// Macro to generate getter/setter for string values with default
macro_rules! impl_string_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<String> {
            match self.get_value($path) {
                Ok(Value::String(s)) if !s.is_empty() => Ok(s),
                _ => Ok($default.to_string()),
            }
        }

        pub fn $setter(&self, value: String) -> Result<()> {
            self.set_value($path, Value::String(value))
        }
    };
}

/// Configuration manager for EchoRadio
///
/// This structure manages the application configuration, including:
/// - Loading configuration from YAML files
/// - Merging with default configuration
/// - Handling environment variable overrides
/// - Providing typed getters/setters for configuration values
#[derive(Debug)]
pub struct Config {
    config_dir: String,
    path: String,
    data: Mutex<Value>,
}

// Implémentation manuelle de Clone
impl Clone for Config {
    fn clone(&self) -> Self {
        let data = self.data().clone();
        Self {
            config_dir: self.config_dir.clone(),
            path: self.path.clone(),
            data: Mutex::new(data),
        }
    }
}

impl Config {
    fn data(&self) -> MutexGuard<'_, Value> {
        self.data.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Finds a config directory by trying different locations in order
    fn find_config_dir(directory: &str) -> String {
        // 1. Try provided directory
        if !directory.is_empty() {
            return directory.to_string();
        }

        // 2. Try environment variable
        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var=ENV_CONFIG_DIR, path=%env_path, "Trying to load config from env");
            return env_path;
        }

        // 3. Try current directory
        if Path::new(DEFAULT_DIR_NAME).exists() {
            return DEFAULT_DIR_NAME.to_string();
        }

        // 4. Try home directory
        if let Some(home) = home_dir() {
            let home_config = home.join(DEFAULT_DIR_NAME);
            if home_config.exists() {
                return home_config.to_string_lossy().to_string();
            }
        }

        // Default fallback
        DEFAULT_DIR_NAME.to_string()
    }

    /// Validates and prepares a config directory
    fn validate_config_dir(path: &Path) -> Result<()> {
        // Create if doesn't exist
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        // Verify it's a directory
        if !path.is_dir() {
            return Err(anyhow!("{} is not a directory", path.display()));
        }

        // Test write permission
        let test_file = path.join(".write_test");
        fs::write(&test_file, b"test")?;
        fs::remove_file(&test_file)?;

        Ok(())
    }

    /// Determines and validates the configuration directory
    ///
    /// The directory is searched in the following order:
    /// 1. The provided `directory` parameter if not empty
    /// 2. The `ECHORADIO_CONFIG` environment variable
    /// 3. `.echoradio` in the current directory
    /// 4. `.echoradio` in the user's home directory
    ///
    /// The directory is created if it doesn't exist, and validated for write permission.
    pub fn config_dir(directory: &str) -> Result<String> {
        let dir_path = Self::find_config_dir(directory);
        Self::validate_config_dir(Path::new(&dir_path))
            .with_context(|| format!("Cannot use configuration directory {}", dir_path))?;
        Ok(dir_path)
    }

    /// Loads the configuration from the specified directory
    ///
    /// This method:
    /// 1. Determines the configuration directory
    /// 2. Loads the default embedded configuration
    /// 3. Merges it with the external config.yaml file if present
    /// 4. Applies environment variable overrides
    /// 5. Saves the merged configuration
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::config_dir(directory)?;
        info!(config_dir=%config_dir, "Using config directory");

        let config_file_path = Path::new(&config_dir).join("config.yaml");
        let path = config_file_path.to_string_lossy().to_string();

        // Charger la configuration par défaut
        let mut default_value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        let yaml_data = if let Ok(data) = fs::read(&path) {
            info!(config_file=%path, "Loaded config file");
            data
        } else {
            info!(config_file=%path, "Config file not found, using default embedded config");
            DEFAULT_CONFIG.as_bytes().to_vec()
        };

        // Merger avec la config par défaut
        let external_value: Value = serde_yaml::from_slice(&yaml_data)
            .with_context(|| format!("Invalid YAML in {}", path))?;
        merge_yaml(&mut default_value, &external_value);
        let mut config_value = Self::lower_keys_value(default_value);

        Self::apply_env_overrides(&mut config_value);

        let config = Config {
            config_dir,
            path,
            data: Mutex::new(config_value),
        };

        config.save()?;
        Ok(config)
    }

    /// Directory holding `config.yaml`
    pub fn directory(&self) -> &str {
        &self.config_dir
    }

    /// Saves the current configuration to the config.yaml file
    pub fn save(&self) -> Result<()> {
        let yaml = serde_yaml::to_string(&*self.data())?;
        fs::write(&self.path, yaml)?;
        Ok(())
    }

    /// Sets a configuration value at the specified path and saves it
    ///
    /// # Arguments
    ///
    /// * `path` - Array of keys representing the path (e.g., `&["host", "http_port"]`)
    /// * `value` - The YAML value to set
    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        {
            let mut data = self.data();
            Self::set_value_internal(&mut data, path, value)?;
        }
        self.save()
    }

    fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
        if path.is_empty() {
            *data = value;
            return Ok(());
        }
        if let Value::Mapping(map) = data {
            let key_value = Value::String(path[0].to_lowercase());
            if path.len() == 1 {
                map.insert(key_value, value);
            } else {
                let entry = map
                    .entry(key_value)
                    .or_insert(Value::Mapping(Mapping::new()));
                Self::set_value_internal(entry, &path[1..], value)?;
            }
            Ok(())
        } else {
            Err(anyhow!("Current node is not a map"))
        }
    }

    /// Gets a configuration value at the specified path
    ///
    /// Returns an error if the path doesn't exist.
    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        Self::get_value_internal(&self.data(), path)
    }

    fn get_value_internal(data: &Value, path: &[&str]) -> Result<Value> {
        let mut current = data;
        for (i, key) in path.iter().enumerate() {
            if let Value::Mapping(map) = current {
                match map.get(&Value::String(key.to_lowercase())) {
                    Some(next) => current = next,
                    None => return Err(anyhow!("Path {} does not exist", path[..=i].join("."))),
                }
            } else {
                return Err(anyhow!("Path {} is not a Config", path[..i].join(".")));
            }
        }
        Ok(current.clone())
    }

    fn get_u64_or(&self, path: &[&str], default: u64) -> Result<u64> {
        match self.get_value(path) {
            Ok(Value::Number(n)) => Ok(n.as_u64().unwrap_or(default)),
            Ok(Value::String(s)) => match s.trim().parse::<u64>() {
                Ok(v) => Ok(v),
                Err(_) => {
                    warn!(path = %path.join("."), value = %s, "Invalid integer, using default {}", default);
                    Ok(default)
                }
            },
            _ => Ok(default),
        }
    }

    fn apply_env_overrides(config: &mut Value) {
        for (key, value) in env::vars() {
            if let Some(stripped) = key.strip_prefix(ENV_PREFIX) {
                let key_path = stripped.split("__").collect::<Vec<_>>();
                let yaml_value = Self::convert_env_value(&value);
                let _ = Self::set_value_internal(config, &key_path, yaml_value);
            }
        }
    }

    fn convert_env_value(value: &str) -> Value {
        if let Ok(parsed) = serde_yaml::from_str::<Value>(value) {
            return parsed;
        }
        Value::String(value.to_string())
    }

    fn lower_keys_value(value: Value) -> Value {
        match value {
            Value::Mapping(map) => {
                let mut new_map = Mapping::new();
                for (k, v) in map {
                    let key = match k {
                        Value::String(s) => Value::String(s.to_lowercase()),
                        other => other,
                    };
                    new_map.insert(key, Self::lower_keys_value(v));
                }
                Value::Mapping(new_map)
            }
            Value::Sequence(seq) => {
                Value::Sequence(seq.into_iter().map(Self::lower_keys_value).collect())
            }
            _ => value,
        }
    }

    /// Gets the HTTP port from configuration
    ///
    /// Returns the configured HTTP port, or the default port (8080) if not configured or invalid.
    pub fn get_http_port(&self) -> u16 {
        match self.get_value(&["host", "http_port"]) {
            Ok(Value::Number(n)) => match n.as_u64().and_then(|p| u16::try_from(p).ok()) {
                Some(port) => port,
                None => {
                    warn!("HTTP port {} out of range, using default {}", n, DEFAULT_HTTP_PORT);
                    DEFAULT_HTTP_PORT
                }
            },
            Ok(Value::String(s)) => match s.parse::<u16>() {
                Ok(port) => port,
                Err(_) => {
                    warn!("Invalid HTTP port '{}', using default {}", s, DEFAULT_HTTP_PORT);
                    DEFAULT_HTTP_PORT
                }
            },
            Ok(_) => {
                warn!(
                    "HTTP port not a number or string, using default {}",
                    DEFAULT_HTTP_PORT
                );
                DEFAULT_HTTP_PORT
            }
            Err(err) => {
                warn!(
                    "Failed to get HTTP port: {}, using default {}",
                    err, DEFAULT_HTTP_PORT
                );
                DEFAULT_HTTP_PORT
            }
        }
    }

    /// Sets the HTTP port in configuration
    pub fn set_http_port(&self, port: u16) -> Result<()> {
        self.set_value(&["host", "http_port"], Value::Number(Number::from(port)))
    }

    impl_string_config!(
        get_listen_host,
        set_listen_host,
        &["host", "listen_host"],
        DEFAULT_LISTEN_HOST
    );

    impl_usize_config!(
        get_log_cache_size,
        set_log_cache_size,
        &["host", "logger", "buffer_capacity"],
        DEFAULT_LOG_BUFFER_CAPACITY
    );

    impl_bool_config!(
        get_log_enable_console,
        set_log_enable_console,
        &["host", "logger", "enable_console"],
        DEFAULT_LOG_ENABLE_CONSOLE
    );

    impl_string_config!(
        get_log_min_level,
        set_log_min_level,
        &["host", "logger", "min_level"],
        DEFAULT_LOG_MIN_LEVEL
    );

    /// Optional log file (`host.logger.file`)
    ///
    /// Relative paths are resolved against the configuration directory.
    /// An empty value disables file logging.
    pub fn get_log_file(&self) -> Option<PathBuf> {
        match self.get_value(&["host", "logger", "file"]) {
            Ok(Value::String(path)) if !path.trim().is_empty() => {
                let path = PathBuf::from(path.trim());
                if path.is_absolute() {
                    Some(path)
                } else {
                    Some(Path::new(&self.config_dir).join(path))
                }
            }
            _ => None,
        }
    }

    pub fn set_log_file(&self, path: &Path) -> Result<()> {
        self.set_value(
            &["host", "logger", "file"],
            Value::String(path.to_string_lossy().to_string()),
        )
    }

    /// Root directory of the music library
    ///
    /// Relative paths are resolved against the configuration directory.
    /// Returns `None` when no directory has been configured.
    pub fn get_music_dir(&self) -> Option<PathBuf> {
        match self.get_value(&["radio", "music_dir"]) {
            Ok(Value::String(s)) if !s.trim().is_empty() => {
                let path = PathBuf::from(s.trim());
                if path.is_absolute() {
                    Some(path)
                } else {
                    Some(Path::new(&self.config_dir).join(path))
                }
            }
            _ => None,
        }
    }

    pub fn set_music_dir(&self, directory: &Path) -> Result<()> {
        self.set_value(
            &["radio", "music_dir"],
            Value::String(directory.to_string_lossy().to_string()),
        )
    }

    /// Interlude file name, relative to the music directory
    ///
    /// An empty string (or `~`) disables the interlude; only a missing key
    /// falls back to the default.
    pub fn get_interlude(&self) -> Result<String> {
        match self.get_value(&["radio", "interlude"]) {
            Ok(Value::String(s)) => Ok(s),
            Ok(Value::Null) => Ok(String::new()),
            _ => Ok(DEFAULT_INTERLUDE.to_string()),
        }
    }

    pub fn set_interlude(&self, value: String) -> Result<()> {
        self.set_value(&["radio", "interlude"], Value::String(value))
    }

    impl_f64_config!(
        get_album_chance,
        set_album_chance,
        &["radio", "album_chance"],
        DEFAULT_ALBUM_CHANCE
    );

    impl_u64_config!(
        get_reshuffle_hours,
        set_reshuffle_hours,
        &["radio", "reshuffle_hours"],
        DEFAULT_RESHUFFLE_HOURS
    );

    impl_usize_config!(
        get_max_reload_attempts,
        set_max_reload_attempts,
        &["radio", "max_reload_attempts"],
        DEFAULT_MAX_RELOAD_ATTEMPTS
    );

    impl_u64_config!(
        get_empty_backoff_secs,
        set_empty_backoff_secs,
        &["radio", "empty_backoff_secs"],
        DEFAULT_EMPTY_BACKOFF_SECS
    );

    impl_bool_config!(
        get_strip_metadata,
        set_strip_metadata,
        &["radio", "strip_metadata"],
        DEFAULT_STRIP_METADATA
    );

    /// File extensions considered playable, lowercased and without the leading dot
    pub fn get_extensions(&self) -> Result<Vec<String>> {
        let extensions = match self.get_value(&["radio", "extensions"]) {
            Ok(Value::Sequence(seq)) => seq
                .iter()
                .filter_map(|v| v.as_str())
                .map(|s| s.trim_start_matches('.').to_lowercase())
                .filter(|s| !s.is_empty())
                .collect::<Vec<_>>(),
            Ok(Value::String(s)) => s
                .split(',')
                .map(|s| s.trim().trim_start_matches('.').to_lowercase())
                .filter(|s| !s.is_empty())
                .collect(),
            _ => Vec::new(),
        };

        if extensions.is_empty() {
            return Ok(DEFAULT_EXTENSIONS.iter().map(|s| s.to_string()).collect());
        }
        Ok(extensions)
    }

    impl_string_config!(
        get_ffmpeg_path,
        set_ffmpeg_path,
        &["encoder", "ffmpeg"],
        DEFAULT_FFMPEG
    );

    impl_string_config!(
        get_encoder_codec,
        set_encoder_codec,
        &["encoder", "codec"],
        DEFAULT_CODEC
    );

    impl_string_config!(
        get_encoder_format,
        set_encoder_format,
        &["encoder", "format"],
        DEFAULT_FORMAT
    );

    impl_u64_config!(
        get_encoder_bitrate,
        set_encoder_bitrate,
        &["encoder", "bitrate"],
        DEFAULT_BITRATE
    );

    impl_u64_config!(
        get_fade_in_seconds,
        set_fade_in_seconds,
        &["encoder", "fade_in_seconds"],
        DEFAULT_FADE_IN_SECONDS
    );

    impl_usize_config!(
        get_chunk_size,
        set_chunk_size,
        &["pipeline", "chunk_size"],
        DEFAULT_CHUNK_SIZE
    );

    impl_u64_config!(
        get_read_timeout_secs,
        set_read_timeout_secs,
        &["pipeline", "read_timeout_secs"],
        DEFAULT_READ_TIMEOUT_SECS
    );

    impl_usize_config!(
        get_max_stalls,
        set_max_stalls,
        &["pipeline", "max_stalls"],
        DEFAULT_MAX_STALLS
    );

    impl_u64_config!(
        get_terminate_timeout_secs,
        set_terminate_timeout_secs,
        &["pipeline", "terminate_timeout_secs"],
        DEFAULT_TERMINATE_TIMEOUT_SECS
    );

    impl_usize_config!(
        get_listener_buffer,
        set_listener_buffer,
        &["broadcast", "listener_buffer"],
        DEFAULT_LISTENER_BUFFER
    );
}

/// Loads the global configuration instance
///
/// The first call loads the configuration from `directory` (or from the
/// default search locations when empty); later calls return the already
/// loaded instance and ignore `directory`.
pub fn init_config(directory: &str) -> Result<Arc<Config>> {
    CONFIG
        .get_or_try_init(|| Config::load_config(directory).map(Arc::new))
        .cloned()
}

/// Returns the global configuration instance, if [`init_config`] has run
pub fn get_config() -> Option<Arc<Config>> {
    CONFIG.get().cloned()
}

/// Merges external YAML configuration into default configuration
///
/// - For mappings (objects), it merges keys from external into default
/// - For scalars and sequences, external values replace default values
fn merge_yaml(default: &mut Value, external: &Value) {
    match (default, external) {
        (Value::Mapping(dmap), Value::Mapping(emap)) => {
            for (k, v) in emap {
                match dmap.get_mut(k) {
                    Some(dv) => merge_yaml(dv, v),
                    None => {
                        dmap.insert(k.clone(), v.clone());
                    }
                }
            }
        }
        (d, e) => *d = e.clone(), // pour les scalaires ou séquences, on remplace
    }
}
