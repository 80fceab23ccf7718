//! # SpeechFlow configuration module
//!
//! Graph-wide configuration shared by every node in a running graph:
//! - Loading configuration from YAML files
//! - Merging with embedded default configuration
//! - Environment variable overrides
//! - Type-safe getters and setters for configuration values
//! - Thread-safe singleton access pattern
//!
//! ## Usage
//!
//! ```no_run
//! use speechflow_config::get_config;
//!
//! let config = get_config();
//! let rate = config.get_audio_sample_rate();
//! let cache_dir = config.get_cache_dir()?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{anyhow, Result};
use dirs::home_dir;
use lazy_static::lazy_static;
use serde_yaml::{Mapping, Number, Value};
use std::{
    env, fs,
    path::Path,
    sync::{Arc, Mutex},
};
use tracing::info;

const DEFAULT_CONFIG: &str = include_str!("speechflow.yaml");

lazy_static! {
    static ref CONFIG: Arc<GraphConfig> =
        Arc::new(GraphConfig::load_config("").expect("failed to load speechflow configuration"));
}

const ENV_CONFIG_DIR: &str = "SPEECHFLOW_CONFIG";
const ENV_PREFIX: &str = "SPEECHFLOW_CONFIG__";

const DEFAULT_SAMPLE_RATE: usize = 48_000;
const DEFAULT_CHANNELS: usize = 2;
const DEFAULT_BIT_DEPTH: usize = 16;
const DEFAULT_LITTLE_ENDIAN: bool = true;
const DEFAULT_TEXT_ENCODING: &str = "utf-8";
const DEFAULT_CACHE_DIR: &str = "cache";
const DEFAULT_LOG_MIN_LEVEL: &str = "info";
const DEFAULT_LOG_ENABLE_CONSOLE: bool = true;

macro_rules! impl_usize_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> usize {
            match self.get_value($path) {
                Ok(Value::Number(n)) if n.is_i64() => n.as_i64().unwrap() as usize,
                Ok(Value::Number(n)) if n.is_u64() => n.as_u64().unwrap() as usize,
                _ => $default,
            }
        }

        pub fn $setter(&self, value: usize) -> Result<()> {
            self.set_value($path, Value::Number(Number::from(value)))
        }
    };
}

macro_rules! impl_bool_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> bool {
            match self.get_value($path) {
                Ok(Value::Bool(b)) => b,
                _ => $default,
            }
        }

        pub fn $setter(&self, value: bool) -> Result<()> {
            self.set_value($path, Value::Bool(value))
        }
    };
}

macro_rules! impl_string_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> String {
            match self.get_value($path) {
                Ok(Value::String(s)) => s,
                _ => $default.to_string(),
            }
        }

        pub fn $setter(&self, value: String) -> Result<()> {
            self.set_value($path, Value::String(value))
        }
    };
}

/// Graph-wide configuration: sample rate, channel count, bit depth,
/// endianness, text encoding and the artifact cache directory (spec.md §6).
#[derive(Debug)]
pub struct GraphConfig {
    config_dir: String,
    path: String,
    data: Mutex<Value>,
}

impl Clone for GraphConfig {
    fn clone(&self) -> Self {
        let data = self.data.lock().unwrap().clone();
        Self {
            config_dir: self.config_dir.clone(),
            path: self.path.clone(),
            data: Mutex::new(data),
        }
    }
}

impl GraphConfig {
    fn find_config_dir(directory: &str) -> String {
        if !directory.is_empty() {
            return directory.to_string();
        }

        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var = ENV_CONFIG_DIR, path = %env_path, "using config dir from env");
            return env_path;
        }

        if Path::new(".speechflow").exists() {
            return ".speechflow".to_string();
        }

        if let Some(home) = home_dir() {
            let home_config = home.join(".speechflow");
            if home_config.exists() {
                return home_config.to_string_lossy().to_string();
            }
        }

        ".speechflow".to_string()
    }

    fn validate_config_dir(path: &Path) -> Result<()> {
        if !path.exists() {
            fs::create_dir_all(path)?;
        }

        if !path.is_dir() {
            return Err(anyhow!("config path is not a directory"));
        }

        let test_file = path.join(".write_test");
        fs::write(&test_file, b"test")?;
        fs::remove_file(&test_file)?;
        fs::read_dir(path)?;

        Ok(())
    }

    pub fn config_dir(directory: &str) -> String {
        let dir_path = Self::find_config_dir(directory);
        let path = Path::new(&dir_path);
        Self::validate_config_dir(path).expect("could not validate config directory");
        dir_path
    }

    /// Loads configuration from `directory` (embedded defaults, merged
    /// external `config.yaml`, then `SPEECHFLOW_CONFIG__*` env overrides).
    pub fn load_config(directory: &str) -> Result<Self> {
        let config_dir = Self::config_dir(directory);
        info!(config_dir = %config_dir, "using config directory");

        let config_file_path = Path::new(&config_dir).join("config.yaml");
        let path = config_file_path.to_string_lossy().to_string();

        let mut default_value: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        let yaml_data = if let Ok(data) = fs::read(&path) {
            info!(config_file = %path, "loaded config file");
            data
        } else {
            info!(config_file = %path, "config file not found, using embedded defaults");
            DEFAULT_CONFIG.as_bytes().to_vec()
        };

        let external_value: Value = serde_yaml::from_slice(&yaml_data)?;
        merge_yaml(&mut default_value, &external_value);
        let mut config_value = Self::lower_keys_value(default_value);

        Self::apply_env_overrides(&mut config_value);

        let config = GraphConfig {
            config_dir,
            path,
            data: Mutex::new(config_value),
        };

        config.save()?;
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let data = self.data.lock().unwrap();
        let yaml = serde_yaml::to_string(&*data)?;
        fs::write(&self.path, yaml)?;
        Ok(())
    }

    pub fn set_value(&self, path: &[&str], value: Value) -> Result<()> {
        let mut data = self.data.lock().unwrap();
        Self::set_value_internal(&mut data, path, value)?;
        drop(data);
        self.save()
    }

    fn set_value_internal(data: &mut Value, path: &[&str], value: Value) -> Result<()> {
        if path.is_empty() {
            *data = value;
            return Ok(());
        }
        if let Value::Mapping(map) = data {
            let key = path[0].to_lowercase();
            let key_value = Value::String(key);
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
            Err(anyhow!("current node is not a map"))
        }
    }

    pub fn get_value(&self, path: &[&str]) -> Result<Value> {
        let data = self.data.lock().unwrap();
        Self::get_value_internal(&data, path)
    }

    fn get_value_internal(data: &Value, path: &[&str]) -> Result<Value> {
        let mut current = data;
        for (i, key) in path.iter().enumerate() {
            if let Value::Mapping(map) = current {
                let key = key.to_lowercase();
                if let Some(next) = map.get(&Value::String(key)) {
                    current = next;
                } else {
                    return Err(anyhow!("path {} does not exist", path[..=i].join(".")));
                }
            } else {
                return Err(anyhow!("path {} is not a map", path[..i].join(".")));
            }
        }
        Ok(current.clone())
    }

    fn apply_env_overrides(config: &mut Value) {
        for (key, value) in env::vars() {
            if key.starts_with(ENV_PREFIX) {
                let key_path = key
                    .trim_start_matches(ENV_PREFIX)
                    .split("__")
                    .collect::<Vec<_>>();
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
                    if let Value::String(s) = k {
                        new_map.insert(Value::String(s.to_lowercase()), Self::lower_keys_value(v));
                    } else {
                        new_map.insert(k, Self::lower_keys_value(v));
                    }
                }
                Value::Mapping(new_map)
            }
            Value::Sequence(seq) => {
                Value::Sequence(seq.into_iter().map(Self::lower_keys_value).collect())
            }
            _ => value,
        }
    }

    fn resolve_and_create_dir(&self, dir_path: &str) -> Result<String> {
        let path = Path::new(dir_path);
        let absolute_path = if path.is_absolute() {
            path.to_path_buf()
        } else {
            Path::new(&self.config_dir).join(path)
        };

        if !absolute_path.exists() {
            fs::create_dir_all(&absolute_path)?;
            info!(directory = %absolute_path.display(), "created managed directory");
        }

        Ok(absolute_path.to_string_lossy().to_string())
    }

    /// Resolves the artifact cache directory (relative paths resolve against
    /// the config directory), creating it if missing.
    pub fn get_cache_dir(&self) -> Result<String> {
        let dir_path = match self.get_value(&["cache", "directory"]) {
            Ok(Value::String(s)) => s,
            _ => {
                self.set_value(&["cache", "directory"], Value::String(DEFAULT_CACHE_DIR.to_string()))?;
                DEFAULT_CACHE_DIR.to_string()
            }
        };
        self.resolve_and_create_dir(&dir_path)
    }

    impl_usize_config!(
        get_audio_sample_rate,
        set_audio_sample_rate,
        &["audio", "sample_rate"],
        DEFAULT_SAMPLE_RATE
    );

    impl_usize_config!(
        get_audio_channels,
        set_audio_channels,
        &["audio", "channels"],
        DEFAULT_CHANNELS
    );

    impl_usize_config!(
        get_audio_bit_depth,
        set_audio_bit_depth,
        &["audio", "bit_depth"],
        DEFAULT_BIT_DEPTH
    );

    impl_bool_config!(
        get_audio_little_endian,
        set_audio_little_endian,
        &["audio", "little_endian"],
        DEFAULT_LITTLE_ENDIAN
    );

    impl_string_config!(
        get_text_encoding,
        set_text_encoding,
        &["text", "encoding"],
        DEFAULT_TEXT_ENCODING
    );

    impl_string_config!(
        get_log_min_level,
        set_log_min_level,
        &["logger", "min_level"],
        DEFAULT_LOG_MIN_LEVEL
    );

    impl_bool_config!(
        get_log_enable_console,
        set_log_enable_console,
        &["logger", "enable_console"],
        DEFAULT_LOG_ENABLE_CONSOLE
    );
}

/// Returns the global graph configuration instance, lazily loaded on first access.
pub fn get_config() -> Arc<GraphConfig> {
    CONFIG.clone()
}

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
        (d, e) => *d = e.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_without_override_file() {
        let dir = tempfile::tempdir().unwrap();
        let config =
            GraphConfig::load_config(dir.path().to_str().unwrap()).expect("load_config");

        assert_eq!(config.get_audio_sample_rate(), DEFAULT_SAMPLE_RATE);
        assert_eq!(config.get_audio_channels(), DEFAULT_CHANNELS);
        assert_eq!(config.get_audio_bit_depth(), DEFAULT_BIT_DEPTH);
        assert!(config.get_audio_little_endian());
        assert_eq!(config.get_text_encoding(), DEFAULT_TEXT_ENCODING);
    }

    #[test]
    fn set_then_get_round_trips_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let config =
            GraphConfig::load_config(dir.path().to_str().unwrap()).expect("load_config");

        config.set_audio_sample_rate(16_000).unwrap();
        assert_eq!(config.get_audio_sample_rate(), 16_000);

        let reloaded =
            GraphConfig::load_config(dir.path().to_str().unwrap()).expect("reload");
        assert_eq!(reloaded.get_audio_sample_rate(), 16_000);
    }

    #[test]
    fn cache_dir_is_created_and_resolved() {
        let dir = tempfile::tempdir().unwrap();
        let config =
            GraphConfig::load_config(dir.path().to_str().unwrap()).expect("load_config");

        let cache_dir = config.get_cache_dir().expect("get_cache_dir");
        assert!(Path::new(&cache_dir).is_dir());
    }
}
