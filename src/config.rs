//! Persisted client settings.
//!
//! Settings live in a flat JSON object at `<config dir>/settings.json`:
//! - Config dir: `$VIEWSER_CONFIG_DIR`, else `~/.views`
//! - Precedence: `VIEWSER_<KEY>` env var > settings file > built-in defaults

use crate::error::{Error, Result};
use serde_json::{Map, Value, json};
use std::fs;
use std::path::{Path, PathBuf};

pub const CONFIG_DIR_ENV: &str = "VIEWSER_CONFIG_DIR";
pub const ENV_PREFIX: &str = "VIEWSER_";
const SETTINGS_FILE: &str = "settings.json";

pub const REMOTE_URL: &str = "REMOTE_URL";
pub const QUERYSET_REMOTE_PATH: &str = "QUERYSET_REMOTE_PATH";
pub const QUERYSET_MAX_RETRIES: &str = "QUERYSET_MAX_RETRIES";
pub const RETRY_FREQUENCY: &str = "RETRY_FREQUENCY";
pub const LOG_LEVEL: &str = "LOG_LEVEL";

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    path: PathBuf,
    values: Map<String, Value>,
}

impl Config {
    /// Directory holding `settings.json`.
    #[must_use]
    pub fn global_dir() -> PathBuf {
        std::env::var_os(CONFIG_DIR_ENV)
            .filter(|dir| !dir.is_empty())
            .map(PathBuf::from)
            .or_else(|| dirs::home_dir().map(|home| home.join(".views")))
            .unwrap_or_else(|| PathBuf::from(".views"))
    }

    #[must_use]
    pub fn settings_path() -> PathBuf {
        Self::global_dir().join(SETTINGS_FILE)
    }

    /// Built-in defaults.
    #[must_use]
    pub fn defaults() -> Map<String, Value> {
        let mut values = Map::new();
        values.insert(REMOTE_URL.to_string(), json!("http://0.0.0.0:4000"));
        values.insert(QUERYSET_REMOTE_PATH.to_string(), json!("querysets"));
        values.insert(QUERYSET_MAX_RETRIES.to_string(), json!(500));
        values.insert(RETRY_FREQUENCY.to_string(), json!(5));
        values.insert(LOG_LEVEL.to_string(), json!("INFO"));
        values
    }

    /// Load settings from the default location.
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::settings_path())
    }

    /// Load settings from `path`, filling in any missing defaults.
    ///
    /// A missing file is not an error: the result holds only the defaults.
    pub fn load_from(path: &Path) -> Result<Self> {
        let mut values = Self::defaults();

        if path.exists() {
            let content = fs::read_to_string(path)?;
            let parsed: Value = serde_json::from_str(&content).map_err(|e| {
                Error::config(format!(
                    "Invalid JSON in settings file {}: {e}",
                    path.display()
                ))
            })?;
            let Value::Object(stored) = parsed else {
                return Err(Error::config(format!(
                    "Settings file {} must contain a JSON object",
                    path.display()
                )));
            };
            for (key, value) in stored {
                values.insert(key, value);
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            values,
        })
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Stored values (file + defaults), without env overrides.
    #[must_use]
    pub const fn list(&self) -> &Map<String, Value> {
        &self.values
    }

    /// Resolve a setting, honouring `VIEWSER_<KEY>` overrides.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        let env_key = format!("{ENV_PREFIX}{}", key.to_ascii_uppercase());
        if let Ok(raw) = std::env::var(&env_key) {
            return Some(parse_setting_value(&raw));
        }
        self.values.get(key).cloned()
    }

    pub fn require(&self, key: &str) -> Result<Value> {
        self.get(key)
            .ok_or_else(|| Error::config(format!("Configuration setting {key} is not set")))
    }

    /// Set `key`. Returns `false` (and leaves the value alone) when the key is
    /// already set and `overwrite` is false.
    pub fn set(&mut self, key: &str, value: Value, overwrite: bool) -> Result<bool> {
        validate_key(key)?;
        if !overwrite && self.values.contains_key(key) {
            return Ok(false);
        }
        self.values.insert(key.to_string(), value);
        Ok(true)
    }

    pub fn unset(&mut self, key: &str) -> Result<Value> {
        self.values
            .shift_remove(key)
            .ok_or_else(|| Error::config(format!("Configuration setting {key} is not set")))
    }

    /// Overwrite every default key with its default value.
    pub fn reset(&mut self) {
        for (key, value) in Self::defaults() {
            self.values.insert(key, value);
        }
    }

    /// Merge a JSON object over the current values.
    pub fn merge_json(&mut self, value: Value) -> Result<()> {
        let Value::Object(incoming) = value else {
            return Err(Error::config("Configuration to load must be a JSON object"));
        };
        for (key, value) in incoming {
            validate_key(&key)?;
            self.values.insert(key, value);
        }
        Ok(())
    }

    pub fn dump(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.values)?)
    }

    /// Atomically write the settings file.
    pub fn save(&self) -> Result<()> {
        let data = serde_json::to_string_pretty(&self.values)?;
        let parent = self.path.parent().unwrap_or_else(|| Path::new("."));
        fs::create_dir_all(parent)?;

        let tmp = tempfile::NamedTempFile::new_in(parent)?;
        fs::write(tmp.path(), data)?;
        let tmp_path = tmp.into_temp_path();
        tmp_path.persist(&self.path).map_err(|e| Error::Io(e.error))?;
        Ok(())
    }

    pub fn remote_url(&self) -> Result<String> {
        let value = self.require(REMOTE_URL)?;
        value_as_string(REMOTE_URL, &value)
    }

    /// Base URL of the queryset service (`REMOTE_URL/QUERYSET_REMOTE_PATH`).
    pub fn queryset_url(&self) -> Result<String> {
        let remote = self.remote_url()?;
        let path = self
            .get(QUERYSET_REMOTE_PATH)
            .map(|v| value_as_string(QUERYSET_REMOTE_PATH, &v))
            .transpose()?
            .unwrap_or_else(|| "querysets".to_string());
        Ok(format!(
            "{}/{}",
            remote.trim_end_matches('/'),
            path.trim_matches('/')
        ))
    }

    pub fn max_retries(&self) -> Result<u32> {
        let value = self.require(QUERYSET_MAX_RETRIES)?;
        value_as_u64(QUERYSET_MAX_RETRIES, &value)
            .map(|n| u32::try_from(n).unwrap_or(u32::MAX))
    }

    pub fn retry_frequency(&self) -> Result<std::time::Duration> {
        let value = self.require(RETRY_FREQUENCY)?;
        value_as_u64(RETRY_FREQUENCY, &value).map(std::time::Duration::from_secs)
    }

    #[must_use]
    pub fn log_level(&self) -> Option<String> {
        self.get(LOG_LEVEL)
            .and_then(|v| value_as_string(LOG_LEVEL, &v).ok())
    }
}

/// Interpret a raw CLI/env string as an integer, float, bool or string.
#[must_use]
pub fn parse_setting_value(raw: &str) -> Value {
    let trimmed = raw.trim();
    if let Ok(int) = trimmed.parse::<i64>() {
        return json!(int);
    }
    if let Ok(float) = trimmed.parse::<f64>() {
        if float.is_finite() {
            return json!(float);
        }
    }
    match trimmed.to_ascii_lowercase().as_str() {
        "true" => json!(true),
        "false" => json!(false),
        _ => Value::String(raw.to_string()),
    }
}

fn validate_key(key: &str) -> Result<()> {
    if key.trim().is_empty() {
        return Err(Error::config("Setting name must not be empty"));
    }
    if key.chars().any(char::is_whitespace) {
        return Err(Error::config(format!(
            "Setting name '{key}' must not contain whitespace"
        )));
    }
    Ok(())
}

fn value_as_string(key: &str, value: &Value) -> Result<String> {
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        _ => Err(Error::config(format!("Setting {key} must be a scalar"))),
    }
}

fn value_as_u64(key: &str, value: &Value) -> Result<u64> {
    match value {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| Error::config(format!("Setting {key} must be a non-negative integer"))),
        Value::String(s) => s
            .trim()
            .parse()
            .map_err(|_| Error::config(format!("Setting {key} must be a non-negative integer"))),
        _ => Err(Error::config(format!(
            "Setting {key} must be a non-negative integer"
        ))),
    }
}
