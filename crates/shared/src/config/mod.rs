// Configuration module
// Reads INI-style run settings with environment variable overrides
//
// Keys in the default (unnamed) section are addressed by their bare name,
// keys in a named section as "Section.Key". An environment variable built
// from the prefix plus the key with '.' replaced by '_' always wins.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use anyhow::anyhow;
use configparser::ini::Ini;
use parking_lot::Mutex;

/// Global configuration singleton
static CONFIG: once_cell::sync::Lazy<Mutex<Config>> =
    once_cell::sync::Lazy::new(|| Mutex::new(Config::new()));

/// Get a reference to the global config instance
pub fn get_config() -> &'static Mutex<Config> {
    &CONFIG
}

/// Section name configparser uses for keys outside any `[Section]`
const DEFAULT_SECTION: &str = "default";

/// INI run-settings with environment override
pub struct Config {
    values: HashMap<String, String>,
    filename: Option<PathBuf>,
    env_prefix: String,
}

impl Config {
    pub fn new() -> Self {
        Config {
            values: HashMap::new(),
            filename: None,
            env_prefix: String::new(),
        }
    }

    /// Load configuration from a file.
    /// `env_prefix` is used to check environment variables (e.g. "Navgen_").
    pub fn set_source(&mut self, filename: &Path, env_prefix: &str) -> anyhow::Result<()> {
        self.filename = Some(filename.to_path_buf());
        self.env_prefix = env_prefix.to_string();
        self.reload()
    }

    /// Use only environment overrides, without a backing file
    pub fn set_env_only(&mut self, env_prefix: &str) {
        self.filename = None;
        self.env_prefix = env_prefix.to_string();
        self.values.clear();
    }

    /// Reload the configuration file
    pub fn reload(&mut self) -> anyhow::Result<()> {
        self.values.clear();

        let Some(path) = self.filename.as_ref() else {
            return Ok(());
        };

        let mut ini = Ini::new_cs();
        let sections = ini
            .load(path)
            .map_err(|e| anyhow!("Could not read {}: {}", path.display(), e))?;

        for (section, entries) in sections {
            for (key, value) in entries {
                let Some(value) = value else {
                    continue;
                };
                let value = value.trim_matches('"').to_string();
                let full_key = if section == DEFAULT_SECTION {
                    key
                } else {
                    format!("{}.{}", section, key)
                };
                self.values.insert(full_key, value);
            }
        }

        Ok(())
    }

    /// Check if a key is set
    pub fn is_set(&self, key: &str) -> bool {
        self.get_env_or_config(key).is_some()
    }

    /// Get a string value with a default
    pub fn get_string_default(&self, key: &str, default: &str) -> String {
        self.get_env_or_config(key)
            .unwrap_or_else(|| default.to_string())
    }

    /// Get a string value if present and non-empty
    pub fn get_string(&self, key: &str) -> Option<String> {
        self.get_env_or_config(key).filter(|v| !v.is_empty())
    }

    /// Get a boolean value with a default
    pub fn get_bool_default(&self, key: &str, default: bool) -> bool {
        match self.get_env_or_config(key) {
            Some(val) => {
                let lower = val.to_lowercase();
                matches!(lower.as_str(), "1" | "true" | "yes")
            }
            None => default,
        }
    }

    /// Get an integer value with a default
    pub fn get_int_default(&self, key: &str, default: i32) -> i32 {
        match self.get_env_or_config(key) {
            Some(val) => val.trim().parse().unwrap_or(default),
            None => default,
        }
    }

    /// Try environment variable first, then config file
    fn get_env_or_config(&self, key: &str) -> Option<String> {
        if !self.env_prefix.is_empty() {
            let env_key = format!("{}{}", self.env_prefix, key.replace('.', "_"));
            if let Ok(val) = std::env::var(&env_key) {
                return Some(val);
            }
        }

        self.values.get(key).cloned()
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}
