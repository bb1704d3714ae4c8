// Configuration parsing for swap-file
// SPDX-License-Identifier: GPL-3.0-or-later

use std::collections::HashMap;
use std::fs;
use std::path::Path;

use glob::glob;
use thiserror::Error;

use crate::{debug, info, warn};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Parse error for {0}: {1}")]
    ParseError(String, String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;

/// Configuration paths
pub const ETC_CONFIG: &str = "/etc/swap-file.conf";
pub const VEN_DIR: &str = "/usr/lib";
pub const RUN_DIR: &str = "/run";
pub const ETC_DIR: &str = "/etc";

/// Configuration holder
#[derive(Debug, Clone, Default)]
pub struct Config {
    values: HashMap<String, String>,
}

impl Config {
    /// Load configuration from all sources
    pub fn load() -> Result<Self> {
        Self::load_from(ETC_CONFIG, &[VEN_DIR, RUN_DIR, ETC_DIR])
    }

    /// Load `main` then `<base>/swap-file.conf.d/*.conf` fragments
    /// (later base dirs win for the same basename, fragments applied by basename order)
    pub fn load_from<P: AsRef<Path>>(main: P, fragment_bases: &[&str]) -> Result<Self> {
        let main = main.as_ref();
        let mut values = HashMap::new();

        if main.exists() {
            match Self::parse_config(main) {
                Ok(cfg) => values.extend(cfg),
                Err(e) => warn!("Could not load {}: {}", main.display(), e),
            }
        }

        let mut config_files: HashMap<String, String> = HashMap::new();
        for base_path in fragment_bases {
            let pattern = format!("{}/swap-file.conf.d/*.conf", base_path);
            if let Ok(entries) = glob(&pattern) {
                for entry in entries.flatten() {
                    if entry.is_file() {
                        if let (Some(basename), Some(path_str)) = (entry.file_name(), entry.to_str()) {
                            debug!("Found {}", path_str);
                            config_files
                                .insert(basename.to_string_lossy().to_string(), path_str.to_string());
                        }
                    }
                }
            }
        }

        let mut sorted_files: Vec<_> = config_files.into_iter().collect();
        sorted_files.sort_by(|a, b| a.0.cmp(&b.0));

        for (_, path) in sorted_files {
            info!("Load: {}", path);
            match Self::parse_config(&path) {
                Ok(cfg) => values.extend(cfg),
                Err(e) => warn!("Could not load {}: {}", path, e),
            }
        }

        Ok(Self { values })
    }

    /// Parse a single config file
    fn parse_config<P: AsRef<Path>>(path: P) -> Result<HashMap<String, String>> {
        let content = fs::read_to_string(path)?;
        Ok(Self::parse_str(&content))
    }

    fn parse_str(content: &str) -> HashMap<String, String> {
        let mut config = HashMap::new();

        for line in content.lines() {
            let line = line.trim();

            // Skip comments and empty lines
            if line.starts_with('#') || !line.contains('=') {
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let value = value.trim();
                let value = value
                    .strip_prefix('"')
                    .and_then(|v| v.strip_suffix('"'))
                    .or_else(|| value.strip_prefix('\'').and_then(|v| v.strip_suffix('\'')))
                    .unwrap_or(value);
                config.insert(key.trim().to_string(), value.to_string());
            }
        }

        config
    }

    /// Get optional value
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values.get(key).map(|s| s.as_str())
    }

    /// Get value as specific type
    pub fn get_as<T: std::str::FromStr>(&self, key: &str) -> Result<Option<T>>
    where
        T::Err: std::fmt::Display,
    {
        match self.get(key) {
            None => Ok(None),
            Some(value) => value
                .parse()
                .map(Some)
                .map_err(|e: T::Err| ConfigError::ParseError(key.to_string(), e.to_string())),
        }
    }
}
