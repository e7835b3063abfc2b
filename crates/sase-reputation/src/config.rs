//! Reputation Configuration

use crate::error::ConfigError;
use crate::store::WatchedList;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Service configuration shared by the redirector and the updater
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReputationConfig {
    /// Verbose diagnostics on stderr
    pub debug: bool,
    /// Answer an empty line instead of echoing the input on no match
    pub emit_empty: bool,
    /// Lookups between two snapshot freshness checks
    pub reload_every: u32,
    /// List server settings
    pub update: UpdateConfig,
    /// Block lists in match priority order
    pub lists: Vec<ListConfig>,
}

impl Default for ReputationConfig {
    fn default() -> Self {
        Self {
            debug: false,
            emit_empty: false,
            reload_every: 10,
            update: UpdateConfig::default(),
            lists: vec![
                ListConfig {
                    name: "goog-black-hash".into(),
                    snapshot: "/var/lib/opensase/reputation/goog-black-hash.snapshot".into(),
                    redirect_url: None,
                },
                ListConfig {
                    name: "goog-malware-hash".into(),
                    snapshot: "/var/lib/opensase/reputation/goog-malware-hash.snapshot".into(),
                    redirect_url: None,
                },
            ],
        }
    }
}

impl ReputationConfig {
    /// Default config file location
    pub const DEFAULT_PATH: &'static str = "/etc/opensase/reputation.toml";

    /// Load and validate from a TOML file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = toml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.lists.is_empty() {
            return Err(ConfigError::Invalid("no lists configured".into()));
        }

        let mut seen = HashSet::new();
        for list in &self.lists {
            if list.name.trim().is_empty() {
                return Err(ConfigError::Invalid("list with empty name".into()));
            }
            if !seen.insert(list.name.as_str()) {
                return Err(ConfigError::Invalid(format!("duplicate list {}", list.name)));
            }
        }

        if self.reload_every == 0 {
            return Err(ConfigError::Invalid("reload_every must be at least 1".into()));
        }
        if self.update.timeout_secs == 0 {
            return Err(ConfigError::Invalid("update.timeout_secs must be at least 1".into()));
        }
        Ok(())
    }

    /// Snapshot-bound lists in priority order
    pub fn watched_lists(&self) -> Vec<WatchedList> {
        self.lists
            .iter()
            .map(|l| WatchedList::new(l.name.clone(), l.snapshot.clone()))
            .collect()
    }

    /// Redirect target configured for a list
    pub fn redirect_for(&self, list: &str) -> Option<&str> {
        self.lists
            .iter()
            .find(|l| l.name == list)
            .and_then(|l| l.redirect_url.as_deref())
    }
}

/// List server settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdateConfig {
    pub host: String,
    pub port: u16,
    /// Client identifier sent with every request
    pub client: String,
    pub api_key: String,
    /// Bound on connect and on the whole response exchange
    pub timeout_secs: u64,
}

impl Default for UpdateConfig {
    fn default() -> Self {
        Self {
            host: "sb.google.com".into(),
            port: 80,
            client: "api".into(),
            api_key: String::new(),
            timeout_secs: 30,
        }
    }
}

impl UpdateConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// One block list
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ListConfig {
    /// Name as advertised by the list server
    pub name: String,
    /// Snapshot file
    pub snapshot: PathBuf,
    /// Page the proxy sends matching requests to
    #[serde(default)]
    pub redirect_url: Option<String>,
}
