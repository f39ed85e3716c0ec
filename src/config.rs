//! Configuration loader and validator for the catalog mirror.
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::model::EntityKind;
use crate::sync::SyncSettings;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
}

/// Root configuration struct mirroring the YAML schema exactly.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub app: App,
    pub catalog: Catalog,
}

/// App-level settings.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct App {
    pub data_dir: String,
    /// Constant pause after each synced item.
    #[serde(default = "default_item_delay_ms")]
    pub item_delay_ms: u64,
}

fn default_item_delay_ms() -> u64 {
    250
}

/// Remote catalog API settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Catalog {
    /// Without a base URL every sync routine is a no-op.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Per-request timeout. Unset means requests may block indefinitely.
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub auth: Option<Auth>,
    /// Endpoint overrides; kinds not listed use `<plural>` and `<plural>/{id}`.
    #[serde(default)]
    pub kinds: BTreeMap<EntityKind, KindEndpoints>,
}

/// Header attached to every outbound request: `<header>: <scheme> <token>`.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Auth {
    #[serde(default = "default_auth_header")]
    pub header: String,
    #[serde(default)]
    pub scheme: Option<String>,
    pub token: String,
}

fn default_auth_header() -> String {
    "Authorization".to_string()
}

impl Auth {
    pub fn header_value(&self) -> String {
        match self.scheme.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(scheme) => format!("{} {}", scheme, self.token),
            None => self.token.clone(),
        }
    }
}

impl std::fmt::Debug for Auth {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Auth")
            .field("header", &self.header)
            .field("scheme", &self.scheme)
            .finish_non_exhaustive()
    }
}

/// List and detail paths of one kind, relative to `catalog.base_url`.
/// `{id}` in `detail_path` is replaced by the external id.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KindEndpoints {
    pub list_path: String,
    #[serde(default)]
    pub detail_path: Option<String>,
}

impl KindEndpoints {
    pub fn defaults(kind: EntityKind) -> Self {
        Self {
            list_path: kind.plural().to_string(),
            detail_path: Some(format!("{}/{{id}}", kind.plural())),
        }
    }
}

impl Config {
    /// Ensure required directories exist (creates `app.data_dir` if missing).
    pub fn ensure_dirs(&self) -> Result<(), std::io::Error> {
        if self.app.data_dir.trim().is_empty() {
            return Ok(());
        }
        fs::create_dir_all(&self.app.data_dir)
    }

    /// Parsed base URL, normalised to end with `/` so paths join beneath it.
    pub fn base_url(&self) -> Option<Url> {
        let raw = self.catalog.base_url.as_deref()?.trim();
        if raw.is_empty() {
            return None;
        }
        let mut url = Url::parse(raw).ok()?;
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }
        Some(url)
    }

    pub fn endpoints(&self, kind: EntityKind) -> KindEndpoints {
        self.catalog
            .kinds
            .get(&kind)
            .cloned()
            .unwrap_or_else(|| KindEndpoints::defaults(kind))
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.catalog.timeout_seconds.map(Duration::from_secs)
    }

    /// Settings consumed by the sync engine.
    pub fn sync_settings(&self) -> SyncSettings {
        SyncSettings {
            base_url: self.base_url(),
            endpoints: EntityKind::ALL
                .iter()
                .map(|kind| (*kind, self.endpoints(*kind)))
                .collect(),
            item_delay: Duration::from_millis(self.app.item_delay_ms),
        }
    }
}

/// Load configuration from a YAML file, apply environment overrides and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    apply_overrides(&mut cfg, |key| std::env::var(key).ok());
    validate(&cfg)?;
    Ok(cfg)
}

/// `CATALOG_BASE_URL` replaces `catalog.base_url`; `CATALOG_TOKEN` replaces
/// the auth token, creating a bearer `Authorization` entry if none exists.
fn apply_overrides(cfg: &mut Config, lookup: impl Fn(&str) -> Option<String>) {
    if let Some(base_url) = lookup("CATALOG_BASE_URL").filter(|v| !v.trim().is_empty()) {
        cfg.catalog.base_url = Some(base_url);
    }
    if let Some(token) = lookup("CATALOG_TOKEN").filter(|v| !v.trim().is_empty()) {
        match cfg.catalog.auth.as_mut() {
            Some(auth) => auth.token = token,
            None => {
                cfg.catalog.auth = Some(Auth {
                    header: default_auth_header(),
                    scheme: Some("Bearer".to_string()),
                    token,
                })
            }
        }
    }
}

/// Validate a configuration instance.
fn validate(cfg: &Config) -> Result<(), ConfigError> {
    if cfg.app.data_dir.trim().is_empty() {
        return Err(ConfigError::Invalid("app.data_dir must be non-empty"));
    }

    if let Some(raw) = cfg.catalog.base_url.as_deref().filter(|s| !s.trim().is_empty()) {
        let url = Url::parse(raw.trim())
            .map_err(|_| ConfigError::Invalid("catalog.base_url must be an absolute URL"))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::Invalid("catalog.base_url must use http or https"));
        }
    }

    if cfg.catalog.timeout_seconds == Some(0) {
        return Err(ConfigError::Invalid("catalog.timeout_seconds must be > 0"));
    }

    if let Some(auth) = &cfg.catalog.auth {
        if auth.header.trim().is_empty() {
            return Err(ConfigError::Invalid("catalog.auth.header must be non-empty"));
        }
        if auth.token.trim().is_empty() {
            return Err(ConfigError::Invalid("catalog.auth.token must be non-empty"));
        }
    }

    for endpoints in cfg.catalog.kinds.values() {
        if endpoints.list_path.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "catalog.kinds.*.list_path must be non-empty",
            ));
        }
        if let Some(detail) = &endpoints.detail_path {
            if !detail.contains("{id}") {
                return Err(ConfigError::Invalid(
                    "catalog.kinds.*.detail_path must contain {id}",
                ));
            }
        }
    }

    Ok(())
}

/// Returns an example YAML configuration.
pub fn example() -> &'static str {
    r#"app:
  data_dir: "./data"
  item_delay_ms: 250

catalog:
  base_url: "https://catalog.example.com/api/"
  timeout_seconds: 30
  auth:
    header: "Authorization"
    scheme: "Bearer"
    token: "YOUR_CATALOG_API_TOKEN"
  kinds:
    person:
      list_path: "founders"
      detail_path: "founders/{id}"
    backer:
      list_path: "investors"
      detail_path: "investors/{id}"
    collaborator:
      list_path: "partners"
    announcement:
      list_path: "news"
      detail_path: "news/{id}"
    occasion:
      list_path: "events"
      detail_path: "events/{id}"
    account:
      list_path: "users"
      detail_path: "users/{id}"
"#
}
