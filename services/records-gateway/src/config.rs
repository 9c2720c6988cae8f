//! Configuration types and loading
//!
//! Values come from the TOML file (path chosen with `--config`), then
//! `GATEWAY_*` environment overrides, then defaults.
//! API keys are loaded from the GATEWAY_API_KEYS env var or api_keys_file,
//! never stored in the TOML directly to avoid leaking secrets.

use common::Secret;
use credential_pool::RotationStrategy;
use gateway::{IdentityResolver, PaginationConfig, PersistConfig, RetryPolicy};
use serde::{Deserialize, Deserializer};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Root configuration
#[derive(Debug, Deserialize)]
pub struct Config {
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub persist: PersistSettings,
    #[serde(default)]
    pub pagination: PaginationSettings,
    #[serde(skip)]
    pub api_keys: Vec<Secret<String>>,
}

/// Upstream API connection settings
#[derive(Debug, Deserialize)]
pub struct UpstreamConfig {
    pub base_url: String,
    #[serde(default = "default_credential_header")]
    pub credential_header: String,
    /// e.g. "Bearer" when the header is `authorization`
    #[serde(default)]
    pub credential_prefix: Option<String>,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    /// File with one API key per line (alternative to GATEWAY_API_KEYS)
    #[serde(default)]
    pub api_keys_file: Option<PathBuf>,
}

/// Rate limiting, retry and concurrency settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    pub min_request_interval_ms: u64,
    pub rate_limit_delay_ms: u64,
    pub backoff_base_ms: u64,
    pub max_retries: u32,
    pub max_concurrency: Option<usize>,
    #[serde(deserialize_with = "rotation_from_str")]
    pub rotation: RotationStrategy,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            min_request_interval_ms: 200,
            rate_limit_delay_ms: 1000,
            backoff_base_ms: 1000,
            max_retries: 3,
            max_concurrency: None,
            rotation: RotationStrategy::Sticky,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// 0 disables the response cache
    pub ttl_secs: u64,
    /// Upper bound on cached response bytes
    pub max_bytes: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            ttl_secs: 3600,
            max_bytes: 32 * 1024 * 1024,
        }
    }
}

/// Persistence queue settings
#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PersistSettings {
    /// JSON-lines output file; records are only logged when unset
    pub path: Option<PathBuf>,
    pub batch_size: usize,
    pub concurrency: usize,
    pub max_queue: usize,
    pub debounce_ms: u64,
    pub identity_fields: Vec<String>,
}

impl Default for PersistSettings {
    fn default() -> Self {
        Self {
            path: None,
            batch_size: 50,
            concurrency: 10,
            max_queue: 5000,
            debounce_ms: 250,
            identity_fields: vec!["id".to_string()],
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct PaginationSettings {
    pub page_size: usize,
    pub max_pages: usize,
    pub offset_param: String,
    pub limit_param: String,
}

impl Default for PaginationSettings {
    fn default() -> Self {
        let defaults = PaginationConfig::default();
        Self {
            page_size: defaults.page_size,
            max_pages: defaults.max_pages,
            offset_param: defaults.offset_param,
            limit_param: defaults.limit_param,
        }
    }
}

fn default_credential_header() -> String {
    "x-api-key".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn rotation_from_str<'de, D: Deserializer<'de>>(d: D) -> Result<RotationStrategy, D::Error> {
    let raw = String::deserialize(d)?;
    raw.parse().map_err(serde::de::Error::custom)
}

fn config_err(msg: impl Into<String>) -> common::Error {
    common::Error::Config(msg.into())
}

impl Config {
    /// Load configuration from a TOML file, then overlay environment variables.
    ///
    /// API key resolution order:
    /// 1. GATEWAY_API_KEYS env var (comma separated)
    /// 2. api_keys_file path from config
    pub fn load(path: &Path) -> common::Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        let mut config: Config = toml::from_str(&contents)?;

        if let Ok(raw) = std::env::var("GATEWAY_MAX_CONCURRENCY") {
            let n = raw.trim().parse::<usize>().map_err(|e| {
                config_err(format!("GATEWAY_MAX_CONCURRENCY must be a number, got {raw:?}: {e}"))
            })?;
            config.limits.max_concurrency = Some(n);
        }
        if let Ok(raw) = std::env::var("GATEWAY_ROTATION") {
            config.limits.rotation = raw
                .parse()
                .map_err(|e| config_err(format!("GATEWAY_ROTATION: {e}")))?;
        }

        config.validate()?;
        config.api_keys = load_api_keys(config.upstream.api_keys_file.as_deref())?;
        Ok(config)
    }

    fn validate(&self) -> common::Result<()> {
        let url = &self.upstream.base_url;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(config_err(format!(
                "base_url must start with http:// or https://, got: {url}"
            )));
        }
        if self.upstream.timeout_secs == 0 {
            return Err(config_err("timeout_secs must be greater than 0"));
        }
        if self.limits.max_concurrency == Some(0) {
            return Err(config_err("max_concurrency must be greater than 0 when set"));
        }
        let persist = &self.persist;
        for (name, value) in [
            ("persist.batch_size", persist.batch_size),
            ("persist.concurrency", persist.concurrency),
            ("persist.max_queue", persist.max_queue),
            ("pagination.page_size", self.pagination.page_size),
            ("pagination.max_pages", self.pagination.max_pages),
        ] {
            if value == 0 {
                return Err(config_err(format!("{name} must be greater than 0")));
            }
        }
        Ok(())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_retries: self.limits.max_retries,
            rate_limit_delay: Duration::from_millis(self.limits.rate_limit_delay_ms),
            backoff_base: Duration::from_millis(self.limits.backoff_base_ms),
        }
    }

    pub fn persist_config(&self) -> PersistConfig {
        PersistConfig {
            batch_size: self.persist.batch_size,
            concurrency: self.persist.concurrency,
            max_queue: self.persist.max_queue,
            debounce: Duration::from_millis(self.persist.debounce_ms),
        }
    }

    pub fn pagination_config(&self) -> PaginationConfig {
        PaginationConfig {
            page_size: self.pagination.page_size,
            max_pages: self.pagination.max_pages,
            offset_param: self.pagination.offset_param.clone(),
            limit_param: self.pagination.limit_param.clone(),
        }
    }

    pub fn identity_resolver(&self) -> IdentityResolver {
        IdentityResolver::new(self.persist.identity_fields.iter().cloned())
    }

    /// Resolve config file path from CLI arg or CONFIG_PATH env var.
    pub fn resolve_path(cli_path: Option<&str>) -> PathBuf {
        if let Some(p) = cli_path {
            return PathBuf::from(p);
        }
        if let Ok(p) = std::env::var("CONFIG_PATH") {
            return PathBuf::from(p);
        }
        PathBuf::from("records-gateway.toml")
    }
}

fn load_api_keys(keys_file: Option<&Path>) -> common::Result<Vec<Secret<String>>> {
    let keys: Vec<Secret<String>> = if let Ok(raw) = std::env::var("GATEWAY_API_KEYS") {
        raw.split(',')
            .map(str::trim)
            .filter(|k| !k.is_empty())
            .map(|k| Secret::new(k.to_string()))
            .collect()
    } else if let Some(path) = keys_file {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            config_err(format!("failed to read api_keys_file {}: {e}", path.display()))
        })?;
        contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(|k| Secret::new(k.to_string()))
            .collect()
    } else {
        Vec::new()
    };

    if keys.is_empty() {
        return Err(config_err(
            "no API keys configured: set GATEWAY_API_KEYS or upstream.api_keys_file",
        ));
    }
    Ok(keys)
}
