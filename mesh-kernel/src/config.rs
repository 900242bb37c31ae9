//! Runtime configuration for the mesh kernel.

use std::env;
use std::num::NonZeroUsize;
use std::time::Duration;

use mesh_resolve::FallbackMode;

use crate::http_client;
use crate::monitor::HeartbeatConfig;
use crate::proxy::CallBudget;
use crate::registry::{RegistryError, RegistryResult};

/// Environment variable naming the registry base URL.
pub const REGISTRY_URL_ENV: &str = "MESH_REGISTRY_URL";
/// Environment variable overriding the heartbeat interval in milliseconds.
pub const HEARTBEAT_INTERVAL_ENV: &str = "MESH_HEARTBEAT_INTERVAL_MS";
/// Environment variable overriding the per-call timeout in milliseconds.
pub const CALL_TIMEOUT_ENV: &str = "MESH_CALL_TIMEOUT_MS";
/// Environment variable overriding the per-call transport attempts.
pub const CALL_ATTEMPTS_ENV: &str = "MESH_CALL_ATTEMPTS";
/// Environment variable selecting `strict` or `graceful` fallback.
pub const FALLBACK_MODE_ENV: &str = "MESH_FALLBACK_MODE";
/// Environment variable listing comma-separated forwarded header prefixes.
pub const FORWARD_HEADERS_ENV: &str = "MESH_FORWARD_HEADERS";
/// Environment variable capping concurrent kernel tasks.
pub const MAX_CONCURRENCY_ENV: &str = "MESH_MAX_CONCURRENCY";

/// Everything the kernel needs to join a mesh.
#[derive(Clone, Debug)]
pub struct KernelConfig {
    registry_url: String,
    heartbeat: HeartbeatConfig,
    call_budget: CallBudget,
    fallback: FallbackMode,
    forward_header_prefixes: Vec<String>,
    max_concurrency: NonZeroUsize,
}

impl KernelConfig {
    /// Creates a configuration pointing at the given registry, with
    /// defaults for everything else.
    #[must_use]
    pub fn new(registry_url: impl Into<String>) -> Self {
        Self {
            registry_url: registry_url.into(),
            heartbeat: HeartbeatConfig::default(),
            call_budget: CallBudget::default(),
            fallback: FallbackMode::default(),
            forward_header_prefixes: Vec::new(),
            max_concurrency: NonZeroUsize::new(32).expect("non-zero"),
        }
    }

    /// Loads configuration from `MESH_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidConfig`] when the registry URL is
    /// missing or any override fails to parse.
    pub fn from_env() -> RegistryResult<Self> {
        let registry_url = env::var(REGISTRY_URL_ENV)
            .map_err(|_| RegistryError::InvalidConfig("MESH_REGISTRY_URL is not set"))?;
        let mut config = Self::new(registry_url);

        if let Some(interval) = read_millis(HEARTBEAT_INTERVAL_ENV)? {
            config.heartbeat = HeartbeatConfig::new(
                interval,
                config.heartbeat.initial_retry_delay(),
                config.heartbeat.max_retry_delay(),
                config.heartbeat.thresholds(),
                config.heartbeat.port_wait(),
                config.heartbeat.attempts_per_tick(),
            );
        }

        let timeout = read_millis(CALL_TIMEOUT_ENV)?.unwrap_or_else(|| config.call_budget.timeout());
        let attempts = match env::var(CALL_ATTEMPTS_ENV) {
            Ok(raw) => raw
                .parse::<u32>()
                .map_err(|_| RegistryError::InvalidConfig("MESH_CALL_ATTEMPTS must be an integer"))?,
            Err(_) => config.call_budget.attempts(),
        };
        config.call_budget = CallBudget::new(timeout, attempts);

        if let Ok(raw) = env::var(FALLBACK_MODE_ENV) {
            config.fallback = parse_fallback(&raw)
                .ok_or(RegistryError::InvalidConfig(
                    "MESH_FALLBACK_MODE must be `strict` or `graceful`",
                ))?;
        }

        if let Ok(raw) = env::var(FORWARD_HEADERS_ENV) {
            config.forward_header_prefixes = parse_header_list(&raw);
        }

        if let Ok(raw) = env::var(MAX_CONCURRENCY_ENV) {
            let parsed = raw.parse::<usize>().ok().and_then(NonZeroUsize::new).ok_or(
                RegistryError::InvalidConfig("MESH_MAX_CONCURRENCY must be a positive integer"),
            )?;
            config.max_concurrency = parsed;
        }

        Ok(config)
    }

    /// Replaces the heartbeat configuration.
    #[must_use]
    pub const fn with_heartbeat(mut self, heartbeat: HeartbeatConfig) -> Self {
        self.heartbeat = heartbeat;
        self
    }

    /// Replaces the outbound call budget.
    #[must_use]
    pub const fn with_call_budget(mut self, budget: CallBudget) -> Self {
        self.call_budget = budget;
        self
    }

    /// Selects the fallback mode applied to dependency calls.
    #[must_use]
    pub const fn with_fallback(mut self, fallback: FallbackMode) -> Self {
        self.fallback = fallback;
        self
    }

    /// Sets the header prefixes forwarded across hops.
    #[must_use]
    pub fn with_forward_header_prefixes<I, S>(mut self, prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.forward_header_prefixes = prefixes.into_iter().map(Into::into).collect();
        self
    }

    /// Caps concurrent kernel tasks.
    #[must_use]
    pub const fn with_max_concurrency(mut self, max_concurrency: NonZeroUsize) -> Self {
        self.max_concurrency = max_concurrency;
        self
    }

    /// Returns the registry base URL.
    #[must_use]
    pub fn registry_url(&self) -> &str {
        &self.registry_url
    }

    /// Returns the heartbeat configuration.
    #[must_use]
    pub const fn heartbeat(&self) -> HeartbeatConfig {
        self.heartbeat
    }

    /// Returns the outbound call budget.
    #[must_use]
    pub const fn call_budget(&self) -> CallBudget {
        self.call_budget
    }

    /// Returns the dependency-call fallback mode.
    #[must_use]
    pub const fn fallback(&self) -> FallbackMode {
        self.fallback
    }

    /// Returns the forwarded header prefixes.
    #[must_use]
    pub fn forward_header_prefixes(&self) -> &[String] {
        &self.forward_header_prefixes
    }

    /// Returns the concurrency cap.
    #[must_use]
    pub const fn max_concurrency(&self) -> NonZeroUsize {
        self.max_concurrency
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`RegistryError::InvalidConfig`] when the registry URL or
    /// heartbeat settings are invalid.
    pub fn validate(&self) -> RegistryResult<()> {
        http_client::sanitize_base_url(&self.registry_url)
            .map_err(|_| RegistryError::InvalidConfig("registry base URL is invalid"))?;
        self.heartbeat.validate()
    }
}

fn read_millis(name: &'static str) -> RegistryResult<Option<Duration>> {
    match env::var(name) {
        Ok(raw) => {
            let millis = raw.parse::<u64>().map_err(|_| {
                RegistryError::InvalidConfig("duration overrides must be integer milliseconds")
            })?;
            if millis == 0 {
                return Err(RegistryError::InvalidConfig(
                    "duration overrides must be greater than zero",
                ));
            }
            Ok(Some(Duration::from_millis(millis)))
        }
        Err(_) => Ok(None),
    }
}

fn parse_fallback(raw: &str) -> Option<FallbackMode> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "strict" => Some(FallbackMode::Strict),
        "graceful" => Some(FallbackMode::Graceful),
        _ => None,
    }
}

fn parse_header_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|prefix| !prefix.is_empty())
        .map(str::to_owned)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_validate() {
        let config = KernelConfig::new("http://registry.local:7000");
        assert!(config.validate().is_ok());
        assert_eq!(config.fallback(), FallbackMode::Strict);
    }

    #[test]
    fn bad_registry_url_rejected() {
        let config = KernelConfig::new("registry.local");
        assert!(matches!(
            config.validate(),
            Err(RegistryError::InvalidConfig(_))
        ));
    }

    #[test]
    fn fallback_parsing() {
        assert_eq!(parse_fallback("strict"), Some(FallbackMode::Strict));
        assert_eq!(parse_fallback(" Graceful "), Some(FallbackMode::Graceful));
        assert_eq!(parse_fallback("maybe"), None);
    }

    #[test]
    fn header_list_parsing_drops_empties() {
        assert_eq!(
            parse_header_list("x-tenant-, ,x-request-id"),
            vec!["x-tenant-".to_owned(), "x-request-id".to_owned()]
        );
    }
}
