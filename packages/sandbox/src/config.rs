// ABOUTME: Configuration subsystem for the sandbox factory
// ABOUTME: Provider configs, builder with env merging, and defensive validators

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::str::FromStr;

use crate::error::{SandboxError, SandboxResult};
use crate::types::SandboxConfig;

/// Environment variable selecting the default provider.
pub const ENV_DEFAULT_PROVIDER: &str = "SKIFF_DEFAULT_PROVIDER";
/// Environment variable selecting the provider used for build workloads.
pub const ENV_BUILD_PROVIDER: &str = "SKIFF_BUILD_PROVIDER";

/// Closed set of supported sandbox backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    E2b,
    Daytona,
}

impl ProviderKind {
    /// All known provider kinds, in registry order.
    pub const ALL: &'static [ProviderKind] = &[ProviderKind::E2b, ProviderKind::Daytona];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderKind::E2b => "e2b",
            ProviderKind::Daytona => "daytona",
        }
    }

    /// Prefix used for this provider's environment variables, e.g. `E2B_API_KEY`.
    fn env_prefix(&self) -> &'static str {
        match self {
            ProviderKind::E2b => "E2B",
            ProviderKind::Daytona => "DAYTONA",
        }
    }
}

impl std::fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProviderKind {
    type Err = SandboxError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "e2b" => Ok(ProviderKind::E2b),
            "daytona" => Ok(ProviderKind::Daytona),
            other => Err(SandboxError::configuration(format!(
                "unknown provider type: {}",
                other
            ))),
        }
    }
}

/// Backend-specific configuration for one provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(rename = "type")]
    pub kind: ProviderKind,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_url: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,
    /// Open extension map for backend-specific settings.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub extra: HashMap<String, serde_json::Value>,
}

impl ProviderConfig {
    pub fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            api_key: None,
            api_url: None,
            timeout_ms: None,
            retries: None,
            extra: HashMap::new(),
        }
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_api_url(mut self, api_url: impl Into<String>) -> Self {
        self.api_url = Some(api_url.into());
        self
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_retries(mut self, retries: u32) -> Self {
        self.retries = Some(retries);
        self
    }

    /// Read `<PREFIX>_API_KEY`, `<PREFIX>_API_URL`, `<PREFIX>_TIMEOUT`, and
    /// `<PREFIX>_RETRIES` for this kind, layered over the current values.
    pub fn merge_env(mut self) -> Self {
        let prefix = self.kind.env_prefix();

        if let Ok(key) = std::env::var(format!("{}_API_KEY", prefix)) {
            if !key.is_empty() {
                self.api_key = Some(key);
            }
        }
        if let Ok(url) = std::env::var(format!("{}_API_URL", prefix)) {
            if !url.is_empty() {
                self.api_url = Some(url);
            }
        }
        if let Ok(timeout) = std::env::var(format!("{}_TIMEOUT", prefix)) {
            if let Ok(ms) = timeout.parse::<u64>() {
                self.timeout_ms = Some(ms);
            }
        }
        if let Ok(retries) = std::env::var(format!("{}_RETRIES", prefix)) {
            if let Ok(n) = retries.parse::<u32>() {
                self.retries = Some(n);
            }
        }

        self
    }
}

/// Immutable factory configuration: the provider registry plus the default.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxFactoryConfig {
    pub default_provider: ProviderKind,
    pub providers: HashMap<ProviderKind, ProviderConfig>,
}

impl SandboxFactoryConfig {
    pub fn builder() -> SandboxFactoryConfigBuilder {
        SandboxFactoryConfigBuilder::new()
    }
}

/// Accumulates provider configs and a default choice, then produces an
/// immutable `SandboxFactoryConfig`.
#[derive(Debug, Default)]
pub struct SandboxFactoryConfigBuilder {
    providers: HashMap<ProviderKind, ProviderConfig>,
    default_provider: Option<ProviderKind>,
}

impl SandboxFactoryConfigBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a provider config, keyed by its own kind tag.
    pub fn provider(mut self, config: ProviderConfig) -> Self {
        self.providers.insert(config.kind, config);
        self
    }

    pub fn default_provider(mut self, kind: ProviderKind) -> Self {
        self.default_provider = Some(kind);
        self
    }

    /// Layer environment-derived values over everything added so far:
    /// per-provider credentials and timeouts for already-added providers,
    /// and the default-provider selector.
    pub fn merge_env(mut self) -> Self {
        let kinds: Vec<ProviderKind> = self.providers.keys().copied().collect();
        for kind in kinds {
            if let Some(config) = self.providers.remove(&kind) {
                self.providers.insert(kind, config.merge_env());
            }
        }

        if let Ok(selector) = std::env::var(ENV_DEFAULT_PROVIDER) {
            if let Ok(kind) = selector.parse::<ProviderKind>() {
                self.default_provider = Some(kind);
            }
        }

        self
    }

    /// Produce the immutable config, failing fast on structural problems.
    pub fn build(self) -> SandboxResult<SandboxFactoryConfig> {
        if self.providers.is_empty() {
            return Err(SandboxError::configuration(
                "no providers configured; add at least one provider before build()",
            ));
        }

        let default_provider = match self.default_provider {
            Some(kind) => kind,
            None => {
                // A single provider is unambiguous; more than one needs an
                // explicit choice.
                let mut kinds = self.providers.keys();
                match (kinds.next(), kinds.next()) {
                    (Some(kind), None) => *kind,
                    _ => {
                        return Err(SandboxError::configuration(
                            "multiple providers configured but no default selected",
                        ));
                    }
                }
            }
        };

        if !self.providers.contains_key(&default_provider) {
            return Err(SandboxError::configuration(format!(
                "default provider '{}' has no matching provider config",
                default_provider
            )));
        }

        let config = SandboxFactoryConfig {
            default_provider,
            providers: self.providers,
        };
        validate_factory_config(&config)?;
        Ok(config)
    }
}

/// The provider kind to use for build workloads, from `SKIFF_BUILD_PROVIDER`.
pub fn build_provider_from_env() -> Option<ProviderKind> {
    std::env::var(ENV_BUILD_PROVIDER)
        .ok()
        .and_then(|value| value.parse().ok())
}

/// Structural validation of a factory config.
///
/// Called by `build()`, and intended to be called defensively on configs
/// that did not come from the builder (e.g. deserialized from storage).
pub fn validate_factory_config(config: &SandboxFactoryConfig) -> SandboxResult<()> {
    if config.providers.is_empty() {
        return Err(SandboxError::configuration("providers map is empty"));
    }

    if !config.providers.contains_key(&config.default_provider) {
        return Err(SandboxError::configuration(format!(
            "default provider '{}' is not present in the providers map",
            config.default_provider
        )));
    }

    for (key, provider) in &config.providers {
        if provider.kind != *key {
            return Err(SandboxError::configuration(format!(
                "provider config type '{}' does not match its map key '{}'",
                provider.kind, key
            )));
        }
        if let Some(timeout_ms) = provider.timeout_ms {
            if timeout_ms == 0 {
                return Err(SandboxError::configuration(format!(
                    "provider '{}' timeout must be positive",
                    key
                )));
            }
        }
    }

    Ok(())
}

/// Structural validation of a sandbox creation config.
pub fn validate_sandbox_config(config: &SandboxConfig) -> SandboxResult<()> {
    if config.template.trim().is_empty() {
        return Err(SandboxError::configuration("template is required"));
    }

    if let Some(timeout_ms) = config.timeout_ms {
        if timeout_ms == 0 {
            return Err(SandboxError::configuration("timeout_ms must be positive"));
        }
    }

    if let Some(resources) = &config.resources {
        for (name, value) in [
            ("memory_mb", resources.memory_mb),
            ("cpu_cores", resources.cpu_cores),
            ("disk_gb", resources.disk_gb),
        ] {
            if value == Some(0) {
                return Err(SandboxError::configuration(format!(
                    "resource '{}' must be positive when set",
                    name
                )));
            }
        }
    }

    Ok(())
}
