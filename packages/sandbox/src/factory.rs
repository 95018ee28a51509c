// ABOUTME: Factory routing sandbox operations to initialized provider adapters
// ABOUTME: Owns the provider registry, the default selection, and the guarded process-wide accessor

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::OnceLock;
use tokio::sync::RwLock;
use tracing::{info, warn};

use crate::config::{
    validate_factory_config, validate_sandbox_config, ProviderConfig, ProviderKind,
    SandboxFactoryConfig,
};
use crate::error::{SandboxError, SandboxResult};
use crate::provider::{Sandbox, SandboxProvider};
use crate::providers::{DaytonaProvider, E2bProvider};
use crate::types::{
    ConnectOptions, ResumeOptions, SandboxConfig, SandboxInfo, TerminateOptions, TerminationResult,
};

/// Construct an adapter for a provider config via the closed dispatch table.
fn make_provider(config: &ProviderConfig) -> SandboxResult<Arc<dyn SandboxProvider>> {
    let provider: Arc<dyn SandboxProvider> = match config.kind {
        ProviderKind::E2b => Arc::new(E2bProvider::new(config)?),
        ProviderKind::Daytona => Arc::new(DaytonaProvider::new(config)?),
    };
    Ok(provider)
}

/// Registry of initialized providers plus the designated default.
///
/// Read-mostly after `initialize`. The admin mutation methods
/// (`add_provider`, `remove_provider`, `set_default_provider`, ...) are
/// administrative operations; callers are expected to serialize them.
#[derive(Debug)]
pub struct SandboxFactory {
    providers: RwLock<HashMap<ProviderKind, Arc<dyn SandboxProvider>>>,
    default_provider: RwLock<ProviderKind>,
}

impl SandboxFactory {
    /// Build and initialize one adapter per configured provider.
    ///
    /// Adapters whose initialization fails are skipped with a warning; the
    /// factory itself fails with a configuration error if the resulting
    /// registry is empty or the configured default did not initialize.
    pub async fn initialize(config: SandboxFactoryConfig) -> SandboxResult<Self> {
        validate_factory_config(&config)?;

        let mut providers: HashMap<ProviderKind, Arc<dyn SandboxProvider>> = HashMap::new();

        for (kind, provider_config) in &config.providers {
            let provider = make_provider(provider_config)?;
            match provider.initialize().await {
                Ok(()) => {
                    info!(provider = %kind, "sandbox provider initialized");
                    providers.insert(*kind, provider);
                }
                Err(error) => {
                    warn!(provider = %kind, %error, "provider failed to initialize, skipping");
                }
            }
        }

        if providers.is_empty() {
            return Err(SandboxError::configuration(
                "no sandbox providers could be initialized",
            ));
        }
        if !providers.contains_key(&config.default_provider) {
            return Err(SandboxError::configuration(format!(
                "default provider '{}' failed to initialize",
                config.default_provider
            )));
        }

        Ok(Self {
            providers: RwLock::new(providers),
            default_provider: RwLock::new(config.default_provider),
        })
    }

    /// Build a factory from pre-constructed adapters.
    ///
    /// Entry point for external collaborators bringing their own contract
    /// implementation (and for test doubles); the adapters are assumed to be
    /// initialized already.
    pub fn with_providers(
        default_provider: ProviderKind,
        providers: Vec<Arc<dyn SandboxProvider>>,
    ) -> SandboxResult<Self> {
        if providers.is_empty() {
            return Err(SandboxError::configuration("no providers supplied"));
        }

        let registry: HashMap<ProviderKind, Arc<dyn SandboxProvider>> = providers
            .into_iter()
            .map(|provider| (provider.kind(), provider))
            .collect();

        if !registry.contains_key(&default_provider) {
            return Err(SandboxError::configuration(format!(
                "default provider '{}' is not among the supplied providers",
                default_provider
            )));
        }

        Ok(Self {
            providers: RwLock::new(registry),
            default_provider: RwLock::new(default_provider),
        })
    }

    /// Resolve the requested provider, or the default when `kind` is `None`.
    pub async fn get_provider(
        &self,
        kind: Option<ProviderKind>,
    ) -> SandboxResult<Arc<dyn SandboxProvider>> {
        let kind = match kind {
            Some(kind) => kind,
            None => *self.default_provider.read().await,
        };

        let providers = self.providers.read().await;
        providers.get(&kind).cloned().ok_or_else(|| {
            SandboxError::configuration(format!("provider '{}' is not registered", kind))
        })
    }

    /// Create a sandbox through the requested (or default) provider.
    pub async fn create_sandbox(
        &self,
        provider: Option<ProviderKind>,
        config: &SandboxConfig,
    ) -> SandboxResult<Arc<dyn Sandbox>> {
        validate_sandbox_config(config)?;
        let provider = self.get_provider(provider).await?;
        provider.create(config).await
    }

    /// Attach to an existing sandbox.
    pub async fn connect_to_sandbox(
        &self,
        provider: Option<ProviderKind>,
        id: &str,
        opts: &ConnectOptions,
    ) -> SandboxResult<Arc<dyn Sandbox>> {
        let provider = self.get_provider(provider).await?;
        provider.connect(id, opts).await
    }

    /// Resume a stopped sandbox.
    pub async fn resume_sandbox(
        &self,
        provider: Option<ProviderKind>,
        id: &str,
        opts: &ResumeOptions,
    ) -> SandboxResult<Arc<dyn Sandbox>> {
        let provider = self.get_provider(provider).await?;
        provider.resume(id, opts).await
    }

    /// Best-effort termination through the resolved provider.
    ///
    /// Mirrors the contract: never errors, so a caller's cleanup loop can
    /// keep going even when the provider itself cannot be resolved.
    pub async fn terminate_sandbox(
        &self,
        provider: Option<ProviderKind>,
        id: &str,
        opts: &TerminateOptions,
    ) -> TerminationResult {
        match self.get_provider(provider).await {
            Ok(provider) => provider.terminate(id, opts).await,
            Err(error) => TerminationResult::failed(id, error.to_string()),
        }
    }

    /// List sandboxes known to the resolved provider.
    pub async fn list_sandboxes(
        &self,
        provider: Option<ProviderKind>,
    ) -> SandboxResult<Vec<SandboxInfo>> {
        let provider = self.get_provider(provider).await?;
        provider.list().await
    }

    /// Status query for one sandbox.
    pub async fn get_sandbox_info(
        &self,
        provider: Option<ProviderKind>,
        id: &str,
    ) -> SandboxResult<SandboxInfo> {
        let provider = self.get_provider(provider).await?;
        provider.get_info(id).await
    }

    /// Construct, initialize, and register a provider at runtime.
    pub async fn add_provider(&self, config: &ProviderConfig) -> SandboxResult<()> {
        let provider = make_provider(config)?;
        provider.initialize().await?;

        let mut providers = self.providers.write().await;
        providers.insert(config.kind, provider);
        info!(provider = %config.kind, "sandbox provider registered");
        Ok(())
    }

    /// Register a pre-built adapter, replacing any existing one of its kind.
    pub async fn register_provider(&self, provider: Arc<dyn SandboxProvider>) {
        let kind = provider.kind();
        let mut providers = self.providers.write().await;
        providers.insert(kind, provider);
        info!(provider = %kind, "sandbox provider registered");
    }

    /// Replace a provider's configuration by re-constructing its adapter.
    pub async fn update_provider_config(&self, config: &ProviderConfig) -> SandboxResult<()> {
        {
            let providers = self.providers.read().await;
            if !providers.contains_key(&config.kind) {
                return Err(SandboxError::configuration(format!(
                    "provider '{}' is not registered",
                    config.kind
                )));
            }
        }
        self.add_provider(config).await
    }

    /// Remove a provider from the registry.
    ///
    /// Removing the current default fails: the default must always resolve
    /// to a live provider.
    pub async fn remove_provider(&self, kind: ProviderKind) -> SandboxResult<()> {
        let default = *self.default_provider.read().await;
        if kind == default {
            return Err(SandboxError::configuration(format!(
                "cannot remove provider '{}' while it is the default",
                kind
            )));
        }

        let mut providers = self.providers.write().await;
        if providers.remove(&kind).is_none() {
            return Err(SandboxError::configuration(format!(
                "provider '{}' is not registered",
                kind
            )));
        }
        Ok(())
    }

    /// Change the default provider. The target must be registered.
    pub async fn set_default_provider(&self, kind: ProviderKind) -> SandboxResult<()> {
        let providers = self.providers.read().await;
        if !providers.contains_key(&kind) {
            return Err(SandboxError::configuration(format!(
                "provider '{}' is not registered",
                kind
            )));
        }
        drop(providers);

        *self.default_provider.write().await = kind;
        Ok(())
    }

    pub async fn default_provider(&self) -> ProviderKind {
        *self.default_provider.read().await
    }

    pub async fn list_provider_kinds(&self) -> Vec<ProviderKind> {
        self.providers.read().await.keys().copied().collect()
    }
}

static FACTORY: OnceLock<Arc<SandboxFactory>> = OnceLock::new();

/// Initialize the process-wide factory.
///
/// Dependency injection of an owned `Arc<SandboxFactory>` is the primary
/// pattern; this accessor exists for services that want one shared instance.
/// A second initialization fails: runtime changes go through the factory's
/// admin methods instead.
pub async fn initialize_sandbox_factory(
    config: SandboxFactoryConfig,
) -> SandboxResult<Arc<SandboxFactory>> {
    let factory = Arc::new(SandboxFactory::initialize(config).await?);
    FACTORY
        .set(factory.clone())
        .map_err(|_| SandboxError::configuration("sandbox factory is already initialized"))?;
    Ok(factory)
}

/// The process-wide factory, failing explicitly when it was never
/// initialized rather than constructing one lazily.
pub fn get_sandbox_factory() -> SandboxResult<Arc<SandboxFactory>> {
    FACTORY.get().cloned().ok_or_else(|| {
        SandboxError::configuration(
            "sandbox factory is not initialized; call initialize_sandbox_factory first",
        )
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_accessor_fails_before_initialization() {
        // The OnceLock is process-wide, so this test must run before anything
        // sets it; unit tests here never initialize the global.
        let err = get_sandbox_factory().unwrap_err();
        assert!(err.is_configuration_error());
    }

    #[test]
    fn with_providers_rejects_empty_registry() {
        let err = SandboxFactory::with_providers(ProviderKind::E2b, Vec::new()).unwrap_err();
        assert!(err.is_configuration_error());
    }
}
