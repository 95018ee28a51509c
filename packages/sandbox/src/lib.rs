// ABOUTME: Provider-agnostic sandbox lifecycle orchestration for Skiff
// ABOUTME: One contract over interchangeable remote execution backends, with retry and validation

pub mod config;
pub mod error;
pub mod factory;
pub mod policy;
pub mod provider;
pub mod providers;
pub mod retry;
pub mod types;

pub use config::{
    build_provider_from_env, validate_factory_config, validate_sandbox_config, ProviderConfig,
    ProviderKind, SandboxFactoryConfig, SandboxFactoryConfigBuilder,
};
pub use error::{SandboxError, SandboxErrorKind, SandboxResult};
pub use factory::{get_sandbox_factory, initialize_sandbox_factory, SandboxFactory};
pub use policy::{phase_timeout, template_defaults, OperationPhase, TemplateDefaults, UserTier};
pub use provider::{Sandbox, SandboxProvider};
pub use providers::{DaytonaProvider, E2bProvider};
pub use retry::{
    check_sandbox_health, execute_command_with_retry, retry_with_backoff, wait_for_sandbox_ready,
    write_files_with_retry, Backoff, RetryConfig, DEFAULT_BATCH_SIZE,
};
pub use types::{
    is_placeholder_id, placeholder_sandbox_id, BatchFileOperationResult, CommandResult,
    ConnectOptions, ExecuteOptions, FileContent, FileOperationResult, FileWrite, NetworkPolicy,
    PreviewInfo, ResumeOptions, SandboxConfig, SandboxInfo, SandboxResources, SandboxStatus,
    TerminateOptions, TerminationResult,
};
