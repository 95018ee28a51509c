// ABOUTME: Provider Contract traits every backend adapter must implement
// ABOUTME: Lifecycle operations on the provider, command/file operations on sandbox handles

use async_trait::async_trait;
use std::any::Any;
use std::sync::Arc;

use crate::config::ProviderKind;
use crate::error::SandboxResult;
use crate::types::{
    BatchFileOperationResult, CommandResult, ConnectOptions, ExecuteOptions, FileContent,
    FileOperationResult, FileWrite, PreviewInfo, ResumeOptions, SandboxConfig, SandboxInfo,
    TerminateOptions, TerminationResult,
};

/// A backend integration serving sandbox lifecycle operations.
///
/// Implementations are constructed from a `ProviderConfig` and become ready
/// to serve after `initialize` succeeds.
#[async_trait]
pub trait SandboxProvider: Send + Sync + std::fmt::Debug {
    fn kind(&self) -> ProviderKind;

    /// Become ready to serve sandbox operations.
    ///
    /// Runs the availability probe and fails fast with a configuration error
    /// on misconfiguration, never deferring the failure to first use.
    async fn initialize(&self) -> SandboxResult<()>;

    /// Create a new sandbox from the given config.
    ///
    /// Fails with CREATION_FAILED on backend rejection (quota, invalid
    /// template, network error).
    async fn create(&self, config: &SandboxConfig) -> SandboxResult<Arc<dyn Sandbox>>;

    /// Attach to an existing remote sandbox.
    ///
    /// Fails with CONNECTION_FAILED if the id is unknown or unreachable.
    async fn connect(&self, id: &str, opts: &ConnectOptions) -> SandboxResult<Arc<dyn Sandbox>>;

    /// Transition a stopped sandbox back to running.
    ///
    /// Sandboxes in a terminal or otherwise unresumable state are rejected
    /// with CONNECTION_FAILED before any start call is issued. Which backend
    /// states count as unresumable is the adapter's own knowledge.
    async fn resume(&self, id: &str, opts: &ResumeOptions) -> SandboxResult<Arc<dyn Sandbox>>;

    /// List sandboxes known to the backend.
    async fn list(&self) -> SandboxResult<Vec<SandboxInfo>>;

    /// Status query for one sandbox. Fails with PROVIDER_ERROR on unknown ids.
    async fn get_info(&self, id: &str) -> SandboxResult<SandboxInfo>;

    /// Best-effort termination. Never errors: failures are reported in the
    /// result so a caller's cleanup loop can continue. Placeholder ids that
    /// were never created remotely terminate trivially with success.
    async fn terminate(&self, id: &str, opts: &TerminateOptions) -> TerminationResult;

    /// Cheap liveness probe used by `initialize` to fail fast.
    async fn is_available(&self) -> bool;
}

/// Handle to one remote sandbox instance.
///
/// Status is never cached here: `get_info` re-queries the backend so state
/// reflects remote reality. All operations are network-bound; client-side
/// timeouts make cancellation best-effort only — the remote side effect may
/// still complete.
#[async_trait]
pub trait Sandbox: Send + Sync + std::fmt::Debug {
    fn id(&self) -> &str;

    fn provider(&self) -> ProviderKind;

    /// Run a command, normalizing the backend response into `CommandResult`.
    ///
    /// Fails with COMMAND_FAILED wrapping the backend error. The command is
    /// checked against the security blocklist before dispatch.
    async fn execute_command(
        &self,
        command: &str,
        opts: &ExecuteOptions,
    ) -> SandboxResult<CommandResult>;

    /// Write one file, normalizing content encoding to the backend's
    /// transfer format. Paths are sanitized before dispatch.
    async fn write_file(
        &self,
        path: &str,
        content: &FileContent,
    ) -> SandboxResult<FileOperationResult>;

    /// Write a batch of files as a single remote call.
    ///
    /// No per-file atomicity is synthesized: if the backend call fails, every
    /// entry reports the same error.
    async fn write_files(&self, files: &[FileWrite]) -> SandboxResult<BatchFileOperationResult>;

    async fn read_file(&self, path: &str) -> SandboxResult<FileContent>;

    async fn list_files(&self, path: &str) -> SandboxResult<Vec<String>>;

    async fn delete_file(&self, path: &str) -> SandboxResult<FileOperationResult>;

    async fn file_exists(&self, path: &str) -> SandboxResult<bool>;

    /// Re-query the backend for current status.
    async fn get_info(&self) -> SandboxResult<SandboxInfo>;

    /// Reset the backend's idle timer for this sandbox.
    async fn keep_alive(&self) -> SandboxResult<()>;

    /// Public hostname for a port inside the sandbox.
    async fn get_host(&self, port: u16) -> SandboxResult<String>;

    /// Preview endpoint for a port, falling back to a deterministically
    /// constructed URL when the backend's preview API is unavailable.
    async fn preview_info(&self, port: u16) -> SandboxResult<PreviewInfo>;

    /// Best-effort termination of this instance. Never errors.
    async fn terminate(&self, opts: &TerminateOptions) -> TerminationResult;

    /// Escape hatch to the backend-specific handle.
    ///
    /// The returned value is opaque and backend-specific; downcasting it ties
    /// the caller to one backend and forfeits provider portability.
    fn native_instance(&self) -> &dyn Any;
}
