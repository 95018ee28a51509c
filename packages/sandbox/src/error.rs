// ABOUTME: Closed error taxonomy for sandbox operations
// ABOUTME: Every failure surfaces as a SandboxError with a kind, message, and optional cause

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type for sandbox operations
pub type SandboxResult<T> = Result<T, SandboxError>;

/// Closed classification of sandbox failures.
///
/// Retry policy and caller handling key off this tag, so the set is fixed;
/// backend-specific detail goes in the message and the wrapped source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SandboxErrorKind {
    CreationFailed,
    ConnectionFailed,
    CommandFailed,
    FileOperationFailed,
    TerminationFailed,
    Timeout,
    ProviderError,
    ConfigurationError,
}

impl std::fmt::Display for SandboxErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::CreationFailed => "CREATION_FAILED",
            Self::ConnectionFailed => "CONNECTION_FAILED",
            Self::CommandFailed => "COMMAND_FAILED",
            Self::FileOperationFailed => "FILE_OPERATION_FAILED",
            Self::TerminationFailed => "TERMINATION_FAILED",
            Self::Timeout => "TIMEOUT",
            Self::ProviderError => "PROVIDER_ERROR",
            Self::ConfigurationError => "CONFIGURATION_ERROR",
        };
        f.write_str(name)
    }
}

/// Typed sandbox error carrying an optional sandbox id and wrapped cause.
#[derive(Error, Debug)]
#[error("{kind}: {message}")]
pub struct SandboxError {
    kind: SandboxErrorKind,
    message: String,
    sandbox_id: Option<String>,
    #[source]
    source: Option<Box<dyn std::error::Error + Send + Sync>>,
}

impl SandboxError {
    pub fn new(kind: SandboxErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            sandbox_id: None,
            source: None,
        }
    }

    pub fn creation_failed(msg: impl Into<String>) -> Self {
        Self::new(SandboxErrorKind::CreationFailed, msg)
    }

    pub fn connection_failed(msg: impl Into<String>) -> Self {
        Self::new(SandboxErrorKind::ConnectionFailed, msg)
    }

    pub fn command_failed(msg: impl Into<String>) -> Self {
        Self::new(SandboxErrorKind::CommandFailed, msg)
    }

    pub fn file_operation_failed(msg: impl Into<String>) -> Self {
        Self::new(SandboxErrorKind::FileOperationFailed, msg)
    }

    pub fn termination_failed(msg: impl Into<String>) -> Self {
        Self::new(SandboxErrorKind::TerminationFailed, msg)
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::new(SandboxErrorKind::Timeout, msg)
    }

    pub fn provider(msg: impl Into<String>) -> Self {
        Self::new(SandboxErrorKind::ProviderError, msg)
    }

    pub fn configuration(msg: impl Into<String>) -> Self {
        Self::new(SandboxErrorKind::ConfigurationError, msg)
    }

    /// Attach the sandbox id the failure relates to.
    pub fn with_sandbox_id(mut self, sandbox_id: impl Into<String>) -> Self {
        self.sandbox_id = Some(sandbox_id.into());
        self
    }

    /// Attach the underlying cause for diagnostics.
    pub fn with_source(
        mut self,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        self.source = Some(Box::new(source));
        self
    }

    pub fn kind(&self) -> SandboxErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn sandbox_id(&self) -> Option<&str> {
        self.sandbox_id.as_deref()
    }

    /// Whether this error is transient enough that a retry may succeed.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.kind,
            SandboxErrorKind::ConnectionFailed
                | SandboxErrorKind::Timeout
                | SandboxErrorKind::ProviderError
        )
    }

    pub fn is_configuration_error(&self) -> bool {
        self.kind == SandboxErrorKind::ConfigurationError
    }
}

impl From<reqwest::Error> for SandboxError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            SandboxError::timeout("request timed out").with_source(err)
        } else {
            SandboxError::connection_failed(err.to_string()).with_source(err)
        }
    }
}

impl From<skiff_security::SecurityError> for SandboxError {
    fn from(err: skiff_security::SecurityError) -> Self {
        match &err {
            skiff_security::SecurityError::InvalidPath(_) => {
                SandboxError::file_operation_failed(err.to_string())
            }
            _ => SandboxError::command_failed(err.to_string()),
        }
    }
}
