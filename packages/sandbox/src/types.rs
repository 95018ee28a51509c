// ABOUTME: Data model shared across the sandbox layer
// ABOUTME: Sandbox/command/file configuration and result types plus the status state machine

use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::error::{SandboxError, SandboxResult};

/// Prefix for ids handed out before anything exists remotely.
const PLACEHOLDER_PREFIX: &str = "placeholder-";

/// Generate a synthetic sandbox id that was never created remotely.
///
/// Terminating a placeholder id succeeds trivially without a remote call.
pub fn placeholder_sandbox_id() -> String {
    format!("{}{}", PLACEHOLDER_PREFIX, uuid::Uuid::new_v4())
}

/// Whether an id is a local placeholder rather than a remote sandbox.
pub fn is_placeholder_id(id: &str) -> bool {
    id.starts_with(PLACEHOLDER_PREFIX)
}

/// Resource ceilings for a sandbox. Each field is a positive value when set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SandboxResources {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_cores: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_gb: Option<u32>,
}

/// Network egress policy applied by the backend at creation time.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NetworkPolicy {
    pub enabled: bool,
    #[serde(default)]
    pub allowed_domains: Vec<String>,
    #[serde(default)]
    pub blocked_ports: Vec<u16>,
}

/// Configuration for a single sandbox creation request.
///
/// Immutable once passed to a provider call; build a fresh config per
/// creation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Backend image or snapshot identifier. Required.
    pub template: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timeout_ms: Option<u64>,
    #[serde(default)]
    pub env: HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<SandboxResources>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub network: Option<NetworkPolicy>,
}

impl SandboxConfig {
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            timeout_ms: None,
            env: HashMap::new(),
            resources: None,
            network: None,
        }
    }

    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = Some(timeout_ms);
        self
    }

    pub fn with_env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn with_resources(mut self, resources: SandboxResources) -> Self {
        self.resources = Some(resources);
        self
    }

    pub fn with_network(mut self, network: NetworkPolicy) -> Self {
        self.network = Some(network);
        self
    }
}

/// Lifecycle states of a sandbox instance.
///
/// Creating -> Running -> {Stopped, Error} -> Terminated, with
/// Stopped -> Running via resume. Terminated is absorbing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SandboxStatus {
    Creating,
    Running,
    Stopped,
    Error,
    Terminated,
}

impl SandboxStatus {
    /// Whether any further lifecycle transition is possible.
    pub fn is_terminal(&self) -> bool {
        matches!(self, SandboxStatus::Terminated)
    }

    /// Whether `resume` is a legal transition from this state.
    pub fn is_resumable(&self) -> bool {
        matches!(self, SandboxStatus::Stopped)
    }
}

impl std::fmt::Display for SandboxStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Creating => "CREATING",
            Self::Running => "RUNNING",
            Self::Stopped => "STOPPED",
            Self::Error => "ERROR",
            Self::Terminated => "TERMINATED",
        };
        f.write_str(name)
    }
}

/// Point-in-time snapshot of a remote sandbox, produced by providers and
/// read-only to callers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxInfo {
    pub id: String,
    pub status: SandboxStatus,
    pub template: String,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_active_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resources: Option<SandboxResources>,
    #[serde(default)]
    pub metadata: HashMap<String, serde_json::Value>,
}

/// Result of a single command execution inside a sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub duration_ms: Option<u64>,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// File content in one of the two supported transfer encodings.
///
/// Providers normalize to whatever their backend's transfer format is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "encoding", content = "data", rename_all = "lowercase")]
pub enum FileContent {
    Utf8(String),
    Base64(String),
}

impl FileContent {
    /// Content as a base64 string, encoding UTF-8 input as needed.
    pub fn as_base64(&self) -> String {
        match self {
            FileContent::Utf8(text) => {
                base64::engine::general_purpose::STANDARD.encode(text.as_bytes())
            }
            FileContent::Base64(data) => data.clone(),
        }
    }

    /// Content as UTF-8 text. Fails for base64 payloads that do not decode
    /// to valid UTF-8.
    pub fn as_utf8(&self) -> SandboxResult<String> {
        match self {
            FileContent::Utf8(text) => Ok(text.clone()),
            FileContent::Base64(data) => {
                let bytes = base64::engine::general_purpose::STANDARD
                    .decode(data)
                    .map_err(|e| {
                        SandboxError::file_operation_failed("invalid base64 content")
                            .with_source(e)
                    })?;
                String::from_utf8(bytes).map_err(|e| {
                    SandboxError::file_operation_failed("content is not valid UTF-8")
                        .with_source(e)
                })
            }
        }
    }

    pub fn byte_len(&self) -> usize {
        match self {
            FileContent::Utf8(text) => text.len(),
            // 4 base64 chars per 3 bytes, ignoring padding
            FileContent::Base64(data) => data.len() / 4 * 3,
        }
    }
}

/// A single file to write into a sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileWrite {
    pub path: String,
    pub content: FileContent,
}

/// Outcome of a single file operation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileOperationResult {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FileOperationResult {
    pub fn ok(path: impl Into<String>) -> Self {
        Self {
            success: true,
            path: Some(path.into()),
            error: None,
        }
    }

    pub fn failed(path: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            path: Some(path.into()),
            error: Some(error.into()),
        }
    }
}

/// Outcome of a batched file operation.
///
/// Backends expose no partial-write guarantee, so a failed batch reports the
/// same error for every entry and `success_count + error_count` always equals
/// `total_files`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchFileOperationResult {
    pub success: bool,
    pub total_files: usize,
    pub success_count: usize,
    pub error_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BatchFileOperationResult {
    pub fn all_succeeded(total_files: usize) -> Self {
        Self {
            success: true,
            total_files,
            success_count: total_files,
            error_count: 0,
            error: None,
        }
    }

    pub fn all_failed(total_files: usize, error: impl Into<String>) -> Self {
        Self {
            success: false,
            total_files,
            success_count: 0,
            error_count: total_files,
            error: Some(error.into()),
        }
    }
}

/// Best-effort termination outcome. Reported, never thrown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TerminationResult {
    pub success: bool,
    pub sandbox_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TerminationResult {
    pub fn ok(sandbox_id: impl Into<String>) -> Self {
        Self {
            success: true,
            sandbox_id: sandbox_id.into(),
            error: None,
        }
    }

    pub fn failed(sandbox_id: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            sandbox_id: sandbox_id.into(),
            error: Some(error.into()),
        }
    }
}

/// Options for a command execution.
#[derive(Debug, Clone, Default)]
pub struct ExecuteOptions {
    pub cwd: Option<String>,
    pub env: HashMap<String, String>,
    pub timeout_ms: Option<u64>,
}

/// Options for attaching to an existing sandbox.
#[derive(Debug, Clone, Default)]
pub struct ConnectOptions {
    pub timeout_ms: Option<u64>,
}

/// Options for resuming a stopped sandbox.
#[derive(Debug, Clone, Default)]
pub struct ResumeOptions {
    pub timeout_ms: Option<u64>,
}

/// Options for terminating a sandbox.
#[derive(Debug, Clone, Default)]
pub struct TerminateOptions {
    pub force: bool,
}

/// Network endpoint for a port exposed inside a sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PreviewInfo {
    pub url: String,
    pub port: u16,
}
