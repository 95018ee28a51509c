// ABOUTME: E2B adapter implementing the provider contract over the E2B REST API
// ABOUTME: Maps E2B sandbox states and endpoints into the shared data model

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::config::{ProviderConfig, ProviderKind};
use crate::error::{SandboxError, SandboxResult};
use crate::provider::{Sandbox, SandboxProvider};
use crate::types::{
    is_placeholder_id, BatchFileOperationResult, CommandResult, ConnectOptions, ExecuteOptions,
    FileContent, FileOperationResult, FileWrite, PreviewInfo, ResumeOptions, SandboxConfig,
    SandboxInfo, SandboxStatus, TerminateOptions, TerminationResult,
};

const DEFAULT_API_URL: &str = "https://api.e2b.dev";
const DEFAULT_TIMEOUT_MS: u64 = 30_000;
/// Domain suffix for deterministic preview URLs: `{port}-{id}.e2b.dev`.
const PREVIEW_DOMAIN: &str = "e2b.dev";

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateSandboxRequest<'a> {
    template_id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    timeout_ms: Option<u64>,
    env_vars: &'a HashMap<String, String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct SandboxDetail {
    sandbox_id: String,
    template_id: String,
    state: String,
    started_at: Option<DateTime<Utc>>,
    last_active_at: Option<DateTime<Utc>>,
    #[serde(default)]
    metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecResponse {
    stdout: String,
    stderr: String,
    exit_code: i64,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HostResponse {
    host: String,
}

#[derive(Debug, Deserialize)]
struct ListEntry {
    name: String,
}

/// Map E2B's state vocabulary into the shared status enum.
fn map_state(state: &str) -> SandboxStatus {
    match state {
        "running" => SandboxStatus::Running,
        "paused" => SandboxStatus::Stopped,
        "pending" | "creating" => SandboxStatus::Creating,
        "killed" | "destroyed" => SandboxStatus::Terminated,
        _ => SandboxStatus::Error,
    }
}

fn to_info(detail: SandboxDetail) -> SandboxInfo {
    SandboxInfo {
        id: detail.sandbox_id,
        status: map_state(&detail.state),
        template: detail.template_id,
        created_at: detail.started_at.unwrap_or_else(Utc::now),
        last_active_at: detail.last_active_at,
        resources: None,
        metadata: detail.metadata,
    }
}

/// Shared HTTP plumbing for the provider and its sandbox handles.
#[derive(Debug)]
struct E2bClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl E2bClient {
    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .header("X-API-Key", &self.api_key)
    }
}

/// E2B provider adapter.
#[derive(Debug)]
pub struct E2bProvider {
    client: Arc<E2bClient>,
}

impl E2bProvider {
    pub fn new(config: &ProviderConfig) -> SandboxResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| SandboxError::configuration("E2B API key is required"))?;

        let timeout = Duration::from_millis(config.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS));
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SandboxError::configuration("failed to build HTTP client").with_source(e))?;

        Ok(Self {
            client: Arc::new(E2bClient {
                http,
                api_key,
                base_url: config
                    .api_url
                    .clone()
                    .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            }),
        })
    }

    async fn fetch_detail(&self, id: &str) -> SandboxResult<SandboxDetail> {
        let response = self
            .client
            .request(reqwest::Method::GET, &format!("/sandboxes/{}", id))
            .send()
            .await?;

        if response.status() == StatusCode::NOT_FOUND {
            return Err(
                SandboxError::provider(format!("sandbox {} not found", id)).with_sandbox_id(id)
            );
        }
        let response = response.error_for_status()?;
        Ok(response.json().await?)
    }

    fn handle(&self, id: String, template: String) -> Arc<dyn Sandbox> {
        Arc::new(E2bSandbox {
            id,
            template,
            client: self.client.clone(),
        })
    }
}

#[async_trait]
impl SandboxProvider for E2bProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::E2b
    }

    async fn initialize(&self) -> SandboxResult<()> {
        if !self.is_available().await {
            return Err(SandboxError::configuration(
                "E2B API is not reachable with the configured credentials",
            ));
        }
        Ok(())
    }

    async fn create(&self, config: &SandboxConfig) -> SandboxResult<Arc<dyn Sandbox>> {
        let body = CreateSandboxRequest {
            template_id: &config.template,
            timeout_ms: config.timeout_ms,
            env_vars: &config.env,
        };

        let response = self
            .client
            .request(reqwest::Method::POST, "/sandboxes")
            .json(&body)
            .send()
            .await
            .map_err(|e| SandboxError::creation_failed("sandbox creation request failed").with_source(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(SandboxError::creation_failed(format!(
                "E2B rejected sandbox creation ({}): {}",
                status, detail
            )));
        }

        let detail: SandboxDetail = response.json().await.map_err(|e| {
            SandboxError::creation_failed("invalid creation response").with_source(e)
        })?;

        debug!(sandbox_id = %detail.sandbox_id, template = %detail.template_id, "created E2B sandbox");
        Ok(self.handle(detail.sandbox_id, detail.template_id))
    }

    async fn connect(&self, id: &str, _opts: &ConnectOptions) -> SandboxResult<Arc<dyn Sandbox>> {
        let detail = self.fetch_detail(id).await.map_err(|e| {
            SandboxError::connection_failed(format!("cannot connect to sandbox {}", id))
                .with_sandbox_id(id)
                .with_source(e)
        })?;

        if map_state(&detail.state) == SandboxStatus::Terminated {
            return Err(SandboxError::connection_failed(format!(
                "sandbox {} is terminated",
                id
            ))
            .with_sandbox_id(id));
        }

        Ok(self.handle(detail.sandbox_id, detail.template_id))
    }

    async fn resume(&self, id: &str, opts: &ResumeOptions) -> SandboxResult<Arc<dyn Sandbox>> {
        let detail = self.fetch_detail(id).await.map_err(|e| {
            SandboxError::connection_failed(format!("cannot resume sandbox {}", id))
                .with_sandbox_id(id)
                .with_source(e)
        })?;

        // Reject terminal states before issuing a resume call.
        let status = map_state(&detail.state);
        if !status.is_resumable() {
            return Err(SandboxError::connection_failed(format!(
                "sandbox {} is not resumable from state {} ({})",
                id, status, detail.state
            ))
            .with_sandbox_id(id));
        }

        let mut request = self
            .client
            .request(reqwest::Method::POST, &format!("/sandboxes/{}/resume", id));
        if let Some(timeout_ms) = opts.timeout_ms {
            request = request.json(&serde_json::json!({ "timeoutMs": timeout_ms }));
        }
        request
            .send()
            .await?
            .error_for_status()
            .map_err(|e| {
                SandboxError::connection_failed(format!("failed to resume sandbox {}", id))
                    .with_sandbox_id(id)
                    .with_source(e)
            })?;

        Ok(self.handle(detail.sandbox_id, detail.template_id))
    }

    async fn list(&self) -> SandboxResult<Vec<SandboxInfo>> {
        let response = self
            .client
            .request(reqwest::Method::GET, "/sandboxes")
            .send()
            .await?
            .error_for_status()?;

        let details: Vec<SandboxDetail> = response.json().await.map_err(|e| {
            SandboxError::provider("invalid sandbox list response").with_source(e)
        })?;
        Ok(details.into_iter().map(to_info).collect())
    }

    async fn get_info(&self, id: &str) -> SandboxResult<SandboxInfo> {
        Ok(to_info(self.fetch_detail(id).await?))
    }

    async fn terminate(&self, id: &str, _opts: &TerminateOptions) -> TerminationResult {
        // Placeholder ids were never created remotely; nothing to clean up.
        if is_placeholder_id(id) {
            debug!(sandbox_id = id, "terminating placeholder sandbox, no remote call");
            return TerminationResult::ok(id);
        }

        let result = self
            .client
            .request(reqwest::Method::DELETE, &format!("/sandboxes/{}", id))
            .send()
            .await;

        match result {
            // Already gone counts as terminated.
            Ok(response) if response.status().is_success() || response.status() == StatusCode::NOT_FOUND => {
                TerminationResult::ok(id)
            }
            Ok(response) => {
                let message = format!("E2B returned {} during termination", response.status());
                warn!(sandbox_id = id, %message, "termination failed");
                TerminationResult::failed(id, message)
            }
            Err(error) => {
                warn!(sandbox_id = id, %error, "termination request failed");
                TerminationResult::failed(id, error.to_string())
            }
        }
    }

    async fn is_available(&self) -> bool {
        let probe = self
            .client
            .http
            .get(format!("{}/sandboxes", self.client.base_url))
            .header("X-API-Key", &self.client.api_key)
            .timeout(Duration::from_secs(5))
            .send()
            .await;

        matches!(probe, Ok(response) if response.status().is_success())
    }
}

/// Handle to one E2B sandbox.
#[derive(Debug)]
pub struct E2bSandbox {
    id: String,
    template: String,
    client: Arc<E2bClient>,
}

impl E2bSandbox {
    /// Template the sandbox was created from. Reachable through
    /// `native_instance` for callers that need E2B-specific detail.
    pub fn template(&self) -> &str {
        &self.template
    }

    fn sandbox_path(&self, suffix: &str) -> String {
        format!("/sandboxes/{}{}", self.id, suffix)
    }
}

#[async_trait]
impl Sandbox for E2bSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    fn provider(&self) -> ProviderKind {
        ProviderKind::E2b
    }

    async fn execute_command(
        &self,
        command: &str,
        opts: &ExecuteOptions,
    ) -> SandboxResult<CommandResult> {
        skiff_security::validate_command(command)
            .map_err(|e| SandboxError::from(e).with_sandbox_id(&self.id))?;

        let body = serde_json::json!({
            "command": command,
            "cwd": opts.cwd,
            "envVars": opts.env,
            "timeoutMs": opts.timeout_ms,
        });

        let mut request = self
            .client
            .request(reqwest::Method::POST, &self.sandbox_path("/commands"))
            .json(&body);
        if let Some(timeout_ms) = opts.timeout_ms {
            request = request.timeout(Duration::from_millis(timeout_ms));
        }

        let started = Instant::now();
        let response = request.send().await.map_err(|e| {
            let err = if e.is_timeout() {
                SandboxError::timeout(format!("command timed out: {}", command))
            } else {
                SandboxError::command_failed(format!("command dispatch failed: {}", command))
            };
            err.with_sandbox_id(&self.id).with_source(e)
        })?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(SandboxError::command_failed(format!(
                "E2B rejected command ({}): {}",
                status, detail
            ))
            .with_sandbox_id(&self.id));
        }

        let exec: ExecResponse = response.json().await.map_err(|e| {
            SandboxError::command_failed("invalid command response")
                .with_sandbox_id(&self.id)
                .with_source(e)
        })?;

        Ok(CommandResult {
            stdout: exec.stdout,
            stderr: exec.stderr,
            exit_code: exec.exit_code,
            duration_ms: Some(started.elapsed().as_millis() as u64),
        })
    }

    async fn write_file(
        &self,
        path: &str,
        content: &FileContent,
    ) -> SandboxResult<FileOperationResult> {
        let batch = [FileWrite {
            path: path.to_string(),
            content: content.clone(),
        }];
        let result = self.write_files(&batch).await?;

        Ok(if result.success {
            FileOperationResult::ok(path)
        } else {
            FileOperationResult::failed(path, result.error.unwrap_or_default())
        })
    }

    async fn write_files(&self, files: &[FileWrite]) -> SandboxResult<BatchFileOperationResult> {
        if files.is_empty() {
            return Ok(BatchFileOperationResult::all_succeeded(0));
        }

        // Single remote call per batch; E2B transfers file bodies as base64.
        let mut entries = Vec::with_capacity(files.len());
        for file in files {
            let path = skiff_security::sanitize_file_path(&file.path)
                .map_err(|e| SandboxError::from(e).with_sandbox_id(&self.id))?;
            entries.push(serde_json::json!({
                "path": path,
                "content": file.content.as_base64(),
            }));
        }

        self.client
            .request(reqwest::Method::POST, &self.sandbox_path("/files"))
            .json(&serde_json::json!({ "files": entries }))
            .send()
            .await
            .map_err(|e| {
                SandboxError::file_operation_failed("batch file write failed")
                    .with_sandbox_id(&self.id)
                    .with_source(e)
            })?
            .error_for_status()
            .map_err(|e| {
                SandboxError::file_operation_failed("batch file write rejected")
                    .with_sandbox_id(&self.id)
                    .with_source(e)
            })?;

        Ok(BatchFileOperationResult::all_succeeded(files.len()))
    }

    async fn read_file(&self, path: &str) -> SandboxResult<FileContent> {
        let path = skiff_security::sanitize_file_path(path)
            .map_err(|e| SandboxError::from(e).with_sandbox_id(&self.id))?;

        let response = self
            .client
            .request(reqwest::Method::GET, &self.sandbox_path("/files"))
            .query(&[("path", path.as_str())])
            .send()
            .await
            .map_err(|e| {
                SandboxError::file_operation_failed(format!("failed to read {}", path))
                    .with_sandbox_id(&self.id)
                    .with_source(e)
            })?
            .error_for_status()
            .map_err(|e| {
                SandboxError::file_operation_failed(format!("failed to read {}", path))
                    .with_sandbox_id(&self.id)
                    .with_source(e)
            })?;

        Ok(FileContent::Utf8(response.text().await.map_err(|e| {
            SandboxError::file_operation_failed(format!("failed to read {}", path))
                .with_sandbox_id(&self.id)
                .with_source(e)
        })?))
    }

    async fn list_files(&self, path: &str) -> SandboxResult<Vec<String>> {
        let path = skiff_security::sanitize_file_path(path)
            .map_err(|e| SandboxError::from(e).with_sandbox_id(&self.id))?;

        let response = self
            .client
            .request(reqwest::Method::GET, &self.sandbox_path("/files/list"))
            .query(&[("path", path.as_str())])
            .send()
            .await?
            .error_for_status()
            .map_err(|e| {
                SandboxError::file_operation_failed(format!("failed to list {}", path))
                    .with_sandbox_id(&self.id)
                    .with_source(e)
            })?;

        let entries: Vec<ListEntry> = response.json().await.map_err(|e| {
            SandboxError::file_operation_failed("invalid file list response")
                .with_sandbox_id(&self.id)
                .with_source(e)
        })?;
        Ok(entries.into_iter().map(|entry| entry.name).collect())
    }

    async fn delete_file(&self, path: &str) -> SandboxResult<FileOperationResult> {
        let path = skiff_security::sanitize_file_path(path)
            .map_err(|e| SandboxError::from(e).with_sandbox_id(&self.id))?;

        let response = self
            .client
            .request(reqwest::Method::DELETE, &self.sandbox_path("/files"))
            .query(&[("path", path.as_str())])
            .send()
            .await
            .map_err(|e| {
                SandboxError::file_operation_failed(format!("failed to delete {}", path))
                    .with_sandbox_id(&self.id)
                    .with_source(e)
            })?;

        Ok(if response.status().is_success() {
            FileOperationResult::ok(path)
        } else {
            FileOperationResult::failed(path, format!("E2B returned {}", response.status()))
        })
    }

    async fn file_exists(&self, path: &str) -> SandboxResult<bool> {
        let path = skiff_security::sanitize_file_path(path)
            .map_err(|e| SandboxError::from(e).with_sandbox_id(&self.id))?;

        let response = self
            .client
            .request(reqwest::Method::GET, &self.sandbox_path("/files/stat"))
            .query(&[("path", path.as_str())])
            .send()
            .await
            .map_err(|e| {
                SandboxError::file_operation_failed(format!("failed to stat {}", path))
                    .with_sandbox_id(&self.id)
                    .with_source(e)
            })?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(SandboxError::file_operation_failed(format!(
                "E2B returned {} while checking {}",
                status, path
            ))
            .with_sandbox_id(&self.id)),
        }
    }

    async fn get_info(&self) -> SandboxResult<SandboxInfo> {
        let response = self
            .client
            .request(reqwest::Method::GET, &self.sandbox_path(""))
            .send()
            .await?
            .error_for_status()?;
        let detail: SandboxDetail = response.json().await.map_err(|e| {
            SandboxError::provider("invalid sandbox detail response")
                .with_sandbox_id(&self.id)
                .with_source(e)
        })?;
        Ok(to_info(detail))
    }

    async fn keep_alive(&self) -> SandboxResult<()> {
        self.client
            .request(reqwest::Method::POST, &self.sandbox_path("/timeout"))
            .json(&serde_json::json!({ "timeoutMs": DEFAULT_TIMEOUT_MS }))
            .send()
            .await?
            .error_for_status()
            .map_err(|e| {
                SandboxError::provider("keep-alive failed")
                    .with_sandbox_id(&self.id)
                    .with_source(e)
            })?;
        Ok(())
    }

    async fn get_host(&self, port: u16) -> SandboxResult<String> {
        Ok(self.preview_info(port).await?.url)
    }

    async fn preview_info(&self, port: u16) -> SandboxResult<PreviewInfo> {
        let response = self
            .client
            .request(reqwest::Method::GET, &self.sandbox_path("/host"))
            .query(&[("port", port.to_string())])
            .send()
            .await;

        if let Ok(response) = response {
            if response.status().is_success() {
                if let Ok(host) = response.json::<HostResponse>().await {
                    return Ok(PreviewInfo {
                        url: format!("https://{}", host.host),
                        port,
                    });
                }
            }
        }

        // Preview API unavailable: fall back to the deterministic host format.
        debug!(sandbox_id = %self.id, port, "preview API unavailable, using deterministic URL");
        Ok(PreviewInfo {
            url: format!("https://{}-{}.{}", port, self.id, PREVIEW_DOMAIN),
            port,
        })
    }

    async fn terminate(&self, opts: &TerminateOptions) -> TerminationResult {
        let provider = E2bProvider {
            client: self.client.clone(),
        };
        provider.terminate(&self.id, opts).await
    }

    fn native_instance(&self) -> &dyn Any {
        self
    }
}
