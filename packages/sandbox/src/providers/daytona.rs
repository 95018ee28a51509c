// ABOUTME: Daytona adapter implementing the provider contract over the Daytona REST API
// ABOUTME: Holds Daytona's state vocabulary, including which states refuse resume

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

const DEFAULT_API_URL: &str = "https://app.daytona.io/api";
const DEFAULT_TIMEOUT_MS: u64 = 30_000;

/// Daytona states from which a start call is pointless or rejected.
///
/// This vocabulary is Daytona's, not the contract's; other adapters carry
/// their own list.
const UNRESUMABLE_STATES: &[&str] = &["destroyed", "destroying", "build_failed", "error"];

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateWorkspaceRequest<'a> {
    snapshot: &'a str,
    env: &'a HashMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    auto_stop_interval: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    cpu: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    memory: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    disk: Option<u32>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WorkspaceDetail {
    id: String,
    #[serde(default)]
    snapshot: String,
    state: String,
    created_at: Option<DateTime<Utc>>,
    updated_at: Option<DateTime<Utc>>,
    #[serde(default)]
    labels: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ExecuteResponse {
    result: String,
    #[serde(default)]
    stderr: String,
    exit_code: i64,
}

#[derive(Debug, Deserialize)]
struct PreviewLinkResponse {
    url: String,
}

#[derive(Debug, Deserialize)]
struct FileInfo {
    name: String,
}

/// Map Daytona's state vocabulary into the shared status enum.
fn map_state(state: &str) -> SandboxStatus {
    match state {
        "started" | "running" => SandboxStatus::Running,
        "stopped" => SandboxStatus::Stopped,
        "creating" | "starting" | "pulling_snapshot" => SandboxStatus::Creating,
        "destroyed" | "destroying" => SandboxStatus::Terminated,
        _ => SandboxStatus::Error,
    }
}

fn to_info(detail: WorkspaceDetail) -> SandboxInfo {
    SandboxInfo {
        id: detail.id,
        status: map_state(&detail.state),
        template: detail.snapshot,
        created_at: detail.created_at.unwrap_or_else(Utc::now),
        last_active_at: detail.updated_at,
        resources: None,
        metadata: detail.labels,
    }
}

#[derive(Debug)]
struct DaytonaClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
}

impl DaytonaClient {
    fn request(&self, method: reqwest::Method, path: &str) -> reqwest::RequestBuilder {
        self.http
            .request(method, format!("{}{}", self.base_url, path))
            .bearer_auth(&self.api_key)
    }
}

/// Daytona provider adapter.
#[derive(Debug)]
pub struct DaytonaProvider {
    client: Arc<DaytonaClient>,
}

impl DaytonaProvider {
    pub fn new(config: &ProviderConfig) -> SandboxResult<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|key| !key.is_empty())
            .ok_or_else(|| SandboxError::configuration("Daytona API key is required"))?;

        let timeout = Duration::from_millis(config.timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS));
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| SandboxError::configuration("failed to build HTTP client").with_source(e))?;

        Ok(Self {
            client: Arc::new(DaytonaClient {
                http,
                api_key,
                base_url: config
                    .api_url
                    .clone()
                    .unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            }),
        })
    }

    async fn fetch_detail(&self, id: &str) -> SandboxResult<WorkspaceDetail> {
        let response = self
            .client
            .request(reqwest::Method::GET, &format!("/sandbox/{}", id))
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

    fn handle(&self, id: String) -> Arc<dyn Sandbox> {
        Arc::new(DaytonaSandbox {
            id,
            client: self.client.clone(),
        })
    }
}

#[async_trait]
impl SandboxProvider for DaytonaProvider {
    fn kind(&self) -> ProviderKind {
        ProviderKind::Daytona
    }

    async fn initialize(&self) -> SandboxResult<()> {
        if !self.is_available().await {
            return Err(SandboxError::configuration(
                "Daytona API is not reachable with the configured credentials",
            ));
        }
        Ok(())
    }

    async fn create(&self, config: &SandboxConfig) -> SandboxResult<Arc<dyn Sandbox>> {
        let resources = config.resources.clone().unwrap_or_default();
        let body = CreateWorkspaceRequest {
            snapshot: &config.template,
            env: &config.env,
            auto_stop_interval: config.timeout_ms.map(|ms| ms / 60_000),
            cpu: resources.cpu_cores,
            memory: resources.memory_mb,
            disk: resources.disk_gb,
        };

        let response = self
            .client
            .request(reqwest::Method::POST, "/sandbox")
            .json(&body)
            .send()
            .await
            .map_err(|e| SandboxError::creation_failed("sandbox creation request failed").with_source(e))?;

        if !response.status().is_success() {
            let status = response.status();
            let detail = response.text().await.unwrap_or_default();
            return Err(SandboxError::creation_failed(format!(
                "Daytona rejected sandbox creation ({}): {}",
                status, detail
            )));
        }

        let detail: WorkspaceDetail = response.json().await.map_err(|e| {
            SandboxError::creation_failed("invalid creation response").with_source(e)
        })?;

        debug!(sandbox_id = %detail.id, snapshot = %detail.snapshot, "created Daytona sandbox");
        Ok(self.handle(detail.id))
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

        Ok(self.handle(detail.id))
    }

    async fn resume(&self, id: &str, _opts: &ResumeOptions) -> SandboxResult<Arc<dyn Sandbox>> {
        let detail = self.fetch_detail(id).await.map_err(|e| {
            SandboxError::connection_failed(format!("cannot resume sandbox {}", id))
                .with_sandbox_id(id)
                .with_source(e)
        })?;

        // Refuse Daytona's terminal states before issuing the start call.
        if UNRESUMABLE_STATES.contains(&detail.state.as_str()) {
            return Err(SandboxError::connection_failed(format!(
                "sandbox {} cannot be resumed from state '{}'",
                id, detail.state
            ))
            .with_sandbox_id(id));
        }

        self.client
            .request(reqwest::Method::POST, &format!("/sandbox/{}/start", id))
            .send()
            .await?
            .error_for_status()
            .map_err(|e| {
                SandboxError::connection_failed(format!("failed to resume sandbox {}", id))
                    .with_sandbox_id(id)
                    .with_source(e)
            })?;

        Ok(self.handle(detail.id))
    }

    async fn list(&self) -> SandboxResult<Vec<SandboxInfo>> {
        let response = self
            .client
            .request(reqwest::Method::GET, "/sandbox")
            .send()
            .await?
            .error_for_status()?;

        let details: Vec<WorkspaceDetail> = response.json().await.map_err(|e| {
            SandboxError::provider("invalid sandbox list response").with_source(e)
        })?;
        Ok(details.into_iter().map(to_info).collect())
    }

    async fn get_info(&self, id: &str) -> SandboxResult<SandboxInfo> {
        Ok(to_info(self.fetch_detail(id).await?))
    }

    async fn terminate(&self, id: &str, opts: &TerminateOptions) -> TerminationResult {
        if is_placeholder_id(id) {
            debug!(sandbox_id = id, "terminating placeholder sandbox, no remote call");
            return TerminationResult::ok(id);
        }

        let result = self
            .client
            .request(reqwest::Method::DELETE, &format!("/sandbox/{}", id))
            .query(&[("force", opts.force.to_string())])
            .send()
            .await;

        match result {
            Ok(response) if response.status().is_success() || response.status() == StatusCode::NOT_FOUND => {
                TerminationResult::ok(id)
            }
            Ok(response) => {
                let message = format!("Daytona returned {} during termination", response.status());
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
            .get(format!("{}/sandbox", self.client.base_url))
            .bearer_auth(&self.client.api_key)
            .timeout(Duration::from_secs(5))
            .send()
            .await;

        matches!(probe, Ok(response) if response.status().is_success())
    }
}

/// Handle to one Daytona sandbox. File and process operations go through
/// Daytona's toolbox API.
#[derive(Debug)]
pub struct DaytonaSandbox {
    id: String,
    client: Arc<DaytonaClient>,
}

impl DaytonaSandbox {
    fn toolbox_path(&self, suffix: &str) -> String {
        format!("/toolbox/{}{}", self.id, suffix)
    }
}

#[async_trait]
impl Sandbox for DaytonaSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    fn provider(&self) -> ProviderKind {
        ProviderKind::Daytona
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
            "env": opts.env,
            "timeout": opts.timeout_ms.map(|ms| ms / 1000),
        });

        let mut request = self
            .client
            .request(reqwest::Method::POST, &self.toolbox_path("/process/execute"))
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
                "Daytona rejected command ({}): {}",
                status, detail
            ))
            .with_sandbox_id(&self.id));
        }

        let exec: ExecuteResponse = response.json().await.map_err(|e| {
            SandboxError::command_failed("invalid command response")
                .with_sandbox_id(&self.id)
                .with_source(e)
        })?;

        Ok(CommandResult {
            stdout: exec.result,
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

        // One bulk-upload call per batch; Daytona takes base64 bodies.
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
            .request(reqwest::Method::POST, &self.toolbox_path("/files/bulk-upload"))
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
            .request(reqwest::Method::GET, &self.toolbox_path("/files/download"))
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
            .request(reqwest::Method::GET, &self.toolbox_path("/files"))
            .query(&[("path", path.as_str())])
            .send()
            .await?
            .error_for_status()
            .map_err(|e| {
                SandboxError::file_operation_failed(format!("failed to list {}", path))
                    .with_sandbox_id(&self.id)
                    .with_source(e)
            })?;

        let entries: Vec<FileInfo> = response.json().await.map_err(|e| {
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
            .request(reqwest::Method::DELETE, &self.toolbox_path("/files"))
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
            FileOperationResult::failed(path, format!("Daytona returned {}", response.status()))
        })
    }

    async fn file_exists(&self, path: &str) -> SandboxResult<bool> {
        let path = skiff_security::sanitize_file_path(path)
            .map_err(|e| SandboxError::from(e).with_sandbox_id(&self.id))?;

        let response = self
            .client
            .request(reqwest::Method::GET, &self.toolbox_path("/files/info"))
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
                "Daytona returned {} while checking {}",
                status, path
            ))
            .with_sandbox_id(&self.id)),
        }
    }

    async fn get_info(&self) -> SandboxResult<SandboxInfo> {
        let response = self
            .client
            .request(reqwest::Method::GET, &format!("/sandbox/{}", self.id))
            .send()
            .await?
            .error_for_status()?;
        let detail: WorkspaceDetail = response.json().await.map_err(|e| {
            SandboxError::provider("invalid sandbox detail response")
                .with_sandbox_id(&self.id)
                .with_source(e)
        })?;
        Ok(to_info(detail))
    }

    async fn keep_alive(&self) -> SandboxResult<()> {
        // Touching the workspace refreshes Daytona's auto-stop timer.
        self.get_info().await.map(|_| ())
    }

    async fn get_host(&self, port: u16) -> SandboxResult<String> {
        Ok(self.preview_info(port).await?.url)
    }

    async fn preview_info(&self, port: u16) -> SandboxResult<PreviewInfo> {
        let response = self
            .client
            .request(
                reqwest::Method::GET,
                &format!("/sandbox/{}/ports/{}/preview-url", self.id, port),
            )
            .send()
            .await;

        if let Ok(response) = response {
            if response.status().is_success() {
                if let Ok(link) = response.json::<PreviewLinkResponse>().await {
                    return Ok(PreviewInfo { url: link.url, port });
                }
            }
        }

        debug!(sandbox_id = %self.id, port, "preview API unavailable, using deterministic URL");
        Ok(PreviewInfo {
            url: format!("https://{}-{}.proxy.daytona.work", port, self.id),
            port,
        })
    }

    async fn terminate(&self, opts: &TerminateOptions) -> TerminationResult {
        let provider = DaytonaProvider {
            client: self.client.clone(),
        };
        provider.terminate(&self.id, opts).await
    }

    fn native_instance(&self) -> &dyn Any {
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider_config(api_key: Option<&str>) -> ProviderConfig {
        let mut config = ProviderConfig::new(ProviderKind::Daytona);
        config.api_key = api_key.map(|k| k.to_string());
        config
    }

    #[test]
    fn requires_api_key() {
        assert!(DaytonaProvider::new(&provider_config(None)).is_err());
        assert!(DaytonaProvider::new(&provider_config(Some("key"))).is_ok());
    }

    #[test]
    fn maps_backend_states() {
        assert_eq!(map_state("started"), SandboxStatus::Running);
        assert_eq!(map_state("stopped"), SandboxStatus::Stopped);
        assert_eq!(map_state("pulling_snapshot"), SandboxStatus::Creating);
        assert_eq!(map_state("destroyed"), SandboxStatus::Terminated);
        assert_eq!(map_state("build_failed"), SandboxStatus::Error);
    }

    #[test]
    fn terminal_states_refuse_resume() {
        for state in ["destroyed", "build_failed", "error", "destroying"] {
            assert!(UNRESUMABLE_STATES.contains(&state));
        }
        assert!(!UNRESUMABLE_STATES.contains(&"stopped"));
    }

    #[tokio::test]
    async fn placeholder_termination_is_local() {
        let provider = DaytonaProvider::new(&provider_config(Some("key"))).unwrap();
        let id = crate::types::placeholder_sandbox_id();

        let result = provider.terminate(&id, &TerminateOptions::default()).await;
        assert!(result.success);
    }
}
