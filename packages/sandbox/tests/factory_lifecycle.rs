// ABOUTME: End-to-end factory lifecycle tests against a recording provider double
// ABOUTME: Covers routing, config validation, placeholder termination, and registry admin

use async_trait::async_trait;
use chrono::Utc;
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use skiff_sandbox::{
    is_placeholder_id, placeholder_sandbox_id, BatchFileOperationResult, CommandResult,
    ConnectOptions, ExecuteOptions, FileContent, FileOperationResult, FileWrite, PreviewInfo,
    ProviderKind, ResumeOptions, Sandbox, SandboxConfig, SandboxError, SandboxErrorKind,
    SandboxFactory, SandboxInfo, SandboxProvider, SandboxResult, SandboxStatus, TerminateOptions,
    TerminationResult,
};

/// Sandbox double that answers echo commands and records activity.
#[derive(Debug)]
struct MockSandbox {
    id: String,
    commands: Mutex<Vec<String>>,
}

impl MockSandbox {
    fn new(id: &str) -> Self {
        Self {
            id: id.to_string(),
            commands: Mutex::new(Vec::new()),
        }
    }
}

#[async_trait]
impl Sandbox for MockSandbox {
    fn id(&self) -> &str {
        &self.id
    }

    fn provider(&self) -> ProviderKind {
        ProviderKind::E2b
    }

    async fn execute_command(
        &self,
        command: &str,
        _opts: &ExecuteOptions,
    ) -> SandboxResult<CommandResult> {
        self.commands.lock().unwrap().push(command.to_string());

        let stdout = command
            .strip_prefix("echo ")
            .unwrap_or_default()
            .to_string();
        Ok(CommandResult {
            stdout,
            stderr: String::new(),
            exit_code: 0,
            duration_ms: Some(1),
        })
    }

    async fn write_file(
        &self,
        path: &str,
        _content: &FileContent,
    ) -> SandboxResult<FileOperationResult> {
        Ok(FileOperationResult::ok(path))
    }

    async fn write_files(&self, files: &[FileWrite]) -> SandboxResult<BatchFileOperationResult> {
        Ok(BatchFileOperationResult::all_succeeded(files.len()))
    }

    async fn read_file(&self, _path: &str) -> SandboxResult<FileContent> {
        Ok(FileContent::Utf8("contents".to_string()))
    }

    async fn list_files(&self, _path: &str) -> SandboxResult<Vec<String>> {
        Ok(vec![])
    }

    async fn delete_file(&self, path: &str) -> SandboxResult<FileOperationResult> {
        Ok(FileOperationResult::ok(path))
    }

    async fn file_exists(&self, _path: &str) -> SandboxResult<bool> {
        Ok(true)
    }

    async fn get_info(&self) -> SandboxResult<SandboxInfo> {
        Ok(SandboxInfo {
            id: self.id.clone(),
            status: SandboxStatus::Running,
            template: "t1".to_string(),
            created_at: Utc::now(),
            last_active_at: None,
            resources: None,
            metadata: HashMap::new(),
        })
    }

    async fn keep_alive(&self) -> SandboxResult<()> {
        Ok(())
    }

    async fn get_host(&self, port: u16) -> SandboxResult<String> {
        Ok(format!("https://{}-{}.mock.dev", port, self.id))
    }

    async fn preview_info(&self, port: u16) -> SandboxResult<PreviewInfo> {
        Ok(PreviewInfo {
            url: format!("https://{}-{}.mock.dev", port, self.id),
            port,
        })
    }

    async fn terminate(&self, _opts: &TerminateOptions) -> TerminationResult {
        TerminationResult::ok(&self.id)
    }

    fn native_instance(&self) -> &dyn Any {
        self
    }
}

/// Provider double returning a fixed sandbox id and recording create calls.
#[derive(Debug)]
struct MockProvider {
    kind: ProviderKind,
    created: Mutex<Vec<SandboxConfig>>,
    terminated: Mutex<Vec<String>>,
    remote_calls: AtomicUsize,
}

impl MockProvider {
    fn new(kind: ProviderKind) -> Self {
        Self {
            kind,
            created: Mutex::new(Vec::new()),
            terminated: Mutex::new(Vec::new()),
            remote_calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl SandboxProvider for MockProvider {
    fn kind(&self) -> ProviderKind {
        self.kind
    }

    async fn initialize(&self) -> SandboxResult<()> {
        Ok(())
    }

    async fn create(&self, config: &SandboxConfig) -> SandboxResult<Arc<dyn Sandbox>> {
        self.created.lock().unwrap().push(config.clone());
        Ok(Arc::new(MockSandbox::new("sbx-mock-1")))
    }

    async fn connect(&self, id: &str, _opts: &ConnectOptions) -> SandboxResult<Arc<dyn Sandbox>> {
        Ok(Arc::new(MockSandbox::new(id)))
    }

    async fn resume(&self, id: &str, _opts: &ResumeOptions) -> SandboxResult<Arc<dyn Sandbox>> {
        if id == "destroyed-sandbox" {
            return Err(SandboxError::connection_failed(format!(
                "sandbox {} cannot be resumed",
                id
            )));
        }
        Ok(Arc::new(MockSandbox::new(id)))
    }

    async fn list(&self) -> SandboxResult<Vec<SandboxInfo>> {
        Ok(vec![])
    }

    async fn get_info(&self, id: &str) -> SandboxResult<SandboxInfo> {
        Err(SandboxError::provider(format!("sandbox {} not found", id)))
    }

    async fn terminate(&self, id: &str, _opts: &TerminateOptions) -> TerminationResult {
        if is_placeholder_id(id) {
            return TerminationResult::ok(id);
        }
        self.remote_calls.fetch_add(1, Ordering::SeqCst);
        self.terminated.lock().unwrap().push(id.to_string());
        TerminationResult::ok(id)
    }

    async fn is_available(&self) -> bool {
        true
    }
}

fn factory_with_mock() -> (Arc<MockProvider>, SandboxFactory) {
    let provider = Arc::new(MockProvider::new(ProviderKind::E2b));
    let factory =
        SandboxFactory::with_providers(ProviderKind::E2b, vec![provider.clone()]).unwrap();
    (provider, factory)
}

#[tokio::test]
async fn end_to_end_create_and_execute() {
    let (provider, factory) = factory_with_mock();

    let config = SandboxConfig::new("t1").with_timeout_ms(60_000);
    let sandbox = factory
        .create_sandbox(Some(ProviderKind::E2b), &config)
        .await
        .unwrap();

    assert_eq!(sandbox.id(), "sbx-mock-1");
    let created = provider.created.lock().unwrap();
    assert_eq!(created.len(), 1);
    assert_eq!(created[0].template, "t1");
    assert_eq!(created[0].timeout_ms, Some(60_000));
    drop(created);

    let result = sandbox
        .execute_command("echo ok", &ExecuteOptions::default())
        .await
        .unwrap();
    assert_eq!(result.stdout, "ok");
    assert_eq!(result.exit_code, 0);

    let termination = sandbox.terminate(&TerminateOptions::default()).await;
    assert!(termination.success);
    assert_eq!(termination.sandbox_id, "sbx-mock-1");
}

#[tokio::test]
async fn default_provider_is_used_when_none_requested() {
    let (provider, factory) = factory_with_mock();

    factory
        .create_sandbox(None, &SandboxConfig::new("t1"))
        .await
        .unwrap();
    assert_eq!(provider.created.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn unregistered_provider_fails_without_network() {
    let (provider, factory) = factory_with_mock();

    let err = factory
        .create_sandbox(Some(ProviderKind::Daytona), &SandboxConfig::new("t1"))
        .await
        .unwrap_err();

    assert_eq!(err.kind(), SandboxErrorKind::ConfigurationError);
    assert!(provider.created.lock().unwrap().is_empty());
}

#[tokio::test]
async fn invalid_sandbox_config_is_rejected_before_dispatch() {
    let (provider, factory) = factory_with_mock();

    let mut config = SandboxConfig::new("t1");
    config.timeout_ms = Some(0);

    let err = factory.create_sandbox(None, &config).await.unwrap_err();
    assert_eq!(err.kind(), SandboxErrorKind::ConfigurationError);
    assert!(provider.created.lock().unwrap().is_empty());
}

#[tokio::test]
async fn placeholder_termination_needs_no_remote_call() {
    let (provider, factory) = factory_with_mock();

    let id = placeholder_sandbox_id();
    let result = factory
        .terminate_sandbox(None, &id, &TerminateOptions::default())
        .await;

    assert!(result.success);
    assert_eq!(result.sandbox_id, id);
    assert_eq!(provider.remote_calls.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn terminate_through_unknown_provider_reports_instead_of_failing() {
    let (_provider, factory) = factory_with_mock();

    let result = factory
        .terminate_sandbox(
            Some(ProviderKind::Daytona),
            "sbx-1",
            &TerminateOptions::default(),
        )
        .await;

    assert!(!result.success);
    assert!(result.error.is_some());
}

#[tokio::test]
async fn unresumable_sandbox_is_rejected() {
    let (_provider, factory) = factory_with_mock();

    let err = factory
        .resume_sandbox(None, "destroyed-sandbox", &ResumeOptions::default())
        .await
        .unwrap_err();
    assert_eq!(err.kind(), SandboxErrorKind::ConnectionFailed);
}

#[tokio::test]
async fn removing_the_default_provider_fails() {
    let (_provider, factory) = factory_with_mock();

    let err = factory.remove_provider(ProviderKind::E2b).await.unwrap_err();
    assert_eq!(err.kind(), SandboxErrorKind::ConfigurationError);
}

#[tokio::test]
async fn default_can_move_to_another_registered_provider() {
    let e2b = Arc::new(MockProvider::new(ProviderKind::E2b));
    let daytona = Arc::new(MockProvider::new(ProviderKind::Daytona));
    let factory = SandboxFactory::with_providers(
        ProviderKind::E2b,
        vec![e2b.clone(), daytona.clone()],
    )
    .unwrap();

    factory
        .set_default_provider(ProviderKind::Daytona)
        .await
        .unwrap();
    assert_eq!(factory.default_provider().await, ProviderKind::Daytona);

    // The old default is now removable.
    factory.remove_provider(ProviderKind::E2b).await.unwrap();
    assert_eq!(
        factory.list_provider_kinds().await,
        vec![ProviderKind::Daytona]
    );

    factory
        .create_sandbox(None, &SandboxConfig::new("t1"))
        .await
        .unwrap();
    assert_eq!(daytona.created.lock().unwrap().len(), 1);
    assert!(e2b.created.lock().unwrap().is_empty());
}

#[tokio::test]
async fn set_default_requires_registered_provider() {
    let (_provider, factory) = factory_with_mock();

    let err = factory
        .set_default_provider(ProviderKind::Daytona)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), SandboxErrorKind::ConfigurationError);
}
