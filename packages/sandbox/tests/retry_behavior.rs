// ABOUTME: Retry, batching, and readiness behavior against configurable sandbox doubles
// ABOUTME: Verifies attempt counts, batch chunking under failure, and health polling

use async_trait::async_trait;
use chrono::Utc;
use std::any::Any;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use skiff_sandbox::{
    check_sandbox_health, execute_command_with_retry, wait_for_sandbox_ready,
    write_files_with_retry, Backoff, BatchFileOperationResult, CommandResult, ExecuteOptions,
    FileContent, FileOperationResult, FileWrite, PreviewInfo, ProviderKind, RetryConfig, Sandbox,
    SandboxError, SandboxErrorKind, SandboxInfo, SandboxResult, SandboxStatus, TerminateOptions,
    TerminationResult,
};

fn fast_retry(max_retries: u32) -> RetryConfig {
    RetryConfig {
        max_retries,
        delay_ms: 1,
        backoff: Backoff::Linear,
        retryable_errors: None,
    }
}

/// Sandbox double with scriptable command and batch-write failures.
#[derive(Debug, Default)]
struct ScriptedSandbox {
    /// Commands fail while this counter is positive.
    command_failures_left: AtomicUsize,
    command_calls: AtomicUsize,
    /// Per-batch remaining failures, keyed by the first path in the batch.
    batch_failures_left: Mutex<HashMap<String, usize>>,
    /// First path of every write_files call, in order.
    batch_attempts: Mutex<Vec<(String, usize)>>,
    /// Health probes fail while this counter is positive.
    health_failures_left: AtomicUsize,
}

impl ScriptedSandbox {
    fn failing_commands(n: usize) -> Self {
        let sandbox = Self::default();
        sandbox.command_failures_left.store(n, Ordering::SeqCst);
        sandbox
    }

    fn failing_batch(first_path: &str, failures: usize) -> Self {
        let sandbox = Self::default();
        sandbox
            .batch_failures_left
            .lock()
            .unwrap()
            .insert(first_path.to_string(), failures);
        sandbox
    }
}

#[async_trait]
impl Sandbox for ScriptedSandbox {
    fn id(&self) -> &str {
        "sbx-scripted"
    }

    fn provider(&self) -> ProviderKind {
        ProviderKind::E2b
    }

    async fn execute_command(
        &self,
        command: &str,
        _opts: &ExecuteOptions,
    ) -> SandboxResult<CommandResult> {
        self.command_calls.fetch_add(1, Ordering::SeqCst);

        let health_pending = self.health_failures_left.load(Ordering::SeqCst);
        if command.starts_with("echo skiff-health-ok") && health_pending > 0 {
            self.health_failures_left.fetch_sub(1, Ordering::SeqCst);
            return Err(SandboxError::command_failed("not ready"));
        }

        let failures = self.command_failures_left.load(Ordering::SeqCst);
        if failures > 0 && !command.starts_with("echo skiff-health-ok") {
            self.command_failures_left.fetch_sub(1, Ordering::SeqCst);
            return Err(SandboxError::command_failed("transient backend error"));
        }

        Ok(CommandResult {
            stdout: command.strip_prefix("echo ").unwrap_or("").to_string(),
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
        let first = files.first().map(|f| f.path.clone()).unwrap_or_default();
        self.batch_attempts
            .lock()
            .unwrap()
            .push((first.clone(), files.len()));

        let mut failures = self.batch_failures_left.lock().unwrap();
        if let Some(remaining) = failures.get_mut(&first) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(SandboxError::file_operation_failed("batch write failed"));
            }
        }

        Ok(BatchFileOperationResult::all_succeeded(files.len()))
    }

    async fn read_file(&self, _path: &str) -> SandboxResult<FileContent> {
        Ok(FileContent::Utf8(String::new()))
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
            id: self.id().to_string(),
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
        Ok(format!("https://{}-sbx.mock.dev", port))
    }

    async fn preview_info(&self, port: u16) -> SandboxResult<PreviewInfo> {
        Ok(PreviewInfo {
            url: format!("https://{}-sbx.mock.dev", port),
            port,
        })
    }

    async fn terminate(&self, _opts: &TerminateOptions) -> TerminationResult {
        TerminationResult::ok(self.id())
    }

    fn native_instance(&self) -> &dyn Any {
        self
    }
}

fn make_files(count: usize) -> Vec<FileWrite> {
    (0..count)
        .map(|i| FileWrite {
            path: format!("file-{:02}", i),
            content: FileContent::Utf8(format!("contents {}", i)),
        })
        .collect()
}

#[tokio::test]
async fn command_retry_recovers_from_transient_failures() {
    let sandbox = ScriptedSandbox::failing_commands(2);

    let result = execute_command_with_retry(
        &sandbox,
        "echo ok",
        &ExecuteOptions::default(),
        Some(fast_retry(3)),
    )
    .await
    .unwrap();

    assert_eq!(result.stdout, "ok");
    assert_eq!(sandbox.command_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn command_retry_gives_up_after_budget() {
    let sandbox = ScriptedSandbox::failing_commands(10);

    let err = execute_command_with_retry(
        &sandbox,
        "echo ok",
        &ExecuteOptions::default(),
        Some(fast_retry(2)),
    )
    .await
    .unwrap_err();

    assert_eq!(err.kind(), SandboxErrorKind::CommandFailed);
    assert_eq!(sandbox.command_calls.load(Ordering::SeqCst), 3);
}

#[tokio::test]
async fn batch_write_chunks_and_retries_failed_batch() {
    // 25 files, batch size 10: batches start at file-00, file-10, file-20.
    // The middle batch fails twice before succeeding.
    let sandbox = ScriptedSandbox::failing_batch("file-10", 2);
    let files = make_files(25);

    let result = write_files_with_retry(&sandbox, &files, 10, Some(fast_retry(3)))
        .await
        .unwrap();

    assert!(result.success);
    assert_eq!(result.total_files, 25);
    assert_eq!(result.success_count, 25);
    assert_eq!(result.error_count, 0);

    let attempts = sandbox.batch_attempts.lock().unwrap();
    let sizes: Vec<usize> = {
        let mut seen = Vec::new();
        for (first, len) in attempts.iter() {
            if !seen.iter().any(|(f, _)| f == first) {
                seen.push((first.clone(), *len));
            }
        }
        seen.into_iter().map(|(_, len)| len).collect()
    };
    assert_eq!(sizes, vec![10, 10, 5]);

    let middle_attempts = attempts.iter().filter(|(first, _)| first == "file-10").count();
    assert_eq!(middle_attempts, 3);
    assert_eq!(attempts.len(), 5);
}

#[tokio::test]
async fn exhausted_batch_reports_uniform_failure_and_continues() {
    let sandbox = ScriptedSandbox::failing_batch("file-10", 10);
    let files = make_files(25);

    let result = write_files_with_retry(&sandbox, &files, 10, Some(fast_retry(1)))
        .await
        .unwrap();

    assert!(!result.success);
    assert_eq!(result.total_files, 25);
    assert_eq!(result.success_count, 15);
    assert_eq!(result.error_count, 10);
    assert_eq!(result.success_count + result.error_count, result.total_files);
    assert!(result.error.is_some());

    // The third batch still ran after the second was given up on.
    let attempts = sandbox.batch_attempts.lock().unwrap();
    assert!(attempts.iter().any(|(first, _)| first == "file-20"));
}

#[tokio::test]
async fn health_check_passes_on_echo_roundtrip() {
    let sandbox = ScriptedSandbox::default();
    assert!(check_sandbox_health(&sandbox).await);
}

#[tokio::test]
async fn health_check_fails_when_probe_errors() {
    let sandbox = ScriptedSandbox::default();
    sandbox.health_failures_left.store(1, Ordering::SeqCst);
    assert!(!check_sandbox_health(&sandbox).await);
}

#[tokio::test]
async fn wait_for_ready_polls_until_healthy() {
    let sandbox = ScriptedSandbox::default();
    sandbox.health_failures_left.store(2, Ordering::SeqCst);

    wait_for_sandbox_ready(
        &sandbox,
        Duration::from_secs(5),
        Duration::from_millis(10),
    )
    .await
    .unwrap();
}

#[tokio::test]
async fn wait_for_ready_times_out_with_sandbox_id() {
    let sandbox = ScriptedSandbox::default();
    sandbox.health_failures_left.store(usize::MAX, Ordering::SeqCst);

    let err = wait_for_sandbox_ready(
        &sandbox,
        Duration::from_millis(50),
        Duration::from_millis(10),
    )
    .await
    .unwrap_err();

    assert_eq!(err.kind(), SandboxErrorKind::Timeout);
    assert_eq!(err.sandbox_id(), Some("sbx-scripted"));
    assert!(err.to_string().contains("sbx-scripted"));
}
