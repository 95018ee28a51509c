// ABOUTME: Retry, backoff, batching, and readiness utilities for remote sandbox operations
// ABOUTME: Only operations that are safe to repeat should be wrapped here

use rand::Rng;
use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

use crate::error::{SandboxError, SandboxErrorKind, SandboxResult};
use crate::provider::Sandbox;
use crate::types::{BatchFileOperationResult, CommandResult, ExecuteOptions, FileWrite};

/// Default number of files per batch for batched writes.
pub const DEFAULT_BATCH_SIZE: usize = 10;

/// Upper bound on random jitter added to each backoff sleep.
const JITTER_MS: u64 = 1000;

/// Ceiling on any single backoff sleep, jitter included.
const MAX_DELAY_MS: u64 = 30_000;

/// Command used by the health probe. Side-effect free.
const HEALTH_PROBE_TOKEN: &str = "skiff-health-ok";

/// Backoff strategy between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    Linear,
    Exponential,
}

/// Policy for `retry_with_backoff`.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the initial attempt; the operation runs at most
    /// `max_retries + 1` times.
    pub max_retries: u32,
    /// Base delay in milliseconds.
    pub delay_ms: u64,
    pub backoff: Backoff,
    /// When set, only errors of these kinds are retried; any other kind is
    /// rethrown immediately. Absence means retry on any error.
    pub retryable_errors: Option<Vec<SandboxErrorKind>>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay_ms: 1000,
            backoff: Backoff::Exponential,
            retryable_errors: None,
        }
    }
}

impl RetryConfig {
    fn is_retryable(&self, error: &SandboxError) -> bool {
        match &self.retryable_errors {
            Some(kinds) => kinds.contains(&error.kind()),
            None => true,
        }
    }
}

/// Backoff floor in milliseconds after `failures` observed failures
/// (0-indexed): `delay * 2^i` for exponential, `delay * (i + 1)` for linear.
/// Jitter is added on top at sleep time; the whole sleep is capped at
/// `MAX_DELAY_MS`.
fn backoff_delay_ms(config: &RetryConfig, failures: u32) -> u64 {
    let base = match config.backoff {
        Backoff::Exponential => config
            .delay_ms
            .saturating_mul(1u64.checked_shl(failures).unwrap_or(u64::MAX)),
        Backoff::Linear => config.delay_ms.saturating_mul(failures as u64 + 1),
    };
    base.min(MAX_DELAY_MS)
}

/// Run `operation` with retries per `config`.
///
/// The operation is attempted at most `config.max_retries + 1` times. A
/// non-retryable error is rethrown immediately without consuming an attempt;
/// otherwise the last error observed is the one propagated.
pub async fn retry_with_backoff<T, F, Fut>(mut operation: F, config: &RetryConfig) -> SandboxResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SandboxResult<T>>,
{
    let mut failures = 0u32;

    loop {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if !config.is_retryable(&error) {
                    debug!(kind = %error.kind(), "error is not retryable, rethrowing");
                    return Err(error);
                }
                if failures >= config.max_retries {
                    return Err(error);
                }

                let floor = backoff_delay_ms(config, failures);
                let jitter = rand::thread_rng().gen_range(0..JITTER_MS);
                let sleep_ms = floor.saturating_add(jitter).min(MAX_DELAY_MS);

                warn!(
                    attempt = failures + 1,
                    max_retries = config.max_retries,
                    delay_ms = sleep_ms,
                    kind = %error.kind(),
                    "operation failed, retrying after backoff"
                );

                tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
                failures += 1;
            }
        }
    }
}

/// Execute a command with retries on COMMAND_FAILED and TIMEOUT.
///
/// Only use for commands that are safe to run more than once.
pub async fn execute_command_with_retry(
    sandbox: &dyn Sandbox,
    command: &str,
    opts: &ExecuteOptions,
    retry: Option<RetryConfig>,
) -> SandboxResult<CommandResult> {
    let config = retry.unwrap_or_else(|| RetryConfig {
        retryable_errors: Some(vec![
            SandboxErrorKind::CommandFailed,
            SandboxErrorKind::Timeout,
        ]),
        ..RetryConfig::default()
    });

    retry_with_backoff(|| sandbox.execute_command(command, opts), &config).await
}

/// Write files in fixed-size batches, retrying each batch independently.
///
/// Each batch is one remote call and is retried as a whole unit. Retrying is
/// only safe because rewriting the same paths with the same content is
/// idempotent; callers must not feed append-style writes through here. A
/// batch that exhausts its retries marks all of its files failed with the
/// same error; remaining batches still run.
pub async fn write_files_with_retry(
    sandbox: &dyn Sandbox,
    files: &[FileWrite],
    batch_size: usize,
    retry: Option<RetryConfig>,
) -> SandboxResult<BatchFileOperationResult> {
    let config = retry.unwrap_or_default();
    let batch_size = batch_size.max(1);

    let mut success_count = 0usize;
    let mut error_count = 0usize;
    let mut last_error: Option<String> = None;

    for batch in files.chunks(batch_size) {
        match retry_with_backoff(|| sandbox.write_files(batch), &config).await {
            Ok(result) => {
                success_count += result.success_count;
                error_count += result.error_count;
                if let Some(error) = result.error {
                    last_error = Some(error);
                }
            }
            Err(error) => {
                warn!(
                    sandbox_id = sandbox.id(),
                    batch_len = batch.len(),
                    %error,
                    "batch write failed after retries"
                );
                error_count += batch.len();
                last_error = Some(error.to_string());
            }
        }
    }

    Ok(BatchFileOperationResult {
        success: error_count == 0,
        total_files: files.len(),
        success_count,
        error_count,
        error: last_error,
    })
}

/// Run a benign echo in the sandbox and verify the expected output.
pub async fn check_sandbox_health(sandbox: &dyn Sandbox) -> bool {
    let opts = ExecuteOptions {
        timeout_ms: Some(5000),
        ..ExecuteOptions::default()
    };
    let command = format!("echo {}", HEALTH_PROBE_TOKEN);

    match sandbox.execute_command(&command, &opts).await {
        Ok(result) => result.exit_code == 0 && result.stdout.contains(HEALTH_PROBE_TOKEN),
        Err(error) => {
            debug!(sandbox_id = sandbox.id(), %error, "health probe failed");
            false
        }
    }
}

/// Poll the health check until the sandbox answers or `timeout` elapses.
pub async fn wait_for_sandbox_ready(
    sandbox: &dyn Sandbox,
    timeout: Duration,
    poll_interval: Duration,
) -> SandboxResult<()> {
    let deadline = tokio::time::Instant::now() + timeout;

    loop {
        if check_sandbox_health(sandbox).await {
            return Ok(());
        }
        if tokio::time::Instant::now() + poll_interval > deadline {
            return Err(SandboxError::timeout(format!(
                "sandbox {} not ready within {:?}",
                sandbox.id(),
                timeout
            ))
            .with_sandbox_id(sandbox.id()));
        }
        tokio::time::sleep(poll_interval).await;
    }
}
