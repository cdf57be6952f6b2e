//! Backend: subprocess invocation of the external analysis tool.
//!
//! DESIGN
//! ======
//! One analysis is one child process. The composed prompt goes over stdin,
//! stdout/stderr are collected in full, and the whole exchange resolves at a
//! single point: the child exits, the deadline fires, or the invoker shuts
//! down. The child is spawned with `kill_on_drop`, so dropping the pending
//! future on timeout or shutdown terminates it.
//!
//! ERROR HANDLING
//! ==============
//! A non-zero exit is only fatal when stdout is empty. Stderr alone is
//! logged, never fatal. Timeout errors always contain the word "timeout",
//! which the orchestrator's retry classifier relies on.

pub mod config;
pub mod parse;
pub mod prompt;
pub mod types;

use std::process::{Output, Stdio};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Instant;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use config::InvokerConfig;
pub use types::AnalysisBackend;
use types::{AnalysisRequest, AnalysisResponse, BackendError, InvokerStatus};

const MAX_STDERR_CHARS: usize = 500;

// =============================================================================
// INVOKER
// =============================================================================

pub struct ProcessInvoker {
    config: InvokerConfig,
    initialized: AtomicBool,
    pending: AtomicUsize,
    /// Bumped on every shutdown; pending calls watch for the change.
    shutdown_tx: watch::Sender<u64>,
}

impl ProcessInvoker {
    #[must_use]
    pub fn new(config: InvokerConfig) -> Self {
        let (shutdown_tx, _) = watch::channel(0);
        Self { config, initialized: AtomicBool::new(false), pending: AtomicUsize::new(0), shutdown_tx }
    }

    async fn probe(&self) -> Result<String, BackendError> {
        let command = &self.config.command;
        let mut cmd = Command::new(command);
        cmd.args(&self.config.probe_args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let output = match tokio::time::timeout(self.config.probe_timeout, cmd.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => return Err(BackendError::ProbeFailed(format!("`{command}` is not runnable: {e}"))),
            Err(_) => {
                return Err(BackendError::ProbeFailed(format!(
                    "`{command}` probe did not finish within {}s",
                    self.config.probe_timeout.as_secs()
                )));
            }
        };

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(BackendError::ProbeFailed(format!(
                "`{command} {}` exited with {}: {}",
                self.config.probe_args.join(" "),
                output.status,
                truncate(stderr.trim(), MAX_STDERR_CHARS)
            )));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.lines().next().unwrap_or_default().trim().to_string())
    }

    async fn run(
        &self,
        request: &AnalysisRequest,
        mut shutdown: watch::Receiver<u64>,
    ) -> Result<AnalysisResponse, BackendError> {
        let prompt = prompt::build_prompt(request);
        let started = Instant::now();
        let timeout = self.config.timeout;

        debug!(
            command = %self.config.display_command(),
            prompt_len = prompt.len(),
            instrument = request.instrument_code.as_deref().unwrap_or("-"),
            "invoker: spawning backend"
        );

        let output = tokio::select! {
            result = tokio::time::timeout(timeout, run_process(&self.config, prompt.as_bytes())) => {
                if let Ok(output) = result {
                    output?
                } else {
                    warn!(timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX), "invoker: backend timed out; killed");
                    return Err(BackendError::Timeout { after: timeout });
                }
            }
            _ = shutdown.changed() => {
                info!("invoker: pending analysis cancelled by shutdown");
                return Err(BackendError::Cancelled);
            }
        };

        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        let mut response = interpret_output(&output)?;
        response.execution_time_ms = Some(elapsed_ms);
        debug!(elapsed_ms, "invoker: backend finished");
        Ok(response)
    }
}

#[async_trait::async_trait]
impl AnalysisBackend for ProcessInvoker {
    async fn initialize(&self) -> Result<(), BackendError> {
        match self.probe().await {
            Ok(version) => {
                self.initialized.store(true, Ordering::Release);
                info!(command = %self.config.command, %version, "invoker: backend available");
                Ok(())
            }
            Err(e) => {
                self.initialized.store(false, Ordering::Release);
                warn!(command = %self.config.command, error = %e, "invoker: probe failed");
                Err(e)
            }
        }
    }

    async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisResponse, BackendError> {
        if !self.initialized.load(Ordering::Acquire) {
            return Err(BackendError::NotInitialized);
        }
        if request.prompt.trim().is_empty() {
            return Err(BackendError::InvalidRequest("prompt is empty".into()));
        }

        let shutdown = self.shutdown_tx.subscribe();
        let _pending = PendingGuard::enter(&self.pending);
        self.run(request, shutdown).await
    }

    fn status(&self) -> InvokerStatus {
        InvokerStatus {
            initialized: self.initialized.load(Ordering::Acquire),
            pending_requests: self.pending.load(Ordering::Acquire),
        }
    }

    fn shutdown(&self) {
        self.initialized.store(false, Ordering::Release);
        self.shutdown_tx.send_modify(|generation| *generation += 1);
        info!(pending = self.pending.load(Ordering::Acquire), "invoker: shut down");
    }
}

// =============================================================================
// PROCESS
// =============================================================================

async fn run_process(config: &InvokerConfig, input: &[u8]) -> Result<Output, BackendError> {
    let mut child = Command::new(&config.command)
        .args(&config.args)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| BackendError::Spawn { command: config.command.clone(), reason: e.to_string() })?;

    let mut stdin = child
        .stdin
        .take()
        .ok_or_else(|| BackendError::Io("child stdin not captured".into()))?;

    // Stdin is fed while stdout drains; the child may fill its stdout pipe
    // before it has read all of its input.
    let write = async move {
        let result = stdin.write_all(input).await;
        drop(stdin);
        result
    };
    let (written, output) = tokio::join!(write, child.wait_with_output());
    let output = output.map_err(|e| BackendError::Io(e.to_string()))?;

    if let Err(e) = written {
        // EDGE: a child may exit without reading its input.
        debug!(error = %e, "invoker: prompt write incomplete");
    }
    Ok(output)
}

fn interpret_output(output: &Output) -> Result<AnalysisResponse, BackendError> {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let has_stdout = !stdout.trim().is_empty();

    if !stderr.trim().is_empty() {
        debug!(stderr_len = stderr.len(), "invoker: backend wrote to stderr");
    }

    if !output.status.success() {
        if !has_stdout {
            return Err(BackendError::ProcessFailed {
                status: output.status.code().unwrap_or(-1),
                stderr: truncate(stderr.trim(), MAX_STDERR_CHARS),
            });
        }
        warn!(status = %output.status, "invoker: non-zero exit with output; parsing anyway");
    }

    parse::parse_output(&stdout)
}

fn truncate(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let mut cut: String = text.chars().take(max_chars).collect();
    cut.push('…');
    cut
}

/// Counts a call as pending for as long as it lives.
struct PendingGuard<'a>(&'a AtomicUsize);

impl<'a> PendingGuard<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::AcqRel);
        Self(counter)
    }
}

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

// =============================================================================
// TEST HELPERS
// =============================================================================


#[cfg(test)]
#[path = "mod_test.rs"]
mod tests;
