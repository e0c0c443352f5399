//! Handler dispatch: sandboxed subprocesses and the in-process dev mode.
//!
//! A subprocess dispatch is one JSONL exchange: the daemon writes a single
//! [`HandlerRequest`] line to the child's stdin, closes the pipe, and reads
//! a single [`HandlerResponse`] line from stdout. When the handler exceeds
//! its wall-clock budget it first receives `SIGTERM`, is granted the
//! configured grace period to unwind, and is then killed; either way the
//! caller sees a `TIMEOUT` failure.
//!
//! In-process mode runs a registered native handler on a worker thread. A
//! thread cannot be force-killed, so the grace semantics are best-effort;
//! the mode is gated behind an explicit config opt-in.

use std::collections::HashMap;
use std::io::{BufRead, BufReader, Read, Write};
use std::sync::Arc;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use gantry_config::{ExecutionMode, ExecutionSettings, SocketEndpoint};
use gantry_plugins::{
    ContextSnapshot, ErrorCode, ExecutionContext, ExecutionFailure, ExecutionManifest,
};
use gantry_sandbox::process::Stdio;
use gantry_sandbox::{SandboxLauncher, SandboxPolicy, SandboxedChild, SandboxedCommand};

const DISPATCH_TARGET: &str = "gantryd::dispatch";

/// Granularity at which a child's exit status is polled.
const EXIT_POLL: Duration = Duration::from_millis(50);

/// Request line written to a handler's stdin.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandlerRequest {
    /// Serialisable view of the execution context.
    pub context: ContextSnapshot,
    /// Validated handler input.
    pub input: serde_json::Value,
    /// Endpoint the handler connects to for adapter calls.
    pub adapter_socket: String,
}

/// Response line expected on a handler's stdout.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HandlerResponse {
    /// `true` when the handler completed.
    pub ok: bool,
    /// Handler output on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Structured failure otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ExecutionFailure>,
}

/// Result of one handler dispatch.
pub type HandlerRun = Result<serde_json::Value, ExecutionFailure>;

/// Native handler run inside the daemon when in-process mode is enabled.
pub trait InProcessHandler: Send + Sync + 'static {
    /// Runs the handler to completion.
    fn run(&self, request: HandlerRequest) -> HandlerRun;
}

/// Dispatches handler executions according to the configured mode.
pub struct SandboxDispatcher {
    settings: ExecutionSettings,
    adapter_socket: String,
    socket_dir: Option<std::path::PathBuf>,
    in_process: HashMap<String, Arc<dyn InProcessHandler>>,
}

impl SandboxDispatcher {
    /// Creates a dispatcher for the given execution settings and adapter
    /// endpoint.
    #[must_use]
    pub fn new(settings: ExecutionSettings, endpoint: &SocketEndpoint) -> Self {
        let socket_dir = endpoint
            .unix_path()
            .and_then(|path| path.parent())
            .map(|parent| parent.as_std_path().to_path_buf());
        Self {
            settings,
            adapter_socket: endpoint.to_string(),
            socket_dir,
            in_process: HashMap::new(),
        }
    }

    /// Registers a native handler for in-process mode.
    #[must_use]
    pub fn register_in_process(
        mut self,
        plugin_id: impl Into<String>,
        handler: Arc<dyn InProcessHandler>,
    ) -> Self {
        let _ = self.in_process.insert(plugin_id.into(), handler);
        self
    }

    /// Runs one handler execution.
    ///
    /// # Errors
    ///
    /// Returns an [`ExecutionFailure`] when the handler times out, exits
    /// abnormally, produces malformed output, or reports a structured
    /// failure of its own.
    pub fn run(
        &self,
        context: &ExecutionContext,
        manifest: &ExecutionManifest,
        input: serde_json::Value,
    ) -> HandlerRun {
        match self.settings.mode {
            ExecutionMode::Subprocess => self.run_subprocess(context, manifest, input),
            ExecutionMode::InProcess => self.run_in_process(context, manifest, input),
        }
    }

    fn request(&self, context: &ExecutionContext, input: serde_json::Value) -> HandlerRequest {
        HandlerRequest {
            context: context.snapshot(),
            input,
            adapter_socket: self.adapter_socket.clone(),
        }
    }

    fn timeout_for(&self, manifest: &ExecutionManifest) -> Duration {
        Duration::from_millis(
            manifest
                .execution()
                .timeout_ms
                .unwrap_or(self.settings.timeout_ms),
        )
    }

    fn grace_for(&self, manifest: &ExecutionManifest) -> Duration {
        Duration::from_millis(
            manifest
                .execution()
                .grace_ms
                .unwrap_or(self.settings.grace_ms),
        )
    }

    fn build_policy(&self, manifest: &ExecutionManifest) -> SandboxPolicy {
        let permissions = manifest.permissions();
        let mut policy = SandboxPolicy::new()
            .allow_executable(manifest.executable())
            .memory_limit_mb(
                manifest
                    .execution()
                    .memory_mb
                    .unwrap_or(self.settings.memory_mb),
            );
        for path in &permissions.fs_read {
            policy = policy.allow_read_path(path);
        }
        for path in &permissions.fs_write {
            policy = policy.allow_read_write_path(path);
        }
        for path in &permissions.fs_deny {
            policy = policy.deny_path(path);
        }
        for key in &permissions.env_allow {
            policy = policy.allow_environment_variable(key.as_str());
        }
        if permissions.net_allow {
            policy = policy.allow_networking();
        }
        // The handler always needs the adapter socket, whatever its manifest
        // says about the filesystem.
        if let Some(dir) = &self.socket_dir {
            policy = policy.allow_read_write_path(dir);
        }
        policy
    }

    fn run_subprocess(
        &self,
        context: &ExecutionContext,
        manifest: &ExecutionManifest,
        input: serde_json::Value,
    ) -> HandlerRun {
        let plugin = manifest.plugin_id();
        let timeout = self.timeout_for(manifest);
        let grace = self.grace_for(manifest);
        let launcher = SandboxLauncher::new(self.build_policy(manifest));

        let mut command = SandboxedCommand::new(manifest.executable());
        command.args(manifest.args());
        command.stdin(Stdio::piped());
        command.stdout(Stdio::piped());
        command.stderr(Stdio::piped());

        debug!(
            target: DISPATCH_TARGET,
            plugin,
            executable = %manifest.executable().display(),
            timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            "spawning handler subprocess"
        );

        let mut child = launcher
            .spawn(command)
            .map_err(|error| internal(format!("sandbox spawn failed: {error}")))?;

        let Some(stdin) = child.stdin.take() else {
            reap(plugin, &mut child, Duration::ZERO);
            return Err(internal("failed to capture handler stdin"));
        };
        let Some(stdout) = child.stdout.take() else {
            reap(plugin, &mut child, Duration::ZERO);
            return Err(internal("failed to capture handler stdout"));
        };
        let stderr = child.stderr.take();

        if let Err(failure) = write_request(plugin, stdin, &self.request(context, input)) {
            reap(plugin, &mut child, Duration::ZERO);
            return Err(failure);
        }

        let (sender, receiver) = mpsc::channel();
        let reader = thread::spawn(move || {
            let mut line = String::new();
            let result = BufReader::new(stdout)
                .read_line(&mut line)
                .map(|bytes| (bytes, line));
            drop(sender.send(result));
        });

        let outcome = match receiver.recv_timeout(timeout) {
            Ok(Ok((0, _))) => Err(internal(format!(
                "handler '{plugin}' produced no output on stdout"
            ))),
            Ok(Ok((_, line))) => parse_response(plugin, &line),
            Ok(Err(error)) => Err(internal(format!(
                "failed to read handler '{plugin}' stdout: {error}"
            ))),
            Err(RecvTimeoutError::Timeout) => {
                terminate_with_grace(plugin, &mut child, grace);
                drain_stderr(plugin, stderr);
                drop(reader.join());
                return Err(timed_out(plugin, timeout, grace));
            }
            Err(RecvTimeoutError::Disconnected) => {
                Err(internal(format!("handler '{plugin}' output reader failed")))
            }
        };

        drain_stderr(plugin, stderr);
        reap(plugin, &mut child, grace);
        drop(reader.join());
        outcome
    }

    fn run_in_process(
        &self,
        context: &ExecutionContext,
        manifest: &ExecutionManifest,
        input: serde_json::Value,
    ) -> HandlerRun {
        let plugin = manifest.plugin_id();
        let handler = self.in_process.get(plugin).cloned().ok_or_else(|| {
            internal(format!("no in-process handler registered for '{plugin}'"))
        })?;
        let timeout = self.timeout_for(manifest);
        let grace = self.grace_for(manifest);
        let request = self.request(context, input);

        let (sender, receiver) = mpsc::channel();
        let _worker = thread::spawn(move || {
            drop(sender.send(handler.run(request)));
        });

        match receiver.recv_timeout(timeout + grace) {
            Ok(run) => run,
            // The worker thread cannot be killed; it is left to finish into a
            // disconnected channel.
            Err(RecvTimeoutError::Timeout) => Err(timed_out(plugin, timeout, grace)),
            Err(RecvTimeoutError::Disconnected) => Err(internal(format!(
                "in-process handler for '{plugin}' panicked"
            ))),
        }
    }
}

impl std::fmt::Debug for SandboxDispatcher {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter
            .debug_struct("SandboxDispatcher")
            .field("mode", &self.settings.mode)
            .field("adapter_socket", &self.adapter_socket)
            .field("in_process", &self.in_process.keys().collect::<Vec<_>>())
            .finish()
    }
}

fn internal(message: impl Into<String>) -> ExecutionFailure {
    ExecutionFailure::new(ErrorCode::Internal, message)
}

fn timed_out(plugin: &str, timeout: Duration, grace: Duration) -> ExecutionFailure {
    let budget = timeout + grace;
    ExecutionFailure::new(
        ErrorCode::Timeout,
        format!(
            "handler '{plugin}' exceeded its {} ms budget",
            u64::try_from(budget.as_millis()).unwrap_or(u64::MAX)
        ),
    )
}

/// Writes the serialised request to the handler's stdin and closes it.
fn write_request(
    plugin: &str,
    mut stdin: impl Write,
    request: &HandlerRequest,
) -> Result<(), ExecutionFailure> {
    let json = serde_json::to_string(request)
        .map_err(|error| internal(format!("failed to encode handler request: {error}")))?;
    stdin
        .write_all(json.as_bytes())
        .and_then(|()| stdin.write_all(b"\n"))
        .and_then(|()| stdin.flush())
        .map_err(|error| internal(format!("failed to write handler '{plugin}' stdin: {error}")))?;
    // Stdin drops here, closing the pipe to signal no more input.
    Ok(())
}

/// Parses a handler's JSONL response into the dispatch result.
fn parse_response(plugin: &str, line: &str) -> HandlerRun {
    let response: HandlerResponse = serde_json::from_str(line.trim())
        .map_err(|error| internal(format!("handler '{plugin}' produced invalid JSON: {error}")))?;
    match (response.ok, response.data, response.error) {
        (true, Some(data), None) => Ok(data),
        (true, None, None) => Ok(serde_json::Value::Null),
        (false, _, Some(error)) => Err(error),
        _ => Err(internal(format!(
            "handler '{plugin}' produced an inconsistent response envelope"
        ))),
    }
}

/// Drains stderr to avoid blocking the child on a full pipe buffer.
fn drain_stderr(plugin: &str, stderr: Option<impl Read>) {
    let Some(reader) = stderr else {
        return;
    };
    let mut buffer = String::new();
    if BufReader::new(reader).read_to_string(&mut buffer).is_ok() && !buffer.is_empty() {
        debug!(
            target: DISPATCH_TARGET,
            plugin,
            stderr = %buffer.trim(),
            "handler stderr output"
        );
    }
}

/// Waits for the child to exit, killing it when the budget runs out.
///
/// Called after the response line has already been read (or the dispatch
/// already failed), so the exit status can no longer change the outcome; a
/// non-zero status is logged, not returned.
fn reap(plugin: &str, child: &mut SandboxedChild, budget: Duration) {
    let start = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => {
                if !status.success() {
                    warn!(
                        target: DISPATCH_TARGET,
                        plugin,
                        ?status,
                        "handler exited with non-zero status"
                    );
                }
                return;
            }
            Ok(None) => {
                if start.elapsed() >= budget {
                    warn!(
                        target: DISPATCH_TARGET,
                        plugin,
                        "handler did not exit after responding; killing"
                    );
                    drop(child.kill());
                    drop(child.wait());
                    return;
                }
                thread::sleep(EXIT_POLL.min(budget));
            }
            Err(error) => {
                warn!(
                    target: DISPATCH_TARGET,
                    plugin,
                    error = %error,
                    "failed to poll handler exit status"
                );
                return;
            }
        }
    }
}

/// Sends `SIGTERM`, grants the grace period, then kills the child.
fn terminate_with_grace(plugin: &str, child: &mut SandboxedChild, grace: Duration) {
    warn!(
        target: DISPATCH_TARGET,
        plugin,
        grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
        "handler exceeded its budget; requesting termination"
    );
    send_sigterm(child);

    let start = Instant::now();
    while start.elapsed() < grace {
        if matches!(child.try_wait(), Ok(Some(_))) {
            return;
        }
        thread::sleep(EXIT_POLL.min(grace));
    }

    warn!(target: DISPATCH_TARGET, plugin, "handler ignored termination request; killing");
    drop(child.kill());
    drop(child.wait());
}

#[cfg(unix)]
fn send_sigterm(child: &SandboxedChild) {
    use nix::sys::signal::{Signal, kill};
    use nix::unistd::Pid;

    if let Ok(pid) = i32::try_from(child.id()) {
        drop(kill(Pid::from_raw(pid), Signal::SIGTERM));
    }
}

#[cfg(not(unix))]
fn send_sigterm(_child: &SandboxedChild) {}
