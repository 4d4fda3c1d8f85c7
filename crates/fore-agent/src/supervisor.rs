//! Lifecycle owner for one external agent run: spawn, stream merged
//! output line-by-line, honor stop requests and the run ceiling, and
//! guarantee the whole process tree dies on every exit path.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use fore_types::config::AgentConfig;
use fore_types::error::ForemanError;

use crate::kill_tree;

/// Output line fragments matching these (case-insensitive) indicate the
/// agent's upstream quota is exhausted. Any match aborts the read loop
/// immediately — including a bare "429" in unrelated log text, which is
/// a deliberate policy choice carried over from the original behavior.
const RATE_LIMIT_SIGNATURES: &[&str] =
    &["rate limit", "429", "quota exceeded", "too many requests"];

/// Transient files the agent tool is known to leave behind in the
/// working directory. `nul` is an OS-reserved name on Windows and needs
/// the extended-path deletion form there.
const TRANSIENT_ARTIFACTS: &[&str] = &["nul", "NUL"];

const LINE_CHANNEL_CAPACITY: usize = 256;

pub struct ProcessSupervisor {
    agent: AgentConfig,
    stop: Arc<AtomicBool>,
    active_pid: Arc<Mutex<Option<u32>>>,
}

impl ProcessSupervisor {
    pub fn new(agent: AgentConfig) -> Self {
        Self {
            agent,
            stop: Arc::new(AtomicBool::new(false)),
            active_pid: Arc::new(Mutex::new(None)),
        }
    }

    /// Run one prompt against `workdir`, invoking `on_line` for each
    /// output line (stdout and stderr merged, original order) as it
    /// arrives. Returns the full transcript on success.
    pub async fn run(
        &self,
        prompt: &str,
        workdir: &Path,
        on_line: &mut (dyn FnMut(&str) + Send),
    ) -> Result<String, ForemanError> {
        self.stop.store(false, Ordering::SeqCst);
        clean_artifacts(workdir);

        let result = self.run_inner(prompt, workdir, on_line).await;

        *self.active_pid.lock().expect("pid lock") = None;
        clean_artifacts(workdir);
        result
    }

    async fn run_inner(
        &self,
        prompt: &str,
        workdir: &Path,
        on_line: &mut (dyn FnMut(&str) + Send),
    ) -> Result<String, ForemanError> {
        let mut cmd = build_command(&self.agent);
        cmd.current_dir(workdir)
            .stdin(std::process::Stdio::piped())
            .stdout(std::process::Stdio::piped())
            .stderr(std::process::Stdio::piped())
            .kill_on_drop(true);

        let mut child = cmd
            .spawn()
            .map_err(|e| ForemanError::Spawn(format!("{}: {e}", self.agent.command)))?;

        let pid = child
            .id()
            .ok_or_else(|| ForemanError::Spawn("child exited before pid was read".into()))?;
        *self.active_pid.lock().expect("pid lock") = Some(pid);
        info!(pid, workdir = %workdir.display(), "agent process started");

        // The prompt goes over stdin, never argv, to dodge platform
        // command-line length limits. Closing stdin signals end of input.
        if let Some(mut stdin) = child.stdin.take() {
            stdin.write_all(prompt.as_bytes()).await?;
            stdin.write_all(b"\n").await?;
            stdin.shutdown().await?;
        }

        let mut rx = merge_output_lines(&mut child);
        let mut transcript = String::new();

        while let Some(line) = rx.recv().await {
            // Stop flag is checked once per line; request_stop() also
            // kills the tree out-of-band so a silent child still dies.
            if self.stop.load(Ordering::SeqCst) {
                self.kill_active().await;
                return Err(ForemanError::Cancelled);
            }

            if let Some(signature) = match_rate_limit(&line) {
                warn!(line = %line, "rate-limit signature detected, aborting run");
                self.kill_active().await;
                return Err(ForemanError::RateLimit(signature.to_string()));
            }

            on_line(&line);
            transcript.push_str(&line);
            transcript.push('\n');
        }

        if self.stop.load(Ordering::SeqCst) {
            self.kill_active().await;
            return Err(ForemanError::Cancelled);
        }

        // Output has ended; the process gets the hard ceiling to exit.
        let ceiling = self.agent.run_timeout_secs;
        match tokio::time::timeout(Duration::from_secs(ceiling), child.wait()).await {
            Ok(Ok(status)) => {
                debug!(pid, ?status, "agent process exited");
                Ok(transcript)
            }
            Ok(Err(e)) => Err(ForemanError::Io(e)),
            Err(_) => {
                self.kill_active().await;
                Err(ForemanError::Timeout(ceiling))
            }
        }
    }

    /// Request cancellation of the in-flight run. Safe to call from any
    /// task or thread; takes effect within one output line and begins
    /// forced tree termination immediately if a process is live.
    pub fn request_stop(&self) {
        self.stop.store(true, Ordering::SeqCst);
        if let Some(pid) = *self.active_pid.lock().expect("pid lock") {
            info!(pid, "stop requested, terminating process tree");
            std::thread::spawn(move || kill_tree::terminate_tree(pid));
        }
    }

    /// Best-effort liveness probe: a version query with a short ceiling.
    /// Never errors.
    pub async fn is_ready(&self) -> bool {
        let mut cmd = build_version_command(&self.agent);
        let probe = tokio::time::timeout(
            Duration::from_secs(self.agent.ready_timeout_secs),
            cmd.output(),
        )
        .await;
        matches!(probe, Ok(Ok(out)) if out.status.success())
    }

    async fn kill_active(&self) {
        let pid = *self.active_pid.lock().expect("pid lock");
        if let Some(pid) = pid {
            let _ = tokio::task::spawn_blocking(move || kill_tree::terminate_tree(pid)).await;
        }
    }
}

/// Platform invocation shim: on Windows the agent CLI is typically a
/// `.cmd` shim that must go through `cmd /C`.
fn build_command(agent: &AgentConfig) -> Command {
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(&agent.command);
        c
    } else {
        Command::new(&agent.command)
    };
    cmd.args(&agent.args);
    #[cfg(unix)]
    {
        // Own process group so the fallback tree kill can signal -pid.
        cmd.process_group(0);
    }
    cmd
}

fn build_version_command(agent: &AgentConfig) -> Command {
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(&agent.command);
        c
    } else {
        Command::new(&agent.command)
    };
    cmd.arg("--version")
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null());
    cmd
}

/// Spawn one reader task per pipe, both feeding a single channel so the
/// consumer sees lines in arrival order with no batching.
fn merge_output_lines(child: &mut tokio::process::Child) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel::<String>(LINE_CHANNEL_CAPACITY);

    if let Some(stdout) = child.stdout.take() {
        let tx = tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tx.send(line).await.is_err() {
                    break;
                }
            }
        });
    }

    if let Some(stderr) = child.stderr.take() {
        let tx = tx.clone();
        tokio::spawn(async move {
            let mut lines = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                if tx.send(line).await.is_err() {
                    break;
                }
            }
        });
    }

    rx
}

fn match_rate_limit(line: &str) -> Option<&'static str> {
    let lower = line.to_lowercase();
    RATE_LIMIT_SIGNATURES
        .iter()
        .find(|sig| lower.contains(*sig))
        .copied()
}

/// Remove known transient artifacts from the working directory. Failures
/// are logged and swallowed — cleanup must never fail a run.
fn clean_artifacts(workdir: &Path) {
    for name in TRANSIENT_ARTIFACTS {
        let path = workdir.join(name);
        if !path.exists() {
            continue;
        }
        let removed = if cfg!(windows) {
            // Reserved device names need the extended-length form.
            std::fs::remove_file(format!(r"\\?\{}", path.display()))
                .or_else(|_| std::fs::remove_file(&path))
        } else {
            std::fs::remove_file(&path)
        };
        match removed {
            Ok(()) => debug!(artifact = %path.display(), "removed transient artifact"),
            Err(e) => warn!(artifact = %path.display(), "artifact cleanup failed: {e}"),
        }
    }
}
