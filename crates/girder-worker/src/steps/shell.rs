//! Shell execution step.
//!
//! Runs the task's script with `sh` inside the workspace, captures
//! combined output for the console log, and enforces an optional
//! wall-clock timeout: SIGTERM first, SIGKILL after a grace window. A
//! timeout is recorded as an ordinary failure.

use async_trait::async_trait;
use girder_config::WorkerConfig;
use girder_core::{Capability, CapabilitySet, Result, TaskRecord};
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::process::{Child, Command};
use tracing::{debug, warn};

use crate::leaf::{StepOutcome, StepRunner};
use crate::worker::WorkerContext;

const KILL_GRACE: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct ShellParams {
    script: String,
    #[serde(default)]
    working_directory: Option<String>,
    /// Wall-clock limit in seconds.
    #[serde(default)]
    timeout: Option<u64>,
}

pub struct ExecuteShell;

#[async_trait]
impl StepRunner for ExecuteShell {
    fn kind_capabilities(&self, config: &WorkerConfig) -> CapabilitySet {
        let mut capabilities: CapabilitySet =
            [Capability::EXECUTE_SHELL_V1].into_iter().collect();
        for label in &config.labels {
            capabilities.insert(Capability::node_label(label));
        }
        capabilities
    }

    async fn execute(
        &self,
        _ctx: &WorkerContext,
        record: &mut TaskRecord,
        workspace: &Path,
    ) -> StepOutcome {
        let params: ShellParams = match serde_json::from_value(record.params.clone()) {
            Ok(params) => params,
            Err(err) => {
                return StepOutcome::failure(format!("invalid shell params: {err}"), String::new());
            }
        };

        let working_dir = match &params.working_directory {
            Some(sub) => workspace.join(sub),
            None => workspace.to_owned(),
        };

        let script = match write_script(&params.script) {
            Ok(script) => script,
            Err(err) => {
                return StepOutcome::failure(format!("could not stage script: {err}"), String::new());
            }
        };

        match run_script(script.path(), &working_dir, params.timeout).await {
            Ok(run) => {
                let console = run.output;
                if run.timed_out {
                    StepOutcome::failure("script exceeded its timeout", console)
                } else if run.success {
                    StepOutcome::success(console)
                } else {
                    StepOutcome::failure("executed script reported failure", console)
                }
            }
            Err(err) => StepOutcome::failure(format!("could not run script: {err}"), String::new()),
        }
    }
}

fn write_script(script: &str) -> Result<tempfile::NamedTempFile> {
    use std::io::Write;
    let mut file = tempfile::NamedTempFile::new()?;
    file.write_all(script.as_bytes())?;
    file.flush()?;
    Ok(file)
}

struct ScriptRun {
    success: bool,
    timed_out: bool,
    output: String,
}

async fn run_script(script: &Path, working_dir: &Path, timeout: Option<u64>) -> Result<ScriptRun> {
    let mut child = Command::new("sh")
        .arg(script)
        .current_dir(working_dir)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()?;

    // Drain both pipes off-task so a chatty script can never fill a
    // pipe and deadlock against wait().
    let stdout = child.stdout.take();
    let stderr = child.stderr.take();
    let stdout_reader = tokio::spawn(read_all(stdout));
    let stderr_reader = tokio::spawn(read_all(stderr));

    let (status, timed_out) = match timeout {
        Some(secs) => {
            match tokio::time::timeout(Duration::from_secs(secs), child.wait()).await {
                Ok(status) => (status?, false),
                Err(_) => (terminate(&mut child).await?, true),
            }
        }
        None => (child.wait().await?, false),
    };

    let mut output = stdout_reader.await.unwrap_or_default();
    output.push_str(&stderr_reader.await.unwrap_or_default());
    Ok(ScriptRun {
        success: status.success(),
        timed_out,
        output,
    })
}

async fn read_all(pipe: Option<impl tokio::io::AsyncRead + Unpin>) -> String {
    let mut buffer = Vec::new();
    if let Some(mut pipe) = pipe {
        let _ = pipe.read_to_end(&mut buffer).await;
    }
    String::from_utf8_lossy(&buffer).into_owned()
}

/// Soft-terminate the child, then hard-kill after the grace window.
async fn terminate(child: &mut Child) -> Result<std::process::ExitStatus> {
    if let Some(pid) = child.id() {
        debug!(pid, "script timed out, sending SIGTERM");
        if let Err(err) = signal::kill(Pid::from_raw(pid as i32), Signal::SIGTERM) {
            warn!(pid, error = %err, "SIGTERM failed");
        }
    }
    match tokio::time::timeout(KILL_GRACE, child.wait()).await {
        Ok(status) => Ok(status?),
        Err(_) => {
            child.kill().await?;
            Ok(child.wait().await?)
        }
    }
}
