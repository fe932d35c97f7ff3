// src/core/subprocess.rs

//! Runs external commands for the exec-family source drivers: piped stdio,
//! byte-framed stdout, line-framed stderr, deadline kill, exit reporting.

use crate::core::errors::GatherError;
use bytes::Bytes;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::process::Command;
use tracing::{debug, warn};

/// Upper bound on retained stderr lines; hostile children cannot balloon
/// memory through their error stream.
const MAX_STDERR_LINES: usize = 1000;

/// What to launch and how strictly to judge its exit.
#[derive(Debug, Clone)]
pub struct CommandSpec {
    pub program: String,
    pub args: Vec<String>,
    /// Extra environment for the duration of the spawn, e.g. an agent
    /// socket override.
    pub envs: Vec<(String, String)>,
    /// When set, a nonzero exit code fails the fetch. Otherwise EOF on
    /// stdout is normal completion regardless of the code.
    pub require_zero_exit: bool,
}

impl CommandSpec {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            require_zero_exit: true,
        }
    }

    /// A loggable one-line rendering of the command.
    pub fn signature(&self) -> String {
        let mut s = self.program.clone();
        for a in &self.args {
            s.push(' ');
            s.push_str(a);
        }
        s
    }
}

/// The collected result of one completed subprocess run.
#[derive(Debug)]
pub struct SubprocessOutput {
    pub stdout: Bytes,
    pub stderr_lines: Vec<String>,
    /// Present unless the process died to a signal.
    pub exit_code: Option<i32>,
    /// The terminating signal, when there was one.
    pub signal: Option<i32>,
}

/// Spawns the command and collects its output, bounded by `timeout`. On
/// deadline the child is killed and the fetch counts as an error.
pub async fn run_command(
    spec: &CommandSpec,
    timeout: Duration,
) -> Result<SubprocessOutput, GatherError> {
    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (k, v) in &spec.envs {
        command.env(k, v);
    }

    let mut child = command
        .spawn()
        .map_err(|e| GatherError::Subprocess(format!("spawn '{}' failed: {e}", spec.program)))?;

    let mut stdout = child
        .stdout
        .take()
        .ok_or_else(|| GatherError::Internal("child stdout not piped".into()))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| GatherError::Internal("child stderr not piped".into()))?;

    let collect = async {
        let mut out = Vec::new();
        let mut err_lines = Vec::new();
        let mut err_reader = BufReader::new(stderr).lines();

        let stdout_read = stdout.read_to_end(&mut out);
        let stderr_read = async {
            while let Ok(Some(line)) = err_reader.next_line().await {
                if err_lines.len() < MAX_STDERR_LINES {
                    err_lines.push(line);
                }
            }
        };
        let (read_res, _) = tokio::join!(stdout_read, stderr_read);
        read_res?;
        let status = child.wait().await?;
        Ok::<_, GatherError>((out, err_lines, status))
    };

    let (out, err_lines, status) = match tokio::time::timeout(timeout, collect).await {
        Ok(res) => res?,
        Err(_) => {
            // Deadline: kill the child; kill_on_drop backstops the reaper.
            warn!("Subprocess '{}' timed out, killing it.", spec.signature());
            return Err(GatherError::FetchTimeout(timeout.as_millis() as u64));
        }
    };

    let exit_code = status.code();
    #[cfg(unix)]
    let signal = {
        use std::os::unix::process::ExitStatusExt;
        status.signal()
    };
    #[cfg(not(unix))]
    let signal = None;

    for line in &err_lines {
        debug!("subprocess '{}' stderr: {}", spec.program, line);
    }

    if spec.require_zero_exit {
        match exit_code {
            Some(0) => {}
            Some(code) => return Err(GatherError::SubprocessExit(code)),
            None => {
                return Err(GatherError::Subprocess(format!(
                    "'{}' killed by signal {:?}",
                    spec.program, signal
                )));
            }
        }
    }

    Ok(SubprocessOutput {
        stdout: Bytes::from(out),
        stderr_lines: err_lines,
        exit_code,
        signal,
    })
}
