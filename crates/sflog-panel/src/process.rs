use serde_json::Value;
use std::io;
use std::process::Stdio;
use std::time::Instant;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

const MAX_STDERR_CHARS: usize = 400;

/// A complete command line, interpreted by the platform shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellCommand {
    line: String,
}

impl ShellCommand {
    pub fn new(line: impl Into<String>) -> Self {
        Self { line: line.into() }
    }

    pub fn line(&self) -> &str {
        &self.line
    }

    pub(crate) fn to_command(&self) -> Command {
        #[cfg(windows)]
        let mut command = {
            let mut command = Command::new("cmd");
            command.arg("/C").arg(&self.line);
            command
        };
        #[cfg(not(windows))]
        let mut command = {
            let mut command = Command::new("sh");
            command.arg("-c").arg(&self.line);
            command
        };
        command.stdin(Stdio::null()).kill_on_drop(true);
        command
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn `{command}`: {source}")]
    Spawn {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("failed waiting for `{command}`: {source}")]
    Wait {
        command: String,
        #[source]
        source: io::Error,
    },
    #[error("`{command}` {}", exit_detail(.code, .stderr))]
    Exit {
        command: String,
        code: Option<i32>,
        stderr: String,
    },
}

fn exit_detail(code: &Option<i32>, stderr: &str) -> String {
    let status = match code {
        Some(code) => format!("exited with code {code}"),
        None => "was terminated by a signal".to_string(),
    };
    if stderr.is_empty() {
        status
    } else {
        format!("{status}: {stderr}")
    }
}

#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Process(#[from] ProcessError),
    #[error("malformed output from `{command}`: {source}")]
    MalformedOutput {
        command: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Run `command` to completion and parse its stdout as one JSON document.
pub async fn run_json(command: &ShellCommand) -> Result<Value, RunError> {
    let started = Instant::now();
    let output = command
        .to_command()
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|source| ProcessError::Spawn {
            command: command.line().to_string(),
            source,
        })?;

    debug!(
        event = "command_finished",
        command = %command.line(),
        code = ?output.status.code(),
        elapsed_ms = started.elapsed().as_millis() as u64
    );

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let detail = if stderr.is_empty() {
            failure_message(&output.stdout).unwrap_or_default()
        } else {
            stderr
        };
        return Err(ProcessError::Exit {
            command: command.line().to_string(),
            code: output.status.code(),
            stderr: truncate_chars(detail, MAX_STDERR_CHARS),
        }
        .into());
    }

    serde_json::from_slice(&output.stdout).map_err(|source| RunError::MalformedOutput {
        command: command.line().to_string(),
        source,
    })
}

/// `--json` tools report failures on stdout as `{"status":1,"message":"..."}`.
fn failure_message(stdout: &[u8]) -> Option<String> {
    let value: Value = serde_json::from_slice(stdout).ok()?;
    value
        .get("message")
        .and_then(Value::as_str)
        .map(|message| message.trim().to_string())
}

pub(crate) fn truncate_chars(input: String, max: usize) -> String {
    if input.chars().count() <= max {
        return input;
    }
    let mut out: String = input.chars().take(max).collect();
    out.push('…');
    out
}
