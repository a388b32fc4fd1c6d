//! Shared process runner

use crate::error::{HostError, Result};
use std::process::Stdio;
use tokio::process::Command;

/// Run a command to completion and return stdout
///
/// A non-zero exit becomes `CommandFailed` carrying the tool's stderr
/// unmodified (or the exit status when stderr is empty).
pub(crate) async fn run(mut cmd: Command, command_line: &str) -> Result<String> {
    cmd.stdout(Stdio::piped());
    cmd.stderr(Stdio::piped());
    cmd.stdin(Stdio::null());

    tracing::debug!(command = %command_line, "Running");

    let output = cmd.output().await.map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => HostError::ProgramNotFound {
            program: command_line.split_whitespace().next().unwrap_or(command_line).to_string(),
        },
        _ => HostError::Io(e),
    })?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
        let message = if stderr.is_empty() {
            format!("{} exited with {}", command_line, output.status)
        } else {
            stderr
        };
        return Err(HostError::CommandFailed {
            command: command_line.to_string(),
            message,
        });
    }

    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

/// Whether `program` resolves on PATH
pub async fn command_exists(program: &str) -> Result<bool> {
    let status = Command::new("sh")
        .arg("-c")
        .arg("command -v \"$1\" >/dev/null 2>&1")
        .arg("sh")
        .arg(program)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status()
        .await?;
    Ok(status.success())
}
