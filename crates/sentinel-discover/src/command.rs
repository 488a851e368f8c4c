//! Bounded execution of external collaborator tools.
//!
//! Every external probe (nmap, ping, arping, lldpcli, snmpget, getent) runs
//! as a child process under `tokio::process::Command` with `kill_on_drop`,
//! so a timed-out or cancelled probe never leaves a process behind.

use std::io::ErrorKind;
use std::process::{Output, Stdio};
use std::time::Duration;

use tokio::process::Command;

use crate::error::{DiscoverError, Result};

/// Run `program` with `args`, bounded by `limit`.
///
/// Returns the raw output regardless of exit status; callers decide what a
/// non-zero exit means for their tool.
pub async fn run_tool<S: AsRef<str>>(program: &str, args: &[S], limit: Duration) -> Result<Output> {
    let mut command = Command::new(program);
    command
        .args(args.iter().map(|a| a.as_ref()))
        .stdin(Stdio::null())
        .kill_on_drop(true);

    match tokio::time::timeout(limit, command.output()).await {
        Ok(Ok(output)) => Ok(output),
        Ok(Err(e)) if e.kind() == ErrorKind::NotFound => Err(DiscoverError::ToolNotFound {
            path: program.to_string(),
        }),
        Ok(Err(e)) => Err(DiscoverError::Io(e)),
        Err(_) => Err(DiscoverError::Timeout {
            operation: program.to_string(),
            elapsed: limit,
        }),
    }
}

/// Like [`run_tool`], but a non-zero exit is an error.
pub async fn run_checked<S: AsRef<str>>(program: &str, args: &[S], limit: Duration) -> Result<Output> {
    let output = run_tool(program, args, limit).await?;
    if !output.status.success() {
        return Err(DiscoverError::ToolFailed {
            tool: program.to_string(),
            code: output.status.code().unwrap_or(-1),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }
    Ok(output)
}
