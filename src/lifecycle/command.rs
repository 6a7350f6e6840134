//! External command execution.
//!
//! The standard pattern for a lifecycle shell-out: start the process,
//! attach a reader to each pipe, drain both to EOF emitting one log record
//! per non-empty line (stdout → INFO, stderr → WARN), and turn the exit
//! status into the operation result. A cancelled command is killed and
//! leaves one final ERROR line in the stream.

use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use pan_bagnat_common::error::Error;

use super::logger::LogSink;

#[derive(Debug, Clone)]
pub struct ShellCommand {
    program: String,
    args: Vec<String>,
    cwd: Option<PathBuf>,
    envs: Vec<(String, String)>,
}

impl ShellCommand {
    pub fn new(program: &str) -> Self {
        Self {
            program: program.to_string(),
            args: Vec::new(),
            cwd: None,
            envs: Vec::new(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.cwd = Some(dir.into());
        self
    }

    pub fn env(mut self, key: &str, value: &str) -> Self {
        self.envs.push((key.to_string(), value.to_string()));
        self
    }

    /// Human-readable form for logs and errors.
    pub fn display(&self) -> String {
        let mut parts = vec![self.program.clone()];
        parts.extend(self.args.iter().cloned());
        parts.join(" ")
    }

    fn build(&self) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);
        if let Some(dir) = &self.cwd {
            cmd.current_dir(dir);
        }
        for (key, value) in &self.envs {
            cmd.env(key, value);
        }
        cmd
    }
}

#[derive(Debug)]
pub struct CommandResult {
    pub code: i32,
    pub stdout: Vec<String>,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

#[derive(Debug)]
pub struct Captured {
    pub code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl Captured {
    pub fn success(&self) -> bool {
        self.code == 0
    }

    pub fn stdout_trimmed(&self) -> String {
        self.stdout.trim().to_string()
    }
}

fn spawn_line_reader<R>(
    pipe: Option<R>,
    sink: Arc<dyn LogSink>,
    warn_level: bool,
) -> tokio::task::JoinHandle<Vec<String>>
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut collected = Vec::new();
        let Some(pipe) = pipe else {
            return collected;
        };
        let mut lines = BufReader::new(pipe).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if line.trim().is_empty() {
                continue;
            }
            if warn_level {
                sink.warn(&line).await;
            } else {
                sink.info(&line).await;
            }
            collected.push(line);
        }
        collected
    })
}

/// Run a command, streaming its output into `sink`. Returns the exit code
/// and the collected stdout lines; spawn failures and cancellation are
/// errors.
pub async fn run_streamed(
    cmd: &ShellCommand,
    sink: Arc<dyn LogSink>,
    cancel: Option<CancellationToken>,
) -> Result<CommandResult, Error> {
    let mut child = cmd
        .build()
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| Error::Internal(format!("failed to spawn `{}`: {e}", cmd.display())))?;

    let out_task = spawn_line_reader(child.stdout.take(), sink.clone(), false);
    let err_task = spawn_line_reader(child.stderr.take(), sink.clone(), true);

    let status = match cancel {
        Some(cancel) => {
            tokio::select! {
                status = child.wait() => status,
                _ = cancel.cancelled() => {
                    let _ = child.kill().await;
                    let _ = child.wait().await;
                    sink.error(&format!("`{}` cancelled", cmd.display())).await;
                    let _ = out_task.await;
                    let _ = err_task.await;
                    return Err(Error::CommandFailed {
                        command: cmd.display(),
                        code: -1,
                        output: "cancelled".to_string(),
                    });
                }
            }
        }
        None => child.wait().await,
    }
    .map_err(Error::Io)?;

    let stdout = out_task.await.unwrap_or_default();
    let _ = err_task.await;

    Ok(CommandResult {
        code: status.code().unwrap_or(-1),
        stdout,
    })
}

/// Run a command, streaming output, and fail with `CommandFailed` on a
/// non-zero exit.
pub async fn run_checked(
    cmd: &ShellCommand,
    sink: Arc<dyn LogSink>,
    cancel: Option<CancellationToken>,
) -> Result<CommandResult, Error> {
    let result = run_streamed(cmd, sink, cancel).await?;
    if !result.success() {
        return Err(Error::CommandFailed {
            command: cmd.display(),
            code: result.code,
            output: result.stdout.join("\n"),
        });
    }
    Ok(result)
}

/// Run a command quietly, capturing stdout/stderr. Used for git/docker
/// queries whose output is data, not operator-facing logging.
pub async fn run_capture(cmd: &ShellCommand) -> Result<Captured, Error> {
    let output = cmd
        .build()
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .output()
        .await
        .map_err(|e| Error::Internal(format!("failed to spawn `{}`: {e}", cmd.display())))?;
    Ok(Captured {
        code: output.status.code().unwrap_or(-1),
        stdout: String::from_utf8_lossy(&output.stdout).to_string(),
        stderr: String::from_utf8_lossy(&output.stderr).to_string(),
    })
}

/// Capture variant that fails with `CommandFailed` on non-zero exit.
pub async fn run_capture_checked(cmd: &ShellCommand) -> Result<Captured, Error> {
    let captured = run_capture(cmd).await?;
    if !captured.success() {
        return Err(Error::CommandFailed {
            command: cmd.display(),
            code: captured.code,
            output: captured.stderr.trim().to_string(),
        });
    }
    Ok(captured)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifecycle::logger::test_sink::VecSink;
    use pan_bagnat_common::types::LogLevel;

    #[tokio::test]
    async fn test_streams_stdout_as_info_and_stderr_as_warn() {
        let sink = Arc::new(VecSink::default());
        let cmd = ShellCommand::new("sh")
            .arg("-c")
            .arg("echo out1; echo out2; echo err1 >&2");
        let result = run_streamed(&cmd, sink.clone(), None).await.unwrap();

        assert!(result.success());
        assert_eq!(result.stdout, vec!["out1", "out2"]);
        assert_eq!(sink.messages(LogLevel::Info), vec!["out1", "out2"]);
        assert_eq!(sink.messages(LogLevel::Warn), vec!["err1"]);
    }

    #[tokio::test]
    async fn test_blank_lines_are_skipped() {
        let sink = Arc::new(VecSink::default());
        let cmd = ShellCommand::new("sh").arg("-c").arg("echo a; echo; echo b");
        let result = run_streamed(&cmd, sink.clone(), None).await.unwrap();
        assert_eq!(result.stdout, vec!["a", "b"]);
    }

    #[tokio::test]
    async fn test_exit_code_propagates() {
        let sink = Arc::new(VecSink::default());
        let cmd = ShellCommand::new("sh").arg("-c").arg("exit 3");
        let result = run_streamed(&cmd, sink, None).await.unwrap();
        assert_eq!(result.code, 3);
        assert!(!result.success());
    }

    #[tokio::test]
    async fn test_run_checked_fails_on_nonzero() {
        let sink = Arc::new(VecSink::default());
        let cmd = ShellCommand::new("false");
        let err = run_checked(&cmd, sink, None).await.unwrap_err();
        assert!(matches!(
            err,
            pan_bagnat_common::Error::CommandFailed { code: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_cancellation_kills_and_logs_error() {
        let sink = Arc::new(VecSink::default());
        let cancel = CancellationToken::new();
        let cmd = ShellCommand::new("sleep").arg("30");

        let handle = {
            let sink = sink.clone();
            let cancel = cancel.clone();
            let cmd = cmd.clone();
            tokio::spawn(async move { run_streamed(&cmd, sink, Some(cancel)).await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        cancel.cancel();

        let result = handle.await.unwrap();
        assert!(result.is_err());
        let errors = sink.messages(LogLevel::Error);
        assert_eq!(errors.len(), 1);
        assert!(errors[0].contains("cancelled"));
    }

    #[tokio::test]
    async fn test_run_capture() {
        let cmd = ShellCommand::new("sh").arg("-c").arg("printf hello");
        let captured = run_capture(&cmd).await.unwrap();
        assert!(captured.success());
        assert_eq!(captured.stdout_trimmed(), "hello");
    }

    #[test]
    fn test_display_joins_program_and_args() {
        let cmd = ShellCommand::new("git").args(["fetch", "--all"]);
        assert_eq!(cmd.display(), "git fetch --all");
    }
}
