use anyhow::Context;
use std::future::Future;
use std::path::PathBuf;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};

#[derive(Debug, Clone)]
pub struct ExecutionResult {
    pub success: bool,
    pub duration: f64,
    pub stdout: Vec<String>,
    pub stderr: Vec<String>,
    pub exit_code: Option<i32>,
    pub failure_reason: Option<String>,
}

impl ExecutionResult {
    pub fn succeeded() -> Self {
        Self {
            success: true,
            duration: 0.0,
            stdout: Vec::new(),
            stderr: Vec::new(),
            exit_code: Some(0),
            failure_reason: None,
        }
    }

    pub fn failed(exit_code: i32) -> Self {
        Self {
            success: false,
            exit_code: Some(exit_code),
            failure_reason: Some(format!("Exit code {}", exit_code)),
            ..Self::succeeded()
        }
    }
}

/// Runs one replay script to completion.
pub trait CommandExecuting {
    fn execute(&self, script: &str) -> impl Future<Output = anyhow::Result<ExecutionResult>>;
}

/// Hands each script to `<shell> -c`.
#[derive(Debug, Clone)]
pub struct ShellExecutor {
    shell: String,
    working_dir: PathBuf,
    timeout: Option<Duration>,
}

impl ShellExecutor {
    pub fn new(shell: impl Into<String>, working_dir: PathBuf) -> Self {
        Self {
            shell: shell.into(),
            working_dir,
            timeout: None,
        }
    }

    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }
}

impl CommandExecuting for ShellExecutor {
    async fn execute(&self, script: &str) -> anyhow::Result<ExecutionResult> {
        let start = Instant::now();

        let mut command = Command::new(&self.shell);
        command
            .arg("-c")
            .arg(script)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        #[cfg(unix)]
        command.process_group(0);

        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to spawn shell: {}", self.shell))?;

        let stdout = child.stdout.take().context("Failed to capture stdout")?;
        let stderr = child.stderr.take().context("Failed to capture stderr")?;

        let stdout_task = tokio::spawn(async move {
            let mut lines = Vec::new();
            let mut reader = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                lines.push(line);
            }
            lines
        });

        let stderr_task = tokio::spawn(async move {
            let mut lines = Vec::new();
            let mut reader = BufReader::new(stderr).lines();
            while let Ok(Some(line)) = reader.next_line().await {
                lines.push(line);
            }
            lines
        });

        let status = match self.timeout {
            Some(limit) => match tokio::time::timeout(limit, child.wait()).await {
                Ok(status) => Some(status.context("Failed to wait for child process")?),
                Err(_) => {
                    kill_process_group(&child);
                    child
                        .kill()
                        .await
                        .context("Failed to kill timed out process")?;
                    None
                }
            },
            None => Some(
                child
                    .wait()
                    .await
                    .context("Failed to wait for child process")?,
            ),
        };

        let stdout_lines = stdout_task.await.context("stdout task panicked")?;
        let stderr_lines = stderr_task.await.context("stderr task panicked")?;
        let duration = start.elapsed().as_secs_f64();

        let Some(status) = status else {
            return Ok(ExecutionResult {
                success: false,
                duration,
                stdout: stdout_lines,
                stderr: stderr_lines,
                exit_code: None,
                failure_reason: Some(format!(
                    "Timed out after {:?}",
                    self.timeout.unwrap_or_default()
                )),
            });
        };

        let exit_code = status.code();
        let failure_reason = if status.success() {
            None
        } else {
            Some(match exit_code {
                Some(code) => format!("Exit code {}", code),
                None => signal_reason(&status),
            })
        };

        Ok(ExecutionResult {
            success: status.success(),
            duration,
            stdout: stdout_lines,
            stderr: stderr_lines,
            exit_code,
            failure_reason,
        })
    }
}

/// The shell forks the step's commands, and they hold the output pipes open.
#[cfg(unix)]
fn kill_process_group(child: &Child) {
    use nix::sys::signal::{killpg, Signal};
    use nix::unistd::Pid;

    if let Some(pid) = child.id() {
        let _ = killpg(Pid::from_raw(pid as i32), Signal::SIGKILL);
    }
}

#[cfg(not(unix))]
fn kill_process_group(_child: &Child) {}

#[cfg(unix)]
fn signal_reason(status: &std::process::ExitStatus) -> String {
    use std::os::unix::process::ExitStatusExt;

    match status.signal() {
        Some(signal) => format!("Signal {}", signal),
        None => "Abnormal termination".to_string(),
    }
}

#[cfg(not(unix))]
fn signal_reason(_status: &std::process::ExitStatus) -> String {
    "Abnormal termination".to_string()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn executor() -> ShellExecutor {
        ShellExecutor::new("/bin/sh", std::env::temp_dir())
    }

    #[tokio::test]
    async fn test_success_captures_output() {
        let result = executor()
            .execute("X='value'\necho \"$X\"\necho oops >&2")
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.exit_code, Some(0));
        assert_eq!(result.stdout, vec!["value"]);
        assert_eq!(result.stderr, vec!["oops"]);
        assert!(result.failure_reason.is_none());
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_failure() {
        let result = executor().execute("exit 3").await.unwrap();
        assert!(!result.success);
        assert_eq!(result.exit_code, Some(3));
        assert_eq!(result.failure_reason.as_deref(), Some("Exit code 3"));
    }

    #[tokio::test]
    async fn test_stderr_alone_is_not_failure() {
        let result = executor().execute("echo warning >&2").await.unwrap();
        assert!(result.success);
        assert_eq!(result.stderr, vec!["warning"]);
    }

    #[tokio::test]
    async fn test_timeout_kills_forked_commands() {
        let result = executor()
            .with_timeout(Some(Duration::from_millis(200)))
            .execute("X='1'\nsleep 3\ntrue")
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.exit_code, None);
        assert!(result.duration < 2.0);
        assert!(result
            .failure_reason
            .as_deref()
            .is_some_and(|reason| reason.starts_with("Timed out")));
    }

    #[tokio::test]
    async fn test_timeout_kills_script() {
        let result = executor()
            .with_timeout(Some(Duration::from_millis(200)))
            .execute("exec sleep 5")
            .await
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.exit_code, None);
        assert!(result.duration < 5.0);
    }
}
