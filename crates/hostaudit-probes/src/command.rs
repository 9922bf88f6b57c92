//! External command execution for probes, bounded by a per-command timeout.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;

use hostaudit_core::ProbeError;
use tracing::debug;

/// Captured output of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
    pub success: bool,
}

impl CommandOutput {
    /// Stdout when the command succeeded, otherwise an error naming the command.
    pub fn into_stdout(self, command: &str) -> Result<String, ProbeError> {
        if self.success {
            Ok(self.stdout)
        } else {
            let reason = match self.stderr.trim() {
                "" => format!("exit code {}", self.exit_code.map_or("unknown".to_string(), |c| c.to_string())),
                err => err.to_string(),
            };
            Err(ProbeError::Command {
                command: command.to_string(),
                reason,
            })
        }
    }
}

#[derive(Debug, Clone)]
pub struct CommandRunner {
    timeout: Duration,
}

impl CommandRunner {
    pub fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Run `program args..` without a shell. A missing binary is a
    /// [`ProbeError::MissingDependency`].
    pub async fn run(&self, program: &str, args: &[&str]) -> Result<CommandOutput, ProbeError> {
        let command = display_command(program, args);
        debug!(command = %command, "Running command");

        let child = tokio::process::Command::new(program)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output();

        let output = match tokio::time::timeout(self.timeout, child).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(ProbeError::MissingDependency(program.to_string()))
            }
            Ok(Err(e)) => {
                return Err(ProbeError::Command {
                    command,
                    reason: e.to_string(),
                })
            }
            Err(_) => {
                return Err(ProbeError::Command {
                    command,
                    reason: format!("timed out after {}s", self.timeout.as_secs()),
                })
            }
        };

        Ok(CommandOutput {
            exit_code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            success: output.status.success(),
        })
    }

    /// Stdout of a successful run; anything else is an error.
    pub async fn stdout(&self, program: &str, args: &[&str]) -> Result<String, ProbeError> {
        let output = self.run(program, args).await?;
        output.into_stdout(&display_command(program, args))
    }
}

impl Default for CommandRunner {
    fn default() -> Self {
        Self::new(Duration::from_secs(30))
    }
}

fn display_command(program: &str, args: &[&str]) -> String {
    if args.is_empty() {
        program.to_string()
    } else {
        format!("{} {}", program, args.join(" "))
    }
}

/// Locate `program` on `PATH`.
pub fn which(program: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

fn is_executable(path: &Path) -> bool {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        path.metadata()
            .map(|m| m.is_file() && m.permissions().mode() & 0o111 != 0)
            .unwrap_or(false)
    }
    #[cfg(not(unix))]
    {
        path.is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failed_output_reports_stderr() {
        let out = CommandOutput {
            exit_code: Some(2),
            stdout: String::new(),
            stderr: "permission denied\n".to_string(),
            success: false,
        };
        let err = out.into_stdout("ufw status").unwrap_err();
        assert_eq!(err.to_string(), "command `ufw status` failed: permission denied");
    }

    #[test]
    fn failed_output_without_stderr_reports_exit_code() {
        let out = CommandOutput {
            exit_code: Some(1),
            stdout: String::new(),
            stderr: String::new(),
            success: false,
        };
        let err = out.into_stdout("rocminfo").unwrap_err();
        assert!(err.to_string().contains("exit code 1"));
    }

    #[tokio::test]
    async fn missing_binary_is_a_missing_dependency() {
        let runner = CommandRunner::new(Duration::from_secs(5));
        let err = runner
            .run("hostaudit-definitely-not-installed", &["--version"])
            .await
            .unwrap_err();
        assert!(matches!(err, ProbeError::MissingDependency(p) if p == "hostaudit-definitely-not-installed"));
        assert!(which("hostaudit-definitely-not-installed").is_none());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn captures_stdout() {
        let runner = CommandRunner::default();
        let out = runner.stdout("sh", &["-c", "echo hello"]).await.unwrap();
        assert_eq!(out.trim(), "hello");
    }
}
