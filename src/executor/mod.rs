//! Action executor.
//!
//! Applies one [`Action`] against a working directory and reports a uniform
//! [`ExecutionResult`]. Execution never panics and never returns `Err`:
//! every failure is captured as data so a batch can continue past it.

mod paths;

use serde::{Deserialize, Serialize};
use std::fmt;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, info, warn};

use crate::actions::{Action, BashCommand, CodeEdit, EditType, FileRead, FileWrite};

pub use paths::{resolve_within, PathError};

/// Default limit for a single shell command.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(30);

/// Captured output is cut off beyond this many bytes per stream.
const MAX_OUTPUT_BYTES: usize = 256 * 1024;

/// Failure category of an [`ExecutionResult`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    PathRejected,
    NotFound,
    Io,
    Spawn,
    Timeout,
    NonZeroExit,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::PathRejected => "path rejected",
            ErrorKind::NotFound => "not found",
            ErrorKind::Io => "I/O error",
            ErrorKind::Spawn => "spawn failed",
            ErrorKind::Timeout => "timed out",
            ErrorKind::NonZeroExit => "non-zero exit",
        };
        f.write_str(name)
    }
}

/// Outcome of executing one action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<ErrorKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
}

impl ExecutionResult {
    fn ok(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
            error_kind: None,
            exit_code: None,
        }
    }

    fn failed(kind: ErrorKind, error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
            error_kind: Some(kind),
            exit_code: None,
        }
    }

    fn from_io(context: &str, path: &Path, err: io::Error) -> Self {
        let kind = if err.kind() == io::ErrorKind::NotFound {
            ErrorKind::NotFound
        } else {
            ErrorKind::Io
        };
        Self::failed(kind, format!("{} {}: {}", context, path.display(), err))
    }
}

/// Results of a sequential batch, in action order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub results: Vec<ExecutionResult>,
    pub succeeded: usize,
    pub failed: usize,
}

impl BatchReport {
    pub fn push(&mut self, result: ExecutionResult) {
        if result.success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
        self.results.push(result);
    }

    pub fn tally(&self) -> String {
        format!("{} succeeded, {} failed", self.succeeded, self.failed)
    }
}

/// Executes actions relative to a fixed working directory.
#[derive(Debug, Clone)]
pub struct Executor {
    working_dir: PathBuf,
    command_timeout: Duration,
}

impl Executor {
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            command_timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, command_timeout: Duration) -> Self {
        self.command_timeout = command_timeout;
        self
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }

    pub fn command_timeout(&self) -> Duration {
        self.command_timeout
    }

    /// Execute a single action.
    pub async fn execute(&self, action: &Action) -> ExecutionResult {
        info!("Executing {}: {}", action.kind().as_str(), action.label());

        let result = match action {
            Action::CodeEdit(edit) => self.code_edit(edit).await,
            Action::BashCommand(cmd) => self.bash(cmd).await,
            Action::FileRead(read) => self.file_read(read).await,
            Action::FileWrite(write) => self.file_write(write).await,
        };

        if let Some(error) = &result.error {
            warn!("{} failed: {}", action.label(), error);
        }
        result
    }

    /// Execute actions in order. A failure never stops the batch.
    pub async fn execute_batch(&self, actions: &[Action]) -> BatchReport {
        let mut report = BatchReport::default();
        for action in actions {
            report.push(self.execute(action).await);
        }
        info!("Batch finished: {}", report.tally());
        report
    }

    /// Current content of `file_path`, if it resolves and can be read.
    pub async fn read_original(&self, file_path: &str) -> Option<String> {
        let path = resolve_within(&self.working_dir, file_path).ok()?;
        tokio::fs::read_to_string(&path).await.ok()
    }

    fn resolve(&self, file_path: &str) -> Result<PathBuf, ExecutionResult> {
        resolve_within(&self.working_dir, file_path)
            .map_err(|e| ExecutionResult::failed(ErrorKind::PathRejected, e.to_string()))
    }

    async fn code_edit(&self, edit: &CodeEdit) -> ExecutionResult {
        let path = match self.resolve(&edit.file_path) {
            Ok(path) => path,
            Err(rejected) => return rejected,
        };

        match edit.edit_type {
            EditType::Delete => match tokio::fs::remove_file(&path).await {
                Ok(()) => ExecutionResult::ok(format!("Deleted {}", edit.file_path)),
                Err(e) => ExecutionResult::from_io("Failed to delete", &path, e),
            },
            EditType::Create | EditType::Modify => {
                if let Err(e) = write_file(&path, &edit.content).await {
                    return ExecutionResult::from_io("Failed to write", &path, e);
                }
                let verb = if edit.edit_type == EditType::Create {
                    "Created"
                } else {
                    "Modified"
                };
                ExecutionResult::ok(format!(
                    "{} {} ({} bytes)",
                    verb,
                    edit.file_path,
                    edit.content.len()
                ))
            }
        }
    }

    async fn file_write(&self, write: &FileWrite) -> ExecutionResult {
        let path = match self.resolve(&write.file_path) {
            Ok(path) => path,
            Err(rejected) => return rejected,
        };
        match write_file(&path, &write.content).await {
            Ok(()) => ExecutionResult::ok(format!(
                "Wrote {} bytes to {}",
                write.content.len(),
                write.file_path
            )),
            Err(e) => ExecutionResult::from_io("Failed to write", &path, e),
        }
    }

    async fn file_read(&self, read: &FileRead) -> ExecutionResult {
        let path = match self.resolve(&read.file_path) {
            Ok(path) => path,
            Err(rejected) => return rejected,
        };
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => ExecutionResult::ok(content),
            Err(e) => ExecutionResult::from_io("Failed to read", &path, e),
        }
    }

    async fn bash(&self, cmd: &BashCommand) -> ExecutionResult {
        let cwd = match cmd.working_dir() {
            Some(dir) => match self.resolve(dir) {
                Ok(path) => path,
                Err(rejected) => return rejected,
            },
            None => self.working_dir.clone(),
        };

        debug!(
            command = %cmd.command(),
            cwd = %cwd.display(),
            timeout_ms = self.command_timeout.as_millis() as u64,
            "spawning shell command"
        );

        let child = match shell(cmd.command())
            .current_dir(&cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) => {
                return ExecutionResult::failed(
                    ErrorKind::Spawn,
                    format!("Failed to start command in {}: {}", cwd.display(), e),
                )
            }
        };

        // Dropping the future on timeout drops the child, which kills it.
        let output = match timeout(self.command_timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return ExecutionResult::failed(ErrorKind::Io, format!("Command I/O failed: {}", e))
            }
            Err(_) => {
                return ExecutionResult::failed(
                    ErrorKind::Timeout,
                    format!(
                        "Command timed out after {:.1}s",
                        self.command_timeout.as_secs_f64()
                    ),
                )
            }
        };

        let stdout = truncate_output(&output.stdout);
        let stderr = truncate_output(&output.stderr);
        let mut combined = stdout;
        if !stderr.trim().is_empty() {
            if !combined.is_empty() && !combined.ends_with('\n') {
                combined.push('\n');
            }
            combined.push_str("[stderr]\n");
            combined.push_str(&stderr);
        }

        let exit_code = output.status.code();
        debug!(exit_code = ?exit_code, "shell command completed");

        if output.status.success() {
            let mut result = ExecutionResult::ok(combined);
            result.exit_code = exit_code;
            return result;
        }

        let reason = match exit_code {
            Some(code) => format!("Command exited with status {}", code),
            None => "Command was terminated by a signal".to_string(),
        };
        let error = match stderr.trim() {
            "" => reason,
            detail => format!("{}: {}", reason, detail),
        };
        ExecutionResult {
            success: false,
            output: combined,
            error: Some(error),
            error_kind: Some(ErrorKind::NonZeroExit),
            exit_code,
        }
    }
}

#[cfg(windows)]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

#[cfg(not(windows))]
fn shell(command: &str) -> Command {
    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command);
    cmd
}

async fn write_file(path: &Path, content: &str) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(path, content).await
}

fn truncate_output(bytes: &[u8]) -> String {
    if bytes.len() <= MAX_OUTPUT_BYTES {
        return String::from_utf8_lossy(bytes).into_owned();
    }
    let mut text = String::from_utf8_lossy(&bytes[..MAX_OUTPUT_BYTES]).into_owned();
    text.push_str("\n... (output truncated)");
    text
}
