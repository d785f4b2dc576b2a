//! Process command gateway.
//!
//! Every interaction with the node binary goes through [`CommandGateway`]. It
//! runs a shell command line from an explicit working directory, captures
//! both output streams and classifies the outcome.
//!
//! The node binary sometimes reports application errors while exiting with
//! status 0, so a zero exit status is overridden to [`GENERIC_FAILURE_STATUS`]
//! when the designated stream carries one of the [`FAILURE_MARKERS`].

use crate::config::Platform;
use crate::error::{Error, Result};
use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use tokio::process::Command;
use tracing::debug;

/// Literal markers that turn an exit-0 invocation into a failure.
pub const FAILURE_MARKERS: [&str; 2] = ["[ERROR]", "parse error"];

/// Status reported when a failure marker overrides a zero exit status.
pub const GENERIC_FAILURE_STATUS: i32 = 1;

/// Status reported when the process was terminated without an exit code.
const TERMINATED_STATUS: i32 = -1;

/// Stream inspected for the command's result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputSource {
    /// Standard output.
    Stdout,
    /// Standard error (the node binary logs most results here).
    Stderr,
}

/// Classified outcome of one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Text of the designated stream (stderr when the process exited non-zero).
    pub text: String,
    /// Exit status after marker classification.
    pub status: i32,
}

impl CommandOutput {
    /// Whether the command is considered successful.
    #[must_use]
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Classify raw process results.
///
/// A non-zero exit status is returned as-is together with stderr. Otherwise
/// the designated stream is inspected for [`FAILURE_MARKERS`].
#[must_use]
pub fn classify(exit_status: i32, stdout: &str, stderr: &str, source: OutputSource) -> CommandOutput {
    if exit_status != 0 {
        return CommandOutput {
            text: trim_trailing_newline(stderr).to_string(),
            status: exit_status,
        };
    }

    let text = match source {
        OutputSource::Stdout => stdout,
        OutputSource::Stderr => stderr,
    };
    let text = trim_trailing_newline(text).to_string();
    let status = if contains_failure_marker(&text) {
        GENERIC_FAILURE_STATUS
    } else {
        0
    };

    CommandOutput { text, status }
}

/// Whether `text` contains any of the [`FAILURE_MARKERS`].
#[must_use]
pub fn contains_failure_marker(text: &str) -> bool {
    FAILURE_MARKERS.iter().any(|marker| text.contains(marker))
}

fn trim_trailing_newline(text: &str) -> &str {
    text.trim_end_matches(['\n', '\r'])
}

/// Runs shell command lines from a fixed working directory.
///
/// The working directory is passed to each child process; the harness's own
/// current directory is never changed.
#[derive(Debug, Clone)]
pub struct CommandGateway {
    work_dir: PathBuf,
    platform: Platform,
}

impl CommandGateway {
    /// Create a gateway running commands from `work_dir` with `platform`'s shell.
    #[must_use]
    pub fn new(work_dir: impl Into<PathBuf>, platform: Platform) -> Self {
        Self {
            work_dir: work_dir.into(),
            platform,
        }
    }

    /// Working directory of spawned commands.
    #[must_use]
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    /// Platform whose shell conventions are used.
    #[must_use]
    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Execute `command_line` and classify the result.
    ///
    /// Failure of the command itself is reported through
    /// [`CommandOutput::status`], not as an error.
    ///
    /// # Errors
    ///
    /// Returns `Error::Io` if the shell cannot be spawned.
    pub async fn execute(&self, command_line: &str, source: OutputSource) -> Result<CommandOutput> {
        debug!(
            work_dir = %self.work_dir.display(),
            command = %command_line,
            "Executing command"
        );

        let output = self.shell(command_line).output().await?;
        let result = classify_output(&output, source);

        debug!(status = result.status, output = %result.text, "Command finished");
        Ok(result)
    }

    /// Execute `command_line`, treating any failure as fatal.
    ///
    /// # Errors
    ///
    /// Returns `Error::CommandFailed` if the classified status is non-zero,
    /// or `Error::Io` if the shell cannot be spawned.
    pub async fn run(&self, command_line: &str, source: OutputSource) -> Result<String> {
        let result = self.execute(command_line, source).await?;
        if result.success() {
            Ok(result.text)
        } else {
            Err(Error::CommandFailed {
                command: command_line.to_string(),
                status: result.status,
                output: result.text,
            })
        }
    }

    fn shell(&self, command_line: &str) -> Command {
        let mut command = if self.platform.is_windows() {
            let mut cmd = Command::new("cmd");
            cmd.arg("/C").arg(command_line);
            cmd
        } else {
            let mut cmd = Command::new("sh");
            cmd.arg("-c").arg(command_line);
            cmd
        };
        command
            .current_dir(&self.work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        command
    }
}

fn classify_output(output: &Output, source: OutputSource) -> CommandOutput {
    let stdout = String::from_utf8_lossy(&output.stdout);
    let stderr = String::from_utf8_lossy(&output.stderr);
    let status = output.status.code().unwrap_or(TERMINATED_STATUS);
    classify(status, &stdout, &stderr, source)
}
