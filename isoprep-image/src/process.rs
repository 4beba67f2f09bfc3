//! Blocking invocation of external helpers.
//!
//! Every helper call returns the exit status together with the complete
//! stderr so that callers can apply their own judgement to the output (see
//! [`crate::writer::is_benign_writer_noise`]). Stdout is captured too, unless
//! it is sent to a file with [`Cmd::run_to_file`].

use std::{
    borrow::Cow,
    ffi::{OsStr, OsString},
    fs::File,
    io::ErrorKind,
    path::Path,
    process::{Command, Output, Stdio},
};

use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Captured result of a helper process.
#[derive(Debug, Clone)]
pub struct CmdOutput {
    /// Exit code, `None` when the process was killed by a signal
    pub status: Option<i32>,
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

impl CmdOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }

    pub fn stdout_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stdout)
    }

    pub fn stderr_str(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.stderr)
    }

    /// The exit status rendered for error messages.
    pub fn status_string(&self) -> String {
        match self.status {
            Some(code) => format!("exit code {code}"),
            None => String::from("terminated by signal"),
        }
    }
}

/// Builder for one helper invocation.
#[derive(Debug, Clone)]
pub struct Cmd {
    program: OsString,
    args: Vec<OsString>,
    error_msg: Option<String>,
    allow_fail: bool,
}

impl Cmd {
    pub fn new(program: impl AsRef<OsStr>) -> Self {
        Self {
            program: program.as_ref().to_os_string(),
            args: Vec::new(),
            error_msg: None,
            allow_fail: false,
        }
    }

    pub fn arg(mut self, arg: impl AsRef<OsStr>) -> Self {
        self.args.push(arg.as_ref().to_os_string());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<OsStr>,
    {
        self.args
            .extend(args.into_iter().map(|a| a.as_ref().to_os_string()));
        self
    }

    pub fn arg_path(self, path: impl AsRef<Path>) -> Self {
        self.arg(path.as_ref().as_os_str())
    }

    /// Message used in place of the helper's stderr when it fails.
    pub fn error_msg(mut self, msg: impl Into<String>) -> Self {
        self.error_msg = Some(msg.into());
        self
    }

    /// Return the output even when the exit status is non-zero.
    pub fn allow_fail(mut self) -> Self {
        self.allow_fail = true;
        self
    }

    /// The argument vector, mainly for logging and tests.
    pub fn get_args(&self) -> &[OsString] {
        &self.args
    }

    /// Run the helper to completion.
    pub fn run(self) -> Result<CmdOutput> {
        self.spawn(Stdio::piped())
    }

    /// Run the helper with its stdout written straight to `dest`, which is
    /// created or truncated. The returned stdout is empty.
    pub fn run_to_file(self, dest: &Path) -> Result<CmdOutput> {
        let file = File::create(dest)?;
        self.spawn(Stdio::from(file))
    }

    fn spawn(self, stdout: Stdio) -> Result<CmdOutput> {
        let program = self.program.to_string_lossy().to_string();
        debug!(program = %program, args = ?self.args, "Running helper");

        let output: Output = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(Stdio::piped())
            .spawn()
            .and_then(|child| child.wait_with_output())
            .map_err(|error| match error.kind() {
                ErrorKind::NotFound => Error::ToolNotFound(format!("  {program}")),
                _ => Error::Io(error),
            })?;

        let output = CmdOutput {
            status: output.status.code(),
            stdout: output.stdout,
            stderr: output.stderr,
        };
        trace!(
            program = %program,
            status = ?output.status,
            stdout_len = output.stdout.len(),
            stderr = %output.stderr_str(),
            "Helper exited"
        );

        if !output.success() && !self.allow_fail {
            return Err(Error::Helper {
                program,
                status: output.status_string(),
                message: self
                    .error_msg
                    .unwrap_or_else(|| output.stderr_str().trim().to_string()),
            });
        }

        Ok(output)
    }
}
