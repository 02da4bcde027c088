use anyhow::{Context, Result, anyhow};
use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use tracing::{debug, trace};

/// A builder for executing runtime commands with unified error handling
pub struct Cmd {
    program: PathBuf,
    args: Vec<String>,
}

impl Cmd {
    /// Create a new command builder
    pub fn new(program: impl AsRef<Path>) -> Self {
        Self {
            program: program.as_ref().to_path_buf(),
            args: Vec::new(),
        }
    }

    /// Add a single argument
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Add multiple arguments
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    /// Execute the command and return the output
    /// Returns an error if the command fails (non-zero exit code)
    pub fn run(self) -> Result<Output> {
        let Cmd { program, args } = self;
        let program_display = program.display().to_string();

        trace!(command = %program_display, args = ?args, "cmd:run start");

        let output = Command::new(&program)
            .args(&args)
            .output()
            .with_context(|| {
                format!(
                    "Failed to execute command: {} {}",
                    program_display,
                    args.join(" ")
                )
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            debug!(
                command = %program_display,
                args = ?args,
                status = ?output.status.code(),
                stderr = %stderr.trim(),
                "cmd:run failure"
            );
            return Err(anyhow!(
                "Command failed: {} {}\n{}",
                program_display,
                args.join(" "),
                stderr.trim()
            ));
        }
        trace!(command = %program_display, "cmd:run success");
        Ok(output)
    }

    /// Execute the command and return stdout as a trimmed string
    pub fn run_and_capture_stdout(self) -> Result<String> {
        let output = self.run()?;
        Ok(String::from_utf8(output.stdout)?.trim().to_string())
    }

    /// Execute the command and return stdout with only the trailing newline
    /// removed, preserving leading whitespace in command output
    pub fn run_and_capture_output(self) -> Result<String> {
        let output = self.run()?;
        let stdout = String::from_utf8_lossy(&output.stdout);
        Ok(stdout.trim_end_matches(['\n', '\r']).to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capture_stdout() {
        let out = Cmd::new("echo").arg("hello").run_and_capture_stdout().unwrap();
        assert_eq!(out, "hello");
    }

    #[test]
    fn test_capture_output_keeps_leading_whitespace() {
        let out = Cmd::new("printf")
            .args(["  indented\\n"])
            .run_and_capture_output()
            .unwrap();
        assert_eq!(out, "  indented");
    }

    #[test]
    fn test_failure_includes_stderr() {
        let err = Cmd::new("sh")
            .args(["-c", "echo boom >&2; exit 3"])
            .run()
            .unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("Command failed"));
        assert!(msg.contains("boom"));
    }

    #[test]
    fn test_missing_program_is_an_error() {
        let result = Cmd::new("/nonexistent/definitely-not-here").run();
        assert!(result.is_err());
    }
}
