//! Subprocess helpers for the external programs rtools drives
//! (git, prettier, black, ruff, the backup script).

use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};

use crate::error::{Result, RtoolsError};

/// Exit code plus combined stdout/stderr of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub code: i32,
    pub output: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == 0
    }
}

/// Run `program args...` in `cwd`, capturing stdout followed by stderr.
///
/// A program that cannot be found is reported as a [`RtoolsError::Process`].
/// Termination by signal maps to exit code `-1`.
pub fn run_captured<I, S>(program: impl AsRef<OsStr>, args: I, cwd: &Path) -> Result<CommandOutput>
where
    I: IntoIterator<Item = S>,
    S: AsRef<OsStr>,
{
    let program = program.as_ref();
    let output = Command::new(program)
        .args(args)
        .current_dir(cwd)
        .stdin(Stdio::null())
        .output()
        .map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                RtoolsError::Process(format!("program not found: {}", program.to_string_lossy()))
            } else {
                RtoolsError::Process(format!("failed to start {}: {e}", program.to_string_lossy()))
            }
        })?;

    let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.is_empty() {
        if !text.is_empty() && !text.ends_with('\n') {
            text.push('\n');
        }
        text.push_str(&stderr);
    }
    let code = output.status.code().unwrap_or(-1);
    tracing::debug!(program = %program.to_string_lossy(), code, "command finished");
    Ok(CommandOutput { code, output: text })
}

/// Render a command line for display, quoting arguments with spaces.
pub fn display_command<S: AsRef<str>>(program: &str, args: &[S]) -> String {
    let mut line = quote(program);
    for arg in args {
        line.push(' ');
        line.push_str(&quote(arg.as_ref()));
    }
    line
}

fn quote(arg: &str) -> String {
    if arg.is_empty() || arg.chars().any(|c| c.is_whitespace() || c == '"' || c == '\'') {
        format!("'{}'", arg.replace('\'', "'\\''"))
    } else {
        arg.to_string()
    }
}

/// Locate an executable on `PATH`.
pub fn find_on_path(program: &str) -> Option<PathBuf> {
    let path = std::env::var_os("PATH")?;
    std::env::split_paths(&path)
        .map(|dir| dir.join(program))
        .find(|candidate| is_executable(candidate))
}

/// True if `path` is a regular file with an execute bit (any file on non-unix).
pub fn is_executable(path: &Path) -> bool {
    let Ok(meta) = std::fs::metadata(path) else {
        return false;
    };
    if !meta.is_file() {
        return false;
    }
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        meta.permissions().mode() & 0o111 != 0
    }
    #[cfg(not(unix))]
    {
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_quotes_arguments_with_spaces() {
        let line = display_command("git", &["commit", "-m", "fix the thing"]);
        assert_eq!(line, "git commit -m 'fix the thing'");
    }

    #[test]
    fn missing_program_is_a_process_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let err = run_captured("rtools-no-such-program-xyz", ["--version"], dir.path())
            .expect_err("should fail");
        assert!(err.to_string().contains("program not found"));
    }

    #[cfg(unix)]
    #[test]
    fn captures_stdout_and_stderr() {
        let dir = tempfile::tempdir().expect("tempdir");
        let out = run_captured("sh", ["-c", "echo out; echo err >&2; exit 3"], dir.path())
            .expect("run");
        assert_eq!(out.code, 3);
        assert!(out.output.contains("out\n"));
        assert!(out.output.contains("err"));
    }
}
