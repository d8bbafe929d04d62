//! Helpers intended for [`std::process::Command`] and related structures.

use std::io::{Read, Seek};
use std::process::{Command, ExitStatus};

use anyhow::{Context, Result};

/// How much of the tail of stderr we keep for error messages.
const STDERR_TAIL_BYTES: u64 = 1024;

/// Helpers intended for [`std::process::Command`].
pub trait CommandRunExt {
    /// Log (at debug level) the full child commandline.
    fn log_debug(&mut self) -> &mut Self;

    /// Execute the child process and capture its stderr; on failure
    /// the tail of stderr is included in the returned error.
    fn run_capture_stderr(&mut self) -> Result<()>;

    /// Render the program and its arguments the way a POSIX shell
    /// would need them quoted.
    fn to_string_pretty(&self) -> String;
}

/// Parse the last chunk (e.g. 1024 bytes) from the provided file,
/// and return it lossily converted to UTF-8.
fn last_utf8_content_from_file(mut f: std::fs::File) -> String {
    // u64 -> i64 is safe for our small constant
    let _ = f.seek(std::io::SeekFrom::End(-(STDERR_TAIL_BYTES as i64)));
    let mut buf = Vec::with_capacity(STDERR_TAIL_BYTES as usize);
    // Seeking back past the start fails for short outputs; read from wherever we are.
    if f.read_to_end(&mut buf).is_err() {
        return String::new();
    }
    String::from_utf8_lossy(&buf).trim_end().to_owned()
}

/// If the exit status signals it was not successful, return an error
/// carrying the tail of the captured stderr. The command string is left
/// for the caller to add.
fn check_status(st: ExitStatus, mut stderr: std::fs::File) -> Result<()> {
    if st.success() {
        return Ok(());
    }
    let _ = stderr.rewind();
    let stderr_buf = last_utf8_content_from_file(stderr);
    if stderr_buf.is_empty() {
        anyhow::bail!("Subprocess failed: {st:?}")
    }
    anyhow::bail!("Subprocess failed: {st:?}\n{stderr_buf}")
}

impl CommandRunExt for Command {
    fn log_debug(&mut self) -> &mut Self {
        tracing::debug!("exec: {}", self.to_string_pretty());
        self
    }

    fn run_capture_stderr(&mut self) -> Result<()> {
        let stderr = tempfile::tempfile()?;
        self.stderr(stderr.try_clone()?);
        tracing::trace!("exec: {self:?}");
        let st = self
            .status()
            .with_context(|| format!("Spawning {}", self.get_program().to_string_lossy()))?;
        check_status(st, stderr)
    }

    fn to_string_pretty(&self) -> String {
        std::iter::once(self.get_program())
            .chain(self.get_args())
            .map(|arg| arg.to_string_lossy())
            .map(|arg| match shlex::try_quote(&arg) {
                Ok(quoted) => quoted.into_owned(),
                // Only fails for nul bytes, which can't be passed anyway
                Err(_) => arg.to_string(),
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_run_ext() {
        Command::new("true").run_capture_stderr().unwrap();
        let e = Command::new("false").run_capture_stderr().err().unwrap();
        let msg = format!("{e:#}");
        // No stderr, so nothing after the status
        assert!(msg.starts_with("Subprocess failed: "), "{msg}");
        assert!(!msg.contains('\n'), "{msg}");
    }

    #[test]
    fn command_run_ext_stderr() {
        let e = Command::new("/bin/sh")
            .args(["-c", "echo expected-this-oops-message 1>&2; exit 1"])
            .run_capture_stderr()
            .err()
            .unwrap();
        let msg = format!("{e:#}");
        assert!(msg.starts_with("Subprocess failed"), "{msg}");
        assert!(msg.contains("expected-this-oops-message"), "{msg}");
    }

    #[test]
    fn command_run_ext_missing_binary() {
        let e = Command::new("/this/binary/does/not/exist")
            .run_capture_stderr()
            .err()
            .unwrap();
        assert!(format!("{e:#}").contains("Spawning /this/binary/does/not/exist"));
    }

    #[test]
    fn test_to_string_pretty() {
        let mut cmd = Command::new("/usr/sbin/grubby");
        cmd.args(["--args", "debug enforcing=0", "--remove-kernel", "/boot/vmlinuz"]);
        similar_asserts::assert_eq!(
            cmd.to_string_pretty(),
            "/usr/sbin/grubby --args 'debug enforcing=0' --remove-kernel /boot/vmlinuz"
        );
    }
}
