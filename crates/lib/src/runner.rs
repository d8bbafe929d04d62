//! Execution of external tools.

use std::process::Command;

use camino::Utf8PathBuf;
use ipu_boot_utils::CommandRunExt;

use crate::error::{BootResult, UpgradeBootError};

/// A single external process call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct CommandInvocation {
    pub(crate) binary: Utf8PathBuf,
    pub(crate) args: Vec<String>,
}

impl CommandInvocation {
    pub(crate) fn new(binary: impl Into<Utf8PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            args: Vec::new(),
        }
    }

    pub(crate) fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    fn to_command(&self) -> Command {
        let mut c = Command::new(&self.binary);
        c.args(&self.args);
        c
    }

    /// The full argument vector, program first.
    #[cfg(test)]
    pub(crate) fn argv(&self) -> Vec<String> {
        std::iter::once(self.binary.to_string())
            .chain(self.args.iter().cloned())
            .collect()
    }
}

/// Something that can run a [`CommandInvocation`] to completion.
///
/// Only the exit status is observed; output is never interpreted.
pub(crate) trait CommandRunner {
    fn run(&mut self, invocation: &CommandInvocation) -> BootResult<()>;
}

/// Runs commands on the host, blocking until each exits.
#[derive(Debug, Default)]
pub(crate) struct HostRunner;

impl CommandRunner for HostRunner {
    fn run(&mut self, invocation: &CommandInvocation) -> BootResult<()> {
        let mut cmd = invocation.to_command();
        cmd.log_debug()
            .run_capture_stderr()
            .map_err(|e| UpgradeBootError::CommandExecution {
                command: cmd.to_string_pretty(),
                detail: format!("{e:#}"),
            })
    }
}

/// Records invocations instead of running them.
#[cfg(test)]
#[derive(Debug, Default)]
pub(crate) struct RecordingRunner {
    pub(crate) issued: Vec<Vec<String>>,
    /// Fail the command with this (zero-based) index.
    pub(crate) fail_at: Option<usize>,
}

#[cfg(test)]
impl RecordingRunner {
    pub(crate) fn failing_at(n: usize) -> Self {
        Self {
            fail_at: Some(n),
            ..Default::default()
        }
    }
}

#[cfg(test)]
impl CommandRunner for RecordingRunner {
    fn run(&mut self, invocation: &CommandInvocation) -> BootResult<()> {
        let n = self.issued.len();
        self.issued.push(invocation.argv());
        if self.fail_at == Some(n) {
            return Err(UpgradeBootError::CommandExecution {
                command: invocation.argv().join(" "),
                detail: "Subprocess failed: exit status: 1".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_runner() {
        let mut r = HostRunner;
        r.run(&CommandInvocation::new("true").args(["--ignored"]))
            .unwrap();
        let e = r
            .run(&CommandInvocation::new("/bin/sh").args(["-c", "echo nope >&2; exit 3"]))
            .err()
            .unwrap();
        match e {
            UpgradeBootError::CommandExecution { command, detail } => {
                assert_eq!(command, "/bin/sh -c 'echo nope >&2; exit 3'");
                assert!(detail.contains("nope"), "{detail}");
            }
            o => panic!("unexpected error {o:?}"),
        }
    }

    #[test]
    fn test_host_runner_missing() {
        let e = HostRunner
            .run(&CommandInvocation::new("/usr/sbin/this-tool-does-not-exist"))
            .err()
            .unwrap();
        assert!(matches!(e, UpgradeBootError::CommandExecution { .. }));
    }
}
