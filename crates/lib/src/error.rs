//! Error types for the boot entry reconciliation step.
//!
//! Each of these halts only the step that raised it; deciding whether the
//! overall upgrade continues is left to the caller.

use camino::Utf8PathBuf;

/// A failure of one of the boot entry operations.
#[derive(thiserror::Error, Debug)]
pub(crate) enum UpgradeBootError {
    /// A fact that an earlier upgrade stage should have published is absent.
    #[error("{message}\nHint: {hint}")]
    MissingPrerequisite {
        message: &'static str,
        hint: &'static str,
    },
    /// A published fact exists but could not be decoded.
    #[error("Failed to decode {kind} fact: {detail}")]
    MalformedFact { kind: String, detail: String },
    /// A line of the fact log is not a valid fact message.
    #[error("Failed to parse fact log line {line}: {detail}")]
    MalformedFactLog { line: usize, detail: String },
    /// An external command exited unsuccessfully or could not be spawned.
    #[error("Command `{command}` failed: {detail}")]
    CommandExecution { command: String, detail: String },
    /// Reading or rewriting a configuration fragment failed.
    #[error("Correcting {path}")]
    ConfigPatchIo {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl UpgradeBootError {
    pub(crate) fn config_patch_io(path: &camino::Utf8Path, source: std::io::Error) -> Self {
        Self::ConfigPatchIo {
            path: path.to_owned(),
            source,
        }
    }
}

pub(crate) type BootResult<T> = std::result::Result<T, UpgradeBootError>;

#[cfg(test)]
mod tests {
    use super::*;

    static_assertions::assert_impl_all!(UpgradeBootError: Send, Sync, std::error::Error);

    #[test]
    fn test_display() {
        let e = UpgradeBootError::MissingPrerequisite {
            message: "Missing thing",
            hint: "Make the thing",
        };
        assert_eq!(e.to_string(), "Missing thing\nHint: Make the thing");

        let e = UpgradeBootError::config_patch_io(
            camino::Utf8Path::new("/etc/default/grub"),
            std::io::Error::from(std::io::ErrorKind::NotFound),
        );
        let e = anyhow::Error::from(e);
        let msg = format!("{e:#}");
        assert!(msg.starts_with("Correcting /etc/default/grub: "), "{msg}");
    }
}
