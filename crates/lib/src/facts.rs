//! Facts published by earlier upgrade stages.
//!
//! The fact channel is a JSON Lines log, one message per line in
//! publication order:
//!
//! ```text
//! {"kind": "BootContent", "data": {"kernel_path": "/boot/vmlinuz-upgrade.x86_64", "initram_path": "/boot/initramfs-upgrade.x86_64.img"}}
//! ```
//!
//! Consumers only ever look at the most recently published message of a
//! given kind.

use anyhow::Context;
use camino::{Utf8Path, Utf8PathBuf};
use fn_error_context::context;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{BootResult, UpgradeBootError};

/// A typed message published on the fact channel.
pub(crate) trait Fact: DeserializeOwned {
    /// The `kind` tag of the message.
    const KIND: &'static str;
}

/// The kernel and initramfs prepared for booting into the upgrade environment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct BootContent {
    pub(crate) kernel_path: Utf8PathBuf,
    pub(crate) initram_path: Utf8PathBuf,
}

impl Fact for BootContent {
    const KIND: &'static str = "BootContent";
}

/// Whether the grub defaults file was found to be malformed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct GrubConfigError {
    pub(crate) error_detected: bool,
}

impl Fact for GrubConfigError {
    const KIND: &'static str = "GrubConfigError";
}

/// Quagga daemons in use on the source system, gathered for the FRR migration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct QuaggaToFrrFacts {
    #[serde(default)]
    pub(crate) active_daemons: Vec<String>,
    #[serde(default)]
    pub(crate) enabled_daemons: Vec<String>,
}

impl Fact for QuaggaToFrrFacts {
    const KIND: &'static str = "QuaggaToFrrFacts";
}

/// One entry of the fact log.
#[derive(Debug, Serialize, Deserialize)]
struct FactMessage {
    kind: String,
    data: serde_json::Value,
}

/// Read access to the facts published so far.
pub(crate) trait FactSource {
    /// Return the payload of the most recently published message of `kind`.
    fn latest_raw(&self, kind: &str) -> Option<&serde_json::Value>;

    /// Return the most recently published fact of type `T`, if any.
    fn latest<T: Fact>(&self) -> BootResult<Option<T>> {
        let Some(data) = self.latest_raw(T::KIND) else {
            tracing::debug!("No {} fact published", T::KIND);
            return Ok(None);
        };
        let v = T::deserialize(data).map_err(|e| UpgradeBootError::MalformedFact {
            kind: T::KIND.to_owned(),
            detail: e.to_string(),
        })?;
        Ok(Some(v))
    }
}

/// The fact log loaded into memory.
#[derive(Debug, Default)]
pub(crate) struct FactLog {
    messages: Vec<FactMessage>,
}

impl FactLog {
    /// Parse a fact log. Blank lines are skipped.
    pub(crate) fn parse(buf: &str) -> BootResult<Self> {
        let messages = buf
            .lines()
            .enumerate()
            .filter(|(_, line)| !line.trim().is_empty())
            .map(|(i, line)| {
                serde_json::from_str::<FactMessage>(line).map_err(|e| {
                    UpgradeBootError::MalformedFactLog {
                        line: i + 1,
                        detail: e.to_string(),
                    }
                })
            })
            .collect::<BootResult<Vec<_>>>()?;
        Ok(Self { messages })
    }

    /// Load the fact log at `path`; a log that doesn't exist yet is empty.
    #[context("Loading facts from {path}")]
    pub(crate) fn load(path: &Utf8Path) -> anyhow::Result<Self> {
        let buf = match std::fs::read_to_string(path) {
            Ok(buf) => buf,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!("No fact log at {path}");
                return Ok(Self::default());
            }
            Err(e) => return Err(e).context("Reading"),
        };
        let r = Self::parse(&buf)?;
        tracing::debug!("Loaded {} facts", r.messages.len());
        Ok(r)
    }

    /// Append a fact; it becomes the most recent of its kind.
    #[cfg(test)]
    pub(crate) fn publish<T: Fact + Serialize>(&mut self, fact: &T) {
        self.messages.push(FactMessage {
            kind: T::KIND.to_owned(),
            data: serde_json::to_value(fact).unwrap(),
        });
    }
}

impl FactSource for FactLog {
    fn latest_raw(&self, kind: &str) -> Option<&serde_json::Value> {
        self.messages
            .iter()
            .rev()
            .find(|m| m.kind == kind)
            .map(|m| &m.data)
    }
}
