//! CPU architecture detection.
//!
//! Architectures are described by a static table rather than by matching on
//! names at each call site; supporting a new one means adding a row.

use std::fmt::Display;
use std::str::FromStr;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// A CPU architecture we know how to manage boot entries for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum Architecture {
    X86_64,
    Aarch64,
    Ppc64le,
    S390x,
}

#[derive(Debug)]
struct ArchInfo {
    arch: Architecture,
    /// The canonical name, as used by rpm
    name: &'static str,
    /// Other spellings reported by `uname -m` or the Rust target
    aliases: &'static [&'static str],
    /// Whether the bootloader needs an extra command to rewrite its
    /// boot records after the configuration changed.
    requires_finalization: bool,
}

/// Indexed by the [`Architecture`] discriminant.
const ARCHITECTURES: &[ArchInfo] = &[
    ArchInfo {
        arch: Architecture::X86_64,
        name: "x86_64",
        aliases: &["amd64"],
        requires_finalization: false,
    },
    ArchInfo {
        arch: Architecture::Aarch64,
        name: "aarch64",
        aliases: &["arm64"],
        requires_finalization: false,
    },
    ArchInfo {
        arch: Architecture::Ppc64le,
        name: "ppc64le",
        aliases: &["powerpc64le"],
        requires_finalization: false,
    },
    // zipl writes the boot records from the grub/BLS configuration
    ArchInfo {
        arch: Architecture::S390x,
        name: "s390x",
        aliases: &[],
        requires_finalization: true,
    },
];

impl Architecture {
    fn info(self) -> &'static ArchInfo {
        &ARCHITECTURES[self as usize]
    }

    /// Determine the architecture of the running kernel.
    pub(crate) fn current() -> Result<Self> {
        let uname = rustix::system::uname();
        let machine = uname.machine().to_str()?;
        tracing::trace!("uname machine: {machine}");
        machine.parse()
    }

    pub(crate) fn name(self) -> &'static str {
        self.info().name
    }

    /// Whether a platform finalization command must be run after the
    /// bootloader configuration is modified.
    pub(crate) fn requires_finalization(self) -> bool {
        self.info().requires_finalization
    }
}

impl FromStr for Architecture {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        ARCHITECTURES
            .iter()
            .find(|i| i.name == s || i.aliases.contains(&s))
            .map(|i| i.arch)
            .ok_or_else(|| anyhow::anyhow!("Unsupported architecture: {s}"))
    }
}

impl Display for Architecture {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
