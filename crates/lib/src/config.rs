//! # Configuration
//!
//! Tool settings come from TOML drop-in fragments in `ipu-boot/config.d`
//! under the usual systemd-style bases; later bases and later fragment
//! names win, field by field. Together with the environment they are
//! captured once into a [`RunConfig`] which the boot entry code takes as
//! an argument, and never looks anything up on its own.

use std::collections::HashSet;

use anyhow::{Context, Result};
use camino::Utf8PathBuf;
use fn_error_context::context;
use serde::{Deserialize, Serialize};

use crate::arch::Architecture;

/// Where fragments live, relative to each base
const CONFIG_SUBDIR: &str = "ipu-boot/config.d";
const SYSTEMD_CONVENTIONAL_BASES: &[&str] = &["/usr/lib", "/usr/local/lib", "/etc", "/run"];

/// Set by the upgrade host when running in debug mode.
pub(crate) const DEBUG_ENV: &str = "LEAPP_DEBUG";

pub(crate) const DEFAULT_BOOTLOADER_TOOL: &str = "/usr/sbin/grubby";
pub(crate) const DEFAULT_FINALIZATION_TOOL: &str = "/usr/sbin/zipl";
pub(crate) const DEFAULT_GRUB_DEFAULTS: &str = "/etc/default/grub";
pub(crate) const DEFAULT_FACTS_PATH: &str = "/var/lib/ipu-boot/facts.jsonl";

/// The toplevel config entry, with everything optional so that
/// fragments can be merged.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct ConfigurationToplevel {
    pub(crate) boot: Option<BootConfiguration>,
    pub(crate) facts: Option<FactsConfiguration>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct BootConfiguration {
    pub(crate) bootloader_tool: Option<Utf8PathBuf>,
    pub(crate) finalization_tool: Option<Utf8PathBuf>,
    /// Use this instead of the architecture of the running kernel
    pub(crate) architecture: Option<Architecture>,
    pub(crate) grub_defaults: Option<Utf8PathBuf>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct FactsConfiguration {
    pub(crate) path: Option<Utf8PathBuf>,
}

fn merge_basic<T>(s: &mut Option<T>, o: Option<T>) {
    if let Some(o) = o {
        *s = Some(o);
    }
}

impl BootConfiguration {
    fn merge(&mut self, other: Self) {
        merge_basic(&mut self.bootloader_tool, other.bootloader_tool);
        merge_basic(&mut self.finalization_tool, other.finalization_tool);
        merge_basic(&mut self.architecture, other.architecture);
        merge_basic(&mut self.grub_defaults, other.grub_defaults);
    }
}

impl ConfigurationToplevel {
    fn merge(&mut self, other: Self) {
        if let Some(o) = other.boot {
            self.boot.get_or_insert_with(Default::default).merge(o);
        }
        if let Some(o) = other.facts {
            let s = self.facts.get_or_insert_with(Default::default);
            merge_basic(&mut s.path, o.path);
        }
    }

    /// The fact log to read, falling back to the default location.
    pub(crate) fn facts_path(&self) -> Utf8PathBuf {
        self.facts
            .as_ref()
            .and_then(|f| f.path.clone())
            .unwrap_or_else(|| DEFAULT_FACTS_PATH.into())
    }
}

/// Parse one fragment, warning about keys we don't know.
fn parse_fragment(buf: &str, name: &str) -> Result<ConfigurationToplevel> {
    let value: toml::Value = toml::from_str(buf)?;
    let mut unused = HashSet::new();
    let c: ConfigurationToplevel = serde_ignored::deserialize(value, |path| {
        unused.insert(path.to_string());
    })?;
    for key in unused {
        tracing::warn!("{name}: Unknown key {key}");
    }
    Ok(c)
}

/// Load and merge all configuration fragments.
#[context("Loading configuration")]
pub(crate) fn load_config() -> Result<ConfigurationToplevel> {
    let fragments = liboverdrop::scan(SYSTEMD_CONVENTIONAL_BASES, CONFIG_SUBDIR, &["toml"], true);
    let mut config = ConfigurationToplevel::default();
    for (_name, path) in fragments {
        let buf = std::fs::read_to_string(&path).with_context(|| format!("Reading {path:?}"))?;
        let name = path.to_string_lossy();
        let c = parse_fragment(&buf, &name).with_context(|| format!("Parsing {name}"))?;
        tracing::debug!("Loaded config fragment {name}");
        config.merge(c);
    }
    Ok(config)
}

/// Interpret a boolean-like environment value.
fn env_truthy(v: Option<&str>) -> bool {
    v.map(|v| {
        matches!(
            v.trim().to_ascii_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        )
    })
    .unwrap_or(false)
}

/// Everything the boot entry code needs to know about its environment,
/// resolved once at startup.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub(crate) struct RunConfig {
    /// Add `debug` to the kernel arguments of the upgrade entry
    pub(crate) debug: bool,
    pub(crate) architecture: Architecture,
    pub(crate) bootloader_tool: Utf8PathBuf,
    pub(crate) finalization_tool: Utf8PathBuf,
    pub(crate) grub_defaults: Utf8PathBuf,
    pub(crate) facts_path: Utf8PathBuf,
}

impl RunConfig {
    /// Combine parsed configuration with the environment and the running system.
    pub(crate) fn resolve(
        config: ConfigurationToplevel,
        debug_env: Option<&str>,
        detect_arch: impl FnOnce() -> Result<Architecture>,
    ) -> Result<Self> {
        let facts_path = config.facts_path();
        let boot = config.boot.unwrap_or_default();
        let architecture = match boot.architecture {
            Some(a) => {
                tracing::debug!("Using configured architecture {a}");
                a
            }
            None => detect_arch().context("Detecting architecture")?,
        };
        Ok(Self {
            debug: env_truthy(debug_env),
            architecture,
            bootloader_tool: boot
                .bootloader_tool
                .unwrap_or_else(|| DEFAULT_BOOTLOADER_TOOL.into()),
            finalization_tool: boot
                .finalization_tool
                .unwrap_or_else(|| DEFAULT_FINALIZATION_TOOL.into()),
            grub_defaults: boot
                .grub_defaults
                .unwrap_or_else(|| DEFAULT_GRUB_DEFAULTS.into()),
            facts_path,
        })
    }

    /// Read the environment and detect the architecture of the running
    /// system unless the configuration overrides it.
    pub(crate) fn from_host(config: ConfigurationToplevel) -> Result<Self> {
        let debug = std::env::var(DEBUG_ENV).ok();
        Self::resolve(config, debug.as_deref(), Architecture::current)
    }

    /// A configuration with default tool paths, for tests.
    #[cfg(test)]
    pub(crate) fn for_arch(architecture: Architecture, debug: bool) -> Self {
        let debug = debug.then_some("1");
        Self::resolve(Default::default(), debug, || Ok(architecture)).unwrap()
    }
}
