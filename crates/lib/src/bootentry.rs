//! # Upgrade boot entry
//!
//! The upgrade environment is booted through a temporary bootloader entry
//! pointing at the kernel and initramfs published by an earlier stage.
//! Adding it always removes any previous entry for the same kernel first,
//! so running the step again converges on the same bootloader state.

use std::fmt::Display;

use camino::{Utf8Path, Utf8PathBuf};

use crate::config::RunConfig;
use crate::error::{BootResult, UpgradeBootError};
use crate::facts::{BootContent, FactSource};
use crate::runner::{CommandInvocation, CommandRunner};

/// Title of the upgrade boot entry.
pub(crate) const ENTRY_TITLE: &str = "RHEL-Upgrade-Initramfs";
/// Keep SELinux permissive and plymouth out of the way of the upgrade output.
const BASE_KARGS: &[&str] = &["enforcing=0", "rd.plymouth=0", "plymouth.enable=0"];
const DEBUG_KARG: &str = "debug";

/// Kernel arguments for the upgrade boot entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct BootEntryArguments(Vec<&'static str>);

impl BootEntryArguments {
    pub(crate) fn new(debug: bool) -> Self {
        let debug = debug.then_some(DEBUG_KARG);
        Self(debug.into_iter().chain(BASE_KARGS.iter().copied()).collect())
    }
}

impl Display for BootEntryArguments {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.join(" "))
    }
}

/// Find the kernel and initramfs for the upgrade boot entry.
pub(crate) fn get_boot_file_paths(
    facts: &impl FactSource,
) -> BootResult<(Utf8PathBuf, Utf8PathBuf)> {
    let BootContent {
        kernel_path,
        initram_path,
    } = facts
        .latest::<BootContent>()?
        .ok_or(UpgradeBootError::MissingPrerequisite {
            message: "Could not locate the kernel and initramfs for the upgrade boot entry",
            hint: "Ensure the upgrade kernel and initramfs were produced by an earlier stage",
        })?;
    tracing::debug!("Upgrade kernel: {kernel_path} initramfs: {initram_path}");
    Ok((kernel_path, initram_path))
}

fn remove_kernel(config: &RunConfig, kernel_path: &Utf8Path) -> CommandInvocation {
    CommandInvocation::new(&config.bootloader_tool)
        .args(["--remove-kernel", kernel_path.as_str()])
}

/// Run the platform finalization command, if this architecture has one.
fn finalize(config: &RunConfig, runner: &mut impl CommandRunner) -> BootResult<()> {
    if !config.architecture.requires_finalization() {
        tracing::trace!("No bootloader finalization on {}", config.architecture);
        return Ok(());
    }
    tracing::debug!("Finalizing bootloader for {}", config.architecture);
    runner.run(&CommandInvocation::new(&config.finalization_tool))
}

/// Create the upgrade boot entry and make it the default.
///
/// Any stale entry for the same kernel is removed first. A failing command
/// stops everything after it; nothing already done is rolled back.
pub(crate) fn add_boot_entry(
    facts: &impl FactSource,
    config: &RunConfig,
    runner: &mut impl CommandRunner,
) -> BootResult<()> {
    let (kernel_path, initram_path) = get_boot_file_paths(facts)?;
    let kargs = BootEntryArguments::new(config.debug).to_string();

    // The tool itself tolerates removing an entry that doesn't exist.
    runner.run(&remove_kernel(config, &kernel_path))?;

    let add = CommandInvocation::new(&config.bootloader_tool).args([
        "--add-kernel",
        kernel_path.as_str(),
        "--initrd",
        initram_path.as_str(),
        "--title",
        ENTRY_TITLE,
        "--copy-default",
        "--make-default",
        "--args",
        kargs.as_str(),
    ]);
    runner.run(&add)?;

    finalize(config, runner)?;
    tracing::info!("Added boot entry {ENTRY_TITLE} for {kernel_path}");
    Ok(())
}

/// Remove the upgrade boot entry again.
pub(crate) fn remove_boot_entry(
    facts: &impl FactSource,
    config: &RunConfig,
    runner: &mut impl CommandRunner,
) -> BootResult<()> {
    let (kernel_path, _) = get_boot_file_paths(facts)?;
    runner.run(&remove_kernel(config, &kernel_path))?;
    finalize(config, runner)?;
    tracing::info!("Removed boot entry for {kernel_path}");
    Ok(())
}
