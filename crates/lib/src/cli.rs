//! # ipu-boot command line
//!
//! Command line tool to manage the boot entry used to enter the upgrade
//! environment.

use std::ffi::OsString;
use std::io::Write;

use anyhow::{ensure, Result};
use camino::Utf8PathBuf;
use clap::Parser;
use fn_error_context::context;

use crate::arch::Architecture;
use crate::bootentry;
use crate::config::{self, ConfigurationToplevel, RunConfig};
use crate::facts::{FactLog, FactSource, GrubConfigError};
use crate::grubconfig;
use crate::quagga;
use crate::report;
use crate::runner::{CommandRunner, HostRunner};

/// Options for commands reading the fact log
#[derive(Debug, Parser, PartialEq, Eq)]
pub(crate) struct FactsOpts {
    /// Read facts from this JSON Lines file instead of the configured one
    #[clap(long)]
    pub(crate) facts: Option<Utf8PathBuf>,
}

/// Options for commands changing the bootloader configuration
#[derive(Debug, Parser, PartialEq, Eq)]
pub(crate) struct BootEntryOpts {
    #[clap(flatten)]
    pub(crate) facts: FactsOpts,

    /// Act as if running on this architecture
    #[clap(long)]
    pub(crate) arch: Option<Architecture>,
}

/// Options for the incompatible daemon check
#[derive(Debug, Parser, PartialEq, Eq)]
pub(crate) struct CheckQuaggaOpts {
    #[clap(flatten)]
    pub(crate) facts: FactsOpts,

    /// Append reports to this file instead of writing them to stdout
    #[clap(long)]
    pub(crate) report_file: Option<Utf8PathBuf>,
}

/// Manage the boot entry used to enter the upgrade environment.
#[derive(Debug, Parser, PartialEq, Eq)]
#[clap(name = "ipu-boot")]
#[clap(rename_all = "kebab-case")]
#[clap(version, long_version = clap::crate_version!())]
pub(crate) enum Opt {
    /// Add the upgrade boot entry and make it the default.
    ///
    /// Any existing entry for the upgrade kernel is removed first.
    AddBootEntry(BootEntryOpts),
    /// Remove the upgrade boot entry.
    RemoveBootEntry(BootEntryOpts),
    /// Print the kernel and initramfs used for the upgrade boot entry.
    BootPaths(FactsOpts),
    /// Correct a misplaced quote in GRUB_CMDLINE_LINUX of a grub defaults file.
    FixGrubConfig {
        /// Path to the file, usually /etc/default/grub
        path: Utf8PathBuf,
    },
    /// Report Quagga daemons which are unavailable after the upgrade.
    CheckQuagga(CheckQuaggaOpts),
    /// Print the resolved configuration as JSON.
    ///
    /// Accepts the same overrides as add-boot-entry, and does not need root.
    PrintConfig(BootEntryOpts),
}

fn require_root() -> Result<()> {
    ensure!(
        rustix::process::getuid().is_root(),
        "This command requires root privileges"
    );
    Ok(())
}

/// Load configuration fragments and apply command line overrides.
fn load_config(facts: &FactsOpts, arch: Option<Architecture>) -> Result<ConfigurationToplevel> {
    let mut c = config::load_config()?;
    if let Some(path) = facts.facts.as_ref() {
        c.facts.get_or_insert_with(Default::default).path = Some(path.clone());
    }
    if let Some(arch) = arch {
        c.boot.get_or_insert_with(Default::default).architecture = Some(arch);
    }
    Ok(c)
}

fn run_config(opts: &BootEntryOpts) -> Result<RunConfig> {
    let c = load_config(&opts.facts, opts.arch)?;
    let r = RunConfig::from_host(c)?;
    tracing::debug!("Resolved configuration: {r:?}");
    Ok(r)
}

/// Correct the grub defaults file if an earlier stage found it broken,
/// then add the boot entry.
fn correct_and_add_boot_entry(
    facts: &impl FactSource,
    config: &RunConfig,
    runner: &mut impl CommandRunner,
) -> Result<()> {
    match facts.latest::<GrubConfigError>()? {
        Some(GrubConfigError {
            error_detected: true,
        }) => grubconfig::fix_grub_config_error(&config.grub_defaults)?,
        _ => tracing::debug!("No grub defaults correction needed"),
    }
    bootentry::add_boot_entry(facts, config, runner)?;
    Ok(())
}

#[context("Adding upgrade boot entry")]
fn add_boot_entry(opts: BootEntryOpts) -> Result<()> {
    require_root()?;
    let config = run_config(&opts)?;
    let facts = FactLog::load(&config.facts_path)?;
    correct_and_add_boot_entry(&facts, &config, &mut HostRunner)
}

#[context("Removing upgrade boot entry")]
fn remove_boot_entry(opts: BootEntryOpts) -> Result<()> {
    require_root()?;
    let config = run_config(&opts)?;
    let facts = FactLog::load(&config.facts_path)?;
    bootentry::remove_boot_entry(&facts, &config, &mut HostRunner)?;
    Ok(())
}

fn boot_paths(opts: FactsOpts, mut out: impl Write) -> Result<()> {
    let c = load_config(&opts, None)?;
    let facts = FactLog::load(&c.facts_path())?;
    let (kernel, initram) = bootentry::get_boot_file_paths(&facts)?;
    writeln!(out, "{kernel}")?;
    writeln!(out, "{initram}")?;
    Ok(())
}

#[context("Checking Quagga daemons")]
fn check_quagga(opts: CheckQuaggaOpts, out: impl Write) -> Result<()> {
    let c = load_config(&opts.facts, None)?;
    let facts = FactLog::load(&c.facts_path())?;
    let Some(r) = quagga::check_babeld(&facts)? else {
        return Ok(());
    };
    match opts.report_file.as_deref() {
        Some(path) => report::append_reports([&r], path)?,
        None => report::write_reports([&r], out)?,
    }
    if r.is_inhibitor() {
        tracing::warn!("Upgrade inhibited: {}", r.title);
    }
    Ok(())
}

fn print_config(opts: BootEntryOpts, mut out: impl Write) -> Result<()> {
    let config = run_config(&opts)?;
    serde_json::to_writer_pretty(&mut out, &config)?;
    writeln!(out)?;
    Ok(())
}

fn run_from_opt(opt: Opt) -> Result<()> {
    let stdout = std::io::stdout().lock();
    match opt {
        Opt::AddBootEntry(opts) => add_boot_entry(opts),
        Opt::RemoveBootEntry(opts) => remove_boot_entry(opts),
        Opt::BootPaths(opts) => boot_paths(opts, stdout),
        Opt::FixGrubConfig { path } => Ok(grubconfig::fix_grub_config_error(&path)?),
        Opt::CheckQuagga(opts) => check_quagga(opts, stdout),
        Opt::PrintConfig(opts) => print_config(opts, stdout),
    }
}

/// Parse the provided arguments and execute.
/// Calls [`clap::Error::exit`] on failure, printing the error message and aborting the program.
pub fn run_from_iter<I>(args: I) -> Result<()>
where
    I: IntoIterator,
    I::Item: Into<OsString> + Clone,
{
    run_from_opt(Opt::parse_from(args))
}

#[cfg(test)]
mod tests {
    use indoc::indoc;

    use super::*;
    use crate::facts::BootContent;
    use crate::runner::RecordingRunner;

    #[test]
    fn test_parse_opts() {
        assert_eq!(
            Opt::parse_from(["ipu-boot", "add-boot-entry", "--arch", "s390x"]),
            Opt::AddBootEntry(BootEntryOpts {
                facts: FactsOpts { facts: None },
                arch: Some(Architecture::S390x),
            })
        );
        assert_eq!(
            Opt::parse_from(["ipu-boot", "boot-paths", "--facts", "/run/facts.jsonl"]),
            Opt::BootPaths(FactsOpts {
                facts: Some("/run/facts.jsonl".into())
            })
        );
        assert!(matches!(
            Opt::parse_from(["ipu-boot", "check-quagga", "--report-file", "/tmp/r.jsonl"]),
            Opt::CheckQuagga(CheckQuaggaOpts {
                report_file: Some(_),
                ..
            })
        ));
        assert_eq!(
            Opt::parse_from(["ipu-boot", "print-config", "--arch", "aarch64"]),
            Opt::PrintConfig(BootEntryOpts {
                facts: FactsOpts { facts: None },
                arch: Some(Architecture::Aarch64),
            })
        );
        assert_eq!(
            Opt::parse_from(["ipu-boot", "print-config"]),
            Opt::PrintConfig(BootEntryOpts {
                facts: FactsOpts { facts: None },
                arch: None,
            })
        );
        assert!(Opt::try_parse_from(["ipu-boot", "add-boot-entry", "--arch", "sparc"]).is_err());
        assert!(Opt::try_parse_from(["ipu-boot", "fix-grub-config"]).is_err());
    }

    const GRUB_WRONG: &str = include_str!("fixtures/grub_test.wrong");
    const GRUB_FIXED: &str = include_str!("fixtures/grub_test.fixed");

    fn grub_facts(error_detected: Option<bool>) -> FactLog {
        let mut facts = FactLog::default();
        facts.publish(&BootContent {
            kernel_path: "/abc".into(),
            initram_path: "/def".into(),
        });
        if let Some(error_detected) = error_detected {
            facts.publish(&GrubConfigError { error_detected });
        }
        facts
    }

    fn grub_config(td: &tempfile::TempDir, arch: Architecture) -> Result<RunConfig> {
        let mut config = RunConfig::for_arch(arch, false);
        config.grub_defaults = Utf8PathBuf::from_path_buf(td.path().join("grub")).unwrap();
        std::fs::write(&config.grub_defaults, GRUB_WRONG)?;
        Ok(config)
    }

    #[test]
    fn test_add_corrects_grub_defaults() -> Result<()> {
        for (arch, ncommands) in [(Architecture::X86_64, 2), (Architecture::S390x, 3)] {
            let td = tempfile::tempdir()?;
            let config = grub_config(&td, arch)?;
            let mut runner = RecordingRunner::default();
            correct_and_add_boot_entry(&grub_facts(Some(true)), &config, &mut runner)?;
            similar_asserts::assert_eq!(
                std::fs::read_to_string(&config.grub_defaults)?,
                GRUB_FIXED
            );
            assert_eq!(runner.issued.len(), ncommands, "{arch}");
        }
        Ok(())
    }

    #[test]
    fn test_add_leaves_grub_defaults() -> Result<()> {
        for error_detected in [Some(false), None] {
            let td = tempfile::tempdir()?;
            let config = grub_config(&td, Architecture::X86_64)?;
            let mut runner = RecordingRunner::default();
            correct_and_add_boot_entry(&grub_facts(error_detected), &config, &mut runner)?;
            similar_asserts::assert_eq!(
                std::fs::read_to_string(&config.grub_defaults)?,
                GRUB_WRONG
            );
            assert_eq!(runner.issued.len(), 2);
        }
        Ok(())
    }

    #[test]
    fn test_add_grub_correction_failure() -> Result<()> {
        let td = tempfile::tempdir()?;
        let mut config = grub_config(&td, Architecture::S390x)?;
        config.grub_defaults = Utf8PathBuf::from_path_buf(td.path().join("missing")).unwrap();
        let mut runner = RecordingRunner::default();
        let e = correct_and_add_boot_entry(&grub_facts(Some(true)), &config, &mut runner)
            .err()
            .unwrap();
        assert!(format!("{e:#}").starts_with("Correcting "), "{e:#}");
        assert!(runner.issued.is_empty());
        Ok(())
    }

    fn write_facts(buf: &str) -> Result<(tempfile::TempDir, Utf8PathBuf)> {
        let td = tempfile::tempdir()?;
        let path = Utf8PathBuf::from_path_buf(td.path().join("facts.jsonl")).unwrap();
        std::fs::write(&path, buf)?;
        Ok((td, path))
    }

    #[test]
    fn test_boot_paths() -> Result<()> {
        let (_td, path) = write_facts(indoc! { r#"
            {"kind": "BootContent", "data": {"kernel_path": "/boot/vmlinuz-upgrade.x86_64", "initram_path": "/boot/initramfs-upgrade.x86_64.img"}}
        "# })?;
        let mut out = Vec::new();
        boot_paths(FactsOpts { facts: Some(path) }, &mut out)?;
        similar_asserts::assert_eq!(
            String::from_utf8(out)?,
            "/boot/vmlinuz-upgrade.x86_64\n/boot/initramfs-upgrade.x86_64.img\n"
        );

        let (_td, path) = write_facts("")?;
        let e = boot_paths(FactsOpts { facts: Some(path) }, std::io::sink())
            .err()
            .unwrap();
        assert!(format!("{e:#}").contains("Could not locate the kernel and initramfs"));
        Ok(())
    }

    #[test]
    fn test_check_quagga() -> Result<()> {
        let (td, path) = write_facts(indoc! { r#"
            {"kind": "QuaggaToFrrFacts", "data": {"active_daemons": ["zebra", "babeld"], "enabled_daemons": []}}
        "# })?;
        let mut out = Vec::new();
        let opts = CheckQuaggaOpts {
            facts: FactsOpts {
                facts: Some(path.clone()),
            },
            report_file: None,
        };
        check_quagga(opts, &mut out)?;
        let v: serde_json::Value = serde_json::from_slice(&out)?;
        assert_eq!(v["severity"], "high");
        assert_eq!(v["flags"], serde_json::json!(["inhibitor"]));

        let report_file = Utf8PathBuf::from_path_buf(td.path().join("reports.jsonl")).unwrap();
        let opts = CheckQuaggaOpts {
            facts: FactsOpts { facts: Some(path) },
            report_file: Some(report_file.clone()),
        };
        let mut out = Vec::new();
        check_quagga(opts, &mut out)?;
        assert!(out.is_empty());
        assert_eq!(std::fs::read_to_string(&report_file)?.lines().count(), 1);

        let (_td, path) = write_facts("")?;
        let mut out = Vec::new();
        let opts = CheckQuaggaOpts {
            facts: FactsOpts { facts: Some(path) },
            report_file: None,
        };
        check_quagga(opts, &mut out)?;
        assert!(out.is_empty());
        Ok(())
    }

    #[test]
    fn test_print_config() -> Result<()> {
        let opts = BootEntryOpts {
            facts: FactsOpts {
                facts: Some("/run/facts.jsonl".into()),
            },
            arch: Some(Architecture::S390x),
        };
        let mut out = Vec::new();
        print_config(opts, &mut out)?;
        let v: serde_json::Value = serde_json::from_slice(&out)?;
        assert_eq!(v["architecture"], "s390x");
        assert_eq!(v["facts-path"], "/run/facts.jsonl");
        Ok(())
    }
}
