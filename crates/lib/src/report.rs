//! Structured reports about the system being upgraded.
//!
//! Reports are emitted as JSON, one per line, for the upgrade host to
//! aggregate. This is the serialized schema, hence public.

use std::io::Write;

use anyhow::Result;
use camino::Utf8Path;
use fn_error_context::context;
use serde::Serialize;

/// How serious a reported problem is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Severity {
    /// Informational only
    Info,
    /// Probably harmless
    Low,
    /// Likely to need attention
    Medium,
    /// Breaks functionality on the upgraded system
    High,
}

/// The area of the system a report concerns.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Tag {
    /// Bootloader and kernel
    Boot,
    /// Networking
    Network,
    /// System services
    Services,
}

/// Special handling requested by a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Flag {
    /// The upgrade must not proceed until this is resolved.
    Inhibitor,
}

/// What the administrator can do about a problem.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Remediation {
    /// Human readable instructions
    pub hint: String,
}

/// A single finding about the system.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub struct Report {
    /// One line description
    pub title: String,
    /// Longer explanation
    pub summary: String,
    /// How bad it is
    pub severity: Severity,
    /// Affected areas
    pub tags: Vec<Tag>,
    /// How to resolve it, if known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remediation: Option<Remediation>,
    /// Special handling
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub flags: Vec<Flag>,
}

impl Report {
    /// Whether this report blocks the upgrade.
    pub fn is_inhibitor(&self) -> bool {
        self.flags.contains(&Flag::Inhibitor)
    }
}

/// Write reports as JSON lines.
pub(crate) fn write_reports<'a>(
    reports: impl IntoIterator<Item = &'a Report>,
    mut out: impl Write,
) -> Result<()> {
    for report in reports {
        serde_json::to_writer(&mut out, report)?;
        writeln!(out)?;
    }
    out.flush()?;
    Ok(())
}

/// Append reports to the report file at `path`, creating it if needed.
#[context("Appending reports to {path}")]
pub(crate) fn append_reports<'a>(
    reports: impl IntoIterator<Item = &'a Report>,
    path: &Utf8Path,
) -> Result<()> {
    let f = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    write_reports(reports, std::io::BufWriter::new(f))
}
