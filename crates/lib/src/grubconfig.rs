//! Repair of a known defect in the grub defaults file.
//!
//! Some tooling rewrites `/etc/default/grub` leaving the closing quote of
//! `GRUB_CMDLINE_LINUX` on a line of its own (or otherwise misplaced),
//! which breaks `grub2-mkconfig` and grubby. The correction collects the
//! value, drops every double quote from it and writes it back as a single
//! properly quoted line. Already well-formed input comes back unchanged, so
//! the correction can be applied any number of times.

use std::borrow::Cow;
use std::sync::OnceLock;

use camino::Utf8Path;
use cap_std_ext::cap_std;
use cap_std_ext::cap_std::fs::Dir;
use cap_std_ext::dirext::CapStdExtDirExt;
use regex::Regex;

use crate::error::{BootResult, UpgradeBootError};

const CMDLINE_KEY: &str = "GRUB_CMDLINE_LINUX";

fn cmdline_key_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^GRUB_CMDLINE_LINUX=").unwrap())
}

/// The value ends at the next assignment or comment line.
fn value_end_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^(?:GRUB_|#)").unwrap())
}

fn is_well_quoted(v: &str) -> bool {
    if v.contains('\n') {
        return false;
    }
    ['"', '\''].into_iter().any(|q| {
        v.len() >= 2 && v.starts_with(q) && v.ends_with(q) && v.matches(q).count() == 2
    })
}

/// Apply the correction to the contents of a grub defaults file.
pub(crate) fn correct_grub_defaults(input: &str) -> Cow<'_, str> {
    let Some(key) = cmdline_key_re().find(input) else {
        tracing::debug!("No {CMDLINE_KEY} assignment found");
        return Cow::Borrowed(input);
    };
    let value_start = key.end();
    let value_end = value_end_re()
        .find_at(input, value_start)
        .map(|m| m.start())
        .unwrap_or(input.len());
    let region = &input[value_start..value_end];
    let value = region.trim_end();
    let trailing = &region[value.len()..];
    if is_well_quoted(value) {
        return Cow::Borrowed(input);
    }

    let unquoted = value.replace('"', "");
    let joined = unquoted
        .lines()
        .map(str::trim)
        .filter(|l| !l.is_empty())
        .collect::<Vec<_>>()
        .join(" ");
    tracing::debug!("Correcting {CMDLINE_KEY} to {joined:?}");
    let mut r = String::with_capacity(input.len());
    r.push_str(&input[..value_start]);
    r.push('"');
    r.push_str(&joined);
    r.push('"');
    r.push_str(trailing);
    r.push_str(&input[value_end..]);
    Cow::Owned(r)
}

/// Correct the grub defaults file at `path` in place.
///
/// The file is read completely before anything is written, and the new
/// contents replace it atomically with the original permissions.
pub(crate) fn fix_grub_config_error(path: &Utf8Path) -> BootResult<()> {
    let io_err = |e| UpgradeBootError::config_patch_io(path, e);
    // Symlinks are followed so that the target is rewritten, not the link.
    let real = path.canonicalize_utf8().map_err(io_err)?;
    let (Some(parent), Some(name)) = (real.parent(), real.file_name()) else {
        return Err(io_err(std::io::Error::new(
            std::io::ErrorKind::InvalidInput,
            "path is not a regular file",
        )));
    };
    if real != path {
        tracing::debug!("{path} resolves to {real}");
    }
    let dir = Dir::open_ambient_dir(parent, cap_std::ambient_authority()).map_err(io_err)?;
    let orig = dir.read_to_string(name).map_err(io_err)?;
    let corrected = correct_grub_defaults(&orig);
    if corrected == orig {
        tracing::debug!("{path} needs no correction");
        return Ok(());
    }
    let perms = dir.metadata(name).map_err(io_err)?.permissions();
    dir.atomic_write_with_perms(name, corrected.as_bytes(), perms)
        .map_err(io_err)?;
    tracing::info!("Corrected {CMDLINE_KEY} in {path}");
    Ok(())
}
