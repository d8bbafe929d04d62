//! Check for Quagga daemons that have no FRR replacement.

use indoc::indoc;

use crate::error::BootResult;
use crate::facts::{FactSource, QuaggaToFrrFacts};
use crate::report::{Flag, Remediation, Report, Severity, Tag};

const BABELD: &str = "babeld";

fn uses_babeld(facts: &QuaggaToFrrFacts) -> bool {
    facts
        .active_daemons
        .iter()
        .chain(facts.enabled_daemons.iter())
        .any(|d| d == BABELD)
}

/// babeld was part of quagga but isn't shipped with FRR, so a system
/// relying on it can't be upgraded as is.
pub(crate) fn check_babeld(facts: &impl FactSource) -> BootResult<Option<Report>> {
    let Some(quagga) = facts.latest::<QuaggaToFrrFacts>()? else {
        tracing::debug!("babeld not used, moving on.");
        return Ok(None);
    };
    if !uses_babeld(&quagga) {
        tracing::debug!("babeld not active or enabled");
        return Ok(None);
    }
    Ok(Some(Report {
        title: "Babeld is not available in FRR".into(),
        summary: indoc! { "
            babeld daemon which was a part of quagga implementation on the source system \
            is not available in FRR on the target system due to licensing issues." }
        .into(),
        severity: Severity::High,
        tags: vec![Tag::Network, Tag::Services],
        remediation: Some(Remediation {
            hint: "Please use RIP, OSPF or EIGRP instead of Babel".into(),
        }),
        flags: vec![Flag::Inhibitor],
    }))
}
