/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Trust reports and the pass/fail decision.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::BoxError;
use crate::flavor::{FlavorPart, SignedFlavor};
use crate::manifest::HostManifest;
use crate::tpm::PcrBank;
use crate::{Error, Result};

/// Failures at these PCRs are tolerated when the NPW ACM marker exists.
/// Non-production ACMs extend PCR 17 and 18 with values no flavor matches.
pub const EXEMPT_PCR_INDICES: [u8; 2] = [17, 18];

pub const RULE_PCR_MATCHES_CONSTANT: &str = "PcrMatchesConstant";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ExpectedPcr {
    pub index: u8,
    pub bank: PcrBank,
    pub value: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Rule {
    pub rule_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_pcr: Option<ExpectedPcr>,
    #[serde(default)]
    pub markers: Vec<FlavorPart>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Fault {
    pub name: String,
    pub description: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RuleResult {
    pub rule: Rule,
    pub flavor_id: String,
    pub trusted: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub faults: Vec<Fault>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct TrustReport {
    pub results: Vec<RuleResult>,
}

impl TrustReport {
    pub fn add_results<I: IntoIterator<Item = RuleResult>>(&mut self, results: I) {
        self.results.extend(results)
    }

    /// A report without results is not trusted.
    pub fn is_trusted(&self) -> bool {
        !self.results.is_empty() && self.results.iter().all(|r| r.trusted)
    }

    pub fn untrusted(&self) -> impl Iterator<Item = &RuleResult> {
        self.results.iter().filter(|r| !r.trusted)
    }

    /// True if there is at least one failure and every failing rule
    /// checks one of [`EXEMPT_PCR_INDICES`].
    pub fn only_exempt_failures(&self) -> bool {
        let mut untrusted = self.untrusted().peekable();
        untrusted.peek().is_some()
            && untrusted.all(|r| r.rule.expected_pcr.as_ref().map_or(false, |pcr| EXEMPT_PCR_INDICES.contains(&pcr.index)))
    }
}

/// Evaluates a host manifest against one signed flavor.
pub trait ManifestVerifier {
    fn verify(&self, manifest: &HostManifest, flavor: &SignedFlavor) -> std::result::Result<Vec<RuleResult>, BoxError>;
}

/// Checks every flavor signature against the CA certificate, then
/// collects the rule results of all flavors into one report.
pub fn compute_trust_report<V>(manifest: &HostManifest, flavors: &[SignedFlavor], signing_cert: &openssl::x509::X509Ref, verifier: &V) -> Result<TrustReport>
where
    V: ManifestVerifier + ?Sized,
{
    let mut report = TrustReport::default();
    for flavor in flavors {
        flavor.verify(signing_cert)?;
        let results = verifier.verify(manifest, flavor)
            .map_err(|e| Error::Verification(format!("failed to verify host manifest with flavor {}: {}", flavor.flavor.meta.id, e).into()))?;
        report.add_results(results);
    }
    Ok(report)
}

/// `passed = report.is_trusted()`, except that a report whose only
/// failures are at PCR 17 or 18 passes while `npw_acm_marker` exists.
pub fn evaluate_pass_fail(report: &TrustReport, npw_acm_marker: &Path) -> bool {
    if report.is_trusted() {
        return true;
    }
    if !npw_acm_marker.exists() {
        return false;
    }
    if report.only_exempt_failures() {
        warn!("trust report has failures at PCR 17/18 only; passing because {} exists", npw_acm_marker.display());
        true
    } else {
        false
    }
}

/// Evaluates the PCRs of each flavor with the `PcrMatchesConstant` rule.
#[derive(Clone, Copy, Debug, Default)]
pub struct PcrRuleVerifier;

impl ManifestVerifier for PcrRuleVerifier {
    fn verify(&self, manifest: &HostManifest, flavor: &SignedFlavor) -> std::result::Result<Vec<RuleResult>, BoxError> {
        let meta = &flavor.flavor.meta;
        Ok(flavor.flavor.pcrs.iter().map(|expected| {
            let actual = manifest.pcr_manifest.get(expected.bank, expected.index);
            let fault = match actual {
                None => Some(Fault {
                    name: "PcrValueMissing".into(),
                    description: format!("host manifest does not contain {} PCR {}", expected.bank, expected.index),
                }),
                Some(pcr) if !pcr.value.eq_ignore_ascii_case(&expected.value) => Some(Fault {
                    name: "PcrValueMismatch".into(),
                    description: format!("{} PCR {} is {}, expected {}", expected.bank, expected.index, pcr.value, expected.value),
                }),
                Some(_) => None,
            };
            RuleResult {
                rule: Rule {
                    rule_name: RULE_PCR_MATCHES_CONSTANT.into(),
                    expected_pcr: Some(ExpectedPcr { index: expected.index, bank: expected.bank, value: expected.value.clone() }),
                    markers: vec![meta.flavor_part],
                },
                flavor_id: meta.id.clone(),
                trusted: fault.is_none(),
                faults: fault.into_iter().collect(),
            }
        }).collect())
    }
}
