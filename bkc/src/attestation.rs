/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use std::io::Write;
use std::path::Path;

use chrono::{DateTime, Utc};

use crate::config::BkcConfig;
use crate::context::{write_file, AttestationContext, DEFAULT_TAG_ATTRIBUTES};
use crate::flavor::{generate_flavors, FlavorProvider};
use crate::manifest::{build_host_manifest, HostManifest, PcrManifestVerifier};
use crate::platform::PlatformInfoSource;
use crate::report::{compute_trust_report, evaluate_pass_fail, ManifestVerifier, TrustReport};
use crate::tpm::{TpmProvider, TpmSecrets};
use crate::{Error, Result};

/// The external components an attestation run talks to.
pub struct Collaborators<'a> {
    pub platform: &'a dyn PlatformInfoSource,
    pub tpm: &'a dyn TpmProvider,
    pub pcr_verifier: &'a dyn PcrManifestVerifier,
    pub flavor_provider: &'a dyn FlavorProvider,
    pub manifest_verifier: &'a dyn ManifestVerifier,
}

#[derive(Debug)]
pub struct AttestationOutcome {
    pub passed: bool,
    /// `YYYY.MM.DD-HH.MM.SS`, UTC. Also the name of the saved manifest and
    /// report files.
    pub timestamp: String,
    pub manifest: HostManifest,
    pub report: TrustReport,
}

pub fn format_timestamp(t: &DateTime<Utc>) -> String {
    t.format("%Y.%m.%d-%H.%M.%S").to_string()
}

/// Runs one attestation of this host and writes the
/// `Attestation at <timestamp>: PASSED|FAILED` line to `w`.
///
/// Flavors are generated on the first run and reused afterwards. A
/// context that was not loaded from disk is saved once the run completes.
pub fn run_attestation<W: Write + ?Sized>(
    w: &mut W,
    context: &mut AttestationContext,
    collaborators: &Collaborators,
    secrets: &TpmSecrets,
    config: &BkcConfig,
) -> Result<AttestationOutcome> {
    let host_info = collaborators.platform.platform_info().map_err(Error::PlatformInfo)?;
    let asset_tag = context.issue_asset_tag(&host_info.hardware_uuid, DEFAULT_TAG_ATTRIBUTES)?;

    let manifest = build_host_manifest(
        context,
        host_info,
        collaborators.tpm,
        collaborators.pcr_verifier,
        secrets,
        config,
        &asset_tag.digest,
    )?;

    if context.flavors().is_none() {
        let flavors = generate_flavors(collaborators.flavor_provider, &manifest, &asset_tag.certificate, context)?;
        context.set_flavors(flavors);
    }
    let flavors = context.flavors().unwrap_or_default();
    let report = compute_trust_report(&manifest, flavors, context.ca_cert(), collaborators.manifest_verifier)?;

    let passed = evaluate_pass_fail(&report, &config.npw_acm_marker);
    let timestamp = format_timestamp(&Utc::now());
    writeln!(w, "Attestation at {}: {}", timestamp, if passed { "PASSED" } else { "FAILED" }).map_err(Error::Output)?;
    if passed {
        info!("attestation passed with {} rule results", report.results.len());
    } else {
        for result in report.untrusted() {
            warn!("untrusted: {} of flavor {} {:?}", result.rule.rule_name, result.flavor_id, result.faults);
        }
    }

    context.save(config)?;
    save_manifest_and_report(config, &timestamp, &manifest, &report)?;
    Ok(AttestationOutcome { passed, timestamp, manifest, report })
}

fn save_manifest_and_report(config: &BkcConfig, timestamp: &str, manifest: &HostManifest, report: &TrustReport) -> Result<()> {
    let save = |dir: &Path, json: Vec<u8>| write_file(&dir.join(timestamp), &json);
    save(config.manifest_dir.as_path(), serde_json::to_vec(manifest)?)?;
    save(config.report_dir.as_path(), serde_json::to_vec(report)?)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;

    #[test]
    fn timestamp_format() {
        let t = Utc.with_ymd_and_hms(2021, 3, 7, 4, 5, 9).unwrap();
        assert_eq!(format_timestamp(&t), "2021.03.07-04.05.09");
    }
}
