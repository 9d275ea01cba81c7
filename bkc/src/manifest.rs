/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Host manifest assembly: platform info, verified PCR values, AIK and
//! asset tag, event log and measurement files.

use std::fs;
use std::path::Path;

use openssl::rand::rand_bytes;
use openssl::x509::X509Ref;
use serde::{Deserialize, Serialize};

use crate::config::BkcConfig;
use crate::context::AttestationContext;
use crate::error::BoxError;
use crate::eventlog::read_event_log;
use crate::platform::PlatformInfo;
use crate::tpm::{all_pcrs, PcrBank, QuoteInfo, TpmProvider, TpmSecrets, PCR_BANKS, TPM_NONCE_LEN};
use crate::{Error, Result};

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Pcr {
    pub index: u8,
    pub bank: PcrBank,
    /// Hex digest.
    pub value: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq, Eq)]
pub struct PcrManifest {
    pub sha1_pcrs: Vec<Pcr>,
    pub sha256_pcrs: Vec<Pcr>,
    /// The sanitized event log the PCR values were replayed from.
    pub pcr_event_log: String,
}

impl PcrManifest {
    pub fn get(&self, bank: PcrBank, index: u8) -> Option<&Pcr> {
        let pcrs = match bank {
            PcrBank::Sha1 => &self.sha1_pcrs,
            PcrBank::Sha256 => &self.sha256_pcrs,
        };
        pcrs.iter().find(|pcr| pcr.index == index)
    }
}

/// Checks a TPM quote against the AIK certificate and extracts the PCR
/// values it attests to.
pub trait PcrManifestVerifier {
    fn verify_quote(&self, event_log: &str, extra_data: &[u8], quote: &[u8], aik_cert: &X509Ref) -> std::result::Result<PcrManifest, BoxError>;
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct HostManifest {
    pub host_info: PlatformInfo,
    pub pcr_manifest: PcrManifest,
    /// Base64 DER.
    pub aik_certificate: String,
    pub asset_tag_digest: String,
    /// Base64 DER. The binding key is not used for attestation, so this
    /// carries the CA certificate.
    pub binding_key_certificate: String,
    pub measurement_xmls: Vec<String>,
}

/// Contents of every `*.xml` file in `dir`, ordered by file name.
pub fn read_measurement_xmls(dir: &Path) -> Result<Vec<String>> {
    let mut paths = fs::read_dir(dir)
        .map_err(|e| Error::io(dir, e))?
        .map(|entry| entry.map(|e| e.path()).map_err(|e| Error::io(dir, e)))
        .collect::<Result<Vec<_>>>()?;
    paths.retain(|path| path.extension().map_or(false, |ext| ext == "xml") && path.is_file());
    paths.sort();

    paths.iter()
        .map(|path| fs::read_to_string(path).map_err(|cause| Error::Measurement { path: path.clone(), cause }))
        .collect()
}

/// Quotes all PCRs of both banks, certifies the AIK and combines the
/// result with the event log and measurement files.
pub fn build_host_manifest<T, V>(
    context: &AttestationContext,
    host_info: PlatformInfo,
    tpm: &T,
    pcr_verifier: &V,
    secrets: &TpmSecrets,
    config: &BkcConfig,
    asset_tag_digest: &str,
) -> Result<HostManifest>
where
    T: TpmProvider + ?Sized,
    V: PcrManifestVerifier + ?Sized,
{
    let mut nonce = [0u8; TPM_NONCE_LEN];
    rand_bytes(&mut nonce).map_err(|e| Error::TpmQuote(e.into()))?;
    let quote = tpm.quote(&secrets.aik_secret, &nonce, &PCR_BANKS, &all_pcrs()).map_err(Error::TpmQuote)?;
    debug!("received {} byte TPM quote", quote.len());

    tpm.create_aik(&secrets.owner_secret, &secrets.aik_secret).map_err(Error::TpmQuote)?;
    let aik_modulus = tpm.aik_public_key().map_err(Error::TpmQuote)?;
    let aik_name = tpm.aik_name().map_err(Error::TpmQuote)?;
    let aik_cert = context.certify_aik(&aik_modulus, &aik_name)?;

    let event_log = read_event_log(&config.event_log_file)?;

    let info = QuoteInfo::parse(&quote)?;
    let pcr_manifest = pcr_verifier.verify_quote(&event_log, info.extra_data, &quote, &aik_cert)
        .map_err(|e| Error::Verification(format!("TPM quote does not verify: {}", e).into()))?;

    if asset_tag_digest.is_empty() {
        return Err(Error::Context("asset tag has not been created".into()));
    }
    let measurement_xmls = read_measurement_xmls(&config.measurement_dir)?;
    info!("host manifest has {} SHA1 and {} SHA256 PCRs, {} measurement files",
        pcr_manifest.sha1_pcrs.len(), pcr_manifest.sha256_pcrs.len(), measurement_xmls.len());

    Ok(HostManifest {
        host_info,
        pcr_manifest,
        aik_certificate: base64::encode(aik_cert.to_der().map_err(|e| Error::Signing("AIK certificate".into(), e))?),
        asset_tag_digest: asset_tag_digest.to_owned(),
        binding_key_certificate: base64::encode(context.ca_cert().to_der().map_err(|e| Error::Signing("CA certificate".into(), e))?),
        measurement_xmls,
    })
}
