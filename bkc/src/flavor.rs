/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Flavors: the expected measurements of a host, signed by the CA.

use openssl::hash::MessageDigest;
use openssl::rand::rand_bytes;
use openssl::sign::Verifier;
use openssl::x509::X509Ref;
use serde::{Deserialize, Serialize};

use crate::context::AttestationContext;
use crate::error::BoxError;
use crate::manifest::HostManifest;
use crate::tpm::PcrBank;
use crate::{Error, Result};

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FlavorPart {
    Platform,
    Os,
    AssetTag,
    HostUnique,
    Software,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FlavorMeta {
    pub id: String,
    pub flavor_part: FlavorPart,
    pub label: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct FlavorPcr {
    pub bank: PcrBank,
    pub index: u8,
    pub value: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Flavor {
    pub meta: FlavorMeta,
    #[serde(default)]
    pub pcrs: Vec<FlavorPcr>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SignedFlavor {
    pub flavor: Flavor,
    /// Base64 RSA PKCS#1 v1.5 / SHA-384 signature over the JSON of `flavor`.
    pub signature: String,
}

impl SignedFlavor {
    pub fn sign(flavor: Flavor, context: &AttestationContext) -> Result<Self> {
        let signature = context.sign(&serde_json::to_vec(&flavor)?)?;
        Ok(SignedFlavor { flavor, signature: base64::encode(signature) })
    }

    pub fn verify(&self, signing_cert: &X509Ref) -> Result<()> {
        let id = &self.flavor.meta.id;
        let signature = base64::decode(&self.signature)
            .map_err(|e| Error::Verification(format!("flavor {} signature is not base64: {}", id, e).into()))?;
        let payload = serde_json::to_vec(&self.flavor)?;

        let verified = signing_cert.public_key()
            .and_then(|key| {
                let mut verifier = Verifier::new(MessageDigest::sha384(), &key)?;
                verifier.update(&payload)?;
                verifier.verify(&signature)
            })
            .map_err(|e| Error::Verification(format!("flavor {}: {}", id, e).into()))?;
        if verified {
            Ok(())
        } else {
            Err(Error::Verification(format!("flavor {} has an invalid signature", id).into()))
        }
    }
}

/// Derives unsigned flavor parts from a host manifest.
pub trait FlavorProvider {
    fn platform_flavors(&self, manifest: &HostManifest, asset_tag: &X509Ref) -> std::result::Result<Vec<Flavor>, BoxError>;
}

/// Generates the flavors for `manifest` and signs each with the CA key.
pub fn generate_flavors<P>(provider: &P, manifest: &HostManifest, asset_tag: &X509Ref, context: &AttestationContext) -> Result<Vec<SignedFlavor>>
where
    P: FlavorProvider + ?Sized,
{
    let flavors = provider.platform_flavors(manifest, asset_tag).map_err(Error::FlavorGeneration)?;
    if flavors.is_empty() {
        return Err(Error::FlavorGeneration("no flavor parts generated".into()));
    }
    info!("generated {} flavor parts", flavors.len());
    flavors.into_iter().map(|flavor| SignedFlavor::sign(flavor, context)).collect()
}

/// PCRs pinned by the platform flavor of a TXT host.
pub const DEFAULT_PLATFORM_PCRS: [u8; 3] = [0, 17, 18];

/// Builds a single platform flavor that pins the current values of the
/// selected PCRs.
#[derive(Clone, Debug)]
pub struct PcrFlavorProvider {
    pub bank: PcrBank,
    pub pcrs: Vec<u8>,
}

impl Default for PcrFlavorProvider {
    fn default() -> Self {
        PcrFlavorProvider { bank: PcrBank::Sha256, pcrs: DEFAULT_PLATFORM_PCRS.to_vec() }
    }
}

impl FlavorProvider for PcrFlavorProvider {
    fn platform_flavors(&self, manifest: &HostManifest, _asset_tag: &X509Ref) -> std::result::Result<Vec<Flavor>, BoxError> {
        let pcrs = self.pcrs.iter()
            .map(|&index| {
                manifest.pcr_manifest.get(self.bank, index)
                    .map(|pcr| FlavorPcr { bank: self.bank, index, value: pcr.value.clone() })
                    .ok_or_else(|| format!("host manifest has no {} PCR {}", self.bank, index))
            })
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let mut id = [0u8; 16];
        rand_bytes(&mut id)?;
        Ok(vec![Flavor {
            meta: FlavorMeta {
                id: id.iter().map(|b| format!("{:02x}", b)).collect(),
                flavor_part: FlavorPart::Platform,
                label: format!("BKC_{}", manifest.host_info.hardware_uuid),
            },
            pcrs,
        }])
    }
}
