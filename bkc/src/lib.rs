/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Attestation of a TPM host against flavors derived from its own first
//! run.
//!
//! A run collects platform information, quotes all PCRs of the SHA1 and
//! SHA256 banks, certifies the AIK and an asset tag with a local CA, and
//! assembles the [`HostManifest`]. The first run turns the manifest into
//! signed flavors; every run evaluates the manifest against them and
//! reports `PASSED` or `FAILED`. The TPM, platform information source,
//! quote verifier, flavor generator and rule verifier are supplied by the
//! caller through the traits in this crate.

#[macro_use]
extern crate log;

pub mod attestation;
pub mod config;
pub mod context;
mod error;
pub mod eventlog;
pub mod flavor;
pub mod manifest;
pub mod platform;
pub mod report;
pub mod tpm;

pub use crate::attestation::{run_attestation, AttestationOutcome, Collaborators};
pub use crate::config::BkcConfig;
pub use crate::context::{AssetTag, AttestationContext};
pub use crate::error::{BoxError, Error, Result};
pub use crate::flavor::{Flavor, FlavorProvider, SignedFlavor};
pub use crate::manifest::{HostManifest, PcrManifest, PcrManifestVerifier};
pub use crate::platform::{check_trusted_boot, print_platform_info, PlatformInfo, PlatformInfoSource};
pub use crate::report::{evaluate_pass_fail, ManifestVerifier, TrustReport};
pub use crate::tpm::{PcrBank, TpmProvider, TpmSecrets};
