/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */
use std::borrow::Cow;
use std::io;
use std::path::PathBuf;

use crate::policy::PolicyField;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Failure talking to the verification service.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid SQVS client configuration: {0}")]
    Configuration(Cow<'static, str>),
    #[error("request to SQVS failed")]
    Transport(#[source] BoxError),
    #[error("SQVS responded with HTTP status {0}")]
    Status(u16),
    #[error("unable to decode SQVS response")]
    Decode(#[source] BoxError),
}

/// Failure loading a quote policy or checking attributes against it.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    #[error("unable to read quote policy {}", path.display())]
    Read { path: PathBuf, #[source] cause: io::Error },
    #[error("invalid quote policy: {0}")]
    Invalid(Cow<'static, str>),
    #[error("quote attribute {field} does not match the policy")]
    Mismatch { field: PolicyField },
    #[error("quote user data does not match the enclave public key and nonce")]
    UserDataMismatch,
}
