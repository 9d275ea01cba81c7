/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use std::borrow::Cow;
use std::io;
use std::path::PathBuf;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("failed to retrieve platform info")]
    PlatformInfo(#[source] BoxError),
    #[error("failed to get TPM quote")]
    TpmQuote(#[source] BoxError),
    #[error("malformed TPM quote: {0}")]
    MalformedQuote(Cow<'static, str>),
    #[error("event log {}: {reason}", path.display())]
    EventLog { path: PathBuf, reason: Cow<'static, str> },
    #[error("failed to read measurement {}", path.display())]
    Measurement { path: PathBuf, #[source] cause: io::Error },
    #[error("failed to generate platform flavor")]
    FlavorGeneration(#[source] BoxError),
    #[error("failed to sign {0}")]
    Signing(Cow<'static, str>, #[source] openssl::error::ErrorStack),
    #[error("verification failed: {0}")]
    Verification(Cow<'static, str>),
    #[error("attestation context: {0}")]
    Context(Cow<'static, str>),
    #[error("I/O error on {}", path.display())]
    Io { path: PathBuf, #[source] cause: io::Error },
    #[error("failed to write output")]
    Output(#[source] io::Error),
    #[error("JSON encoding failed")]
    Json(#[from] serde_json::Error),
}

impl Error {
    pub(crate) fn io<P: Into<PathBuf>>(path: P, cause: io::Error) -> Self {
        Error::Io { path: path.into(), cause }
    }

    pub(crate) fn context<E: std::fmt::Display>(what: &'static str) -> impl FnOnce(E) -> Self {
        move |e| Error::Context(format!("{}: {}", what, e).into())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
