/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use std::borrow::Cow;

use openssl::error::ErrorStack;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed enclave public key: {0}")]
    KeyFormat(Cow<'static, str>),
    #[error("cryptographic operation failed")]
    Crypto(#[source] ErrorStack),
    /// Deliberately carries no detail, a failed RSA-OAEP decryption must
    /// not reveal why it failed.
    #[error("unable to unwrap the symmetric wrapping key")]
    Unwrap,
    #[error("invalid key length {actual}, expected {expected} bytes")]
    KeyLength { actual: usize, expected: usize },
    #[error("wrapped secret failed authentication")]
    Authentication,
    #[error("failed to obtain randomness from the system source")]
    Randomness(#[source] ErrorStack),
}
