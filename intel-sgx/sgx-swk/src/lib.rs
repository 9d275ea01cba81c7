/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Key exchange primitives used once an enclave has been attested.
//!
//! The verifier generates a fresh symmetric wrapping key (SWK), wraps it
//! towards the RSA public key the enclave bound into its quote, and then
//! seals application secrets under that SWK with AES-256-GCM. The enclave
//! side performs the inverse: [`unwrap_swk`] with its private key followed
//! by [`open_secret`].
//!
//! The enclave exports its public key in a little-endian layout: a 4-byte
//! exponent followed by the modulus. [`EnclavePublicKey`] converts between
//! that layout and OpenSSL keys.

#[macro_use]
extern crate log;

mod error;
mod key;
mod seal;
mod wrap;

pub use crate::error::Error;
pub use crate::key::{Swk, SWK_SIZE};
pub use crate::seal::{open_secret, seal_secret, GCM_IV_LEN, GCM_TAG_LEN, SEALED_OVERHEAD};
pub use crate::wrap::{unwrap_swk, wrap_swk, EnclavePublicKey, EXPONENT_LEN};

pub type Result<T> = std::result::Result<T, Error>;
