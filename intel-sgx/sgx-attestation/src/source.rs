/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use std::sync::Arc;

use sgx_swk::Swk;

use crate::error::BoxError;
use crate::nonce::Nonce;

/// Access to the enclave holding the attested key pair.
///
/// The enclave bridge itself lives outside this crate; the prover side of
/// the handshake only ever talks to it through this trait.
pub trait AttestationSource: Send + Sync {
    /// RSA public key in the enclave export format (little-endian exponent
    /// and modulus).
    fn public_key(&self) -> Result<Vec<u8>, BoxError>;

    /// A quote whose report data is SHA-256 of the public key followed by
    /// the nonce's big-endian bytes.
    fn quote(&self, nonce: Option<&Nonce>) -> Result<Vec<u8>, BoxError>;

    /// RSA-OAEP decryption of a wrapped SWK inside the enclave.
    fn unwrap_key(&self, wrapped: &[u8]) -> Result<Swk, BoxError>;
}

impl<T: AttestationSource + ?Sized> AttestationSource for Arc<T> {
    fn public_key(&self) -> Result<Vec<u8>, BoxError> {
        (**self).public_key()
    }

    fn quote(&self, nonce: Option<&Nonce>) -> Result<Vec<u8>, BoxError> {
        (**self).quote(nonce)
    }

    fn unwrap_key(&self, wrapped: &[u8]) -> Result<Swk, BoxError> {
        (**self).unwrap_key(wrapped)
    }
}

impl<T: AttestationSource + ?Sized> AttestationSource for Box<T> {
    fn public_key(&self) -> Result<Vec<u8>, BoxError> {
        (**self).public_key()
    }

    fn quote(&self, nonce: Option<&Nonce>) -> Result<Vec<u8>, BoxError> {
        (**self).quote(nonce)
    }

    fn unwrap_key(&self, wrapped: &[u8]) -> Result<Swk, BoxError> {
        (**self).unwrap_key(wrapped)
    }
}
