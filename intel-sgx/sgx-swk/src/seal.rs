/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use openssl::rand::rand_bytes;
use openssl::symm::{decrypt_aead, encrypt_aead, Cipher};

use crate::{Error, Result, SWK_SIZE};

pub const GCM_IV_LEN: usize = 12;
pub const GCM_TAG_LEN: usize = 16;
/// Bytes added by [`seal_secret`] on top of the plaintext length.
pub const SEALED_OVERHEAD: usize = GCM_IV_LEN + GCM_TAG_LEN;

fn check_key(key: &[u8]) -> Result<()> {
    if key.len() != SWK_SIZE {
        return Err(Error::KeyLength { actual: key.len(), expected: SWK_SIZE });
    }
    Ok(())
}

/// Encrypts `plaintext` with AES-256-GCM under a fresh random IV.
///
/// The output is laid out as `IV (12) || ciphertext || tag (16)`, which is
/// what the enclave expects to receive.
pub fn seal_secret(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    check_key(key)?;

    let mut iv = [0u8; GCM_IV_LEN];
    rand_bytes(&mut iv).map_err(Error::Randomness)?;
    let mut tag = [0u8; GCM_TAG_LEN];
    let ciphertext = encrypt_aead(Cipher::aes_256_gcm(), key, Some(&iv), &[], plaintext, &mut tag)
        .map_err(Error::Crypto)?;

    let mut sealed = Vec::with_capacity(SEALED_OVERHEAD + ciphertext.len());
    sealed.extend_from_slice(&iv);
    sealed.extend_from_slice(&ciphertext);
    sealed.extend_from_slice(&tag);
    Ok(sealed)
}

/// Reverses [`seal_secret`]. Any modification of the IV, ciphertext or tag
/// yields [`Error::Authentication`].
pub fn open_secret(key: &[u8], sealed: &[u8]) -> Result<Vec<u8>> {
    check_key(key)?;
    if sealed.len() < SEALED_OVERHEAD {
        return Err(Error::Authentication);
    }

    let (iv, rest) = sealed.split_at(GCM_IV_LEN);
    let (ciphertext, tag) = rest.split_at(rest.len() - GCM_TAG_LEN);
    decrypt_aead(Cipher::aes_256_gcm(), key, Some(iv), &[], ciphertext, tag)
        .map_err(|_| Error::Authentication)
}
