/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use byteorder::{ByteOrder, LittleEndian};
use openssl::bn::BigNum;
use openssl::encrypt::{Decrypter, Encrypter};
use openssl::hash::MessageDigest;
use openssl::pkey::{HasPublic, PKey, PKeyRef, Private, Public};
use openssl::rsa::{Padding, Rsa, RsaRef};
use zeroize::Zeroizing;

use crate::{Error, Result, Swk, SWK_SIZE};

/// Length of the little-endian public exponent prefix.
pub const EXPONENT_LEN: usize = 4;

/// RSA public key of an attested enclave.
pub struct EnclavePublicKey {
    key: PKey<Public>,
}

impl EnclavePublicKey {
    /// Parses the enclave export format: `e` as a 4-byte little-endian
    /// integer, followed by the modulus `n` in little-endian byte order.
    pub fn from_enclave_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() <= EXPONENT_LEN {
            return Err(Error::KeyFormat(format!("key is {} bytes, too short to hold an exponent and modulus", bytes.len()).into()));
        }
        let (exponent, modulus) = bytes.split_at(EXPONENT_LEN);
        let e = LittleEndian::read_u32(exponent);
        if e < 3 || e % 2 == 0 {
            return Err(Error::KeyFormat(format!("invalid public exponent {}", e).into()));
        }

        // BigNum expects big-endian input
        let mut modulus = modulus.to_vec();
        modulus.reverse();
        let n = BigNum::from_slice(&modulus).map_err(Error::Crypto)?;
        if n.num_bits() < 512 || !n.is_bit_set(0) {
            return Err(Error::KeyFormat("modulus is not a plausible RSA modulus".into()));
        }
        let e = BigNum::from_u32(e).map_err(Error::Crypto)?;

        let rsa = Rsa::from_public_components(n, e).map_err(Error::Crypto)?;
        let key = PKey::from_rsa(rsa).map_err(Error::Crypto)?;
        Ok(EnclavePublicKey { key })
    }

    /// Serializes an RSA key into the enclave export format.
    pub fn encode<T: HasPublic>(rsa: &RsaRef<T>) -> Result<Vec<u8>> {
        let e = rsa.e().to_vec();
        if e.len() > EXPONENT_LEN {
            return Err(Error::KeyFormat("public exponent does not fit in 4 bytes".into()));
        }
        let mut padded = [0u8; EXPONENT_LEN];
        padded[EXPONENT_LEN - e.len()..].copy_from_slice(&e);

        let mut out = Vec::with_capacity(EXPONENT_LEN + rsa.size() as usize);
        out.extend(padded.iter().rev());
        out.extend(rsa.n().to_vec().iter().rev());
        Ok(out)
    }

    pub fn key(&self) -> &PKeyRef<Public> {
        &self.key
    }

    pub fn bits(&self) -> u32 {
        self.key.bits()
    }

    /// Encrypts the SWK with RSA-OAEP (SHA-256, MGF1-SHA-256).
    pub fn wrap(&self, swk: &Swk) -> Result<Vec<u8>> {
        let mut encrypter = Encrypter::new(&self.key).map_err(Error::Crypto)?;
        encrypter.set_rsa_padding(Padding::PKCS1_OAEP).map_err(Error::Crypto)?;
        encrypter.set_rsa_oaep_md(MessageDigest::sha256()).map_err(Error::Crypto)?;
        encrypter.set_rsa_mgf1_md(MessageDigest::sha256()).map_err(Error::Crypto)?;

        let mut wrapped = vec![0; encrypter.encrypt_len(swk.as_bytes()).map_err(Error::Crypto)?];
        let len = encrypter.encrypt(swk.as_bytes(), &mut wrapped).map_err(Error::Crypto)?;
        wrapped.truncate(len);
        Ok(wrapped)
    }
}

/// Wraps `swk` towards a public key given in the enclave export format.
pub fn wrap_swk(swk: &Swk, enclave_public_key: &[u8]) -> Result<Vec<u8>> {
    let key = EnclavePublicKey::from_enclave_bytes(enclave_public_key)?;
    debug!("wrapping SWK for a {}-bit enclave key", key.bits());
    key.wrap(swk)
}

/// Recovers an SWK wrapped by [`wrap_swk`].
///
/// All failures, including a plaintext of the wrong length, collapse into
/// [`Error::Unwrap`].
pub fn unwrap_swk(wrapped: &[u8], key: &PKeyRef<Private>) -> Result<Swk> {
    let decrypt = || -> std::result::Result<Zeroizing<Vec<u8>>, openssl::error::ErrorStack> {
        let mut decrypter = Decrypter::new(key)?;
        decrypter.set_rsa_padding(Padding::PKCS1_OAEP)?;
        decrypter.set_rsa_oaep_md(MessageDigest::sha256())?;
        decrypter.set_rsa_mgf1_md(MessageDigest::sha256())?;

        let mut plain = Zeroizing::new(vec![0; decrypter.decrypt_len(wrapped)?]);
        let len = decrypter.decrypt(wrapped, &mut plain)?;
        plain.truncate(len);
        Ok(plain)
    };

    match decrypt() {
        Ok(plain) if plain.len() == SWK_SIZE => Swk::from_bytes(&plain).map_err(|_| Error::Unwrap),
        _ => Err(Error::Unwrap),
    }
}
