/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use std::fmt;

use openssl::rand::rand_bytes;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::{Error, Result};

/// Size in bytes of a symmetric wrapping key (AES-256).
pub const SWK_SIZE: usize = 32;

/// A symmetric wrapping key. The key material is wiped when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct Swk([u8; SWK_SIZE]);

impl Swk {
    /// Draws a fresh key from the system CSPRNG.
    pub fn generate() -> Result<Self> {
        let mut swk = Swk([0; SWK_SIZE]);
        rand_bytes(&mut swk.0).map_err(Error::Randomness)?;
        Ok(swk)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SWK_SIZE {
            return Err(Error::KeyLength { actual: bytes.len(), expected: SWK_SIZE });
        }
        let mut swk = Swk([0; SWK_SIZE]);
        swk.0.copy_from_slice(bytes);
        Ok(swk)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl AsRef<[u8]> for Swk {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

impl PartialEq for Swk {
    fn eq(&self, other: &Swk) -> bool {
        openssl::memcmp::eq(&self.0, &other.0)
    }
}

impl Eq for Swk {}

impl fmt::Debug for Swk {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("Swk(..)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generated_keys_differ() {
        let a = Swk::generate().unwrap();
        let b = Swk::generate().unwrap();
        assert_eq!(a.as_bytes().len(), SWK_SIZE);
        assert_ne!(a, b);
    }

    #[test]
    fn from_bytes_checks_length() {
        match Swk::from_bytes(&[0u8; 16]) {
            Err(Error::KeyLength { actual: 16, expected: SWK_SIZE }) => {}
            other => panic!("unexpected result: {:?}", other),
        }
        assert!(Swk::from_bytes(&[7u8; SWK_SIZE]).is_ok());
    }

    #[test]
    fn debug_does_not_print_key() {
        let swk = Swk::from_bytes(&[0xab; SWK_SIZE]).unwrap();
        assert_eq!(format!("{:?}", swk), "Swk(..)");
    }
}
