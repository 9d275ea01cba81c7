/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use std::fmt;

use openssl::bn::{BigNum, MsbOption};

use crate::{Error, Result};

/// Bits of randomness in a verifier-generated nonce.
pub const NONCE_BITS: i32 = 128;
/// Upper bound on the binary size of a nonce accepted from a peer.
pub const NONCE_MAX_BYTES: usize = 64;

/// Per-handshake freshness token: an unsigned integer carried as a decimal
/// string, bound into the quote as its big-endian magnitude.
#[derive(Clone, PartialEq, Eq)]
pub struct Nonce {
    decimal: String,
    bytes: Vec<u8>,
}

impl Nonce {
    pub fn generate() -> Result<Self> {
        let mut n = BigNum::new()?;
        // top bit set, so the nonce is never zero and always NONCE_BITS long
        n.rand(NONCE_BITS, MsbOption::ONE, false)?;
        Ok(Nonce {
            decimal: n.to_dec_str()?.to_string(),
            bytes: n.to_vec(),
        })
    }

    /// Parses a nonce received from the verifier.
    pub fn from_decimal(decimal: &str) -> Result<Self> {
        if decimal.is_empty() || !decimal.bytes().all(|b| b.is_ascii_digit()) {
            return Err(Error::Protocol("nonce is not a decimal integer".into()));
        }
        let n = BigNum::from_dec_str(decimal)?;
        let bytes = n.to_vec();
        if bytes.is_empty() {
            return Err(Error::Protocol("nonce must not be zero".into()));
        }
        if bytes.len() > NONCE_MAX_BYTES {
            return Err(Error::Protocol(format!("nonce exceeds {} bytes", NONCE_MAX_BYTES).into()));
        }
        Ok(Nonce { decimal: n.to_dec_str()?.to_string(), bytes })
    }

    pub fn as_decimal(&self) -> &str {
        &self.decimal
    }

    /// Big-endian magnitude, without leading zeros.
    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }
}

impl fmt::Debug for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "Nonce({})", self.decimal)
    }
}

impl fmt::Display for Nonce {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(&self.decimal)
    }
}

/// The byte string whose SHA-256 an enclave places in its report data:
/// the exported public key followed by the nonce, if any.
pub fn user_data(public_key: &[u8], nonce: Option<&Nonce>) -> Vec<u8> {
    let mut data = public_key.to_vec();
    if let Some(nonce) = nonce {
        data.extend_from_slice(nonce.as_bytes());
    }
    data
}
