/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! An attestation source without hardware backing, and the matching
//! verifier. Quotes it produces prove nothing about the platform; they
//! exist for development setups and tests. A policy only accepts them if
//! it names [`SOFTWARE_MEASUREMENT`] explicitly.

use openssl::pkey::{PKey, Private};
use openssl::rsa::Rsa;
use openssl::sha::sha256;

use sgx_swk::{unwrap_swk, EnclavePublicKey, Swk};
use sqvs::{QuoteVerifier, QuoteVerifyAttributes};

use crate::error::BoxError;
use crate::nonce::{user_data, Nonce};
use crate::source::AttestationSource;
use crate::Result;

pub const SOFTWARE_QUOTE_MAGIC: &[u8; 4] = b"SWQ1";
/// Reported as both MRENCLAVE and MRSIGNER of software quotes.
pub const SOFTWARE_MEASUREMENT: &str = "0000000000000000000000000000000000000000000000000000000000000000";
pub const SOFTWARE_TCB_LEVEL: &str = "SoftwareOnly";

/// `magic || SHA-256(user_data)`
pub fn software_quote(user_data: &[u8]) -> Vec<u8> {
    let mut quote = SOFTWARE_QUOTE_MAGIC.to_vec();
    quote.extend_from_slice(&sha256(user_data));
    quote
}

pub struct SoftwareSource {
    key: PKey<Private>,
    public_key: Vec<u8>,
}

impl SoftwareSource {
    pub fn generate(bits: u32) -> Result<Self> {
        Self::from_key(PKey::from_rsa(Rsa::generate(bits)?)?)
    }

    pub fn from_pem(pem: &[u8]) -> Result<Self> {
        Self::from_key(PKey::private_key_from_pem(pem)?)
    }

    fn from_key(key: PKey<Private>) -> Result<Self> {
        let rsa = key.rsa()?;
        let public_key = EnclavePublicKey::encode(&rsa)?;
        warn!("using a software attestation source, quotes are not hardware backed");
        Ok(SoftwareSource { key, public_key })
    }
}

impl AttestationSource for SoftwareSource {
    fn public_key(&self) -> std::result::Result<Vec<u8>, BoxError> {
        Ok(self.public_key.clone())
    }

    fn quote(&self, nonce: Option<&Nonce>) -> std::result::Result<Vec<u8>, BoxError> {
        Ok(software_quote(&user_data(&self.public_key, nonce)))
    }

    fn unwrap_key(&self, wrapped: &[u8]) -> std::result::Result<Swk, BoxError> {
        Ok(unwrap_swk(wrapped, &self.key)?)
    }
}

/// Verifies quotes produced by [`SoftwareSource`].
#[derive(Clone, Copy, Debug, Default)]
pub struct SoftwareQuoteVerifier;

impl QuoteVerifier for SoftwareQuoteVerifier {
    fn verify_quote(&self, quote: &[u8], user_data: &[u8]) -> std::result::Result<QuoteVerifyAttributes, sqvs::Error> {
        if quote.len() != SOFTWARE_QUOTE_MAGIC.len() + 32 || !quote.starts_with(SOFTWARE_QUOTE_MAGIC) {
            return Err(sqvs::Error::Status(400));
        }
        let report_data = &quote[SOFTWARE_QUOTE_MAGIC.len()..];
        Ok(QuoteVerifyAttributes {
            report_data: report_data.iter().map(|b| format!("{:02x}", b)).collect(),
            user_data_match: openssl::memcmp::eq(report_data, &sha256(user_data)),
            message: "software quote, not hardware backed".into(),
            enclave_issuer: SOFTWARE_MEASUREMENT.into(),
            enclave_measurement: SOFTWARE_MEASUREMENT.into(),
            enclave_issuer_prod_id: "00".into(),
            isv_svn: "00".into(),
            config_svn: None,
            tcb_level: SOFTWARE_TCB_LEVEL.into(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn quote_binds_key_and_nonce() {
        let source = SoftwareSource::generate(2048).unwrap();
        let nonce = Nonce::generate().unwrap();
        let public_key = source.public_key().unwrap();
        let quote = source.quote(Some(&nonce)).unwrap();

        let attrs = SoftwareQuoteVerifier.verify_quote(&quote, &user_data(&public_key, Some(&nonce))).unwrap();
        assert!(attrs.user_data_match);
        assert_eq!(attrs.enclave_measurement, SOFTWARE_MEASUREMENT);

        let other = Nonce::generate().unwrap();
        let attrs = SoftwareQuoteVerifier.verify_quote(&quote, &user_data(&public_key, Some(&other))).unwrap();
        assert!(!attrs.user_data_match);
    }

    #[test]
    fn rejects_foreign_quotes() {
        assert!(SoftwareQuoteVerifier.verify_quote(b"not a quote", b"").is_err());
    }

    #[test]
    fn unwraps_what_was_wrapped_for_it() {
        let source = SoftwareSource::generate(2048).unwrap();
        let swk = Swk::generate().unwrap();
        let wrapped = sgx_swk::wrap_swk(&swk, &source.public_key().unwrap()).unwrap();
        assert_eq!(source.unwrap_key(&wrapped).unwrap(), swk);
        assert!(source.unwrap_key(&wrapped[1..]).is_err());
    }
}
