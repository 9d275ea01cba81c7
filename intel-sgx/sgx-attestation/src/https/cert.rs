/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use std::time::{SystemTime, UNIX_EPOCH};

use openssl::asn1::Asn1Time;
use openssl::bn::{BigNum, MsbOption};
use openssl::hash::MessageDigest;
use openssl::pkey::PKey;
use openssl::rsa::Rsa;
use openssl::x509::extension::{BasicConstraints, ExtendedKeyUsage, KeyUsage, SubjectAlternativeName};
use openssl::x509::{X509NameBuilder, X509};
use zeroize::Zeroizing;

use super::SERVER_NAME;
use crate::Result;

const VALIDITY_DAYS: u32 = 365;

/// Self-signed TLS identity of the prover.
pub struct SelfSignedIdentity {
    pub cert_pem: Vec<u8>,
    pub key_pem: Zeroizing<Vec<u8>>,
}

/// Issues a self-signed certificate for [`SERVER_NAME`] over a fresh RSA key.
pub fn generate_self_signed(bits: u32) -> Result<SelfSignedIdentity> {
    let key = PKey::from_rsa(Rsa::generate(bits)?)?;

    let mut name = X509NameBuilder::new()?;
    name.append_entry_by_text("CN", SERVER_NAME)?;
    let name = name.build();

    let mut serial = BigNum::new()?;
    serial.rand(128, MsbOption::MAYBE_ZERO, false)?;

    // backdated a little for clock skew between prover and verifier
    let now = SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0) as i64;
    let not_before = Asn1Time::from_unix((now - 300) as _)?;
    let not_after = Asn1Time::days_from_now(VALIDITY_DAYS)?;

    let mut builder = X509::builder()?;
    builder.set_version(2)?;
    builder.set_serial_number(&*serial.to_asn1_integer()?)?;
    builder.set_subject_name(&name)?;
    builder.set_issuer_name(&name)?;
    builder.set_pubkey(&key)?;
    builder.set_not_before(&not_before)?;
    builder.set_not_after(&not_after)?;
    builder.append_extension(BasicConstraints::new().critical().build()?)?;
    builder.append_extension(KeyUsage::new().critical().digital_signature().key_encipherment().build()?)?;
    builder.append_extension(ExtendedKeyUsage::new().server_auth().build()?)?;
    let san = SubjectAlternativeName::new().dns(SERVER_NAME).build(&builder.x509v3_context(None, None))?;
    builder.append_extension(san)?;
    builder.sign(&key, MessageDigest::sha256())?;

    Ok(SelfSignedIdentity {
        cert_pem: builder.build().to_pem()?,
        key_pem: Zeroizing::new(key.private_key_to_pem_pkcs8()?),
    })
}
