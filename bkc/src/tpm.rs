/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! TPM access and parsing of the quote it returns.

use std::fmt;

use byteorder::{ByteOrder, BE};
use serde::{Deserialize, Serialize};

use crate::error::BoxError;
use crate::{Error, Result};

/// Size of the random nonce sent with every quote request.
pub const TPM_NONCE_LEN: usize = 20;
pub const PCR_COUNT: u8 = 24;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum PcrBank {
    #[serde(rename = "SHA1")]
    Sha1,
    #[serde(rename = "SHA256")]
    Sha256,
}

/// Banks requested in every quote.
pub const PCR_BANKS: [PcrBank; 2] = [PcrBank::Sha1, PcrBank::Sha256];

impl PcrBank {
    pub fn name(&self) -> &'static str {
        match self {
            PcrBank::Sha1 => "SHA1",
            PcrBank::Sha256 => "SHA256",
        }
    }

    pub fn digest_len(&self) -> usize {
        match self {
            PcrBank::Sha1 => 20,
            PcrBank::Sha256 => 32,
        }
    }
}

impl fmt::Display for PcrBank {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// All PCR indices, 0 through 23.
pub fn all_pcrs() -> Vec<u8> {
    (0..PCR_COUNT).collect()
}

/// Owner and AIK secrets passed through to the TPM.
#[derive(Clone, Default)]
pub struct TpmSecrets {
    pub owner_secret: String,
    pub aik_secret: String,
}

impl fmt::Debug for TpmSecrets {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("TpmSecrets").finish_non_exhaustive()
    }
}

pub trait TpmProvider {
    /// Returns the raw quote: a `TPM2B_ATTEST` followed by the signature.
    fn quote(&self, aik_secret: &str, nonce: &[u8], banks: &[PcrBank], pcrs: &[u8]) -> std::result::Result<Vec<u8>, BoxError>;

    fn create_aik(&self, owner_secret: &str, aik_secret: &str) -> std::result::Result<(), BoxError>;

    /// Big-endian modulus of the AIK. The exponent is always 65537.
    fn aik_public_key(&self) -> std::result::Result<Vec<u8>, BoxError>;

    fn aik_name(&self) -> std::result::Result<Vec<u8>, BoxError>;
}

trait TakePrefix: Sized {
    fn take_prefix(&mut self, mid: usize) -> Result<Self>;
}

impl<'a> TakePrefix for &'a [u8] {
    fn take_prefix(&mut self, mid: usize) -> Result<Self> {
        if let (Some(prefix), Some(rest)) = (self.get(..mid), self.get(mid..)) {
            *self = rest;
            Ok(prefix)
        } else {
            Err(Error::MalformedQuote(format!("unexpected end of quote, needed {} more bytes but {} remain", mid, self.len()).into()))
        }
    }
}

fn take_u16(data: &mut &[u8]) -> Result<u16> {
    Ok(BE::read_u16(data.take_prefix(2)?))
}

fn take_tpm2b<'a>(data: &mut &'a [u8]) -> Result<&'a [u8]> {
    let len = take_u16(data)? as usize;
    data.take_prefix(len)
}

/// The fields of a TPM quote needed to bind it to the request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QuoteInfo<'a> {
    /// The whole `TPMS_ATTEST` structure.
    pub attest: &'a [u8],
    pub magic: u32,
    pub attest_type: u16,
    pub qualified_signer: &'a [u8],
    /// The nonce-derived data the TPM signed over.
    pub extra_data: &'a [u8],
    pub signature: &'a [u8],
}

impl<'a> QuoteInfo<'a> {
    /// Layout: `attestSize(2) || magic(4) || type(2) || nameSize(2) || name
    /// || dataSize(2) || data || ... || signature`, sizes big-endian.
    pub fn parse(quote: &'a [u8]) -> Result<Self> {
        let mut rest = quote;
        let attest = take_tpm2b(&mut rest)?;

        let mut body = attest;
        let header = body.take_prefix(6)?;
        let qualified_signer = take_tpm2b(&mut body)?;
        let extra_data = take_tpm2b(&mut body)?;

        Ok(QuoteInfo {
            attest,
            magic: BE::read_u32(&header[..4]),
            attest_type: BE::read_u16(&header[4..]),
            qualified_signer,
            extra_data,
            signature: rest,
        })
    }
}
