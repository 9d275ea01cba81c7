/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};

use lazy_static::lazy_static;

use sgx_attestation::software::{SoftwareSource, SOFTWARE_MEASUREMENT};
use sgx_attestation::{AttestationSource, BoxError, Nonce};
use sgx_swk::Swk;
use sqvs::QuotePolicy;

lazy_static! {
    pub static ref SOURCE: SoftwareSource = SoftwareSource::generate(2048).unwrap();
    pub static ref SOFTWARE_POLICY: QuotePolicy =
        QuotePolicy::parse(&format!("MRSigner:{0}\nMREnclave:{0}\n", SOFTWARE_MEASUREMENT)).unwrap();
}

pub const SECRET: &[u8] = b"For your eyes only!";

/// Shares the key of [`SOURCE`] and counts quote requests.
#[derive(Default)]
pub struct CountingSource {
    pub quotes: AtomicUsize,
}

impl CountingSource {
    pub fn quotes(&self) -> usize {
        self.quotes.load(Ordering::SeqCst)
    }
}

impl AttestationSource for CountingSource {
    fn public_key(&self) -> Result<Vec<u8>, BoxError> {
        SOURCE.public_key()
    }

    fn quote(&self, nonce: Option<&Nonce>) -> Result<Vec<u8>, BoxError> {
        self.quotes.fetch_add(1, Ordering::SeqCst);
        SOURCE.quote(nonce)
    }

    fn unwrap_key(&self, wrapped: &[u8]) -> Result<Swk, BoxError> {
        SOURCE.unwrap_key(wrapped)
    }
}
