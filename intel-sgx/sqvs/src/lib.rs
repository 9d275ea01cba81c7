/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */
//! Verification of SGX ECDSA quotes through the SGX Quote Verification
//! Service (SQVS), and the local policy check applied to its result.
//!
//! The usual flow is to build a [`client::Client`] with
//! [`client::ClientBuilder`], submit the quote together with the user data
//! the enclave bound into it, and then hand the returned
//! [`QuoteVerifyAttributes`] to [`policy::verify_against_policy`].

#[macro_use]
extern crate log;

pub mod api;
#[cfg(feature = "client")]
pub mod client;
mod error;
pub mod policy;

pub use crate::api::QuoteVerifyAttributes;
pub use crate::error::{Error, PolicyError};
pub use crate::policy::{verify_against_policy, PolicyField, QuotePolicy};

/// Something that can turn a quote into verified attributes.
///
/// Implemented by [`client::Client`]; tests substitute their own.
pub trait QuoteVerifier {
    fn verify_quote(&self, quote: &[u8], user_data: &[u8]) -> Result<QuoteVerifyAttributes, Error>;
}

impl<'a, T: QuoteVerifier + ?Sized> QuoteVerifier for &'a T {
    fn verify_quote(&self, quote: &[u8], user_data: &[u8]) -> Result<QuoteVerifyAttributes, Error> {
        (**self).verify_quote(quote, user_data)
    }
}

impl<T: QuoteVerifier + ?Sized> QuoteVerifier for Box<T> {
    fn verify_quote(&self, quote: &[u8], user_data: &[u8]) -> Result<QuoteVerifyAttributes, Error> {
        (**self).verify_quote(quote, user_data)
    }
}
