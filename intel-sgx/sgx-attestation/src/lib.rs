/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Remote attestation handshake between an enclave-backed service (the
//! prover) and a relying party (the verifier).
//!
//! The verifier sends a fresh [`Nonce`]; the prover answers with its public
//! key and a quote whose report data binds that key and nonce. The verifier
//! has the quote checked by SQVS, compares the result with its
//! [`sqvs::QuotePolicy`] and only then wraps a symmetric key for the
//! enclave and sends it a secret sealed under that key.
//!
//! Two transports carry the same [`handshake`] state machine: framed
//! messages on a TCP connection ([`socket`]) and three HTTPS endpoints
//! ([`https`]).

#[macro_use]
extern crate log;

pub mod config;
mod error;
pub mod handshake;
pub mod https;
pub mod message;
mod nonce;
pub mod socket;
pub mod software;
mod source;

pub use crate::config::Configuration;
pub use crate::error::{BoxError, Error, FailureReason, Result};
pub use crate::handshake::{Credentials, HandshakeState, IdentityBundle, ProverChannel, ProverSession, VerifierSession};
pub use crate::nonce::{user_data, Nonce};
pub use crate::source::AttestationSource;
