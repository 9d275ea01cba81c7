/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use std::borrow::Cow;
use std::fmt;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Why a handshake ended in the failed state.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureReason {
    Configuration,
    Transport,
    AuthenticationFailed,
    Protocol,
    AttestationUnavailable,
    QuoteRejected,
    KeyExchangeFailed,
    SecretDeliveryFailed,
    Crypto,
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        use self::FailureReason::*;
        let s = match self {
            Configuration => "configuration error",
            Transport => "transport error",
            AuthenticationFailed => "authentication failed",
            Protocol => "protocol error",
            AttestationUnavailable => "attestation unavailable",
            QuoteRejected => "quote rejected",
            KeyExchangeFailed => "key exchange failed",
            SecretDeliveryFailed => "secret delivery failed",
            Crypto => "cryptographic failure",
        };
        f.write_str(s)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Configuration(Cow<'static, str>),
    #[error("transport failure while {context}")]
    Transport { context: Cow<'static, str>, #[source] cause: BoxError },
    #[error("authentication failed")]
    AuthenticationFailed,
    #[error("protocol violation: {0}")]
    Protocol(Cow<'static, str>),
    #[error("attestation source unavailable")]
    AttestationUnavailable(#[source] BoxError),
    #[error("quote rejected")]
    QuoteRejected(#[source] BoxError),
    #[error("symmetric key exchange failed")]
    KeyExchangeFailed(#[source] BoxError),
    #[error("secret delivery failed")]
    SecretDeliveryFailed(#[source] BoxError),
    #[error("cryptographic operation failed")]
    Crypto(#[from] sgx_swk::Error),
}

impl Error {
    pub fn transport<C: Into<Cow<'static, str>>, E: Into<BoxError>>(context: C, cause: E) -> Self {
        Error::Transport { context: context.into(), cause: cause.into() }
    }

    pub fn reason(&self) -> FailureReason {
        match self {
            Error::Configuration(_) => FailureReason::Configuration,
            Error::Transport { .. } => FailureReason::Transport,
            Error::AuthenticationFailed => FailureReason::AuthenticationFailed,
            Error::Protocol(_) => FailureReason::Protocol,
            Error::AttestationUnavailable(_) => FailureReason::AttestationUnavailable,
            Error::QuoteRejected(_) => FailureReason::QuoteRejected,
            Error::KeyExchangeFailed(_) => FailureReason::KeyExchangeFailed,
            Error::SecretDeliveryFailed(_) => FailureReason::SecretDeliveryFailed,
            Error::Crypto(_) => FailureReason::Crypto,
        }
    }
}

impl From<openssl::error::ErrorStack> for Error {
    fn from(e: openssl::error::ErrorStack) -> Self {
        Error::Crypto(sgx_swk::Error::Crypto(e))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
