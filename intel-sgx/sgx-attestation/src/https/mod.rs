/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Handshake over HTTPS: three bearer-token authorized endpoints instead of
//! one connection.
//!
//! | Endpoint                | Request          | Response                                  |
//! |-------------------------|------------------|-------------------------------------------|
//! | `GET /id`               | `{"nonce"}`      | `{"quote", "user-data": {"public-key"}}`  |
//! | `POST /wrapped_swk`     | `{"swk"}`        | empty                                     |
//! | `POST /wrapped_message` | `{"message"}`    | empty                                     |
//!
//! Binary fields are standard base64. The server keeps the handshake state,
//! so calls out of order are refused with `409 Conflict`.

use std::fmt;

use serde::{Deserialize, Serialize};
use warp::http::StatusCode;

use crate::Error;

mod cert;
mod client;
mod server;

pub use self::cert::{generate_self_signed, SelfSignedIdentity};
pub use self::client::HttpsChannel;
pub use self::server::{routes, serve, ServerState};

/// TLS server name the self-signed prover certificate is issued for.
pub const SERVER_NAME: &str = "sgx-attested-app";

pub const PATH_ID: &str = "id";
pub const PATH_WRAPPED_SWK: &str = "wrapped_swk";
pub const PATH_WRAPPED_MESSAGE: &str = "wrapped_message";

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct IdentityRequest {
    pub nonce: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct UserData {
    #[serde(rename = "public-key")]
    pub public_key: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct IdentityResponse {
    pub quote: String,
    #[serde(rename = "user-data")]
    pub user_data: UserData,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct WrappedSwkRequest {
    pub swk: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct WrappedMessageRequest {
    pub message: String,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct ErrorResponse {
    pub error: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApiErrorKind {
    Unauthorized,
    BadRequest,
    OutOfOrder,
    AttestationUnavailable,
    KeyExchangeFailed,
    SecretDeliveryFailed,
    Internal,
}

/// An error as returned by the HTTPS endpoints.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ApiError {
    pub kind: ApiErrorKind,
    pub status: StatusCode,
    pub message: String,
}

impl ApiError {
    pub fn new<M: Into<String>>(kind: ApiErrorKind, message: M) -> Self {
        let status = match kind {
            ApiErrorKind::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiErrorKind::BadRequest => StatusCode::BAD_REQUEST,
            ApiErrorKind::OutOfOrder => StatusCode::CONFLICT,
            ApiErrorKind::AttestationUnavailable
            | ApiErrorKind::KeyExchangeFailed
            | ApiErrorKind::SecretDeliveryFailed
            | ApiErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };
        ApiError { kind, status, message: message.into() }
    }
}

impl fmt::Display for ApiError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} ({})", self.message, self.status)
    }
}

impl From<&Error> for ApiError {
    fn from(err: &Error) -> Self {
        let kind = match err {
            Error::AuthenticationFailed => ApiErrorKind::Unauthorized,
            Error::Protocol(_) => ApiErrorKind::OutOfOrder,
            Error::AttestationUnavailable(_) => ApiErrorKind::AttestationUnavailable,
            Error::KeyExchangeFailed(_) => ApiErrorKind::KeyExchangeFailed,
            Error::SecretDeliveryFailed(_) => ApiErrorKind::SecretDeliveryFailed,
            Error::Configuration(_)
            | Error::Transport { .. }
            | Error::QuoteRejected(_)
            | Error::Crypto(_) => ApiErrorKind::Internal,
        };
        ApiError::new(kind, err.to_string())
    }
}
