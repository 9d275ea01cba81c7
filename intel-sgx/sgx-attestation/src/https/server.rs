/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use std::net::SocketAddr;
use std::sync::{Arc, Mutex, MutexGuard};

use openssl::pkey::PKey;
use openssl::x509::X509;
use serde::Serialize;
use warp::http::StatusCode;
use warp::hyper::body::Bytes;
use warp::reply::{Reply, Response};
use warp::{Filter, Rejection};
use zeroize::Zeroizing;

use super::{
    ApiError, ApiErrorKind, ErrorResponse, IdentityRequest, IdentityResponse, UserData, WrappedMessageRequest,
    WrappedSwkRequest, PATH_ID, PATH_WRAPPED_MESSAGE, PATH_WRAPPED_SWK,
};
use crate::handshake::{constant_time_eq, HandshakeState, ProverSession};
use crate::nonce::Nonce;
use crate::source::AttestationSource;
use crate::{Error, Result};

const MAX_BODY_LEN: u64 = 64 * 1024;

type SecretHandler = Box<dyn Fn(&[u8]) + Send + Sync>;

/// Prover state shared by all requests: the enclave, the expected bearer
/// token and the one handshake in progress.
///
/// There is a single session per server. A `GET /id` from any holder of the
/// bearer token starts over and abandons whatever handshake another verifier
/// had in progress. Calls that no longer fit the restarted session get
/// `409 Conflict`.
pub struct ServerState<S: ?Sized> {
    bearer_token: Zeroizing<String>,
    session: Mutex<ProverSession>,
    on_secret: SecretHandler,
    source: Arc<S>,
}

impl<S: AttestationSource + ?Sized> ServerState<S> {
    pub fn new<T: Into<String>>(source: Arc<S>, bearer_token: T) -> Self {
        ServerState {
            bearer_token: Zeroizing::new(bearer_token.into()),
            session: Mutex::new(ProverSession::new()),
            on_secret: Box::new(|secret| info!("secret unwrapped successfully ({} bytes)", secret.len())),
            source,
        }
    }

    /// Called with the plaintext once a handshake delivers its secret.
    pub fn on_secret<F: Fn(&[u8]) + Send + Sync + 'static>(mut self, handler: F) -> Self {
        self.on_secret = Box::new(handler);
        self
    }

    pub fn handshake_state(&self) -> HandshakeState {
        self.session.lock().map(|s| s.state()).unwrap_or(HandshakeState::Failed(crate::FailureReason::Protocol))
    }

    fn authorize(&self, authorization: Option<&str>) -> std::result::Result<(), ApiError> {
        let token = authorization.and_then(|value| value.strip_prefix("Bearer "));
        match token {
            Some(token) if constant_time_eq(token.as_bytes(), self.bearer_token.as_bytes()) => Ok(()),
            _ => {
                warn!("rejecting request with missing or invalid bearer token");
                Err(ApiError::new(ApiErrorKind::Unauthorized, "invalid bearer token"))
            }
        }
    }

    fn session(&self) -> std::result::Result<MutexGuard<ProverSession>, ApiError> {
        self.session.lock().map_err(|_| ApiError::new(ApiErrorKind::Internal, "session state poisoned"))
    }

    /// `GET /id`: starts a new handshake.
    pub fn identity(&self, authorization: Option<&str>, body: &[u8]) -> std::result::Result<IdentityResponse, ApiError> {
        self.authorize(authorization)?;
        let request: IdentityRequest = parse_body(body)?;
        Nonce::from_decimal(&request.nonce).map_err(|e| ApiError::new(ApiErrorKind::BadRequest, e.to_string()))?;

        let mut session = self.session()?;
        if !session.state().is_terminal() && session.state() != HandshakeState::Init {
            info!("abandoning handshake in state {} for a new identity request", session.state());
        }
        *session = ProverSession::new();
        session.connect_authorized(Some(&request.nonce)).map_err(|e| ApiError::from(&e))?;
        let identity = session.identity(&*self.source).map_err(|e| ApiError::from(&e))?;

        Ok(IdentityResponse {
            quote: base64::encode(&identity.quote),
            user_data: UserData { public_key: base64::encode(&identity.public_key) },
        })
    }

    /// `POST /wrapped_swk`
    pub fn wrapped_swk(&self, authorization: Option<&str>, body: &[u8]) -> std::result::Result<(), ApiError> {
        self.authorize(authorization)?;
        let request: WrappedSwkRequest = parse_body(body)?;
        let wrapped = decode_base64(&request.swk)?;

        let mut session = self.session()?;
        session.accept_wrapped_swk(&*self.source, &wrapped).map_err(|e| ApiError::from(&e))
    }

    /// `POST /wrapped_message`
    pub fn wrapped_message(&self, authorization: Option<&str>, body: &[u8]) -> std::result::Result<(), ApiError> {
        self.authorize(authorization)?;
        let request: WrappedMessageRequest = parse_body(body)?;
        let wrapped = decode_base64(&request.message)?;

        let mut session = self.session()?;
        let secret = session.accept_wrapped_secret(&wrapped).map_err(|e| ApiError::from(&e))?;
        (self.on_secret)(secret);
        Ok(())
    }
}

fn parse_body<'a, T: serde::Deserialize<'a>>(body: &'a [u8]) -> std::result::Result<T, ApiError> {
    serde_json::from_slice(body).map_err(|e| ApiError::new(ApiErrorKind::BadRequest, format!("malformed request body: {}", e)))
}

fn decode_base64(value: &str) -> std::result::Result<Vec<u8>, ApiError> {
    base64::decode(value).map_err(|e| ApiError::new(ApiErrorKind::BadRequest, format!("invalid base64: {}", e)))
}

fn respond<T: Serialize>(result: std::result::Result<T, ApiError>) -> Response {
    match result {
        Ok(body) => warp::reply::json(&body).into_response(),
        Err(err) => error_response(err),
    }
}

fn respond_empty(result: std::result::Result<(), ApiError>) -> Response {
    match result {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => error_response(err),
    }
}

fn error_response(err: ApiError) -> Response {
    debug!("responding with {:?}", err.kind);
    warp::reply::with_status(warp::reply::json(&ErrorResponse { error: err.message }), err.status).into_response()
}

/// Runs a session call on the blocking pool. Enclave calls (quoting, key
/// unwrapping) and the session lock must stay off the async workers.
async fn blocking<T, F>(call: F) -> std::result::Result<T, ApiError>
where
    F: FnOnce() -> std::result::Result<T, ApiError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(call)
        .await
        .unwrap_or_else(|e| Err(ApiError::new(ApiErrorKind::Internal, format!("request handler failed: {}", e))))
}

/// The three handshake endpoints.
pub fn routes<S>(state: Arc<ServerState<S>>) -> impl Filter<Extract = (Response,), Error = Rejection> + Clone
where
    S: AttestationSource + ?Sized + 'static,
{
    let with_state = warp::any().map(move || state.clone());
    let authorization = warp::header::optional::<String>("authorization");
    let body = warp::body::content_length_limit(MAX_BODY_LEN).and(warp::body::bytes());

    let id = warp::get()
        .and(warp::path(PATH_ID))
        .and(warp::path::end())
        .and(with_state.clone())
        .and(authorization.clone())
        .and(body.clone())
        .and_then(|state: Arc<ServerState<S>>, authorization: Option<String>, body: Bytes| async move {
            let result = blocking(move || state.identity(authorization.as_deref(), &body)).await;
            Ok::<_, Rejection>(respond(result))
        });

    let wrapped_swk = warp::post()
        .and(warp::path(PATH_WRAPPED_SWK))
        .and(warp::path::end())
        .and(with_state.clone())
        .and(authorization.clone())
        .and(body.clone())
        .and_then(|state: Arc<ServerState<S>>, authorization: Option<String>, body: Bytes| async move {
            let result = blocking(move || state.wrapped_swk(authorization.as_deref(), &body)).await;
            Ok::<_, Rejection>(respond_empty(result))
        });

    let wrapped_message = warp::post()
        .and(warp::path(PATH_WRAPPED_MESSAGE))
        .and(warp::path::end())
        .and(with_state)
        .and(authorization)
        .and(body)
        .and_then(|state: Arc<ServerState<S>>, authorization: Option<String>, body: Bytes| async move {
            let result = blocking(move || state.wrapped_message(authorization.as_deref(), &body)).await;
            Ok::<_, Rejection>(respond_empty(result))
        });

    id.or(wrapped_swk).unify().or(wrapped_message).unify()
}

/// Serves the endpoints over TLS until the process exits.
pub async fn serve<S>(state: Arc<ServerState<S>>, addr: SocketAddr, cert_pem: Vec<u8>, key_pem: Vec<u8>) -> Result<()>
where
    S: AttestationSource + ?Sized + 'static,
{
    X509::from_pem(&cert_pem).map_err(|e| Error::Configuration(format!("invalid TLS certificate: {}", e).into()))?;
    PKey::private_key_from_pem(&key_pem).map_err(|e| Error::Configuration(format!("invalid TLS key: {}", e).into()))?;

    info!("serving attestation endpoints on https://{}", addr);
    warp::serve(routes(state))
        .tls()
        .cert(cert_pem)
        .key(key_pem)
        .run(addr)
        .await;
    Ok(())
}
