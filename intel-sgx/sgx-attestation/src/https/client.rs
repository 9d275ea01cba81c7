/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use std::net::{SocketAddr, ToSocketAddrs};
use std::time::Duration;

use reqwest::blocking::{Client, RequestBuilder};
use reqwest::StatusCode;
use serde::Serialize;
use zeroize::Zeroizing;

use super::{
    IdentityRequest, IdentityResponse, WrappedMessageRequest, WrappedSwkRequest, PATH_ID, PATH_WRAPPED_MESSAGE,
    PATH_WRAPPED_SWK, SERVER_NAME,
};
use crate::error::BoxError;
use crate::handshake::{IdentityBundle, ProverChannel};
use crate::nonce::Nonce;
use crate::{Error, Result};

/// Verifier side of the HTTPS transport.
pub struct HttpsChannel {
    client: Client,
    base_url: String,
    bearer_token: Zeroizing<String>,
}

impl HttpsChannel {
    /// Connects to a prover at `host:port` whose self-signed certificate,
    /// issued for [`SERVER_NAME`], is `server_cert_pem`.
    pub fn new(host: &str, port: u16, server_cert_pem: &[u8], bearer_token: &str, timeout: Duration) -> Result<Self> {
        let addr: SocketAddr = (host, port).to_socket_addrs()
            .map_err(|e| Error::transport("resolving the prover address", e))?
            .next()
            .ok_or_else(|| Error::Configuration(format!("{} did not resolve", host).into()))?;
        let cert = reqwest::Certificate::from_pem(server_cert_pem)
            .map_err(|e| Error::Configuration(format!("invalid prover certificate: {}", e).into()))?;

        let client = Client::builder()
            .add_root_certificate(cert)
            .resolve(SERVER_NAME, addr)
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Configuration(format!("unable to build HTTPS client: {}", e).into()))?;

        Ok(Self::with_client(client, format!("https://{}:{}", SERVER_NAME, port), bearer_token))
    }

    /// Uses a preconfigured client against `base_url`, e.g. `http://127.0.0.1:9999`.
    pub fn with_client<U: Into<String>>(client: Client, base_url: U, bearer_token: &str) -> Self {
        HttpsChannel {
            client,
            base_url: base_url.into().trim_end_matches('/').to_owned(),
            bearer_token: Zeroizing::new(bearer_token.to_owned()),
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path)
    }

    fn send<T: Serialize>(&self, request: RequestBuilder, body: &T, on_server_error: fn(BoxError) -> Error) -> Result<reqwest::blocking::Response> {
        let response = request
            .bearer_auth(self.bearer_token.as_str())
            .json(body)
            .send()
            .map_err(|e| Error::transport("sending request to the prover", e))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        let detail = response.text().unwrap_or_default();
        debug!("prover responded {}: {}", status, detail);
        Err(match status {
            StatusCode::UNAUTHORIZED => Error::AuthenticationFailed,
            StatusCode::CONFLICT => Error::Protocol(format!("prover refused out-of-order request: {}", detail).into()),
            StatusCode::BAD_REQUEST => Error::Protocol(format!("prover rejected malformed request: {}", detail).into()),
            StatusCode::INTERNAL_SERVER_ERROR => on_server_error(detail.into()),
            _ => Error::transport("talking to the prover", format!("unexpected HTTP status {}", status)),
        })
    }
}

fn decode(field: &str, value: &str) -> Result<Vec<u8>> {
    base64::decode(value).map_err(|e| Error::Protocol(format!("invalid base64 in {}: {}", field, e).into()))
}

impl ProverChannel for HttpsChannel {
    fn request_identity(&mut self, nonce: &Nonce) -> Result<IdentityBundle> {
        let request = IdentityRequest { nonce: nonce.as_decimal().to_owned() };
        let response = self.send(self.client.get(self.url(PATH_ID)), &request, Error::AttestationUnavailable)?;
        let body: IdentityResponse = response.json()
            .map_err(|e| Error::Protocol(format!("malformed identity response: {}", e).into()))?;

        Ok(IdentityBundle {
            public_key: decode("public-key", &body.user_data.public_key)?,
            quote: decode("quote", &body.quote)?,
        })
    }

    fn send_wrapped_swk(&mut self, wrapped_swk: &[u8]) -> Result<()> {
        let request = WrappedSwkRequest { swk: base64::encode(wrapped_swk) };
        self.send(self.client.post(self.url(PATH_WRAPPED_SWK)), &request, Error::KeyExchangeFailed)?;
        Ok(())
    }

    fn send_wrapped_secret(&mut self, wrapped_secret: &[u8]) -> Result<()> {
        let request = WrappedMessageRequest { message: base64::encode(wrapped_secret) };
        self.send(self.client.post(self.url(PATH_WRAPPED_MESSAGE)), &request, Error::SecretDeliveryFailed)?;
        Ok(())
    }
}
