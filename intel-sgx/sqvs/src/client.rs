/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub use reqwest::IntoUrl;
use reqwest::Url;

use crate::api::{QuoteVerifyAttributes, VerifyQuoteRequest, VERIFY_QUOTE_PATH};
use crate::{Error, QuoteVerifier};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

pub struct Client {
    url: Url,
    inner: reqwest::blocking::Client,
}

pub struct ClientBuilder {
    ca_dirs: Vec<PathBuf>,
    timeout: Duration,
    inner: reqwest::blocking::ClientBuilder,
}

impl ClientBuilder {
    pub fn new() -> Self {
        ClientBuilder::new_with_reqwest_builder(reqwest::blocking::Client::builder())
    }

    pub fn new_with_reqwest_builder(builder: reqwest::blocking::ClientBuilder) -> Self {
        ClientBuilder {
            ca_dirs: Vec::new(),
            timeout: DEFAULT_TIMEOUT,
            inner: builder,
        }
    }

    /// Trust every `*.pem` certificate found in `dir`, in addition to the
    /// system roots.
    pub fn ca_dir<P: Into<PathBuf>>(mut self, dir: P) -> Self {
        self.ca_dirs.push(dir.into());
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Build the client, specifying the SQVS API root, e.g.
    /// `https://sqvs.example:12000/svs/v1`.
    pub fn build<U: IntoUrl>(self, url: U) -> Result<Client, Error> {
        // make sure this is an HTTP(S) URL ending in a slash
        let mut url = url.into_url().map_err(|e| Error::Configuration(format!("invalid SQVS URL: {}", e).into()))?;
        if !(url.scheme() == "https" || url.scheme() == "http") || url.cannot_be_a_base() {
            return Err(Error::Configuration("SQVS URL is not a valid HTTPS URL".into()));
        }
        if !url.path().ends_with('/') {
            let path = format!("{}/", url.path());
            url.set_path(&path);
        }

        let mut inner = self.inner.timeout(self.timeout);
        for dir in &self.ca_dirs {
            for cert in load_ca_dir(dir)? {
                inner = inner.add_root_certificate(cert);
            }
        }

        Ok(Client {
            url,
            inner: inner.build().map_err(|e| Error::Configuration(format!("unable to build HTTP client: {}", e).into()))?,
        })
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}

fn load_ca_dir(dir: &Path) -> Result<Vec<reqwest::Certificate>, Error> {
    let entries = fs::read_dir(dir)
        .map_err(|e| Error::Configuration(format!("unable to read CA directory {}: {}", dir.display(), e).into()))?;

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| Error::Configuration(format!("unable to read CA directory {}: {}", dir.display(), e).into()))?.path();
        if path.extension().map_or(false, |ext| ext == "pem") {
            paths.push(path);
        }
    }
    paths.sort();

    let mut certs = Vec::with_capacity(paths.len());
    for path in paths {
        let pem = fs::read(&path)
            .map_err(|e| Error::Configuration(format!("unable to read {}: {}", path.display(), e).into()))?;
        let cert = reqwest::Certificate::from_pem(&pem)
            .map_err(|e| Error::Configuration(format!("invalid CA certificate {}: {}", path.display(), e).into()))?;
        debug!("trusting SQVS root {}", path.display());
        certs.push(cert);
    }
    Ok(certs)
}

impl Client {
    /// Call the SQVS "verify quote" API.
    ///
    /// `user_data` is the byte string whose SHA-256 the enclave placed in
    /// the quote's report data; SQVS reports whether it matched.
    pub fn verify_quote(&self, quote: &[u8], user_data: &[u8]) -> Result<QuoteVerifyAttributes, Error> {
        let url = self.url.join(VERIFY_QUOTE_PATH)
            .map_err(|e| Error::Configuration(format!("invalid SQVS URL: {}", e).into()))?;
        let req = VerifyQuoteRequest {
            quote: base64::encode(quote),
            user_data: base64::encode(user_data),
        };

        debug!("submitting {}-byte quote to {}", quote.len(), url);
        let res = self.inner.post(url)
            .header("Accept", "application/json")
            .json(&req)
            .send()
            .map_err(|e| Error::Transport(e.into()))?;

        let status = res.status();
        if status != reqwest::StatusCode::OK {
            warn!("SQVS rejected quote with status {}", status);
            return Err(Error::Status(status.as_u16()));
        }

        let body = res.bytes().map_err(|e| Error::Transport(e.into()))?;
        let attrs: QuoteVerifyAttributes = serde_json::from_slice(&body).map_err(|e| Error::Decode(e.into()))?;
        debug!("SQVS: {} (TCB level {})", attrs.message, attrs.tcb_level);
        Ok(attrs)
    }
}

impl QuoteVerifier for Client {
    fn verify_quote(&self, quote: &[u8], user_data: &[u8]) -> Result<QuoteVerifyAttributes, Error> {
        Client::verify_quote(self, quote, user_data)
    }
}

#[cfg(test)]
mod tests {
    use tempdir::TempDir;

    use super::*;

    #[test]
    fn url_gets_trailing_slash() {
        let client = ClientBuilder::new().build("https://sqvs.example:12000/svs/v1").unwrap();
        assert_eq!(client.url.join(VERIFY_QUOTE_PATH).unwrap().as_str(), "https://sqvs.example:12000/svs/v1/sgx_qv_verify_quote");

        let client = ClientBuilder::new().build("http://127.0.0.1:12000/").unwrap();
        assert_eq!(client.url.join(VERIFY_QUOTE_PATH).unwrap().as_str(), "http://127.0.0.1:12000/sgx_qv_verify_quote");
    }

    #[test]
    fn rejects_non_http_url() {
        assert!(matches!(ClientBuilder::new().build("ftp://sqvs.example/"), Err(Error::Configuration(_))));
        assert!(matches!(ClientBuilder::new().build("not a url"), Err(Error::Configuration(_))));
    }

    #[test]
    fn ca_dir_must_hold_valid_pem() {
        let dir = TempDir::new("sqvs-ca").unwrap();
        fs::write(dir.path().join("notes.txt"), b"ignored").unwrap();
        ClientBuilder::new().ca_dir(dir.path()).build("https://sqvs.example/").unwrap();

        fs::write(dir.path().join("root.pem"), b"garbage").unwrap();
        assert!(matches!(ClientBuilder::new().ca_dir(dir.path()).build("https://sqvs.example/"), Err(Error::Configuration(_))));

        assert!(matches!(ClientBuilder::new().ca_dir(dir.path().join("missing")).build("https://sqvs.example/"), Err(Error::Configuration(_))));
    }
}
