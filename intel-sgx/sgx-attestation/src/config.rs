/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::handshake::{Credentials, DEFAULT_PASSWORD, DEFAULT_USERNAME};
use crate::{Error, Result};

pub const DEFAULT_CONFIG_PATH: &str = "config.yml";
pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 9999;

fn default_host() -> String {
    DEFAULT_HOST.to_owned()
}

fn default_port() -> u16 {
    DEFAULT_PORT
}

fn default_tls_cert() -> PathBuf {
    PathBuf::from("cert.pem")
}

fn default_tls_key() -> PathBuf {
    PathBuf::from("key.pem")
}

fn default_sqvs_ca_dir() -> PathBuf {
    PathBuf::from("./")
}

fn default_quote_policy() -> PathBuf {
    PathBuf::from(sqvs::policy::DEFAULT_POLICY_PATH)
}

fn default_username() -> String {
    DEFAULT_USERNAME.to_owned()
}

fn default_password() -> String {
    DEFAULT_PASSWORD.to_owned()
}

fn default_io_timeout_secs() -> u64 {
    30
}

/// Settings shared by the attested (prover) and attesting (verifier) apps.
///
/// ```yaml
/// attestedapp-host: 127.0.0.1
/// attestedapp-port: 9999
/// sqvs-url: https://sqvs.example:12000/svs/v1
/// bearer-token: <token>
/// ```
#[derive(Deserialize, Clone)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct Configuration {
    #[serde(default = "default_host")]
    pub attestedapp_host: String,
    #[serde(default = "default_port")]
    pub attestedapp_port: u16,
    #[serde(default)]
    pub sqvs_url: Option<String>,
    #[serde(default)]
    pub bearer_token: Option<String>,
    #[serde(default = "default_tls_cert")]
    pub tls_cert: PathBuf,
    #[serde(default = "default_tls_key")]
    pub tls_key: PathBuf,
    #[serde(default = "default_sqvs_ca_dir")]
    pub sqvs_ca_dir: PathBuf,
    #[serde(default = "default_quote_policy")]
    pub quote_policy: PathBuf,
    #[serde(default = "default_username")]
    pub app_username: String,
    #[serde(default = "default_password")]
    pub app_password: String,
    #[serde(default = "default_io_timeout_secs")]
    pub io_timeout_secs: u64,
}

impl Configuration {
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|e| Error::Configuration(format!("unable to read {}: {}", path.display(), e).into()))?;
        let config = Self::parse(&text)?;
        debug!("loaded configuration from {}", path.display());
        Ok(config)
    }

    pub fn parse(text: &str) -> Result<Self> {
        let config: Configuration = serde_yaml::from_str(text)
            .map_err(|e| Error::Configuration(format!("invalid configuration: {}", e).into()))?;
        if config.attestedapp_host.is_empty() {
            return Err(Error::Configuration("attestedapp-host must not be empty".into()));
        }
        if config.io_timeout_secs == 0 {
            return Err(Error::Configuration("io-timeout-secs must be positive".into()));
        }
        Ok(config)
    }

    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.app_username.as_str(), self.app_password.as_str())
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_secs(self.io_timeout_secs)
    }

    pub fn sqvs_url(&self) -> Result<&str> {
        self.sqvs_url.as_deref()
            .filter(|url| !url.is_empty())
            .ok_or_else(|| Error::Configuration("sqvs-url is not set".into()))
    }

    pub fn bearer_token(&self) -> Result<&str> {
        self.bearer_token.as_deref()
            .filter(|token| !token.is_empty())
            .ok_or_else(|| Error::Configuration("bearer-token is not set".into()))
    }
}

impl fmt::Debug for Configuration {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Configuration")
            .field("attestedapp_host", &self.attestedapp_host)
            .field("attestedapp_port", &self.attestedapp_port)
            .field("sqvs_url", &self.sqvs_url)
            .field("tls_cert", &self.tls_cert)
            .field("tls_key", &self.tls_key)
            .field("sqvs_ca_dir", &self.sqvs_ca_dir)
            .field("quote_policy", &self.quote_policy)
            .field("app_username", &self.app_username)
            .field("io_timeout_secs", &self.io_timeout_secs)
            .finish_non_exhaustive()
    }
}
