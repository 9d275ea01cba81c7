/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

pub const DEFAULT_CONFIG_PATH: &str = "/opt/bkc/config.yml";
const DEFAULT_VAR_DIR: &str = "/opt/bkc/var";

/// Files and directories touched by an attestation run.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct BkcConfig {
    /// TPM event log (XML).
    pub event_log_file: PathBuf,
    /// Directory scanned for `*.xml` measurement files.
    pub measurement_dir: PathBuf,
    pub ca_cert_file: PathBuf,
    pub ca_key_file: PathBuf,
    pub flavor_file: PathBuf,
    pub manifest_dir: PathBuf,
    pub report_dir: PathBuf,
    /// Presence of this file enables the PCR 17/18 override.
    pub npw_acm_marker: PathBuf,
}

impl BkcConfig {
    /// Every path placed under `dir`, using the default file names.
    pub fn under<P: AsRef<Path>>(dir: P) -> Self {
        let dir = dir.as_ref();
        BkcConfig {
            event_log_file: dir.join("ramfs/measure-log.xml"),
            measurement_dir: dir.join("ramfs"),
            ca_cert_file: dir.join("ca-cert.pem"),
            ca_key_file: dir.join("ca-key.pem"),
            flavor_file: dir.join("flavors.json"),
            manifest_dir: dir.join("manifest"),
            report_dir: dir.join("report"),
            npw_acm_marker: dir.join("npw_acm"),
        }
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        let config = serde_yaml::from_str(&text)
            .map_err(|e| Error::Context(format!("invalid configuration {}: {}", path.display(), e).into()))?;
        debug!("loaded configuration from {}", path.display());
        Ok(config)
    }

    /// True if a CA certificate, key and flavor file were saved by an
    /// earlier run.
    pub fn has_saved_context(&self) -> bool {
        self.ca_cert_file.is_file() && self.ca_key_file.is_file() && self.flavor_file.is_file()
    }
}

impl Default for BkcConfig {
    fn default() -> Self {
        BkcConfig::under(DEFAULT_VAR_DIR)
    }
}
