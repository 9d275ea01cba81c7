/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use std::fs;
use std::io;
use std::path::Path;

use crate::{Error, Result};

/// Strips all spaces, tabs and line breaks from a well-formed XML document.
/// The PCR manifest consumer does not tolerate whitespace between elements.
pub fn sanitize(xml: &str) -> std::result::Result<String, roxmltree::Error> {
    roxmltree::Document::parse(xml)?;
    Ok(xml.chars().filter(|c| !matches!(c, ' ' | '\t' | '\n' | '\r')).collect())
}

/// Reads and sanitizes the TPM event log.
pub fn read_event_log(path: &Path) -> Result<String> {
    let event_log_error = |reason: String| Error::EventLog { path: path.to_owned(), reason: reason.into() };

    let xml = fs::read_to_string(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => event_log_error("measure log file does not exist".to_owned()),
        _ => event_log_error(e.to_string()),
    })?;
    let sanitized = sanitize(&xml).map_err(|e| event_log_error(format!("not well-formed XML: {}", e)))?;
    debug!("read {} byte event log from {}", sanitized.len(), path.display());
    Ok(sanitized)
}
