/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Operator policy for verified quotes.
//!
//! A policy file holds one `field:value` pair per line:
//!
//! ```text
//! MRSigner:cd171c56941c6ce49690b455f691d9c8a04c2e43e0a4d30f752fa5285c7ee96e
//! MREnclave:2f1b3e0a7c1d6e5f4a3b2c1d0e9f8a7b6c5d4e3f2a1b0c9d8e7f6a5b4c3d2e1f
//! CPU_SVN:00
//! ```

use std::fmt;
use std::fs;
use std::path::Path;

use crate::{PolicyError, QuoteVerifyAttributes};

/// Default location of the policy file, relative to the working directory.
pub const DEFAULT_POLICY_PATH: &str = "./sgx-quote-policy.txt";

const DELIMITER: char = ':';

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PolicyField {
    MrEnclave,
    MrSigner,
    CpuSvn,
}

impl PolicyField {
    pub fn name(&self) -> &'static str {
        match self {
            PolicyField::MrEnclave => "MREnclave",
            PolicyField::MrSigner => "MRSigner",
            PolicyField::CpuSvn => "CPU_SVN",
        }
    }

    fn from_name(name: &str) -> Option<Self> {
        match name {
            "MREnclave" => Some(PolicyField::MrEnclave),
            "MRSigner" => Some(PolicyField::MrSigner),
            "CPU_SVN" => Some(PolicyField::CpuSvn),
            _ => None,
        }
    }
}

impl fmt::Display for PolicyField {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Expected quote attributes, in file order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct QuotePolicy {
    entries: Vec<(String, String)>,
}

impl QuotePolicy {
    /// Parses policy text. Lines without a delimiter are skipped. Keys other
    /// than the known fields are kept but never checked.
    pub fn parse(text: &str) -> Result<Self, PolicyError> {
        let mut entries: Vec<(String, String)> = Vec::new();
        for (lineno, line) in text.lines().enumerate() {
            let (key, value) = match line.trim().split_once(DELIMITER) {
                Some((key, value)) if !key.trim().is_empty() => (key.trim(), value.trim()),
                _ => continue,
            };
            if PolicyField::from_name(key).is_some() {
                if entries.iter().any(|(k, _)| k == key) {
                    return Err(PolicyError::Invalid(format!("{} defined more than once (line {})", key, lineno + 1).into()));
                }
                if value.is_empty() {
                    return Err(PolicyError::Invalid(format!("{} has an empty value (line {})", key, lineno + 1).into()));
                }
            } else {
                debug!("ignoring unknown quote policy key {:?}", key);
            }
            entries.push((key.to_owned(), value.to_owned()));
        }

        for required in [PolicyField::MrSigner, PolicyField::MrEnclave] {
            if !entries.iter().any(|(k, _)| k == required.name()) {
                return Err(PolicyError::Invalid(format!("{} is missing", required).into()));
            }
        }
        Ok(QuotePolicy { entries })
    }

    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, PolicyError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path)
            .map_err(|cause| PolicyError::Read { path: path.to_owned(), cause })?;
        let policy = Self::parse(&text)?;
        info!("loaded quote policy from {}", path.display());
        Ok(policy)
    }

    pub fn get(&self, field: PolicyField) -> Option<&str> {
        self.entries.iter()
            .find(|(k, _)| k == field.name())
            .map(|(_, v)| v.as_str())
    }

    pub fn entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

fn check(field: PolicyField, expected: Option<&str>, actual: Option<&str>) -> Result<(), PolicyError> {
    match expected {
        None => Ok(()),
        Some(expected) if actual == Some(expected) => Ok(()),
        Some(_) => {
            debug!("quote attribute {} differs from policy", field);
            Err(PolicyError::Mismatch { field })
        }
    }
}

/// Checks SQVS-verified attributes against the operator policy.
///
/// Every field present in the policy must string-equal the attribute SQVS
/// reported, and SQVS must have confirmed that the quote binds the user
/// data (public key and nonce) the verifier submitted.
pub fn verify_against_policy(attrs: &QuoteVerifyAttributes, policy: &QuotePolicy) -> Result<(), PolicyError> {
    check(PolicyField::MrSigner, policy.get(PolicyField::MrSigner), Some(attrs.enclave_issuer.as_str()))?;
    check(PolicyField::MrEnclave, policy.get(PolicyField::MrEnclave), Some(attrs.enclave_measurement.as_str()))?;
    check(PolicyField::CpuSvn, policy.get(PolicyField::CpuSvn), attrs.config_svn.as_deref())?;
    if !attrs.user_data_match {
        return Err(PolicyError::UserDataMismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use tempdir::TempDir;

    use super::*;

    macro_rules! assert_match {
        ($expr:expr, $pat:pat) => {
            assert!(if let $pat = $expr { true } else { false },
                "the value of `{}' should match the pattern `{}', but is `{:?}'", stringify!($expr), stringify!($pat), $expr)
        }
    }

    fn attrs(issuer: &str, measurement: &str, user_data_match: bool) -> QuoteVerifyAttributes {
        QuoteVerifyAttributes {
            enclave_issuer: issuer.into(),
            enclave_measurement: measurement.into(),
            user_data_match,
            ..Default::default()
        }
    }

    #[test]
    fn matching_attributes() {
        let dir = TempDir::new("sqvs-policy").unwrap();
        let path = dir.path().join("sgx-quote-policy.txt");
        let mut file = fs::File::create(&path).unwrap();
        writeln!(file, "MRSigner:ABC123").unwrap();
        writeln!(file, "MREnclave:DEF456").unwrap();
        drop(file);

        let policy = QuotePolicy::load(&path).unwrap();
        let attrs: QuoteVerifyAttributes = serde_json::from_str(
            r#"{"EnclaveIssuer": "ABC123", "EnclaveMeasurement": "DEF456", "userDataMatch": "true"}"#
        ).unwrap();
        verify_against_policy(&attrs, &policy).unwrap();
    }

    #[test]
    fn each_mismatch_names_its_field() {
        let policy = QuotePolicy::parse("MRSigner:ABC123\nMREnclave:DEF456\n").unwrap();

        assert_match!(verify_against_policy(&attrs("ABC124", "DEF456", true), &policy),
            Err(PolicyError::Mismatch { field: PolicyField::MrSigner }));
        assert_match!(verify_against_policy(&attrs("ABC123", "DEF457", true), &policy),
            Err(PolicyError::Mismatch { field: PolicyField::MrEnclave }));
        assert_match!(verify_against_policy(&attrs("ABC123", "DEF456", false), &policy),
            Err(PolicyError::UserDataMismatch));
    }

    #[test]
    fn comparison_is_exact() {
        let policy = QuotePolicy::parse("MRSigner:abc123\nMREnclave:DEF456").unwrap();
        assert_match!(verify_against_policy(&attrs("ABC123", "DEF456", true), &policy),
            Err(PolicyError::Mismatch { field: PolicyField::MrSigner }));
    }

    #[test]
    fn cpu_svn_is_checked_when_present() {
        let policy = QuotePolicy::parse("MRSigner:A\nMREnclave:B\nCPU_SVN:03").unwrap();
        let mut attrs = attrs("A", "B", true);
        assert_match!(verify_against_policy(&attrs, &policy), Err(PolicyError::Mismatch { field: PolicyField::CpuSvn }));
        attrs.config_svn = Some("02".into());
        assert_match!(verify_against_policy(&attrs, &policy), Err(PolicyError::Mismatch { field: PolicyField::CpuSvn }));
        attrs.config_svn = Some("03".into());
        verify_against_policy(&attrs, &policy).unwrap();
    }

    #[test]
    fn parse_skips_noise() {
        let policy = QuotePolicy::parse("# comment line\n\n  MRSigner : A1 \r\nbogus\nMREnclave:B2:extra\nVendor:acme\n").unwrap();
        assert_eq!(policy.get(PolicyField::MrSigner), Some("A1"));
        assert_eq!(policy.get(PolicyField::MrEnclave), Some("B2:extra"));
        assert_eq!(policy.get(PolicyField::CpuSvn), None);
        let keys: Vec<_> = policy.entries().map(|(k, _)| k).collect();
        assert_eq!(keys, ["MRSigner", "MREnclave", "Vendor"]);
    }

    #[test]
    fn load_errors() {
        assert_match!(QuotePolicy::parse("MRSigner:A\n"), Err(PolicyError::Invalid(_)));
        assert_match!(QuotePolicy::parse("MREnclave:A\n"), Err(PolicyError::Invalid(_)));
        assert_match!(QuotePolicy::parse("MRSigner:A\nMREnclave:B\nMRSigner:C\n"), Err(PolicyError::Invalid(_)));
        assert_match!(QuotePolicy::parse("MRSigner:\nMREnclave:B\n"), Err(PolicyError::Invalid(_)));

        let dir = TempDir::new("sqvs-policy").unwrap();
        assert_match!(QuotePolicy::load(dir.path().join("missing.txt")), Err(PolicyError::Read { .. }));
    }
}
