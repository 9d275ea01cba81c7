/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Path of the quote verification endpoint, relative to the SQVS base URL.
pub const VERIFY_QUOTE_PATH: &str = "sgx_qv_verify_quote";

/// Request body for the SQVS "verify quote" endpoint. Both fields carry
/// standard base64.
#[derive(Serialize, Deserialize, Clone, Debug, Eq, PartialEq)]
pub struct VerifyQuoteRequest {
    pub quote: String,
    #[serde(rename = "userData")]
    pub user_data: String,
}

/// Attributes SQVS extracts from a verified quote.
///
/// Measurements are hex strings exactly as SQVS reports them; no case
/// normalization is performed anywhere.
#[derive(Serialize, Deserialize, Clone, Debug, Default, Eq, PartialEq)]
pub struct QuoteVerifyAttributes {
    #[serde(rename = "reportData", default)]
    pub report_data: String,
    /// Whether SHA-256 of the submitted user data matched the quote's report data.
    #[serde(rename = "userDataMatch", default, serialize_with = "bool_as_string", deserialize_with = "bool_or_string")]
    pub user_data_match: bool,
    #[serde(rename = "Message", default)]
    pub message: String,
    /// MRSIGNER
    #[serde(rename = "EnclaveIssuer", default)]
    pub enclave_issuer: String,
    /// MRENCLAVE
    #[serde(rename = "EnclaveMeasurement", default)]
    pub enclave_measurement: String,
    #[serde(rename = "EnclaveIssuerProdID", default)]
    pub enclave_issuer_prod_id: String,
    #[serde(rename = "IsvSvn", default)]
    pub isv_svn: String,
    #[serde(rename = "ConfigSvn", default, skip_serializing_if = "Option::is_none")]
    pub config_svn: Option<String>,
    #[serde(rename = "TcbLevel", default)]
    pub tcb_level: String,
}

fn bool_as_string<S: Serializer>(value: &bool, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_str(if *value { "true" } else { "false" })
}

// SQVS reports the flag as the string "true"; accept a JSON boolean as well.
fn bool_or_string<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Flag {
        Bool(bool),
        Str(String),
    }

    Ok(match Flag::deserialize(deserializer)? {
        Flag::Bool(b) => b,
        Flag::Str(s) => s == "true",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SQVS_RESPONSE: &str = r#"{
        "Message": "SGX ECDSA Quote Verification Successful",
        "reportData": "8d0c8d16a4b2e0d1b6e4c3c3f4a1d1c1e4b3a2d1c0f9e8d7c6b5a4938271605",
        "userDataMatch": "true",
        "EnclaveIssuer": "cd171c56941c6ce49690b455f691d9c8a04c2e43e0a4d30f752fa5285c7ee96e",
        "EnclaveIssuerProdID": "00",
        "EnclaveIssuerExtProdID": "00000000000000000000000000000000",
        "EnclaveMeasurement": "2f1b3e0a7c1d6e5f4a3b2c1d0e9f8a7b6c5d4e3f2a1b0c9d8e7f6a5b4c3d2e1f",
        "ConfigSvn": "00",
        "IsvSvn": "01",
        "ConfigId": "",
        "TcbLevel": "UpToDate"
    }"#;

    #[test]
    fn parse_sqvs_response() {
        let attrs: QuoteVerifyAttributes = serde_json::from_str(SQVS_RESPONSE).unwrap();
        assert!(attrs.user_data_match);
        assert_eq!(attrs.enclave_issuer, "cd171c56941c6ce49690b455f691d9c8a04c2e43e0a4d30f752fa5285c7ee96e");
        assert_eq!(attrs.enclave_measurement, "2f1b3e0a7c1d6e5f4a3b2c1d0e9f8a7b6c5d4e3f2a1b0c9d8e7f6a5b4c3d2e1f");
        assert_eq!(attrs.config_svn.as_deref(), Some("00"));
        assert_eq!(attrs.tcb_level, "UpToDate");
    }

    #[test]
    fn user_data_match_forms() {
        let attrs: QuoteVerifyAttributes = serde_json::from_str(r#"{"userDataMatch": true}"#).unwrap();
        assert!(attrs.user_data_match);
        let attrs: QuoteVerifyAttributes = serde_json::from_str(r#"{"userDataMatch": "false"}"#).unwrap();
        assert!(!attrs.user_data_match);
        let attrs: QuoteVerifyAttributes = serde_json::from_str(r#"{"userDataMatch": "TRUE"}"#).unwrap();
        assert!(!attrs.user_data_match);
        let attrs: QuoteVerifyAttributes = serde_json::from_str("{}").unwrap();
        assert!(!attrs.user_data_match);
    }

    #[test]
    fn serialize_uses_wire_names() {
        let attrs = QuoteVerifyAttributes { user_data_match: true, enclave_issuer: "ab".into(), ..Default::default() };
        let json = serde_json::to_value(&attrs).unwrap();
        assert_eq!(json["userDataMatch"], "true");
        assert_eq!(json["EnclaveIssuer"], "ab");
        assert!(json.get("ConfigSvn").is_none());

        let request = serde_json::to_value(&VerifyQuoteRequest { quote: "cXVvdGU=".into(), user_data: "dWQ=".into() }).unwrap();
        assert_eq!(request, serde_json::json!({"quote": "cXVvdGU=", "userData": "dWQ="}));
    }
}
