/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Complete attestation runs against a fake TPM and platform.

use std::cell::RefCell;
use std::fs;

use openssl::rsa::Rsa;
use openssl::x509::X509Ref;
use tempdir::TempDir;

use bkc::flavor::PcrFlavorProvider;
use bkc::manifest::Pcr;
use bkc::platform::{Feature, HardwareFeatures};
use bkc::report::PcrRuleVerifier;
use bkc::{
    run_attestation, AttestationContext, BkcConfig, BoxError, Collaborators, Error, PcrBank, PcrManifest,
    PcrManifestVerifier, PlatformInfo, PlatformInfoSource, SignedFlavor, TpmProvider, TpmSecrets,
};

const HW_UUID: &str = "803f6068-06da-e811-906e-00163566263e";
const EVENT_LOG: &str = "<measureLog>\n  <txt>\n    <txtStatus>3</txtStatus>\n  </txt>\n</measureLog>\n";

struct FakePlatform;

impl PlatformInfoSource for FakePlatform {
    fn platform_info(&self) -> Result<PlatformInfo, BoxError> {
        Ok(PlatformInfo {
            os_name: "RedHatEnterprise".into(),
            os_version: "8.2".into(),
            hardware_uuid: HW_UUID.into(),
            tpm_enabled: true,
            tpm_version: "2.0".into(),
            txt_enabled: true,
            tboot_installed: true,
            hardware_features: HardwareFeatures { txt: Feature { enabled: true }, ..Default::default() },
            ..Default::default()
        })
    }
}

struct FakeTpm {
    aik: Rsa<openssl::pkey::Private>,
    last_nonce: RefCell<Vec<u8>>,
    truncate_quote: bool,
    fail: bool,
}

impl FakeTpm {
    fn new() -> Self {
        FakeTpm { aik: Rsa::generate(2048).unwrap(), last_nonce: RefCell::default(), truncate_quote: false, fail: false }
    }
}

impl TpmProvider for FakeTpm {
    fn quote(&self, _aik_secret: &str, nonce: &[u8], banks: &[PcrBank], pcrs: &[u8]) -> Result<Vec<u8>, BoxError> {
        if self.fail {
            return Err("TPM device busy".into());
        }
        assert_eq!(banks, [PcrBank::Sha1, PcrBank::Sha256]);
        assert_eq!(pcrs.len(), 24);
        *self.last_nonce.borrow_mut() = nonce.to_vec();

        let mut attest = vec![0xff, 0x54, 0x43, 0x47, 0x80, 0x18];
        attest.extend_from_slice(&[0, 4, b'n', b'a', b'm', b'e']);
        attest.extend_from_slice(&(nonce.len() as u16).to_be_bytes());
        attest.extend_from_slice(nonce);
        let mut quote = (attest.len() as u16).to_be_bytes().to_vec();
        quote.extend_from_slice(&attest);
        quote.extend_from_slice(b"signature");
        if self.truncate_quote {
            quote.truncate(12);
        }
        Ok(quote)
    }

    fn create_aik(&self, owner_secret: &str, aik_secret: &str) -> Result<(), BoxError> {
        assert_eq!((owner_secret, aik_secret), ("owner", "aik"));
        Ok(())
    }

    fn aik_public_key(&self) -> Result<Vec<u8>, BoxError> {
        Ok(self.aik.n().to_vec())
    }

    fn aik_name(&self) -> Result<Vec<u8>, BoxError> {
        Ok(b"\x00\x0baik-name".to_vec())
    }
}

/// Reports fixed PCR values for quotes carrying the last nonce.
struct FakePcrVerifier<'a> {
    tpm: &'a FakeTpm,
    sha256: RefCell<Vec<(u8, String)>>,
}

impl<'a> FakePcrVerifier<'a> {
    fn new(tpm: &'a FakeTpm) -> Self {
        let values = (0..24).map(|i| (i, format!("{:064x}", i))).collect();
        FakePcrVerifier { tpm, sha256: RefCell::new(values) }
    }

    fn set(&self, index: u8, value: &str) {
        self.sha256.borrow_mut()[index as usize].1 = value.to_owned();
    }
}

impl<'a> PcrManifestVerifier for FakePcrVerifier<'a> {
    fn verify_quote(&self, event_log: &str, extra_data: &[u8], _quote: &[u8], aik_cert: &X509Ref) -> Result<PcrManifest, BoxError> {
        assert!(!event_log.contains(char::is_whitespace));
        if extra_data != self.tpm.last_nonce.borrow().as_slice() {
            return Err("nonce mismatch".into());
        }
        if aik_cert.public_key()?.rsa()?.n() != self.tpm.aik.n() {
            return Err("AIK certificate does not match".into());
        }
        Ok(PcrManifest {
            sha1_pcrs: vec![],
            sha256_pcrs: self.sha256.borrow().iter()
                .map(|(index, value)| Pcr { index: *index, bank: PcrBank::Sha256, value: value.clone() })
                .collect(),
            pcr_event_log: event_log.to_owned(),
        })
    }
}

fn secrets() -> TpmSecrets {
    TpmSecrets { owner_secret: "owner".into(), aik_secret: "aik".into() }
}

fn setup() -> (TempDir, BkcConfig) {
    let dir = TempDir::new("bkc").unwrap();
    let config = BkcConfig::under(dir.path());
    fs::create_dir_all(&config.measurement_dir).unwrap();
    fs::write(&config.event_log_file, EVENT_LOG).unwrap();
    fs::write(config.measurement_dir.join("platform.xml"), "<Manifest/>").unwrap();
    (dir, config)
}

fn attest(config: &BkcConfig, tpm: &FakeTpm, pcrs: &FakePcrVerifier) -> bkc::Result<(bool, String)> {
    let mut context = AttestationContext::load_or_generate(config)?;
    let collaborators = Collaborators {
        platform: &FakePlatform,
        tpm,
        pcr_verifier: pcrs,
        flavor_provider: &PcrFlavorProvider::default(),
        manifest_verifier: &PcrRuleVerifier,
    };
    let mut out = Vec::new();
    let outcome = run_attestation(&mut out, &mut context, &collaborators, &secrets(), config)?;
    let out = String::from_utf8(out).unwrap();
    assert_eq!(out, format!("Attestation at {}: {}\n", outcome.timestamp, if outcome.passed { "PASSED" } else { "FAILED" }));
    assert!(config.manifest_dir.join(&outcome.timestamp).is_file());
    assert!(config.report_dir.join(&outcome.timestamp).is_file());
    Ok((outcome.passed, outcome.timestamp))
}

#[test]
fn first_run_passes_and_saves_context() {
    let (_dir, config) = setup();
    let tpm = FakeTpm::new();
    let pcrs = FakePcrVerifier::new(&tpm);

    assert!(!config.has_saved_context());
    let (passed, timestamp) = attest(&config, &tpm, &pcrs).unwrap();
    assert!(passed);
    assert!(config.has_saved_context());

    let flavors: Vec<SignedFlavor> = serde_json::from_slice(&fs::read(&config.flavor_file).unwrap()).unwrap();
    assert_eq!(flavors.len(), 1);
    assert_eq!(flavors[0].flavor.pcrs.iter().map(|p| p.index).collect::<Vec<_>>(), [0, 17, 18]);
    assert_eq!(flavors[0].flavor.meta.label, format!("BKC_{}", HW_UUID));

    let manifest: serde_json::Value = serde_json::from_slice(&fs::read(config.manifest_dir.join(&timestamp)).unwrap()).unwrap();
    assert_eq!(manifest["host_info"]["hardware_uuid"], HW_UUID);
    assert_eq!(manifest["measurement_xmls"][0], "<Manifest/>");
    assert_eq!(base64::decode(manifest["asset_tag_digest"].as_str().unwrap()).unwrap().len(), 48);
}

#[test]
fn later_runs_reuse_flavors() {
    let (_dir, config) = setup();
    let tpm = FakeTpm::new();
    let pcrs = FakePcrVerifier::new(&tpm);
    attest(&config, &tpm, &pcrs).unwrap();
    let saved_flavors = fs::read(&config.flavor_file).unwrap();

    // PCR 17 changed: fails unless the NPW ACM marker is present
    pcrs.set(17, "ff");
    assert!(!attest(&config, &tpm, &pcrs).unwrap().0);
    fs::write(&config.npw_acm_marker, "").unwrap();
    assert!(attest(&config, &tpm, &pcrs).unwrap().0);

    // PCR 0 is never exempt
    pcrs.set(0, "ff");
    assert!(!attest(&config, &tpm, &pcrs).unwrap().0);

    assert_eq!(fs::read(&config.flavor_file).unwrap(), saved_flavors);
}

#[test]
fn tampered_flavor_is_rejected() {
    let (_dir, config) = setup();
    let tpm = FakeTpm::new();
    let pcrs = FakePcrVerifier::new(&tpm);
    attest(&config, &tpm, &pcrs).unwrap();

    let mut flavors: Vec<SignedFlavor> = serde_json::from_slice(&fs::read(&config.flavor_file).unwrap()).unwrap();
    flavors[0].flavor.pcrs[1].value = "ff".into();
    fs::write(&config.flavor_file, serde_json::to_vec(&flavors).unwrap()).unwrap();

    match attest(&config, &tpm, &pcrs) {
        Err(Error::Verification(msg)) => assert!(msg.contains("invalid signature"), "{}", msg),
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn collaborator_failures() {
    let (_dir, config) = setup();

    let mut tpm = FakeTpm::new();
    tpm.fail = true;
    assert!(matches!(attest(&config, &tpm, &FakePcrVerifier::new(&tpm)), Err(Error::TpmQuote(_))));

    let mut tpm = FakeTpm::new();
    tpm.truncate_quote = true;
    assert!(matches!(attest(&config, &tpm, &FakePcrVerifier::new(&tpm)), Err(Error::MalformedQuote(_))));

    let tpm = FakeTpm::new();
    fs::write(&config.event_log_file, "<measureLog>").unwrap();
    assert!(matches!(attest(&config, &tpm, &FakePcrVerifier::new(&tpm)), Err(Error::EventLog { .. })));
    fs::remove_file(&config.event_log_file).unwrap();
    assert!(matches!(attest(&config, &tpm, &FakePcrVerifier::new(&tpm)), Err(Error::EventLog { .. })));

    // nothing is saved by failed runs
    assert!(!config.has_saved_context());
    assert!(!config.report_dir.exists());
}
