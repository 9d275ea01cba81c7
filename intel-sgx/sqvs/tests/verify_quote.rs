/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Drives the SQVS client against a canned HTTP responder on loopback.

use std::io::{Read, Write};
use std::net::TcpListener;
use std::sync::mpsc;
use std::thread;

use sqvs::client::ClientBuilder;
use sqvs::{verify_against_policy, Error, QuotePolicy, QuoteVerifier};

/// Serves exactly one request and hands back its raw head and body.
fn serve_once(status_line: &'static str, body: &'static str) -> (String, mpsc::Receiver<(String, Vec<u8>)>) {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let url = format!("http://{}/svs/v1", listener.local_addr().unwrap());
    let (tx, rx) = mpsc::channel();

    thread::spawn(move || {
        let (mut stream, _) = listener.accept().unwrap();
        let mut buf = Vec::new();
        let mut chunk = [0u8; 4096];
        let head_end = loop {
            let n = stream.read(&mut chunk).unwrap();
            assert!(n > 0, "client closed connection early");
            buf.extend_from_slice(&chunk[..n]);
            if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
                break pos + 4;
            }
        };
        let head = String::from_utf8(buf[..head_end].to_vec()).unwrap();
        let content_length = head.lines()
            .find_map(|l| {
                let (name, value) = l.split_once(':')?;
                if name.eq_ignore_ascii_case("content-length") { value.trim().parse::<usize>().ok() } else { None }
            })
            .unwrap_or(0);
        while buf.len() < head_end + content_length {
            let n = stream.read(&mut chunk).unwrap();
            buf.extend_from_slice(&chunk[..n]);
        }

        let response = format!("{}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}", status_line, body.len(), body);
        stream.write_all(response.as_bytes()).unwrap();
        tx.send((head, buf[head_end..].to_vec())).unwrap();
    });

    (url, rx)
}

#[test]
fn verified_quote_passes_policy() {
    let (url, rx) = serve_once("HTTP/1.1 200 OK", r#"{"Message":"SGX ECDSA Quote Verification Successful","userDataMatch":"true","EnclaveIssuer":"ABC123","EnclaveMeasurement":"DEF456","IsvSvn":"01","TcbLevel":"UpToDate"}"#);
    let client = ClientBuilder::new().build(url.as_str()).unwrap();

    let attrs = client.verify_quote(b"quote", b"user-data").unwrap();
    let policy = QuotePolicy::parse("MRSigner:ABC123\nMREnclave:DEF456\n").unwrap();
    verify_against_policy(&attrs, &policy).unwrap();

    let (head, body) = rx.recv().unwrap();
    assert!(head.starts_with("POST /svs/v1/sgx_qv_verify_quote HTTP/1.1\r\n"), "{}", head);
    let body: serde_json::Value = serde_json::from_slice(&body).unwrap();
    assert_eq!(body, serde_json::json!({"quote": "cXVvdGU=", "userData": "dXNlci1kYXRh"}));
}

#[test]
fn error_status_is_reported() {
    let (url, _rx) = serve_once("HTTP/1.1 400 Bad Request", r#"{"Message":"Invalid quote"}"#);
    let verifier: Box<dyn QuoteVerifier> = Box::new(ClientBuilder::new().build(url.as_str()).unwrap());

    match verifier.verify_quote(b"quote", b"user-data") {
        Err(Error::Status(400)) => {}
        other => panic!("unexpected result: {:?}", other),
    }
}

#[test]
fn undecodable_body() {
    let (url, _rx) = serve_once("HTTP/1.1 200 OK", "not json");
    let client = ClientBuilder::new().build(url.as_str()).unwrap();
    assert!(matches!(client.verify_quote(b"q", b"u"), Err(Error::Decode(_))));
}

#[test]
fn unreachable_service() {
    let port = TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();
    let client = ClientBuilder::new().build(format!("http://127.0.0.1:{}/", port).as_str()).unwrap();
    assert!(matches!(client.verify_quote(b"q", b"u"), Err(Error::Transport(_))));
}
