/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! The attestation handshake, seen from either side.
//!
//! ```text
//! Init -> Connected -> QuoteDelivered -> SwkDelivered -> SecretDelivered
//! ```
//!
//! Any step may instead end in `Failed(reason)`. A session never leaves
//! `Failed` or `SecretDelivered`; a new handshake needs a new session, a new
//! nonce and a new SWK.

use std::fmt;

use zeroize::Zeroizing;

use sgx_swk::{open_secret, seal_secret, wrap_swk, Swk};
use sqvs::{verify_against_policy, QuotePolicy, QuoteVerifier};

use crate::error::{Error, FailureReason, Result};
use crate::nonce::{user_data, Nonce};
use crate::source::AttestationSource;

/// Username expected on the socket transport.
pub const DEFAULT_USERNAME: &str = "foobar";
/// Sample shared password; deployments should override it in the configuration.
pub const DEFAULT_PASSWORD: &str = "21345h8askjdf";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HandshakeState {
    Init,
    Connected,
    QuoteDelivered,
    SwkDelivered,
    SecretDelivered,
    Failed(FailureReason),
}

impl HandshakeState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, HandshakeState::SecretDelivered | HandshakeState::Failed(_))
    }
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            HandshakeState::Init => f.write_str("init"),
            HandshakeState::Connected => f.write_str("connected"),
            HandshakeState::QuoteDelivered => f.write_str("quote delivered"),
            HandshakeState::SwkDelivered => f.write_str("SWK delivered"),
            HandshakeState::SecretDelivered => f.write_str("secret delivered"),
            HandshakeState::Failed(reason) => write!(f, "failed ({})", reason),
        }
    }
}

/// Shared username and password of the socket transport.
#[derive(Clone)]
pub struct Credentials {
    username: String,
    password: Zeroizing<String>,
}

impl Credentials {
    pub fn new<U: Into<String>, P: Into<String>>(username: U, password: P) -> Self {
        Credentials { username: username.into(), password: Zeroizing::new(password.into()) }
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn password(&self) -> &str {
        &self.password
    }

    /// Compares both fields without short-circuiting on the first
    /// differing byte.
    pub fn matches(&self, username: &str, password: &str) -> bool {
        let user_ok = constant_time_eq(self.username.as_bytes(), username.as_bytes());
        let pass_ok = constant_time_eq(self.password.as_bytes(), password.as_bytes());
        user_ok & pass_ok
    }
}

impl Default for Credentials {
    fn default() -> Self {
        Credentials::new(DEFAULT_USERNAME, DEFAULT_PASSWORD)
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Credentials").field("username", &self.username).finish_non_exhaustive()
    }
}

pub(crate) fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && openssl::memcmp::eq(a, b)
}

/// Public key and quote, as handed from prover to verifier.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct IdentityBundle {
    pub public_key: Vec<u8>,
    pub quote: Vec<u8>,
}

/// Prover side. One session per handshake; the enclave is passed to the
/// steps that need it so the session itself stays plain data.
pub struct ProverSession {
    state: HandshakeState,
    nonce: Option<Nonce>,
    swk: Option<Swk>,
    secret: Option<Zeroizing<Vec<u8>>>,
}

impl ProverSession {
    pub fn new() -> Self {
        ProverSession { state: HandshakeState::Init, nonce: None, swk: None, secret: None }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn nonce(&self) -> Option<&Nonce> {
        self.nonce.as_ref()
    }

    /// Moves the session to `Failed` and hands the error back.
    pub fn abort(&mut self, err: Error) -> Error {
        if !matches!(self.state, HandshakeState::Failed(_)) {
            error!("attestation handshake failed in state {}: {}", self.state, err);
            self.state = HandshakeState::Failed(err.reason());
        }
        self.swk = None;
        err
    }

    fn expect(&mut self, expected: HandshakeState, step: &str) -> Result<()> {
        if self.state == expected {
            Ok(())
        } else {
            let err = Error::Protocol(format!("{} received in state {}", step, self.state).into());
            Err(self.abort(err))
        }
    }

    fn advance(&mut self, next: HandshakeState) {
        debug!("prover handshake: {} -> {}", self.state, next);
        self.state = next;
    }

    /// `Init -> Connected` for the socket transport: checks the shared
    /// credentials, then the nonce.
    pub fn connect(&mut self, credentials: &Credentials, username: &str, password: &str, nonce: Option<&str>) -> Result<()> {
        self.expect(HandshakeState::Init, "connect")?;
        if !credentials.matches(username, password) {
            return Err(self.abort(Error::AuthenticationFailed));
        }
        self.begin(nonce)
    }

    /// `Init -> Connected` for transports that authenticated the caller
    /// on their own, e.g. by bearer token.
    pub fn connect_authorized(&mut self, nonce: Option<&str>) -> Result<()> {
        self.expect(HandshakeState::Init, "connect")?;
        self.begin(nonce)
    }

    fn begin(&mut self, nonce: Option<&str>) -> Result<()> {
        let nonce = match nonce.map(Nonce::from_decimal).transpose() {
            Ok(nonce) => nonce,
            Err(e) => return Err(self.abort(e)),
        };
        self.nonce = nonce;
        self.advance(HandshakeState::Connected);
        Ok(())
    }

    /// `Connected -> QuoteDelivered`: fetches the public key and a quote
    /// bound to it and the session nonce.
    ///
    /// The prover keeps no record of nonces it has quoted over. Freshness is
    /// checked by the verifier, which picks the nonce and rejects any quote
    /// whose user data is not `public_key || nonce` for its own session.
    pub fn identity<S: AttestationSource + ?Sized>(&mut self, source: &S) -> Result<IdentityBundle> {
        self.expect(HandshakeState::Connected, "identity request")?;

        let quote = match source.quote(self.nonce.as_ref()) {
            Ok(quote) if !quote.is_empty() => quote,
            Ok(_) => return Err(self.abort(Error::AttestationUnavailable("enclave returned an empty quote".into()))),
            Err(e) => return Err(self.abort(Error::AttestationUnavailable(e))),
        };
        let public_key = match source.public_key() {
            Ok(key) if !key.is_empty() => key,
            Ok(_) => return Err(self.abort(Error::AttestationUnavailable("enclave returned an empty public key".into()))),
            Err(e) => return Err(self.abort(Error::AttestationUnavailable(e))),
        };

        debug!("delivering {}-byte quote and {}-byte public key", quote.len(), public_key.len());
        self.advance(HandshakeState::QuoteDelivered);
        Ok(IdentityBundle { public_key, quote })
    }

    /// `QuoteDelivered -> SwkDelivered`
    pub fn accept_wrapped_swk<S: AttestationSource + ?Sized>(&mut self, source: &S, wrapped: &[u8]) -> Result<()> {
        self.expect(HandshakeState::QuoteDelivered, "wrapped SWK")?;
        match source.unwrap_key(wrapped) {
            Ok(swk) => {
                self.swk = Some(swk);
                self.advance(HandshakeState::SwkDelivered);
                Ok(())
            }
            Err(e) => Err(self.abort(Error::KeyExchangeFailed(e))),
        }
    }

    /// `SwkDelivered -> SecretDelivered`. Returns the plaintext secret.
    pub fn accept_wrapped_secret(&mut self, wrapped: &[u8]) -> Result<&[u8]> {
        self.expect(HandshakeState::SwkDelivered, "wrapped secret")?;
        if wrapped.is_empty() {
            return Err(self.abort(Error::SecretDeliveryFailed("wrapped secret is empty".into())));
        }

        let opened = match &self.swk {
            Some(swk) => open_secret(swk.as_bytes(), wrapped),
            None => return Err(self.abort(Error::Protocol("no SWK in session".into()))),
        };
        let secret = match opened {
            Ok(secret) => Zeroizing::new(secret),
            Err(e) => return Err(self.abort(Error::SecretDeliveryFailed(e.into()))),
        };

        info!("received a {}-byte secret", secret.len());
        self.swk = None;
        self.advance(HandshakeState::SecretDelivered);
        Ok(self.secret.insert(secret).as_slice())
    }

    pub fn secret(&self) -> Option<&[u8]> {
        self.secret.as_deref().map(|s| s.as_slice())
    }

    /// Consumes the session, yielding the delivered secret if the
    /// handshake completed.
    pub fn into_secret(mut self) -> Option<Zeroizing<Vec<u8>>> {
        self.secret.take()
    }
}

impl Default for ProverSession {
    fn default() -> Self {
        ProverSession::new()
    }
}

/// Verifier-side view of a transport to the prover.
pub trait ProverChannel {
    /// Authenticates and asks for the prover's identity bound to `nonce`.
    fn request_identity(&mut self, nonce: &Nonce) -> Result<IdentityBundle>;

    fn send_wrapped_swk(&mut self, wrapped_swk: &[u8]) -> Result<()>;

    fn send_wrapped_secret(&mut self, wrapped_secret: &[u8]) -> Result<()>;
}

impl<'a, T: ProverChannel + ?Sized> ProverChannel for &'a mut T {
    fn request_identity(&mut self, nonce: &Nonce) -> Result<IdentityBundle> {
        (**self).request_identity(nonce)
    }

    fn send_wrapped_swk(&mut self, wrapped_swk: &[u8]) -> Result<()> {
        (**self).send_wrapped_swk(wrapped_swk)
    }

    fn send_wrapped_secret(&mut self, wrapped_secret: &[u8]) -> Result<()> {
        (**self).send_wrapped_secret(wrapped_secret)
    }
}

impl<T: ProverChannel + ?Sized> ProverChannel for Box<T> {
    fn request_identity(&mut self, nonce: &Nonce) -> Result<IdentityBundle> {
        (**self).request_identity(nonce)
    }

    fn send_wrapped_swk(&mut self, wrapped_swk: &[u8]) -> Result<()> {
        (**self).send_wrapped_swk(wrapped_swk)
    }

    fn send_wrapped_secret(&mut self, wrapped_secret: &[u8]) -> Result<()> {
        (**self).send_wrapped_secret(wrapped_secret)
    }
}

/// Verifier side: checks the prover's quote and, only if it passes,
/// provisions the secret.
pub struct VerifierSession {
    state: HandshakeState,
    nonce: Nonce,
}

impl VerifierSession {
    pub fn new() -> Result<Self> {
        Ok(Self::with_nonce(Nonce::generate()?))
    }

    pub fn with_nonce(nonce: Nonce) -> Self {
        VerifierSession { state: HandshakeState::Init, nonce }
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    pub fn nonce(&self) -> &Nonce {
        &self.nonce
    }

    fn advance(&mut self, next: HandshakeState) {
        debug!("verifier handshake: {} -> {}", self.state, next);
        self.state = next;
    }

    fn abort(&mut self, err: Error) -> Error {
        error!("attestation handshake failed in state {}: {}", self.state, err);
        self.state = HandshakeState::Failed(err.reason());
        err
    }

    /// Runs the whole handshake. Single attempt: any failure leaves the
    /// session in `Failed` and nothing is retried.
    pub fn run<C, V>(&mut self, channel: &mut C, verifier: &V, policy: &QuotePolicy, secret: &[u8]) -> Result<()>
    where
        C: ProverChannel + ?Sized,
        V: QuoteVerifier + ?Sized,
    {
        if self.state != HandshakeState::Init {
            return Err(Error::Protocol(format!("verifier session already {}", self.state).into()));
        }
        match self.run_steps(channel, verifier, policy, secret) {
            Ok(()) => Ok(()),
            Err(e) => Err(self.abort(e)),
        }
    }

    fn run_steps<C, V>(&mut self, channel: &mut C, verifier: &V, policy: &QuotePolicy, secret: &[u8]) -> Result<()>
    where
        C: ProverChannel + ?Sized,
        V: QuoteVerifier + ?Sized,
    {
        if secret.is_empty() {
            return Err(Error::SecretDeliveryFailed("refusing to provision an empty secret".into()));
        }

        let identity = channel.request_identity(&self.nonce)?;
        self.advance(HandshakeState::Connected);
        if identity.public_key.is_empty() || identity.quote.is_empty() {
            return Err(Error::AttestationUnavailable("prover sent an empty quote or public key".into()));
        }
        self.advance(HandshakeState::QuoteDelivered);

        let user_data = user_data(&identity.public_key, Some(&self.nonce));
        let attrs = verifier.verify_quote(&identity.quote, &user_data)
            .map_err(|e| Error::QuoteRejected(e.into()))?;
        verify_against_policy(&attrs, policy)
            .map_err(|e| Error::QuoteRejected(e.into()))?;
        info!("quote verified: MRENCLAVE {} MRSIGNER {} TCB {}", attrs.enclave_measurement, attrs.enclave_issuer, attrs.tcb_level);

        let swk = Swk::generate()?;
        let wrapped_swk = wrap_swk(&swk, &identity.public_key)
            .map_err(|e| Error::KeyExchangeFailed(e.into()))?;
        channel.send_wrapped_swk(&wrapped_swk)?;
        self.advance(HandshakeState::SwkDelivered);

        let wrapped_secret = seal_secret(swk.as_bytes(), secret)?;
        channel.send_wrapped_secret(&wrapped_secret)?;
        self.advance(HandshakeState::SecretDelivered);
        info!("secret provisioned ({} bytes sealed)", wrapped_secret.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use lazy_static::lazy_static;

    use super::*;
    use crate::error::BoxError;
    use crate::software::{SoftwareQuoteVerifier, SoftwareSource, SOFTWARE_MEASUREMENT};

    lazy_static! {
        static ref SOURCE: SoftwareSource = SoftwareSource::generate(2048).unwrap();
        static ref SOFTWARE_POLICY: QuotePolicy =
            QuotePolicy::parse(&format!("MRSigner:{0}\nMREnclave:{0}\n", SOFTWARE_MEASUREMENT)).unwrap();
    }

    /// Counts calls into the enclave.
    #[derive(Default)]
    struct CountingSource {
        quotes: AtomicUsize,
        empty_quote: bool,
    }

    impl AttestationSource for CountingSource {
        fn public_key(&self) -> std::result::Result<Vec<u8>, BoxError> {
            SOURCE.public_key()
        }

        fn quote(&self, nonce: Option<&Nonce>) -> std::result::Result<Vec<u8>, BoxError> {
            self.quotes.fetch_add(1, Ordering::SeqCst);
            if self.empty_quote {
                return Ok(vec![]);
            }
            SOURCE.quote(nonce)
        }

        fn unwrap_key(&self, wrapped: &[u8]) -> std::result::Result<Swk, BoxError> {
            SOURCE.unwrap_key(wrapped)
        }
    }

    /// Drives a prover session in-process.
    struct LocalChannel<'a> {
        session: ProverSession,
        source: &'a dyn AttestationSource,
        swks_received: usize,
    }

    impl<'a> LocalChannel<'a> {
        fn new(source: &'a dyn AttestationSource) -> Self {
            LocalChannel { session: ProverSession::new(), source, swks_received: 0 }
        }
    }

    impl<'a> ProverChannel for LocalChannel<'a> {
        fn request_identity(&mut self, nonce: &Nonce) -> Result<IdentityBundle> {
            self.session.connect(&Credentials::default(), DEFAULT_USERNAME, DEFAULT_PASSWORD, Some(nonce.as_decimal()))?;
            self.session.identity(self.source)
        }

        fn send_wrapped_swk(&mut self, wrapped_swk: &[u8]) -> Result<()> {
            self.swks_received += 1;
            self.session.accept_wrapped_swk(self.source, wrapped_swk)
        }

        fn send_wrapped_secret(&mut self, wrapped_secret: &[u8]) -> Result<()> {
            self.session.accept_wrapped_secret(wrapped_secret).map(|_| ())
        }
    }

    #[test]
    fn bad_password_never_reaches_the_enclave() {
        let source = CountingSource::default();
        let mut session = ProverSession::new();

        let err = session.connect(&Credentials::default(), DEFAULT_USERNAME, "wrong", Some("12345")).unwrap_err();
        assert!(matches!(err, Error::AuthenticationFailed));
        assert_eq!(session.state(), HandshakeState::Failed(FailureReason::AuthenticationFailed));

        assert!(matches!(session.identity(&source), Err(Error::Protocol(_))));
        assert_eq!(session.state(), HandshakeState::Failed(FailureReason::AuthenticationFailed));
        assert_eq!(source.quotes.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn wrong_username_is_rejected() {
        let mut session = ProverSession::new();
        assert!(matches!(session.connect(&Credentials::default(), "foobaz", DEFAULT_PASSWORD, None), Err(Error::AuthenticationFailed)));
    }

    #[test]
    fn invalid_nonce_is_a_protocol_error() {
        let mut session = ProverSession::new();
        assert!(matches!(session.connect(&Credentials::default(), DEFAULT_USERNAME, DEFAULT_PASSWORD, Some("0x10")), Err(Error::Protocol(_))));
        assert_eq!(session.state(), HandshakeState::Failed(FailureReason::Protocol));
    }

    #[test]
    fn steps_out_of_order() {
        let mut session = ProverSession::new();
        session.connect_authorized(None).unwrap();
        assert!(matches!(session.accept_wrapped_swk(&*SOURCE, &[0; 256]), Err(Error::Protocol(_))));
        assert_eq!(session.state(), HandshakeState::Failed(FailureReason::Protocol));

        let mut session = ProverSession::new();
        assert!(matches!(session.accept_wrapped_secret(&[0; 64]), Err(Error::Protocol(_))));
        assert!(matches!(session.connect_authorized(None), Err(Error::Protocol(_))));
    }

    #[test]
    fn empty_quote_is_attestation_unavailable() {
        let source = CountingSource { empty_quote: true, ..Default::default() };
        let mut session = ProverSession::new();
        session.connect_authorized(Some("42")).unwrap();
        assert!(matches!(session.identity(&source), Err(Error::AttestationUnavailable(_))));
        assert_eq!(session.state(), HandshakeState::Failed(FailureReason::AttestationUnavailable));
    }

    #[test]
    fn garbage_wrapped_swk() {
        let mut session = ProverSession::new();
        session.connect_authorized(None).unwrap();
        session.identity(&*SOURCE).unwrap();
        assert!(matches!(session.accept_wrapped_swk(&*SOURCE, &[7; 256]), Err(Error::KeyExchangeFailed(_))));
        assert_eq!(session.state(), HandshakeState::Failed(FailureReason::KeyExchangeFailed));
    }

    #[test]
    fn empty_wrapped_secret() {
        let mut session = ProverSession::new();
        session.connect_authorized(None).unwrap();
        let identity = session.identity(&*SOURCE).unwrap();
        let swk = Swk::generate().unwrap();
        session.accept_wrapped_swk(&*SOURCE, &wrap_swk(&swk, &identity.public_key).unwrap()).unwrap();

        assert!(matches!(session.accept_wrapped_secret(&[]), Err(Error::SecretDeliveryFailed(_))));
        assert_eq!(session.state(), HandshakeState::Failed(FailureReason::SecretDeliveryFailed));
        assert!(session.into_secret().is_none());
    }

    #[test]
    fn tampered_wrapped_secret() {
        let mut session = ProverSession::new();
        session.connect_authorized(None).unwrap();
        let identity = session.identity(&*SOURCE).unwrap();
        let swk = Swk::generate().unwrap();
        session.accept_wrapped_swk(&*SOURCE, &wrap_swk(&swk, &identity.public_key).unwrap()).unwrap();

        let mut sealed = seal_secret(swk.as_bytes(), b"For your eyes only!").unwrap();
        sealed[14] ^= 0x01;
        assert!(matches!(session.accept_wrapped_secret(&sealed), Err(Error::SecretDeliveryFailed(_))));
    }

    #[test]
    fn complete_handshake() {
        let mut channel = LocalChannel::new(&*SOURCE);
        let mut verifier = VerifierSession::new().unwrap();
        verifier.run(&mut channel, &SoftwareQuoteVerifier, &SOFTWARE_POLICY, b"For your eyes only!").unwrap();

        assert_eq!(verifier.state(), HandshakeState::SecretDelivered);
        assert_eq!(channel.session.state(), HandshakeState::SecretDelivered);
        assert_eq!(channel.session.nonce(), Some(verifier.nonce()));
        assert_eq!(channel.session.secret(), Some(&b"For your eyes only!"[..]));
    }

    #[test]
    fn rejected_quote_stops_before_key_exchange() {
        let policy = QuotePolicy::parse(&format!("MRSigner:{}\nMREnclave:DEF456\n", SOFTWARE_MEASUREMENT)).unwrap();
        let mut channel = LocalChannel::new(&*SOURCE);
        let mut verifier = VerifierSession::new().unwrap();

        let err = verifier.run(&mut channel, &SoftwareQuoteVerifier, &policy, b"secret").unwrap_err();
        assert!(matches!(err, Error::QuoteRejected(_)));
        assert_eq!(verifier.state(), HandshakeState::Failed(FailureReason::QuoteRejected));
        assert_eq!(channel.swks_received, 0);
        assert_eq!(channel.session.state(), HandshakeState::QuoteDelivered);
    }

    #[test]
    fn replayed_quote_fails_user_data_check() {
        /// Always answers with the identity captured for a previous nonce.
        struct ReplayChannel(IdentityBundle);

        impl ProverChannel for ReplayChannel {
            fn request_identity(&mut self, _nonce: &Nonce) -> Result<IdentityBundle> {
                Ok(self.0.clone())
            }
            fn send_wrapped_swk(&mut self, _: &[u8]) -> Result<()> {
                panic!("SWK sent for a replayed quote");
            }
            fn send_wrapped_secret(&mut self, _: &[u8]) -> Result<()> {
                panic!("secret sent for a replayed quote");
            }
        }

        let old_nonce = Nonce::generate().unwrap();
        let mut replay = ReplayChannel(IdentityBundle {
            public_key: SOURCE.public_key().unwrap(),
            quote: SOURCE.quote(Some(&old_nonce)).unwrap(),
        });
        let mut verifier = VerifierSession::new().unwrap();
        let err = verifier.run(&mut replay, &SoftwareQuoteVerifier, &SOFTWARE_POLICY, b"secret").unwrap_err();
        assert!(matches!(err, Error::QuoteRejected(_)));
    }

    #[test]
    fn session_is_single_use() {
        let mut channel = LocalChannel::new(&*SOURCE);
        let mut verifier = VerifierSession::new().unwrap();
        verifier.run(&mut channel, &SoftwareQuoteVerifier, &SOFTWARE_POLICY, b"one").unwrap();

        let mut channel = LocalChannel::new(&*SOURCE);
        assert!(matches!(verifier.run(&mut channel, &SoftwareQuoteVerifier, &SOFTWARE_POLICY, b"two"), Err(Error::Protocol(_))));
    }

    #[test]
    fn credentials_compare() {
        let creds = Credentials::new("foobar", "pw");
        assert!(creds.matches("foobar", "pw"));
        assert!(!creds.matches("foobar", "pw "));
        assert!(!creds.matches("", ""));
        assert!(!format!("{:?}", creds).contains("pw"));
    }
}
