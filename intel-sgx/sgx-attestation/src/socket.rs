/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Handshake over one long-lived TCP connection carrying the four framed
//! messages in order.

use std::io::{self, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpListener, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use zeroize::Zeroizing;

use crate::handshake::{Credentials, IdentityBundle, ProverChannel, ProverSession};
use crate::message::{Connect, Message, MessageType, PubkeyQuote, PubkeyWrappedSwk, SwkWrappedSecret};
use crate::nonce::Nonce;
use crate::source::AttestationSource;
use crate::{Error, Result};

/// Reads the next frame, failing the session on anything but the
/// expected message.
macro_rules! receive {
    ($session:expr, $stream:expr, $variant:ident) => {
        match Message::read_from($stream) {
            Ok(Message::$variant(msg)) => msg,
            Ok(other) => return Err($session.abort(Error::Protocol(
                format!("expected {:?} message, received {:?}", MessageType::$variant, other.message_type()).into(),
            ))),
            Err(e) => return Err($session.abort(e.into())),
        }
    };
}

/// Runs the prover side of one handshake on `stream` and returns the
/// delivered secret.
pub fn serve_connection<T, S>(stream: &mut T, source: &S, credentials: &Credentials) -> Result<Zeroizing<Vec<u8>>>
where
    T: Read + Write,
    S: AttestationSource + ?Sized,
{
    let mut session = ProverSession::new();

    let connect = receive!(session, stream, Connect);
    session.connect(credentials, &connect.username, &connect.password, connect.nonce.as_deref())?;

    let IdentityBundle { public_key, quote } = session.identity(source)?;
    Message::PubkeyQuote(PubkeyQuote { pubkey: public_key, quote })
        .write_to(stream)
        .map_err(|e| session.abort(e.into()))?;

    let wrapped_swk = receive!(session, stream, PubkeyWrappedSwk).wrapped_swk;
    session.accept_wrapped_swk(source, &wrapped_swk)?;

    let wrapped_secret = receive!(session, stream, SwkWrappedSecret).wrapped_secret;
    session.accept_wrapped_secret(&wrapped_secret)?;

    session.into_secret().ok_or_else(|| Error::Protocol("handshake completed without a secret".into()))
}

/// Prover server: one thread per verifier connection.
pub struct SocketServer<S: ?Sized> {
    listener: TcpListener,
    source: Arc<S>,
    credentials: Arc<Credentials>,
    io_timeout: Option<Duration>,
}

impl<S: AttestationSource + ?Sized + 'static> SocketServer<S> {
    pub fn bind<A: ToSocketAddrs>(addr: A, source: Arc<S>, credentials: Credentials) -> io::Result<Self> {
        Ok(SocketServer {
            listener: TcpListener::bind(addr)?,
            source,
            credentials: Arc::new(credentials),
            io_timeout: None,
        })
    }

    /// Bounds every blocking read and write on accepted connections.
    pub fn io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = Some(timeout);
        self
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Accepts connections forever, logging every delivered secret's size.
    pub fn run(&self) -> io::Result<()> {
        self.run_with(|peer, secret| info!("secret from {} unwrapped successfully ({} bytes)", peer, secret.len()))
    }

    /// Accepts connections forever; `on_secret` is called from the
    /// connection's thread once a handshake completes.
    pub fn run_with<F>(&self, on_secret: F) -> io::Result<()>
    where
        F: Fn(SocketAddr, Zeroizing<Vec<u8>>) + Send + Sync + 'static,
    {
        let on_secret = Arc::new(on_secret);
        for stream in self.listener.incoming() {
            let stream = match stream {
                Ok(stream) => stream,
                Err(e) => {
                    warn!("failed to accept connection: {}", e);
                    continue;
                }
            };
            let source = self.source.clone();
            let credentials = self.credentials.clone();
            let on_secret = on_secret.clone();
            let io_timeout = self.io_timeout;

            let spawned = thread::Builder::new()
                .name("attestation-conn".into())
                .spawn(move || handle_client(stream, &*source, &credentials, io_timeout, &*on_secret));
            if let Err(e) = spawned {
                error!("unable to spawn connection handler: {}", e);
            }
        }
        Ok(())
    }
}

fn handle_client<S, F>(mut stream: TcpStream, source: &S, credentials: &Credentials, io_timeout: Option<Duration>, on_secret: &F)
where
    S: AttestationSource + ?Sized,
    F: Fn(SocketAddr, Zeroizing<Vec<u8>>),
{
    let peer = match stream.peer_addr() {
        Ok(peer) => peer,
        Err(e) => {
            warn!("dropping connection without peer address: {}", e);
            return;
        }
    };
    info!("verifier connected from {}", peer);

    let configured = stream.set_read_timeout(io_timeout).and_then(|()| stream.set_write_timeout(io_timeout));
    if let Err(e) = configured {
        warn!("unable to set timeouts for {}: {}", peer, e);
    }

    match serve_connection(&mut stream, source, credentials) {
        Ok(secret) => on_secret(peer, secret),
        Err(e) => error!("handshake with {} failed: {}", peer, e),
    }
    let _ = stream.shutdown(Shutdown::Both);
    info!("verifier {} disconnected", peer);
}

/// Verifier side of the socket transport.
pub struct SocketChannel<T> {
    stream: T,
    credentials: Credentials,
}

impl SocketChannel<TcpStream> {
    pub fn connect<A: ToSocketAddrs>(addr: A, credentials: Credentials, io_timeout: Duration) -> Result<Self> {
        let addrs = addr.to_socket_addrs().map_err(|e| Error::transport("resolving the prover address", e))?;
        let mut last_err = None;
        for addr in addrs {
            match TcpStream::connect_timeout(&addr, io_timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(io_timeout)).map_err(|e| Error::transport("configuring the connection", e))?;
                    stream.set_write_timeout(Some(io_timeout)).map_err(|e| Error::transport("configuring the connection", e))?;
                    info!("connected to prover at {}", addr);
                    return Ok(SocketChannel::new(stream, credentials));
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(match last_err {
            Some(e) => Error::transport("connecting to the prover", e),
            None => Error::Configuration("prover address did not resolve".into()),
        })
    }
}

impl<T: Read + Write> SocketChannel<T> {
    pub fn new(stream: T, credentials: Credentials) -> Self {
        SocketChannel { stream, credentials }
    }

    pub fn into_inner(self) -> T {
        self.stream
    }

    fn send(&mut self, msg: Message) -> Result<()> {
        msg.write_to(&mut self.stream).map_err(Into::into)
    }
}

impl<T: Read + Write> ProverChannel for SocketChannel<T> {
    fn request_identity(&mut self, nonce: &Nonce) -> Result<IdentityBundle> {
        self.send(Message::Connect(Connect {
            username: self.credentials.username().to_owned(),
            password: self.credentials.password().to_owned(),
            nonce: Some(nonce.as_decimal().to_owned()),
        }))?;

        match Message::read_from(&mut self.stream) {
            Ok(Message::PubkeyQuote(PubkeyQuote { pubkey, quote })) => Ok(IdentityBundle { public_key: pubkey, quote }),
            Ok(other) => Err(Error::Protocol(format!("expected PubkeyQuote, received {:?}", other.message_type()).into())),
            // the prover hangs up on bad credentials without replying
            Err(crate::message::FrameError::Io(ref e)) if e.kind() == io::ErrorKind::UnexpectedEof => {
                Err(Error::transport("waiting for the prover's quote (connection closed, check credentials)", io::Error::from(io::ErrorKind::UnexpectedEof)))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn send_wrapped_swk(&mut self, wrapped_swk: &[u8]) -> Result<()> {
        self.send(Message::PubkeyWrappedSwk(PubkeyWrappedSwk { wrapped_swk: wrapped_swk.to_vec() }))
    }

    fn send_wrapped_secret(&mut self, wrapped_secret: &[u8]) -> Result<()> {
        self.send(Message::SwkWrappedSecret(SwkWrappedSecret { wrapped_secret: wrapped_secret.to_vec() }))
    }
}
