/* Copyright (c) Fortanix, Inc.
 *
 * This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at http://mozilla.org/MPL/2.0/. */

//! Framed messages of the socket transport.
//!
//! Every frame is a one byte message type, a big-endian `u32` payload
//! length, and the CBOR encoding of the message body.

use std::convert::TryFrom;
use std::fmt;
use std::io::{self, Read, Write};

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};

use crate::Error;

/// Frames larger than this are rejected before any allocation.
pub const MAX_FRAME_LEN: u32 = 1 << 20;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum MessageType {
    Connect = 1,
    PubkeyQuote = 2,
    PubkeyWrappedSwk = 3,
    SwkWrappedSecret = 4,
}

impl TryFrom<u8> for MessageType {
    type Error = u8;

    fn try_from(v: u8) -> Result<Self, u8> {
        match v {
            1 => Ok(MessageType::Connect),
            2 => Ok(MessageType::PubkeyQuote),
            3 => Ok(MessageType::PubkeyWrappedSwk),
            4 => Ok(MessageType::SwkWrappedSecret),
            v => Err(v),
        }
    }
}

#[derive(Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct Connect {
    pub username: String,
    pub password: String,
    /// Decimal nonce; absent when the verifier does not request freshness binding.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub nonce: Option<String>,
}

impl fmt::Debug for Connect {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Connect")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("nonce", &self.nonce)
            .finish()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PubkeyQuote {
    #[serde(with = "serde_bytes")]
    pub pubkey: Vec<u8>,
    #[serde(with = "serde_bytes")]
    pub quote: Vec<u8>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PubkeyWrappedSwk {
    #[serde(with = "serde_bytes")]
    pub wrapped_swk: Vec<u8>,
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SwkWrappedSecret {
    #[serde(with = "serde_bytes")]
    pub wrapped_secret: Vec<u8>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Message {
    Connect(Connect),
    PubkeyQuote(PubkeyQuote),
    PubkeyWrappedSwk(PubkeyWrappedSwk),
    SwkWrappedSecret(SwkWrappedSecret),
}

#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    #[error("I/O error on the attestation connection")]
    Io(#[from] io::Error),
    #[error("unknown message type {0}")]
    UnknownType(u8),
    #[error("frame length {0} exceeds the {} byte limit", MAX_FRAME_LEN)]
    TooLarge(u32),
    #[error("malformed message payload")]
    Payload(#[from] serde_cbor::Error),
}

impl From<FrameError> for Error {
    fn from(e: FrameError) -> Self {
        match e {
            FrameError::Io(e) => Error::transport("exchanging attestation messages", e),
            FrameError::Payload(e) => Error::Protocol(format!("malformed message payload: {}", e).into()),
            e => Error::Protocol(e.to_string().into()),
        }
    }
}

impl Message {
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::Connect(_) => MessageType::Connect,
            Message::PubkeyQuote(_) => MessageType::PubkeyQuote,
            Message::PubkeyWrappedSwk(_) => MessageType::PubkeyWrappedSwk,
            Message::SwkWrappedSecret(_) => MessageType::SwkWrappedSecret,
        }
    }

    pub fn write_to<W: Write>(&self, writer: &mut W) -> Result<(), FrameError> {
        let payload = match self {
            Message::Connect(m) => serde_cbor::to_vec(m)?,
            Message::PubkeyQuote(m) => serde_cbor::to_vec(m)?,
            Message::PubkeyWrappedSwk(m) => serde_cbor::to_vec(m)?,
            Message::SwkWrappedSecret(m) => serde_cbor::to_vec(m)?,
        };
        let len = u32::try_from(payload.len()).unwrap_or(u32::MAX);
        if len > MAX_FRAME_LEN {
            return Err(FrameError::TooLarge(len));
        }
        writer.write_u8(self.message_type() as u8)?;
        writer.write_u32::<BigEndian>(len)?;
        writer.write_all(&payload)?;
        writer.flush()?;
        Ok(())
    }

    /// Blocks until one complete frame has been read.
    pub fn read_from<R: Read>(reader: &mut R) -> Result<Message, FrameError> {
        let msg_type = MessageType::try_from(reader.read_u8()?).map_err(FrameError::UnknownType)?;
        let len = reader.read_u32::<BigEndian>()?;
        if len > MAX_FRAME_LEN {
            return Err(FrameError::TooLarge(len));
        }
        let mut payload = vec![0; len as usize];
        reader.read_exact(&mut payload)?;

        Ok(match msg_type {
            MessageType::Connect => Message::Connect(serde_cbor::from_slice(&payload)?),
            MessageType::PubkeyQuote => Message::PubkeyQuote(serde_cbor::from_slice(&payload)?),
            MessageType::PubkeyWrappedSwk => Message::PubkeyWrappedSwk(serde_cbor::from_slice(&payload)?),
            MessageType::SwkWrappedSecret => Message::SwkWrappedSecret(serde_cbor::from_slice(&payload)?),
        })
    }
}
