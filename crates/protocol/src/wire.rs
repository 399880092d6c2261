//! Wire format.
//!
//! # Stream layout
//!
//! ```text
//! [message type: u8][frame][frame]...
//! ```
//!
//! The one-byte message-type discriminator is written once, when the
//! stream opens. Every frame after it is a full failover message:
//!
//! ```text
//! [len: u32 BE][payload: bincode-encoded FailoverMessage]
//! ```
//!
//! Both sides serialize with the same schema; bincode is strict, so a
//! payload with unexpected shape fails the decode rather than being
//! silently tolerated. Partial reads are retried by `read_exact` until
//! the full frame arrives or the stream closes.

use quinn::{RecvStream, SendStream};
use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Message-type discriminator sent as the first byte of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MessageType {
    /// Initiate a failover; the only type currently driven.
    FailoverInitiate = 1,
    /// Reserved.
    FileTransfer = 2,
    /// Reserved.
    RollbackRequest = 3,
    /// Reserved.
    RollbackAcknowledge = 4,
}

impl MessageType {
    /// Parse a discriminator byte.
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(MessageType::FailoverInitiate),
            2 => Some(MessageType::FileTransfer),
            3 => Some(MessageType::RollbackRequest),
            4 => Some(MessageType::RollbackAcknowledge),
            _ => None,
        }
    }
}

/// Upper bound on a frame payload. The tower file is tiny; anything near
/// this size is a corrupt or hostile length prefix.
pub const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

/// Errors that can occur while framing messages on the stream.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("stream closed while reading")]
    StreamClosed,

    #[error("failed to read from stream: {0}")]
    Read(String),

    #[error("failed to write to stream: {0}")]
    Write(String),

    #[error("frame length {0} exceeds maximum {MAX_FRAME_LEN}")]
    FrameTooLarge(usize),

    #[error("failed to encode message: {0}")]
    Encode(#[source] bincode::Error),

    #[error("failed to decode message: {0}")]
    Decode(#[source] bincode::Error),

    #[error("unknown message type: {0}")]
    UnknownMessageType(u8),
}

fn read_error(err: quinn::ReadExactError) -> CodecError {
    match err {
        quinn::ReadExactError::FinishedEarly(_) => CodecError::StreamClosed,
        quinn::ReadExactError::ReadError(err) => CodecError::Read(err.to_string()),
    }
}

fn write_error(err: quinn::WriteError) -> CodecError {
    CodecError::Write(err.to_string())
}

/// Write the message-type discriminator that opens a stream.
pub async fn write_message_type(
    send: &mut SendStream,
    message_type: MessageType,
) -> Result<(), CodecError> {
    send.write_all(&[message_type as u8])
        .await
        .map_err(write_error)
}

/// Read the message-type discriminator that opens a stream.
pub async fn read_message_type(recv: &mut RecvStream) -> Result<MessageType, CodecError> {
    let mut byte = [0u8; 1];
    recv.read_exact(&mut byte).await.map_err(read_error)?;
    MessageType::from_byte(byte[0]).ok_or(CodecError::UnknownMessageType(byte[0]))
}

/// Encode `value` as one length-prefixed frame.
pub async fn write_frame<T: Serialize>(
    send: &mut SendStream,
    value: &T,
) -> Result<(), CodecError> {
    let payload = bincode::serialize(value).map_err(CodecError::Encode)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge(payload.len()));
    }
    send.write_all(&(payload.len() as u32).to_be_bytes())
        .await
        .map_err(write_error)?;
    send.write_all(&payload).await.map_err(write_error)
}

/// Read one length-prefixed frame and decode it.
pub async fn read_frame<T: DeserializeOwned>(recv: &mut RecvStream) -> Result<T, CodecError> {
    let mut len_bytes = [0u8; 4];
    recv.read_exact(&mut len_bytes).await.map_err(read_error)?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge(len));
    }

    let mut payload = vec![0u8; len];
    recv.read_exact(&mut payload).await.map_err(read_error)?;
    bincode::deserialize(&payload).map_err(CodecError::Decode)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_type_round_trips_documented_values() {
        for (byte, expected) in [
            (1u8, MessageType::FailoverInitiate),
            (2, MessageType::FileTransfer),
            (3, MessageType::RollbackRequest),
            (4, MessageType::RollbackAcknowledge),
        ] {
            assert_eq!(MessageType::from_byte(byte), Some(expected));
            assert_eq!(expected as u8, byte);
        }
    }

    #[test]
    fn message_type_rejects_unknown_bytes() {
        assert_eq!(MessageType::from_byte(0), None);
        assert_eq!(MessageType::from_byte(5), None);
        assert_eq!(MessageType::from_byte(255), None);
    }
}
