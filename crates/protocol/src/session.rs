//! Lockstep stream cursor.
//!
//! The stream is a conversation, not a sequence of request/response
//! pairs: either side may encode several times before the other replies.
//! [`SessionStream`] owns both halves of the bidirectional stream plus
//! the session's single mutable [`FailoverMessage`]; `send` and `recv`
//! move the conversation cursor. The N-th decode on one side always
//! corresponds to the N-th encode on the other — the drivers never
//! pipeline.

use crate::message::FailoverMessage;
use crate::wire::{self, CodecError, MessageType};
use quinn::{RecvStream, SendStream};

/// One failover session's stream plus its message state.
pub struct SessionStream {
    send: SendStream,
    recv: RecvStream,
    /// The session's message; updated in place by the owning driver and
    /// replaced wholesale by every [`SessionStream::recv`].
    pub message: FailoverMessage,
}

impl SessionStream {
    pub fn new(send: SendStream, recv: RecvStream) -> Self {
        Self {
            send,
            recv,
            message: FailoverMessage::new(),
        }
    }

    /// Write the message-type discriminator that opens the stream.
    /// Client-side, called exactly once before the first frame.
    pub async fn send_initiate(&mut self) -> Result<(), CodecError> {
        wire::write_message_type(&mut self.send, MessageType::FailoverInitiate).await
    }

    /// Read the discriminator byte. Server-side, called exactly once.
    pub async fn read_message_type(&mut self) -> Result<MessageType, CodecError> {
        wire::read_message_type(&mut self.recv).await
    }

    /// Encode the current message as one frame.
    pub async fn send(&mut self) -> Result<(), CodecError> {
        wire::write_frame(&mut self.send, &self.message).await
    }

    /// Decode the next frame, replacing the local message copy.
    pub async fn recv(&mut self) -> Result<(), CodecError> {
        self.message = wire::read_frame(&mut self.recv).await?;
        Ok(())
    }

    /// Signal that no further frames will be sent.
    pub fn finish(&mut self) {
        let _ = self.send.finish();
    }
}
