// UASC for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! The send side staging buffer: messages become chunks, chunks get their
//! security applied one at a time, and the secured bytes drain to the
//! socket.

use std::collections::VecDeque;

use log::trace;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use uasc_types::Error;

use super::{
    chunker::Chunker,
    message_chunk::MessageChunk,
    secure_channel::SecureChannel,
    tcp_types::MIN_BUFFER_SIZE,
};

/// Stages outgoing messages. A message is chunked when written, each chunk
/// is secured just before it drains, so key material installed by a token
/// renewal applies to every chunk secured after it.
pub struct SendBuffer {
    /// The send buffer, secured bytes waiting for the socket.
    buffer: Vec<u8>,
    /// Read position within `buffer`.
    read_pos: usize,
    /// Chunks of messages that have been written but not yet secured.
    chunks_to_send: VecDeque<MessageChunk>,
    /// The largest chunk the peer accepts.
    send_buffer_size: usize,
    /// The largest message the peer accepts, 0 for no limit.
    max_message_size: usize,
    /// The most chunks per message the peer accepts, 0 for no limit.
    max_chunk_count: usize,
    /// Sequence number of the next chunk on the conversation.
    sequence_number: u32,
}

impl SendBuffer {
    /// Create a buffer with the local defaults, before negotiation.
    pub fn new(
        send_buffer_size: usize,
        max_message_size: usize,
        max_chunk_count: usize,
    ) -> SendBuffer {
        SendBuffer {
            buffer: Vec::with_capacity(send_buffer_size + 1024),
            read_pos: 0,
            chunks_to_send: VecDeque::new(),
            send_buffer_size,
            max_message_size,
            max_chunk_count,
            sequence_number: 1,
        }
    }

    /// Revise the limits down to what the peer acknowledged.
    pub fn revise(
        &mut self,
        send_buffer_size: usize,
        max_message_size: usize,
        max_chunk_count: usize,
    ) {
        if send_buffer_size >= MIN_BUFFER_SIZE && send_buffer_size < self.send_buffer_size {
            self.send_buffer_size = send_buffer_size;
        }
        if max_message_size > 0 && max_message_size < self.max_message_size {
            self.max_message_size = max_message_size;
        }
        if max_chunk_count > 0
            && (self.max_chunk_count == 0 || max_chunk_count < self.max_chunk_count)
        {
            self.max_chunk_count = max_chunk_count;
        }
    }

    /// Chunk a message onto the queue. Returns the request id on success.
    pub fn write(
        &mut self,
        request_id: u32,
        message: &crate::RequestMessage,
        secure_channel: &SecureChannel,
    ) -> Result<u32, Error> {
        trace!("Writing request {} to the send buffer", request_id);
        let chunks = Chunker::encode(
            self.sequence_number,
            request_id,
            self.max_message_size,
            self.send_buffer_size,
            self.max_chunk_count,
            secure_channel,
            message,
        )?;
        self.sequence_number = self.sequence_number.wrapping_add(chunks.len() as u32);
        self.chunks_to_send.extend(chunks);
        Ok(request_id)
    }

    /// True when there are chunks waiting for security and room in the
    /// byte buffer.
    pub fn should_encode_chunks(&self) -> bool {
        !self.chunks_to_send.is_empty() && !self.can_read()
    }

    /// Secure the next queued chunk into the byte buffer.
    pub fn encode_next_chunk(&mut self, secure_channel: &SecureChannel) -> Result<(), Error> {
        let Some(chunk) = self.chunks_to_send.pop_front() else {
            return Ok(());
        };
        // The secured chunk may grow by up to a cipher block and signature
        self.buffer.clear();
        self.read_pos = 0;
        self.buffer.resize(chunk.data.len() + 4096, 0);
        let size = secure_channel.apply_security(&chunk, &mut self.buffer)?;
        self.buffer.truncate(size);
        Ok(())
    }

    /// True when secured bytes are waiting for the socket.
    pub fn can_read(&self) -> bool {
        self.read_pos < self.buffer.len()
    }

    /// Write pending bytes to the stream. Partial writes keep their
    /// position, so this is safe to cancel and call again.
    pub async fn read_into_async<W: AsyncWrite + Unpin>(
        &mut self,
        write: &mut W,
    ) -> std::io::Result<()> {
        let written = write.write(&self.buffer[self.read_pos..]).await?;
        self.read_pos += written;
        if !self.can_read() {
            self.buffer.clear();
            self.read_pos = 0;
        }
        Ok(())
    }
}
