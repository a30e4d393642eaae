// UASC for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Turns messages into chunks and chunks back into messages.

use std::io::{Read, Write};

use log::{debug, error};

use uasc_crypto::SecurityPolicy;
use uasc_types::{
    BinaryDecodable, BinaryEncodable, EncodingResult, Error, NodeId, ObjectId, StatusCode,
};

use crate::Message;

use super::{
    message_chunk::{MessageChunk, MessageChunkType, MessageIsFinalType},
    secure_channel::SecureChannel,
};

/// Read adapter over a sequence of decrypted chunks. Reading walks the body
/// slice of each chunk in turn, so reassembly does not allocate a message
/// sized buffer.
struct ReceiveStream<'a, T> {
    buffer: &'a [u8],
    channel: &'a SecureChannel,
    items: T,
    num_items: usize,
    pos: usize,
    index: usize,
}

impl<'a, T: Iterator<Item = &'a MessageChunk>> ReceiveStream<'a, T> {
    fn new(channel: &'a SecureChannel, mut items: T, num_items: usize) -> Result<Self, Error> {
        let Some(chunk) = items.next() else {
            return Err(Error::new(
                StatusCode::BadUnexpectedError,
                "Stream contained no chunks",
            ));
        };

        let chunk_info = chunk.chunk_info(channel)?;
        let expected_is_final = if num_items == 1 {
            MessageIsFinalType::Final
        } else {
            MessageIsFinalType::Intermediate
        };
        if chunk_info.message_header.is_final != expected_is_final {
            return Err(Error::decoding("Chunk has the wrong final flag"));
        }

        let body_start = chunk_info.body_offset;
        let body_end = body_start + chunk_info.body_length;
        Ok(Self {
            buffer: &chunk.data[body_start..body_end],
            channel,
            items,
            pos: 0,
            num_items,
            index: 0,
        })
    }
}

impl<'a, T: Iterator<Item = &'a MessageChunk>> Read for ReceiveStream<'a, T> {
    fn read(&mut self, mut buf: &mut [u8]) -> std::io::Result<usize> {
        if self.buffer.len() == self.pos {
            let Some(chunk) = self.items.next() else {
                return Ok(0);
            };
            self.index += 1;
            let chunk_info = chunk.chunk_info(self.channel)?;
            let expected_is_final = if self.index == self.num_items - 1 {
                MessageIsFinalType::Final
            } else {
                MessageIsFinalType::Intermediate
            };
            if chunk_info.message_header.is_final != expected_is_final {
                return Err(StatusCode::BadDecodingError.into());
            }

            let body_start = chunk_info.body_offset;
            let body_end = body_start + chunk_info.body_length;
            self.buffer = &chunk.data[body_start..body_end];
            self.pos = 0;
        }
        let written = buf.write(&self.buffer[self.pos..])?;
        self.pos += written;
        Ok(written)
    }
}

/// Write adapter that slices an encoded message into chunks as the bytes
/// stream through it.
struct ChunkingStream<'a> {
    secure_channel: &'a SecureChannel,
    chunks: Vec<MessageChunk>,
    expected_chunk_count: usize,
    max_body_per_chunk: usize,
    next_buf: Vec<u8>,
    buf_position: usize,
    is_closed: bool,
    sequence_number: u32,
    request_id: u32,
    message_size: usize,
    message_type: MessageChunkType,
}

impl<'a> ChunkingStream<'a> {
    fn new(
        message_type: MessageChunkType,
        secure_channel: &'a SecureChannel,
        max_chunk_size: usize,
        max_chunk_count: usize,
        message_size: usize,
        request_id: u32,
        request_handle: u32,
        sequence_number: u32,
    ) -> Result<Self, Error> {
        let (expected_chunk_count, max_body_per_chunk) = if max_chunk_size > 0 {
            let max_body_per_chunk = MessageChunk::body_size_from_message_size(
                message_type,
                secure_channel,
                max_chunk_size,
            )
            .map_err(|_| {
                Error::new(
                    StatusCode::BadTcpInternalError,
                    format!(
                        "Negotiated chunk size {} is too small to chunk with",
                        max_chunk_size
                    ),
                )
                .with_context(
                    Some(request_id),
                    (request_handle > 0).then_some(request_handle),
                )
            })?;
            (message_size / max_body_per_chunk + 1, max_body_per_chunk)
        } else {
            (1, 0)
        };

        if max_chunk_count > 0 && expected_chunk_count > max_chunk_count {
            error!(
                "Message requires {} chunks, exceeding the max chunk count {}",
                expected_chunk_count, max_chunk_count
            );
            return Err(Error::new(
                StatusCode::BadEncodingLimitsExceeded,
                "Message exceeds the peer's chunk count limit",
            )
            .with_context(
                Some(request_id),
                (request_handle > 0).then_some(request_handle),
            ));
        }

        let next_buf_size = if expected_chunk_count == 1 {
            message_size
        } else {
            max_body_per_chunk
        };

        Ok(Self {
            secure_channel,
            chunks: Vec::with_capacity(expected_chunk_count),
            expected_chunk_count,
            max_body_per_chunk,
            next_buf: vec![0; next_buf_size],
            buf_position: 0,
            is_closed: false,
            sequence_number,
            request_id,
            message_type,
            message_size,
        })
    }

    fn flush_chunk(&mut self) -> EncodingResult<()> {
        if self.is_closed {
            return Ok(());
        }

        let buf = std::mem::take(&mut self.next_buf);
        let is_final = if self.chunks.len() == self.expected_chunk_count - 1 {
            self.is_closed = true;
            MessageIsFinalType::Final
        } else {
            MessageIsFinalType::Intermediate
        };

        let chunk = MessageChunk::new(
            self.sequence_number.wrapping_add(self.chunks.len() as u32),
            self.request_id,
            self.message_type,
            is_final,
            self.secure_channel,
            &buf,
        )?;
        self.chunks.push(chunk);

        if !self.is_closed {
            let next_buf_size = if self.chunks.len() == self.expected_chunk_count - 1 {
                self.message_size % self.max_body_per_chunk
            } else {
                self.max_body_per_chunk
            };
            self.next_buf = vec![0; next_buf_size];
            self.buf_position = 0;
        }
        Ok(())
    }

    fn finish(self) -> EncodingResult<Vec<MessageChunk>> {
        if !self.is_closed {
            return Err(Error::encoding("Message did not encode to the expected size"));
        }
        Ok(self.chunks)
    }
}

impl Write for ChunkingStream<'_> {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.is_closed {
            return Ok(0);
        }

        let to_read = buf.len().min(self.next_buf.len() - self.buf_position);
        self.next_buf[self.buf_position..(self.buf_position + to_read)]
            .copy_from_slice(&buf[..to_read]);
        self.buf_position += to_read;
        if self.buf_position == self.next_buf.len() {
            self.flush_chunk()?;
        }
        Ok(to_read)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        self.flush_chunk()?;
        Ok(())
    }
}

/// Turns messages into chunks and sequences of chunks back into messages.
pub struct Chunker;

impl Chunker {
    /// Validate that the supplied chunks carry the channel's id, contiguous
    /// sequence numbers starting at or after `starting_sequence_number`,
    /// and a single request id. Returns the last sequence number.
    pub fn validate_chunks(
        starting_sequence_number: u32,
        secure_channel: &SecureChannel,
        chunks: &[MessageChunk],
    ) -> Result<u32, Error> {
        let first_sequence_number = {
            let chunk_info = chunks[0].chunk_info(secure_channel)?;
            chunk_info.sequence_header.sequence_number
        };
        if first_sequence_number < starting_sequence_number {
            return Err(Error::new(
                StatusCode::BadSequenceNumberInvalid,
                format!(
                    "First sequence number {} is less than expected {}",
                    first_sequence_number, starting_sequence_number
                ),
            ));
        }

        let secure_channel_id = secure_channel.secure_channel_id();
        let mut expected_request_id: u32 = 0;
        for (i, chunk) in chunks.iter().enumerate() {
            let chunk_info = chunk.chunk_info(secure_channel)?;

            if secure_channel_id != 0
                && chunk_info.message_header.secure_channel_id != secure_channel_id
            {
                return Err(Error::new(
                    StatusCode::BadSecureChannelIdInvalid,
                    format!(
                        "Secure channel id {} does not match expected id {}",
                        chunk_info.message_header.secure_channel_id, secure_channel_id
                    ),
                ));
            }

            // Sequence numbers must be contiguous within a message
            let sequence_number = chunk_info.sequence_header.sequence_number;
            let expected_sequence_number = first_sequence_number.wrapping_add(i as u32);
            if sequence_number != expected_sequence_number {
                return Err(Error::new(
                    StatusCode::BadSequenceNumberInvalid,
                    format!(
                        "Chunk sequence number {} is not the expected {}, index {}",
                        sequence_number, expected_sequence_number, i
                    ),
                ));
            }

            if i == 0 {
                expected_request_id = chunk_info.sequence_header.request_id;
            } else if chunk_info.sequence_header.request_id != expected_request_id {
                return Err(Error::new(
                    StatusCode::BadSequenceNumberInvalid,
                    format!(
                        "Chunk with sequence number {} has request id {}, expected {}",
                        sequence_number, chunk_info.sequence_header.request_id, expected_request_id
                    ),
                ));
            }
        }
        Ok(first_sequence_number.wrapping_add(chunks.len() as u32 - 1))
    }

    /// Encode a message into unsecured chunks, starting at the supplied
    /// sequence number.
    ///
    /// `max_message_size` and `max_chunk_count` are the peer's limits, 0
    /// for no limit. `max_chunk_size` is the peer's receive buffer size.
    pub fn encode(
        sequence_number: u32,
        request_id: u32,
        max_message_size: usize,
        max_chunk_size: usize,
        max_chunk_count: usize,
        secure_channel: &SecureChannel,
        message: &impl Message,
    ) -> Result<Vec<MessageChunk>, Error> {
        if secure_channel.security_policy() == SecurityPolicy::Unknown {
            return Err(Error::new(
                StatusCode::BadSecurityPolicyRejected,
                "Security policy cannot be unknown",
            ));
        }

        let ctx_id = Some(request_id);
        let handle = message.request_handle();
        let ctx_handle = (handle > 0).then_some(handle);

        let ctx_r = secure_channel.context();
        let ctx = ctx_r.context();
        let mut message_size = message.byte_len(&ctx);
        if max_message_size > 0 && message_size > max_message_size {
            error!(
                "Max message size is {} and message size {} exceeds that",
                max_message_size, message_size
            );
            // The client reports BadRequestTooLarge, a server would report
            // BadResponseTooLarge
            return Err(Error::new(
                if secure_channel.is_client_role() {
                    StatusCode::BadRequestTooLarge
                } else {
                    StatusCode::BadResponseTooLarge
                },
                "Message exceeds the maximum message size",
            )
            .with_context(ctx_id, ctx_handle));
        }

        // The message body is preceded by the node id of its binary encoding
        let node_id = message.type_id();
        message_size += node_id.byte_len(&ctx);

        let mut stream = ChunkingStream::new(
            message.message_type(),
            secure_channel,
            max_chunk_size,
            max_chunk_count,
            message_size,
            request_id,
            handle,
            sequence_number,
        )?;

        node_id.encode(&mut stream, &ctx)?;
        message
            .encode(&mut stream, &ctx)
            .map_err(|e| e.with_context(ctx_id, ctx_handle))?;
        stream.flush().map_err(Error::encoding)?;
        stream.finish()
    }

    /// Decode a sequence of decrypted chunks into a message, dispatching on
    /// the leading node id. When `expected_node_id` is given the id must
    /// match.
    pub fn decode<T: Message>(
        chunks: &[MessageChunk],
        secure_channel: &SecureChannel,
        expected_node_id: Option<NodeId>,
    ) -> Result<T, Error> {
        for (i, chunk) in chunks.iter().enumerate() {
            let chunk_info = chunk.chunk_info(secure_channel)?;
            let expected_is_final = if i == chunks.len() - 1 {
                MessageIsFinalType::Final
            } else {
                MessageIsFinalType::Intermediate
            };
            if chunk_info.message_header.is_final != expected_is_final {
                return Err(Error::decoding("Chunk has the wrong final flag"));
            }
        }

        let mut stream = ReceiveStream::new(secure_channel, chunks.iter(), chunks.len())?;

        let ctx_r = secure_channel.context();
        let ctx = ctx_r.context();

        let node_id = NodeId::decode(&mut stream, &ctx)?;
        let object_id = Self::object_id_from_node_id(node_id, expected_node_id)?;
        T::decode_by_object_id(&mut stream, object_id, &ctx).map_err(|err| {
            debug!("Cannot decode message {:?}, err = {:?}", object_id, err);
            err
        })
    }

    fn object_id_from_node_id(
        node_id: NodeId,
        expected_node_id: Option<NodeId>,
    ) -> Result<ObjectId, Error> {
        if let Some(id) = expected_node_id {
            if node_id != id {
                return Err(Error::decoding(format!(
                    "Message id {} is not the expected {}",
                    node_id, id
                )));
            }
        }
        node_id
            .as_object_id()
            .map_err(|_| Error::decoding(format!("Message id {} is not an object id", node_id)))
    }
}
