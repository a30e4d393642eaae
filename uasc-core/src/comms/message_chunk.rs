// UASC for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! A message chunk is a message or a portion of a message, optionally
//! signed and encrypted, which has been split for transmission.

use std::io::{Cursor, Read, Write};

use log::error;

use uasc_types::{
    encoding::{
        process_decode_io_result, process_encode_io_result, read_u32, read_u8, write_u32,
        write_u8, DecodingOptions, EncodingResult, Error, SimpleBinaryDecodable,
        SimpleBinaryEncodable,
    },
    StatusCode,
};

use super::{
    chunk_info::ChunkInfo,
    secure_channel::SecureChannel,
    security_header::SequenceHeader,
    tcp_types::{
        CHUNK_FINAL, CHUNK_FINAL_ERROR, CHUNK_INTERMEDIATE, CHUNK_MESSAGE,
        CLOSE_SECURE_CHANNEL_MESSAGE, MIN_CHUNK_SIZE, OPEN_SECURE_CHANNEL_MESSAGE,
    },
};

/// The size of a chunk header: type, flag, size and channel id.
pub const MESSAGE_CHUNK_HEADER_SIZE: usize = 3 + 1 + 4 + 4;
/// Offset of the message size field in a chunk header.
pub const MESSAGE_SIZE_OFFSET: usize = 3 + 1;

/// The kind of chunk.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MessageChunkType {
    /// Part of a normal service message.
    Message,
    /// An OpenSecureChannel message.
    OpenSecureChannel,
    /// A CloseSecureChannel message.
    CloseSecureChannel,
}

impl MessageChunkType {
    /// `true` if this is an OpenSecureChannel chunk.
    pub fn is_open_secure_channel(&self) -> bool {
        *self == MessageChunkType::OpenSecureChannel
    }
}

/// The position of a chunk within its message.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MessageIsFinalType {
    /// More chunks follow.
    Intermediate,
    /// The last chunk of the message.
    Final,
    /// The last chunk, aborting the message.
    FinalError,
}

/// The fixed header leading every chunk.
#[derive(Debug, Clone, PartialEq)]
pub struct MessageChunkHeader {
    /// The kind of chunk.
    pub message_type: MessageChunkType,
    /// Whether this chunk is intermediate, final or an abort.
    pub is_final: MessageIsFinalType,
    /// The size of the whole chunk including this header.
    pub message_size: u32,
    /// The id of the secure channel the chunk belongs to.
    pub secure_channel_id: u32,
}

impl SimpleBinaryEncodable for MessageChunkHeader {
    fn byte_len(&self) -> usize {
        MESSAGE_CHUNK_HEADER_SIZE
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        let message_type = match self.message_type {
            MessageChunkType::Message => CHUNK_MESSAGE,
            MessageChunkType::OpenSecureChannel => OPEN_SECURE_CHANNEL_MESSAGE,
            MessageChunkType::CloseSecureChannel => CLOSE_SECURE_CHANNEL_MESSAGE,
        };
        let is_final = match self.is_final {
            MessageIsFinalType::Intermediate => CHUNK_INTERMEDIATE,
            MessageIsFinalType::Final => CHUNK_FINAL,
            MessageIsFinalType::FinalError => CHUNK_FINAL_ERROR,
        };
        process_encode_io_result(stream.write_all(message_type))?;
        write_u8(stream, is_final)?;
        write_u32(stream, self.message_size)?;
        write_u32(stream, self.secure_channel_id)
    }
}

impl SimpleBinaryDecodable for MessageChunkHeader {
    fn decode<S: Read + ?Sized>(stream: &mut S, _: &DecodingOptions) -> EncodingResult<Self> {
        let mut message_type_code = [0u8; 3];
        process_decode_io_result(stream.read_exact(&mut message_type_code))?;
        let message_type = match &message_type_code as &[u8] {
            CHUNK_MESSAGE => MessageChunkType::Message,
            OPEN_SECURE_CHANNEL_MESSAGE => MessageChunkType::OpenSecureChannel,
            CLOSE_SECURE_CHANNEL_MESSAGE => MessageChunkType::CloseSecureChannel,
            r => {
                return Err(Error::decoding(format!(
                    "Invalid message chunk type: {:?}",
                    r
                )));
            }
        };

        let chunk_type_code = read_u8(stream)?;
        let is_final = match chunk_type_code {
            CHUNK_FINAL => MessageIsFinalType::Final,
            CHUNK_INTERMEDIATE => MessageIsFinalType::Intermediate,
            CHUNK_FINAL_ERROR => MessageIsFinalType::FinalError,
            r => {
                return Err(Error::decoding(format!("Invalid message final type: {}", r)));
            }
        };

        Ok(MessageChunkHeader {
            message_type,
            is_final,
            message_size: read_u32(stream)?,
            secure_channel_id: read_u32(stream)?,
        })
    }
}

/// A chunk holds a message or a portion of one. The data may be signed and
/// encrypted. Extracting the message requires all chunks of the message in
/// sequence.
#[derive(Debug, Clone)]
pub struct MessageChunk {
    /// The chunk's entire data including headers, payload, padding and
    /// signature.
    pub data: Vec<u8>,
}

impl SimpleBinaryEncodable for MessageChunk {
    fn byte_len(&self) -> usize {
        self.data.len()
    }

    fn encode<S: Write + ?Sized>(&self, stream: &mut S) -> EncodingResult<()> {
        stream
            .write_all(&self.data)
            .map_err(|e| Error::encoding(format!("Cannot write message chunk to stream: {}", e)))
    }
}

impl SimpleBinaryDecodable for MessageChunk {
    fn decode<S: Read + ?Sized>(
        in_stream: &mut S,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<Self> {
        // Read the header to learn the size, then the rest of the chunk
        let chunk_header = MessageChunkHeader::decode(in_stream, decoding_options)?;
        let message_size = chunk_header.message_size as usize;
        if decoding_options.max_message_size > 0 && message_size > decoding_options.max_message_size
        {
            return Err(Error::new(
                StatusCode::BadTcpMessageTooLarge,
                format!(
                    "Message size {} exceeds maximum message size {}",
                    message_size, decoding_options.max_message_size
                ),
            ));
        }
        if message_size < MESSAGE_CHUNK_HEADER_SIZE {
            return Err(Error::decoding("Chunk size is smaller than its header"));
        }

        let mut data = vec![0u8; message_size];
        let mut stream = Cursor::new(&mut data[..]);
        chunk_header.encode(&mut stream)?;
        in_stream.read_exact(&mut data[MESSAGE_CHUNK_HEADER_SIZE..])?;
        Ok(MessageChunk { data })
    }
}

/// Error returned when the negotiated chunk size is below the protocol
/// minimum, which indicates a broken negotiation.
#[derive(Debug)]
pub struct MessageChunkTooSmall;

impl MessageChunk {
    /// Assemble a plain (unsecured) chunk from its parts.
    pub fn new(
        sequence_number: u32,
        request_id: u32,
        message_type: MessageChunkType,
        is_final: MessageIsFinalType,
        secure_channel: &SecureChannel,
        data: &[u8],
    ) -> EncodingResult<MessageChunk> {
        let security_header = secure_channel.make_security_header(message_type);
        let sequence_header = SequenceHeader {
            sequence_number,
            request_id,
        };

        let message_size = MESSAGE_CHUNK_HEADER_SIZE
            + security_header.byte_len()
            + sequence_header.byte_len()
            + data.len();

        let chunk_header = MessageChunkHeader {
            message_type,
            is_final,
            message_size: message_size as u32,
            secure_channel_id: secure_channel.secure_channel_id(),
        };

        let mut buf = Vec::with_capacity(message_size);
        chunk_header.encode(&mut buf)?;
        security_header.encode(&mut buf)?;
        sequence_header.encode(&mut buf)?;
        buf.write_all(data).map_err(Error::encoding)?;
        Ok(MessageChunk { data: buf })
    }

    /// The largest body that fits in a chunk of `max_chunk_size` bytes,
    /// accounting for the headers, the signature and the minimum padding,
    /// and rounding down so the padded plain text aligns to the cipher
    /// block size.
    pub fn body_size_from_message_size(
        message_type: MessageChunkType,
        secure_channel: &SecureChannel,
        max_chunk_size: usize,
    ) -> Result<usize, MessageChunkTooSmall> {
        if max_chunk_size < MIN_CHUNK_SIZE {
            error!(
                "Chunk size {} is less than the minimum allowed by the spec",
                max_chunk_size
            );
            return Err(MessageChunkTooSmall);
        }

        let security_header = secure_channel.make_security_header(message_type);
        let header_size = MESSAGE_CHUNK_HEADER_SIZE
            + security_header.byte_len()
            + SequenceHeader {
                sequence_number: 0,
                request_id: 0,
            }
            .byte_len();

        let signature_size = secure_channel.signature_size(&security_header);
        let (plain_text_block_size, minimum_padding) =
            secure_channel.padding_block_sizes(&security_header, signature_size, message_type);

        // When encrypting, the encrypted region must be a whole number of
        // plain text blocks, so round the chunk size down to one.
        let aligned_max_chunk_size = if plain_text_block_size > 0 {
            max_chunk_size - (max_chunk_size % plain_text_block_size)
        } else {
            max_chunk_size
        };

        Ok(aligned_max_chunk_size - header_size - signature_size - minimum_padding)
    }

    /// Decode the chunk header from the inner data.
    pub fn message_header(
        &self,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<MessageChunkHeader> {
        let mut stream = Cursor::new(&self.data);
        MessageChunkHeader::decode(&mut stream, decoding_options)
    }

    /// True if this is an OpenSecureChannel chunk.
    pub fn is_open_secure_channel(&self, decoding_options: &DecodingOptions) -> bool {
        self.message_header(decoding_options)
            .map(|header| header.message_type.is_open_secure_channel())
            .unwrap_or(false)
    }

    /// Parse the chunk's layout against the channel.
    pub fn chunk_info(&self, secure_channel: &SecureChannel) -> EncodingResult<ChunkInfo> {
        ChunkInfo::new(self, secure_channel)
    }

    pub(crate) fn encrypted_data_offset(
        &self,
        decoding_options: &DecodingOptions,
    ) -> EncodingResult<usize> {
        let mut stream = Cursor::new(&self.data);
        let message_header = MessageChunkHeader::decode(&mut stream, decoding_options)?;
        super::security_header::SecurityHeader::decode_from_stream(
            &mut stream,
            message_header.message_type.is_open_secure_channel(),
            decoding_options,
        )?;
        Ok(stream.position() as usize)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_round_trip() {
        let header = MessageChunkHeader {
            message_type: MessageChunkType::Message,
            is_final: MessageIsFinalType::Intermediate,
            message_size: 1234,
            secure_channel_id: 77,
        };
        let buf = header.encode_to_vec();
        assert_eq!(&buf[..4], b"MSGC");
        let mut c = Cursor::new(buf);
        assert_eq!(
            MessageChunkHeader::decode(&mut c, &DecodingOptions::test()).unwrap(),
            header
        );
    }

    #[test]
    fn invalid_type_fails() {
        let mut c = Cursor::new(b"XXXF\x10\x00\x00\x00\x00\x00\x00\x00".to_vec());
        assert!(MessageChunkHeader::decode(&mut c, &DecodingOptions::test()).is_err());
    }

    #[test]
    fn oversized_chunk_fails() {
        let header = MessageChunkHeader {
            message_type: MessageChunkType::Message,
            is_final: MessageIsFinalType::Final,
            message_size: 0x7fff_ffff,
            secure_channel_id: 0,
        };
        let mut c = Cursor::new(header.encode_to_vec());
        let e = MessageChunk::decode(&mut c, &DecodingOptions::test()).unwrap_err();
        assert_eq!(e.status(), StatusCode::BadTcpMessageTooLarge);
    }
}
