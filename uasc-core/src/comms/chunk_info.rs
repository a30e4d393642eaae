// UASC for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! Parsed layout of a chunk: its headers and where the body sits.

use std::io::Cursor;

use uasc_types::{EncodingResult, Error, SimpleBinaryDecodable};

use super::{
    message_chunk::{MessageChunk, MessageChunkHeader},
    secure_channel::SecureChannel,
    security_header::{SecurityHeader, SequenceHeader},
};

/// The headers of a chunk plus the offset and length of the body slice.
/// Only valid for chunks whose security has already been removed.
#[derive(Debug, Clone)]
pub struct ChunkInfo {
    /// The chunk header.
    pub message_header: MessageChunkHeader,
    /// The security header, symmetric or asymmetric.
    pub security_header: SecurityHeader,
    /// The sequence header.
    pub sequence_header: SequenceHeader,
    /// Byte offset of the body within the chunk data.
    pub body_offset: usize,
    /// Length of the body in bytes.
    pub body_length: usize,
}

impl ChunkInfo {
    /// Parse the layout of `chunk` against the channel's decoding options.
    pub fn new(chunk: &MessageChunk, secure_channel: &SecureChannel) -> EncodingResult<ChunkInfo> {
        let decoding_options = secure_channel.decoding_options();
        let mut stream = Cursor::new(&chunk.data);

        let message_header = MessageChunkHeader::decode(&mut stream, &decoding_options)?;
        if message_header.message_size as usize != chunk.data.len() {
            return Err(Error::decoding(format!(
                "Chunk header message size {} does not match the chunk length {}",
                message_header.message_size,
                chunk.data.len()
            )));
        }

        let security_header = SecurityHeader::decode_from_stream(
            &mut stream,
            message_header.message_type.is_open_secure_channel(),
            &decoding_options,
        )?;
        let sequence_header = SequenceHeader::decode(&mut stream, &decoding_options)?;

        let body_offset = stream.position() as usize;
        if body_offset > chunk.data.len() {
            return Err(Error::decoding("Chunk is too short to hold its headers"));
        }

        Ok(ChunkInfo {
            message_header,
            security_header,
            sequence_header,
            body_offset,
            body_length: chunk.data.len() - body_offset,
        })
    }
}
