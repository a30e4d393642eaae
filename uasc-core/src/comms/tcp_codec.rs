// UASC for Rust
// SPDX-License-Identifier: MPL-2.0
// Copyright (C) 2017-2024 Adam Lock

//! A tokio codec that splits the inbound byte stream into UA TCP frames:
//! handshake messages and secured chunks.

use std::io::Cursor;

use bytes::{Buf, BytesMut};
use tokio_util::codec::Decoder;

use uasc_types::{DecodingOptions, SimpleBinaryDecodable};

use super::{
    message_chunk::MessageChunk,
    tcp_types::{
        AcknowledgeMessage, ErrorMessage, HelloMessage, ACKNOWLEDGE_MESSAGE, CHUNK_MESSAGE,
        CLOSE_SECURE_CHANNEL_MESSAGE, ERROR_MESSAGE, HELLO_MESSAGE, MESSAGE_HEADER_LEN,
        OPEN_SECURE_CHANNEL_MESSAGE,
    },
};

/// One frame read off the wire.
#[derive(Debug)]
pub enum Message {
    /// A HELLO handshake frame.
    Hello(HelloMessage),
    /// An ACKNOWLEDGE handshake frame.
    Acknowledge(AcknowledgeMessage),
    /// An ERROR frame.
    Error(ErrorMessage),
    /// A message chunk, still secured.
    Chunk(MessageChunk),
}

/// Reads whole frames from the inbound stream: the 8 byte header first,
/// then the rest of the frame once it has arrived.
pub struct TcpCodec {
    decoding_options: DecodingOptions,
}

impl TcpCodec {
    /// Create a codec enforcing the limits in the decoding options.
    pub fn new(decoding_options: DecodingOptions) -> TcpCodec {
        TcpCodec { decoding_options }
    }
}

impl Decoder for TcpCodec {
    type Item = Message;
    type Error = std::io::Error;

    fn decode(&mut self, buf: &mut BytesMut) -> Result<Option<Message>, std::io::Error> {
        if buf.len() < MESSAGE_HEADER_LEN {
            return Ok(None);
        }

        let message_type: [u8; 3] = buf[0..3].try_into().expect("3 bytes");
        let frame_size =
            u32::from_le_bytes(buf[4..8].try_into().expect("4 bytes")) as usize;

        if frame_size < MESSAGE_HEADER_LEN {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Frame size {} is smaller than the frame header", frame_size),
            ));
        }
        let max = self.decoding_options.max_message_size;
        if max > 0 && frame_size > max {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("Frame size {} exceeds the receive limit {}", frame_size, max),
            ));
        }
        if buf.len() < frame_size {
            buf.reserve(frame_size - buf.len());
            return Ok(None);
        }

        let frame = buf.copy_to_bytes(frame_size);
        let mut stream = Cursor::new(&frame[..]);
        let message = match &message_type as &[u8] {
            HELLO_MESSAGE => Message::Hello(
                HelloMessage::decode(&mut stream, &self.decoding_options).map_err(to_io_error)?,
            ),
            ACKNOWLEDGE_MESSAGE => Message::Acknowledge(
                AcknowledgeMessage::decode(&mut stream, &self.decoding_options)
                    .map_err(to_io_error)?,
            ),
            ERROR_MESSAGE => Message::Error(
                ErrorMessage::decode(&mut stream, &self.decoding_options).map_err(to_io_error)?,
            ),
            CHUNK_MESSAGE | OPEN_SECURE_CHANNEL_MESSAGE | CLOSE_SECURE_CHANNEL_MESSAGE => {
                Message::Chunk(
                    MessageChunk::decode(&mut stream, &self.decoding_options)
                        .map_err(to_io_error)?,
                )
            }
            other => {
                return Err(std::io::Error::new(
                    std::io::ErrorKind::InvalidData,
                    format!("Unrecognized frame type {:?}", other),
                ));
            }
        };
        Ok(Some(message))
    }
}

fn to_io_error(e: uasc_types::Error) -> std::io::Error {
    std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uasc_types::SimpleBinaryEncodable;

    #[test]
    fn partial_frames_wait() {
        let mut codec = TcpCodec::new(DecodingOptions::test());
        let hello = HelloMessage::new("opc.tcp://localhost", 65536, 65536, 0, 0);
        let encoded = hello.encode_to_vec();

        let mut buf = BytesMut::new();
        buf.extend_from_slice(&encoded[..6]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&encoded[6..]);
        match codec.decode(&mut buf).unwrap() {
            Some(Message::Hello(decoded)) => assert_eq!(decoded, hello),
            other => panic!("Expected a hello, got {:?}", other),
        }
        assert!(buf.is_empty());
    }

    #[test]
    fn oversized_frame_is_an_error() {
        let mut options = DecodingOptions::test();
        options.max_message_size = 1024;
        let mut codec = TcpCodec::new(options);

        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"MSGF");
        buf.extend_from_slice(&100_000u32.to_le_bytes());
        assert!(codec.decode(&mut buf).is_err());
    }

    #[test]
    fn garbage_type_is_an_error() {
        let mut codec = TcpCodec::new(DecodingOptions::test());
        let mut buf = BytesMut::new();
        buf.extend_from_slice(b"XYZF");
        buf.extend_from_slice(&8u32.to_le_bytes());
        assert!(codec.decode(&mut buf).is_err());
    }
}
